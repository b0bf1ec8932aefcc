// Client context: everything one chat session owns
//
// Built once at startup and passed explicitly to the command layer. Owns the
// pipeline handles, the overlay (with the trust store inside it), the ignore
// list and the current target.

use crate::client::commands::{self, Command, Flow};
use crate::client::config::ClientConfig;
use crate::client::conversation::ConversationProvider;
use crate::client::display;
use crate::client::error::TrustStoreError;
use crate::client::fingerprint;
use crate::client::message;
use crate::client::overlay::{Outcome, SecureOverlay};
use crate::client::pipeline::{IgnoreList, InboundEvent, Pipeline, SharedOverlay};
use crate::client::sealed::SealedProvider;
use crate::client::transport::{self, TransportSecurity};
use crate::client::trust::TrustStore;
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

const QUIT_REASON: &str = "Leaving.";

/// How long queued lines get to drain at shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ClientContext {
    config: ClientConfig,
    target: Option<String>,
    overlay: SharedOverlay,
    ignore: IgnoreList,
    pipeline: Pipeline,
    events: Option<mpsc::Receiver<InboundEvent>>,
}

impl ClientContext {
    /// Connect, verify transport security, load the trust store and register
    pub async fn start(config: ClientConfig) -> Result<Self> {
        info!("Connecting to {} via {}", config.endpoint, config.proxy);
        let conn = transport::connect(&config.endpoint, &config.proxy)
            .await
            .context("Failed to connect")?;

        for line in display::render_security(&conn.security) {
            println!("{}", line);
        }
        if let TransportSecurity::HandshakeFailed { reason } = &conn.security {
            bail!("Refusing to continue over a failed TLS handshake: {}", reason);
        }

        let (trust, err) = TrustStore::load(&config.trust_path);
        match err {
            Some(TrustStoreError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound => {}
            Some(e) => println!("! {}; starting with no stored fingerprints", e),
            None => {}
        }

        let provider = match trust.identity().map(SealedProvider::from_identity) {
            Some(Ok(provider)) => provider,
            Some(Err(e)) => {
                warn!("Stored identity is unusable ({}), generating a new one", e);
                SealedProvider::generate()
            }
            None => {
                info!("Generating a new identity");
                SealedProvider::generate()
            }
        };
        println!("* Your fingerprint is {}", fingerprint::format(&provider.fingerprint()));

        let ctx = Self::with_stream(config, conn.stream, Box::new(provider), trust);
        ctx.register().await;
        Ok(ctx)
    }

    /// Build a context over an already established stream
    pub fn with_stream<S>(
        config: ClientConfig,
        stream: S,
        provider: Box<dyn ConversationProvider>,
        trust: TrustStore,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let overlay = Arc::new(Mutex::new(SecureOverlay::new(provider, trust)));
        let ignore = IgnoreList::new();
        let (pipeline, events) = Pipeline::spawn(stream, overlay.clone(), ignore.clone());

        Self {
            config,
            target: None,
            overlay,
            ignore,
            pipeline,
            events: Some(events),
        }
    }

    /// Send USER and NICK
    pub async fn register(&self) {
        let lines = message::register(&self.config.nick);
        self.pipeline.send_all(lines.to_vec()).await;
        info!("Registering as {}", self.config.nick);
    }

    /// Interleave typed commands and inbound events until /quit, end of
    /// input, or connection loss
    pub async fn run(&mut self) -> Result<()> {
        let mut events = self.events.take().context("Session loop already ran")?;
        let mut input = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                line = input.next_line() => match line.context("Failed to read from stdin")? {
                    Some(line) => {
                        if self.handle_line(&line).await == Flow::Quit {
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                },
                event = events.recv() => match event {
                    Some(event) => self.show(event),
                    None => bail!("Connection to {} lost", self.config.endpoint),
                },
            }
        }
    }

    /// Parse and execute one input line
    pub async fn handle_line(&mut self, line: &str) -> Flow {
        if line.trim().is_empty() {
            return Flow::Continue;
        }
        commands::execute(self, Command::parse(line)).await
    }

    /// Render one inbound event
    pub fn show(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Message(msg) => {
                if msg.command == "NICK" && msg.nick.eq_ignore_ascii_case(&self.config.nick) {
                    let new_nick = if msg.content.is_empty() { &msg.recipient } else { &msg.content };
                    self.config.nick = new_nick.clone();
                }
                if let Some(line) = display::render_message(&msg, self.config.show_joins) {
                    println!("{}", line);
                }
            }
            InboundEvent::Security(notice) => println!("{}", display::render_notice(&notice)),
        }
    }

    /// End every secure session, say goodbye, drain the queue and persist the
    /// trust store. Runs on every exit path once the context exists.
    pub async fn shutdown(self) {
        self.shutdown_within(DRAIN_TIMEOUT).await
    }

    /// `shutdown` with an explicit bound on each of the farewell and drain
    /// steps
    pub async fn shutdown_within(self, grace: Duration) {
        let mut farewell = self.overlay.lock().await.end_all();
        farewell.push(message::quit(QUIT_REASON));
        if tokio::time::timeout(grace, self.pipeline.send_all(farewell))
            .await
            .is_err()
        {
            warn!("Timed out queueing farewell lines");
        }
        self.pipeline.shutdown(grace).await;

        let saved = self.overlay.lock().await.save_trust();
        if let Err(e) = saved {
            warn!("Failed to save trust store: {}", e);
            println!("! Fingerprints were not saved: {}", e);
        }
        info!("Disconnected from {}", self.config.endpoint);
    }

    /// Inbound events, for callers that drive their own loop instead of `run`
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<InboundEvent>> {
        self.events.take()
    }

    // ========== Accessors used by the command layer ==========

    pub fn nick(&self) -> &str {
        &self.config.nick
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn set_target(&mut self, target: String) {
        self.target = Some(target);
    }

    pub fn clear_target(&mut self) {
        self.target = None;
    }

    pub fn overlay(&self) -> &SharedOverlay {
        &self.overlay
    }

    pub fn ignore(&self) -> &IgnoreList {
        &self.ignore
    }

    /// Queue a protocol line
    pub async fn send(&self, line: String) {
        if !self.pipeline.send(line).await {
            warn!("Outbound queue is closed");
        }
    }

    /// Queue an overlay outcome's lines and show its notices
    pub async fn apply(&self, outcome: Outcome) {
        for notice in &outcome.notices {
            self.print(&display::render_notice(notice));
        }
        if !self.pipeline.send_all(outcome.lines).await {
            warn!("Outbound queue is closed");
        }
    }

    pub fn print(&self, line: &str) {
        println!("{}", line);
    }
}
