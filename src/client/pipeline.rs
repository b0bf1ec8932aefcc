// Inbound and outbound protocol loops
//
// One task reads lines, answers keepalives inline, filters ignored senders
// and runs private messages through the secure overlay before handing events
// to the consumer. The other task writes queued lines. Both share the write
// half so an inline PONG goes out ahead of anything still queued.

use crate::client::error::PipelineError;
use crate::client::message::{self, Message};
use crate::client::overlay::{SecureOverlay, SecurityNotice};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of both the inbound event queue and the outbound line queue
pub const QUEUE_CAPACITY: usize = 256;

pub type SharedOverlay = Arc<Mutex<SecureOverlay>>;

type SharedWriter<S> = Arc<Mutex<WriteHalf<S>>>;

/// What the consumer receives from the inbound loop
#[derive(Debug)]
pub enum InboundEvent {
    Message(Message),
    Security(SecurityNotice),
}

/// Nicks whose messages are dropped before dispatch
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    nicks: Arc<RwLock<HashSet<String>>>,
}

impl IgnoreList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the nick was already ignored
    pub async fn add(&self, nick: &str) -> bool {
        self.nicks.write().await.insert(nick.to_lowercase())
    }

    /// Returns false if the nick was not ignored
    pub async fn remove(&self, nick: &str) -> bool {
        self.nicks.write().await.remove(&nick.to_lowercase())
    }

    pub async fn contains(&self, nick: &str) -> bool {
        self.nicks.read().await.contains(&nick.to_lowercase())
    }

    pub async fn list(&self) -> Vec<String> {
        let mut nicks: Vec<String> = self.nicks.read().await.iter().cloned().collect();
        nicks.sort();
        nicks
    }

    /// Carry an ignore over to the sender's new nick
    pub async fn rename(&self, old: &str, new: &str) {
        let mut nicks = self.nicks.write().await;
        if nicks.remove(&old.to_lowercase()) {
            nicks.insert(new.to_lowercase());
        }
    }
}

/// Handles to the running loops
pub struct Pipeline {
    outbound: mpsc::Sender<String>,
    inbound_task: JoinHandle<Result<(), PipelineError>>,
    outbound_task: JoinHandle<Result<(), PipelineError>>,
}

impl Pipeline {
    /// Start both loops over `stream`. The returned receiver closes when the
    /// connection is lost.
    pub fn spawn<S>(
        stream: S,
        overlay: SharedOverlay,
        ignore: IgnoreList,
    ) -> (Self, mpsc::Receiver<InboundEvent>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let writer = Arc::new(Mutex::new(writer));

        let (event_tx, event_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (line_tx, line_rx) = mpsc::channel(QUEUE_CAPACITY);

        let inbound_task = tokio::spawn(inbound_loop(
            reader,
            writer.clone(),
            event_tx,
            line_tx.clone(),
            overlay,
            ignore,
        ));
        let outbound_task = tokio::spawn(outbound_loop(writer, line_rx));

        let pipeline = Self {
            outbound: line_tx,
            inbound_task,
            outbound_task,
        };
        (pipeline, event_rx)
    }

    /// Queue one line for sending. Returns false once the outbound loop is gone.
    pub async fn send(&self, line: String) -> bool {
        self.outbound.send(line).await.is_ok()
    }

    pub async fn send_all(&self, lines: Vec<String>) -> bool {
        for line in lines {
            if !self.send(line).await {
                return false;
            }
        }
        true
    }

    /// Stop reading, let queued lines drain for up to `grace`, then stop
    pub async fn shutdown(self, grace: Duration) {
        self.inbound_task.abort();
        drop(self.outbound);

        let mut outbound_task = self.outbound_task;
        match tokio::time::timeout(grace, &mut outbound_task).await {
            Ok(Ok(Ok(()))) => debug!("Outbound queue drained"),
            Ok(Ok(Err(e))) => warn!("Outbound loop ended with error: {}", e),
            Ok(Err(e)) => warn!("Outbound task failed: {}", e),
            Err(_) => {
                warn!("Timed out draining the outbound queue");
                outbound_task.abort();
            }
        }
    }
}

async fn write_line<S: AsyncWrite>(writer: &SharedWriter<S>, line: &str) -> std::io::Result<()> {
    let mut writer = writer.lock().await;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await
}

async fn inbound_loop<S>(
    reader: ReadHalf<S>,
    writer: SharedWriter<S>,
    events: mpsc::Sender<InboundEvent>,
    outbound: mpsc::Sender<String>,
    overlay: SharedOverlay,
    ignore: IgnoreList,
) -> Result<(), PipelineError>
where
    S: AsyncRead + AsyncWrite,
{
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::new();

    loop {
        raw.clear();

        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => {
                info!("Server closed the connection");
                return Err(PipelineError::Eof);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Error reading from server: {}", e);
                return Err(PipelineError::Read(e));
            }
        }

        // Peers send whatever encoding they like
        let line = String::from_utf8_lossy(&raw);
        if line.trim().is_empty() {
            continue;
        }
        debug!("<< {}", line.trim_end());

        let mut msg = Message::parse(&line);

        if !msg.nick.is_empty() && ignore.contains(&msg.nick).await {
            if msg.command == "NICK" {
                let new_nick = if msg.content.is_empty() { &msg.recipient } else { &msg.content };
                ignore.rename(&msg.nick, new_nick).await;
            }
            continue;
        }

        if msg.command == "PING" {
            let payload = if msg.content.is_empty() { &msg.recipient } else { &msg.content };
            if let Err(e) = write_line(&writer, &message::pong(payload)).await {
                error!("Failed to answer keepalive: {}", e);
                return Err(PipelineError::Write(e));
            }
            continue;
        }

        if msg.is_private() && !msg.nick.is_empty() {
            let incoming = {
                let mut overlay = overlay.lock().await;
                overlay.receive(&msg.nick, &msg.content)
            };

            for reply in incoming.lines {
                if outbound.send(reply).await.is_err() {
                    warn!("Outbound queue closed, dropping session reply");
                }
            }
            for notice in incoming.notices {
                if events.send(InboundEvent::Security(notice)).await.is_err() {
                    return Ok(());
                }
            }

            if incoming.plaintext.is_empty() {
                continue;
            }
            msg = msg.with_content(incoming.plaintext, incoming.encrypted);
        }

        if events.send(InboundEvent::Message(msg)).await.is_err() {
            // Consumer is gone
            return Ok(());
        }
    }
}

async fn outbound_loop<S>(
    writer: SharedWriter<S>,
    mut lines: mpsc::Receiver<String>,
) -> Result<(), PipelineError>
where
    S: AsyncWrite,
{
    while let Some(line) = lines.recv().await {
        if let Err(e) = write_line(&writer, &line).await {
            error!("Error writing to server: {}", e);
            return Err(PipelineError::Write(e));
        }
        debug!(">> {}", line);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ignore_list_is_case_insensitive() {
        let ignore = IgnoreList::new();
        assert!(ignore.add("Troll").await);
        assert!(!ignore.add("troll").await);
        assert!(ignore.contains("TROLL").await);

        assert!(ignore.remove("tRoLl").await);
        assert!(!ignore.contains("troll").await);
    }

    #[tokio::test]
    async fn test_ignore_follows_rename() {
        let ignore = IgnoreList::new();
        ignore.add("troll").await;
        ignore.rename("Troll", "Troll2").await;
        ignore.rename("nobody", "somebody").await;

        assert_eq!(ignore.list().await, vec!["troll2".to_string()]);
    }
}
