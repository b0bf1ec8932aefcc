//! tirc - chat over Tor with encrypted private messages
//!
//! The session flow:
//! 1. Open a stream to the server through the SOCKS5 proxy
//! 2. Wrap it in TLS and refuse to continue if the handshake failed
//! 3. Load stored fingerprints and the local identity
//! 4. Register, then interleave typed commands with server events
//! 5. On exit, end every encrypted session, quit, and save fingerprints

use anyhow::Result;
use tirc::{ClientConfig, ClientContext, TircCli};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; chat output owns stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tirc=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Parse command-line arguments
    let cli = TircCli::parse_args();

    // Create configuration from CLI
    let config = ClientConfig::from_cli(cli)?;

    let mut ctx = ClientContext::start(config).await?;
    let result = ctx.run().await;
    ctx.shutdown().await;

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
