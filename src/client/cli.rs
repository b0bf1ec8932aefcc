// Command-line flags for the chat client

use clap::Parser;
use std::path::PathBuf;

/// tirc command-line flags
#[derive(Debug, Parser)]
#[command(name = "tirc")]
#[command(about = "IRC client tunneled over Tor with end-to-end encrypted private messages")]
pub struct TircCli {
    /// Server to connect to (host:port)
    #[arg(short, long, default_value = "irc.oftc.net:6697")]
    pub server: String,

    /// Nickname (random when omitted)
    #[arg(short, long)]
    pub nick: Option<String>,

    /// SOCKS5 proxy, normally the local Tor client (host:port)
    #[arg(short, long, default_value = "127.0.0.1:9050")]
    pub proxy: String,

    /// Connect without TLS
    #[arg(long)]
    pub no_tls: bool,

    /// Show join, part and quit messages
    #[arg(long)]
    pub show_joins: bool,

    /// Directory for the fingerprint store (default: ~/.tirc)
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
}

impl TircCli {
    /// Parse from command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the default state directory
    pub fn state_dir() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".tirc")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = TircCli::try_parse_from(["tirc"]).unwrap();

        assert_eq!(cli.server, "irc.oftc.net:6697");
        assert_eq!(cli.proxy, "127.0.0.1:9050");
        assert!(cli.nick.is_none());
        assert!(!cli.no_tls);
        assert!(!cli.show_joins);
        assert!(cli.state_dir.is_none());
    }

    #[test]
    fn test_cli_parsing() {
        let cli = TircCli::try_parse_from([
            "tirc",
            "--server",
            "irc.example.net:6667",
            "--nick",
            "zed",
            "--no-tls",
            "--show-joins",
            "--state-dir",
            "/tmp/tirc-test",
        ])
        .unwrap();

        assert_eq!(cli.server, "irc.example.net:6667");
        assert_eq!(cli.nick.as_deref(), Some("zed"));
        assert!(cli.no_tls);
        assert!(cli.show_joins);
        assert_eq!(cli.state_dir, Some(PathBuf::from("/tmp/tirc-test")));
    }

    #[test]
    fn test_state_dir() {
        let dir = TircCli::state_dir();
        assert!(dir.ends_with(".tirc"));
    }
}
