// Validated client configuration

use crate::client::cli::TircCli;
use crate::client::fingerprint;
use crate::client::transport::Endpoint;
use anyhow::{Context, Result};
use rand::Rng;
use std::path::PathBuf;

/// Everything the client needs to start, derived from the CLI
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    /// SOCKS5 proxy address (host:port)
    pub proxy: String,
    pub nick: String,
    /// Show join/part/quit noise
    pub show_joins: bool,
    /// Fingerprint store for this server
    pub trust_path: PathBuf,
}

impl ClientConfig {
    /// Create config from CLI arguments
    pub fn from_cli(cli: TircCli) -> Result<Self> {
        let endpoint = Endpoint::parse(&cli.server, !cli.no_tls)
            .context("Invalid --server")?;
        Endpoint::parse(&cli.proxy, false).context("Invalid --proxy")?;

        let nick = match cli.nick {
            Some(nick) if !nick.trim().is_empty() => nick.trim().to_string(),
            _ => random_nick(),
        };

        let state_dir = cli.state_dir.unwrap_or_else(TircCli::state_dir);
        let trust_path = trust_path(&state_dir, &endpoint.host);

        Ok(Self {
            endpoint,
            proxy: cli.proxy,
            nick,
            show_joins: cli.show_joins,
            trust_path,
        })
    }
}

/// `<state_dir>/fingerprints-<host>.json`
pub fn trust_path(state_dir: &std::path::Path, host: &str) -> PathBuf {
    state_dir.join(format!("fingerprints-{}.json", host))
}

/// Pronounceable two-syllable nick
pub fn random_nick() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{}{}",
        fingerprint::syllable(rng.gen()),
        fingerprint::syllable(rng.gen())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_from_cli_defaults() {
        let cli = TircCli::try_parse_from(["tirc", "--state-dir", "/var/tmp/t"]).unwrap();
        let config = ClientConfig::from_cli(cli).unwrap();

        assert_eq!(config.endpoint.host, "irc.oftc.net");
        assert_eq!(config.endpoint.port, 6697);
        assert!(config.endpoint.tls);
        assert_eq!(config.proxy, "127.0.0.1:9050");
        assert_eq!(config.nick.len(), 6);
        assert_eq!(
            config.trust_path,
            PathBuf::from("/var/tmp/t/fingerprints-irc.oftc.net.json")
        );
    }

    #[test]
    fn test_from_cli_overrides() {
        let cli = TircCli::try_parse_from([
            "tirc", "--server", "localhost:6667", "--no-tls", "--nick", "zed",
        ])
        .unwrap();
        let config = ClientConfig::from_cli(cli).unwrap();

        assert!(!config.endpoint.tls);
        assert_eq!(config.nick, "zed");
        assert!(config.trust_path.ends_with(".tirc/fingerprints-localhost.json"));
    }

    #[test]
    fn test_from_cli_rejects_bad_addresses() {
        let cli = TircCli::try_parse_from(["tirc", "--server", "no-port"]).unwrap();
        assert!(ClientConfig::from_cli(cli).is_err());

        let cli = TircCli::try_parse_from(["tirc", "--proxy", "9050"]).unwrap();
        assert!(ClientConfig::from_cli(cli).is_err());
    }

    #[test]
    fn test_random_nick_is_pronounceable() {
        let nick = random_nick();
        assert_eq!(nick.len(), 6);
        assert!(nick.chars().all(|c| c.is_ascii_lowercase()));
    }
}
