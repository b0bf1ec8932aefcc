// Proxy-tunneled transport with optional cipher-restricted TLS
//
// Every connection goes through a SOCKS5 proxy with fresh random credentials
// so the proxy (normally Tor) keeps connections on separate circuits. The
// hostname is handed to the proxy unresolved.

use crate::client::error::TransportError;
use crate::client::fingerprint;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::crypto::{ring, CryptoProvider};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore, SupportedCipherSuite};
use tokio_rustls::TlsConnector;
use tokio_socks::tcp::Socks5Stream;
use tracing::{debug, info, warn};

/// TLS 1.2 cipher suites we accept, most preferred first, as IANA codes.
/// Suites the TLS provider does not implement are never offered.
pub const CIPHER_ALLOW_LIST: [(u16, &str); 11] = [
    (0xC02C, "ECDHE_ECDSA_WITH_AES_256_GCM_SHA384"),
    (0xC030, "ECDHE_RSA_WITH_AES_256_GCM_SHA384"),
    (0xC00A, "ECDHE_ECDSA_WITH_AES_256_CBC_SHA"),
    (0xC014, "ECDHE_RSA_WITH_AES_256_CBC_SHA"),
    (0xC02B, "ECDHE_ECDSA_WITH_AES_128_GCM_SHA256"),
    (0xC02F, "ECDHE_RSA_WITH_AES_128_GCM_SHA256"),
    (0xC009, "ECDHE_ECDSA_WITH_AES_128_CBC_SHA"),
    (0xC013, "ECDHE_RSA_WITH_AES_128_CBC_SHA"),
    (0x009D, "RSA_WITH_AES_256_GCM_SHA384"),
    (0x009C, "RSA_WITH_AES_128_GCM_SHA256"),
    (0x0035, "RSA_WITH_AES_256_CBC_SHA"),
];

const CREDENTIAL_LEN: usize = 16;

/// Where to connect and whether to wrap the stream in TLS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Endpoint {
    /// Parse `host:port`; IPv6 hosts may be bracketed
    pub fn parse(address: &str, tls: bool) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidEndpoint(address.to_string());

        let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port: u16 = port.parse().map_err(|_| invalid())?;
        if host.is_empty() || port == 0 {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One certificate from the server's chain
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub index: usize,
    pub subject: String,
    pub issuer: String,
    /// SHA-256 of the DER encoding
    pub fingerprint: Vec<u8>,
}

impl std::fmt::Display for CertificateInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} s:{} i:{} {}",
            self.index,
            self.subject,
            self.issuer,
            fingerprint::format(&self.fingerprint)
        )
    }
}

#[derive(Debug, Clone)]
pub struct TlsSummary {
    pub cipher: String,
    pub chain: Vec<CertificateInfo>,
}

/// What protects the byte stream
#[derive(Debug, Clone)]
pub enum TransportSecurity {
    Plaintext,
    Tls(TlsSummary),
    /// TLS was requested but the handshake failed; the stream is not
    /// confidential and must not be used for the session
    HandshakeFailed { reason: String },
}

impl TransportSecurity {
    pub fn is_usable(&self) -> bool {
        !matches!(self, TransportSecurity::HandshakeFailed { .. })
    }
}

/// The tunneled byte stream
pub enum TunnelStream {
    Plain(Socks5Stream<TcpStream>),
    Tls(Box<TlsStream<Socks5Stream<TcpStream>>>),
}

impl AsyncRead for TunnelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TunnelStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            TunnelStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TunnelStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            TunnelStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            TunnelStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TunnelStream::Plain(s) => Pin::new(s).poll_flush(cx),
            TunnelStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TunnelStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            TunnelStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

pub struct Connection {
    pub stream: TunnelStream,
    pub security: TransportSecurity,
}

/// Random SOCKS5 username/password pair for stream isolation
fn isolation_credentials() -> (String, String) {
    let mut rng = rand::thread_rng();
    let mut token = || {
        (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(CREDENTIAL_LEN)
            .map(char::from)
            .collect::<String>()
    };
    (token(), token())
}

/// The TLS provider restricted to the allow-list, TLS 1.2 suites in list order
pub fn restricted_provider() -> CryptoProvider {
    let base = ring::default_provider();

    let mut suites: Vec<SupportedCipherSuite> = base
        .cipher_suites
        .iter()
        .filter(|s| matches!(s, SupportedCipherSuite::Tls13(_)))
        .copied()
        .collect();

    for (code, name) in CIPHER_ALLOW_LIST {
        match base.cipher_suites.iter().find(|s| u16::from(s.suite()) == code) {
            Some(suite) => suites.push(*suite),
            None => debug!("Cipher suite {} not available, skipping", name),
        }
    }

    CryptoProvider {
        cipher_suites: suites,
        ..base
    }
}

fn tls_connector() -> Result<TlsConnector, TransportError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(restricted_provider()))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Connect to `endpoint` through the SOCKS5 proxy at `proxy`
pub async fn connect(endpoint: &Endpoint, proxy: &str) -> Result<Connection, TransportError> {
    let socket = TcpStream::connect(proxy)
        .await
        .map_err(|source| TransportError::Proxy {
            proxy: proxy.to_string(),
            source,
        })?;

    let (user, pass) = isolation_credentials();
    let tunnel = Socks5Stream::connect_with_password_and_socket(
        socket,
        (endpoint.host.as_str(), endpoint.port),
        &user,
        &pass,
    )
    .await
    .map_err(|source| TransportError::Dial {
        target: endpoint.to_string(),
        source,
    })?;
    info!("Proxy {} opened a stream to {}", proxy, endpoint);

    if !endpoint.tls {
        return Ok(Connection {
            stream: TunnelStream::Plain(tunnel),
            security: TransportSecurity::Plaintext,
        });
    }

    let server_name = ServerName::try_from(endpoint.host.clone())
        .map_err(|_| TransportError::ServerName(endpoint.host.clone()))?;

    match tls_connector()?.connect(server_name, tunnel).into_fallible().await {
        Ok(tls) => {
            let summary = summarize(&tls);
            info!("TLS established with {} using {}", endpoint, summary.cipher);
            Ok(Connection {
                stream: TunnelStream::Tls(Box::new(tls)),
                security: TransportSecurity::Tls(summary),
            })
        }
        Err((e, raw)) => {
            warn!("TLS handshake with {} failed: {}", endpoint, e);
            Ok(Connection {
                stream: TunnelStream::Plain(raw),
                security: TransportSecurity::HandshakeFailed {
                    reason: e.to_string(),
                },
            })
        }
    }
}

fn summarize(tls: &TlsStream<Socks5Stream<TcpStream>>) -> TlsSummary {
    let (_, session) = tls.get_ref();

    let cipher = session
        .negotiated_cipher_suite()
        .map(|s| format!("{:?}", s.suite()))
        .unwrap_or_else(|| "unknown".to_string());

    let chain = session
        .peer_certificates()
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(index, der)| describe_certificate(index, der.as_ref()))
        .collect();

    TlsSummary { cipher, chain }
}

/// Subject and issuer common names plus the SHA-256 fingerprint of `der`
pub fn describe_certificate(index: usize, der: &[u8]) -> CertificateInfo {
    let (subject, issuer) = match x509_parser::parse_x509_certificate(der) {
        Ok((_, cert)) => (common_name(cert.subject()), common_name(cert.issuer())),
        Err(e) => {
            debug!("Could not parse certificate {}: {}", index, e);
            (String::new(), String::new())
        }
    };

    CertificateInfo {
        index,
        subject,
        issuer,
        fingerprint: fingerprint::digest(der),
    }
}

fn common_name(name: &x509_parser::x509::X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parse() {
        let ep = Endpoint::parse("irc.oftc.net:6697", true).unwrap();
        assert_eq!(ep.host, "irc.oftc.net");
        assert_eq!(ep.port, 6697);
        assert!(ep.tls);
        assert_eq!(ep.to_string(), "irc.oftc.net:6697");

        let ep = Endpoint::parse("[::1]:6667", false).unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.port, 6667);
    }

    #[test]
    fn test_endpoint_rejects_garbage() {
        for bad in ["", "host", "host:", ":6697", "host:notaport", "host:0", "host:70000"] {
            assert!(
                matches!(Endpoint::parse(bad, true), Err(TransportError::InvalidEndpoint(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_allow_list_has_no_weak_ciphers() {
        let mut codes: Vec<u16> = CIPHER_ALLOW_LIST.iter().map(|(c, _)| *c).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), 11);

        for (_, name) in CIPHER_ALLOW_LIST {
            assert!(!name.contains("RC4") && !name.contains("DES"));
        }
    }

    #[test]
    fn test_provider_follows_allow_list_order() {
        let provider = restricted_provider();
        let tls12: Vec<u16> = provider
            .cipher_suites
            .iter()
            .filter(|s| matches!(s, SupportedCipherSuite::Tls12(_)))
            .map(|s| u16::from(s.suite()))
            .collect();

        assert_eq!(tls12, vec![0xC02C, 0xC030, 0xC02B, 0xC02F]);
    }

    #[test]
    fn test_credentials_are_fresh() {
        let (u1, p1) = isolation_credentials();
        let (u2, _) = isolation_credentials();

        assert_eq!(u1.len(), CREDENTIAL_LEN);
        assert_eq!(p1.len(), CREDENTIAL_LEN);
        assert_ne!(u1, u2);
        assert!(u1.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_describe_garbage_certificate() {
        let info = describe_certificate(2, b"not a certificate");
        assert_eq!(info.index, 2);
        assert!(info.subject.is_empty());
        assert_eq!(info.fingerprint, fingerprint::digest(b"not a certificate"));
    }

    #[tokio::test]
    async fn test_unreachable_proxy() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let ep = Endpoint::parse("irc.example.net:6697", true).unwrap();
        let result = connect(&ep, &addr).await;
        assert!(matches!(result, Err(TransportError::Proxy { .. })));
    }
}
