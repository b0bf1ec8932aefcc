// Error types for the transport, pipeline, session and trust-store layers

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures while establishing the tunneled connection
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint '{0}', expected host:port")]
    InvalidEndpoint(String),

    #[error("failed to reach SOCKS5 proxy {proxy}: {source}")]
    Proxy {
        proxy: String,
        #[source]
        source: io::Error,
    },

    #[error("proxy could not open a stream to {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: tokio_socks::Error,
    },

    #[error("invalid TLS server name '{0}'")]
    ServerName(String),

    #[error("TLS configuration rejected: {0}")]
    TlsConfig(#[from] tokio_rustls::rustls::Error),
}

/// Failures that end one direction of the pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("connection lost while reading: {0}")]
    Read(#[source] io::Error),

    #[error("connection closed by remote")]
    Eof,

    #[error("connection lost while writing: {0}")]
    Write(#[source] io::Error),
}

/// Failures reported by a conversation capability
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversationError {
    #[error("no encrypted channel is established")]
    NotEncrypted,

    #[error("the secure conversation has finished")]
    Finished,

    #[error("malformed session message: {0}")]
    Malformed(String),

    #[error("message failed authentication")]
    Decrypt,

    #[error("message replayed or out of order")]
    Replay,

    #[error("no authentication question is pending")]
    NoQuestion,

    #[error("invalid identity key")]
    InvalidIdentity,
}

/// Failures while loading or saving the trust store
#[derive(Debug, Error)]
pub enum TrustStoreError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize trust store: {0}")]
    Serialize(#[from] serde_json::Error),
}
