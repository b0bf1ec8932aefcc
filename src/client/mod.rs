// Chat client over a proxy-tunneled, TLS-wrapped IRC connection
//
// Private messages are carried through per-peer encrypted sessions with
// trust-on-first-use fingerprint checks and shared-secret authentication.

pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod conversation;
pub mod display;
pub mod error;
pub mod fingerprint;
pub mod message;
pub mod overlay;
pub mod pipeline;
pub mod sealed;
pub mod transport;
pub mod trust;

pub use cli::TircCli;
pub use commands::{Command, Flow};
pub use config::ClientConfig;
pub use context::ClientContext;
pub use conversation::{Conversation, ConversationProvider, Received, SecurityChange};
pub use error::{ConversationError, PipelineError, TransportError, TrustStoreError};
pub use message::Message;
pub use overlay::{Incoming, Outcome, SecureOverlay, SecurityNotice, SessionState, Severity};
pub use pipeline::{IgnoreList, InboundEvent, Pipeline, SharedOverlay};
pub use sealed::SealedProvider;
pub use transport::{Connection, Endpoint, TransportSecurity};
pub use trust::{TrustStore, Verification};
