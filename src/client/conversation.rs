// Interface to the end-to-end conversation capability
//
// The overlay only depends on these traits. `sealed` provides the concrete
// implementation used by the client; tests substitute scripted doubles.

use crate::client::error::ConversationError;

/// Security-relevant transition reported by `Conversation::receive`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityChange {
    /// Fresh session keys are in place
    NewKeys,
    /// The peer posed an authentication question
    SecretNeeded,
    /// Shared-secret authentication succeeded
    AuthComplete,
    /// Shared-secret authentication failed
    AuthFailed,
    /// The peer ended the secure conversation
    Ended,
}

/// Output of feeding one wire message to a conversation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Received {
    /// Text for the user, empty for pure control messages
    pub plaintext: String,
    /// Whether `plaintext` arrived encrypted
    pub encrypted: bool,
    pub change: Option<SecurityChange>,
    /// Fragments to send back to the peer, in order
    pub reply: Vec<String>,
}

/// One end-to-end conversation with a single peer.
///
/// Implementations must not block: they run inline in the pipeline.
pub trait Conversation: Send {
    /// Wire fragments carrying `plaintext`, or a query if no channel exists yet
    fn send(&mut self, plaintext: &str) -> Result<Vec<String>, ConversationError>;

    /// Process one wire message from the peer
    fn receive(&mut self, wire: &str) -> Result<Received, ConversationError>;

    /// Pose `question`, or answer the pending one, with a shared secret
    fn authenticate(&mut self, question: &str, secret: &[u8])
        -> Result<Vec<String>, ConversationError>;

    /// Close the secure channel, returning farewell fragments
    fn end(&mut self) -> Vec<String>;

    fn is_encrypted(&self) -> bool;

    /// Fingerprint of the peer's long-term key once known
    fn their_fingerprint(&self) -> Option<Vec<u8>>;

    /// Question posed by the peer, if one is waiting for an answer
    fn auth_question(&self) -> Option<String>;
}

/// Creates conversations bound to the local identity
pub trait ConversationProvider: Send + Sync {
    fn new_conversation(&self) -> Box<dyn Conversation>;

    /// Message asking a peer to start a secure session
    fn query_message(&self) -> String;

    /// Fingerprint of the local long-term key
    fn fingerprint(&self) -> Vec<u8>;

    /// Opaque bytes that restore this identity on the next run
    fn export_identity(&self) -> Vec<u8>;
}
