// Secure session overlay
//
// Tracks one conversation per peer and turns capability transitions into
// user-facing security notices. Every operation is synchronous: it returns
// the protocol lines to queue and the notices to show, and the caller does
// the queueing after releasing the overlay lock.

use crate::client::conversation::{Conversation, ConversationProvider, SecurityChange};
use crate::client::error::{ConversationError, TrustStoreError};
use crate::client::fingerprint;
use crate::client::message;
use crate::client::trust::{TrustStore, Verification};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Per-peer session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No secure session attempted
    None,
    /// Query sent, waiting for keys
    Pending,
    Encrypted,
    /// The peer ended the session
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    High,
}

/// Something the user should know about a secure session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityNotice {
    FingerprintUnknown { peer: String, fingerprint: Vec<u8> },
    FingerprintVerified { peer: String, fingerprint: Vec<u8> },
    FingerprintMismatch { peer: String, fingerprint: Vec<u8> },
    AuthRequested { peer: String, question: String },
    AuthSucceeded { peer: String },
    AuthFailed { peer: String },
    SessionEnded { peer: String },
    Status { peer: String, encrypted: bool },
    LocalFingerprint { fingerprint: Vec<u8> },
    CryptoFailure { peer: String, reason: ConversationError },
    /// Text went to the peer without encryption
    SentUnencrypted { peer: String },
}

impl SecurityNotice {
    pub fn severity(&self) -> Severity {
        match self {
            SecurityNotice::FingerprintMismatch { .. } => Severity::High,
            SecurityNotice::AuthFailed { .. }
            | SecurityNotice::CryptoFailure { .. }
            | SecurityNotice::SentUnencrypted { .. } => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for SecurityNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityNotice::FingerprintUnknown { peer, fingerprint: fp } => write!(
                f,
                "New fingerprint for {}: {}. Check it with them or run /otr-smpq",
                peer,
                fingerprint::format(fp)
            ),
            SecurityNotice::FingerprintVerified { peer, fingerprint: fp } => {
                write!(f, "{} matches the stored fingerprint {}", peer, fingerprint::format(fp))
            }
            SecurityNotice::FingerprintMismatch { peer, fingerprint: fp } => write!(
                f,
                "WARNING: {} presented {} which differs from the stored fingerprint. \
                 Someone may be impersonating them.",
                peer,
                fingerprint::format(fp)
            ),
            SecurityNotice::AuthRequested { peer, question } => write!(
                f,
                "{} asks: {} Answer with /otr-smpr {} <secret>",
                peer, question, peer
            ),
            SecurityNotice::AuthSucceeded { peer } => {
                write!(f, "Authenticated {}; fingerprint trusted", peer)
            }
            SecurityNotice::AuthFailed { peer } => write!(f, "Authentication with {} failed", peer),
            SecurityNotice::SessionEnded { peer } => write!(f, "Secure session with {} ended", peer),
            SecurityNotice::Status { peer, encrypted: true } => {
                write!(f, "Session with {} is encrypted", peer)
            }
            SecurityNotice::Status { peer, encrypted: false } => {
                write!(f, "Session with {} is not encrypted", peer)
            }
            SecurityNotice::LocalFingerprint { fingerprint: fp } => {
                write!(f, "Your fingerprint is {}", fingerprint::format(fp))
            }
            SecurityNotice::CryptoFailure { peer, reason } => {
                write!(f, "Secure session error with {}: {}", peer, reason)
            }
            SecurityNotice::SentUnencrypted { peer } => write!(
                f,
                "Message to {} was sent unencrypted; /otr-start {} to secure the conversation",
                peer, peer
            ),
        }
    }
}

/// Lines to queue and notices to show after an overlay operation
#[derive(Debug, Default)]
pub struct Outcome {
    pub lines: Vec<String>,
    pub notices: Vec<SecurityNotice>,
}

/// Result of running an inbound private message through the overlay
#[derive(Debug, Default)]
pub struct Incoming {
    /// Text for the user; empty when the message was pure session control
    pub plaintext: String,
    pub encrypted: bool,
    pub lines: Vec<String>,
    pub notices: Vec<SecurityNotice>,
}

struct Session {
    state: SessionState,
    conversation: Box<dyn Conversation>,
}

/// Per-peer sessions plus the trust store they are verified against
pub struct SecureOverlay {
    provider: Box<dyn ConversationProvider>,
    sessions: HashMap<String, Session>,
    trust: TrustStore,
}

impl SecureOverlay {
    /// Create a new overlay with no open sessions
    pub fn new(provider: Box<dyn ConversationProvider>, trust: TrustStore) -> Self {
        Self {
            provider,
            sessions: HashMap::new(),
            trust,
        }
    }

    fn session(&mut self, peer: &str, initial: SessionState) -> &mut Session {
        let provider = &self.provider;
        self.sessions
            .entry(peer.to_lowercase())
            .or_insert_with(|| Session {
                state: initial,
                conversation: provider.new_conversation(),
            })
    }

    /// Ask `peer` for a secure session. The query is sent even when a session
    /// already exists so an established one gets fresh keys.
    pub fn start_session(&mut self, peer: &str) -> Outcome {
        let query = self.provider.query_message();
        let session = self.session(peer, SessionState::Pending);
        if session.state != SessionState::Encrypted {
            session.state = SessionState::Pending;
        }
        debug!("Requesting secure session with {}", peer);

        Outcome {
            lines: vec![message::privmsg(peer, &query)],
            notices: Vec::new(),
        }
    }

    /// Wrap outgoing text for `peer`. Without a session the text goes out
    /// as is, with a warning.
    pub fn send(&mut self, peer: &str, plaintext: &str) -> Outcome {
        let session = self.session(peer, SessionState::Pending);
        let encrypted = session.conversation.is_encrypted();
        match session.conversation.send(plaintext) {
            Ok(fragments) => {
                let mut notices = Vec::new();
                if !encrypted {
                    if session.state == SessionState::None {
                        session.state = SessionState::Pending;
                    }
                    notices.push(SecurityNotice::SentUnencrypted {
                        peer: peer.to_string(),
                    });
                }
                Outcome {
                    lines: to_lines(peer, fragments),
                    notices,
                }
            }
            Err(reason) => Outcome {
                lines: Vec::new(),
                notices: vec![SecurityNotice::CryptoFailure {
                    peer: peer.to_string(),
                    reason,
                }],
            },
        }
    }

    /// Run one inbound private message from `peer` through its conversation
    pub fn receive(&mut self, peer: &str, wire: &str) -> Incoming {
        let key = peer.to_lowercase();
        let provider = &self.provider;
        let session = self.sessions.entry(key).or_insert_with(|| Session {
            state: SessionState::None,
            conversation: provider.new_conversation(),
        });

        let received = match session.conversation.receive(wire) {
            Ok(received) => received,
            Err(reason) => {
                warn!("Dropping message from {}: {}", peer, reason);
                return Incoming {
                    notices: vec![SecurityNotice::CryptoFailure {
                        peer: peer.to_string(),
                        reason,
                    }],
                    ..Default::default()
                };
            }
        };

        let mut notices = Vec::new();
        match received.change {
            Some(SecurityChange::NewKeys) => {
                session.state = SessionState::Encrypted;
                if let Some(fp) = session.conversation.their_fingerprint() {
                    notices.push(verify(&mut self.trust, peer, fp));
                }
            }
            Some(SecurityChange::SecretNeeded) => {
                let question = session.conversation.auth_question().unwrap_or_default();
                notices.push(SecurityNotice::AuthRequested {
                    peer: peer.to_string(),
                    question,
                });
            }
            Some(SecurityChange::AuthComplete) => {
                if let Some(fp) = session.conversation.their_fingerprint() {
                    self.trust.trust(peer, &fp);
                }
                notices.push(SecurityNotice::AuthSucceeded {
                    peer: peer.to_string(),
                });
            }
            Some(SecurityChange::AuthFailed) => {
                notices.push(SecurityNotice::AuthFailed {
                    peer: peer.to_string(),
                });
            }
            Some(SecurityChange::Ended) => {
                session.state = SessionState::Ended;
                notices.push(SecurityNotice::SessionEnded {
                    peer: peer.to_string(),
                });
            }
            None => {}
        }

        Incoming {
            plaintext: received.plaintext,
            encrypted: received.encrypted,
            lines: to_lines(peer, received.reply),
            notices,
        }
    }

    /// End the session with `peer` and forget it
    pub fn end_session(&mut self, peer: &str) -> Outcome {
        match self.sessions.remove(&peer.to_lowercase()) {
            Some(mut session) => {
                debug!("Ending secure session with {}", peer);
                Outcome {
                    lines: to_lines(peer, session.conversation.end()),
                    notices: vec![SecurityNotice::SessionEnded {
                        peer: peer.to_string(),
                    }],
                }
            }
            None => Outcome::default(),
        }
    }

    /// End every open session, in peer order; returns the farewell lines
    pub fn end_all(&mut self) -> Vec<String> {
        let mut peers: Vec<String> = self.sessions.keys().cloned().collect();
        peers.sort();

        peers
            .iter()
            .flat_map(|peer| self.end_session(peer).lines)
            .collect()
    }

    pub fn state(&self, peer: &str) -> SessionState {
        self.sessions
            .get(&peer.to_lowercase())
            .map(|s| s.state)
            .unwrap_or(SessionState::None)
    }

    pub fn status(&self, peer: &str) -> SecurityNotice {
        let encrypted = self
            .sessions
            .get(&peer.to_lowercase())
            .is_some_and(|s| s.conversation.is_encrypted());
        SecurityNotice::Status {
            peer: peer.to_string(),
            encrypted,
        }
    }

    /// Local fingerprint followed by the state of every open session
    pub fn info(&mut self) -> Vec<SecurityNotice> {
        let mut notices = vec![SecurityNotice::LocalFingerprint {
            fingerprint: self.provider.fingerprint(),
        }];

        let mut peers: Vec<&String> = self.sessions.keys().collect();
        peers.sort();
        for peer in peers {
            let session = &self.sessions[peer];
            let encrypted = session.conversation.is_encrypted();
            notices.push(SecurityNotice::Status {
                peer: peer.clone(),
                encrypted,
            });
            if encrypted {
                if let Some(fp) = session.conversation.their_fingerprint() {
                    notices.push(verify(&mut self.trust, peer, fp));
                }
            }
        }
        notices
    }

    /// Pose `question` to `peer`, committing to `secret`
    pub fn ask(&mut self, peer: &str, question: &str, secret: &str) -> Outcome {
        let Some(session) = self.sessions.get_mut(&peer.to_lowercase()) else {
            return failure(peer, ConversationError::NotEncrypted);
        };
        match session.conversation.authenticate(question, secret.as_bytes()) {
            Ok(fragments) => Outcome {
                lines: to_lines(peer, fragments),
                notices: Vec::new(),
            },
            Err(reason) => failure(peer, reason),
        }
    }

    /// Answer the question `peer` posed
    pub fn answer(&mut self, peer: &str, secret: &str) -> Outcome {
        let Some(session) = self.sessions.get_mut(&peer.to_lowercase()) else {
            return failure(peer, ConversationError::NoQuestion);
        };
        let Some(question) = session.conversation.auth_question() else {
            return failure(peer, ConversationError::NoQuestion);
        };
        match session.conversation.authenticate(&question, secret.as_bytes()) {
            Ok(fragments) => Outcome {
                lines: to_lines(peer, fragments),
                notices: Vec::new(),
            },
            Err(reason) => failure(peer, reason),
        }
    }

    pub fn trust_store(&self) -> &TrustStore {
        &self.trust
    }

    /// Persist the trust store together with the local identity
    pub fn save_trust(&mut self) -> Result<(), TrustStoreError> {
        self.trust.set_identity(self.provider.export_identity());
        self.trust.save()
    }
}

fn verify(trust: &mut TrustStore, peer: &str, fingerprint: Vec<u8>) -> SecurityNotice {
    let peer = peer.to_string();
    match trust.verify(&peer, &fingerprint) {
        Verification::Unknown => SecurityNotice::FingerprintUnknown { peer, fingerprint },
        Verification::Verified => SecurityNotice::FingerprintVerified { peer, fingerprint },
        Verification::Mismatch => {
            warn!("Fingerprint mismatch for {}", peer);
            SecurityNotice::FingerprintMismatch { peer, fingerprint }
        }
    }
}

fn failure(peer: &str, reason: ConversationError) -> Outcome {
    Outcome {
        lines: Vec::new(),
        notices: vec![SecurityNotice::CryptoFailure {
            peer: peer.to_string(),
            reason,
        }],
    }
}

fn to_lines(peer: &str, fragments: Vec<String>) -> Vec<String> {
    fragments
        .iter()
        .map(|fragment| message::privmsg(peer, fragment))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER_FP: &[u8] = b"peer-fingerprint";

    /// Conversation driven by plain keywords instead of cryptography
    struct Scripted {
        encrypted: bool,
        question: Option<String>,
    }

    impl Conversation for Scripted {
        fn send(&mut self, plaintext: &str) -> Result<Vec<String>, ConversationError> {
            if self.encrypted {
                Ok(vec![format!("enc:{}", plaintext)])
            } else {
                Ok(vec![plaintext.to_string()])
            }
        }

        fn receive(&mut self, wire: &str) -> Result<crate::client::conversation::Received, ConversationError> {
            use crate::client::conversation::Received;
            let mut r = Received::default();
            match wire {
                "KEYS" => {
                    self.encrypted = true;
                    r.change = Some(SecurityChange::NewKeys);
                    r.reply = vec!["KEYS-ACK".to_string()];
                }
                "AUTH-OK" => r.change = Some(SecurityChange::AuthComplete),
                "AUTH-BAD" => r.change = Some(SecurityChange::AuthFailed),
                "END" => {
                    self.encrypted = false;
                    r.change = Some(SecurityChange::Ended);
                }
                "BROKEN" => return Err(ConversationError::Decrypt),
                other if other.starts_with("ASK:") => {
                    self.question = Some(other[4..].to_string());
                    r.change = Some(SecurityChange::SecretNeeded);
                }
                other if other.starts_with("enc:") => {
                    r.plaintext = other[4..].to_string();
                    r.encrypted = true;
                }
                other => r.plaintext = other.to_string(),
            }
            Ok(r)
        }

        fn authenticate(&mut self, question: &str, secret: &[u8]) -> Result<Vec<String>, ConversationError> {
            if !self.encrypted {
                return Err(ConversationError::NotEncrypted);
            }
            Ok(vec![format!("auth:{}:{}", question, String::from_utf8_lossy(secret))])
        }

        fn end(&mut self) -> Vec<String> {
            self.encrypted = false;
            vec!["BYE".to_string()]
        }

        fn is_encrypted(&self) -> bool {
            self.encrypted
        }

        fn their_fingerprint(&self) -> Option<Vec<u8>> {
            self.encrypted.then(|| PEER_FP.to_vec())
        }

        fn auth_question(&self) -> Option<String> {
            self.question.clone()
        }
    }

    struct ScriptedProvider;

    impl ConversationProvider for ScriptedProvider {
        fn new_conversation(&self) -> Box<dyn Conversation> {
            Box::new(Scripted {
                encrypted: false,
                question: None,
            })
        }

        fn query_message(&self) -> String {
            "QUERY".to_string()
        }

        fn fingerprint(&self) -> Vec<u8> {
            b"local".to_vec()
        }

        fn export_identity(&self) -> Vec<u8> {
            vec![7; 32]
        }
    }

    fn overlay() -> SecureOverlay {
        SecureOverlay::new(Box::new(ScriptedProvider), TrustStore::empty("/nonexistent/trust.json"))
    }

    #[test]
    fn test_session_lifecycle() {
        let mut overlay = overlay();
        assert_eq!(overlay.state("bob"), SessionState::None);

        let out = overlay.start_session("Bob");
        assert_eq!(out.lines, vec!["PRIVMSG Bob :QUERY".to_string()]);
        assert_eq!(overlay.state("bob"), SessionState::Pending);

        let incoming = overlay.receive("Bob", "KEYS");
        assert_eq!(overlay.state("bob"), SessionState::Encrypted);
        assert_eq!(incoming.lines, vec!["PRIVMSG Bob :KEYS-ACK".to_string()]);
        assert!(incoming.plaintext.is_empty());

        let out = overlay.end_session("bob");
        assert_eq!(out.lines, vec!["PRIVMSG bob :BYE".to_string()]);
        assert_eq!(overlay.state("bob"), SessionState::None);
    }

    #[test]
    fn test_start_session_resends_query() {
        let mut overlay = overlay();
        overlay.start_session("bob");
        overlay.receive("bob", "KEYS");

        let out = overlay.start_session("bob");
        assert_eq!(out.lines.len(), 1);
        assert_eq!(overlay.state("bob"), SessionState::Encrypted);
    }

    #[test]
    fn test_first_keys_record_fingerprint() {
        let mut overlay = overlay();
        let incoming = overlay.receive("bob", "KEYS");

        assert!(matches!(
            incoming.notices.as_slice(),
            [SecurityNotice::FingerprintUnknown { .. }]
        ));
        assert_eq!(overlay.trust_store().get("bob"), Some(PEER_FP));
    }

    #[test]
    fn test_mismatch_is_high_severity_and_kept() {
        let mut trust = TrustStore::empty("/nonexistent/trust.json");
        trust.verify("bob", b"someone-else");
        let mut overlay = SecureOverlay::new(Box::new(ScriptedProvider), trust);

        let incoming = overlay.receive("bob", "KEYS");
        assert_eq!(incoming.notices.len(), 1);
        assert_eq!(incoming.notices[0].severity(), Severity::High);
        assert_eq!(overlay.trust_store().get("bob"), Some(&b"someone-else"[..]));
    }

    #[test]
    fn test_auth_success_replaces_fingerprint() {
        let mut trust = TrustStore::empty("/nonexistent/trust.json");
        trust.verify("bob", b"someone-else");
        let mut overlay = SecureOverlay::new(Box::new(ScriptedProvider), trust);

        overlay.receive("bob", "KEYS");
        let incoming = overlay.receive("bob", "AUTH-OK");

        assert!(matches!(incoming.notices[0], SecurityNotice::AuthSucceeded { .. }));
        assert_eq!(overlay.trust_store().get("bob"), Some(PEER_FP));
    }

    #[test]
    fn test_question_and_answer() {
        let mut overlay = overlay();
        overlay.receive("bob", "KEYS");

        let incoming = overlay.receive("bob", "ASK:pet name?");
        assert_eq!(
            incoming.notices,
            vec![SecurityNotice::AuthRequested {
                peer: "bob".to_string(),
                question: "pet name?".to_string(),
            }]
        );

        let out = overlay.answer("bob", "rex");
        assert_eq!(out.lines, vec!["PRIVMSG bob :auth:pet name?:rex".to_string()]);
    }

    #[test]
    fn test_answer_without_question() {
        let mut overlay = overlay();
        overlay.receive("bob", "KEYS");

        let out = overlay.answer("bob", "rex");
        assert!(out.lines.is_empty());
        assert!(matches!(
            out.notices[0],
            SecurityNotice::CryptoFailure { reason: ConversationError::NoQuestion, .. }
        ));
    }

    #[test]
    fn test_ask_requires_encryption() {
        let mut overlay = overlay();
        overlay.start_session("bob");

        let out = overlay.ask("bob", "q?", "s");
        assert!(out.lines.is_empty());
        assert_eq!(out.notices[0].severity(), Severity::Warning);
    }

    #[test]
    fn test_crypto_failure_leaves_state() {
        let mut overlay = overlay();
        overlay.receive("bob", "KEYS");

        let incoming = overlay.receive("bob", "BROKEN");
        assert!(incoming.plaintext.is_empty());
        assert!(matches!(incoming.notices[0], SecurityNotice::CryptoFailure { .. }));
        assert_eq!(overlay.state("bob"), SessionState::Encrypted);
    }

    #[test]
    fn test_peer_end_marks_ended() {
        let mut overlay = overlay();
        overlay.receive("bob", "KEYS");
        overlay.receive("bob", "END");

        assert_eq!(overlay.state("bob"), SessionState::Ended);
        assert!(matches!(overlay.status("bob"), SecurityNotice::Status { encrypted: false, .. }));
    }

    #[test]
    fn test_end_all_in_peer_order() {
        let mut overlay = overlay();
        overlay.start_session("zed");
        overlay.start_session("amy");

        let lines = overlay.end_all();
        assert_eq!(lines, vec!["PRIVMSG amy :BYE".to_string(), "PRIVMSG zed :BYE".to_string()]);
        assert_eq!(overlay.state("amy"), SessionState::None);
    }

    #[test]
    fn test_info_lists_sessions() {
        let mut overlay = overlay();
        overlay.receive("bob", "KEYS");
        overlay.start_session("carol");

        let notices = overlay.info();
        assert_eq!(
            notices[0],
            SecurityNotice::LocalFingerprint { fingerprint: b"local".to_vec() }
        );
        assert!(notices.contains(&SecurityNotice::Status { peer: "bob".to_string(), encrypted: true }));
        assert!(notices.contains(&SecurityNotice::Status { peer: "carol".to_string(), encrypted: false }));
        assert!(notices.iter().any(|n| matches!(n, SecurityNotice::FingerprintVerified { .. })));
    }

    #[test]
    fn test_unencrypted_send_delivers_and_warns() {
        let mut overlay = overlay();

        for text in ["one", "two"] {
            let out = overlay.send("bob", text);
            assert_eq!(out.lines, vec![format!("PRIVMSG bob :{}", text)]);
            assert_eq!(
                out.notices,
                vec![SecurityNotice::SentUnencrypted { peer: "bob".to_string() }]
            );
            assert_eq!(out.notices[0].severity(), Severity::Warning);
        }

        overlay.receive("bob", "KEYS");
        let out = overlay.send("bob", "three");
        assert_eq!(out.lines, vec!["PRIVMSG bob :enc:three".to_string()]);
        assert!(out.notices.is_empty());
    }

    #[test]
    fn test_plain_private_message_passes() {
        let mut overlay = overlay();
        let incoming = overlay.receive("bob", "hi there");

        assert_eq!(incoming.plaintext, "hi there");
        assert!(!incoming.encrypted);
        assert!(incoming.lines.is_empty());
    }
}
