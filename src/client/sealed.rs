// Sealed conversations: the concrete end-to-end capability
//
// Wire messages are text so they fit in a PRIVMSG:
//   ?SEAL?            query, asks the peer to start a session
//   ?SEAL:K:<b64>     identity public key || ephemeral public key
//   ?SEAL:D:<b64>     counter (u64 BE) || ChaCha20-Poly1305 ciphertext
//   ?SEAL,k,n,piece,  fragment k of n of a longer message
//
// Session keys come from a triple X25519 exchange (identity/ephemeral,
// ephemeral/identity, ephemeral/ephemeral) fed through HKDF-SHA256. Each
// direction has its own key and a strictly increasing counter used as nonce.
//
// Shared-secret authentication is commit-then-reveal over a tag bound to the
// session: the asker commits to its tag, the answerer sends its tag, the
// asker reveals. This confirms both sides share the secret and the same
// session keys, but it is not a zero-knowledge proof: a peer that learns a
// tag can run a dictionary search against weak secrets.

use crate::client::conversation::{Conversation, ConversationProvider, Received, SecurityChange};
use crate::client::error::ConversationError;
use crate::client::fingerprint;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

pub const QUERY: &str = "?SEAL?";
const KEY_TAG: &str = "?SEAL:K:";
const DATA_TAG: &str = "?SEAL:D:";
const FRAGMENT_TAG: &str = "?SEAL,";

/// Longest wire message sent unfragmented
pub const FRAGMENT_SIZE: usize = 400;

/// Upper bounds on a message being reassembled from fragments
const MAX_FRAGMENTS: usize = 64;
const MAX_REASSEMBLED: usize = MAX_FRAGMENTS * FRAGMENT_SIZE;

const KDF_SALT: &[u8] = b"tirc-sealed-v1";
const AUTH_LABEL: &[u8] = b"tirc-sealed-auth";

const KIND_TEXT: u8 = 0;
const KIND_AUTH_ASK: u8 = 1;
const KIND_AUTH_RESPONSE: u8 = 2;
const KIND_AUTH_REVEAL: u8 = 3;
const KIND_END: u8 = 4;

/// Local long-term identity; hands out conversations bound to it
pub struct SealedProvider {
    identity: StaticSecret,
}

impl SealedProvider {
    /// Fresh random identity
    pub fn generate() -> Self {
        Self {
            identity: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Restore an identity previously returned by `export_identity`
    pub fn from_identity(bytes: &[u8]) -> Result<Self, ConversationError> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ConversationError::InvalidIdentity)?;
        Ok(Self {
            identity: StaticSecret::from(bytes),
        })
    }

    fn public(&self) -> [u8; 32] {
        PublicKey::from(&self.identity).to_bytes()
    }
}

impl ConversationProvider for SealedProvider {
    fn new_conversation(&self) -> Box<dyn Conversation> {
        Box::new(SealedConversation::new(self.identity.clone()))
    }

    fn query_message(&self) -> String {
        QUERY.to_string()
    }

    fn fingerprint(&self) -> Vec<u8> {
        fingerprint::digest(&self.public())
    }

    fn export_identity(&self) -> Vec<u8> {
        self.identity.to_bytes().to_vec()
    }
}

struct Keys {
    send: [u8; 32],
    recv: [u8; 32],
    auth: [u8; 32],
    send_counter: u64,
    recv_counter: u64,
}

enum Auth {
    Idle,
    /// We asked and committed to our tag
    Asked { tag: [u8; 32], salt: [u8; 32] },
    /// The peer asked; waiting for the local user's answer
    SecretNeeded { question: String, commit: [u8; 32] },
    /// We answered; waiting for the peer to reveal
    Answered { commit: [u8; 32], tag: [u8; 32] },
}

struct Reassembly {
    total: usize,
    next: usize,
    buf: String,
}

/// One sealed conversation with a single peer
pub struct SealedConversation {
    identity: StaticSecret,
    identity_public: [u8; 32],
    ephemeral: Option<StaticSecret>,
    their_identity: Option<[u8; 32]>,
    keys: Option<Keys>,
    finished: bool,
    /// A query went out alongside unencrypted text
    queried: bool,
    fragments: Option<Reassembly>,
    auth: Auth,
}

impl SealedConversation {
    pub fn new(identity: StaticSecret) -> Self {
        let identity_public = PublicKey::from(&identity).to_bytes();
        Self {
            identity,
            identity_public,
            ephemeral: None,
            their_identity: None,
            keys: None,
            finished: false,
            queried: false,
            fragments: None,
            auth: Auth::Idle,
        }
    }

    /// New ephemeral key and the key message announcing it
    fn key_message(&mut self) -> String {
        let ephemeral = StaticSecret::random_from_rng(OsRng);
        let mut payload = Vec::with_capacity(64);
        payload.extend_from_slice(&self.identity_public);
        payload.extend_from_slice(PublicKey::from(&ephemeral).as_bytes());
        self.ephemeral = Some(ephemeral);
        format!("{}{}", KEY_TAG, BASE64.encode(payload))
    }

    fn derive_keys(
        &mut self,
        ephemeral: &StaticSecret,
        their_id: [u8; 32],
        their_eph: [u8; 32],
    ) -> Result<(), ConversationError> {
        let our_eph = PublicKey::from(ephemeral).to_bytes();
        let low = (self.identity_public, our_eph) < (their_id, their_eph);

        let id_eph = self.identity.diffie_hellman(&PublicKey::from(their_eph));
        let eph_id = ephemeral.diffie_hellman(&PublicKey::from(their_id));
        let eph_eph = ephemeral.diffie_hellman(&PublicKey::from(their_eph));

        // Both sides order the inputs as (low identity, high identity)
        let (first, second) = if low { (&id_eph, &eph_id) } else { (&eph_id, &id_eph) };
        let mut ikm = Vec::with_capacity(96);
        ikm.extend_from_slice(first.as_bytes());
        ikm.extend_from_slice(second.as_bytes());
        ikm.extend_from_slice(eph_eph.as_bytes());

        let hkdf = Hkdf::<Sha256>::new(Some(KDF_SALT), &ikm);
        let mut okm = [0u8; 96];
        hkdf.expand(b"keys", &mut okm)
            .map_err(|_| ConversationError::Malformed("key derivation failed".to_string()))?;

        let mut low_to_high = [0u8; 32];
        let mut high_to_low = [0u8; 32];
        let mut auth = [0u8; 32];
        low_to_high.copy_from_slice(&okm[..32]);
        high_to_low.copy_from_slice(&okm[32..64]);
        auth.copy_from_slice(&okm[64..]);

        let (send, recv) = if low {
            (low_to_high, high_to_low)
        } else {
            (high_to_low, low_to_high)
        };

        self.keys = Some(Keys {
            send,
            recv,
            auth,
            send_counter: 0,
            recv_counter: 0,
        });
        self.their_identity = Some(their_id);
        self.auth = Auth::Idle;
        self.finished = false;
        Ok(())
    }

    fn seal(&mut self, kind: u8, body: &[u8]) -> Result<Vec<String>, ConversationError> {
        let keys = self.keys.as_mut().ok_or(ConversationError::NotEncrypted)?;
        let counter = keys.send_counter;
        keys.send_counter += 1;

        let mut plaintext = Vec::with_capacity(body.len() + 1);
        plaintext.push(kind);
        plaintext.extend_from_slice(body);

        let cipher = ChaCha20Poly1305::new((&keys.send).into());
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce(counter)), plaintext.as_slice())
            .map_err(|_| ConversationError::Malformed("encryption failed".to_string()))?;

        let mut payload = counter.to_be_bytes().to_vec();
        payload.extend_from_slice(&ciphertext);
        Ok(fragment(&format!("{}{}", DATA_TAG, BASE64.encode(payload))))
    }

    fn open(&mut self, encoded: &str) -> Result<(u8, Vec<u8>), ConversationError> {
        let keys = self.keys.as_mut().ok_or(ConversationError::NotEncrypted)?;
        let payload = BASE64
            .decode(encoded)
            .map_err(|e| ConversationError::Malformed(e.to_string()))?;
        if payload.len() < 8 + 16 + 1 {
            return Err(ConversationError::Malformed("data message too short".to_string()));
        }

        let (counter, ciphertext) = payload.split_at(8);
        let counter = u64::from_be_bytes(counter.try_into().unwrap_or_default());
        if counter < keys.recv_counter {
            return Err(ConversationError::Replay);
        }

        let cipher = ChaCha20Poly1305::new((&keys.recv).into());
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce(counter)), ciphertext)
            .map_err(|_| ConversationError::Decrypt)?;
        keys.recv_counter = counter + 1;

        match plaintext.split_first() {
            Some((kind, body)) => Ok((*kind, body.to_vec())),
            None => Err(ConversationError::Malformed("empty data message".to_string())),
        }
    }

    fn auth_tag(&self, question: &str, secret: &[u8]) -> Result<[u8; 32], ConversationError> {
        let keys = self.keys.as_ref().ok_or(ConversationError::NotEncrypted)?;
        let mut hasher = Sha256::new();
        hasher.update(AUTH_LABEL);
        hasher.update(keys.auth);
        hasher.update((question.len() as u32).to_be_bytes());
        hasher.update(question.as_bytes());
        hasher.update(secret);
        Ok(hasher.finalize().into())
    }

    /// Collect fragments; returns the whole message once the last one arrives
    fn reassemble(&mut self, fragment: &str) -> Option<String> {
        let body = fragment.strip_prefix(FRAGMENT_TAG)?.strip_suffix(',')?;
        let mut parts = body.splitn(3, ',');
        let k: usize = parts.next()?.parse().ok()?;
        let n: usize = parts.next()?.parse().ok()?;
        let piece = parts.next()?;
        if k == 0 || k > n || n > MAX_FRAGMENTS {
            self.fragments = None;
            return None;
        }

        if k == 1 {
            self.fragments = Some(Reassembly {
                total: n,
                next: 1,
                buf: String::new(),
            });
        }

        let state = self.fragments.as_mut()?;
        if state.total != n || state.next != k || state.buf.len() + piece.len() > MAX_REASSEMBLED {
            // Out of order or oversized: drop the partial message
            self.fragments = None;
            return None;
        }
        state.buf.push_str(piece);
        state.next += 1;

        if k == n {
            self.fragments.take().map(|state| state.buf)
        } else {
            None
        }
    }

    fn handle_key(&mut self, encoded: &str) -> Result<Received, ConversationError> {
        let payload = BASE64
            .decode(encoded)
            .map_err(|e| ConversationError::Malformed(e.to_string()))?;
        if payload.len() != 64 {
            return Err(ConversationError::Malformed("key message must carry 64 bytes".to_string()));
        }
        let mut their_id = [0u8; 32];
        let mut their_eph = [0u8; 32];
        their_id.copy_from_slice(&payload[..32]);
        their_eph.copy_from_slice(&payload[32..]);

        let mut reply = Vec::new();
        let ephemeral = match self.ephemeral.take() {
            // We already announced an ephemeral key; this is the answer
            Some(ephemeral) => ephemeral,
            None => {
                let message = self.key_message();
                reply.extend(fragment(&message));
                self.ephemeral.take().unwrap_or_else(|| StaticSecret::random_from_rng(OsRng))
            }
        };
        self.derive_keys(&ephemeral, their_id, their_eph)?;

        Ok(Received {
            change: Some(SecurityChange::NewKeys),
            reply,
            ..Default::default()
        })
    }

    fn handle_data(&mut self, encoded: &str) -> Result<Received, ConversationError> {
        let (kind, body) = self.open(encoded)?;
        let mut received = Received {
            encrypted: true,
            ..Default::default()
        };

        match kind {
            KIND_TEXT => {
                received.plaintext = String::from_utf8_lossy(&body).into_owned();
            }
            KIND_AUTH_ASK => {
                if body.len() < 2 + 32 {
                    return Err(ConversationError::Malformed("short authentication request".to_string()));
                }
                let len = u16::from_be_bytes([body[0], body[1]]) as usize;
                if body.len() != 2 + len + 32 {
                    return Err(ConversationError::Malformed("bad authentication request".to_string()));
                }
                let question = String::from_utf8_lossy(&body[2..2 + len]).into_owned();
                let mut commit = [0u8; 32];
                commit.copy_from_slice(&body[2 + len..]);

                self.auth = Auth::SecretNeeded { question, commit };
                received.change = Some(SecurityChange::SecretNeeded);
            }
            KIND_AUTH_RESPONSE => {
                let Auth::Asked { tag, salt } = self.auth else {
                    return Err(ConversationError::Malformed("unexpected authentication response".to_string()));
                };
                self.auth = Auth::Idle;
                let mut reveal = tag.to_vec();
                reveal.extend_from_slice(&salt);
                received.reply = self.seal(KIND_AUTH_REVEAL, &reveal)?;
                received.change = Some(if body.as_slice() == tag {
                    SecurityChange::AuthComplete
                } else {
                    SecurityChange::AuthFailed
                });
            }
            KIND_AUTH_REVEAL => {
                let Auth::Answered { commit, tag } = self.auth else {
                    return Err(ConversationError::Malformed("unexpected authentication reveal".to_string()));
                };
                if body.len() != 64 {
                    return Err(ConversationError::Malformed("bad authentication reveal".to_string()));
                }
                self.auth = Auth::Idle;
                let opened: [u8; 32] = Sha256::digest(&body).into();
                let matched = opened == commit && body[..32] == tag;
                received.change = Some(if matched {
                    SecurityChange::AuthComplete
                } else {
                    SecurityChange::AuthFailed
                });
            }
            KIND_END => {
                self.keys = None;
                self.finished = true;
                self.auth = Auth::Idle;
                received.change = Some(SecurityChange::Ended);
            }
            other => {
                return Err(ConversationError::Malformed(format!("unknown message kind {}", other)));
            }
        }

        Ok(received)
    }
}

impl Conversation for SealedConversation {
    fn send(&mut self, plaintext: &str) -> Result<Vec<String>, ConversationError> {
        if self.finished {
            return Err(ConversationError::Finished);
        }
        if self.keys.is_some() {
            return self.seal(KIND_TEXT, plaintext.as_bytes());
        }

        // No keys: deliver as is, and ask once for a session so a capable
        // peer can answer with its key
        let mut wire = vec![plaintext.to_string()];
        if !self.queried {
            self.queried = true;
            wire.push(QUERY.to_string());
        }
        Ok(wire)
    }

    fn receive(&mut self, wire: &str) -> Result<Received, ConversationError> {
        if wire.starts_with(FRAGMENT_TAG) {
            return match self.reassemble(wire) {
                Some(whole) => self.receive(&whole),
                None => Ok(Received::default()),
            };
        }

        if wire.starts_with(QUERY) {
            let message = self.key_message();
            self.finished = false;
            return Ok(Received {
                reply: fragment(&message),
                ..Default::default()
            });
        }

        if let Some(encoded) = wire.strip_prefix(KEY_TAG) {
            return self.handle_key(encoded.trim());
        }

        if let Some(encoded) = wire.strip_prefix(DATA_TAG) {
            return self.handle_data(encoded.trim());
        }

        Ok(Received {
            plaintext: wire.to_string(),
            ..Default::default()
        })
    }

    fn authenticate(&mut self, question: &str, secret: &[u8]) -> Result<Vec<String>, ConversationError> {
        if self.keys.is_none() {
            return Err(ConversationError::NotEncrypted);
        }

        if let Auth::SecretNeeded { question: asked, commit } = &self.auth {
            let commit = *commit;
            let tag = self.auth_tag(asked, secret)?;
            let reply = self.seal(KIND_AUTH_RESPONSE, &tag)?;
            self.auth = Auth::Answered { commit, tag };
            return Ok(reply);
        }

        let question_bytes = question.as_bytes();
        if question_bytes.len() > u16::MAX as usize {
            return Err(ConversationError::Malformed("question too long".to_string()));
        }

        let tag = self.auth_tag(question, secret)?;
        let mut salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);
        let mut committed = tag.to_vec();
        committed.extend_from_slice(&salt);
        let commit: [u8; 32] = Sha256::digest(&committed).into();

        let mut body = (question_bytes.len() as u16).to_be_bytes().to_vec();
        body.extend_from_slice(question_bytes);
        body.extend_from_slice(&commit);

        let reply = self.seal(KIND_AUTH_ASK, &body)?;
        self.auth = Auth::Asked { tag, salt };
        Ok(reply)
    }

    fn end(&mut self) -> Vec<String> {
        let farewell = if self.keys.is_some() {
            self.seal(KIND_END, &[]).unwrap_or_default()
        } else {
            Vec::new()
        };
        self.keys = None;
        self.ephemeral = None;
        self.auth = Auth::Idle;
        self.finished = true;
        farewell
    }

    fn is_encrypted(&self) -> bool {
        self.keys.is_some()
    }

    fn their_fingerprint(&self) -> Option<Vec<u8>> {
        self.their_identity.map(|id| fingerprint::digest(&id))
    }

    fn auth_question(&self) -> Option<String> {
        match &self.auth {
            Auth::SecretNeeded { question, .. } => Some(question.clone()),
            _ => None,
        }
    }
}

fn nonce(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// Split a wire message into `?SEAL,k,n,piece,` fragments when too long.
/// Wire messages are ASCII, so byte offsets are character boundaries.
fn fragment(message: &str) -> Vec<String> {
    if message.len() <= FRAGMENT_SIZE {
        return vec![message.to_string()];
    }

    let pieces: Vec<&str> = (0..message.len())
        .step_by(FRAGMENT_SIZE)
        .map(|start| &message[start..(start + FRAGMENT_SIZE).min(message.len())])
        .collect();
    let total = pieces.len();

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| format!("{}{},{},{},", FRAGMENT_TAG, i + 1, total, piece))
        .collect()
}
