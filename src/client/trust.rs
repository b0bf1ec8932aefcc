// Trust-on-first-use fingerprint store
//
// One JSON file per server holds the peer → fingerprint mapping and the
// local long-term identity key. It is read once at startup and written once
// at shutdown, with owner-only permissions.

use crate::client::error::TrustStoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Result of comparing an observed fingerprint with the stored one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// No prior record; the fingerprint has now been recorded
    Unknown,
    /// Matches the stored fingerprint
    Verified,
    /// Differs from the stored fingerprint, which was left untouched
    Mismatch,
}

/// On-disk layout
#[derive(Debug, Default, Serialize, Deserialize)]
struct TrustFile {
    #[serde(default, with = "hex_option")]
    identity: Option<Vec<u8>>,
    #[serde(default, with = "hex_map")]
    contacts: BTreeMap<String, Vec<u8>>,
}

mod hex_option {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let s: Option<String> = Deserialize::deserialize(d)?;
        s.map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

mod hex_map {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        v: &BTreeMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        v.iter()
            .map(|(k, bytes)| (k.as_str(), hex::encode(bytes)))
            .collect::<BTreeMap<_, _>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        let raw: BTreeMap<String, String> = Deserialize::deserialize(d)?;
        raw.into_iter()
            .map(|(k, v)| {
                hex::decode(v)
                    .map(|bytes| (k, bytes))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

/// In-memory fingerprint store mirrored to one file
#[derive(Debug)]
pub struct TrustStore {
    path: PathBuf,
    identity: Option<Vec<u8>>,
    contacts: BTreeMap<String, Vec<u8>>,
}

impl TrustStore {
    /// Empty store that will be saved to `path`
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            identity: None,
            contacts: BTreeMap::new(),
        }
    }

    /// Load the store from `path`.
    ///
    /// A missing or unreadable file is not fatal: an empty store is returned
    /// together with the error so the caller can report it.
    pub fn load(path: impl Into<PathBuf>) -> (Self, Option<TrustStoreError>) {
        let path = path.into();

        match Self::read_file(&path) {
            Ok(file) => {
                tracing::info!(
                    "Loaded {} trusted fingerprints from {:?}",
                    file.contacts.len(),
                    path
                );
                let store = Self {
                    path,
                    identity: file.identity,
                    contacts: file.contacts,
                };
                (store, None)
            }
            Err(e) => {
                tracing::warn!("Starting with an empty trust store: {}", e);
                (Self::empty(path), Some(e))
            }
        }
    }

    fn read_file(path: &Path) -> Result<TrustFile, TrustStoreError> {
        let data = fs::read(path).map_err(|source| TrustStoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_slice(&data).map_err(|source| TrustStoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the store to disk, readable by the owner only
    pub fn save(&self) -> Result<(), TrustStoreError> {
        let file = TrustFile {
            identity: self.identity.clone(),
            contacts: self.contacts.clone(),
        };
        let data = serde_json::to_vec_pretty(&file)?;

        let write_err = |source| TrustStoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut out = options.open(&self.path).map_err(write_err)?;
        // mode() only applies on creation
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            out.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(write_err)?;
        }
        out.write_all(&data).map_err(write_err)?;
        out.sync_all().map_err(write_err)?;

        tracing::info!(
            "Saved {} trusted fingerprints to {:?}",
            self.contacts.len(),
            self.path
        );
        Ok(())
    }

    /// Compare against the stored fingerprint, recording it on first use
    pub fn verify(&mut self, peer: &str, fingerprint: &[u8]) -> Verification {
        let peer = peer.to_lowercase();
        match self.contacts.get(&peer) {
            Some(stored) if stored.as_slice() == fingerprint => Verification::Verified,
            Some(_) => Verification::Mismatch,
            None => {
                self.contacts.insert(peer, fingerprint.to_vec());
                Verification::Unknown
            }
        }
    }

    /// Record a fingerprint confirmed by explicit authentication, replacing
    /// any earlier one
    pub fn trust(&mut self, peer: &str, fingerprint: &[u8]) {
        self.contacts.insert(peer.to_lowercase(), fingerprint.to_vec());
    }

    pub fn get(&self, peer: &str) -> Option<&[u8]> {
        self.contacts.get(&peer.to_lowercase()).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Local long-term identity key, opaque to the store
    pub fn identity(&self) -> Option<&[u8]> {
        self.identity.as_deref()
    }

    pub fn set_identity(&mut self, identity: Vec<u8>) {
        self.identity = Some(identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_first_use_then_verified() {
        let mut store = TrustStore::empty("/nonexistent/store.json");

        assert_eq!(store.verify("Alice", b"fp-1"), Verification::Unknown);
        assert_eq!(store.verify("alice", b"fp-1"), Verification::Verified);
        assert_eq!(store.get("ALICE"), Some(&b"fp-1"[..]));
    }

    #[test]
    fn test_mismatch_never_overwrites() {
        let mut store = TrustStore::empty("/nonexistent/store.json");
        store.verify("bob", b"original");

        assert_eq!(store.verify("bob", b"impostor"), Verification::Mismatch);
        assert_eq!(store.verify("bob", b"impostor"), Verification::Mismatch);
        assert_eq!(store.get("bob"), Some(&b"original"[..]));
    }

    #[test]
    fn test_explicit_trust_replaces() {
        let mut store = TrustStore::empty("/nonexistent/store.json");
        store.verify("bob", b"old");
        store.trust("bob", b"new");

        assert_eq!(store.verify("bob", b"new"), Verification::Verified);
    }

    #[test]
    fn test_missing_file_is_not_fatal() {
        let dir = tempdir().unwrap();
        let (store, err) = TrustStore::load(dir.path().join("missing.json"));

        assert!(store.is_empty());
        assert!(matches!(err, Some(TrustStoreError::Read { .. })));
    }

    #[test]
    fn test_corrupt_file_is_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        fs::write(&path, b"{ not json").unwrap();

        let (store, err) = TrustStore::load(&path);

        assert!(store.is_empty());
        assert!(matches!(err, Some(TrustStoreError::Parse { .. })));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let mut store = TrustStore::empty(&path);
        store.verify("carol", &[1, 2, 3]);
        store.set_identity(vec![9; 32]);
        store.save().unwrap();

        let (loaded, err) = TrustStore::load(&path);
        assert!(err.is_none());
        assert_eq!(loaded.get("carol"), Some(&[1u8, 2, 3][..]));
        assert_eq!(loaded.identity(), Some(&[9u8; 32][..]));
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, b"{}").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        TrustStore::empty(&path).save().unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, r#"{"contacts": {"dave": "0a0b"}}"#).unwrap();

        let (store, err) = TrustStore::load(&path);
        assert!(err.is_none());
        assert_eq!(store.get("dave"), Some(&[0x0a, 0x0b][..]));
        assert!(store.identity().is_none());
    }
}
