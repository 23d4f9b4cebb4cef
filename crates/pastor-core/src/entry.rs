//! Credential records and the decrypted payload that holds them.
//!
//! Entries keep their insertion order. Duplicate keys are legal; the matcher
//! resolves them by position, so nothing here may reorder or dedupe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{PastorError, Result};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Entry {
    pub key: String,
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[zeroize(skip)]
    pub added_at: DateTime<Utc>,
}

impl Entry {
    pub fn new(key: impl Into<String>, secret: impl Into<String>, metadata: Option<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
            metadata,
            added_at: Utc::now(),
        }
    }

    /// Stored keys compare case-insensitively and ignore a trailing root dot.
    pub fn normalized_key(&self) -> &str {
        self.key.trim().trim_end_matches('.')
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .field("metadata", &self.metadata)
            .field("added_at", &self.added_at)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorePayload {
    pub store_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub entries: Vec<Entry>,
}

impl StorePayload {
    pub fn empty() -> Self {
        let now = Utc::now();
        Self {
            store_id: Uuid::new_v4(),
            created_at: now,
            last_modified: now,
            entries: Vec::new(),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.normalized_key().eq_ignore_ascii_case(key))
    }

    /// Drops every entry stored under `key`, returning how many went.
    pub fn remove_key(&mut self, key: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|entry| !entry.normalized_key().eq_ignore_ascii_case(key));
        before - self.entries.len()
    }

    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
        self.last_modified = Utc::now();
    }
}

/// Decodes a decrypted payload into its ordered entry list.
///
/// Only runs after the AEAD tag verified, so a failure here means the format
/// is wrong, not the passphrase.
pub fn build_index(plaintext: &[u8]) -> Result<StorePayload> {
    let payload: StorePayload = serde_json::from_slice(plaintext)
        .map_err(|_| PastorError::CorruptStore("payload is not a valid entry list"))?;
    if payload
        .entries
        .iter()
        .any(|entry| entry.normalized_key().is_empty())
    {
        return Err(PastorError::CorruptStore("entry with an empty key"));
    }
    Ok(payload)
}

pub fn encode(payload: &StorePayload) -> Result<Zeroizing<Vec<u8>>> {
    serde_json::to_vec(payload)
        .map(Zeroizing::new)
        .map_err(|_| PastorError::CorruptStore("payload cannot be serialized"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_with(keys: &[(&str, &str)]) -> StorePayload {
        let mut payload = StorePayload::empty();
        for (key, secret) in keys {
            payload.push(Entry::new(*key, *secret, None));
        }
        payload
    }

    #[test]
    fn encode_then_build_keeps_order_and_duplicates() {
        let payload = payload_with(&[
            ("example.com", "a"),
            ("github.com", "b"),
            ("example.com", "c"),
        ]);
        let bytes = encode(&payload).unwrap();
        let rebuilt = build_index(&bytes).unwrap();
        assert_eq!(rebuilt, payload);
        let secrets: Vec<&str> = rebuilt.entries.iter().map(|e| e.secret.as_str()).collect();
        assert_eq!(secrets, vec!["a", "b", "c"]);
    }

    #[test]
    fn garbage_is_corrupt() {
        let err = build_index(b"pastor 12345\nexample.com hunter2").unwrap_err();
        assert!(matches!(err, PastorError::CorruptStore(_)));
    }

    #[test]
    fn empty_key_is_corrupt() {
        let mut payload = payload_with(&[("example.com", "a")]);
        payload.entries.push(Entry::new("  ", "b", None));
        let bytes = encode(&payload).unwrap();
        let err = build_index(&bytes).unwrap_err();
        assert!(matches!(err, PastorError::CorruptStore("entry with an empty key")));
    }

    #[test]
    fn corrupt_message_does_not_echo_payload() {
        let json = br#"{"store_id":"not-a-uuid-hunter2","created_at":1,"last_modified":1,"entries":[]}"#;
        let err = build_index(json).unwrap_err();
        assert!(!err.to_string().contains("hunter2"));
    }

    #[test]
    fn remove_key_is_case_insensitive() {
        let mut payload = payload_with(&[
            ("Example.com", "a"),
            ("github.com", "b"),
            ("example.com.", "c"),
        ]);
        assert!(payload.contains_key("example.com"));
        assert_eq!(payload.remove_key("example.com"), 2);
        assert_eq!(payload.entries.len(), 1);
        assert!(!payload.contains_key("example.com"));
    }

    #[test]
    fn debug_redacts_secret() {
        let entry = Entry::new("github.com", "s3cr3t", None);
        assert!(!format!("{entry:?}").contains("s3cr3t"));
    }
}
