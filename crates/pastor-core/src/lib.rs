//! pastor-core: encrypted credential store and URL lookup
//!
//! # Module layout
//! - `crypto`    Argon2id key derivation, XChaCha20-Poly1305 sealing
//! - `store`     on-disk format, locked atomic writes
//! - `entry`     credential records and payload encoding
//! - `matcher`   URL parsing and best-entry selection
//! - `lookup`    lookup, create, import and generate operations
//! - `generator` random passwords under character-class rules
//! - `config`    environment-supplied settings
//! - `error`     error taxonomy and exit codes

pub mod config;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod generator;
pub mod lookup;
pub mod matcher;
pub mod store;

pub use crypto::KdfParams;
pub use entry::{Entry, StorePayload};
pub use error::{PastorError, Result};
pub use generator::PasswordPolicy;
pub use lookup::{ImportRequest, Passphrase, Secret, UrlSource};
pub use matcher::Query;
