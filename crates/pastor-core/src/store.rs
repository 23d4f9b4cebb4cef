//! On-disk store file: a fixed header followed by the sealed payload.
//!
//! ```text
//!  0..8    magic "PASTOR\0\0"
//!  8..12   format version (u32 LE)
//! 12..16   argon2 memory KiB (u32 LE)
//! 16..20   argon2 iterations (u32 LE)
//! 20..24   argon2 lanes (u32 LE)
//! 24..56   salt
//! 56..80   nonce
//! 80..     ciphertext || 16-byte tag
//! ```
//!
//! The header is fed to the AEAD as associated data, so editing the KDF cost
//! or the salt fails authentication just like editing the ciphertext.
//!
//! Writers serialize on an advisory lock held on `<store>.lock` and replace
//! the store by renaming a fully synced staging file over it. Readers never
//! lock.

use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::{
    decrypt, derive_key, encrypt, generate_nonce, generate_salt, KdfParams, NONCE_LEN, SALT_LEN,
    TAG_LEN,
};
use crate::error::{PastorError, Result};

pub const STORE_MAGIC: &[u8; 8] = b"PASTOR\0\0";
pub const STORE_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 80;

const STAGING_SUFFIX: &str = ".staging";
const LOCK_SUFFIX: &str = ".lock";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreHeader {
    pub version: u32,
    pub kdf: KdfParams,
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
}

impl StoreHeader {
    fn fresh(kdf: KdfParams) -> Self {
        Self {
            version: STORE_VERSION,
            kdf,
            salt: generate_salt(),
            nonce: generate_nonce(),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..8].copy_from_slice(STORE_MAGIC);
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.kdf.memory_kib.to_le_bytes());
        buf[16..20].copy_from_slice(&self.kdf.iterations.to_le_bytes());
        buf[20..24].copy_from_slice(&self.kdf.lanes.to_le_bytes());
        buf[24..56].copy_from_slice(&self.salt);
        buf[56..80].copy_from_slice(&self.nonce);
        buf
    }

    /// The error is a reason for debug logs only; callers collapse it into
    /// [`PastorError::AuthenticationFailed`].
    pub fn from_bytes(buf: &[u8]) -> std::result::Result<Self, &'static str> {
        if buf.len() < HEADER_SIZE {
            return Err("truncated header");
        }
        if &buf[..8] != STORE_MAGIC {
            return Err("bad magic");
        }
        let word = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let version = word(8);
        if version != STORE_VERSION {
            return Err("unsupported store version");
        }
        let kdf = KdfParams::new(word(12), word(16), word(20));
        if !kdf.is_acceptable() {
            return Err("key-derivation parameters out of range");
        }
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&buf[24..56]);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&buf[56..80]);
        Ok(Self {
            version,
            kdf,
            salt,
            nonce,
        })
    }
}

/// Reads and decrypts the store at `path`, returning the plaintext payload.
pub fn open(path: &Path, passphrase: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    open_with_header(path, passphrase).map(|(_, plaintext)| plaintext)
}

/// Like [`open`], also handing back the verified header so a rewrite can
/// keep the store's KDF cost.
pub fn open_with_header(
    path: &Path,
    passphrase: &[u8],
) -> Result<(StoreHeader, Zeroizing<Vec<u8>>)> {
    debug!(path = %path.display(), "opening store");
    let data = fs::read(path).map_err(|e| PastorError::io(path, e))?;
    if data.len() < HEADER_SIZE + TAG_LEN {
        return Err(reject(&data, passphrase, "file too short"));
    }
    let (header_bytes, ciphertext) = data.split_at(HEADER_SIZE);
    let header = StoreHeader::from_bytes(header_bytes)
        .map_err(|reason| reject(&data, passphrase, reason))?;
    let key = derive_key(passphrase, &header.salt, &header.kdf)
        .map_err(|_| PastorError::AuthenticationFailed)?;
    let plaintext = decrypt(&key, &header.nonce, ciphertext, header_bytes)
        .map_err(|_| PastorError::AuthenticationFailed)?;
    debug!(bytes = plaintext.len(), "store decrypted");
    Ok((header, plaintext))
}

/// Pays for one default-cost key derivation before refusing a damaged
/// header, so it takes as long as a wrong passphrase does.
fn reject(data: &[u8], passphrase: &[u8], reason: &'static str) -> PastorError {
    debug!(reason, "store rejected");
    let mut salt = [0u8; SALT_LEN];
    if let Some(bytes) = data.get(24..24 + SALT_LEN) {
        salt.copy_from_slice(bytes);
    }
    let _ = derive_key(passphrase, &salt, &KdfParams::default());
    PastorError::AuthenticationFailed
}

pub fn exists(path: &Path) -> bool {
    path.is_file()
}

/// Exclusive advisory lock guarding writes to one store. Released on drop.
#[derive(Debug)]
pub struct WriterLock {
    file: File,
    store_path: PathBuf,
}

impl WriterLock {
    /// Blocks until no other process holds the lock for `store_path`.
    pub fn acquire(store_path: &Path) -> Result<Self> {
        let lock_path = sibling_path(store_path, LOCK_SUFFIX)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| PastorError::io(&lock_path, e))?;
        file.lock_exclusive()
            .map_err(|e| PastorError::io(&lock_path, e))?;
        debug!(path = %lock_path.display(), "writer lock acquired");
        Ok(Self {
            file,
            store_path: store_path.to_path_buf(),
        })
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Seals `plaintext` under a fresh salt and nonce and atomically replaces
/// the store at `path`.
pub fn save(path: &Path, plaintext: &[u8], passphrase: &[u8], kdf: &KdfParams) -> Result<()> {
    let lock = WriterLock::acquire(path)?;
    save_locked(&lock, plaintext, passphrase, kdf)
}

/// Same as [`save`] for a caller that already holds the writer lock, e.g.
/// across an open-modify-save cycle.
pub fn save_locked(
    lock: &WriterLock,
    plaintext: &[u8],
    passphrase: &[u8],
    kdf: &KdfParams,
) -> Result<()> {
    if !kdf.is_acceptable() {
        return Err(PastorError::invalid("unsupported key-derivation parameters"));
    }
    let path = lock.store_path();
    cleanup_staging(path);

    let header = StoreHeader::fresh(*kdf);
    let header_bytes = header.to_bytes();
    let key = derive_key(passphrase, &header.salt, &header.kdf)
        .map_err(|_| PastorError::invalid("key derivation failed"))?;
    let ciphertext = encrypt(&key, &header.nonce, plaintext, &header_bytes)
        .map_err(|_| PastorError::invalid("encryption failed"))?;

    let staging = staging_path(path)?;
    if let Err(e) = write_synced(&staging, &header_bytes, &ciphertext) {
        let _ = fs::remove_file(&staging);
        return Err(PastorError::io(&staging, e));
    }
    if let Err(e) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(PastorError::io(path, e));
    }
    fsync_dir(&parent_dir(path)).map_err(|e| PastorError::io(parent_dir(path), e))?;
    info!(path = %path.display(), bytes = HEADER_SIZE + ciphertext.len(), "store written");
    Ok(())
}

fn write_synced(path: &Path, header: &[u8], ciphertext: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(header)?;
    file.write_all(ciphertext)?;
    file.sync_all()?;
    Ok(())
}

/// Removes staging files a crashed writer left next to `path`. Only called
/// with the writer lock held, so no live writer owns them.
fn cleanup_staging(path: &Path) {
    let Some(prefix) = staging_prefix(path) else {
        return;
    };
    let Ok(entries) = fs::read_dir(parent_dir(path)) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&prefix) && name.ends_with(STAGING_SUFFIX) {
            warn!(path = %entry.path().display(), "removing orphaned staging file");
            let _ = fs::remove_file(entry.path());
        }
    }
}

fn staging_prefix(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| format!(".{}.", name.to_string_lossy()))
}

fn staging_path(path: &Path) -> Result<PathBuf> {
    let prefix = staging_prefix(path)
        .ok_or_else(|| PastorError::invalid(format!("{} is not a file path", path.display())))?;
    Ok(parent_dir(path).join(format!("{prefix}{}{STAGING_SUFFIX}", Uuid::new_v4())))
}

fn sibling_path(path: &Path, suffix: &str) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| PastorError::invalid(format!("{} is not a file path", path.display())))?;
    let mut name: OsString = name.to_os_string();
    name.push(suffix);
    Ok(path.with_file_name(name))
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn fsync_dir(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let dir = File::open(path)?;
        dir.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
