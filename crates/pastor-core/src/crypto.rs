//! Key derivation and authenticated encryption for the store file.
//!
//! Argon2id turns the passphrase into a 32-byte key; XChaCha20-Poly1305 seals
//! the payload. Every failure in here is reported as an opaque
//! [`CryptoFailure`] so callers cannot tell a wrong passphrase from a
//! flipped bit.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use zeroize::Zeroizing;

pub const SALT_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;
pub const DERIVED_KEY_LEN: usize = 32;

pub const KDF_MEMORY_COST: u32 = 65536; // 64MB
pub const KDF_TIME_COST: u32 = 3;
pub const KDF_PARALLELISM: u32 = 4;

// Upper bounds accepted when reading parameters back from a header.
pub const KDF_MAX_MEMORY_COST: u32 = 1024 * 1024;
pub const KDF_MAX_TIME_COST: u32 = 64;
pub const KDF_MAX_PARALLELISM: u32 = 16;

pub type DerivedKey = Zeroizing<[u8; DERIVED_KEY_LEN]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoFailure;

/// Argon2id cost parameters. Stored in the header of every store so the
/// cost can be raised later without breaking existing files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub lanes: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: KDF_MEMORY_COST,
            iterations: KDF_TIME_COST,
            lanes: KDF_PARALLELISM,
        }
    }
}

impl KdfParams {
    pub fn new(memory_kib: u32, iterations: u32, lanes: u32) -> Self {
        Self {
            memory_kib,
            iterations,
            lanes,
        }
    }

    /// True when argon2 accepts the parameters and they stay under the caps
    /// that keep a hostile header from pinning the machine.
    pub fn is_acceptable(&self) -> bool {
        self.memory_kib <= KDF_MAX_MEMORY_COST
            && self.iterations <= KDF_MAX_TIME_COST
            && self.lanes <= KDF_MAX_PARALLELISM
            && self.argon2_params().is_ok()
    }

    fn argon2_params(&self) -> Result<Params, argon2::Error> {
        Params::new(
            self.memory_kib,
            self.iterations,
            self.lanes,
            Some(DERIVED_KEY_LEN),
        )
    }
}

pub fn derive_key(
    passphrase: &[u8],
    salt: &[u8; SALT_LEN],
    params: &KdfParams,
) -> Result<DerivedKey, CryptoFailure> {
    let params = params.argon2_params().map_err(|_| CryptoFailure)?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    argon
        .hash_password_into(passphrase, salt, &mut *key)
        .map_err(|_| CryptoFailure)?;
    Ok(key)
}

/// Returns ciphertext with the 16-byte tag appended. `aad` is authenticated
/// but not encrypted.
pub fn encrypt(
    key: &DerivedKey,
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoFailure> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&**key));
    cipher
        .encrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoFailure)
}

pub fn decrypt(
    key: &DerivedKey,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoFailure> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoFailure);
    }
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&**key));
    let plaintext = cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoFailure)?;
    Ok(Zeroizing::new(plaintext))
}

pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
pub(crate) fn cheap_params() -> KdfParams {
    KdfParams::new(64, 1, 1)
}
