//! Settings supplied from the environment instead of compiled-in paths.

use crate::crypto::KdfParams;
use crate::error::{PastorError, Result};

pub const PASSPHRASE_ENV: &str = "PASTOR_PASSWORD";
pub const LOG_ENV: &str = "PASTOR_LOG";
pub const KDF_MEMORY_ENV: &str = "PASTOR_KDF_MEMORY_KIB";
pub const KDF_ITERATIONS_ENV: &str = "PASTOR_KDF_ITERATIONS";
pub const KDF_LANES_ENV: &str = "PASTOR_KDF_LANES";

pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Cost parameters for stores written by this process. Unset variables fall
/// back to [`KdfParams::default`].
pub fn kdf_params_from_env() -> Result<KdfParams> {
    kdf_params_from(|name| std::env::var(name).ok())
}

pub fn kdf_params_from(lookup: impl Fn(&str) -> Option<String>) -> Result<KdfParams> {
    let defaults = KdfParams::default();
    let read = |name: &str, fallback: u32| -> Result<u32> {
        match lookup(name) {
            Some(value) if !value.trim().is_empty() => value
                .trim()
                .parse()
                .map_err(|_| PastorError::invalid(format!("{name} must be an unsigned integer"))),
            _ => Ok(fallback),
        }
    };
    let params = KdfParams::new(
        read(KDF_MEMORY_ENV, defaults.memory_kib)?,
        read(KDF_ITERATIONS_ENV, defaults.iterations)?,
        read(KDF_LANES_ENV, defaults.lanes)?,
    );
    if !params.is_acceptable() {
        return Err(PastorError::invalid("unsupported key-derivation parameters"));
    }
    Ok(params)
}
