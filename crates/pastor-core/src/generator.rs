//! Random password generation under character-class requirements.

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::Rng;
use zeroize::Zeroizing;

use crate::error::{PastorError, Result};

pub const DEFAULT_MIN_LENGTH: usize = 48;
pub const DEFAULT_MAX_LENGTH: usize = 64;
pub const DEFAULT_SPECIAL_CHARACTERS: &str = "<>[](){}~&\"!?%/";
pub const MAX_SPECIAL_CHARACTERS: usize = 255;
pub const MAX_PASSWORD_LENGTH: usize = 4096;

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min: Option<usize>,
    pub max: Option<usize>,
    pub uppercase: usize,
    pub lowercase: usize,
    pub digits: usize,
    pub special: usize,
    /// Replaces [`DEFAULT_SPECIAL_CHARACTERS`] when set and non-empty.
    pub special_characters: Option<String>,
    pub no_digits: bool,
    pub no_special: bool,
}

impl PasswordPolicy {
    fn required(&self) -> Result<usize> {
        [self.lowercase, self.digits, self.special]
            .into_iter()
            .try_fold(self.uppercase, usize::checked_add)
            .ok_or_else(|| PastorError::invalid("required character counts are too large"))
    }

    /// Resolves the inclusive length range. An explicit `max` alone implies
    /// `min = max / 2`; both bounds grow to fit the required characters.
    /// Nothing may exceed [`MAX_PASSWORD_LENGTH`].
    pub fn length_bounds(&self) -> Result<(usize, usize)> {
        let required = self.required()?;
        let min = match (self.min, self.max) {
            (Some(min), _) => min,
            (None, Some(max)) => max / 2,
            (None, None) => DEFAULT_MIN_LENGTH,
        }
        .max(required);
        let max = match self.max {
            Some(max) => max,
            None => DEFAULT_MAX_LENGTH.max(min),
        };
        if max > MAX_PASSWORD_LENGTH || min > MAX_PASSWORD_LENGTH {
            return Err(PastorError::invalid(format!(
                "passwords are limited to {MAX_PASSWORD_LENGTH} characters"
            )));
        }
        if max < required {
            return Err(PastorError::invalid(format!(
                "maximum length {max} cannot hold {required} required characters"
            )));
        }
        if min > max {
            return Err(PastorError::invalid(format!(
                "minimum length {min} exceeds maximum length {max}"
            )));
        }
        if max == 0 {
            return Err(PastorError::invalid("password length must be positive"));
        }
        Ok((min.max(1), max))
    }

    fn special_set(&self) -> Result<Vec<u8>> {
        let set = match self.special_characters.as_deref() {
            Some(chars) if !chars.is_empty() => chars,
            _ => DEFAULT_SPECIAL_CHARACTERS,
        };
        if set.len() > MAX_SPECIAL_CHARACTERS {
            return Err(PastorError::invalid(format!(
                "at most {MAX_SPECIAL_CHARACTERS} special characters may be given"
            )));
        }
        if !set.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(PastorError::invalid(
                "special characters must be printable ASCII without spaces",
            ));
        }
        Ok(set.as_bytes().to_vec())
    }

    fn validate(&self) -> Result<()> {
        if self.no_digits && self.digits > 0 {
            return Err(PastorError::invalid(
                "digits cannot be both disallowed and required",
            ));
        }
        if self.no_special && self.special > 0 {
            return Err(PastorError::invalid(
                "special characters cannot be both disallowed and required",
            ));
        }
        Ok(())
    }
}

pub fn generate(policy: &PasswordPolicy) -> Result<Zeroizing<String>> {
    policy.validate()?;
    let special = policy.special_set()?;
    let (min, max) = policy.length_bounds()?;

    let mut pool: Vec<u8> = Vec::with_capacity(LOWERCASE.len() * 2 + DIGITS.len() + special.len());
    pool.extend_from_slice(LOWERCASE);
    pool.extend_from_slice(UPPERCASE);
    if !policy.no_digits {
        pool.extend_from_slice(DIGITS);
    }
    if !policy.no_special {
        pool.extend_from_slice(&special);
    }

    let mut rng = OsRng;
    let length = rng.gen_range(min..=max);
    let mut chars = Zeroizing::new(Vec::with_capacity(length));
    for (set, count) in [
        (UPPERCASE, policy.uppercase),
        (LOWERCASE, policy.lowercase),
        (DIGITS, policy.digits),
        (special.as_slice(), policy.special),
    ] {
        for _ in 0..count {
            chars.push(pick(set, &mut rng));
        }
    }
    while chars.len() < length {
        chars.push(pick(&pool, &mut rng));
    }
    chars.shuffle(&mut rng);

    let mut password = Zeroizing::new(String::with_capacity(length));
    password.extend(chars.iter().map(|b| char::from(*b)));
    Ok(password)
}

fn pick(set: &[u8], rng: &mut OsRng) -> u8 {
    set[rng.gen_range(0..set.len())]
}
