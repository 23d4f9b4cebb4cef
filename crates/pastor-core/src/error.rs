use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PastorError>;

/// Every failure a lookup or store update can end in.
///
/// Messages are shown to the user verbatim, so none of them may carry the
/// passphrase, a secret or decrypted payload bytes.
#[derive(Debug, Error)]
pub enum PastorError {
    /// Wrong passphrase, tampered file, or a file that is not a store at all.
    #[error("authentication failed: wrong passphrase or damaged store")]
    AuthenticationFailed,

    #[error("store is corrupt: {0}")]
    CorruptStore(&'static str),

    #[error("no entry matches host {host}")]
    NotFound { host: String },

    #[error("cannot access {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl PastorError {
    pub const EXIT_NOT_FOUND: u8 = 1;
    pub const EXIT_AUTHENTICATION_FAILED: u8 = 2;
    pub const EXIT_CORRUPT_STORE: u8 = 3;
    pub const EXIT_IO: u8 = 4;
    pub const EXIT_INVALID_ARGUMENT: u8 = 5;

    pub fn exit_code(&self) -> u8 {
        match self {
            PastorError::NotFound { .. } => Self::EXIT_NOT_FOUND,
            PastorError::AuthenticationFailed => Self::EXIT_AUTHENTICATION_FAILED,
            PastorError::CorruptStore(_) => Self::EXIT_CORRUPT_STORE,
            PastorError::Io { .. } => Self::EXIT_IO,
            PastorError::InvalidArgument(_) => Self::EXIT_INVALID_ARGUMENT,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PastorError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        PastorError::InvalidArgument(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(PastorError::NotFound { host: "a".into() }.exit_code(), 1);
        assert_eq!(PastorError::AuthenticationFailed.exit_code(), 2);
        assert_eq!(PastorError::CorruptStore("x").exit_code(), 3);
        let io = PastorError::io("/nope", std::io::ErrorKind::NotFound.into());
        assert_eq!(io.exit_code(), 4);
        assert_eq!(PastorError::invalid("empty").exit_code(), 5);
    }

    #[test]
    fn not_found_names_the_host() {
        let err = PastorError::NotFound {
            host: "gitlab.com".into(),
        };
        assert_eq!(err.to_string(), "no entry matches host gitlab.com");
    }
}
