//! Common error types for Lockbox.

use thiserror::Error;

/// Top-level error type for Lockbox operations.
///
/// Messages never carry secrets, key bytes or plaintext.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid input provided (empty secret, malformed blob).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The supplied secret did not open the envelope.
    #[error("Authentication failed")]
    AuthenticationFailure,

    /// No recovery envelope has been configured.
    #[error("Recovery is not available for this vault")]
    RecoveryUnavailable,

    /// The operation needs an unlocked session.
    #[error("Vault session is locked")]
    SessionRequired,

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An encrypted artifact or field failed authentication.
    #[error("Corrupt artifact: {0}")]
    CorruptArtifact(String),

    /// Catalog or preferences backend failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The vault has not been set up yet.
    #[error("Vault is not set up")]
    NotSetUp,
}

impl Error {
    /// Whether this error means the user supplied the wrong secret.
    ///
    /// Callers use this to decide whether to bump the failed-attempt counter.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Error::AuthenticationFailure)
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_authentication_failure());
    }

    #[test]
    fn test_authentication_failure_message_is_generic() {
        let err = Error::AuthenticationFailure;
        assert!(err.is_authentication_failure());
        assert_eq!(err.to_string(), "Authentication failed");
    }
}
