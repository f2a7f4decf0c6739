//! Common types used throughout Lockbox.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use zeroize::Zeroize;

/// Opaque on-disk identifier of an encrypted artifact.
///
/// Always a random UUID, so the name of an artifact file reveals nothing
/// about the content it holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse an identifier read back from storage.
    ///
    /// # Errors
    /// - Returns error if `id` is not a UUID. Anything else could smuggle
    ///   path separators into the artifacts directory.
    pub fn parse(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        Uuid::parse_str(&id).map_err(|_| {
            crate::Error::InvalidInput(format!("Invalid artifact identifier: {}", id))
        })?;
        Ok(Self(id))
    }

    /// Get the inner string value, which is also the artifact file name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A human-supplied secret (password or recovery code).
///
/// Never persisted. The buffer is zeroized on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct Secret(Vec<u8>);

impl Secret {
    /// Wrap raw secret bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// View the secret as text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED; {} bytes])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_id_generate_unique() {
        let a = ArtifactId::generate();
        let b = ArtifactId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_artifact_id_parse() {
        let id = ArtifactId::generate();
        let parsed = ArtifactId::parse(id.as_str()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_artifact_id_rejects_paths() {
        assert!(ArtifactId::parse("../prefs.json").is_err());
        assert!(ArtifactId::parse("").is_err());
    }

    #[test]
    fn test_artifact_id_serde() {
        let id = ArtifactId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }

    #[test]
    fn test_secret_debug_redacted() {
        let secret = Secret::from("hunter2");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("hunter2"));
        assert_eq!(secret.len(), 7);
        assert_eq!(secret.as_str(), Some("hunter2"));
    }
}
