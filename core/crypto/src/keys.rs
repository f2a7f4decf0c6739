//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use rand::{rngs::OsRng, RngCore};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use lockbox_common::{Error, Result};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of key derivation salts in bytes.
pub const SALT_LENGTH: usize = 16;

/// Length of AES-GCM initialization vectors in bytes (96-bit).
pub const IV_LENGTH: usize = 12;

/// Master key (DEK) that encrypts all vault content.
///
/// Generated once at vault setup and never rotated. It is persisted only in
/// wrapped form; the cleartext lives in memory for an unlocked session.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; KEY_LENGTH],
}

impl MasterKey {
    /// Generate a fresh random master key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Create a master key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Create a master key from a decrypted slice.
    ///
    /// # Errors
    /// - Returns error if the slice is not exactly KEY_LENGTH bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LENGTH {
            return Err(Error::InvalidInput(format!(
                "Invalid master key length: expected {}, got {}",
                KEY_LENGTH,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl PartialEq for MasterKey {
    fn eq(&self, other: &Self) -> bool {
        self.key[..].ct_eq(&other.key[..]).into()
    }
}

impl Eq for MasterKey {}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

/// Key derived from a human secret, used only to wrap the master key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct WrappingKey {
    key: [u8; KEY_LENGTH],
}

impl WrappingKey {
    /// Create a wrapping key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for WrappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WrappingKey([REDACTED])")
    }
}

/// Salt for key derivation. Public, unique per envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt([u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        let mut salt = [0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create from a decoded slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let salt: [u8; SALT_LENGTH] = bytes.try_into().map_err(|_| {
            Error::InvalidInput(format!(
                "Invalid salt length: expected {}, got {}",
                SALT_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(salt))
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}

/// AES-GCM initialization vector. Fresh for every encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iv([u8; IV_LENGTH]);

impl Iv {
    /// Generate a random IV.
    pub fn generate() -> Self {
        let mut iv = [0u8; IV_LENGTH];
        OsRng.fill_bytes(&mut iv);
        Self(iv)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; IV_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create from a decoded slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let iv: [u8; IV_LENGTH] = bytes.try_into().map_err(|_| {
            Error::InvalidInput(format!(
                "Invalid IV length: expected {}, got {}",
                IV_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(iv))
    }

    /// Get the IV bytes.
    pub fn as_bytes(&self) -> &[u8; IV_LENGTH] {
        &self.0
    }
}
