//! Key derivation using PBKDF2-HMAC-SHA256.
//!
//! Turns a password or recovery code plus a per-envelope salt into the
//! wrapping key for that envelope. The iteration count is fixed because it
//! is part of the persisted format: changing it would orphan every envelope
//! sealed before.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::keys::{Salt, WrappingKey, KEY_LENGTH};

/// PBKDF2 rounds for every wrapping key.
pub const PBKDF2_ITERATIONS: u32 = 15_000;

/// Derive a wrapping key from a secret and salt.
///
/// # Preconditions
/// - `secret` should not be empty; callers reject empty input before
///   reaching this point
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
///
/// # Security
/// - Secret is not stored or logged
/// - The intermediate buffer is zeroized after use
pub fn derive_key(secret: &[u8], salt: &Salt) -> WrappingKey {
    derive_with_rounds(secret, salt.as_bytes(), PBKDF2_ITERATIONS)
}

fn derive_with_rounds(secret: &[u8], salt: &[u8], rounds: u32) -> WrappingKey {
    let mut key_bytes = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(secret, salt, rounds, &mut key_bytes);
    let key = WrappingKey::from_bytes(key_bytes);
    key_bytes.zeroize();
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_deterministic() {
        let password = b"test-password-123";
        let salt = Salt::from_bytes([42u8; 16]);

        let key1 = derive_key(password, &salt);
        let key2 = derive_key(password, &salt);

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_salt() {
        let password = b"test-password-123";
        let salt1 = Salt::from_bytes([1u8; 16]);
        let salt2 = Salt::from_bytes([2u8; 16]);

        let key1 = derive_key(password, &salt1);
        let key2 = derive_key(password, &salt2);

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_password() {
        let salt = Salt::from_bytes([42u8; 16]);

        let key1 = derive_key(b"password1", &salt);
        let key2 = derive_key(b"password2", &salt);

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_pbkdf2_sha256_known_vector() {
        // Published PBKDF2-HMAC-SHA256 vector, c = 1, dkLen = 32.
        let key = derive_with_rounds(b"password", b"salt", 1);
        let expected: [u8; 32] = [
            0x12, 0x0f, 0xb6, 0xcf, 0xfc, 0xf8, 0xb3, 0x2c, 0x43, 0xe7, 0x22, 0x52, 0x56, 0xc4,
            0xf8, 0x37, 0xa8, 0x65, 0x48, 0xc9, 0x2c, 0xcc, 0x35, 0x48, 0x08, 0x05, 0x98, 0x7c,
            0xb7, 0x0b, 0xe1, 0x7b,
        ];
        assert_eq!(key.as_bytes(), &expected);
    }
}
