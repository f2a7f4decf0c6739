//! Authenticated encryption using AES-256-GCM.
//!
//! 96-bit IV, 128-bit tag appended to the ciphertext. These sizes are part
//! of the persisted format and are never negotiated.

use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};

use crate::keys::{Iv, IV_LENGTH, KEY_LENGTH};
use lockbox_common::{Error, Result};

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Encrypt plaintext under `key` with the given IV.
///
/// # Postconditions
/// - Returns ciphertext || tag
/// - The ciphertext length is plaintext length + TAG_SIZE
///
/// # Security
/// - Caller is responsible for never reusing `iv` under the same key
pub fn encrypt(key: &[u8; KEY_LENGTH], iv: &Iv, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));

    cipher
        .encrypt(Nonce::from_slice(iv.as_bytes()), plaintext)
        .map_err(|_| Error::InvalidInput("Plaintext too long for AES-GCM".to_string()))
}

/// Decrypt ciphertext || tag under `key` with the given IV.
///
/// # Errors
/// - Returns `CorruptArtifact` if the ciphertext is shorter than a tag
/// - Returns `CorruptArtifact` if authentication fails (wrong key or
///   tampered data); no plaintext is released in that case
pub fn decrypt(key: &[u8; KEY_LENGTH], iv: &Iv, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(Error::CorruptArtifact("Ciphertext too short".to_string()));
    }

    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));

    cipher
        .decrypt(Nonce::from_slice(iv.as_bytes()), ciphertext)
        .map_err(|_| Error::CorruptArtifact("Authentication tag mismatch".to_string()))
}

/// Encrypt with a fresh random IV and return iv || ciphertext || tag.
pub fn seal(key: &[u8; KEY_LENGTH], plaintext: &[u8]) -> Result<Vec<u8>> {
    let iv = Iv::generate();
    let ciphertext = encrypt(key, &iv, plaintext)?;

    let mut result = Vec::with_capacity(IV_LENGTH + ciphertext.len());
    result.extend_from_slice(iv.as_bytes());
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt data produced by [`seal`].
pub fn open(key: &[u8; KEY_LENGTH], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < IV_LENGTH + TAG_SIZE {
        return Err(Error::CorruptArtifact("Sealed data too short".to_string()));
    }

    let (iv_bytes, ciphertext) = sealed.split_at(IV_LENGTH);
    decrypt(key, &Iv::from_slice(iv_bytes)?, ciphertext)
}
