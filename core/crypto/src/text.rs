//! Field encryption for short strings.
//!
//! Note bodies, credential fields and display names are stored in the
//! catalog as `base64(iv || ciphertext || tag)` next to non-sensitive
//! columns. Same AES-256-GCM scheme as artifact files.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::aead;
use crate::keys::MasterKey;
use lockbox_common::{Error, Result};

/// Encrypt a string field under the master key.
pub fn encrypt_text(key: &MasterKey, plaintext: &str) -> Result<String> {
    let sealed = aead::seal(key.as_bytes(), plaintext.as_bytes())?;
    Ok(STANDARD.encode(sealed))
}

/// Decrypt a string field produced by [`encrypt_text`].
///
/// # Errors
/// - `InvalidInput` if `encoded` is not base64
/// - `CorruptArtifact` if it is too short, fails authentication, or does
///   not decrypt to UTF-8
pub fn decrypt_text(key: &MasterKey, encoded: &str) -> Result<String> {
    let sealed = STANDARD
        .decode(encoded.trim())
        .map_err(|_| Error::InvalidInput("Encrypted field is not base64".to_string()))?;
    let plaintext = aead::open(key.as_bytes(), &sealed)?;

    String::from_utf8(plaintext)
        .map_err(|_| Error::CorruptArtifact("Decrypted field is not UTF-8".to_string()))
}
