//! Master key envelopes.
//!
//! An envelope is the master key encrypted under a wrapping key derived
//! from a human secret. The vault keeps a mandatory primary envelope
//! (password) and an optional recovery envelope (recovery code); both wrap
//! the same master key bytes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::aead::{self, TAG_SIZE};
use crate::kdf::derive_key;
use crate::keys::{Iv, MasterKey, Salt, KEY_LENGTH};
use lockbox_common::{Error, Result};

/// Wrapped master key: `{ salt, iv, ciphertext || tag }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeBlob {
    /// Salt the wrapping key was derived with.
    pub salt: Salt,
    /// IV used for the wrap.
    pub iv: Iv,
    /// Encrypted master key with the GCM tag appended.
    pub ciphertext: Vec<u8>,
}

/// Base64 form of an envelope as it sits in the preferences store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedEnvelope {
    pub salt: String,
    pub blob: String,
    pub iv: String,
}

impl EnvelopeBlob {
    /// Encode for persistence.
    pub fn encode(&self) -> EncodedEnvelope {
        EncodedEnvelope {
            salt: STANDARD.encode(self.salt.as_bytes()),
            blob: STANDARD.encode(&self.ciphertext),
            iv: STANDARD.encode(self.iv.as_bytes()),
        }
    }

    /// Decode a persisted envelope.
    ///
    /// # Errors
    /// - `InvalidInput` if any part is not base64 or has the wrong length
    pub fn decode(encoded: &EncodedEnvelope) -> Result<Self> {
        let salt = Salt::from_slice(&decode_part("salt", &encoded.salt)?)?;
        let iv = Iv::from_slice(&decode_part("iv", &encoded.iv)?)?;
        let ciphertext = decode_part("blob", &encoded.blob)?;

        if ciphertext.len() != KEY_LENGTH + TAG_SIZE {
            return Err(Error::InvalidInput(format!(
                "Malformed envelope: ciphertext is {} bytes",
                ciphertext.len()
            )));
        }

        Ok(Self {
            salt,
            iv,
            ciphertext,
        })
    }
}

fn decode_part(name: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|_| Error::InvalidInput(format!("Malformed envelope {}", name)))
}

/// Seals and opens master key envelopes.
pub struct Envelope;

impl Envelope {
    /// Wrap `master_key` under a key derived from `secret`.
    ///
    /// # Postconditions
    /// - Salt and IV are freshly generated on every call, so re-sealing
    ///   (password change, recovery reset) never reuses either
    ///
    /// # Errors
    /// - `InvalidInput` if the secret is empty
    pub fn seal(master_key: &MasterKey, secret: &[u8]) -> Result<EnvelopeBlob> {
        if secret.is_empty() {
            return Err(Error::InvalidInput("Secret cannot be empty".to_string()));
        }

        let salt = Salt::generate();
        let iv = Iv::generate();
        let wrapping_key = derive_key(secret, &salt);
        let ciphertext = aead::encrypt(wrapping_key.as_bytes(), &iv, master_key.as_bytes())?;

        Ok(EnvelopeBlob {
            salt,
            iv,
            ciphertext,
        })
    }

    /// Unwrap the master key with `secret`.
    ///
    /// # Errors
    /// - `InvalidInput` if the secret is empty or the blob does not hold a key
    /// - `AuthenticationFailure` if the tag does not verify (wrong secret or
    ///   corrupted blob); no partial key is ever returned
    pub fn open(blob: &EnvelopeBlob, secret: &[u8]) -> Result<MasterKey> {
        if secret.is_empty() {
            return Err(Error::InvalidInput("Secret cannot be empty".to_string()));
        }

        let wrapping_key = derive_key(secret, &blob.salt);
        let plaintext = aead::decrypt(wrapping_key.as_bytes(), &blob.iv, &blob.ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| Error::AuthenticationFailure)?;

        MasterKey::from_slice(&plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = MasterKey::generate();
        let blob = Envelope::seal(&key, b"Tr0ub4dor&3").unwrap();

        let opened = Envelope::open(&blob, b"Tr0ub4dor&3").unwrap();
        assert_eq!(opened, key);
        assert_eq!(blob.ciphertext.len(), KEY_LENGTH + TAG_SIZE);
    }

    #[test]
    fn test_wrong_secret_is_authentication_failure() {
        let key = MasterKey::generate();
        let blob = Envelope::seal(&key, b"correct").unwrap();

        let result = Envelope::open(&blob, b"incorrect");
        assert!(matches!(result, Err(Error::AuthenticationFailure)));
    }

    #[test]
    fn test_empty_secret_rejected() {
        let key = MasterKey::generate();
        assert!(matches!(
            Envelope::seal(&key, b""),
            Err(Error::InvalidInput(_))
        ));

        let blob = Envelope::seal(&key, b"pw").unwrap();
        assert!(matches!(
            Envelope::open(&blob, b""),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_reseal_regenerates_salt_and_iv() {
        let key = MasterKey::generate();
        let first = Envelope::seal(&key, b"same").unwrap();
        let second = Envelope::seal(&key, b"same").unwrap();

        assert_ne!(first.salt, second.salt);
        assert_ne!(first.iv, second.iv);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn test_tampered_blob_fails() {
        let key = MasterKey::generate();
        let blob = Envelope::seal(&key, b"secret").unwrap();

        for i in 0..blob.ciphertext.len() {
            let mut tampered = blob.clone();
            tampered.ciphertext[i] ^= 0x01;
            assert!(matches!(
                Envelope::open(&tampered, b"secret"),
                Err(Error::AuthenticationFailure)
            ));
        }

        let mut tampered = blob.clone();
        let mut iv = *tampered.iv.as_bytes();
        iv[0] ^= 0x80;
        tampered.iv = Iv::from_bytes(iv);
        assert!(Envelope::open(&tampered, b"secret").is_err());
    }

    #[test]
    fn test_encode_decode() {
        let key = MasterKey::generate();
        let blob = Envelope::seal(&key, b"secret").unwrap();

        let encoded = blob.encode();
        let decoded = EnvelopeBlob::decode(&encoded).unwrap();
        assert_eq!(decoded, blob);
        assert_eq!(STANDARD.decode(&encoded.iv).unwrap().len(), 12);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let key = MasterKey::generate();
        let mut encoded = Envelope::seal(&key, b"secret").unwrap().encode();
        encoded.iv = "not base64!".to_string();
        assert!(matches!(
            EnvelopeBlob::decode(&encoded),
            Err(Error::InvalidInput(_))
        ));

        let mut encoded = Envelope::seal(&key, b"secret").unwrap().encode();
        encoded.blob = STANDARD.encode([0u8; 10]);
        assert!(matches!(
            EnvelopeBlob::decode(&encoded),
            Err(Error::InvalidInput(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_roundtrip(key_bytes in any::<[u8; KEY_LENGTH]>(), secret in "[ -~]{1,32}") {
            let key = MasterKey::from_bytes(key_bytes);
            let blob = Envelope::seal(&key, secret.as_bytes()).unwrap();
            prop_assert_eq!(Envelope::open(&blob, secret.as_bytes()).unwrap(), key);
        }

        #[test]
        fn prop_wrong_secret_rejected(s1 in "[a-z0-9]{1,16}", s2 in "[a-z0-9]{1,16}") {
            prop_assume!(s1 != s2);
            let key = MasterKey::generate();
            let blob = Envelope::seal(&key, s1.as_bytes()).unwrap();
            let result = Envelope::open(&blob, s2.as_bytes());
            prop_assert!(matches!(result, Err(Error::AuthenticationFailure)));
        }
    }
}
