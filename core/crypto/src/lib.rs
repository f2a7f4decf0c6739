//! Cryptographic primitives for Lockbox.
//!
//! This module provides:
//! - Key derivation using PBKDF2-HMAC-SHA256
//! - Master key wrapping (envelopes) using AES-256-GCM
//! - Streaming AES-256-GCM for files of any size
//! - Field encryption for short strings (note bodies, credentials)
//! - Recovery code generation
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Authentication tags are compared in constant time

pub mod aead;
pub mod envelope;
pub mod kdf;
pub mod keys;
pub mod recovery_code;
pub mod stream;
pub mod text;

pub use envelope::{EncodedEnvelope, Envelope, EnvelopeBlob};
pub use kdf::{derive_key, PBKDF2_ITERATIONS};
pub use keys::{Iv, MasterKey, Salt, WrappingKey, IV_LENGTH, KEY_LENGTH, SALT_LENGTH};
pub use recovery_code::{generate_recovery_code, normalize_recovery_code};
pub use stream::{decrypt_stream, encrypt_stream, DecryptingStream, EncryptingStream};
pub use text::{decrypt_text, encrypt_text};
