//! Streaming AES-256-GCM for large files.
//!
//! The artifact format is a single GCM message:
//!
//! ```text
//! [12-byte IV][ciphertext][16-byte tag]
//! ```
//!
//! There is no header and no per-chunk framing, so the output is identical
//! to one-shot AES-256-GCM over the whole file. To keep memory bounded the
//! GCM construction is driven incrementally from its parts: AES-CTR for the
//! keystream and GHASH for the tag.

use std::io::{ErrorKind, Read, Write};

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::Aes256;
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::aead::TAG_SIZE;
use crate::keys::{Iv, MasterKey, IV_LENGTH, KEY_LENGTH};
use lockbox_common::{Error, Result};

/// Default chunk size for streaming encryption (4 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024;

const BLOCK_SIZE: usize = 16;

type Aes256Ctr = ctr::Ctr32BE<Aes256>;

/// Incremental GCM state for one message.
struct GcmState {
    ctr: Aes256Ctr,
    ghash: GHash,
    tag_mask: [u8; BLOCK_SIZE],
    pending: [u8; BLOCK_SIZE],
    pending_len: usize,
    ciphertext_len: u64,
}

impl GcmState {
    fn new(key: &[u8; KEY_LENGTH], iv: &Iv) -> Self {
        let cipher = Aes256::new(GenericArray::from_slice(key));

        let mut hash_key = GenericArray::default();
        cipher.encrypt_block(&mut hash_key);
        let ghash = GHash::new(&hash_key);

        // J0 = IV || 0^31 || 1 for 96-bit IVs.
        let mut j0 = [0u8; BLOCK_SIZE];
        j0[..IV_LENGTH].copy_from_slice(iv.as_bytes());
        j0[BLOCK_SIZE - 1] = 1;

        let mut mask = GenericArray::clone_from_slice(&j0);
        cipher.encrypt_block(&mut mask);
        let mut tag_mask = [0u8; BLOCK_SIZE];
        tag_mask.copy_from_slice(&mask);

        // Payload keystream starts at inc32(J0).
        let mut counter = j0;
        counter[BLOCK_SIZE - 1] = 2;
        let ctr = Aes256Ctr::new(
            GenericArray::from_slice(key),
            GenericArray::from_slice(&counter),
        );

        Self {
            ctr,
            ghash,
            tag_mask,
            pending: [0u8; BLOCK_SIZE],
            pending_len: 0,
            ciphertext_len: 0,
        }
    }

    fn encrypt_in_place(&mut self, buf: &mut [u8]) -> Result<()> {
        self.apply_keystream(buf)?;
        self.absorb(buf);
        Ok(())
    }

    fn decrypt_in_place(&mut self, buf: &mut [u8]) -> Result<()> {
        self.absorb(buf);
        self.apply_keystream(buf)
    }

    /// The 32-bit block counter caps a message at about 64 GiB.
    fn apply_keystream(&mut self, buf: &mut [u8]) -> Result<()> {
        self.ctr
            .try_apply_keystream(buf)
            .map_err(|_| Error::InvalidInput("Stream too long for AES-GCM".to_string()))
    }

    /// Feed ciphertext into GHASH, carrying partial blocks across calls.
    fn absorb(&mut self, mut data: &[u8]) {
        self.ciphertext_len += data.len() as u64;

        if self.pending_len > 0 {
            let take = (BLOCK_SIZE - self.pending_len).min(data.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&data[..take]);
            self.pending_len += take;
            data = &data[take..];

            if self.pending_len < BLOCK_SIZE {
                return;
            }
            self.ghash.update(&[GenericArray::clone_from_slice(&self.pending)]);
            self.pending_len = 0;
        }

        let whole = data.len() - data.len() % BLOCK_SIZE;
        if whole > 0 {
            self.ghash.update_padded(&data[..whole]);
        }

        let rest = &data[whole..];
        self.pending[..rest.len()].copy_from_slice(rest);
        self.pending_len = rest.len();
    }

    fn finalize(mut self) -> [u8; TAG_SIZE] {
        if self.pending_len > 0 {
            self.ghash.update_padded(&self.pending[..self.pending_len]);
        }

        // len(A) || len(C) in bits; there is no associated data.
        let mut lengths = [0u8; BLOCK_SIZE];
        lengths[8..].copy_from_slice(&(self.ciphertext_len * 8).to_be_bytes());
        self.ghash.update(&[GenericArray::clone_from_slice(&lengths)]);

        let digest = self.ghash.finalize();
        let mut tag = [0u8; TAG_SIZE];
        for (i, byte) in tag.iter_mut().enumerate() {
            *byte = digest[i] ^ self.tag_mask[i];
        }
        tag
    }
}

/// Read until `buf` is full or the reader is exhausted.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Encrypting stream that processes data in chunks.
pub struct EncryptingStream<'a> {
    key: &'a MasterKey,
    chunk_size: usize,
}

impl<'a> EncryptingStream<'a> {
    /// Create a new encrypting stream.
    pub fn new(key: &'a MasterKey) -> Self {
        Self {
            key,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set custom chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Encrypt data from reader and write to writer.
    ///
    /// # Postconditions
    /// - Writer receives IV || ciphertext || tag
    /// - Returns the number of plaintext bytes consumed
    ///
    /// # Errors
    /// - I/O errors from reader/writer. The writer may then hold a partial
    ///   artifact, which the caller must discard.
    /// - `InvalidInput` once the input outgrows the GCM block counter.
    pub fn encrypt_stream<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> Result<u64> {
        let iv = Iv::generate();
        let mut state = GcmState::new(self.key.as_bytes(), &iv);
        let mut buffer = Zeroizing::new(vec![0u8; self.chunk_size]);
        let mut total_bytes = 0u64;

        writer.write_all(iv.as_bytes())?;

        loop {
            let bytes_read = read_full(&mut reader, &mut buffer)?;
            if bytes_read == 0 {
                break;
            }

            state.encrypt_in_place(&mut buffer[..bytes_read])?;
            writer.write_all(&buffer[..bytes_read])?;
            total_bytes += bytes_read as u64;

            if bytes_read < buffer.len() {
                break;
            }
        }

        writer.write_all(&state.finalize())?;
        writer.flush()?;

        Ok(total_bytes)
    }
}

/// Decrypting stream that verifies the trailing tag.
pub struct DecryptingStream<'a> {
    key: &'a MasterKey,
    chunk_size: usize,
}

impl<'a> DecryptingStream<'a> {
    /// Create a new decrypting stream.
    pub fn new(key: &'a MasterKey) -> Self {
        Self {
            key,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set custom chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Decrypt data from reader and write to writer.
    ///
    /// Plaintext is written as it is produced; the tag is only checked at
    /// the end. On any error the writer's content must not be trusted.
    ///
    /// # Errors
    /// - `CorruptArtifact` if the IV prefix or tag is missing
    /// - `CorruptArtifact` if the tag does not verify (tampering or wrong key)
    /// - I/O errors
    pub fn decrypt_stream<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> Result<u64> {
        let mut iv_bytes = [0u8; IV_LENGTH];
        if read_full(&mut reader, &mut iv_bytes)? != IV_LENGTH {
            return Err(Error::CorruptArtifact("Missing IV prefix".to_string()));
        }
        let iv = Iv::from_bytes(iv_bytes);

        let mut state = GcmState::new(self.key.as_bytes(), &iv);
        let mut buffer = vec![0u8; self.chunk_size];
        // The last TAG_SIZE bytes seen so far may be the tag, so they are
        // held back until the reader is exhausted.
        let mut window = Zeroizing::new(Vec::with_capacity(self.chunk_size + TAG_SIZE));
        let mut total_bytes = 0u64;

        loop {
            let bytes_read = read_full(&mut reader, &mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            window.extend_from_slice(&buffer[..bytes_read]);

            if window.len() > TAG_SIZE {
                let ready = window.len() - TAG_SIZE;
                state.decrypt_in_place(&mut window[..ready])?;
                writer.write_all(&window[..ready])?;
                window.drain(..ready);
                total_bytes += ready as u64;
            }

            if bytes_read < buffer.len() {
                break;
            }
        }

        if window.len() < TAG_SIZE {
            return Err(Error::CorruptArtifact("Missing authentication tag".to_string()));
        }

        let expected = state.finalize();
        if !bool::from(expected.ct_eq(&window[..])) {
            return Err(Error::CorruptArtifact(
                "Authentication tag mismatch".to_string(),
            ));
        }

        writer.flush()?;
        Ok(total_bytes)
    }
}

/// Encrypt `reader` into `writer` under the master key.
pub fn encrypt_stream<R: Read, W: Write>(key: &MasterKey, reader: R, writer: W) -> Result<u64> {
    EncryptingStream::new(key).encrypt_stream(reader, writer)
}

/// Decrypt `reader` into `writer` under the master key.
pub fn decrypt_stream<R: Read, W: Write>(key: &MasterKey, reader: R, writer: W) -> Result<u64> {
    DecryptingStream::new(key).decrypt_stream(reader, writer)
}

/// Encrypt a complete byte slice using streaming encryption.
///
/// This is a convenience function for when the complete data is available.
pub fn encrypt_bytes(key: &MasterKey, data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(IV_LENGTH + data.len() + TAG_SIZE);
    encrypt_stream(key, data, &mut output)?;
    Ok(output)
}

/// Decrypt a complete byte slice that was encrypted with streaming encryption.
pub fn decrypt_bytes(key: &MasterKey, data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len());
    decrypt_stream(key, data, &mut output)?;
    Ok(output)
}
