//! Vault session management.
//!
//! The session is the only holder of the cleartext master key. It starts
//! Locked, so a restarted process is always Locked until a secret is
//! presented again. Keys are zeroized once the session and every in-flight
//! operation have released them.

use std::fmt;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::prefs::Preferences;
use lockbox_common::{Error, Result};
use lockbox_crypto::{self as crypto, Envelope, MasterKey};

/// State of the vault session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No key in memory.
    Locked,
    /// Master key is cached and content operations are allowed.
    Unlocked,
}

/// Holder of the unlocked master key.
///
/// All transitions take the same lock, so concurrent unlock/lock/wipe calls
/// are serialized. Content operations take an `Arc` snapshot of the key at
/// their start; locking mid-operation does not abort them but the key is
/// dropped as soon as they finish.
pub struct VaultSession {
    key: Mutex<Option<Arc<MasterKey>>>,
}

impl VaultSession {
    /// Create a Locked session.
    pub fn new() -> Self {
        Self {
            key: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<MasterKey>>> {
        // A poisoned slot still holds a valid Option; locking must always work.
        self.key.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unlock with the password envelope.
    ///
    /// # Errors
    /// - `InvalidInput` if the secret is empty or the stored envelope is malformed
    /// - `NotSetUp` if no envelope has been stored yet
    /// - `AuthenticationFailure` if the secret is wrong; the session and the
    ///   stored envelope are left untouched
    pub fn unlock(&self, prefs: &Preferences, secret: &[u8]) -> Result<()> {
        if secret.is_empty() {
            return Err(Error::InvalidInput("Secret cannot be empty".to_string()));
        }

        let envelope = prefs.primary_envelope()?.ok_or(Error::NotSetUp)?;

        match Envelope::open(&envelope, secret) {
            Ok(master_key) => {
                self.install(master_key);
                info!("Vault unlocked");
                Ok(())
            }
            Err(e) => {
                warn!("Unlock rejected");
                Err(e)
            }
        }
    }

    /// Cache an already unwrapped master key.
    pub fn install(&self, master_key: MasterKey) {
        *self.slot() = Some(Arc::new(master_key));
    }

    /// Drop the cached key. Idempotent.
    pub fn lock(&self) {
        if self.slot().take().is_some() {
            info!("Vault locked");
        }
    }

    /// Emergency lock. Same effect as [`lock`](Self::lock).
    pub fn wipe(&self) {
        if self.slot().take().is_some() {
            warn!("Vault session wiped");
        }
    }

    /// Reseal the cached master key under a new secret.
    ///
    /// Encrypted content is unaffected; only the password envelope changes.
    ///
    /// # Errors
    /// - `SessionRequired` if Locked
    /// - `InvalidInput` if the new secret is empty
    pub fn change_secret(&self, prefs: &Preferences, new_secret: &[u8]) -> Result<()> {
        let master_key = self.master_key()?;
        let envelope = Envelope::seal(&master_key, new_secret)?;
        prefs.set_primary_envelope(&envelope)?;

        info!("Vault password changed");
        Ok(())
    }

    /// Snapshot of the master key.
    ///
    /// # Errors
    /// - `SessionRequired` if Locked
    pub fn master_key(&self) -> Result<Arc<MasterKey>> {
        self.slot().clone().ok_or(Error::SessionRequired)
    }

    pub fn is_unlocked(&self) -> bool {
        self.slot().is_some()
    }

    pub fn state(&self) -> SessionState {
        if self.is_unlocked() {
            SessionState::Unlocked
        } else {
            SessionState::Locked
        }
    }

    /// Encrypt `reader` into `writer` with the session key.
    pub fn encrypt_stream<R: Read, W: Write>(&self, reader: R, writer: W) -> Result<u64> {
        let key = self.master_key()?;
        let written = crypto::encrypt_stream(&key, reader, writer)?;
        debug!(bytes = written, "Stream encrypted");
        Ok(written)
    }

    /// Decrypt `reader` into `writer` with the session key.
    ///
    /// On `CorruptArtifact` the writer may already hold unverified bytes and
    /// must be discarded.
    pub fn decrypt_stream<R: Read, W: Write>(&self, reader: R, writer: W) -> Result<u64> {
        let key = self.master_key()?;
        let written = crypto::decrypt_stream(&key, reader, writer)?;
        debug!(bytes = written, "Stream decrypted");
        Ok(written)
    }

    pub fn encrypt_text(&self, plaintext: &str) -> Result<String> {
        let key = self.master_key()?;
        crypto::encrypt_text(&key, plaintext)
    }

    pub fn decrypt_text(&self, encoded: &str) -> Result<String> {
        let key = self.master_key()?;
        crypto::decrypt_text(&key, encoded)
    }
}

impl Default for VaultSession {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSession")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_up(password: &[u8]) -> (Preferences, MasterKey) {
        let prefs = Preferences::in_memory();
        let key = MasterKey::generate();
        prefs
            .set_primary_envelope(&Envelope::seal(&key, password).unwrap())
            .unwrap();
        (prefs, key)
    }

    #[test]
    fn test_new_session_is_locked() {
        let session = VaultSession::new();

        assert_eq!(session.state(), SessionState::Locked);
        assert!(matches!(session.master_key(), Err(Error::SessionRequired)));
        assert!(matches!(
            session.encrypt_text("x"),
            Err(Error::SessionRequired)
        ));
    }

    #[test]
    fn test_unlock_and_lock() {
        let (prefs, key) = set_up(b"test-password");
        let session = VaultSession::new();

        session.unlock(&prefs, b"test-password").unwrap();
        assert!(session.is_unlocked());
        assert_eq!(*session.master_key().unwrap(), key);

        session.lock();
        session.lock();
        assert_eq!(session.state(), SessionState::Locked);
        assert!(session.master_key().is_err());
    }

    #[test]
    fn test_wrong_password_leaves_state() {
        let (prefs, _) = set_up(b"correct");
        let before = prefs.primary_envelope().unwrap();
        let session = VaultSession::new();

        let result = session.unlock(&prefs, b"wrong");
        assert!(matches!(result, Err(Error::AuthenticationFailure)));
        assert!(!session.is_unlocked());
        assert_eq!(prefs.primary_envelope().unwrap(), before);
    }

    #[test]
    fn test_unlock_requires_setup() {
        let session = VaultSession::new();
        let result = session.unlock(&Preferences::in_memory(), b"pw");
        assert!(matches!(result, Err(Error::NotSetUp)));
    }

    #[test]
    fn test_empty_secret_rejected() {
        let (prefs, _) = set_up(b"pw");
        let session = VaultSession::new();
        assert!(matches!(
            session.unlock(&prefs, b""),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_change_secret() {
        let (prefs, key) = set_up(b"old-password");
        let session = VaultSession::new();

        assert!(matches!(
            session.change_secret(&prefs, b"new-password"),
            Err(Error::SessionRequired)
        ));

        session.unlock(&prefs, b"old-password").unwrap();
        session.change_secret(&prefs, b"new-password").unwrap();
        session.lock();

        assert!(session.unlock(&prefs, b"old-password").is_err());
        session.unlock(&prefs, b"new-password").unwrap();
        assert_eq!(*session.master_key().unwrap(), key);
    }

    #[test]
    fn test_snapshot_survives_lock() {
        let (prefs, _) = set_up(b"pw");
        let session = VaultSession::new();
        session.unlock(&prefs, b"pw").unwrap();

        let snapshot = session.master_key().unwrap();
        session.wipe();

        assert!(!session.is_unlocked());
        let sealed = crypto::encrypt_text(&snapshot, "in flight").unwrap();
        assert_eq!(crypto::decrypt_text(&snapshot, &sealed).unwrap(), "in flight");
    }

    #[test]
    fn test_stream_helpers() {
        let (prefs, _) = set_up(b"pw");
        let session = VaultSession::new();
        session.unlock(&prefs, b"pw").unwrap();

        let data = vec![7u8; 10_000];
        let mut sealed = Vec::new();
        session.encrypt_stream(&data[..], &mut sealed).unwrap();

        let mut opened = Vec::new();
        session.decrypt_stream(&sealed[..], &mut opened).unwrap();
        assert_eq!(opened, data);
    }

    #[test]
    fn test_debug_is_redacted() {
        let (prefs, _) = set_up(b"pw");
        let session = VaultSession::new();
        session.unlock(&prefs, b"pw").unwrap();

        let debug = format!("{:?}", session);
        assert_eq!(debug, "VaultSession { state: Unlocked }");
    }
}
