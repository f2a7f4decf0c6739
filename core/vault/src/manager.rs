//! Vault facade.
//!
//! Ties the preferences store, the session, the catalog and the artifact
//! directory together behind the operations an application needs.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::VaultConfig;
use crate::lock_policy::{LockDecision, LockPolicy};
use crate::prefs::{FilePreferences, PreferenceStore, Preferences};
use crate::recovery::RecoveryManager;
use crate::session::VaultSession;
use lockbox_catalog::{Catalog, CatalogEntry, EntryId, EntryKind, EntryPayload, NewEntry};
use lockbox_common::{Error, Result};
use lockbox_crypto::{self as crypto, Envelope, MasterKey};

/// Metadata for a file being imported.
#[derive(Debug, Clone, Default)]
pub struct NewFile {
    pub display_name: Option<String>,
    pub original_location: Option<String>,
    pub mime_type: Option<String>,
}

impl NewFile {
    /// Metadata taken from a source path: file name and full location.
    pub fn from_path(path: &Path) -> Self {
        Self {
            display_name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
            original_location: Some(path.display().to_string()),
            mime_type: None,
        }
    }
}

/// A decrypted note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub title: String,
    pub body: String,
}

/// A decrypted credential entry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub app: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("app", &self.app)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// An opened vault.
///
/// Starts Locked. Content operations require the session to be Unlocked
/// and fail with `SessionRequired` otherwise.
pub struct Vault {
    config: VaultConfig,
    prefs: Preferences,
    catalog: Catalog,
    session: VaultSession,
    /// Serializes envelope rewrites: setup, password change, recovery changes.
    lifecycle: Mutex<()>,
}

impl Vault {
    /// Open (or create) the vault at `config.root`.
    ///
    /// # Errors
    /// - IO failure creating the layout
    /// - Malformed preferences file
    /// - Catalog open failure
    pub fn open(config: VaultConfig) -> Result<Self> {
        config.ensure_layout()?;
        let store = FilePreferences::open(config.prefs_path())?;
        let catalog = Catalog::open(config.catalog_path())?;
        Self::with_store(config, Arc::new(store), catalog)
    }

    /// Open with explicit preference and catalog backends.
    pub fn with_store(
        config: VaultConfig,
        store: Arc<dyn PreferenceStore>,
        catalog: Catalog,
    ) -> Result<Self> {
        config.ensure_layout()?;
        info!(root = %config.root.display(), "Vault opened");

        Ok(Self {
            config,
            prefs: Preferences::new(store),
            catalog,
            session: VaultSession::new(),
            lifecycle: Mutex::new(()),
        })
    }

    fn lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn preferences(&self) -> &Preferences {
        &self.prefs
    }

    pub fn session(&self) -> &VaultSession {
        &self.session
    }

    // --- Key lifecycle ---

    pub fn is_setup_done(&self) -> Result<bool> {
        Ok(self.prefs.is_setup_done()? || self.prefs.primary_envelope()?.is_some())
    }

    /// First-time setup: generate the master key and seal it under `secret`.
    ///
    /// # Postconditions
    /// - The password envelope is stored and setup is marked done
    /// - The session is Unlocked
    ///
    /// # Errors
    /// - `AlreadyExists` if the vault is already set up
    /// - `InvalidInput` if the secret is empty
    pub fn setup_vault(&self, secret: &[u8]) -> Result<()> {
        let _guard = self.lifecycle();
        if self.is_setup_done()? {
            return Err(Error::AlreadyExists("Vault is already set up".to_string()));
        }
        if secret.is_empty() {
            return Err(Error::InvalidInput("Secret cannot be empty".to_string()));
        }

        let master_key = MasterKey::generate();
        let envelope = Envelope::seal(&master_key, secret)?;
        self.prefs.set_primary_envelope(&envelope)?;
        self.prefs.reset_failed_attempts()?;
        self.prefs.set_setup_done(true)?;
        self.session.install(master_key);

        info!("Vault set up");
        Ok(())
    }

    /// Unlock with the password.
    ///
    /// The failed-attempt counter is left to the caller.
    pub fn unlock(&self, secret: &[u8]) -> Result<()> {
        self.session.unlock(&self.prefs, secret)
    }

    /// Unlock with the recovery code.
    pub fn unlock_with_recovery(&self, code: &str) -> Result<()> {
        let master_key = RecoveryManager::unlock_with_recovery(&self.prefs, code)?;
        self.session.install(master_key);
        info!("Vault unlocked with recovery code");
        Ok(())
    }

    /// Replace the password. Requires Unlocked.
    pub fn change_secret(&self, new_secret: &[u8]) -> Result<()> {
        let _guard = self.lifecycle();
        self.session.change_secret(&self.prefs, new_secret)
    }

    /// Replace a forgotten password using the recovery code.
    ///
    /// Leaves the session Unlocked and the failed-attempt counter at zero.
    pub fn reset_secret_with_recovery(&self, code: &str, new_secret: &[u8]) -> Result<()> {
        let _guard = self.lifecycle();
        let master_key =
            RecoveryManager::reset_secret_with_recovery(&self.prefs, code, new_secret)?;
        self.session.install(master_key);
        self.prefs.reset_failed_attempts()?;
        Ok(())
    }

    /// Seal the master key under a recovery code. Requires Unlocked.
    pub fn enable_recovery(&self, code: &str) -> Result<()> {
        let _guard = self.lifecycle();
        let master_key = self.session.master_key()?;
        RecoveryManager::enable_recovery(&self.prefs, &master_key, code)?;
        Ok(())
    }

    /// Remove the recovery envelope. Requires Unlocked.
    pub fn disable_recovery(&self) -> Result<()> {
        let _guard = self.lifecycle();
        self.session.master_key()?;
        RecoveryManager::disable_recovery(&self.prefs)
    }

    pub fn recovery_enabled(&self) -> Result<bool> {
        self.prefs.recovery_enabled()
    }

    pub fn lock(&self) {
        self.session.lock();
    }

    /// Emergency lock.
    pub fn wipe(&self) {
        self.session.wipe();
    }

    pub fn is_unlocked(&self) -> bool {
        self.session.is_unlocked()
    }

    // --- Failed attempts and auto-lock ---

    /// Count a failed unlock and return the new total.
    pub fn record_failed_attempt(&self) -> Result<u32> {
        let count = self.prefs.increment_failed_attempts()?;
        warn!(failed_attempts = count, "Failed unlock attempt recorded");
        Ok(count)
    }

    pub fn failed_attempts(&self) -> Result<u32> {
        self.prefs.failed_attempts()
    }

    pub fn reset_failed_attempts(&self) -> Result<()> {
        self.prefs.reset_failed_attempts()
    }

    pub fn lock_timeout_ms(&self) -> Result<u64> {
        self.prefs.lock_timeout_ms()
    }

    pub fn set_lock_timeout_ms(&self, timeout_ms: u64) -> Result<()> {
        self.prefs.set_lock_timeout_ms(timeout_ms)
    }

    /// Apply the auto-lock rule on return to the foreground, locking if needed.
    pub fn evaluate_foreground(
        &self,
        time_since_backgrounded: Duration,
        is_fresh_launch: bool,
    ) -> Result<LockDecision> {
        let timeout_ms = self.prefs.lock_timeout_ms()?;
        let decision = LockPolicy::evaluate(time_since_backgrounded, timeout_ms, is_fresh_launch);
        if decision == LockDecision::ForceLock {
            self.session.lock();
        }
        Ok(decision)
    }

    // --- Files ---

    fn encrypt_optional(&self, key: &MasterKey, value: Option<&str>) -> Result<Option<String>> {
        value.map(|v| crypto::encrypt_text(key, v)).transpose()
    }

    fn decrypt_optional(&self, value: Option<&str>) -> Result<Option<String>> {
        let key = self.session.master_key()?;
        value.map(|v| crypto::decrypt_text(&key, v)).transpose()
    }

    /// Encrypt `reader` into a new artifact and catalog it.
    ///
    /// The ciphertext is staged in `tmp/` and renamed into `artifacts/`; if
    /// the catalog insert fails the artifact is removed again.
    ///
    /// # Errors
    /// - `SessionRequired` if Locked
    /// - `InvalidInput` if `kind` is not a file kind
    /// - IO failure reading the source or writing the artifact
    pub fn import_file<R: Read>(
        &self,
        kind: EntryKind,
        reader: R,
        file: NewFile,
    ) -> Result<CatalogEntry> {
        if !kind.has_artifact() {
            return Err(Error::InvalidInput(format!(
                "{} entries are not backed by files",
                kind
            )));
        }
        let key = self.session.master_key()?;

        let mut entry = NewEntry::new(
            kind,
            EntryPayload::File {
                mime_type: file.mime_type,
            },
        );
        entry.display_name = self.encrypt_optional(&key, file.display_name.as_deref())?;
        entry.original_location =
            self.encrypt_optional(&key, file.original_location.as_deref())?;

        let mut staged = NamedTempFile::new_in(self.config.tmp_dir())?;
        let written = {
            let mut writer = BufWriter::new(staged.as_file_mut());
            let written = crypto::encrypt_stream(&key, reader, &mut writer)?;
            writer.flush()?;
            written
        };
        staged.as_file().sync_all()?;

        let artifact = self.config.artifact_path(&entry.system_name);
        staged
            .persist_noclobber(&artifact)
            .map_err(|e| Error::Io(e.error))?;

        match self.catalog.insert(&entry) {
            Ok(inserted) => {
                info!(
                    kind = %kind,
                    system_name = %inserted.system_name,
                    bytes = written,
                    "File imported"
                );
                Ok(inserted)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&artifact) {
                    warn!(error = %cleanup, "Failed to remove orphaned artifact");
                }
                Err(e)
            }
        }
    }

    /// Import a file from disk, named after its file name.
    pub fn import_file_path(&self, kind: EntryKind, path: &Path) -> Result<CatalogEntry> {
        let source = File::open(path)?;
        self.import_file(kind, BufReader::new(source), NewFile::from_path(path))
    }

    fn file_entry(&self, id: EntryId) -> Result<CatalogEntry> {
        let entry = self.catalog.get(id)?;
        if !entry.kind.has_artifact() {
            return Err(Error::InvalidInput(format!(
                "Entry {} is not a file",
                id
            )));
        }
        Ok(entry)
    }

    /// Decrypt an artifact into `writer`.
    ///
    /// On `CorruptArtifact` the writer may hold unverified bytes; use
    /// [`export_file`](Self::export_file) to write to disk safely.
    pub fn decrypt_file_to<W: Write>(&self, id: EntryId, writer: W) -> Result<u64> {
        let key = self.session.master_key()?;
        let entry = self.file_entry(id)?;

        let artifact = self.config.artifact_path(&entry.system_name);
        let source = match File::open(&artifact) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("Artifact for entry {}", id)))
            }
            Err(e) => return Err(e.into()),
        };

        let written = crypto::decrypt_stream(&key, BufReader::new(source), writer)?;
        debug!(id = %id, bytes = written, "Artifact decrypted");
        Ok(written)
    }

    /// Decrypt an artifact to `dest`.
    ///
    /// Plaintext goes to a temp file next to `dest` which replaces `dest`
    /// only after the tag verified; on failure nothing is left behind.
    ///
    /// # Errors
    /// - `InvalidInput` if `dest` is inside the vault
    /// - `CorruptArtifact` if the artifact fails authentication
    pub fn export_file(&self, id: EntryId, dest: &Path) -> Result<u64> {
        if self.config.contains(dest) {
            return Err(Error::InvalidInput(
                "Cannot export into the vault directory".to_string(),
            ));
        }
        let dir = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut staged = NamedTempFile::new_in(dir)?;
        let written = {
            let mut writer = BufWriter::new(staged.as_file_mut());
            let written = self.decrypt_file_to(id, &mut writer)?;
            writer.flush()?;
            written
        };

        staged.persist(dest).map_err(|e| Error::Io(e.error))?;
        info!(id = %id, bytes = written, "File exported");
        Ok(written)
    }

    // --- Notes ---

    pub fn add_note(&self, title: &str, body: &str) -> Result<CatalogEntry> {
        let key = self.session.master_key()?;
        let entry = NewEntry::new(
            EntryKind::Note,
            EntryPayload::Note {
                content: crypto::encrypt_text(&key, body)?,
            },
        )
        .with_display_name(crypto::encrypt_text(&key, title)?);

        let inserted = self.catalog.insert(&entry)?;
        debug!(id = %inserted.id, "Note added");
        Ok(inserted)
    }

    pub fn read_note(&self, id: EntryId) -> Result<Note> {
        let key = self.session.master_key()?;
        let entry = self.catalog.get(id)?;

        match &entry.payload {
            EntryPayload::Note { content } => Ok(Note {
                title: self
                    .decrypt_optional(entry.display_name.as_deref())?
                    .unwrap_or_default(),
                body: crypto::decrypt_text(&key, content)?,
            }),
            _ => Err(Error::InvalidInput(format!("Entry {} is not a note", id))),
        }
    }

    pub fn update_note(&self, id: EntryId, title: &str, body: &str) -> Result<CatalogEntry> {
        let key = self.session.master_key()?;
        self.catalog.update_payload(
            id,
            Some(crypto::encrypt_text(&key, title)?),
            EntryPayload::Note {
                content: crypto::encrypt_text(&key, body)?,
            },
        )
    }

    // --- Credentials ---

    pub fn add_credential(
        &self,
        app: &str,
        username: &str,
        password: &str,
    ) -> Result<CatalogEntry> {
        let key = self.session.master_key()?;
        let entry = NewEntry::new(
            EntryKind::Credential,
            EntryPayload::Credential {
                username: crypto::encrypt_text(&key, username)?,
                password: crypto::encrypt_text(&key, password)?,
            },
        )
        .with_display_name(crypto::encrypt_text(&key, app)?);

        let inserted = self.catalog.insert(&entry)?;
        debug!(id = %inserted.id, "Credential added");
        Ok(inserted)
    }

    pub fn read_credential(&self, id: EntryId) -> Result<Credential> {
        let key = self.session.master_key()?;
        let entry = self.catalog.get(id)?;

        match &entry.payload {
            EntryPayload::Credential { username, password } => Ok(Credential {
                app: self
                    .decrypt_optional(entry.display_name.as_deref())?
                    .unwrap_or_default(),
                username: crypto::decrypt_text(&key, username)?,
                password: crypto::decrypt_text(&key, password)?,
            }),
            _ => Err(Error::InvalidInput(format!(
                "Entry {} is not a credential",
                id
            ))),
        }
    }

    pub fn update_credential(
        &self,
        id: EntryId,
        app: &str,
        username: &str,
        password: &str,
    ) -> Result<CatalogEntry> {
        let key = self.session.master_key()?;
        self.catalog.update_payload(
            id,
            Some(crypto::encrypt_text(&key, app)?),
            EntryPayload::Credential {
                username: crypto::encrypt_text(&key, username)?,
                password: crypto::encrypt_text(&key, password)?,
            },
        )
    }

    // --- Listing and trash ---

    pub fn entry(&self, id: EntryId) -> Result<CatalogEntry> {
        self.session.master_key()?;
        self.catalog.get(id)
    }

    /// Entries of `kind` not in the trash, newest first.
    pub fn list_active(&self, kind: EntryKind) -> Result<Vec<CatalogEntry>> {
        self.session.master_key()?;
        self.catalog.query_active(kind)
    }

    /// Trashed entries of every kind, newest first.
    pub fn list_trash(&self) -> Result<Vec<CatalogEntry>> {
        self.session.master_key()?;
        self.catalog.query_trashed()
    }

    pub fn move_to_trash(&self, id: EntryId) -> Result<()> {
        self.session.master_key()?;
        self.catalog.set_deleted(id, true)
    }

    pub fn restore(&self, id: EntryId) -> Result<()> {
        self.session.master_key()?;
        self.catalog.set_deleted(id, false)
    }

    /// Remove an entry and its artifact for good.
    pub fn delete_permanently(&self, id: EntryId) -> Result<()> {
        self.session.master_key()?;
        let entry = self.catalog.hard_delete(id)?;

        if entry.kind.has_artifact() {
            match fs::remove_file(self.config.artifact_path(&entry.system_name)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(id = %id, "Artifact already missing");
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(id = %id, kind = %entry.kind, "Entry deleted permanently");
        Ok(())
    }

    /// Permanently delete everything in the trash. Returns the number removed.
    pub fn empty_trash(&self) -> Result<usize> {
        let trashed = self.list_trash()?;
        for entry in &trashed {
            self.delete_permanently(entry.id)?;
        }
        Ok(trashed.len())
    }

    /// Decrypted display name (note title, credential app, file name).
    pub fn display_name(&self, entry: &CatalogEntry) -> Result<Option<String>> {
        self.decrypt_optional(entry.display_name.as_deref())
    }

    /// Decrypted source location of an imported file.
    pub fn original_location(&self, entry: &CatalogEntry) -> Result<Option<String>> {
        self.decrypt_optional(entry.original_location.as_deref())
    }

    /// Destroy everything: session, catalog, artifacts and preferences.
    ///
    /// The vault is left as if never set up.
    pub fn erase_all(&self) -> Result<()> {
        let _guard = self.lifecycle();
        warn!("Erasing all vault data");
        self.session.wipe();
        self.catalog.clear()?;

        for dir in [self.config.artifacts_dir(), self.config.tmp_dir()] {
            remove_dir_contents(&dir)?;
        }

        self.prefs.clear_all()?;
        Ok(())
    }
}

fn remove_dir_contents(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for item in fs::read_dir(dir)? {
        let path = item?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
