//! Persistent key-value preferences.
//!
//! Holds the wrapped master key envelopes and the small amount of vault
//! state that must survive a restart. Nothing stored here is secret on its
//! own: envelopes are only useful together with the password or recovery
//! code they were sealed under.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

use lockbox_common::{Error, Result};
use lockbox_crypto::{EncodedEnvelope, EnvelopeBlob};

/// Preference keys.
pub mod keys {
    pub const AUTH_SALT: &str = "auth_salt";
    pub const MASTER_KEY_BLOB: &str = "master_key_blob";
    pub const MASTER_KEY_IV: &str = "master_key_iv";
    pub const RECOVERY_SALT: &str = "recovery_salt";
    pub const RECOVERY_BLOB: &str = "recovery_blob";
    pub const RECOVERY_IV: &str = "recovery_iv";
    pub const RECOVERY_ENABLED: &str = "recovery_enabled";
    pub const LOCK_TIMEOUT_MS: &str = "lock_timeout_ms";
    pub const FAILED_ATTEMPTS: &str = "failed_attempts";
    pub const IS_SETUP_DONE: &str = "is_setup_done";
}

/// Backend for preferences.
///
/// Implementations must apply `set_many` as a unit: readers never observe
/// half of an envelope.
pub trait PreferenceStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write several values at once.
    fn set_many(&self, entries: Vec<(&str, Value)>) -> Result<()>;

    /// Remove several keys at once; missing keys are ignored.
    fn remove_many(&self, keys: &[&str]) -> Result<()>;

    /// Remove every key.
    fn clear(&self) -> Result<()>;

    /// Write a single value.
    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.set_many(vec![(key, value)])
    }

    /// Remove a single key.
    fn remove(&self, key: &str) -> Result<()> {
        self.remove_many(&[key])
    }
}

fn poisoned() -> Error {
    Error::Storage("Preferences lock poisoned".to_string())
}

/// In-memory preferences.
///
/// Useful for testing. All data is lost on drop.
#[derive(Default)]
pub struct MemoryPreferences {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let values = self.values.read().map_err(|_| poisoned())?;
        Ok(values.get(key).cloned())
    }

    fn set_many(&self, entries: Vec<(&str, Value)>) -> Result<()> {
        let mut values = self.values.write().map_err(|_| poisoned())?;
        for (key, value) in entries {
            values.insert(key.to_string(), value);
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> Result<()> {
        let mut values = self.values.write().map_err(|_| poisoned())?;
        for key in keys {
            values.remove(*key);
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.values.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }
}

/// Preferences persisted as a JSON object.
///
/// Every change rewrites the whole file through a temp file in the same
/// directory followed by a rename, so a crash leaves either the old or the
/// new content.
pub struct FilePreferences {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl FilePreferences {
    /// Open the preferences file, starting empty if it does not exist.
    ///
    /// # Errors
    /// - `Serialization` if the file is not a JSON object
    /// - IO failure
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let values = if path.exists() {
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str(&content) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(Error::Serialization(
                        "Preferences file is not a JSON object".to_string(),
                    ))
                }
                Err(e) => return Err(Error::Serialization(e.to_string())),
            }
        } else {
            Map::new()
        };

        debug!(path = %path.display(), keys = values.len(), "Preferences loaded");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn persist(&self, values: &Map<String, Value>) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let json = serde_json::to_vec_pretty(values)
            .map_err(|e| Error::Serialization(e.to_string()))?;

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(&json)?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Apply `change` to a copy of the map and commit it only once persisted.
    fn update(&self, change: impl FnOnce(&mut Map<String, Value>)) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| poisoned())?;
        let mut next = values.clone();
        change(&mut next);
        self.persist(&next)?;
        *values = next;
        Ok(())
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let values = self.values.lock().map_err(|_| poisoned())?;
        Ok(values.get(key).cloned())
    }

    fn set_many(&self, entries: Vec<(&str, Value)>) -> Result<()> {
        self.update(|values| {
            for (key, value) in entries {
                values.insert(key.to_string(), value);
            }
        })
    }

    fn remove_many(&self, keys: &[&str]) -> Result<()> {
        self.update(|values| {
            for key in keys {
                values.remove(*key);
            }
        })
    }

    fn clear(&self) -> Result<()> {
        self.update(|values| values.clear())
    }
}

/// Typed view over a [`PreferenceStore`].
#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn PreferenceStore>,
    counter: Arc<Mutex<()>>,
}

impl Preferences {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self {
            store,
            counter: Arc::new(Mutex::new(())),
        }
    }

    /// Preferences over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPreferences::new()))
    }

    fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.store.get(key)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(Error::InvalidInput(format!(
                "Preference {} is not a string",
                key
            ))),
        }
    }

    fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.store.get(key)? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_u64().map(Some).ok_or_else(|| {
                Error::InvalidInput(format!("Preference {} is not an unsigned integer", key))
            }),
        }
    }

    fn get_bool(&self, key: &str) -> Result<bool> {
        match self.store.get(key)? {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(b),
            Some(_) => Err(Error::InvalidInput(format!(
                "Preference {} is not a boolean",
                key
            ))),
        }
    }

    fn load_envelope(&self, salt: &str, blob: &str, iv: &str) -> Result<Option<EnvelopeBlob>> {
        let parts = (
            self.get_string(salt)?,
            self.get_string(blob)?,
            self.get_string(iv)?,
        );

        match parts {
            (None, None, None) => Ok(None),
            (Some(salt), Some(blob), Some(iv)) => {
                EnvelopeBlob::decode(&EncodedEnvelope { salt, blob, iv }).map(Some)
            }
            _ => Err(Error::InvalidInput(
                "Malformed envelope: incomplete salt/blob/iv".to_string(),
            )),
        }
    }

    /// The password envelope, if the vault has been set up.
    pub fn primary_envelope(&self) -> Result<Option<EnvelopeBlob>> {
        self.load_envelope(keys::AUTH_SALT, keys::MASTER_KEY_BLOB, keys::MASTER_KEY_IV)
    }

    /// Replace the password envelope.
    pub fn set_primary_envelope(&self, envelope: &EnvelopeBlob) -> Result<()> {
        let encoded = envelope.encode();
        self.store.set_many(vec![
            (keys::AUTH_SALT, Value::String(encoded.salt)),
            (keys::MASTER_KEY_BLOB, Value::String(encoded.blob)),
            (keys::MASTER_KEY_IV, Value::String(encoded.iv)),
        ])
    }

    /// The recovery envelope, if one was ever stored.
    pub fn recovery_envelope(&self) -> Result<Option<EnvelopeBlob>> {
        self.load_envelope(keys::RECOVERY_SALT, keys::RECOVERY_BLOB, keys::RECOVERY_IV)
    }

    /// Store the recovery envelope and mark recovery as enabled.
    pub fn set_recovery_envelope(&self, envelope: &EnvelopeBlob) -> Result<()> {
        let encoded = envelope.encode();
        self.store.set_many(vec![
            (keys::RECOVERY_SALT, Value::String(encoded.salt)),
            (keys::RECOVERY_BLOB, Value::String(encoded.blob)),
            (keys::RECOVERY_IV, Value::String(encoded.iv)),
            (keys::RECOVERY_ENABLED, Value::Bool(true)),
        ])
    }

    /// Drop the recovery envelope.
    pub fn remove_recovery_envelope(&self) -> Result<()> {
        self.store.remove_many(&[
            keys::RECOVERY_SALT,
            keys::RECOVERY_BLOB,
            keys::RECOVERY_IV,
            keys::RECOVERY_ENABLED,
        ])
    }

    pub fn recovery_enabled(&self) -> Result<bool> {
        self.get_bool(keys::RECOVERY_ENABLED)
    }

    /// Auto-lock timeout; 0 (the default) locks on any backgrounding.
    pub fn lock_timeout_ms(&self) -> Result<u64> {
        Ok(self.get_u64(keys::LOCK_TIMEOUT_MS)?.unwrap_or(0))
    }

    pub fn set_lock_timeout_ms(&self, timeout_ms: u64) -> Result<()> {
        self.store.set(keys::LOCK_TIMEOUT_MS, Value::from(timeout_ms))
    }

    pub fn failed_attempts(&self) -> Result<u32> {
        let count = self.get_u64(keys::FAILED_ATTEMPTS)?.unwrap_or(0);
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Bump the failed unlock counter and return the new value.
    pub fn increment_failed_attempts(&self) -> Result<u32> {
        let _guard = self.counter.lock().map_err(|_| poisoned())?;
        let next = self.failed_attempts()?.saturating_add(1);
        self.store.set(keys::FAILED_ATTEMPTS, Value::from(next))?;
        Ok(next)
    }

    pub fn reset_failed_attempts(&self) -> Result<()> {
        let _guard = self.counter.lock().map_err(|_| poisoned())?;
        self.store.set(keys::FAILED_ATTEMPTS, Value::from(0u32))
    }

    pub fn is_setup_done(&self) -> Result<bool> {
        self.get_bool(keys::IS_SETUP_DONE)
    }

    pub fn set_setup_done(&self, done: bool) -> Result<()> {
        self.store.set(keys::IS_SETUP_DONE, Value::Bool(done))
    }

    /// Remove every preference, envelopes included.
    pub fn clear_all(&self) -> Result<()> {
        self.store.clear()
    }
}
