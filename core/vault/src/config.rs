//! Vault configuration and on-disk layout.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use lockbox_common::{ArtifactId, Error, Result};

/// Preferences file name in vault root.
pub const PREFS_FILENAME: &str = "prefs.json";

/// Catalog database file name in vault root.
pub const CATALOG_FILENAME: &str = "catalog.db";

/// Encrypted artifact directory name in vault root.
pub const ARTIFACTS_DIRNAME: &str = "artifacts";

/// Staging directory for artifact writes.
pub const TMP_DIRNAME: &str = "tmp";

/// Where a vault lives.
///
/// Everything else is derived from `root`; artifacts are staged in `tmp/`
/// and renamed into `artifacts/`, so both must share a filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Vault root directory.
    pub root: PathBuf,
}

impl VaultConfig {
    /// Create a configuration rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn prefs_path(&self) -> PathBuf {
        self.root.join(PREFS_FILENAME)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.root.join(CATALOG_FILENAME)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join(ARTIFACTS_DIRNAME)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP_DIRNAME)
    }

    /// Path of the encrypted artifact for `system_name`.
    pub fn artifact_path(&self, system_name: &ArtifactId) -> PathBuf {
        self.artifacts_dir().join(system_name.as_str())
    }

    /// Create the directory layout if it does not exist yet.
    ///
    /// # Errors
    /// - `InvalidInput` if the root exists and is not a directory
    /// - IO failure
    pub fn ensure_layout(&self) -> Result<()> {
        if self.root.exists() && !self.root.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Vault root is not a directory: {}",
                self.root.display()
            )));
        }

        fs::create_dir_all(self.artifacts_dir())?;
        fs::create_dir_all(self.tmp_dir())?;
        Ok(())
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Whether `path` lies inside the vault root.
    ///
    /// Both sides are resolved through the filesystem first, so `..`
    /// components, symlinks and relative roots cannot slip past. `path`
    /// itself need not exist yet.
    pub fn contains(&self, path: &Path) -> bool {
        if path.starts_with(&self.root) {
            return true;
        }
        let root = fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());
        resolve(path).starts_with(root)
    }
}

fn resolve(path: &Path) -> PathBuf {
    if let Ok(resolved) = fs::canonicalize(path) {
        return resolved;
    }
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return path.to_path_buf();
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    fs::canonicalize(parent)
        .map(|parent| parent.join(name))
        .unwrap_or_else(|_| path.to_path_buf())
}
