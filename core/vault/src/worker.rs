//! Async wrappers for slow vault calls.
//!
//! Key derivation and whole-file encryption block for a noticeable time.
//! These wrappers run them on tokio's blocking pool so an async caller's
//! executor threads stay free.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use crate::manager::Vault;
use lockbox_catalog::{CatalogEntry, EntryId, EntryKind};
use lockbox_common::{Error, Result, Secret};

/// Handle that dispatches vault work to blocking threads.
#[derive(Clone)]
pub struct VaultWorker {
    vault: Arc<Vault>,
}

impl VaultWorker {
    pub fn new(vault: Arc<Vault>) -> Self {
        Self { vault }
    }

    pub fn vault(&self) -> &Arc<Vault> {
        &self.vault
    }

    async fn run<T, F>(&self, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Vault) -> Result<T> + Send + 'static,
    {
        let vault = self.vault.clone();
        tokio::task::spawn_blocking(move || task(vault.as_ref()))
            .await
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?
    }

    pub async fn setup_vault(&self, secret: Secret) -> Result<()> {
        self.run(move |vault| vault.setup_vault(secret.as_bytes()))
            .await
    }

    pub async fn unlock(&self, secret: Secret) -> Result<()> {
        self.run(move |vault| vault.unlock(secret.as_bytes())).await
    }

    pub async fn unlock_with_recovery(&self, code: Secret) -> Result<()> {
        self.run(move |vault| vault.unlock_with_recovery(&recovery_text(&code)?))
            .await
    }

    pub async fn change_secret(&self, new_secret: Secret) -> Result<()> {
        self.run(move |vault| vault.change_secret(new_secret.as_bytes()))
            .await
    }

    pub async fn reset_secret_with_recovery(&self, code: Secret, new_secret: Secret) -> Result<()> {
        self.run(move |vault| {
            vault.reset_secret_with_recovery(&recovery_text(&code)?, new_secret.as_bytes())
        })
        .await
    }

    pub async fn import_file_path(&self, kind: EntryKind, path: PathBuf) -> Result<CatalogEntry> {
        self.run(move |vault| vault.import_file_path(kind, &path))
            .await
    }

    pub async fn export_file(&self, id: EntryId, dest: PathBuf) -> Result<u64> {
        self.run(move |vault| vault.export_file(id, &dest)).await
    }
}

fn recovery_text(code: &Secret) -> Result<&str> {
    code.as_str()
        .ok_or_else(|| Error::InvalidInput("Recovery code must be text".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultConfig;
    use lockbox_crypto::generate_recovery_code;
    use tempfile::TempDir;

    fn worker(dir: &TempDir) -> VaultWorker {
        let vault = Vault::open(VaultConfig::new(dir.path().join("vault"))).unwrap();
        VaultWorker::new(Arc::new(vault))
    }

    #[tokio::test]
    async fn test_unlock_off_thread() {
        let dir = TempDir::new().unwrap();
        let worker = worker(&dir);

        worker.setup_vault(Secret::from("pw-1")).await.unwrap();
        worker.vault().lock();

        let err = worker.unlock(Secret::from("pw-2")).await.unwrap_err();
        assert!(err.is_authentication_failure());
        assert!(!worker.vault().is_unlocked());

        worker.unlock(Secret::from("pw-1")).await.unwrap();
        assert!(worker.vault().is_unlocked());
    }

    #[tokio::test]
    async fn test_import_export_off_thread() {
        let dir = TempDir::new().unwrap();
        let worker = worker(&dir);
        worker.setup_vault(Secret::from("pw")).await.unwrap();

        let source = dir.path().join("scan.pdf");
        let data = vec![0x25u8; 12_345];
        std::fs::write(&source, &data).unwrap();

        let entry = worker
            .import_file_path(EntryKind::Document, source.clone())
            .await
            .unwrap();
        assert_eq!(
            worker.vault().display_name(&entry).unwrap().as_deref(),
            Some("scan.pdf")
        );

        let dest = dir.path().join("restored.pdf");
        let written = worker.export_file(entry.id, dest.clone()).await.unwrap();
        assert_eq!(written, data.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_setup_installs_one_key() {
        let dir = TempDir::new().unwrap();
        let worker = worker(&dir);

        let (first, second) = tokio::join!(
            worker.setup_vault(Secret::from("pw-a")),
            worker.setup_vault(Secret::from("pw-b")),
        );
        let winner = match (first, second) {
            (Ok(()), Err(Error::AlreadyExists(_))) => "pw-a",
            (Err(Error::AlreadyExists(_)), Ok(())) => "pw-b",
            other => panic!("expected exactly one setup to succeed, got {other:?}"),
        };

        let note = worker.vault().add_note("n", "kept").unwrap();
        worker.vault().lock();
        worker.unlock(Secret::from(winner)).await.unwrap();
        assert_eq!(worker.vault().read_note(note.id).unwrap().body, "kept");
    }

    #[tokio::test]
    async fn test_recovery_off_thread() {
        let dir = TempDir::new().unwrap();
        let worker = worker(&dir);
        let code = generate_recovery_code();

        worker.setup_vault(Secret::from("pw")).await.unwrap();
        worker
            .vault()
            .enable_recovery(code.as_str().unwrap())
            .unwrap();
        worker.vault().lock();

        worker
            .reset_secret_with_recovery(code.clone(), Secret::from("pw-new"))
            .await
            .unwrap();
        assert!(worker.vault().is_unlocked());

        worker.vault().lock();
        worker.unlock_with_recovery(code).await.unwrap();
        assert!(worker.vault().is_unlocked());
    }
}
