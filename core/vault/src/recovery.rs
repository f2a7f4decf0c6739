//! Recovery code envelope.
//!
//! The recovery envelope wraps the same master key as the password
//! envelope, under a key derived from the recovery code. Either one can
//! unlock the vault; the recovery code can also reset a forgotten password.

use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::prefs::Preferences;
use lockbox_common::{Error, Result};
use lockbox_crypto::{normalize_recovery_code, Envelope, EnvelopeBlob, MasterKey};

/// Operations on the recovery envelope.
pub struct RecoveryManager;

impl RecoveryManager {
    /// Seal `master_key` under `code` and store it as the recovery envelope.
    ///
    /// Replaces any previous recovery envelope.
    ///
    /// # Errors
    /// - `InvalidInput` if the code is blank
    pub fn enable_recovery(
        prefs: &Preferences,
        master_key: &MasterKey,
        code: &str,
    ) -> Result<EnvelopeBlob> {
        let code = Zeroizing::new(normalize_recovery_code(code));
        let envelope = Envelope::seal(master_key, code.as_bytes())?;
        prefs.set_recovery_envelope(&envelope)?;

        info!("Recovery enabled");
        Ok(envelope)
    }

    /// Unwrap the master key with the recovery code.
    ///
    /// # Errors
    /// - `RecoveryUnavailable` if recovery was never enabled
    /// - `AuthenticationFailure` if the code is wrong
    pub fn unlock_with_recovery(prefs: &Preferences, code: &str) -> Result<MasterKey> {
        if !prefs.recovery_enabled()? {
            return Err(Error::RecoveryUnavailable);
        }
        let envelope = prefs
            .recovery_envelope()?
            .ok_or(Error::RecoveryUnavailable)?;

        let code = Zeroizing::new(normalize_recovery_code(code));
        Envelope::open(&envelope, code.as_bytes()).map_err(|e| {
            warn!("Recovery code rejected");
            e
        })
    }

    /// Replace the password envelope using the recovery code.
    ///
    /// The old password is not needed. Content encrypted before the reset
    /// stays readable since the master key does not change.
    ///
    /// # Errors
    /// - `InvalidInput` if the new secret is empty
    /// - same as [`unlock_with_recovery`](Self::unlock_with_recovery)
    pub fn reset_secret_with_recovery(
        prefs: &Preferences,
        code: &str,
        new_secret: &[u8],
    ) -> Result<MasterKey> {
        if new_secret.is_empty() {
            return Err(Error::InvalidInput("Secret cannot be empty".to_string()));
        }

        let master_key = Self::unlock_with_recovery(prefs, code)?;
        let envelope = Envelope::seal(&master_key, new_secret)?;
        prefs.set_primary_envelope(&envelope)?;

        info!("Password reset with recovery code");
        Ok(master_key)
    }

    /// Remove the recovery envelope.
    pub fn disable_recovery(prefs: &Preferences) -> Result<()> {
        prefs.remove_recovery_envelope()?;
        info!("Recovery disabled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODE: &str = "AB12CD34-EF56GH78-JK90LM12-NP34QR56";

    fn vault_prefs() -> (Preferences, MasterKey) {
        let prefs = Preferences::in_memory();
        let key = MasterKey::generate();
        prefs
            .set_primary_envelope(&Envelope::seal(&key, b"password").unwrap())
            .unwrap();
        (prefs, key)
    }

    #[test]
    fn test_recovery_unlocks_same_key() {
        let (prefs, key) = vault_prefs();
        RecoveryManager::enable_recovery(&prefs, &key, CODE).unwrap();

        let recovered = RecoveryManager::unlock_with_recovery(&prefs, CODE).unwrap();
        assert_eq!(recovered, key);
    }

    #[test]
    fn test_code_is_normalized() {
        let (prefs, key) = vault_prefs();
        RecoveryManager::enable_recovery(&prefs, &key, CODE).unwrap();

        let typed = format!("  {}\n", CODE.to_lowercase());
        let recovered = RecoveryManager::unlock_with_recovery(&prefs, &typed).unwrap();
        assert_eq!(recovered, key);
    }

    #[test]
    fn test_recovery_unavailable() {
        let (prefs, key) = vault_prefs();
        assert!(matches!(
            RecoveryManager::unlock_with_recovery(&prefs, CODE),
            Err(Error::RecoveryUnavailable)
        ));

        RecoveryManager::enable_recovery(&prefs, &key, CODE).unwrap();
        RecoveryManager::disable_recovery(&prefs).unwrap();
        assert!(matches!(
            RecoveryManager::unlock_with_recovery(&prefs, CODE),
            Err(Error::RecoveryUnavailable)
        ));
    }

    #[test]
    fn test_wrong_code() {
        let (prefs, key) = vault_prefs();
        RecoveryManager::enable_recovery(&prefs, &key, CODE).unwrap();

        assert!(matches!(
            RecoveryManager::unlock_with_recovery(&prefs, "WRONG-CODE"),
            Err(Error::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_reset_replaces_primary_only() {
        let (prefs, key) = vault_prefs();
        RecoveryManager::enable_recovery(&prefs, &key, CODE).unwrap();
        let recovery_before = prefs.recovery_envelope().unwrap();

        let recovered =
            RecoveryManager::reset_secret_with_recovery(&prefs, CODE, b"new-password").unwrap();
        assert_eq!(recovered, key);

        let primary = prefs.primary_envelope().unwrap().unwrap();
        assert!(Envelope::open(&primary, b"password").is_err());
        assert_eq!(Envelope::open(&primary, b"new-password").unwrap(), key);
        assert_eq!(prefs.recovery_envelope().unwrap(), recovery_before);
    }

    #[test]
    fn test_reset_rejects_empty_secret() {
        let (prefs, key) = vault_prefs();
        RecoveryManager::enable_recovery(&prefs, &key, CODE).unwrap();

        assert!(matches!(
            RecoveryManager::reset_secret_with_recovery(&prefs, CODE, b""),
            Err(Error::InvalidInput(_))
        ));
    }
}
