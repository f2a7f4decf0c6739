//! Vault engine for Lockbox.
//!
//! This module provides:
//! - Persistent preferences holding the wrapped master key envelopes
//! - The session that owns the unlocked master key
//! - Recovery code unlock and password reset
//! - Auto-lock and panic-lock policies
//! - The `Vault` facade over session, catalog and artifact files
//!
//! # Architecture
//! Callers go through [`Vault`]. Only the session ever holds the cleartext
//! master key; everything persisted is either an envelope or ciphertext.

pub mod config;
pub mod lock_policy;
pub mod manager;
pub mod password;
pub mod prefs;
pub mod recovery;
pub mod session;
pub mod worker;

pub use config::VaultConfig;
pub use lock_policy::{ForegroundTracker, LockDecision, LockPolicy, PanicSwitch};
pub use manager::{Credential, NewFile, Note, Vault};
pub use password::{PasswordGenerator, PasswordPolicy};
pub use prefs::{FilePreferences, MemoryPreferences, PreferenceStore, Preferences};
pub use recovery::RecoveryManager;
pub use session::{SessionState, VaultSession};
pub use worker::VaultWorker;
