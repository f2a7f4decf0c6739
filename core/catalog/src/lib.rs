//! Catalog of encrypted vault artifacts.
//!
//! One SQLite table per content class (files, notes, credentials). Rows map
//! an opaque artifact identifier to display metadata and a soft-delete flag;
//! sensitive columns hold text already encrypted by the caller.

pub mod entry;
pub mod store;

pub use entry::{CatalogEntry, ContentClass, EntryId, EntryKind, EntryPayload, NewEntry};
pub use store::Catalog;
