//! SQLite-backed catalog store.

use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::entry::{CatalogEntry, ContentClass, EntryId, EntryKind, EntryPayload, NewEntry};
use lockbox_common::{ArtifactId, Error, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    system_name TEXT UNIQUE NOT NULL,
    display_name TEXT,
    original_path TEXT,
    mime_type TEXT,
    timestamp INTEGER NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS notes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    system_name TEXT UNIQUE NOT NULL,
    display_name TEXT,
    original_path TEXT,
    content TEXT,
    timestamp INTEGER NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS credentials (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    system_name TEXT UNIQUE NOT NULL,
    display_name TEXT,
    original_path TEXT,
    username TEXT,
    password TEXT,
    timestamp INTEGER NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_files_active ON files(type, is_deleted, timestamp);
CREATE INDEX IF NOT EXISTS idx_notes_active ON notes(is_deleted, timestamp);
CREATE INDEX IF NOT EXISTS idx_credentials_active ON credentials(is_deleted, timestamp);
"#;

/// Select list shared by every query; the last two columns are class-specific.
fn select_columns(class: ContentClass) -> &'static str {
    match class {
        ContentClass::Files => {
            "id, type, system_name, display_name, original_path, timestamp, is_deleted, mime_type, NULL"
        }
        ContentClass::Notes => {
            "id, type, system_name, display_name, original_path, timestamp, is_deleted, content, NULL"
        }
        ContentClass::Credentials => {
            "id, type, system_name, display_name, original_path, timestamp, is_deleted, username, password"
        }
    }
}

fn conversion_error(index: usize, err: Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

fn map_row(class: ContentClass, row: &Row<'_>) -> rusqlite::Result<CatalogEntry> {
    let kind: String = row.get(1)?;
    let kind = kind
        .parse::<EntryKind>()
        .map_err(|e| conversion_error(1, e))?;
    let system_name: String = row.get(2)?;
    let system_name = ArtifactId::parse(system_name).map_err(|e| conversion_error(2, e))?;

    let payload = match class {
        ContentClass::Files => EntryPayload::File {
            mime_type: row.get(7)?,
        },
        ContentClass::Notes => EntryPayload::Note {
            content: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        },
        ContentClass::Credentials => EntryPayload::Credential {
            username: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            password: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        },
    };

    Ok(CatalogEntry {
        id: EntryId::new(class, row.get(0)?),
        kind,
        system_name,
        display_name: row.get(3)?,
        original_location: row.get(4)?,
        timestamp: row.get(5)?,
        is_deleted: row.get::<_, i32>(6)? != 0,
        payload,
    })
}

fn fetch(conn: &Connection, id: EntryId) -> Result<CatalogEntry> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ?1",
        select_columns(id.class),
        id.class.table()
    );

    conn.query_row(&sql, [id.row], |row| map_row(id.class, row))
        .optional()
        .map_err(storage_error)?
        .ok_or_else(|| Error::NotFound(format!("Catalog entry {}", id)))
}

fn storage_error(err: rusqlite::Error) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            Error::AlreadyExists("Catalog entry with this system name".to_string())
        }
        _ => Error::Storage(err.to_string()),
    }
}

/// Catalog manager using SQLite.
///
/// The connection sits behind a mutex so one catalog can be shared across
/// worker threads.
pub struct Catalog {
    conn: Mutex<Connection>,
}

impl Catalog {
    /// Create or open a catalog database.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(storage_error)?;
        conn.execute_batch(SCHEMA).map_err(storage_error)?;

        info!("Catalog opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory catalog (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("Catalog connection poisoned".to_string()))
    }

    /// Insert a new row.
    ///
    /// # Errors
    /// - `InvalidInput` if the payload does not match the kind
    /// - `AlreadyExists` if the system name is already used in any table
    pub fn insert(&self, entry: &NewEntry) -> Result<CatalogEntry> {
        entry.validate()?;
        let class = entry.kind.content_class();
        let timestamp = entry
            .timestamp
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(storage_error)?;

        for other in ContentClass::ALL {
            let taken: Option<i64> = tx
                .query_row(
                    &format!("SELECT id FROM {} WHERE system_name = ?1", other.table()),
                    [entry.system_name.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_error)?;
            if taken.is_some() {
                return Err(Error::AlreadyExists(format!(
                    "System name {}",
                    entry.system_name
                )));
            }
        }

        match &entry.payload {
            EntryPayload::File { mime_type } => tx.execute(
                r#"
                INSERT INTO files
                (type, system_name, display_name, original_path, timestamp, mime_type)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    entry.kind.as_str(),
                    entry.system_name.as_str(),
                    entry.display_name,
                    entry.original_location,
                    timestamp,
                    mime_type,
                ],
            ),
            EntryPayload::Note { content } => tx.execute(
                r#"
                INSERT INTO notes
                (type, system_name, display_name, original_path, timestamp, content)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    entry.kind.as_str(),
                    entry.system_name.as_str(),
                    entry.display_name,
                    entry.original_location,
                    timestamp,
                    content,
                ],
            ),
            EntryPayload::Credential { username, password } => tx.execute(
                r#"
                INSERT INTO credentials
                (type, system_name, display_name, original_path, timestamp, username, password)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    entry.kind.as_str(),
                    entry.system_name.as_str(),
                    entry.display_name,
                    entry.original_location,
                    timestamp,
                    username,
                    password,
                ],
            ),
        }
        .map_err(storage_error)?;

        let id = EntryId::new(class, tx.last_insert_rowid());
        tx.commit().map_err(storage_error)?;
        drop(conn);

        debug!(id = %id, kind = %entry.kind, "Catalog entry inserted");
        self.get(id)
    }

    /// Get a row by id.
    pub fn get(&self, id: EntryId) -> Result<CatalogEntry> {
        fetch(&*self.conn()?, id)
    }

    /// Look a row up by its artifact identifier, in any table.
    pub fn find_by_system_name(&self, system_name: &ArtifactId) -> Result<Option<CatalogEntry>> {
        let conn = self.conn()?;
        for class in ContentClass::ALL {
            let sql = format!(
                "SELECT {} FROM {} WHERE system_name = ?1",
                select_columns(class),
                class.table()
            );
            let found = conn
                .query_row(&sql, [system_name.as_str()], |row| map_row(class, row))
                .optional()
                .map_err(storage_error)?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// Active (not trashed) rows of a kind, newest first.
    pub fn query_active(&self, kind: EntryKind) -> Result<Vec<CatalogEntry>> {
        let class = kind.content_class();
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE type = ?1 AND is_deleted = 0 ORDER BY timestamp DESC, id DESC",
            select_columns(class),
            class.table()
        );

        let mut stmt = conn.prepare(&sql).map_err(storage_error)?;
        let rows = stmt
            .query_map([kind.as_str()], |row| map_row(class, row))
            .map_err(storage_error)?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_error)
    }

    /// Trashed rows of every class, newest first.
    pub fn query_trashed(&self) -> Result<Vec<CatalogEntry>> {
        let conn = self.conn()?;
        let mut result = Vec::new();

        for class in ContentClass::ALL {
            let sql = format!(
                "SELECT {} FROM {} WHERE is_deleted = 1",
                select_columns(class),
                class.table()
            );
            let mut stmt = conn.prepare(&sql).map_err(storage_error)?;
            let rows = stmt
                .query_map([], |row| map_row(class, row))
                .map_err(storage_error)?;
            for row in rows {
                result.push(row.map_err(storage_error)?);
            }
        }

        result.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(result)
    }

    /// Set the soft-delete flag.
    pub fn set_deleted(&self, id: EntryId, deleted: bool) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                &format!(
                    "UPDATE {} SET is_deleted = ?1 WHERE id = ?2",
                    id.class.table()
                ),
                params![deleted as i32, id.row],
            )
            .map_err(storage_error)?;

        if changed == 0 {
            return Err(Error::NotFound(format!("Catalog entry {}", id)));
        }
        debug!(id = %id, deleted, "Soft-delete flag updated");
        Ok(())
    }

    /// Flip the soft-delete flag and return the new value.
    pub fn toggle_soft_delete(&self, id: EntryId) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                &format!(
                    "UPDATE {} SET is_deleted = 1 - is_deleted WHERE id = ?1",
                    id.class.table()
                ),
                [id.row],
            )
            .map_err(storage_error)?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Catalog entry {}", id)));
        }

        let deleted = fetch(&conn, id)?.is_deleted;
        debug!(id = %id, deleted, "Soft-delete flag toggled");
        Ok(deleted)
    }

    /// Remove a row for good and return it.
    ///
    /// The backing artifact, if any, is the caller's to delete.
    pub fn hard_delete(&self, id: EntryId) -> Result<CatalogEntry> {
        let conn = self.conn()?;
        let entry = fetch(&conn, id)?;
        conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", id.class.table()),
            [id.row],
        )
        .map_err(storage_error)?;

        debug!(id = %id, "Catalog entry deleted");
        Ok(entry)
    }

    /// Replace the display name and payload of a row, bumping its timestamp.
    pub fn update_payload(
        &self,
        id: EntryId,
        display_name: Option<String>,
        payload: EntryPayload,
    ) -> Result<CatalogEntry> {
        if payload.class() != id.class {
            return Err(Error::InvalidInput(
                "Payload does not match entry class".to_string(),
            ));
        }
        let now = Utc::now().timestamp_millis();

        let changed = {
            let conn = self.conn()?;
            match &payload {
                EntryPayload::File { mime_type } => conn.execute(
                    "UPDATE files SET display_name = ?1, mime_type = ?2, timestamp = ?3 WHERE id = ?4",
                    params![display_name, mime_type, now, id.row],
                ),
                EntryPayload::Note { content } => conn.execute(
                    "UPDATE notes SET display_name = ?1, content = ?2, timestamp = ?3 WHERE id = ?4",
                    params![display_name, content, now, id.row],
                ),
                EntryPayload::Credential { username, password } => conn.execute(
                    "UPDATE credentials SET display_name = ?1, username = ?2, password = ?3, timestamp = ?4 WHERE id = ?5",
                    params![display_name, username, password, now, id.row],
                ),
            }
            .map_err(storage_error)?
        };

        if changed == 0 {
            return Err(Error::NotFound(format!("Catalog entry {}", id)));
        }
        self.get(id)
    }

    /// Number of active rows of a kind.
    pub fn count_active(&self, kind: EntryKind) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE type = ?1 AND is_deleted = 0",
                    kind.content_class().table()
                ),
                [kind.as_str()],
                |row| row.get(0),
            )
            .map_err(storage_error)?;
        Ok(count as u64)
    }

    /// Clear all rows.
    pub fn clear(&self) -> Result<()> {
        info!("Clearing catalog");
        let conn = self.conn()?;
        for class in ContentClass::ALL {
            conn.execute(&format!("DELETE FROM {}", class.table()), [])
                .map_err(storage_error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(name: &str) -> NewEntry {
        NewEntry::new(
            EntryKind::Photo,
            EntryPayload::File {
                mime_type: Some("image/jpeg".to_string()),
            },
        )
        .with_display_name(name)
        .with_original_location(format!("/sdcard/DCIM/{}", name))
    }

    #[test]
    fn test_insert_and_get() {
        let catalog = Catalog::in_memory().unwrap();

        let inserted = catalog.insert(&photo("beach.jpg")).unwrap();
        let retrieved = catalog.get(inserted.id).unwrap();

        assert_eq!(retrieved, inserted);
        assert_eq!(retrieved.kind, EntryKind::Photo);
        assert_eq!(retrieved.display_name.as_deref(), Some("beach.jpg"));
        assert!(!retrieved.is_deleted);
    }

    #[test]
    fn test_system_names_unique() {
        let catalog = Catalog::in_memory().unwrap();
        let first = catalog.insert(&photo("a.jpg")).unwrap();

        let clash = photo("b.jpg").with_system_name(first.system_name.clone());
        assert!(matches!(catalog.insert(&clash), Err(Error::AlreadyExists(_))));

        let note_clash = NewEntry::new(
            EntryKind::Note,
            EntryPayload::Note {
                content: "c".to_string(),
            },
        )
        .with_system_name(first.system_name.clone());
        assert!(matches!(
            catalog.insert(&note_clash),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_query_active_excludes_trash_and_orders() {
        let catalog = Catalog::in_memory().unwrap();

        let old = catalog.insert(&photo("old.jpg").with_timestamp(1_000)).unwrap();
        let new = catalog.insert(&photo("new.jpg").with_timestamp(3_000)).unwrap();
        let mid = catalog.insert(&photo("mid.jpg").with_timestamp(2_000)).unwrap();
        let video = NewEntry::new(EntryKind::Video, EntryPayload::File { mime_type: None });
        catalog.insert(&video).unwrap();

        catalog.set_deleted(mid.id, true).unwrap();

        let active = catalog.query_active(EntryKind::Photo).unwrap();
        let ids: Vec<EntryId> = active.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![new.id, old.id]);
        assert!(active.iter().all(|e| !e.is_deleted));
        assert_eq!(catalog.count_active(EntryKind::Photo).unwrap(), 2);
        assert_eq!(catalog.count_active(EntryKind::Video).unwrap(), 1);
    }

    #[test]
    fn test_trash_spans_classes() {
        let catalog = Catalog::in_memory().unwrap();

        let file = catalog.insert(&photo("x.jpg").with_timestamp(10)).unwrap();
        let note = catalog
            .insert(
                &NewEntry::new(
                    EntryKind::Note,
                    EntryPayload::Note {
                        content: "enc-body".to_string(),
                    },
                )
                .with_timestamp(20),
            )
            .unwrap();
        let cred = catalog
            .insert(&NewEntry::new(
                EntryKind::Credential,
                EntryPayload::Credential {
                    username: "enc-user".to_string(),
                    password: "enc-pass".to_string(),
                },
            ))
            .unwrap();

        catalog.set_deleted(file.id, true).unwrap();
        catalog.set_deleted(note.id, true).unwrap();

        let trash = catalog.query_trashed().unwrap();
        assert_eq!(trash.len(), 2);
        assert_eq!(trash[0].id, note.id);
        assert_eq!(trash[1].id, file.id);
        assert!(trash.iter().all(|e| e.id != cred.id));
    }

    #[test]
    fn test_toggle_soft_delete() {
        let catalog = Catalog::in_memory().unwrap();
        let entry = catalog.insert(&photo("t.jpg")).unwrap();

        assert!(catalog.toggle_soft_delete(entry.id).unwrap());
        assert!(catalog.get(entry.id).unwrap().is_deleted);
        assert!(!catalog.toggle_soft_delete(entry.id).unwrap());
        assert!(!catalog.get(entry.id).unwrap().is_deleted);
    }

    #[test]
    fn test_concurrent_toggles_are_not_lost() {
        let catalog = Catalog::in_memory().unwrap();
        let entry = catalog.insert(&photo("busy.jpg")).unwrap();

        let trashed = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        (0..25)
                            .filter(|_| catalog.toggle_soft_delete(entry.id).unwrap())
                            .count()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .sum::<usize>()
        });

        assert_eq!(trashed, 100);
        assert!(!catalog.get(entry.id).unwrap().is_deleted);
        assert!(matches!(
            catalog.toggle_soft_delete(EntryId { class: entry.id.class, row: 9999 }),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_hard_delete() {
        let catalog = Catalog::in_memory().unwrap();
        let entry = catalog.insert(&photo("gone.jpg")).unwrap();

        let removed = catalog.hard_delete(entry.id).unwrap();
        assert_eq!(removed.system_name, entry.system_name);
        assert!(matches!(catalog.get(entry.id), Err(Error::NotFound(_))));
        assert!(catalog
            .find_by_system_name(&entry.system_name)
            .unwrap()
            .is_none());
        assert!(matches!(
            catalog.hard_delete(entry.id),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_update_credential() {
        let catalog = Catalog::in_memory().unwrap();
        let entry = catalog
            .insert(
                &NewEntry::new(
                    EntryKind::Credential,
                    EntryPayload::Credential {
                        username: "u1".to_string(),
                        password: "p1".to_string(),
                    },
                )
                .with_display_name("app1")
                .with_timestamp(5),
            )
            .unwrap();

        let updated = catalog
            .update_payload(
                entry.id,
                Some("app2".to_string()),
                EntryPayload::Credential {
                    username: "u2".to_string(),
                    password: "p2".to_string(),
                },
            )
            .unwrap();

        assert_eq!(updated.display_name.as_deref(), Some("app2"));
        assert!(updated.timestamp > 5);
        assert_eq!(
            updated.payload,
            EntryPayload::Credential {
                username: "u2".to_string(),
                password: "p2".to_string(),
            }
        );

        let file_payload = EntryPayload::File { mime_type: None };
        let wrong = catalog.update_payload(entry.id, None, file_payload);
        assert!(matches!(wrong, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_find_by_system_name() {
        let catalog = Catalog::in_memory().unwrap();
        let note = catalog
            .insert(&NewEntry::new(
                EntryKind::Note,
                EntryPayload::Note {
                    content: "enc".to_string(),
                },
            ))
            .unwrap();

        let found = catalog.find_by_system_name(&note.system_name).unwrap().unwrap();
        assert_eq!(found.id, note.id);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");

        let id = {
            let catalog = Catalog::open(&path).unwrap();
            catalog.insert(&photo("keep.jpg")).unwrap().id
        };

        let reopened = Catalog::open(&path).unwrap();
        assert_eq!(
            reopened.get(id).unwrap().display_name.as_deref(),
            Some("keep.jpg")
        );
    }

    #[test]
    fn test_clear() {
        let catalog = Catalog::in_memory().unwrap();
        catalog.insert(&photo("a.jpg")).unwrap();
        catalog.clear().unwrap();
        assert_eq!(catalog.count_active(EntryKind::Photo).unwrap(), 0);
    }
}
