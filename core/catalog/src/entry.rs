//! Catalog row types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use lockbox_common::{ArtifactId, Error, Result};

/// Kind of vault content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    Photo,
    Video,
    Document,
    Note,
    Credential,
}

impl EntryKind {
    /// All kinds, in display order.
    pub const ALL: [EntryKind; 5] = [
        EntryKind::Photo,
        EntryKind::Video,
        EntryKind::Document,
        EntryKind::Note,
        EntryKind::Credential,
    ];

    /// Tag stored in the `type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Photo => "PHOTO",
            EntryKind::Video => "VIDEO",
            EntryKind::Document => "DOCUMENT",
            EntryKind::Note => "NOTE",
            EntryKind::Credential => "CREDENTIAL",
        }
    }

    /// Table this kind lives in.
    pub fn content_class(&self) -> ContentClass {
        match self {
            EntryKind::Photo | EntryKind::Video | EntryKind::Document => ContentClass::Files,
            EntryKind::Note => ContentClass::Notes,
            EntryKind::Credential => ContentClass::Credentials,
        }
    }

    /// Whether rows of this kind are backed by an artifact file.
    pub fn has_artifact(&self) -> bool {
        self.content_class() == ContentClass::Files
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PHOTO" => Ok(EntryKind::Photo),
            "VIDEO" => Ok(EntryKind::Video),
            "DOCUMENT" | "DOC" => Ok(EntryKind::Document),
            "NOTE" => Ok(EntryKind::Note),
            "CREDENTIAL" | "PASS" | "PASSWORD" => Ok(EntryKind::Credential),
            other => Err(Error::InvalidInput(format!("Unknown entry kind: {}", other))),
        }
    }
}

/// Content class, one table each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentClass {
    Files,
    Notes,
    Credentials,
}

impl ContentClass {
    pub const ALL: [ContentClass; 3] = [
        ContentClass::Files,
        ContentClass::Notes,
        ContentClass::Credentials,
    ];

    pub(crate) fn table(&self) -> &'static str {
        match self {
            ContentClass::Files => "files",
            ContentClass::Notes => "notes",
            ContentClass::Credentials => "credentials",
        }
    }
}

/// Row identity: ids auto-increment per table, so the class is part of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId {
    pub class: ContentClass,
    pub row: i64,
}

impl EntryId {
    pub fn new(class: ContentClass, row: i64) -> Self {
        Self { class, row }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.class {
            ContentClass::Files => "f",
            ContentClass::Notes => "n",
            ContentClass::Credentials => "c",
        };
        write!(f, "{}{}", prefix, self.row)
    }
}

impl FromStr for EntryId {
    type Err = Error;

    /// Parse the `f12` / `n3` / `c7` form printed by `Display`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidInput(format!("Invalid entry id: {}", s));
        let mut chars = s.chars();
        let class = match chars.next() {
            Some('f') => ContentClass::Files,
            Some('n') => ContentClass::Notes,
            Some('c') => ContentClass::Credentials,
            _ => return Err(invalid()),
        };
        let row = chars.as_str().parse::<i64>().map_err(|_| invalid())?;
        Ok(Self { class, row })
    }
}

/// Class-specific columns.
///
/// Strings in `Note` and `Credential` are expected to be encrypted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPayload {
    File { mime_type: Option<String> },
    Note { content: String },
    Credential { username: String, password: String },
}

impl EntryPayload {
    pub fn class(&self) -> ContentClass {
        match self {
            EntryPayload::File { .. } => ContentClass::Files,
            EntryPayload::Note { .. } => ContentClass::Notes,
            EntryPayload::Credential { .. } => ContentClass::Credentials,
        }
    }
}

/// A row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub kind: EntryKind,
    pub system_name: ArtifactId,
    pub display_name: Option<String>,
    pub original_location: Option<String>,
    pub timestamp: Option<i64>,
    pub payload: EntryPayload,
}

impl NewEntry {
    /// Start a new row with a freshly generated system name.
    pub fn new(kind: EntryKind, payload: EntryPayload) -> Self {
        Self {
            kind,
            system_name: ArtifactId::generate(),
            display_name: None,
            original_location: None,
            timestamp: None,
            payload,
        }
    }

    pub fn with_system_name(mut self, system_name: ArtifactId) -> Self {
        self.system_name = system_name;
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_original_location(mut self, location: impl Into<String>) -> Self {
        self.original_location = Some(location.into());
        self
    }

    /// Override the insertion time (milliseconds since the epoch).
    pub fn with_timestamp(mut self, millis: i64) -> Self {
        self.timestamp = Some(millis);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.payload.class() != self.kind.content_class() {
            return Err(Error::InvalidInput(format!(
                "Payload does not match entry kind {}",
                self.kind
            )));
        }
        Ok(())
    }
}

/// A catalog row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: EntryId,
    pub kind: EntryKind,
    /// On-disk artifact name; unrelated to content.
    pub system_name: ArtifactId,
    pub display_name: Option<String>,
    pub original_location: Option<String>,
    /// Creation or last update, milliseconds since the epoch.
    pub timestamp: i64,
    pub is_deleted: bool,
    pub payload: EntryPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in EntryKind::ALL {
            assert_eq!(kind.as_str().parse::<EntryKind>().unwrap(), kind);
        }
        assert!("AUDIO".parse::<EntryKind>().is_err());
    }

    #[test]
    fn test_kind_classes() {
        assert_eq!(EntryKind::Video.content_class(), ContentClass::Files);
        assert_eq!(EntryKind::Note.content_class(), ContentClass::Notes);
        assert!(EntryKind::Photo.has_artifact());
        assert!(!EntryKind::Credential.has_artifact());
    }

    #[test]
    fn test_entry_id_display_parse() {
        let id = EntryId::new(ContentClass::Notes, 42);
        assert_eq!(id.to_string(), "n42");
        assert_eq!("n42".parse::<EntryId>().unwrap(), id);
        assert!("x1".parse::<EntryId>().is_err());
        assert!("f".parse::<EntryId>().is_err());
    }

    #[test]
    fn test_payload_must_match_kind() {
        let entry = NewEntry::new(
            EntryKind::Photo,
            EntryPayload::Note {
                content: "x".to_string(),
            },
        );
        assert!(entry.validate().is_err());
    }
}
