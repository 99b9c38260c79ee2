//! Document records and the filesystem snapshots they are reconciled from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

use crate::error::DocResult;

/// Opaque, store-assigned identifier of a document record.
///
/// Stays stable for the record's whole lifetime, including soft delete and revival.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn generate() -> Self {
        DocumentId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        DocumentId(value)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stat-derived attributes persisted alongside a document.
///
/// Serialized as camelCase JSON. `deleted_at` is present exactly when `deleted` is set;
/// use [`DocumentMetadata::mark_deleted`] and [`DocumentMetadata::revive`] to keep it so.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inode: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<u64>,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DocumentMetadata {
    /// Active metadata describing the given stat.
    pub fn from_stat(stat: &FileStat) -> Self {
        DocumentMetadata {
            last_modified: stat.modified,
            size: stat.size,
            inode: stat.inode,
            device: stat.device,
            deleted: false,
            deleted_at: None,
        }
    }

    /// Flags the metadata as soft-deleted. An existing `deleted_at` is kept.
    pub fn mark_deleted(&mut self, at: DateTime<Utc>) {
        if !self.deleted || self.deleted_at.is_none() {
            self.deleted = true;
            self.deleted_at = Some(at);
        }
    }

    pub fn revive(&mut self) {
        self.deleted = false;
        self.deleted_at = None;
    }

    /// Parses persisted metadata, falling back to an empty object when the JSON is corrupt.
    pub fn parse_lenient(raw: &str, file_path: &str) -> Self {
        match serde_json::from_str::<DocumentMetadata>(raw) {
            Ok(mut meta) => {
                // A stray deletedAt on an active row carries no meaning.
                if !meta.deleted {
                    meta.deleted_at = None;
                }
                meta
            }
            Err(err) => {
                tracing::warn!(path = %file_path, error = %err, "malformed document metadata, using defaults");
                DocumentMetadata::default()
            }
        }
    }

    pub fn to_json(&self) -> String {
        // Plain struct of primitives and timestamps; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// The durable record kept for one watched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub file_path: PathBuf,
    pub title: String,
    pub content: String,
    pub metadata: DocumentMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn is_deleted(&self) -> bool {
        self.metadata.deleted
    }

    /// Whether the record already mirrors `snapshot` as an active document.
    pub fn matches(&self, snapshot: &FileSnapshot) -> bool {
        !self.metadata.deleted
            && self.title == snapshot.title
            && self.content == snapshot.content
            && self.metadata == DocumentMetadata::from_stat(&snapshot.stat)
    }
}

/// Partial update applied to an existing record. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub metadata: Option<DocumentMetadata>,
}

impl DocumentPatch {
    /// Replaces title, content and metadata with what was observed on disk.
    /// The resulting metadata is always active, which is what revives a soft-deleted row.
    pub fn from_snapshot(snapshot: &FileSnapshot) -> Self {
        DocumentPatch {
            title: Some(snapshot.title.clone()),
            content: Some(snapshot.content.clone()),
            metadata: Some(DocumentMetadata::from_stat(&snapshot.stat)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.metadata.is_none()
    }
}

/// Stat information captured for a file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStat {
    pub modified: Option<DateTime<Utc>>,
    pub size: u64,
    pub inode: Option<u64>,
    pub device: Option<u64>,
}

impl From<&std::fs::Metadata> for FileStat {
    fn from(meta: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        let (inode, device) = {
            use std::os::unix::fs::MetadataExt;
            (Some(meta.ino()), Some(meta.dev()))
        };
        #[cfg(not(unix))]
        let (inode, device) = (None, None);

        FileStat {
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            size: meta.len(),
            inode,
            device,
        }
    }
}

/// Content and stat of a file as read from disk at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    pub path: PathBuf,
    pub title: String,
    pub content: String,
    pub stat: FileStat,
}

impl FileSnapshot {
    /// Reads the file at `path` fresh from disk.
    ///
    /// Returns an I/O error if the file is gone, unreadable, or not valid UTF-8.
    pub async fn read(path: &Path) -> DocResult<FileSnapshot> {
        let content = tokio::fs::read_to_string(path).await?;
        let meta = tokio::fs::metadata(path).await?;

        Ok(FileSnapshot {
            path: path.to_path_buf(),
            title: title_from_path(path),
            content,
            stat: FileStat::from(&meta),
        })
    }
}

/// Derives a document title from the file name without its extension.
pub fn title_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Makes `path` absolute and removes `.` and `..` components lexically.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// The string form of a path used as the store's uniqueness key.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Key prefix shared by every path strictly below the directory `dir`.
pub fn dir_prefix_key(dir: &Path) -> String {
    let mut key = path_key(dir);
    if !key.ends_with(std::path::MAIN_SEPARATOR) {
        key.push(std::path::MAIN_SEPARATOR);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_drops_extension() {
        assert_eq!(title_from_path(Path::new("/notes/notes.txt")), "notes");
        assert_eq!(title_from_path(Path::new("/notes/archive.tar.gz")), "archive.tar");
        assert_eq!(title_from_path(Path::new("/notes/README")), "README");
    }

    #[test]
    fn normalize_removes_dot_segments() {
        let normalized = normalize_path(Path::new("/a/b/../c/./d.md"));
        assert_eq!(normalized, PathBuf::from("/a/c/d.md"));
    }

    #[cfg(unix)]
    #[test]
    fn dir_prefix_ends_in_one_separator() {
        assert_eq!(dir_prefix_key(Path::new("/notes/sub")), "/notes/sub/");
        assert_eq!(dir_prefix_key(Path::new("/notes/sub/")), "/notes/sub/");
    }

    #[test]
    fn corrupt_metadata_falls_back_to_default() {
        let meta = DocumentMetadata::parse_lenient("{not json", "/tmp/x.md");
        assert_eq!(meta, DocumentMetadata::default());
    }

    #[test]
    fn metadata_uses_camel_case_and_omits_deleted_at_when_active() {
        let meta = DocumentMetadata {
            size: 5,
            ..Default::default()
        };
        let json = meta.to_json();
        assert!(json.contains("\"size\":5"));
        assert!(json.contains("\"deleted\":false"));
        assert!(!json.contains("deletedAt"));

        let mut deleted = meta.clone();
        deleted.mark_deleted(Utc::now());
        assert!(deleted.to_json().contains("deletedAt"));
    }

    #[test]
    fn mark_deleted_keeps_first_timestamp() {
        let mut meta = DocumentMetadata::default();
        let first = Utc::now();
        meta.mark_deleted(first);
        meta.mark_deleted(first + chrono::TimeDelta::seconds(10));
        assert_eq!(meta.deleted_at, Some(first));

        meta.revive();
        assert!(!meta.deleted);
        assert!(meta.deleted_at.is_none());
    }

    #[test]
    fn stray_deleted_at_is_dropped_for_active_rows() {
        let raw = r#"{"size":1,"deleted":false,"deletedAt":"2024-01-01T00:00:00Z"}"#;
        let meta = DocumentMetadata::parse_lenient(raw, "/tmp/x.md");
        assert!(meta.deleted_at.is_none());
    }
}
