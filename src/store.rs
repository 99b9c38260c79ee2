//! Durable mapping from file path to [`DocumentRecord`].
//!
//! The store is handed to the watcher as an `Arc<dyn DocumentStore>` so the same
//! reconciliation code runs against SQLite in production and an in-memory map in tests.
//! Records are never hard-deleted: unlinked files become soft-deleted rows that keep
//! their id and path, and a later create at that path revives them through `update`.

pub mod memory;
pub mod retry;
pub mod sqlite;

use async_trait::async_trait;
use std::path::Path;

use crate::document::{DocumentId, DocumentPatch, DocumentRecord, FileStat};
use crate::error::DocResult;

pub use memory::MemoryDocumentStore;
pub use retry::{RetryPolicy, with_retry};
pub use sqlite::SqliteDocumentStore;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Looks up the record for `path`, soft-deleted or not.
    async fn get_by_path(&self, path: &Path) -> DocResult<Option<DocumentRecord>>;

    async fn get_by_id(&self, id: &DocumentId) -> DocResult<Option<DocumentRecord>>;

    /// Inserts a new active record and returns its freshly assigned id.
    ///
    /// Fails with [`crate::DocError::Constraint`] if a row for `path` already exists.
    async fn create(
        &self,
        title: &str,
        content: &str,
        path: &Path,
        stat: &FileStat,
    ) -> DocResult<DocumentId>;

    /// Applies `patch` to the record `id` in one atomic write.
    async fn update(&self, id: &DocumentId, patch: DocumentPatch) -> DocResult<()>;

    /// Flags the record at `path` as deleted and returns its id, or `None` if there is none.
    ///
    /// Deleting an already deleted record keeps its original `deletedAt`.
    async fn soft_delete(&self, path: &Path) -> DocResult<Option<DocumentId>>;

    /// Soft-deletes every active record strictly below the directory `dir` in one
    /// atomic write and returns the ids it flagged.
    ///
    /// Used when a whole directory leaves the tree and only the directory is reported.
    async fn soft_delete_under(&self, dir: &Path) -> DocResult<Vec<DocumentId>>;

    /// Every record ordered by path, including soft-deleted ones.
    async fn list_all(&self) -> DocResult<Vec<DocumentRecord>>;

    async fn list_active(&self) -> DocResult<Vec<DocumentRecord>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|record| !record.is_deleted())
            .collect())
    }

    /// Releases the underlying storage handle.
    async fn close(&self);
}
