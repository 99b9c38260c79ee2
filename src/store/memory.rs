use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::document::{
    DocumentId, DocumentMetadata, DocumentPatch, DocumentRecord, FileStat, dir_prefix_key,
    path_key,
};
use crate::error::{DocError, DocResult};
use crate::store::DocumentStore;
use crate::store::retry::{RetryPolicy, with_retry};

#[derive(Default)]
struct Records {
    by_path: BTreeMap<String, DocumentRecord>,
    path_of: HashMap<DocumentId, String>,
}

/// Throwaway store kept entirely in memory.
///
/// Writes go through the same retry wrapper as the SQLite store. Transient failures
/// can be injected with [`MemoryDocumentStore::fail_next_writes`].
#[derive(Default)]
pub struct MemoryDocumentStore {
    records: Mutex<Records>,
    retry: RetryPolicy,
    injected_failures: AtomicU32,
    write_attempts: AtomicU32,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_policy(retry: RetryPolicy) -> Self {
        Self {
            retry,
            ..Self::default()
        }
    }

    /// Makes the next `count` write attempts fail with a busy error.
    pub fn fail_next_writes(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Number of write attempts seen so far, retries included.
    pub fn write_attempts(&self) -> u32 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.lock().by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn begin_write(&self) -> DocResult<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(DocError::Busy("database is locked".into())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_by_path(&self, path: &Path) -> DocResult<Option<DocumentRecord>> {
        Ok(self.records.lock().by_path.get(&path_key(path)).cloned())
    }

    async fn get_by_id(&self, id: &DocumentId) -> DocResult<Option<DocumentRecord>> {
        let records = self.records.lock();
        Ok(records
            .path_of
            .get(id)
            .and_then(|key| records.by_path.get(key))
            .cloned())
    }

    async fn create(
        &self,
        title: &str,
        content: &str,
        path: &Path,
        stat: &FileStat,
    ) -> DocResult<DocumentId> {
        let this = self;
        let key = path_key(path);
        let key = key.as_str();

        with_retry(&self.retry, "create", || async move {
            this.begin_write()?;
            let mut records = this.records.lock();
            if records.by_path.contains_key(key) {
                return Err(DocError::Constraint(format!(
                    "UNIQUE constraint failed: documents.file_path ({key})"
                )));
            }

            let now = Utc::now();
            let id = DocumentId::generate();
            records.by_path.insert(
                key.to_string(),
                DocumentRecord {
                    id: id.clone(),
                    file_path: path.to_path_buf(),
                    title: title.to_string(),
                    content: content.to_string(),
                    metadata: DocumentMetadata::from_stat(stat),
                    created_at: now,
                    updated_at: now,
                },
            );
            records.path_of.insert(id.clone(), key.to_string());
            Ok(id)
        })
        .await
    }

    async fn update(&self, id: &DocumentId, patch: DocumentPatch) -> DocResult<()> {
        let this = self;
        let patch = &patch;

        with_retry(&self.retry, "update", || async move {
            this.begin_write()?;
            let mut records = this.records.lock();
            let key = records
                .path_of
                .get(id)
                .cloned()
                .ok_or_else(|| DocError::NotFound(id.to_string()))?;
            let record = records
                .by_path
                .get_mut(&key)
                .ok_or_else(|| DocError::NotFound(id.to_string()))?;

            if let Some(title) = &patch.title {
                record.title = title.clone();
            }
            if let Some(content) = &patch.content {
                record.content = content.clone();
            }
            if let Some(metadata) = &patch.metadata {
                record.metadata = metadata.clone();
            }
            record.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn soft_delete(&self, path: &Path) -> DocResult<Option<DocumentId>> {
        let this = self;
        let key = path_key(path);
        let key = key.as_str();

        with_retry(&self.retry, "soft_delete", || async move {
            this.begin_write()?;
            let mut records = this.records.lock();
            let Some(record) = records.by_path.get_mut(key) else {
                return Ok(None);
            };
            if !record.metadata.deleted {
                let now = Utc::now();
                record.metadata.mark_deleted(now);
                record.updated_at = now;
            }
            Ok(Some(record.id.clone()))
        })
        .await
    }

    async fn soft_delete_under(&self, dir: &Path) -> DocResult<Vec<DocumentId>> {
        let this = self;
        let prefix = dir_prefix_key(dir);
        let prefix = prefix.as_str();

        with_retry(&self.retry, "soft_delete_under", || async move {
            this.begin_write()?;
            let mut records = this.records.lock();
            let now = Utc::now();
            let mut flagged = Vec::new();
            for (_, record) in records
                .by_path
                .range_mut(prefix.to_string()..)
                .take_while(|(key, _)| key.starts_with(prefix))
            {
                if !record.metadata.deleted {
                    record.metadata.mark_deleted(now);
                    record.updated_at = now;
                    flagged.push(record.id.clone());
                }
            }
            Ok(flagged)
        })
        .await
    }

    async fn list_all(&self) -> DocResult<Vec<DocumentRecord>> {
        Ok(self.records.lock().by_path.values().cloned().collect())
    }

    async fn close(&self) {}
}
