//! Turns one filesystem observation into at most one store mutation.
//!
//! Every entry point re-reads the file at call time, so replaying an event against
//! the same disk state leaves the record exactly as it was.

use std::path::Path;
use std::sync::Arc;

use crate::classifier::PathClassifier;
use crate::document::{DocumentId, DocumentPatch, DocumentRecord, FileSnapshot, normalize_path};
use crate::error::DocResult;
use crate::store::DocumentStore;

/// What a reconciliation did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    Created(DocumentId),
    Updated(DocumentId),
    /// A soft-deleted record was brought back by a file reappearing at its path.
    Revived(DocumentId),
    /// The record already matched the file; nothing was written.
    Unchanged(DocumentId),
    SoftDeleted(DocumentId),
    /// The path was a directory; these records were below it.
    SoftDeletedTree(Vec<DocumentId>),
    /// The path matched an ignore rule.
    Ignored,
    /// Unlink for a path with no record.
    Absent,
    /// Reading the file failed; the store was left untouched.
    Abandoned,
    /// Change for a path with no record while self-healing is turned off.
    Orphaned,
}

impl Reconciled {
    pub fn id(&self) -> Option<&DocumentId> {
        match self {
            Reconciled::Created(id)
            | Reconciled::Updated(id)
            | Reconciled::Revived(id)
            | Reconciled::Unchanged(id)
            | Reconciled::SoftDeleted(id) => Some(id),
            _ => None,
        }
    }

    pub fn wrote(&self) -> bool {
        matches!(
            self,
            Reconciled::Created(_)
                | Reconciled::Updated(_)
                | Reconciled::Revived(_)
                | Reconciled::SoftDeleted(_)
                | Reconciled::SoftDeletedTree(_)
        )
    }
}

#[derive(Clone)]
pub struct ReconciliationHandler {
    store: Arc<dyn DocumentStore>,
    classifier: PathClassifier,
    heal_orphan_changes: bool,
}

impl ReconciliationHandler {
    pub fn new(store: Arc<dyn DocumentStore>, classifier: PathClassifier) -> Self {
        Self {
            store,
            classifier,
            heal_orphan_changes: true,
        }
    }

    /// Whether a change event for a path without a record creates one.
    ///
    /// On by default. Turned off, such events are logged and dropped instead.
    pub fn heal_orphan_changes(mut self, enabled: bool) -> Self {
        self.heal_orphan_changes = enabled;
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn classifier(&self) -> &PathClassifier {
        &self.classifier
    }

    /// A file appeared: create its record, or refresh and revive the existing one.
    pub async fn on_add(&self, path: &Path) -> DocResult<Reconciled> {
        let path = normalize_path(path);
        if self.is_ignored(&path) {
            return Ok(Reconciled::Ignored);
        }
        let Some(snapshot) = self.read(&path, "add").await else {
            return Ok(Reconciled::Abandoned);
        };

        match self.store.get_by_path(&path).await? {
            Some(existing) => self.refresh(existing, &snapshot).await,
            None => self.create(&snapshot).await,
        }
    }

    /// A file's content changed. Without a record this behaves like [`Self::on_add`],
    /// since the add event was evidently missed.
    pub async fn on_change(&self, path: &Path) -> DocResult<Reconciled> {
        let path = normalize_path(path);
        if self.is_ignored(&path) {
            return Ok(Reconciled::Ignored);
        }
        let Some(snapshot) = self.read(&path, "change").await else {
            return Ok(Reconciled::Abandoned);
        };

        match self.store.get_by_path(&path).await? {
            Some(existing) => self.refresh(existing, &snapshot).await,
            None if self.heal_orphan_changes => {
                tracing::info!(path = %path.display(), "change without a record, treating as add");
                self.create(&snapshot).await
            }
            None => {
                tracing::warn!(path = %path.display(), "change without a record, missed add event");
                Ok(Reconciled::Orphaned)
            }
        }
    }

    /// A file went away: soft-delete its record if there is one.
    ///
    /// A path without a record of its own may be a directory that left the tree, in
    /// which case every active record below it is soft-deleted.
    pub async fn on_unlink(&self, path: &Path) -> DocResult<Reconciled> {
        let path = normalize_path(path);
        if self.is_ignored(&path) {
            return Ok(Reconciled::Ignored);
        }

        if let Some(id) = self.store.soft_delete(&path).await? {
            tracing::debug!(id = %id, path = %path.display(), "soft-deleted document");
            return Ok(Reconciled::SoftDeleted(id));
        }

        let ids = self.store.soft_delete_under(&path).await?;
        if ids.is_empty() {
            return Ok(Reconciled::Absent);
        }
        tracing::info!(dir = %path.display(), count = ids.len(), "directory removed, soft-deleted its documents");
        Ok(Reconciled::SoftDeletedTree(ids))
    }

    fn is_ignored(&self, path: &Path) -> bool {
        match self.classifier.classify(path) {
            Some(reason) => {
                tracing::trace!(path = %path.display(), ?reason, "ignored path");
                true
            }
            None => false,
        }
    }

    async fn read(&self, path: &Path, event: &'static str) -> Option<FileSnapshot> {
        match FileSnapshot::read(path).await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                tracing::warn!(path = %path.display(), event, error = %err, "could not read file, skipping reconciliation");
                None
            }
        }
    }

    async fn create(&self, snapshot: &FileSnapshot) -> DocResult<Reconciled> {
        let id = self
            .store
            .create(
                &snapshot.title,
                &snapshot.content,
                &snapshot.path,
                &snapshot.stat,
            )
            .await?;
        Ok(Reconciled::Created(id))
    }

    async fn refresh(
        &self,
        existing: DocumentRecord,
        snapshot: &FileSnapshot,
    ) -> DocResult<Reconciled> {
        if existing.matches(snapshot) {
            return Ok(Reconciled::Unchanged(existing.id));
        }

        let revived = existing.is_deleted();
        self.store
            .update(&existing.id, DocumentPatch::from_snapshot(snapshot))
            .await?;

        if revived {
            tracing::info!(id = %existing.id, path = %snapshot.path.display(), "revived soft-deleted document");
            Ok(Reconciled::Revived(existing.id))
        } else {
            tracing::debug!(id = %existing.id, path = %snapshot.path.display(), "updated document");
            Ok(Reconciled::Updated(existing.id))
        }
    }
}
