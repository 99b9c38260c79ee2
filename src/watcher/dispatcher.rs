//! Routes filesystem events to the reconciliation handler.
//!
//! Adds and unlinks are reconciled inline, in arrival order. Changes go through
//! the per-path debouncer and are reconciled once the file has gone quiet.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

use crate::error::{DocError, DocResult};
use crate::reconcile::{Reconciled, ReconciliationHandler};
use crate::watcher::debounce::DebounceCoordinator;
use crate::watcher::source::{FsEvent, FsEventKind};

/// Poll settings for waiting until a newly added file stops growing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteStability {
    pub interval: Duration,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct EventDispatcher {
    handler: ReconciliationHandler,
    debouncer: DebounceCoordinator<PathBuf>,
    write_stability: Option<WriteStability>,
}

impl EventDispatcher {
    pub fn new(handler: ReconciliationHandler, debounce_window: Duration) -> Self {
        Self {
            handler,
            debouncer: DebounceCoordinator::new(debounce_window),
            write_stability: None,
        }
    }

    pub fn with_write_stability(mut self, stability: Option<WriteStability>) -> Self {
        self.write_stability = stability;
        self
    }

    pub fn debouncer(&self) -> &DebounceCoordinator<PathBuf> {
        &self.debouncer
    }

    pub fn handler(&self) -> &ReconciliationHandler {
        &self.handler
    }

    /// Handles one event. Change events return as soon as they are scheduled.
    pub async fn dispatch(&self, event: FsEvent) {
        let FsEvent { kind, path } = event;
        if let Some(reason) = self.handler.classifier().classify(&path) {
            tracing::trace!(path = %path.display(), ?reason, "dropping ignored event");
            return;
        }

        match kind {
            FsEventKind::Add => {
                if is_directory(&path).await {
                    self.add_tree(&path).await;
                    return;
                }
                self.debouncer.cancel(&path);
                self.wait_for_write_finish(&path).await;
                let result = self
                    .debouncer
                    .run_exclusive(path.clone(), self.handler.on_add(&path))
                    .await;
                log_outcome("add", &path, result);
            }
            FsEventKind::Unlink => {
                let dropped = self.debouncer.cancel_matching(|key| key.starts_with(&path));
                if dropped > 0 {
                    tracing::debug!(path = %path.display(), dropped, "dropped pending changes for removed path");
                }
                let result = self
                    .debouncer
                    .run_exclusive(path.clone(), self.handler.on_unlink(&path))
                    .await;
                log_outcome("unlink", &path, result);
            }
            FsEventKind::Change => {
                if is_directory(&path).await {
                    return;
                }
                let handler = self.handler.clone();
                let key = path.clone();
                self.debouncer.schedule(key, move || async move {
                    let result = handler.on_change(&path).await;
                    log_outcome("change", &path, result);
                });
            }
        }
    }

    /// Consumes events until `shutdown` resolves or the source closes.
    ///
    /// A backend error ends the loop with [`DocError::Watch`]; a broken watch is not
    /// something this loop can repair.
    pub async fn run<S>(
        &self,
        mut events: UnboundedReceiver<notify::Result<FsEvent>>,
        shutdown: S,
    ) -> DocResult<()>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => return Ok(()),

                event = events.recv() => match event {
                    Some(Ok(event)) => {
                        tracing::debug!(kind = ?event.kind, path = %event.path.display(), "fs event");
                        self.dispatch(event).await;
                    }
                    Some(Err(err)) => {
                        tracing::error!(error = %err, "file watch failed");
                        return Err(DocError::Watch(err));
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    /// Reconciles every file below a directory that appeared in one piece, such as
    /// one moved in from outside the tree. The OS reports only the directory itself.
    async fn add_tree(&self, dir: &Path) {
        let mut stack = vec![dir.to_path_buf()];
        let mut added = 0usize;

        while let Some(current) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(path = %current.display(), error = %err, "could not list new directory");
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(path = %current.display(), error = %err, "could not list new directory");
                        break;
                    }
                };
                let path = entry.path();
                if self.handler.classifier().should_ignore(&path) {
                    continue;
                }
                match entry.file_type().await {
                    Ok(kind) if kind.is_dir() => stack.push(path),
                    Ok(kind) if kind.is_file() => {
                        self.debouncer.cancel(&path);
                        let result = self
                            .debouncer
                            .run_exclusive(path.clone(), self.handler.on_add(&path))
                            .await;
                        log_outcome("add", &path, result);
                        added += 1;
                    }
                    _ => {}
                }
            }
        }

        if added > 0 {
            tracing::debug!(dir = %dir.display(), added, "reconciled files of new directory");
        }
    }

    async fn wait_for_write_finish(&self, path: &Path) {
        let Some(stability) = self.write_stability else {
            return;
        };
        let deadline = Instant::now() + stability.timeout;
        let mut last = stat_signature(path).await;

        loop {
            tokio::time::sleep(stability.interval).await;
            let current = stat_signature(path).await;
            if current == last {
                return;
            }
            if Instant::now() >= deadline {
                tracing::debug!(path = %path.display(), "file still changing, reading anyway");
                return;
            }
            last = current;
        }
    }
}

async fn is_directory(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

async fn stat_signature(path: &Path) -> Option<(u64, Option<SystemTime>)> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some((meta.len(), meta.modified().ok()))
}

fn log_outcome(event: &'static str, path: &Path, result: DocResult<Reconciled>) {
    match result {
        Ok(outcome) => {
            tracing::debug!(event, path = %path.display(), ?outcome, "reconciled");
        }
        Err(err @ DocError::StorageUnavailable { .. }) => {
            tracing::error!(event, path = %path.display(), error = %err, "store unavailable, reconciliation dropped");
        }
        Err(err) => {
            tracing::error!(event, path = %path.display(), error = %err, "reconciliation failed");
        }
    }
}
