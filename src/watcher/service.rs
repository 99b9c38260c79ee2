use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::RecommendedWatcher;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::classifier::PathClassifier;
use crate::config::WatchConfig;
use crate::error::{DocError, DocResult};
use crate::reconcile::ReconciliationHandler;
use crate::store::{DocumentStore, SqliteDocumentStore};
use crate::watcher::dispatcher::EventDispatcher;
use crate::watcher::source::spawn_fs_watcher;

/// Upper bound on how long shutdown waits for reconciliations that already started.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the OS watch, the event loop and the store handle for one directory tree.
///
/// Files that exist before [`WatcherService::run`] are not reported; bringing the
/// store up to date with them is left to a separate scan.
pub struct WatcherService {
    root: PathBuf,
    store: Arc<dyn DocumentStore>,
    dispatcher: EventDispatcher,
    watcher: Option<RecommendedWatcher>,
    loop_task: Option<JoinHandle<DocResult<()>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl WatcherService {
    /// Prepares a service for `watch_path` that writes into `store`.
    pub async fn create(
        watch_path: &Path,
        store: Arc<dyn DocumentStore>,
        config: WatchConfig,
    ) -> DocResult<Self> {
        config.validate()?;
        let root = tokio::fs::canonicalize(watch_path).await?;
        if !tokio::fs::metadata(&root).await?.is_dir() {
            return Err(DocError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("watch root is not a directory: {}", root.display()),
            )));
        }

        let handler = ReconciliationHandler::new(Arc::clone(&store), PathClassifier::new(&root))
            .heal_orphan_changes(config.heal_orphan_changes);
        let dispatcher = EventDispatcher::new(handler, config.debounce_window())
            .with_write_stability(config.write_stability());

        Ok(WatcherService {
            root,
            store,
            dispatcher,
            watcher: None,
            loop_task: None,
            shutdown_tx: None,
        })
    }

    /// Like [`WatcherService::create`], backed by the SQLite database named in `config`.
    pub async fn open(watch_path: &Path, config: WatchConfig) -> DocResult<Self> {
        let db_path = config.resolved_database_path()?;
        let store = SqliteDocumentStore::open(&db_path, config.retry.clone()).await?;
        Self::create(watch_path, Arc::new(store), config).await
    }

    /// Starts the OS watch and the event loop. Calling it again while running is a no-op.
    pub fn run(&mut self) -> DocResult<()> {
        if self.loop_task.is_some() {
            return Ok(());
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let watcher = spawn_fs_watcher(&self.root, event_tx)?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let dispatcher = self.dispatcher.clone();

        let loop_task = tokio::spawn(async move {
            dispatcher
                .run(event_rx, async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        self.watcher = Some(watcher);
        self.loop_task = Some(loop_task);
        self.shutdown_tx = Some(shutdown_tx);

        tracing::info!(root = %self.root.display(), "watching for document changes");
        Ok(())
    }

    /// Waits for the event loop to end and returns why it ended.
    ///
    /// An `Err(DocError::Watch(_))` means the OS watch broke and the service must be
    /// recreated.
    pub async fn wait(&mut self) -> DocResult<()> {
        let task = self.loop_task.take().ok_or(DocError::Closed)?;
        let result = task.await?;
        self.watcher.take();
        result
    }

    /// Stops watching, drops pending debounced changes without running them, and closes
    /// the store.
    pub async fn shutdown(&mut self) -> DocResult<()> {
        // NOTE: dropping the watcher also closes the event channel.
        self.watcher.take();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        let loop_result = match self.loop_task.take() {
            Some(task) => task.await?,
            None => Ok(()),
        };

        let dropped = self.dispatcher.debouncer().cancel_all();
        if dropped > 0 {
            tracing::info!(dropped, "cancelled pending changes on shutdown");
        }
        if tokio::time::timeout(DRAIN_TIMEOUT, self.dispatcher.debouncer().wait_idle())
            .await
            .is_err()
        {
            tracing::warn!("reconciliations still running at shutdown");
        }

        self.store.close().await;
        tracing::info!(root = %self.root.display(), "watcher stopped");
        loop_result
    }

    pub fn is_running(&self) -> bool {
        self.loop_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.store)
    }

    pub fn pending_changes(&self) -> usize {
        self.dispatcher.debouncer().pending_count()
    }
}

impl Drop for WatcherService {
    fn drop(&mut self) {
        self.dispatcher.debouncer().cancel_all();
        if let Some(task) = self.loop_task.take() {
            task.abort();
        }
    }
}
