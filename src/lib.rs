//! # docwatch
//!
//! Keeps a durable store of document records in step with a directory tree on disk.
//! Files that appear, change, or disappear under the watched root are reconciled
//! into one record per path. Removed files are soft-deleted, never erased, and a file
//! that comes back at the same path revives its old record under the same id.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docwatch::{WatchConfig, WatcherService};
//! use docwatch::store::SqliteDocumentStore;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn start() -> docwatch::DocResult<()> {
//! let config = WatchConfig::default();
//! docwatch::logging::init(&config.logging);
//!
//! let store = SqliteDocumentStore::open(Path::new("/tmp/documents.db"), config.retry.clone()).await?;
//! let mut service = WatcherService::create(Path::new("/home/me/notes"), Arc::new(store), config).await?;
//! service.run()?;
//!
//! // Returns only when the OS watch breaks.
//! service.wait().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **[`classifier`]**: decides which paths are never reconciled (hidden files,
//!   dependency and VCS directories, OS metadata, editor artifacts, reserved names)
//! - **[`watcher`]**: OS watch, per-path debouncing of change bursts, event routing
//!   and the owning [`WatcherService`]
//! - **[`reconcile`]**: turns one event into at most one idempotent store mutation
//! - **[`store`]**: the [`store::DocumentStore`] trait with SQLite (WAL) and in-memory
//!   implementations, and the bounded retry used for busy storage
//! - **[`document`]**: records, metadata and file snapshots
//! - **[`error`]**: the unified [`DocError`] type
//!
//! ## Event Routing
//!
//! Adds and unlinks are reconciled immediately and in arrival order. Changes are
//! debounced per path and re-read from disk when the quiet window ends, so a burst of
//! saves produces one write holding the final content.
//!
//! ## Error Handling
//!
//! Storage lock contention is retried with exponential backoff and surfaces as
//! [`DocError::StorageUnavailable`] once the budget is spent. Constraint and query
//! errors are returned immediately. A file that cannot be read is skipped without
//! touching the store. A failing OS watch ends the event loop with [`DocError::Watch`].

pub mod classifier;
pub mod config;
pub mod document;
pub mod error;
pub mod logging;
pub mod reconcile;
pub mod store;
pub mod watcher;

pub use config::WatchConfig;
pub use document::{DocumentId, DocumentMetadata, DocumentRecord};
pub use error::{DocError, DocResult};
pub use reconcile::{Reconciled, ReconciliationHandler};
pub use watcher::WatcherService;
