//! Real-time watching of a document tree.
//!
//! [`source`] turns OS notifications into add / change / unlink events,
//! [`dispatcher`] routes them to the reconciliation handler (changes through
//! [`debounce`]), and [`service`] owns the whole pipeline.

pub mod debounce;
pub mod dispatcher;
pub mod service;
pub mod source;

pub use debounce::DebounceCoordinator;
pub use dispatcher::{EventDispatcher, WriteStability};
pub use service::WatcherService;
pub use source::{FsEvent, FsEventKind, spawn_fs_watcher};
