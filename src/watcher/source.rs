use notify::event::{MetadataKind, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    Add,
    Change,
    Unlink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
}

impl FsEvent {
    pub fn add(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FsEventKind::Add,
            path: path.into(),
        }
    }

    pub fn change(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FsEventKind::Change,
            path: path.into(),
        }
    }

    pub fn unlink(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FsEventKind::Unlink,
            path: path.into(),
        }
    }
}

/// Maps a raw notify event onto add / change / unlink events.
///
/// Renames become an unlink of the old path and an add of the new one. Access
/// events and metadata changes other than mtime are dropped.
pub fn translate(event: &Event) -> Vec<FsEvent> {
    match event.kind {
        EventKind::Create(_) => event.paths.iter().map(FsEvent::add).collect(),
        EventKind::Remove(_) => event.paths.iter().map(FsEvent::unlink).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => event.paths.iter().map(FsEvent::unlink).collect(),
            RenameMode::To => event.paths.iter().map(FsEvent::add).collect(),
            RenameMode::Both => match event.paths.as_slice() {
                [from, to] => vec![FsEvent::unlink(from), FsEvent::add(to)],
                _ => Vec::new(),
            },
            // Backends that cannot tell which side of a rename they saw.
            _ => event
                .paths
                .iter()
                .map(|path| {
                    if path.exists() {
                        FsEvent::add(path)
                    } else {
                        FsEvent::unlink(path)
                    }
                })
                .collect(),
        },
        EventKind::Modify(ModifyKind::Metadata(kind)) => match kind {
            MetadataKind::WriteTime | MetadataKind::Any => {
                event.paths.iter().map(FsEvent::change).collect()
            }
            _ => Vec::new(),
        },
        EventKind::Modify(_) => event.paths.iter().map(FsEvent::change).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Starts a recursive OS watch on `watch_path` and forwards translated events.
///
/// Backend errors are forwarded as `Err` so the consumer can treat them as fatal.
/// Files that already exist are not reported. The watch lives as long as the
/// returned watcher.
pub fn spawn_fs_watcher(
    watch_path: &Path,
    event_tx: UnboundedSender<notify::Result<FsEvent>>,
) -> Result<RecommendedWatcher, notify::Error> {
    let event_handler = move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for fs_event in translate(&event) {
                let _ = event_tx.send(Ok(fs_event));
            }
        }
        Err(err) => {
            let _ = event_tx.send(Err(err));
        }
    };

    let mut watcher = RecommendedWatcher::new(event_handler, Config::default())?;
    watcher.watch(watch_path, RecursiveMode::Recursive)?;

    Ok(watcher)
}
