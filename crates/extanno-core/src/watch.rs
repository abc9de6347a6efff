//! Filesystem change notifications for individual files
//!
//! A [`FileWatcher`] installs a watch on one file and reports every change,
//! creation, deletion or rename that touches it through an [`EventSink`]
//! callback. Callbacks run on the backend's notification thread.
//!
//! [`NotifyWatcher`] is the OS-backed implementation. [`ManualWatcher`]
//! delivers events injected by the caller, so tests never depend on OS
//! watcher timing.

use crate::error::{AnnotationError, AnnotationResult};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecursiveMode, Watcher as _};
use parking_lot::Mutex;
use std::any::Any;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Changed,
    Created,
    Deleted,
    Renamed,
}

/// A change reported for a watched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: PathBuf,
    /// Previous location, for renames.
    pub old_path: Option<PathBuf>,
}

impl FileEvent {
    pub fn new(kind: FileEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            old_path: None,
        }
    }

    pub fn renamed(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            kind: FileEventKind::Renamed,
            path: to.into(),
            old_path: Some(from.into()),
        }
    }

    /// Full paths this event invalidates, rebuilt against the directory the
    /// watch was registered on. For renames the old path comes first.
    pub fn affected_paths(&self, watched_dir: &Path) -> Vec<PathBuf> {
        self.old_path
            .iter()
            .chain(std::iter::once(&self.path))
            .filter_map(|p| p.file_name())
            .map(|name| watched_dir.join(name))
            .collect()
    }

    fn touches(&self, file_name: &OsStr) -> bool {
        self.old_path
            .iter()
            .chain(std::iter::once(&self.path))
            .any(|p| p.file_name().map_or(false, |n| same_file_name(n, file_name)))
    }
}

fn same_file_name(a: &OsStr, b: &OsStr) -> bool {
    if cfg!(windows) {
        a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
    } else {
        a == b
    }
}

/// Receives events for one watched file.
pub type EventSink = Arc<dyn Fn(FileEvent) + Send + Sync>;

/// Keeps a watch alive. Dropping it cancels the watch.
pub struct WatchHandle {
    _inner: std::sync::Mutex<Box<dyn Any + Send>>,
}

impl WatchHandle {
    pub fn new<T: Any + Send>(inner: T) -> Self {
        Self {
            _inner: std::sync::Mutex::new(Box::new(inner)),
        }
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle").finish_non_exhaustive()
    }
}

/// Installs per-file watches.
pub trait FileWatcher: Send + Sync + fmt::Debug {
    fn watch_file(&self, path: &Path, sink: EventSink) -> AnnotationResult<WatchHandle>;
}

/// OS-backed watcher built on `notify`.
///
/// Watches the file's parent directory non-recursively and forwards only the
/// events that touch the file's name.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyWatcher;

impl FileWatcher for NotifyWatcher {
    fn watch_file(&self, path: &Path, sink: EventSink) -> AnnotationResult<WatchHandle> {
        let to_error = |source| AnnotationError::Watch {
            path: path.to_path_buf(),
            source,
        };
        let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
            return Err(to_error(notify::Error::path_not_found()));
        };
        let name = name.to_os_string();
        let fallback = path.to_path_buf();

        let mut watcher = notify::recommended_watcher(
            move |result: notify::Result<notify::Event>| match result {
                Ok(event) => {
                    for file_event in translate_event(event, &fallback) {
                        if file_event.touches(&name) {
                            sink(file_event);
                        }
                    }
                }
                Err(err) => {
                    tracing::debug!(
                        target: "extanno.watch",
                        path = %fallback.display(),
                        error = %err,
                        "watch error, invalidating"
                    );
                    sink(FileEvent::new(FileEventKind::Changed, fallback.clone()));
                }
            },
        )
        .map_err(to_error)?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(to_error)?;

        Ok(WatchHandle::new(watcher))
    }
}

/// Normalize a `notify` event. `watched` stands in for events that carry no
/// usable paths (overflow/rescan).
fn translate_event(event: notify::Event, watched: &Path) -> Vec<FileEvent> {
    if matches!(event.attrs.flag(), Some(notify::event::Flag::Rescan)) || event.paths.is_empty() {
        return match event.kind {
            EventKind::Access(_) => Vec::new(),
            _ => vec![FileEvent::new(FileEventKind::Changed, watched)],
        };
    }

    let each = |kind: FileEventKind, paths: Vec<PathBuf>| -> Vec<FileEvent> {
        paths.into_iter().map(|p| FileEvent::new(kind, p)).collect()
    };

    match event.kind {
        // Reading the file ourselves produces access events.
        EventKind::Access(_) => Vec::new(),
        EventKind::Create(_) => each(FileEventKind::Created, event.paths),
        EventKind::Remove(_) => each(FileEventKind::Deleted, event.paths),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            let mut paths = event.paths.into_iter();
            match (paths.next(), paths.next()) {
                (Some(from), Some(to)) => vec![FileEvent::renamed(from, to)],
                _ => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            each(FileEventKind::Created, event.paths)
        }
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .into_iter()
            .map(|p| FileEvent::renamed(p.clone(), p))
            .collect(),
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => {
            each(FileEventKind::Changed, event.paths)
        }
    }
}

struct ManualWatch {
    path: PathBuf,
    sink: EventSink,
    active: Arc<AtomicBool>,
}

struct ManualGuard(Arc<AtomicBool>);

impl Drop for ManualGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Watcher whose events are injected with [`ManualWatcher::emit`].
#[derive(Clone, Default)]
pub struct ManualWatcher {
    watches: Arc<Mutex<Vec<ManualWatch>>>,
}

impl ManualWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` synchronously to every live watch it touches.
    /// Returns how many watches received it.
    pub fn emit(&self, event: FileEvent) -> usize {
        let sinks: Vec<EventSink> = {
            let mut watches = self.watches.lock();
            watches.retain(|w| w.active.load(Ordering::SeqCst));
            watches
                .iter()
                .filter(|w| {
                    let dir_matches = [Some(&event.path), event.old_path.as_ref()]
                        .into_iter()
                        .flatten()
                        .any(|p| p.parent() == w.path.parent());
                    dir_matches && w.path.file_name().map_or(false, |n| event.touches(n))
                })
                .map(|w| w.sink.clone())
                .collect()
        };
        for sink in &sinks {
            sink(event.clone());
        }
        sinks.len()
    }

    /// Number of watches that have not been cancelled.
    pub fn active_watches(&self) -> usize {
        self.watches
            .lock()
            .iter()
            .filter(|w| w.active.load(Ordering::SeqCst))
            .count()
    }
}

impl fmt::Debug for ManualWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualWatcher")
            .field("active_watches", &self.active_watches())
            .finish()
    }
}

impl FileWatcher for ManualWatcher {
    fn watch_file(&self, path: &Path, sink: EventSink) -> AnnotationResult<WatchHandle> {
        let active = Arc::new(AtomicBool::new(true));
        self.watches.lock().push(ManualWatch {
            path: path.to_path_buf(),
            sink,
            active: active.clone(),
        });
        Ok(WatchHandle::new(ManualGuard(active)))
    }
}
