//! Per-assembly annotation files
//!
//! A referenced assembly may ship `<Name>.ExternalAnnotations.xml` next to its
//! binary. Each such file is parsed on first use and cached by path, with a
//! filesystem watch attached. Any change, creation, deletion or rename of the
//! file evicts its entry; the next lookup parses it again. There is no other
//! refresh path.

use crate::error::AnnotationResult;
use crate::map::AnnotationMap;
use crate::parser::load_annotation_file;
use crate::scanner::path_identity;
use crate::watch::{EventSink, FileEvent, FileWatcher, WatchHandle};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

struct CacheEntry {
    map: Arc<AnnotationMap>,
    _watch: WatchHandle,
}

#[derive(Default)]
struct Inner {
    entries: DashMap<String, Arc<CacheEntry>>,
    // Evicted entries wait here until the next lookup: watch handles must not
    // be dropped on their own notification thread.
    retired: Mutex<Vec<Arc<CacheEntry>>>,
    parses: AtomicUsize,
    evictions: AtomicUsize,
}

impl Inner {
    fn evict(&self, path: &Path) -> bool {
        let Some((_, entry)) = self.entries.remove(&path_identity(path)) else {
            return false;
        };
        self.evictions.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            target: "extanno.side_by_side",
            path = %path.display(),
            "evicted side-by-side annotations"
        );
        self.retired.lock().push(entry);
        true
    }

    fn release_retired(&self) {
        let retired = std::mem::take(&mut *self.retired.lock());
        drop(retired);
    }
}

/// Counters for a [`SideBySideCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SideBySideStats {
    /// Files parsed, including re-parses after eviction
    pub parses: usize,
    /// Entries evicted by filesystem notifications or [`SideBySideCache::evict`]
    pub evictions: usize,
    /// Entries currently cached
    pub cached: usize,
}

/// Path-keyed cache of side-by-side annotation maps.
pub struct SideBySideCache {
    inner: Arc<Inner>,
    watcher: Arc<dyn FileWatcher>,
    max_file_size: u64,
}

impl SideBySideCache {
    pub fn new(watcher: Arc<dyn FileWatcher>, max_file_size: u64) -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            watcher,
            max_file_size,
        }
    }

    /// Annotations in the file at `path`, parsing it if it is not cached.
    ///
    /// The watch is installed before the file is read, so a write landing
    /// while the file is parsed still evicts the new entry. Two threads
    /// missing on the same path may both parse; the later insert wins and the
    /// other entry is discarded.
    pub fn get_or_load(&self, path: &Path) -> AnnotationResult<Arc<AnnotationMap>> {
        self.inner.release_retired();

        let key = path_identity(path);
        if let Some(entry) = self.inner.entries.get(&key) {
            return Ok(entry.map.clone());
        }

        let touched = Arc::new(AtomicBool::new(false));
        let watch = match self
            .watcher
            .watch_file(path, eviction_sink(&self.inner, path, touched.clone()))
        {
            Ok(watch) => Some(watch),
            Err(err) => {
                // Without a watch the entry could never be invalidated.
                tracing::warn!(
                    target: "extanno.side_by_side",
                    path = %path.display(),
                    error = %err,
                    "cannot watch side-by-side annotations, serving uncached"
                );
                None
            }
        };

        let map = Arc::new(load_annotation_file(path, self.max_file_size)?);
        self.inner.parses.fetch_add(1, Ordering::Relaxed);

        let Some(watch) = watch else {
            return Ok(map);
        };
        let entry = Arc::new(CacheEntry {
            map: map.clone(),
            _watch: watch,
        });
        if let Some(previous) = self.inner.entries.insert(key.clone(), entry.clone()) {
            self.inner.retired.lock().push(previous);
        }
        // An event delivered before the insert found nothing to evict.
        if touched.load(Ordering::SeqCst) {
            let removed = self
                .inner
                .entries
                .remove_if(&key, |_, current| Arc::ptr_eq(current, &entry));
            if removed.is_some() {
                self.inner.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(map)
    }

    /// Drop the entry for `path` if present.
    pub fn evict(&self, path: &Path) -> bool {
        self.inner.evict(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.inner.entries.contains_key(&path_identity(path))
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn stats(&self) -> SideBySideStats {
        SideBySideStats {
            parses: self.inner.parses.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            cached: self.inner.entries.len(),
        }
    }
}

impl std::fmt::Debug for SideBySideCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SideBySideCache")
            .field("stats", &self.stats())
            .field("watcher", &self.watcher)
            .finish()
    }
}

/// Callback that evicts every path a notification touches, rebuilt against
/// the directory the watch was registered on. `touched` records that an
/// event arrived, for loads still in flight.
fn eviction_sink(inner: &Arc<Inner>, path: &Path, touched: Arc<AtomicBool>) -> EventSink {
    let inner: Weak<Inner> = Arc::downgrade(inner);
    let watched_dir: PathBuf = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Arc::new(move |event: FileEvent| {
        touched.store(true, Ordering::SeqCst);
        let Some(inner) = inner.upgrade() else {
            return;
        };
        for affected in event.affected_paths(&watched_dir) {
            inner.evict(&affected);
        }
    })
}
