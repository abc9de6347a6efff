//! On-disk annotation cache
//!
//! A single bincode file holding a versioned header, the freshness timestamp
//! and the compacted member table sorted by key. Anything that fails to read
//! or decode is a cache miss; only writing can fail the caller.

use crate::error::{AnnotationError, AnnotationResult};
use crate::map::{AnnotationMap, MemberNullabilityInfo};
use bincode::Options;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::SystemTime;

/// Version of the on-disk cache layout. Bump when `PersistedCache` changes.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Corrupted length prefixes must not turn into huge allocations.
pub const CACHE_PAYLOAD_LIMIT_BYTES: u64 = 256 * 1024 * 1024;

/// The persisted unit: a compacted map and the newest source timestamp it
/// was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationsCache {
    pub last_write_time: SystemTime,
    pub map: AnnotationMap,
}

#[derive(Serialize)]
struct PersistedCache<'a> {
    schema_version: u32,
    tool_version: &'a str,
    last_write_time: SystemTime,
    members: Vec<(&'a String, &'a MemberNullabilityInfo)>,
}

#[derive(Deserialize)]
struct PersistedCacheOwned {
    schema_version: u32,
    tool_version: String,
    last_write_time: SystemTime,
    members: Vec<(String, MemberNullabilityInfo)>,
}

fn bincode_options() -> impl bincode::Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(CACHE_PAYLOAD_LIMIT_BYTES)
}

pub fn encode(cache: &AnnotationsCache) -> AnnotationResult<Vec<u8>> {
    let persisted = PersistedCache {
        schema_version: CACHE_SCHEMA_VERSION,
        tool_version: TOOL_VERSION,
        last_write_time: cache.last_write_time,
        members: cache.map.sorted_entries(),
    };
    Ok(bincode_options().serialize(&persisted)?)
}

/// Decode a cache file's bytes. `None` if the bytes are corrupt or were
/// written by an incompatible version.
pub fn decode(bytes: &[u8]) -> Option<AnnotationsCache> {
    let persisted: PersistedCacheOwned = match bincode_options().deserialize(bytes) {
        Ok(persisted) => persisted,
        Err(err) => {
            tracing::debug!(target: "extanno.persist", error = %err, "failed to decode cache");
            return None;
        }
    };

    if persisted.schema_version != CACHE_SCHEMA_VERSION || persisted.tool_version != TOOL_VERSION {
        tracing::debug!(
            target: "extanno.persist",
            schema_version = persisted.schema_version,
            tool_version = %persisted.tool_version,
            "ignoring cache written by another version"
        );
        return None;
    }

    Some(AnnotationsCache {
        last_write_time: persisted.last_write_time,
        map: persisted.members.into_iter().collect(),
    })
}

/// Load the cache at `path`, treating every failure as a miss.
///
/// Files that exist but cannot be decoded are removed best-effort.
pub fn load(path: &Path) -> Option<AnnotationsCache> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::debug!(
                    target: "extanno.persist",
                    path = %path.display(),
                    error = %err,
                    "failed to stat cache file"
                );
            }
            return None;
        }
    };
    if meta.file_type().is_symlink() || !meta.is_file() || meta.len() > CACHE_PAYLOAD_LIMIT_BYTES {
        remove_file_best_effort(path, "load.invalid_file");
        return None;
    }

    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::debug!(
                target: "extanno.persist",
                path = %path.display(),
                error = %err,
                "failed to read cache file"
            );
            return None;
        }
    };

    let cache = decode(&bytes);
    if cache.is_none() {
        remove_file_best_effort(path, "load.decode");
    }
    cache
}

/// Persist `cache` at `path`, creating the parent directory and replacing
/// any previous file atomically.
pub fn save(path: &Path, cache: &AnnotationsCache) -> AnnotationResult<()> {
    let bytes = encode(cache)?;
    atomic_write(path, &bytes).map_err(|source| AnnotationError::FileWrite {
        path: path.to_path_buf(),
        source,
    })
}

fn remove_file_best_effort(path: &Path, reason: &'static str) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::debug!(
                target: "extanno.persist",
                path = %path.display(),
                reason,
                error = %err,
                "failed to remove cache file"
            );
        }
    }
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        Some(_) => Path::new("."),
        None => return Err(io::Error::other("path has no parent")),
    };
    fs::create_dir_all(parent)?;

    let (tmp_path, mut file) = open_unique_tmp_file(path, parent)?;
    let written = file.write_all(bytes).and_then(|()| file.sync_all());
    drop(file);

    let result = written.and_then(|()| fs::rename(&tmp_path, path));
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;
    let pid = std::process::id();

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!(".tmp.{pid}.{counter}"));
        let tmp_path = parent.join(tmp_name);

        match OpenOptions::new().write(true).create_new(true).open(&tmp_path) {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Exclusive lock serializing the read/rebuild/save sequence on a cache file,
/// across threads and across processes.
///
/// Released when dropped.
#[derive(Debug)]
pub struct CacheLock {
    file: File,
    // fs2 locks are per process on Unix and do not exclude sibling threads.
    _guard: MutexGuard<'static, ()>,
}

impl CacheLock {
    /// Lock file guarding `cache_path`.
    pub fn path_for(cache_path: &Path) -> PathBuf {
        let mut name = cache_path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Block until the lock at `path` is held, creating the file if needed.
    pub fn lock_exclusive(path: &Path) -> AnnotationResult<Self> {
        let to_error = |source| AnnotationError::CacheLock {
            path: path.to_path_buf(),
            source,
        };

        let guard = process_lock_for_path(path)
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(to_error)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(to_error)?;
        file.lock_exclusive().map_err(to_error)?;

        Ok(Self {
            file,
            _guard: guard,
        })
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn process_lock_for_path(path: &Path) -> &'static Mutex<()> {
    static PROCESS_LOCKS: OnceLock<Mutex<HashMap<PathBuf, &'static Mutex<()>>>> = OnceLock::new();
    let locks = PROCESS_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));

    let mut map = locks
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(existing) = map.get(path) {
        return existing;
    }

    let mutex: &'static Mutex<()> = Box::leak(Box::new(Mutex::new(())));
    map.insert(path.to_path_buf(), mutex);
    mutex
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::MemberKind;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn sample_cache() -> AnnotationsCache {
        let mut map = AnnotationMap::new();
        let foo = map.member_mut("N.C.Foo", MemberKind::Method).unwrap();
        foo.has_nullability_defined = true;
        foo.set_parameter("x");
        map.member_mut("N.C.Name", MemberKind::Property)
            .unwrap()
            .has_nullability_defined = true;
        AnnotationsCache {
            last_write_time: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            map,
        }
    }

    #[test]
    fn test_save_then_load_answers_identically() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/dir/cache.bin");
        let cache = sample_cache();

        save(&path, &cache).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded, cache);
        assert!(loaded.map.contains("N.C.Foo", MemberKind::Method, Some("x"), false));
        assert!(!loaded.map.contains("N.C.Foo", MemberKind::Method, Some("y"), false));
        assert!(loaded.map.contains("N.C.Name", MemberKind::Property, None, false));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let cache = sample_cache();
        assert_eq!(encode(&cache).unwrap(), encode(&cache.clone()).unwrap());
    }

    #[test]
    fn test_missing_file_is_a_miss() {
        let temp = TempDir::new().unwrap();
        assert!(load(&temp.path().join("absent.bin")).is_none());
    }

    #[test]
    fn test_corrupt_file_is_a_miss_and_removed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache.bin");
        fs::write(&path, b"definitely not bincode").unwrap();

        assert!(load(&path).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_truncated_file_is_a_miss() {
        let bytes = encode(&sample_cache()).unwrap();
        assert!(decode(&bytes[..bytes.len() / 2]).is_none());
    }

    #[test]
    fn test_other_schema_version_is_a_miss() {
        let persisted = PersistedCache {
            schema_version: CACHE_SCHEMA_VERSION + 1,
            tool_version: TOOL_VERSION,
            last_write_time: SystemTime::UNIX_EPOCH,
            members: Vec::new(),
        };
        let bytes = bincode_options().serialize(&persisted).unwrap();
        assert!(decode(&bytes).is_none());
    }

    #[test]
    fn test_save_overwrites_previous_cache() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache.bin");
        save(&path, &sample_cache()).unwrap();

        let replacement = AnnotationsCache {
            last_write_time: SystemTime::UNIX_EPOCH,
            map: AnnotationMap::new(),
        };
        save(&path, &replacement).unwrap();

        assert_eq!(load(&path).unwrap(), replacement);
        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_lock_path_is_sibling() {
        let lock = CacheLock::path_for(Path::new("/data/extanno/cache.bin"));
        assert_eq!(lock, PathBuf::from("/data/extanno/cache.bin.lock"));
    }

    #[test]
    fn test_cache_lock_excludes_threads() {
        let temp = TempDir::new().unwrap();
        let lock_path = Arc::new(temp.path().join("cache.bin.lock"));
        let holders = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock_path = lock_path.clone();
                let holders = holders.clone();
                std::thread::spawn(move || {
                    let _lock = CacheLock::lock_exclusive(&lock_path).unwrap();
                    assert_eq!(holders.fetch_add(1, Ordering::SeqCst), 0);
                    std::thread::sleep(Duration::from_millis(5));
                    holders.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
