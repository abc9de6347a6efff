//! Process-wide consolidated annotation map
//!
//! [`GlobalCacheBuilder`] turns every discovered annotation file into one
//! compacted map, reusing the on-disk cache while it is at least as new as
//! the newest source file. [`GlobalAnnotations`] runs a build at most once
//! and publishes the result to all callers.

use crate::config::AnnotationConfig;
use crate::error::{AnnotationError, AnnotationResult};
use crate::file_utils::SourceStat;
use crate::map::AnnotationMap;
use crate::parser::load_annotation_file;
use crate::persist::{self, AnnotationsCache, CacheLock};
use crate::scanner::FolderScanner;
use once_cell::sync::OnceCell;
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

/// Where a built map came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// Reused from the on-disk cache without parsing
    Loaded,
    /// Parsed from source files and written back to disk
    Rebuilt,
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub map: AnnotationMap,
    pub source: CacheSource,
    /// Number of source files parsed (zero when the cache was reused)
    pub parsed_files: usize,
    /// Newest last-write time across all source files
    pub freshest: SystemTime,
}

pub struct GlobalCacheBuilder<'a> {
    config: &'a AnnotationConfig,
}

impl<'a> GlobalCacheBuilder<'a> {
    pub fn new(config: &'a AnnotationConfig) -> Self {
        Self { config }
    }

    /// Scan the configured roots and build from every annotation file found.
    pub fn build(&self) -> AnnotationResult<BuildOutcome> {
        let scanner = FolderScanner::new(self.config);
        let files = scanner.annotation_files();
        if files.is_empty() {
            return Err(AnnotationError::NoAnnotationSources {
                searched: scanner.roots(),
            });
        }
        tracing::debug!(
            target: "extanno.global",
            files = files.len(),
            "discovered annotation files"
        );
        self.build_from_files(&files)
    }

    /// Build from an explicit file list.
    ///
    /// The read/rebuild/save sequence holds the cache lock so concurrent
    /// builders, in this process or another, never race on the cache file.
    pub fn build_from_files(&self, files: &[PathBuf]) -> AnnotationResult<BuildOutcome> {
        if files.is_empty() {
            return Err(AnnotationError::NoAnnotationSources {
                searched: FolderScanner::new(self.config).roots(),
            });
        }

        let freshest = freshest_write_time(files, self.config.max_file_size)?;
        let cache_path = self.config.cache_path()?;
        let _lock = CacheLock::lock_exclusive(&CacheLock::path_for(cache_path))?;

        let outcome = match persist::load(cache_path) {
            Some(cache) if cache.last_write_time >= freshest => {
                tracing::info!(
                    target: "extanno.global",
                    path = %cache_path.display(),
                    members = cache.map.len(),
                    "reusing annotation cache"
                );
                BuildOutcome {
                    map: cache.map,
                    source: CacheSource::Loaded,
                    parsed_files: 0,
                    freshest,
                }
            }
            stale => {
                if stale.is_some() {
                    tracing::info!(
                        target: "extanno.global",
                        path = %cache_path.display(),
                        "annotation cache is older than its sources, rebuilding"
                    );
                }
                let mut map = parse_all(files, self.config.max_file_size)?;
                let removed = map.compact();
                tracing::info!(
                    target: "extanno.global",
                    files = files.len(),
                    members = map.len(),
                    removed,
                    "rebuilt annotation cache"
                );

                let cache = AnnotationsCache {
                    last_write_time: freshest,
                    map,
                };
                if !cache.map.is_empty() {
                    persist::save(cache_path, &cache)?;
                }
                BuildOutcome {
                    map: cache.map,
                    source: CacheSource::Rebuilt,
                    parsed_files: files.len(),
                    freshest,
                }
            }
        };

        if outcome.map.is_empty() {
            return Err(AnnotationError::EmptyAnnotationMap { files: files.len() });
        }
        Ok(outcome)
    }
}

/// Newest last-write time among `files`. Sources that could not be read
/// later (links, oversized files) fail here, before the cache is locked.
pub fn freshest_write_time(files: &[PathBuf], max_file_size: u64) -> AnnotationResult<SystemTime> {
    files
        .iter()
        .try_fold(SystemTime::UNIX_EPOCH, |newest, path| -> AnnotationResult<SystemTime> {
            Ok(newest.max(SourceStat::of(path, max_file_size)?.modified))
        })
}

/// Parse files in parallel, then merge in input order so the result does not
/// depend on scheduling. The first malformed file fails the whole build.
fn parse_all(files: &[PathBuf], max_file_size: u64) -> AnnotationResult<AnnotationMap> {
    let maps: Vec<AnnotationMap> = files
        .par_iter()
        .map(|path| load_annotation_file(path, max_file_size))
        .collect::<AnnotationResult<_>>()?;

    let mut merged = AnnotationMap::new();
    for map in &maps {
        merged.merge(map);
    }
    Ok(merged)
}

type MapFactory = Box<dyn Fn() -> AnnotationResult<AnnotationMap> + Send + Sync>;

/// Outcome of a failed build, kept so later callers see the same failure
/// without rebuilding.
#[derive(Debug, Clone)]
enum FatalBuild {
    MissingData(Vec<PathBuf>),
    Failed(Arc<AnnotationError>),
}

impl FatalBuild {
    /// Missing data stays distinguishable; everything else is reported as a
    /// failed build wrapping the cause.
    fn from_error(err: AnnotationError) -> Self {
        match err {
            AnnotationError::NoAnnotationSources { searched } => FatalBuild::MissingData(searched),
            AnnotationError::GlobalCacheBuild { source } => FatalBuild::Failed(source),
            other => FatalBuild::Failed(Arc::new(other)),
        }
    }

    fn to_error(&self) -> AnnotationError {
        match self {
            FatalBuild::MissingData(searched) => AnnotationError::NoAnnotationSources {
                searched: searched.clone(),
            },
            FatalBuild::Failed(source) => AnnotationError::GlobalCacheBuild {
                source: source.clone(),
            },
        }
    }
}

/// Single-flight owner of the consolidated map.
///
/// The first caller of [`get`](Self::get) runs the factory while concurrent
/// callers block. The outcome, map or failure, is settled for the lifetime of
/// the instance; the factory never runs twice.
pub struct GlobalAnnotations {
    factory: MapFactory,
    map: OnceCell<Result<Arc<AnnotationMap>, FatalBuild>>,
    builds: AtomicUsize,
}

impl GlobalAnnotations {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> AnnotationResult<AnnotationMap> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            map: OnceCell::new(),
            builds: AtomicUsize::new(0),
        }
    }

    /// Build from disk using `config`.
    pub fn from_config(config: AnnotationConfig) -> Self {
        Self::new(move || GlobalCacheBuilder::new(&config).build().map(|outcome| outcome.map))
    }

    /// Already-published map, for hosts and tests that bring their own data.
    pub fn from_map(map: AnnotationMap) -> Self {
        let this = Self::new(|| Ok(AnnotationMap::new()));
        let _ = this.map.set(Ok(Arc::new(map)));
        this
    }

    /// The instance shared by every resolver in this process, built from the
    /// default configuration.
    pub fn shared() -> Arc<GlobalAnnotations> {
        static SHARED: OnceLock<Arc<GlobalAnnotations>> = OnceLock::new();
        SHARED
            .get_or_init(|| Arc::new(Self::from_config(AnnotationConfig::default())))
            .clone()
    }

    /// The consolidated map, building it on first use. A failed build is
    /// reported again to every later caller.
    pub fn get(&self) -> AnnotationResult<&Arc<AnnotationMap>> {
        let settled = self.map.get_or_init(|| {
            self.builds.fetch_add(1, Ordering::SeqCst);
            (self.factory)().map(Arc::new).map_err(|err| {
                let fatal = FatalBuild::from_error(err);
                tracing::error!(
                    target: "extanno.global",
                    error = %fatal.to_error(),
                    "annotation cache unavailable"
                );
                fatal
            })
        });
        settled.as_ref().map_err(FatalBuild::to_error)
    }

    /// Whether a map has been published.
    pub fn is_initialized(&self) -> bool {
        matches!(self.map.get(), Some(Ok(_)))
    }

    /// Whether the build ran and failed.
    pub fn has_failed(&self) -> bool {
        matches!(self.map.get(), Some(Err(_)))
    }

    /// How many times the factory has run.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for GlobalAnnotations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalAnnotations")
            .field("initialized", &self.is_initialized())
            .field("failed", &self.has_failed())
            .field("builds", &self.build_count())
            .finish()
    }
}
