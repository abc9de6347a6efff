//! # extanno-core
//!
//! Resolution and caching engine for external nullability annotations.
//!
//! Answers one question per analyzed symbol: is nullability for it already
//! declared in an external annotation file? Sources are:
//! - Built-in and extension annotation sets under the tool installation roots
//! - Side-by-side `<Assembly>.ExternalAnnotations.xml` files next to referenced binaries
//!
//! Installation annotations are consolidated into one compacted map, persisted
//! to disk and rebuilt only when a source file is newer than the stored copy.
//! Side-by-side files are cached per path and evicted on filesystem changes.

pub mod config;
pub mod error;
pub mod file_utils;
pub mod global;
pub mod map;
pub mod parser;
pub mod persist;
pub mod resolver;
pub mod scanner;
pub mod side_by_side;
pub mod symbol;
pub mod watch;

pub use config::AnnotationConfig;
pub use error::{AnnotationError, AnnotationResult};
pub use global::{BuildOutcome, CacheSource, GlobalAnnotations, GlobalCacheBuilder};
pub use map::{AnnotationMap, MemberKind, MemberNullabilityInfo};
pub use parser::{load_annotation_file, parse_annotations};
pub use persist::AnnotationsCache;
pub use resolver::{
    AnnotationResolver, CachingAnnotationResolver, GlobalAnnotationResolver,
    MapAnnotationResolver,
};
pub use scanner::{AnnotationCategory, AnnotationFolder, FolderScanner, InstallScope};
pub use side_by_side::{SideBySideCache, SideBySideStats};
pub use symbol::{Compilation, ReferenceTable, Symbol, SymbolQuery, SymbolRef};
pub use watch::{FileEvent, FileEventKind, FileWatcher, ManualWatcher, NotifyWatcher};

/// Resolver for the current process: installation annotations from the
/// default locations plus side-by-side files, watched through the OS.
pub fn default_resolver() -> CachingAnnotationResolver {
    CachingAnnotationResolver::new(GlobalAnnotations::shared(), &AnnotationConfig::default())
}
