//! Guarded access to annotation source files
//!
//! Annotation XML lives in directories this crate does not own. A source is
//! inspected without following links before it is timestamped or read.

use crate::error::{AnnotationError, AnnotationResult};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// Default maximum annotation file size (64 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Size and last write time of an annotation source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStat {
    pub len: u64,
    pub modified: SystemTime,
}

impl SourceStat {
    /// Stat `path`, accepting only regular files of at most `max_size` bytes.
    pub fn of(path: &Path, max_size: u64) -> AnnotationResult<Self> {
        let read_error = |source| AnnotationError::FileRead {
            path: path.to_path_buf(),
            source,
        };
        let meta = fs::symlink_metadata(path).map_err(read_error)?;
        let kind = meta.file_type();
        if kind.is_symlink() {
            return Err(AnnotationError::FileSymlink {
                path: path.to_path_buf(),
            });
        }
        if !kind.is_file() {
            return Err(AnnotationError::FileNotRegular {
                path: path.to_path_buf(),
            });
        }
        match meta.len() {
            len if len > max_size => Err(AnnotationError::FileTooBig {
                path: path.to_path_buf(),
                size: len,
                limit: max_size,
            }),
            len => Ok(Self {
                len,
                modified: meta.modified().map_err(read_error)?,
            }),
        }
    }
}

/// Contents of the annotation source at `path`, checked with [`SourceStat::of`].
pub fn read_source(path: &Path, max_size: u64) -> AnnotationResult<String> {
    SourceStat::of(path, max_size)?;
    fs::read_to_string(path).map_err(|source| AnnotationError::FileRead {
        path: path.to_path_buf(),
        source,
    })
}
