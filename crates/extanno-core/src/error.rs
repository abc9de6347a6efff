//! Error types for annotation resolution and caching

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub type AnnotationResult<T> = Result<T, AnnotationError>;

/// Errors produced while reading, parsing, caching or watching annotation data.
#[derive(Error, Debug)]
pub enum AnnotationError {
    #[error("Failed to read file: {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing to read symlink: {path}")]
    FileSymlink { path: PathBuf },

    #[error("Not a regular file: {path}")]
    FileNotRegular { path: PathBuf },

    #[error("File too large: {path} ({size} bytes, limit {limit} bytes)")]
    FileTooBig { path: PathBuf, size: u64, limit: u64 },

    #[error("Failed to write file: {path}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed annotation XML in {path}")]
    Xml {
        path: PathBuf,
        #[source]
        source: roxmltree::Error,
    },

    #[error("Failed to encode annotation cache")]
    Encode(#[from] bincode::Error),

    #[error("Failed to lock annotation cache: {path}")]
    CacheLock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to watch {path}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("Failed to parse config file: {path}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Could not determine a location for the annotation cache file")]
    NoCacheLocation,

    #[error(
        "No external annotation files were found (searched {}). Install the annotation data or configure its location.",
        display_paths(.searched)
    )]
    NoAnnotationSources { searched: Vec<PathBuf> },

    #[error("External annotation data was found in {files} file(s) but produced no usable entries")]
    EmptyAnnotationMap { files: usize },

    #[error("External annotation data was found but building the annotation cache failed")]
    GlobalCacheBuild {
        #[source]
        source: Arc<AnnotationError>,
    },
}

impl AnnotationError {
    /// Whether this error means no annotation data is installed, as opposed
    /// to data that exists but could not be processed.
    pub fn is_missing_data(&self) -> bool {
        matches!(self, AnnotationError::NoAnnotationSources { .. })
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "no roots".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
