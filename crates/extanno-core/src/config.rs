//! Engine configuration

use crate::error::{AnnotationError, AnnotationResult};
use crate::file_utils::DEFAULT_MAX_FILE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "extanno";
const CACHE_FILE_NAME: &str = "external-annotations.bin";
const INSTALLATIONS_DIR: [&str; 2] = ["JetBrains", "Installations"];

/// Where annotation data is discovered and where the consolidated cache lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Machine-wide installations root
    pub system_root: Option<PathBuf>,

    /// Per-user installations root
    pub user_root: Option<PathBuf>,

    /// Name prefix of tool-version folders under each root, followed by a
    /// two-digit version (e.g. `ReSharperPlatformVs17_0a1b2c`)
    pub version_prefix: String,

    /// Lowest supported tool version
    pub min_version: u32,

    /// Built-in annotation folder inside a version folder
    pub builtin_dir: String,

    /// Folder inside a version folder holding one subfolder per extension
    pub extensions_dir: String,

    /// Annotation folder inside each extension folder
    pub extension_annotations_dir: String,

    /// Location of the consolidated on-disk cache
    pub cache_file: Option<PathBuf>,

    /// Suffix appended to an assembly's file stem to find its side-by-side file
    pub side_by_side_suffix: String,

    /// Largest annotation XML file that will be read, in bytes
    pub max_file_size: u64,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            system_root: default_system_root(),
            user_root: dirs::data_local_dir().map(|dir| join_all(dir, &INSTALLATIONS_DIR)),
            version_prefix: "ReSharperPlatformVs".to_string(),
            min_version: 15,
            builtin_dir: "ExternalAnnotations".to_string(),
            extensions_dir: "Extensions".to_string(),
            extension_annotations_dir: "annotations".to_string(),
            cache_file: dirs::data_local_dir().map(|dir| dir.join(APP_DIR).join(CACHE_FILE_NAME)),
            side_by_side_suffix: ".ExternalAnnotations.xml".to_string(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

fn default_system_root() -> Option<PathBuf> {
    std::env::var_os("PROGRAMDATA")
        .filter(|value| !value.is_empty())
        .map(|value| join_all(PathBuf::from(value), &INSTALLATIONS_DIR))
}

fn join_all(base: PathBuf, parts: &[&str]) -> PathBuf {
    parts.iter().fold(base, |path, part| path.join(part))
}

impl AnnotationConfig {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> AnnotationResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| AnnotationError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| AnnotationError::Config {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load config or use default
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path {
            Some(p) => Self::load(p).unwrap_or_else(|err| {
                tracing::warn!(
                    target: "extanno.config",
                    path = %p.display(),
                    error = %err,
                    "ignoring unreadable config, using defaults"
                );
                Self::default()
            }),
            None => Self::default(),
        }
    }

    /// Config rooted entirely under `dir`, used to keep tests and sandboxed
    /// hosts away from the real installation folders.
    pub fn isolated(dir: &Path) -> Self {
        Self {
            system_root: Some(dir.join("system")),
            user_root: Some(dir.join("user")),
            cache_file: Some(dir.join("cache").join(CACHE_FILE_NAME)),
            ..Self::default()
        }
    }

    /// The configured cache file location.
    pub fn cache_path(&self) -> AnnotationResult<&Path> {
        self.cache_file
            .as_deref()
            .ok_or(AnnotationError::NoCacheLocation)
    }

    /// Side-by-side annotation file name for an assembly binary.
    ///
    /// `Foo.Bar.dll` becomes `Foo.Bar.ExternalAnnotations.xml`.
    pub fn side_by_side_file_name(&self, assembly_path: &Path) -> Option<String> {
        let stem = assembly_path.file_stem()?.to_str()?;
        Some(format!("{}{}", stem, self.side_by_side_suffix))
    }
}
