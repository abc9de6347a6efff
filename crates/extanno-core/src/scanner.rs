//! Annotation folder discovery
//!
//! Layout searched under each root:
//!
//! ```text
//! <root>/<prefix><NN>_<suffix>/<builtin_dir>/**/*.xml
//! <root>/<prefix><NN>_<suffix>/<extensions_dir>/<extension>/<extension_annotations_dir>/**/*.xml
//! ```

use crate::config::AnnotationConfig;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Who shipped an annotation set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AnnotationCategory {
    /// Shipped with the tool itself
    BuiltIn,
    /// Shipped by a third-party extension
    Extension,
}

/// Which installations root a folder was found under
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstallScope {
    System,
    User,
}

/// A folder that may contain annotation XML files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationFolder {
    pub category: AnnotationCategory,
    pub scope: InstallScope,
    pub version: u32,
    pub path: PathBuf,
}

pub struct FolderScanner<'a> {
    config: &'a AnnotationConfig,
}

impl<'a> FolderScanner<'a> {
    pub fn new(config: &'a AnnotationConfig) -> Self {
        Self { config }
    }

    /// Configured installation roots, whether or not they exist.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.scoped_roots()
            .into_iter()
            .map(|(_, root)| root.to_path_buf())
            .collect()
    }

    fn scoped_roots(&self) -> Vec<(InstallScope, &'a Path)> {
        let mut roots = Vec::new();
        if let Some(root) = self.config.system_root.as_deref() {
            roots.push((InstallScope::System, root));
        }
        if let Some(root) = self.config.user_root.as_deref() {
            roots.push((InstallScope::User, root));
        }
        roots
    }

    /// All existing annotation folders, sorted by category, then scope, then
    /// version. Later entries are more specific.
    pub fn folders(&self) -> Vec<AnnotationFolder> {
        let mut folders = Vec::new();

        for (scope, root) in self.scoped_roots() {
            for (version, version_dir) in self.version_dirs(root) {
                let builtin = version_dir.join(&self.config.builtin_dir);
                if builtin.is_dir() {
                    folders.push(AnnotationFolder {
                        category: AnnotationCategory::BuiltIn,
                        scope,
                        version,
                        path: builtin,
                    });
                }

                for extension in subdirectories(&version_dir.join(&self.config.extensions_dir)) {
                    let annotations = extension.join(&self.config.extension_annotations_dir);
                    if annotations.is_dir() {
                        folders.push(AnnotationFolder {
                            category: AnnotationCategory::Extension,
                            scope,
                            version,
                            path: annotations,
                        });
                    }
                }
            }
        }

        folders.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then_with(|| a.scope.cmp(&b.scope))
                .then_with(|| a.version.cmp(&b.version))
                .then_with(|| a.path.cmp(&b.path))
        });
        folders
    }

    fn version_dirs(&self, root: &Path) -> Vec<(u32, PathBuf)> {
        subdirectories(root)
            .into_iter()
            .filter_map(|dir| {
                let name = dir.file_name()?.to_str()?;
                let version =
                    parse_tool_version(name, &self.config.version_prefix, self.config.min_version)?;
                Some((version, dir))
            })
            .collect()
    }

    /// Every annotation XML file under every discovered folder, in folder
    /// order, with duplicate paths removed.
    pub fn annotation_files(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for folder in self.folders() {
            let mut in_folder: Vec<PathBuf> = WalkDir::new(&folder.path)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| is_xml_file(path))
                .collect();
            in_folder.sort();

            for path in in_folder {
                if seen.insert(path_identity(&path)) {
                    files.push(path);
                }
            }
        }

        files
    }
}

/// Parse `<prefix><NN>...` and return `NN` if it is at least `min_version`.
pub fn parse_tool_version(name: &str, prefix: &str, min_version: u32) -> Option<u32> {
    let rest = name.strip_prefix(prefix)?;
    let digits = rest.get(..2)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let version: u32 = digits.parse().ok()?;
    (version >= min_version).then_some(version)
}

fn subdirectories(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(
                    target: "extanno.scanner",
                    path = %dir.display(),
                    error = %err,
                    "failed to list directory"
                );
            }
            return Vec::new();
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    dirs
}

fn is_xml_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("xml"))
}

/// Identity of a path under the host's comparison rules.
pub(crate) fn path_identity(path: &Path) -> String {
    let text = path.to_string_lossy();
    if cfg!(windows) {
        text.to_lowercase()
    } else {
        text.into_owned()
    }
}
