//! Lookup interface handed to analyzers
//!
//! Hosts pick one [`AnnotationResolver`] at construction time:
//!
//! - [`GlobalAnnotationResolver`] answers from the consolidated installation map only
//! - [`MapAnnotationResolver`] wraps a map the host already has
//! - [`CachingAnnotationResolver`] adds side-by-side files next to referenced assemblies

use crate::config::AnnotationConfig;
use crate::error::{AnnotationError, AnnotationResult};
use crate::global::GlobalAnnotations;
use crate::map::AnnotationMap;
use crate::side_by_side::SideBySideCache;
use crate::symbol::{Compilation, Symbol, SymbolQuery};
use crate::watch::{FileWatcher, NotifyWatcher};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Answers whether nullability for a symbol is already declared externally.
pub trait AnnotationResolver: Send + Sync {
    /// Build the consolidated map now instead of on the first lookup.
    fn ensure_scanned(&self) -> AnnotationResult<()>;

    /// Whether `symbol` carries an external not-null or can-be-null
    /// annotation. `applies_to_item` asks about the element type of a
    /// collection, which the annotation format cannot express.
    fn has_annotation_for_symbol(
        &self,
        symbol: &dyn Symbol,
        applies_to_item: bool,
        compilation: &dyn Compilation,
    ) -> AnnotationResult<bool>;
}

/// Resolver backed by the consolidated installation map.
#[derive(Debug, Clone)]
pub struct GlobalAnnotationResolver {
    global: Arc<GlobalAnnotations>,
}

impl GlobalAnnotationResolver {
    pub fn new(global: Arc<GlobalAnnotations>) -> Self {
        Self { global }
    }

    /// Resolver over the process-wide map.
    pub fn shared() -> Self {
        Self::new(GlobalAnnotations::shared())
    }
}

impl AnnotationResolver for GlobalAnnotationResolver {
    fn ensure_scanned(&self) -> AnnotationResult<()> {
        self.global.get().map(|_| ())
    }

    fn has_annotation_for_symbol(
        &self,
        symbol: &dyn Symbol,
        applies_to_item: bool,
        _compilation: &dyn Compilation,
    ) -> AnnotationResult<bool> {
        let map = self.global.get()?;
        Ok(SymbolQuery::from_symbol(symbol).is_some_and(|query| query.matches(map, applies_to_item)))
    }
}

/// Resolver over a fixed map.
#[derive(Debug, Clone)]
pub struct MapAnnotationResolver {
    map: Arc<AnnotationMap>,
}

impl MapAnnotationResolver {
    pub fn new(map: impl Into<Arc<AnnotationMap>>) -> Self {
        Self { map: map.into() }
    }
}

impl AnnotationResolver for MapAnnotationResolver {
    fn ensure_scanned(&self) -> AnnotationResult<()> {
        Ok(())
    }

    fn has_annotation_for_symbol(
        &self,
        symbol: &dyn Symbol,
        applies_to_item: bool,
        _compilation: &dyn Compilation,
    ) -> AnnotationResult<bool> {
        Ok(SymbolQuery::from_symbol(symbol)
            .is_some_and(|query| query.matches(&self.map, applies_to_item)))
    }
}

/// Consolidated map plus per-assembly side-by-side files.
#[derive(Debug)]
pub struct CachingAnnotationResolver {
    global: Arc<GlobalAnnotations>,
    side_by_side: SideBySideCache,
    config: AnnotationConfig,
}

impl CachingAnnotationResolver {
    /// Resolver using OS file notifications.
    pub fn new(global: Arc<GlobalAnnotations>, config: &AnnotationConfig) -> Self {
        Self::with_watcher(global, config, Arc::new(NotifyWatcher))
    }

    pub fn with_watcher(
        global: Arc<GlobalAnnotations>,
        config: &AnnotationConfig,
        watcher: Arc<dyn FileWatcher>,
    ) -> Self {
        Self {
            global,
            side_by_side: SideBySideCache::new(watcher, config.max_file_size),
            config: config.clone(),
        }
    }

    /// Side-by-side annotation file for the assembly declaring `symbol`, if
    /// the assembly is backed by a binary on disk and the file exists.
    pub fn path_or_none(&self, symbol: &dyn Symbol, compilation: &dyn Compilation) -> Option<PathBuf> {
        let assembly = symbol.containing_assembly()?;
        let binary = compilation.reference_path(assembly)?;
        let candidate = binary.with_file_name(self.config.side_by_side_file_name(&binary)?);
        candidate.is_file().then_some(candidate)
    }

    pub fn side_by_side(&self) -> &SideBySideCache {
        &self.side_by_side
    }
}

impl AnnotationResolver for CachingAnnotationResolver {
    fn ensure_scanned(&self) -> AnnotationResult<()> {
        self.global.get().map(|_| ())
    }

    fn has_annotation_for_symbol(
        &self,
        symbol: &dyn Symbol,
        applies_to_item: bool,
        compilation: &dyn Compilation,
    ) -> AnnotationResult<bool> {
        let global = self.global.get()?;
        let Some(query) = SymbolQuery::from_symbol(symbol) else {
            return Ok(false);
        };
        if applies_to_item {
            return Ok(false);
        }
        if query.matches(global, false) {
            return Ok(true);
        }

        let Some(path) = self.path_or_none(symbol, compilation) else {
            return Ok(false);
        };
        // The file may vanish between the existence check and the read.
        let local = match self.side_by_side.get_or_load(&path) {
            Ok(local) => local,
            Err(AnnotationError::FileRead { source, .. })
                if source.kind() == io::ErrorKind::NotFound =>
            {
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        Ok(query.matches(&local, false))
    }
}
