//! Host-facing view of the symbols being analyzed
//!
//! The engine never inspects source code. Hosts describe each symbol through
//! [`Symbol`] and map assemblies to their on-disk binaries through
//! [`Compilation`].

use crate::map::{AnnotationMap, MemberKind};
use std::collections::HashMap;
use std::path::PathBuf;

/// A field, property, method (return value) or parameter under analysis.
pub trait Symbol {
    /// Documentation comment id, e.g. `M:N.C.Foo(System.String)`. For a
    /// parameter this is the id of the containing member.
    fn documentation_id(&self) -> Option<String>;

    /// Parameter name when the symbol is a parameter.
    fn parameter_name(&self) -> Option<&str> {
        None
    }

    /// Name of the assembly that declares the symbol.
    fn containing_assembly(&self) -> Option<&str>;
}

/// The compilation a symbol was found in.
pub trait Compilation {
    /// On-disk binary backing the metadata reference for `assembly`, if the
    /// assembly comes from a file at all.
    fn reference_path(&self, assembly: &str) -> Option<PathBuf>;
}

/// A symbol reduced to what an [`AnnotationMap`] lookup needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolQuery {
    pub kind: MemberKind,
    pub key: String,
    pub parameter: Option<String>,
}

impl SymbolQuery {
    pub fn from_symbol(symbol: &dyn Symbol) -> Option<Self> {
        let id = symbol.documentation_id()?;
        let (kind, key) = MemberKind::split_documentation_id(&id);
        Some(Self {
            kind,
            key: key.to_string(),
            parameter: symbol.parameter_name().map(str::to_string),
        })
    }

    pub fn is_parameter(&self) -> bool {
        self.parameter.is_some()
    }

    pub fn matches(&self, map: &AnnotationMap, applies_to_item: bool) -> bool {
        map.contains(
            &self.key,
            self.kind,
            self.parameter.as_deref(),
            applies_to_item,
        )
    }
}

/// Plain-data [`Symbol`] for hosts that already have ids at hand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolRef {
    pub documentation_id: Option<String>,
    pub parameter_name: Option<String>,
    pub assembly: Option<String>,
}

impl SymbolRef {
    pub fn member(documentation_id: impl Into<String>) -> Self {
        Self {
            documentation_id: Some(documentation_id.into()),
            ..Self::default()
        }
    }

    pub fn parameter(member_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            documentation_id: Some(member_id.into()),
            parameter_name: Some(name.into()),
            assembly: None,
        }
    }

    pub fn in_assembly(mut self, assembly: impl Into<String>) -> Self {
        self.assembly = Some(assembly.into());
        self
    }
}

impl Symbol for SymbolRef {
    fn documentation_id(&self) -> Option<String> {
        self.documentation_id.clone()
    }

    fn parameter_name(&self) -> Option<&str> {
        self.parameter_name.as_deref()
    }

    fn containing_assembly(&self) -> Option<&str> {
        self.assembly.as_deref()
    }
}

/// Assembly name to binary path table.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    paths: HashMap<String, PathBuf>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reference(mut self, assembly: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.paths.insert(assembly.into(), path.into());
        self
    }
}

impl Compilation for ReferenceTable {
    fn reference_path(&self, assembly: &str) -> Option<PathBuf> {
        self.paths.get(assembly).cloned()
    }
}
