//! In-memory annotation lookup structure
//!
//! Members are keyed by their documentation id with the `X:` kind prefix
//! stripped. The kind is stored next to the facts and checked on lookup, so a
//! type and a method that share a textual id never answer for each other.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Symbol category encoded by the one-letter documentation id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MemberKind {
    /// `T:`
    Type,
    /// `M:`
    Method,
    /// `F:`
    Field,
    /// `E:`
    Event,
    /// `P:`
    Property,
    /// `N:`
    Namespace,
    /// `?` - missing or unrecognized prefix
    #[default]
    Unknown,
}

impl MemberKind {
    pub fn from_tag(tag: char) -> Self {
        match tag {
            'T' => MemberKind::Type,
            'M' => MemberKind::Method,
            'F' => MemberKind::Field,
            'E' => MemberKind::Event,
            'P' => MemberKind::Property,
            'N' => MemberKind::Namespace,
            _ => MemberKind::Unknown,
        }
    }

    pub fn tag(self) -> char {
        match self {
            MemberKind::Type => 'T',
            MemberKind::Method => 'M',
            MemberKind::Field => 'F',
            MemberKind::Event => 'E',
            MemberKind::Property => 'P',
            MemberKind::Namespace => 'N',
            MemberKind::Unknown => '?',
        }
    }

    /// Split a documentation id such as `M:N.C.Foo(System.String)` into its
    /// kind and member key.
    ///
    /// Ids without a `letter + ':'` prefix are returned whole with
    /// [`MemberKind::Unknown`].
    pub fn split_documentation_id(id: &str) -> (MemberKind, &str) {
        let bytes = id.as_bytes();
        if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
            (MemberKind::from_tag(bytes[0] as char), &id[2..])
        } else {
            (MemberKind::Unknown, id)
        }
    }
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Nullability facts recorded for one member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberNullabilityInfo {
    pub kind: MemberKind,
    /// The member itself (a method's return value, a field, a property) is annotated.
    pub has_nullability_defined: bool,
    /// Parameter name to "annotated as not-null or can-be-null".
    pub parameter_nullability: BTreeMap<String, bool>,
}

impl MemberNullabilityInfo {
    pub fn new(kind: MemberKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// An entry that answers `false` to every query.
    pub fn is_empty(&self) -> bool {
        !self.has_nullability_defined && self.parameter_nullability.is_empty()
    }

    pub fn set_parameter(&mut self, name: &str) {
        self.parameter_nullability.insert(name.to_string(), true);
    }

    /// Additively merge `other` into `self`. A fact once set is never cleared.
    pub fn merge(&mut self, other: &MemberNullabilityInfo) {
        self.has_nullability_defined |= other.has_nullability_defined;
        for (name, annotated) in &other.parameter_nullability {
            let slot = self
                .parameter_nullability
                .entry(name.clone())
                .or_insert(false);
            *slot |= *annotated;
        }
    }
}

/// Member key to nullability facts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationMap {
    members: HashMap<String, MemberNullabilityInfo>,
}

impl AnnotationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&MemberNullabilityInfo> {
        self.members.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MemberNullabilityInfo)> {
        self.members.iter()
    }

    /// Entry to merge facts into for `key`.
    ///
    /// Returns `None` when `key` is already held by a different kind that
    /// carries facts; the first kind keeps the key. An existing entry with no
    /// facts is retagged to `kind`.
    pub fn member_mut(&mut self, key: &str, kind: MemberKind) -> Option<&mut MemberNullabilityInfo> {
        if !self.members.contains_key(key) {
            self.members
                .insert(key.to_string(), MemberNullabilityInfo::new(kind));
        }
        let info = self.members.get_mut(key)?;
        if info.kind != kind {
            if !info.is_empty() {
                tracing::debug!(
                    target: "extanno.map",
                    key,
                    existing = %info.kind,
                    incoming = %kind,
                    "member key already annotated under another kind"
                );
                return None;
            }
            info.kind = kind;
        }
        Some(info)
    }

    /// Merge every entry of `other` into this map.
    pub fn merge(&mut self, other: &AnnotationMap) {
        for (key, info) in &other.members {
            if let Some(existing) = self.member_mut(key, info.kind) {
                existing.merge(info);
            }
        }
    }

    /// Drop entries that carry no nullability information. Returns the number
    /// of entries removed.
    pub fn compact(&mut self) -> usize {
        let before = self.members.len();
        self.members.retain(|_, info| !info.is_empty());
        before - self.members.len()
    }

    /// Does the symbol identified by `key`/`kind` carry an external annotation?
    ///
    /// `parameter` names a parameter of the member at `key`; `None` asks about
    /// the member itself. `applies_to_item` asks about the element type of a
    /// collection or task, which this format cannot express, so it is always
    /// `false`.
    pub fn contains(
        &self,
        key: &str,
        kind: MemberKind,
        parameter: Option<&str>,
        applies_to_item: bool,
    ) -> bool {
        if applies_to_item {
            return false;
        }
        let Some(info) = self.members.get(key) else {
            return false;
        };
        if info.kind != kind {
            return false;
        }
        match parameter {
            Some(name) => info.parameter_nullability.get(name).copied().unwrap_or(false),
            None => info.has_nullability_defined,
        }
    }

    /// Entries sorted by key, the order they are persisted in.
    pub fn sorted_entries(&self) -> Vec<(&String, &MemberNullabilityInfo)> {
        let mut entries: Vec<_> = self.members.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

impl FromIterator<(String, MemberNullabilityInfo)> for AnnotationMap {
    fn from_iter<I: IntoIterator<Item = (String, MemberNullabilityInfo)>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}
