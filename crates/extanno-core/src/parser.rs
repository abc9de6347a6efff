//! External annotation XML parser
//!
//! Reads documents of the shape
//!
//! ```xml
//! <assembly name="System">
//!   <member name="M:N.C.Foo(System.String)">
//!     <attribute ctor="M:JetBrains.Annotations.NotNullAttribute.#ctor" />
//!     <parameter name="x">
//!       <attribute ctor="M:JetBrains.Annotations.CanBeNullAttribute.#ctor" />
//!     </parameter>
//!   </member>
//! </assembly>
//! ```
//!
//! and merges every `<member>` into an [`AnnotationMap`].

use crate::error::{AnnotationError, AnnotationResult};
use crate::file_utils::read_source;
use crate::map::{AnnotationMap, MemberKind};
use std::path::Path;

pub const NOT_NULL_ATTRIBUTE_CTOR: &str = "M:JetBrains.Annotations.NotNullAttribute.#ctor";
pub const CAN_BE_NULL_ATTRIBUTE_CTOR: &str = "M:JetBrains.Annotations.CanBeNullAttribute.#ctor";

fn is_nullability_attribute(node: roxmltree::Node<'_, '_>) -> bool {
    node.is_element()
        && node.has_tag_name("attribute")
        && matches!(
            node.attribute("ctor"),
            Some(NOT_NULL_ATTRIBUTE_CTOR) | Some(CAN_BE_NULL_ATTRIBUTE_CTOR)
        )
}

fn child_elements<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> {
    node.children()
        .filter(move |n| n.is_element() && n.has_tag_name(name))
}

/// Merge the annotations in `xml` into `map`.
///
/// Existing entries are extended, never replaced, so parsing the same
/// document twice leaves the map unchanged.
pub fn parse_annotations(xml: &str, map: &mut AnnotationMap) -> Result<(), roxmltree::Error> {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    };
    let doc = roxmltree::Document::parse_with_options(xml, options)?;

    for member in doc
        .descendants()
        .filter(|n| n.is_element() && n.has_tag_name("member"))
    {
        let Some(name) = member.attribute("name") else {
            continue;
        };
        let (kind, key) = MemberKind::split_documentation_id(name);
        let Some(info) = map.member_mut(key, kind) else {
            continue;
        };

        if child_elements(member, "attribute").any(is_nullability_attribute) {
            info.has_nullability_defined = true;
        }

        for parameter in child_elements(member, "parameter") {
            let Some(parameter_name) = parameter.attribute("name") else {
                continue;
            };
            if child_elements(parameter, "attribute").any(is_nullability_attribute) {
                info.set_parameter(parameter_name);
            }
        }
    }

    Ok(())
}

/// Read `path` and merge its annotations into `map`.
pub fn parse_annotation_file(
    path: &Path,
    max_file_size: u64,
    map: &mut AnnotationMap,
) -> AnnotationResult<()> {
    let content = read_source(path, max_file_size)?;
    parse_annotations(&content, map).map_err(|source| AnnotationError::Xml {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse a single annotation file into a fresh map.
pub fn load_annotation_file(path: &Path, max_file_size: u64) -> AnnotationResult<AnnotationMap> {
    let mut map = AnnotationMap::new();
    parse_annotation_file(path, max_file_size, &mut map)?;
    Ok(map)
}
