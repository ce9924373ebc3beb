//! Schema paths
//!
//! A schema path names a field by structure rather than by generated id:
//!
//! ```text
//! path       = ( '/' segment )*
//! segment    = '@'? qname | compositor
//! compositor = '{choice:' index '}' | '{sequence:' index '}'
//! qname      = prefix ':' local | local
//! ```
//!
//! A compositor segment carries the ordinal of the compositor among its
//! siblings of the same kind only, so other siblings can come and go
//! without renumbering.

use crate::document::Document;
use crate::field::{FieldId, FieldKind};
use crate::names::NamespaceMap;
use crate::{Error, Result};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static COMPOSITOR_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\{(choice|sequence):(\d+)\}$").expect("valid compositor segment pattern")
});

/// Nested compositors are searched up to this depth when a path omits them
const MAX_CHOICE_NESTING: usize = 16;

/// A named (element, attribute or JSON) path segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSegment {
    pub prefix: Option<String>,
    pub local_name: String,
    pub is_attribute: bool,
}

impl fmt::Display for ElementSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_attribute {
            f.write_str("@")?;
        }
        match &self.prefix {
            Some(prefix) => write!(f, "{prefix}:{}", self.local_name),
            None => f.write_str(&self.local_name),
        }
    }
}

/// One step of a schema path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// The Nth choice among sibling choices
    Choice(usize),
    /// The Nth sequence among sibling sequences
    Sequence(usize),
    Field(ElementSegment),
}

impl PathSegment {
    /// Compositor kind and ordinal, for compositor segments
    fn compositor(&self) -> Option<(FieldKind, usize)> {
        match self {
            PathSegment::Choice(ordinal) => Some((FieldKind::Choice, *ordinal)),
            PathSegment::Sequence(ordinal) => Some((FieldKind::Sequence, *ordinal)),
            PathSegment::Field(_) => None,
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Choice(index) => write!(f, "{{choice:{index}}}"),
            PathSegment::Sequence(index) => write!(f, "{{sequence:{index}}}"),
            PathSegment::Field(segment) => segment.fmt(f),
        }
    }
}

/// Ordinal of a choice field among its sibling choices
#[must_use]
pub fn choice_ordinal(document: &Document, id: FieldId) -> Option<usize> {
    document
        .field(id)
        .is_choice()
        .then(|| compositor_ordinal(document, id))
}

fn compositor_ordinal(document: &Document, id: FieldId) -> usize {
    let kind = document.field(id).kind();
    document
        .siblings(id)
        .iter()
        .filter(|&&sibling| document.field(sibling).kind() == kind)
        .position(|&sibling| sibling == id)
        .unwrap_or_default()
}

/// Segment naming one field
#[must_use]
pub fn segment(document: &Document, id: FieldId, namespaces: &NamespaceMap) -> String {
    let field = document.field(id);
    match field.kind() {
        FieldKind::Choice => PathSegment::Choice(compositor_ordinal(document, id)).to_string(),
        FieldKind::Sequence => PathSegment::Sequence(compositor_ordinal(document, id)).to_string(),
        _ => document.dialect().segment_for(field, namespaces),
    }
}

/// Build the schema path of a field
#[must_use]
pub fn build(document: &Document, id: FieldId, namespaces: &NamespaceMap) -> String {
    let mut segments: Vec<String> = document
        .ancestors(id)
        .map(|ancestor| segment(document, ancestor, namespaces))
        .collect();
    segments.reverse();
    segments.push(segment(document, id, namespaces));

    let mut path = String::new();
    for segment in segments {
        path.push('/');
        path.push_str(&segment);
    }
    path
}

/// Split a schema path into segments
pub fn parse(path: &str) -> Result<Vec<PathSegment>> {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return Ok(Vec::new());
    }
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Err(Error::invalid_path(path, "schema paths start with '/'"));
    };

    rest.split('/')
        .map(|raw| parse_segment(path, raw))
        .collect()
}

fn parse_segment(path: &str, raw: &str) -> Result<PathSegment> {
    if raw.is_empty() {
        return Err(Error::invalid_path(path, "empty segment"));
    }
    if let Some(captures) = COMPOSITOR_SEGMENT.captures(raw) {
        let index = captures[2].parse().map_err(|_| {
            Error::invalid_path(path, format!("compositor index out of range in {raw}"))
        })?;
        return Ok(match &captures[1] {
            "choice" => PathSegment::Choice(index),
            _ => PathSegment::Sequence(index),
        });
    }
    if raw.starts_with('{') {
        return Err(Error::invalid_path(path, format!("malformed compositor segment {raw}")));
    }

    let (is_attribute, name) = match raw.strip_prefix('@') {
        Some(name) => (true, name),
        None => (false, raw),
    };
    let (prefix, local_name) = match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix.to_string()), local.to_string()),
        None => (None, name.to_string()),
    };
    if local_name.is_empty() {
        return Err(Error::invalid_path(path, format!("missing local name in {raw}")));
    }
    Ok(PathSegment::Field(ElementSegment {
        prefix,
        local_name,
        is_attribute,
    }))
}

/// Follow a schema path from the document roots.
///
/// Element segments match direct children first and then members of
/// child compositors, so paths written without compositor segments still
/// resolve.
pub fn navigate_to_field(
    document: &mut Document,
    path: &str,
    namespaces: &NamespaceMap,
) -> Option<FieldId> {
    let segments = match parse(path) {
        Ok(segments) => segments,
        Err(err) => {
            tracing::debug!(%err, "cannot navigate malformed path");
            return None;
        }
    };
    let (first, rest) = segments.split_first()?;

    let roots = document.root_fields().to_vec();
    let mut current = find_among(document, &roots, first, namespaces, 0)?;
    for segment in rest {
        current = navigate_child(document, current, segment, namespaces)?;
    }
    Some(current)
}

/// Child of `parent` named by one segment
pub fn navigate_child(
    document: &mut Document,
    parent: FieldId,
    segment: &PathSegment,
    namespaces: &NamespaceMap,
) -> Option<FieldId> {
    let children = document.children(parent);
    find_among(document, &children, segment, namespaces, 0)
}

fn find_among(
    document: &mut Document,
    candidates: &[FieldId],
    segment: &PathSegment,
    namespaces: &NamespaceMap,
    depth: usize,
) -> Option<FieldId> {
    if let Some((kind, ordinal)) = segment.compositor() {
        return candidates
            .iter()
            .copied()
            .filter(|&id| document.field(id).kind() == kind)
            .nth(ordinal);
    }
    let PathSegment::Field(element) = segment else {
        return None;
    };

    let dialect = document.dialect();
    if let Some(found) = candidates
        .iter()
        .copied()
        .find(|&id| dialect.matches(document.field(id), element, namespaces))
    {
        return Some(found);
    }
    if depth >= MAX_CHOICE_NESTING {
        return None;
    }
    let compositors: Vec<FieldId> = candidates
        .iter()
        .copied()
        .filter(|&id| document.field(id).is_compositor())
        .collect();
    compositors.into_iter().find_map(|compositor| {
        let members = document.children(compositor);
        find_among(document, &members, segment, namespaces, depth + 1)
    })
}

/// Whether `path` lies strictly below `ancestor`
#[must_use]
pub fn is_strict_descendant(path: &str, ancestor: &str) -> bool {
    let ancestor = ancestor.trim_end_matches('/');
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path[ancestor.len()..].starts_with('/')
}

/// Number of segments in a path
#[must_use]
pub fn depth(path: &str) -> usize {
    path.split('/').filter(|segment| !segment.is_empty()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_segments() {
        let segments = parse("/ns0:Order/{choice:1}/@id/Item").unwrap();
        assert_eq!(segments.len(), 4);
        assert_eq!(
            segments[0],
            PathSegment::Field(ElementSegment {
                prefix: Some("ns0".to_string()),
                local_name: "Order".to_string(),
                is_attribute: false,
            })
        );
        assert_eq!(segments[1], PathSegment::Choice(1));
        assert!(matches!(&segments[2], PathSegment::Field(e) if e.is_attribute && e.local_name == "id"));
        assert!(matches!(&segments[3], PathSegment::Field(e) if e.prefix.is_none()));
    }

    #[test]
    fn test_parse_sequence_segment() {
        let segments = parse("/Order/{choice:0}/{sequence:1}/a").unwrap();
        assert_eq!(segments[1], PathSegment::Choice(0));
        assert_eq!(segments[2], PathSegment::Sequence(1));
        assert_eq!(segments[2].to_string(), "{sequence:1}");
    }

    #[test]
    fn test_parse_round_trips_through_display() {
        let path = "/ns0:Order/{choice:0}/{sequence:0}/@ns1:id";
        let rendered: String = parse(path)
            .unwrap()
            .iter()
            .map(|segment| format!("/{segment}"))
            .collect();
        assert_eq!(rendered, path);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse("Order").is_err());
        assert!(parse("/Order//Item").is_err());
        assert!(parse("/{choice:x}").is_err());
        assert!(parse("/{all:0}").is_err());
        assert!(parse("/ns0:").is_err());
        assert!(parse("").unwrap().is_empty());
    }

    #[test]
    fn test_strict_descendant() {
        assert!(is_strict_descendant("/a/b", "/a"));
        assert!(is_strict_descendant("/a/{choice:0}/c", "/a/{choice:0}"));
        assert!(!is_strict_descendant("/a", "/a"));
        assert!(!is_strict_descendant("/ab", "/a"));
        assert!(!is_strict_descendant("/a", "/a/b"));
    }

    #[test]
    fn test_depth() {
        assert_eq!(depth("/a/{choice:0}/@b"), 3);
        assert_eq!(depth("/"), 0);
    }
}
