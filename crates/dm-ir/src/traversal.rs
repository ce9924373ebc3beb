//! Depth-first traversal of a document's field tree

use crate::document::Document;
use crate::field::FieldId;
use crate::names::NamespaceMap;
use crate::path;

/// Trait for traversing the field tree
pub trait Traversal {
    /// Visit a field
    fn visit(&mut self, document: &Document, field: FieldId, depth: usize);

    /// Called before the children of a field are visited
    fn enter(&mut self, _document: &Document, _field: FieldId, _depth: usize) {}

    /// Called after the children of a field are visited
    fn leave(&mut self, _document: &Document, _field: FieldId, _depth: usize) {}

    /// Returns true if traversal should continue
    fn should_continue(&self) -> bool {
        true
    }
}

/// Walk every root in pre-order, materializing fields down to `max_depth`.
///
/// Recursive types have unbounded trees, so the depth limit is mandatory.
/// Roots are at depth 0.
pub fn walk<T: Traversal + ?Sized>(document: &mut Document, visitor: &mut T, max_depth: usize) {
    let roots = document.root_fields().to_vec();
    for root in roots {
        if !walk_field(document, visitor, root, 0, max_depth) {
            break;
        }
    }
}

fn walk_field<T: Traversal + ?Sized>(
    document: &mut Document,
    visitor: &mut T,
    field: FieldId,
    depth: usize,
    max_depth: usize,
) -> bool {
    visitor.visit(document, field, depth);
    if !visitor.should_continue() {
        return false;
    }
    if depth >= max_depth {
        return true;
    }

    let children = document.children(field);
    if children.is_empty() {
        return true;
    }
    visitor.enter(document, field, depth);
    for child in children {
        if !walk_field(document, visitor, child, depth + 1, max_depth) {
            return false;
        }
    }
    visitor.leave(document, field, depth);
    true
}

/// Collects the schema path of every visited field
#[derive(Debug, Default)]
pub struct PathCollector {
    namespaces: NamespaceMap,
    pub paths: Vec<(FieldId, String)>,
}

impl PathCollector {
    #[must_use]
    pub fn new(namespaces: NamespaceMap) -> Self {
        Self {
            namespaces,
            paths: Vec::new(),
        }
    }
}

impl Traversal for PathCollector {
    fn visit(&mut self, document: &Document, field: FieldId, _depth: usize) {
        self.paths
            .push((field, path::build(document, field, &self.namespaces)));
    }
}
