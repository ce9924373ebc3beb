//! Mapping links
//!
//! A link connects a source field read by a mapping expression to the node
//! of the mapping tree the expression belongs to. Value selectors link to
//! the field node they fill; `for-each`, `if`, `when` and variable nodes
//! link to themselves. Relative paths are read against the field bound by
//! the innermost enclosing `for-each`.

use crate::resolve::{Focus, Resolver, SourceDocuments};
use crate::tree::{MappingNode, MappingTree, NodeKind};
use crate::xpath::{Expr, PathStart};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingLink {
    /// `documentId:schemaPath` of the source field
    pub source_node_path: String,
    /// Path of the mapping tree node
    pub target_node_path: String,
    #[serde(default)]
    pub is_selected: bool,
}

/// Links of every expression in the tree, in document order.
///
/// Links touching `selected` (as source or target) are flagged and moved
/// after the others, keeping their relative order, so they draw on top.
pub fn extract_mapping_links(
    tree: &MappingTree,
    sources: &mut SourceDocuments,
    selected: Option<&str>,
) -> Vec<MappingLink> {
    let mut walker = LinkWalker {
        tree,
        resolver: Resolver::new(sources, &tree.namespaces),
        focus: vec![Focus::Document],
        links: Vec::new(),
    };
    walker.walk(&tree.root_path(), &tree.children);
    let mut links = walker.links;

    if let Some(selected) = selected {
        for link in &mut links {
            link.is_selected =
                link.source_node_path == selected || link.target_node_path == selected;
        }
        links.sort_by_key(|link| link.is_selected);
    }
    debug!(links = links.len(), "extracted mapping links");
    links
}

/// Whether `node_path` is an endpoint of a selected link
pub fn is_in_selected_mapping(links: &[MappingLink], node_path: &str) -> bool {
    links.iter().any(|link| {
        link.is_selected
            && (link.source_node_path == node_path || link.target_node_path == node_path)
    })
}

struct LinkWalker<'a> {
    tree: &'a MappingTree,
    resolver: Resolver<'a>,
    focus: Vec<Focus>,
    links: Vec<MappingLink>,
}

impl LinkWalker<'_> {
    fn walk(&mut self, parent_path: &str, children: &[MappingNode]) {
        let paths = self.tree.child_paths(parent_path, children);
        for (node, path) in children.iter().zip(paths) {
            match &node.kind {
                NodeKind::ForEach { select } => {
                    self.link(select, &path);
                    let current = self.current().clone();
                    let focus = match select {
                        Expr::Path(select) if !matches!(select.start, PathStart::Expr(_)) => self
                            .resolver
                            .resolve(select, &current)
                            .map_or(Focus::Lost, Focus::Field),
                        _ => Focus::Lost,
                    };
                    self.focus.push(focus);
                    self.walk(&path, &node.children);
                    self.focus.pop();
                }
                NodeKind::If { test } | NodeKind::When { test } => {
                    self.link(test, &path);
                    self.walk(&path, &node.children);
                }
                NodeKind::ValueSelector { expression, .. } => self.link(expression, parent_path),
                NodeKind::Variable { expression, .. } => self.link(expression, &path),
                NodeKind::Field(_) | NodeKind::Choose | NodeKind::Otherwise => {
                    self.walk(&path, &node.children);
                }
            }
        }
    }

    fn current(&self) -> &Focus {
        self.focus.last().unwrap_or(&Focus::Document)
    }

    fn link(&mut self, expression: &Expr, target_node_path: &str) {
        let mut seen = HashSet::new();
        let focus = self.current().clone();
        for reference in expression.field_references() {
            let Some(resolved) = self.resolver.resolve(reference, &focus) else {
                trace!(%reference, "expression path names no source field");
                continue;
            };
            let Some(source_node_path) = self.resolver.node_path(&resolved) else {
                continue;
            };
            if seen.insert(source_node_path.clone()) {
                self.links.push(MappingLink {
                    source_node_path,
                    target_node_path: target_node_path.to_string(),
                    is_selected: false,
                });
            }
        }
    }
}
