//! Mapping tree
//!
//! A [`MappingTree`] mirrors the target document: field nodes name target
//! fields by schema path, instruction nodes (`for-each`, `if`, `choose`,
//! `variable`) wrap them, and value selectors say where a field's value
//! comes from. The tree is the model behind a stylesheet; see the
//! serializer and deserializer modules for the conversion.
//!
//! Every node has a node path. A field node's path is its target endpoint,
//! `targetBody:{schemaPath}`. An instruction node extends its parent's path
//! with `{kind}-{ordinal}`, the ordinal counting earlier siblings of the
//! same kind. A value selector reports the path of the node it belongs to.

use crate::resolve::{self, SourceDocuments};
use crate::structured;
use crate::xpath::{Expr, LocationPath, PathStart, Step};
use crate::{Error, Result};
use dm_ir::{Document, DocumentId, FieldId, JsonKind, NamespaceMap, path};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How a value selector copies its source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueKind {
    /// String value (`xsl:value-of`)
    ValueOf,
    /// Deep copy (`xsl:copy-of`)
    CopyOf,
}

/// Target field a field node stands for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldItem {
    pub schema_path: String,
    /// Local name, or the key of a JSON field
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_uri: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_attribute: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_kind: Option<JsonKind>,
}

impl FieldItem {
    pub fn from_field(document: &Document, id: FieldId) -> Self {
        let field = document.field(id);
        Self {
            schema_path: path::build(document, id, document.namespace_map()),
            name: field.name().to_string(),
            namespace_uri: field.namespace_uri().map(str::to_string),
            is_attribute: field.is_attribute(),
            json_kind: field.json_kind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NodeKind {
    Field(FieldItem),
    ForEach { select: Expr },
    If { test: Expr },
    Choose,
    When { test: Expr },
    Otherwise,
    ValueSelector { kind: ValueKind, expression: Expr },
    Variable { name: String, expression: Expr },
}

impl NodeKind {
    /// Name used in instruction node paths
    fn segment_name(&self) -> Option<&'static str> {
        match self {
            NodeKind::ForEach { .. } => Some("for-each"),
            NodeKind::If { .. } => Some("if"),
            NodeKind::Choose => Some("choose"),
            NodeKind::When { .. } => Some("when"),
            NodeKind::Otherwise => Some("otherwise"),
            NodeKind::Variable { .. } => Some("variable"),
            NodeKind::Field(_) | NodeKind::ValueSelector { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingNode {
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MappingNode>,
}

impl MappingNode {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_children(mut self, children: Vec<MappingNode>) -> Self {
        self.children = children;
        self
    }

    pub fn field(item: FieldItem) -> Self {
        Self::new(NodeKind::Field(item))
    }

    pub fn value_selector(kind: ValueKind, expression: Expr) -> Self {
        Self::new(NodeKind::ValueSelector { kind, expression })
    }

    pub fn field_item(&self) -> Option<&FieldItem> {
        match &self.kind {
            NodeKind::Field(item) => Some(item),
            _ => None,
        }
    }

    /// Value selector among the children
    pub fn selector(&self) -> Option<(ValueKind, &Expr)> {
        self.children.iter().find_map(|child| match &child.kind {
            NodeKind::ValueSelector { kind, expression } => Some((*kind, expression)),
            _ => None,
        })
    }

    fn set_selector(&mut self, kind: ValueKind, expression: Expr) {
        let selector = MappingNode::value_selector(kind, expression);
        match self
            .children
            .iter_mut()
            .find(|child| matches!(child.kind, NodeKind::ValueSelector { .. }))
        {
            Some(existing) => *existing = selector,
            None => self.children.push(selector),
        }
    }

    fn without_selectors(&self) -> MappingNode {
        MappingNode {
            kind: self.kind.clone(),
            children: self
                .children
                .iter()
                .filter(|child| !matches!(child.kind, NodeKind::ValueSelector { .. }))
                .cloned()
                .collect(),
        }
    }
}

/// A stylesheet parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    /// JSON parameters are read through a `json-to-xml` companion variable
    #[serde(default)]
    pub is_json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingTree {
    pub target: DocumentId,
    /// Prefixes used by expressions and literal result elements
    pub namespaces: NamespaceMap,
    #[serde(default)]
    pub target_is_json: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub children: Vec<MappingNode>,
}

/// Path of the node at `index` among `children` under `parent_path`
fn child_path(
    target: &DocumentId,
    parent_path: &str,
    children: &[MappingNode],
    index: usize,
) -> String {
    let node = &children[index];
    match &node.kind {
        NodeKind::Field(item) => format!("{target}:{}", item.schema_path),
        NodeKind::ValueSelector { .. } => parent_path.to_string(),
        kind => {
            let discriminant = std::mem::discriminant(kind);
            let ordinal = children[..index]
                .iter()
                .filter(|sibling| std::mem::discriminant(&sibling.kind) == discriminant)
                .count();
            format!("{parent_path}/{}-{ordinal}", kind.segment_name().unwrap_or_default())
        }
    }
}

fn locate(children: &[MappingNode], schema_path: &str) -> Option<Vec<usize>> {
    for (index, child) in children.iter().enumerate() {
        if child
            .field_item()
            .is_some_and(|item| item.schema_path == schema_path)
        {
            return Some(vec![index]);
        }
        if let Some(mut rest) = locate(&child.children, schema_path) {
            rest.insert(0, index);
            return Some(rest);
        }
    }
    None
}

fn container_mut<'t>(
    mut children: &'t mut Vec<MappingNode>,
    index: &[usize],
) -> Option<&'t mut Vec<MappingNode>> {
    for &position in index {
        children = &mut children.get_mut(position)?.children;
    }
    Some(children)
}

/// Absolute form of a for-each select under the current iteration
fn absolute_select(select: &Expr, context: Option<&LocationPath>) -> Option<LocationPath> {
    let Expr::Path(path) = select else {
        return None;
    };
    match (&path.start, context) {
        (PathStart::Relative | PathStart::Current, Some(context)) => {
            let mut steps = context.steps.clone();
            steps.extend(
                path.steps
                    .iter()
                    .filter(|step| **step != Step::context_item())
                    .cloned(),
            );
            Some(LocationPath::new(context.start.clone(), steps))
        }
        (PathStart::Relative | PathStart::Current, None) | (PathStart::Expr(_), _) => None,
        _ => Some(path.clone()),
    }
}

fn relative_expression(path: &LocationPath, context: Option<&LocationPath>) -> Expr {
    let relative = context.and_then(|context| path.relative_to(context));
    Expr::Path(relative.unwrap_or_else(|| path.clone()))
}

impl MappingTree {
    /// Empty mapping into a target document
    pub fn new(target: &Document) -> Self {
        let mut namespaces = target.namespace_map().clone();
        let target_is_json = target.kind().is_json();
        if target_is_json {
            structured::ensure_prefix(&mut namespaces);
        }
        Self {
            target: target.id().clone(),
            namespaces,
            target_is_json,
            parameters: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Declare a parameter document
    pub fn add_parameter(&mut self, document: &Document) {
        let name = document.name().to_string();
        let is_json = document.kind().is_json();
        if is_json {
            structured::ensure_prefix(&mut self.namespaces);
        }
        match self.parameters.iter_mut().find(|param| param.name == name) {
            Some(existing) => existing.is_json = is_json,
            None => self.parameters.push(Parameter { name, is_json }),
        }
    }

    /// Path prefix of nodes directly under the tree
    pub fn root_path(&self) -> String {
        format!("{}:", self.target)
    }

    /// Path of each child of a node whose own path is `parent_path`
    pub fn child_paths(&self, parent_path: &str, children: &[MappingNode]) -> Vec<String> {
        (0..children.len())
            .map(|index| child_path(&self.target, parent_path, children, index))
            .collect()
    }

    /// Path of the node at an index path
    fn path_at(&self, index: &[usize]) -> Option<String> {
        let mut path = self.root_path();
        let mut children = &self.children;
        for &position in index {
            if position >= children.len() {
                return None;
            }
            path = child_path(&self.target, &path, children, position);
            children = &children[position].children;
        }
        Some(path)
    }

    /// Visit every node in document order with its path
    pub fn visit<F>(&self, mut visitor: F)
    where
        F: FnMut(&MappingNode, &str, usize),
    {
        fn visit_all<F: FnMut(&MappingNode, &str, usize)>(
            tree: &MappingTree,
            parent_path: &str,
            children: &[MappingNode],
            depth: usize,
            visitor: &mut F,
        ) {
            for (node, path) in children.iter().zip(tree.child_paths(parent_path, children)) {
                visitor(node, &path, depth);
                visit_all(tree, &path, &node.children, depth + 1, visitor);
            }
        }
        visit_all(self, &self.root_path(), &self.children, 0, &mut visitor);
    }

    /// Field node for a target schema path
    pub fn find_field_node(&self, schema_path: &str) -> Option<&MappingNode> {
        let index = locate(&self.children, schema_path)?;
        let mut node = self.children.get(*index.first()?)?;
        for &position in &index[1..] {
            node = node.children.get(position)?;
        }
        Some(node)
    }

    fn node_mut(&mut self, index: &[usize]) -> Option<&mut MappingNode> {
        let (last, parents) = index.split_last()?;
        container_mut(&mut self.children, parents)?.get_mut(*last)
    }

    fn locate_or_err(&self, schema_path: &str) -> Result<Vec<usize>> {
        locate(&self.children, schema_path).ok_or_else(|| Error::node_not_found(schema_path))
    }

    /// Map a source field onto a target field.
    ///
    /// Field nodes are created for the target field and its ancestors as
    /// needed. Where a repeating target field meets a repeating source
    /// field (or source ancestor) not yet iterated, the target node is
    /// wrapped in an `xsl:for-each` over the source. The value selector
    /// copies the source with `value-of` for leaves and `copy-of` for
    /// structured fields, relative to the innermost iteration.
    ///
    /// Returns the path of the target field node.
    pub fn map_field(
        &mut self,
        target: &mut Document,
        target_field: FieldId,
        sources: &mut SourceDocuments,
        source_document: &DocumentId,
        source_field: FieldId,
    ) -> Result<String> {
        let source = sources
            .get_mut(source_document)
            .ok_or_else(|| Error::UnknownDocument {
                id: source_document.to_string(),
            })?;
        if let DocumentId::Param(_) = source_document {
            self.add_parameter(source);
        }
        let source_chain = resolve::field_chain(source, source_field);
        let source_paths = resolve::location_paths(source, &source_chain, &mut self.namespaces);
        let source_repeats: Vec<bool> = source_chain
            .iter()
            .map(|&id| source.field(id).occurs().is_repeating())
            .collect();
        let value_kind = if source.field(source_field).has_structure() {
            ValueKind::CopyOf
        } else {
            ValueKind::ValueOf
        };

        let target_chain = resolve::field_chain(target, target_field);
        let mut container: Vec<usize> = Vec::new();
        let mut context: Option<LocationPath> = None;
        let mut iterated = 0;

        for &field in &target_chain {
            let item = FieldItem::from_field(target, field);
            let children = container_mut(&mut self.children, &container)
                .ok_or_else(|| Error::node_not_found(&item.schema_path))?;

            if let Some(found) = locate_shallow(children, &item.schema_path) {
                // Iterations passed on the way narrow the context
                let mut nodes: &[MappingNode] = children;
                for &position in &found {
                    let node = &nodes[position];
                    if let NodeKind::ForEach { select } = &node.kind {
                        if let Some(absolute) = absolute_select(select, context.as_ref()) {
                            let at = source_paths.iter().position(|path| *path == absolute);
                            if let Some(at) = at {
                                iterated = iterated.max(at + 1);
                            }
                            context = Some(absolute);
                        }
                    }
                    nodes = &node.children;
                }
                container.extend(found);
                continue;
            }

            let repeating_source = (iterated..source_chain.len()).find(|&at| source_repeats[at]);
            let node = MappingNode::field(item);
            match repeating_source {
                Some(at) if target.field(field).occurs().is_repeating() => {
                    let select = relative_expression(&source_paths[at], context.as_ref());
                    debug!(%select, "wrapping repeating target field in for-each");
                    children.push(
                        MappingNode::new(NodeKind::ForEach { select }).with_children(vec![node]),
                    );
                    container.push(children.len() - 1);
                    container.push(0);
                    context = Some(source_paths[at].clone());
                    iterated = at + 1;
                }
                _ => {
                    children.push(node);
                    container.push(children.len() - 1);
                }
            }
        }

        let Some(source_path) = source_paths.last() else {
            return Err(Error::node_not_found(source_document.to_string()));
        };
        let expression = relative_expression(source_path, context.as_ref());
        let schema_path = path::build(target, target_field, target.namespace_map());
        let target_path = format!("{}:{schema_path}", self.target);
        let node = self
            .node_mut(&container)
            .ok_or_else(|| Error::node_not_found(&target_path))?;
        node.set_selector(value_kind, expression);
        self.path_at(&container)
            .ok_or_else(|| Error::node_not_found(target_path))
    }

    /// Remove the value selector of a target field node, then drop the
    /// node and any wrappers left empty above it
    pub fn remove_field_mapping(&mut self, schema_path: &str) -> Result<()> {
        let mut index = self.locate_or_err(schema_path)?;
        if let Some(node) = self.node_mut(&index) {
            node.children
                .retain(|child| !matches!(child.kind, NodeKind::ValueSelector { .. }));
        }
        while let Some((&last, parents)) = index.split_last() {
            let parents = parents.to_vec();
            let Some(container) = container_mut(&mut self.children, &parents) else {
                break;
            };
            if !container.get(last).is_some_and(|node| node.children.is_empty()) {
                break;
            }
            container.remove(last);
            index = parents;
        }
        Ok(())
    }

    /// Wrap a target field node in `xsl:if`
    pub fn add_if(&mut self, schema_path: &str, test: Expr) -> Result<String> {
        let index = self.locate_or_err(schema_path)?;
        self.wrap(&index, |node| {
            MappingNode::new(NodeKind::If { test }).with_children(vec![node])
        })?;
        self.path_at(&index)
            .ok_or_else(|| Error::node_not_found(schema_path))
    }

    /// Wrap a target field node in `xsl:choose`: the `when` branch keeps
    /// the node, the `otherwise` branch gets a copy without value selector
    pub fn add_choose(&mut self, schema_path: &str, test: Expr) -> Result<String> {
        let index = self.locate_or_err(schema_path)?;
        self.wrap(&index, |node| {
            let fallback = node.without_selectors();
            MappingNode::new(NodeKind::Choose).with_children(vec![
                MappingNode::new(NodeKind::When { test }).with_children(vec![node]),
                MappingNode::new(NodeKind::Otherwise).with_children(vec![fallback]),
            ])
        })?;
        self.path_at(&index)
            .ok_or_else(|| Error::node_not_found(schema_path))
    }

    /// Declare a variable as the first child of a target field node
    pub fn add_variable(
        &mut self,
        schema_path: &str,
        name: &str,
        expression: Expr,
    ) -> Result<String> {
        let mut index = self.locate_or_err(schema_path)?;
        let node = self
            .node_mut(&index)
            .ok_or_else(|| Error::node_not_found(schema_path))?;
        node.children.insert(
            0,
            MappingNode::new(NodeKind::Variable {
                name: name.to_string(),
                expression,
            }),
        );
        index.push(0);
        self.path_at(&index)
            .ok_or_else(|| Error::node_not_found(schema_path))
    }

    fn wrap<F>(&mut self, index: &[usize], wrapper: F) -> Result<()>
    where
        F: FnOnce(MappingNode) -> MappingNode,
    {
        let root = self.root_path();
        let (&last, parents) = index
            .split_last()
            .ok_or_else(|| Error::node_not_found(&root))?;
        let container = container_mut(&mut self.children, parents)
            .ok_or_else(|| Error::node_not_found(root))?;
        let node = container.remove(last);
        container.insert(last, wrapper(node));
        Ok(())
    }
}

/// Field node for a schema path among `children`, looking through
/// instruction nodes but not into other field nodes
fn locate_shallow(children: &[MappingNode], schema_path: &str) -> Option<Vec<usize>> {
    for (index, child) in children.iter().enumerate() {
        match &child.kind {
            NodeKind::Field(item) if item.schema_path == schema_path => return Some(vec![index]),
            NodeKind::Field(_) | NodeKind::ValueSelector { .. } | NodeKind::Variable { .. } => {}
            _ => {
                if let Some(mut rest) = locate_shallow(&child.children, schema_path) {
                    rest.insert(0, index);
                    return Some(rest);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xpath;

    fn field(schema_path: &str, name: &str) -> MappingNode {
        MappingNode::field(FieldItem {
            schema_path: schema_path.to_string(),
            name: name.to_string(),
            namespace_uri: None,
            is_attribute: false,
            json_kind: None,
        })
    }

    fn tree(children: Vec<MappingNode>) -> MappingTree {
        MappingTree {
            target: DocumentId::TargetBody,
            namespaces: NamespaceMap::new(),
            target_is_json: false,
            parameters: Vec::new(),
            children,
        }
    }

    fn select(text: &str) -> MappingNode {
        MappingNode::value_selector(ValueKind::ValueOf, xpath::parse(text).unwrap())
    }

    fn sample() -> MappingTree {
        tree(vec![field("/Order", "Order").with_children(vec![
            MappingNode::new(NodeKind::If {
                test: xpath::parse("$flag").unwrap(),
            })
            .with_children(vec![field("/Order/Id", "Id").with_children(vec![select("/Order/Id")])]),
            MappingNode::new(NodeKind::ForEach {
                select: xpath::parse("/Order/Line").unwrap(),
            })
            .with_children(vec![field("/Order/Line", "Line").with_children(vec![
                field("/Order/Line/Sku", "Sku").with_children(vec![select("Sku")]),
            ])]),
            MappingNode::new(NodeKind::If {
                test: xpath::parse("$other").unwrap(),
            }),
        ])])
    }

    #[test]
    fn test_node_paths() {
        let mut paths = Vec::new();
        sample().visit(|_, path, _| paths.push(path.to_string()));
        assert_eq!(
            paths,
            vec![
                "targetBody:/Order",
                "targetBody:/Order/if-0",
                "targetBody:/Order/Id",
                "targetBody:/Order/Id",
                "targetBody:/Order/for-each-0",
                "targetBody:/Order/Line",
                "targetBody:/Order/Line/Sku",
                "targetBody:/Order/Line/Sku",
                "targetBody:/Order/if-1",
            ]
        );
    }

    #[test]
    fn test_remove_prunes_empty_wrappers() {
        let mut tree = sample();
        tree.remove_field_mapping("/Order/Line/Sku").unwrap();
        assert!(tree.find_field_node("/Order/Line").is_none());
        tree.remove_field_mapping("/Order/Id").unwrap();
        assert!(tree.find_field_node("/Order/Id").is_none());
        assert_eq!(tree.children[0].children.len(), 1);
        assert!(matches!(tree.remove_field_mapping("/Order/Id"), Err(Error::NodeNotFound { .. })));
    }

    #[test]
    fn test_wrapping_actions() {
        let mut tree = sample();
        let path = tree
            .add_choose("/Order/Line/Sku", xpath::parse("Sku != ''").unwrap())
            .unwrap();
        assert_eq!(path, "targetBody:/Order/Line/choose-0");
        let choose = &tree.children[0].children[1].children[0].children[0];
        assert_eq!(choose.children.len(), 2);
        assert!(choose.children[0].children[0].selector().is_some());
        assert!(choose.children[1].children[0].selector().is_none());

        let path = tree
            .add_if("/Order/Line", xpath::parse("Sku").unwrap())
            .unwrap();
        assert_eq!(path, "targetBody:/Order/for-each-0/if-0");

        let path = tree
            .add_variable("/Order", "total", xpath::parse("count(/Order/Line)").unwrap())
            .unwrap();
        assert_eq!(path, "targetBody:/Order/variable-0");
    }

    #[test]
    fn test_tree_serializes_with_type_tags() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["children"][0]["type"], "field");
        assert_eq!(json["children"][0]["schemaPath"], "/Order");
        assert_eq!(json["children"][0]["children"][1]["type"], "for-each");
        let back: MappingTree = serde_json::from_value(json).unwrap();
        assert_eq!(back, sample());
    }
}
