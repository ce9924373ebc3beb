//! Stylesheet to mapping tree
//!
//! Walks the `match="/"` template and matches every literal result element
//! and `xsl:attribute` against the target document, descending through
//! choice members. Instructions become instruction nodes; elements that
//! match no target field are skipped with a warning.

use crate::resolve::{FieldMatcher, SourceDocuments, find_child};
use crate::structured::{self, FN_PREFIX, KEY_ATTRIBUTE};
use crate::tree::{FieldItem, MappingNode, MappingTree, NodeKind, Parameter, ValueKind};
use crate::xpath::Expr;
use crate::xslt::{Instruction, LiteralElement, Stylesheet};
use crate::Result;
use dm_ir::{Document, FN_NAMESPACE, FieldId, JsonKind, NamespaceMap};
use std::collections::HashSet;
use tracing::{info, warn};

/// Read a stylesheet into a mapping tree for `target`.
///
/// Parameters are taken from the stylesheet's `xsl:param` declarations; a
/// parameter is JSON when the stylesheet converts it with `json-to-xml` or
/// its document in `sources` is a JSON document.
pub fn deserialize(
    text: &str,
    target: &mut Document,
    sources: &SourceDocuments,
) -> Result<MappingTree> {
    let stylesheet = Stylesheet::parse(text)?;
    let mut tree = MappingTree::new(target);
    let mut namespaces = stylesheet.namespaces.clone();
    for (prefix, uri) in tree.namespaces.iter() {
        if !namespaces.contains_uri(uri) && !namespaces.contains_prefix(prefix) {
            namespaces.insert(prefix, uri);
        }
    }
    tree.namespaces = namespaces;

    let converted: HashSet<&str> = stylesheet
        .variables
        .iter()
        .filter_map(structured::declared_json_param)
        .collect();
    tree.parameters = stylesheet
        .params
        .iter()
        .map(|name| Parameter {
            name: name.clone(),
            is_json: converted.contains(name.as_str())
                || sources.param(name).is_some_and(|doc| doc.kind().is_json()),
        })
        .collect();

    let body = if tree.target_is_json {
        structured::unwrap_json_output(&stylesheet.template).unwrap_or_else(|| {
            warn!("JSON target stylesheet has no {} variable", structured::MAPPED_XML);
            stylesheet.template.as_slice()
        })
    } else {
        stylesheet.template.as_slice()
    };

    let mut reader = TemplateReader {
        target,
        namespaces: &stylesheet.namespaces,
        json: tree.target_is_json,
        unmatched: 0,
    };
    tree.children = reader.instructions(body, None);
    let unmatched = reader.unmatched;

    let mut nodes = 0;
    tree.visit(|_, _, _| nodes += 1);
    info!(nodes, unmatched, parameters = tree.parameters.len(), "deserialized mapping");
    Ok(tree)
}

struct TemplateReader<'a> {
    target: &'a mut Document,
    namespaces: &'a NamespaceMap,
    json: bool,
    unmatched: usize,
}

impl TemplateReader<'_> {
    fn instructions(
        &mut self,
        instructions: &[Instruction],
        parent: Option<FieldId>,
    ) -> Vec<MappingNode> {
        instructions
            .iter()
            .filter_map(|instruction| self.instruction(instruction, parent))
            .collect()
    }

    fn instruction(
        &mut self,
        instruction: &Instruction,
        parent: Option<FieldId>,
    ) -> Option<MappingNode> {
        let node = match instruction {
            Instruction::Element(element) => {
                let field = self.element_field(element, parent)?;
                let item = FieldItem::from_field(self.target, field);
                let children = self.instructions(&element.children, Some(field));
                MappingNode::field(item).with_children(children)
            }
            Instruction::Attribute {
                name,
                namespace_uri,
                children,
            } => {
                let (prefix, local_name) = match name.split_once(':') {
                    Some((prefix, local)) => (Some(prefix), local),
                    None => (None, name.as_str()),
                };
                let namespace_uri = namespace_uri.clone().or_else(|| {
                    prefix
                        .and_then(|prefix| self.namespaces.uri_for(prefix))
                        .map(str::to_string)
                });
                let matcher = FieldMatcher::Named {
                    namespace_uri,
                    local_name: local_name.to_string(),
                    attribute: true,
                };
                let Some(field) = find_child(self.target, parent, &matcher) else {
                    warn!(attribute = %name, "no target attribute matches; skipped");
                    self.unmatched += 1;
                    return None;
                };
                let item = FieldItem::from_field(self.target, field);
                MappingNode::field(item).with_children(self.instructions(children, Some(field)))
            }
            Instruction::ValueOf { select } => {
                MappingNode::value_selector(ValueKind::ValueOf, select.clone())
            }
            Instruction::CopyOf { select } => {
                MappingNode::value_selector(ValueKind::CopyOf, select.clone())
            }
            Instruction::Text(text) => {
                MappingNode::value_selector(ValueKind::ValueOf, Expr::string(text.as_str()))
            }
            Instruction::ForEach { select, children } => MappingNode::new(NodeKind::ForEach {
                select: select.clone(),
            })
            .with_children(self.instructions(children, parent)),
            Instruction::If { test, children } => {
                MappingNode::new(NodeKind::If { test: test.clone() })
                    .with_children(self.instructions(children, parent))
            }
            Instruction::Choose { whens, otherwise } => {
                let mut branches: Vec<MappingNode> = whens
                    .iter()
                    .map(|when| {
                        MappingNode::new(NodeKind::When {
                            test: when.test.clone(),
                        })
                        .with_children(self.instructions(&when.children, parent))
                    })
                    .collect();
                if let Some(otherwise) = otherwise {
                    branches.push(
                        MappingNode::new(NodeKind::Otherwise)
                            .with_children(self.instructions(otherwise, parent)),
                    );
                }
                MappingNode::new(NodeKind::Choose).with_children(branches)
            }
            Instruction::Variable {
                name,
                select: Some(select),
                ..
            } => MappingNode::new(NodeKind::Variable {
                name: name.clone(),
                expression: select.clone(),
            }),
            Instruction::Variable { name, select: None, .. } => {
                warn!(%name, "variable without select skipped");
                return None;
            }
        };
        Some(node)
    }

    /// Target field a literal result element builds
    fn element_field(
        &mut self,
        element: &LiteralElement,
        parent: Option<FieldId>,
    ) -> Option<FieldId> {
        let matcher = if self.json {
            let kind = (element.namespace_uri.as_deref() == Some(FN_NAMESPACE))
                .then(|| JsonKind::from_element_name(&element.local_name))
                .flatten();
            match kind {
                Some(kind) => FieldMatcher::Json {
                    kind,
                    key: element.attribute(KEY_ATTRIBUTE).map(str::to_string),
                },
                None => {
                    warn!(
                        element = %element.local_name,
                        "JSON output element is not in the {FN_PREFIX} namespace; skipped"
                    );
                    self.unmatched += 1;
                    return None;
                }
            }
        } else {
            FieldMatcher::Named {
                namespace_uri: element.namespace_uri.clone(),
                local_name: element.local_name.clone(),
                attribute: false,
            }
        };
        let found = find_child(self.target, parent, &matcher);
        if found.is_none() {
            warn!(element = %element.local_name, "no target field matches element; skipped");
            self.unmatched += 1;
        }
        found
    }
}
