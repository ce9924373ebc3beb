//! Mapping tree to stylesheet

use crate::Result;
use crate::structured::{self, FN_PREFIX, KEY_ATTRIBUTE};
use crate::tree::{MappingNode, MappingTree, NodeKind, ValueKind};
use crate::xslt::{Instruction, LiteralElement, OutputMethod, Stylesheet, When};
use dm_ir::{FN_NAMESPACE, NamespaceMap};
use tracing::debug;

/// Write a mapping tree as an XSLT stylesheet
pub fn serialize(tree: &MappingTree) -> Result<String> {
    to_stylesheet(tree).to_xml()
}

/// Stylesheet AST for a mapping tree
pub fn to_stylesheet(tree: &MappingTree) -> Stylesheet {
    let mut namespaces = tree.namespaces.clone();
    let has_json_param = tree.parameters.iter().any(|param| param.is_json);
    if tree.target_is_json || has_json_param {
        structured::ensure_prefix(&mut namespaces);
    }

    let body = instructions(&tree.children, &namespaces);
    let (output, template) = if tree.target_is_json {
        (OutputMethod::Text, structured::wrap_json_output(body))
    } else {
        (OutputMethod::Xml, body)
    };

    Stylesheet {
        params: tree.parameters.iter().map(|param| param.name.clone()).collect(),
        variables: tree
            .parameters
            .iter()
            .filter(|param| param.is_json)
            .map(|param| structured::json_param_declaration(&param.name))
            .collect(),
        namespaces,
        output,
        template,
    }
}

fn instructions(nodes: &[MappingNode], namespaces: &NamespaceMap) -> Vec<Instruction> {
    nodes
        .iter()
        .filter_map(|node| instruction(node, namespaces))
        .collect()
}

fn instruction(node: &MappingNode, namespaces: &NamespaceMap) -> Option<Instruction> {
    let children = || instructions(&node.children, namespaces);
    let instruction = match &node.kind {
        NodeKind::Field(item) => {
            if let Some(kind) = item.json_kind {
                let mut element =
                    LiteralElement::new(Some(FN_PREFIX), kind.as_str(), Some(FN_NAMESPACE));
                if !item.name.is_empty() {
                    element
                        .attributes
                        .push((KEY_ATTRIBUTE.to_string(), item.name.clone()));
                }
                element.children = children();
                Instruction::Element(element)
            } else {
                let prefix = item
                    .namespace_uri
                    .as_deref()
                    .and_then(|uri| namespaces.prefix_for(uri))
                    .filter(|prefix| !prefix.is_empty());
                if item.is_attribute {
                    let name = match prefix {
                        Some(prefix) => format!("{prefix}:{}", item.name),
                        None => item.name.clone(),
                    };
                    Instruction::Attribute {
                        name,
                        namespace_uri: match prefix {
                            Some(_) => None,
                            None => item.namespace_uri.clone(),
                        },
                        children: children(),
                    }
                } else {
                    let mut element = LiteralElement::new(
                        prefix,
                        item.name.as_str(),
                        item.namespace_uri.as_deref(),
                    );
                    element.children = children();
                    Instruction::Element(element)
                }
            }
        }
        NodeKind::ForEach { select } => Instruction::ForEach {
            select: select.clone(),
            children: children(),
        },
        NodeKind::If { test } => Instruction::If {
            test: test.clone(),
            children: children(),
        },
        NodeKind::Choose => {
            let mut whens = Vec::new();
            let mut otherwise = None;
            for branch in &node.children {
                match &branch.kind {
                    NodeKind::When { test } => whens.push(When {
                        test: test.clone(),
                        children: instructions(&branch.children, namespaces),
                    }),
                    NodeKind::Otherwise => {
                        otherwise = Some(instructions(&branch.children, namespaces));
                    }
                    other => debug!(?other, "ignoring non-branch node in choose"),
                }
            }
            if whens.is_empty() {
                debug!("dropping choose without when branches");
                return None;
            }
            Instruction::Choose { whens, otherwise }
        }
        NodeKind::When { .. } | NodeKind::Otherwise => {
            debug!("dropping branch outside choose");
            return None;
        }
        NodeKind::ValueSelector { kind, expression } => match kind {
            ValueKind::ValueOf => Instruction::ValueOf {
                select: expression.clone(),
            },
            ValueKind::CopyOf => Instruction::CopyOf {
                select: expression.clone(),
            },
        },
        NodeKind::Variable { name, expression } => Instruction::Variable {
            name: name.clone(),
            select: Some(expression.clone()),
            children: Vec::new(),
        },
    };
    Some(instruction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{FieldItem, Parameter};
    use crate::xpath;
    use dm_ir::{DocumentId, JsonKind};

    fn json_tree() -> MappingTree {
        let mut namespaces = NamespaceMap::new();
        structured::ensure_prefix(&mut namespaces);
        let field = |schema_path: &str, name: &str, kind| {
            MappingNode::field(FieldItem {
                schema_path: schema_path.to_string(),
                name: name.to_string(),
                namespace_uri: None,
                is_attribute: false,
                json_kind: Some(kind),
            })
        };
        MappingTree {
            target: DocumentId::TargetBody,
            namespaces,
            target_is_json: true,
            parameters: vec![Parameter {
                name: "cart".to_string(),
                is_json: true,
            }],
            children: vec![field("/map", "", JsonKind::Map).with_children(vec![
                field("/map/id", "id", JsonKind::Number).with_children(vec![
                    MappingNode::value_selector(
                        ValueKind::ValueOf,
                        xpath::parse("$cart-x/xf:map/xf:number[@key='id']").unwrap(),
                    ),
                ]),
            ])],
        }
    }

    #[test]
    fn test_json_target_is_wrapped() {
        let stylesheet = to_stylesheet(&json_tree());
        assert_eq!(stylesheet.output, OutputMethod::Text);
        assert_eq!(stylesheet.variables.len(), 1);
        assert_eq!(stylesheet.variables[0].name, "cart-x");
        assert!(structured::unwrap_json_output(&stylesheet.template).is_some());

        let text = stylesheet.to_xml().unwrap();
        assert!(text.contains(r#"<xsl:variable name="mapped-xml">"#), "{text}");
        assert!(text.contains(r#"<xsl:value-of select="xml-to-json($mapped-xml)"/>"#), "{text}");
        assert!(text.contains(r#"<xf:number key="id">"#), "{text}");
        assert!(
            text.contains(r#"select="$cart-x/xf:map/xf:number[@key = 'id']""#),
            "{text}"
        );
    }

    #[test]
    fn test_branches_outside_choose_are_dropped() {
        let nodes = vec![MappingNode::new(NodeKind::Otherwise)];
        assert!(instructions(&nodes, &NamespaceMap::new()).is_empty());
    }
}
