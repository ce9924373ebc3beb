//! Integration tests for reading the ShipOrder stylesheet and extracting
//! its mapping links.

use dm_ir::{DefinitionType, Document, DocumentDefinition, DocumentType};
use dm_mapping::{
    MappingLink, MappingTree, NodeKind, SourceDocuments, ValueKind, deserialize,
    extract_mapping_links, is_in_selected_mapping, serialize,
};
use dm_schema::create_document;
use std::path::PathBuf;

fn fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(name);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", path.display(), err))
}

fn build(definition: DocumentDefinition) -> Document {
    let result = create_document(&definition);
    result
        .document
        .unwrap_or_else(|| panic!("no document: {:?}", result.errors))
}

fn ship_order(document_type: DocumentType) -> Document {
    build(
        DocumentDefinition::new(document_type, DefinitionType::XmlSchema, "ShipOrder")
            .with_file("ShipOrder.xsd", fixture("ShipOrder.xsd")),
    )
}

fn sources() -> SourceDocuments {
    SourceDocuments::new()
        .with(ship_order(DocumentType::SourceBody))
        .with(build(DocumentDefinition::new(
            DocumentType::Param,
            DefinitionType::Primitive,
            "sourceParam1",
        )))
}

fn load() -> (MappingTree, Document, SourceDocuments) {
    let mut target = ship_order(DocumentType::TargetBody);
    let sources = sources();
    let tree = deserialize(&fixture("ShipOrderToShipOrder.xsl"), &mut target, &sources).unwrap();
    (tree, target, sources)
}

fn pairs(links: &[MappingLink]) -> Vec<(&str, &str)> {
    links
        .iter()
        .map(|link| (link.source_node_path.as_str(), link.target_node_path.as_str()))
        .collect()
}

#[test]
fn test_deserialized_tree_shape() {
    let (tree, _, _) = load();
    assert!(!tree.target_is_json);
    assert_eq!(tree.parameters.len(), 1);
    assert_eq!(tree.parameters[0].name, "sourceParam1");
    assert!(!tree.parameters[0].is_json);

    assert_eq!(tree.children.len(), 1);
    let root = &tree.children[0];
    assert_eq!(
        root.field_item().map(|item| item.schema_path.as_str()),
        Some("/ns0:ShipOrder")
    );
    let kinds: Vec<&str> = root
        .children
        .iter()
        .map(|node| match &node.kind {
            NodeKind::Field(item) => item.name.as_str(),
            NodeKind::If { .. } => "if",
            NodeKind::ForEach { .. } => "for-each",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["OrderId", "if", "ShipTo", "for-each"]);

    let ship_to = tree.find_field_node("/ns0:ShipOrder/ShipTo").unwrap();
    let (kind, expression) = ship_to.selector().unwrap();
    assert_eq!(kind, ValueKind::CopyOf);
    assert_eq!(expression.to_string(), "/ns0:ShipOrder/ShipTo/*");

    let mut paths = Vec::new();
    tree.visit(|node, path, _| {
        if !matches!(node.kind, NodeKind::ValueSelector { .. }) {
            paths.push(path.to_string());
        }
    });
    assert!(paths.contains(&"targetBody:/ns0:ShipOrder/Item/choose-0/when-0".to_string()));
    assert!(paths.contains(&"targetBody:/ns0:ShipOrder/Item/choose-0/otherwise-0".to_string()));
}

#[test]
fn test_ship_order_links() {
    let (tree, _, mut sources) = load();
    let links = extract_mapping_links(&tree, &mut sources, None);
    assert_eq!(
        pairs(&links),
        vec![
            (
                "sourceBody:/ns0:ShipOrder/@OrderId",
                "targetBody:/ns0:ShipOrder/@OrderId"
            ),
            (
                "param:sourceParam1:/sourceParam1",
                "targetBody:/ns0:ShipOrder/if-0"
            ),
            (
                "param:sourceParam1:/sourceParam1",
                "targetBody:/ns0:ShipOrder/OrderPerson"
            ),
            (
                "sourceBody:/ns0:ShipOrder/ShipTo",
                "targetBody:/ns0:ShipOrder/ShipTo"
            ),
            (
                "sourceBody:/ns0:ShipOrder/Item",
                "targetBody:/ns0:ShipOrder/for-each-0"
            ),
            (
                "sourceBody:/ns0:ShipOrder/Item/Title",
                "targetBody:/ns0:ShipOrder/Item/Title"
            ),
            (
                "sourceBody:/ns0:ShipOrder/Item/Note",
                "targetBody:/ns0:ShipOrder/Item/choose-0/when-0"
            ),
            (
                "sourceBody:/ns0:ShipOrder/Item/Note",
                "targetBody:/ns0:ShipOrder/Item/Note"
            ),
            (
                "sourceBody:/ns0:ShipOrder/Item/Title",
                "targetBody:/ns0:ShipOrder/Item/Note"
            ),
            (
                "sourceBody:/ns0:ShipOrder/Item/Quantity",
                "targetBody:/ns0:ShipOrder/Item/Quantity"
            ),
            (
                "sourceBody:/ns0:ShipOrder/Item/Price",
                "targetBody:/ns0:ShipOrder/Item/Price"
            ),
        ]
    );
    assert!(links.iter().all(|link| !link.is_selected));
}

#[test]
fn test_selected_links_draw_last() {
    let (tree, _, mut sources) = load();
    let selected = "targetBody:/ns0:ShipOrder/Item/Note";
    let links = extract_mapping_links(&tree, &mut sources, Some(selected));
    assert_eq!(links.len(), 11);

    let flags: Vec<bool> = links.iter().map(|link| link.is_selected).collect();
    assert_eq!(flags.iter().filter(|&&flag| flag).count(), 2);
    assert!(flags[9] && flags[10]);
    assert_eq!(
        pairs(&links[9..]),
        vec![
            (
                "sourceBody:/ns0:ShipOrder/Item/Note",
                "targetBody:/ns0:ShipOrder/Item/Note"
            ),
            (
                "sourceBody:/ns0:ShipOrder/Item/Title",
                "targetBody:/ns0:ShipOrder/Item/Note"
            ),
        ]
    );
    // Unselected links keep their order
    assert_eq!(links[0].source_node_path, "sourceBody:/ns0:ShipOrder/@OrderId");
    assert_eq!(links[8].target_node_path, "targetBody:/ns0:ShipOrder/Item/Price");

    assert!(is_in_selected_mapping(&links, selected));
    assert!(is_in_selected_mapping(&links, "sourceBody:/ns0:ShipOrder/Item/Title"));
    assert!(!is_in_selected_mapping(&links, "sourceBody:/ns0:ShipOrder/Item/Price"));
}

#[test]
fn test_selecting_a_source_field() {
    let (tree, _, mut sources) = load();
    let links = extract_mapping_links(
        &tree,
        &mut sources,
        Some("param:sourceParam1:/sourceParam1"),
    );
    let selected: Vec<&str> = links
        .iter()
        .filter(|link| link.is_selected)
        .map(|link| link.target_node_path.as_str())
        .collect();
    assert_eq!(
        selected,
        vec![
            "targetBody:/ns0:ShipOrder/if-0",
            "targetBody:/ns0:ShipOrder/OrderPerson"
        ]
    );
}

#[test]
fn test_stylesheet_round_trip() -> anyhow::Result<()> {
    let (tree, mut target, mut sources) = load();
    let text = serialize(&tree)?;
    assert!(text.contains(r#"<xsl:param name="sourceParam1"/>"#), "{text}");
    assert!(text.contains(r#"<xsl:for-each select="/ns0:ShipOrder/Item">"#), "{text}");
    assert!(text.contains(r#"<xsl:when test="Note">"#), "{text}");

    let reread = deserialize(&text, &mut target, &sources)?;
    assert_eq!(reread, tree);
    assert_eq!(extract_mapping_links(&reread, &mut sources, None).len(), 11);
    Ok(())
}

#[test]
fn test_unmatched_elements_are_skipped() {
    let mut target = ship_order(DocumentType::TargetBody);
    let text = r#"<xsl:stylesheet version="3.0"
        xmlns:xsl="http://www.w3.org/1999/XSL/Transform"
        xmlns:ns0="io.kaoto.datamapper.poc.test">
      <xsl:template match="/">
        <ns0:ShipOrder>
          <Bogus><xsl:value-of select="/ns0:ShipOrder/OrderPerson"/></Bogus>
          <OrderPerson><xsl:value-of select="/ns0:ShipOrder/OrderPerson"/></OrderPerson>
        </ns0:ShipOrder>
      </xsl:template>
    </xsl:stylesheet>"#;
    let tree = deserialize(text, &mut target, &sources()).unwrap();
    assert_eq!(tree.children[0].children.len(), 1);
    assert!(tree.find_field_node("/ns0:ShipOrder/OrderPerson").is_some());
}

#[test]
fn test_malformed_stylesheet() {
    let mut target = ship_order(DocumentType::TargetBody);
    let err = deserialize("<xsl:stylesheet", &mut target, &sources()).unwrap_err();
    assert!(err.to_string().starts_with("Malformed stylesheet"), "{err}");
}
