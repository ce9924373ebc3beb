//! Integration tests for building mappings field by field and writing them
//! as stylesheets, for XML and JSON documents.

use dm_ir::{DefinitionType, Document, DocumentDefinition, DocumentId, DocumentType, FieldId};
use dm_mapping::{
    MappingTree, NodeKind, SourceDocuments, ValueKind, deserialize, extract_mapping_links,
    serialize, xpath,
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

fn account(document_type: DocumentType, name: &str) -> Document {
    build(
        DocumentDefinition::new(document_type, DefinitionType::JsonSchema, name)
            .with_file("Account.schema.json", fixture("Account.schema.json")),
    )
}

fn field(document: &mut Document, schema_path: &str) -> FieldId {
    let namespaces = document.namespace_map().clone();
    document.field_at(schema_path, &namespaces).unwrap()
}

fn source_field(sources: &mut SourceDocuments, id: &DocumentId, schema_path: &str) -> FieldId {
    field(sources.get_mut(id).unwrap(), schema_path)
}

struct Session {
    tree: MappingTree,
    target: Document,
    sources: SourceDocuments,
}

impl Session {
    fn new(target: Document, sources: SourceDocuments) -> Self {
        Self {
            tree: MappingTree::new(&target),
            target,
            sources,
        }
    }

    fn map(&mut self, target_path: &str, source: &DocumentId, source_path: &str) -> String {
        let target_field = field(&mut self.target, target_path);
        let source_field = source_field(&mut self.sources, source, source_path);
        self.tree
            .map_field(
                &mut self.target,
                target_field,
                &mut self.sources,
                source,
                source_field,
            )
            .unwrap()
    }

    fn selector(&self, schema_path: &str) -> (ValueKind, String) {
        let node = self.tree.find_field_node(schema_path).unwrap();
        let (kind, expression) = node.selector().unwrap();
        (kind, expression.to_string())
    }
}

fn ship_order_session() -> Session {
    let sources = SourceDocuments::new()
        .with(ship_order(DocumentType::SourceBody))
        .with(build(DocumentDefinition::new(
            DocumentType::Param,
            DefinitionType::Primitive,
            "sourceParam1",
        )));
    Session::new(ship_order(DocumentType::TargetBody), sources)
}

#[test]
fn test_repeating_fields_are_iterated() {
    let mut session = ship_order_session();
    let body = DocumentId::SourceBody;

    let path = session.map("/ns0:ShipOrder/Item/Title", &body, "/ns0:ShipOrder/Item/Title");
    assert_eq!(path, "targetBody:/ns0:ShipOrder/Item/Title");
    assert_eq!(
        session.selector("/ns0:ShipOrder/Item/Title"),
        (ValueKind::ValueOf, "Title".to_string())
    );

    let root = &session.tree.children[0];
    assert_eq!(root.children.len(), 1);
    match &root.children[0].kind {
        NodeKind::ForEach { select } => assert_eq!(select.to_string(), "/ns0:ShipOrder/Item"),
        other => panic!("expected for-each, got {other:?}"),
    }

    // A second field of the same item reuses the iteration
    session.map("/ns0:ShipOrder/Item/Price", &body, "/ns0:ShipOrder/Item/Price");
    assert_eq!(session.tree.children[0].children.len(), 1);
    assert_eq!(
        session.selector("/ns0:ShipOrder/Item/Price"),
        (ValueKind::ValueOf, "Price".to_string())
    );
}

#[test]
fn test_structured_and_parameter_sources() {
    let mut session = ship_order_session();
    session.map("/ns0:ShipOrder/ShipTo", &DocumentId::SourceBody, "/ns0:ShipOrder/ShipTo");
    assert_eq!(
        session.selector("/ns0:ShipOrder/ShipTo"),
        (ValueKind::CopyOf, "/ns0:ShipOrder/ShipTo".to_string())
    );

    let param = DocumentId::Param("sourceParam1".to_string());
    session.map("/ns0:ShipOrder/OrderPerson", &param, "/sourceParam1");
    assert_eq!(
        session.selector("/ns0:ShipOrder/OrderPerson"),
        (ValueKind::ValueOf, "$sourceParam1".to_string())
    );
    assert_eq!(session.tree.parameters.len(), 1);
    assert_eq!(session.tree.parameters[0].name, "sourceParam1");

    let text = serialize(&session.tree).unwrap();
    assert!(text.contains(r#"<xsl:param name="sourceParam1"/>"#), "{text}");
    assert!(text.contains(r#"<xsl:copy-of select="/ns0:ShipOrder/ShipTo"/>"#), "{text}");

    let links = extract_mapping_links(&session.tree, &mut session.sources, None);
    assert_eq!(links.len(), 2);
    assert_eq!(links[1].source_node_path, "param:sourceParam1:/sourceParam1");
    assert_eq!(links[1].target_node_path, "targetBody:/ns0:ShipOrder/OrderPerson");
}

#[test]
fn test_edit_actions() {
    let mut session = ship_order_session();
    let body = DocumentId::SourceBody;
    session.map("/ns0:ShipOrder/OrderPerson", &body, "/ns0:ShipOrder/OrderPerson");
    session.map("/ns0:ShipOrder/Item/Note", &body, "/ns0:ShipOrder/Item/Note");

    let test = xpath::parse("/ns0:ShipOrder/OrderPerson != ''").unwrap();
    let if_path = session.tree.add_if("/ns0:ShipOrder/OrderPerson", test).unwrap();
    assert_eq!(if_path, "targetBody:/ns0:ShipOrder/if-0");

    let test = xpath::parse("Note").unwrap();
    let choose_path = session.tree.add_choose("/ns0:ShipOrder/Item/Note", test).unwrap();
    assert_eq!(choose_path, "targetBody:/ns0:ShipOrder/Item/choose-0");

    let links = extract_mapping_links(&session.tree, &mut session.sources, None);
    let targets: Vec<&str> = links
        .iter()
        .map(|link| link.target_node_path.as_str())
        .collect();
    assert!(targets.contains(&"targetBody:/ns0:ShipOrder/if-0"));
    assert!(targets.contains(&"targetBody:/ns0:ShipOrder/Item/choose-0/when-0"));

    session
        .tree
        .remove_field_mapping("/ns0:ShipOrder/OrderPerson")
        .unwrap();
    assert!(session.tree.find_field_node("/ns0:ShipOrder/OrderPerson").is_none());
    assert!(session.tree.remove_field_mapping("/ns0:ShipOrder/OrderPerson").is_err());
}

#[test]
fn test_json_target_and_parameter() {
    let sources = SourceDocuments::new()
        .with(ship_order(DocumentType::SourceBody))
        .with(account(DocumentType::Param, "acct"));
    let mut session = Session::new(account(DocumentType::TargetBody, "Account"), sources);
    assert!(session.tree.target_is_json);

    let acct = DocumentId::Param("acct".to_string());
    session.map("/map/id", &acct, "/map/id");
    assert_eq!(
        session.selector("/map/id"),
        (
            ValueKind::ValueOf,
            "$acct-x/xf:map/xf:number[@key = 'id']".to_string()
        )
    );
    assert!(session.tree.parameters[0].is_json);

    let path = session.map(
        "/map/tags/string",
        &DocumentId::SourceBody,
        "/ns0:ShipOrder/Item/Title",
    );
    assert_eq!(path, "targetBody:/map/tags/string");
    // Expression prefixes are bound in the mapping, apart from the source's
    let root = &session.tree.children[0];
    let tags = root.children.last().unwrap();
    match &tags.children[0].kind {
        NodeKind::ForEach { select } => assert_eq!(select.to_string(), "/ns1:ShipOrder/Item"),
        other => panic!("expected for-each, got {other:?}"),
    }
    assert_eq!(
        session.selector("/map/tags/string"),
        (ValueKind::ValueOf, "Title".to_string())
    );

    let text = serialize(&session.tree).unwrap();
    assert!(text.contains(r#"<xsl:output method="text" indent="yes"/>"#), "{text}");
    assert!(
        text.contains(r#"<xsl:variable name="acct-x" select="json-to-xml($acct)"/>"#),
        "{text}"
    );
    assert!(text.contains(r#"<xf:array key="tags">"#), "{text}");
    assert!(text.contains("xml-to-json($mapped-xml)"), "{text}");

    let links = extract_mapping_links(&session.tree, &mut session.sources, None);
    let pairs: Vec<(&str, &str)> = links
        .iter()
        .map(|link| (link.source_node_path.as_str(), link.target_node_path.as_str()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("param:acct:/map/id", "targetBody:/map/id"),
            ("sourceBody:/ns0:ShipOrder/Item", "targetBody:/map/tags/for-each-0"),
            ("sourceBody:/ns0:ShipOrder/Item/Title", "targetBody:/map/tags/string"),
        ]
    );

    let reread = deserialize(&text, &mut session.target, &session.sources).unwrap();
    assert_eq!(reread, session.tree);
}
