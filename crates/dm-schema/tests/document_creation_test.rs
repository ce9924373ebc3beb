//! Integration tests for building documents from schema definitions.

use dm_ir::path;
use dm_ir::{
    CanonicalType, DefinitionType, Document, DocumentDefinition, DocumentType, FieldId, MaxOccurs,
    Occurs, PathCollector, RootElementOption, walk,
};
use dm_schema::{ValidationStatus, create_document};
use std::path::PathBuf;

const SHIP_ORDER_NS: &str = "io.kaoto.datamapper.poc.test";

fn fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(name);
    std::fs::read_to_string(&path).unwrap()
}

fn xml_definition(files: &[(&str, &str)]) -> DocumentDefinition {
    files.iter().fold(
        DocumentDefinition::new(DocumentType::SourceBody, DefinitionType::XmlSchema, "Body"),
        |definition, (name, fixture_name)| definition.with_file(*name, fixture(fixture_name)),
    )
}

fn build(definition: &DocumentDefinition) -> Document {
    let result = create_document(definition);
    assert_ne!(
        result.validation_status,
        ValidationStatus::Error,
        "unexpected errors: {:?}",
        result.errors
    );
    result.document.unwrap()
}

fn child_names(document: &mut Document, id: FieldId) -> Vec<String> {
    document
        .children(id)
        .into_iter()
        .map(|child| document.field(child).name().to_string())
        .collect()
}

#[test]
fn test_ship_order_document() {
    let definition = xml_definition(&[("ShipOrder.xsd", "ShipOrder.xsd")]);
    let result = create_document(&definition);
    assert_eq!(result.validation_status, ValidationStatus::Success);
    assert_eq!(
        result.root_element_options,
        vec![RootElementOption::new(SHIP_ORDER_NS, "ShipOrder")]
    );

    let mut document = result.document.unwrap();
    assert_eq!(document.namespace_map().prefix_for(SHIP_ORDER_NS), Some("ns0"));

    let root = document.root_fields()[0];
    assert_eq!(document.field(root).name(), "ShipOrder");
    assert_eq!(document.field(root).namespace_uri(), Some(SHIP_ORDER_NS));
    assert_eq!(
        child_names(&mut document, root),
        vec!["OrderId", "OrderPerson", "ShipTo", "Item"]
    );

    let children = document.children(root);
    let order_id = document.field(children[0]);
    assert!(order_id.is_attribute());
    assert_eq!(order_id.occurs(), Occurs::ONE);
    // Local declarations are unqualified by default
    assert_eq!(document.field(children[1]).namespace_uri(), None);

    let item = children[3];
    assert_eq!(document.field(item).max_occurs(), MaxOccurs::Unbounded);
    assert_eq!(
        child_names(&mut document, item),
        vec!["Title", "Note", "Quantity", "Price"]
    );
    let item_children = document.children(item);
    assert_eq!(document.field(item_children[1]).min_occurs(), 0);
    assert_eq!(document.field(item_children[2]).field_type(), CanonicalType::Integer);
    assert_eq!(document.field(item_children[3]).field_type(), CanonicalType::Decimal);

    let namespaces = document.namespace_map().clone();
    let ship_to = document.field_at("/ns0:ShipOrder/ShipTo", &namespaces).unwrap();
    assert_eq!(ship_to, children[2]);
    assert_eq!(
        path::build(&document, children[0], &namespaces),
        "/ns0:ShipOrder/@OrderId"
    );
}

#[test]
fn test_self_referencing_type_is_finite() {
    let definition = xml_definition(&[("Recursive.xsd", "Recursive.xsd")]);
    let mut document = build(&definition);
    assert_eq!(document.fragments().len(), 2);

    let root = document.root_fields()[0];
    let mut current = root;
    for _ in 0..5 {
        assert_eq!(
            child_names(&mut document, current),
            vec!["id", "Label", "Child", "Link"]
        );
        current = document.children(current)[2];
    }

    let before = document.materialized_len();
    let namespaces = document.namespace_map().clone();
    let mut collector = PathCollector::new(namespaces.clone());
    walk(&mut document, &mut collector, 6);
    assert!(document.materialized_len() > before);
    for (id, schema_path) in &collector.paths {
        assert_eq!(path::navigate_to_field(&mut document, schema_path, &namespaces), Some(*id));
    }

    let deep = "/ns0:Root/ns0:Link/ns0:Target/ns0:Child/ns0:Link/ns0:Target/ns0:Label";
    assert!(document.field_at(deep, &namespaces).is_ok());
}

#[test]
fn test_choice_compositors_are_fields() {
    let definition = xml_definition(&[("Choice.xsd", "Choice.xsd")]);
    let mut document = build(&definition);
    let namespaces = document.namespace_map().clone();

    let root = document.root_fields()[0];
    let children = document.children(root);
    assert_eq!(children.len(), 4);
    assert!(document.field(children[1]).is_choice());
    assert!(document.field(children[3]).is_choice());
    assert_eq!(document.field(children[3]).occurs(), Occurs::OPTIONAL);
    assert_eq!(child_names(&mut document, children[1]), vec!["Card", "Transfer"]);

    assert_eq!(
        path::build(&document, children[3], &namespaces),
        "/ns0:Payment/{choice:1}"
    );
    let telex = document
        .field_at("/ns0:Payment/{choice:1}/{choice:0}/ns0:Telex", &namespaces)
        .unwrap();
    assert_eq!(document.field(telex).name(), "Telex");

    // Choice members are also reachable without naming the choice
    let iban = document
        .field_at("/ns0:Payment/ns0:Transfer/ns0:Iban", &namespaces)
        .unwrap();
    assert_eq!(
        path::build(&document, iban, &namespaces),
        "/ns0:Payment/{choice:0}/ns0:Transfer/ns0:Iban"
    );
}

#[test]
fn test_sequence_inside_choice_is_one_member() {
    let schema = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           targetNamespace="urn:example:contact" elementFormDefault="qualified">
  <xs:element name="Contact">
    <xs:complexType>
      <xs:choice>
        <xs:sequence>
          <xs:element name="Street" type="xs:string"/>
          <xs:element name="City" type="xs:string"/>
        </xs:sequence>
        <xs:element name="Email" type="xs:string"/>
      </xs:choice>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;
    let definition =
        DocumentDefinition::new(DocumentType::SourceBody, DefinitionType::XmlSchema, "Body")
            .with_file("Contact.xsd", schema);
    let result = create_document(&definition);
    assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    let mut document = result.document.unwrap();
    let namespaces = document.namespace_map().clone();

    let choice = document.field_at("/ns0:Contact/{choice:0}", &namespaces).unwrap();
    let members = document.children(choice);
    assert_eq!(members.len(), 2);
    assert!(document.field(members[0]).is_sequence());
    assert_eq!(child_names(&mut document, members[0]), vec!["Street", "City"]);
    assert_eq!(document.field(members[1]).name(), "Email");

    let city = document
        .field_at("/ns0:Contact/{choice:0}/{sequence:0}/ns0:City", &namespaces)
        .unwrap();
    assert_eq!(document.field(city).parent(), Some(members[0]));
    // Compositors may be left out of a path
    assert_eq!(document.field_at("/ns0:Contact/ns0:City", &namespaces).unwrap(), city);
}

#[test]
fn test_include_and_import_set() {
    let definition = xml_definition(&[
        ("Order.xsd", "multi/Order.xsd"),
        ("OrderTypes.xsd", "multi/OrderTypes.xsd"),
        ("Common.xsd", "multi/Common.xsd"),
    ]);
    let mut document = build(&definition);
    let namespaces = document.namespace_map().clone();
    assert!(namespaces.contains_uri("urn:example:order"));
    assert!(namespaces.contains_uri("urn:example:common"));

    let root = document.root_fields()[0];
    assert_eq!(document.field(root).name(), "Order");
    assert_eq!(child_names(&mut document, root), vec!["Header", "Customer"]);

    let header = document.children(root)[0];
    assert_eq!(child_names(&mut document, header), vec!["Number", "Date"]);
    let customer = document.children(root)[1];
    assert_eq!(child_names(&mut document, customer), vec!["Name", "Email"]);
    let email = document.children(customer)[1];
    assert_eq!(
        document.field(email).namespace_uri(),
        Some("urn:example:common")
    );
}

#[test]
fn test_missing_import_is_reported_with_file() {
    let definition = xml_definition(&[
        ("Order.xsd", "multi/Order.xsd"),
        ("OrderTypes.xsd", "multi/OrderTypes.xsd"),
    ]);
    let result = create_document(&definition);
    assert_eq!(result.validation_status, ValidationStatus::Error);
    assert!(result.document.is_none());
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].file_path.as_deref(), Some("Order.xsd"));
    assert!(result.errors[0].message.contains("common/Common.xsd"));
}

#[test]
fn test_dependency_cycle_is_reported() {
    let schema = |location: &str| {
        format!(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"><xs:include schemaLocation="{location}"/><xs:element name="E" type="xs:string"/></xs:schema>"#
        )
    };
    let definition =
        DocumentDefinition::new(DocumentType::SourceBody, DefinitionType::XmlSchema, "Body")
            .with_file("a.xsd", schema("b.xsd"))
            .with_file("b.xsd", schema("a.xsd"));
    let result = create_document(&definition);
    assert_eq!(result.validation_status, ValidationStatus::Error);
    assert!(result.errors[0].message.contains("a.xsd, b.xsd"));
}

#[test]
fn test_no_top_level_element() {
    let definition = xml_definition(&[("NoTopLevel.xsd", "NoTopLevel.xsd")]);
    let result = create_document(&definition);
    assert_eq!(result.validation_status, ValidationStatus::Error);
    assert!(result.document.is_none());
    assert!(
        result.errors[0]
            .message
            .to_lowercase()
            .contains("no top-level element")
    );
}

#[test]
fn test_malformed_schema_names_the_file() {
    let definition = xml_definition(&[("Malformed.xsd", "Malformed.xsd")]);
    let result = create_document(&definition);
    assert_eq!(result.validation_status, ValidationStatus::Error);
    assert_eq!(result.errors[0].file_path.as_deref(), Some("Malformed.xsd"));
}

#[test]
fn test_unresolved_root_element_choice() {
    let definition = xml_definition(&[("ShipOrder.xsd", "ShipOrder.xsd")])
        .with_root_element(RootElementOption::new(SHIP_ORDER_NS, "Missing"));
    let result = create_document(&definition);
    assert_eq!(result.validation_status, ValidationStatus::Error);
    assert!(result.errors[0].message.contains("Missing"));
    assert_eq!(result.root_element_options.len(), 1);
}

#[test]
fn test_json_schema_document() {
    let definition =
        DocumentDefinition::new(DocumentType::TargetBody, DefinitionType::JsonSchema, "Body")
            .with_file("Account.schema.json", fixture("Account.schema.json"));
    let mut document = build(&definition);
    let namespaces = document.namespace_map().clone();

    let root = document.root_fields()[0];
    assert_eq!(
        child_names(&mut document, root),
        vec!["choice", "id", "owner", "parent", "tags"]
    );

    let id = document.field_at("/map/id", &namespaces).unwrap();
    assert_eq!(document.field(id).field_type(), CanonicalType::Integer);
    assert_eq!(document.field(id).min_occurs(), 1);

    let name = document.field_at("/map/owner/name", &namespaces).unwrap();
    assert_eq!(document.field(name).min_occurs(), 1);

    // Both oneOf alternatives keep the property key and stay apart by position
    let choice = document.field_at("/map/{choice:0}", &namespaces).unwrap();
    assert!(document.field(choice).is_choice());
    let members = document.children(choice);
    assert_eq!(members.len(), 2);
    assert!(members.iter().all(|&member| document.field(member).name() == "contact"));
    let member_paths: Vec<String> = members
        .iter()
        .map(|&member| path::build(&document, member, &namespaces))
        .collect();
    assert_eq!(
        member_paths,
        vec!["/map/{choice:0}/contact[0]", "/map/{choice:0}/contact[1]"]
    );
    for (member, member_path) in members.iter().zip(&member_paths) {
        assert_eq!(document.field_at(member_path, &namespaces).unwrap(), *member);
    }

    let address = document
        .field_at("/map/{choice:0}/contact[0]/address", &namespaces)
        .unwrap();
    assert_eq!(document.field(address).field_type(), CanonicalType::String);
    let phone = document.field_at("/map/contact[1]/phone", &namespaces).unwrap();
    assert_eq!(document.field(phone).parent(), Some(members[1]));

    // The self-referencing definition stays finite
    let deep = document
        .field_at("/map/parent/parent/parent/id", &namespaces)
        .unwrap();
    assert_eq!(document.field(deep).field_type(), CanonicalType::Integer);

    let tags = document.field_at("/map/tags/string", &namespaces).unwrap();
    assert_eq!(document.field(tags).max_occurs(), MaxOccurs::Unbounded);
}

#[test]
fn test_invalid_json_schema() {
    let definition =
        DocumentDefinition::new(DocumentType::SourceBody, DefinitionType::JsonSchema, "Body")
            .with_file("broken.json", "{\"type\": ");
    let result = create_document(&definition);
    assert_eq!(result.validation_status, ValidationStatus::Error);
    assert_eq!(result.errors[0].file_path.as_deref(), Some("broken.json"));
}

#[test]
fn test_primitive_parameter_document() {
    let definition =
        DocumentDefinition::new(DocumentType::Param, DefinitionType::Primitive, "sourceParam1");
    let document = build(&definition);
    let root = document.root_fields()[0];
    assert_eq!(document.field(root).name(), "sourceParam1");
    assert_eq!(document.id().to_string(), "param:sourceParam1");
}
