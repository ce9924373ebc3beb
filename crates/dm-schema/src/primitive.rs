//! Schema-less bodies

use crate::validation::CreateDocumentResult;
use dm_ir::{
    CanonicalType, Document, DocumentDefinition, DocumentKind, FieldTemplate, FragmentRegistry,
    PrimitiveDialect, TypeCatalog,
};

/// Field name used when the definition carries no name
const DEFAULT_BODY_NAME: &str = "Body";

/// Build a document with a single untyped field named after the definition
pub fn create_primitive_document(definition: &DocumentDefinition) -> CreateDocumentResult {
    let name = if definition.name.is_empty() {
        DEFAULT_BODY_NAME
    } else {
        definition.name.as_str()
    };
    let mut document = Document::new(
        DocumentKind::Primitive(PrimitiveDialect),
        definition.clone(),
        FragmentRegistry::new(),
        TypeCatalog::new(),
    );
    document.add_root(FieldTemplate::element(name, None).with_type(CanonicalType::AnyType, None));
    tracing::debug!(name, "created primitive document");
    CreateDocumentResult::built(document, Vec::new())
}
