//! Document container and lazy field materialization
#![allow(clippy::must_use_candidate)] // Accessors are clear without #[must_use].

use crate::definition::{DefinitionType, DocumentDefinition, DocumentType};
use crate::dialect::{DocumentKind, SchemaDialect};
use crate::field::{Field, FieldId, FieldTemplate};
use crate::fragment::{FragmentRegistry, TypeId};
use crate::names::{NamespaceMap, QName};
use crate::path;
use crate::types::{CanonicalType, TypeCatalog, TypeOverrideVariant};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Identifier of a document within a mapping session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DocumentId {
    SourceBody,
    TargetBody,
    Param(String),
}

impl DocumentId {
    /// Id a definition is registered under
    pub fn for_definition(definition: &DocumentDefinition) -> Self {
        match definition.document_type {
            DocumentType::SourceBody => DocumentId::SourceBody,
            DocumentType::TargetBody => DocumentId::TargetBody,
            DocumentType::Param => DocumentId::Param(definition.name.clone()),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::SourceBody => f.write_str("sourceBody"),
            DocumentId::TargetBody => f.write_str("targetBody"),
            DocumentId::Param(name) => write!(f, "param:{name}"),
        }
    }
}

impl FromStr for DocumentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sourceBody" => Ok(DocumentId::SourceBody),
            "targetBody" => Ok(DocumentId::TargetBody),
            _ => match s.strip_prefix("param:") {
                Some(name) if !name.is_empty() => Ok(DocumentId::Param(name.to_string())),
                _ => Err(Error::invalid_path(s, "unknown document id")),
            },
        }
    }
}

impl TryFrom<String> for DocumentId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.to_string()
    }
}

/// A schema-derived field tree plus the session state recorded against it.
///
/// Fields live in an arena addressed by [`FieldId`]. Children are
/// materialized on first request from the field's fragment references and
/// inline declarations, so recursive types only grow as deep as they are
/// explored.
///
/// Discarding children (type overrides, choice selections) returns their
/// whole subtree to a free list that later materialization reuses, so a
/// handle into a discarded subtree must not be used afterwards.
#[derive(Debug, Clone)]
pub struct Document {
    id: DocumentId,
    kind: DocumentKind,
    definition: DocumentDefinition,
    fields: Vec<Field>,
    free: Vec<FieldId>,
    roots: Vec<FieldId>,
    fragments: FragmentRegistry,
    types: TypeCatalog,
}

impl Document {
    /// Create a document with no root fields
    pub fn new(
        kind: DocumentKind,
        definition: DocumentDefinition,
        fragments: FragmentRegistry,
        types: TypeCatalog,
    ) -> Self {
        Self {
            id: DocumentId::for_definition(&definition),
            kind,
            definition,
            fields: Vec::new(),
            free: Vec::new(),
            roots: Vec::new(),
            fragments,
            types,
        }
    }

    /// Add a root field from its declaration
    pub fn add_root(&mut self, template: FieldTemplate) -> FieldId {
        let id = self.alloc(Arc::new(template), None);
        self.roots.push(id);
        id
    }

    fn alloc(&mut self, template: Arc<FieldTemplate>, parent: Option<FieldId>) -> FieldId {
        tracing::trace!(name = %template.name, ?parent, "materializing field");
        let field = Field::from_template(template, parent);
        match self.free.pop() {
            Some(id) => {
                self.fields[id.0] = field;
                id
            }
            None => {
                self.fields.push(field);
                FieldId(self.fields.len() - 1)
            }
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn kind(&self) -> &DocumentKind {
        &self.kind
    }

    /// Dialect behavior of this document
    pub fn dialect(&self) -> &dyn SchemaDialect {
        self.kind.dialect()
    }

    pub fn document_type(&self) -> DocumentType {
        self.definition.document_type
    }

    pub fn definition_type(&self) -> DefinitionType {
        self.definition.definition_type
    }

    /// Document name from its definition
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &DocumentDefinition {
        &self.definition
    }

    /// Persisted session state; mutate through the override service
    pub fn definition_mut(&mut self) -> &mut DocumentDefinition {
        &mut self.definition
    }

    /// Namespace prefixes recorded on the definition
    pub fn namespace_map(&self) -> &NamespaceMap {
        &self.definition.namespace_map
    }

    pub fn fragments(&self) -> &FragmentRegistry {
        &self.fragments
    }

    pub fn fragments_mut(&mut self) -> &mut FragmentRegistry {
        &mut self.fragments
    }

    /// Named types of the document's schema set
    pub fn types(&self) -> &TypeCatalog {
        &self.types
    }

    pub fn types_mut(&mut self) -> &mut TypeCatalog {
        &mut self.types
    }

    /// Root fields in declaration order
    pub fn root_fields(&self) -> &[FieldId] {
        &self.roots
    }

    /// Field for a handle issued by this document.
    ///
    /// # Panics
    ///
    /// Panics when the handle belongs to another document.
    pub fn field(&self, id: FieldId) -> &Field {
        &self.fields[id.0]
    }

    /// Siblings of a field, including the field itself
    pub fn siblings(&self, id: FieldId) -> &[FieldId] {
        match self.field(id).parent() {
            Some(parent) => self.field(parent).children(),
            None => &self.roots,
        }
    }

    /// Ancestors from the parent up to the root
    pub fn ancestors(&self, id: FieldId) -> impl Iterator<Item = FieldId> + '_ {
        std::iter::successors(self.field(id).parent(), |&current| self.field(current).parent())
    }

    /// Materialize the children of a field if that has not happened yet.
    ///
    /// Fragment fields come first (base types before derived content),
    /// followed by the field's inline declarations. Declarations that
    /// repeat an earlier name, kind and namespace are skipped, and a
    /// prohibited declaration removes the earlier one it repeats. Members
    /// of a compositor are all kept.
    pub fn expand(&mut self, id: FieldId) {
        let field = self.field(id);
        if field.expanded {
            return;
        }

        let mut templates = Templates {
            fields: Vec::new(),
            distinct: !field.is_compositor(),
        };
        let mut visited = HashSet::new();
        for &type_ref in field.type_refs() {
            self.collect_fragment_fields(type_ref, &mut visited, &mut templates);
        }
        if field.inline_fields {
            for template in &field.template().fields {
                templates.push(template);
            }
        }
        let templates = templates.fields;

        let children: Vec<FieldId> = templates
            .into_iter()
            .map(|template| self.alloc(template, Some(id)))
            .collect();
        let field = &mut self.fields[id.0];
        field.children = children;
        field.expanded = true;
    }

    fn collect_fragment_fields(
        &self,
        type_ref: TypeId,
        visited: &mut HashSet<TypeId>,
        out: &mut Templates,
    ) {
        if !visited.insert(type_ref) {
            return;
        }
        let fragment = self.fragments.get(type_ref);
        for &base in &fragment.type_refs {
            self.collect_fragment_fields(base, visited, out);
        }
        for template in &fragment.fields {
            out.push(template);
        }
    }

    /// Children of a field, materializing them first
    pub fn children(&mut self, id: FieldId) -> Vec<FieldId> {
        self.expand(id);
        self.field(id).children().to_vec()
    }

    /// First child satisfying a predicate
    pub fn find_child<P>(&mut self, id: FieldId, mut predicate: P) -> Option<FieldId>
    where
        P: FnMut(&Field) -> bool,
    {
        self.children(id)
            .into_iter()
            .find(|&child| predicate(self.field(child)))
    }

    /// Replace a field's type. Children are discarded and rebuilt from
    /// `type_refs` alone on next expansion.
    pub fn override_field_type(
        &mut self,
        id: FieldId,
        type_name: Option<QName>,
        field_type: CanonicalType,
        type_refs: Vec<TypeId>,
        variant: TypeOverrideVariant,
    ) {
        let field = &mut self.fields[id.0];
        field.type_name = type_name;
        field.field_type = field_type;
        field.type_refs = type_refs;
        field.inline_fields = false;
        field.type_override = variant;
        self.reset_children(id);
    }

    /// Return a field to its declared type
    pub fn restore_field_type(&mut self, id: FieldId) {
        let field = &mut self.fields[id.0];
        field.type_name = field.template().type_name.clone();
        field.field_type = field.template().field_type;
        field.type_refs = field.template().type_refs.clone();
        field.inline_fields = true;
        field.type_override = TypeOverrideVariant::None;
        self.reset_children(id);
    }

    /// Discard materialized children so they are rebuilt on next request.
    /// The discarded subtree's slots are reused.
    pub fn reset_children(&mut self, id: FieldId) {
        let field = &mut self.fields[id.0];
        let mut pending = std::mem::take(&mut field.children);
        field.expanded = false;
        while let Some(discarded) = pending.pop() {
            let field = &mut self.fields[discarded.0];
            pending.append(&mut field.children);
            field.expanded = false;
            self.free.push(discarded);
        }
    }

    /// Member index selected for a choice field, read from the persisted
    /// selections by the field's schema path
    pub fn selected_member(&self, id: FieldId, namespaces: &NamespaceMap) -> Option<usize> {
        if !self.field(id).is_choice() {
            return None;
        }
        let schema_path = path::build(self, id, namespaces);
        self.definition
            .choice_selection(&schema_path)
            .map(|selection| selection.selected_member_index)
    }

    /// Field at a schema path, materializing along the way
    pub fn field_at(&mut self, schema_path: &str, namespaces: &NamespaceMap) -> Result<FieldId> {
        path::navigate_to_field(self, schema_path, namespaces)
            .ok_or_else(|| Error::field_not_found(schema_path))
    }

    /// Number of live materialized fields
    pub fn materialized_len(&self) -> usize {
        self.fields.len() - self.free.len()
    }
}

/// Declarations collected for one expansion
struct Templates {
    fields: Vec<Arc<FieldTemplate>>,
    /// Whether repeated identities collapse; false below compositors
    distinct: bool,
}

impl Templates {
    fn push(&mut self, template: &Arc<FieldTemplate>) {
        if !self.distinct {
            self.fields.push(Arc::clone(template));
            return;
        }
        if template.occurs.is_prohibited() {
            self.fields.retain(|existing| !existing.same_identity(template));
            tracing::debug!(name = %template.name, "removed prohibited inherited field");
            return;
        }
        if self.fields.iter().any(|existing| existing.same_identity(template)) {
            tracing::debug!(name = %template.name, "skipping duplicate inherited field");
            return;
        }
        self.fields.push(Arc::clone(template));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{DefinitionType, DocumentType};
    use crate::dialect::XmlDialect;
    use crate::field::Occurs;
    use crate::fragment::FragmentKey;

    const NS: &str = "urn:tree";

    fn tree_document() -> (Document, FieldId) {
        // Node { @id, label, child: Node* }
        let mut fragments = FragmentRegistry::new();
        let node_type = QName::new(Some(NS), "Node");
        let node = fragments.reserve(FragmentKey::Type(node_type.clone()), CanonicalType::Container);
        fragments.complete(
            node,
            vec![
                Arc::new(
                    FieldTemplate::attribute("id", None)
                        .with_type(CanonicalType::String, Some(QName::xsd("string"))),
                ),
                Arc::new(
                    FieldTemplate::element("label", Some(NS))
                        .with_type(CanonicalType::String, Some(QName::xsd("string"))),
                ),
                Arc::new(
                    FieldTemplate::element("child", Some(NS))
                        .with_type(CanonicalType::Container, Some(node_type.clone()))
                        .with_occurs(Occurs::MANY)
                        .with_type_ref(node),
                ),
            ],
            Vec::new(),
        );
        let definition =
            DocumentDefinition::new(DocumentType::SourceBody, DefinitionType::XmlSchema, "Body");
        let root_name = QName::new(Some(NS), "root");
        let mut doc = Document::new(
            DocumentKind::Xml(XmlDialect::new(root_name)),
            definition,
            fragments,
            TypeCatalog::new(),
        );
        let root = doc.add_root(
            FieldTemplate::element("root", Some(NS))
                .with_type(CanonicalType::Container, Some(node_type))
                .with_type_ref(node),
        );
        (doc, root)
    }

    #[test]
    fn test_children_materialize_lazily() {
        let (mut doc, root) = tree_document();
        assert!(!doc.field(root).is_expanded());
        assert_eq!(doc.materialized_len(), 1);

        let children = doc.children(root);
        let names: Vec<_> = children.iter().map(|&c| doc.field(c).name()).collect();
        assert_eq!(names, vec!["id", "label", "child"]);
        assert_eq!(doc.materialized_len(), 4);

        // Repeated requests do not allocate
        doc.children(root);
        assert_eq!(doc.materialized_len(), 4);
    }

    #[test]
    fn test_recursive_type_expands_one_level_at_a_time() {
        let (mut doc, root) = tree_document();
        let mut current = root;
        for _ in 0..10 {
            let child = doc
                .find_child(current, |f| f.name() == "child")
                .unwrap();
            assert_eq!(doc.children(child).len(), 3);
            current = child;
        }
        assert_eq!(doc.ancestors(current).count(), 10);
    }

    #[test]
    fn test_override_and_restore_rebuild_children() {
        let (mut doc, root) = tree_document();
        doc.children(root);
        doc.override_field_type(
            root,
            Some(QName::xsd("string")),
            CanonicalType::String,
            Vec::new(),
            TypeOverrideVariant::Force,
        );
        assert_eq!(doc.field(root).field_type(), CanonicalType::String);
        assert!(doc.children(root).is_empty());

        doc.restore_field_type(root);
        assert_eq!(doc.field(root).type_override(), TypeOverrideVariant::None);
        assert_eq!(doc.field(root).field_type(), CanonicalType::Container);
        assert_eq!(doc.children(root).len(), 3);
    }

    #[test]
    fn test_repeated_overrides_reuse_discarded_slots() {
        let (mut doc, root) = tree_document();
        let child = doc.find_child(root, |f| f.name() == "child").unwrap();
        doc.children(child);
        let settled = doc.materialized_len();
        let allocated = doc.fields.len();

        for _ in 0..50 {
            doc.override_field_type(
                root,
                Some(QName::xsd("string")),
                CanonicalType::String,
                Vec::new(),
                TypeOverrideVariant::Force,
            );
            assert_eq!(doc.materialized_len(), 1);
            doc.restore_field_type(root);
            let child = doc.find_child(root, |f| f.name() == "child").unwrap();
            doc.children(child);
        }
        assert_eq!(doc.materialized_len(), settled);
        assert_eq!(doc.fields.len(), allocated);
    }

    #[test]
    fn test_prohibited_declaration_removes_inherited_field() {
        let (mut doc, _) = tree_document();
        let node = doc
            .fragments()
            .lookup_type(&QName::new(Some(NS), "Node"))
            .unwrap();
        let restricted = doc.add_root(
            FieldTemplate::element("restricted", Some(NS))
                .with_type(CanonicalType::Container, None)
                .with_type_ref(node),
        );
        let mut template = FieldTemplate::element("plain", Some(NS));
        template.fields.push(Arc::new(
            FieldTemplate::attribute("id", None).with_occurs(Occurs::PROHIBITED),
        ));
        template.type_refs.push(node);
        let plain = doc.add_root(template);

        assert_eq!(doc.children(restricted).len(), 3);
        let names: Vec<_> = doc
            .children(plain)
            .into_iter()
            .map(|c| doc.field(c).name().to_string())
            .collect();
        assert_eq!(names, vec!["label", "child"]);
    }

    #[test]
    fn test_compositor_members_are_all_kept() {
        let (mut doc, _) = tree_document();
        // label | label: both alternatives survive expansion
        let mut choice = FieldTemplate::choice();
        for _ in 0..2 {
            choice
                .fields
                .push(Arc::new(FieldTemplate::element("label", Some(NS))));
        }
        let choice = doc.add_root(choice);
        assert_eq!(doc.children(choice).len(), 2);
    }

    #[test]
    fn test_document_id_round_trip() {
        for id in [
            DocumentId::SourceBody,
            DocumentId::TargetBody,
            DocumentId::Param("cart".to_string()),
        ] {
            assert_eq!(id.to_string().parse::<DocumentId>().unwrap(), id);
        }
        assert!("param:".parse::<DocumentId>().is_err());
    }
}
