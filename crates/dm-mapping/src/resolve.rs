//! Source documents and expression paths
//!
//! Location paths in mapping expressions address fields of the source body
//! (`/...`), of parameters (`$name/...`, or `$name-x/...` for JSON
//! parameters) or of the field bound by the enclosing `xsl:for-each`
//! (relative paths and `current()`). This module resolves such paths to
//! document fields and builds them back from fields.

use crate::structured::{self, json_param_name};
use crate::xpath::{Axis, LocationPath, NodeTest, PathStart, Step};
use dm_ir::{Document, DocumentId, Field, FieldId, JsonKind, NamespaceMap, path};
use std::collections::BTreeMap;
use tracing::trace;

/// Nested choices are searched up to this depth for a matching member
const MAX_CHOICE_DEPTH: usize = 16;

/// Source body and parameter documents of a mapping, keyed by document id
#[derive(Debug, Default)]
pub struct SourceDocuments {
    documents: BTreeMap<DocumentId, Document>,
}

impl SourceDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document under its own id, returning any document it replaces
    pub fn insert(&mut self, document: Document) -> Option<Document> {
        self.documents.insert(document.id().clone(), document)
    }

    #[must_use]
    pub fn with(mut self, document: Document) -> Self {
        self.insert(document);
        self
    }

    pub fn get(&self, id: &DocumentId) -> Option<&Document> {
        self.documents.get(id)
    }

    pub fn get_mut(&mut self, id: &DocumentId) -> Option<&mut Document> {
        self.documents.get_mut(id)
    }

    /// Parameter document by parameter name
    pub fn param(&self, name: &str) -> Option<&Document> {
        self.get(&DocumentId::Param(name.to_string()))
    }

    pub fn params(&self) -> impl Iterator<Item = &Document> {
        self.documents
            .iter()
            .filter(|(id, _)| matches!(id, DocumentId::Param(_)))
            .map(|(_, document)| document)
    }
}

/// A field of one of the source documents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub document: DocumentId,
    pub field: FieldId,
}

/// What relative paths are evaluated against
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Focus {
    /// Source body document node, outside any iteration
    Document,
    Field(Resolved),
    /// Inside an iteration whose select did not resolve
    Lost,
}

#[derive(Debug, Clone, Copy)]
enum Cursor {
    DocumentNode,
    Field(FieldId),
}

/// What a path step or literal element selects among sibling fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FieldMatcher {
    Named {
        namespace_uri: Option<String>,
        local_name: String,
        attribute: bool,
    },
    Json {
        kind: JsonKind,
        key: Option<String>,
    },
}

impl FieldMatcher {
    pub(crate) fn matches(&self, field: &Field) -> bool {
        if field.is_compositor() {
            return false;
        }
        match self {
            FieldMatcher::Named {
                namespace_uri,
                local_name,
                attribute,
            } => {
                field.name() == local_name
                    && field.is_attribute() == *attribute
                    && field.namespace_uri() == namespace_uri.as_deref()
            }
            FieldMatcher::Json { kind, key } => {
                field.json_kind() == Some(*kind)
                    && field.name() == key.as_deref().unwrap_or_default()
            }
        }
    }

    /// Matcher for a name step, reading JSON steps against JSON documents
    fn for_step(step: &Step, document: &Document, namespaces: &NamespaceMap) -> Option<Self> {
        if document.kind().is_json() {
            let (kind, key) = structured::read_json_step(step, namespaces)?;
            return Some(FieldMatcher::Json { kind, key });
        }
        let (prefix, local_name) = step.name()?;
        let namespace_uri = match prefix {
            Some(prefix) => Some(namespaces.uri_for(prefix)?.to_string()),
            None => None,
        };
        Some(FieldMatcher::Named {
            namespace_uri,
            local_name: local_name.to_string(),
            attribute: step.axis == Axis::Attribute,
        })
    }
}

/// First field under `parent` (the roots when `None`) the matcher accepts.
/// Direct children win over members of child compositors.
pub(crate) fn find_child(
    document: &mut Document,
    parent: Option<FieldId>,
    matcher: &FieldMatcher,
) -> Option<FieldId> {
    let candidates = match parent {
        Some(parent) => document.children(parent),
        None => document.root_fields().to_vec(),
    };
    find_among(document, &candidates, matcher, 0)
}

fn find_among(
    document: &mut Document,
    candidates: &[FieldId],
    matcher: &FieldMatcher,
    depth: usize,
) -> Option<FieldId> {
    if let Some(found) = candidates
        .iter()
        .copied()
        .find(|&id| matcher.matches(document.field(id)))
    {
        return Some(found);
    }
    if depth >= MAX_CHOICE_DEPTH {
        return None;
    }
    let compositors: Vec<FieldId> = candidates
        .iter()
        .copied()
        .filter(|&id| document.field(id).is_compositor())
        .collect();
    compositors.into_iter().find_map(|compositor| {
        let members = document.children(compositor);
        find_among(document, &members, matcher, depth + 1)
    })
}

/// Nearest ancestor that is not a choice or sequence
pub fn structural_parent(document: &Document, field: FieldId) -> Option<FieldId> {
    document
        .ancestors(field)
        .find(|&ancestor| !document.field(ancestor).is_compositor())
}

/// Fields from the root down to `field`, compositors left out
pub fn field_chain(document: &Document, field: FieldId) -> Vec<FieldId> {
    let mut chain: Vec<FieldId> = document
        .ancestors(field)
        .filter(|&ancestor| !document.field(ancestor).is_compositor())
        .collect();
    chain.reverse();
    chain.push(field);
    chain
}

/// Link endpoint of a document field: `documentId:schemaPath`
pub fn node_path(document: &Document, field: FieldId) -> String {
    format!(
        "{}:{}",
        document.id(),
        path::build(document, field, document.namespace_map())
    )
}

/// Location path of each field of a chain, from the outermost one.
///
/// Prefixes for the chain's namespaces are bound in `namespaces` as needed.
pub fn location_paths(
    document: &Document,
    chain: &[FieldId],
    namespaces: &mut NamespaceMap,
) -> Vec<LocationPath> {
    let is_json = document.kind().is_json();
    if is_json {
        structured::ensure_prefix(namespaces);
    }
    let (start, skip_root) = match document.id() {
        DocumentId::Param(name) if document.kind().is_primitive() => {
            (PathStart::Variable(name.clone()), true)
        }
        DocumentId::Param(name) if is_json => (
            PathStart::Variable(structured::json_param_variable(name)),
            false,
        ),
        DocumentId::Param(name) => (PathStart::Variable(name.clone()), false),
        DocumentId::SourceBody | DocumentId::TargetBody => (PathStart::Root, false),
    };

    let mut steps = Vec::new();
    let mut paths = Vec::with_capacity(chain.len());
    for (index, &id) in chain.iter().enumerate() {
        if !(skip_root && index == 0) {
            steps.push(field_step(document.field(id), namespaces));
        }
        paths.push(LocationPath::new(start.clone(), steps.clone()));
    }
    paths
}

fn field_step(field: &Field, namespaces: &mut NamespaceMap) -> Step {
    if let Some(kind) = field.json_kind() {
        return structured::json_step(kind, Some(field.name()));
    }
    let prefix = field.namespace_uri().map(|uri| namespaces.assign_prefix(uri));
    if field.is_attribute() {
        Step::attribute(prefix.as_deref(), field.name())
    } else {
        Step::child(prefix.as_deref(), field.name())
    }
}

/// Resolves expression paths against the source documents
pub(crate) struct Resolver<'a> {
    sources: &'a mut SourceDocuments,
    namespaces: &'a NamespaceMap,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(sources: &'a mut SourceDocuments, namespaces: &'a NamespaceMap) -> Self {
        Self {
            sources,
            namespaces,
        }
    }

    /// Field a location path selects, if it names one
    pub(crate) fn resolve(&mut self, path: &LocationPath, focus: &Focus) -> Option<Resolved> {
        let (document_id, mut cursor) = self.start(&path.start, focus)?;
        let document = self.sources.get_mut(&document_id)?;

        for (index, step) in path.steps.iter().enumerate() {
            let is_last = index + 1 == path.steps.len();
            cursor = apply_step(document, cursor, step, is_last, self.namespaces)?;
        }

        let field = match cursor {
            Cursor::Field(field) => field,
            Cursor::DocumentNode => *document.root_fields().first()?,
        };
        trace!(%path, document = %document_id, "resolved path");
        Some(Resolved {
            document: document_id,
            field,
        })
    }

    fn start(&self, start: &PathStart, focus: &Focus) -> Option<(DocumentId, Cursor)> {
        match start {
            PathStart::Root => Some((DocumentId::SourceBody, Cursor::DocumentNode)),
            PathStart::Relative | PathStart::Current => match focus {
                Focus::Document => Some((DocumentId::SourceBody, Cursor::DocumentNode)),
                Focus::Field(resolved) => {
                    Some((resolved.document.clone(), Cursor::Field(resolved.field)))
                }
                Focus::Lost => None,
            },
            PathStart::Variable(name) => {
                if let Some(param) = json_param_name(name) {
                    let id = DocumentId::Param(param.to_string());
                    if self.sources.get(&id).is_some_and(|doc| doc.kind().is_json()) {
                        return Some((id, Cursor::DocumentNode));
                    }
                }
                let id = DocumentId::Param(name.clone());
                let document = self.sources.get(&id)?;
                // Primitive and JSON parameters are bound to their root value
                if document.kind().is_primitive() || document.kind().is_json() {
                    let root = *document.root_fields().first()?;
                    Some((id, Cursor::Field(root)))
                } else {
                    Some((id, Cursor::DocumentNode))
                }
            }
            PathStart::Expr(_) => None,
        }
    }

    /// Endpoint string of a resolved field
    pub(crate) fn node_path(&self, resolved: &Resolved) -> Option<String> {
        let document = self.sources.get(&resolved.document)?;
        Some(node_path(document, resolved.field))
    }
}

fn apply_step(
    document: &mut Document,
    cursor: Cursor,
    step: &Step,
    is_last: bool,
    namespaces: &NamespaceMap,
) -> Option<Cursor> {
    let parent = match cursor {
        Cursor::DocumentNode => None,
        Cursor::Field(field) => Some(field),
    };
    match (step.axis, &step.test) {
        (Axis::Child | Axis::Attribute, NodeTest::Name { .. }) => {
            let matcher = FieldMatcher::for_step(step, document, namespaces)?;
            find_child(document, parent, &matcher).map(Cursor::Field)
        }
        // Text or all children of the current field stand for the field itself
        (Axis::Child, NodeTest::Text) => Some(cursor),
        (Axis::Child, NodeTest::Wildcard | NodeTest::Node) if is_last => parent.map(Cursor::Field),
        (Axis::SelfNode, NodeTest::Node) => Some(cursor),
        (Axis::Parent, NodeTest::Node) => {
            let field = parent?;
            Some(match structural_parent(document, field) {
                Some(parent) => Cursor::Field(parent),
                None => Cursor::DocumentNode,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xpath::{self, Expr};
    use dm_ir::{
        DefinitionType, DocumentDefinition, DocumentKind, DocumentType, FieldTemplate,
        FragmentRegistry, Occurs, PrimitiveDialect, QName, TypeCatalog, XmlDialect,
    };

    const NS: &str = "urn:orders";

    fn source_body() -> Document {
        let definition =
            DocumentDefinition::new(DocumentType::SourceBody, DefinitionType::XmlSchema, "Body");
        let mut order = FieldTemplate::element("Order", Some(NS));
        let mut line = FieldTemplate::element("Line", None).with_occurs(Occurs::MANY);
        line.push_field(FieldTemplate::element("Sku", None));
        line.push_field(FieldTemplate::attribute("no", None));
        let mut choice = FieldTemplate::choice();
        choice.push_field(FieldTemplate::element("Email", None));
        choice.push_field(FieldTemplate::element("Phone", None));
        order.push_field(line);
        order.push_field(choice);
        let mut document = Document::new(
            DocumentKind::Xml(XmlDialect::new(QName::new(Some(NS), "Order"))),
            definition,
            FragmentRegistry::new(),
            TypeCatalog::new(),
        );
        document.add_root(order);
        let mut namespaces = NamespaceMap::new();
        namespaces.insert("ns0", NS);
        document.definition_mut().namespace_map = namespaces;
        document
    }

    fn param(name: &str) -> Document {
        let definition =
            DocumentDefinition::new(DocumentType::Param, DefinitionType::Primitive, name);
        let mut document = Document::new(
            DocumentKind::Primitive(PrimitiveDialect),
            definition,
            FragmentRegistry::new(),
            TypeCatalog::new(),
        );
        document.add_root(FieldTemplate::element(name, None));
        document
    }

    fn sources() -> SourceDocuments {
        SourceDocuments::new().with(source_body()).with(param("limit"))
    }

    fn stylesheet_namespaces() -> NamespaceMap {
        let mut namespaces = NamespaceMap::new();
        namespaces.insert("o", NS);
        namespaces
    }

    fn location(text: &str) -> LocationPath {
        match xpath::parse(text).unwrap() {
            Expr::Path(path) => path,
            other => panic!("not a path: {other:?}"),
        }
    }

    fn resolve(sources: &mut SourceDocuments, text: &str, focus: &Focus) -> Option<String> {
        let namespaces = stylesheet_namespaces();
        let mut resolver = Resolver::new(sources, &namespaces);
        let resolved = resolver.resolve(&location(text), focus)?;
        resolver.node_path(&resolved)
    }

    #[test]
    fn test_absolute_paths_use_stylesheet_prefixes() {
        let mut sources = sources();
        assert_eq!(
            resolve(&mut sources, "/o:Order/Line/@no", &Focus::Document).as_deref(),
            Some("sourceBody:/ns0:Order/Line/@no")
        );
        // Element and attribute of the same name are distinct
        assert_eq!(resolve(&mut sources, "/o:Order/Line/no", &Focus::Document), None);
        assert_eq!(resolve(&mut sources, "/ns0:Order", &Focus::Document), None);
    }

    #[test]
    fn test_choice_members_resolve_through_the_choice() {
        let mut sources = sources();
        assert_eq!(
            resolve(&mut sources, "/o:Order/Phone", &Focus::Document).as_deref(),
            Some("sourceBody:/ns0:Order/{choice:0}/Phone")
        );
    }

    #[test]
    fn test_relative_paths_follow_the_focus() {
        let mut sources = sources();
        let namespaces = stylesheet_namespaces();
        let line = {
            let mut resolver = Resolver::new(&mut sources, &namespaces);
            resolver
                .resolve(&location("/o:Order/Line"), &Focus::Document)
                .unwrap()
        };
        let focus = Focus::Field(line);
        assert_eq!(
            resolve(&mut sources, "Sku", &focus).as_deref(),
            Some("sourceBody:/ns0:Order/Line/Sku")
        );
        assert_eq!(
            resolve(&mut sources, "current()/@no", &focus).as_deref(),
            Some("sourceBody:/ns0:Order/Line/@no")
        );
        assert_eq!(
            resolve(&mut sources, "../Email", &focus).as_deref(),
            Some("sourceBody:/ns0:Order/{choice:0}/Email")
        );
        assert_eq!(resolve(&mut sources, "Sku", &Focus::Lost), None);
    }

    #[test]
    fn test_parameters() {
        let mut sources = sources();
        assert_eq!(
            resolve(&mut sources, "$limit", &Focus::Document).as_deref(),
            Some("param:limit:/limit")
        );
        assert_eq!(resolve(&mut sources, "$unknown", &Focus::Document), None);
    }

    #[test]
    fn test_location_paths_round_trip() {
        let mut sources = sources();
        let namespaces = stylesheet_namespaces();
        let body = sources.get_mut(&DocumentId::SourceBody).unwrap();
        let root = body.root_fields()[0];
        let line = body.children(root)[0];
        let no = body.children(line)[1];
        let chain = field_chain(body, no);

        let mut expression_namespaces = namespaces.clone();
        let paths = location_paths(body, &chain, &mut expression_namespaces);
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[2].to_string(), "/o:Order/Line/@no");

        let limit = sources.param("limit").unwrap();
        let chain = field_chain(limit, limit.root_fields()[0]);
        let paths = location_paths(limit, &chain, &mut expression_namespaces);
        assert_eq!(paths[0].to_string(), "$limit");
    }
}
