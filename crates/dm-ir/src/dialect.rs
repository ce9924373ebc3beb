//! Schema dialects
//!
//! Documents are one of a closed set of kinds. Behavior that differs by
//! dialect (how a field is named in a schema path, whether its type may be
//! overridden, which built-in types exist) sits behind [`SchemaDialect`].

use crate::field::{Field, FieldKind};
use crate::names::{NamespaceMap, QName, XSD_NAMESPACE};
use crate::path::ElementSegment;
use crate::types::{CanonicalType, JSON_BUILTIN_TYPES, XSD_BUILTIN_TYPES};

/// Dialect-specific behavior of a document
pub trait SchemaDialect {
    /// Human-readable dialect name used in errors
    fn name(&self) -> &'static str;

    /// Path segment naming a field that is not a compositor
    fn segment_for(&self, field: &Field, namespaces: &NamespaceMap) -> String;

    /// Whether a parsed path segment names the field
    fn matches(&self, field: &Field, segment: &ElementSegment, namespaces: &NamespaceMap) -> bool;

    /// Whether field types may be overridden
    fn supports_type_override(&self) -> bool;

    /// Namespace of the built-in types
    fn builtin_namespace(&self) -> Option<&'static str> {
        None
    }

    /// Built-in type names with their canonical types
    fn builtin_types(&self) -> &'static [(&'static str, CanonicalType)] {
        &[]
    }
}

/// Kind of a document with its dialect state
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentKind {
    Xml(XmlDialect),
    Json(JsonDialect),
    Primitive(PrimitiveDialect),
}

impl DocumentKind {
    /// Dialect behavior for this kind
    pub fn dialect(&self) -> &dyn SchemaDialect {
        match self {
            DocumentKind::Xml(dialect) => dialect,
            DocumentKind::Json(dialect) => dialect,
            DocumentKind::Primitive(dialect) => dialect,
        }
    }

    #[must_use]
    pub fn is_json(&self) -> bool {
        matches!(self, DocumentKind::Json(_))
    }

    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(self, DocumentKind::Primitive(_))
    }
}

/// XML Schema documents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDialect {
    /// Element the document tree is rooted at
    pub root_element: QName,
}

impl XmlDialect {
    #[must_use]
    pub fn new(root_element: QName) -> Self {
        Self { root_element }
    }
}

impl SchemaDialect for XmlDialect {
    fn name(&self) -> &'static str {
        "XML schema"
    }

    fn segment_for(&self, field: &Field, namespaces: &NamespaceMap) -> String {
        let name = namespaces.prefixed(&field.qname());
        if field.is_attribute() {
            format!("@{name}")
        } else {
            name
        }
    }

    fn matches(&self, field: &Field, segment: &ElementSegment, namespaces: &NamespaceMap) -> bool {
        if field.is_compositor()
            || field.is_attribute() != segment.is_attribute
            || field.name() != segment.local_name
        {
            return false;
        }
        match &segment.prefix {
            Some(prefix) => namespaces.uri_for(prefix) == field.namespace_uri(),
            // A bare name is rendered for fields without a registered prefix
            None => match field.namespace_uri() {
                None => true,
                Some(uri) => matches!(namespaces.prefix_for(uri), None | Some("")),
            },
        }
    }

    fn supports_type_override(&self) -> bool {
        true
    }

    fn builtin_namespace(&self) -> Option<&'static str> {
        Some(XSD_NAMESPACE)
    }

    fn builtin_types(&self) -> &'static [(&'static str, CanonicalType)] {
        XSD_BUILTIN_TYPES
    }
}

/// JSON Schema documents, shaped after the XML representation of JSON
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonDialect;

impl SchemaDialect for JsonDialect {
    fn name(&self) -> &'static str {
        "JSON schema"
    }

    /// The key, or the kind for keyless values. Choice alternatives sharing
    /// a key carry their position: `contact[1]`.
    fn segment_for(&self, field: &Field, _namespaces: &NamespaceMap) -> String {
        let name = match field.kind() {
            FieldKind::Json(kind) if field.name().is_empty() => kind.as_str(),
            _ => field.name(),
        };
        match field.member_index() {
            Some(index) => format!("{name}[{index}]"),
            None => name.to_string(),
        }
    }

    fn matches(&self, field: &Field, segment: &ElementSegment, namespaces: &NamespaceMap) -> bool {
        !field.is_compositor()
            && !segment.is_attribute
            && self.segment_for(field, namespaces) == segment.to_string()
    }

    fn supports_type_override(&self) -> bool {
        true
    }

    fn builtin_types(&self) -> &'static [(&'static str, CanonicalType)] {
        JSON_BUILTIN_TYPES
    }
}

/// Schema-less bodies: a single field and no type system
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrimitiveDialect;

impl SchemaDialect for PrimitiveDialect {
    fn name(&self) -> &'static str {
        "primitive"
    }

    fn segment_for(&self, field: &Field, _namespaces: &NamespaceMap) -> String {
        field.name().to_string()
    }

    fn matches(&self, field: &Field, segment: &ElementSegment, _namespaces: &NamespaceMap) -> bool {
        segment.prefix.is_none() && !segment.is_attribute && field.name() == segment.local_name
    }

    fn supports_type_override(&self) -> bool {
        false
    }
}
