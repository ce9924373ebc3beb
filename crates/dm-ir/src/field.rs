//! Field declarations and materialized field nodes
#![allow(clippy::must_use_candidate)] // Accessors are clear without #[must_use].
#![allow(clippy::return_self_not_must_use)] // Fluent builders return Self for chaining.

use crate::fragment::TypeId;
use crate::names::QName;
use crate::types::{CanonicalType, TypeOverrideVariant};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Handle of a materialized field inside its [`Document`](crate::Document)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub(crate) usize);

impl FieldId {
    /// Position of the field in the document arena
    pub fn index(self) -> usize {
        self.0
    }
}

/// Upper cardinality bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MaxOccurs {
    Bounded(u32),
    Unbounded,
}

/// Cardinality bounds of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurs {
    pub min: u32,
    pub max: MaxOccurs,
}

impl Occurs {
    /// Exactly one
    pub const ONE: Occurs = Occurs {
        min: 1,
        max: MaxOccurs::Bounded(1),
    };

    /// Zero or one
    pub const OPTIONAL: Occurs = Occurs {
        min: 0,
        max: MaxOccurs::Bounded(1),
    };

    /// Zero or more
    pub const MANY: Occurs = Occurs {
        min: 0,
        max: MaxOccurs::Unbounded,
    };

    /// Never; removes an inherited declaration of the same identity
    pub const PROHIBITED: Occurs = Occurs {
        min: 0,
        max: MaxOccurs::Bounded(0),
    };

    /// Create bounds
    pub fn new(min: u32, max: MaxOccurs) -> Self {
        Self { min, max }
    }

    /// Whether more than one occurrence is allowed
    pub fn is_repeating(&self) -> bool {
        match self.max {
            MaxOccurs::Bounded(max) => max > 1,
            MaxOccurs::Unbounded => true,
        }
    }

    /// Whether no occurrence is allowed
    pub fn is_prohibited(&self) -> bool {
        self.max == MaxOccurs::Bounded(0)
    }
}

impl Default for Occurs {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for Occurs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            MaxOccurs::Bounded(max) => write!(f, "[{}..{}]", self.min, max),
            MaxOccurs::Unbounded => write!(f, "[{}..*]", self.min),
        }
    }
}

/// Element names of the XML representation of JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JsonKind {
    Map,
    Array,
    String,
    Number,
    Boolean,
    Null,
}

impl JsonKind {
    /// Element local name used by `json-to-xml`
    pub fn as_str(self) -> &'static str {
        match self {
            JsonKind::Map => "map",
            JsonKind::Array => "array",
            JsonKind::String => "string",
            JsonKind::Number => "number",
            JsonKind::Boolean => "boolean",
            JsonKind::Null => "null",
        }
    }

    /// Parse an element local name
    pub fn from_element_name(name: &str) -> Option<Self> {
        match name {
            "map" => Some(JsonKind::Map),
            "array" => Some(JsonKind::Array),
            "string" => Some(JsonKind::String),
            "number" => Some(JsonKind::Number),
            "boolean" => Some(JsonKind::Boolean),
            "null" => Some(JsonKind::Null),
            _ => None,
        }
    }
}

/// What a field stands for in its schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    /// XML element or primitive body
    Element,
    /// XML attribute
    Attribute,
    /// Choice compositor; children are mutually exclusive members
    Choice,
    /// Sequence compositor grouping several particles into one choice member
    Sequence,
    /// JSON value; the field name is its key, empty when keyless
    Json(JsonKind),
}

/// Schema-derived declaration of a field and its inline content.
///
/// Templates never contain the body of a named type. Those are reached
/// through `type_refs` into the document's fragment registry, which keeps
/// recursive types finite.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldTemplate {
    pub name: String,
    pub namespace_uri: Option<String>,
    pub kind: FieldKind,
    pub field_type: CanonicalType,
    /// Declared type name, when the schema names one
    pub type_name: Option<QName>,
    pub occurs: Occurs,
    pub default_value: Option<String>,
    /// Inline (anonymous) child declarations
    pub fields: Vec<Arc<FieldTemplate>>,
    /// Named type bodies whose fields precede the inline ones
    pub type_refs: Vec<TypeId>,
    /// Position among the alternatives of a choice whose members share
    /// one name (JSON `oneOf` under a property key)
    pub member_index: Option<usize>,
}

impl FieldTemplate {
    fn with_kind(name: impl Into<String>, namespace_uri: Option<&str>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            namespace_uri: namespace_uri.filter(|ns| !ns.is_empty()).map(str::to_string),
            kind,
            field_type: CanonicalType::AnyType,
            type_name: None,
            occurs: Occurs::ONE,
            default_value: None,
            fields: Vec::new(),
            type_refs: Vec::new(),
            member_index: None,
        }
    }

    /// An element declaration
    pub fn element(name: impl Into<String>, namespace_uri: Option<&str>) -> Self {
        Self::with_kind(name, namespace_uri, FieldKind::Element)
    }

    /// An attribute declaration
    pub fn attribute(name: impl Into<String>, namespace_uri: Option<&str>) -> Self {
        Self::with_kind(name, namespace_uri, FieldKind::Attribute)
    }

    /// A choice compositor
    pub fn choice() -> Self {
        let mut choice = Self::with_kind("choice", None, FieldKind::Choice);
        choice.field_type = CanonicalType::Container;
        choice
    }

    /// A sequence compositor
    pub fn sequence() -> Self {
        let mut sequence = Self::with_kind("sequence", None, FieldKind::Sequence);
        sequence.field_type = CanonicalType::Container;
        sequence
    }

    /// A JSON value with an optional key
    pub fn json(kind: JsonKind, key: Option<&str>) -> Self {
        Self::with_kind(key.unwrap_or_default(), None, FieldKind::Json(kind))
    }

    /// Set the canonical type and optional declared type name
    pub fn with_type(mut self, field_type: CanonicalType, type_name: Option<QName>) -> Self {
        self.field_type = field_type;
        self.type_name = type_name;
        self
    }

    /// Set cardinality bounds
    pub fn with_occurs(mut self, occurs: Occurs) -> Self {
        self.occurs = occurs;
        self
    }

    /// Reference a named type body
    pub fn with_type_ref(mut self, type_ref: TypeId) -> Self {
        self.type_refs.push(type_ref);
        self
    }

    /// Set the default value
    pub fn with_default(mut self, value: Option<String>) -> Self {
        self.default_value = value;
        self
    }

    /// Set the position among same-named choice alternatives
    pub fn with_member_index(mut self, index: usize) -> Self {
        self.member_index = Some(index);
        self
    }

    /// Whether the declaration is a choice or sequence compositor
    pub fn is_compositor(&self) -> bool {
        matches!(self.kind, FieldKind::Choice | FieldKind::Sequence)
    }

    /// Whether two declarations would produce the same child: same name,
    /// same kind, same namespace and same member position. Compositors are
    /// never the same.
    pub fn same_identity(&self, other: &FieldTemplate) -> bool {
        !self.is_compositor()
            && self.kind == other.kind
            && self.name == other.name
            && self.namespace_uri == other.namespace_uri
            && self.member_index == other.member_index
    }

    /// Append an inline child unless an identical one is already present.
    /// Returns `false` when the child was skipped.
    pub fn push_field(&mut self, field: FieldTemplate) -> bool {
        push_unique(&mut self.fields, field)
    }

    /// Qualified name of the declaration
    pub fn qname(&self) -> QName {
        QName::new(self.namespace_uri.as_deref(), self.name.clone())
    }
}

/// Append to a declaration list unless an identical declaration is present
pub fn push_unique(fields: &mut Vec<Arc<FieldTemplate>>, field: FieldTemplate) -> bool {
    if fields.iter().any(|existing| existing.same_identity(&field)) {
        tracing::debug!(name = %field.name, "skipping duplicate field declaration");
        return false;
    }
    fields.push(Arc::new(field));
    true
}

/// A node of a document's field tree.
///
/// Fields are created from a [`FieldTemplate`] and carry the mutable state
/// of a session: the current (possibly overridden) type and the lazily
/// materialized children.
#[derive(Debug, Clone)]
pub struct Field {
    template: Arc<FieldTemplate>,
    parent: Option<FieldId>,
    pub(crate) field_type: CanonicalType,
    pub(crate) type_name: Option<QName>,
    pub(crate) type_override: TypeOverrideVariant,
    pub(crate) type_refs: Vec<TypeId>,
    pub(crate) inline_fields: bool,
    pub(crate) children: Vec<FieldId>,
    pub(crate) expanded: bool,
}

impl Field {
    pub(crate) fn from_template(template: Arc<FieldTemplate>, parent: Option<FieldId>) -> Self {
        Self {
            field_type: template.field_type,
            type_name: template.type_name.clone(),
            type_refs: template.type_refs.clone(),
            type_override: TypeOverrideVariant::None,
            inline_fields: true,
            children: Vec::new(),
            expanded: false,
            parent,
            template,
        }
    }

    /// Declaration this field was created from
    pub fn template(&self) -> &FieldTemplate {
        &self.template
    }

    pub fn name(&self) -> &str {
        &self.template.name
    }

    pub fn namespace_uri(&self) -> Option<&str> {
        self.template.namespace_uri.as_deref()
    }

    /// Qualified name of the field
    pub fn qname(&self) -> QName {
        self.template.qname()
    }

    pub fn kind(&self) -> FieldKind {
        self.template.kind
    }

    pub fn is_attribute(&self) -> bool {
        self.template.kind == FieldKind::Attribute
    }

    pub fn is_choice(&self) -> bool {
        self.template.kind == FieldKind::Choice
    }

    pub fn is_sequence(&self) -> bool {
        self.template.kind == FieldKind::Sequence
    }

    /// Whether the field groups others without naming a node of its own
    pub fn is_compositor(&self) -> bool {
        self.template.is_compositor()
    }

    /// Position among same-named choice alternatives
    pub fn member_index(&self) -> Option<usize> {
        self.template.member_index
    }

    /// JSON kind, for JSON fields
    pub fn json_kind(&self) -> Option<JsonKind> {
        match self.template.kind {
            FieldKind::Json(kind) => Some(kind),
            _ => None,
        }
    }

    pub fn occurs(&self) -> Occurs {
        self.template.occurs
    }

    pub fn min_occurs(&self) -> u32 {
        self.template.occurs.min
    }

    pub fn max_occurs(&self) -> MaxOccurs {
        self.template.occurs.max
    }

    pub fn default_value(&self) -> Option<&str> {
        self.template.default_value.as_deref()
    }

    /// Current type, reflecting any override
    pub fn field_type(&self) -> CanonicalType {
        self.field_type
    }

    /// Type as declared by the schema
    pub fn original_type(&self) -> CanonicalType {
        self.template.field_type
    }

    /// Current type name, reflecting any override
    pub fn type_name(&self) -> Option<&QName> {
        self.type_name.as_ref()
    }

    /// Type name as declared by the schema
    pub fn original_type_name(&self) -> Option<&QName> {
        self.template.type_name.as_ref()
    }

    pub fn type_override(&self) -> TypeOverrideVariant {
        self.type_override
    }

    /// Named type bodies the children are drawn from
    pub fn type_refs(&self) -> &[TypeId] {
        &self.type_refs
    }

    pub fn parent(&self) -> Option<FieldId> {
        self.parent
    }

    /// Children materialized so far; empty until the field is expanded
    pub fn children(&self) -> &[FieldId] {
        &self.children
    }

    /// Whether the children have been materialized
    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    /// Whether the field may carry child fields
    pub fn has_structure(&self) -> bool {
        !self.type_refs.is_empty() || (self.inline_fields && !self.template.fields.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_occurs_repeating() {
        assert!(!Occurs::ONE.is_repeating());
        assert!(!Occurs::OPTIONAL.is_repeating());
        assert!(Occurs::MANY.is_repeating());
        assert!(Occurs::new(1, MaxOccurs::Bounded(3)).is_repeating());
        assert_eq!(Occurs::MANY.to_string(), "[0..*]");
    }

    #[test]
    fn test_push_field_skips_duplicates() {
        let mut parent = FieldTemplate::element("Order", Some("urn:o"));
        assert!(parent.push_field(FieldTemplate::element("Id", Some("urn:o"))));
        assert!(!parent.push_field(FieldTemplate::element("Id", Some("urn:o"))));
        assert!(parent.push_field(FieldTemplate::attribute("Id", Some("urn:o"))));
        assert!(parent.push_field(FieldTemplate::element("Id", None)));
        assert!(parent.push_field(FieldTemplate::choice()));
        assert!(parent.push_field(FieldTemplate::choice()));
        assert!(parent.push_field(FieldTemplate::sequence()));
        assert!(parent.push_field(FieldTemplate::sequence()));
        assert_eq!(parent.fields.len(), 7);
    }

    #[test]
    fn test_member_index_separates_alternatives() {
        let first = FieldTemplate::json(JsonKind::Map, Some("contact")).with_member_index(0);
        let second = FieldTemplate::json(JsonKind::Map, Some("contact")).with_member_index(1);
        assert!(!first.same_identity(&second));
        assert!(first.same_identity(&first.clone()));
        assert!(Occurs::PROHIBITED.is_prohibited());
        assert!(!Occurs::OPTIONAL.is_prohibited());
        assert_eq!(Occurs::PROHIBITED.to_string(), "[0..0]");
    }

    #[test]
    fn test_json_template_uses_key_as_name() {
        let keyed = FieldTemplate::json(JsonKind::String, Some("name"));
        let keyless = FieldTemplate::json(JsonKind::Map, None);
        assert_eq!(keyed.name, "name");
        assert_eq!(keyless.name, "");
        assert_eq!(JsonKind::from_element_name("array"), Some(JsonKind::Array));
    }
}
