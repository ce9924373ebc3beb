//! Canonical type taxonomy and the extension/restriction lattice
//!
//! Built-in schema types are folded into a closed [`CanonicalType`]
//! enumeration. User-defined named types are recorded in a [`TypeCatalog`]
//! together with their base type, which is enough to answer derivation
//! questions and to classify field type overrides.
#![allow(clippy::must_use_candidate)] // Lookup helpers are clear at call sites.

use crate::names::{QName, XSD_NAMESPACE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Closed set of value categories a field can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CanonicalType {
    /// Universal type, accepts anything
    AnyType,
    String,
    Boolean,
    Decimal,
    Integer,
    Long,
    Int,
    Short,
    Byte,
    Float,
    Double,
    /// JSON `number`
    Numeric,
    Date,
    DateTime,
    Time,
    Duration,
    DayTimeDuration,
    YearMonthDuration,
    /// `gYear`, `gMonthDay` and friends
    Gregorian,
    AnyURI,
    QName,
    Binary,
    /// Structured type with child fields
    Container,
    /// JSON `array`
    Array,
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CanonicalType::AnyType => "anyType",
            CanonicalType::String => "string",
            CanonicalType::Boolean => "boolean",
            CanonicalType::Decimal => "decimal",
            CanonicalType::Integer => "integer",
            CanonicalType::Long => "long",
            CanonicalType::Int => "int",
            CanonicalType::Short => "short",
            CanonicalType::Byte => "byte",
            CanonicalType::Float => "float",
            CanonicalType::Double => "double",
            CanonicalType::Numeric => "numeric",
            CanonicalType::Date => "date",
            CanonicalType::DateTime => "dateTime",
            CanonicalType::Time => "time",
            CanonicalType::Duration => "duration",
            CanonicalType::DayTimeDuration => "dayTimeDuration",
            CanonicalType::YearMonthDuration => "yearMonthDuration",
            CanonicalType::Gregorian => "gregorian",
            CanonicalType::AnyURI => "anyURI",
            CanonicalType::QName => "QName",
            CanonicalType::Binary => "binary",
            CanonicalType::Container => "container",
            CanonicalType::Array => "array",
        };
        f.write_str(name)
    }
}

/// Built-in XML Schema types and their canonical category
pub const XSD_BUILTIN_TYPES: &[(&str, CanonicalType)] = &[
    ("anyType", CanonicalType::AnyType),
    ("anySimpleType", CanonicalType::AnyType),
    ("anyAtomicType", CanonicalType::AnyType),
    ("string", CanonicalType::String),
    ("normalizedString", CanonicalType::String),
    ("token", CanonicalType::String),
    ("language", CanonicalType::String),
    ("Name", CanonicalType::String),
    ("NCName", CanonicalType::String),
    ("ID", CanonicalType::String),
    ("IDREF", CanonicalType::String),
    ("IDREFS", CanonicalType::String),
    ("ENTITY", CanonicalType::String),
    ("ENTITIES", CanonicalType::String),
    ("NMTOKEN", CanonicalType::String),
    ("NMTOKENS", CanonicalType::String),
    ("NOTATION", CanonicalType::String),
    ("boolean", CanonicalType::Boolean),
    ("decimal", CanonicalType::Decimal),
    ("integer", CanonicalType::Integer),
    ("nonPositiveInteger", CanonicalType::Integer),
    ("negativeInteger", CanonicalType::Integer),
    ("nonNegativeInteger", CanonicalType::Integer),
    ("positiveInteger", CanonicalType::Integer),
    ("unsignedLong", CanonicalType::Integer),
    ("long", CanonicalType::Long),
    ("int", CanonicalType::Int),
    ("unsignedInt", CanonicalType::Int),
    ("short", CanonicalType::Short),
    ("unsignedShort", CanonicalType::Short),
    ("byte", CanonicalType::Byte),
    ("unsignedByte", CanonicalType::Byte),
    ("float", CanonicalType::Float),
    ("double", CanonicalType::Double),
    ("date", CanonicalType::Date),
    ("dateTime", CanonicalType::DateTime),
    ("dateTimeStamp", CanonicalType::DateTime),
    ("time", CanonicalType::Time),
    ("duration", CanonicalType::Duration),
    ("dayTimeDuration", CanonicalType::DayTimeDuration),
    ("yearMonthDuration", CanonicalType::YearMonthDuration),
    ("gYear", CanonicalType::Gregorian),
    ("gYearMonth", CanonicalType::Gregorian),
    ("gMonth", CanonicalType::Gregorian),
    ("gMonthDay", CanonicalType::Gregorian),
    ("gDay", CanonicalType::Gregorian),
    ("anyURI", CanonicalType::AnyURI),
    ("QName", CanonicalType::QName),
    ("base64Binary", CanonicalType::Binary),
    ("hexBinary", CanonicalType::Binary),
];

/// JSON Schema `type` keywords and their canonical category
pub const JSON_BUILTIN_TYPES: &[(&str, CanonicalType)] = &[
    ("string", CanonicalType::String),
    ("number", CanonicalType::Numeric),
    ("integer", CanonicalType::Integer),
    ("boolean", CanonicalType::Boolean),
    ("object", CanonicalType::Container),
    ("array", CanonicalType::Array),
    ("null", CanonicalType::AnyType),
];

/// Look up a built-in XML Schema type by local name
pub fn xsd_builtin(local_name: &str) -> Option<CanonicalType> {
    XSD_BUILTIN_TYPES
        .iter()
        .find(|(name, _)| *name == local_name)
        .map(|(_, ty)| *ty)
}

/// Look up a JSON Schema `type` keyword
pub fn json_builtin(keyword: &str) -> Option<CanonicalType> {
    JSON_BUILTIN_TYPES
        .iter()
        .find(|(name, _)| *name == keyword)
        .map(|(_, ty)| *ty)
}

/// Map a schema type name to its canonical category.
///
/// Built-in names that are not in the table map to [`CanonicalType::AnyType`];
/// any name outside the XML Schema namespace is a user-defined structured
/// type and maps to [`CanonicalType::Container`].
pub fn map_schema_type_to_canonical(namespace: Option<&str>, local_name: &str) -> CanonicalType {
    if namespace == Some(XSD_NAMESPACE) {
        xsd_builtin(local_name).unwrap_or(CanonicalType::AnyType)
    } else {
        CanonicalType::Container
    }
}

/// How a type was derived from its base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DerivationMethod {
    Extension,
    Restriction,
}

/// Whether a named type has child structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TypeCategory {
    Simple,
    Complex,
}

/// Base type reference of a derived type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDerivation {
    pub base: QName,
    pub method: DerivationMethod,
}

/// A user-defined named type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedType {
    pub name: QName,
    pub category: TypeCategory,
    pub canonical: CanonicalType,
    pub derivation: Option<TypeDerivation>,
}

impl NamedType {
    /// A named type with no base type
    pub fn new(name: QName, category: TypeCategory, canonical: CanonicalType) -> Self {
        Self {
            name,
            category,
            canonical,
            derivation: None,
        }
    }

    /// Record the base type this type derives from
    #[must_use]
    pub fn derived_from(mut self, base: QName, method: DerivationMethod) -> Self {
        self.derivation = Some(TypeDerivation { base, method });
        self
    }
}

/// Every user-defined named type of a document's schema set
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    types: Vec<NamedType>,
    index: HashMap<QName, usize>,
}

impl TypeCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type. The first registration of a name wins; returns
    /// `false` when the name was already present.
    pub fn register(&mut self, named: NamedType) -> bool {
        if self.index.contains_key(&named.name) {
            return false;
        }
        self.index.insert(named.name.clone(), self.types.len());
        self.types.push(named);
        true
    }

    /// Look up a type by name
    pub fn get(&self, name: &QName) -> Option<&NamedType> {
        self.index.get(name).map(|&idx| &self.types[idx])
    }

    /// Whether a type is registered
    pub fn contains(&self, name: &QName) -> bool {
        self.index.contains_key(name)
    }

    /// Iterate types in registration order
    pub fn iter(&self) -> impl Iterator<Item = &NamedType> {
        self.types.iter()
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Whether `candidate` derives from `base` through zero or more
    /// extension/restriction steps.
    ///
    /// A base chain that leaves the catalog (an unresolvable type) answers
    /// `false`; a cyclic chain terminates.
    pub fn is_extension_or_restriction(&self, candidate: &QName, base: &QName) -> bool {
        if candidate == base {
            return true;
        }
        let mut visited = HashSet::new();
        let mut current = candidate;
        while let Some(named) = self.get(current) {
            let Some(derivation) = &named.derivation else {
                return false;
            };
            if &derivation.base == base {
                return true;
            }
            if !visited.insert(current.clone()) {
                return false;
            }
            current = &derivation.base;
        }
        false
    }

    /// Every registered type deriving from `base`, excluding `base` itself
    pub fn get_extensions_and_restrictions(&self, base: &QName) -> Vec<&NamedType> {
        self.types
            .iter()
            .filter(|named| &named.name != base)
            .filter(|named| self.is_extension_or_restriction(&named.name, base))
            .collect()
    }
}

/// Classification of a field type override
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TypeOverrideVariant {
    /// The field carries its schema-declared type
    #[default]
    None,
    /// Compatible with the declared type
    Safe,
    /// Requires explicit acknowledgement; may violate the schema
    Force,
}

/// A type a field may be overridden to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeCandidate {
    pub name: QName,
    /// Name rendered with the caller's namespace prefixes
    pub display_name: String,
    pub canonical: CanonicalType,
    pub is_builtin: bool,
}

/// Override candidates keyed by display name
pub type TypeCandidates = BTreeMap<String, TypeCandidate>;

/// Classify an override of a field's original type.
///
/// `Safe` when the original type is the universal type, or when both types
/// are structured and the candidate derives from the original. Everything
/// else is `Force`.
pub fn determine_override_variant(
    original: CanonicalType,
    original_name: Option<&QName>,
    candidate: &TypeCandidate,
    catalog: &TypeCatalog,
) -> TypeOverrideVariant {
    if original == CanonicalType::AnyType {
        return TypeOverrideVariant::Safe;
    }
    let both_structured =
        original == CanonicalType::Container && candidate.canonical == CanonicalType::Container;
    match original_name {
        Some(original_name)
            if both_structured
                && catalog.is_extension_or_restriction(&candidate.name, original_name) =>
        {
            TypeOverrideVariant::Safe
        }
        _ => TypeOverrideVariant::Force,
    }
}
