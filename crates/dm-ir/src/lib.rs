#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # dm-ir
//!
//! Document model for the data mapper: a format-neutral field tree built
//! from XML Schema, JSON Schema or schema-less bodies, the canonical type
//! taxonomy with extension/restriction reasoning, and structural schema
//! paths that address any field, including choice members.

/// Persisted definitions, overrides and choice selections.
pub mod definition;
/// Per-dialect behavior behind a closed document kind.
pub mod dialect;
/// Document container with lazily materialized fields.
pub mod document;
/// Field declarations and materialized field nodes.
pub mod field;
/// Named type fragment arena.
pub mod fragment;
/// Qualified names and namespace prefix maps.
pub mod names;
/// Schema path building, parsing and navigation.
pub mod path;
/// Depth-bounded visitor traversal.
pub mod traversal;
/// Canonical types, named type catalog and override classification.
pub mod types;

pub use definition::{
    ChoiceSelection, DefinitionType, DocumentDefinition, DocumentType, FieldTypeOverride,
    RootElementOption,
};
pub use dialect::{DocumentKind, JsonDialect, PrimitiveDialect, SchemaDialect, XmlDialect};
pub use document::{Document, DocumentId};
pub use field::{Field, FieldId, FieldKind, FieldTemplate, JsonKind, MaxOccurs, Occurs};
pub use fragment::{FragmentKey, FragmentRegistry, TypeFragment, TypeId};
pub use names::{FN_NAMESPACE, NamespaceMap, QName, XSD_NAMESPACE};
pub use path::{ElementSegment, PathSegment};
pub use traversal::{PathCollector, Traversal, walk};
pub use types::{
    CanonicalType, DerivationMethod, NamedType, TypeCandidate, TypeCandidates, TypeCatalog,
    TypeCategory, TypeDerivation, TypeOverrideVariant, determine_override_variant,
    map_schema_type_to_canonical,
};

use thiserror::Error;

/// Errors that can occur when working with the document model
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Field not found at path: {path}")]
    FieldNotFound { path: String },

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("{operation} is not supported on {kind} documents")]
    UnsupportedDocument { kind: String, operation: String },

    #[error("Invalid override target '{path}': {reason}")]
    InvalidOverrideTarget { path: String, reason: String },
}

impl Error {
    /// Build a field-not-found error with path context.
    pub fn field_not_found(path: impl Into<String>) -> Self {
        Self::FieldNotFound { path: path.into() }
    }

    /// Build an invalid-path error with input path and parsing reason.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Build an error for an operation a document kind does not support.
    pub fn unsupported_document(kind: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::UnsupportedDocument {
            kind: kind.into(),
            operation: operation.into(),
        }
    }

    /// Build an error for a field that cannot take an override or selection.
    pub fn invalid_override_target(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOverrideTarget {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Crate-local result type for document model operations.
pub type Result<T> = std::result::Result<T, Error>;
