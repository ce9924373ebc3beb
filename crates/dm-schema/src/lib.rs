#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # dm-schema
//!
//! Schema loading for the data mapper.
//!
//! XML Schema file sets are parsed, ordered by their include/import
//! dependencies and merged into a collection of global declarations, which
//! is then turned into a lazily expanded document. JSON Schema and
//! schema-less bodies get the same document shape. The override service
//! changes field types and choice selections on built documents and keeps
//! the persisted records in the document definition in step.

pub mod json;
pub mod loader;
pub mod namespaces;
pub mod overrides;
pub mod primitive;
pub mod registry;
pub mod validation;
pub mod xml;
pub mod xsd;

pub use json::create_json_document;
pub use loader::{LoadPlan, SchemaLoader, load_collection};
pub use overrides::{
    add_schema_files_for_type_override, apply_choice_selection, apply_field_type_override,
    get_all_override_candidates, get_safe_override_candidates, revert_choice_selection,
    revert_field_type_override,
};
pub use primitive::create_primitive_document;
pub use registry::SchemaCollection;
pub use validation::{CreateDocumentResult, DocumentIssue, ValidationStatus};
pub use xml::create_xml_document;

use dm_ir::{DefinitionType, DocumentDefinition};
use thiserror::Error;

/// Errors that can occur when loading schemas
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Failed to parse {file_path}{}: {message}", position.as_deref().map(|p| format!(" at {p}")).unwrap_or_default())]
    Parse {
        file_path: String,
        message: String,
        /// `row:column` of the problem, when the parser reports one
        position: Option<String>,
    },

    #[error("{file_path}: dependency '{location}' not found in the schema file set")]
    UnresolvedDependency { file_path: String, location: String },

    #[error("Circular schema dependency between {}", files.join(", "))]
    DependencyCycle { files: Vec<String> },

    #[error("Schema set has no top-level element")]
    NoTopLevelElement,

    #[error("Root element {{{namespace_uri}}}{name} is not declared in the schema set")]
    UnresolvedRootElement { namespace_uri: String, name: String },

    #[error("{file_path}: unsupported schema construct {construct}")]
    UnsupportedConstruct { file_path: String, construct: String },

    #[error("Invalid JSON schema {file_path}: {message}")]
    Json { file_path: String, message: String },

    #[error(transparent)]
    Ir(#[from] dm_ir::Error),
}

impl Error {
    /// Build a parse error with optional position context.
    pub fn parse(
        file_path: impl Into<String>,
        message: impl Into<String>,
        position: Option<String>,
    ) -> Self {
        Self::Parse {
            file_path: file_path.into(),
            message: message.into(),
            position,
        }
    }

    /// Build an error for an include or import that names no file of the set.
    pub fn unresolved_dependency(file_path: impl Into<String>, location: impl Into<String>) -> Self {
        Self::UnresolvedDependency {
            file_path: file_path.into(),
            location: location.into(),
        }
    }

    pub fn unsupported_construct(file_path: impl Into<String>, construct: impl Into<String>) -> Self {
        Self::UnsupportedConstruct {
            file_path: file_path.into(),
            construct: construct.into(),
        }
    }

    pub fn json(file_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Json {
            file_path: file_path.into(),
            message: message.into(),
        }
    }

    /// File the error was found in, when it is tied to one
    pub fn file_path(&self) -> Option<&str> {
        match self {
            Error::Parse { file_path, .. }
            | Error::UnresolvedDependency { file_path, .. }
            | Error::UnsupportedConstruct { file_path, .. }
            | Error::Json { file_path, .. } => Some(file_path),
            Error::DependencyCycle { .. }
            | Error::NoTopLevelElement
            | Error::UnresolvedRootElement { .. }
            | Error::Ir(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Build the document a definition describes
pub fn create_document(definition: &DocumentDefinition) -> CreateDocumentResult {
    match definition.definition_type {
        DefinitionType::XmlSchema => create_xml_document(definition),
        DefinitionType::JsonSchema => create_json_document(definition),
        DefinitionType::Primitive => create_primitive_document(definition),
    }
}
