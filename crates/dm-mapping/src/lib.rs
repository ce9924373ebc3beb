#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # dm-mapping
//!
//! Mapping tree, XSLT serializer/deserializer, and mapping link extraction.
//!
//! A mapping is kept as a [`MappingTree`] of target field nodes and the
//! instructions that fill them. The tree is persisted as an XSLT stylesheet
//! ([`serialize`]) and recovered from one ([`deserialize`]). Link extraction
//! statically reads every expression in the tree and reports which source
//! fields feed which target nodes.

/// Stylesheet to mapping tree.
pub mod deserializer;
/// Source field links read from mapping expressions.
pub mod links;
/// Source and parameter documents and expression path resolution.
pub mod resolve;
/// Mapping tree to stylesheet.
pub mod serializer;
/// Reserved names for JSON bodies and parameters.
pub mod structured;
/// Mapping tree model and edit actions.
pub mod tree;
/// XPath expression subset.
pub mod xpath;
/// XSLT instruction AST, reader and writer.
pub mod xslt;

pub use deserializer::deserialize;
pub use links::{MappingLink, extract_mapping_links, is_in_selected_mapping};
pub use resolve::SourceDocuments;
pub use serializer::serialize;
pub use tree::{FieldItem, MappingNode, MappingTree, NodeKind, Parameter, ValueKind};
pub use xpath::Expr;
pub use xslt::Stylesheet;

use thiserror::Error;

/// Errors that can occur while reading, writing or editing mappings
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Malformed stylesheet: {message}{}", .position.as_ref().map(|p| format!(" at {p}")).unwrap_or_default())]
    Xslt {
        message: String,
        position: Option<String>,
    },

    #[error("Invalid expression '{expression}' at offset {offset}: {message}")]
    Expression {
        expression: String,
        message: String,
        offset: usize,
    },

    #[error("Stylesheet has no template matching '/'")]
    MissingTemplate,

    #[error(transparent)]
    Ir(#[from] dm_ir::Error),

    #[error("Unknown document: {id}")]
    UnknownDocument { id: String },

    #[error("No mapping node for {path}")]
    NodeNotFound { path: String },
}

impl Error {
    pub fn xslt(message: impl Into<String>, position: Option<String>) -> Self {
        Self::Xslt {
            message: message.into(),
            position,
        }
    }

    pub fn expression(expression: &str, message: impl Into<String>, offset: usize) -> Self {
        Self::Expression {
            expression: expression.to_string(),
            message: message.into(),
            offset,
        }
    }

    pub fn node_not_found(path: impl Into<String>) -> Self {
        Self::NodeNotFound { path: path.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
