//! Document construction results

use crate::Error;
use dm_ir::{Document, RootElementOption};
use serde::{Deserialize, Serialize};

/// Overall outcome of building a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationStatus {
    Success,
    /// Built, with non-blocking issues
    Warning,
    /// Not built
    Error,
}

/// One reported problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentIssue {
    pub message: String,
    /// File the problem was found in, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl DocumentIssue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file_path: None,
        }
    }

    pub fn in_file(message: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file_path: Some(file_path.into()),
        }
    }
}

impl From<&Error> for DocumentIssue {
    fn from(err: &Error) -> Self {
        Self {
            message: err.to_string(),
            file_path: err.file_path().map(str::to_string),
        }
    }
}

impl From<Error> for DocumentIssue {
    fn from(err: Error) -> Self {
        Self::from(&err)
    }
}

/// Result of building a document from its definition.
///
/// `document` is present unless `validation_status` is
/// [`ValidationStatus::Error`].
#[derive(Debug)]
pub struct CreateDocumentResult {
    pub validation_status: ValidationStatus,
    pub errors: Vec<DocumentIssue>,
    pub warnings: Vec<DocumentIssue>,
    pub document: Option<Document>,
    /// Top-level elements a root may be picked from
    pub root_element_options: Vec<RootElementOption>,
}

impl CreateDocumentResult {
    /// A failed build
    pub fn failed(errors: Vec<DocumentIssue>) -> Self {
        Self {
            validation_status: ValidationStatus::Error,
            errors,
            warnings: Vec::new(),
            document: None,
            root_element_options: Vec::new(),
        }
    }

    /// A successful build; the status reflects whether there were warnings
    pub fn built(document: Document, warnings: Vec<DocumentIssue>) -> Self {
        let validation_status = if warnings.is_empty() {
            ValidationStatus::Success
        } else {
            ValidationStatus::Warning
        };
        Self {
            validation_status,
            errors: Vec::new(),
            warnings,
            document: Some(document),
            root_element_options: Vec::new(),
        }
    }

    /// Attach root element choices
    #[must_use]
    pub fn with_root_element_options(mut self, options: Vec<RootElementOption>) -> Self {
        self.root_element_options = options;
        self
    }

    /// Check if there are any errors
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take the document, turning a failed build into its first error
    pub fn into_document(self) -> std::result::Result<Document, DocumentIssue> {
        match self.document {
            Some(document) => Ok(document),
            None => Err(self
                .errors
                .into_iter()
                .next()
                .unwrap_or_else(|| DocumentIssue::new("document was not created"))),
        }
    }
}
