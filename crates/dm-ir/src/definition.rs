//! Persisted document definition
//!
//! A [`DocumentDefinition`] is everything needed to rebuild a document:
//! the raw schema files plus the user's session decisions (root element,
//! type overrides, choice selections). Decisions are keyed by schema path
//! so they survive regeneration of the field tree.
#![allow(clippy::must_use_candidate)] // Record lookups are clear at call sites.

use crate::names::{NamespaceMap, QName};
use crate::path::is_strict_descendant;
use crate::types::TypeOverrideVariant;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Role of a document in a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DocumentType {
    SourceBody,
    TargetBody,
    Param,
}

/// Schema dialect of a definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DefinitionType {
    XmlSchema,
    JsonSchema,
    /// Schema-less body
    Primitive,
}

impl fmt::Display for DefinitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DefinitionType::XmlSchema => "XML schema",
            DefinitionType::JsonSchema => "JSON schema",
            DefinitionType::Primitive => "primitive",
        };
        f.write_str(name)
    }
}

/// Explicit root element choice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootElementOption {
    #[serde(default)]
    pub namespace_uri: String,
    pub name: String,
}

impl RootElementOption {
    pub fn new(namespace_uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace_uri: namespace_uri.into(),
            name: name.into(),
        }
    }

    /// Qualified name of the element
    pub fn qname(&self) -> QName {
        QName::new(Some(&self.namespace_uri), self.name.clone())
    }
}

impl From<&QName> for RootElementOption {
    fn from(name: &QName) -> Self {
        Self::new(name.namespace().unwrap_or_default(), name.local_name.clone())
    }
}

/// A persisted field type override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldTypeOverride {
    pub schema_path: String,
    /// Type the field was overridden to
    #[serde(rename = "type")]
    pub type_name: QName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_type: Option<QName>,
    pub variant: TypeOverrideVariant,
}

/// A persisted choice member selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceSelection {
    pub schema_path: String,
    pub selected_member_index: usize,
}

/// Input of document construction and home of persisted session state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDefinition {
    pub document_type: DocumentType,
    pub definition_type: DefinitionType,
    /// Document name; the parameter name for parameters
    pub name: String,
    /// File name → file contents
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_element_choice: Option<RootElementOption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_type_overrides: Vec<FieldTypeOverride>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choice_selections: Vec<ChoiceSelection>,
    #[serde(default, skip_serializing_if = "NamespaceMap::is_empty")]
    pub namespace_map: NamespaceMap,
}

impl DocumentDefinition {
    /// Definition with no files and no session state
    pub fn new(
        document_type: DocumentType,
        definition_type: DefinitionType,
        name: impl Into<String>,
    ) -> Self {
        Self {
            document_type,
            definition_type,
            name: name.into(),
            files: BTreeMap::new(),
            root_element_choice: None,
            field_type_overrides: Vec::new(),
            choice_selections: Vec::new(),
            namespace_map: NamespaceMap::new(),
        }
    }

    /// Add a schema file
    #[must_use]
    pub fn with_file(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(name.into(), content.into());
        self
    }

    /// Set the explicit root element
    #[must_use]
    pub fn with_root_element(mut self, root: RootElementOption) -> Self {
        self.root_element_choice = Some(root);
        self
    }

    /// Override record for a path
    pub fn field_type_override(&self, schema_path: &str) -> Option<&FieldTypeOverride> {
        self.field_type_overrides
            .iter()
            .find(|record| record.schema_path == schema_path)
    }

    /// Insert or replace the override record for its path
    pub fn upsert_field_type_override(&mut self, record: FieldTypeOverride) {
        match self
            .field_type_overrides
            .iter_mut()
            .find(|existing| existing.schema_path == record.schema_path)
        {
            Some(existing) => *existing = record,
            None => self.field_type_overrides.push(record),
        }
    }

    /// Remove the override record for a path, returning it
    pub fn remove_field_type_override(&mut self, schema_path: &str) -> Option<FieldTypeOverride> {
        let idx = self
            .field_type_overrides
            .iter()
            .position(|record| record.schema_path == schema_path)?;
        Some(self.field_type_overrides.remove(idx))
    }

    /// Selection record for a path
    pub fn choice_selection(&self, schema_path: &str) -> Option<&ChoiceSelection> {
        self.choice_selections
            .iter()
            .find(|record| record.schema_path == schema_path)
    }

    /// Insert or replace the selection record for its path
    pub fn upsert_choice_selection(&mut self, record: ChoiceSelection) {
        match self
            .choice_selections
            .iter_mut()
            .find(|existing| existing.schema_path == record.schema_path)
        {
            Some(existing) => *existing = record,
            None => self.choice_selections.push(record),
        }
    }

    /// Remove the selection record for a path, returning it
    pub fn remove_choice_selection(&mut self, schema_path: &str) -> Option<ChoiceSelection> {
        let idx = self
            .choice_selections
            .iter()
            .position(|record| record.schema_path == schema_path)?;
        Some(self.choice_selections.remove(idx))
    }

    /// Drop every override and selection below `schema_path`, keeping the
    /// records at `schema_path` itself. Returns the number removed.
    pub fn invalidate_descendants(&mut self, schema_path: &str) -> usize {
        let before = self.field_type_overrides.len() + self.choice_selections.len();
        self.field_type_overrides
            .retain(|record| !is_strict_descendant(&record.schema_path, schema_path));
        self.choice_selections
            .retain(|record| !is_strict_descendant(&record.schema_path, schema_path));
        let removed = before - self.field_type_overrides.len() - self.choice_selections.len();
        if removed > 0 {
            tracing::debug!(schema_path, removed, "invalidated descendant records");
        }
        removed
    }
}
