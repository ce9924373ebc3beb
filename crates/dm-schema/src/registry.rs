//! Global definitions of a loaded schema set
#![allow(clippy::must_use_candidate)] // Lookups are clear at call sites.

use crate::xsd::{
    AttributeDecl, AttributeGroupDef, ComplexTypeDef, ContentModel, ElementDecl, GroupDef,
    SchemaFile, SimpleTypeDef, SimpleVariety,
};
use dm_ir::{
    CanonicalType, NamedType, QName, RootElementOption, TypeCatalog, TypeCategory,
    map_schema_type_to_canonical,
};
use std::collections::HashMap;

/// Base chains of simple types are followed up to this length
const MAX_SIMPLE_DERIVATION: usize = 32;

/// Named definitions in registration order; the first definition wins
#[derive(Debug, Clone)]
pub struct Definitions<T> {
    items: Vec<T>,
    index: HashMap<QName, usize>,
}

impl<T> Default for Definitions<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> Definitions<T> {
    fn insert(&mut self, name: QName, item: T) -> bool {
        if self.index.contains_key(&name) {
            return false;
        }
        self.index.insert(name, self.items.len());
        self.items.push(item);
        true
    }

    /// Definition for a name
    pub fn get(&self, name: &QName) -> Option<&T> {
        self.index.get(name).map(|&idx| &self.items[idx])
    }

    /// Definitions in registration order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Every global definition of a schema set, merged across files
#[derive(Debug, Clone, Default)]
pub struct SchemaCollection {
    primary_file: String,
    files: Vec<String>,
    target_namespaces: Vec<String>,
    elements: Definitions<ElementDecl>,
    element_files: Vec<String>,
    attributes: Definitions<AttributeDecl>,
    complex_types: Definitions<ComplexTypeDef>,
    simple_types: Definitions<SimpleTypeDef>,
    groups: Definitions<GroupDef>,
    attribute_groups: Definitions<AttributeGroupDef>,
    duplicates: Vec<String>,
}

impl SchemaCollection {
    /// Create an empty collection
    pub fn new(primary_file: impl Into<String>) -> Self {
        Self {
            primary_file: primary_file.into(),
            ..Self::default()
        }
    }

    /// Merge a parsed file. Definitions already present are kept and the
    /// clash is recorded.
    pub fn add_file(&mut self, file: SchemaFile) {
        let SchemaFile {
            file_path,
            header,
            elements,
            attributes,
            complex_types,
            simple_types,
            groups,
            attribute_groups,
        } = file;

        if let Some(namespace) = header.target_namespace {
            if !self.target_namespaces.contains(&namespace) {
                self.target_namespaces.push(namespace);
            }
        }

        for element in elements {
            let name = element.name.clone();
            if self.elements.insert(name.clone(), element) {
                self.element_files.push(file_path.clone());
            } else {
                self.duplicate(&file_path, "element", &name);
            }
        }
        for attribute in attributes {
            let name = attribute.name.clone();
            if !self.attributes.insert(name.clone(), attribute) {
                self.duplicate(&file_path, "attribute", &name);
            }
        }
        for complex_type in complex_types {
            let Some(name) = complex_type.name.clone() else {
                continue;
            };
            if !self.complex_types.insert(name.clone(), complex_type) {
                self.duplicate(&file_path, "complex type", &name);
            }
        }
        for simple_type in simple_types {
            let Some(name) = simple_type.name.clone() else {
                continue;
            };
            if !self.simple_types.insert(name.clone(), simple_type) {
                self.duplicate(&file_path, "simple type", &name);
            }
        }
        for group in groups {
            let name = group.name.clone();
            if !self.groups.insert(name.clone(), group) {
                self.duplicate(&file_path, "group", &name);
            }
        }
        for group in attribute_groups {
            let name = group.name.clone();
            if !self.attribute_groups.insert(name.clone(), group) {
                self.duplicate(&file_path, "attribute group", &name);
            }
        }
        self.files.push(file_path);
    }

    fn duplicate(&mut self, file_path: &str, what: &str, name: &QName) {
        tracing::debug!(file_path, what, %name, "duplicate global definition");
        self.duplicates
            .push(format!("Duplicate {what} {name} in {file_path} ignored"));
    }

    /// The file the root element defaults from
    pub fn primary_file(&self) -> &str {
        &self.primary_file
    }

    /// Files in load order
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Target namespaces in load order
    pub fn target_namespaces(&self) -> &[String] {
        &self.target_namespaces
    }

    /// Messages about clashing global definitions
    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }

    pub fn element(&self, name: &QName) -> Option<&ElementDecl> {
        self.elements.get(name)
    }

    pub fn attribute(&self, name: &QName) -> Option<&AttributeDecl> {
        self.attributes.get(name)
    }

    pub fn complex_type(&self, name: &QName) -> Option<&ComplexTypeDef> {
        self.complex_types.get(name)
    }

    pub fn simple_type(&self, name: &QName) -> Option<&SimpleTypeDef> {
        self.simple_types.get(name)
    }

    pub fn group(&self, name: &QName) -> Option<&GroupDef> {
        self.groups.get(name)
    }

    pub fn attribute_group(&self, name: &QName) -> Option<&AttributeGroupDef> {
        self.attribute_groups.get(name)
    }

    pub fn complex_types(&self) -> &Definitions<ComplexTypeDef> {
        &self.complex_types
    }

    pub fn simple_types(&self) -> &Definitions<SimpleTypeDef> {
        &self.simple_types
    }

    /// Top-level elements in load order
    pub fn global_elements(&self) -> Vec<&ElementDecl> {
        self.elements.iter().collect()
    }

    /// Root element choices for a picker
    pub fn root_element_options(&self) -> Vec<RootElementOption> {
        self.elements
            .iter()
            .map(|element| RootElementOption::from(&element.name))
            .collect()
    }

    /// First top-level element of the primary file, else the first loaded
    pub fn default_root(&self) -> Option<&ElementDecl> {
        self.elements
            .iter()
            .zip(&self.element_files)
            .find(|(_, file)| **file == self.primary_file)
            .map(|(element, _)| element)
            .or_else(|| self.elements.iter().next())
    }

    /// Canonical type of a simple type name; `None` when it cannot be
    /// resolved
    pub fn simple_canonical(&self, name: &QName) -> Option<CanonicalType> {
        let mut current = name.clone();
        for _ in 0..MAX_SIMPLE_DERIVATION {
            if current.is_xsd_builtin() {
                return Some(map_schema_type_to_canonical(
                    current.namespace(),
                    &current.local_name,
                ));
            }
            let simple = self.simple_type(&current)?;
            current = match &simple.variety {
                SimpleVariety::Restriction { base: Some(base) } => base.clone(),
                SimpleVariety::Restriction { base: None } => return Some(CanonicalType::AnyType),
                SimpleVariety::List => return Some(CanonicalType::String),
                SimpleVariety::Union => return Some(CanonicalType::AnyType),
            };
        }
        tracing::debug!(%name, "simple type derivation too deep");
        None
    }

    /// Canonical type of an anonymous simple type
    pub fn inline_simple_canonical(&self, simple: &SimpleTypeDef) -> CanonicalType {
        match &simple.variety {
            SimpleVariety::Restriction { base: Some(base) } => self
                .simple_canonical(base)
                .unwrap_or(CanonicalType::AnyType),
            SimpleVariety::List => CanonicalType::String,
            SimpleVariety::Restriction { base: None } | SimpleVariety::Union => {
                CanonicalType::AnyType
            }
        }
    }

    /// Named types with their base types
    pub fn type_catalog(&self) -> TypeCatalog {
        let mut catalog = TypeCatalog::new();
        self.extend_catalog(&mut catalog);
        catalog
    }

    /// Register every named type not yet in `catalog`
    pub fn extend_catalog(&self, catalog: &mut TypeCatalog) {
        for complex in self.complex_types.iter() {
            let Some(name) = &complex.name else {
                continue;
            };
            let mut named = NamedType::new(name.clone(), TypeCategory::Complex, CanonicalType::Container);
            if let ContentModel::Simple(derivation) | ContentModel::Complex(derivation) =
                &complex.content
            {
                named = named.derived_from(derivation.base.clone(), derivation.method);
            }
            catalog.register(named);
        }
        for simple in self.simple_types.iter() {
            let Some(name) = &simple.name else {
                continue;
            };
            let canonical = self.simple_canonical(name).unwrap_or(CanonicalType::AnyType);
            let mut named = NamedType::new(name.clone(), TypeCategory::Simple, canonical);
            if let SimpleVariety::Restriction { base: Some(base) } = &simple.variety {
                named = named.derived_from(base.clone(), dm_ir::DerivationMethod::Restriction);
            }
            catalog.register(named);
        }
    }
}
