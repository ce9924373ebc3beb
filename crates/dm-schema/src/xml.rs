//! XML Schema documents
//!
//! Every named type, and every global element with an anonymous complex
//! type, is populated once into a fragment before the root element is
//! walked. Field declarations only point at fragments, so a type that
//! refers to itself costs one fragment no matter how often it is used.

use crate::loader::SchemaLoader;
use crate::namespaces;
use crate::overrides;
use crate::registry::SchemaCollection;
use crate::validation::{CreateDocumentResult, DocumentIssue};
use crate::xsd::{
    AttributeDecl, AttributeUse, ComplexTypeDef, Compositor, ContentModel, ElementDecl,
    InlineType, Particle,
};
use crate::{Error, Result};
use dm_ir::field::push_unique;
use dm_ir::{
    CanonicalType, Document, DocumentDefinition, DocumentKind, FieldTemplate, FragmentKey,
    FragmentRegistry, MaxOccurs, Occurs, QName, TypeId, XmlDialect, map_schema_type_to_canonical,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fields and fragment references accumulated for one owner
#[derive(Debug, Default)]
struct Content {
    fields: Vec<Arc<FieldTemplate>>,
    type_refs: Vec<TypeId>,
}

impl Content {
    fn push(&mut self, field: FieldTemplate) {
        push_unique(&mut self.fields, field);
    }

    fn push_ref(&mut self, id: TypeId) {
        if !self.type_refs.contains(&id) {
            self.type_refs.push(id);
        }
    }
}

/// Multiply cardinalities of a particle and its enclosing compositor
fn combine(inner: Occurs, outer: Occurs) -> Occurs {
    let max = match (inner.max, outer.max) {
        (MaxOccurs::Bounded(a), MaxOccurs::Bounded(b)) => MaxOccurs::Bounded(a.saturating_mul(b)),
        _ => MaxOccurs::Unbounded,
    };
    Occurs::new(inner.min.saturating_mul(outer.min), max)
}

/// Turns a schema collection into fragments and field declarations
pub struct XmlPopulator<'c> {
    collection: &'c SchemaCollection,
    fragments: FragmentRegistry,
    warnings: Vec<String>,
    group_stack: Vec<QName>,
    attribute_group_stack: Vec<QName>,
}

impl<'c> XmlPopulator<'c> {
    /// Populate into an existing registry; fragments already populated are
    /// left alone
    pub fn new(collection: &'c SchemaCollection, fragments: FragmentRegistry) -> Self {
        Self {
            collection,
            fragments,
            warnings: Vec::new(),
            group_stack: Vec::new(),
            attribute_group_stack: Vec::new(),
        }
    }

    /// Reserve and populate a fragment for every named type and every
    /// global element with an anonymous complex type
    pub fn populate_named_types(&mut self) -> Result<()> {
        let collection = self.collection;

        // Reserve everything first so forward references resolve
        for complex in collection.complex_types().iter() {
            if let Some(name) = &complex.name {
                self.fragments
                    .reserve(FragmentKey::Type(name.clone()), CanonicalType::Container);
            }
        }
        for simple in collection.simple_types().iter() {
            if let Some(name) = &simple.name {
                let canonical = collection
                    .simple_canonical(name)
                    .unwrap_or(CanonicalType::AnyType);
                self.fragments
                    .reserve(FragmentKey::Type(name.clone()), canonical);
            }
        }
        for element in collection.global_elements() {
            if matches!(element.inline_type, Some(InlineType::Complex(_))) {
                self.fragments
                    .reserve(FragmentKey::Element(element.name.clone()), CanonicalType::Container);
            }
        }

        for complex in collection.complex_types().iter() {
            let Some(name) = &complex.name else {
                continue;
            };
            if let Some(id) = self.fragments.lookup_type(name) {
                self.populate_fragment(id, complex)?;
            }
        }
        for simple in collection.simple_types().iter() {
            let Some(name) = &simple.name else {
                continue;
            };
            if let Some(id) = self.fragments.lookup_type(name) {
                if !self.fragments.is_populated(id) {
                    self.fragments.complete(id, Vec::new(), Vec::new());
                }
            }
        }
        for element in collection.global_elements() {
            let Some(InlineType::Complex(complex)) = &element.inline_type else {
                continue;
            };
            if let Some(id) = self
                .fragments
                .lookup(&FragmentKey::Element(element.name.clone()))
            {
                self.populate_fragment(id, complex)?;
            }
        }
        debug!(fragments = self.fragments.len(), "populated named type fragments");
        Ok(())
    }

    fn populate_fragment(&mut self, id: TypeId, complex: &ComplexTypeDef) -> Result<()> {
        // Checked before descending into the content
        if self.fragments.is_populated(id) {
            return Ok(());
        }
        self.fragments.mark_populated(id);
        let content = self.complex_content(complex)?;
        self.fragments.complete(id, content.fields, content.type_refs);
        Ok(())
    }

    /// Field declaration for the root element
    pub fn root_template(&mut self, root: &ElementDecl) -> Result<FieldTemplate> {
        Ok(self.element_template(root)?.with_occurs(Occurs::ONE))
    }

    /// Hand back the registry and the collected warnings
    pub fn finish(self) -> (FragmentRegistry, Vec<String>) {
        (self.fragments, self.warnings)
    }

    fn warn(&mut self, message: String) {
        debug!(%message, "schema population warning");
        self.warnings.push(message);
    }

    fn complex_content(&mut self, complex: &ComplexTypeDef) -> Result<Content> {
        let mut content = Content::default();
        match &complex.content {
            ContentModel::Empty => self.attribute_uses(&complex.attributes, &mut content),
            ContentModel::Particle(particle) => {
                self.attribute_uses(&complex.attributes, &mut content);
                self.particle(particle, Occurs::ONE, &mut content)?;
            }
            ContentModel::Complex(derivation) => {
                // Restrictions inherit the base attributes too; restated
                // particles collapse onto the base ones
                if let Some(base) = self.base_ref(&derivation.base) {
                    content.push_ref(base);
                }
                self.attribute_uses(&complex.attributes, &mut content);
                self.attribute_uses(&derivation.attributes, &mut content);
                if let Some(particle) = &derivation.particle {
                    self.particle(particle, Occurs::ONE, &mut content)?;
                }
            }
            ContentModel::Simple(derivation) => {
                if let Some(base) = self.base_ref(&derivation.base) {
                    content.push_ref(base);
                }
                self.attribute_uses(&complex.attributes, &mut content);
                self.attribute_uses(&derivation.attributes, &mut content);
            }
        }
        Ok(content)
    }

    fn base_ref(&mut self, base: &QName) -> Option<TypeId> {
        if base.is_xsd_builtin() {
            return None;
        }
        let found = self.fragments.lookup_type(base);
        if found.is_none() {
            self.warn(format!("Unresolved base type {base}"));
        }
        found
    }

    fn particle(&mut self, particle: &Particle, outer: Occurs, content: &mut Content) -> Result<()> {
        match particle {
            Particle::Element(decl) => {
                let occurs = combine(decl.occurs, outer);
                let field = self.element_template(decl)?.with_occurs(occurs);
                content.push(field);
            }
            Particle::Sequence(compositor) | Particle::All(compositor) => {
                let occurs = combine(compositor.occurs, outer);
                for inner in &compositor.particles {
                    self.particle(inner, occurs, content)?;
                }
            }
            Particle::Choice(compositor) => {
                let choice = self.choice_template(compositor, outer)?;
                content.push(choice);
            }
            Particle::GroupRef { name, occurs } => {
                self.group_ref(name, combine(*occurs, outer), content)?;
            }
            Particle::Any => debug!("skipping xs:any particle"),
        }
        Ok(())
    }

    fn choice_template(&mut self, compositor: &Compositor, outer: Occurs) -> Result<FieldTemplate> {
        let mut members = Content::default();
        for member in &compositor.particles {
            self.choice_member(member, &mut members)?;
        }
        let mut choice = FieldTemplate::choice().with_occurs(combine(compositor.occurs, outer));
        choice.fields = members.fields;
        choice.type_refs = members.type_refs;
        Ok(choice)
    }

    fn choice_member(&mut self, member: &Particle, members: &mut Content) -> Result<()> {
        match member {
            Particle::Sequence(sequence) | Particle::All(sequence)
                if sequence.particles.len() == 1 =>
            {
                self.choice_member(&sequence.particles[0], members)
            }
            Particle::Sequence(sequence) | Particle::All(sequence) => {
                let mut inner = Content::default();
                for particle in &sequence.particles {
                    self.particle(particle, Occurs::ONE, &mut inner)?;
                }
                let mut group = FieldTemplate::sequence().with_occurs(sequence.occurs);
                group.fields = inner.fields;
                group.type_refs = inner.type_refs;
                members.push(group);
                Ok(())
            }
            Particle::Choice(nested) => {
                let choice = self.choice_template(nested, Occurs::ONE)?;
                members.push(choice);
                Ok(())
            }
            Particle::Element(_) | Particle::GroupRef { .. } | Particle::Any => {
                self.particle(member, Occurs::ONE, members)
            }
        }
    }

    fn group_ref(&mut self, name: &QName, occurs: Occurs, content: &mut Content) -> Result<()> {
        let collection = self.collection;
        let Some(group) = collection.group(name) else {
            self.warn(format!("Unresolved group {name}"));
            return Ok(());
        };

        if self.group_stack.contains(name) {
            let id = self
                .fragments
                .reserve(FragmentKey::Group(name.clone()), CanonicalType::Container);
            if !self.fragments.is_populated(id) {
                self.fragments.mark_populated(id);
                let mut inner = Content::default();
                self.particle(&group.particle, occurs, &mut inner)?;
                self.fragments.complete(id, inner.fields, inner.type_refs);
            }
            content.push_ref(id);
            return Ok(());
        }

        self.group_stack.push(name.clone());
        let result = self.particle(&group.particle, occurs, content);
        self.group_stack.pop();
        result
    }

    fn attribute_uses(&mut self, uses: &[AttributeUse], content: &mut Content) {
        for attribute_use in uses {
            match attribute_use {
                AttributeUse::Attribute(decl) if decl.prohibited => {
                    // Masks the inherited attribute when children are expanded
                    let field = self.attribute_template(decl).with_occurs(Occurs::PROHIBITED);
                    content.push(field);
                }
                AttributeUse::Attribute(decl) => {
                    let field = self.attribute_template(decl);
                    content.push(field);
                }
                AttributeUse::GroupRef(name) => {
                    if self.attribute_group_stack.contains(name) {
                        debug!(group = %name, "skipping recursive attribute group");
                        continue;
                    }
                    let collection = self.collection;
                    let Some(group) = collection.attribute_group(name) else {
                        self.warn(format!("Unresolved attribute group {name}"));
                        continue;
                    };
                    self.attribute_group_stack.push(name.clone());
                    self.attribute_uses(&group.attributes, content);
                    self.attribute_group_stack.pop();
                }
                AttributeUse::Any => debug!("skipping xs:anyAttribute"),
            }
        }
    }

    fn attribute_template(&mut self, decl: &AttributeDecl) -> FieldTemplate {
        let collection = self.collection;
        let occurs = if decl.required {
            Occurs::ONE
        } else {
            Occurs::OPTIONAL
        };
        let resolved = if decl.is_ref {
            match collection.attribute(&decl.name) {
                Some(global) => global,
                None => {
                    self.warn(format!("Unresolved attribute reference {}", decl.name));
                    return FieldTemplate::attribute(&decl.name.local_name, decl.name.namespace())
                        .with_occurs(occurs);
                }
            }
        } else {
            decl
        };

        let field = FieldTemplate::attribute(&resolved.name.local_name, resolved.name.namespace())
            .with_occurs(occurs)
            .with_default(
                decl.default_value
                    .clone()
                    .or_else(|| resolved.default_value.clone()),
            );
        match (&resolved.type_name, &resolved.inline_type) {
            (_, Some(simple)) => {
                field.with_type(collection.inline_simple_canonical(simple), None)
            }
            (Some(type_name), None) => self.typed(field, type_name),
            (None, None) => field,
        }
    }

    fn element_template(&mut self, decl: &ElementDecl) -> Result<FieldTemplate> {
        if !decl.is_ref {
            return self.declared_element(decl);
        }
        let collection = self.collection;
        match collection.element(&decl.name) {
            Some(global) => Ok(self.declared_element(global)?.with_occurs(decl.occurs)),
            None => {
                self.warn(format!("Unresolved element reference {}", decl.name));
                Ok(
                    FieldTemplate::element(&decl.name.local_name, decl.name.namespace())
                        .with_occurs(decl.occurs),
                )
            }
        }
    }

    fn declared_element(&mut self, decl: &ElementDecl) -> Result<FieldTemplate> {
        let collection = self.collection;
        let field = FieldTemplate::element(&decl.name.local_name, decl.name.namespace())
            .with_occurs(decl.occurs)
            .with_default(decl.default_value.clone());

        match (&decl.type_name, &decl.inline_type) {
            (_, Some(InlineType::Complex(complex))) => {
                let is_global = collection
                    .element(&decl.name)
                    .is_some_and(|global| std::ptr::eq(global, decl));
                let fragment = self
                    .fragments
                    .lookup(&FragmentKey::Element(decl.name.clone()));
                match fragment {
                    Some(id) if is_global => {
                        Ok(field.with_type(CanonicalType::Container, None).with_type_ref(id))
                    }
                    _ => {
                        let content = self.complex_content(complex)?;
                        let mut field = field.with_type(CanonicalType::Container, None);
                        field.fields = content.fields;
                        field.type_refs = content.type_refs;
                        Ok(field)
                    }
                }
            }
            (_, Some(InlineType::Simple(simple))) => {
                Ok(field.with_type(collection.inline_simple_canonical(simple), None))
            }
            (Some(type_name), None) => Ok(self.typed(field, type_name)),
            (None, None) => Ok(field.with_type(CanonicalType::AnyType, None)),
        }
    }

    /// Attach a named type to a declaration
    fn typed(&mut self, field: FieldTemplate, type_name: &QName) -> FieldTemplate {
        if type_name.is_xsd_builtin() {
            let canonical = map_schema_type_to_canonical(type_name.namespace(), &type_name.local_name);
            return field.with_type(canonical, Some(type_name.clone()));
        }
        let Some(id) = self.fragments.lookup_type(type_name) else {
            self.warn(format!(
                "Unresolved type {type_name} on field {}; treated as anyType",
                field.name
            ));
            return field.with_type(CanonicalType::AnyType, None);
        };
        let canonical = self.fragments.get(id).field_type;
        let field = field.with_type(canonical, Some(type_name.clone()));
        if self.collection.complex_type(type_name).is_some() {
            field.with_type_ref(id)
        } else {
            field
        }
    }
}

/// Build an XML Schema document from its definition
pub fn create_xml_document(definition: &DocumentDefinition) -> CreateDocumentResult {
    let issues = |errors: Vec<Error>| -> Vec<DocumentIssue> {
        errors.iter().map(DocumentIssue::from).collect()
    };

    let collection = match SchemaLoader::new(&definition.files).load_all() {
        Ok(collection) => collection,
        Err(errors) => {
            warn!(name = %definition.name, errors = errors.len(), "schema analysis failed");
            return CreateDocumentResult::failed(issues(errors));
        }
    };
    let root_element_options = collection.root_element_options();

    match build_from_collection(definition, &collection) {
        Ok((document, warnings)) => {
            info!(
                name = %definition.name,
                fragments = document.fragments().len(),
                warnings = warnings.len(),
                "created XML schema document"
            );
            CreateDocumentResult::built(document, warnings)
                .with_root_element_options(root_element_options)
        }
        Err(err) => {
            warn!(name = %definition.name, %err, "document population failed");
            CreateDocumentResult::failed(vec![DocumentIssue::from(err)])
                .with_root_element_options(root_element_options)
        }
    }
}

fn build_from_collection(
    definition: &DocumentDefinition,
    collection: &SchemaCollection,
) -> Result<(Document, Vec<DocumentIssue>)> {
    if collection.global_elements().is_empty() {
        return Err(Error::NoTopLevelElement);
    }
    let root = match &definition.root_element_choice {
        Some(choice) => collection.element(&choice.qname()).ok_or_else(|| {
            Error::UnresolvedRootElement {
                namespace_uri: choice.namespace_uri.clone(),
                name: choice.name.clone(),
            }
        })?,
        None => collection.default_root().ok_or(Error::NoTopLevelElement)?,
    };

    let mut populator = XmlPopulator::new(collection, FragmentRegistry::new());
    populator.populate_named_types()?;
    let root_template = populator.root_template(root)?;
    let (fragments, population_warnings) = populator.finish();

    let mut definition = definition.clone();
    namespaces::assign_prefixes(
        &mut definition.namespace_map,
        collection.target_namespaces().iter().map(String::as_str),
    );

    let mut document = Document::new(
        DocumentKind::Xml(XmlDialect::new(root.name.clone())),
        definition,
        fragments,
        collection.type_catalog(),
    );
    document.add_root(root_template);

    let mut warnings: Vec<DocumentIssue> = collection
        .duplicates()
        .iter()
        .cloned()
        .chain(population_warnings)
        .map(DocumentIssue::new)
        .collect();
    warnings.extend(overrides::reapply_persisted(&mut document));
    Ok((document, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_occurs() {
        assert_eq!(combine(Occurs::ONE, Occurs::ONE), Occurs::ONE);
        assert_eq!(combine(Occurs::ONE, Occurs::MANY), Occurs::MANY);
        assert_eq!(combine(Occurs::OPTIONAL, Occurs::ONE), Occurs::OPTIONAL);
        assert_eq!(
            combine(Occurs::new(2, MaxOccurs::Bounded(3)), Occurs::new(1, MaxOccurs::Bounded(2))),
            Occurs::new(2, MaxOccurs::Bounded(6))
        );
    }
}
