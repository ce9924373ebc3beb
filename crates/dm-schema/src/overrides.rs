//! Field type overrides and choice selections
//!
//! Every mutation follows the same steps: compute the field's schema path,
//! change the in-memory field, upsert or remove the persisted record keyed
//! by that path, and drop every persisted record below the path. The
//! mutated field's materialized subtree is discarded so it is rebuilt
//! from the new shape.

use crate::loader::load_collection;
use crate::namespaces;
use crate::validation::DocumentIssue;
use crate::xml::XmlPopulator;
use crate::Result;
use dm_ir::path::{self, navigate_to_field};
use dm_ir::{
    CanonicalType, ChoiceSelection, Document, DocumentKind, FieldId, FieldTypeOverride,
    NamespaceMap, QName, TypeCandidate, TypeCandidates, TypeId, TypeOverrideVariant,
    determine_override_variant,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Conventional prefix for built-in XML Schema types without a binding
const XSD_DISPLAY_PREFIX: &str = "xs";

fn ensure_supported(document: &Document, operation: &str) -> Result<()> {
    let dialect = document.dialect();
    if dialect.supports_type_override() {
        Ok(())
    } else {
        Err(dm_ir::Error::unsupported_document(dialect.name(), operation).into())
    }
}

fn display_name(name: &QName, namespaces: &NamespaceMap, is_builtin: bool) -> String {
    match name.namespace() {
        Some(uri) if namespaces.prefix_for(uri).is_none() => {
            if is_builtin {
                format!("{XSD_DISPLAY_PREFIX}:{}", name.local_name)
            } else {
                name.to_string()
            }
        }
        _ => namespaces.prefixed(name),
    }
}

fn insert_candidate(candidates: &mut TypeCandidates, candidate: TypeCandidate) {
    candidates
        .entry(candidate.display_name.clone())
        .or_insert(candidate);
}

/// Fragments a field overridden to `candidate` draws its children from
fn candidate_type_refs(document: &Document, candidate: &TypeCandidate) -> Result<Vec<TypeId>> {
    if candidate.is_builtin {
        return Ok(Vec::new());
    }
    let Some(id) = document.fragments().lookup_type(&candidate.name) else {
        return Err(dm_ir::Error::invalid_override_target(
            candidate.name.to_string(),
            "type is not part of the document's schema set",
        )
        .into());
    };
    if matches!(
        candidate.canonical,
        CanonicalType::Container | CanonicalType::Array
    ) {
        Ok(vec![id])
    } else {
        Ok(Vec::new())
    }
}

/// Override a field's type and record the override
pub fn apply_field_type_override(
    document: &mut Document,
    field: FieldId,
    candidate: &TypeCandidate,
    namespaces: &NamespaceMap,
    variant: TypeOverrideVariant,
) -> Result<()> {
    ensure_supported(document, "field type override")?;
    let schema_path = path::build(document, field, namespaces);
    if document.field(field).is_compositor() {
        return Err(dm_ir::Error::invalid_override_target(
            schema_path,
            "compositor fields carry no type",
        )
        .into());
    }

    let type_refs = candidate_type_refs(document, candidate)?;
    let original_type = document.field(field).original_type_name().cloned();
    document.override_field_type(
        field,
        Some(candidate.name.clone()),
        candidate.canonical,
        type_refs,
        variant,
    );

    let definition = document.definition_mut();
    definition.upsert_field_type_override(FieldTypeOverride {
        schema_path: schema_path.clone(),
        type_name: candidate.name.clone(),
        original_type,
        variant,
    });
    definition.invalidate_descendants(&schema_path);
    info!(schema_path, candidate = %candidate.display_name, ?variant, "applied field type override");
    Ok(())
}

/// Return a field to its declared type and drop the override record
pub fn revert_field_type_override(
    document: &mut Document,
    field: FieldId,
    namespaces: &NamespaceMap,
) -> Result<()> {
    ensure_supported(document, "field type override")?;
    let schema_path = path::build(document, field, namespaces);
    document.restore_field_type(field);

    let definition = document.definition_mut();
    definition.remove_field_type_override(&schema_path);
    definition.invalidate_descendants(&schema_path);
    info!(schema_path, "reverted field type override");
    Ok(())
}

/// Select a member of a choice field and record the selection
pub fn apply_choice_selection(
    document: &mut Document,
    choice: FieldId,
    member_index: usize,
    namespaces: &NamespaceMap,
) -> Result<()> {
    ensure_supported(document, "choice selection")?;
    let schema_path = path::build(document, choice, namespaces);
    if !document.field(choice).is_choice() {
        return Err(dm_ir::Error::invalid_override_target(schema_path, "not a choice field").into());
    }
    let members = document.children(choice).len();
    if member_index >= members {
        return Err(dm_ir::Error::invalid_override_target(
            schema_path,
            format!("member index {member_index} out of range for {members} members"),
        )
        .into());
    }

    let definition = document.definition_mut();
    definition.upsert_choice_selection(ChoiceSelection {
        schema_path: schema_path.clone(),
        selected_member_index: member_index,
    });
    definition.invalidate_descendants(&schema_path);
    document.reset_children(choice);
    info!(schema_path, member_index, "applied choice selection");
    Ok(())
}

/// Clear the selection of a choice field
pub fn revert_choice_selection(
    document: &mut Document,
    choice: FieldId,
    namespaces: &NamespaceMap,
) -> Result<()> {
    ensure_supported(document, "choice selection")?;
    let schema_path = path::build(document, choice, namespaces);
    if !document.field(choice).is_choice() {
        return Err(dm_ir::Error::invalid_override_target(schema_path, "not a choice field").into());
    }

    let definition = document.definition_mut();
    definition.remove_choice_selection(&schema_path);
    definition.invalidate_descendants(&schema_path);
    document.reset_children(choice);
    info!(schema_path, "reverted choice selection");
    Ok(())
}

/// Every type a field of the document may be forced to: the dialect's
/// built-in types and every named type of the schema set
pub fn get_all_override_candidates(
    document: &Document,
    namespaces: &NamespaceMap,
) -> Result<TypeCandidates> {
    ensure_supported(document, "override candidates")?;
    let dialect = document.dialect();
    let mut candidates = TypeCandidates::new();
    for &(local, canonical) in dialect.builtin_types() {
        let name = QName::new(dialect.builtin_namespace(), local);
        insert_candidate(
            &mut candidates,
            TypeCandidate {
                display_name: display_name(&name, namespaces, true),
                name,
                canonical,
                is_builtin: true,
            },
        );
    }
    for named in document.types().iter() {
        insert_candidate(
            &mut candidates,
            TypeCandidate {
                display_name: display_name(&named.name, namespaces, false),
                name: named.name.clone(),
                canonical: named.canonical,
                is_builtin: false,
            },
        );
    }
    Ok(candidates)
}

/// Types a field can be overridden to without leaving its declared type:
/// anything for an untyped field, otherwise the extensions and
/// restrictions of its declared structured type
pub fn get_safe_override_candidates(
    document: &Document,
    field: FieldId,
    namespaces: &NamespaceMap,
) -> Result<TypeCandidates> {
    ensure_supported(document, "override candidates")?;
    let target = document.field(field);
    let original = target.original_type();
    let original_name = target.original_type_name();

    if original == CanonicalType::AnyType {
        return get_all_override_candidates(document, namespaces);
    }
    let Some(base) = original_name else {
        return Ok(TypeCandidates::new());
    };

    let catalog = document.types();
    let mut candidates = TypeCandidates::new();
    for named in catalog.get_extensions_and_restrictions(base) {
        let candidate = TypeCandidate {
            display_name: display_name(&named.name, namespaces, false),
            name: named.name.clone(),
            canonical: named.canonical,
            is_builtin: false,
        };
        if determine_override_variant(original, original_name, &candidate, catalog)
            == TypeOverrideVariant::Safe
        {
            insert_candidate(&mut candidates, candidate);
        }
    }
    Ok(candidates)
}

/// Candidate for a type name, if the document knows the type
pub fn find_candidate(
    document: &Document,
    name: &QName,
    namespaces: &NamespaceMap,
) -> Result<Option<TypeCandidate>> {
    Ok(get_all_override_candidates(document, namespaces)?
        .into_values()
        .find(|candidate| &candidate.name == name))
}

/// Apply the document's persisted overrides to the freshly built tree,
/// shallowest first. Records that no longer resolve are reported and kept.
pub fn reapply_persisted(document: &mut Document) -> Vec<DocumentIssue> {
    let mut warnings = Vec::new();
    let namespaces = document.namespace_map().clone();
    let mut records = document.definition().field_type_overrides.clone();
    if records.is_empty() && document.definition().choice_selections.is_empty() {
        return warnings;
    }
    if !document.dialect().supports_type_override() {
        warnings.push(DocumentIssue::new(format!(
            "Persisted overrides ignored on {} document",
            document.dialect().name()
        )));
        return warnings;
    }

    records.sort_by_key(|record| path::depth(&record.schema_path));
    for record in records {
        let Some(field) = navigate_to_field(document, &record.schema_path, &namespaces) else {
            warn!(schema_path = %record.schema_path, "persisted override no longer resolves");
            warnings.push(DocumentIssue::new(format!(
                "Field type override for {} does not match any field",
                record.schema_path
            )));
            continue;
        };
        let candidate = match find_candidate(document, &record.type_name, &namespaces) {
            Ok(Some(candidate)) => candidate,
            _ => {
                warnings.push(DocumentIssue::new(format!(
                    "Field type override for {} names unknown type {}",
                    record.schema_path, record.type_name
                )));
                continue;
            }
        };
        match candidate_type_refs(document, &candidate) {
            Ok(type_refs) => document.override_field_type(
                field,
                Some(candidate.name),
                candidate.canonical,
                type_refs,
                record.variant,
            ),
            Err(err) => warnings.push(DocumentIssue::new(err.to_string())),
        }
    }

    let selections = document.definition().choice_selections.clone();
    for selection in selections {
        if navigate_to_field(document, &selection.schema_path, &namespaces).is_none() {
            warnings.push(DocumentIssue::new(format!(
                "Choice selection for {} does not match any field",
                selection.schema_path
            )));
        }
    }
    debug!(warnings = warnings.len(), "re-applied persisted overrides");
    warnings
}

/// Merge supplementary schema files into an XML document's schema set so
/// their types become override candidates.
///
/// New target namespaces get fresh prefixes in the document's namespace
/// map; existing prefixes are kept. Returns the prefixes added.
pub fn add_schema_files_for_type_override(
    document: &mut Document,
    files: BTreeMap<String, String>,
) -> Result<Vec<String>> {
    if !matches!(document.kind(), DocumentKind::Xml(_)) {
        return Err(dm_ir::Error::unsupported_document(
            document.dialect().name(),
            "adding schema files",
        )
        .into());
    }

    let mut merged = document.definition().files.clone();
    merged.extend(files.iter().map(|(name, text)| (name.clone(), text.clone())));
    let collection = load_collection(&merged)?;

    let mut populator = XmlPopulator::new(&collection, std::mem::take(document.fragments_mut()));
    let populated = populator.populate_named_types();
    let (fragments, population_warnings) = populator.finish();
    *document.fragments_mut() = fragments;
    populated?;
    for message in population_warnings {
        debug!(%message, "supplementary schema warning");
    }

    collection.extend_catalog(document.types_mut());
    let definition = document.definition_mut();
    definition.files = merged;
    let added = namespaces::extend_from_files(&mut definition.namespace_map, &files);
    info!(files = files.len(), prefixes = ?added, "added schema files for type override");
    Ok(added)
}
