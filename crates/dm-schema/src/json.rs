//! JSON Schema documents
//!
//! Fields follow the XML representation of JSON used by `json-to-xml`:
//! each field is a `map`, `array`, `string`, `number`, `boolean` or `null`
//! with an optional key. Definitions under `$defs` (or `definitions`) are
//! populated once as fragments and referenced through `$ref`.

use crate::overrides;
use crate::validation::{CreateDocumentResult, DocumentIssue};
use crate::{Error, Result};
use dm_ir::field::push_unique;
use dm_ir::types::json_builtin;
use dm_ir::{
    CanonicalType, DerivationMethod, Document, DocumentDefinition, DocumentKind, FieldTemplate,
    FragmentKey, FragmentRegistry, JsonDialect, JsonKind, NamedType, Occurs, QName, TypeCatalog,
    TypeCategory, TypeId,
};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// `$ref` resolution follows at most this many hops
const MAX_REF_HOPS: usize = 32;

fn definitions(root: &Value) -> impl Iterator<Item = (&String, &Value)> {
    ["$defs", "definitions"]
        .into_iter()
        .filter_map(|key| root.get(key).and_then(Value::as_object))
        .flat_map(Map::iter)
}

fn ref_name(reference: &str) -> Option<&str> {
    reference
        .strip_prefix("#/$defs/")
        .or_else(|| reference.strip_prefix("#/definitions/"))
}

fn type_keyword(schema: &Value) -> Option<&str> {
    match schema.get("type")? {
        Value::String(keyword) => Some(keyword.as_str()),
        Value::Array(keywords) => {
            let mut names = keywords.iter().filter_map(Value::as_str);
            let first = names.clone().next();
            names.find(|name| *name != "null").or(first)
        }
        _ => None,
    }
}

struct JsonPopulator<'s> {
    root: &'s Value,
    fragments: FragmentRegistry,
    catalog: TypeCatalog,
    warnings: Vec<String>,
}

impl<'s> JsonPopulator<'s> {
    fn new(root: &'s Value) -> Self {
        Self {
            root,
            fragments: FragmentRegistry::new(),
            catalog: TypeCatalog::new(),
            warnings: Vec::new(),
        }
    }

    fn definition(&self, name: &str) -> Option<&'s Value> {
        definitions(self.root)
            .find(|(def_name, _)| def_name.as_str() == name)
            .map(|(_, schema)| schema)
    }

    /// JSON kind and canonical type of a schema, following `$ref`s
    fn kind_of(&self, schema: &'s Value) -> (JsonKind, CanonicalType) {
        let mut current = schema;
        for _ in 0..MAX_REF_HOPS {
            if let Some(keyword) = type_keyword(current) {
                let canonical = json_builtin(keyword).unwrap_or(CanonicalType::AnyType);
                let kind = match keyword {
                    "object" => JsonKind::Map,
                    "array" => JsonKind::Array,
                    "number" | "integer" => JsonKind::Number,
                    "boolean" => JsonKind::Boolean,
                    "null" => JsonKind::Null,
                    _ => JsonKind::String,
                };
                return (kind, canonical);
            }
            if current.get("properties").is_some() || current.get("allOf").is_some() {
                return (JsonKind::Map, CanonicalType::Container);
            }
            if current.get("items").is_some() {
                return (JsonKind::Array, CanonicalType::Array);
            }
            match current
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(ref_name)
                .and_then(|name| self.definition(name))
            {
                Some(target) => current = target,
                None => break,
            }
        }
        (JsonKind::String, CanonicalType::AnyType)
    }

    fn populate_definitions(&mut self) {
        let defs: Vec<(&'s String, &'s Value)> = definitions(self.root).collect();
        for &(name, schema) in &defs {
            let (kind, canonical) = self.kind_of(schema);
            let qname = QName::local(name.as_str());
            self.fragments
                .reserve(FragmentKey::Type(qname.clone()), canonical);
            let category = if matches!(kind, JsonKind::Map | JsonKind::Array) {
                TypeCategory::Complex
            } else {
                TypeCategory::Simple
            };
            let mut named = NamedType::new(qname, category, canonical);
            if let Some(base) = self.base_definition(schema) {
                named = named.derived_from(QName::local(base), DerivationMethod::Extension);
            }
            if !self.catalog.register(named) {
                self.warnings
                    .push(format!("Duplicate definition {name} ignored"));
            }
        }

        for (name, schema) in defs {
            let Some(id) = self.fragments.lookup_type(&QName::local(name.as_str())) else {
                continue;
            };
            if self.fragments.is_populated(id) {
                continue;
            }
            self.fragments.mark_populated(id);
            let mut fields = Vec::new();
            let mut type_refs = Vec::new();
            self.content(schema, &mut fields, &mut type_refs, &mut HashSet::new());
            self.fragments.complete(id, fields, type_refs);
        }
    }

    /// Definition a schema builds on: its own `$ref`, or the first `$ref`
    /// of its `allOf`
    fn base_definition(&self, schema: &'s Value) -> Option<&'s str> {
        let own = schema.get("$ref").and_then(Value::as_str);
        let from_all_of = || {
            schema
                .get("allOf")?
                .as_array()?
                .iter()
                .find_map(|sub| sub.get("$ref").and_then(Value::as_str))
        };
        own.or_else(from_all_of).and_then(ref_name)
    }

    fn fragment_for(&self, reference: &str) -> Option<(TypeId, &'s str)> {
        let name = ref_name(reference)?;
        let id = self.fragments.lookup_type(&QName::local(name))?;
        let (def_name, _) = definitions(self.root).find(|(def_name, _)| def_name.as_str() == name)?;
        Some((id, def_name.as_str()))
    }

    fn template(&mut self, schema: &'s Value, key: Option<&str>, occurs: Occurs) -> FieldTemplate {
        if let Some(alternatives) = schema
            .get("oneOf")
            .or_else(|| schema.get("anyOf"))
            .and_then(Value::as_array)
        {
            let mut choice = FieldTemplate::choice().with_occurs(occurs);
            // Alternatives share the property key; their position tells them apart
            for (index, alternative) in alternatives.iter().enumerate() {
                let member = self
                    .template(alternative, key, Occurs::ONE)
                    .with_member_index(index);
                choice.fields.push(Arc::new(member));
            }
            return choice;
        }

        if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
            let Some((id, name)) = self.fragment_for(reference) else {
                self.warnings
                    .push(format!("Unresolved reference {reference}; treated as any value"));
                return FieldTemplate::json(JsonKind::String, key).with_occurs(occurs);
            };
            let (kind, canonical) = self.kind_of(schema);
            let field = FieldTemplate::json(kind, key)
                .with_type(canonical, Some(QName::local(name)))
                .with_occurs(occurs);
            return if matches!(kind, JsonKind::Map | JsonKind::Array) {
                field.with_type_ref(id)
            } else {
                field
            };
        }

        let (kind, canonical) = self.kind_of(schema);
        let mut field = FieldTemplate::json(kind, key)
            .with_type(canonical, None)
            .with_occurs(occurs)
            .with_default(schema.get("default").map(Value::to_string));
        if matches!(kind, JsonKind::Map | JsonKind::Array) {
            let mut fields = Vec::new();
            let mut type_refs = Vec::new();
            self.content(schema, &mut fields, &mut type_refs, &mut HashSet::new());
            field.fields = fields;
            field.type_refs = type_refs;
        }
        field
    }

    fn content(
        &mut self,
        schema: &'s Value,
        fields: &mut Vec<Arc<FieldTemplate>>,
        type_refs: &mut Vec<TypeId>,
        merging: &mut HashSet<*const Value>,
    ) {
        if !merging.insert(std::ptr::from_ref(schema)) {
            return;
        }

        if let Some(all_of) = schema.get("allOf").and_then(Value::as_array) {
            for part in all_of {
                match part.get("$ref").and_then(Value::as_str) {
                    Some(reference) => match self.fragment_for(reference) {
                        Some((id, _)) if !type_refs.contains(&id) => type_refs.push(id),
                        Some(_) => {}
                        None => self
                            .warnings
                            .push(format!("Unresolved reference {reference} in allOf")),
                    },
                    None => self.content(part, fields, type_refs, merging),
                }
            }
        }

        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            let required: HashSet<&str> = schema
                .get("required")
                .and_then(Value::as_array)
                .map(|names| names.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            for (key, property) in properties {
                let occurs = if required.contains(key.as_str()) {
                    Occurs::ONE
                } else {
                    Occurs::OPTIONAL
                };
                let field = self.template(property, Some(key.as_str()), occurs);
                push_unique(fields, field);
            }
        }

        match schema.get("items") {
            Some(Value::Array(tuple)) => {
                for item in tuple {
                    let field = self.template(item, None, Occurs::OPTIONAL);
                    push_unique(fields, field);
                }
            }
            Some(items) if items.is_object() => {
                let field = self.template(items, None, Occurs::MANY);
                push_unique(fields, field);
            }
            _ => {}
        }
    }
}

/// Parse the schema text of a JSON definition
fn read_schema(definition: &DocumentDefinition) -> Result<(String, Value)> {
    let Some((file_path, text)) = definition.files.iter().next() else {
        return Err(Error::json(&definition.name, "definition has no schema file"));
    };
    let value = serde_json::from_str(text).map_err(|err| Error::json(file_path, err.to_string()))?;
    Ok((file_path.clone(), value))
}

/// Build a JSON Schema document from its definition
pub fn create_json_document(definition: &DocumentDefinition) -> CreateDocumentResult {
    let (file_path, schema) = match read_schema(definition) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(name = %definition.name, %err, "JSON schema could not be read");
            return CreateDocumentResult::failed(vec![DocumentIssue::from(err)]);
        }
    };

    let mut populator = JsonPopulator::new(&schema);
    populator.populate_definitions();
    let root = populator.template(&schema, None, Occurs::ONE);
    let JsonPopulator {
        fragments,
        catalog,
        warnings,
        ..
    } = populator;

    let mut document = Document::new(
        DocumentKind::Json(JsonDialect),
        definition.clone(),
        fragments,
        catalog,
    );
    document.add_root(root);

    let mut warnings: Vec<DocumentIssue> = warnings
        .into_iter()
        .map(|message| DocumentIssue::in_file(message, file_path.as_str()))
        .collect();
    warnings.extend(overrides::reapply_persisted(&mut document));
    info!(
        name = %definition.name,
        fragments = document.fragments().len(),
        warnings = warnings.len(),
        "created JSON schema document"
    );
    CreateDocumentResult::built(document, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_keyword_prefers_non_null() {
        assert_eq!(type_keyword(&json!({"type": ["null", "string"]})), Some("string"));
        assert_eq!(type_keyword(&json!({"type": ["null"]})), Some("null"));
        assert_eq!(type_keyword(&json!({})), None);
    }

    #[test]
    fn test_kind_follows_refs() {
        let schema = json!({
            "$defs": {
                "Id": {"type": "integer"},
                "Alias": {"$ref": "#/$defs/Id"},
                "Broken": {"$ref": "#/$defs/Missing"}
            }
        });
        let populator = JsonPopulator::new(&schema);
        assert_eq!(
            populator.kind_of(&schema["$defs"]["Alias"]),
            (JsonKind::Number, CanonicalType::Integer)
        );
        assert_eq!(
            populator.kind_of(&schema["$defs"]["Broken"]),
            (JsonKind::String, CanonicalType::AnyType)
        );
    }
}
