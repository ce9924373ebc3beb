//! Named type fragment registry
//!
//! Each named type (and each anonymous type that can be reached by name,
//! such as the type of a global element) is populated exactly once into a
//! [`TypeFragment`]. Fields refer to fragments by [`TypeId`], so a type that
//! references itself is stored once and expanded only on demand.
#![allow(clippy::must_use_candidate)] // Registry lookups are clear at call sites.

use crate::field::FieldTemplate;
use crate::names::QName;
use crate::types::CanonicalType;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Handle of a fragment in a [`FragmentRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(usize);

impl TypeId {
    /// Position in the registry
    pub fn index(self) -> usize {
        self.0
    }
}

/// What a fragment was registered for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FragmentKey {
    /// A named simple or complex type
    Type(QName),
    /// The anonymous type of a global element
    Element(QName),
    /// A named model group reached recursively
    Group(QName),
}

impl fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentKey::Type(name) => write!(f, "type {name}"),
            FragmentKey::Element(name) => write!(f, "element {name}"),
            FragmentKey::Group(name) => write!(f, "group {name}"),
        }
    }
}

/// Reusable body of one named type
#[derive(Debug, Clone)]
pub struct TypeFragment {
    pub key: FragmentKey,
    pub field_type: CanonicalType,
    pub fields: Vec<Arc<FieldTemplate>>,
    /// Further fragments whose fields precede this fragment's own
    pub type_refs: Vec<TypeId>,
    populated: bool,
}

impl TypeFragment {
    /// Whether the body has been filled in
    pub fn is_populated(&self) -> bool {
        self.populated
    }

    /// Declared name, when the fragment stands for a named type
    pub fn type_name(&self) -> Option<&QName> {
        match &self.key {
            FragmentKey::Type(name) => Some(name),
            FragmentKey::Element(_) | FragmentKey::Group(_) => None,
        }
    }
}

/// Arena of fragments with a key index
#[derive(Debug, Clone, Default)]
pub struct FragmentRegistry {
    fragments: Vec<TypeFragment>,
    index: HashMap<FragmentKey, TypeId>,
}

impl FragmentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an empty fragment for a key, or return the existing one
    pub fn reserve(&mut self, key: FragmentKey, field_type: CanonicalType) -> TypeId {
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = TypeId(self.fragments.len());
        self.fragments.push(TypeFragment {
            key: key.clone(),
            field_type,
            fields: Vec::new(),
            type_refs: Vec::new(),
            populated: false,
        });
        self.index.insert(key, id);
        id
    }

    /// Fill in a reserved fragment's body
    pub fn complete(
        &mut self,
        id: TypeId,
        fields: Vec<Arc<FieldTemplate>>,
        type_refs: Vec<TypeId>,
    ) {
        let fragment = &mut self.fragments[id.0];
        fragment.fields = fields;
        fragment.type_refs = type_refs;
        fragment.populated = true;
    }

    /// Mark a fragment populated before its body is known, so that a
    /// recursive reference back to it does not populate it again
    pub fn mark_populated(&mut self, id: TypeId) {
        self.fragments[id.0].populated = true;
    }

    /// Look up a fragment by key
    pub fn lookup(&self, key: &FragmentKey) -> Option<TypeId> {
        self.index.get(key).copied()
    }

    /// Look up a named type's fragment
    pub fn lookup_type(&self, name: &QName) -> Option<TypeId> {
        self.lookup(&FragmentKey::Type(name.clone()))
    }

    /// Fragment for a handle
    pub fn get(&self, id: TypeId) -> &TypeFragment {
        &self.fragments[id.0]
    }

    /// Whether a fragment's body has been filled in
    pub fn is_populated(&self, id: TypeId) -> bool {
        self.fragments[id.0].populated
    }

    /// Iterate fragments with their handles in registration order
    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TypeFragment)> {
        self.fragments
            .iter()
            .enumerate()
            .map(|(idx, fragment)| (TypeId(idx), fragment))
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_is_idempotent() {
        let mut registry = FragmentRegistry::new();
        let key = FragmentKey::Type(QName::local("Node"));
        let first = registry.reserve(key.clone(), CanonicalType::Container);
        let second = registry.reserve(key.clone(), CanonicalType::String);
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(first).field_type, CanonicalType::Container);
        assert!(!registry.is_populated(first));
    }

    #[test]
    fn test_complete_marks_populated() {
        let mut registry = FragmentRegistry::new();
        let id = registry.reserve(FragmentKey::Type(QName::local("Node")), CanonicalType::Container);
        registry.complete(
            id,
            vec![Arc::new(FieldTemplate::element("next", None).with_type_ref(id))],
            Vec::new(),
        );
        assert!(registry.is_populated(id));
        assert_eq!(registry.get(id).fields[0].type_refs, vec![id]);
        assert_eq!(registry.lookup_type(&QName::local("Node")), Some(id));
    }
}
