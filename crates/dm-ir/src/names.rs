//! Qualified names and namespace prefix maps
#![allow(clippy::must_use_candidate)] // Small accessors read clearly without #[must_use].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// XML Schema namespace, home of the built-in types.
pub const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

/// Namespace of the XML representation of JSON used by `json-to-xml`/`xml-to-json`.
pub const FN_NAMESPACE: &str = "http://www.w3.org/2005/xpath-functions";

/// A namespace-qualified name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QName {
    /// Namespace URI, `None` for names in no namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_uri: Option<String>,

    /// Local part of the name
    pub local_name: String,
}

impl QName {
    /// Create a name, treating an empty namespace URI as no namespace
    pub fn new(namespace_uri: Option<&str>, local_name: impl Into<String>) -> Self {
        Self {
            namespace_uri: namespace_uri
                .filter(|ns| !ns.is_empty())
                .map(str::to_string),
            local_name: local_name.into(),
        }
    }

    /// Create a name in no namespace
    pub fn local(local_name: impl Into<String>) -> Self {
        Self {
            namespace_uri: None,
            local_name: local_name.into(),
        }
    }

    /// Create a built-in XML Schema type name
    pub fn xsd(local_name: impl Into<String>) -> Self {
        Self::new(Some(XSD_NAMESPACE), local_name)
    }

    /// Namespace as a string slice
    pub fn namespace(&self) -> Option<&str> {
        self.namespace_uri.as_deref()
    }

    /// Whether this names a built-in XML Schema type
    pub fn is_xsd_builtin(&self) -> bool {
        self.namespace() == Some(XSD_NAMESPACE)
    }
}

impl fmt::Display for QName {
    /// Clark notation: `{uri}local`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace_uri {
            Some(ns) => write!(f, "{{{ns}}}{}", self.local_name),
            None => f.write_str(&self.local_name),
        }
    }
}

/// Prefix to namespace URI map used to render and read prefixed names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceMap(BTreeMap<String, String>);

impl NamespaceMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Bind a prefix, returning the URI it was previously bound to
    pub fn insert(&mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Option<String> {
        self.0.insert(prefix.into(), uri.into())
    }

    /// Namespace URI bound to a prefix
    pub fn uri_for(&self, prefix: &str) -> Option<&str> {
        self.0.get(prefix).map(String::as_str)
    }

    /// First prefix (in prefix order) bound to a namespace URI
    pub fn prefix_for(&self, uri: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(_, bound)| bound.as_str() == uri)
            .map(|(prefix, _)| prefix.as_str())
    }

    /// Whether any prefix is bound to the URI
    pub fn contains_uri(&self, uri: &str) -> bool {
        self.prefix_for(uri).is_some()
    }

    /// Whether the prefix is bound
    pub fn contains_prefix(&self, prefix: &str) -> bool {
        self.0.contains_key(prefix)
    }

    /// Iterate `(prefix, uri)` pairs in prefix order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(p, u)| (p.as_str(), u.as_str()))
    }

    /// Number of bound prefixes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no prefix is bound
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render a name as `prefix:local`, or the bare local name when the
    /// namespace has no registered prefix
    pub fn prefixed(&self, name: &QName) -> String {
        match name.namespace().and_then(|ns| self.prefix_for(ns)) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}:{}", name.local_name),
            _ => name.local_name.clone(),
        }
    }

    /// Read a `prefix:local` name; a bare name is in no namespace.
    /// Returns `None` for an unbound prefix.
    pub fn resolve(&self, prefixed: &str) -> Option<QName> {
        match prefixed.split_once(':') {
            Some((prefix, local)) => self
                .uri_for(prefix)
                .map(|uri| QName::new(Some(uri), local)),
            None => Some(QName::local(prefixed)),
        }
    }

    /// Prefix for a namespace, binding a fresh `nsN` prefix when the namespace
    /// is not registered yet. Existing bindings are never changed.
    pub fn assign_prefix(&mut self, uri: &str) -> String {
        if let Some(prefix) = self.prefix_for(uri) {
            return prefix.to_string();
        }
        let mut index = self.0.len();
        loop {
            let candidate = format!("ns{index}");
            if !self.0.contains_key(&candidate) {
                self.0.insert(candidate.clone(), uri.to_string());
                return candidate;
            }
            index += 1;
        }
    }
}

impl FromIterator<(String, String)> for NamespaceMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for NamespaceMap {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(p, u)| (p.to_string(), u.to_string()))
                .collect(),
        )
    }
}
