//! Namespace prefix assignment for schema sets

use crate::Result;
use crate::xsd;
use dm_ir::NamespaceMap;
use std::collections::BTreeMap;

/// Bind a fresh prefix to every namespace not yet in `map`. Existing
/// bindings are never changed. Returns the prefixes added.
pub fn assign_prefixes<'a>(
    map: &mut NamespaceMap,
    namespaces: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let mut added = Vec::new();
    for namespace in namespaces {
        if namespace.is_empty() || map.contains_uri(namespace) {
            continue;
        }
        let prefix = map.assign_prefix(namespace);
        tracing::debug!(prefix, namespace, "bound namespace prefix");
        added.push(prefix);
    }
    added
}

/// Target namespace declared by a schema file
pub fn extract_target_namespace(file_path: &str, text: &str) -> Result<Option<String>> {
    Ok(xsd::parse_header(file_path, text)?.target_namespace)
}

/// Bind prefixes for the target namespaces of schema files.
///
/// A file whose namespace cannot be read is logged and skipped.
pub fn extend_from_files(map: &mut NamespaceMap, files: &BTreeMap<String, String>) -> Vec<String> {
    let mut namespaces = Vec::new();
    for (file_path, text) in files {
        match extract_target_namespace(file_path, text) {
            Ok(Some(namespace)) => namespaces.push(namespace),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(file_path, %err, "could not extract target namespace");
            }
        }
    }
    assign_prefixes(map, namespaces.iter().map(String::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_prefixes_preserves_existing() {
        let mut map: NamespaceMap = [("ns0", "urn:a"), ("ns1", "urn:b")].into_iter().collect();
        let added = assign_prefixes(&mut map, ["urn:b", "urn:c", ""]);
        assert_eq!(added, vec!["ns2".to_string()]);
        assert_eq!(map.uri_for("ns0"), Some("urn:a"));
        assert_eq!(map.uri_for("ns2"), Some("urn:c"));
    }

    #[test]
    fn test_extend_from_files_skips_unreadable() {
        let files: BTreeMap<String, String> = [
            (
                "a.xsd".to_string(),
                r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" targetNamespace="urn:a"/>"#
                    .to_string(),
            ),
            ("broken.xsd".to_string(), "<xs:schema".to_string()),
        ]
        .into_iter()
        .collect();
        let mut map = NamespaceMap::new();
        assert_eq!(extend_from_files(&mut map, &files), vec!["ns0".to_string()]);
        assert_eq!(map.prefix_for("urn:a"), Some("ns0"));
    }
}
