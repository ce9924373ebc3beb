//! Schema file set analysis and loading
//!
//! Loading happens in two passes. The first reads only the `include` and
//! `import` references of every file and orders the files so that each is
//! loaded after everything it depends on; missing files and cycles are
//! reported for all files at once. The second pass parses the full schema
//! model of each file in that order.

use crate::registry::SchemaCollection;
use crate::xsd::{self, SchemaHeader};
use crate::{Error, Result};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

/// How one schema file refers to another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Include,
    Import,
}

/// Outcome of dependency analysis
#[derive(Debug, Clone)]
pub struct LoadPlan {
    /// Files in load order, dependencies first
    pub order: Vec<String>,
    /// The file no other file refers to
    pub primary: String,
    /// Namespace adopted by chameleon includes
    pub chameleon: HashMap<String, String>,
}

/// Loads a set of schema files given as file name → contents
pub struct SchemaLoader<'a> {
    files: &'a BTreeMap<String, String>,
}

impl<'a> SchemaLoader<'a> {
    /// Create a loader over a file set
    pub fn new(files: &'a BTreeMap<String, String>) -> Self {
        Self { files }
    }

    /// Match a `schemaLocation` against the provided file names, first
    /// exactly and then by the last path component
    pub fn resolve_location(&self, location: &str) -> Option<&'a str> {
        if let Some((name, _)) = self.files.get_key_value(location) {
            return Some(name.as_str());
        }
        let wanted = file_name(location);
        self.files
            .keys()
            .find(|name| file_name(name) == wanted)
            .map(String::as_str)
    }

    /// Build the dependency graph and the load order.
    ///
    /// Every structural problem is collected; the result is an error when
    /// at least one was found.
    pub fn analyze(&self) -> std::result::Result<LoadPlan, Vec<Error>> {
        let mut errors = Vec::new();
        let mut headers: BTreeMap<&str, SchemaHeader> = BTreeMap::new();
        for (name, text) in self.files {
            match xsd::parse_header(name, text) {
                Ok(header) => {
                    headers.insert(name.as_str(), header);
                }
                Err(err) => errors.push(err),
            }
        }

        let mut graph: DiGraph<&str, DependencyKind> = DiGraph::new();
        let nodes: HashMap<&str, NodeIndex> = headers
            .keys()
            .map(|&name| (name, graph.add_node(name)))
            .collect();
        let mut referenced: HashSet<&str> = HashSet::new();

        for (&name, header) in &headers {
            let references = header
                .includes
                .iter()
                .map(|location| (location.as_str(), DependencyKind::Include))
                .chain(header.imports.iter().filter_map(|import| {
                    import
                        .location
                        .as_deref()
                        .map(|location| (location, DependencyKind::Import))
                }));
            for (location, kind) in references {
                let Some(target) = self.resolve_location(location) else {
                    errors.push(Error::unresolved_dependency(name, location));
                    continue;
                };
                referenced.insert(target);
                // A file that failed to parse has already been reported
                if let (Some(&from), Some(&to)) = (nodes.get(target), nodes.get(name)) {
                    graph.add_edge(from, to, kind);
                }
            }
        }

        let order = match toposort(&graph, None) {
            Ok(order) => order,
            Err(_) => {
                for component in tarjan_scc(&graph) {
                    let is_cycle = component.len() > 1
                        || graph.contains_edge(component[0], component[0]);
                    if is_cycle {
                        let mut files: Vec<String> =
                            component.iter().map(|&idx| graph[idx].to_string()).collect();
                        files.sort();
                        errors.push(Error::DependencyCycle { files });
                    }
                }
                Vec::new()
            }
        };

        if !errors.is_empty() {
            return Err(errors);
        }

        let order: Vec<String> = order.into_iter().map(|idx| graph[idx].to_string()).collect();
        let primary = headers
            .keys()
            .find(|name| !referenced.contains(*name))
            .or_else(|| headers.keys().next())
            .map(|name| name.to_string())
            .unwrap_or_default();
        let chameleon = self.chameleon_namespaces(&headers);
        debug!(?order, primary, "schema load order");

        Ok(LoadPlan {
            order,
            primary,
            chameleon,
        })
    }

    /// Files without a target namespace that are included by a file with
    /// one take the includer's namespace
    fn chameleon_namespaces(&self, headers: &BTreeMap<&str, SchemaHeader>) -> HashMap<String, String> {
        let mut includers: HashMap<&str, &str> = HashMap::new();
        for (&name, header) in headers {
            for location in &header.includes {
                if let Some(target) = self.resolve_location(location) {
                    includers.entry(target).or_insert(name);
                }
            }
        }

        let mut chameleon = HashMap::new();
        for (&name, header) in headers {
            if header.target_namespace.is_some() {
                continue;
            }
            let mut visited = HashSet::new();
            let mut current = name;
            while let Some(&includer) = includers.get(current) {
                if !visited.insert(includer) {
                    break;
                }
                if let Some(namespace) = headers
                    .get(includer)
                    .and_then(|includer_header| includer_header.target_namespace.as_ref())
                {
                    chameleon.insert(name.to_string(), namespace.clone());
                    break;
                }
                current = includer;
            }
        }
        chameleon
    }

    /// Parse every file in load order into one collection
    pub fn load(&self, plan: &LoadPlan) -> std::result::Result<SchemaCollection, Vec<Error>> {
        let mut collection = SchemaCollection::new(plan.primary.clone());
        let mut errors = Vec::new();
        for name in &plan.order {
            let Some(text) = self.files.get(name) else {
                continue;
            };
            let chameleon = plan.chameleon.get(name).map(String::as_str);
            match xsd::parse_schema(name, text, chameleon) {
                Ok(file) => collection.add_file(file),
                Err(err) => errors.push(err),
            }
        }
        if errors.is_empty() {
            info!(
                files = plan.order.len(),
                elements = collection.global_elements().len(),
                "loaded schema collection"
            );
            Ok(collection)
        } else {
            Err(errors)
        }
    }

    /// Analyze and load in one step
    pub fn load_all(&self) -> std::result::Result<SchemaCollection, Vec<Error>> {
        let plan = self.analyze()?;
        self.load(&plan)
    }
}

/// Load a file set, reporting only the first problem
pub fn load_collection(files: &BTreeMap<String, String>) -> Result<SchemaCollection> {
    SchemaLoader::new(files)
        .load_all()
        .map_err(|errors| {
            errors
                .into_iter()
                .next()
                .unwrap_or_else(|| Error::DependencyCycle { files: Vec::new() })
        })
}

fn file_name(location: &str) -> &str {
    location.rsplit(['/', '\\']).next().unwrap_or(location)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(body: &str) -> String {
        format!(r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">{body}</xs:schema>"#)
    }

    #[test]
    fn test_load_order_puts_dependencies_first() {
        let files: BTreeMap<String, String> = [
            ("a.xsd", schema(r#"<xs:include schemaLocation="sub/b.xsd"/>"#)),
            ("b.xsd", schema(r#"<xs:include schemaLocation="c.xsd"/>"#)),
            ("c.xsd", schema("")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let plan = SchemaLoader::new(&files).analyze().unwrap();
        assert_eq!(plan.order, vec!["c.xsd", "b.xsd", "a.xsd"]);
        assert_eq!(plan.primary, "a.xsd");
    }

    #[test]
    fn test_missing_and_cyclic_dependencies_are_all_reported() {
        let files: BTreeMap<String, String> = [
            ("a.xsd", schema(r#"<xs:include schemaLocation="b.xsd"/>"#)),
            ("b.xsd", schema(r#"<xs:include schemaLocation="a.xsd"/>"#)),
            (
                "c.xsd",
                schema(r#"<xs:import namespace="urn:x" schemaLocation="missing.xsd"/>"#),
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let errors = SchemaLoader::new(&files).analyze().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|err| matches!(
            err,
            Error::UnresolvedDependency { file_path, location }
                if file_path == "c.xsd" && location == "missing.xsd"
        )));
        assert!(errors.iter().any(|err| matches!(
            err,
            Error::DependencyCycle { files } if files == &vec!["a.xsd".to_string(), "b.xsd".to_string()]
        )));
    }

    #[test]
    fn test_import_without_location_is_external() {
        let files: BTreeMap<String, String> = [(
            "a.xsd".to_string(),
            schema(r#"<xs:import namespace="urn:external"/>"#),
        )]
        .into_iter()
        .collect();
        assert!(SchemaLoader::new(&files).analyze().is_ok());
    }
}
