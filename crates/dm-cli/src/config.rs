//! YAML configuration file

use anyhow::{Context, Result};
use dm_ir::{NamespaceMap, RootElementOption};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Settings shared by all commands; command-line flags take precedence
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Prefix → namespace URI, used to read `--root` and `--path` values
    pub namespaces: BTreeMap<String, String>,
    pub root_element: Option<RootElement>,
    /// Filter used when `RUST_LOG` is not set (default: warn)
    pub log_level: Option<String>,
    /// Parameter name → schema file; an empty path declares a primitive parameter
    pub parameters: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootElement {
    #[serde(default)]
    pub namespace_uri: String,
    pub name: String,
}

impl From<&RootElement> for RootElementOption {
    fn from(root: &RootElement) -> Self {
        RootElementOption::new(root.namespace_uri.as_str(), root.name.as_str())
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn namespace_map(&self) -> NamespaceMap {
        self.namespaces
            .iter()
            .map(|(prefix, uri)| (prefix.clone(), uri.clone()))
            .collect()
    }

    /// Read a `--root` value: `prefix:name` with a configured prefix, or
    /// `namespaceUri:name` split at the last colon
    pub fn root_element(&self, flag: Option<&str>) -> Option<RootElementOption> {
        let Some(flag) = flag else {
            return self.root_element.as_ref().map(RootElementOption::from);
        };
        Some(match flag.rsplit_once(':') {
            Some((namespace, name)) => {
                let uri = self
                    .namespaces
                    .get(namespace)
                    .map_or(namespace, String::as_str);
                RootElementOption::new(uri, name)
            }
            None => RootElementOption::new("", flag),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
namespaces:
  so: io.kaoto.datamapper.poc.test
root_element:
  namespace_uri: io.kaoto.datamapper.poc.test
  name: ShipOrder
log_level: debug
parameters:
  sourceParam1: ""
  account: schemas/Account.schema.json
"#;

    #[test]
    fn test_parse_config() {
        let config = Config::parse(CONFIG).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.parameters.len(), 2);
        assert_eq!(config.parameters["sourceParam1"], PathBuf::new());
        assert_eq!(
            config.namespace_map().uri_for("so"),
            Some("io.kaoto.datamapper.poc.test")
        );
        assert_eq!(
            config.root_element(None),
            Some(RootElementOption::new("io.kaoto.datamapper.poc.test", "ShipOrder"))
        );
    }

    #[test]
    fn test_root_flag_overrides_config() {
        let config = Config::parse(CONFIG).unwrap();
        assert_eq!(
            config.root_element(Some("so:Item")),
            Some(RootElementOption::new("io.kaoto.datamapper.poc.test", "Item"))
        );
        assert_eq!(
            config.root_element(Some("urn:example:party:Contract")),
            Some(RootElementOption::new("urn:example:party", "Contract"))
        );
        assert_eq!(
            config.root_element(Some("Contract")),
            Some(RootElementOption::new("", "Contract"))
        );
    }

    #[test]
    fn test_empty_and_unknown() {
        assert_eq!(Config::parse("  \n").unwrap(), Config::default());
        assert!(Config::parse("unknown: 1").is_err());
    }
}
