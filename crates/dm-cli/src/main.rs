//! # dm-cli
//!
//! Command-line front end for the data mapper.
//!
//! Builds documents from schema files, prints field trees and override
//! candidates, extracts mapping links from XSLT stylesheets, and rewrites
//! stylesheets in normalized form.

mod config;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use config::Config;
use dm_ir::{
    DefinitionType, Document, DocumentDefinition, DocumentType, FieldId, NamespaceMap,
    RootElementOption, Traversal, walk,
};
use dm_mapping::{SourceDocuments, deserialize, extract_mapping_links, serialize};
use dm_schema::{
    apply_choice_selection, create_document, get_all_override_candidates,
    get_safe_override_candidates,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Parser)]
#[command(name = "datamapper")]
#[command(about = "Data mapper schema and mapping tools")]
#[command(version)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the field tree of a schema
    Inspect {
        /// Schema files; the first one no other file includes is the entry
        #[arg(short, long = "schema", required = true, num_args = 1..)]
        schemas: Vec<PathBuf>,

        /// Root element as `prefix:name` or `namespaceUri:name`
        #[arg(short, long)]
        root: Option<String>,

        /// Read the files as JSON Schema
        #[arg(long)]
        json_schema: bool,

        /// Maximum depth for recursive types
        #[arg(long, default_value_t = 8)]
        depth: usize,

        /// Choice selection as `schemaPath=memberIndex`
        #[arg(long = "select")]
        selections: Vec<String>,
    },

    /// Print the links of a mapping stylesheet
    Links {
        /// Source body schema
        #[arg(short, long)]
        source: PathBuf,

        /// Target body schema
        #[arg(short, long)]
        target: PathBuf,

        /// Mapping stylesheet
        #[arg(short, long)]
        xslt: PathBuf,

        /// Parameter as `name=schemaFile`, or `name` for a primitive one
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Node path of the selected field or mapping node
        #[arg(long)]
        selected: Option<String>,

        /// Print the links as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print type override candidates for a field
    Candidates {
        #[arg(short, long = "schema", required = true, num_args = 1..)]
        schemas: Vec<PathBuf>,

        /// Schema path of the field
        #[arg(short, long)]
        path: String,

        /// List every type instead of the safe ones only
        #[arg(long)]
        all: bool,
    },

    /// Read a mapping stylesheet and write it back
    Normalize {
        /// Target body schema
        #[arg(short, long)]
        target: PathBuf,

        /// Mapping stylesheet
        #[arg(short, long)]
        xslt: PathBuf,

        /// Parameter as `name=schemaFile`, or `name` for a primitive one
        #[arg(short, long = "param")]
        params: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    init_logging(&config);

    match cli.command {
        Commands::Inspect {
            schemas,
            root,
            json_schema,
            depth,
            selections,
        } => {
            let definition_type = if json_schema || schemas.iter().all(|path| is_json(path)) {
                DefinitionType::JsonSchema
            } else {
                DefinitionType::XmlSchema
            };
            let root = config.root_element(root.as_deref());
            let mut document = load_document(
                DocumentType::SourceBody,
                definition_type,
                "Body",
                &schemas,
                root,
            )?;
            let namespaces = with_config_prefixes(document.namespace_map(), &config);
            for selection in &selections {
                let (choice_path, member_index) = parse_selection(selection)?;
                let choice = document
                    .field_at(choice_path, &namespaces)
                    .with_context(|| format!("No field at {choice_path}"))?;
                apply_choice_selection(&mut document, choice, member_index, &namespaces)?;
            }
            let mut printer = TreePrinter {
                namespaces,
                lines: Vec::new(),
            };
            walk(&mut document, &mut printer, depth);
            for line in printer.lines {
                println!("{line}");
            }
        }
        Commands::Links {
            source,
            target,
            xslt,
            params,
            selected,
            json,
        } => {
            let mut sources = SourceDocuments::new().with(load_schema(
                DocumentType::SourceBody,
                "Body",
                &source,
                &config,
            )?);
            for param in load_params(&params, &config)? {
                sources.insert(param);
            }
            let mut target = load_schema(DocumentType::TargetBody, "Body", &target, &config)?;
            let text = read(&xslt)?;
            let tree = deserialize(&text, &mut target, &sources)
                .with_context(|| format!("Failed to read mapping {}", xslt.display()))?;
            let links = extract_mapping_links(&tree, &mut sources, selected.as_deref());
            info!(links = links.len(), "extracted links");
            if json {
                println!("{}", serde_json::to_string_pretty(&links)?);
            } else {
                for link in &links {
                    let marker = if link.is_selected { " *" } else { "" };
                    println!(
                        "{} -> {}{marker}",
                        link.source_node_path, link.target_node_path
                    );
                }
            }
        }
        Commands::Candidates { schemas, path, all } => {
            let root = config.root_element(None);
            let mut document = load_document(
                DocumentType::SourceBody,
                definition_type_for(&schemas[0]),
                "Body",
                &schemas,
                root,
            )?;
            let namespaces = with_config_prefixes(document.namespace_map(), &config);
            let field = document
                .field_at(&path, &namespaces)
                .with_context(|| format!("No field at {path}"))?;
            let candidates = if all {
                get_all_override_candidates(&document, &namespaces)?
            } else {
                get_safe_override_candidates(&document, field, &namespaces)?
            };
            for (display_name, candidate) in &candidates {
                let origin = if candidate.is_builtin { " (built-in)" } else { "" };
                println!("{display_name}\t{}{origin}", candidate.canonical);
            }
        }
        Commands::Normalize {
            target,
            xslt,
            params,
        } => {
            let mut sources = SourceDocuments::new();
            for param in load_params(&params, &config)? {
                sources.insert(param);
            }
            let mut target = load_schema(DocumentType::TargetBody, "Body", &target, &config)?;
            let text = read(&xslt)?;
            let tree = deserialize(&text, &mut target, &sources)
                .with_context(|| format!("Failed to read mapping {}", xslt.display()))?;
            print!("{}", serialize(&tree)?);
        }
    }
    Ok(())
}

fn init_logging(config: &Config) {
    let level = config.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|extension| extension == "json")
}

fn definition_type_for(path: &Path) -> DefinitionType {
    if is_json(path) {
        DefinitionType::JsonSchema
    } else {
        DefinitionType::XmlSchema
    }
}

/// Build a document, printing any warnings to stderr
fn load_document(
    document_type: DocumentType,
    definition_type: DefinitionType,
    name: &str,
    files: &[PathBuf],
    root: Option<RootElementOption>,
) -> Result<Document> {
    let mut definition = DocumentDefinition::new(document_type, definition_type, name);
    for path in files {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .with_context(|| format!("Not a file: {}", path.display()))?;
        definition = definition.with_file(file_name, read(path)?);
    }
    if let Some(root) = root {
        definition = definition.with_root_element(root);
    }

    let result = create_document(&definition);
    for warning in &result.warnings {
        let text = issue_text(&warning.message, warning.file_path.as_deref());
        eprintln!("warning: {text}");
    }
    if result.has_errors() {
        let messages: Vec<String> = result
            .errors
            .iter()
            .map(|error| issue_text(&error.message, error.file_path.as_deref()))
            .collect();
        bail!("Failed to load schema: {}", messages.join("; "));
    }
    debug!(document = %definition.name, "loaded document");
    result
        .into_document()
        .map_err(|issue| anyhow::anyhow!("Failed to load schema: {}", issue.message))
}

fn load_schema(
    document_type: DocumentType,
    name: &str,
    path: &Path,
    config: &Config,
) -> Result<Document> {
    load_document(
        document_type,
        definition_type_for(path),
        name,
        &[path.to_path_buf()],
        config.root_element(None).filter(|_| !is_json(path)),
    )
}

/// Parameter documents from `name=file` flags and the config file; flags win
fn load_params(flags: &[String], config: &Config) -> Result<Vec<Document>> {
    let mut declared = config.parameters.clone();
    for flag in flags {
        let (name, file) = match flag.split_once('=') {
            Some((name, file)) => (name, PathBuf::from(file)),
            None => (flag.as_str(), PathBuf::new()),
        };
        if name.is_empty() {
            bail!("Invalid parameter '{flag}': expected name=file");
        }
        declared.insert(name.to_string(), file);
    }

    declared
        .iter()
        .map(|(name, file)| {
            let document = if file.as_os_str().is_empty() {
                load_document(
                    DocumentType::Param,
                    DefinitionType::Primitive,
                    name,
                    &[],
                    None,
                )
            } else {
                load_document(
                    DocumentType::Param,
                    definition_type_for(file),
                    name,
                    std::slice::from_ref(file),
                    None,
                )
            };
            document.with_context(|| format!("Failed to load parameter {name}"))
        })
        .collect()
}

/// Split a `schemaPath=memberIndex` flag
fn parse_selection(flag: &str) -> Result<(&str, usize)> {
    let Some((choice_path, index)) = flag.rsplit_once('=') else {
        bail!("Invalid selection '{flag}': expected schemaPath=memberIndex");
    };
    let index = index
        .parse()
        .with_context(|| format!("Invalid member index in selection '{flag}'"))?;
    Ok((choice_path, index))
}

fn issue_text(message: &str, file_path: Option<&str>) -> String {
    match file_path {
        Some(file_path) => format!("{message} (file={file_path})"),
        None => message.to_string(),
    }
}

/// Document prefixes, plus configured ones for namespaces it has no prefix for
fn with_config_prefixes(document: &NamespaceMap, config: &Config) -> NamespaceMap {
    let mut namespaces = document.clone();
    for (prefix, uri) in &config.namespaces {
        if !namespaces.contains_prefix(prefix) && !namespaces.contains_uri(uri) {
            namespaces.insert(prefix.as_str(), uri.as_str());
        }
    }
    namespaces
}

/// Renders one line per field: indented schema path, type and cardinality.
/// Selected choice members are marked.
struct TreePrinter {
    namespaces: NamespaceMap,
    lines: Vec<String>,
}

impl TreePrinter {
    fn is_selected(&self, document: &Document, id: FieldId) -> bool {
        let Some(parent) = document.field(id).parent() else {
            return false;
        };
        let Some(selected) = document.selected_member(parent, &self.namespaces) else {
            return false;
        };
        document.field(parent).children().get(selected) == Some(&id)
    }
}

impl Traversal for TreePrinter {
    fn visit(&mut self, document: &Document, id: FieldId, depth: usize) {
        let path = dm_ir::path::build(document, id, &self.namespaces);
        let marker = if self.is_selected(document, id) {
            " (selected)"
        } else {
            ""
        };
        let field = document.field(id);
        let indent = "  ".repeat(depth);
        let line = if field.is_choice() {
            format!("{indent}{path} choice{marker}")
        } else if field.is_sequence() {
            format!("{indent}{path} sequence{marker}")
        } else {
            let type_name = field
                .type_name()
                .map(|name| format!(" ({})", self.namespaces.prefixed(name)))
                .unwrap_or_default();
            format!(
                "{indent}{path} {}{type_name} {}{marker}",
                field.field_type(),
                field.occurs()
            )
        };
        self.lines.push(line);
    }
}
