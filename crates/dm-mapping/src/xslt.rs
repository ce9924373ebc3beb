//! XSLT instruction AST
//!
//! The mapping vocabulary of XSLT as explicit types: literal result
//! elements, `xsl:attribute`, `xsl:value-of`, `xsl:copy-of`, `xsl:for-each`,
//! `xsl:if`, `xsl:choose` and `xsl:variable`. A [`Stylesheet`] holds the
//! top-level declarations and the body of the `match="/"` template.
//!
//! Reading goes through `roxmltree`; writing goes through a `quick-xml`
//! writer with two-space indentation.

use crate::xpath::{self, Expr};
use crate::{Error, Result};
use dm_ir::NamespaceMap;
use quick_xml::Writer;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use roxmltree::Node;
use tracing::{debug, warn};

pub const XSL_NAMESPACE: &str = "http://www.w3.org/1999/XSL/Transform";
const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
const XSLT_VERSION: &str = "3.0";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMethod {
    #[default]
    Xml,
    Text,
}

impl OutputMethod {
    fn as_str(self) -> &'static str {
        match self {
            OutputMethod::Xml => "xml",
            OutputMethod::Text => "text",
        }
    }
}

/// Top-level `xsl:variable` with a `select`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalVariable {
    pub name: String,
    pub select: Expr,
}

/// Literal result element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralElement {
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace_uri: Option<String>,
    /// Literal attributes as written, namespace declarations excluded
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Instruction>,
}

impl LiteralElement {
    pub fn new(
        prefix: Option<&str>,
        local_name: impl Into<String>,
        namespace_uri: Option<&str>,
    ) -> Self {
        Self {
            prefix: prefix.map(str::to_string),
            local_name: local_name.into(),
            namespace_uri: namespace_uri.map(str::to_string),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(attribute, _)| attribute == name)
            .map(|(_, value)| value.as_str())
    }

    fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.local_name),
            None => self.local_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct When {
    pub test: Expr,
    pub children: Vec<Instruction>,
}

/// One instruction of a template body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Element(LiteralElement),
    Attribute {
        /// Name as written, possibly prefixed
        name: String,
        namespace_uri: Option<String>,
        children: Vec<Instruction>,
    },
    ValueOf {
        select: Expr,
    },
    CopyOf {
        select: Expr,
    },
    ForEach {
        select: Expr,
        children: Vec<Instruction>,
    },
    If {
        test: Expr,
        children: Vec<Instruction>,
    },
    Choose {
        whens: Vec<When>,
        otherwise: Option<Vec<Instruction>>,
    },
    Variable {
        name: String,
        select: Option<Expr>,
        children: Vec<Instruction>,
    },
    Text(String),
}

/// A mapping stylesheet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stylesheet {
    /// Prefixes declared on the stylesheet element, `xsl` excluded
    pub namespaces: NamespaceMap,
    pub output: OutputMethod,
    pub params: Vec<String>,
    pub variables: Vec<GlobalVariable>,
    /// Body of the `match="/"` template
    pub template: Vec<Instruction>,
}

fn position(node: Node<'_, '_>) -> String {
    let pos = node.document().text_pos_at(node.range().start);
    format!("{}:{}", pos.row, pos.col)
}

fn is_xsl(node: Node<'_, '_>, name: &str) -> bool {
    node.is_element()
        && node.tag_name().namespace() == Some(XSL_NAMESPACE)
        && node.tag_name().name() == name
}

fn required<'a>(node: Node<'a, '_>, attribute: &str) -> Result<&'a str> {
    node.attribute(attribute).ok_or_else(|| {
        Error::xslt(
            format!("xsl:{} requires a {attribute} attribute", node.tag_name().name()),
            Some(position(node)),
        )
    })
}

fn expression(node: Node<'_, '_>, attribute: &str) -> Result<Expr> {
    xpath::parse(required(node, attribute)?)
}

impl Stylesheet {
    /// Read a stylesheet
    pub fn parse(text: &str) -> Result<Self> {
        let document = roxmltree::Document::parse(text).map_err(|err| {
            let pos = err.pos();
            Error::xslt(err.to_string(), Some(format!("{}:{}", pos.row, pos.col)))
        })?;
        let root = document.root_element();
        if !is_xsl(root, "stylesheet") && !is_xsl(root, "transform") {
            return Err(Error::xslt(
                format!("root element is {}, not xsl:stylesheet", root.tag_name().name()),
                Some(position(root)),
            ));
        }

        let mut stylesheet = Stylesheet::default();
        for namespace in root.namespaces() {
            if namespace.uri() == XSL_NAMESPACE || namespace.uri() == XML_NAMESPACE {
                continue;
            }
            stylesheet
                .namespaces
                .insert(namespace.name().unwrap_or_default(), namespace.uri());
        }

        let mut template = None;
        for child in root.children().filter(Node::is_element) {
            if is_xsl(child, "output") {
                if child.attribute("method") == Some("text") {
                    stylesheet.output = OutputMethod::Text;
                }
            } else if is_xsl(child, "param") {
                stylesheet.params.push(required(child, "name")?.to_string());
            } else if is_xsl(child, "variable") {
                let name = required(child, "name")?.to_string();
                match child.attribute("select") {
                    Some(select) => stylesheet.variables.push(GlobalVariable {
                        name,
                        select: xpath::parse(select)?,
                    }),
                    None => debug!(%name, "skipping global variable without select"),
                }
            } else if is_xsl(child, "template") {
                if child.attribute("match") == Some("/") && template.is_none() {
                    template = Some(instructions(child)?);
                } else {
                    debug!(position = %position(child), "skipping template");
                }
            } else {
                debug!(element = child.tag_name().name(), "skipping top-level declaration");
            }
        }
        stylesheet.template = template.ok_or(Error::MissingTemplate)?;
        Ok(stylesheet)
    }

    /// Write the stylesheet as indented XML
    pub fn to_xml(&self) -> Result<String> {
        let mut out = XmlOut::new();
        out.emit(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut attributes = vec![("xmlns:xsl".to_string(), XSL_NAMESPACE.to_string())];
        for (prefix, uri) in self.namespaces.iter() {
            let name = if prefix.is_empty() {
                "xmlns".to_string()
            } else {
                format!("xmlns:{prefix}")
            };
            attributes.push((name, uri.to_string()));
        }
        attributes.push(("version".to_string(), XSLT_VERSION.to_string()));
        out.start("xsl:stylesheet", &attributes)?;

        out.empty(
            "xsl:output",
            &[
                ("method".to_string(), self.output.as_str().to_string()),
                ("indent".to_string(), "yes".to_string()),
            ],
        )?;
        for param in &self.params {
            out.empty("xsl:param", &[("name".to_string(), param.clone())])?;
        }
        for variable in &self.variables {
            out.empty(
                "xsl:variable",
                &[
                    ("name".to_string(), variable.name.clone()),
                    ("select".to_string(), variable.select.to_string()),
                ],
            )?;
        }
        out.element(
            "xsl:template",
            &[("match".to_string(), "/".to_string())],
            &self.template,
        )?;
        out.end("xsl:stylesheet")?;
        out.finish()
    }
}

fn instructions(parent: Node<'_, '_>) -> Result<Vec<Instruction>> {
    let mut out = Vec::new();
    for child in parent.children() {
        if child.is_text() {
            let text = child.text().unwrap_or_default().trim();
            if !text.is_empty() {
                out.push(Instruction::Text(text.to_string()));
            }
        } else if child.is_element() {
            if let Some(instruction) = instruction(child)? {
                out.push(instruction);
            }
        }
    }
    Ok(out)
}

fn instruction(node: Node<'_, '_>) -> Result<Option<Instruction>> {
    if node.tag_name().namespace() != Some(XSL_NAMESPACE) {
        return literal_element(node).map(|element| Some(Instruction::Element(element)));
    }
    let instruction = match node.tag_name().name() {
        "value-of" => Instruction::ValueOf {
            select: expression(node, "select")?,
        },
        "copy-of" => Instruction::CopyOf {
            select: expression(node, "select")?,
        },
        "for-each" => Instruction::ForEach {
            select: expression(node, "select")?,
            children: instructions(node)?,
        },
        "if" => Instruction::If {
            test: expression(node, "test")?,
            children: instructions(node)?,
        },
        "choose" => {
            let mut whens = Vec::new();
            let mut otherwise = None;
            for branch in node.children().filter(Node::is_element) {
                if is_xsl(branch, "when") {
                    whens.push(When {
                        test: expression(branch, "test")?,
                        children: instructions(branch)?,
                    });
                } else if is_xsl(branch, "otherwise") {
                    otherwise = Some(instructions(branch)?);
                } else {
                    return Err(Error::xslt(
                        format!("unexpected {} in xsl:choose", branch.tag_name().name()),
                        Some(position(branch)),
                    ));
                }
            }
            if whens.is_empty() {
                return Err(Error::xslt("xsl:choose without xsl:when", Some(position(node))));
            }
            Instruction::Choose { whens, otherwise }
        }
        "variable" => Instruction::Variable {
            name: required(node, "name")?.to_string(),
            select: node.attribute("select").map(xpath::parse).transpose()?,
            children: instructions(node)?,
        },
        "attribute" => Instruction::Attribute {
            name: required(node, "name")?.to_string(),
            namespace_uri: node.attribute("namespace").map(str::to_string),
            children: instructions(node)?,
        },
        "text" => Instruction::Text(node.text().unwrap_or_default().to_string()),
        other => {
            warn!(
                instruction = other,
                position = %position(node),
                "unsupported instruction skipped"
            );
            return Ok(None);
        }
    };
    Ok(Some(instruction))
}

fn literal_element(node: Node<'_, '_>) -> Result<LiteralElement> {
    let namespace_uri = node.tag_name().namespace();
    let prefix = namespace_uri
        .and_then(|uri| node.lookup_prefix(uri))
        .filter(|prefix| !prefix.is_empty());
    let mut element = LiteralElement::new(prefix, node.tag_name().name(), namespace_uri);
    for attribute in node.attributes() {
        let name = match attribute
            .namespace()
            .and_then(|uri| node.lookup_prefix(uri))
            .filter(|prefix| !prefix.is_empty())
        {
            Some(prefix) => format!("{prefix}:{}", attribute.name()),
            None => attribute.name().to_string(),
        };
        element.attributes.push((name, attribute.value().to_string()));
    }
    element.children = instructions(node)?;
    Ok(element)
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('"', "&quot;")
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn emit(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|err| Error::xslt(format!("cannot write stylesheet: {err}"), None))
    }

    fn tag(name: &str, attributes: &[(String, String)]) -> BytesStart<'static> {
        let mut tag = BytesStart::new(name.to_string());
        for (key, value) in attributes {
            let value = escape_attribute(value);
            tag.push_attribute(Attribute::from((key.as_bytes(), value.as_bytes())));
        }
        tag
    }

    fn start(&mut self, name: &str, attributes: &[(String, String)]) -> Result<()> {
        self.emit(Event::Start(Self::tag(name, attributes)))
    }

    fn empty(&mut self, name: &str, attributes: &[(String, String)]) -> Result<()> {
        self.emit(Event::Empty(Self::tag(name, attributes)))
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.emit(Event::End(BytesEnd::new(name.to_string())))
    }

    fn element(
        &mut self,
        name: &str,
        attributes: &[(String, String)],
        children: &[Instruction],
    ) -> Result<()> {
        if children.is_empty() {
            return self.empty(name, attributes);
        }
        self.start(name, attributes)?;
        for child in children {
            self.instruction(child)?;
        }
        self.end(name)
    }

    fn instruction(&mut self, instruction: &Instruction) -> Result<()> {
        match instruction {
            Instruction::Element(element) => {
                let mut attributes = Vec::new();
                if element.prefix.is_none() {
                    if let Some(uri) = &element.namespace_uri {
                        attributes.push(("xmlns".to_string(), uri.clone()));
                    }
                }
                attributes.extend(element.attributes.iter().cloned());
                self.element(&element.qualified_name(), &attributes, &element.children)
            }
            Instruction::Attribute {
                name,
                namespace_uri,
                children,
            } => {
                let mut attributes = vec![("name".to_string(), name.clone())];
                if let Some(uri) = namespace_uri {
                    attributes.push(("namespace".to_string(), uri.clone()));
                }
                self.element("xsl:attribute", &attributes, children)
            }
            Instruction::ValueOf { select } => {
                self.empty("xsl:value-of", &[("select".to_string(), select.to_string())])
            }
            Instruction::CopyOf { select } => {
                self.empty("xsl:copy-of", &[("select".to_string(), select.to_string())])
            }
            Instruction::ForEach { select, children } => self.element(
                "xsl:for-each",
                &[("select".to_string(), select.to_string())],
                children,
            ),
            Instruction::If { test, children } => {
                self.element("xsl:if", &[("test".to_string(), test.to_string())], children)
            }
            Instruction::Choose { whens, otherwise } => {
                self.start("xsl:choose", &[])?;
                for when in whens {
                    self.element(
                        "xsl:when",
                        &[("test".to_string(), when.test.to_string())],
                        &when.children,
                    )?;
                }
                if let Some(otherwise) = otherwise {
                    self.element("xsl:otherwise", &[], otherwise)?;
                }
                self.end("xsl:choose")
            }
            Instruction::Variable {
                name,
                select,
                children,
            } => {
                let mut attributes = vec![("name".to_string(), name.clone())];
                if let Some(select) = select {
                    attributes.push(("select".to_string(), select.to_string()));
                }
                self.element("xsl:variable", &attributes, children)
            }
            Instruction::Text(text) => {
                self.start("xsl:text", &[])?;
                self.emit(Event::Text(BytesText::from_escaped(escape_text(text))))?;
                self.end("xsl:text")
            }
        }
    }

    fn finish(self) -> Result<String> {
        String::from_utf8(self.writer.into_inner())
            .map_err(|err| Error::xslt(format!("stylesheet is not UTF-8: {err}"), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xsl:stylesheet version="3.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform" xmlns:ns0="urn:orders">
  <xsl:output method="xml" indent="yes"/>
  <xsl:param name="limit"/>
  <xsl:template match="/">
    <ns0:Order status="new">
      <xsl:for-each select="/ns0:Order/Line">
        <Line>
          <xsl:value-of select="Sku"/>
        </Line>
      </xsl:for-each>
      <Note><xsl:text>fixed &amp; final</xsl:text></Note>
    </ns0:Order>
  </xsl:template>
</xsl:stylesheet>"#;

    #[test]
    fn test_parse_minimal_stylesheet() {
        let stylesheet = Stylesheet::parse(MINIMAL).unwrap();
        assert_eq!(stylesheet.namespaces.uri_for("ns0"), Some("urn:orders"));
        assert!(!stylesheet.namespaces.contains_prefix("xsl"));
        assert_eq!(stylesheet.params, vec!["limit"]);
        assert_eq!(stylesheet.output, OutputMethod::Xml);

        let [Instruction::Element(order)] = stylesheet.template.as_slice() else {
            panic!("expected one literal element: {:?}", stylesheet.template);
        };
        assert_eq!(order.prefix.as_deref(), Some("ns0"));
        assert_eq!(order.namespace_uri.as_deref(), Some("urn:orders"));
        assert_eq!(order.attribute("status"), Some("new"));
        assert!(matches!(order.children[0], Instruction::ForEach { .. }));
        let Instruction::Element(note) = &order.children[1] else {
            panic!("expected Note");
        };
        assert_eq!(note.children, vec![Instruction::Text("fixed & final".to_string())]);
    }

    #[test]
    fn test_written_stylesheet_reads_back() {
        let stylesheet = Stylesheet::parse(MINIMAL).unwrap();
        let written = stylesheet.to_xml().unwrap();
        assert!(written.contains("<xsl:value-of select=\"Sku\"/>"), "{written}");
        assert!(written.contains("\n    <ns0:Order status=\"new\">"), "{written}");
        assert_eq!(Stylesheet::parse(&written).unwrap(), stylesheet);
    }

    #[test]
    fn test_missing_template() {
        let text = r#"<xsl:stylesheet version="3.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:template match="Order"/>
</xsl:stylesheet>"#;
        assert_eq!(Stylesheet::parse(text).unwrap_err(), Error::MissingTemplate);
    }

    #[test]
    fn test_malformed_xml_has_position() {
        let err = Stylesheet::parse("<xsl:stylesheet>").unwrap_err();
        assert!(matches!(err, Error::Xslt { position: Some(_), .. }), "{err:?}");
        let err = Stylesheet::parse("<root/>").unwrap_err();
        assert!(err.to_string().contains("not xsl:stylesheet"));
    }

    #[test]
    fn test_missing_select_is_reported() {
        let text = r#"<xsl:stylesheet version="3.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:template match="/"><xsl:value-of/></xsl:template>
</xsl:stylesheet>"#;
        let err = Stylesheet::parse(text).unwrap_err();
        assert!(err.to_string().contains("requires a select attribute"), "{err}");
        assert!(err.to_string().contains(" at 2:"), "{err}");
    }
}
