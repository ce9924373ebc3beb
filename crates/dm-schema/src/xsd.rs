//! Owned model of an XML Schema file
//!
//! Only the constructs that shape a field tree are modelled: element and
//! attribute declarations, named and anonymous types with their content
//! models, model groups and attribute groups. Facets, identity constraints
//! and annotations are parsed past.

use crate::{Error, Result};
use dm_ir::{DerivationMethod, MaxOccurs, Occurs, QName, XSD_NAMESPACE};
use roxmltree::Node;

/// `include` and `import` references of a schema file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaHeader {
    pub target_namespace: Option<String>,
    /// `schemaLocation` of every `xs:include`
    pub includes: Vec<String>,
    pub imports: Vec<Import>,
}

/// An `xs:import`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub namespace: Option<String>,
    pub location: Option<String>,
}

/// A parsed schema file
#[derive(Debug, Clone, Default)]
pub struct SchemaFile {
    pub file_path: String,
    pub header: SchemaHeader,
    pub elements: Vec<ElementDecl>,
    pub attributes: Vec<AttributeDecl>,
    pub complex_types: Vec<ComplexTypeDef>,
    pub simple_types: Vec<SimpleTypeDef>,
    pub groups: Vec<GroupDef>,
    pub attribute_groups: Vec<AttributeGroupDef>,
}

/// Element declaration or reference
#[derive(Debug, Clone, PartialEq)]
pub struct ElementDecl {
    /// Qualified name; for references, the referenced name
    pub name: QName,
    /// Set when the declaration is `ref="…"`
    pub is_ref: bool,
    pub type_name: Option<QName>,
    pub inline_type: Option<InlineType>,
    pub occurs: Occurs,
    pub default_value: Option<String>,
}

/// Anonymous type of an element
#[derive(Debug, Clone, PartialEq)]
pub enum InlineType {
    Complex(Box<ComplexTypeDef>),
    Simple(Box<SimpleTypeDef>),
}

/// Complex type definition, named or anonymous
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexTypeDef {
    pub name: Option<QName>,
    pub content: ContentModel,
    /// Attributes declared directly on the type
    pub attributes: Vec<AttributeUse>,
}

/// Content of a complex type
#[derive(Debug, Clone, PartialEq)]
pub enum ContentModel {
    Empty,
    Particle(Particle),
    Simple(Derivation),
    Complex(Derivation),
}

/// `xs:extension` or `xs:restriction` inside simple or complex content
#[derive(Debug, Clone, PartialEq)]
pub struct Derivation {
    pub base: QName,
    pub method: DerivationMethod,
    pub particle: Option<Particle>,
    pub attributes: Vec<AttributeUse>,
}

/// Element content particle
#[derive(Debug, Clone, PartialEq)]
pub enum Particle {
    Element(ElementDecl),
    Sequence(Compositor),
    Choice(Compositor),
    All(Compositor),
    GroupRef { name: QName, occurs: Occurs },
    Any,
}

/// Sequence, choice or all with its members
#[derive(Debug, Clone, PartialEq)]
pub struct Compositor {
    pub occurs: Occurs,
    pub particles: Vec<Particle>,
}

/// Attribute content of a type
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeUse {
    Attribute(AttributeDecl),
    GroupRef(QName),
    Any,
}

/// Attribute declaration or reference
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDecl {
    pub name: QName,
    pub is_ref: bool,
    pub type_name: Option<QName>,
    pub inline_type: Option<Box<SimpleTypeDef>>,
    pub required: bool,
    pub prohibited: bool,
    pub default_value: Option<String>,
}

/// Simple type definition, named or anonymous
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleTypeDef {
    pub name: Option<QName>,
    pub variety: SimpleVariety,
}

/// How a simple type is built
#[derive(Debug, Clone, PartialEq)]
pub enum SimpleVariety {
    /// Restriction of a named base, or of an anonymous one when `base` is unset
    Restriction { base: Option<QName> },
    List,
    Union,
}

/// Named model group
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDef {
    pub name: QName,
    pub particle: Particle,
}

/// Named attribute group
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeGroupDef {
    pub name: QName,
    pub attributes: Vec<AttributeUse>,
}

fn parse_xml<'a>(file_path: &str, text: &'a str) -> Result<roxmltree::Document<'a>> {
    roxmltree::Document::parse(text).map_err(|err| {
        let pos = err.pos();
        Error::parse(file_path, err.to_string(), Some(format!("{}:{}", pos.row, pos.col)))
    })
}

fn is_xsd(node: &Node<'_, '_>, local: &str) -> bool {
    node.is_element()
        && node.tag_name().namespace() == Some(XSD_NAMESPACE)
        && node.tag_name().name() == local
}

fn xsd_children<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(|child| child.is_element() && child.tag_name().namespace() == Some(XSD_NAMESPACE))
}

fn check_root(file_path: &str, doc: &roxmltree::Document<'_>) -> Result<()> {
    let root = doc.root_element();
    if is_xsd(&root, "schema") {
        Ok(())
    } else {
        Err(Error::parse(
            file_path,
            format!("root element is <{}>, expected xs:schema", root.tag_name().name()),
            None,
        ))
    }
}

/// Read only the dependency references of a schema file
pub fn parse_header(file_path: &str, text: &str) -> Result<SchemaHeader> {
    let doc = parse_xml(file_path, text)?;
    check_root(file_path, &doc)?;
    Ok(read_header(doc.root_element()))
}

fn read_header(root: Node<'_, '_>) -> SchemaHeader {
    let mut header = SchemaHeader {
        target_namespace: root
            .attribute("targetNamespace")
            .filter(|ns| !ns.is_empty())
            .map(str::to_string),
        ..SchemaHeader::default()
    };
    for child in xsd_children(root) {
        match child.tag_name().name() {
            "include" => {
                if let Some(location) = child.attribute("schemaLocation") {
                    header.includes.push(location.to_string());
                }
            }
            "import" => header.imports.push(Import {
                namespace: child.attribute("namespace").map(str::to_string),
                location: child.attribute("schemaLocation").map(str::to_string),
            }),
            _ => {}
        }
    }
    header
}

/// Parse a schema file.
///
/// `chameleon_namespace` is the namespace of the including schema; a file
/// without a target namespace adopts it.
pub fn parse_schema(
    file_path: &str,
    text: &str,
    chameleon_namespace: Option<&str>,
) -> Result<SchemaFile> {
    let doc = parse_xml(file_path, text)?;
    check_root(file_path, &doc)?;
    let root = doc.root_element();
    let mut header = read_header(root);
    let chameleon = header.target_namespace.is_none() && chameleon_namespace.is_some();
    if chameleon {
        header.target_namespace = chameleon_namespace.map(str::to_string);
    }

    let parser = FileParser {
        file_path,
        target_namespace: header.target_namespace.clone(),
        chameleon,
        element_qualified: root.attribute("elementFormDefault") == Some("qualified"),
        attribute_qualified: root.attribute("attributeFormDefault") == Some("qualified"),
    };

    let mut file = SchemaFile {
        file_path: file_path.to_string(),
        header,
        ..SchemaFile::default()
    };
    for child in xsd_children(root) {
        match child.tag_name().name() {
            "element" => file.elements.push(parser.element(child, true)?),
            "attribute" => file.attributes.push(parser.attribute(child, true)),
            "complexType" => file.complex_types.push(parser.complex_type(child, true)?),
            "simpleType" => file.simple_types.push(parser.simple_type(child, true)),
            "group" => {
                if let Some(group) = parser.group_def(child)? {
                    file.groups.push(group);
                }
            }
            "attributeGroup" => file.attribute_groups.push(AttributeGroupDef {
                name: parser.declared_name(child),
                attributes: parser.attribute_uses(child),
            }),
            "include" | "import" | "annotation" | "notation" => {}
            other => {
                tracing::debug!(file_path, construct = other, "skipping top-level construct");
            }
        }
    }
    Ok(file)
}

struct FileParser<'f> {
    file_path: &'f str,
    target_namespace: Option<String>,
    chameleon: bool,
    element_qualified: bool,
    attribute_qualified: bool,
}

impl FileParser<'_> {
    fn declared_name(&self, node: Node<'_, '_>) -> QName {
        QName::new(
            self.target_namespace.as_deref(),
            node.attribute("name").unwrap_or_default(),
        )
    }

    /// Resolve a `prefix:local` attribute value against the node's scope
    fn resolve(&self, node: Node<'_, '_>, value: &str) -> QName {
        match value.split_once(':') {
            Some((prefix, local)) => match node.lookup_namespace_uri(Some(prefix)) {
                Some(uri) => QName::new(Some(uri), local),
                None => {
                    tracing::debug!(file_path = self.file_path, prefix, "unbound prefix in reference");
                    QName::local(local)
                }
            },
            None => match node.lookup_namespace_uri(None) {
                Some(uri) => QName::new(Some(uri), value),
                None if self.chameleon => QName::new(self.target_namespace.as_deref(), value),
                None => QName::local(value),
            },
        }
    }

    fn occurs(&self, node: Node<'_, '_>) -> Occurs {
        let min = node
            .attribute("minOccurs")
            .and_then(|value| value.parse().ok())
            .unwrap_or(1);
        let max = match node.attribute("maxOccurs") {
            Some("unbounded") => MaxOccurs::Unbounded,
            Some(value) => MaxOccurs::Bounded(value.parse().unwrap_or(1)),
            None => MaxOccurs::Bounded(1),
        };
        Occurs::new(min, max)
    }

    fn element(&self, node: Node<'_, '_>, global: bool) -> Result<ElementDecl> {
        let occurs = if global { Occurs::ONE } else { self.occurs(node) };
        if let Some(reference) = node.attribute("ref") {
            return Ok(ElementDecl {
                name: self.resolve(node, reference),
                is_ref: true,
                type_name: None,
                inline_type: None,
                occurs,
                default_value: None,
            });
        }

        let qualified = global
            || match node.attribute("form") {
                Some(form) => form == "qualified",
                None => self.element_qualified,
            };
        let namespace = if qualified {
            self.target_namespace.as_deref()
        } else {
            None
        };

        let mut inline_type = None;
        for child in xsd_children(node) {
            match child.tag_name().name() {
                "complexType" => {
                    inline_type = Some(InlineType::Complex(Box::new(self.complex_type(child, false)?)));
                }
                "simpleType" => {
                    inline_type = Some(InlineType::Simple(Box::new(self.simple_type(child, false))));
                }
                _ => {}
            }
        }

        Ok(ElementDecl {
            name: QName::new(namespace, node.attribute("name").unwrap_or_default()),
            is_ref: false,
            type_name: node.attribute("type").map(|value| self.resolve(node, value)),
            inline_type,
            occurs,
            default_value: node
                .attribute("default")
                .or_else(|| node.attribute("fixed"))
                .map(str::to_string),
        })
    }

    fn attribute(&self, node: Node<'_, '_>, global: bool) -> AttributeDecl {
        let use_ = node.attribute("use").unwrap_or("optional");
        let default_value = node
            .attribute("default")
            .or_else(|| node.attribute("fixed"))
            .map(str::to_string);
        if let Some(reference) = node.attribute("ref") {
            return AttributeDecl {
                name: self.resolve(node, reference),
                is_ref: true,
                type_name: None,
                inline_type: None,
                required: use_ == "required",
                prohibited: use_ == "prohibited",
                default_value,
            };
        }

        let qualified = global
            || match node.attribute("form") {
                Some(form) => form == "qualified",
                None => self.attribute_qualified,
            };
        let namespace = if qualified {
            self.target_namespace.as_deref()
        } else {
            None
        };
        AttributeDecl {
            name: QName::new(namespace, node.attribute("name").unwrap_or_default()),
            is_ref: false,
            type_name: node.attribute("type").map(|value| self.resolve(node, value)),
            inline_type: xsd_children(node)
                .find(|child| child.tag_name().name() == "simpleType")
                .map(|child| Box::new(self.simple_type(child, false))),
            required: use_ == "required",
            prohibited: use_ == "prohibited",
            default_value,
        }
    }

    fn attribute_uses(&self, node: Node<'_, '_>) -> Vec<AttributeUse> {
        xsd_children(node)
            .filter_map(|child| match child.tag_name().name() {
                "attribute" => Some(AttributeUse::Attribute(self.attribute(child, false))),
                "attributeGroup" => child
                    .attribute("ref")
                    .map(|reference| AttributeUse::GroupRef(self.resolve(child, reference))),
                "anyAttribute" => Some(AttributeUse::Any),
                _ => None,
            })
            .collect()
    }

    fn complex_type(&self, node: Node<'_, '_>, global: bool) -> Result<ComplexTypeDef> {
        let name = global.then(|| self.declared_name(node));
        let mut content = ContentModel::Empty;
        for child in xsd_children(node) {
            match child.tag_name().name() {
                "sequence" | "choice" | "all" | "group" => {
                    if let Some(particle) = self.particle(child)? {
                        content = ContentModel::Particle(particle);
                    }
                }
                "simpleContent" => content = ContentModel::Simple(self.derivation(child)?),
                "complexContent" => content = ContentModel::Complex(self.derivation(child)?),
                _ => {}
            }
        }
        Ok(ComplexTypeDef {
            name,
            content,
            attributes: self.attribute_uses(node),
        })
    }

    fn derivation(&self, node: Node<'_, '_>) -> Result<Derivation> {
        let Some(inner) = xsd_children(node)
            .find(|child| matches!(child.tag_name().name(), "extension" | "restriction"))
        else {
            return Err(Error::unsupported_construct(
                self.file_path,
                format!("{} without extension or restriction", node.tag_name().name()),
            ));
        };
        let method = if inner.tag_name().name() == "extension" {
            DerivationMethod::Extension
        } else {
            DerivationMethod::Restriction
        };
        let base = inner
            .attribute("base")
            .map_or_else(|| QName::xsd("anyType"), |value| self.resolve(inner, value));

        let mut particle = None;
        for child in xsd_children(inner) {
            if matches!(child.tag_name().name(), "sequence" | "choice" | "all" | "group") {
                particle = self.particle(child)?;
            }
        }
        Ok(Derivation {
            base,
            method,
            particle,
            attributes: self.attribute_uses(inner),
        })
    }

    fn particle(&self, node: Node<'_, '_>) -> Result<Option<Particle>> {
        let occurs = self.occurs(node);
        let particle = match node.tag_name().name() {
            "element" => Particle::Element(self.element(node, false)?),
            "sequence" => Particle::Sequence(self.compositor(node, occurs)?),
            "choice" => Particle::Choice(self.compositor(node, occurs)?),
            "all" => Particle::All(self.compositor(node, occurs)?),
            "group" => match node.attribute("ref") {
                Some(reference) => Particle::GroupRef {
                    name: self.resolve(node, reference),
                    occurs,
                },
                None => {
                    return Err(Error::unsupported_construct(
                        self.file_path,
                        "local xs:group without ref",
                    ));
                }
            },
            "any" => Particle::Any,
            _ => return Ok(None),
        };
        Ok(Some(particle))
    }

    fn compositor(&self, node: Node<'_, '_>, occurs: Occurs) -> Result<Compositor> {
        let mut particles = Vec::new();
        for child in xsd_children(node) {
            if let Some(particle) = self.particle(child)? {
                particles.push(particle);
            }
        }
        Ok(Compositor { occurs, particles })
    }

    fn group_def(&self, node: Node<'_, '_>) -> Result<Option<GroupDef>> {
        let name = self.declared_name(node);
        for child in xsd_children(node) {
            if matches!(child.tag_name().name(), "sequence" | "choice" | "all") {
                if let Some(particle) = self.particle(child)? {
                    return Ok(Some(GroupDef { name, particle }));
                }
            }
        }
        tracing::debug!(file_path = self.file_path, group = %name, "group without content");
        Ok(None)
    }

    fn simple_type(&self, node: Node<'_, '_>, global: bool) -> SimpleTypeDef {
        let name = global.then(|| self.declared_name(node));
        let variety = xsd_children(node)
            .find_map(|child| match child.tag_name().name() {
                "restriction" => Some(SimpleVariety::Restriction {
                    base: child.attribute("base").map(|value| self.resolve(child, value)),
                }),
                "list" => Some(SimpleVariety::List),
                "union" => Some(SimpleVariety::Union),
                _ => None,
            })
            .unwrap_or(SimpleVariety::Restriction { base: None });
        SimpleTypeDef { name, variety }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"<?xml version="1.0"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           xmlns:tns="urn:test" targetNamespace="urn:test" elementFormDefault="qualified">
  <xs:include schemaLocation="common.xsd"/>
  <xs:import namespace="urn:other" schemaLocation="other.xsd"/>
  <xs:element name="Order">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="Id" type="xs:string"/>
        <xs:element name="Line" type="tns:Line" minOccurs="0" maxOccurs="unbounded"/>
      </xs:sequence>
      <xs:attribute name="version" type="xs:int" use="required"/>
    </xs:complexType>
  </xs:element>
  <xs:complexType name="Line">
    <xs:complexContent>
      <xs:extension base="tns:Base">
        <xs:choice>
          <xs:element name="Sku" type="xs:string"/>
          <xs:group ref="tns:Codes"/>
        </xs:choice>
      </xs:extension>
    </xs:complexContent>
  </xs:complexType>
</xs:schema>"#;

    #[test]
    fn test_parse_header() {
        let header = parse_header("order.xsd", SCHEMA).unwrap();
        assert_eq!(header.target_namespace.as_deref(), Some("urn:test"));
        assert_eq!(header.includes, vec!["common.xsd".to_string()]);
        assert_eq!(header.imports[0].location.as_deref(), Some("other.xsd"));
    }

    #[test]
    fn test_parse_elements_and_types() {
        let file = parse_schema("order.xsd", SCHEMA, None).unwrap();
        assert_eq!(file.elements.len(), 1);
        let order = &file.elements[0];
        assert_eq!(order.name, QName::new(Some("urn:test"), "Order"));
        let Some(InlineType::Complex(order_type)) = &order.inline_type else {
            panic!("expected inline complex type");
        };
        assert_eq!(order_type.attributes.len(), 1);
        let ContentModel::Particle(Particle::Sequence(sequence)) = &order_type.content else {
            panic!("expected sequence");
        };
        let Particle::Element(line) = &sequence.particles[1] else {
            panic!("expected element");
        };
        assert_eq!(line.type_name, Some(QName::new(Some("urn:test"), "Line")));
        assert_eq!(line.occurs, Occurs::MANY);
        assert_eq!(line.name.namespace(), Some("urn:test"));

        let line_type = &file.complex_types[0];
        let ContentModel::Complex(derivation) = &line_type.content else {
            panic!("expected complex content");
        };
        assert_eq!(derivation.method, DerivationMethod::Extension);
        assert!(matches!(derivation.particle, Some(Particle::Choice(_))));
    }

    #[test]
    fn test_chameleon_adopts_includer_namespace() {
        let common = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:complexType name="Base"><xs:sequence><xs:element name="Ref" type="Code"/></xs:sequence></xs:complexType>
  <xs:simpleType name="Code"><xs:restriction base="xs:string"/></xs:simpleType>
</xs:schema>"#;
        let file = parse_schema("common.xsd", common, Some("urn:test")).unwrap();
        assert_eq!(file.complex_types[0].name, Some(QName::new(Some("urn:test"), "Base")));
        let ContentModel::Particle(Particle::Sequence(sequence)) = &file.complex_types[0].content
        else {
            panic!("expected sequence");
        };
        let Particle::Element(reference) = &sequence.particles[0] else {
            panic!("expected element");
        };
        assert_eq!(reference.type_name, Some(QName::new(Some("urn:test"), "Code")));
        // Unqualified local element
        assert_eq!(reference.name.namespace(), None);
    }

    #[test]
    fn test_parse_error_carries_position() {
        let err = parse_schema("broken.xsd", "<xs:schema", None).unwrap_err();
        match err {
            Error::Parse {
                file_path,
                position,
                ..
            } => {
                assert_eq!(file_path, "broken.xsd");
                assert!(position.is_some());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
