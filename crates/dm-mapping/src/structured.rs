//! JSON bodies and parameters
//!
//! Stylesheets work on XML. A JSON target body is built as the XML
//! representation of JSON (`xf:map`, `xf:string` and so on) inside a
//! `mapped-xml` variable and converted with `xml-to-json` at the end. A JSON
//! parameter is converted the other way with `json-to-xml` into a companion
//! variable named `{param}-x`.

use crate::xpath::{BinaryOp, Expr, LocationPath, PathStart, Step};
use crate::xslt::{GlobalVariable, Instruction};
use dm_ir::{FN_NAMESPACE, JsonKind, NamespaceMap};

/// Prefix bound to the XPath functions namespace
pub const FN_PREFIX: &str = "xf";

/// Variable holding the XML form of a JSON target body
pub const MAPPED_XML: &str = "mapped-xml";

/// Attribute carrying a JSON property key
pub const KEY_ATTRIBUTE: &str = "key";

const JSON_PARAM_SUFFIX: &str = "-x";

/// Companion variable name of a JSON parameter
pub fn json_param_variable(param: &str) -> String {
    format!("{param}{JSON_PARAM_SUFFIX}")
}

/// Parameter a companion variable stands for
pub fn json_param_name(variable: &str) -> Option<&str> {
    variable
        .strip_suffix(JSON_PARAM_SUFFIX)
        .filter(|name| !name.is_empty())
}

/// `<xsl:variable name="{param}-x" select="json-to-xml(${param})"/>`
pub fn json_param_declaration(param: &str) -> GlobalVariable {
    GlobalVariable {
        name: json_param_variable(param),
        select: Expr::Function {
            name: "json-to-xml".to_string(),
            args: vec![Expr::Path(LocationPath::variable(param, Vec::new()))],
        },
    }
}

/// Parameter converted by a `json-to-xml(${param})` declaration
pub fn declared_json_param(variable: &GlobalVariable) -> Option<&str> {
    let name = json_param_name(&variable.name)?;
    let Expr::Function {
        name: function,
        args,
    } = &variable.select
    else {
        return None;
    };
    if function != "json-to-xml" {
        return None;
    }
    match args.as_slice() {
        [Expr::Path(LocationPath {
            start: PathStart::Variable(param),
            steps,
        })] if steps.is_empty() && param == name => Some(name),
        _ => None,
    }
}

/// Bind the `xf` prefix
pub fn ensure_prefix(namespaces: &mut NamespaceMap) {
    if !namespaces.contains_prefix(FN_PREFIX) {
        namespaces.insert(FN_PREFIX, FN_NAMESPACE);
    }
}

/// Step selecting a JSON value: `xf:{kind}` with a key predicate when keyed
pub fn json_step(kind: JsonKind, key: Option<&str>) -> Step {
    let step = Step::child(Some(FN_PREFIX), kind.as_str());
    match key.filter(|key| !key.is_empty()) {
        Some(key) => step.with_predicate(Expr::Binary {
            op: BinaryOp::Eq,
            left: Box::new(Expr::Path(LocationPath::relative(vec![Step::attribute(
                None,
                KEY_ATTRIBUTE,
            )]))),
            right: Box::new(Expr::string(key)),
        }),
        None => step,
    }
}

/// JSON kind and key a step selects, when it is a JSON step
pub fn read_json_step(
    step: &Step,
    namespaces: &NamespaceMap,
) -> Option<(JsonKind, Option<String>)> {
    let (Some(prefix), local_name) = step.name()? else {
        return None;
    };
    if namespaces.uri_for(prefix) != Some(FN_NAMESPACE) {
        return None;
    }
    let kind = JsonKind::from_element_name(local_name)?;
    let key = match step.predicates.as_slice() {
        [] => None,
        [Expr::Binary {
            op: BinaryOp::Eq,
            left,
            right,
        }] => match (left.as_ref(), right.as_ref()) {
            (Expr::Path(path), Expr::String { value }) if is_key_attribute(path) => {
                Some(value.clone())
            }
            _ => return None,
        },
        _ => return None,
    };
    Some((kind, key))
}

fn is_key_attribute(path: &LocationPath) -> bool {
    path.start == PathStart::Relative
        && path.steps.len() == 1
        && path.steps[0] == Step::attribute(None, KEY_ATTRIBUTE)
}

/// Wrap target body instructions for JSON output
pub fn wrap_json_output(body: Vec<Instruction>) -> Vec<Instruction> {
    vec![
        Instruction::Variable {
            name: MAPPED_XML.to_string(),
            select: None,
            children: body,
        },
        Instruction::ValueOf {
            select: Expr::Function {
                name: "xml-to-json".to_string(),
                args: vec![Expr::Path(LocationPath::variable(MAPPED_XML, Vec::new()))],
            },
        },
    ]
}

/// Instructions inside the `mapped-xml` variable of a JSON output template
pub fn unwrap_json_output(template: &[Instruction]) -> Option<&[Instruction]> {
    template.iter().find_map(|instruction| match instruction {
        Instruction::Variable {
            name,
            select: None,
            children,
        } if name == MAPPED_XML => Some(children.as_slice()),
        _ => None,
    })
}
