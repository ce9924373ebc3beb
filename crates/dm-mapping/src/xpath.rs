//! XPath expressions
//!
//! A subset of XPath 3.1 large enough for the selectors and tests a mapping
//! stylesheet carries: literals, location paths over the child, attribute,
//! parent, self and descendant axes with predicates, variable and
//! `current()` starts, function calls, arithmetic, comparison, logical and
//! union operators, parenthesised sequences and `if` expressions.
//!
//! Expressions are parsed into an [`Expr`] tree and printed back through
//! [`std::fmt::Display`].

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary operators, loosest binding first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Union,
}

impl BinaryOp {
    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Lt
            | BinaryOp::LtEq
            | BinaryOp::Gt
            | BinaryOp::GtEq => 3,
            BinaryOp::Add | BinaryOp::Subtract => 4,
            BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => 5,
            BinaryOp::Union => 6,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "div",
            BinaryOp::Modulo => "mod",
            BinaryOp::Union => "|",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Axis {
    Child,
    Attribute,
    Parent,
    #[serde(rename = "self")]
    SelfNode,
    Descendant,
    DescendantOrSelf,
    Ancestor,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "child" => Some(Axis::Child),
            "attribute" => Some(Axis::Attribute),
            "parent" => Some(Axis::Parent),
            "self" => Some(Axis::SelfNode),
            "descendant" => Some(Axis::Descendant),
            "descendant-or-self" => Some(Axis::DescendantOrSelf),
            "ancestor" => Some(Axis::Ancestor),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Axis::Child => "child",
            Axis::Attribute => "attribute",
            Axis::Parent => "parent",
            Axis::SelfNode => "self",
            Axis::Descendant => "descendant",
            Axis::DescendantOrSelf => "descendant-or-self",
            Axis::Ancestor => "ancestor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeTest {
    Name {
        prefix: Option<String>,
        local_name: String,
    },
    Wildcard,
    /// `node()`
    Node,
    /// `text()`
    Text,
}

impl fmt::Display for NodeTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeTest::Name {
                prefix: Some(prefix),
                local_name,
            } => write!(f, "{prefix}:{local_name}"),
            NodeTest::Name {
                prefix: None,
                local_name,
            } => f.write_str(local_name),
            NodeTest::Wildcard => f.write_str("*"),
            NodeTest::Node => f.write_str("node()"),
            NodeTest::Text => f.write_str("text()"),
        }
    }
}

/// One step of a location path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predicates: Vec<Expr>,
}

impl Step {
    fn new(axis: Axis, test: NodeTest) -> Self {
        Self {
            axis,
            test,
            predicates: Vec::new(),
        }
    }

    /// `prefix:name` on the child axis
    pub fn child(prefix: Option<&str>, local_name: impl Into<String>) -> Self {
        Self::new(
            Axis::Child,
            NodeTest::Name {
                prefix: prefix.map(str::to_string),
                local_name: local_name.into(),
            },
        )
    }

    /// `@prefix:name`
    pub fn attribute(prefix: Option<&str>, local_name: impl Into<String>) -> Self {
        Self::new(
            Axis::Attribute,
            NodeTest::Name {
                prefix: prefix.map(str::to_string),
                local_name: local_name.into(),
            },
        )
    }

    /// `.`
    pub fn context_item() -> Self {
        Self::new(Axis::SelfNode, NodeTest::Node)
    }

    /// `..`
    pub fn parent() -> Self {
        Self::new(Axis::Parent, NodeTest::Node)
    }

    #[must_use]
    pub fn with_predicate(mut self, predicate: Expr) -> Self {
        self.predicates.push(predicate);
        self
    }

    fn is_abbreviated_descendant(&self) -> bool {
        self.axis == Axis::DescendantOrSelf
            && self.test == NodeTest::Node
            && self.predicates.is_empty()
    }

    /// Local name and prefix of a name test
    pub fn name(&self) -> Option<(Option<&str>, &str)> {
        match &self.test {
            NodeTest::Name { prefix, local_name } => Some((prefix.as_deref(), local_name)),
            _ => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.axis, &self.test) {
            (Axis::Child, test) => write!(f, "{test}")?,
            (Axis::Attribute, test) => write!(f, "@{test}")?,
            (Axis::Parent, NodeTest::Node) => f.write_str("..")?,
            (Axis::SelfNode, NodeTest::Node) => f.write_str(".")?,
            (axis, test) => write!(f, "{}::{test}", axis.as_str())?,
        }
        for predicate in &self.predicates {
            write!(f, "[{predicate}]")?;
        }
        Ok(())
    }
}

/// Where a location path starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PathStart {
    /// `/`
    Root,
    /// The context item
    Relative,
    /// `$name`
    Variable(String),
    /// `current()`
    Current,
    /// Any other primary expression, such as a function call
    Expr(Box<Expr>),
}

/// A location path. A bare `$name` or `current()` is a path without steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationPath {
    pub start: PathStart,
    pub steps: Vec<Step>,
}

impl LocationPath {
    pub fn new(start: PathStart, steps: Vec<Step>) -> Self {
        Self { start, steps }
    }

    pub fn absolute(steps: Vec<Step>) -> Self {
        Self::new(PathStart::Root, steps)
    }

    pub fn relative(steps: Vec<Step>) -> Self {
        Self::new(PathStart::Relative, steps)
    }

    pub fn variable(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self::new(PathStart::Variable(name.into()), steps)
    }

    /// This path written relative to `context` when `context` is a prefix
    /// of it; `.` when both are the same
    pub fn relative_to(&self, context: &LocationPath) -> Option<LocationPath> {
        if self.start != context.start || !self.steps.starts_with(&context.steps) {
            return None;
        }
        let rest = &self.steps[context.steps.len()..];
        if rest.is_empty() {
            Some(LocationPath::relative(vec![Step::context_item()]))
        } else {
            Some(LocationPath::relative(rest.to_vec()))
        }
    }
}

impl fmt::Display for LocationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let needs_separator = match &self.start {
            PathStart::Root => {
                f.write_str("/")?;
                false
            }
            PathStart::Relative => false,
            PathStart::Variable(name) => {
                write!(f, "${name}")?;
                true
            }
            PathStart::Current => {
                f.write_str("current()")?;
                true
            }
            PathStart::Expr(expr) => {
                match expr.as_ref() {
                    Expr::Function { .. } => write!(f, "{expr}")?,
                    _ => write!(f, "({expr})")?,
                }
                true
            }
        };
        for (index, step) in self.steps.iter().enumerate() {
            if index > 0 || needs_separator {
                f.write_str("/")?;
            }
            if step.is_abbreviated_descendant() {
                continue;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

/// An XPath expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expr {
    String { value: String },
    /// Numeric literal, kept as written
    Number { value: String },
    Path(LocationPath),
    Function { name: String, args: Vec<Expr> },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Negate { operand: Box<Expr> },
    Sequence { items: Vec<Expr> },
    If {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
}

impl Expr {
    pub fn string(value: impl Into<String>) -> Self {
        Expr::String {
            value: value.into(),
        }
    }

    /// `.`
    pub fn context_item() -> Self {
        Expr::Path(LocationPath::relative(vec![Step::context_item()]))
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary { op, .. } => op.precedence(),
            Expr::If { .. } => 0,
            _ => u8::MAX,
        }
    }

    /// Location paths that read input, in the order they appear.
    ///
    /// Paths nested in predicates are relative to their step and are not
    /// reported.
    pub fn field_references(&self) -> Vec<&LocationPath> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'e>(&'e self, out: &mut Vec<&'e LocationPath>) {
        match self {
            Expr::String { .. } | Expr::Number { .. } => {}
            Expr::Path(path) => {
                if let PathStart::Expr(inner) = &path.start {
                    inner.collect_references(out);
                } else {
                    out.push(path);
                }
            }
            Expr::Function { args, .. } => {
                for arg in args {
                    arg.collect_references(out);
                }
            }
            Expr::Binary { left, right, .. } => {
                left.collect_references(out);
                right.collect_references(out);
            }
            Expr::Negate { operand } => operand.collect_references(out),
            Expr::Sequence { items } => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Expr::If {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.collect_references(out);
                then_branch.collect_references(out);
                else_branch.collect_references(out);
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::String { value } => {
                if value.contains('\'') {
                    write!(f, "\"{}\"", value.replace('"', "\"\""))
                } else {
                    write!(f, "'{value}'")
                }
            }
            Expr::Number { value } => f.write_str(value),
            Expr::Path(path) => write!(f, "{path}"),
            Expr::Function { name, args } => {
                write!(f, "{name}(")?;
                for (index, arg) in args.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Expr::Binary { op, left, right } => {
                let precedence = op.precedence();
                if left.precedence() < precedence {
                    write!(f, "({left})")?;
                } else {
                    write!(f, "{left}")?;
                }
                if *op == BinaryOp::Union {
                    f.write_str(" | ")?;
                } else {
                    write!(f, " {} ", op.as_str())?;
                }
                if right.precedence() <= precedence {
                    write!(f, "({right})")
                } else {
                    write!(f, "{right}")
                }
            }
            Expr::Negate { operand } => {
                if operand.precedence() == u8::MAX {
                    write!(f, "-{operand}")
                } else {
                    write!(f, "-({operand})")
                }
            }
            Expr::Sequence { items } => {
                f.write_str("(")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Expr::If {
                condition,
                then_branch,
                else_branch,
            } => write!(f, "if ({condition}) then {then_branch} else {else_branch}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Variable(String),
    String(String),
    Number(String),
    Slash,
    DoubleSlash,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    At,
    Dot,
    DotDot,
    Star,
    ColonColon,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Pipe,
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

struct Lexer<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.text[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn error(&self, message: impl Into<String>, offset: usize) -> Error {
        Error::expression(self.text, message, offset)
    }

    fn ncname(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(is_name_char) {
            self.bump();
        }
        &self.text[start..self.pos]
    }

    fn qname(&mut self) -> String {
        let start = self.pos;
        self.ncname();
        if self.peek() == Some(':') && self.peek_second().is_some_and(is_name_start) {
            self.bump();
            self.ncname();
        }
        self.text[start..self.pos].to_string()
    }

    fn tokens(mut self) -> Result<Vec<(Token, usize)>> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek() {
            let start = self.pos;
            if c.is_whitespace() {
                self.bump();
                continue;
            }
            let token = match c {
                '\'' | '"' => self.string_literal(c)?,
                '0'..='9' => self.number(),
                '.' if self.peek_second().is_some_and(|next| next.is_ascii_digit()) => {
                    self.number()
                }
                '.' => {
                    self.bump();
                    if self.peek() == Some('.') {
                        self.bump();
                        Token::DotDot
                    } else {
                        Token::Dot
                    }
                }
                '/' => {
                    self.bump();
                    if self.peek() == Some('/') {
                        self.bump();
                        Token::DoubleSlash
                    } else {
                        Token::Slash
                    }
                }
                ':' => {
                    self.bump();
                    if self.bump() != Some(':') {
                        return Err(self.error("unexpected ':'", start));
                    }
                    Token::ColonColon
                }
                '!' => {
                    self.bump();
                    if self.bump() != Some('=') {
                        return Err(self.error("expected '=' after '!'", start));
                    }
                    Token::NotEq
                }
                '<' | '>' => {
                    self.bump();
                    let or_equal = self.peek() == Some('=');
                    if or_equal {
                        self.bump();
                    }
                    match (c, or_equal) {
                        ('<', false) => Token::Lt,
                        ('<', true) => Token::LtEq,
                        (_, false) => Token::Gt,
                        (_, true) => Token::GtEq,
                    }
                }
                '$' => {
                    self.bump();
                    if !self.peek().is_some_and(is_name_start) {
                        return Err(self.error("expected variable name after '$'", start));
                    }
                    Token::Variable(self.qname())
                }
                c if is_name_start(c) => Token::Name(self.qname()),
                _ => {
                    self.bump();
                    match c {
                        '(' => Token::LParen,
                        ')' => Token::RParen,
                        '[' => Token::LBracket,
                        ']' => Token::RBracket,
                        ',' => Token::Comma,
                        '@' => Token::At,
                        '*' => Token::Star,
                        '=' => Token::Eq,
                        '+' => Token::Plus,
                        '-' => Token::Minus,
                        '|' => Token::Pipe,
                        other => {
                            let message = format!("unexpected character '{other}'");
                            return Err(self.error(message, start));
                        }
                    }
                }
            };
            tokens.push((token, start));
        }
        Ok(tokens)
    }

    fn string_literal(&mut self, quote: char) -> Result<Token> {
        let start = self.pos;
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => {
                    // A doubled quote stands for itself
                    if self.peek() == Some(quote) {
                        self.bump();
                        value.push(quote);
                    } else {
                        return Ok(Token::String(value));
                    }
                }
                Some(c) => value.push(c),
                None => return Err(self.error("unterminated string literal", start)),
            }
        }
    }

    fn number(&mut self) -> Token {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') {
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        Token::Number(self.text[start..self.pos].to_string())
    }
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|(token, _)| token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.text.len(), |(_, offset)| *offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(token, _)| token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Name(name)) if name == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::expression(self.text, message, self.offset())
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn expr(&mut self) -> Result<Expr> {
        let first = self.expr_single()?;
        if self.peek() != Some(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            items.push(self.expr_single()?);
        }
        Ok(Expr::Sequence { items })
    }

    fn expr_single(&mut self) -> Result<Expr> {
        let is_if = matches!(self.peek(), Some(Token::Name(name)) if name == "if")
            && self.peek_at(1) == Some(&Token::LParen);
        if !is_if {
            return self.or_expr();
        }
        self.pos += 2;
        let condition = self.expr()?;
        self.expect(&Token::RParen, "')' after if condition")?;
        if !self.eat_keyword("then") {
            return Err(self.error("expected 'then'"));
        }
        let then_branch = self.expr_single()?;
        if !self.eat_keyword("else") {
            return Err(self.error("expected 'else'"));
        }
        let else_branch = self.expr_single()?;
        Ok(Expr::If {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        })
    }

    fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("or") {
            let right = self.and_expr()?;
            left = Self::binary(left, BinaryOp::Or, right);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.comparison()?;
        while self.eat_keyword("and") {
            let right = self.comparison()?;
            left = Self::binary(left, BinaryOp::And, right);
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::NotEq) => BinaryOp::NotEq,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::LtEq) => BinaryOp::LtEq,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::GtEq) => BinaryOp::GtEq,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.additive()?;
        Ok(Self::binary(left, op, right))
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Subtract,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = Self::binary(left, op, right);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.union()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Multiply,
                Some(Token::Name(name)) if name == "div" => BinaryOp::Divide,
                Some(Token::Name(name)) if name == "mod" => BinaryOp::Modulo,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.union()?;
            left = Self::binary(left, op, right);
        }
    }

    fn union(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        while self.eat(&Token::Pipe) {
            let right = self.unary()?;
            left = Self::binary(left, BinaryOp::Union, right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Minus) {
            let operand = self.unary()?;
            return Ok(Expr::Negate {
                operand: Box::new(operand),
            });
        }
        self.path_expr()
    }

    fn path_expr(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Slash) => {
                self.pos += 1;
                let steps = if self.starts_step() {
                    self.relative_steps()?
                } else {
                    Vec::new()
                };
                Ok(Expr::Path(LocationPath::absolute(steps)))
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                let mut steps = vec![Step::new(Axis::DescendantOrSelf, NodeTest::Node)];
                steps.extend(self.relative_steps()?);
                Ok(Expr::Path(LocationPath::absolute(steps)))
            }
            _ if self.starts_step() => {
                let steps = self.relative_steps()?;
                Ok(Expr::Path(LocationPath::relative(steps)))
            }
            _ => self.filter_expr(),
        }
    }

    /// Primary expression, optionally continued by a path
    fn filter_expr(&mut self) -> Result<Expr> {
        let (start, primary) = match self.next() {
            Some(Token::String(value)) => return Ok(Expr::String { value }),
            Some(Token::Number(value)) => return Ok(Expr::Number { value }),
            Some(Token::Variable(name)) => (Some(PathStart::Variable(name)), None),
            Some(Token::LParen) => {
                if self.eat(&Token::RParen) {
                    (None, Some(Expr::Sequence { items: Vec::new() }))
                } else {
                    let inner = self.expr()?;
                    self.expect(&Token::RParen, "')'")?;
                    (None, Some(inner))
                }
            }
            Some(Token::Name(name)) if self.peek() == Some(&Token::LParen) => {
                self.pos += 1;
                let args = self.arguments()?;
                if name == "current" && args.is_empty() {
                    (Some(PathStart::Current), None)
                } else {
                    (None, Some(Expr::Function { name, args }))
                }
            }
            Some(_) => {
                self.pos -= 1;
                return Err(self.error("expected an expression"));
            }
            None => return Err(self.error("unexpected end of expression")),
        };

        let continues = matches!(self.peek(), Some(Token::Slash | Token::DoubleSlash));
        match (start, primary) {
            (Some(start), _) => {
                let steps = if continues { self.continued_steps()? } else { Vec::new() };
                Ok(Expr::Path(LocationPath::new(start, steps)))
            }
            (None, Some(primary)) if continues => {
                let steps = self.continued_steps()?;
                Ok(Expr::Path(LocationPath::new(
                    PathStart::Expr(Box::new(primary)),
                    steps,
                )))
            }
            (None, Some(primary)) => Ok(primary),
            (None, None) => Err(self.error("expected an expression")),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expr_single()?);
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(&Token::Comma, "',' or ')' in argument list")?;
        }
    }

    fn starts_step(&self) -> bool {
        match self.peek() {
            Some(Token::At | Token::Dot | Token::DotDot | Token::Star) => true,
            Some(Token::Name(name)) => match self.peek_at(1) {
                Some(Token::LParen) => name == "node" || name == "text",
                _ => true,
            },
            _ => false,
        }
    }

    /// Steps after a leading `/` or `//` that follows a primary expression
    fn continued_steps(&mut self) -> Result<Vec<Step>> {
        let mut steps = Vec::new();
        while let Some(separator) = self.peek().cloned() {
            match separator {
                Token::Slash => self.pos += 1,
                Token::DoubleSlash => {
                    self.pos += 1;
                    steps.push(Step::new(Axis::DescendantOrSelf, NodeTest::Node));
                }
                _ => break,
            }
            steps.push(self.step()?);
        }
        Ok(steps)
    }

    fn relative_steps(&mut self) -> Result<Vec<Step>> {
        let mut steps = vec![self.step()?];
        steps.extend(self.continued_steps()?);
        Ok(steps)
    }

    fn step(&mut self) -> Result<Step> {
        if self.eat(&Token::Dot) {
            return self.predicates(Step::context_item());
        }
        if self.eat(&Token::DotDot) {
            return self.predicates(Step::parent());
        }
        let axis = if self.eat(&Token::At) {
            Axis::Attribute
        } else if self.peek_at(1) == Some(&Token::ColonColon) {
            let Some(Token::Name(name)) = self.peek().cloned() else {
                return Err(self.error("expected axis name"));
            };
            let axis = Axis::from_name(&name)
                .ok_or_else(|| self.error(format!("unsupported axis '{name}'")))?;
            self.pos += 2;
            axis
        } else {
            Axis::Child
        };
        let test = self.node_test()?;
        self.predicates(Step::new(axis, test))
    }

    fn node_test(&mut self) -> Result<NodeTest> {
        match self.next() {
            Some(Token::Star) => Ok(NodeTest::Wildcard),
            Some(Token::Name(name)) if self.peek() == Some(&Token::LParen) => {
                self.pos += 1;
                self.expect(&Token::RParen, "')' after node type test")?;
                match name.as_str() {
                    "node" => Ok(NodeTest::Node),
                    "text" => Ok(NodeTest::Text),
                    _ => Err(self.error(format!("unsupported node test '{name}()'"))),
                }
            }
            Some(Token::Name(name)) => Ok(match name.split_once(':') {
                Some((prefix, local)) => NodeTest::Name {
                    prefix: Some(prefix.to_string()),
                    local_name: local.to_string(),
                },
                None => NodeTest::Name {
                    prefix: None,
                    local_name: name,
                },
            }),
            Some(_) => {
                self.pos -= 1;
                Err(self.error("expected a node test"))
            }
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn predicates(&mut self, mut step: Step) -> Result<Step> {
        while self.eat(&Token::LBracket) {
            step.predicates.push(self.expr()?);
            self.expect(&Token::RBracket, "']'")?;
        }
        Ok(step)
    }
}

/// Parse an XPath expression
pub fn parse(text: &str) -> Result<Expr> {
    let tokens = Lexer { text, pos: 0 }.tokens()?;
    if tokens.is_empty() {
        return Err(Error::expression(text, "empty expression", 0));
    }
    let mut parser = Parser {
        text,
        tokens,
        pos: 0,
    };
    let expr = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}
