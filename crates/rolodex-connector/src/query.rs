//! Portable query language
//!
//! Queries are s-expressions over record field names:
//!
//! ```text
//! (and (contains "full_name" "jan doe")
//!      (not (exists "note"))
//!      (beginswith "email" "jane@"))
//! ```
//!
//! Parsing produces a [`QueryNode`] tree that backends either compile into
//! their native filter syntax or evaluate against records in memory.

use std::fmt;

use crate::error::{ConnectorError, ConnectorResult};

/// Field name that stands for "any text field".
pub const ANY_FIELD: &str = "x-evolution-any-field";

/// Short alias accepted for [`ANY_FIELD`].
pub const ANY_FIELD_ALIAS: &str = "any-field";

/// Returns true when `name` designates every text field at once.
pub fn is_any_field(name: &str) -> bool {
    name == ANY_FIELD || name == ANY_FIELD_ALIAS
}

/// Comparison performed by a field test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestOp {
    Contains,
    Is,
    BeginsWith,
    EndsWith,
}

impl TestOp {
    /// Get the operator keyword.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TestOp::Contains => "contains",
            TestOp::Is => "is",
            TestOp::BeginsWith => "beginswith",
            TestOp::EndsWith => "endswith",
        }
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "contains" => Some(TestOp::Contains),
            "is" => Some(TestOp::Is),
            "beginswith" | "begins-with" => Some(TestOp::BeginsWith),
            "endswith" | "ends-with" => Some(TestOp::EndsWith),
            _ => None,
        }
    }
}

/// Parsed query expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryNode {
    And(Vec<QueryNode>),
    Or(Vec<QueryNode>),
    Not(Box<QueryNode>),
    Test {
        field: String,
        op: TestOp,
        value: String,
    },
    Exists {
        field: String,
    },
    AnyFieldContains {
        value: String,
    },
}

impl QueryNode {
    /// Parse a query expression.
    pub fn parse(input: &str) -> ConnectorResult<Self> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let node = parser.expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(ConnectorError::invalid_query(format!(
                "unexpected trailing input in '{input}'"
            )));
        }
        Ok(node)
    }

    /// Build a field test.
    pub fn test(field: impl Into<String>, op: TestOp, value: impl Into<String>) -> Self {
        QueryNode::Test {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Build an existence test.
    pub fn exists(field: impl Into<String>) -> Self {
        QueryNode::Exists {
            field: field.into(),
        }
    }
}

impl fmt::Display for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryNode::And(children) | QueryNode::Or(children) => {
                let keyword = if matches!(self, QueryNode::And(_)) {
                    "and"
                } else {
                    "or"
                };
                write!(f, "({keyword}")?;
                for child in children {
                    write!(f, " {child}")?;
                }
                write!(f, ")")
            }
            QueryNode::Not(child) => write!(f, "(not {child})"),
            QueryNode::Test { field, op, value } => {
                write!(f, "({} {} {})", op.as_str(), quote(field), quote(value))
            }
            QueryNode::Exists { field } => write!(f, "(exists {})", quote(field)),
            QueryNode::AnyFieldContains { value } => {
                write!(f, "(contains {} {})", quote(ANY_FIELD), quote(value))
            }
        }
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Str(String),
    Symbol(String),
}

fn tokenize(input: &str) -> ConnectorResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(escaped) => s.push(escaped),
                            None => {
                                return Err(ConnectorError::invalid_query(
                                    "unterminated escape in string literal",
                                ))
                            }
                        },
                        Some(c) => s.push(c),
                        None => {
                            return Err(ConnectorError::invalid_query(
                                "unterminated string literal",
                            ))
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            _ => {
                let mut symbol = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                        break;
                    }
                    symbol.push(c);
                    chars.next();
                }
                tokens.push(Token::Symbol(symbol));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn expect_close(&mut self, keyword: &str) -> ConnectorResult<()> {
        match self.next() {
            Some(Token::Close) => Ok(()),
            _ => Err(ConnectorError::invalid_query(format!(
                "'{keyword}' has too many arguments or is unterminated"
            ))),
        }
    }

    fn string_arg(&mut self, keyword: &str) -> ConnectorResult<String> {
        match self.next() {
            Some(Token::Str(s)) => Ok(s),
            _ => Err(ConnectorError::invalid_query(format!(
                "'{keyword}' expects string arguments"
            ))),
        }
    }

    fn expr(&mut self) -> ConnectorResult<QueryNode> {
        match self.next() {
            Some(Token::Open) => {}
            _ => return Err(ConnectorError::invalid_query("expected '('")),
        }
        let keyword = match self.next() {
            Some(Token::Symbol(s)) => s,
            _ => return Err(ConnectorError::invalid_query("expected an operator")),
        };

        let node = match keyword.as_str() {
            "and" | "or" => {
                let mut children = Vec::new();
                while matches!(self.peek(), Some(Token::Open)) {
                    children.push(self.expr()?);
                }
                if children.is_empty() {
                    return Err(ConnectorError::invalid_query(format!(
                        "'{keyword}' needs at least one operand"
                    )));
                }
                if keyword == "and" {
                    QueryNode::And(children)
                } else {
                    QueryNode::Or(children)
                }
            }
            "not" => QueryNode::Not(Box::new(self.expr()?)),
            "exists" => QueryNode::Exists {
                field: self.string_arg(&keyword)?,
            },
            other => {
                let op = TestOp::from_keyword(other).ok_or_else(|| {
                    ConnectorError::invalid_query(format!("unknown operator '{other}'"))
                })?;
                let field = self.string_arg(&keyword)?;
                let value = self.string_arg(&keyword)?;
                if op == TestOp::Contains && is_any_field(&field) {
                    QueryNode::AnyFieldContains { value }
                } else {
                    QueryNode::Test { field, op, value }
                }
            }
        };

        self.expect_close(&keyword)?;
        Ok(node)
    }
}

/// Split a `contains` value at word boundaries.
///
/// In every run of spaces that follows a non-space character the first space
/// becomes a wildcard boundary, so `"jan doe"` yields `["jan", "doe"]`. Leading
/// spaces and a boundary that would end the value stay literal.
pub fn widen_segments(value: &str) -> Vec<String> {
    let mut segments = vec![String::new()];
    let mut have_nonspace = false;
    // Spaces seen after a boundary, not counting the boundary itself.
    let mut pending: Option<String> = None;

    for ch in value.chars() {
        if ch == ' ' {
            if let Some(spaces) = pending.as_mut() {
                spaces.push(ch);
                continue;
            }
            if have_nonspace {
                pending = Some(String::new());
                continue;
            }
        } else {
            have_nonspace = true;
            if let Some(spaces) = pending.take() {
                segments.push(spaces);
            }
        }
        if let Some(last) = segments.last_mut() {
            last.push(ch);
        }
    }

    if let Some(spaces) = pending {
        if let Some(last) = segments.last_mut() {
            last.push(' ');
            last.push_str(&spaces);
        }
    }
    segments
}

/// Ordered substring pattern: `initial*any*any*final`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstringPattern {
    pub initial: Option<String>,
    pub any: Vec<String>,
    pub final_part: Option<String>,
}

impl SubstringPattern {
    /// Pattern for a widened `contains` value.
    pub fn contains(value: &str) -> Self {
        Self {
            initial: None,
            any: widen_segments(value)
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect(),
            final_part: None,
        }
    }

    /// Case-insensitive match against `candidate`.
    pub fn matches(&self, candidate: &str) -> bool {
        let haystack = candidate.to_lowercase();
        let mut rest: &str = &haystack;

        if let Some(initial) = &self.initial {
            let initial = initial.to_lowercase();
            match rest.strip_prefix(initial.as_str()) {
                Some(after) => rest = after,
                None => return false,
            }
        }

        let final_part = self.final_part.as_ref().map(|s| s.to_lowercase());
        for part in &self.any {
            let part = part.to_lowercase();
            match rest.find(part.as_str()) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }

        match final_part {
            Some(end) => rest.ends_with(end.as_str()),
            None => true,
        }
    }
}
