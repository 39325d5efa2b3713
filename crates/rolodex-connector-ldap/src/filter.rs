//! Query compilation
//!
//! Turns parsed [`QueryNode`]s into LDAP filter strings and evaluates the
//! same queries against records held in memory. Both paths share one set of
//! rules, so a record matches in the offline cache exactly when its entry
//! would match on the server.
//!
//! A compiled query may be *unconstrained* (`None`), meaning it matches
//! everything. `and` drops unconstrained children, `or` with an
//! unconstrained child is itself unconstrained and `not` of an unconstrained
//! query matches nothing.

use rolodex_connector::error::ConnectorResult;
use rolodex_connector::query::{is_any_field, widen_segments, QueryNode, SubstringPattern, TestOp};
use rolodex_connector::record::{FieldId, Record};

use crate::mapper::{self, AttributeSpec};
use crate::schema::SchemaCapabilities;

/// Filter that matches no entry.
pub const FALSE_FILTER: &str = "(!(objectClass=*))";

/// Filter used by views that browse without a query.
pub const BROWSE_FILTER: &str = "(cn=*)";

/// Query field name accepted for "any email slot".
const EMAIL_ALIAS: &str = "email";

/// Escape special characters in LDAP filter values (RFC 4515).
pub fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

/// AND a configured base filter into a compiled query.
///
/// Empty base filters and `(objectClass=*)` add nothing.
pub fn wrap_base(filter: Option<String>, base_filter: Option<&str>) -> Option<String> {
    let base = base_filter
        .map(str::trim)
        .filter(|b| !b.is_empty() && !b.eq_ignore_ascii_case("(objectClass=*)"));
    match (filter, base) {
        (Some(f), Some(b)) => Some(format!("(&{b}{f})")),
        (None, Some(b)) => Some(b.to_string()),
        (f, None) => f,
    }
}

fn resolve(field: &str, caps: &SchemaCapabilities) -> Option<&'static AttributeSpec> {
    let id = if field == EMAIL_ALIAS {
        FieldId::Email1
    } else {
        field.parse::<FieldId>().ok()?
    };
    let spec = mapper::lookup_field(id)?;
    spec.supported_by(caps).then_some(spec)
}

fn any_field_rows(caps: &SchemaCapabilities) -> impl Iterator<Item = &'static AttributeSpec> + '_ {
    mapper::rows().filter(move |spec| spec.is_text() && spec.is_readable() && spec.supported_by(caps))
}

fn join(op: char, mut parts: Vec<String>) -> String {
    if parts.len() == 1 {
        return parts.remove(0);
    }
    format!("({op}{})", parts.concat())
}

/// Compiles queries for one server's schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryCompiler {
    caps: SchemaCapabilities,
}

impl QueryCompiler {
    pub fn new(caps: SchemaCapabilities) -> Self {
        Self { caps }
    }

    /// Parse and compile a query expression.
    pub fn compile_str(&self, query: &str) -> ConnectorResult<Option<String>> {
        let node = QueryNode::parse(query)?;
        Ok(self.compile(&node))
    }

    /// Compile a parsed query; `None` means unconstrained.
    pub fn compile(&self, node: &QueryNode) -> Option<String> {
        match node {
            QueryNode::And(children) => {
                let parts: Vec<String> = children.iter().filter_map(|c| self.compile(c)).collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(join('&', parts))
                }
            }
            QueryNode::Or(children) => {
                let parts: Option<Vec<String>> = children.iter().map(|c| self.compile(c)).collect();
                parts.map(|parts| join('|', parts))
            }
            QueryNode::Not(child) => match self.compile(child) {
                Some(inner) => Some(format!("(!{inner})")),
                None => Some(FALSE_FILTER.to_string()),
            },
            QueryNode::Exists { field } if is_any_field(field) => {
                let parts = any_field_rows(&self.caps)
                    .map(|spec| format!("({}=*)", spec.attr))
                    .collect();
                Some(join('|', parts))
            }
            QueryNode::Exists { field } => Some(match resolve(field, &self.caps) {
                Some(spec) => format!("({}=*)", spec.attr),
                None => FALSE_FILTER.to_string(),
            }),
            QueryNode::AnyFieldContains { value } => {
                if value.is_empty() {
                    return None;
                }
                let parts = any_field_rows(&self.caps)
                    .map(|spec| contains_filter(spec.attr, value))
                    .collect();
                Some(join('|', parts))
            }
            QueryNode::Test { field, op, value } => self.compile_test(field, *op, value),
        }
    }

    fn compile_test(&self, field: &str, op: TestOp, value: &str) -> Option<String> {
        if op == TestOp::BeginsWith {
            if value.is_empty() {
                return None;
            }
            let escaped = escape_filter_value(value);
            if field == FieldId::FullName.as_str() {
                return Some(format!("(|(cn={escaped}*)(sn={escaped}*))"));
            }
            if field == FieldId::FileAs.as_str() {
                // Entries without fileAs sort by surname.
                return Some(if self.caps.evolution_person {
                    format!("(|(fileAs={escaped}*)(&(!(fileAs=*))(sn={escaped}*)))")
                } else {
                    format!("(sn={escaped}*)")
                });
            }
        }

        let Some(spec) = resolve(field, &self.caps) else {
            return Some(FALSE_FILTER.to_string());
        };
        let attr = spec.attr;
        Some(match op {
            TestOp::Is => format!("({attr}={})", escape_filter_value(value)),
            TestOp::Contains => contains_filter(attr, value),
            TestOp::BeginsWith => format!("({attr}={}*)", escape_filter_value(value)),
            TestOp::EndsWith if value.is_empty() => format!("({attr}=*)"),
            TestOp::EndsWith => format!("({attr}=*{})", escape_filter_value(value)),
        })
    }
}

/// `contains` with word-boundary widening: `"jan doe"` becomes `*jan*doe*`.
fn contains_filter(attr: &str, value: &str) -> String {
    let segments: Vec<String> = widen_segments(value)
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| escape_filter_value(s))
        .collect();
    if segments.is_empty() {
        format!("({attr}=*)")
    } else {
        format!("({attr}=*{}*)", segments.join("*"))
    }
}

/// Evaluates a query against records with the compiler's semantics.
#[derive(Debug, Clone)]
pub struct RecordMatcher {
    query: QueryNode,
    caps: SchemaCapabilities,
}

impl RecordMatcher {
    pub fn new(query: QueryNode, caps: SchemaCapabilities) -> Self {
        Self { query, caps }
    }

    /// Parse a query expression.
    pub fn parse(query: &str, caps: SchemaCapabilities) -> ConnectorResult<Self> {
        Ok(Self::new(QueryNode::parse(query)?, caps))
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.eval(&self.query, record)
    }

    fn eval(&self, node: &QueryNode, record: &Record) -> bool {
        match node {
            QueryNode::And(children) => children.iter().all(|c| self.eval(c, record)),
            QueryNode::Or(children) => children.iter().any(|c| self.eval(c, record)),
            QueryNode::Not(child) => !self.eval(child, record),
            QueryNode::Exists { field } if is_any_field(field) => {
                any_field_rows(&self.caps).any(|spec| !values(spec, record).is_empty())
            }
            QueryNode::Exists { field } => match resolve(field, &self.caps) {
                Some(spec) => !values(spec, record).is_empty(),
                None => false,
            },
            QueryNode::AnyFieldContains { value } => {
                value.is_empty()
                    || any_field_rows(&self.caps)
                        .any(|spec| contains(&values(spec, record), value))
            }
            QueryNode::Test { field, op, value } => self.eval_test(field, *op, value, record),
        }
    }

    fn eval_test(&self, field: &str, op: TestOp, value: &str, record: &Record) -> bool {
        if op == TestOp::BeginsWith {
            if value.is_empty() {
                return true;
            }
            let by_field = |id: FieldId| {
                mapper::lookup_field(id)
                    .map(|spec| begins_with(&values(spec, record), value))
                    .unwrap_or(false)
            };
            if field == FieldId::FullName.as_str() {
                return by_field(FieldId::FullName) || by_field(FieldId::FamilyName);
            }
            if field == FieldId::FileAs.as_str() {
                if !self.caps.evolution_person {
                    return by_field(FieldId::FamilyName);
                }
                let has_file_as = record.get(FieldId::FileAs).is_some();
                return by_field(FieldId::FileAs) || (!has_file_as && by_field(FieldId::FamilyName));
            }
        }

        let Some(spec) = resolve(field, &self.caps) else {
            return false;
        };
        let values = values(spec, record);
        match op {
            TestOp::Is => values.iter().any(|v| v.to_lowercase() == value.to_lowercase()),
            TestOp::Contains => contains(&values, value),
            TestOp::BeginsWith => begins_with(&values, value),
            TestOp::EndsWith => {
                let suffix = value.to_lowercase();
                values.iter().any(|v| v.to_lowercase().ends_with(&suffix))
            }
        }
    }
}

fn values(spec: &AttributeSpec, record: &Record) -> Vec<String> {
    mapper::encode_values(spec, record)
        .into_iter()
        .map(|v| String::from_utf8_lossy(&v).into_owned())
        .collect()
}

fn contains(values: &[String], value: &str) -> bool {
    let pattern = SubstringPattern::contains(value);
    values.iter().any(|v| pattern.matches(v))
}

fn begins_with(values: &[String], value: &str) -> bool {
    let prefix = value.to_lowercase();
    values.iter().any(|v| v.to_lowercase().starts_with(&prefix))
}
