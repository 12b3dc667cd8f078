//! Core types for the machine-law engine

use chrono::{DateTime, Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A record as produced by sources, local scopes and object literals.
pub type Record = BTreeMap<String, Value>;

/// Uniform value representation produced by every resolver.
///
/// Objects are ordered maps so that serialized outputs and traces are
/// byte-identical between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// Null/None value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Array of values
    Array(Vec<Value>),
    /// Object/Map of values
    Object(Record),
    /// Calendar date. Serialized as `YYYY-MM-DD`; documents never
    /// deserialize into it because `String` matches first.
    Date(NaiveDate),
}

impl Value {
    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get value as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get value as i64
    ///
    /// For floats, truncates toward zero.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    /// Try to get value as f64
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get value as string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get value as array reference
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Try to get value as object reference
    pub fn as_object(&self) -> Option<&Record> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Interpret the value as a calendar date.
    ///
    /// Accepts `Value::Date` and strings in `YYYY-MM-DD` or RFC3339 form.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::String(s) => parse_date(s),
            _ => None,
        }
    }

    /// Truthiness used by IF, AND/OR and requirement leaves.
    ///
    /// Booleans as-is, numbers when non-zero, strings when non-empty,
    /// null is false and every other value is true. NaN is falsy.
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) | Value::Date(_) => true,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Date(_) => "date",
        }
    }

    /// Read a single property from a record, list or date.
    ///
    /// Missing keys and out-of-range indices yield `None`.
    pub fn property(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(map) => map.get(key).cloned(),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
            Value::Date(date) => match key {
                "year" => Some(Value::Int(i64::from(date.year()))),
                "month" => Some(Value::Int(i64::from(date.month()))),
                "day" => Some(Value::Int(i64::from(date.day()))),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Parse `YYYY-MM-DD` or an RFC3339 timestamp into a date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
}

/// Deep equality with numeric coercion (`42 == 42.0`).
///
/// Dates compare equal to strings that parse to the same day.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
        (Value::Date(d), Value::String(s)) | (Value::String(s), Value::Date(d)) => {
            parse_date(s) == Some(*d)
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => a == b,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Object(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<Record> for Value {
    fn from(map: Record) -> Self {
        Value::Object(map)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// Operation tags recognised in specification documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    // Comparison operations (6)
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,

    // Arithmetic operations (4)
    Add,
    Subtract,
    Multiply,
    Divide,

    // Aggregate operations (3)
    Max,
    Min,
    Concat,

    // Logical operations (2)
    And,
    Or,

    // Membership and null checks (3)
    In,
    NotIn,
    NotNull,

    // Control flow (2)
    If,
    Foreach,

    // Date arithmetic (1)
    SubtractDate,
}

impl Operation {
    /// Look up the operation for a document tag such as `GREATER_OR_EQUAL`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let op = match tag {
            "EQUALS" => Operation::Equals,
            "NOT_EQUALS" => Operation::NotEquals,
            "GREATER_THAN" => Operation::GreaterThan,
            "LESS_THAN" => Operation::LessThan,
            "GREATER_OR_EQUAL" => Operation::GreaterOrEqual,
            "LESS_OR_EQUAL" => Operation::LessOrEqual,
            "ADD" => Operation::Add,
            "SUBTRACT" => Operation::Subtract,
            "MULTIPLY" => Operation::Multiply,
            "DIVIDE" => Operation::Divide,
            "MAX" => Operation::Max,
            "MIN" => Operation::Min,
            "CONCAT" => Operation::Concat,
            "AND" => Operation::And,
            "OR" => Operation::Or,
            "IN" => Operation::In,
            "NOT_IN" => Operation::NotIn,
            "NOT_NULL" => Operation::NotNull,
            "IF" => Operation::If,
            "FOREACH" => Operation::Foreach,
            "SUBTRACT_DATE" => Operation::SubtractDate,
            _ => return None,
        };
        Some(op)
    }

    /// The tag as written in specification documents.
    pub fn tag(&self) -> &'static str {
        match self {
            Operation::Equals => "EQUALS",
            Operation::NotEquals => "NOT_EQUALS",
            Operation::GreaterThan => "GREATER_THAN",
            Operation::LessThan => "LESS_THAN",
            Operation::GreaterOrEqual => "GREATER_OR_EQUAL",
            Operation::LessOrEqual => "LESS_OR_EQUAL",
            Operation::Add => "ADD",
            Operation::Subtract => "SUBTRACT",
            Operation::Multiply => "MULTIPLY",
            Operation::Divide => "DIVIDE",
            Operation::Max => "MAX",
            Operation::Min => "MIN",
            Operation::Concat => "CONCAT",
            Operation::And => "AND",
            Operation::Or => "OR",
            Operation::In => "IN",
            Operation::NotIn => "NOT_IN",
            Operation::NotNull => "NOT_NULL",
            Operation::If => "IF",
            Operation::Foreach => "FOREACH",
            Operation::SubtractDate => "SUBTRACT_DATE",
        }
    }

    /// Check if this is a comparison operation
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Operation::Equals
                | Operation::NotEquals
                | Operation::GreaterThan
                | Operation::LessThan
                | Operation::GreaterOrEqual
                | Operation::LessOrEqual
        )
    }

    /// Check if this operation reduces a `values` list
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            Operation::Add
                | Operation::Subtract
                | Operation::Multiply
                | Operation::Divide
                | Operation::Max
                | Operation::Min
                | Operation::Concat
                | Operation::And
                | Operation::Or
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Node type in execution trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathNodeType {
    Root,
    Requirements,
    Action,
    Operation,
    Resolve,
    ServiceEvaluation,
    Value,
}

impl PathNodeType {
    /// The serialized name, e.g. `service_evaluation`
    pub fn as_str(self) -> &'static str {
        match self {
            PathNodeType::Root => "root",
            PathNodeType::Requirements => "requirements",
            PathNodeType::Action => "action",
            PathNodeType::Operation => "operation",
            PathNodeType::Resolve => "resolve",
            PathNodeType::ServiceEvaluation => "service_evaluation",
            PathNodeType::Value => "value",
        }
    }
}

/// Which resolver answered a `$name` lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolveType {
    Claim,
    Local,
    Definition,
    Parameter,
    Output,
    Overwrite,
    Source,
    Service,
    /// Computed from the reference date
    Date,
    /// Navigated from a dotted path
    Property,
    None,
}

impl ResolveType {
    /// The serialized name, e.g. `OVERWRITE`
    pub fn as_str(self) -> &'static str {
        match self {
            ResolveType::Claim => "CLAIM",
            ResolveType::Local => "LOCAL",
            ResolveType::Definition => "DEFINITION",
            ResolveType::Parameter => "PARAMETER",
            ResolveType::Output => "OUTPUT",
            ResolveType::Overwrite => "OVERWRITE",
            ResolveType::Source => "SOURCE",
            ResolveType::Service => "SERVICE",
            ResolveType::Date => "DATE",
            ResolveType::Property => "PROPERTY",
            ResolveType::None => "NONE",
        }
    }
}
