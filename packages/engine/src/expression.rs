//! Typed expression tree for actions and requirements
//!
//! Specification documents describe computations as nested maps
//! (`{operation: ADD, values: [...]}`). They are parsed once, when a
//! specification is loaded, into the closed set of variants below so the
//! evaluator can match exhaustively instead of probing maps at runtime.
//!
//! Value positions (`subject`, `value`, `values`, `then`, ...) accept:
//! - scalars, taken literally
//! - `"$name"` strings, resolved through the resolver chain
//! - maps with an `operation` key, evaluated recursively
//! - lists, evaluated element-wise when any element is not literal
//!
//! Operation positions (requirement leaves, IF tests, the action itself)
//! additionally accept a bare `{value: X}` map, which evaluates `X`.

use crate::config::{MAX_ARRAY_SIZE, MAX_OPERATION_DEPTH};
use crate::error::{EngineError, Result};
use crate::types::{Operation, Record, Value};

/// A parsed expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant value
    Literal(Value),
    /// `$name` or `$a.b.c` reference, stored without the `$`
    Reference(String),
    /// List whose items need evaluation
    List(Vec<Expr>),
    /// Ordered `{test, then}` / `{else}` branches
    If(Vec<Branch>),
    /// Loop over a list, reducing the per-item results
    Foreach {
        subject: Box<Expr>,
        value: Box<Expr>,
        combine: Aggregate,
    },
    /// Short-circuit AND / OR
    Logical { op: Logical, values: Vec<Expr> },
    /// IN / NOT_IN membership test
    Membership {
        negated: bool,
        subject: Box<Expr>,
        values: Box<Expr>,
    },
    /// NOT_NULL check
    NotNull(Box<Expr>),
    /// Binary comparison
    Compare {
        op: Comparison,
        subject: Box<Expr>,
        value: Box<Expr>,
    },
    /// Difference between two dates
    SubtractDate { values: Vec<Expr>, unit: DateUnit },
    /// Reduction over a `values` list
    Aggregate { op: Aggregate, values: Vec<Expr> },
    /// Operation tag without a usable shape; evaluates to null
    Unknown(String),
}

/// One IF branch
#[derive(Debug, Clone, PartialEq)]
pub enum Branch {
    Test { test: Expr, then: Expr },
    Else(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Logical {
    And,
    Or,
}

/// Reduction applied by aggregate operations and FOREACH `combine`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregate {
    Or,
    And,
    Min,
    Max,
    Add,
    Multiply,
    Subtract,
    Divide,
    Concat,
    /// Unrecognised tag; reduces to 0
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateUnit {
    Days,
    Months,
    Years,
    Other(String),
}

impl Comparison {
    fn from_operation(op: Operation) -> Option<Self> {
        let cmp = match op {
            Operation::Equals => Comparison::Equals,
            Operation::NotEquals => Comparison::NotEquals,
            Operation::GreaterThan => Comparison::GreaterThan,
            Operation::LessThan => Comparison::LessThan,
            Operation::GreaterOrEqual => Comparison::GreaterOrEqual,
            Operation::LessOrEqual => Comparison::LessOrEqual,
            _ => return None,
        };
        Some(cmp)
    }

    pub fn operation(&self) -> Operation {
        match self {
            Comparison::Equals => Operation::Equals,
            Comparison::NotEquals => Operation::NotEquals,
            Comparison::GreaterThan => Operation::GreaterThan,
            Comparison::LessThan => Operation::LessThan,
            Comparison::GreaterOrEqual => Operation::GreaterOrEqual,
            Comparison::LessOrEqual => Operation::LessOrEqual,
        }
    }
}

impl Aggregate {
    /// Map a document tag to a reduction; unknown tags are kept verbatim.
    pub fn from_tag(tag: &str) -> Self {
        match Operation::from_tag(tag) {
            Some(Operation::Or) => Aggregate::Or,
            Some(Operation::And) => Aggregate::And,
            Some(Operation::Min) => Aggregate::Min,
            Some(Operation::Max) => Aggregate::Max,
            Some(Operation::Add) => Aggregate::Add,
            Some(Operation::Multiply) => Aggregate::Multiply,
            Some(Operation::Subtract) => Aggregate::Subtract,
            Some(Operation::Divide) => Aggregate::Divide,
            Some(Operation::Concat) => Aggregate::Concat,
            _ => Aggregate::Unknown(tag.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Aggregate::Or => "OR",
            Aggregate::And => "AND",
            Aggregate::Min => "MIN",
            Aggregate::Max => "MAX",
            Aggregate::Add => "ADD",
            Aggregate::Multiply => "MULTIPLY",
            Aggregate::Subtract => "SUBTRACT",
            Aggregate::Divide => "DIVIDE",
            Aggregate::Concat => "CONCAT",
            Aggregate::Unknown(tag) => tag,
        }
    }

    /// Result of reducing an absent list.
    pub fn identity(&self) -> Value {
        match self {
            Aggregate::Or => Value::Bool(false),
            Aggregate::And => Value::Bool(true),
            Aggregate::Multiply => Value::Int(1),
            Aggregate::Concat => Value::String(String::new()),
            _ => Value::Int(0),
        }
    }
}

impl DateUnit {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "days" => DateUnit::Days,
            "months" => DateUnit::Months,
            "years" => DateUnit::Years,
            other => DateUnit::Other(other.to_string()),
        }
    }
}

impl Expr {
    /// Label used for trace nodes.
    pub fn operation_name(&self) -> String {
        match self {
            Expr::Literal(_) => "value".to_string(),
            Expr::Reference(name) => format!("${}", name),
            Expr::List(_) => "list".to_string(),
            Expr::If(_) => "IF".to_string(),
            Expr::Foreach { .. } => "FOREACH".to_string(),
            Expr::Logical { op: Logical::And, .. } => "AND".to_string(),
            Expr::Logical { op: Logical::Or, .. } => "OR".to_string(),
            Expr::Membership { negated: false, .. } => "IN".to_string(),
            Expr::Membership { negated: true, .. } => "NOT_IN".to_string(),
            Expr::NotNull(_) => "NOT_NULL".to_string(),
            Expr::Compare { op, .. } => op.operation().tag().to_string(),
            Expr::SubtractDate { .. } => "SUBTRACT_DATE".to_string(),
            Expr::Aggregate { op, .. } => op.name().to_string(),
            Expr::Unknown(tag) => tag.clone(),
        }
    }

    /// Visit every `$name` token in the tree, including strings inside
    /// literal records and lists. Names are passed without the `$`.
    pub fn visit_references<F: FnMut(&str)>(&self, f: &mut F) {
        match self {
            Expr::Literal(value) => visit_literal(value, f),
            Expr::Reference(name) => f(name),
            Expr::List(items) => items.iter().for_each(|e| e.visit_references(f)),
            Expr::If(branches) => {
                for branch in branches {
                    match branch {
                        Branch::Test { test, then } => {
                            test.visit_references(f);
                            then.visit_references(f);
                        }
                        Branch::Else(value) => value.visit_references(f),
                    }
                }
            }
            Expr::Foreach { subject, value, .. } => {
                subject.visit_references(f);
                value.visit_references(f);
            }
            Expr::Logical { values, .. }
            | Expr::SubtractDate { values, .. }
            | Expr::Aggregate { values, .. } => values.iter().for_each(|e| e.visit_references(f)),
            Expr::Membership { subject, values, .. } => {
                subject.visit_references(f);
                values.visit_references(f);
            }
            Expr::NotNull(subject) => subject.visit_references(f),
            Expr::Compare { subject, value, .. } => {
                subject.visit_references(f);
                value.visit_references(f);
            }
            Expr::Unknown(_) => {}
        }
    }
}

fn visit_literal<F: FnMut(&str)>(value: &Value, f: &mut F) {
    match value {
        Value::String(s) => {
            if let Some(name) = s.strip_prefix('$') {
                f(name);
            }
        }
        Value::Array(items) => items.iter().for_each(|v| visit_literal(v, f)),
        Value::Object(map) => map.values().for_each(|v| visit_literal(v, f)),
        _ => {}
    }
}

/// Boolean tree gating whether outputs are computed
#[derive(Debug, Clone, PartialEq)]
pub enum Requirement {
    All(Vec<Requirement>),
    Or(Vec<Requirement>),
    Condition(Expr),
}

/// A named computation producing one output
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub output: String,
    pub expr: Expr,
}

impl Action {
    /// Parse an action map (`{output, value}` or `{output, operation, ...}`).
    pub fn parse(raw: &Value) -> Result<Self> {
        let map = raw
            .as_object()
            .ok_or_else(|| EngineError::Configuration("action must be a mapping".to_string()))?;
        let output = map
            .get("output")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                EngineError::Configuration("action does not have an output field".to_string())
            })?
            .to_string();

        let expr = if map.contains_key("operation") {
            parse_operation_map(map, 0)?
        } else if let Some(value) = map.get("value") {
            parse_value_at(value, 0)?
        } else {
            tracing::warn!(output = %output, "Action has neither value nor operation");
            Expr::Unknown(String::new())
        };

        Ok(Action { output, expr })
    }
}

/// Parse a value position.
pub fn parse_value(raw: &Value) -> Result<Expr> {
    parse_value_at(raw, 0)
}

/// Parse an operation position (requirement leaf, IF test).
pub fn parse_operation(raw: &Value) -> Result<Expr> {
    parse_operation_at(raw, 0)
}

/// Parse a requirements list; the top level is an implicit ALL.
pub fn parse_requirements(items: &[Value]) -> Result<Vec<Requirement>> {
    check_len(items.len(), "requirements")?;
    let mut parsed = Vec::with_capacity(items.len());
    for item in items {
        if let Some(requirement) = parse_requirement(item, 0)? {
            parsed.push(requirement);
        }
    }
    Ok(parsed)
}

fn parse_requirement(raw: &Value, depth: usize) -> Result<Option<Requirement>> {
    check_depth(depth)?;
    let Some(map) = raw.as_object() else {
        tracing::warn!(requirement = %raw, "Skipping requirement that is not a mapping");
        return Ok(None);
    };

    for (key, group) in [("all", true), ("or", false)] {
        if let Some(children) = map.get(key) {
            let items = children.as_array().ok_or_else(|| {
                EngineError::Configuration(format!("requirement '{}' must be a list", key))
            })?;
            check_len(items.len(), key)?;
            let mut parsed = Vec::with_capacity(items.len());
            for child in items {
                if let Some(requirement) = parse_requirement(child, depth + 1)? {
                    parsed.push(requirement);
                }
            }
            return Ok(Some(if group {
                Requirement::All(parsed)
            } else {
                Requirement::Or(parsed)
            }));
        }
    }

    Ok(Some(Requirement::Condition(parse_operation_at(raw, depth)?)))
}

fn check_depth(depth: usize) -> Result<()> {
    if depth > MAX_OPERATION_DEPTH {
        return Err(EngineError::Configuration(format!(
            "expression nesting exceeds maximum depth of {}",
            MAX_OPERATION_DEPTH
        )));
    }
    Ok(())
}

fn check_len(len: usize, what: &str) -> Result<()> {
    if len > MAX_ARRAY_SIZE {
        return Err(EngineError::Configuration(format!(
            "{} has {} elements, maximum is {}",
            what, len, MAX_ARRAY_SIZE
        )));
    }
    Ok(())
}

fn parse_value_at(raw: &Value, depth: usize) -> Result<Expr> {
    check_depth(depth)?;
    match raw {
        Value::String(s) if s.starts_with('$') => Ok(Expr::Reference(s[1..].to_string())),
        Value::Object(map) if map.contains_key("operation") => parse_operation_map(map, depth),
        Value::Array(items) => {
            check_len(items.len(), "list")?;
            let parsed = items
                .iter()
                .map(|item| parse_value_at(item, depth + 1))
                .collect::<Result<Vec<_>>>()?;
            if parsed.iter().all(|e| matches!(e, Expr::Literal(_))) {
                Ok(Expr::Literal(raw.clone()))
            } else {
                Ok(Expr::List(parsed))
            }
        }
        other => Ok(Expr::Literal(other.clone())),
    }
}

fn parse_operation_at(raw: &Value, depth: usize) -> Result<Expr> {
    check_depth(depth)?;
    match raw {
        Value::Object(map) if map.contains_key("operation") => parse_operation_map(map, depth),
        Value::Object(map) => match map.get("value") {
            Some(value) => parse_value_at(value, depth + 1),
            None => Ok(Expr::Unknown(String::new())),
        },
        other => parse_value_at(other, depth),
    }
}

fn operand(map: &Record, key: &str, depth: usize) -> Result<Box<Expr>> {
    match map.get(key) {
        Some(raw) => Ok(Box::new(parse_value_at(raw, depth + 1)?)),
        None => Ok(Box::new(Expr::Literal(Value::Null))),
    }
}

fn operand_list(map: &Record, key: &str, depth: usize) -> Result<Option<Vec<Expr>>> {
    match map.get(key).and_then(Value::as_array) {
        Some(items) => {
            check_len(items.len(), key)?;
            items
                .iter()
                .map(|item| parse_value_at(item, depth + 1))
                .collect::<Result<Vec<_>>>()
                .map(Some)
        }
        None => Ok(None),
    }
}

fn parse_operation_map(map: &Record, depth: usize) -> Result<Expr> {
    check_depth(depth)?;
    let tag = map
        .get("operation")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Configuration("operation must be a string".to_string()))?;

    let Some(op) = Operation::from_tag(tag) else {
        return Ok(match operand_list(map, "values", depth)? {
            Some(values) => Expr::Aggregate {
                op: Aggregate::Unknown(tag.to_string()),
                values,
            },
            None => Expr::Unknown(tag.to_string()),
        });
    };

    match op {
        Operation::If => parse_if(map, depth),
        Operation::Foreach => {
            let combine = map.get("combine").and_then(Value::as_str).ok_or_else(|| {
                EngineError::Configuration("FOREACH requires a combine operation".to_string())
            })?;
            let value = match map.get("value") {
                Some(Value::Array(items)) if !items.is_empty() => {
                    Box::new(parse_value_at(&items[0], depth + 1)?)
                }
                _ => operand(map, "value", depth)?,
            };
            Ok(Expr::Foreach {
                subject: operand(map, "subject", depth)?,
                value,
                combine: Aggregate::from_tag(combine),
            })
        }
        Operation::And | Operation::Or => {
            let values = operand_list(map, "values", depth)?.ok_or_else(|| {
                EngineError::Configuration(format!("{} operation requires a values list", tag))
            })?;
            let op = if op == Operation::And {
                Logical::And
            } else {
                Logical::Or
            };
            Ok(Expr::Logical { op, values })
        }
        Operation::In | Operation::NotIn => Ok(Expr::Membership {
            negated: op == Operation::NotIn,
            subject: operand(map, "subject", depth)?,
            values: operand(map, "values", depth)?,
        }),
        Operation::NotNull => Ok(Expr::NotNull(operand(map, "subject", depth)?)),
        Operation::SubtractDate => {
            let unit = map.get("unit").and_then(Value::as_str).unwrap_or("days");
            Ok(Expr::SubtractDate {
                values: operand_list(map, "values", depth)?.unwrap_or_default(),
                unit: DateUnit::from_tag(unit),
            })
        }
        _ => {
            if let Some(cmp) = Comparison::from_operation(op) {
                return parse_comparison(map, cmp, tag, depth);
            }
            Ok(match operand_list(map, "values", depth)? {
                Some(values) => Expr::Aggregate {
                    op: Aggregate::from_tag(tag),
                    values,
                },
                None => Expr::Unknown(tag.to_string()),
            })
        }
    }
}

fn parse_comparison(map: &Record, op: Comparison, tag: &str, depth: usize) -> Result<Expr> {
    if map.contains_key("subject") {
        return Ok(Expr::Compare {
            op,
            subject: operand(map, "subject", depth)?,
            value: operand(map, "value", depth)?,
        });
    }
    match operand_list(map, "values", depth)? {
        Some(values) if values.len() >= 2 => {
            let mut values = values.into_iter();
            match (values.next(), values.next()) {
                (Some(subject), Some(value)) => Ok(Expr::Compare {
                    op,
                    subject: Box::new(subject),
                    value: Box::new(value),
                }),
                _ => Err(EngineError::Configuration(format!("invalid {} comparison", tag))),
            }
        }
        _ => Err(EngineError::Configuration(format!(
            "{} comparison requires subject/value or two values",
            tag
        ))),
    }
}

fn parse_if(map: &Record, depth: usize) -> Result<Expr> {
    let conditions = map.get("conditions").and_then(Value::as_array).ok_or_else(|| {
        EngineError::Configuration("IF conditions not found or not a list".to_string())
    })?;
    check_len(conditions.len(), "conditions")?;

    let mut branches = Vec::with_capacity(conditions.len());
    for condition in conditions {
        let Some(cond) = condition.as_object() else {
            tracing::warn!(condition = %condition, "Skipping IF condition that is not a mapping");
            continue;
        };
        if let Some(test) = cond.get("test") {
            let then = match cond.get("then") {
                Some(then) => parse_value_at(then, depth + 1)?,
                None => Expr::Literal(Value::Null),
            };
            branches.push(Branch::Test {
                test: parse_operation_at(test, depth + 1)?,
                then,
            });
        } else if let Some(otherwise) = cond.get("else") {
            branches.push(Branch::Else(parse_value_at(otherwise, depth + 1)?));
        } else {
            tracing::warn!("Skipping IF condition without test or else");
        }
    }
    Ok(Expr::If(branches))
}
