//! Operation evaluation for the machine-law engine
//!
//! Interprets the parsed [`Expr`] tree of actions and requirements:
//! - **Conditional:** IF, FOREACH
//! - **Logical:** AND, OR (short-circuit), IN, NOT_IN, NOT_NULL
//! - **Comparison (6):** EQUALS, NOT_EQUALS, GREATER_THAN, LESS_THAN,
//!   GREATER_OR_EQUAL, LESS_OR_EQUAL (chronological for dates)
//! - **Aggregate:** ADD, SUBTRACT, MULTIPLY, DIVIDE, MIN, MAX, CONCAT, AND, OR
//! - **Date:** SUBTRACT_DATE
//!
//! Each operation is recorded as a trace node. Tracing is a side channel:
//! it never changes evaluation order or results.

use crate::config::MAX_FOREACH_ITEMS;
use crate::error::{EngineError, Result};
use crate::expression::{Aggregate, Branch, Comparison, DateUnit, Expr, Logical, Requirement};
use crate::trace::TraceBuilder;
use crate::types::{values_equal, PathNodeType, Record, Value};
use chrono::{Datelike, NaiveDate};
use std::cmp::Ordering;

/// Seam between the evaluator and the evaluation context.
///
/// The context owns the resolver chain, the FOREACH scope and the trace;
/// tests substitute a map-backed implementation.
pub trait ValueResolver {
    /// Resolve a reference path without the `$` prefix (`"income"`,
    /// `"item.amount"`). Unresolvable references yield `Value::Null`.
    fn resolve(&mut self, path: &str) -> Result<Value>;

    /// Install a new local (FOREACH) scope, returning the previous one.
    fn replace_local(&mut self, scope: Option<Record>) -> Option<Record>;

    fn trace(&mut self) -> &mut TraceBuilder;

    /// Whether a required field has been found missing so far.
    fn missing_required(&self) -> bool {
        false
    }
}

/// Evaluate an expression to a value.
pub fn evaluate<R: ValueResolver + ?Sized>(expr: &Expr, ctx: &mut R) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Reference(path) => ctx.resolve(path),
        Expr::List(items) => items
            .iter()
            .map(|item| evaluate(item, ctx))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        _ => {
            let name = expr.operation_name();
            ctx.trace()
                .push(format!("Operation: {}", name), PathNodeType::Operation);
            ctx.trace().add_detail("operation_type", name);
            let result = evaluate_operation(expr, ctx);
            if let Ok(value) = &result {
                ctx.trace().set_result(value.clone());
            }
            ctx.trace().pop();
            result
        }
    }
}

fn evaluate_operation<R: ValueResolver + ?Sized>(expr: &Expr, ctx: &mut R) -> Result<Value> {
    match expr {
        Expr::If(branches) => evaluate_if(branches, ctx),
        Expr::Foreach {
            subject,
            value,
            combine,
        } => evaluate_foreach(subject, value, combine, ctx),
        Expr::Logical { op, values } => evaluate_logical(*op, values, ctx),
        Expr::Membership {
            negated,
            subject,
            values,
        } => {
            let subject = evaluate(subject, ctx)?;
            let options = match evaluate(values, ctx)? {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                scalar => vec![scalar],
            };
            let found = options.iter().any(|option| values_equal(&subject, option));
            Ok(Value::Bool(found != *negated))
        }
        Expr::NotNull(subject) => Ok(Value::Bool(!evaluate(subject, ctx)?.is_null())),
        Expr::Compare { op, subject, value } => {
            let left = evaluate(subject, ctx)?;
            let right = evaluate(value, ctx)?;
            compare(*op, &left, &right).map(Value::Bool)
        }
        Expr::SubtractDate { values, unit } => {
            let values = values
                .iter()
                .map(|v| evaluate(v, ctx))
                .collect::<Result<Vec<_>>>()?;
            ctx.trace().add_detail("unit", unit_name(unit));
            subtract_dates(&values, unit)
        }
        Expr::Aggregate { op, values } => {
            let values = values
                .iter()
                .map(|v| evaluate(v, ctx))
                .collect::<Result<Vec<_>>>()?;
            ctx.trace()
                .add_detail("evaluated_values", Value::Array(values.clone()));
            Ok(aggregate(op, values))
        }
        Expr::Unknown(tag) => {
            tracing::warn!(operation = %tag, "Unknown operation, evaluating to null");
            Ok(Value::Null)
        }
        // Handled by `evaluate` without a trace node
        Expr::Literal(_) | Expr::Reference(_) | Expr::List(_) => evaluate(expr, ctx),
    }
}

// =============================================================================
// Conditional Operations
// =============================================================================

fn evaluate_if<R: ValueResolver + ?Sized>(branches: &[Branch], ctx: &mut R) -> Result<Value> {
    let mut tested = Vec::new();
    for (index, branch) in branches.iter().enumerate() {
        match branch {
            Branch::Test { test, then } => {
                let outcome = evaluate(test, ctx)?.to_bool();
                tested.push(Value::Bool(outcome));
                if outcome {
                    ctx.trace().add_detail("condition_results", tested);
                    ctx.trace().add_detail("branch", index as i64);
                    return evaluate(then, ctx);
                }
            }
            Branch::Else(otherwise) => {
                ctx.trace().add_detail("condition_results", tested);
                ctx.trace().add_detail("branch", "else");
                return evaluate(otherwise, ctx);
            }
        }
    }
    ctx.trace().add_detail("condition_results", tested);
    Ok(Value::Null)
}

fn evaluate_foreach<R: ValueResolver + ?Sized>(
    subject: &Expr,
    value: &Expr,
    combine: &Aggregate,
    ctx: &mut R,
) -> Result<Value> {
    let items = match evaluate(subject, ctx)? {
        Value::Null => {
            tracing::warn!(combine = %combine.name(), "FOREACH subject is null, using identity");
            return Ok(combine.identity());
        }
        Value::Array(items) => items,
        single => vec![single],
    };
    if items.len() > MAX_FOREACH_ITEMS {
        return Err(EngineError::Configuration(format!(
            "FOREACH over {} items exceeds maximum of {}",
            items.len(),
            MAX_FOREACH_ITEMS
        )));
    }
    ctx.trace().add_detail("item_count", items.len() as i64);

    let mut results = Vec::with_capacity(items.len());
    for item in items {
        let previous = ctx.replace_local(Some(item_scope(item)));
        let outcome = evaluate(value, ctx);
        ctx.replace_local(previous);
        match outcome? {
            Value::Array(nested) => results.extend(nested),
            single => results.push(single),
        }
    }
    Ok(aggregate(combine, results))
}

/// Local bindings for one loop item: a record's own fields, plus `item`
/// bound to the whole element.
fn item_scope(item: Value) -> Record {
    match item {
        Value::Object(fields) => {
            let mut scope = fields.clone();
            scope
                .entry("item".to_string())
                .or_insert(Value::Object(fields));
            scope
        }
        scalar => {
            let mut scope = Record::new();
            scope.insert("value".to_string(), scalar.clone());
            scope.insert("item".to_string(), scalar);
            scope
        }
    }
}

// =============================================================================
// Logical Operations
// =============================================================================

fn evaluate_logical<R: ValueResolver + ?Sized>(
    op: Logical,
    values: &[Expr],
    ctx: &mut R,
) -> Result<Value> {
    // AND stops at the first false operand, OR at the first true one
    let stop_on = op == Logical::Or;
    for value in values {
        if evaluate(value, ctx)?.to_bool() == stop_on {
            return Ok(Value::Bool(stop_on));
        }
    }
    Ok(Value::Bool(!stop_on))
}

// =============================================================================
// Comparison Operations
// =============================================================================

/// Compare two operands.
///
/// Dates (and date strings) compare chronologically. Equality otherwise
/// uses deep equality with numeric coercion; ordering coerces to numbers.
/// Ordering against null is false rather than an error, so an absent fact
/// surfaces through `missing_required`.
pub fn compare(op: Comparison, left: &Value, right: &Value) -> Result<bool> {
    if let (Some(l), Some(r)) = (date_operand(left), date_operand(right)) {
        return Ok(ordering_matches(op, l.cmp(&r)));
    }

    match op {
        Comparison::Equals => return Ok(values_equal(left, right)),
        Comparison::NotEquals => return Ok(!values_equal(left, right)),
        _ => {}
    }

    if left.is_null() || right.is_null() {
        tracing::warn!(
            operation = %op.operation(),
            left = %left,
            right = %right,
            "Ordering comparison with null operand is false"
        );
        return Ok(false);
    }

    if date_operand(left).is_some() || date_operand(right).is_some() {
        let other = if date_operand(left).is_some() { right } else { left };
        return Err(EngineError::InvalidDate(format!(
            "cannot compare date with {}",
            other
        )));
    }

    let l = left
        .as_float()
        .ok_or_else(|| EngineError::type_mismatch("number", left))?;
    let r = right
        .as_float()
        .ok_or_else(|| EngineError::type_mismatch("number", right))?;
    Ok(match l.partial_cmp(&r) {
        Some(ordering) => ordering_matches(op, ordering),
        None => false,
    })
}

fn ordering_matches(op: Comparison, ordering: Ordering) -> bool {
    match op {
        Comparison::Equals => ordering == Ordering::Equal,
        Comparison::NotEquals => ordering != Ordering::Equal,
        Comparison::GreaterThan => ordering == Ordering::Greater,
        Comparison::LessThan => ordering == Ordering::Less,
        Comparison::GreaterOrEqual => ordering != Ordering::Less,
        Comparison::LessOrEqual => ordering != Ordering::Greater,
    }
}

fn date_operand(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Date(_) | Value::String(_) => value.as_date(),
        _ => None,
    }
}

// =============================================================================
// Date Operations
// =============================================================================

fn unit_name(unit: &DateUnit) -> &str {
    match unit {
        DateUnit::Days => "days",
        DateUnit::Months => "months",
        DateUnit::Years => "years",
        DateUnit::Other(other) => other,
    }
}

/// `values[0] - values[1]` in whole `unit`s.
fn subtract_dates(values: &[Value], unit: &DateUnit) -> Result<Value> {
    let [end, start] = values else {
        tracing::warn!(count = values.len(), "SUBTRACT_DATE requires exactly 2 values");
        return Ok(Value::Int(0));
    };
    if end.is_null() || start.is_null() {
        tracing::warn!("SUBTRACT_DATE with null operand");
        return Ok(Value::Null);
    }
    let end = end
        .as_date()
        .ok_or_else(|| EngineError::InvalidDate(end.to_string()))?;
    let start = start
        .as_date()
        .ok_or_else(|| EngineError::InvalidDate(start.to_string()))?;

    let incomplete_month = end.day() < start.day();
    let difference = match unit {
        DateUnit::Days => end.signed_duration_since(start).num_days(),
        DateUnit::Years => {
            let mut years = i64::from(end.year() - start.year());
            if (end.month(), end.day()) < (start.month(), start.day()) {
                years -= 1;
            }
            years
        }
        DateUnit::Months => {
            let mut months = i64::from(end.year() - start.year()) * 12
                + i64::from(end.month()) - i64::from(start.month());
            if incomplete_month {
                months -= 1;
            }
            months
        }
        DateUnit::Other(other) => {
            tracing::warn!(unit = %other, "Unknown SUBTRACT_DATE unit");
            0
        }
    };
    Ok(Value::Int(difference))
}

// =============================================================================
// Aggregate Operations
// =============================================================================

/// Reduce a list of operand values.
///
/// Nulls are dropped first; when nothing remains the result is 0.
/// SUBTRACT and DIVIDE fold from the first numeric operand and skip
/// operands they cannot use. Integer inputs keep an integer result except
/// for DIVIDE.
pub fn aggregate(op: &Aggregate, values: Vec<Value>) -> Value {
    let total = values.len();
    let values: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    if values.len() < total {
        tracing::warn!(
            operation = %op.name(),
            dropped = total - values.len(),
            "Dropped null operands"
        );
    }
    if values.is_empty() {
        return Value::Int(0);
    }

    match op {
        Aggregate::Or => Value::Bool(values.iter().any(Value::to_bool)),
        Aggregate::And => Value::Bool(values.iter().all(Value::to_bool)),
        Aggregate::Add => numeric_fold(op, &values, 0, i64::checked_add, |a, b| a + b),
        Aggregate::Multiply => numeric_fold(op, &values, 1, i64::checked_mul, |a, b| a * b),
        Aggregate::Min => extreme(op, &values, Ordering::Less),
        Aggregate::Max => extreme(op, &values, Ordering::Greater),
        Aggregate::Subtract => subtract(&values),
        Aggregate::Divide => divide(&values),
        Aggregate::Concat => Value::String(values.iter().map(|v| v.to_string()).collect()),
        Aggregate::Unknown(tag) => {
            tracing::warn!(operation = %tag, "Unknown aggregate operation, returning 0");
            Value::Int(0)
        }
    }
}

fn numbers(op: &Aggregate, values: &[Value]) -> Vec<Value> {
    values
        .iter()
        .filter(|v| {
            let numeric = matches!(v, Value::Int(_) | Value::Float(_));
            if !numeric {
                tracing::warn!(operation = %op.name(), value = %v, "Skipping non-numeric operand");
            }
            numeric
        })
        .cloned()
        .collect()
}

fn numeric_fold(
    op: &Aggregate,
    values: &[Value],
    identity: i64,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Value {
    let operands = numbers(op, values);
    let ints: Option<Vec<i64>> = operands
        .iter()
        .map(|v| match v {
            Value::Int(i) => Some(*i),
            _ => None,
        })
        .collect();
    if let Some(ints) = ints {
        if let Some(total) = ints
            .iter()
            .try_fold(identity, |acc, i| int_op(acc, *i))
        {
            return Value::Int(total);
        }
    }
    Value::Float(
        operands
            .iter()
            .filter_map(Value::as_float)
            .fold(identity as f64, float_op),
    )
}

fn extreme(op: &Aggregate, values: &[Value], wanted: Ordering) -> Value {
    numbers(op, values)
        .into_iter()
        .reduce(|best, candidate| {
            match (candidate.as_float(), best.as_float()) {
                (Some(c), Some(b)) if c.partial_cmp(&b) == Some(wanted) => candidate,
                _ => best,
            }
        })
        .unwrap_or(Value::Int(0))
}

fn subtract(values: &[Value]) -> Value {
    let operands = numbers(&Aggregate::Subtract, values);
    let Some((first, rest)) = operands.split_first() else {
        return Value::Int(0);
    };
    let mut result = first.clone();
    for operand in rest {
        result = match (&result, operand) {
            (Value::Int(a), Value::Int(b)) => match a.checked_sub(*b) {
                Some(diff) => Value::Int(diff),
                None => Value::Float(*a as f64 - *b as f64),
            },
            (a, b) => Value::Float(a.as_float().unwrap_or(0.0) - b.as_float().unwrap_or(0.0)),
        };
    }
    result
}

fn divide(values: &[Value]) -> Value {
    let operands = numbers(&Aggregate::Divide, values);
    let Some((first, rest)) = operands.split_first() else {
        return Value::Int(0);
    };
    if rest.is_empty() {
        return first.clone();
    }
    let mut result = first.as_float().unwrap_or(0.0);
    for operand in rest {
        match operand.as_float() {
            Some(divisor) if divisor != 0.0 => result /= divisor,
            _ => tracing::warn!(dividend = result, "Skipping zero divisor"),
        }
    }
    Value::Float(result)
}

// =============================================================================
// Requirements
// =============================================================================

/// Evaluate a requirements list; the top level is an implicit ALL.
///
/// ALL stops at the first false member, OR at the first true one; both stop
/// as soon as a required field is found missing.
pub fn evaluate_requirements<R: ValueResolver + ?Sized>(
    requirements: &[Requirement],
    ctx: &mut R,
) -> Result<bool> {
    evaluate_group(requirements, true, ctx)
}

fn evaluate_requirement<R: ValueResolver + ?Sized>(
    requirement: &Requirement,
    ctx: &mut R,
) -> Result<bool> {
    let (children, all) = match requirement {
        Requirement::Condition(expr) => return Ok(evaluate(expr, ctx)?.to_bool()),
        Requirement::All(children) => (children, true),
        Requirement::Or(children) => (children, false),
    };
    let label = if all { "ALL" } else { "OR" };
    ctx.trace()
        .push(format!("Requirements: {}", label), PathNodeType::Requirements);
    let result = evaluate_group(children, all, ctx);
    if let Ok(met) = &result {
        ctx.trace().set_result(Value::Bool(*met));
    }
    ctx.trace().pop();
    result
}

fn evaluate_group<R: ValueResolver + ?Sized>(
    children: &[Requirement],
    all: bool,
    ctx: &mut R,
) -> Result<bool> {
    for child in children {
        let met = evaluate_requirement(child, ctx)?;
        if ctx.missing_required() {
            return Ok(false);
        }
        if met != all {
            return Ok(met);
        }
    }
    Ok(all)
}

// =============================================================================
// Tests
// =============================================================================
