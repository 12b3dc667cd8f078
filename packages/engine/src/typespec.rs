//! Output type enforcement
//!
//! Every action's final value passes through the [`TypeSpec`] declared for
//! its output. Rounding is round-half-to-even so amounts match the legal
//! reference arithmetic (`12.5 -> 12`, `13.5 -> 14`).

use crate::types::Value;
use serde::{Deserialize, Serialize};

/// Declared type of an output value with its numeric constraints.
///
/// ```ignore
/// use machine_law_engine::{TypeSpec, Value};
///
/// let spec = TypeSpec::new().with_unit("eurocent").with_min(0.0);
/// assert_eq!(spec.enforce(Value::Float(-12.0)), Value::Int(0));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeSpec {
    /// Expected value type (e.g., "number", "amount", "string", "boolean")
    #[serde(rename = "type", alias = "value_type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,

    /// Unit for the value; `eurocent` yields an integer cent count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Number of decimal places for rounding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<i32>,

    /// Minimum allowed value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    /// Maximum allowed value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl TypeSpec {
    /// Create a new empty TypeSpec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the expected value type.
    pub fn with_type(mut self, value_type: impl Into<String>) -> Self {
        self.value_type = Some(value_type.into());
        self
    }

    /// Set the unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set the precision (decimal places).
    pub fn with_precision(mut self, precision: i32) -> Self {
        self.precision = Some(precision);
        self
    }

    /// Set the minimum value.
    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    /// Set the maximum value.
    pub fn with_max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// Check if this TypeSpec changes numeric values at all.
    pub fn has_constraints(&self) -> bool {
        self.precision.is_some() || self.min.is_some() || self.max.is_some() || self.is_eurocent()
    }

    fn is_eurocent(&self) -> bool {
        self.unit
            .as_deref()
            .is_some_and(|unit| unit.eq_ignore_ascii_case("eurocent"))
    }

    /// Enforce the type specification on a value.
    ///
    /// 1. `null` passes through
    /// 2. `type: string` formats the value as text
    /// 3. numbers (and numeric strings) are clamped to `[min, max]`
    /// 4. rounded half-to-even to `precision` decimals
    /// 5. `eurocent` values become integer cents
    ///
    /// Values that are not numeric are returned unchanged.
    pub fn enforce(&self, value: Value) -> Value {
        if value.is_null() {
            return value;
        }
        if self.value_type.as_deref() == Some("string") {
            return match value {
                Value::String(_) => value,
                other => Value::String(other.to_string()),
            };
        }
        if !self.has_constraints() {
            return value;
        }

        let (number, was_int) = match &value {
            Value::Int(i) => (*i as f64, true),
            Value::Float(f) => (*f, false),
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(parsed) => (parsed, false),
                Err(_) => return value,
            },
            _ => return value,
        };

        self.enforce_numeric(number, was_int)
    }

    fn enforce_numeric(&self, value: f64, was_int: bool) -> Value {
        if !value.is_finite() {
            return Value::Float(value);
        }

        let mut result = value;

        // Swap min and max when misconfigured
        match (self.min, self.max) {
            (Some(min), Some(max)) if min > max => {
                result = result.max(max).min(min);
            }
            (min_opt, max_opt) => {
                if let Some(min) = min_opt {
                    result = result.max(min);
                }
                if let Some(max) = max_opt {
                    result = result.min(max);
                }
            }
        }

        if let Some(precision) = self.precision {
            if precision <= 0 {
                return Value::Int(round_half_even(result, 0) as i64);
            }
            result = round_half_even(result, precision);
        }

        if self.is_eurocent() {
            return Value::Int(round_half_even(result, 0) as i64);
        }

        if self.precision.is_none() && was_int && result.fract() == 0.0 {
            Value::Int(result as i64)
        } else {
            Value::Float(result)
        }
    }
}

/// Round to `precision` decimals, ties to the even neighbour.
pub fn round_half_even(value: f64, precision: i32) -> f64 {
    if precision <= 0 {
        return value.round_ties_even();
    }
    let factor = 10_f64.powi(precision);
    (value * factor).round_ties_even() / factor
}
