//! Value conversion helpers for Gherkin data tables
//!
//! Converts string values from feature files to engine Value types.

use cucumber::gherkin::Table;
use machine_law_engine::{Record, Value};

/// Columns that hold identifiers and must stay strings.
const IDENTIFIER_COLUMNS: [&str; 1] = ["bsn"];

/// Convert a Gherkin table cell value to an engine Value.
///
/// Supports:
/// - `true` / `false` -> Bool
/// - `null` -> Null
/// - Integer literals -> Int
/// - Float literals -> Float
/// - Everything else -> String
pub fn convert_gherkin_value(val: &str) -> Value {
    let trimmed = val.trim();

    if trimmed == "true" {
        return Value::Bool(true);
    }
    if trimmed == "false" {
        return Value::Bool(false);
    }

    if trimmed == "null" || trimmed.is_empty() {
        return Value::Null;
    }

    // Try integer first
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Int(i);
    }

    if let Ok(f) = trimmed.parse::<f64>() {
        return Value::Float(f);
    }

    Value::String(trimmed.to_string())
}

/// Parse a table with a header row into records.
///
/// ```text
/// | bsn       | geboortedatum |
/// | 999993653 | 1990-03-15    |
/// ```
pub fn parse_table_to_records(table: &Table) -> Vec<Record> {
    let Some((header, rows)) = table.rows.split_first() else {
        return Vec::new();
    };
    let headers: Vec<&str> = header.iter().map(|h| h.trim()).collect();

    rows.iter()
        .map(|row| {
            headers
                .iter()
                .zip(row)
                .map(|(column, cell)| {
                    let value = if IDENTIFIER_COLUMNS.contains(column) {
                        Value::String(cell.trim().to_string())
                    } else {
                        convert_gherkin_value(cell)
                    };
                    (column.to_string(), value)
                })
                .collect()
        })
        .collect()
}

/// Compare two Values with floating-point tolerance.
///
/// For Float values, uses a tolerance of 1e-9.
/// For Int values, exact equality is required.
pub fn values_equal_with_tolerance(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Float(fa), Value::Float(fb)) => (fa - fb).abs() < 1e-9,
        (Value::Int(ia), Value::Float(fb)) => ((*ia as f64) - fb).abs() < 1e-9,
        (Value::Float(fa), Value::Int(ib)) => (fa - (*ib as f64)).abs() < 1e-9,
        _ => machine_law_engine::types::values_equal(a, b),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::{convert_gherkin_value, values_equal_with_tolerance};
    use machine_law_engine::Value;

    #[test]
    fn test_convert_bool() {
        assert_eq!(convert_gherkin_value("true"), Value::Bool(true));
        assert_eq!(convert_gherkin_value("false"), Value::Bool(false));
        assert_eq!(convert_gherkin_value(" true "), Value::Bool(true));
    }

    #[test]
    fn test_convert_null() {
        assert_eq!(convert_gherkin_value("null"), Value::Null);
        assert_eq!(convert_gherkin_value(""), Value::Null);
    }

    #[test]
    fn test_convert_numbers() {
        assert_eq!(convert_gherkin_value("42"), Value::Int(42));
        assert_eq!(convert_gherkin_value("-10"), Value::Int(-10));
        assert_eq!(convert_gherkin_value("0.5"), Value::Float(0.5));
    }

    #[test]
    fn test_convert_string() {
        assert_eq!(
            convert_gherkin_value("NEDERLAND"),
            Value::String("NEDERLAND".to_string())
        );
        assert_eq!(
            convert_gherkin_value("1990-03-15"),
            Value::String("1990-03-15".to_string())
        );
    }

    #[test]
    fn test_values_equal_with_tolerance() {
        assert!(values_equal_with_tolerance(&Value::Int(100), &Value::Int(100)));
        assert!(values_equal_with_tolerance(
            &Value::Float(1.0),
            &Value::Float(1.0 + 1e-10)
        ));
        assert!(values_equal_with_tolerance(&Value::Int(100), &Value::Float(100.0)));
        assert!(!values_equal_with_tolerance(&Value::Int(100), &Value::Int(101)));
    }
}
