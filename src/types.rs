//! Core value and type-constraint types for the rule engine

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Represents any value flowing through the engine (similar to Python's `Any`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null/None value
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
    /// Object/map of values
    Object(HashMap<String, Value>),
}

impl Value {
    /// Check if the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if the value is numeric (int or float).
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Try to get the value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get the value as `i64`.
    ///
    /// For floats, truncates toward zero (like Python's `int()`).
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    /// Try to get the value as `f64`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get the value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get the value as an array reference.
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Convert the value to boolean (Python-style truthiness).
    ///
    /// Note: NaN is treated as falsy (unlike Python where `bool(float('nan'))`
    /// is `True`). This is intentional: NaN represents invalid/missing data
    /// in computed results and should not gate requirements as "true".
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }

    /// Type name used in error messages and trace details.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
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

/// Declarative value constraint applied to an output (§C1).
///
/// `unit == "eurocent"` is the only unit with behavior attached: it forces
/// integer truncation after rounding. `precision` and `min`/`max` are
/// otherwise orthogonal and independently optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeSpec {
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub precision: Option<u32>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl TypeSpec {
    /// Coerce `value` into this spec.
    ///
    /// Order matters: bounds are applied before precision (so clamping can't
    /// introduce spurious digits), precision before the eurocent unit (so
    /// truncation sees the already-rounded value).
    pub fn enforce(&self, value: &Value) -> Value {
        if value.is_null() {
            return Value::Null;
        }

        let mut numeric = match value {
            Value::String(s) => match s.parse::<f64>() {
                Ok(f) => f,
                Err(_) => return value.clone(),
            },
            Value::Int(i) => *i as f64,
            Value::Float(f) => *f,
            _ => return value.clone(),
        };

        if let Some(min) = self.min {
            numeric = numeric.max(min);
        }
        if let Some(max) = self.max {
            numeric = numeric.min(max);
        }
        if let Some(precision) = self.precision {
            numeric = round_half_to_even(numeric, precision);
        }
        if self.unit.as_deref() == Some("eurocent") {
            return Value::Int(numeric.trunc() as i64);
        }

        // Preserve integer-ness when the input was already an integer and no
        // rounding/clamping introduced a fraction.
        if matches!(value, Value::Int(_)) && numeric.fract() == 0.0 {
            Value::Int(numeric as i64)
        } else {
            Value::Float(numeric)
        }
    }
}

/// Round half-to-even ("banker's rounding") to `precision` decimal places.
///
/// Matches the rounding mode most systems languages and Python's `round()`
/// use, avoiding the systematic upward bias of round-half-away-from-zero
/// when truncating monetary values.
fn round_half_to_even(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    let scaled = value * factor;
    let floor = scaled.floor();
    let diff = scaled - floor;
    let tolerance = f64::EPSILON * scaled.abs().max(1.0) * 4.0;

    let rounded = if (diff - 0.5).abs() < tolerance {
        if (floor as i64).rem_euclid(2) == 0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        scaled.round()
    };

    rounded / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_bool_conversion() {
        assert!(Value::Bool(true).to_bool());
        assert!(!Value::Bool(false).to_bool());
        assert!(!Value::Null.to_bool());
        assert!(Value::Int(1).to_bool());
        assert!(!Value::Int(0).to_bool());
        assert!(Value::String("hello".to_string()).to_bool());
        assert!(!Value::String(String::new()).to_bool());
        // NaN is falsy (intentional deviation from Python)
        assert!(!Value::Float(f64::NAN).to_bool());
        assert!(Value::Float(1.0).to_bool());
        assert!(!Value::Float(0.0).to_bool());
    }

    #[test]
    fn test_value_as_methods() {
        let int_val = Value::Int(42);
        assert_eq!(int_val.as_int(), Some(42));
        assert_eq!(int_val.as_float(), Some(42.0));

        let str_val = Value::String("hello".to_string());
        assert_eq!(str_val.as_str(), Some("hello"));
    }

    #[test]
    fn test_value_serde_roundtrip() {
        let values = vec![
            Value::Null,
            Value::Bool(true),
            Value::Int(42),
            Value::Float(3.14),
            Value::String("test".to_string()),
            Value::Array(vec![Value::Int(1), Value::Int(2)]),
        ];

        for value in values {
            let json = serde_json::to_string(&value).unwrap();
            let parsed: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(value, parsed);
        }
    }

    // -------------------------------------------------------------------
    // TypeSpec.enforce — scenario S1/S2 and general behavior
    // -------------------------------------------------------------------

    #[test]
    fn test_enforce_null_passthrough() {
        let spec = TypeSpec {
            min: Some(0.0),
            ..Default::default()
        };
        assert_eq!(spec.enforce(&Value::Null), Value::Null);
    }

    #[test]
    fn test_enforce_clamps_to_bounds_s1() {
        // S1 — Arithmetic with clamping
        let spec = TypeSpec {
            min: Some(0.0),
            max: Some(100.0),
            precision: Some(2),
            unit: None,
        };
        assert_eq!(spec.enforce(&Value::Float(110.0)), Value::Float(100.0));
        assert_eq!(spec.enforce(&Value::Float(-5.0)), Value::Float(0.0));
    }

    #[test]
    fn test_enforce_eurocent_truncates_s2() {
        // S2 — Eurocent truncation
        let spec = TypeSpec {
            unit: Some("eurocent".to_string()),
            ..Default::default()
        };
        assert_eq!(spec.enforce(&Value::Float(12.99)), Value::Int(12));
        assert_eq!(spec.enforce(&Value::Float(-12.99)), Value::Int(-12));
    }

    #[test]
    fn test_enforce_non_numeric_string_passthrough() {
        let spec = TypeSpec {
            min: Some(0.0),
            ..Default::default()
        };
        let value = Value::String("not a number".to_string());
        assert_eq!(spec.enforce(&value), value);
    }

    #[test]
    fn test_enforce_numeric_string_is_parsed() {
        let spec = TypeSpec {
            max: Some(10.0),
            ..Default::default()
        };
        assert_eq!(
            spec.enforce(&Value::String("15".to_string())),
            Value::Float(10.0)
        );
    }

    #[test]
    fn test_enforce_is_idempotent() {
        let spec = TypeSpec {
            min: Some(0.0),
            max: Some(100.0),
            precision: Some(2),
            unit: Some("eurocent".to_string()),
        };
        let once = spec.enforce(&Value::Float(250.456));
        let twice = spec.enforce(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_enforce_precision_before_unit() {
        let spec = TypeSpec {
            precision: Some(0),
            unit: Some("eurocent".to_string()),
            ..Default::default()
        };
        // 0.6 rounds to 1 first, then eurocent truncation is a no-op on an integer.
        assert_eq!(spec.enforce(&Value::Float(0.6)), Value::Int(1));
    }
}
