//! Defensive numeric coercion for telemetry payloads.
//!
//! The backend is inconsistent about numeric encoding: the same field may
//! arrive as a JSON number, a quoted string, null, or an empty string.
//! Everything funnels through here so LiveState only ever holds finite
//! numbers — unparsable input coerces to 0.0, never NaN.

use serde_json::Value;

/// Coerce a JSON value to f64. Null, missing, empty string and garbage all
/// yield 0.0; non-finite numbers are clamped to 0.0 as well.
pub fn to_f64(value: &Value) -> f64 {
    let n = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    };
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

/// Coerce a JSON value to i64 (timestamps, quantities).
pub fn to_i64(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or_else(|| to_f64(value) as i64),
        Value::String(s) => s.trim().parse::<i64>().unwrap_or(0),
        _ => 0,
    }
}

/// Read a numeric field that the backend serves under several names.
/// The first alias present in the object wins; absence yields None so the
/// caller can distinguish "not supplied" from an explicit zero.
pub fn field_f64(obj: &Value, aliases: &[&str]) -> Option<f64> {
    for key in aliases {
        if let Some(v) = obj.get(*key) {
            if !v.is_null() {
                return Some(to_f64(v));
            }
        }
    }
    None
}

/// Same alias lookup for string fields. Empty strings count as absent.
pub fn field_str(obj: &Value, aliases: &[&str]) -> Option<String> {
    for key in aliases {
        if let Some(s) = obj.get(*key).and_then(Value::as_str) {
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }
    None
}
