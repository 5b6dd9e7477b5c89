//! Lenient readers for collaborator payloads.
//!
//! Collaborator output is untrusted: numbers may arrive as strings, lists may be
//! missing or hold junk. These helpers never fail, they return `None` or skip.

use serde_json::Value;

/// Reads a finite number from a JSON number or a numeric string.
pub fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Reads a list of numbers. Unreadable entries become `None` so positions are kept.
pub fn numbers(value: Option<&Value>) -> Vec<Option<f64>> {
    match value {
        Some(Value::Array(items)) => items.iter().map(number).collect(),
        _ => Vec::new(),
    }
}

/// Reads a string, accepting numbers and booleans by their textual form.
pub fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn texts(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(|v| text(Some(v))).collect(),
        _ => Vec::new(),
    }
}

pub fn boolean(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_keep_positions_of_junk() {
        let v = json!([1.5, "2", "n/a", null, 4]);
        assert_eq!(
            numbers(Some(&v)),
            vec![Some(1.5), Some(2.0), None, None, Some(4.0)]
        );
        assert!(numbers(None).is_empty());
        assert!(numbers(Some(&json!("oops"))).is_empty());
    }

    #[test]
    fn number_rejects_non_finite_text() {
        assert_eq!(number(&json!("NaN")), None);
        assert_eq!(number(&json!("inf")), None);
        assert_eq!(number(&json!(" 3.25 ")), Some(3.25));
    }

    #[test]
    fn boolean_accepts_common_spellings() {
        assert_eq!(boolean(Some(&json!("Yes"))), Some(true));
        assert_eq!(boolean(Some(&json!(0))), Some(false));
        assert_eq!(boolean(Some(&json!([]))), None);
    }
}
