use concord_types::{ConcordError, Result};
use serde_json::Value;

/// Produce a deterministic canonical JSON representation.
///
/// Rules:
/// - Object keys sorted lexicographically by UTF-8 bytes
/// - Compact: no whitespace between tokens
/// - Strings escaped as serde_json escapes them
/// - Null values included
///
/// Every signing payload in this crate goes through here, so any port that
/// wants to verify our signatures must reproduce these bytes exactly.
pub fn canonicalize(value: &Value) -> Result<String> {
    let mut out = String::new();
    write_value(value, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out)?,
        Value::Array(arr) => {
            out.push('[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out)?;
                out.push(':');
                write_value(val, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_string(s: &str, out: &mut String) -> Result<()> {
    let escaped =
        serde_json::to_string(s).map_err(|e| ConcordError::Serialization(e.to_string()))?;
    out.push_str(&escaped);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_sorted() {
        let val = json!({"z": 1, "a": 2, "m": 3});
        assert_eq!(canonicalize(&val).unwrap(), r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn nested_objects_sorted() {
        let val = json!({"b": {"z": 1, "a": 2}, "a": [true, null, "x"]});
        assert_eq!(
            canonicalize(&val).unwrap(),
            r#"{"a":[true,null,"x"],"b":{"a":2,"z":1}}"#
        );
    }

    #[test]
    fn strings_escaped() {
        let val = json!({"name": "Ada \"the\" agent\n"});
        assert_eq!(
            canonicalize(&val).unwrap(),
            r#"{"name":"Ada \"the\" agent\n"}"#
        );
    }

    #[test]
    fn insertion_order_irrelevant() {
        let a = json!({"id": "x", "name": "y"});
        let b = json!({"name": "y", "id": "x"});
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
    }
}
