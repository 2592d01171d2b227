#[cfg(test)]
#[path = "canonical_json_test.rs"]
mod tests;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

use crate::domain::models::sha1_hex;

/// Renders a JSON value with object keys sorted by code point and array order
/// kept. Structurally equal values always render identically. Only used for
/// cache keys; requests go over the wire in their original field order.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    return out;
}

pub fn canonicalize_serializable<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)?;
    return Ok(canonicalize(&value));
}

/// Cache key for a request: sha1 of its canonical form.
pub fn cache_key<T: Serialize>(value: &T) -> Result<String> {
    return Ok(sha1_hex(&canonicalize_serializable(value)?));
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            // Rust strings compare bytewise, which for UTF-8 is code point order.
            let mut keys = map.keys().collect::<Vec<&String>>();
            keys.sort();

            out.push('{');
            for (idx, key) in keys.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.to_string()).to_string());
                out.push(':');
                write_value(&map[key.as_str()], out);
            }
            out.push('}');
        }
        primitive => {
            out.push_str(&primitive.to_string());
        }
    }
}
