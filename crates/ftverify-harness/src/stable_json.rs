//! Canonical JSON.
//!
//! Object keys are sorted lexicographically (by UTF-8 bytes) at every depth,
//! arrays keep their order, and any value stored under a normalized key is
//! replaced by [`NORMALIZED`] before encoding. Sorting happens here rather
//! than relying on `serde_json`'s map representation, so the output does
//! not change if a dependency enables `preserve_order`.

use serde::Serialize;
use serde_json::Value;

use crate::Result;

/// Sentinel substituted for normalized values.
pub const NORMALIZED: &str = "<NORMALIZED>";

/// Replace values under any key in `fields`, at any depth.
///
/// A replaced subtree is not descended into.
pub fn normalize<S: AsRef<str>>(value: &Value, fields: &[S]) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, child) in map {
                let replaced = if fields.iter().any(|f| f.as_ref() == key) {
                    Value::String(NORMALIZED.to_owned())
                } else {
                    normalize(child, fields)
                };
                out.insert(key.clone(), replaced);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| normalize(v, fields)).collect()),
        other => other.clone(),
    }
}

/// Compact canonical encoding of `value` with `fields` normalized.
///
/// # Errors
///
/// Returns [`crate::HarnessError::Serialization`] if `value` cannot be
/// represented as JSON (for example a map with non-string keys).
pub fn stable_to_string<T, S>(value: &T, fields: &[S]) -> Result<String>
where
    T: Serialize + ?Sized,
    S: AsRef<str>,
{
    let tree = normalize(&serde_json::to_value(value)?, fields);
    let mut out = String::new();
    write_compact(&mut out, &tree)?;
    Ok(out)
}

/// Indented canonical encoding, for human-facing artifacts.
///
/// # Errors
///
/// Same as [`stable_to_string`].
pub fn stable_to_string_pretty<T, S>(value: &T, fields: &[S]) -> Result<String>
where
    T: Serialize + ?Sized,
    S: AsRef<str>,
{
    let tree = sort_keys(&normalize(&serde_json::to_value(value)?, fields));
    Ok(serde_json::to_string_pretty(&SortedValue(&tree))?)
}

fn write_compact(out: &mut String, value: &Value) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                if let Some(child) = map.get(*key) {
                    write_compact(out, child)?;
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_compact(out, item)?;
            }
            out.push(']');
        }
        scalar => {
            out.push_str(&serde_json::to_string(scalar)?);
        }
    }
    Ok(())
}

/// Keys sorted into a vector of pairs, so pretty-printing keeps the order
/// regardless of the map representation.
enum Sorted {
    Object(Vec<(String, Sorted)>),
    Array(Vec<Sorted>),
    Scalar(Value),
}

fn sort_keys(value: &Value) -> Sorted {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Sorted)> = map
                .iter()
                .map(|(k, v)| (k.clone(), sort_keys(v)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Sorted::Object(entries)
        }
        Value::Array(items) => Sorted::Array(items.iter().map(sort_keys).collect()),
        scalar => Sorted::Scalar(scalar.clone()),
    }
}

struct SortedValue<'a>(&'a Sorted);

impl Serialize for SortedValue<'_> {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::{SerializeMap, SerializeSeq};
        match self.0 {
            Sorted::Object(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, &SortedValue(v))?;
                }
                map.end()
            }
            Sorted::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&SortedValue(item))?;
                }
                seq.end()
            }
            Sorted::Scalar(v) => v.serialize(serializer),
        }
    }
}
