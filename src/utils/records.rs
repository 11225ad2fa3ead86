//! Flat key/value records for configs and register structs
//!
//! Nested tables are joined with `.`, list entries get `[index]` suffixes:
//! `harvester.voltage_mV`, `LUT_inp_efficiency_n8[3][7]`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{VsrcErrorBuilder, VsrcResult};

/// Flatten any serializable value into a sorted record
pub fn to_flat_record<T: Serialize>(value: &T) -> VsrcResult<BTreeMap<String, String>> {
    let json = serde_json::to_value(value)?;
    let mut record = BTreeMap::new();
    flatten_into(&mut record, String::new(), &json);
    Ok(record)
}

/// Rebuild a value from a record produced by [`to_flat_record`]
pub fn from_flat_record<T: DeserializeOwned>(record: &BTreeMap<String, String>) -> VsrcResult<T> {
    let mut root = Value::Object(Map::new());
    for (key, raw) in record {
        let path = parse_key(key).ok_or_else(|| {
            VsrcErrorBuilder::new("records", "from_flat_record")
                .invalid_data("record key", &format!("malformed key '{}'", key))
        })?;
        insert_path(&mut root, &path, parse_scalar(raw));
    }
    Ok(serde_json::from_value(root)?)
}

fn flatten_into(record: &mut BTreeMap<String, String>, prefix: String, value: &Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(record, path, child);
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                flatten_into(record, format!("{}[{}]", prefix, idx), child);
            }
        }
        Value::String(text) => {
            record.insert(prefix, text.clone());
        }
        Value::Null => {
            record.insert(prefix, String::new());
        }
        other => {
            record.insert(prefix, other.to_string());
        }
    }
}

#[derive(Debug, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn parse_key(key: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    for part in key.split('.') {
        let (name, mut rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if name.is_empty() {
            return None;
        }
        segments.push(Segment::Key(name.to_string()));
        while !rest.is_empty() {
            let close = rest.find(']')?;
            let index = rest.get(1..close)?.parse().ok()?;
            segments.push(Segment::Index(index));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return None;
            }
        }
    }
    Some(segments)
}

fn parse_scalar(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Number(_) | Value::Bool(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}

fn insert_path(node: &mut Value, path: &[Segment], leaf: Value) {
    let Some((head, tail)) = path.split_first() else {
        *node = leaf;
        return;
    };
    let child = match head {
        Segment::Key(key) => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            match node {
                Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
                _ => return,
            }
        }
        Segment::Index(index) => {
            if !node.is_array() {
                *node = Value::Array(Vec::new());
            }
            match node {
                Value::Array(items) => {
                    if items.len() <= *index {
                        items.resize(*index + 1, Value::Null);
                    }
                    &mut items[*index]
                }
                _ => return,
            }
        }
    };
    insert_path(child, tail, leaf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Inner {
        #[serde(rename = "V_mV")]
        v_mv: f64,
        table: [[u8; 2]; 2],
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Outer {
        name: String,
        enabled: bool,
        inner: Inner,
    }

    fn sample() -> Outer {
        Outer {
            name: "mppt_opt".to_string(),
            enabled: true,
            inner: Inner { v_mv: 2400.5, table: [[1, 2], [3, 4]] },
        }
    }

    #[test]
    fn test_flat_keys() {
        let record = to_flat_record(&sample()).unwrap();
        assert_eq!(record["name"], "mppt_opt");
        assert_eq!(record["enabled"], "true");
        assert_eq!(record["inner.V_mV"], "2400.5");
        assert_eq!(record["inner.table[1][0]"], "3");
        assert_eq!(record.len(), 7);
    }

    #[test]
    fn test_record_rebuilds_value() {
        let record = to_flat_record(&sample()).unwrap();
        let rebuilt: Outer = from_flat_record(&record).unwrap();
        assert_eq!(rebuilt, sample());
    }

    #[test]
    fn test_malformed_key_rejected() {
        let mut record = BTreeMap::new();
        record.insert("table[x]".to_string(), "1".to_string());
        assert!(from_flat_record::<Outer>(&record).is_err());
    }

    #[test]
    fn test_parse_key_segments() {
        assert_eq!(
            parse_key("a.b[2][3]").unwrap(),
            vec![
                Segment::Key("a".into()),
                Segment::Key("b".into()),
                Segment::Index(2),
                Segment::Index(3),
            ]
        );
        assert!(parse_key("a.[1]").is_none());
    }
}
