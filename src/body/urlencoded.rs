#![warn(missing_docs)]

//! The URL-encoded form parser. Flat mode produces an object whose repeated
//! keys accumulate into arrays; extended mode additionally nests
//! `a[b][c]=v` style keys into a tree.

use crate::error::HttpError;
use serde_json::{Map, Value};

/// Parses an `application/x-www-form-urlencoded` body.
pub(crate) fn parse(raw: &[u8], extended: bool) -> Result<Value, HttpError> {
    let mut root = Value::Object(Map::new());

    for (key, value) in url::form_urlencoded::parse(raw) {
        let key = key.into_owned();
        let value = Value::String(value.into_owned());
        if extended {
            insert_nested(&mut root, &key, value)?;
        } else {
            insert_flat(&mut root, key, value);
        }
    }

    Ok(root)
}

// Repeated keys become an ordered sequence of values.
fn insert_flat(root: &mut Value, key: String, value: Value) {
    let map = root.as_object_mut().expect("root is an object");
    match map.get_mut(&key) {
        Some(Value::Array(values)) => values.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(key, value);
        }
    }
}

// "a[b][c]" walks/creates objects along a.b, assigning at c; a trailing "[]"
// pushes onto an array.
fn insert_nested(root: &mut Value, key: &str, value: Value) -> Result<(), HttpError> {
    let (head, brackets) = match key.find('[') {
        Some(i) => (&key[..i], &key[i..]),
        None => {
            insert_flat(root, key.to_string(), value);
            return Ok(());
        }
    };

    let mut path = vec![head.to_string()];
    let mut rest = brackets;
    while !rest.is_empty() {
        let close = rest.find(']').ok_or_else(|| {
            HttpError::bad_request(format!("Unbalanced brackets in form key '{}'", key))
        })?;
        if !rest.starts_with('[') {
            return Err(HttpError::bad_request(format!(
                "Malformed form key '{}'",
                key
            )));
        }
        path.push(rest[1..close].to_string());
        rest = &rest[close + 1..];
    }

    assign_path(root, &path, value);
    Ok(())
}

fn assign_path(cursor: &mut Value, path: &[String], value: Value) {
    let (segment, rest) = match path.split_first() {
        Some(split) => split,
        None => return,
    };

    if segment.is_empty() {
        // "[]" pushes into an array at this position.
        if !cursor.is_array() {
            *cursor = Value::Array(Vec::new());
        }
        let array = cursor.as_array_mut().expect("just coerced to array");
        if rest.is_empty() {
            array.push(value);
        } else {
            array.push(Value::Object(Map::new()));
            assign_path(array.last_mut().expect("just pushed"), rest, value);
        }
    } else {
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        let map = cursor.as_object_mut().expect("just coerced to object");
        if rest.is_empty() {
            insert_flat_into(map, segment.clone(), value);
        } else {
            let next = map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            assign_path(next, rest, value);
        }
    }
}

fn insert_flat_into(map: &mut Map<String, Value>, key: String, value: Value) {
    match map.get_mut(&key) {
        Some(Value::Array(values)) => values.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(key, value);
        }
    }
}

/// Encodes a flat object back to the wire form, for round-trip checks and
/// redirects that carry form state.
#[allow(dead_code)]
pub(crate) fn encode(value: &Value) -> String {
    let mut ser = url::form_urlencoded::Serializer::new(String::new());
    if let Some(map) = value.as_object() {
        for (key, entry) in map {
            match entry {
                Value::Array(values) => {
                    for v in values {
                        ser.append_pair(key, v.as_str().unwrap_or_default());
                    }
                }
                other => {
                    ser.append_pair(key, other.as_str().unwrap_or_default());
                }
            }
        }
    }
    ser.finish()
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn flat_pairs_decode() {
        let value = parse(b"name=widget&qty=2", false).unwrap();
        assert_eq!(value, json!({"name": "widget", "qty": "2"}));
    }

    #[test]
    fn repeated_keys_accumulate_in_order() {
        let value = parse(b"tag=a&tag=b&tag=c", false).unwrap();
        assert_eq!(value["tag"], json!(["a", "b", "c"]));
    }

    #[test]
    fn percent_and_plus_decode() {
        let value = parse(b"q=hello+world&sym=%26%3D%25%2B", false).unwrap();
        assert_eq!(value["q"], "hello world");
        assert_eq!(value["sym"], "&=%+");
    }

    #[test]
    fn round_trip_with_reserved_characters() {
        let original = json!({"a&b": "1=2", "p": "100%+", "multi": ["x&", "=y"]});
        let encoded = encode(&original);
        let reparsed = parse(encoded.as_bytes(), false).unwrap();
        assert_eq!(reparsed, original);
    }

    #[test]
    fn value_without_equals_is_empty_string() {
        let value = parse(b"flag&x=1", false).unwrap();
        assert_eq!(value["flag"], "");
        assert_eq!(value["x"], "1");
    }

    #[test]
    fn extended_mode_nests_bracketed_keys() {
        let value = parse(b"user[name]=jane&user[address][city]=oslo", true).unwrap();
        assert_eq!(
            value,
            json!({"user": {"name": "jane", "address": {"city": "oslo"}}})
        );
    }

    #[test]
    fn extended_mode_supports_array_push() {
        let value = parse(b"items[]=a&items[]=b", true).unwrap();
        assert_eq!(value["items"], json!(["a", "b"]));
    }

    #[test]
    fn extended_mode_rejects_unbalanced_brackets() {
        let err = parse(b"user[name=jane", true).unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn flat_mode_leaves_brackets_alone() {
        let value = parse(b"user%5Bname%5D=jane", false).unwrap();
        assert_eq!(value["user[name]"], "jane");
    }
}
