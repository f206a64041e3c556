#![warn(missing_docs)]

//! The JSON body parser: a cheap structural pre-check, a depth guard, and a
//! `serde_json` parse, with an optional date reviver.

use crate::error::HttpError;
use serde_json::Value;

/// Parses JSON bytes. Empty input maps to `Null`; documents nested deeper
/// than `max_depth` are rejected with 400 regardless of well-formedness.
pub(crate) fn parse(raw: &[u8], max_depth: usize, revive_dates: bool) -> Result<Value, HttpError> {
    let trimmed = trim_ascii_whitespace(raw);
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }

    check_outer_shape(trimmed)?;
    check_depth(trimmed, max_depth)?;

    let mut value: Value = serde_json::from_slice(trimmed)
        .map_err(|e| HttpError::bad_request(format!("Invalid JSON: {}", e)))?;

    if revive_dates {
        revive(&mut value);
    }
    Ok(value)
}

fn trim_ascii_whitespace(raw: &[u8]) -> &[u8] {
    let start = raw
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(raw.len());
    let end = raw
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start);
    &raw[start..end]
}

// Rejects inputs whose first/last non-whitespace bytes cannot form a valid
// JSON outer shape, before spending a full parse on them.
fn check_outer_shape(trimmed: &[u8]) -> Result<(), HttpError> {
    let first = trimmed[0];
    let last = trimmed[trimmed.len() - 1];

    let ok = match first {
        b'{' => last == b'}',
        b'[' => last == b']',
        b'"' => last == b'"' && trimmed.len() >= 2,
        b't' | b'f' | b'n' | b'-' | b'0'..=b'9' => true,
        _ => false,
    };

    if ok {
        Ok(())
    } else {
        Err(HttpError::validation(
            "Invalid JSON: input does not form a JSON value",
        ))
    }
}

// Scans nesting depth while tracking string/escape state, so brackets inside
// string literals are not counted.
fn check_depth(raw: &[u8], max_depth: usize) -> Result<(), HttpError> {
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for &b in raw {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                if depth > max_depth {
                    return Err(HttpError::validation(format!(
                        "JSON nested deeper than {} levels",
                        max_depth
                    )));
                }
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

// Canonicalizes ISO-8601 strings to RFC 3339 UTC in place. JSON has no date
// type, so revived dates stay strings in a normalized form.
fn revive(value: &mut Value) {
    match value {
        Value::String(s) => {
            if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(s) {
                *s = parsed
                    .with_timezone(&chrono::Utc)
                    .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
            }
        }
        Value::Array(items) => {
            for item in items {
                revive(item);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                revive(item);
            }
        }
        _ => {}
    }
}
