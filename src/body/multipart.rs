#![warn(missing_docs)]

//! The multipart/form-data parser. Splits the body along the declared
//! boundary, parses each part's headers, and separates text fields from
//! uploaded files. Per-file sizes are limited individually; the aggregate is
//! bounded by the body-size limit upstream.

use crate::error::HttpError;
use bytes::Bytes;
use serde_json::{Map, Value};

/// An uploaded file extracted from a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    /// The form field name the file was posted under.
    pub field: String,
    /// The client-supplied filename, if any.
    pub filename: Option<String>,
    /// The part's declared content type, if any.
    pub content_type: Option<String>,
    /// The file size in bytes.
    pub size: usize,
    /// The file bytes.
    pub data: Bytes,
}

/// Parses a multipart body given the full `Content-Type` header value.
pub(crate) fn parse(
    raw: &[u8],
    content_type: &str,
    max_file_size: usize,
) -> Result<(Value, Vec<FilePart>), HttpError> {
    let boundary = extract_boundary(content_type).ok_or_else(|| {
        HttpError::bad_request("Multipart body without a boundary parameter")
    })?;

    let delimiter = format!("--{}", boundary);
    let delimiter = delimiter.as_bytes();

    let mut fields = Map::new();
    let mut files = Vec::new();

    // Position after the first delimiter line.
    let mut pos = match find(raw, delimiter) {
        Some(i) => i + delimiter.len(),
        None => {
            return Err(HttpError::bad_request(
                "Multipart body does not contain its boundary",
            ))
        }
    };

    loop {
        // "--" after a delimiter closes the body.
        if raw[pos..].starts_with(b"--") {
            break;
        }
        if raw[pos..].starts_with(b"\r\n") {
            pos += 2;
        }

        let headers_end = match find(&raw[pos..], b"\r\n\r\n") {
            Some(i) => pos + i,
            None => return Err(HttpError::bad_request("Malformed multipart part headers")),
        };
        let headers = std::str::from_utf8(&raw[pos..headers_end])
            .map_err(|_| HttpError::bad_request("Multipart part headers are not valid UTF-8"))?;

        let content_start = headers_end + 4;
        let boundary_marker = [b"\r\n", delimiter].concat();
        let content_end = match find(&raw[content_start..], &boundary_marker) {
            Some(i) => content_start + i,
            None => return Err(HttpError::bad_request("Unterminated multipart part")),
        };
        let content = &raw[content_start..content_end];

        let part = parse_part_headers(headers);
        match part {
            PartHeaders {
                name: Some(name),
                filename: Some(filename),
                content_type,
            } => {
                if content.len() > max_file_size {
                    return Err(HttpError::payload_too_large(content.len(), max_file_size));
                }
                files.push(FilePart {
                    field: name,
                    filename: Some(filename),
                    content_type,
                    size: content.len(),
                    data: Bytes::copy_from_slice(content),
                });
            }
            PartHeaders {
                name: Some(name), ..
            } => {
                let value = String::from_utf8(content.to_vec()).map_err(|_| {
                    HttpError::bad_request(format!(
                        "Multipart field '{}' is not valid UTF-8",
                        name
                    ))
                })?;
                insert_field(&mut fields, name, value);
            }
            _ => {
                // A part without a field name carries nothing addressable.
            }
        }

        pos = content_end + boundary_marker.len();
    }

    Ok((Value::Object(fields), files))
}

struct PartHeaders {
    name: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
}

fn parse_part_headers(headers: &str) -> PartHeaders {
    let mut part = PartHeaders {
        name: None,
        filename: None,
        content_type: None,
    };

    for line in headers.lines() {
        let Some((header, rest)) = line.split_once(':') else {
            continue;
        };
        let header = header.trim();
        let rest = rest.trim();

        if header.eq_ignore_ascii_case("content-disposition") {
            for param in rest.split(';').map(str::trim).skip(1) {
                let Some((key, value)) = param.split_once('=') else {
                    continue;
                };
                let value = unquote(value.trim());
                match key.trim().to_ascii_lowercase().as_str() {
                    "name" if !value.is_empty() => part.name = Some(value),
                    "filename" if !value.is_empty() => part.filename = Some(value),
                    _ => {}
                }
            }
        } else if header.eq_ignore_ascii_case("content-type") {
            part.content_type = Some(rest.to_string());
        }
    }
    part
}

fn unquote(value: &str) -> String {
    value.trim_matches('"').to_string()
}

fn insert_field(fields: &mut Map<String, Value>, name: String, value: String) {
    match fields.get_mut(&name) {
        Some(Value::Array(values)) => values.push(Value::String(value)),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, Value::String(value)]);
        }
        None => {
            fields.insert(name, Value::String(value));
        }
    }
}

pub(crate) fn extract_boundary(content_type: &str) -> Option<String> {
    if let Ok(mime) = content_type.parse::<mime::Mime>() {
        if mime.type_() == mime::MULTIPART {
            if let Some(boundary) = mime.get_param(mime::BOUNDARY) {
                let b = boundary.as_str();
                if !b.is_empty() {
                    return Some(b.to_string());
                }
            }
        }
    }

    // Lenient fallback for header values the mime crate refuses.
    for part in content_type.split(';').map(str::trim) {
        if let Some((key, value)) = part.split_once('=') {
            if key.trim().eq_ignore_ascii_case("boundary") {
                let b = value.trim().trim_matches('"');
                if !b.is_empty() {
                    return Some(b.to_string());
                }
            }
        }
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    const BOUNDARY: &str = "----WebKitFormBoundary7MA4YWxkTrZu0gW";

    fn content_type() -> String {
        format!("multipart/form-data; boundary={}", BOUNDARY)
    }

    fn body(parts: &[(&str, Option<(&str, &str)>, &str)]) -> Vec<u8> {
        let mut out = String::new();
        for (name, file, content) in parts {
            out.push_str(&format!("--{}\r\n", BOUNDARY));
            match file {
                Some((filename, ct)) => {
                    out.push_str(&format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        name, filename
                    ));
                    out.push_str(&format!("Content-Type: {}\r\n", ct));
                }
                None => {
                    out.push_str(&format!(
                        "Content-Disposition: form-data; name=\"{}\"\r\n",
                        name
                    ));
                }
            }
            out.push_str("\r\n");
            out.push_str(content);
            out.push_str("\r\n");
        }
        out.push_str(&format!("--{}--\r\n", BOUNDARY));
        out.into_bytes()
    }

    #[test]
    fn parses_text_fields() {
        let raw = body(&[("name", None, "John Doe"), ("age", None, "30")]);
        let (fields, files) = parse(&raw, &content_type(), 1024).unwrap();
        assert_eq!(fields, json!({"name": "John Doe", "age": "30"}));
        assert!(files.is_empty());
    }

    #[test]
    fn parses_file_parts() {
        let raw = body(&[
            ("note", None, "see attachment"),
            ("upload", Some(("hello.txt", "text/plain")), "file content"),
        ]);
        let (fields, files) = parse(&raw, &content_type(), 1024).unwrap();
        assert_eq!(fields["note"], "see attachment");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].field, "upload");
        assert_eq!(files[0].filename.as_deref(), Some("hello.txt"));
        assert_eq!(files[0].content_type.as_deref(), Some("text/plain"));
        assert_eq!(files[0].size, 12);
        assert_eq!(&files[0].data[..], b"file content");
    }

    #[test]
    fn repeated_fields_accumulate() {
        let raw = body(&[("tag", None, "a"), ("tag", None, "b")]);
        let (fields, _) = parse(&raw, &content_type(), 1024).unwrap();
        assert_eq!(fields["tag"], json!(["a", "b"]));
    }

    #[test]
    fn file_over_limit_is_413() {
        let raw = body(&[("upload", Some(("big.bin", "application/octet-stream")), "0123456789")]);
        let err = parse(&raw, &content_type(), 5).unwrap_err();
        assert_eq!(err.status(), 413);
    }

    #[test]
    fn missing_boundary_is_400() {
        let err = parse(b"irrelevant", "multipart/form-data", 1024).unwrap_err();
        assert_eq!(err.status(), 400);
        assert!(err.message().contains("boundary"));
    }

    #[test]
    fn body_without_boundary_marker_is_400() {
        let err = parse(b"no markers here", &content_type(), 1024).unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn binary_file_content_survives() {
        let mut raw = Vec::new();
        raw.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        raw.extend_from_slice(
            b"Content-Disposition: form-data; name=\"f\"; filename=\"a.bin\"\r\n\r\n",
        );
        raw.extend_from_slice(&[0x00, 0xFF, 0x7F, 0x0A]);
        raw.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        let (_, files) = parse(&raw, &content_type(), 1024).unwrap();
        assert_eq!(&files[0].data[..], &[0x00, 0xFF, 0x7F, 0x0A]);
    }

    #[test]
    fn boundary_extraction_handles_quoting() {
        assert_eq!(
            extract_boundary("multipart/form-data; boundary=\"abc123\"").as_deref(),
            Some("abc123")
        );
        assert_eq!(
            extract_boundary("multipart/form-data; charset=utf-8; boundary=xyz").as_deref(),
            Some("xyz")
        );
        assert_eq!(extract_boundary("multipart/form-data"), None);
    }
}
