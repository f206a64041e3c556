#![warn(missing_docs)]

//! The text body parser: charset-aware decoding with optional line-ending
//! normalization and trimming.

use crate::body::BodyParserOptions;
use crate::error::HttpError;

/// Decodes a text body using the charset declared in the content type
/// (UTF-8 when unspecified; Latin-1 and US-ASCII are also accepted).
pub(crate) fn parse(
    raw: &[u8],
    content_type: Option<&str>,
    options: &BodyParserOptions,
) -> Result<String, HttpError> {
    if raw.len() > options.max_text_length {
        return Err(HttpError::payload_too_large(raw.len(), options.max_text_length));
    }

    let charset = content_type
        .and_then(extract_charset)
        .unwrap_or_else(|| "utf-8".to_string());

    let mut text = decode(raw, &charset)?;

    if options.normalize_newlines {
        text = text.replace("\r\n", "\n").replace('\r', "\n");
    }
    if options.trim_text {
        text = text.trim().to_string();
    }
    Ok(text)
}

fn decode(raw: &[u8], charset: &str) -> Result<String, HttpError> {
    match charset {
        "utf-8" | "utf8" => String::from_utf8(raw.to_vec())
            .map_err(|e| HttpError::bad_request(format!("Body is not valid UTF-8: {}", e))),
        // Latin-1 bytes map 1:1 onto the first 256 code points.
        "iso-8859-1" | "latin-1" | "latin1" | "us-ascii" | "ascii" => {
            Ok(raw.iter().map(|&b| b as char).collect())
        }
        other => Err(HttpError::unsupported_media_type(format!(
            "Unsupported charset: {}",
            other
        ))),
    }
}

fn extract_charset(content_type: &str) -> Option<String> {
    if let Ok(mime) = content_type.parse::<mime::Mime>() {
        if let Some(charset) = mime.get_param(mime::CHARSET) {
            return Some(charset.as_str().to_ascii_lowercase());
        }
    }
    None
}
