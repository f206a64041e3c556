#![warn(missing_docs)]

//! # Smart Body Parser Module
//!
//! A content-type-dispatched body parser, packaged as a middleware factory in
//! [`body_parser`]. Exactly one parser runs per request, selected from the
//! `Content-Type` header (or sniffed from the first bytes when the header is
//! absent and auto-detection is enabled):
//!
//! - `application/json` and `application/*+json` → JSON
//! - `application/x-www-form-urlencoded` → URL-encoded
//! - `multipart/form-data` → multipart
//! - `text/*`, `application/xml`, `*+xml` → text
//! - anything else → raw bytes
//!
//! Reading honors the configured size limit (`413` on overflow, without
//! draining the remainder) and timeout (`408`). Parse failures map to `400`,
//! never `500`. Requests with methods GET, HEAD, or DELETE are skipped, as
//! are contexts whose body was already populated.
//!
//! ## Basic Usage
//!
//! ```
//! use nextrush::body::{body_parser, BodyParserOptions, ParserKind};
//! use nextrush::context::Context;
//! use nextrush::middleware::compose;
//! use nextrush::types::into_handler;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let parser = body_parser(BodyParserOptions::default());
//! let handler = into_handler(|ctx: Context| async move {
//!     let body = ctx.body.as_ref().unwrap();
//!     assert_eq!(body.kind(), ParserKind::Json);
//!     Ok(ctx)
//! });
//!
//! let mut ctx = Context::for_testing("POST", "/items");
//! ctx.req.set_header("content-type", "application/json");
//! ctx.req.set_body(r#"{"name":"widget"}"#);
//!
//! compose(vec![parser], Some(handler)).run(ctx).await.unwrap();
//! # }
//! ```

use crate::context::Context;
use crate::error::HttpError;
use crate::middleware::from_fn;
use crate::req::BodySource;
use crate::types::{HttpMethod, Middleware};
use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt;
use serde_json::Value;
use std::time::{Duration, Instant};

pub(crate) mod json;
pub(crate) mod multipart;
pub(crate) mod sniff;
pub(crate) mod text;
pub(crate) mod urlencoded;

pub use multipart::FilePart;

/// Which parser produced a [`BodyParseResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    /// The JSON parser.
    Json,
    /// The URL-encoded form parser.
    UrlEncoded,
    /// The multipart/form-data parser.
    Multipart,
    /// The text parser.
    Text,
    /// The raw bytes parser.
    Raw,
}

impl ParserKind {
    /// The parser's tag name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParserKind::Json => "json",
            ParserKind::UrlEncoded => "urlencoded",
            ParserKind::Multipart => "multipart",
            ParserKind::Text => "text",
            ParserKind::Raw => "raw",
        }
    }
}

/// The parsed body payload, tagged by the parser that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
    /// A parsed JSON document; empty input parses to `Null`.
    Json(Value),
    /// URL-encoded form data: a flat object whose repeated keys become
    /// arrays, or a nested tree in extended mode.
    UrlEncoded(Value),
    /// Multipart form data: text fields plus uploaded files.
    Multipart {
        /// Non-file fields, repeated keys as arrays.
        fields: Value,
        /// Uploaded file parts.
        files: Vec<FilePart>,
    },
    /// Decoded text.
    Text(String),
    /// Untouched bytes.
    Raw(Bytes),
}

impl ParsedBody {
    /// The tag of the parser that produced this payload.
    pub fn kind(&self) -> ParserKind {
        match self {
            ParsedBody::Json(_) => ParserKind::Json,
            ParsedBody::UrlEncoded(_) => ParserKind::UrlEncoded,
            ParsedBody::Multipart { .. } => ParserKind::Multipart,
            ParsedBody::Text(_) => ParserKind::Text,
            ParsedBody::Raw(_) => ParserKind::Raw,
        }
    }
}

/// The outcome of a successful body parse, stored on
/// [`Context::body`](crate::context::Context::body).
#[derive(Debug, Clone, PartialEq)]
pub struct BodyParseResult {
    /// The parsed payload.
    pub data: ParsedBody,
    /// The raw bytes that were read.
    pub raw: Bytes,
    /// `raw.len()`.
    pub size: usize,
    /// The effective content type (declared or sniffed).
    pub content_type: Option<String>,
    /// Whether any file parts were parsed.
    pub has_files: bool,
    /// Whether the body was empty.
    pub is_empty: bool,
    /// How long parsing took (excluding the read).
    pub parse_time: Duration,
}

impl BodyParseResult {
    /// The tag of the parser that produced this result.
    pub fn kind(&self) -> ParserKind {
        self.data.kind()
    }
}

/// Options for [`body_parser`].
#[derive(Debug, Clone)]
pub struct BodyParserOptions {
    /// Maximum body size in bytes; larger bodies abort with 413 as soon as
    /// the limit is crossed. Defaults to 1 MiB.
    pub max_body_size: usize,
    /// Maximum time to read the full body; slower reads abort with 408.
    /// Defaults to 30 s.
    pub timeout: Duration,
    /// Maximum JSON nesting depth; deeper documents are rejected with 400.
    /// Defaults to 32.
    pub max_json_depth: usize,
    /// Canonicalize ISO-8601 date strings inside parsed JSON to RFC 3339 UTC.
    /// Defaults to false.
    pub revive_dates: bool,
    /// Nest `a[b][c]=v` style keys in URL-encoded bodies. Defaults to false.
    pub extended_urlencoded: bool,
    /// Maximum decoded text length in bytes. Defaults to `max_body_size`.
    pub max_text_length: usize,
    /// Per-file size limit for multipart uploads; the aggregate is bounded by
    /// `max_body_size`. Defaults to 1 MiB.
    pub max_file_size: usize,
    /// Sniff the first bytes when `Content-Type` is absent. Defaults to true.
    pub auto_detect_content_type: bool,
    /// Normalize `\r\n` and `\r` to `\n` in text bodies. Defaults to false.
    pub normalize_newlines: bool,
    /// Trim surrounding whitespace from text bodies. Defaults to false.
    pub trim_text: bool,
}

impl Default for BodyParserOptions {
    fn default() -> Self {
        let max_body_size = 1024 * 1024;
        Self {
            max_body_size,
            timeout: Duration::from_secs(30),
            max_json_depth: 32,
            revive_dates: false,
            extended_urlencoded: false,
            max_text_length: max_body_size,
            max_file_size: 1024 * 1024,
            auto_detect_content_type: true,
            normalize_newlines: false,
            trim_text: false,
        }
    }
}

/// Builds the body-parser middleware.
///
/// The application installs one of these between the global middleware and
/// the router using limits derived from its configuration; install your own
/// earlier in the chain to override the behavior for specific routes.
pub fn body_parser(options: BodyParserOptions) -> Middleware {
    from_fn(move |mut ctx: Context, mut next| {
        let options = options.clone();
        async move {
            if matches!(
                ctx.req.method,
                HttpMethod::GET | HttpMethod::HEAD | HttpMethod::DELETE
            ) || ctx.body.is_some()
            {
                return next.run(ctx).await;
            }

            let raw = read_body(&mut ctx, &options).await?;

            if let Some(declared) = ctx.req.content_length {
                if declared != raw.len() as u64 {
                    return Err(HttpError::bad_request(format!(
                        "Content-Length mismatch: declared {}, read {}",
                        declared,
                        raw.len()
                    )));
                }
            }

            let declared_type = ctx.req.content_type().filter(|ct| !ct.is_empty());
            let full_header = ctx
                .req
                .get_header("content-type")
                .map(str::to_string);

            let (kind, effective_type) = match declared_type {
                Some(ct) => (select_parser(&ct), Some(ct)),
                None if options.auto_detect_content_type && !raw.is_empty() => {
                    let sniffed = sniff::sniff(&raw[..raw.len().min(512)]);
                    (sniffed.parser(), Some(sniffed.content_type().to_string()))
                }
                None => (ParserKind::Raw, None),
            };

            let started = Instant::now();
            let data = match kind {
                ParserKind::Json => ParsedBody::Json(json::parse(
                    &raw,
                    options.max_json_depth,
                    options.revive_dates,
                )?),
                ParserKind::UrlEncoded => ParsedBody::UrlEncoded(urlencoded::parse(
                    &raw,
                    options.extended_urlencoded,
                )?),
                ParserKind::Multipart => {
                    let header = full_header.as_deref().unwrap_or_default();
                    let (fields, files) =
                        multipart::parse(&raw, header, options.max_file_size)?;
                    ParsedBody::Multipart { fields, files }
                }
                ParserKind::Text => ParsedBody::Text(text::parse(
                    &raw,
                    full_header.as_deref(),
                    &options,
                )?),
                ParserKind::Raw => {
                    if raw.len() > options.max_body_size {
                        return Err(HttpError::payload_too_large(
                            raw.len(),
                            options.max_body_size,
                        ));
                    }
                    ParsedBody::Raw(raw.clone())
                }
            };

            let has_files = matches!(&data, ParsedBody::Multipart { files, .. } if !files.is_empty());
            ctx.body = Some(BodyParseResult {
                size: raw.len(),
                is_empty: raw.is_empty(),
                has_files,
                content_type: effective_type,
                parse_time: started.elapsed(),
                data,
                raw,
            });

            next.run(ctx).await
        }
    })
}

/// Applies the selection rules to the pre-`;` portion of a content type.
pub(crate) fn select_parser(content_type: &str) -> ParserKind {
    match content_type.parse::<mime::Mime>() {
        Ok(mime) => match (mime.type_(), mime.subtype()) {
            (mime::APPLICATION, mime::JSON) => ParserKind::Json,
            (mime::APPLICATION, subtype) if subtype.as_str().ends_with("+json") => {
                ParserKind::Json
            }
            (mime::APPLICATION, subtype) if subtype == "x-www-form-urlencoded" => {
                ParserKind::UrlEncoded
            }
            (mime::MULTIPART, subtype) if subtype == "form-data" => ParserKind::Multipart,
            (mime::TEXT, _) => ParserKind::Text,
            (mime::APPLICATION, subtype)
                if subtype == "xml" || subtype.as_str().ends_with("+xml") =>
            {
                ParserKind::Text
            }
            _ => ParserKind::Raw,
        },
        Err(_) => ParserKind::Raw,
    }
}

// Streams the body in with the size limit enforced per chunk, so oversize
// payloads abort without draining the remainder, and the whole read bounded
// by the timeout.
async fn read_body(ctx: &mut Context, options: &BodyParserOptions) -> Result<Bytes, HttpError> {
    match ctx.req.take_body() {
        BodySource::Buffered(bytes) => {
            if bytes.len() > options.max_body_size {
                return Err(HttpError::payload_too_large(
                    bytes.len(),
                    options.max_body_size,
                ));
            }
            Ok(bytes)
        }
        BodySource::Taken => Ok(Bytes::new()),
        BodySource::Stream(mut incoming) => {
            let max = options.max_body_size;
            let read = async move {
                let mut buf = BytesMut::new();
                while let Some(frame) = incoming.frame().await {
                    let frame = frame
                        .map_err(|e| HttpError::bad_request(format!("Body read failed: {}", e)))?;
                    if let Ok(data) = frame.into_data() {
                        if buf.len() + data.len() > max {
                            return Err(HttpError::payload_too_large(buf.len() + data.len(), max));
                        }
                        buf.extend_from_slice(&data);
                    }
                }
                Ok(buf.freeze())
            };
            match tokio::time::timeout(options.timeout, read).await {
                Ok(result) => result,
                Err(_) => Err(HttpError::request_timeout(
                    "Timed out reading the request body",
                )),
            }
        }
    }
}
