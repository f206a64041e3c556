#![warn(missing_docs)]

//! # HTTP Request Module
//!
//! This module provides the [`HttpRequest`] struct: the parsed, immutable view
//! of an incoming request that every [`Context`](crate::context::Context)
//! carries. It exposes the request line, headers, cookies, query parameters,
//! and client information (IP, protocol, host), and owns the not-yet-read body
//! stream that the body parser middleware consumes.
//!
//! Forwarded headers (`X-Forwarded-For`, `X-Forwarded-Proto`) are honored only
//! when the application was configured with `trust_proxy = true`; otherwise
//! the peer address and plain `http` are reported.
//!
//! ## Basic Usage
//!
//! ```
//! use nextrush::req::HttpRequest;
//!
//! let mut req = HttpRequest::new();
//! req.set_path("/users/42");
//! req.set_header("x-requested-with", "XMLHttpRequest");
//! assert_eq!(req.path, "/users/42");
//! assert!(req.is_xhr());
//! ```

use crate::req::headers::RequestHeaders;
use crate::req::query_params::QueryParams;
use crate::types::HttpMethod;
use ahash::AHashMap;
use bytes::Bytes;
use std::net::SocketAddr;

/// Case-insensitive request header map.
pub mod headers;

/// Query string parsing with repeated-key support.
pub mod query_params;

/// Where the request body currently lives.
///
/// The listener hands the context a lazily-read hyper stream; the body parser
/// middleware takes it, reads it under the configured limits, and leaves
/// `Taken` behind. Tests construct requests with `Buffered` bytes.
pub(crate) enum BodySource {
    /// The body is an unread hyper stream.
    Stream(hyper::body::Incoming),
    /// The body is already in memory (tests, small replays).
    Buffered(Bytes),
    /// The body was consumed by the body parser.
    Taken,
}

impl std::fmt::Debug for BodySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BodySource::Stream(_) => write!(f, "Stream(..)"),
            BodySource::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            BodySource::Taken => write!(f, "Taken"),
        }
    }
}

/// Represents an incoming HTTP request.
///
/// Built by the context factory from the raw hyper request plus the peer
/// address and the application's proxy-trust setting. All fields are parsed
/// once up front; the body remains a stream until the body parser runs.
#[derive(Debug)]
pub struct HttpRequest {
    /// The request method.
    pub method: HttpMethod,

    /// The full original request target, including the query string.
    pub url: String,

    /// The decoded path component.
    pub path: String,

    /// Parsed query parameters.
    pub query: QueryParams,

    /// Request headers, case-insensitive.
    pub headers: RequestHeaders,

    /// The client IP address. With `trust_proxy`, the first entry of
    /// `X-Forwarded-For`; otherwise the peer address.
    pub ip: String,

    /// `"http"` or `"https"`. With `trust_proxy`, derived from
    /// `X-Forwarded-Proto`.
    pub protocol: String,

    /// The host the request was addressed to, from the `Host` header.
    pub host: String,

    // Parsed from the Cookie header.
    pub(crate) cookies: AHashMap<String, String>,

    // Declared Content-Length, if the header was present and numeric.
    pub(crate) content_length: Option<u64>,

    pub(crate) body: BodySource,
}

impl HttpRequest {
    /// Creates an empty `GET /` request with a buffered empty body.
    ///
    /// Intended for tests and middleware exercises; real requests are built by
    /// the server from the wire.
    pub fn new() -> Self {
        Self {
            method: HttpMethod::GET,
            url: "/".to_string(),
            path: "/".to_string(),
            query: QueryParams::new(),
            headers: RequestHeaders::new(),
            ip: "127.0.0.1".to_string(),
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            cookies: AHashMap::new(),
            content_length: None,
            body: BodySource::Buffered(Bytes::new()),
        }
    }

    /// Builds the request from hyper parts, the peer address, and the
    /// proxy-trust setting. This is the context factory's request half.
    pub(crate) fn from_hyper(
        parts: &hyper::http::request::Parts,
        body: hyper::body::Incoming,
        peer: SocketAddr,
        trust_proxy: bool,
    ) -> Result<Self, crate::error::HttpError> {
        Self::from_head(
            &parts.method,
            &parts.uri,
            &parts.headers,
            peer,
            trust_proxy,
            BodySource::Stream(body),
        )
    }

    // The shared request-head parse, also used for upgrade requests whose
    // body never materializes.
    pub(crate) fn from_head(
        method: &hyper::Method,
        uri: &hyper::Uri,
        hyper_headers: &hyper::HeaderMap,
        peer: SocketAddr,
        trust_proxy: bool,
        body: BodySource,
    ) -> Result<Self, crate::error::HttpError> {
        let method = HttpMethod::from_hyper(method)?;
        let headers = RequestHeaders::from_hyper(hyper_headers);

        let url = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let path = uri.path().to_string();
        let query = uri.query().map(QueryParams::parse).unwrap_or_default();

        let ip = if trust_proxy {
            headers
                .get("x-forwarded-for")
                .and_then(|v| v.split(',').next())
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|| peer.ip().to_string())
        } else {
            peer.ip().to_string()
        };

        let protocol = if trust_proxy {
            headers
                .get("x-forwarded-proto")
                .map(|v| v.trim().to_ascii_lowercase())
                .unwrap_or_else(|| "http".to_string())
        } else {
            "http".to_string()
        };

        let host = headers
            .get("host")
            .unwrap_or("localhost")
            .to_string();

        let cookies = headers
            .get("cookie")
            .map(parse_cookie_header)
            .unwrap_or_default();

        let content_length = headers
            .get("content-length")
            .and_then(|v| v.trim().parse::<u64>().ok());

        Ok(Self {
            method,
            url,
            path,
            query,
            headers,
            ip,
            protocol,
            host,
            cookies,
            content_length,
            body,
        })
    }

    /// Returns a cookie value by name.
    pub fn get_cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Returns a header value by case-insensitive name.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// The `Content-Type` header up to the first `;`, lowercased and trimmed.
    pub fn content_type(&self) -> Option<String> {
        self.headers
            .get("content-type")
            .map(|v| v.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
    }

    /// Whether the request was made over HTTPS (only knowable behind a
    /// trusted proxy; the listener itself does not terminate TLS).
    pub fn is_secure(&self) -> bool {
        self.protocol == "https"
    }

    /// Whether the request looks like an AJAX request
    /// (`X-Requested-With: XMLHttpRequest`).
    pub fn is_xhr(&self) -> bool {
        self.headers
            .get("x-requested-with")
            .map(|v| v.eq_ignore_ascii_case("xmlhttprequest"))
            .unwrap_or(false)
    }

    /// Takes the body out of the request, leaving `Taken` behind.
    pub(crate) fn take_body(&mut self) -> BodySource {
        std::mem::replace(&mut self.body, BodySource::Taken)
    }

    // Test/builder helpers, mirroring how the server populates the fields.

    /// Sets the method (test/builder helper).
    pub fn set_method(&mut self, method: HttpMethod) -> &mut Self {
        self.method = method;
        self
    }

    /// Sets the path and url (test/builder helper).
    pub fn set_path(&mut self, path: &str) -> &mut Self {
        self.path = path.to_string();
        self.url = path.to_string();
        self
    }

    /// Sets the query string (test/builder helper).
    pub fn set_query(&mut self, query: &str) -> &mut Self {
        self.query = QueryParams::parse(query);
        self.url = format!("{}?{}", self.path, query);
        self
    }

    /// Sets a header (test/builder helper).
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers.insert(name, value);
        if name.eq_ignore_ascii_case("cookie") {
            self.cookies = parse_cookie_header(value);
        }
        if name.eq_ignore_ascii_case("content-length") {
            self.content_length = value.trim().parse().ok();
        }
        self
    }

    /// Buffers the given bytes as the request body (test/builder helper).
    pub fn set_body<B: Into<Bytes>>(&mut self, body: B) -> &mut Self {
        self.body = BodySource::Buffered(body.into());
        self
    }
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_cookie_header(value: &str) -> AHashMap<String, String> {
    let mut cookies = AHashMap::new();
    for parsed in cookie::Cookie::split_parse(value.to_string()).flatten() {
        cookies.insert(parsed.name().to_string(), parsed.value().to_string());
    }
    cookies
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cookie_header_is_parsed() {
        let mut req = HttpRequest::new();
        req.set_header("cookie", "session=abc123; theme=dark");
        assert_eq!(req.get_cookie("session"), Some("abc123"));
        assert_eq!(req.get_cookie("theme"), Some("dark"));
        assert_eq!(req.get_cookie("missing"), None);
    }

    #[test]
    fn content_type_strips_parameters() {
        let mut req = HttpRequest::new();
        req.set_header("content-type", "Application/JSON; charset=utf-8");
        assert_eq!(req.content_type().as_deref(), Some("application/json"));
    }

    #[test]
    fn xhr_detection() {
        let mut req = HttpRequest::new();
        assert!(!req.is_xhr());
        req.set_header("x-requested-with", "xmlhttprequest");
        assert!(req.is_xhr());
    }
}
