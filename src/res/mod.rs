#![warn(missing_docs)]

//! # HTTP Response Module
//!
//! This module provides the [`HttpResponse`] struct: the buffered, mutable
//! response every [`Context`](crate::context::Context) carries. Status,
//! headers, and cookies are buffered until the application flushes the
//! response after the pipeline finishes; once the body has been written,
//! further header mutation fails with an `Internal` error.
//!
//! ## Basic Usage
//!
//! ```
//! use nextrush::res::HttpResponse;
//!
//! let mut res = HttpResponse::new();
//! res.set_status(201);
//! res.set_header("x-request-id", "abc-123").unwrap();
//! res.write_text("Created");
//!
//! assert_eq!(res.status(), 201);
//! assert_eq!(res.body_text(), "Created");
//!
//! // Headers are frozen once the body is written.
//! assert!(res.set_header("x-too-late", "1").is_err());
//! ```

use crate::error::HttpError;
use crate::res::headers::ResponseHeaders;
use bytes::Bytes;
use http_body_util::Full;
use serde_json::Value;

/// Ordered, case-insensitive response header buffer.
pub mod headers;

/// Options applied when setting a response cookie.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CookieOptions {
    /// Marks the cookie `HttpOnly`.
    pub http_only: bool,
    /// Marks the cookie `Secure`.
    pub secure: bool,
    /// The `SameSite` attribute.
    pub same_site: Option<SameSite>,
    /// The cookie `Path`; defaults to `/` when unset.
    pub path: Option<String>,
    /// The cookie `Domain`.
    pub domain: Option<String>,
    /// `Max-Age` in seconds.
    pub max_age: Option<i64>,
}

/// The `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    /// `SameSite=Strict`
    Strict,
    /// `SameSite=Lax`
    Lax,
    /// `SameSite=None`
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ResponseBody {
    Empty,
    Text(String),
    Html(String),
    Json(Value),
    Csv(String),
    Xml(String),
    Binary(Bytes),
}

impl ResponseBody {
    fn content_type(&self) -> Option<&'static str> {
        match self {
            ResponseBody::Empty => None,
            ResponseBody::Text(_) => Some("text/plain; charset=utf-8"),
            ResponseBody::Html(_) => Some("text/html; charset=utf-8"),
            ResponseBody::Json(_) => Some("application/json"),
            ResponseBody::Csv(_) => Some("text/csv; charset=utf-8"),
            ResponseBody::Xml(_) => Some("application/xml"),
            ResponseBody::Binary(_) => Some("application/octet-stream"),
        }
    }

    fn into_bytes(self) -> Bytes {
        match self {
            ResponseBody::Empty => Bytes::new(),
            ResponseBody::Text(s) | ResponseBody::Html(s) | ResponseBody::Csv(s)
            | ResponseBody::Xml(s) => Bytes::from(s),
            ResponseBody::Json(v) => Bytes::from(serde_json::to_vec(&v).unwrap_or_default()),
            ResponseBody::Binary(b) => b,
        }
    }
}

/// Represents the HTTP response being built for the client.
///
/// The response buffers everything; the application converts it to a hyper
/// response once the pipeline completes. A handler that writes nothing
/// produces `204 No Content`.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: u16,
    status_explicit: bool,
    headers: ResponseHeaders,
    cookies: Vec<(String, String, CookieOptions)>,
    clear_cookies: Vec<String>,
    body: ResponseBody,
    written: bool,
}

impl HttpResponse {
    /// Creates an empty 200 response with no body written.
    pub fn new() -> Self {
        Self {
            status: 200,
            status_explicit: false,
            headers: ResponseHeaders::new(),
            cookies: Vec::new(),
            clear_cookies: Vec::new(),
            body: ResponseBody::Empty,
            written: false,
        }
    }

    /// Sets the response status.
    pub fn set_status(&mut self, code: u16) -> &mut Self {
        self.status = code;
        self.status_explicit = true;
        self
    }

    /// The currently buffered status.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Sets a header. Fails with an `Internal` error once the body has been
    /// written; header changes must precede the first body byte.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<&mut Self, HttpError> {
        if self.written {
            return Err(HttpError::internal(format!(
                "Cannot set header '{}': response body already written",
                name
            )));
        }
        self.headers.set(name, value);
        Ok(self)
    }

    // Unguarded header write for the exception filters, which replace the
    // response wholesale.
    pub(crate) fn set_raw_header(&mut self, name: &str, value: String) {
        self.headers.set(name, &value);
    }

    /// Returns a buffered header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Read access to all buffered headers.
    pub fn headers(&self) -> &ResponseHeaders {
        &self.headers
    }

    /// Buffers a cookie to be set on the response.
    pub fn set_cookie(&mut self, name: &str, value: &str, options: Option<CookieOptions>) -> &mut Self {
        self.cookies
            .push((name.to_string(), value.to_string(), options.unwrap_or_default()));
        self
    }

    /// Buffers a cookie removal (expired `Set-Cookie`).
    pub fn clear_cookie(&mut self, name: &str) -> &mut Self {
        self.clear_cookies.push(name.to_string());
        self
    }

    /// Writes a plain-text body.
    pub fn write_text<T: Into<String>>(&mut self, text: T) -> &mut Self {
        self.body = ResponseBody::Text(text.into());
        self.written = true;
        self
    }

    /// Writes an HTML body.
    pub fn write_html<T: Into<String>>(&mut self, html: T) -> &mut Self {
        self.body = ResponseBody::Html(html.into());
        self.written = true;
        self
    }

    /// Writes a JSON body from an already-serialized value.
    pub fn write_json(&mut self, value: Value) -> &mut Self {
        self.body = ResponseBody::Json(value);
        self.written = true;
        self
    }

    /// Writes a CSV body.
    pub fn write_csv<T: Into<String>>(&mut self, csv: T) -> &mut Self {
        self.body = ResponseBody::Csv(csv.into());
        self.written = true;
        self
    }

    /// Writes an XML body.
    pub fn write_xml<T: Into<String>>(&mut self, xml: T) -> &mut Self {
        self.body = ResponseBody::Xml(xml.into());
        self.written = true;
        self
    }

    /// Writes a binary body.
    pub fn write_bytes<B: Into<Bytes>>(&mut self, bytes: B) -> &mut Self {
        self.body = ResponseBody::Binary(bytes.into());
        self.written = true;
        self
    }

    /// Whether a body has been written.
    pub fn is_written(&self) -> bool {
        self.written
    }

    /// Whether the status was set explicitly.
    pub(crate) fn has_explicit_status(&self) -> bool {
        self.status_explicit
    }

    /// The body rendered as text (lossy for binary bodies).
    pub fn body_text(&self) -> String {
        match &self.body {
            ResponseBody::Empty => String::new(),
            ResponseBody::Text(s) | ResponseBody::Html(s) | ResponseBody::Csv(s)
            | ResponseBody::Xml(s) => s.clone(),
            ResponseBody::Json(v) => serde_json::to_string(v).unwrap_or_default(),
            ResponseBody::Binary(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    /// The body as a JSON value, when a JSON body was written.
    pub fn body_json(&self) -> Option<Value> {
        match &self.body {
            ResponseBody::Json(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Converts the buffered response into a hyper response.
    ///
    /// A response whose handler wrote neither a body nor an explicit status
    /// flushes as `204 No Content`.
    pub(crate) fn into_hyper(self) -> hyper::Response<Full<Bytes>> {
        let status = if self.written || self.status_explicit {
            self.status
        } else {
            204
        };

        let mut builder = hyper::Response::builder()
            .status(hyper::StatusCode::from_u16(status).unwrap_or(hyper::StatusCode::OK));

        let content_type = self
            .headers
            .get("content-type")
            .map(str::to_string)
            .or_else(|| self.body.content_type().map(str::to_string));

        if let Some(headers) = builder.headers_mut() {
            for (name, value) in self.headers.iter() {
                if name == "content-type" {
                    continue;
                }
                if let (Ok(name), Ok(value)) = (
                    hyper::header::HeaderName::try_from(name),
                    hyper::header::HeaderValue::try_from(value),
                ) {
                    headers.insert(name, value);
                }
            }
            if let Some(ct) = content_type {
                if let Ok(value) = hyper::header::HeaderValue::try_from(ct.as_str()) {
                    headers.insert(hyper::header::CONTENT_TYPE, value);
                }
            }
            for (name, value, options) in &self.cookies {
                if let Ok(value) = hyper::header::HeaderValue::try_from(build_cookie(
                    name, value, options,
                )) {
                    headers.append(hyper::header::SET_COOKIE, value);
                }
            }
            for name in &self.clear_cookies {
                let expired = format!("{}=; Path=/; Max-Age=0", name);
                if let Ok(value) = hyper::header::HeaderValue::try_from(expired) {
                    headers.append(hyper::header::SET_COOKIE, value);
                }
            }
        }

        let bytes = self.body.into_bytes();
        builder
            .body(Full::from(bytes))
            .unwrap_or_else(|_| hyper::Response::new(Full::from(Bytes::new())))
    }
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new()
    }
}

fn build_cookie(name: &str, value: &str, options: &CookieOptions) -> String {
    let mut builder = cookie::Cookie::build((name.to_string(), value.to_string()))
        .path(options.path.clone().unwrap_or_else(|| "/".to_string()));
    if options.http_only {
        builder = builder.http_only(true);
    }
    if options.secure {
        builder = builder.secure(true);
    }
    if let Some(domain) = &options.domain {
        builder = builder.domain(domain.clone());
    }
    if let Some(max_age) = options.max_age {
        builder = builder.max_age(cookie::time::Duration::seconds(max_age));
    }
    if let Some(same_site) = options.same_site {
        builder = builder.same_site(match same_site {
            SameSite::Strict => cookie::SameSite::Strict,
            SameSite::Lax => cookie::SameSite::Lax,
            SameSite::None => cookie::SameSite::None,
        });
    }
    builder.build().to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unwritten_response_flushes_as_204() {
        let res = HttpResponse::new();
        let hyper_res = res.into_hyper();
        assert_eq!(hyper_res.status(), 204);
    }

    #[test]
    fn explicit_status_without_body_is_kept() {
        let mut res = HttpResponse::new();
        res.set_status(201);
        let hyper_res = res.into_hyper();
        assert_eq!(hyper_res.status(), 201);
    }

    #[test]
    fn body_write_freezes_headers() {
        let mut res = HttpResponse::new();
        res.set_header("x-early", "ok").unwrap();
        res.write_text("done");
        let err = res.set_header("x-late", "no").unwrap_err();
        assert_eq!(err.status(), 500);
        assert_eq!(res.header("x-early"), Some("ok"));
    }

    #[test]
    fn json_body_sets_content_type() {
        let mut res = HttpResponse::new();
        res.write_json(serde_json::json!({"ok": true}));
        let hyper_res = res.into_hyper();
        assert_eq!(
            hyper_res.headers().get("content-type").unwrap(),
            "application/json"
        );
    }

    #[test]
    fn explicit_content_type_wins() {
        let mut res = HttpResponse::new();
        res.set_header("content-type", "application/problem+json").unwrap();
        res.write_json(serde_json::json!({"ok": false}));
        let hyper_res = res.into_hyper();
        assert_eq!(
            hyper_res.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn cookies_become_set_cookie_headers() {
        let mut res = HttpResponse::new();
        res.set_cookie(
            "session",
            "abc",
            Some(CookieOptions {
                http_only: true,
                ..Default::default()
            }),
        );
        res.clear_cookie("old");
        res.write_text("ok");
        let hyper_res = res.into_hyper();
        let cookies: Vec<_> = hyper_res
            .headers()
            .get_all(hyper::header::SET_COOKIE)
            .iter()
            .collect();
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].to_str().unwrap().contains("HttpOnly"));
        assert!(cookies[1].to_str().unwrap().contains("Max-Age=0"));
    }
}
