#![warn(missing_docs)]

//! # Request Context Module
//!
//! This module provides the [`Context`] struct: the single per-request object
//! that flows through the middleware pipeline. It owns the parsed
//! [`HttpRequest`], the buffered [`HttpResponse`], route params, a state map
//! for cross-middleware communication, the parsed body, a correlation id, and
//! the request start time.
//!
//! A context is created when the listener accepts a request and destroyed when
//! the response is flushed. It is exclusively owned by one request's pipeline;
//! no two requests ever share a context.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use nextrush::app::App;
//! use nextrush::context::Context;
//! use nextrush::router::RouterFns;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), nextrush::error::HttpError> {
//!     let mut app = App::new();
//!
//!     app.get("/users/:id", |mut ctx: Context| async move {
//!         let id = ctx.params.get("id").cloned().unwrap_or_default();
//!         ctx.json(serde_json::json!({ "id": id }))?;
//!         Ok(ctx)
//!     })?;
//!
//!     app.listen(|addr| println!("listening on {}", addr)).await
//! }
//! ```
//!
//! ## Sharing data between middleware and handlers
//!
//! ```
//! use nextrush::context::Context;
//!
//! let mut ctx = Context::for_testing("GET", "/dashboard");
//! ctx.set_state("user_id", serde_json::json!("12345"));
//! assert_eq!(ctx.get_state("user_id").unwrap(), "12345");
//! ```

use crate::body::BodyParseResult;
use crate::error::HttpError;
use crate::req::HttpRequest;
use crate::res::HttpResponse;
use crate::types::HttpMethod;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Instant;

/// The per-request context: request, response, params, state, and body.
#[derive(Debug)]
pub struct Context {
    /// The parsed incoming request.
    pub req: HttpRequest,

    /// The buffered outgoing response.
    pub res: HttpResponse,

    /// Route parameters bound by the router, URL-decoded. Empty for static
    /// matches and before routing.
    pub params: HashMap<String, String>,

    /// Per-request state for cross-middleware communication.
    pub state: HashMap<String, Value>,

    /// The parsed body, populated by the body parser middleware.
    pub body: Option<BodyParseResult>,

    /// The request correlation id, also used as the default `requestId` in
    /// error responses.
    pub id: String,

    /// The span all request-scoped log events attach to.
    pub span: tracing::Span,

    pub(crate) start: Instant,
}

impl Context {
    /// Creates a context around an already-built request.
    pub fn new(req: HttpRequest) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "request",
            id = %id,
            method = %req.method,
            path = %req.path
        );
        Self {
            req,
            res: HttpResponse::new(),
            params: HashMap::new(),
            state: HashMap::new(),
            body: None,
            id,
            span,
            start: Instant::now(),
        }
    }

    /// The context factory: builds the context from the raw hyper request,
    /// the peer address, and the proxy-trust setting.
    pub(crate) fn from_hyper(
        parts: &hyper::http::request::Parts,
        body: hyper::body::Incoming,
        peer: SocketAddr,
        trust_proxy: bool,
    ) -> Result<Self, HttpError> {
        let req = HttpRequest::from_hyper(parts, body, peer, trust_proxy)?;
        Ok(Self::new(req))
    }

    /// Creates a bare context for tests and examples.
    pub fn for_testing(method: &str, path: &str) -> Self {
        let mut req = HttpRequest::new();
        if let Ok(method) = method.parse::<HttpMethod>() {
            req.set_method(method);
        }
        req.set_path(path);
        Self::new(req)
    }

    // The pieces the exception filters need when the pipeline consumed the
    // original context on the error path.
    pub(crate) fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            method: self.req.method,
            path: self.req.path.clone(),
            id: self.id.clone(),
        }
    }

    pub(crate) fn from_snapshot(snapshot: ContextSnapshot) -> Self {
        let mut req = HttpRequest::new();
        req.set_method(snapshot.method);
        req.set_path(&snapshot.path);
        let mut ctx = Self::new(req);
        ctx.id = snapshot.id;
        ctx
    }

    /// Sets the response status, chaining.
    pub fn status(&mut self, code: u16) -> &mut Self {
        self.res.set_status(code);
        self
    }

    /// Sets a response header. Fails once the body has been written.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<&mut Self, HttpError> {
        self.res.set_header(name, value)?;
        Ok(self)
    }

    /// Writes a JSON body from any serializable value.
    pub fn json<T: Serialize>(&mut self, value: T) -> Result<(), HttpError> {
        let value = serde_json::to_value(value)
            .map_err(|e| HttpError::internal(format!("Failed to serialize response: {}", e)))?;
        self.res.write_json(value);
        Ok(())
    }

    /// Writes a plain-text body.
    pub fn text<T: Into<String>>(&mut self, text: T) -> Result<(), HttpError> {
        self.res.write_text(text);
        Ok(())
    }

    /// Writes an HTML body.
    pub fn html<T: Into<String>>(&mut self, html: T) -> Result<(), HttpError> {
        self.res.write_html(html);
        Ok(())
    }

    /// Writes a CSV body.
    pub fn csv<T: Into<String>>(&mut self, csv: T) -> Result<(), HttpError> {
        self.res.write_csv(csv);
        Ok(())
    }

    /// Writes an XML body.
    pub fn xml<T: Into<String>>(&mut self, xml: T) -> Result<(), HttpError> {
        self.res.write_xml(xml);
        Ok(())
    }

    /// Reads a file from disk and writes it as the response body, guessing
    /// the content type from the extension.
    pub async fn send_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), HttpError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                HttpError::not_found(format!("File not found: {}", path.display()))
            } else {
                HttpError::internal(e.to_string())
            }
        })?;
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        self.res.set_header("content-type", mime.as_ref())?;
        self.res.write_bytes(bytes);
        Ok(())
    }

    /// Redirects with `302 Found`.
    pub fn redirect(&mut self, url: &str) -> Result<(), HttpError> {
        self.redirect_with_status(url, 302)
    }

    /// Redirects with an explicit status (301, 302, 303, 307, 308).
    pub fn redirect_with_status(&mut self, url: &str, status: u16) -> Result<(), HttpError> {
        self.res.set_header("location", url)?;
        self.res.set_status(status);
        self.res.write_text(format!("Redirecting to {}", url));
        Ok(())
    }

    /// Stores a state value under a key.
    pub fn set_state<K: Into<String>>(&mut self, key: K, value: Value) -> &mut Self {
        self.state.insert(key.into(), value);
        self
    }

    /// Returns a state value by key.
    pub fn get_state(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Returns a route parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    // Surrenders the response for flushing; the context ends here.
    pub(crate) fn into_response(self) -> HttpResponse {
        self.res
    }

    /// The instant the context was created.
    pub fn started_at(&self) -> Instant {
        self.start
    }

    /// Time elapsed since the context was created.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

pub(crate) struct ContextSnapshot {
    pub(crate) method: HttpMethod,
    pub(crate) path: String,
    pub(crate) id: String,
}
