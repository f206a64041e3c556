#![warn(missing_docs)]

//! Exception filters: the last stop between a thrown [`HttpError`] and the
//! wire. Filters are tried in registration order; the first whose
//! [`ExceptionFilter::claims`] predicate accepts the error handles it. A
//! global fallback always runs last and renders the canonical JSON error
//! shape.

use crate::context::Context;
use crate::error::{ErrorKind, HttpError};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// A handler that translates a thrown [`HttpError`] into an HTTP response.
///
/// Register filters on the application with
/// [`App::use_exception_filter`](crate::app::App::use_exception_filter). The
/// context passed to [`catch`](ExceptionFilter::catch) carries the failing
/// request's method, path, and id; the filter writes the response through it.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use nextrush::context::Context;
/// use nextrush::error::{ErrorKind, HttpError};
/// use nextrush::error::filter::ExceptionFilter;
///
/// struct TeapotFilter;
///
/// #[async_trait]
/// impl ExceptionFilter for TeapotFilter {
///     fn claims(&self, error: &HttpError) -> bool {
///         error.kind() == ErrorKind::NotImplemented
///     }
///
///     async fn catch(&self, _error: &HttpError, ctx: &mut Context) -> Result<(), HttpError> {
///         ctx.status(418).text("short and stout")?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ExceptionFilter: Send + Sync {
    /// Whether this filter handles the given error.
    fn claims(&self, error: &HttpError) -> bool;

    /// Writes the error response through the context. Returning an error here
    /// falls through to the global fallback filter.
    async fn catch(&self, error: &HttpError, ctx: &mut Context) -> Result<(), HttpError>;
}

/// Runs the registered filters in order and falls back to the canonical JSON
/// renderer when none claims the error or the claiming filter itself fails.
pub(crate) async fn handle_error(
    filters: &[Arc<dyn ExceptionFilter>],
    error: &HttpError,
    ctx: &mut Context,
    debug: bool,
) {
    if error.status() >= 500 {
        tracing::error!(
            code = error.code(),
            error = error.message(),
            source = error.source_repr(),
            request_id = %ctx.id,
            "request failed"
        );
    }

    for f in filters {
        if f.claims(error) {
            if f.catch(error, ctx).await.is_ok() {
                return;
            }
            break;
        }
    }

    render_error(error, ctx, debug);
}

/// The global fallback renderer: produces the framework's JSON error shape.
///
/// In non-debug mode, 5xx messages are replaced with the kind's generic
/// message and no stack is included; 4xx messages pass through as-is.
pub(crate) fn render_error(error: &HttpError, ctx: &mut Context, debug: bool) {
    let status = error.status();

    let message = if status >= 500 && !debug {
        error.kind().default_message().to_string()
    } else {
        error.message().to_string()
    };

    let mut body = json!({
        "error": {
            "name": error.kind().name(),
            "code": error.code(),
            "status": status,
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "path": ctx.req.path,
            "method": ctx.req.method.as_str(),
            "requestId": error.correlation_id().unwrap_or(&ctx.id),
        }
    });

    if let Some(details) = error.details() {
        body["error"]["details"] = details.clone();
    }
    if debug {
        if let Some(source) = error.source_repr() {
            body["error"]["stack"] = json!(source);
        }
    }

    ctx.res.set_status(status);
    if error.kind() == ErrorKind::MethodNotAllowed {
        if let Some(allow) = error.details().and_then(|d| d["allow"].as_array()) {
            let list: Vec<&str> = allow.iter().filter_map(|v| v.as_str()).collect();
            ctx.res.set_raw_header("allow", list.join(", "));
        }
    }
    if error.retryable() {
        if let Some(seconds) = error.retry_after() {
            ctx.res.set_raw_header("retry-after", seconds.to_string());
        }
    }
    ctx.res.write_json(body);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::Context;

    struct ClaimNothing;

    #[async_trait]
    impl ExceptionFilter for ClaimNothing {
        fn claims(&self, _error: &HttpError) -> bool {
            false
        }

        async fn catch(&self, _error: &HttpError, _ctx: &mut Context) -> Result<(), HttpError> {
            Ok(())
        }
    }

    struct ClaimNotFound;

    #[async_trait]
    impl ExceptionFilter for ClaimNotFound {
        fn claims(&self, error: &HttpError) -> bool {
            error.kind() == ErrorKind::NotFound
        }

        async fn catch(&self, _error: &HttpError, ctx: &mut Context) -> Result<(), HttpError> {
            ctx.status(404).text("gone fishing")?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn fallback_renders_error_shape() {
        let mut ctx = Context::for_testing("GET", "/missing");
        let err = HttpError::not_found("No such route");
        handle_error(&[], &err, &mut ctx, false).await;

        assert_eq!(ctx.res.status(), 404);
        let body = ctx.res.body_json().unwrap();
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["status"], 404);
        assert_eq!(body["error"]["message"], "No such route");
        assert_eq!(body["error"]["path"], "/missing");
        assert_eq!(body["error"]["method"], "GET");
        assert!(body["error"]["stack"].is_null());
    }

    #[tokio::test]
    async fn production_strips_internal_messages() {
        let mut ctx = Context::for_testing("GET", "/boom");
        let err = HttpError::internal("password is hunter2");
        handle_error(&[], &err, &mut ctx, false).await;

        let body = ctx.res.body_json().unwrap();
        assert_eq!(body["error"]["message"], "Internal server error");
    }

    #[tokio::test]
    async fn debug_keeps_internal_messages() {
        let mut ctx = Context::for_testing("GET", "/boom");
        let err = HttpError::internal("index out of range");
        handle_error(&[], &err, &mut ctx, true).await;

        let body = ctx.res.body_json().unwrap();
        assert_eq!(body["error"]["message"], "index out of range");
    }

    #[tokio::test]
    async fn first_claiming_filter_wins() {
        let filters: Vec<Arc<dyn ExceptionFilter>> =
            vec![Arc::new(ClaimNothing), Arc::new(ClaimNotFound)];
        let mut ctx = Context::for_testing("GET", "/x");
        let err = HttpError::not_found("nope");
        handle_error(&filters, &err, &mut ctx, false).await;

        assert_eq!(ctx.res.status(), 404);
        assert_eq!(ctx.res.body_text(), "gone fishing");
    }

    #[tokio::test]
    async fn unclaimed_error_falls_back() {
        let filters: Vec<Arc<dyn ExceptionFilter>> = vec![Arc::new(ClaimNotFound)];
        let mut ctx = Context::for_testing("GET", "/x");
        let err = HttpError::conflict("already exists");
        handle_error(&filters, &err, &mut ctx, false).await;

        assert_eq!(ctx.res.status(), 409);
        let body = ctx.res.body_json().unwrap();
        assert_eq!(body["error"]["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn method_not_allowed_sets_allow_header() {
        use crate::types::HttpMethod;
        let mut ctx = Context::for_testing("POST", "/x");
        let err = HttpError::method_not_allowed(&[HttpMethod::GET]);
        handle_error(&[], &err, &mut ctx, false).await;

        assert_eq!(ctx.res.status(), 405);
        assert_eq!(ctx.res.header("allow"), Some("GET"));
    }
}
