#![warn(missing_docs)]

//! # Error Module
//!
//! The typed error taxonomy for NextRush. Every failure in the framework
//! surfaces as an [`HttpError`] whose [`ErrorKind`] carries a stable code, a
//! default HTTP status, and a retryability flag. Errors thrown by handlers or
//! middleware unwind the pipeline and are translated into HTTP responses by
//! the exception filters in [`filter`].
//!
//! ## Basic Usage
//!
//! ```
//! use nextrush::error::{ErrorKind, HttpError};
//!
//! let err = HttpError::not_found("No such user");
//! assert_eq!(err.status(), 404);
//! assert_eq!(err.code(), "NOT_FOUND");
//! assert!(!err.retryable());
//!
//! let err = HttpError::new(ErrorKind::Conflict, "Username taken")
//!     .with_details(serde_json::json!({"field": "username"}));
//! assert_eq!(err.status(), 409);
//! ```

use crate::types::HttpMethod;
use serde_json::Value;
use std::fmt::Display;

/// Exception filters that translate [`HttpError`]s into HTTP responses.
pub mod filter;

/// The closed set of error categories the framework produces.
///
/// Each kind carries a stable machine-readable code, a default HTTP status,
/// and a retryability flag; see [`ErrorKind::code`], [`ErrorKind::status`],
/// and [`ErrorKind::retryable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Input failed validation (malformed JSON shape, depth limits, bad config).
    Validation,
    /// The request was malformed or unacceptable.
    BadRequest,
    /// Authentication is required or failed.
    Unauthorized,
    /// The authenticated caller may not perform this action.
    Forbidden,
    /// No route or resource matched the request.
    NotFound,
    /// The path matched a different method; the response carries an `Allow` header.
    MethodNotAllowed,
    /// The request did not complete within the configured timeout.
    RequestTimeout,
    /// The request conflicts with the current state of the resource.
    Conflict,
    /// The request body exceeded a configured size limit.
    PayloadTooLarge,
    /// The request content type is not supported.
    UnsupportedMediaType,
    /// The caller exceeded a rate limit.
    TooManyRequests,
    /// An unexpected internal failure.
    Internal,
    /// The requested functionality is not implemented.
    NotImplemented,
    /// An upstream dependency returned an invalid response.
    BadGateway,
    /// The server is shutting down or otherwise unavailable.
    ServiceUnavailable,
    /// An upstream dependency timed out.
    GatewayTimeout,
    /// A plugin failed during install, init, or cleanup.
    Plugin,
}

impl ErrorKind {
    /// The stable machine-readable code for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            ErrorKind::RequestTimeout => "REQUEST_TIMEOUT",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorKind::UnsupportedMediaType => "UNSUPPORTED_MEDIA_TYPE",
            ErrorKind::TooManyRequests => "TOO_MANY_REQUESTS",
            ErrorKind::Internal => "INTERNAL_SERVER_ERROR",
            ErrorKind::NotImplemented => "NOT_IMPLEMENTED",
            ErrorKind::BadGateway => "BAD_GATEWAY",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorKind::GatewayTimeout => "GATEWAY_TIMEOUT",
            ErrorKind::Plugin => "PLUGIN_ERROR",
        }
    }

    /// The default HTTP status for this kind.
    pub fn status(&self) -> u16 {
        match self {
            ErrorKind::Validation | ErrorKind::BadRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::MethodNotAllowed => 405,
            ErrorKind::RequestTimeout => 408,
            ErrorKind::Conflict => 409,
            ErrorKind::PayloadTooLarge => 413,
            ErrorKind::UnsupportedMediaType => 415,
            ErrorKind::TooManyRequests => 429,
            ErrorKind::Internal | ErrorKind::Plugin => 500,
            ErrorKind::NotImplemented => 501,
            ErrorKind::BadGateway => 502,
            ErrorKind::ServiceUnavailable => 503,
            ErrorKind::GatewayTimeout => 504,
        }
    }

    /// Whether a client may reasonably retry the request that produced this error.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RequestTimeout
                | ErrorKind::TooManyRequests
                | ErrorKind::Internal
                | ErrorKind::BadGateway
                | ErrorKind::ServiceUnavailable
                | ErrorKind::GatewayTimeout
        )
    }

    /// The error class name used in JSON error responses.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::BadRequest => "BadRequestError",
            ErrorKind::Unauthorized => "UnauthorizedError",
            ErrorKind::Forbidden => "ForbiddenError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::MethodNotAllowed => "MethodNotAllowedError",
            ErrorKind::RequestTimeout => "RequestTimeoutError",
            ErrorKind::Conflict => "ConflictError",
            ErrorKind::PayloadTooLarge => "PayloadTooLargeError",
            ErrorKind::UnsupportedMediaType => "UnsupportedMediaTypeError",
            ErrorKind::TooManyRequests => "TooManyRequestsError",
            ErrorKind::Internal => "InternalServerError",
            ErrorKind::NotImplemented => "NotImplementedError",
            ErrorKind::BadGateway => "BadGatewayError",
            ErrorKind::ServiceUnavailable => "ServiceUnavailableError",
            ErrorKind::GatewayTimeout => "GatewayTimeoutError",
            ErrorKind::Plugin => "PluginError",
        }
    }

    /// The default human-readable message for this kind.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Validation failed",
            ErrorKind::BadRequest => "Bad request",
            ErrorKind::Unauthorized => "Authentication required",
            ErrorKind::Forbidden => "Access denied",
            ErrorKind::NotFound => "Resource not found",
            ErrorKind::MethodNotAllowed => "Method not allowed",
            ErrorKind::RequestTimeout => "Request timed out",
            ErrorKind::Conflict => "Resource conflict",
            ErrorKind::PayloadTooLarge => "Request body too large",
            ErrorKind::UnsupportedMediaType => "Unsupported media type",
            ErrorKind::TooManyRequests => "Too many requests",
            ErrorKind::Internal => "Internal server error",
            ErrorKind::NotImplemented => "Not implemented",
            ErrorKind::BadGateway => "Bad gateway",
            ErrorKind::ServiceUnavailable => "Service unavailable",
            ErrorKind::GatewayTimeout => "Gateway timeout",
            ErrorKind::Plugin => "Plugin error",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A structured error carrying a kind, a message, and optional context.
///
/// `HttpError` is the single error type flowing through handlers, middleware,
/// and the body parser. The exception filters translate it into the JSON error
/// response shape; the mapping from kind to status is fixed (see
/// [`ErrorKind::status`]).
#[derive(Debug, Clone)]
pub struct HttpError {
    kind: ErrorKind,
    message: String,
    details: Option<Value>,
    correlation_id: Option<String>,
    retry_after: Option<u64>,
    source: Option<String>,
}

impl HttpError {
    /// Creates an error of the given kind with a custom message.
    pub fn new<M: Into<String>>(kind: ErrorKind, message: M) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            correlation_id: None,
            retry_after: None,
            source: None,
        }
    }

    /// Creates an error of the given kind with its default message.
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self::new(kind, kind.default_message())
    }

    /// A 400 validation error.
    pub fn validation<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// A 400 bad-request error.
    pub fn bad_request<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// A 401 unauthorized error.
    pub fn unauthorized<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    /// A 403 forbidden error.
    pub fn forbidden<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    /// A 404 not-found error.
    pub fn not_found<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// A 405 method-not-allowed error carrying the methods that would have
    /// matched; the fallback filter emits them as the `Allow` header.
    pub fn method_not_allowed(allowed: &[HttpMethod]) -> Self {
        let names: Vec<&str> = allowed.iter().map(|m| m.as_str()).collect();
        Self::from_kind(ErrorKind::MethodNotAllowed)
            .with_details(serde_json::json!({ "allow": names }))
    }

    /// A 408 request-timeout error.
    pub fn request_timeout<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::RequestTimeout, message)
    }

    /// A 409 conflict error.
    pub fn conflict<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// A 413 payload-too-large error reporting the observed size and the limit.
    pub fn payload_too_large(size: usize, limit: usize) -> Self {
        Self::new(
            ErrorKind::PayloadTooLarge,
            format!("Request body too large: {} bytes (limit: {} bytes)", size, limit),
        )
        .with_details(serde_json::json!({ "size": size, "limit": limit }))
    }

    /// A 415 unsupported-media-type error.
    pub fn unsupported_media_type<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::UnsupportedMediaType, message)
    }

    /// A 429 too-many-requests error.
    pub fn too_many_requests<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::TooManyRequests, message)
    }

    /// A 500 internal error.
    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// A 501 not-implemented error.
    pub fn not_implemented<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::NotImplemented, message)
    }

    /// A 502 bad-gateway error.
    pub fn bad_gateway<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::BadGateway, message)
    }

    /// A 503 service-unavailable error.
    pub fn service_unavailable<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }

    /// A 504 gateway-timeout error.
    pub fn gateway_timeout<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::GatewayTimeout, message)
    }

    /// A 500 plugin error naming the failing plugin.
    pub fn plugin<M: Into<String>>(name: &str, message: M) -> Self {
        Self::new(ErrorKind::Plugin, message.into())
            .with_details(serde_json::json!({ "plugin": name }))
    }

    /// Converts any foreign error into an `Internal` error, preserving the
    /// original message and debug representation.
    pub fn normalize<E: std::error::Error>(err: E) -> Self {
        let mut normalized = Self::internal(err.to_string());
        normalized.source = Some(format!("{:?}", err));
        normalized
    }

    /// Attaches structured details to the error.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attaches a correlation id propagated into the error response.
    pub fn with_correlation_id<S: Into<String>>(mut self, id: S) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Attaches a `Retry-After` hint in seconds (meaningful for 429 and 503).
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// The error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The stable machine-readable code.
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// The HTTP status consistent with the code.
    pub fn status(&self) -> u16 {
        self.kind.status()
    }

    /// Whether a client may retry.
    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The structured details, if any.
    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// The correlation id, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// The `Retry-After` hint in seconds, if any.
    pub fn retry_after(&self) -> Option<u64> {
        self.retry_after
    }

    /// The captured representation of a normalized foreign error, if any.
    pub(crate) fn source_repr(&self) -> Option<&str> {
        self.source.as_deref()
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.kind.name(), self.kind.code(), self.message)
    }
}

impl std::error::Error for HttpError {}

impl From<serde_json::Error> for HttpError {
    fn from(err: serde_json::Error) -> Self {
        Self::bad_request(format!("Invalid JSON: {}", err))
    }
}

impl From<std::io::Error> for HttpError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for HttpError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Self::bad_request(err.to_string())
    }
}
