#![warn(missing_docs)]
use crate::context::Context;
use crate::error::HttpError;
use crate::middleware::Next;
use hyper::Method;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

/// A boxed, sendable future as used by handlers and middleware.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// The result every handler and middleware resolves to: the context flows
/// through on success, a typed [`HttpError`] unwinds to the exception filters
/// on failure.
pub type HandlerResult = Result<Context, HttpError>;

/// A route handler: takes ownership of the request context and returns it with
/// the response written.
pub type Handler = Arc<dyn Fn(Context) -> BoxFuture<HandlerResult> + Send + Sync + 'static>;

/// A middleware function in the `(ctx, next)` style.
///
/// A middleware may perform work before calling [`Next::run`], after, or both,
/// and may skip `next` entirely to short-circuit the pipeline.
pub type Middleware =
    Arc<dyn Fn(Context, Next) -> BoxFuture<HandlerResult> + Send + Sync + 'static>;

/// Represents the supported HTTP methods for routing and request handling.
#[derive(Eq, Hash, PartialEq, Clone, Copy, Debug, PartialOrd, Ord)]
pub enum HttpMethod {
    /// The HTTP GET method, typically used for retrieving resources.
    GET,
    /// The HTTP POST method, commonly used for creating resources or submitting data.
    POST,
    /// The HTTP PUT method, generally used for updating or replacing resources.
    PUT,
    /// The HTTP DELETE method, used to remove resources.
    DELETE,
    /// The HTTP PATCH method, used for making partial updates to resources.
    PATCH,
    /// The HTTP OPTIONS method, used to describe the communication options for the target resource.
    OPTIONS,
    /// The HTTP HEAD method, used to retrieve headers for a resource without the body.
    HEAD,
}

impl HttpMethod {
    /// All methods the router accepts, in a stable order.
    pub const ALL: [HttpMethod; 7] = [
        HttpMethod::GET,
        HttpMethod::POST,
        HttpMethod::PUT,
        HttpMethod::DELETE,
        HttpMethod::PATCH,
        HttpMethod::OPTIONS,
        HttpMethod::HEAD,
    ];

    /// The canonical uppercase name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::DELETE => "DELETE",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::OPTIONS => "OPTIONS",
            HttpMethod::HEAD => "HEAD",
        }
    }

    /// Converts a hyper [`Method`] into an [`HttpMethod`], rejecting methods
    /// outside the supported set.
    pub fn from_hyper(method: &Method) -> Result<Self, HttpError> {
        match *method {
            Method::GET => Ok(HttpMethod::GET),
            Method::POST => Ok(HttpMethod::POST),
            Method::PUT => Ok(HttpMethod::PUT),
            Method::DELETE => Ok(HttpMethod::DELETE),
            Method::PATCH => Ok(HttpMethod::PATCH),
            Method::OPTIONS => Ok(HttpMethod::OPTIONS),
            Method::HEAD => Ok(HttpMethod::HEAD),
            _ => Err(HttpError::bad_request(format!(
                "Unsupported HTTP method: {}",
                method
            ))),
        }
    }
}

impl FromStr for HttpMethod {
    type Err = HttpError;

    /// Parses a method name case-insensitively, rejecting any name outside the
    /// supported set with a `BadRequest` error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::GET),
            "POST" => Ok(HttpMethod::POST),
            "PUT" => Ok(HttpMethod::PUT),
            "DELETE" => Ok(HttpMethod::DELETE),
            "PATCH" => Ok(HttpMethod::PATCH),
            "OPTIONS" => Ok(HttpMethod::OPTIONS),
            "HEAD" => Ok(HttpMethod::HEAD),
            other => Err(HttpError::bad_request(format!(
                "Unsupported HTTP method: {}",
                other
            ))),
        }
    }
}

impl Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Boxes a handler future, erasing its concrete type.
pub fn box_future<F>(future: F) -> BoxFuture<HandlerResult>
where
    F: Future<Output = HandlerResult> + Send + 'static,
{
    Box::pin(future)
}

/// Wraps an async function into a boxed [`Handler`].
///
/// # Example
/// ```
/// use nextrush::types::into_handler;
/// use nextrush::context::Context;
///
/// let handler = into_handler(|mut ctx: Context| async move {
///     ctx.text("Hello, World!")?;
///     Ok(ctx)
/// });
/// ```
pub fn into_handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |ctx| box_future(f(ctx)))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn method_round_trips_through_str() {
        for method in HttpMethod::ALL {
            assert_eq!(method.as_str().parse::<HttpMethod>().unwrap(), method);
        }
    }

    #[test]
    fn method_parse_is_case_insensitive() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::GET);
        assert_eq!("Patch".parse::<HttpMethod>().unwrap(), HttpMethod::PATCH);
    }

    #[test]
    fn unknown_method_is_rejected() {
        let err = "TRACE".parse::<HttpMethod>().unwrap_err();
        assert_eq!(err.status(), 400);
    }
}
