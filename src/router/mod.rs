#![warn(missing_docs)]

//! # Router Module
//!
//! Path-pattern compilation and `(method, path)` matching. Static patterns
//! (no `:name` segments) live in a hash table for O(1) lookup; parameterized
//! patterns are kept per method in registration order and scanned linearly.
//! Static matches always shadow parameterized ones, and among parameterized
//! patterns the first registered wins.
//!
//! The mountable [`Router`] collects routes under a shared [`RouterFns`]
//! surface and is merged into an application with
//! [`App::mount`](crate::app::App::mount).
//!
//! ## Basic Usage
//!
//! ```no_run
//! use nextrush::app::App;
//! use nextrush::router::{Router, RouterFns};
//! use nextrush::context::Context;
//!
//! # fn main() -> Result<(), nextrush::error::HttpError> {
//! let mut api = Router::new();
//! api.get("/status", |mut ctx: Context| async move {
//!     ctx.json(serde_json::json!({"status": "ok"}))?;
//!     Ok(ctx)
//! })?;
//!
//! let mut app = App::new();
//! app.mount("/api/v1", api)?;
//! # Ok(())
//! # }
//! ```

use crate::context::Context;
use crate::error::HttpError;
use crate::types::{into_handler, Handler, HttpMethod, Middleware};
use ahash::AHashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

const DEFAULT_MAX_ROUTES: usize = 1000;

/// Knobs controlling path canonicalization and registry capacity.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Whether path matching is case sensitive. Defaults to true.
    pub case_sensitive: bool,
    /// Whether a trailing slash is ignored when matching. Defaults to false:
    /// `/users` and `/users/` are distinct.
    pub ignore_trailing_slash: bool,
    /// Maximum number of registered routes. Defaults to 1000.
    pub max_routes: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            case_sensitive: true,
            ignore_trailing_slash: false,
            max_routes: DEFAULT_MAX_ROUTES,
        }
    }
}

// A registered route: the handler plus its route-scoped middleware.
pub(crate) struct Route {
    pub(crate) handler: Handler,
    pub(crate) middleware: Vec<Middleware>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Clone)]
struct CompiledRoute {
    pattern: String,
    segments: Vec<Segment>,
    route: Arc<Route>,
}

/// The result of a successful route lookup.
pub struct RouteMatch {
    pub(crate) handler: Handler,
    pub(crate) middleware: Vec<Middleware>,
    /// Bound parameters, URL-decoded. Empty for static matches.
    pub params: HashMap<String, String>,
    /// The canonicalized path that matched.
    pub path: String,
}

/// The compiled route table: O(1) static lookup plus an ordered scan over
/// parameterized patterns.
///
/// Cloning is cheap: handlers are shared behind `Arc`s. The application
/// clones the registry into its accept loop when `listen()` freezes it.
#[derive(Clone)]
pub struct RouteRegistry {
    static_routes: AHashMap<String, Arc<Route>>,
    param_routes: AHashMap<HttpMethod, Vec<CompiledRoute>>,
    count: usize,
    config: RouterConfig,
}

impl RouteRegistry {
    /// Creates an empty registry with default configuration.
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Creates an empty registry with the given configuration.
    pub fn with_config(config: RouterConfig) -> Self {
        Self {
            static_routes: AHashMap::new(),
            param_routes: AHashMap::new(),
            count: 0,
            config,
        }
    }

    /// Registers a route. The latest registration for a `(method, pattern)`
    /// pair wins; replacing a prior entry logs a warning. Registration fails
    /// when the pattern is invalid or the registry is full.
    pub fn register(
        &mut self,
        method: HttpMethod,
        pattern: &str,
        handler: Handler,
        middleware: Vec<Middleware>,
    ) -> Result<(), HttpError> {
        let segments = compile_pattern(pattern)?;
        let canonical = self.canonicalize(pattern);
        let route = Arc::new(Route {
            handler,
            middleware,
        });

        let is_static = segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)));

        let replaced = if is_static {
            let key = static_key(method, &canonical);
            self.static_routes.insert(key, route).is_some()
        } else {
            let routes = self.param_routes.entry(method).or_default();
            let prior = routes.iter().position(|r| r.pattern == canonical);
            if let Some(index) = prior {
                routes.remove(index);
            }
            routes.push(CompiledRoute {
                pattern: canonical.clone(),
                segments,
                route,
            });
            prior.is_some()
        };

        if replaced {
            tracing::warn!(
                method = %method,
                pattern,
                "duplicate route registration, replacing previous handler"
            );
        } else {
            self.count += 1;
            if self.count > self.config.max_routes {
                self.count -= 1;
                if is_static {
                    self.static_routes.remove(&static_key(method, &canonical));
                } else if let Some(routes) = self.param_routes.get_mut(&method) {
                    routes.pop();
                }
                return Err(HttpError::validation(format!(
                    "Route limit exceeded: at most {} routes may be registered",
                    self.config.max_routes
                )));
            }
        }

        Ok(())
    }

    /// Looks up the route for `(method, path)`.
    ///
    /// The path is canonicalized (query stripped, duplicate slashes
    /// collapsed), the static table is probed first, then parameterized
    /// patterns are scanned in registration order with left-to-right segment
    /// comparison and param binding.
    pub fn find(&self, method: HttpMethod, path: &str) -> Option<RouteMatch> {
        let canonical = self.canonicalize(path);

        if let Some(route) = self.static_routes.get(&static_key(method, &canonical)) {
            return Some(RouteMatch {
                handler: route.handler.clone(),
                middleware: route.middleware.clone(),
                params: HashMap::new(),
                path: canonical,
            });
        }

        let segments = split_path(&canonical);
        for compiled in self.param_routes.get(&method)?.iter() {
            if let Some(params) = match_segments(&compiled.segments, &segments) {
                return Some(RouteMatch {
                    handler: compiled.route.handler.clone(),
                    middleware: compiled.route.middleware.clone(),
                    params,
                    path: canonical,
                });
            }
        }

        None
    }

    /// Probes every other method for the path, to distinguish 405 from 404.
    /// Returns the matching methods in a stable order for the `Allow` header.
    pub fn allowed_methods(&self, path: &str, except: HttpMethod) -> Vec<HttpMethod> {
        let canonical = self.canonicalize(path);
        let segments = split_path(&canonical);

        let mut allowed = Vec::new();
        for method in HttpMethod::ALL {
            if method == except {
                continue;
            }
            let hit = self
                .static_routes
                .contains_key(&static_key(method, &canonical))
                || self
                    .param_routes
                    .get(&method)
                    .map(|routes| {
                        routes
                            .iter()
                            .any(|r| match_segments(&r.segments, &segments).is_some())
                    })
                    .unwrap_or(false);
            if hit {
                allowed.push(method);
            }
        }
        allowed
    }

    /// The number of registered routes.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn canonicalize(&self, path: &str) -> String {
        let path = path.split('?').next().unwrap_or("");

        let mut out = String::with_capacity(path.len());
        let mut last_slash = false;
        for c in path.chars() {
            if c == '/' {
                if last_slash {
                    continue;
                }
                last_slash = true;
            } else {
                last_slash = false;
            }
            out.push(c);
        }
        if out.is_empty() {
            out.push('/');
        }

        if self.config.ignore_trailing_slash && out.len() > 1 && out.ends_with('/') {
            out.pop();
        }
        if !self.config.case_sensitive {
            out = out.to_ascii_lowercase();
        }
        out
    }
}

impl Default for RouteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn static_key(method: HttpMethod, path: &str) -> String {
    format!("{} {}", method.as_str(), path)
}

// "/users/42" -> ["users", "42"]; "/" -> [""]; a trailing slash yields a
// trailing empty segment, which no param can bind.
fn split_path(path: &str) -> Vec<&str> {
    path.strip_prefix('/').unwrap_or(path).split('/').collect()
}

fn compile_pattern(pattern: &str) -> Result<Vec<Segment>, HttpError> {
    if !pattern.starts_with('/') {
        return Err(HttpError::validation(format!(
            "Route pattern must start with '/': '{}'",
            pattern
        )));
    }

    let mut segments = Vec::new();
    for raw in pattern.strip_prefix('/').unwrap_or(pattern).split('/') {
        if let Some(name) = raw.strip_prefix(':') {
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(HttpError::validation(format!(
                    "Invalid parameter segment ':{}' in pattern '{}'",
                    name, pattern
                )));
            }
            segments.push(Segment::Param(name.to_string()));
        } else {
            if raw.contains(':') {
                return Err(HttpError::validation(format!(
                    "Invalid segment '{}' in pattern '{}': ':' is only allowed as a prefix",
                    raw, pattern
                )));
            }
            segments.push(Segment::Literal(raw.to_string()));
        }
    }
    Ok(segments)
}

fn match_segments(pattern: &[Segment], path: &[&str]) -> Option<HashMap<String, String>> {
    if pattern.len() != path.len() {
        return None;
    }

    let mut params = HashMap::new();
    for (segment, actual) in pattern.iter().zip(path) {
        match segment {
            Segment::Literal(expected) => {
                if expected != actual {
                    return None;
                }
            }
            Segment::Param(name) => {
                if actual.is_empty() {
                    return None;
                }
                let decoded = urlencoding::decode(actual)
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| (*actual).to_string());
                params.insert(name.clone(), decoded);
            }
        }
    }
    Some(params)
}

/// Route-registration surface shared by [`App`](crate::app::App) and the
/// mountable [`Router`].
pub trait RouterFns {
    /// Registers a boxed handler with route-scoped middleware for a
    /// method/path pair.
    fn register_route(
        &mut self,
        method: HttpMethod,
        path: &str,
        handler: Handler,
        middleware: Vec<Middleware>,
    ) -> Result<(), HttpError>;

    /// Registers a GET handler.
    ///
    /// # Example
    /// ```
    /// use nextrush::router::{Router, RouterFns};
    /// use nextrush::context::Context;
    ///
    /// let mut router = Router::new();
    /// router.get("/hello", |mut ctx: Context| async move {
    ///     ctx.text("Hello, World!")?;
    ///     Ok(ctx)
    /// }).unwrap();
    /// ```
    fn get<F, Fut>(&mut self, path: &str, handler: F) -> Result<(), HttpError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Context, HttpError>> + Send + 'static,
    {
        self.register_route(HttpMethod::GET, path, into_handler(handler), Vec::new())
    }

    /// Registers a POST handler.
    fn post<F, Fut>(&mut self, path: &str, handler: F) -> Result<(), HttpError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Context, HttpError>> + Send + 'static,
    {
        self.register_route(HttpMethod::POST, path, into_handler(handler), Vec::new())
    }

    /// Registers a PUT handler.
    fn put<F, Fut>(&mut self, path: &str, handler: F) -> Result<(), HttpError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Context, HttpError>> + Send + 'static,
    {
        self.register_route(HttpMethod::PUT, path, into_handler(handler), Vec::new())
    }

    /// Registers a DELETE handler.
    fn delete<F, Fut>(&mut self, path: &str, handler: F) -> Result<(), HttpError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Context, HttpError>> + Send + 'static,
    {
        self.register_route(HttpMethod::DELETE, path, into_handler(handler), Vec::new())
    }

    /// Registers a PATCH handler.
    fn patch<F, Fut>(&mut self, path: &str, handler: F) -> Result<(), HttpError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Context, HttpError>> + Send + 'static,
    {
        self.register_route(HttpMethod::PATCH, path, into_handler(handler), Vec::new())
    }

    /// Registers an OPTIONS handler.
    fn options<F, Fut>(&mut self, path: &str, handler: F) -> Result<(), HttpError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Context, HttpError>> + Send + 'static,
    {
        self.register_route(HttpMethod::OPTIONS, path, into_handler(handler), Vec::new())
    }

    /// Registers a HEAD handler.
    fn head<F, Fut>(&mut self, path: &str, handler: F) -> Result<(), HttpError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Context, HttpError>> + Send + 'static,
    {
        self.register_route(HttpMethod::HEAD, path, into_handler(handler), Vec::new())
    }

    /// Registers a handler with route-scoped middleware, which runs after the
    /// global middleware and before the handler.
    fn route<F, Fut>(
        &mut self,
        method: HttpMethod,
        path: &str,
        middleware: Vec<Middleware>,
        handler: F,
    ) -> Result<(), HttpError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Context, HttpError>> + Send + 'static,
    {
        self.register_route(method, path, into_handler(handler), middleware)
    }
}

// A route collected by a mountable Router, before prefixing.
pub(crate) struct PendingRoute {
    pub(crate) method: HttpMethod,
    pub(crate) path: String,
    pub(crate) handler: Handler,
    pub(crate) middleware: Vec<Middleware>,
}

/// A modular group of routes, mounted onto an application under a prefix.
///
/// Useful for API versioning and feature grouping; routes keep their
/// registration order when merged.
pub struct Router {
    pub(crate) routes: Vec<PendingRoute>,
}

impl Router {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterFns for Router {
    fn register_route(
        &mut self,
        method: HttpMethod,
        path: &str,
        handler: Handler,
        middleware: Vec<Middleware>,
    ) -> Result<(), HttpError> {
        // Pattern problems surface here rather than at mount time.
        compile_pattern(path)?;
        self.routes.push(PendingRoute {
            method,
            path: path.to_string(),
            handler,
            middleware,
        });
        Ok(())
    }
}
