#![warn(missing_docs)]

//! # App Module
//!
//! The core application module: the [`App`] struct owns the listener, the
//! route registry, the ordered global middleware, the exception filters, and
//! the plugin registry, and drives each request through the pipeline
//!
//! ```text
//! listener → context → global middleware → body parser → router match
//!          → route middleware → handler → flush
//! ```
//!
//! Any error thrown along the way skips the rest of the pipeline and is
//! translated by the exception filters. Upgrade requests branch to the
//! WebSocket plugin before the middleware chain. A handler that writes
//! nothing flushes `204 No Content`.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use nextrush::app::App;
//! use nextrush::router::RouterFns;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), nextrush::error::HttpError> {
//!     let mut app = App::new();
//!
//!     app.get("/health", |mut ctx| async move {
//!         ctx.json(serde_json::json!({"status": "ok"}))?;
//!         Ok(ctx)
//!     })?;
//!
//!     app.listen(|addr| {
//!         println!("Server running on http://{}", addr);
//!     })
//!     .await
//! }
//! ```
//!
//! ## Middleware, mounting, shutdown
//!
//! ```no_run
//! use nextrush::app::App;
//! use nextrush::middleware::from_fn;
//! use nextrush::router::{Router, RouterFns};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), nextrush::error::HttpError> {
//! let mut app = App::new();
//!
//! app.use_middleware(from_fn(|ctx, mut next| async move {
//!     tracing::info!(path = %ctx.req.path, "incoming");
//!     next.run(ctx).await
//! }));
//!
//! let mut api = Router::new();
//! api.get("/users/:id", |mut ctx| async move {
//!     let id = ctx.params.get("id").cloned().unwrap_or_default();
//!     ctx.json(serde_json::json!({"id": id}))?;
//!     Ok(ctx)
//! })?;
//! app.mount("/api/v1", api)?;
//!
//! let handle = app.shutdown_handle();
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     handle.shutdown().await;
//! });
//!
//! app.listen(|_| {}).await
//! # }
//! ```

use crate::body::{body_parser, BodyParserOptions};
use crate::context::Context;
use crate::error::filter::{handle_error, ExceptionFilter};
use crate::error::HttpError;
use crate::helpers::join_paths;
use crate::middleware::compose;
use crate::plugin::Plugin;
use crate::req::HttpRequest;
use crate::router::{RouteRegistry, Router, RouterConfig, RouterFns};
use crate::types::{box_future, Handler, HttpMethod, Middleware};
use crate::websocket::{self, Message, WsShared};
use bytes::Bytes;
use http_body_util::Full;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

mod config;

pub use config::{AppConfig, AppOptions};

/// Application lifecycle notifications delivered to [`App::on_event`]
/// observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// The listener is bound and accepting connections.
    Listening {
        /// The bound address (useful with port 0).
        addr: SocketAddr,
    },
    /// Shutdown has begun; no new connections are accepted while in-flight
    /// requests drain.
    Shutdown,
    /// All connections are closed and the server has stopped.
    Closed,
}

type EventObserver = Arc<dyn Fn(&AppEvent) + Send + Sync>;

/// Triggers and awaits application shutdown from outside the accept loop.
///
/// Obtained from [`App::shutdown_handle`] before `listen()` takes over the
/// application. Repeated calls are safe; every call returns once the server
/// has fully closed.
#[derive(Clone)]
pub struct ShutdownHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
    closed_rx: watch::Receiver<bool>,
}

impl ShutdownHandle {
    /// Stops accepting connections, drains in-flight requests up to the
    /// configured graceful timeout, force-closes the rest, and returns once
    /// the `Closed` event has fired.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut closed = self.closed_rx.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

// Everything the accept loop and request tasks share once listen() freezes
// the configuration.
struct Shared {
    config: AppConfig,
    registry: RouteRegistry,
    middleware: Vec<Middleware>,
    body_parser: Middleware,
    filters: Vec<Arc<dyn ExceptionFilter>>,
    ws: Option<Arc<WsShared>>,
    force_close: watch::Receiver<bool>,
    in_flight: AtomicUsize,
}

/// The application: route registry, middleware, plugins, and server
/// lifecycle.
pub struct App {
    config: AppConfig,
    registry: RouteRegistry,
    middleware: Vec<Middleware>,
    body_options: BodyParserOptions,
    filters: Vec<Arc<dyn ExceptionFilter>>,
    plugins: Vec<Arc<dyn Plugin>>,
    websocket: Option<Arc<WsShared>>,
    observers: Vec<EventObserver>,
    listening: bool,
    ctrl_c_shutdown: bool,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
    force_close_tx: watch::Sender<bool>,
    force_close_rx: watch::Receiver<bool>,
}

impl RouterFns for App {
    fn register_route(
        &mut self,
        method: HttpMethod,
        path: &str,
        handler: Handler,
        middleware: Vec<Middleware>,
    ) -> Result<(), HttpError> {
        self.registry.register(method, path, handler, middleware)
    }
}

impl App {
    /// Creates an application with the default configuration.
    pub fn new() -> Self {
        Self::build(AppConfig::default())
    }

    /// Creates an application from a validated configuration.
    pub fn with_config(config: AppConfig) -> Result<Self, HttpError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Creates an application from partial options merged over the defaults.
    pub fn from_options(options: AppOptions) -> Result<Self, HttpError> {
        Ok(Self::build(AppConfig::from_options(options)?))
    }

    fn build(config: AppConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (closed_tx, closed_rx) = watch::channel(false);
        let (force_close_tx, force_close_rx) = watch::channel(false);

        let body_options = BodyParserOptions {
            max_body_size: config.max_body_size,
            max_text_length: config.max_body_size,
            timeout: config.timeout,
            ..Default::default()
        };

        Self {
            config,
            registry: RouteRegistry::new(),
            middleware: Vec::new(),
            body_options,
            filters: Vec::new(),
            plugins: Vec::new(),
            websocket: None,
            observers: Vec::new(),
            listening: false,
            ctrl_c_shutdown: false,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            closed_tx,
            closed_rx,
            force_close_tx,
            force_close_rx,
        }
    }

    /// The application's validated configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Replaces the router configuration (case sensitivity, trailing-slash
    /// handling, capacity). Must be called before any route is registered.
    pub fn router_config(&mut self, config: RouterConfig) -> Result<&mut Self, HttpError> {
        if !self.registry.is_empty() {
            return Err(HttpError::validation(
                "router_config() must be called before registering routes",
            ));
        }
        self.registry = RouteRegistry::with_config(config);
        Ok(self)
    }

    /// Appends a global middleware; global middleware runs before the body
    /// parser, route middleware, and handler, in registration order.
    pub fn use_middleware(&mut self, middleware: Middleware) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    /// Overrides the options of the automatically installed body parser.
    pub fn body_parser_options(&mut self, options: BodyParserOptions) -> &mut Self {
        self.body_options = options;
        self
    }

    /// Registers an exception filter. Filters run in registration order; the
    /// first to claim an error handles it, with the built-in JSON renderer as
    /// the final fallback.
    pub fn use_exception_filter<F: ExceptionFilter + 'static>(&mut self, filter: F) -> &mut Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Registers an observer for [`AppEvent`]s.
    pub fn on_event<F: Fn(&AppEvent) + Send + Sync + 'static>(&mut self, observer: F) -> &mut Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Enables shutdown on Ctrl-C in addition to [`ShutdownHandle`].
    pub fn with_graceful_shutdown(&mut self) -> &mut Self {
        self.ctrl_c_shutdown = true;
        self
    }

    /// Mounts a [`Router`]'s routes under a prefix, preserving their
    /// registration order.
    pub fn mount(&mut self, prefix: &str, router: Router) -> Result<(), HttpError> {
        if !prefix.starts_with('/') {
            return Err(HttpError::validation(format!(
                "Mount prefix must start with '/': '{}'",
                prefix
            )));
        }
        for route in router.routes {
            let full = join_paths(prefix, &route.path);
            self.registry
                .register(route.method, &full, route.handler, route.middleware)?;
        }
        Ok(())
    }

    /// Registers a plugin: validates its configuration, runs its install
    /// hook, and queues its init/cleanup hooks around the server lifecycle.
    /// An install failure is fatal and prevents `listen()`.
    pub fn plugin<P: Plugin + 'static>(&mut self, plugin: P) -> Result<(), HttpError> {
        plugin
            .validate_config()
            .map_err(|e| HttpError::plugin(plugin.name(), e.message().to_string()))?;
        plugin
            .install(self)
            .map_err(|e| HttpError::plugin(plugin.name(), e.message().to_string()))?;
        tracing::info!(
            plugin = plugin.name(),
            version = plugin.version(),
            "plugin installed"
        );
        self.plugins.push(Arc::new(plugin));
        Ok(())
    }

    pub(crate) fn set_websocket(&mut self, shared: Arc<WsShared>) {
        self.websocket = Some(shared);
    }

    /// Registers a WebSocket handler on the installed plugin's mount table.
    /// Fails when no WebSocket plugin has been installed.
    pub fn ws<F, Fut>(&mut self, path: &str, handler: F) -> Result<(), HttpError>
    where
        F: Fn(websocket::Connection, HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let Some(ws) = &self.websocket else {
            return Err(HttpError::internal(
                "ws() requires the WebSocket plugin to be installed",
            ));
        };
        let handler: websocket::WsHandler = Arc::new(move |conn, req| Box::pin(handler(conn, req)));
        ws.add_route(vec![path.to_string()], handler);
        Ok(())
    }

    /// Broadcasts a message to every member of a room across the server.
    pub fn ws_broadcast(&self, room: &str, message: Message) -> Result<(), HttpError> {
        let Some(ws) = &self.websocket else {
            return Err(HttpError::internal(
                "ws_broadcast() requires the WebSocket plugin to be installed",
            ));
        };
        ws.broadcast(room, &message);
        Ok(())
    }

    /// A handle that can trigger and await shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutdown_tx: self.shutdown_tx.clone(),
            closed_rx: self.closed_rx.clone(),
        }
    }

    /// Triggers shutdown and waits for the server to close. Equivalent to
    /// `shutdown_handle().shutdown()`.
    pub async fn shutdown(&self) {
        self.shutdown_handle().shutdown().await;
    }

    fn emit(&self, event: &AppEvent) {
        for observer in &self.observers {
            observer(event);
        }
    }

    /// Binds the configured address and serves until shutdown.
    ///
    /// The callback runs once with the bound address after the `Listening`
    /// event. Calling `listen()` a second time on the same application fails
    /// with a dedicated error. Bind failures and plugin init failures are
    /// fatal.
    pub async fn listen<F: FnOnce(SocketAddr)>(&mut self, cb: F) -> Result<(), HttpError> {
        if self.listening {
            return Err(HttpError::internal(
                "listen() already called on this application",
            ));
        }
        self.listening = true;

        let shared = Arc::new(Shared {
            config: self.config.clone(),
            registry: self.registry.clone(),
            middleware: self.middleware.clone(),
            body_parser: body_parser(self.body_options.clone()),
            filters: self.filters.clone(),
            ws: self.websocket.clone(),
            force_close: self.force_close_rx.clone(),
            in_flight: AtomicUsize::new(0),
        });

        let bind_addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            HttpError::internal(format!("Failed to bind {}: {}", bind_addr, e))
        })?;
        let addr = listener.local_addr()?;

        for plugin in &self.plugins {
            plugin
                .init()
                .await
                .map_err(|e| HttpError::plugin(plugin.name(), e.message().to_string()))?;
        }

        self.emit(&AppEvent::Listening { addr });
        tracing::info!(%addr, "server listening");
        cb(addr);

        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut tasks = tokio::task::JoinSet::new();
        let ctrl_c_enabled = self.ctrl_c_shutdown;
        let ctrl_c = async move {
            if ctrl_c_enabled {
                let _ = tokio::signal::ctrl_c().await;
            } else {
                std::future::pending::<()>().await;
            }
        };
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let shared = Arc::clone(&shared);
                        let keep_alive = self.config.keep_alive;
                        tasks.spawn(async move {
                            serve_http(shared, stream, peer, keep_alive).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to accept connection");
                    }
                },
                _ = shutdown_rx.changed() => break,
                _ = &mut ctrl_c => break,
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        drop(listener);
        self.emit(&AppEvent::Shutdown);
        tracing::info!("shutting down, draining in-flight requests");

        let drain = async {
            while shared.in_flight.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        if tokio::time::timeout(self.config.graceful_timeout, drain)
            .await
            .is_err()
        {
            tracing::warn!("graceful timeout expired, closing remaining connections");
        }
        let _ = self.force_close_tx.send(true);
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        for plugin in &self.plugins {
            if let Err(e) = plugin.cleanup().await {
                tracing::warn!(plugin = plugin.name(), error = %e, "plugin cleanup failed");
            }
        }

        self.emit(&AppEvent::Closed);
        let _ = self.closed_tx.send(true);
        tracing::info!("server closed");
        Ok(())
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

async fn serve_http(
    shared: Arc<Shared>,
    stream: TcpStream,
    peer: SocketAddr,
    keep_alive: Duration,
) {
    let io = TokioIo::new(stream);
    let service = hyper::service::service_fn(move |req| {
        let shared = Arc::clone(&shared);
        handle_request(shared, req, peer)
    });

    let conn = hyper::server::conn::http1::Builder::new()
        .timer(TokioTimer::new())
        .keep_alive(true)
        .header_read_timeout(keep_alive)
        .serve_connection(io, service)
        .with_upgrades();

    if let Err(e) = conn.await {
        tracing::debug!(error = %e, "connection ended with error");
    }
}

// Counts a request as in-flight for the graceful-shutdown drain.
struct InFlightGuard(Arc<Shared>);

impl InFlightGuard {
    fn new(shared: &Arc<Shared>) -> Self {
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(shared))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn handle_request(
    shared: Arc<Shared>,
    req: hyper::Request<hyper::body::Incoming>,
    peer: SocketAddr,
) -> Result<hyper::Response<Full<Bytes>>, Infallible> {
    let _guard = InFlightGuard::new(&shared);

    // Upgrade requests branch to the WebSocket plugin before the middleware
    // chain ever sees them.
    if let Some(ws) = &shared.ws {
        if websocket::is_upgrade_request(req.headers()) {
            return Ok(websocket::handle_upgrade(
                Arc::clone(ws),
                req,
                peer,
                shared.config.trust_proxy,
            ));
        }
    }

    let (parts, body) = req.into_parts();
    let response = match Context::from_hyper(&parts, body, peer, shared.config.trust_proxy) {
        Ok(ctx) => {
            let snapshot = ctx.snapshot();
            match run_pipeline_caught(&shared, ctx).await {
                Ok(ctx) => ctx.into_response().into_hyper(),
                Err(err) => {
                    let mut error_ctx = Context::from_snapshot(snapshot);
                    handle_error(&shared.filters, &err, &mut error_ctx, shared.config.debug).await;
                    error_ctx.into_response().into_hyper()
                }
            }
        }
        Err(err) => {
            // The request head itself was unusable (e.g. an unsupported
            // method); answer with the error shape on a bare context.
            let mut bare = HttpRequest::new();
            bare.set_path(parts.uri.path());
            let mut error_ctx = Context::new(bare);
            handle_error(&shared.filters, &err, &mut error_ctx, shared.config.debug).await;
            error_ctx.into_response().into_hyper()
        }
    };

    Ok(response)
}

// Runs the pipeline in its own task so a panicking handler surfaces as a
// normalized Internal error instead of tearing the connection down.
async fn run_pipeline_caught(shared: &Arc<Shared>, ctx: Context) -> Result<Context, HttpError> {
    let task = tokio::spawn({
        let shared = Arc::clone(shared);
        async move { run_pipeline(&shared, ctx).await }
    });

    match task.await {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => {
            let payload = join_err.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_string());
            tracing::error!(panic = %message, "handler panicked");
            Err(HttpError::internal(format!("Handler panicked: {}", message)))
        }
        Err(_) => Err(HttpError::service_unavailable("Request was cancelled")),
    }
}

// Composes globals + body parser with the router dispatch as the terminal
// handler, bounded by the per-request timeout and the shutdown deadline.
async fn run_pipeline(shared: &Arc<Shared>, ctx: Context) -> Result<Context, HttpError> {
    let mut chain_vec = shared.middleware.clone();
    chain_vec.push(shared.body_parser.clone());
    let mut chain = compose(chain_vec, Some(router_dispatch(Arc::clone(shared))));

    let mut force = shared.force_close.clone();
    let forced = async move {
        loop {
            if *force.borrow() {
                return;
            }
            if force.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        result = tokio::time::timeout(shared.config.timeout, chain.run(ctx)) => match result {
            Ok(result) => result,
            Err(_) => Err(HttpError::request_timeout("Request processing timed out")),
        },
        _ = forced => Err(HttpError::service_unavailable("Server is shutting down")),
    }
}

// The routing step runs after the global middleware: match, bind params,
// then run the route-scoped chain. A miss probes the other methods to tell
// 405 from 404.
fn router_dispatch(shared: Arc<Shared>) -> Handler {
    Arc::new(move |mut ctx: Context| {
        let shared = Arc::clone(&shared);
        box_future(async move {
            let method = ctx.req.method;
            let path = ctx.req.path.clone();

            match shared.registry.find(method, &path) {
                Some(matched) => {
                    ctx.params = matched.params;
                    let mut chain = compose(matched.middleware, Some(matched.handler));
                    chain.run(ctx).await
                }
                None => {
                    let allowed = shared.registry.allowed_methods(&path, method);
                    if allowed.is_empty() {
                        Err(HttpError::not_found(format!("Cannot {} {}", method, path)))
                    } else {
                        Err(HttpError::method_not_allowed(&allowed))
                    }
                }
            }
        })
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::router::RouterFns;

    fn expect_err<T, E>(result: Result<T, E>) -> E {
        match result {
            Ok(_) => panic!("expected Err"),
            Err(e) => e,
        }
    }

    #[test]
    fn mount_prefixes_router_routes() {
        let mut api = Router::new();
        api.get("/status", |mut ctx| async move {
            ctx.text("ok")?;
            Ok(ctx)
        })
        .unwrap();
        api.get("/", |mut ctx| async move {
            ctx.text("root")?;
            Ok(ctx)
        })
        .unwrap();

        let mut app = App::new();
        app.mount("/api/v1", api).unwrap();

        assert!(app.registry.find(HttpMethod::GET, "/api/v1/status").is_some());
        assert!(app.registry.find(HttpMethod::GET, "/api/v1").is_some());
        assert!(app.registry.find(HttpMethod::GET, "/status").is_none());
    }

    #[test]
    fn mount_rejects_bad_prefix() {
        let mut app = App::new();
        assert!(app.mount("api", Router::new()).is_err());
    }

    #[test]
    fn router_config_only_before_routes() {
        let mut app = App::new();
        app.router_config(RouterConfig {
            ignore_trailing_slash: true,
            ..Default::default()
        })
        .unwrap();
        app.get("/a", |ctx| async move { Ok(ctx) }).unwrap();
        assert!(app
            .router_config(RouterConfig::default())
            .is_err());
    }

    #[test]
    fn failing_plugin_install_is_fatal() {
        struct BrokenPlugin;

        #[async_trait::async_trait]
        impl Plugin for BrokenPlugin {
            fn name(&self) -> &str {
                "broken"
            }
            fn version(&self) -> &str {
                "0.0.1"
            }
            fn install(&self, _app: &mut App) -> Result<(), HttpError> {
                Err(HttpError::internal("nope"))
            }
        }

        let mut app = App::new();
        let err = app.plugin(BrokenPlugin).unwrap_err();
        assert_eq!(err.code(), "PLUGIN_ERROR");
        assert!(app.plugins.is_empty());
    }

    #[test]
    fn ws_requires_installed_plugin() {
        let mut app = App::new();
        assert!(app.ws("/ws", |_conn, _req| async {}).is_err());
        assert!(app
            .ws_broadcast("room", Message::Text("x".into()))
            .is_err());
    }

    #[test]
    fn invalid_config_rejected_at_construction() {
        let err = expect_err(App::from_options(AppOptions {
            host: Some("bad host".into()),
            ..Default::default()
        }));
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
