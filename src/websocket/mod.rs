#![warn(missing_docs)]

//! # WebSocket Module
//!
//! RFC 6455 WebSocket support as an application plugin: handshake
//! validation, per-connection frame handling with fragmentation and control
//! frames, a heartbeat that evicts silent peers, and room-based
//! broadcasting.
//!
//! Upgrade requests branch off before the HTTP middleware chain. The
//! handshake is validated (method, headers, version, key), the mount path is
//! matched against the registered endpoints (exact, `*` wildcard, or a list
//! of alternatives), and the accept token is derived per RFC 6455. Failed
//! handshakes answer on the HTTP side (400/403/404/503) without upgrading.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use nextrush::app::App;
//! use nextrush::websocket::{Message, WebSocketConfig, WebSocketPlugin};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), nextrush::error::HttpError> {
//!     let mut app = App::new();
//!     let ws = WebSocketPlugin::new(WebSocketConfig::default());
//!
//!     ws.ws("/ws", |conn, _req| async move {
//!         conn.send_text("welcome").ok();
//!         let echo = conn.clone();
//!         conn.on_message(move |_, msg| {
//!             if let Message::Text(text) = msg {
//!                 echo.send_text(format!("Echo: {}", text)).ok();
//!             }
//!         });
//!     });
//!
//!     app.plugin(ws)?;
//!     app.listen(|addr| println!("listening on {}", addr)).await
//! }
//! ```

use crate::app::App;
use crate::error::HttpError;
use crate::helpers::wildcard_matches;
use crate::plugin::Plugin;
use crate::req::{BodySource, HttpRequest};
use crate::types::BoxFuture;
use ahash::AHashMap;
use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use http_body_util::Full;
use hyper_util::rt::TokioIo;
use sha1::{Digest, Sha1};
use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

pub mod frame;
pub mod rooms;

pub use frame::{
    CLOSE_GOING_AWAY, CLOSE_INVALID_PAYLOAD, CLOSE_MESSAGE_TOO_BIG, CLOSE_NORMAL,
    CLOSE_PROTOCOL_ERROR,
};
pub use rooms::{RoomEvent, RoomManager};

use frame::{close_payload, parse_close_payload, read_frame, write_frame, Frame, FrameError, Opcode};

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// A complete, assembled WebSocket message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A UTF-8 text message.
    Text(String),
    /// A binary message.
    Binary(Bytes),
}

/// Configuration for a [`WebSocketPlugin`].
#[derive(Clone)]
pub struct WebSocketConfig {
    /// Heartbeat period; connections whose last pong is older than one
    /// period are closed with 1001 on the next tick. Default 30 s.
    pub heartbeat: Duration,
    /// Maximum concurrent connections; handshakes beyond this answer 503.
    /// Default 1024.
    pub max_connections: usize,
    /// Maximum assembled message size; larger messages close with 1009.
    /// Default 1 MiB.
    pub max_message_size: usize,
    /// Origin check; a handshake whose `Origin` this rejects answers 403.
    pub verify_origin: Option<Arc<dyn Fn(&str) -> bool + Send + Sync>>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(30),
            max_connections: 1024,
            max_message_size: 1024 * 1024,
            verify_origin: None,
        }
    }
}

impl std::fmt::Debug for WebSocketConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConfig")
            .field("heartbeat", &self.heartbeat)
            .field("max_connections", &self.max_connections)
            .field("max_message_size", &self.max_message_size)
            .field("verify_origin", &self.verify_origin.is_some())
            .finish()
    }
}

/// A handler invoked once per successful upgrade.
pub type WsHandler = Arc<dyn Fn(Connection, HttpRequest) -> BoxFuture<()> + Send + Sync>;

type MessageCallback = Arc<dyn Fn(Connection, Message) + Send + Sync>;
type CloseCallback = Arc<dyn Fn(Connection, u16, String) + Send + Sync>;

#[derive(Debug)]
pub(crate) enum Outgoing {
    Text(String),
    Binary(Bytes),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(u16, String),
}

struct ConnState {
    alive: bool,
    last_pong: Instant,
    closed: bool,
    rooms: HashSet<String>,
}

struct ConnInner {
    id: String,
    url: String,
    out: mpsc::UnboundedSender<Outgoing>,
    state: Mutex<ConnState>,
    on_message: Mutex<Option<MessageCallback>>,
    on_close: Mutex<Option<CloseCallback>>,
    shared: Mutex<Weak<WsShared>>,
}

/// A live WebSocket connection handle.
///
/// Handles are cheap to clone and safe to keep inside callbacks; sends are
/// queued to a per-connection writer task.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnInner>,
}

impl Connection {
    fn new(id: String, url: String, out: mpsc::UnboundedSender<Outgoing>) -> Self {
        Self {
            inner: Arc::new(ConnInner {
                id,
                url,
                out,
                state: Mutex::new(ConnState {
                    alive: true,
                    last_pong: Instant::now(),
                    closed: false,
                    rooms: HashSet::new(),
                }),
                on_message: Mutex::new(None),
                on_close: Mutex::new(None),
                shared: Mutex::new(Weak::new()),
            }),
        }
    }

    /// The connection id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The path the connection was opened against.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Whether the connection is still considered alive.
    pub fn is_alive(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        state.alive && !state.closed
    }

    /// The rooms this connection currently belongs to.
    pub fn rooms(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .unwrap()
            .rooms
            .iter()
            .cloned()
            .collect()
    }

    /// Queues a message for delivery.
    pub fn send(&self, message: Message) -> Result<(), HttpError> {
        let out = match message {
            Message::Text(text) => Outgoing::Text(text),
            Message::Binary(bytes) => Outgoing::Binary(bytes),
        };
        self.queue(out)
    }

    /// Queues a text message.
    pub fn send_text<T: Into<String>>(&self, text: T) -> Result<(), HttpError> {
        self.queue(Outgoing::Text(text.into()))
    }

    /// Queues a binary message.
    pub fn send_binary<B: Into<Bytes>>(&self, bytes: B) -> Result<(), HttpError> {
        self.queue(Outgoing::Binary(bytes.into()))
    }

    /// Queues a ping.
    pub fn ping(&self) -> Result<(), HttpError> {
        self.queue(Outgoing::Ping(Vec::new()))
    }

    /// Queues a close frame and marks the connection closed. Idempotent.
    pub fn close(&self, code: u16, reason: &str) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.closed = true;
            state.alive = false;
        }
        let _ = self
            .inner
            .out
            .send(Outgoing::Close(code, reason.to_string()));
    }

    /// Joins a room on this connection's plugin.
    pub fn join(&self, room: &str) -> Result<(), HttpError> {
        let shared = self.shared()?;
        shared.rooms.add(self, room);
        Ok(())
    }

    /// Leaves a room.
    pub fn leave(&self, room: &str) -> Result<(), HttpError> {
        let shared = self.shared()?;
        shared.rooms.remove(self, room);
        Ok(())
    }

    /// Broadcasts to a room through this connection's plugin, excluding this
    /// connection itself.
    pub fn broadcast_others(&self, room: &str, message: Message) -> Result<(), HttpError> {
        let shared = self.shared()?;
        shared.rooms.broadcast(room, &message, Some(self));
        Ok(())
    }

    /// Registers the message callback, replacing any prior one.
    pub fn on_message<F: Fn(Connection, Message) + Send + Sync + 'static>(&self, callback: F) {
        *self.inner.on_message.lock().unwrap() = Some(Arc::new(callback));
    }

    /// Registers the close callback, replacing any prior one. Invoked once
    /// with the close code and reason when the connection ends.
    pub fn on_close<F: Fn(Connection, u16, String) + Send + Sync + 'static>(&self, callback: F) {
        *self.inner.on_close.lock().unwrap() = Some(Arc::new(callback));
    }

    fn queue(&self, out: Outgoing) -> Result<(), HttpError> {
        if self.inner.state.lock().unwrap().closed {
            return Err(HttpError::internal("Connection is closed"));
        }
        self.inner
            .out
            .send(out)
            .map_err(|_| HttpError::internal("Connection writer is gone"))
    }

    fn attach(&self, shared: &Arc<WsShared>) {
        *self.inner.shared.lock().unwrap() = Arc::downgrade(shared);
    }

    fn shared(&self) -> Result<Arc<WsShared>, HttpError> {
        self.inner
            .shared
            .lock()
            .unwrap()
            .upgrade()
            .ok_or_else(|| HttpError::internal("WebSocket plugin is gone"))
    }

    pub(crate) fn record_join(&self, room: &str) {
        self.inner.state.lock().unwrap().rooms.insert(room.to_string());
    }

    pub(crate) fn record_leave(&self, room: &str) {
        self.inner.state.lock().unwrap().rooms.remove(room);
    }

    pub(crate) fn record_leave_all(&self) {
        self.inner.state.lock().unwrap().rooms.clear();
    }

    fn touch_pong(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.last_pong = Instant::now();
        state.alive = true;
    }

    fn pong_age(&self) -> Duration {
        self.inner.state.lock().unwrap().last_pong.elapsed()
    }

    fn message_callback(&self) -> Option<MessageCallback> {
        self.inner.on_message.lock().unwrap().clone()
    }

    fn take_close_callback(&self) -> Option<CloseCallback> {
        self.inner.on_close.lock().unwrap().take()
    }

    // Callbacks capture Connection clones; clearing them breaks the Arc
    // cycle once the connection is finished.
    fn clear_callbacks(&self) {
        *self.inner.on_message.lock().unwrap() = None;
        *self.inner.on_close.lock().unwrap() = None;
    }

    #[cfg(test)]
    pub(crate) fn test_pair(id: &str) -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(id.to_string(), "/test".to_string(), tx), rx)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("url", &self.inner.url)
            .field("alive", &self.is_alive())
            .finish()
    }
}

struct WsRoute {
    patterns: Vec<String>,
    handler: WsHandler,
}

pub(crate) struct WsShared {
    config: WebSocketConfig,
    routes: Mutex<Vec<WsRoute>>,
    connections: Mutex<AHashMap<String, Connection>>,
    pub(crate) rooms: RoomManager,
    heartbeat_started: AtomicBool,
}

impl WsShared {
    pub(crate) fn add_route(&self, patterns: Vec<String>, handler: WsHandler) {
        self.routes.lock().unwrap().push(WsRoute { patterns, handler });
    }

    fn find_route(&self, path: &str) -> Option<WsHandler> {
        let routes = self.routes.lock().unwrap();
        routes
            .iter()
            .find(|route| route.patterns.iter().any(|p| wildcard_matches(p, path)))
            .map(|route| route.handler.clone())
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub(crate) fn broadcast(&self, room: &str, message: &Message) {
        self.rooms.broadcast(room, message, None);
    }
}

/// The WebSocket plugin: register endpoints with [`ws`](WebSocketPlugin::ws),
/// then install onto an application with
/// [`App::plugin`](crate::app::App::plugin).
pub struct WebSocketPlugin {
    shared: Arc<WsShared>,
}

impl WebSocketPlugin {
    /// Creates a plugin with the given configuration.
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            shared: Arc::new(WsShared {
                config,
                routes: Mutex::new(Vec::new()),
                connections: Mutex::new(AHashMap::new()),
                rooms: RoomManager::new(),
                heartbeat_started: AtomicBool::new(false),
            }),
        }
    }

    /// Registers a handler for upgrades on one mount path (exact, or a
    /// wildcard containing `*`).
    pub fn ws<F, Fut>(&self, path: &str, handler: F)
    where
        F: Fn(Connection, HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ws_any(&[path], handler);
    }

    /// Registers a handler for upgrades on any of several mount paths.
    pub fn ws_any<F, Fut>(&self, paths: &[&str], handler: F)
    where
        F: Fn(Connection, HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: WsHandler = Arc::new(move |conn, req| Box::pin(handler(conn, req)));
        self.shared
            .add_route(paths.iter().map(|p| p.to_string()).collect(), handler);
    }

    /// The plugin's room manager, for observers and scoped broadcast.
    pub fn rooms(&self) -> &RoomManager {
        &self.shared.rooms
    }

    /// Broadcasts a message to every member of a room.
    pub fn broadcast(&self, room: &str, message: Message) {
        self.shared.broadcast(room, &message);
    }

    /// The number of live connections.
    pub fn connection_count(&self) -> usize {
        self.shared.connection_count()
    }
}

#[async_trait]
impl Plugin for WebSocketPlugin {
    fn name(&self) -> &str {
        "websocket"
    }

    fn version(&self) -> &str {
        "2.0.0"
    }

    fn install(&self, app: &mut App) -> Result<(), HttpError> {
        app.set_websocket(self.shared.clone());
        Ok(())
    }

    fn validate_config(&self) -> Result<(), HttpError> {
        if self.shared.config.heartbeat < Duration::from_millis(100) {
            return Err(HttpError::plugin(
                "websocket",
                "heartbeat period must be at least 100 ms",
            ));
        }
        if self.shared.config.max_message_size == 0 {
            return Err(HttpError::plugin(
                "websocket",
                "max_message_size must be positive",
            ));
        }
        Ok(())
    }

    async fn init(&self) -> Result<(), HttpError> {
        spawn_heartbeat(&self.shared);
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), HttpError> {
        let conns: Vec<Connection> = self
            .shared
            .connections
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();
        for conn in conns {
            conn.close(CLOSE_GOING_AWAY, "server shutting down");
            drop_connection(&self.shared, &conn, CLOSE_GOING_AWAY, "server shutting down");
        }
        Ok(())
    }
}

/// Whether a request asks for a WebSocket upgrade.
pub(crate) fn is_upgrade_request(headers: &hyper::HeaderMap) -> bool {
    let upgrade = headers
        .get(hyper::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    let connection = headers
        .get(hyper::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        })
        .unwrap_or(false);
    upgrade && connection
}

// base64(SHA1(key + GUID)) per RFC 6455 §4.2.2.
fn accept_token(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

// Everything about a handshake that can be judged without consuming the
// request body, so it stays testable off the wire.
fn check_handshake<B>(
    shared: &WsShared,
    req: &hyper::Request<B>,
) -> Result<(String, WsHandler), (u16, String)> {
    let path = req.uri().path();
    let Some(handler) = shared.find_route(path) else {
        return Err((404, format!("No WebSocket endpoint at {}", path)));
    };

    if req.method() != hyper::Method::GET {
        return Err((400, "WebSocket handshake must use GET".to_string()));
    }
    if !is_upgrade_request(req.headers()) {
        return Err((400, "Missing Upgrade/Connection headers".to_string()));
    }
    let version = req
        .headers()
        .get("sec-websocket-version")
        .and_then(|v| v.to_str().ok());
    if version != Some("13") {
        return Err((400, "Unsupported Sec-WebSocket-Version".to_string()));
    }
    let Some(key) = req
        .headers()
        .get("sec-websocket-key")
        .and_then(|v| v.to_str().ok())
    else {
        return Err((400, "Missing Sec-WebSocket-Key".to_string()));
    };

    if let Some(verify) = &shared.config.verify_origin {
        let origin = req
            .headers()
            .get(hyper::header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !verify(origin) {
            return Err((403, "Origin not allowed".to_string()));
        }
    }

    if shared.connection_count() >= shared.config.max_connections {
        return Err((503, "Too many WebSocket connections".to_string()));
    }

    Ok((accept_token(key), handler))
}

/// Performs the upgrade handshake and spawns the connection task. Handshake
/// failures produce a plain HTTP response without upgrading.
pub(crate) fn handle_upgrade(
    shared: Arc<WsShared>,
    mut req: hyper::Request<hyper::body::Incoming>,
    peer: SocketAddr,
    trust_proxy: bool,
) -> hyper::Response<Full<Bytes>> {
    let (accept, handler) = match check_handshake(&shared, &req) {
        Ok(ok) => ok,
        Err((status, message)) => return plain_response(status, &message),
    };

    let request = match HttpRequest::from_head(
        req.method(),
        req.uri(),
        req.headers(),
        peer,
        trust_proxy,
        BodySource::Taken,
    ) {
        Ok(request) => request,
        Err(err) => return plain_response(400, err.message()),
    };

    let upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        match upgrade.await {
            Ok(upgraded) => {
                serve_connection(shared, TokioIo::new(upgraded), handler, request).await;
            }
            Err(err) => {
                tracing::debug!(error = %err, "websocket upgrade failed after handshake");
            }
        }
    });

    hyper::Response::builder()
        .status(hyper::StatusCode::SWITCHING_PROTOCOLS)
        .header(hyper::header::UPGRADE, "websocket")
        .header(hyper::header::CONNECTION, "Upgrade")
        .header("sec-websocket-accept", accept)
        .body(Full::from(Bytes::new()))
        .unwrap_or_else(|_| plain_response(500, "handshake response failed"))
}

fn plain_response(status: u16, message: &str) -> hyper::Response<Full<Bytes>> {
    hyper::Response::builder()
        .status(hyper::StatusCode::from_u16(status).unwrap_or(hyper::StatusCode::BAD_REQUEST))
        .header(hyper::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::from(Bytes::from(message.to_string())))
        .unwrap_or_else(|_| hyper::Response::new(Full::from(Bytes::new())))
}

// Runs one upgraded connection: a writer task drains the outgoing queue
// while this task reads, assembles, and dispatches frames.
async fn serve_connection<S>(
    shared: Arc<WsShared>,
    io: S,
    handler: WsHandler,
    request: HttpRequest,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut read_half, mut write_half) = tokio::io::split(io);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let conn = Connection::new(
        uuid::Uuid::new_v4().to_string(),
        request.path.clone(),
        tx,
    );
    conn.attach(&shared);
    shared
        .connections
        .lock()
        .unwrap()
        .insert(conn.id().to_string(), conn.clone());

    tracing::debug!(conn = conn.id(), path = conn.url(), "websocket connected");

    let writer = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            let result = match out {
                Outgoing::Text(text) => {
                    write_frame(&mut write_half, Opcode::Text, text.as_bytes()).await
                }
                Outgoing::Binary(bytes) => {
                    write_frame(&mut write_half, Opcode::Binary, &bytes).await
                }
                Outgoing::Ping(payload) => {
                    write_frame(&mut write_half, Opcode::Ping, &payload).await
                }
                Outgoing::Pong(payload) => {
                    write_frame(&mut write_half, Opcode::Pong, &payload).await
                }
                Outgoing::Close(code, reason) => {
                    let _ =
                        write_frame(&mut write_half, Opcode::Close, &close_payload(code, &reason))
                            .await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    handler(conn.clone(), request).await;

    let (code, reason) = read_loop(&shared, &conn, &mut read_half).await;

    conn.close(code, &reason);
    drop_connection(&shared, &conn, code, &reason);
    let _ = writer.await;
    tracing::debug!(conn = conn.id(), code, "websocket disconnected");
}

// Reads frames until the connection ends, returning the close code/reason.
async fn read_loop<R: AsyncRead + Unpin>(
    shared: &Arc<WsShared>,
    conn: &Connection,
    reader: &mut R,
) -> (u16, String) {
    let max = shared.config.max_message_size;
    let mut fragment: Option<(Opcode, Vec<u8>)> = None;

    loop {
        match read_frame(reader, max).await {
            Ok(Frame {
                opcode: Opcode::Ping,
                payload,
                ..
            }) => {
                let _ = conn.queue(Outgoing::Pong(payload));
            }
            Ok(Frame {
                opcode: Opcode::Pong,
                ..
            }) => {
                conn.touch_pong();
            }
            Ok(Frame {
                opcode: Opcode::Close,
                payload,
                ..
            }) => {
                let (code, reason) = parse_close_payload(&payload);
                return (code, reason);
            }
            Ok(Frame {
                opcode: opcode @ (Opcode::Text | Opcode::Binary),
                fin,
                payload,
            }) => {
                if fragment.is_some() {
                    return (CLOSE_PROTOCOL_ERROR, "interleaved message".to_string());
                }
                if fin {
                    if let Some(close) = deliver(conn, opcode, payload) {
                        return close;
                    }
                } else {
                    fragment = Some((opcode, payload));
                }
            }
            Ok(Frame {
                opcode: Opcode::Continuation,
                fin,
                payload,
            }) => {
                let Some((opcode, mut buffer)) = fragment.take() else {
                    return (CLOSE_PROTOCOL_ERROR, "unexpected continuation".to_string());
                };
                if buffer.len() + payload.len() > max {
                    return (CLOSE_MESSAGE_TOO_BIG, "message too big".to_string());
                }
                buffer.extend_from_slice(&payload);
                if fin {
                    if let Some(close) = deliver(conn, opcode, buffer) {
                        return close;
                    }
                } else {
                    fragment = Some((opcode, buffer));
                }
            }
            Err(FrameError::TooLarge) => {
                return (CLOSE_MESSAGE_TOO_BIG, "message too big".to_string());
            }
            Err(FrameError::Protocol(message)) => {
                return (CLOSE_PROTOCOL_ERROR, message.to_string());
            }
            Err(FrameError::Io(_)) => {
                // Peer went away without a close frame.
                return (CLOSE_GOING_AWAY, "connection lost".to_string());
            }
        }
    }
}

// Dispatches an assembled message; a Some return is a close verdict.
fn deliver(conn: &Connection, opcode: Opcode, payload: Vec<u8>) -> Option<(u16, String)> {
    let message = match opcode {
        Opcode::Text => match String::from_utf8(payload) {
            Ok(text) => Message::Text(text),
            Err(_) => {
                return Some((CLOSE_INVALID_PAYLOAD, "text message is not UTF-8".to_string()))
            }
        },
        _ => Message::Binary(Bytes::from(payload)),
    };

    if let Some(callback) = conn.message_callback() {
        callback(conn.clone(), message);
    }
    None
}

// Unregisters the connection exactly once: room cleanup, the close
// callback, then callback teardown.
fn drop_connection(shared: &Arc<WsShared>, conn: &Connection, code: u16, reason: &str) {
    let removed = shared
        .connections
        .lock()
        .unwrap()
        .remove(conn.id())
        .is_some();
    if !removed {
        return;
    }

    shared.rooms.leave_all(conn);
    conn.close(code, reason);
    if let Some(callback) = conn.take_close_callback() {
        callback(conn.clone(), code, reason.to_string());
    }
    conn.clear_callbacks();
}

fn spawn_heartbeat(shared: &Arc<WsShared>) {
    if shared.heartbeat_started.swap(true, Ordering::SeqCst) {
        return;
    }

    let weak = Arc::downgrade(shared);
    let period = shared.config.heartbeat;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(shared) = weak.upgrade() else {
                break;
            };

            let conns: Vec<Connection> = shared
                .connections
                .lock()
                .unwrap()
                .values()
                .cloned()
                .collect();
            for conn in conns {
                if conn.pong_age() > period {
                    conn.close(CLOSE_GOING_AWAY, "ping timeout");
                    drop_connection(&shared, &conn, CLOSE_GOING_AWAY, "ping timeout");
                } else {
                    let _ = conn.ping();
                }
            }
        }
    });
}

#[cfg(test)]
mod test {
    use super::*;

    fn plugin_with_route(path: &str) -> WebSocketPlugin {
        let plugin = WebSocketPlugin::new(WebSocketConfig::default());
        plugin.ws(path, |_conn, _req| async {});
        plugin
    }

    fn expect_err<T, E>(result: Result<T, E>) -> E {
        match result {
            Ok(_) => panic!("expected Err"),
            Err(e) => e,
        }
    }

    fn handshake_request(path: &str) -> hyper::Request<()> {
        hyper::Request::builder()
            .method(hyper::Method::GET)
            .uri(path)
            .header("upgrade", "websocket")
            .header("connection", "Upgrade")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(())
            .unwrap()
    }

    #[test]
    fn accept_token_matches_rfc_example() {
        assert_eq!(
            accept_token("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn valid_handshake_is_accepted() {
        let plugin = plugin_with_route("/ws");
        let (accept, _) = check_handshake(&plugin.shared, &handshake_request("/ws")).unwrap();
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn unknown_path_is_404() {
        let plugin = plugin_with_route("/ws");
        let (status, _) =
            expect_err(check_handshake(&plugin.shared, &handshake_request("/nope")));
        assert_eq!(status, 404);
    }

    #[test]
    fn wildcard_and_alternative_paths_match() {
        let plugin = WebSocketPlugin::new(WebSocketConfig::default());
        plugin.ws_any(&["/chat/*", "/feed"], |_conn, _req| async {});
        assert!(check_handshake(&plugin.shared, &handshake_request("/chat/any/depth")).is_ok());
        assert!(check_handshake(&plugin.shared, &handshake_request("/feed")).is_ok());
        assert!(check_handshake(&plugin.shared, &handshake_request("/other")).is_err());
    }

    #[test]
    fn non_get_method_is_400() {
        let plugin = plugin_with_route("/ws");
        let mut req = handshake_request("/ws");
        *req.method_mut() = hyper::Method::POST;
        let (status, _) = expect_err(check_handshake(&plugin.shared, &req));
        assert_eq!(status, 400);
    }

    #[test]
    fn wrong_version_or_missing_key_is_400() {
        let plugin = plugin_with_route("/ws");

        let mut req = handshake_request("/ws");
        req.headers_mut()
            .insert("sec-websocket-version", "8".parse().unwrap());
        assert_eq!(expect_err(check_handshake(&plugin.shared, &req)).0, 400);

        let mut req = handshake_request("/ws");
        req.headers_mut().remove("sec-websocket-key");
        assert_eq!(expect_err(check_handshake(&plugin.shared, &req)).0, 400);
    }

    #[test]
    fn origin_rejection_is_403() {
        let config = WebSocketConfig {
            verify_origin: Some(Arc::new(|origin: &str| origin == "https://trusted.example")),
            ..Default::default()
        };
        let plugin = WebSocketPlugin::new(config);
        plugin.ws("/ws", |_conn, _req| async {});

        let mut req = handshake_request("/ws");
        req.headers_mut()
            .insert("origin", "https://evil.example".parse().unwrap());
        assert_eq!(expect_err(check_handshake(&plugin.shared, &req)).0, 403);

        let mut req = handshake_request("/ws");
        req.headers_mut()
            .insert("origin", "https://trusted.example".parse().unwrap());
        assert!(check_handshake(&plugin.shared, &req).is_ok());
    }

    #[test]
    fn connection_limit_is_503() {
        let config = WebSocketConfig {
            max_connections: 0,
            ..Default::default()
        };
        let plugin = WebSocketPlugin::new(config);
        plugin.ws("/ws", |_conn, _req| async {});
        let (status, _) =
            expect_err(check_handshake(&plugin.shared, &handshake_request("/ws")));
        assert_eq!(status, 503);
    }

    #[test]
    fn upgrade_detection_requires_both_headers() {
        let req = handshake_request("/ws");
        assert!(is_upgrade_request(req.headers()));

        let mut headers = req.headers().clone();
        headers.remove("upgrade");
        assert!(!is_upgrade_request(&headers));

        let mut headers = req.headers().clone();
        headers.insert("connection", "keep-alive".parse().unwrap());
        assert!(!is_upgrade_request(&headers));
    }

    #[tokio::test]
    async fn served_connection_echoes_and_cleans_up() {
        use tokio::io::AsyncReadExt;

        let plugin = WebSocketPlugin::new(WebSocketConfig::default());
        let shared = plugin.shared.clone();

        let handler: WsHandler = Arc::new(|conn, _req| {
            Box::pin(async move {
                conn.send_text("welcome").ok();
                let echo = conn.clone();
                conn.on_message(move |_, msg| {
                    if let Message::Text(text) = msg {
                        echo.send_text(format!("Echo: {}", text)).ok();
                    }
                });
            })
        });

        let (server_io, mut client) = tokio::io::duplex(4096);
        let serve = tokio::spawn(serve_connection(
            shared.clone(),
            server_io,
            handler,
            HttpRequest::new(),
        ));

        // Greeting arrives unmasked from the server.
        let mut head = [0u8; 2];
        client.read_exact(&mut head).await.unwrap();
        assert_eq!(head[0], 0x81);
        let mut greeting = vec![0u8; head[1] as usize];
        client.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting, b"welcome");

        // Send a masked "hi" and expect "Echo: hi".
        let mask = [9u8, 8, 7, 6];
        let mut frame = vec![0x81, 0x80 | 2];
        frame.extend_from_slice(&mask);
        frame.extend(b"hi".iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        tokio::io::AsyncWriteExt::write_all(&mut client, &frame).await.unwrap();

        let mut head = [0u8; 2];
        client.read_exact(&mut head).await.unwrap();
        let mut echo = vec![0u8; head[1] as usize];
        client.read_exact(&mut echo).await.unwrap();
        assert_eq!(echo, b"Echo: hi");
        assert_eq!(shared.connection_count(), 1);

        // Close the client side; the server unregisters the connection.
        drop(client);
        serve.await.unwrap();
        assert_eq!(shared.connection_count(), 0);
    }
}
