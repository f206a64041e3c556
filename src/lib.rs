#![warn(missing_docs)]

//! # NextRush
//!
//! NextRush is a lightweight, modular web framework for building HTTP APIs and web
//! applications in Rust. It dispatches requests through a Koa-style `(ctx, next)`
//! middleware pipeline, matches them against a compiled route table, and ships a
//! content-type-aware body parser, a typed error taxonomy with exception filters,
//! and an RFC 6455 WebSocket server with room-based broadcasting.
//!
//! ## Modules
//!
//! - [`app`] - The main application struct, configuration, and server lifecycle.
//! - [`context`] - The per-request [`context::Context`] carrying request, response,
//!   params, state, and parsed body.
//! - [`req`] - The parsed HTTP request and utilities for extracting data from it.
//! - [`res`] - The buffered HTTP response and methods for building it.
//! - [`router`] - Path-pattern compilation and matching.
//! - [`middleware`] - Middleware composition and the [`middleware::Next`] chain driver.
//! - [`body`] - The smart body parser and its typed results.
//! - [`error`] - The error taxonomy and exception filters.
//! - [`websocket`] - WebSocket upgrades, connections, and rooms.
//! - [`plugin`] - The plugin lifecycle contract for optional extensions.

/// The main application struct and its methods for configuring and running your server.
///
/// See [`app::App`] for details.
pub mod app;

/// The per-request context carrying request, response, params, state, and body.
///
/// See [`context::Context`] for details.
pub mod context;

/// The parsed HTTP request and its methods for extracting data from requests.
///
/// See [`req::HttpRequest`] for details.
pub mod req;

/// The buffered HTTP response and its methods for building responses.
///
/// See [`res::HttpResponse`] for details.
pub mod res;

/// The router: path-pattern compilation and (method, path) matching.
///
/// See [`router::RouteRegistry`] and [`router::Router`] for details.
pub mod router;

/// Middleware composition and the `next()` chain driver.
///
/// See [`middleware::Next`] and [`middleware::from_fn`] for details.
pub mod middleware;

/// The smart body parser: content-type dispatch, limits, and typed results.
///
/// See [`body::BodyParseResult`] for details.
pub mod body;

/// Error types, the code/status taxonomy, and exception filters.
///
/// See [`error::HttpError`] and [`error::ErrorKind`] for details.
pub mod error;

/// WebSocket upgrades, per-connection handling, heartbeat, and rooms.
///
/// See [`websocket::WebSocketPlugin`] for details.
pub mod websocket;

/// The plugin contract for optional extensions.
///
/// See [`plugin::Plugin`] for details.
pub mod plugin;

/// Core types, traits, and enums used throughout the framework.
pub mod types;

/// Utility functions shared across the framework.
pub mod helpers;

/// Internal test module for framework testing.
mod tests;
