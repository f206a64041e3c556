#![warn(missing_docs)]

//! # Plugin Module
//!
//! The lifecycle contract for optional extensions. A plugin installs its
//! middleware, routes, or capabilities onto the application at registration
//! time; `init` runs once the listener is up; `cleanup` runs during shutdown.
//! Plugins load in registration order, and an install failure is fatal: it
//! prevents `listen()` from succeeding.
//!
//! ## Example
//!
//! ```
//! use async_trait::async_trait;
//! use nextrush::app::App;
//! use nextrush::error::HttpError;
//! use nextrush::plugin::Plugin;
//! use nextrush::router::RouterFns;
//!
//! struct HealthPlugin;
//!
//! #[async_trait]
//! impl Plugin for HealthPlugin {
//!     fn name(&self) -> &str {
//!         "health"
//!     }
//!
//!     fn version(&self) -> &str {
//!         "1.0.0"
//!     }
//!
//!     fn install(&self, app: &mut App) -> Result<(), HttpError> {
//!         app.get("/healthz", |mut ctx| async move {
//!             ctx.json(serde_json::json!({"status": "ok"}))?;
//!             Ok(ctx)
//!         })
//!     }
//! }
//!
//! let mut app = App::new();
//! app.plugin(HealthPlugin).unwrap();
//! ```

use crate::app::App;
use crate::error::HttpError;
use async_trait::async_trait;

/// An optional extension with install/init/cleanup hooks.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// The plugin's name, used in error reporting.
    fn name(&self) -> &str;

    /// The plugin's version string.
    fn version(&self) -> &str;

    /// Registers the plugin's middleware, routes, and capabilities with the
    /// application. Runs at registration time; an error aborts startup.
    fn install(&self, app: &mut App) -> Result<(), HttpError>;

    /// Validates the plugin's own configuration before install.
    fn validate_config(&self) -> Result<(), HttpError> {
        Ok(())
    }

    /// Runs after the listener has started accepting connections.
    async fn init(&self) -> Result<(), HttpError> {
        Ok(())
    }

    /// Runs during application shutdown, before the `Closed` event.
    async fn cleanup(&self) -> Result<(), HttpError> {
        Ok(())
    }

    /// Reports whether the plugin is healthy.
    async fn health_check(&self) -> Result<(), HttpError> {
        Ok(())
    }
}
