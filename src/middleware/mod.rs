#![warn(missing_docs)]

//! # Middleware Module
//!
//! Koa-style middleware composition. A middleware is an async function
//! `(ctx, next)` that may work before calling [`Next::run`], after it
//! returns, or both, and may skip `next` entirely to short-circuit the
//! pipeline. Composition is index-based: each [`Next`] knows its position in
//! the chain and hands the following middleware a fresh `Next` one step
//! further along.
//!
//! Ordering is strict within a request: global middleware runs before
//! route-scoped middleware, which runs before the handler, all in
//! registration order. Calling `next.run` twice from the same middleware
//! fails with a deterministic error and never re-invokes the downstream
//! chain.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use nextrush::app::App;
//! use nextrush::middleware::from_fn;
//!
//! # fn main() -> Result<(), nextrush::error::HttpError> {
//! let mut app = App::new();
//!
//! app.use_middleware(from_fn(|mut ctx, mut next| async move {
//!     let started = std::time::Instant::now();
//!     let ctx = next.run(ctx).await?;
//!     tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "handled");
//!     Ok(ctx)
//! }));
//! # Ok(())
//! # }
//! ```

use crate::context::Context;
use crate::error::HttpError;
use crate::types::{box_future, BoxFuture, Handler, HandlerResult, Middleware};
use std::future::Future;
use std::sync::Arc;

/// The rest of the pipeline, from one middleware's point of view.
///
/// Each middleware receives its own `Next`; running it invokes the following
/// middleware (or the terminal handler) and resolves once everything
/// downstream has finished. A `Next` can be run once: a second call fails
/// with an `Internal` error without touching the downstream chain again.
pub struct Next {
    chain: Arc<[Middleware]>,
    index: usize,
    handler: Option<Handler>,
    called: bool,
}

impl Next {
    pub(crate) fn new(chain: Arc<[Middleware]>, handler: Option<Handler>) -> Self {
        Self {
            chain,
            index: 0,
            handler,
            called: false,
        }
    }

    /// Invokes the rest of the pipeline.
    ///
    /// When the chain is exhausted, the terminal handler runs; without one the
    /// pipeline resolves to a 404.
    pub fn run(&mut self, ctx: Context) -> BoxFuture<HandlerResult> {
        if self.called {
            return box_future(async {
                Err(HttpError::internal("next() called more than once"))
            });
        }
        self.called = true;

        match self.chain.get(self.index) {
            Some(middleware) => {
                let middleware = middleware.clone();
                let mut next = Next {
                    chain: Arc::clone(&self.chain),
                    index: self.index + 1,
                    handler: self.handler.clone(),
                    called: false,
                };
                box_future(async move { middleware(ctx, next).await })
            }
            None => match self.handler.clone() {
                Some(handler) => handler(ctx),
                None => box_future(async move {
                    Err(HttpError::not_found(format!(
                        "Cannot {} {}",
                        ctx.req.method, ctx.req.path
                    )))
                }),
            },
        }
    }
}

/// Composes an ordered middleware sequence with an optional terminal handler
/// into a single runnable chain.
pub fn compose(middleware: Vec<Middleware>, handler: Option<Handler>) -> Next {
    Next::new(middleware.into(), handler)
}

/// Wraps an async closure into a boxed [`Middleware`].
///
/// # Example
///
/// ```
/// use nextrush::middleware::from_fn;
///
/// let auth = from_fn(|ctx, mut next| async move {
///     if ctx.req.get_header("authorization").is_none() {
///         return Err(nextrush::error::HttpError::unauthorized("Missing token"));
///     }
///     next.run(ctx).await
/// });
/// ```
pub fn from_fn<F, Fut>(f: F) -> Middleware
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |ctx, next| box_future(f(ctx, next)))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::into_handler;
    use serde_json::json;

    fn tracer(label: &'static str) -> Middleware {
        from_fn(move |mut ctx, mut next| async move {
            push_trace(&mut ctx, label);
            next.run(ctx).await
        })
    }

    fn push_trace(ctx: &mut Context, label: &str) {
        let trace = ctx
            .state
            .entry("trace".to_string())
            .or_insert_with(|| json!([]));
        trace.as_array_mut().unwrap().push(json!(label));
    }

    #[tokio::test]
    async fn middleware_runs_in_registration_order() {
        let handler = into_handler(|mut ctx| async move {
            push_trace(&mut ctx, "H");
            Ok(ctx)
        });
        let mut chain = compose(vec![tracer("A"), tracer("B")], Some(handler));

        let ctx = chain.run(Context::for_testing("GET", "/t")).await.unwrap();
        assert_eq!(ctx.state["trace"], json!(["A", "B", "H"]));
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        let blocker = from_fn(|mut ctx, _next| async move {
            ctx.status(401).text("blocked")?;
            Ok(ctx)
        });
        let handler = into_handler(|mut ctx| async move {
            push_trace(&mut ctx, "H");
            Ok(ctx)
        });
        let mut chain = compose(vec![blocker], Some(handler));

        let ctx = chain.run(Context::for_testing("GET", "/t")).await.unwrap();
        assert_eq!(ctx.res.status(), 401);
        assert!(ctx.state.get("trace").is_none());
    }

    #[tokio::test]
    async fn double_next_fails_without_rerunning_downstream() {
        let greedy = from_fn(|ctx, mut next| async move {
            let ctx = next.run(ctx).await?;
            next.run(ctx).await
        });
        let handler = into_handler(|mut ctx| async move {
            push_trace(&mut ctx, "H");
            Ok(ctx)
        });
        let mut chain = compose(vec![greedy], Some(handler));

        let err = chain
            .run(Context::for_testing("GET", "/t"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), 500);
        assert!(err.message().contains("next() called more than once"));
    }

    #[tokio::test]
    async fn empty_chain_without_handler_is_404() {
        let mut chain = compose(Vec::new(), None);
        let err = chain
            .run(Context::for_testing("GET", "/missing"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), 404);
    }

    #[tokio::test]
    async fn errors_unwind_through_pending_next_calls() {
        let witness = from_fn(|mut ctx, mut next| async move {
            push_trace(&mut ctx, "before");
            let result = next.run(ctx).await;
            assert!(result.is_err());
            result
        });
        let bomb = from_fn(|_ctx, _next| async move {
            Err(HttpError::conflict("boom"))
        });
        let mut chain = compose(vec![witness, bomb], None);

        let err = chain
            .run(Context::for_testing("GET", "/t"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), 409);
    }

    #[tokio::test]
    async fn work_after_next_sees_handler_output() {
        let post = from_fn(|ctx, mut next| async move {
            let mut ctx = next.run(ctx).await?;
            let status = ctx.res.status();
            ctx.set_state("observed_status", json!(status));
            Ok(ctx)
        });
        let handler = into_handler(|mut ctx| async move {
            ctx.status(201).text("made")?;
            Ok(ctx)
        });
        let mut chain = compose(vec![post], Some(handler));

        let ctx = chain.run(Context::for_testing("POST", "/t")).await.unwrap();
        assert_eq!(ctx.state["observed_status"], json!(201));
    }
}
