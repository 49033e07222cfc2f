//! Middleware layer.
//!
//! Middleware intercepts a request on its way to the route handler and the
//! response on its way back: tracing, authentication, maintenance mode,
//! header rewriting. Each one is registered in a [`MiddlewareRegistry`] under
//! a name, and referenced by identifier (`"auth"`, `"auth:api,admin"`) from
//! the kernel's global list, from middleware groups, and from routes.
//!
//! A middleware receives the request, a [`Next`] continuation and the
//! parameters of its identifier. It may
//!
//! - pass through: `next.run(req).await`,
//! - short-circuit: return its own response without calling `next`,
//! - rewrite the request before forwarding it.
//!
//! ```rust
//! use async_trait::async_trait;
//! use slice::{Error, Middleware, Next, Request, Response};
//!
//! struct RequestId;
//!
//! #[async_trait]
//! impl Middleware for RequestId {
//!     async fn handle(&self, mut req: Request, next: Next<'_>, _params: &[String]) -> Result<Response, Error> {
//!         req.headers_mut().insert("x-request-id", http::HeaderValue::from_static("1"));
//!         next.run(req).await
//!     }
//! }
//! ```
//!
//! Middleware that must clean up after the response went out exposes a
//! [`Terminable`] through [`Middleware::terminable`].

mod auth;
mod maintenance;
mod registry;
mod trace;

use std::future::Future;

use async_trait::async_trait;

use crate::error::Error;
use crate::pipeline::Next;
use crate::request::Request;
use crate::response::Response;

pub use auth::Authenticate;
pub use maintenance::PreventRequestsDuringMaintenance;
pub use registry::{parse, MiddlewareRegistry, Resolved};
pub use trace::Trace;

/// A unit of request processing composable into a chain.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Processes `req`. `params` are the identifier's parameters, in order.
    async fn handle(&self, req: Request, next: Next<'_>, params: &[String]) -> Result<Response, Error>;

    /// The post-response capability, if this middleware has one.
    fn terminable(&self) -> Option<&dyn Terminable> {
        None
    }
}

/// Post-response cleanup. Runs after the response has been handed to the
/// server; nothing it does can change what the client receives.
pub trait Terminable: Send + Sync {
    fn terminate(&self, req: &Request, res: &Response);
}

/// What a [`before`] middleware decided.
pub enum Flow {
    /// Hand the (possibly rewritten) request to the next stage.
    Continue(Request),
    /// Answer now. Later stages never run.
    ShortCircuit(Response),
    /// Abort; the exception handler renders the error.
    Failed(Error),
}

/// Builds a middleware from an async closure that only looks at the request
/// on its way in.
///
/// ```rust
/// use slice::middleware::{before, Flow};
/// use slice::Response;
/// use http::StatusCode;
///
/// let block_admin = before(|req, _params| async move {
///     if req.path().starts_with("/admin") {
///         Flow::ShortCircuit(Response::status(StatusCode::FORBIDDEN))
///     } else {
///         Flow::Continue(req)
///     }
/// });
/// ```
pub fn before<F, Fut>(f: F) -> Before<F>
where
    F: Fn(Request, Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Flow> + Send + 'static,
{
    Before(f)
}

/// Middleware returned by [`before`].
pub struct Before<F>(F);

#[async_trait]
impl<F, Fut> Middleware for Before<F>
where
    F: Fn(Request, Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Flow> + Send + 'static,
{
    async fn handle(&self, req: Request, next: Next<'_>, params: &[String]) -> Result<Response, Error> {
        match (self.0)(req, params.to_vec()).await {
            Flow::Continue(req) => next.run(req).await,
            Flow::ShortCircuit(res) => Ok(res),
            Flow::Failed(err) => Err(err),
        }
    }
}
