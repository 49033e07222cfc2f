//! Authentication gate.

use async_trait::async_trait;

use crate::error::Error;
use crate::middleware::Middleware;
use crate::pipeline::Next;
use crate::request::Request;
use crate::response::Response;

/// Lets a request through when any of its guards accepts it.
///
/// The identifier parameters name the guards (`"auth:api,admin"`); without
/// parameters the `"web"` guard is checked. The check itself is supplied by
/// the application:
///
/// ```rust
/// use slice::middleware::Authenticate;
///
/// let auth = Authenticate::new(|req, guard| match guard {
///     "api" => req.header("authorization").is_some_and(|h| h.starts_with("Bearer ")),
///     _ => req.header("cookie").is_some(),
/// });
/// ```
pub struct Authenticate<F> {
    check: F,
}

impl<F> Authenticate<F>
where
    F: Fn(&Request, &str) -> bool + Send + Sync + 'static,
{
    pub fn new(check: F) -> Self {
        Self { check }
    }
}

#[async_trait]
impl<F> Middleware for Authenticate<F>
where
    F: Fn(&Request, &str) -> bool + Send + Sync + 'static,
{
    async fn handle(&self, req: Request, next: Next<'_>, params: &[String]) -> Result<Response, Error> {
        let default = ["web".to_owned()];
        let guards = if params.is_empty() { &default[..] } else { params };

        if guards.iter().any(|guard| (self.check)(&req, guard)) {
            return next.run(req).await;
        }
        Err(Error::unauthenticated(guards.iter().cloned()))
    }
}
