//! The HTTP kernel: global middleware, router dispatch, error boundary and
//! the terminate phase.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug_span, warn, Instrument};

use crate::config::Config;
use crate::error::Error;
use crate::exception::{ExceptionHandler, Translator};
use crate::middleware::MiddlewareRegistry;
use crate::pipeline::{Destination, Pipeline};
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;

/// Runs every request through the global middleware and on to the router.
///
/// Errors raised anywhere below the kernel are caught here, once: reported,
/// then rendered by the [`ExceptionHandler`]. [`Kernel::handle`] therefore
/// always produces a response.
///
/// Configure the global list with [`push_middleware`](Kernel::push_middleware)
/// and [`prepend_middleware`](Kernel::prepend_middleware) before the kernel
/// is shared; it is read-only afterwards.
///
/// ```rust
/// use slice::middleware::{MiddlewareRegistry, Trace};
/// use slice::{Kernel, Router, Translator};
///
/// let registry = MiddlewareRegistry::new().register("trace", Trace);
/// let mut kernel = Kernel::new(Router::new(), registry, Translator::new());
/// kernel.push_middleware("trace");
/// assert!(kernel.has_middleware("trace"));
/// ```
pub struct Kernel {
    router: Router,
    registry: MiddlewareRegistry,
    middleware: Vec<String>,
    exceptions: Arc<dyn ExceptionHandler>,
    skip_middleware: bool,
}

impl Kernel {
    pub fn new(router: Router, registry: MiddlewareRegistry, exceptions: impl ExceptionHandler + 'static) -> Self {
        Self {
            router,
            registry,
            middleware: Vec::new(),
            exceptions: Arc::new(exceptions),
            skip_middleware: false,
        }
    }

    /// A kernel with a [`Translator`] built from `config`.
    pub fn from_config(config: &Config, router: Router, registry: MiddlewareRegistry) -> Self {
        Self::new(router, registry, Translator::from_config(config)).skip_middleware(config.app.skip_middleware)
    }

    /// Turns off all middleware, global and route, for both phases.
    pub fn skip_middleware(mut self, skip: bool) -> Self {
        self.skip_middleware = skip;
        self
    }

    pub fn has_middleware(&self, id: &str) -> bool {
        self.middleware.iter().any(|m| m == id)
    }

    /// Adds `id` to the front of the global list unless already present.
    pub fn prepend_middleware(&mut self, id: impl Into<String>) -> &mut Self {
        let id = id.into();
        if !self.has_middleware(&id) {
            self.middleware.insert(0, id);
        }
        self
    }

    /// Adds `id` to the end of the global list unless already present.
    pub fn push_middleware(&mut self, id: impl Into<String>) -> &mut Self {
        let id = id.into();
        if !self.has_middleware(&id) {
            self.middleware.push(id);
        }
        self
    }

    /// The global middleware list, outermost first.
    pub fn middleware(&self) -> &[String] {
        &self.middleware
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn registry(&self) -> &MiddlewareRegistry {
        &self.registry
    }

    /// Sends `request` through the global middleware to the router.
    pub async fn handle(&self, request: Request) -> Response {
        let span = debug_span!("request", method = %request.method(), path = %request.path());
        async move {
            let snapshot = request.clone();
            match self.send_request_through_router(request).await {
                Ok(response) => response,
                Err(error) => {
                    self.exceptions.report(&error);
                    self.exceptions.render(&snapshot, error)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn send_request_through_router(&self, request: Request) -> Result<Response, Error> {
        let ids = if self.skip_middleware { Vec::new() } else { self.registry.expand(&self.middleware)? };
        Pipeline::through(&self.registry, &ids)?
            .then(request, &DispatchToRouter(self))
            .await
    }

    /// Calls every terminable middleware, global then route, in the order
    /// `handle` ran them. Identifiers that no longer resolve are skipped.
    pub fn terminate(&self, request: &Request, response: &Response) {
        if self.skip_middleware {
            return;
        }
        for id in self.gather_middleware(request) {
            match self.registry.resolve(&id) {
                Ok(resolved) => {
                    if let Some(terminable) = resolved.middleware.terminable() {
                        terminable.terminate(request, response);
                    }
                }
                Err(error) => warn!(middleware = %id, %error, "skipping middleware in terminate"),
            }
        }
    }

    fn gather_middleware(&self, request: &Request) -> Vec<String> {
        let mut ids = self.registry.expand(&self.middleware).unwrap_or_else(|error| {
            warn!(%error, "global middleware could not be expanded for terminate");
            Vec::new()
        });
        if let Some((route, _)) = self.router.find(request.method(), request.path()) {
            match self.router.gather_route_middleware(&route, &self.registry) {
                Ok(route_ids) => ids.extend(route_ids),
                Err(error) => warn!(route = %route.path(), %error, "route middleware could not be gathered for terminate"),
            }
        }
        ids
    }
}

/// Router dispatch as the terminal action of the global pipeline.
struct DispatchToRouter<'a>(&'a Kernel);

#[async_trait]
impl Destination for DispatchToRouter<'_> {
    async fn dispatch(&self, request: Request) -> Result<Response, Error> {
        let kernel = self.0;
        kernel.router.dispatch(request, &kernel.registry, kernel.skip_middleware).await
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::{Method, StatusCode};

    use super::*;

    async fn ok(_: Request) -> Result<&'static str, Error> {
        Ok("ok")
    }

    fn kernel() -> Kernel {
        Kernel::new(Router::new().on(Method::GET, "/", ok), MiddlewareRegistry::new(), Translator::new())
    }

    #[test]
    fn push_and_prepend_are_idempotent() {
        let mut kernel = kernel();
        kernel.push_middleware("a").push_middleware("b").prepend_middleware("c");
        assert_eq!(kernel.middleware(), ["c", "a", "b"]);

        kernel.push_middleware("c").prepend_middleware("b").push_middleware("a");
        assert_eq!(kernel.middleware(), ["c", "a", "b"]);
    }

    #[tokio::test]
    async fn unknown_global_middleware_renders_an_error() {
        let mut kernel = kernel();
        kernel.push_middleware("ghost");
        let req = Request::from(http::Request::builder().uri("/").body(Bytes::new()).unwrap());
        let res = kernel.handle(req).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(res.exception().is_some());
    }

    #[tokio::test]
    async fn skip_middleware_ignores_the_global_list() {
        let mut kernel = kernel().skip_middleware(true);
        kernel.push_middleware("ghost");
        let req = Request::from(http::Request::builder().uri("/").body(Bytes::new()).unwrap());
        let res = kernel.handle(req).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body().as_ref(), b"ok");
    }
}
