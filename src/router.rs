//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup via [`matchit`]. Routes
//! carry their own middleware identifiers; route groups add a path prefix
//! and middleware to every route declared inside them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use http::header::ALLOW;
use http::{HeaderValue, Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::error::{Error, HttpError};
use crate::handler::{BoxedHandler, Handler};
use crate::middleware::MiddlewareRegistry;
use crate::pipeline::{Destination, Pipeline};
use crate::request::Request;
use crate::response::Response;

/// A method + path pattern bound to a handler and its route middleware.
pub struct Route {
    method: Method,
    path: String,
    handler: BoxedHandler,
    middleware: Vec<String>,
}

impl Route {
    pub fn new(method: Method, path: impl Into<String>, handler: impl Handler) -> Self {
        Self {
            method,
            path: path.into(),
            handler: handler.into_boxed_handler(),
            middleware: Vec::new(),
        }
    }

    /// Appends middleware identifiers to this route.
    pub fn middleware<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.middleware.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn middleware_ids(&self) -> &[String] {
        &self.middleware
    }
}

/// The application router.
///
/// Build it once at startup and hand it to the [`Kernel`](crate::Kernel).
/// Every registration returns `self` so calls chain naturally:
///
/// ```rust,no_run
/// # use slice::{Error, Request, Response, Route, Router};
/// # use http::Method;
/// # async fn home(_: Request) -> Result<Response, Error> { Ok(Response::text("")) }
/// # async fn get_user(_: Request) -> Result<Response, Error> { Ok(Response::text("")) }
/// # async fn delete_user(_: Request) -> Result<Response, Error> { Ok(Response::text("")) }
/// Router::new()
///     .on(Method::GET, "/", home)
///     .group("/api", ["api"], |api| {
///         api.on(Method::GET, "/users/{id}", get_user)
///            .route(Route::new(Method::DELETE, "/users/{id}", delete_user).middleware(["auth:admin"]))
///     });
/// ```
pub struct Router {
    routes: Vec<Arc<Route>>,
    trees: HashMap<Method, MatchitRouter<Arc<Route>>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new(), trees: HashMap::new() }
    }

    /// Registers a handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them.
    ///
    /// # Panics
    ///
    /// Panics if the path is not a valid pattern or conflicts with an
    /// existing route for the same method.
    pub fn on(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.route(Route::new(method, path, handler))
    }

    /// Registers a fully described route.
    ///
    /// # Panics
    ///
    /// Same as [`Router::on`].
    pub fn route(mut self, route: Route) -> Self {
        let route = Arc::new(route);
        self.trees
            .entry(route.method.clone())
            .or_default()
            .insert(route.path.clone(), Arc::clone(&route))
            .unwrap_or_else(|e| panic!("invalid route `{}`: {e}", route.path));
        self.routes.push(route);
        self
    }

    /// Declares routes under a shared path prefix and middleware.
    ///
    /// The group's middleware runs before each route's own.
    pub fn group<I, S, F>(self, prefix: &str, middleware: I, routes: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce(Router) -> Router,
    {
        let shared: Vec<String> = middleware.into_iter().map(Into::into).collect();
        routes(Router::new()).routes.into_iter().fold(self, |router, route| {
            router.route(Route {
                method: route.method.clone(),
                path: join(prefix, &route.path),
                handler: Arc::clone(&route.handler),
                middleware: shared.iter().chain(&route.middleware).cloned().collect(),
            })
        })
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    /// Finds the route for `method` and `path`, with its path parameters.
    /// `HEAD` falls back to `GET`.
    pub fn find(&self, method: &Method, path: &str) -> Option<(Arc<Route>, HashMap<String, String>)> {
        self.lookup(method, path)
            .or_else(|| (*method == Method::HEAD).then(|| self.lookup(&Method::GET, path)).flatten())
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<(Arc<Route>, HashMap<String, String>)> {
        let tree = self.trees.get(method)?;
        let matched = tree.at(path).ok()?;
        let route = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((route, params))
    }

    /// Methods with a route matching `path`, in a stable order.
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let mut methods: Vec<Method> = self.trees.iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(method, _)| method.clone())
            .collect();
        methods.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        methods
    }

    /// The middleware a route runs: groups expanded, duplicates dropped
    /// (first occurrence wins), then sorted by the registry's priority list.
    pub fn gather_route_middleware(
        &self,
        route: &Route,
        registry: &MiddlewareRegistry,
    ) -> Result<Vec<String>, Error> {
        let mut ids: Vec<String> = Vec::new();
        for id in registry.expand(&route.middleware)? {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(registry.sort_by_priority(ids))
    }

    /// Matches `req` to a route and runs it behind its route middleware.
    ///
    /// No route for the path is a `404`; a path served only under other
    /// methods is a `405` carrying an `Allow` header.
    pub async fn dispatch(
        &self,
        mut req: Request,
        registry: &MiddlewareRegistry,
        skip_middleware: bool,
    ) -> Result<Response, Error> {
        let Some((route, params)) = self.find(req.method(), req.path()) else {
            return Err(self.unmatched(req.path()));
        };
        req.params = params;

        let ids = if skip_middleware {
            Vec::new()
        } else {
            self.gather_route_middleware(&route, registry)?
        };
        let pipeline = Pipeline::through(registry, &ids)?;
        pipeline.then(req, &Endpoint(&route.handler)).await
    }

    fn unmatched(&self, path: &str) -> Error {
        let allowed = self.allowed_methods(path);
        if allowed.is_empty() {
            return Error::not_found();
        }
        let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
        match HeaderValue::from_str(&allow) {
            Ok(value) => HttpError::new(StatusCode::METHOD_NOT_ALLOWED, "")
                .with_header(ALLOW, value)
                .into(),
            Err(e) => Error::other(e),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// The route handler as the terminal stage of the route pipeline.
struct Endpoint<'a>(&'a BoxedHandler);

#[async_trait]
impl Destination for Endpoint<'_> {
    async fn dispatch(&self, req: Request) -> Result<Response, Error> {
        self.0.call(req).await
    }
}

/// `("/api/", "/users")` → `"/api/users"`; `("api", "/")` → `"/api"`.
fn join(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let path = path.trim_start_matches('/');
    match (prefix.is_empty(), path.is_empty()) {
        (true, _) => format!("/{path}"),
        (false, true) => format!("/{prefix}"),
        (false, false) => format!("/{prefix}/{path}"),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    async fn ok(_: Request) -> Result<Response, Error> {
        Ok(Response::text("ok"))
    }

    async fn show(req: Request) -> Result<String, Error> {
        Ok(req.param("id").unwrap_or_default().to_owned())
    }

    fn request(method: Method, uri: &str) -> Request {
        Request::from(http::Request::builder().method(method).uri(uri).body(Bytes::new()).unwrap())
    }

    #[test]
    fn joins_prefixes() {
        assert_eq!(join("/api/", "/users"), "/api/users");
        assert_eq!(join("api", "/"), "/api");
        assert_eq!(join("", "users"), "/users");
    }

    #[test]
    fn groups_prefix_paths_and_prepend_middleware() {
        let router = Router::new().group("/api", ["api"], |r| {
            r.route(Route::new(Method::GET, "/users/{id}", ok).middleware(["auth:api"]))
        });
        let (route, params) = router.find(&Method::GET, "/api/users/7").unwrap();
        assert_eq!(route.path(), "/api/users/{id}");
        assert_eq!(route.middleware_ids(), ["api", "auth:api"]);
        assert_eq!(params["id"], "7");
    }

    #[test]
    fn head_falls_back_to_get() {
        let router = Router::new().on(Method::GET, "/", ok);
        assert!(router.find(&Method::HEAD, "/").is_some());
        assert!(router.find(&Method::POST, "/").is_none());
    }

    #[test]
    fn gathers_route_middleware_in_priority_order_without_duplicates() {
        let registry = MiddlewareRegistry::new()
            .group("web", ["session", "bindings"])
            .priority(["session", "auth", "bindings"]);
        let route = Route::new(Method::GET, "/", ok).middleware(["web", "auth", "session", "log"]);
        let ids = Router::new().gather_route_middleware(&route, &registry).unwrap();
        assert_eq!(ids, ["session", "auth", "bindings", "log"]);
    }

    #[tokio::test]
    async fn dispatch_passes_path_parameters() {
        let router = Router::new().on(Method::GET, "/users/{id}", show);
        let res = router
            .dispatch(request(Method::GET, "/users/42"), &MiddlewareRegistry::new(), false)
            .await
            .unwrap();
        assert_eq!(res.body().as_ref(), b"42");
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let router = Router::new().on(Method::GET, "/", ok);
        let err = router
            .dispatch(request(Method::GET, "/missing"), &MiddlewareRegistry::new(), false)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn wrong_method_is_405_with_allow() {
        let router = Router::new()
            .on(Method::GET, "/users", ok)
            .on(Method::POST, "/users", ok);
        let err = router
            .dispatch(request(Method::DELETE, "/users"), &MiddlewareRegistry::new(), false)
            .await
            .unwrap_err();
        let http = err.http_error().unwrap();
        assert_eq!(http.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(http.headers()[ALLOW], "GET, POST");
    }

    #[tokio::test]
    async fn unregistered_route_middleware_fails_dispatch() {
        let router = Router::new().route(Route::new(Method::GET, "/", ok).middleware(["ghost"]));
        let err = router
            .dispatch(request(Method::GET, "/"), &MiddlewareRegistry::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::Resolution(_)));
    }
}
