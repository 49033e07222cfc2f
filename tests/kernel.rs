use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use slice::middleware::{before, parse, Flow, MiddlewareRegistry};
use slice::{
    Error, Kernel, Method, Middleware, Next, Request, Response, Route, Router, StatusCode, Terminable,
    Translator,
};

type Log = Arc<Mutex<Vec<String>>>;

/// Records `handle` and `terminate` calls under its name.
struct Recorder {
    name: &'static str,
    log: Log,
}

#[async_trait]
impl Middleware for Recorder {
    async fn handle(&self, req: Request, next: Next<'_>, params: &[String]) -> Result<Response, Error> {
        self.log.lock().unwrap().push(format!("{}:{}", self.name, params.join(",")));
        next.run(req).await
    }

    fn terminable(&self) -> Option<&dyn Terminable> {
        Some(self)
    }
}

impl Terminable for Recorder {
    fn terminate(&self, _req: &Request, res: &Response) {
        self.log.lock().unwrap().push(format!("terminate {} {}", self.name, res.status_code().as_u16()));
    }
}

/// Answers `403` without calling the rest of the chain.
struct Gate;

#[async_trait]
impl Middleware for Gate {
    async fn handle(&self, _req: Request, _next: Next<'_>, _params: &[String]) -> Result<Response, Error> {
        Ok(Response::status(StatusCode::FORBIDDEN))
    }
}

async fn hello(req: Request) -> Result<String, Error> {
    let who = req.header("x-user").unwrap_or("world");
    Ok(format!("hello {who}"))
}

fn request(method: Method, uri: &str) -> Request {
    Request::from(http::Request::builder().method(method).uri(uri).body(Bytes::new()).unwrap())
}

fn registry(log: &Log) -> MiddlewareRegistry {
    let recorder = |name| Recorder { name, log: Arc::clone(log) };
    MiddlewareRegistry::new()
        .register("outer", recorder("outer"))
        .register("inner", recorder("inner"))
        .register("session", recorder("session"))
        .register("auth", recorder("auth"))
        .register("bindings", recorder("bindings"))
        .register("gate", Gate)
        .group("web", ["session", "bindings"])
        .priority(["session", "auth", "bindings"])
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[tokio::test]
async fn global_then_route_middleware_run_in_order() {
    let log = Log::default();
    let router = Router::new().route(Route::new(Method::GET, "/", hello).middleware(["web", "auth:admin"]));
    let mut kernel = Kernel::new(router, registry(&log), Translator::new());
    kernel.push_middleware("inner").prepend_middleware("outer");

    let res = kernel.handle(request(Method::GET, "/")).await;

    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.body().as_ref(), b"hello world");
    assert_eq!(entries(&log), ["outer:", "inner:", "session:", "auth:admin", "bindings:"]);
}

#[tokio::test]
async fn short_circuit_stops_the_chain_but_terminate_still_runs() {
    let log = Log::default();
    let router = Router::new().route(Route::new(Method::GET, "/", hello).middleware(["auth"]));
    let mut kernel = Kernel::new(router, registry(&log), Translator::new());
    kernel.push_middleware("outer").push_middleware("gate").push_middleware("inner");

    let req = request(Method::GET, "/");
    let res = kernel.handle(req.clone()).await;
    assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(entries(&log), ["outer:"]);

    kernel.terminate(&req, &res);
    assert_eq!(
        entries(&log),
        ["outer:", "terminate outer 403", "terminate inner 403", "terminate auth 403"]
    );
}

#[tokio::test]
async fn terminate_skips_identifiers_that_do_not_resolve() {
    let log = Log::default();
    let mut kernel = Kernel::new(Router::new().on(Method::GET, "/", hello), registry(&log), Translator::new());
    kernel.push_middleware("outer").push_middleware("ghost");

    let req = request(Method::GET, "/");
    let res = kernel.handle(req.clone()).await;
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

    kernel.terminate(&req, &res);
    assert_eq!(entries(&log), ["terminate outer 500"]);
}

#[tokio::test]
async fn before_middleware_can_rewrite_or_fail() {
    let registry = MiddlewareRegistry::new()
        .register(
            "impersonate",
            before(|mut req, params| async move {
                let user = params.first().cloned().unwrap_or_default();
                match http::HeaderValue::from_str(&user) {
                    Ok(value) => {
                        req.headers_mut().insert("x-user", value);
                        Flow::Continue(req)
                    }
                    Err(e) => Flow::Failed(Error::other(e)),
                }
            }),
        )
        .register("closed", before(|_req, _params| async { Flow::Failed(Error::http(StatusCode::GONE, "closed")) }));

    let router = Router::new()
        .route(Route::new(Method::GET, "/me", hello).middleware(["impersonate:alice"]))
        .route(Route::new(Method::GET, "/old", hello).middleware(["closed"]));
    let kernel = Kernel::new(router, registry, Translator::new());

    let res = kernel.handle(request(Method::GET, "/me")).await;
    assert_eq!(res.body().as_ref(), b"hello alice");

    let res = kernel.handle(request(Method::GET, "/old")).await;
    assert_eq!(res.status_code(), StatusCode::GONE);
}

#[tokio::test]
async fn unknown_path_and_wrong_method_are_rendered() {
    let kernel = Kernel::new(
        Router::new().on(Method::GET, "/users", hello),
        MiddlewareRegistry::new(),
        Translator::new(),
    );

    let res = kernel.handle(request(Method::GET, "/nope")).await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
    assert!(std::str::from_utf8(res.body()).unwrap().contains("could not be found"));

    let res = kernel.handle(request(Method::PUT, "/users")).await;
    assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.header("allow"), Some("GET"));
}

#[tokio::test]
async fn head_requests_reach_get_routes() {
    let kernel = Kernel::new(Router::new().on(Method::GET, "/", hello), MiddlewareRegistry::new(), Translator::new());
    let res = kernel.handle(request(Method::HEAD, "/")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
}

#[test]
fn identifiers_parse_into_name_and_parameters() {
    assert_eq!(parse("auth:api,admin"), ("auth", vec!["api".to_owned(), "admin".to_owned()]));
    assert_eq!(parse("auth"), ("auth", vec![]));
    assert_eq!(parse("auth:"), ("auth", vec![String::new()]));
}
