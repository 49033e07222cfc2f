//! Minimal slice application: JSON endpoints, an auth-protected group,
//! maintenance mode and templated error pages.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -H 'accept: application/json' http://localhost:3000/users/7
//!   curl -X POST http://localhost:3000/users \
//!        -H 'accept: application/json' -d '{"email":"nope","password":"secret"}'
//!   curl -H 'accept: application/json' http://localhost:3000/admin/stats
//!   curl -H 'authorization: Bearer t0k3n' http://localhost:3000/admin/stats
//!   touch storage/down && curl http://localhost:3000/users/42

use serde::Deserialize;
use serde_json::json;
use slice::middleware::{
    before, Authenticate, Flow, MiddlewareRegistry, PreventRequestsDuringMaintenance, Trace,
};
use slice::{
    Config, Error, Kernel, Method, Request, Response, Route, Router, Server, StatusCode,
    ValidationError,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let config = match Config::load("slice.toml") {
        Ok(config) => config,
        Err(_) => Config::default().apply_env(|key| std::env::var(key).ok()),
    };

    let router = Router::new()
        .on(Method::GET, "/users/{id}", get_user)
        .on(Method::POST, "/users", create_user)
        .group("/admin", ["admin"], |admin| {
            admin
                .on(Method::GET, "/stats", stats)
                .route(Route::new(Method::DELETE, "/users/{id}", delete_user).middleware(["json"]))
        });

    let registry = MiddlewareRegistry::new()
        .register("trace", Trace)
        .register("down", PreventRequestsDuringMaintenance::new("storage/down"))
        .register(
            "auth",
            Authenticate::new(|req, _guard| {
                req.header("authorization")
                    .is_some_and(|h| h == "Bearer t0k3n")
            }),
        )
        .register(
            "json",
            before(|req, _params| async move {
                if req.header("content-type").is_some_and(|t| !t.contains("json")) {
                    Flow::ShortCircuit(Response::status(StatusCode::UNSUPPORTED_MEDIA_TYPE))
                } else {
                    Flow::Continue(req)
                }
            }),
        )
        .group("admin", ["auth:api", "json"])
        .priority(["trace", "down", "auth"]);

    let mut kernel = Kernel::from_config(&config, router, registry);
    kernel.push_middleware("down:/healthz").prepend_middleware("trace");

    Server::from_config(&config).serve(kernel).await
}

// GET /users/{id}
async fn get_user(req: Request) -> Result<serde_json::Value, Error> {
    match req.param("id") {
        Some("42") => Ok(json!({ "id": 42, "name": "alice" })),
        _ => Err(Error::http(StatusCode::NOT_FOUND, "No such user")),
    }
}

#[derive(Deserialize)]
struct NewUser {
    email: String,
}

// POST /users
async fn create_user(req: Request) -> Result<Response, Error> {
    let user: NewUser = req.json()?;
    if !user.email.contains('@') {
        return Err(ValidationError::new()
            .error("email", "The email must be a valid email address.")
            .with_input(req.input())
            .into());
    }
    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("location", "/users/99")
        .json(serde_json::to_vec(&json!({ "id": 99, "email": user.email }))?))
}

// GET /admin/stats
async fn stats(_req: Request) -> Result<serde_json::Value, Error> {
    Ok(json!({ "users": 1 }))
}

// DELETE /admin/users/{id}
async fn delete_user(_req: Request) -> Result<StatusCode, Error> {
    Ok(StatusCode::NO_CONTENT)
}
