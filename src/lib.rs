//! # slice
//!
//! A small HTTP micro-framework: a middleware kernel, a router and an
//! exception handler that turns every error into a proper response.
//!
//! ## The request path
//!
//! ```text
//! request → Kernel (global middleware) → Router (route middleware → handler) → response
//!              └── any error: report, then render (JSON, HTML or redirect)
//! after the response is sent: terminate, for middleware that asked for it
//! ```
//!
//! - Middleware is registered by name in a [`MiddlewareRegistry`] and
//!   referenced by identifier: `"auth"`, `"auth:api,admin"`, or a group
//!   name such as `"web"`.
//! - Handlers return `Result<impl IntoResponse, Error>`. Errors are caught
//!   once, at the kernel.
//! - The [`Translator`] picks JSON or HTML by the request's `Accept` header,
//!   hides error details unless `app.debug` is on, and renders
//!   `errors/<status>.html` templates with [`tera`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use slice::middleware::{MiddlewareRegistry, Trace};
//! use slice::{Config, Error, Kernel, Method, Request, Router, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let config = Config::load("slice.toml")?;
//!
//!     let router = Router::new()
//!         .on(Method::GET, "/users/{id}", get_user);
//!     let registry = MiddlewareRegistry::new().register("trace", Trace);
//!
//!     let mut kernel = Kernel::from_config(&config, router, registry);
//!     kernel.push_middleware("trace");
//!
//!     Server::from_config(&config).serve(kernel).await
//! }
//!
//! async fn get_user(req: Request) -> Result<String, Error> {
//!     match req.param("id") {
//!         Some("42") => Ok("alice".to_owned()),
//!         _ => Err(Error::http(StatusCode::NOT_FOUND, "No such user")),
//!     }
//! }
//! ```

mod config;
mod error;
mod handler;
mod kernel;
mod pipeline;
mod request;
mod response;
mod router;
mod server;
mod view;

pub mod exception;
pub mod middleware;

pub use config::{AppConfig, Config, ExceptionsConfig, ServerConfig, ViewConfig};
pub use error::{Error, ErrorKind, Frame, HttpError, Presentable, Reportable, Unauthenticated, ValidationError};
pub use exception::{DebugRenderer, DiagnosticPage, ExceptionHandler, Translator};
pub use handler::Handler;
pub use http::{Method, StatusCode};
pub use kernel::Kernel;
pub use middleware::{Flow, Middleware, MiddlewareRegistry, Terminable};
pub use pipeline::{Destination, Next, Pipeline};
pub use request::Request;
pub use response::{ContentType, Flash, IntoResponse, Response, ResponseBuilder};
pub use router::{Route, Router};
pub use server::Server;
pub use view::{TemplateViews, Views};
