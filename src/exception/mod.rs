//! Turning errors into responses.
//!
//! The kernel hands every error that escapes the middleware chain to an
//! [`ExceptionHandler`], first to [`report`](ExceptionHandler::report) it,
//! then to [`render`](ExceptionHandler::render) it. [`Translator`] is the
//! stock handler: content negotiated JSON or HTML, debug aware, with
//! templated error pages.

mod debug;
mod handler;

pub use debug::{minimal_page, DebugRenderer, DiagnosticPage};
pub use handler::Translator;

use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

/// Reports and renders the errors the kernel catches.
pub trait ExceptionHandler: Send + Sync {
    /// Records `error` (logging, error tracking). Must not fail.
    fn report(&self, error: &Error);

    /// Produces the response sent in place of the failed one. `request` is
    /// the inbound request as the kernel received it.
    fn render(&self, request: &Request, error: Error) -> Response;
}

/// Error views shipped with slice, by template name.
pub(crate) const ERROR_VIEWS: &[(&str, &str)] = &[
    ("errors/layout.html", include_str!("views/layout.html")),
    ("errors/error.html", include_str!("views/error.html")),
    ("errors/404.html", include_str!("views/404.html")),
    ("errors/500.html", include_str!("views/500.html")),
    ("errors/503.html", include_str!("views/503.html")),
];
