//! Unified error type.
//!
//! Anything that goes wrong while a request travels through the kernel is an
//! [`Error`]: a missing middleware, an explicit HTTP error raised by a
//! handler, a failed validation, an infrastructure failure. The kernel catches
//! it exactly once, at its boundary, and the exception handler turns it into
//! a response.
//!
//! Every constructor is `#[track_caller]`, so the error remembers where it was
//! raised, and captures a [`Backtrace`] (subject to `RUST_BACKTRACE`). Both
//! show up in debug error pages and debug JSON payloads.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::Location;

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::request::Request;
use crate::response::{IntoResponse, Response};

// ── Error ─────────────────────────────────────────────────────────────────────

/// The error type returned by slice's fallible operations.
pub struct Error {
    inner: Box<Inner>,
}

struct Inner {
    kind: ErrorKind,
    type_name: &'static str,
    location: &'static Location<'static>,
    backtrace: Backtrace,
}

/// What went wrong.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A middleware identifier names nothing in the registry.
    #[error("middleware `{0}` is not registered")]
    Resolution(String),

    /// An explicit HTTP error carrying its own status and headers.
    #[error(transparent)]
    Http(HttpError),

    /// Submitted input failed validation.
    #[error(transparent)]
    Validation(ValidationError),

    /// The request needs an authenticated user and has none.
    #[error(transparent)]
    Unauthenticated(Unauthenticated),

    /// A finished response travelling as an error. Rendered unchanged.
    #[error("request answered early with status {}", .0.status_code())]
    Respond(Box<Response>),

    /// An application error that may know how to render itself.
    #[error("{0}")]
    Custom(Box<dyn Reportable>),

    /// An application error that always converts into a response.
    #[error("{0}")]
    Presentable(Box<dyn Presentable>),

    /// Any other error.
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),

    /// A plain message.
    #[error("{0}")]
    Message(String),
}

impl Error {
    #[track_caller]
    fn new(kind: ErrorKind, type_name: &'static str) -> Self {
        Self {
            inner: Box::new(Inner {
                kind,
                type_name,
                location: Location::caller(),
                backtrace: Backtrace::capture(),
            }),
        }
    }

    /// An HTTP error with the given status. The message is shown to clients
    /// even outside debug mode.
    #[track_caller]
    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        Self::from(HttpError::new(status, message))
    }

    /// `404 Not Found`.
    #[track_caller]
    pub fn not_found() -> Self {
        Self::http(StatusCode::NOT_FOUND, "")
    }

    /// The request is not authenticated for any of `guards`.
    #[track_caller]
    pub fn unauthenticated<I, S>(guards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from(Unauthenticated::new(guards))
    }

    /// Stops request handling and answers with `response` as-is.
    #[track_caller]
    pub fn respond(response: impl IntoResponse) -> Self {
        Self::new(
            ErrorKind::Respond(Box::new(response.into_response())),
            std::any::type_name::<Response>(),
        )
    }

    /// A middleware identifier that could not be resolved.
    #[track_caller]
    pub fn resolution(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resolution(name.into()), "slice::ResolutionError")
    }

    /// Wraps an application error that may render itself.
    #[track_caller]
    pub fn custom<E: Reportable>(error: E) -> Self {
        Self::new(ErrorKind::Custom(Box::new(error)), std::any::type_name::<E>())
    }

    /// Wraps an application error that converts into a response.
    #[track_caller]
    pub fn presentable<P: Presentable>(error: P) -> Self {
        Self::new(ErrorKind::Presentable(Box::new(error)), std::any::type_name::<P>())
    }

    /// Wraps any other error.
    #[track_caller]
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(ErrorKind::Other(Box::new(error)), std::any::type_name::<E>())
    }

    /// An error made of a message only.
    #[track_caller]
    pub fn msg(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Message(message.to_string()), "slice::Error")
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.inner.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.inner.kind
    }

    /// The HTTP status, for errors that carry one.
    pub fn status(&self) -> Option<StatusCode> {
        self.http_error().map(HttpError::status)
    }

    pub fn is_http(&self) -> bool {
        self.http_error().is_some()
    }

    pub fn http_error(&self) -> Option<&HttpError> {
        match &self.inner.kind {
            ErrorKind::Http(e) => Some(e),
            _ => None,
        }
    }

    /// Rust type name of the underlying error, e.g. `slice::error::HttpError`.
    pub fn type_name(&self) -> &'static str {
        self.inner.type_name
    }

    /// Where the error was raised.
    pub fn location(&self) -> &'static Location<'static> {
        self.inner.location
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.inner.backtrace
    }

    /// Backtrace frames, empty when capture was disabled.
    pub fn trace(&self) -> Vec<Frame> {
        match self.inner.backtrace.status() {
            BacktraceStatus::Captured => parse_frames(&self.inner.backtrace.to_string()),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner.kind, f)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.inner.kind)
            .field("location", &self.inner.location)
            .finish()
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.inner.kind {
            ErrorKind::Other(e) => Some(&**e),
            ErrorKind::Custom(e) => e.source(),
            ErrorKind::Presentable(e) => e.source(),
            _ => None,
        }
    }
}

impl From<HttpError> for Error {
    #[track_caller]
    fn from(e: HttpError) -> Self {
        Self::new(ErrorKind::Http(e), std::any::type_name::<HttpError>())
    }
}

impl From<ValidationError> for Error {
    #[track_caller]
    fn from(e: ValidationError) -> Self {
        Self::new(ErrorKind::Validation(e), std::any::type_name::<ValidationError>())
    }
}

impl From<Unauthenticated> for Error {
    #[track_caller]
    fn from(e: Unauthenticated) -> Self {
        Self::new(ErrorKind::Unauthenticated(e), std::any::type_name::<Unauthenticated>())
    }
}

impl From<std::io::Error> for Error {
    #[track_caller]
    fn from(e: std::io::Error) -> Self {
        Self::other(e)
    }
}

impl From<serde_json::Error> for Error {
    #[track_caller]
    fn from(e: serde_json::Error) -> Self {
        Self::other(e)
    }
}

impl From<tera::Error> for Error {
    #[track_caller]
    fn from(e: tera::Error) -> Self {
        Self::other(e)
    }
}

impl From<toml::de::Error> for Error {
    #[track_caller]
    fn from(e: toml::de::Error) -> Self {
        Self::other(e)
    }
}

// ── Capabilities ──────────────────────────────────────────────────────────────

/// An application error that can take over its own rendering.
///
/// Returning `None` from [`render`](Reportable::render) falls through to the
/// default rendering.
pub trait Reportable: std::error::Error + Send + Sync + 'static {
    fn render(&self, _request: &Request) -> Option<Response> {
        None
    }
}

/// An application error that always knows its response.
pub trait Presentable: std::error::Error + Send + Sync + 'static {
    fn to_response(&self, request: &Request) -> Response;
}

// ── HttpError ─────────────────────────────────────────────────────────────────

/// A client or server error with an explicit status code.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct HttpError {
    status: StatusCode,
    message: String,
    headers: HeaderMap,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), headers: HeaderMap::new() }
    }

    /// Adds a header to the eventual error response (e.g. `Retry-After`).
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

// ── ValidationError ───────────────────────────────────────────────────────────

const VALIDATION_MESSAGE: &str = "The given data was invalid.";

/// Field-level validation failure.
///
/// `input` is the submitted data; it is handed back to browsers on redirect,
/// minus the fields configured as sensitive.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
    errors: BTreeMap<String, Vec<String>>,
    input: Map<String, Value>,
    redirect_to: Option<String>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self {
            message: VALIDATION_MESSAGE.to_owned(),
            errors: BTreeMap::new(),
            input: Map::new(),
            redirect_to: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Records one error message for `field`.
    pub fn error(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.errors.entry(field.into()).or_default().push(message.into());
        self
    }

    pub fn with_input(mut self, input: Map<String, Value>) -> Self {
        self.input = input;
        self
    }

    /// Where browsers are sent back to. Defaults to the `Referer`.
    pub fn redirect_to(mut self, url: impl Into<String>) -> Self {
        self.redirect_to = Some(url.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn errors(&self) -> &BTreeMap<String, Vec<String>> {
        &self.errors
    }

    pub fn input(&self) -> &Map<String, Value> {
        &self.input
    }

    pub fn redirect(&self) -> Option<&str> {
        self.redirect_to.as_deref()
    }
}

impl Default for ValidationError {
    fn default() -> Self {
        Self::new()
    }
}

// ── Unauthenticated ───────────────────────────────────────────────────────────

/// No authenticated user for the guards a route requires.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct Unauthenticated {
    message: String,
    guards: Vec<String>,
    redirect_to: Option<String>,
}

impl Unauthenticated {
    pub fn new<I, S>(guards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            message: "Unauthenticated.".to_owned(),
            guards: guards.into_iter().map(Into::into).collect(),
            redirect_to: None,
        }
    }

    /// Where browsers are sent to log in. Defaults to the configured login path.
    pub fn redirect_to(mut self, url: impl Into<String>) -> Self {
        self.redirect_to = Some(url.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn guards(&self) -> &[String] {
        &self.guards
    }

    pub fn redirect(&self) -> Option<&str> {
        self.redirect_to.as_deref()
    }
}

// ── Backtrace frames ──────────────────────────────────────────────────────────

/// One backtrace frame: symbol and source location. Never argument values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Parses the `Display` form of a std backtrace:
///
/// ```text
///    0: my_app::handler
///              at ./src/main.rs:10:5
/// ```
fn parse_frames(text: &str) -> Vec<Frame> {
    let mut frames: Vec<Frame> = Vec::new();
    for line in text.lines().map(str::trim) {
        if let Some(at) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                frame.location = Some(at.to_owned());
            }
            continue;
        }
        if let Some((index, function)) = line.split_once(": ") {
            if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) {
                frames.push(Frame { function: function.to_owned(), location: None });
            }
        }
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backtrace_frames() {
        let text = "   0: app::handler\n             at ./src/main.rs:10:5\n   1: std::rt::lang_start\n";
        let frames = parse_frames(text);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].function, "app::handler");
        assert_eq!(frames[0].location.as_deref(), Some("./src/main.rs:10:5"));
        assert_eq!(frames[1].function, "std::rt::lang_start");
        assert_eq!(frames[1].location, None);
    }

    #[test]
    fn records_the_raise_site() {
        let line = line!() + 1;
        let err = Error::not_found();
        assert_eq!(err.location().line(), line);
        assert!(err.location().file().ends_with("error.rs"));
    }

    #[test]
    fn only_http_errors_carry_a_status() {
        assert_eq!(Error::http(StatusCode::GONE, "gone").status(), Some(StatusCode::GONE));
        assert_eq!(Error::msg("boom").status(), None);
        assert_eq!(Error::resolution("auth").status(), None);
        assert_eq!(Error::unauthenticated(["web"]).status(), None);
    }

    #[test]
    fn display_is_the_message() {
        assert_eq!(Error::http(StatusCode::NOT_FOUND, "no such user").to_string(), "no such user");
        assert_eq!(Error::resolution("auth").to_string(), "middleware `auth` is not registered");
        assert_eq!(Error::from(ValidationError::new()).to_string(), VALIDATION_MESSAGE);
    }

    #[test]
    fn validation_errors_accumulate_per_field() {
        let e = ValidationError::new()
            .error("email", "required")
            .error("email", "must be an email")
            .error("name", "required");
        assert_eq!(e.errors()["email"].len(), 2);
        assert_eq!(e.errors()["name"], vec!["required".to_owned()]);
    }
}
