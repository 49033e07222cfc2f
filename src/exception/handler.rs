//! The stock exception handler.

use std::sync::Arc;

use http::header::REFERER;
use http::{HeaderMap, StatusCode};
use serde_json::{json, Map, Value};
use tracing::{error, warn};

use crate::config::Config;
use crate::error::{Error, ErrorKind, HttpError, Unauthenticated, ValidationError};
use crate::exception::debug::{minimal_page, DebugRenderer, DiagnosticPage};
use crate::exception::ExceptionHandler;
use crate::request::Request;
use crate::response::{Flash, Response};
use crate::view::{TemplateViews, Views};

/// Translates errors into responses.
///
/// Per error, the first rule that applies wins:
///
/// 1. a [`Custom`](ErrorKind::Custom) error whose `render` returns a response;
/// 2. a [`Presentable`](ErrorKind::Presentable) error's own response;
/// 3. an early [`Respond`](ErrorKind::Respond), sent unchanged;
/// 4. unauthenticated and validation errors, which have dedicated JSON,
///    redirect and page forms;
/// 5. a JSON payload when the request expects JSON, otherwise an HTML page.
///
/// Outside debug mode, JSON payloads and pages never show the message of an
/// error that is not an [`HttpError`].
pub struct Translator {
    debug: bool,
    dont_flash: Vec<String>,
    login_path: Option<String>,
    app_name: Option<String>,
    views: Arc<dyn Views>,
    debug_renderer: Option<Arc<dyn DebugRenderer>>,
}

impl Translator {
    /// Built-in error views only, no debug renderer, debug off.
    pub fn new() -> Self {
        Self {
            debug: false,
            dont_flash: vec!["password".to_owned(), "password_confirmation".to_owned()],
            login_path: None,
            app_name: None,
            views: Arc::new(TemplateViews::builtin()),
            debug_renderer: None,
        }
    }

    /// Application name, debug flag, view paths, login path and sensitive
    /// fields from `config`. Debug configurations get a [`DiagnosticPage`].
    pub fn from_config(config: &Config) -> Self {
        let translator = Self::new()
            .app_name(config.app.name.clone())
            .debug(config.app.debug)
            .dont_flash(config.exceptions.dont_flash.iter().cloned())
            .views(TemplateViews::new(&config.view.paths));
        let translator = match &config.exceptions.login_path {
            Some(path) => translator.login_path(path.clone()),
            None => translator,
        };
        if config.app.debug {
            translator.debug_renderer(DiagnosticPage::new())
        } else {
            translator
        }
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Input fields never handed back to the browser after a failed validation.
    pub fn dont_flash<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dont_flash = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Where unauthenticated browsers are redirected.
    pub fn login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = Some(path.into());
        self
    }

    /// Shown in error page titles.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    pub fn views(mut self, views: impl Views + 'static) -> Self {
        self.views = Arc::new(views);
        self
    }

    pub fn debug_renderer(mut self, renderer: impl DebugRenderer + 'static) -> Self {
        self.debug_renderer = Some(Arc::new(renderer));
        self
    }

    fn render_response(&self, request: &Request, error: &Error) -> Response {
        match error.kind() {
            ErrorKind::Custom(e) => {
                if let Some(response) = e.render(request) {
                    return response;
                }
            }
            ErrorKind::Presentable(e) => return e.to_response(request),
            ErrorKind::Respond(response) => return (**response).clone(),
            ErrorKind::Unauthenticated(e) => return self.unauthenticated(request, error, e),
            ErrorKind::Validation(e) => return self.invalid(request, error, e),
            _ => {}
        }

        if request.expects_json() {
            self.prepare_json_response(error)
        } else {
            self.prepare_response(error)
        }
    }

    // ── JSON ──────────────────────────────────────────────────────────────────

    fn prepare_json_response(&self, error: &Error) -> Response {
        let (status, headers) = match error.http_error() {
            Some(http) => (http.status(), http.headers().clone()),
            None => (StatusCode::INTERNAL_SERVER_ERROR, HeaderMap::new()),
        };
        json_response(status, &headers, &self.convert_to_json(error))
    }

    fn convert_to_json(&self, error: &Error) -> Value {
        if self.debug {
            let location = error.location();
            return json!({
                "message": error.to_string(),
                "exception": error.type_name(),
                "file": location.file(),
                "line": location.line(),
                "trace": error.trace(),
            });
        }
        match error.http_error() {
            Some(http) => json!({ "message": http.message() }),
            None => json!({ "message": "Server Error" }),
        }
    }

    // ── HTML ──────────────────────────────────────────────────────────────────

    fn prepare_response(&self, error: &Error) -> Response {
        match error.http_error() {
            Some(http) => self.render_http_error(error, http),
            None if self.debug => {
                self.convert_to_response(error, StatusCode::INTERNAL_SERVER_ERROR, &HeaderMap::new())
            }
            None => {
                let coerced = HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, "");
                self.render_http_error(error, &coerced)
            }
        }
    }

    /// The `errors/<status>.html` view if one exists. Otherwise the debug
    /// page in debug mode, else the minimal page.
    fn render_http_error(&self, error: &Error, http: &HttpError) -> Response {
        let page = StatusPage { status: http.status(), message: http.message(), errors: None, old: None };
        self.render_status_page(error, &page, http.headers())
    }

    fn render_status_page(&self, error: &Error, page: &StatusPage<'_>, headers: &HeaderMap) -> Response {
        if let Some(response) = self.try_view(page, headers) {
            return response;
        }
        if self.debug {
            return self.convert_to_response(error, page.status, headers);
        }
        Response::builder()
            .status(page.status)
            .headers(headers)
            .html(minimal_page(error, page.status, false))
    }

    fn try_view(&self, page: &StatusPage<'_>, headers: &HeaderMap) -> Option<Response> {
        let name = format!("errors/{}.html", page.status.as_u16());
        if !self.views.exists(&name) {
            return None;
        }
        match self.views.render(&name, &page.context(self.app_name.as_deref())) {
            Ok(html) => Some(Response::builder().status(page.status).headers(headers).html(html)),
            Err(e) => {
                warn!(view = %name, error = %e, "error view failed to render");
                None
            }
        }
    }

    /// The debug renderer's page, or the minimal page when there is no
    /// renderer or it fails.
    fn convert_to_response(&self, error: &Error, status: StatusCode, headers: &HeaderMap) -> Response {
        let rendered = self.debug_renderer.as_ref().and_then(|renderer| {
            renderer
                .render(error)
                .inspect_err(|e| warn!(error = %e, "debug renderer failed"))
                .ok()
        });
        let html = rendered.unwrap_or_else(|| minimal_page(error, status, true));
        Response::builder().status(status).headers(headers).html(html)
    }

    // ── Authentication and validation ─────────────────────────────────────────

    fn unauthenticated(&self, request: &Request, error: &Error, e: &Unauthenticated) -> Response {
        if request.expects_json() {
            return json_response(StatusCode::UNAUTHORIZED, &HeaderMap::new(), &json!({ "message": e.message() }));
        }
        match e.redirect().or(self.login_path.as_deref()) {
            Some(target) => Response::redirect(target, StatusCode::FOUND),
            None => {
                let page = StatusPage { status: StatusCode::UNAUTHORIZED, message: e.message(), errors: None, old: None };
                self.render_status_page(error, &page, &HeaderMap::new())
            }
        }
    }

    fn invalid(&self, request: &Request, error: &Error, e: &ValidationError) -> Response {
        if request.expects_json() {
            let payload = json!({ "message": e.message(), "errors": e.errors() });
            return json_response(StatusCode::UNPROCESSABLE_ENTITY, &HeaderMap::new(), &payload);
        }

        let old = self.flashable(e.input());
        match e.redirect().or_else(|| request.header(REFERER.as_str())) {
            Some(target) => Response::redirect(target, StatusCode::FOUND)
                .with_flash(Flash { input: old, errors: e.errors().clone() }),
            None => {
                let errors = e.errors().iter().map(|(k, v)| (k.clone(), json!(v))).collect();
                let page = StatusPage {
                    status: StatusCode::UNPROCESSABLE_ENTITY,
                    message: e.message(),
                    errors: Some(errors),
                    old: Some(old),
                };
                self.render_status_page(error, &page, &HeaderMap::new())
            }
        }
    }

    /// `input` without the fields listed in `dont_flash`.
    fn flashable(&self, input: &Map<String, Value>) -> Map<String, Value> {
        input
            .iter()
            .filter(|(field, _)| !self.dont_flash.contains(field))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect()
    }
}

impl Default for Translator {
    fn default() -> Self {
        Self::new()
    }
}

impl ExceptionHandler for Translator {
    fn report(&self, error: &Error) {
        if !should_report(error) {
            return;
        }
        let location = error.location();
        error!(
            kind = error.type_name(),
            file = location.file(),
            line = location.line(),
            error = %error,
            "unhandled error"
        );
    }

    fn render(&self, request: &Request, error: Error) -> Response {
        let error = Arc::new(error);
        self.render_response(request, &error).with_exception(error)
    }
}

/// Errors that are part of normal request flow are not reported.
fn should_report(error: &Error) -> bool {
    !matches!(
        error.kind(),
        ErrorKind::Http(_) | ErrorKind::Validation(_) | ErrorKind::Unauthenticated(_) | ErrorKind::Respond(_)
    )
}

/// Pretty printed JSON with the given status and extra headers.
fn json_response(status: StatusCode, headers: &HeaderMap, payload: &Value) -> Response {
    let body = match serde_json::to_vec_pretty(payload) {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "could not encode error payload");
            b"{}".to_vec()
        }
    };
    Response::builder().status(status).headers(headers).json(body)
}

/// Template context for an `errors/<status>.html` view.
struct StatusPage<'a> {
    status: StatusCode,
    message: &'a str,
    errors: Option<Map<String, Value>>,
    old: Option<Map<String, Value>>,
}

impl StatusPage<'_> {
    fn context(&self, app_name: Option<&str>) -> Value {
        json!({
            "app": { "name": app_name.unwrap_or_default() },
            "code": self.status.as_u16(),
            "title": self.status.canonical_reason().unwrap_or("Error"),
            "exception": { "message": self.message, "status": self.status.as_u16() },
            "errors": self.errors.clone().unwrap_or_default(),
            "old": self.old.clone().unwrap_or_default(),
        })
    }
}
