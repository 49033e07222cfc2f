//! Incoming HTTP request type.

use std::collections::HashMap;

use bytes::Bytes;
use http::{Extensions, HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::Error;

/// An incoming HTTP request with its body fully read.
///
/// Cloning is cheap enough to do once per request: the body is a reference
/// counted [`Bytes`]. The kernel keeps a clone of every inbound request for
/// content negotiation when an error has to be rendered.
#[derive(Clone, Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
    pub(crate) extensions: Extensions,
}

impl Request {
    pub(crate) fn from_parts(parts: http::request::Parts, body: Bytes) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            params: HashMap::new(),
            extensions: parts.extensions,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Deserializes the JSON body. A malformed body is a `400 Bad Request`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::http(http::StatusCode::BAD_REQUEST, e.to_string()))
    }

    /// The body as a JSON object, or an empty map when it is not one.
    pub fn input(&self) -> Map<String, Value> {
        match serde_json::from_slice(&self.body) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    // ── Content negotiation ───────────────────────────────────────────────────

    /// Whether the client wants a JSON answer rather than a page.
    ///
    /// True for JSON `Accept` headers, and for XHR requests that accept
    /// anything (unless they come from PJAX, which wants HTML fragments).
    pub fn expects_json(&self) -> bool {
        (self.is_ajax() && !self.is_pjax() && self.accepts_any_content_type()) || self.wants_json()
    }

    /// The most preferred `Accept` type is JSON (`*/json` or `*+json`).
    pub fn wants_json(&self) -> bool {
        self.acceptable_content_types()
            .first()
            .is_some_and(|t| t.contains("/json") || t.contains("+json"))
    }

    pub fn accepts_any_content_type(&self) -> bool {
        let types = self.acceptable_content_types();
        match types.first() {
            None => true,
            Some(t) => t == "*/*" || t == "*",
        }
    }

    pub fn is_ajax(&self) -> bool {
        self.header("x-requested-with") == Some("XMLHttpRequest")
    }

    pub fn is_pjax(&self) -> bool {
        self.header("x-pjax") == Some("true")
    }

    /// `Accept` media types, most preferred first. Ties keep header order.
    pub fn acceptable_content_types(&self) -> Vec<String> {
        let mut types: Vec<(String, f32)> = self
            .headers
            .get_all(http::header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .filter_map(parse_media_range)
            .collect();
        types.sort_by(|a, b| b.1.total_cmp(&a.1));
        types.into_iter().map(|(t, _)| t).collect()
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self::from_parts(parts, body)
    }
}

/// `text/html;q=0.8` → `("text/html", 0.8)`. Entries with `q=0` are dropped.
fn parse_media_range(item: &str) -> Option<(String, f32)> {
    let mut pieces = item.split(';').map(str::trim);
    let media = pieces.next().filter(|m| !m.is_empty())?.to_ascii_lowercase();
    let mut quality = 1.0;
    for piece in pieces {
        if let Some(q) = piece.strip_prefix("q=") {
            quality = q.trim().parse().unwrap_or(1.0);
        }
    }
    (quality > 0.0).then_some((media, quality))
}
