//! Maintenance mode.

use std::path::PathBuf;

use async_trait::async_trait;
use http::StatusCode;

use crate::error::Error;
use crate::middleware::Middleware;
use crate::pipeline::Next;
use crate::request::Request;
use crate::response::Response;

/// Answers every request with `503 Service Unavailable` while a marker file
/// exists. The file's content, if any, becomes the error message.
///
/// Identifier parameters are path prefixes that stay reachable during
/// maintenance: `"down:/healthz,/status"`.
pub struct PreventRequestsDuringMaintenance {
    marker: PathBuf,
}

impl PreventRequestsDuringMaintenance {
    pub fn new(marker: impl Into<PathBuf>) -> Self {
        Self { marker: marker.into() }
    }

    async fn is_down(&self) -> bool {
        tokio::fs::metadata(&self.marker).await.is_ok_and(|meta| meta.is_file())
    }
}

#[async_trait]
impl Middleware for PreventRequestsDuringMaintenance {
    async fn handle(&self, req: Request, next: Next<'_>, params: &[String]) -> Result<Response, Error> {
        let exempt = params.iter().any(|prefix| !prefix.is_empty() && req.path().starts_with(prefix.as_str()));
        if exempt || !self.is_down().await {
            return next.run(req).await;
        }

        let message = tokio::fs::read_to_string(&self.marker).await.unwrap_or_default();
        Err(Error::http(StatusCode::SERVICE_UNAVAILABLE, message.trim()))
    }
}
