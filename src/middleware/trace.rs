//! Per-request tracing: method, path, status, latency.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::middleware::{Middleware, Terminable};
use crate::pipeline::Next;
use crate::request::Request;
use crate::response::Response;

/// Logs one event per request once the inner stack has answered, and one
/// more from the terminate phase.
pub struct Trace;

#[async_trait]
impl Middleware for Trace {
    async fn handle(&self, req: Request, next: Next<'_>, _params: &[String]) -> Result<Response, Error> {
        let method = req.method().clone();
        let path = req.path().to_owned();
        let start = Instant::now();

        let outcome = next.run(req).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        match &outcome {
            Ok(res) => info!(%method, %path, status = res.status_code().as_u16(), latency_ms, "request handled"),
            Err(err) => warn!(%method, %path, error = %err, latency_ms, "request failed"),
        }
        outcome
    }

    fn terminable(&self) -> Option<&dyn Terminable> {
        Some(self)
    }
}

impl Terminable for Trace {
    fn terminate(&self, req: &Request, res: &Response) {
        debug!(method = %req.method(), path = %req.path(), status = res.status_code().as_u16(), "request terminated");
    }
}
