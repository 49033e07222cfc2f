//! HTTP server and graceful shutdown.
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or Ctrl-C the server
//! 1. stops calling `listener.accept()`, so no new connections are made,
//! 2. lets every in-flight connection task run to completion,
//! 3. returns from [`Server::serve`], which lets `main` exit cleanly.
//!
//! Terminate-phase work spawned for requests that already answered is not
//! awaited.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::Error;
use crate::kernel::Kernel;
use crate::request::Request;
use crate::response::Response;

/// The HTTP server.
pub struct Server {
    addr: String,
    app: String,
    env: Option<String>,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust,no_run
    /// use slice::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: impl Into<String>) -> Self {
        Self { addr: addr.into(), app: "slice".to_owned(), env: None }
    }

    /// Binds to `server.addr` from `config`, and names the application and
    /// its environment in the server's log lines.
    pub fn from_config(config: &Config) -> Self {
        Self {
            addr: config.server.addr.clone(),
            app: config.app.name.clone(),
            env: Some(config.app.env.clone()),
        }
    }

    /// Starts accepting connections and handing requests to `kernel`.
    ///
    /// Fails if the address is invalid or cannot be bound. Otherwise returns
    /// only after a full graceful shutdown.
    pub async fn serve(self, kernel: Kernel) -> Result<(), Error> {
        let addr: SocketAddr = self.addr.parse().map_err(Error::other)?;
        let listener = TcpListener::bind(addr).await?;
        let kernel = Arc::new(kernel);

        info!(%addr, app = %self.app, env = self.env.as_deref(), "slice listening");

        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown first: a signal stops accepting even if more
                // connections are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let kernel = Arc::clone(&kernel);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let kernel = Arc::clone(&kernel);
                            async move { dispatch(kernel, req).await }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!(app = %self.app, "slice stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Handles one request and schedules its terminate phase.
///
/// Every failure becomes a response, so hyper never sees an error.
async fn dispatch(
    kernel: Arc<Kernel>,
    req: hyper::Request<Incoming>,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(error = %e, "could not read request body");
            return Ok(Response::status(StatusCode::BAD_REQUEST).into_inner());
        }
    };

    let request = Request::from_parts(parts, body);
    let snapshot = request.clone();
    let response = kernel.handle(request).await;
    let sent = response.clone();

    tokio::spawn(async move {
        kernel.terminate(&snapshot, &response);
    });

    Ok(sent.into_inner())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or Ctrl-C. A signal that cannot be
/// installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_takes_the_app_identity() {
        let config = Config::from_toml_str("[app]\nname = \"shop\"\nenv = \"staging\"\n[server]\naddr = \"0.0.0.0:8080\"\n")
            .unwrap();
        let server = Server::from_config(&config);
        assert_eq!(server.addr, "0.0.0.0:8080");
        assert_eq!(server.app, "shop");
        assert_eq!(server.env.as_deref(), Some("staging"));

        let server = Server::bind("127.0.0.1:0");
        assert_eq!(server.app, "slice");
        assert!(server.env.is_none());
    }
}
