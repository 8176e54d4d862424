//! HTTP/1.1 host layer.
//!
//! Accepts connections with tokio, serves them with hyper and hands each request
//! to the frozen [`App`]. Bodies are collected up front, capped at `body_limit`.
//!
//! Each request runs in its own task. If hyper drops the response future because
//! the connection went away, the request's abort signal fires and the pipeline
//! abandons the request at its next checkpoint.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{FrameworkError, Result};
use crate::lifecycle::{bare_error_response, App};
use crate::reply::RawResponse;
use crate::request::{AbortSignal, RawRequest};

/// Where and how to bind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenOptions {
    /// `0` picks a free port; the bound address is returned by `listen`.
    pub port: u16,
    pub host: String,
    pub backlog: u32,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "127.0.0.1".to_string(),
            backlog: 511,
        }
    }
}

impl ListenOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// `host:port`, bracketing IPv6 literals.
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Bind, then serve in the background until `shutdown` flips to `true`.
pub(crate) async fn listen(
    app: Arc<App>,
    options: &ListenOptions,
    shutdown: watch::Receiver<bool>,
) -> Result<SocketAddr> {
    let address = options.address();
    let listen_error = |message: String| FrameworkError::Listen {
        address: address.clone(),
        message,
    };

    let addr = tokio::net::lookup_host(address.as_str())
        .await
        .map_err(|e| listen_error(e.to_string()))?
        .next()
        .ok_or_else(|| listen_error("host did not resolve to any address".to_string()))?;
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|e| listen_error(e.to_string()))?;
    socket
        .set_reuseaddr(true)
        .map_err(|e| listen_error(e.to_string()))?;
    socket.bind(addr).map_err(|e| listen_error(e.to_string()))?;
    let listener = socket
        .listen(options.backlog)
        .map_err(|e| listen_error(e.to_string()))?;
    let local = listener
        .local_addr()
        .map_err(|e| listen_error(e.to_string()))?;

    info!(address = %local, routes_count = app.router().len(), "Server listening");
    tokio::spawn(accept_loop(listener, app, shutdown));
    Ok(local)
}

async fn accept_loop(listener: TcpListener, app: Arc<App>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Connection accepted");
                    tokio::spawn(serve_connection(stream, Arc::clone(&app), shutdown.clone()));
                }
                Err(err) => warn!(error = %err, "Failed to accept connection"),
            },
        }
    }
    info!("Server stopped accepting connections");
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    app: Arc<App>,
    mut shutdown: watch::Receiver<bool>,
) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| serve_request(Arc::clone(&app), req));
    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(err) = result {
                debug!(error = %err, "Connection closed with error");
            }
        }
        _ = shutdown.changed() => {
            conn.as_mut().graceful_shutdown();
            if let Err(err) = conn.await {
                debug!(error = %err, "Connection closed with error during shutdown");
            }
        }
    }
}

/// Fires the abort signal unless disarmed; dropped with the response future.
struct AbortOnDrop {
    signal: AbortSignal,
    armed: bool,
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.signal.abort();
        }
    }
}

async fn serve_request(
    app: Arc<App>,
    req: hyper::Request<Incoming>,
) -> std::result::Result<hyper::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let limit = app.config().body_limit;

    let body = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            let err = if err.downcast_ref::<LengthLimitError>().is_some() {
                FrameworkError::PayloadTooLarge { limit }
            } else {
                FrameworkError::BadRequest(format!("failed to read request body: {err}"))
            };
            return Ok(into_hyper(bare_error_response(&err)));
        }
    };

    let url = parts
        .uri
        .path_and_query()
        .map_or("/", |pq| pq.as_str())
        .to_string();
    let abort = AbortSignal::default();
    let raw = RawRequest {
        method: parts.method,
        url,
        headers: parts.headers,
        body,
        abort: abort.clone(),
    };

    let mut guard = AbortOnDrop {
        signal: abort,
        armed: true,
    };
    let outcome = tokio::spawn(async move { app.handle(raw).await }).await;
    guard.armed = false;

    let response = match outcome {
        Ok(Some(response)) => response,
        // Abandoned; the client is gone so the body is never read.
        Ok(None) => RawResponse::internal_error(),
        Err(err) => {
            error!(error = %err, "Request task failed");
            RawResponse::internal_error()
        }
    };
    Ok(into_hyper(response))
}

fn into_hyper(raw: RawResponse) -> hyper::Response<Full<Bytes>> {
    let mut response = hyper::Response::new(Full::new(raw.body));
    *response.status_mut() = raw.status;
    *response.headers_mut() = raw.headers;
    response
}
