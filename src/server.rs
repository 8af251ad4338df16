//! HTTP front end
//!
//! Every request, whatever its method or path, triggers one evaluation.

use std::convert::Infallible;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::health::{HealthEvaluator, Verdict};

/// Bind the HTTP listener
///
/// With no address configured, tries the IPv6 wildcard first and falls back
/// to IPv4 only on hosts without IPv6.
pub async fn bind(config: &ServerConfig) -> std::io::Result<TcpListener> {
    let addr = config.bind_addr();
    match TcpListener::bind(&addr).await {
        Ok(listener) => Ok(listener),
        Err(e) => match config.fallback_bind_addr() {
            Some(fallback) => {
                warn!(addr = %addr, error = %e, fallback = %fallback, "IPv6 bind failed, listening on IPv4 only");
                TcpListener::bind(&fallback).await
            }
            None => Err(e),
        },
    }
}

/// Build the HTTP response for a verdict
pub fn verdict_response(verdict: &Verdict) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(verdict.body())));
    *response.status_mut() = verdict.status_code();

    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    if !verdict.is_available() {
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    }
    response
}

async fn handle_request(
    req: Request<Incoming>,
    evaluator: Arc<HealthEvaluator>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let verdict = evaluator.evaluate().await;
    debug!(
        method = %req.method(),
        path = req.uri().path(),
        status = verdict.status_code().as_u16(),
        "Health check served"
    );
    Ok(verdict_response(&verdict))
}

/// Serve health checks until `shutdown` is cancelled
///
/// Each accepted connection runs on its own task; connections already in
/// flight are allowed to finish after shutdown.
pub async fn serve(
    listener: TcpListener,
    evaluator: Arc<HealthEvaluator>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        let (stream, peer_addr) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Health check server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(v) => v,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    continue;
                }
            },
        };

        let io = TokioIo::new(stream);
        let evaluator = evaluator.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, evaluator.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(peer = %peer_addr, error = %e, "Health check connection error");
            }
        });
    }
}
