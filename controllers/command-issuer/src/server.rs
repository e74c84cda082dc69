//! Probe and metrics HTTP endpoints.

use anyhow::Context;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::metrics::Metrics;

/// Readiness flag flipped once the controllers are running.
#[derive(Debug, Clone, Default)]
pub struct ProbeState {
    ready: Arc<AtomicBool>,
}

impl ProbeState {
    /// Marks the process ready (or not).
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Current readiness.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<ProbeState>) -> (StatusCode, &'static str) {
    if state.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics_handler(
    State(metrics): State<Arc<Metrics>>,
) -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        ),
    }
}

/// `/healthz` and `/readyz`.
pub fn probe_router(state: ProbeState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// `/metrics` in the Prometheus text format.
pub fn metrics_router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
        .layer(TraceLayer::new_for_http())
}

/// Binds `addr` and serves `router` in a background task.
///
/// Binding happens before returning so a taken port is a startup error.
pub async fn serve(addr: SocketAddr, router: Router, name: &'static str) -> anyhow::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {name} server on {addr}"))?;
    info!("Serving {} on {}", name, addr);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("{} server error: {}", name, e);
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_healthz_is_static() {
        assert_eq!(healthz().await, (StatusCode::OK, "ok"));
    }

    #[tokio::test]
    async fn test_readyz_follows_flag() {
        let state = ProbeState::default();
        assert_eq!(readyz(State(state.clone())).await.0, StatusCode::SERVICE_UNAVAILABLE);
        state.set_ready(true);
        assert_eq!(readyz(State(state)).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_handler_renders_registry() {
        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.record_certificate_issued();
        let (status, _, body) = metrics_handler(State(metrics)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("command_issuer_certificates_issued_total 1"));
    }

    #[tokio::test]
    async fn test_serve_binds_ephemeral_port() {
        let handle = serve(SocketAddr::from(([127, 0, 0, 1], 0)), probe_router(ProbeState::default()), "probe")
            .await
            .unwrap();
        handle.abort();
    }
}
