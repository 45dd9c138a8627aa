//! Health probe endpoints
//!
//! Liveness and readiness are deliberately trivial: once the controller has
//! started, the process answers `ok` on both. Reconciliation failures are
//! reported through object status, not through probe state, so a flapping
//! database never gets the pod killed.

use axum::{routing::get, Router};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz() -> &'static str {
    "ok"
}

/// Bind the probe listener. A bind failure is a startup-fatal error and is
/// surfaced to `main` rather than retried.
pub async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "health probes listening");
    Ok(listener)
}

/// Serve `/healthz` and `/readyz` until the process shuts down.
pub async fn serve(listener: TcpListener) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz));
    axum::serve(listener, app).await?;
    Ok(())
}
