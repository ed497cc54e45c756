//! HTTP handlers.
//!
//! - `health`: liveness, readiness, metrics and version endpoints
//! - `files`: stored attachments
//! - `pages`: registry dispatch for API and page routes

pub mod files;
pub mod health;
pub mod pages;

use axum::{routing::get, Router};

use crate::state::AppState;

/// Operational endpoints plus the registry fallback, without outer layers.
pub fn router(state: AppState) -> Router {
    let files = format!("{}/{{bucket}}/{{*path}}", state.config.disk.public_prefix.trim_end_matches('/'));
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .route("/metrics/prometheus", get(health::metrics_prometheus))
        .route("/version", get(health::version))
        .route(&files, get(files::serve_file))
        .fallback(pages::dispatch)
        .with_state(state)
}
