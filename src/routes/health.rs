use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

// Liveness probe, no dependencies touched
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// Readiness probe: DB ping with timeout
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let query = sqlx::query("SELECT 1").fetch_one(&state.db);
    match tokio::time::timeout(std::time::Duration::from_secs(5), query).await {
        Ok(Ok(_)) => (StatusCode::OK, "ready").into_response(),
        Ok(Err(e)) => (StatusCode::SERVICE_UNAVAILABLE, format!("not ready: {}", e)).into_response(),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready: timeout").into_response(),
    }
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.get_snapshot())
}

// Prometheus text exposition format
pub async fn metrics_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    let m = state.metrics.get_snapshot();
    let counters = [
        ("pages_resolved", "Pages resolved successfully", m.pages_resolved as u64),
        ("pages_failed", "Pages rendered through an error route", m.pages_failed as u64),
        ("fetchers_executed", "API fetchers executed", m.fetchers_executed),
        ("fetchers_failed", "API fetchers failed", m.fetchers_failed),
        ("fetch_cache_hits", "Fetcher cache hits", m.fetch_cache_hits),
        ("attachments_uploaded", "Rich text attachments uploaded", m.attachments_uploaded),
        ("attachments_deleted", "Unused rich text attachments deleted", m.attachments_deleted),
    ];
    let mut body = String::new();
    for (name, help, value) in counters {
        body.push_str(&format!(
            "# HELP seitenwerk_{name} {help}\n# TYPE seitenwerk_{name} counter\nseitenwerk_{name} {value}\n"
        ));
    }
    body.push_str(&format!(
        "# HELP seitenwerk_uptime_seconds Uptime seconds\n# TYPE seitenwerk_uptime_seconds gauge\nseitenwerk_uptime_seconds {}\n",
        m.uptime_seconds
    ));
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

pub async fn version() -> impl IntoResponse {
    let body = serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "package": {
            "description": env!("CARGO_PKG_DESCRIPTION"),
            "license": env!("CARGO_PKG_LICENSE"),
        },
        "build": {
            "profile": if cfg!(debug_assertions) { "debug" } else { "release" },
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        }
    });
    (StatusCode::OK, Json(body))
}
