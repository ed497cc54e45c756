//! Execution backends for [`Fetcher`]s.
//!
//! The server renders pages with [`LocalTransport`], which dispatches API
//! calls straight into the registry. A client (or a server configured with
//! `fetch.base_url`) goes over the network with [`HttpTransport`].

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::Method;
use serde_json::Value;

use crate::context::RequestContext;
use crate::error::{AppError, AppResult};
use crate::fetcher::{Encoding, Fetcher};
use crate::router::{Registry, RouteKind, RouteTarget};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Executes `fetcher` on behalf of `ctx` and returns the parsed body.
    async fn execute(&self, fetcher: &Fetcher, ctx: &RequestContext) -> AppResult<Value>;
}

/// In-process dispatch against the API routes of a [`Registry`].
pub struct LocalTransport {
    registry: Arc<Registry>,
}

impl LocalTransport {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

/// Runs the API route matching `ctx.method` and `ctx.path`, enforcing its
/// auth requirement. Shared by [`LocalTransport`] and the HTTP dispatcher.
pub async fn invoke_api(registry: &Registry, ctx: RequestContext) -> AppResult<Value> {
    let matched = registry.routes().resolve(&ctx.method, &ctx.path, RouteKind::Api)?;
    let handler = match &matched.route.target {
        RouteTarget::Api(handler) => handler.clone(),
        RouteTarget::Page { .. } => {
            return Err(AppError::anomaly(format!("{} is not an API route", ctx.path)));
        }
    };

    let user = ctx.services.auth.check(&ctx, &matched.route.options.auth).await?;
    tracing::debug!(method = %ctx.method, path = %ctx.path, route = %matched.route.id, "api call");
    handler(ctx.with_user(user).with_params(matched.params)).await
}

#[async_trait]
impl Transport for LocalTransport {
    async fn execute(&self, fetcher: &Fetcher, ctx: &RequestContext) -> AppResult<Value> {
        let child = ctx.derive(fetcher.method.clone(), &fetcher.path, fetcher.params.clone());
        invoke_api(&self.registry, child).await
    }
}

/// Executes fetchers against a remote origin with `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

/// Query/form pairs; non-string values are sent as their JSON text.
fn flat_pairs(fetcher: &Fetcher) -> Vec<(String, String)> {
    fetcher
        .params
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let s = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), s)
        })
        .collect()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, fetcher: &Fetcher, ctx: &RequestContext) -> AppResult<Value> {
        let url = self.url_for(&fetcher.path);
        let mut req = self.client.request(fetcher.method.clone(), &url);

        req = if fetcher.method == Method::GET || fetcher.method == Method::DELETE {
            req.query(&flat_pairs(fetcher))
        } else {
            match fetcher.options.encoding {
                Encoding::Json => req.json(&fetcher.params),
                Encoding::Form => req.form(&flat_pairs(fetcher)),
            }
        };
        req = req.header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = &ctx.session_token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text)
                .map_err(|e| AppError::anomaly(format!("Invalid JSON from {}: {}", url, e)));
        }

        tracing::debug!(%url, status = status.as_u16(), "fetch returned error status");
        match serde_json::from_str::<Value>(&text) {
            Ok(body) if body.is_object() => Err(AppError::from_json(&body)),
            _ => Err(AppError::Http { status: status.as_u16(), message: text }),
        }
    }
}
