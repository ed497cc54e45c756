use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::Method;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::content::ContentRenderer;
use crate::error::AppResult;
use crate::fetcher::FetchCache;
use crate::metrics::Metrics;
use crate::services::{auth::Auth, disk::Disk, reporter::Reporter, schema::Schema};
use crate::transport::Transport;
use crate::types::User;

/// The collaborators a request may reach. Built once at startup.
#[derive(Clone)]
pub struct Services {
    pub auth: Arc<dyn Auth>,
    pub disk: Arc<dyn Disk>,
    pub transport: Arc<dyn Transport>,
    pub reporter: Arc<dyn Reporter>,
    pub content: Arc<ContentRenderer>,
    pub fetch_cache: Arc<FetchCache>,
    pub metrics: Metrics,
}

/// One inbound navigation or HTTP request.
///
/// Immutable once built; the `with_*` methods return modified copies.
#[derive(Clone)]
pub struct RequestContext {
    pub id: Uuid,
    pub method: Method,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub host: String,
    pub raw_data: Map<String, Value>,
    pub params: BTreeMap<String, String>,
    pub user: Option<User>,
    pub session_token: Option<String>,
    pub services: Arc<Services>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("host", &self.host)
            .field("user", &self.user.as_ref().map(|u| &u.id))
            .finish()
    }
}

impl RequestContext {
    /// `target` is a path with an optional query string.
    pub fn new(services: Arc<Services>, method: Method, target: &str) -> Self {
        let (path, query) = split_target(target);
        Self {
            id: Uuid::new_v4(),
            method,
            path,
            query,
            host: String::new(),
            raw_data: Map::new(),
            params: BTreeMap::new(),
            user: None,
            session_token: None,
            services,
        }
    }

    /// A context for a sub-request (an API call made while rendering this one).
    /// Keeps the id, host and session.
    pub fn derive(&self, method: Method, target: &str, data: Map<String, Value>) -> Self {
        let (path, query) = split_target(target);
        Self {
            id: self.id,
            method,
            path,
            query,
            host: self.host.clone(),
            raw_data: data,
            params: BTreeMap::new(),
            user: self.user.clone(),
            session_token: self.session_token.clone(),
            services: self.services.clone(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.raw_data = data;
        self
    }

    pub fn with_user(mut self, user: Option<User>) -> Self {
        self.user = user;
        self
    }

    pub fn with_session(mut self, token: Option<String>) -> Self {
        self.session_token = token;
        self
    }

    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }

    /// Query parameters overlaid by the body data.
    pub fn input(&self) -> Map<String, Value> {
        let mut input: Map<String, Value> =
            self.query.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
        for (k, v) in &self.raw_data {
            input.insert(k.clone(), v.clone());
        }
        input
    }

    /// Validates [`Self::input`] against `schema`.
    pub fn validate(&self, schema: &Schema) -> AppResult<Map<String, Value>> {
        schema.validate(&self.input())
    }
}

fn split_target(target: &str) -> (String, BTreeMap<String, String>) {
    let (path, qs) = match target.split_once('?') {
        Some((p, q)) => (p, q),
        None => (target, ""),
    };
    let path = if path.is_empty() { "/".to_string() } else { path.to_string() };
    (path, parse_query(qs))
}

pub fn parse_query(qs: &str) -> BTreeMap<String, String> {
    qs.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(k), decode_component(v))
        })
        .collect()
}

fn decode_component(s: &str) -> String {
    let s = s.replace('+', " ");
    match urlencoding::decode(&s) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => s.clone(),
    }
}
