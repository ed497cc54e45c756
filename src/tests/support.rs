//! Fixtures shared by the test modules.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;

use crate::content::ContentRenderer;
use crate::context::{RequestContext, Services};
use crate::fetcher::FetchCache;
use crate::metrics::Metrics;
use crate::router::Registry;
use crate::services::{auth::StaticAuth, disk::LocalDisk, reporter::TracingReporter};
use crate::transport::LocalTransport;
use crate::types::User;

pub const USER_TOKEN: &str = "user-token";
pub const ADMIN_TOKEN: &str = "admin-token";

pub fn user(name: &str, roles: &[&str]) -> User {
    User {
        id: format!("u-{}", name),
        email: format!("{}@example.com", name),
        name: name.to_string(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
    }
}

/// In-process collaborators over a disk rooted at `dir`.
pub fn services(registry: Arc<Registry>, dir: &Path) -> Services {
    let metrics = Metrics::new();
    let disk = Arc::new(LocalDisk::new(dir, "/files"));
    Services {
        auth: Arc::new(
            StaticAuth::new()
                .with_token(USER_TOKEN, user("ada", &[]))
                .with_token(ADMIN_TOKEN, user("grace", &["admin"])),
        ),
        content: Arc::new(ContentRenderer::new(disk.clone(), "data", "content", 64 * 1024, metrics.clone())),
        disk,
        transport: Arc::new(LocalTransport::new(registry)),
        reporter: Arc::new(TracingReporter),
        fetch_cache: Arc::new(FetchCache::new(64, Duration::from_secs(60))),
        metrics,
    }
}

pub fn get(services: &Arc<Services>, target: &str) -> RequestContext {
    RequestContext::new(services.clone(), Method::GET, target)
}
