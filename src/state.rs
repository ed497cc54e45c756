use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::content::ContentRenderer;
use crate::context::Services;
use crate::fetcher::FetchCache;
use crate::metrics::Metrics;
use crate::resolver::Resolver;
use crate::router::Registry;
use crate::services::{
    auth::SessionAuth,
    disk::{Disk, LocalDisk},
    reporter::TracingReporter,
};
use crate::transport::{HttpTransport, LocalTransport, Transport};

/// State shared by all axum handlers. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Session and user storage for [`SessionAuth`].
    pub db: sqlx::SqlitePool,
    pub config: Arc<AppConfig>,
    pub metrics: Metrics,
    /// Collaborators handed to every request context.
    pub services: Arc<Services>,
    pub resolver: Arc<Resolver>,
}

impl AppState {
    /// Wires the default collaborators from `config`.
    ///
    /// Fetchers run in-process against `registry` unless `fetch.base_url` is set.
    pub fn new(db: sqlx::SqlitePool, config: AppConfig, registry: Arc<Registry>) -> Self {
        let metrics = Metrics::new();
        let disk: Arc<dyn Disk> = Arc::new(LocalDisk::new(&config.disk.root, &config.disk.public_prefix));
        let transport: Arc<dyn Transport> = match config.fetch.base_url.as_deref() {
            Some(base) => {
                tracing::info!("Fetchers use HTTP transport against {}", base);
                Arc::new(HttpTransport::new(base))
            }
            None => Arc::new(LocalTransport::new(registry.clone())),
        };
        let services = Services {
            auth: Arc::new(SessionAuth::new(db.clone())),
            content: Arc::new(ContentRenderer::new(
                disk.clone(),
                &config.disk.bucket,
                &config.content.upload_dir,
                config.content.max_attachment_bytes,
                metrics.clone(),
            )),
            disk,
            transport,
            reporter: Arc::new(TracingReporter),
            fetch_cache: Arc::new(FetchCache::new(
                config.fetch.cache_capacity,
                Duration::from_secs(config.fetch.cache_ttl_secs),
            )),
            metrics,
        };
        Self::with_services(db, config, registry, services)
    }

    /// Uses caller-provided collaborators, e.g. a static auth backend in tests.
    pub fn with_services(db: sqlx::SqlitePool, config: AppConfig, registry: Arc<Registry>, services: Services) -> Self {
        Self {
            db,
            config: Arc::new(config),
            metrics: services.metrics.clone(),
            services: Arc::new(services),
            resolver: Arc::new(Resolver::new(registry)),
        }
    }
}
