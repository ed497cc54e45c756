use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Local disk driver settings. Buckets are subdirectories of `root`; files
/// are published under `public_prefix/<bucket>/<path>`.
#[derive(Debug, Clone, Deserialize)]
pub struct DiskConfig {
    pub root: String,
    pub public_prefix: String,
    pub bucket: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentConfig {
    pub upload_dir: String,
    pub max_attachment_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// When set, fetchers run over HTTP against this origin instead of in-process.
    pub base_url: Option<String>,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub cookie_name: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    pub enable_hsts: Option<bool>,
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
    pub csp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub disk: DiskConfig,
    pub content: ContentConfig,
    pub fetch: FetchConfig,
    pub auth: AuthConfig,
    pub security: Option<SecurityConfig>,
}

const DEFAULTS: &str = include_str!("../config/default.toml");

impl Default for AppConfig {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        match ::config::Config::builder()
            .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
            .build()
        {
            Ok(cfg) => match cfg.try_deserialize() {
                Ok(app_cfg) => app_cfg,
                Err(e) => {
                    eprintln!("FATAL: Failed to deserialize default config: {}", e);
                    panic!("Failed to deserialize default config: {}", e);
                }
            },
            Err(e) => {
                eprintln!("FATAL: Failed to parse default config: {}", e);
                panic!("Failed to parse default config: {}", e);
            }
        }
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
        // Optional local file: seitenwerk.toml (in CWD)
        .add_source(::config::File::with_name("seitenwerk").required(false));

    if let Ok(custom_path) = std::env::var("SEITENWERK_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(::config::Environment::with_prefix("SEITENWERK").separator("__"));

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }

    if !cfg.disk.public_prefix.starts_with('/') {
        return Err(anyhow::anyhow!("disk.public_prefix must start with '/'"));
    }
    if cfg.disk.bucket.is_empty() || cfg.disk.bucket.contains(['/', '\\']) {
        return Err(anyhow::anyhow!("disk.bucket must be a single path segment"));
    }
    if cfg.content.max_attachment_bytes == 0 {
        return Err(anyhow::anyhow!("content.max_attachment_bytes must be > 0"));
    }
    if cfg.fetch.cache_capacity == 0 {
        return Err(anyhow::anyhow!("fetch.cache_capacity must be > 0"));
    }
    if let Some(base) = &cfg.fetch.base_url {
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(anyhow::anyhow!("fetch.base_url must be an http(s) URL: {}", base));
        }
    }

    Ok(())
}

pub fn ensure_sqlite_parent_dir(url: &str) -> anyhow::Result<()> {
    if let Some(path) = url.strip_prefix("sqlite://") {
        let p = Path::new(path);
        if let Some(parent) = p.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
