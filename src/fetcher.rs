//! Deferred data calls.
//!
//! A [`Fetcher`] only describes a call; nothing happens until the resolver or
//! a [`crate::navigation::PageSession`] hands it to a [`Transport`]. This lets
//! the client skip keys the server already embedded in the hydration payload.

use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::http::Method;
use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::RequestContext;
use crate::error::{AppError, AppResult};
use crate::transport::Transport;

pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;
pub type ThenFn = Arc<dyn Fn(Value) -> AppResult<Value> + Send + Sync>;
pub type CatchFn = Arc<dyn Fn(AppError) -> AppResult<Value> + Send + Sync>;
pub type FinallyFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Json,
    Form,
}

#[derive(Clone, Default)]
pub struct FetcherOptions {
    /// Excluded from the initial batch until explicitly loaded.
    pub lazy: bool,
    /// Memoize successful results in the [`FetchCache`].
    pub cache: bool,
    /// A failure of this key fails the whole page.
    pub required: bool,
    pub encoding: Encoding,
    pub on_progress: Option<ProgressFn>,
}

impl fmt::Debug for FetcherOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetcherOptions")
            .field("lazy", &self.lazy)
            .field("cache", &self.cache)
            .field("required", &self.required)
            .field("encoding", &self.encoding)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Description of one API call.
#[derive(Clone)]
pub struct Fetcher {
    pub method: Method,
    pub path: String,
    pub params: Map<String, Value>,
    pub options: FetcherOptions,
    then: Vec<ThenFn>,
    catch: Option<CatchFn>,
    finally: Option<FinallyFn>,
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("params", &self.params)
            .field("options", &self.options)
            .field("then", &self.then.len())
            .finish()
    }
}

impl Fetcher {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Map::new(),
            options: FetcherOptions::default(),
            then: Vec::new(),
            catch: None,
            finally: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn params(mut self, params: Map<String, Value>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn lazy(mut self) -> Self {
        self.options.lazy = true;
        self
    }

    pub fn cached(mut self) -> Self {
        self.options.cache = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.options.required = true;
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.options.encoding = encoding;
        self
    }

    pub fn on_progress(mut self, f: impl Fn(u64, u64) + Send + Sync + 'static) -> Self {
        self.options.on_progress = Some(Arc::new(f));
        self
    }

    /// Maps a successful result. Chained maps run in registration order.
    pub fn then(mut self, f: impl Fn(Value) -> AppResult<Value> + Send + Sync + 'static) -> Self {
        self.then.push(Arc::new(f));
        self
    }

    /// Recovers from a failure of the call or of any `then` step.
    pub fn catch(mut self, f: impl Fn(AppError) -> AppResult<Value> + Send + Sync + 'static) -> Self {
        self.catch = Some(Arc::new(f));
        self
    }

    /// Runs once the call settled, whatever the outcome.
    pub fn finally(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.finally = Some(Arc::new(f));
        self
    }

    /// Merges `patch` into the params, replacing existing keys.
    pub fn patch_params(&mut self, patch: &Map<String, Value>) {
        for (k, v) in patch {
            self.params.insert(k.clone(), v.clone());
        }
    }

    pub fn cache_key(&self) -> String {
        format!("{} {} {}", self.method, self.path, Value::Object(self.params.clone()))
    }

    /// Runs the call through `transport` and applies the `then`/`catch`/`finally` chain.
    pub async fn execute(&self, transport: &dyn Transport, ctx: &RequestContext) -> AppResult<Value> {
        if let Some(progress) = &self.options.on_progress {
            progress(0, 1);
        }

        let mut result = transport.execute(self, ctx).await;
        for step in &self.then {
            result = match result {
                Ok(v) => step(v),
                Err(e) => Err(e),
            };
        }
        if let (Err(e), Some(catch)) = (&result, &self.catch) {
            result = catch(e.clone());
        }
        if let Some(finally) = &self.finally {
            finally();
        }

        if let Some(progress) = &self.options.on_progress {
            progress(1, 1);
        }
        result
    }
}

pub type DeferredValue = Shared<BoxFuture<'static, AppResult<Value>>>;

/// Where a page data key comes from. Decided when the controller is written.
#[derive(Clone)]
pub enum DataSource {
    Literal(Value),
    /// An already-started computation; awaiting it twice yields the same result.
    Deferred(DeferredValue),
    ApiCall(Fetcher),
}

impl DataSource {
    pub fn deferred<F>(fut: F) -> Self
    where
        F: Future<Output = AppResult<Value>> + Send + 'static,
    {
        DataSource::Deferred(fut.boxed().shared())
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, DataSource::ApiCall(f) if f.options.lazy)
    }

    pub fn is_required(&self) -> bool {
        matches!(self, DataSource::ApiCall(f) if f.options.required)
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            DataSource::Deferred(_) => f.write_str("Deferred"),
            DataSource::ApiCall(fetcher) => f.debug_tuple("ApiCall").field(fetcher).finish(),
        }
    }
}

impl From<Fetcher> for DataSource {
    fn from(f: Fetcher) -> Self {
        DataSource::ApiCall(f)
    }
}

impl From<Value> for DataSource {
    fn from(v: Value) -> Self {
        DataSource::Literal(v)
    }
}

/// Data keys in insertion order. Inserting an existing key replaces its
/// source in place.
#[derive(Debug, Clone, Default)]
pub struct FetcherMap {
    entries: Vec<(String, DataSource)>,
}

impl FetcherMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, source: impl Into<DataSource>) {
        let key = key.into();
        let source = source.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = source,
            None => self.entries.push((key, source)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, source: impl Into<DataSource>) -> Self {
        self.insert(key, source);
        self
    }

    pub fn get(&self, key: &str) -> Option<&DataSource> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, s)| s)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut DataSource> {
        self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, s)| s)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataSource)> {
        self.entries.iter().map(|(k, s)| (k.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends `other`; its keys win on collision.
    pub fn extend(&mut self, other: FetcherMap) {
        for (k, s) in other.entries {
            self.insert(k, s);
        }
    }
}

/// LRU memo for fetchers created with `cached()`.
pub struct FetchCache {
    entries: Mutex<LruCache<String, (Instant, Value)>>,
    ttl: Duration,
}

impl FetchCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { entries: Mutex::new(LruCache::new(capacity)), ttl }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        match entries.get(key) {
            Some((stored, value)) if stored.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, value: Value) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.put(key, (Instant::now(), value));
    }

    pub fn invalidate(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.pop(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves a single data source for `ctx`, going through the cache for
/// cached fetchers.
pub async fn run_source(source: &DataSource, ctx: &RequestContext) -> AppResult<Value> {
    match source {
        DataSource::Literal(v) => Ok(v.clone()),
        DataSource::Deferred(fut) => fut.clone().await,
        DataSource::ApiCall(fetcher) => {
            let services = &ctx.services;
            services.metrics.add_fetchers(1);
            if fetcher.options.cache {
                let key = fetcher.cache_key();
                if let Some(hit) = services.fetch_cache.get(&key) {
                    services.metrics.inc_cache_hits();
                    return Ok(hit);
                }
                let value = fetcher.execute(services.transport.as_ref(), ctx).await?;
                services.fetch_cache.put(key, value.clone());
                Ok(value)
            } else {
                fetcher.execute(services.transport.as_ref(), ctx).await
            }
        }
    }
}

/// Runs all `entries` concurrently and returns their results in key order,
/// not completion order. One failure never cancels its siblings.
pub async fn run_batch(entries: Vec<(String, DataSource)>, ctx: &RequestContext) -> Vec<(String, AppResult<Value>)> {
    let futures = entries.iter().map(|(_, source)| run_source(source, ctx));
    let results = join_all(futures).await;
    entries.into_iter().map(|(k, _)| k).zip(results).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_in_place() {
        let mut map = FetcherMap::new();
        map.insert("a", Value::from(1));
        map.insert("b", Value::from(2));
        map.insert("a", Value::from(3));
        let keys: Vec<&str> = map.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert!(matches!(map.get("a"), Some(DataSource::Literal(v)) if *v == Value::from(3)));
    }

    #[test]
    fn cache_key_includes_params() {
        let a = Fetcher::get("/api/posts").param("page", 1);
        let b = Fetcher::get("/api/posts").param("page", 2);
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn cache_entries_expire() {
        let cache = FetchCache::new(4, Duration::from_millis(0));
        cache.put("k".into(), Value::from(1));
        assert!(cache.get("k").is_none());

        let cache = FetchCache::new(4, Duration::from_secs(60));
        cache.put("k".into(), Value::from(1));
        assert_eq!(cache.get("k"), Some(Value::from(1)));
        cache.invalidate("k");
        assert!(cache.is_empty());
    }

    #[test]
    fn lazy_flag_only_applies_to_api_calls() {
        assert!(DataSource::from(Fetcher::get("/x").lazy()).is_lazy());
        assert!(!DataSource::from(Value::Null).is_lazy());
    }
}
