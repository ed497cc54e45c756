//! Client-side navigation on top of the shared [`Resolver`].
//!
//! Every navigation gets a generation number. Starting a new one cancels the
//! token of the previous one, and a result whose generation is no longer the
//! latest is dropped instead of committed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::context::RequestContext;
use crate::error::{AppError, AppResult};
use crate::fetcher::{DataSource, FetcherMap};
use crate::resolver::{fetch_all, RenderedPage, ResolveOptions, Resolver};
use crate::types::PageResponse;

const PAYLOAD_OPEN: &str = "<script id=\"__data\" type=\"application/json\">";

/// Reads the hydration payload embedded in a server-rendered page.
pub fn read_payload(html: &str) -> AppResult<PageResponse> {
    let start = html
        .find(PAYLOAD_OPEN)
        .map(|i| i + PAYLOAD_OPEN.len())
        .ok_or_else(|| AppError::InputError("Page has no hydration payload".into()))?;
    let end = html[start..]
        .find("</script>")
        .map(|i| start + i)
        .ok_or_else(|| AppError::InputError("Unterminated hydration payload".into()))?;
    serde_json::from_str(&html[start..end]).map_err(|e| AppError::anomaly(format!("hydration payload: {}", e)))
}

pub enum NavigationOutcome {
    Committed {
        page: Box<RenderedPage>,
        /// False when the new page keeps the current layout.
        remount_layout: bool,
    },
    /// A newer navigation started before this one finished.
    Superseded { generation: u64 },
}

struct Current {
    token: CancellationToken,
    layout: Option<String>,
}

pub struct Navigator {
    resolver: Arc<Resolver>,
    generation: AtomicU64,
    current: Mutex<Current>,
}

impl Navigator {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self {
            resolver,
            generation: AtomicU64::new(0),
            current: Mutex::new(Current { token: CancellationToken::new(), layout: None }),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// First render: reuses everything the server embedded.
    pub async fn hydrate(&self, ctx: RequestContext, payload: PageResponse) -> NavigationOutcome {
        self.run(ctx, ResolveOptions::hydrated(payload.data)).await
    }

    pub async fn navigate(&self, ctx: RequestContext) -> NavigationOutcome {
        self.run(ctx, ResolveOptions::default()).await
    }

    async fn run(&self, ctx: RequestContext, opts: ResolveOptions) -> NavigationOutcome {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        {
            let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
            let previous = std::mem::replace(&mut current.token, token.clone());
            previous.cancel();
        }
        tracing::debug!(generation, path = %ctx.path, "navigation started");

        let page = tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!(generation, "navigation cancelled");
                return NavigationOutcome::Superseded { generation };
            }
            page = self.resolver.resolve(ctx, opts) => page,
        };

        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(generation, "dropping stale navigation result");
            return NavigationOutcome::Superseded { generation };
        }
        let remount_layout = current.layout != page.response.layout;
        current.layout = page.response.layout.clone();
        NavigationOutcome::Committed { page: Box::new(page), remount_layout }
    }
}

/// Live page state after the first render.
///
/// Mutations replace whole keys; nested values are never deep-merged.
pub struct PageSession {
    ctx: RequestContext,
    page: Mutex<PageResponse>,
}

impl PageSession {
    pub fn new(ctx: RequestContext, page: PageResponse) -> Self {
        Self { ctx, page: Mutex::new(page) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PageResponse> {
        self.page.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn snapshot(&self) -> PageResponse {
        self.lock().clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().data.get(key).cloned()
    }

    pub fn set(&self, partial: Map<String, Value>) {
        self.lock().set(partial);
    }

    /// Re-runs the fetchers for `keys` (all fetchers when `None`), patching
    /// their params with `params` first. Only the reloaded keys are replaced.
    ///
    /// Concurrent reloads are not coalesced; the one finishing last wins.
    pub async fn reload(&self, keys: Option<&[&str]>, params: Option<Map<String, Value>>) -> AppResult<()> {
        let selected = {
            let mut page = self.lock();
            let keys: Vec<String> = match keys {
                Some(keys) => keys.iter().map(|k| k.to_string()).collect(),
                None => page.fetchers.keys().map(str::to_string).collect(),
            };

            let mut selected = FetcherMap::new();
            for key in keys {
                let Some(source) = page.fetchers.get_mut(&key) else {
                    tracing::warn!(key = %key, "reload of unknown data key ignored");
                    continue;
                };
                if let DataSource::ApiCall(fetcher) = source {
                    if let Some(patch) = &params {
                        fetcher.patch_params(patch);
                    }
                    if fetcher.options.cache {
                        self.ctx.services.fetch_cache.invalidate(&fetcher.cache_key());
                    }
                }
                selected.insert(key, source.clone());
            }
            page.loading = true;
            selected
        };

        let force: HashSet<String> = selected.keys().map(str::to_string).collect();
        let outcome = fetch_all(&selected, &Map::new(), &force, &self.ctx).await;

        let mut page = self.lock();
        page.loading = false;
        page.lazy.retain(|k| !force.contains(k));
        page.failed.retain(|k| !force.contains(k));
        for (key, value) in outcome.values {
            page.data.insert(key, value);
        }
        page.failed.extend(outcome.failed);
        match outcome.required_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Runs lazy fetchers that have not been loaded yet.
    pub async fn load_more(&self, keys: &[&str]) -> AppResult<()> {
        let pending: Vec<&str> = {
            let page = self.lock();
            keys.iter().copied().filter(|k| page.lazy.iter().any(|l| l == k)).collect()
        };
        if pending.is_empty() {
            return Ok(());
        }
        self.reload(Some(&pending), None).await
    }
}
