use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Counters for resolver, fetcher and content pipeline activity.
#[derive(Clone)]
pub struct Metrics {
    pub pages_resolved: Arc<AtomicUsize>,
    pub pages_failed: Arc<AtomicUsize>,
    pub fetchers_executed: Arc<AtomicU64>,
    pub fetchers_failed: Arc<AtomicU64>,
    pub fetch_cache_hits: Arc<AtomicU64>,
    pub attachments_uploaded: Arc<AtomicU64>,
    pub attachments_deleted: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            pages_resolved: Arc::new(AtomicUsize::new(0)),
            pages_failed: Arc::new(AtomicUsize::new(0)),
            fetchers_executed: Arc::new(AtomicU64::new(0)),
            fetchers_failed: Arc::new(AtomicU64::new(0)),
            fetch_cache_hits: Arc::new(AtomicU64::new(0)),
            attachments_uploaded: Arc::new(AtomicU64::new(0)),
            attachments_deleted: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc_pages_resolved(&self) {
        self.pages_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_pages_failed(&self) {
        self.pages_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_fetchers(&self, count: u64) {
        self.fetchers_executed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_fetchers_failed(&self) {
        self.fetchers_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_hits(&self) {
        self.fetch_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_attachments_uploaded(&self) {
        self.attachments_uploaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_attachments_deleted(&self) {
        self.attachments_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pages_resolved: self.pages_resolved.load(Ordering::Relaxed),
            pages_failed: self.pages_failed.load(Ordering::Relaxed),
            fetchers_executed: self.fetchers_executed.load(Ordering::Relaxed),
            fetchers_failed: self.fetchers_failed.load(Ordering::Relaxed),
            fetch_cache_hits: self.fetch_cache_hits.load(Ordering::Relaxed),
            attachments_uploaded: self.attachments_uploaded.load(Ordering::Relaxed),
            attachments_deleted: self.attachments_deleted.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub pages_resolved: usize,
    pub pages_failed: usize,
    pub fetchers_executed: u64,
    pub fetchers_failed: u64,
    pub fetch_cache_hits: u64,
    pub attachments_uploaded: u64,
    pub attachments_deleted: u64,
    pub uptime_seconds: u64,
}
