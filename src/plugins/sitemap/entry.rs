use std::time::{Duration, Instant};
use bytes::Bytes;

/// A built sitemap document and the instant it was built.
#[derive(Debug, Clone)]
pub(crate) struct SitemapCacheEntry {
    pub document: Bytes,
    pub built_at: Instant,
}

impl SitemapCacheEntry {
    pub fn new(document: Bytes, built_at: Instant) -> Self {
        Self { document, built_at }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.built_at)
    }

    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        self.age(now) < ttl
    }
}
