use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, debug};
use super::SitemapPlugin;

/// Periodically drops the cached sitemap once it outlives its TTL, so an idle
/// process does not hold a stale document.
pub struct CacheCleaner {
    sitemap: Arc<SitemapPlugin>,
    interval: Duration,
}

impl CacheCleaner {
    pub fn new(sitemap: Arc<SitemapPlugin>, interval: Duration) -> Self {
        Self {
            sitemap,
            interval,
        }
    }

    /// Spawns the cleanup loop. Abort the returned handle to stop it.
    pub fn start(self) -> JoinHandle<()> {
        info!("Starting sitemap cache cleaner with interval {:?}", self.interval);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                debug!("Running sitemap cache cleanup cycle");
                if self.sitemap.evict_expired_at(Instant::now()).await {
                    info!("Expired sitemap evicted by cleaner");
                }
            }
        })
    }
}
