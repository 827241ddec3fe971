use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::config::SitemapConfig;
use crate::error::{Result, SitemapError};
use crate::plugin::Plugin;

pub mod builder;
mod cleaner;
mod entry;

pub use builder::{build, ChangeFrequency, StaticPageEntry, UrlEntry, STATIC_PAGES};
pub use cleaner::CacheCleaner;
use entry::SitemapCacheEntry;

/// Serves the sitemap document from a single time-bounded cache slot.
///
/// A request finding the slot empty or past its TTL queries the catalog,
/// rebuilds the document and replaces the slot. Concurrent misses may each
/// rebuild; the last write wins.
pub struct SitemapPlugin {
    catalog: Arc<dyn Catalog>,
    config: SitemapConfig,
    static_pages: Vec<StaticPageEntry>,
    slot: RwLock<Option<SitemapCacheEntry>>,
    builds: AtomicU64,
    hits: AtomicU64,
    failures: AtomicU64,
    last_build_failed: AtomicBool,
}

#[derive(Debug, Clone)]
pub struct SitemapStats {
    pub cached: bool,
    pub age: Option<Duration>,
    pub ttl: Duration,
    pub builds: u64,
    pub hits: u64,
    pub failures: u64,
}

impl SitemapPlugin {
    pub fn new(catalog: Arc<dyn Catalog>, config: SitemapConfig) -> Self {
        Self::with_static_pages(catalog, config, STATIC_PAGES.to_vec())
    }

    pub fn with_static_pages(
        catalog: Arc<dyn Catalog>,
        config: SitemapConfig,
        static_pages: Vec<StaticPageEntry>,
    ) -> Self {
        info!(
            "Creating sitemap plugin for {} (ttl: {:?}, catalog: {})",
            config.site_url(),
            config.ttl(),
            catalog.name()
        );
        Self {
            catalog,
            config,
            static_pages,
            slot: RwLock::new(None),
            builds: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            last_build_failed: AtomicBool::new(false),
        }
    }

    pub async fn serve(&self) -> Result<Bytes> {
        self.serve_at(Instant::now()).await
    }

    /// Returns the cached document if it is younger than the TTL at `now`,
    /// otherwise rebuilds it from the catalog.
    ///
    /// On catalog failure the slot is left as it was and no stale document
    /// is returned.
    #[tracing::instrument(skip(self))]
    pub async fn serve_at(&self, now: Instant) -> Result<Bytes> {
        let ttl = self.config.ttl();

        if let Some(entry) = self.slot.read().await.as_ref() {
            if entry.is_fresh(now, ttl) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Sitemap cache hit (age: {:?})", entry.age(now));
                return Ok(entry.document.clone());
            }
            debug!("Sitemap cache expired (age: {:?}, ttl: {:?})", entry.age(now), ttl);
        } else {
            debug!("Sitemap cache empty");
        }

        let items = match self.catalog.sitemap_items().await {
            Ok(items) => items,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.last_build_failed.store(true, Ordering::Relaxed);
                error!("Catalog lookup failed, sitemap not rebuilt: {}", e);
                return Err(match e {
                    err @ SitemapError::Catalog(_) => err,
                    other => SitemapError::Catalog(other.to_string()),
                });
            }
        };

        let document = Bytes::from(build(self.config.site_url(), &self.static_pages, &items));
        *self.slot.write().await = Some(SitemapCacheEntry::new(document.clone(), now));

        self.builds.fetch_add(1, Ordering::Relaxed);
        self.last_build_failed.store(false, Ordering::Relaxed);
        info!("Rebuilt sitemap: {} catalog items, {} bytes", items.len(), document.len());
        Ok(document)
    }

    /// Drops the cached document if it has outlived the TTL at `now`.
    /// Returns whether anything was evicted.
    pub async fn evict_expired_at(&self, now: Instant) -> bool {
        let ttl = self.config.ttl();
        let mut slot = self.slot.write().await;
        let expired = matches!(slot.as_ref(), Some(entry) if !entry.is_fresh(now, ttl));
        if expired {
            debug!("Evicting expired sitemap");
            *slot = None;
        }
        expired
    }

    pub async fn invalidate(&self) {
        if self.slot.write().await.take().is_some() {
            info!("Sitemap cache invalidated");
        }
    }

    pub async fn stats(&self) -> SitemapStats {
        let now = Instant::now();
        let slot = self.slot.read().await;
        SitemapStats {
            cached: slot.is_some(),
            age: slot.as_ref().map(|entry| entry.age(now)),
            ttl: self.config.ttl(),
            builds: self.builds.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl Plugin for SitemapPlugin {
    fn name(&self) -> &str {
        "sitemap"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn init(&self) -> Result<()> {
        info!(
            "Initializing sitemap plugin with {} static pages",
            self.static_pages.len()
        );
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        let stats = self.stats().await;
        info!(
            "Cleaning up sitemap plugin (builds: {}, hits: {}, failures: {})",
            stats.builds, stats.hits, stats.failures
        );
        self.invalidate().await;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        let healthy = !self.last_build_failed.load(Ordering::Relaxed);
        if !healthy {
            warn!("Sitemap plugin unhealthy: last rebuild failed");
        }
        Ok(healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogItem;
    use std::sync::atomic::AtomicUsize;

    struct CountingCatalog {
        items: Vec<CatalogItem>,
        calls: AtomicUsize,
        failing: AtomicBool,
    }

    impl CountingCatalog {
        fn new(items: Vec<CatalogItem>) -> Arc<Self> {
            Arc::new(Self {
                items,
                calls: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Catalog for CountingCatalog {
        fn name(&self) -> &str {
            "counting"
        }

        async fn sitemap_items(&self) -> Result<Vec<CatalogItem>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(SitemapError::Catalog("connection refused".into()));
            }
            Ok(self.items.clone())
        }
    }

    fn plugin(catalog: Arc<CountingCatalog>, ttl_ms: u64) -> SitemapPlugin {
        SitemapPlugin::new(
            catalog,
            SitemapConfig::new("https://shop.example/", Duration::from_millis(ttl_ms)),
        )
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test]
    async fn test_ttl_controls_rebuilds() {
        let catalog = CountingCatalog::new(vec![CatalogItem::new("1").with_slug("red shoes")]);
        let sitemap = plugin(catalog.clone(), 1000);
        let t0 = Instant::now();

        let first = sitemap.serve_at(t0).await.unwrap();
        assert_eq!(catalog.calls(), 1);

        let second = sitemap.serve_at(t0 + ms(500)).await.unwrap();
        assert_eq!(catalog.calls(), 1);
        assert_eq!(first.as_ptr(), second.as_ptr());

        let third = sitemap.serve_at(t0 + ms(1500)).await.unwrap();
        assert_eq!(catalog.calls(), 2);
        assert_ne!(first.as_ptr(), third.as_ptr());
        assert_eq!(first, third);

        let stats = sitemap.stats().await;
        assert_eq!(stats.builds, 2);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_document_contents() {
        let catalog = CountingCatalog::new(vec![CatalogItem::new("1")
            .with_slug("red shoes")
            .with_updated_at("2024-01-15T10:00:00Z".parse().unwrap())]);
        let sitemap = plugin(catalog, 1000);

        let doc = sitemap.serve().await.unwrap();
        let xml = std::str::from_utf8(&doc).unwrap();
        assert!(xml.contains("<loc>https://shop.example/product/red%20shoes</loc>"));
        assert!(xml.contains("<lastmod>2024-01-15</lastmod>"));
        assert!(xml.contains("<loc>https://shop.example/</loc>"));
    }

    #[tokio::test]
    async fn test_catalog_failure_leaves_slot_untouched() {
        let catalog = CountingCatalog::new(vec![]);
        let sitemap = plugin(catalog.clone(), 1000);
        let t0 = Instant::now();

        catalog.failing.store(true, Ordering::SeqCst);
        assert!(matches!(sitemap.serve_at(t0).await, Err(SitemapError::Catalog(_))));
        assert!(!sitemap.stats().await.cached);
        assert!(!sitemap.health_check().await.unwrap());

        catalog.failing.store(false, Ordering::SeqCst);
        let good = sitemap.serve_at(t0).await.unwrap();
        assert!(sitemap.health_check().await.unwrap());

        // An expired document is not served when the rebuild fails.
        catalog.failing.store(true, Ordering::SeqCst);
        assert!(sitemap.serve_at(t0 + ms(2000)).await.is_err());
        assert_eq!(catalog.calls(), 3);

        // The previous entry is still there and still timestamped at t0.
        catalog.failing.store(false, Ordering::SeqCst);
        let fresh = sitemap.serve_at(t0 + ms(10)).await.unwrap();
        assert_eq!(good.as_ptr(), fresh.as_ptr());
        assert_eq!(catalog.calls(), 3);
        assert_eq!(sitemap.stats().await.failures, 2);
    }

    #[tokio::test]
    async fn test_evict_and_invalidate() {
        let catalog = CountingCatalog::new(vec![]);
        let sitemap = plugin(catalog.clone(), 1000);
        let t0 = Instant::now();

        sitemap.serve_at(t0).await.unwrap();
        assert!(!sitemap.evict_expired_at(t0 + ms(999)).await);
        assert!(sitemap.stats().await.cached);
        assert!(sitemap.evict_expired_at(t0 + ms(1000)).await);
        assert!(!sitemap.stats().await.cached);

        sitemap.serve_at(t0).await.unwrap();
        sitemap.invalidate().await;
        assert!(!sitemap.stats().await.cached);
        sitemap.serve_at(t0).await.unwrap();
        assert_eq!(catalog.calls(), 3);
    }

    #[tokio::test]
    async fn test_custom_static_pages() {
        let catalog = CountingCatalog::new(vec![CatalogItem::new("7")]);
        let sitemap = SitemapPlugin::with_static_pages(
            catalog,
            SitemapConfig::new("https://shop.example", Duration::from_secs(60)),
            vec![StaticPageEntry::new("/faq", ChangeFrequency::Weekly, 0.4)],
        );

        let doc = sitemap.serve().await.unwrap();
        let xml = std::str::from_utf8(&doc).unwrap();
        assert_eq!(xml.matches("<url>").count(), 2);
        assert!(xml.contains("<loc>https://shop.example/faq</loc>"));
        assert!(xml.contains("<priority>0.4</priority>"));
        assert!(!xml.contains("<loc>https://shop.example/about</loc>"));
    }

    #[tokio::test]
    async fn test_zero_ttl_always_rebuilds() {
        let catalog = CountingCatalog::new(vec![]);
        let sitemap = plugin(catalog.clone(), 0);
        let t0 = Instant::now();

        sitemap.serve_at(t0).await.unwrap();
        sitemap.serve_at(t0).await.unwrap();
        assert_eq!(catalog.calls(), 2);
    }

    /// Returns one more item on every call, so each rebuild yields a
    /// distinct document.
    #[derive(Default)]
    struct GrowingCatalog {
        calls: AtomicUsize,
    }

    impl GrowingCatalog {
        fn items(n: usize) -> Vec<CatalogItem> {
            (0..n).map(|i| CatalogItem::new(format!("item-{}", i))).collect()
        }
    }

    #[async_trait]
    impl Catalog for GrowingCatalog {
        fn name(&self) -> &str {
            "growing"
        }

        async fn sitemap_items(&self) -> Result<Vec<CatalogItem>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::task::yield_now().await;
            Ok(Self::items(n))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_see_whole_documents() {
        let catalog = Arc::new(GrowingCatalog::default());
        let sitemap = Arc::new(SitemapPlugin::new(
            catalog.clone(),
            SitemapConfig::new("https://shop.example", ms(1000)),
        ));
        let t0 = Instant::now();
        sitemap.serve_at(t0).await.unwrap();

        // Half the readers arrive before expiry, half after it.
        let tasks: Vec<_> = (0..64u64)
            .map(|i| {
                let sitemap = sitemap.clone();
                let now = t0 + ms(if i % 2 == 0 { 500 } else { 1500 });
                tokio::spawn(async move { sitemap.serve_at(now).await.unwrap() })
            })
            .collect();

        let mut served = Vec::with_capacity(tasks.len());
        for task in tasks {
            served.push(task.await.unwrap());
        }

        let calls = catalog.calls.load(Ordering::SeqCst);
        assert!(calls >= 2);
        let built: Vec<Bytes> = (1..=calls)
            .map(|n| Bytes::from(build("https://shop.example", STATIC_PAGES, &GrowingCatalog::items(n))))
            .collect();

        for doc in &served {
            let xml = std::str::from_utf8(doc).unwrap();
            assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
            assert_eq!(xml.matches("<urlset").count(), 1);
            assert!(xml.trim_end().ends_with("</urlset>"));
            assert_eq!(xml.matches("<url>").count(), xml.matches("</url>").count());
            assert!(built.contains(doc), "served a document no build produced");
        }

        // Last write wins: the slot holds one of the rebuilt documents.
        let held = sitemap.serve_at(t0 + ms(1500)).await.unwrap();
        assert_eq!(catalog.calls.load(Ordering::SeqCst), calls);
        assert!(built[1..].contains(&held));
    }
}
