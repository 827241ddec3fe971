use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SitemapError};
use crate::plugin::Plugin;

/// Owns the server's plugins. A plugin is initialized when it is registered
/// and cleaned up in reverse registration order.
#[derive(Default)]
pub struct PluginManager {
    plugins: RwLock<Vec<Arc<dyn Plugin>>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let name = plugin.name().to_string();
        let mut plugins = self.plugins.write().await;
        if plugins.iter().any(|registered| registered.name() == name) {
            return Err(SitemapError::Plugin(format!("plugin {} is already registered", name)));
        }

        if let Err(e) = plugin.init().await {
            error!("Plugin {} failed to initialize: {}", name, e);
            return Err(e);
        }
        info!("Registered plugin {} v{}", name, plugin.version());
        plugins.push(plugin);
        Ok(())
    }

    /// Runs every plugin's cleanup, even after a failure. Fails if any of
    /// them did.
    pub async fn cleanup(&self) -> Result<()> {
        let plugins = self.plugins.read().await;
        let mut failed = Vec::new();
        for plugin in plugins.iter().rev() {
            debug!("Cleaning up plugin {}", plugin.name());
            if let Err(e) = plugin.cleanup().await {
                error!("Plugin {} cleanup failed: {}", plugin.name(), e);
                failed.push(plugin.name().to_string());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(SitemapError::Plugin(format!("cleanup failed for: {}", failed.join(", "))))
        }
    }

    /// Health of every plugin by name. A plugin whose check errors counts
    /// as unhealthy.
    pub async fn health_check(&self) -> BTreeMap<String, bool> {
        let plugins = self.plugins.read().await;
        let mut results = BTreeMap::new();
        for plugin in plugins.iter() {
            let healthy = plugin.health_check().await.unwrap_or_else(|e| {
                warn!("Health check for plugin {} errored: {}", plugin.name(), e);
                false
            });
            results.insert(plugin.name().to_string(), healthy);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubPlugin {
        name: &'static str,
        healthy: bool,
        fail_cleanup: bool,
        cleaned: Arc<Mutex<Vec<&'static str>>>,
    }

    impl StubPlugin {
        fn new(name: &'static str, healthy: bool, cleaned: &Arc<Mutex<Vec<&'static str>>>) -> Self {
            Self {
                name,
                healthy,
                fail_cleanup: false,
                cleaned: cleaned.clone(),
            }
        }
    }

    #[async_trait]
    impl Plugin for StubPlugin {
        fn name(&self) -> &str {
            self.name
        }

        fn version(&self) -> &str {
            "0.0.1"
        }

        async fn init(&self) -> Result<()> {
            Ok(())
        }

        async fn cleanup(&self) -> Result<()> {
            self.cleaned.lock().unwrap().push(self.name);
            if self.fail_cleanup {
                return Err(SitemapError::Plugin("still busy".into()));
            }
            Ok(())
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(self.healthy)
        }
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let cleaned: Arc<Mutex<Vec<&'static str>>> = Arc::default();
        let manager = PluginManager::new();
        manager.register_plugin(Arc::new(StubPlugin::new("a", true, &cleaned))).await.unwrap();
        let err = manager.register_plugin(Arc::new(StubPlugin::new("a", true, &cleaned))).await;
        assert!(matches!(err, Err(SitemapError::Plugin(_))));
        assert_eq!(manager.health_check().await.len(), 1);
    }

    #[tokio::test]
    async fn test_health_and_cleanup() {
        let cleaned: Arc<Mutex<Vec<&'static str>>> = Arc::default();
        let manager = PluginManager::new();
        manager.register_plugin(Arc::new(StubPlugin::new("up", true, &cleaned))).await.unwrap();
        manager.register_plugin(Arc::new(StubPlugin::new("down", false, &cleaned))).await.unwrap();

        let health = manager.health_check().await;
        assert_eq!(health.get("up"), Some(&true));
        assert_eq!(health.get("down"), Some(&false));

        manager.cleanup().await.unwrap();
        assert_eq!(*cleaned.lock().unwrap(), vec!["down", "up"]);
    }

    #[tokio::test]
    async fn test_cleanup_continues_past_failure() {
        let cleaned: Arc<Mutex<Vec<&'static str>>> = Arc::default();
        let manager = PluginManager::new();
        manager.register_plugin(Arc::new(StubPlugin::new("first", true, &cleaned))).await.unwrap();
        let mut stuck = StubPlugin::new("stuck", true, &cleaned);
        stuck.fail_cleanup = true;
        manager.register_plugin(Arc::new(stuck)).await.unwrap();

        let err = manager.cleanup().await;
        assert!(matches!(err, Err(SitemapError::Plugin(msg)) if msg.contains("stuck")));
        assert_eq!(*cleaned.lock().unwrap(), vec!["stuck", "first"]);
    }
}
