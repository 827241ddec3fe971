use async_trait::async_trait;
use crate::error::Result;

#[async_trait]
pub trait Plugin: Send + Sync {
    /// Plugin name, unique within a `PluginManager`
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Called once on registration
    async fn init(&self) -> Result<()>;

    /// Called once on shutdown
    async fn cleanup(&self) -> Result<()>;

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
