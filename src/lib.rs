pub mod catalog;
pub mod config;
pub mod error;
pub mod logger;
pub mod plugin;
pub mod plugin_manager;
pub mod plugins;
pub mod server;
pub mod utils;

pub use config::Config;
pub use error::{Result, SitemapError};
pub use plugin_manager::PluginManager;

pub mod prelude {
    pub use crate::catalog::{Catalog, CatalogItem, JsonFileCatalog, MemoryCatalog};
    pub use crate::config::{Config, SitemapConfig};
    pub use crate::plugin::Plugin;
    pub use crate::plugin_manager::PluginManager;
    pub use crate::plugins::security::SecurityPlugin;
    pub use crate::plugins::sitemap::{CacheCleaner, SitemapPlugin};
    pub use crate::server::{Router, SitemapServer};
}
