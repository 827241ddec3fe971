use serde::Deserialize;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Result, SitemapError};
use crate::utils::is_absolute_url;

pub const DEFAULT_SITE_URL: &str = "http://localhost:3000";
pub const DEFAULT_TTL_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sitemap: SitemapConfig,
    pub security: SecurityConfig,
    pub catalog: CatalogConfig,
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub sitemap_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SitemapConfig {
    /// Unset means: take `CLIENT_URL`, else `DEFAULT_SITE_URL`.
    pub site_url: Option<String>,
    pub ttl_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub interval_secs: u64,
}

impl SitemapConfig {
    pub fn new(site_url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            site_url: Some(site_url.into()),
            ttl_ms: ttl.as_millis() as u64,
        }
    }

    pub fn site_url(&self) -> &str {
        self.site_url.as_deref().unwrap_or(DEFAULT_SITE_URL)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl CleanupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            sitemap_path: "/sitemap.xml".to_string(),
        }
    }
}

impl Default for SitemapConfig {
    fn default() -> Self {
        Self {
            site_url: None,
            ttl_ms: DEFAULT_TTL_MS,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![DEFAULT_SITE_URL.to_string()],
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: "./data/products.json".into(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10 * 60,
        }
    }
}

impl Config {
    /// Defaults, then the TOML file named by `CONFIG_PATH`, then environment variables.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("CONFIG_PATH") {
            Ok(config_path) => {
                info!("Loading configuration from {}", config_path);
                Self::from_file(&config_path)?
            }
            Err(_) => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overlays environment-style settings read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(host) = var("HOST") {
            self.server.host = host;
        }
        if let Some(raw) = var("PORT") {
            self.server.port = parse_or("PORT", &raw, self.server.port);
        }
        if let Some(path) = var("SITEMAP_PATH") {
            self.server.sitemap_path = path;
        }

        // SITE_URL, then the config file, then CLIENT_URL.
        let client_url = var("CLIENT_URL");
        if let Some(site_url) = var("SITE_URL") {
            self.sitemap.site_url = Some(site_url);
        } else if self.sitemap.site_url.is_none() {
            if let Some(client_url) = &client_url {
                info!("No site URL configured, using CLIENT_URL for the sitemap");
                self.sitemap.site_url = Some(client_url.clone());
            }
        }
        if let Some(raw) = var("SITEMAP_CACHE_TTL") {
            self.sitemap.ttl_ms = parse_or("SITEMAP_CACHE_TTL", &raw, DEFAULT_TTL_MS);
        }

        if let Some(origins) = var("ALLOWED_ORIGINS").or(client_url) {
            self.security.allowed_origins = split_list(&origins);
        }

        if let Some(path) = var("CATALOG_PATH") {
            self.catalog.path = path.into();
        }
        if let Some(raw) = var("CLEANUP_INTERVAL_SECS") {
            self.cleanup.interval_secs = parse_or("CLEANUP_INTERVAL_SECS", &raw, self.cleanup.interval_secs);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let site_url = self.sitemap.site_url().trim();
        if site_url.contains(',') {
            return Err(SitemapError::Config(format!(
                "sitemap needs exactly one site URL, got a list: {}",
                site_url
            )));
        }
        if !is_absolute_url(site_url) {
            return Err(SitemapError::Config(format!("site URL must be absolute: {}", site_url)));
        }
        url::Url::parse(site_url)
            .map_err(|e| SitemapError::Config(format!("invalid site URL {}: {}", site_url, e)))?;

        if !self.server.sitemap_path.starts_with('/') {
            return Err(SitemapError::Config(format!(
                "sitemap path must start with '/': {}",
                self.server.sitemap_path
            )));
        }
        if self.cleanup.interval_secs == 0 {
            return Err(SitemapError::Config("cleanup interval must be positive".into()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<std::net::SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| SitemapError::Config(format!("invalid bind address: {}", e)))
    }
}

fn parse_or<T>(key: &str, raw: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    raw.parse().unwrap_or_else(|e| {
        warn!("Invalid {} value {:?} ({}), using default: {}", key, raw, e, default);
        default
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
