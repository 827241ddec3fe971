use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{Result, SitemapError};

/// The projection of a product record the sitemap needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl CatalogItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            slug: None,
            updated_at: None,
            created_at: None,
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Path segment identifying the item: slug if set, else id.
    pub fn path_key(&self) -> Option<&str> {
        match self.slug.as_deref() {
            Some(slug) if !slug.is_empty() => Some(slug),
            _ if !self.id.is_empty() => Some(self.id.as_str()),
            _ => None,
        }
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.updated_at.or(self.created_at)
    }
}

/// Read-only source of catalog items.
///
/// No status filtering happens here: drafts are listed like everything else.
#[async_trait]
pub trait Catalog: Send + Sync {
    fn name(&self) -> &str;

    async fn sitemap_items(&self) -> Result<Vec<CatalogItem>>;
}

/// Catalog backed by a JSON array on disk, re-read on every lookup.
#[derive(Debug, Clone)]
pub struct JsonFileCatalog {
    path: PathBuf,
}

impl JsonFileCatalog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_owned(),
        }
    }
}

#[async_trait]
impl Catalog for JsonFileCatalog {
    fn name(&self) -> &str {
        "json-file"
    }

    async fn sitemap_items(&self) -> Result<Vec<CatalogItem>> {
        debug!("Loading catalog items from {:?}", self.path);
        let raw = tokio::fs::read(&self.path).await.map_err(|e| {
            error!("Failed to read catalog file {:?}: {}", self.path, e);
            SitemapError::Catalog(format!("read {}: {}", self.path.display(), e))
        })?;

        let items: Vec<CatalogItem> = serde_json::from_slice(&raw).map_err(|e| {
            error!("Failed to parse catalog file {:?}: {}", self.path, e);
            SitemapError::Catalog(format!("parse {}: {}", self.path.display(), e))
        })?;

        debug!("Loaded {} catalog items", items.len());
        Ok(items)
    }
}

/// Fixed in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    items: Vec<CatalogItem>,
}

impl MemoryCatalog {
    pub fn new(items: Vec<CatalogItem>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    fn name(&self) -> &str {
        "memory"
    }

    async fn sitemap_items(&self) -> Result<Vec<CatalogItem>> {
        Ok(self.items.clone())
    }
}
