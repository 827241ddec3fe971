use std::fmt::{self, Write};

use chrono::NaiveDate;
use tracing::debug;

use crate::catalog::CatalogItem;
use crate::utils::{encode_path_segment, escape_xml, trim_base_url};

pub const SITEMAP_NAMESPACE: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

const PRODUCT_PREFIX: &str = "/product/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeFrequency {
    Daily,
    Weekly,
    Monthly,
}

impl ChangeFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeFrequency::Daily => "daily",
            ChangeFrequency::Weekly => "weekly",
            ChangeFrequency::Monthly => "monthly",
        }
    }
}

impl fmt::Display for ChangeFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticPageEntry {
    pub path: &'static str,
    pub changefreq: ChangeFrequency,
    priority: f32,
}

impl StaticPageEntry {
    /// Priority is clamped into `[0.0, 1.0]` and rounded to one decimal
    /// place, the precision the document is rendered with.
    pub fn new(path: &'static str, changefreq: ChangeFrequency, priority: f32) -> Self {
        Self {
            path,
            changefreq,
            priority: (priority.clamp(0.0, 1.0) * 10.0).round() / 10.0,
        }
    }

    pub fn priority(&self) -> f32 {
        self.priority
    }
}

pub const STATIC_PAGES: &[StaticPageEntry] = &[
    StaticPageEntry { path: "/", changefreq: ChangeFrequency::Daily, priority: 1.0 },
    StaticPageEntry { path: "/products", changefreq: ChangeFrequency::Daily, priority: 0.9 },
    StaticPageEntry { path: "/about", changefreq: ChangeFrequency::Monthly, priority: 0.5 },
    StaticPageEntry { path: "/contact", changefreq: ChangeFrequency::Monthly, priority: 0.5 },
];

const PRODUCT_CHANGEFREQ: ChangeFrequency = ChangeFrequency::Weekly;
const PRODUCT_PRIORITY: f32 = 0.8;

#[derive(Debug, Clone, PartialEq)]
pub struct UrlEntry {
    pub loc: String,
    pub lastmod: Option<NaiveDate>,
    pub changefreq: ChangeFrequency,
    pub priority: f32,
}

impl UrlEntry {
    fn for_page(base: &str, page: &StaticPageEntry) -> Self {
        Self {
            loc: format!("{}{}", base, page.path),
            lastmod: None,
            changefreq: page.changefreq,
            priority: page.priority,
        }
    }

    fn for_item(base: &str, item: &CatalogItem) -> Option<Self> {
        let key = item.path_key()?;
        Some(Self {
            loc: format!("{}{}{}", base, PRODUCT_PREFIX, encode_path_segment(key)),
            lastmod: item.last_modified().map(|at| at.date_naive()),
            changefreq: PRODUCT_CHANGEFREQ,
            priority: PRODUCT_PRIORITY,
        })
    }

    fn write_xml(&self, out: &mut String) -> fmt::Result {
        out.push_str("  <url>\n");
        writeln!(out, "    <loc>{}</loc>", escape_xml(&self.loc))?;
        if let Some(date) = self.lastmod {
            writeln!(out, "    <lastmod>{}</lastmod>", date.format("%Y-%m-%d"))?;
        }
        writeln!(out, "    <changefreq>{}</changefreq>", self.changefreq)?;
        writeln!(out, "    <priority>{:.1}</priority>", self.priority)?;
        out.push_str("  </url>\n");
        Ok(())
    }
}

/// Collects the URL entries for a sitemap: static pages first, then one per
/// catalog item that can be addressed.
pub fn collect_entries(base_url: &str, static_pages: &[StaticPageEntry], items: &[CatalogItem]) -> Vec<UrlEntry> {
    let base = trim_base_url(base_url);
    let mut entries = Vec::with_capacity(static_pages.len() + items.len());

    entries.extend(static_pages.iter().map(|page| UrlEntry::for_page(base, page)));

    for item in items {
        match UrlEntry::for_item(base, item) {
            Some(entry) => entries.push(entry),
            None => debug!("Skipping catalog item without slug or id"),
        }
    }

    entries
}

/// Renders a complete sitemap document.
///
/// Pure and deterministic. Does not validate `base_url`.
pub fn build(base_url: &str, static_pages: &[StaticPageEntry], items: &[CatalogItem]) -> String {
    let entries = collect_entries(base_url, static_pages, items);

    let mut out = String::with_capacity(128 + entries.len() * 160);
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<urlset xmlns=\"");
    out.push_str(SITEMAP_NAMESPACE);
    out.push_str("\">\n");
    for entry in &entries {
        // Writing into a String cannot fail.
        let _ = entry.write_xml(&mut out);
    }
    out.push_str("</urlset>\n");

    debug!("Built sitemap with {} entries ({} bytes)", entries.len(), out.len());
    out
}
