use crate::plugin::Plugin;
use crate::error::Result;
use async_trait::async_trait;
use hyper::header::{self, HeaderMap, HeaderValue};
use std::collections::HashSet;
use tokio::sync::RwLock;
use tracing::{info, warn, debug};

const WILDCARD: &str = "*";
const ALLOWED_METHODS: &str = "GET, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization";
const PREFLIGHT_MAX_AGE: &str = "3600";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OriginMatch {
    Listed,
    Wildcard,
    Blocked,
}

/// CORS origin allow-list.
#[derive(Debug)]
pub struct SecurityPlugin {
    allowed_origins: RwLock<HashSet<String>>,
}

fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

impl SecurityPlugin {
    pub fn new<I, S>(allowed_origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let origins: HashSet<String> = allowed_origins
            .into_iter()
            .map(|o| normalize_origin(o.as_ref()))
            .filter(|o| !o.is_empty())
            .collect();
        info!("Initializing SecurityPlugin with {} allowed origins", origins.len());
        Self {
            allowed_origins: RwLock::new(origins),
        }
    }

    pub async fn add_allowed_origin(&self, origin: &str) {
        let origin = normalize_origin(origin);
        let mut origins = self.allowed_origins.write().await;
        if origins.insert(origin.clone()) {
            info!("Added new allowed origin: {}", origin);
        }
    }

    pub async fn remove_allowed_origin(&self, origin: &str) {
        let origin = normalize_origin(origin);
        let mut origins = self.allowed_origins.write().await;
        if origins.remove(&origin) {
            info!("Removed allowed origin: {}", origin);
        } else {
            warn!("Attempted to remove non-existent origin: {}", origin);
        }
    }

    /// `*` in the allow-list admits every origin; otherwise the match is
    /// exact, ignoring case and trailing slashes.
    pub async fn is_origin_allowed(&self, origin: &str) -> bool {
        self.match_origin(origin).await != OriginMatch::Blocked
    }

    async fn match_origin(&self, origin: &str) -> OriginMatch {
        let origins = self.allowed_origins.read().await;
        let matched = if origins.contains(&normalize_origin(origin)) {
            OriginMatch::Listed
        } else if origins.contains(WILDCARD) {
            OriginMatch::Wildcard
        } else {
            OriginMatch::Blocked
        };
        debug!("Origin {}: {:?}", origin, matched);
        matched
    }

    /// Response headers for a request carrying `origin`, or `None` when the
    /// origin is not allowed.
    ///
    /// Listed origins are echoed back with credentials allowed. Origins
    /// admitted only through `*` get a literal `*` and no credentials.
    pub async fn cors_headers(&self, origin: &str) -> Option<HeaderMap> {
        let mut headers = HeaderMap::new();
        match self.match_origin(origin).await {
            OriginMatch::Listed => {
                let origin_value = HeaderValue::from_str(origin).ok()?;
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin_value);
                headers.insert(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
                headers.insert(header::VARY, HeaderValue::from_static("Origin"));
            }
            OriginMatch::Wildcard => {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static(WILDCARD));
            }
            OriginMatch::Blocked => return None,
        }
        Some(headers)
    }

    /// Headers answering a preflight request from an allowed origin.
    pub async fn preflight_headers(&self, origin: &str) -> Option<HeaderMap> {
        let Some(mut headers) = self.cors_headers(origin).await else {
            warn!("Preflight rejected for origin: {}", origin);
            return None;
        };
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOWED_HEADERS));
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(PREFLIGHT_MAX_AGE));
        Some(headers)
    }

    pub async fn get_allowed_origins(&self) -> HashSet<String> {
        self.allowed_origins.read().await.clone()
    }
}

#[async_trait]
impl Plugin for SecurityPlugin {
    fn name(&self) -> &str {
        "security"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn init(&self) -> Result<()> {
        let origins = self.allowed_origins.read().await;
        info!("Initializing security plugin, allowed origins: {:?}", origins);
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        info!("Cleaning up security plugin");
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        let origins = self.allowed_origins.read().await;
        let status = !origins.is_empty();
        if !status {
            warn!("Security plugin has no allowed origins configured");
        }
        Ok(status)
    }
}
