use thiserror::Error;

#[derive(Error, Debug)]
pub enum SitemapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Catalog error: {0}")]
    Catalog(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Plugin error: {0}")]
    Plugin(String),
}

impl From<hyper::Error> for SitemapError {
    fn from(e: hyper::Error) -> Self {
        SitemapError::Network(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SitemapError>;
