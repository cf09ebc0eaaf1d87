//! Tidemark: a polite, resumable archiving crawler
//!
//! This crate fetches web resources politely per origin, records every exchange into
//! append-only WARC files with content-addressed deduplication, and can drive a headless
//! browser to capture the subresources a rendered page asks for.

pub mod archive;
pub mod browser;
pub mod config;
pub mod crawler;
pub mod robots;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Tidemark operations
#[derive(Debug, Error)]
pub enum TidemarkError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Archive error: {0}")]
    Archive(#[from] archive::ArchiveError),

    #[error("Browser error: {0}")]
    Browser(#[from] browser::BrowserError),

    #[error("Sitemap error: {0}")]
    Sitemap(#[from] crawler::SitemapError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown location {0}")]
    UnknownLocation(i64),

    #[error("Unknown origin {0}")]
    UnknownOrigin(i64),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(#[from] ::url::ParseError),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL: {0}")]
    MissingHost(String),
}

/// Result type alias for Tidemark operations
pub type Result<T> = std::result::Result<T, TidemarkError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

pub use config::Config;
pub use crawler::{Coordinator, Exchange, StepOutcome};
pub use url::CrawlUrl;
