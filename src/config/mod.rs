//! Configuration module for Tidemark
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every key has a default, so an empty file yields a usable configuration.
//!
//! # Example
//!
//! ```no_run
//! use tidemark::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("tidemark.toml")).unwrap();
//! println!("Archive files: {}", config.archive.warc_filename);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    ArchiveConfig, BrowserConfig, Config, CrawlerConfig, DigestAlgorithm, OutputConfig,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
