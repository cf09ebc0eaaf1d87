//! URL handling module for Tidemark
//!
//! This module provides URL canonicalization and the stable 64-bit keys that identify
//! a location (full canonical URL) and its origin (scheme, host and port).

mod canonical;

pub use canonical::{resolve_reference, CrawlUrl};

use xxhash_rust::xxh64::xxh64;

/// Hashes a canonical string into the signed 64-bit key stored in the database
pub fn key_for(canonical: &str) -> i64 {
    xxh64(canonical.as_bytes(), 0) as i64
}
