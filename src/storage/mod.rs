//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Origin and location bookkeeping for the scheduler
//! - Visit history and the archive record index
//! - Link provenance tracking

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Storage handle shared by the scheduler, the exchange engine and the capture store
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Initializes or opens a storage database
///
/// Parent directories of `path` are created when missing.
pub fn open_storage(path: &Path) -> StorageResult<SharedStorage> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(Arc::new(Mutex::new(SqliteStorage::new(path)?)))
}

/// Converts stored epoch milliseconds back into a timestamp
pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

/// Whether and how an origin is crawled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlPolicy {
    /// Nothing is fetched from this origin
    Forbidden,
    /// Resources are fetched only when a page embeds them
    Transclusions,
    /// The origin is scheduled on its own
    Continuous,
}

impl CrawlPolicy {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Forbidden => "forbidden",
            Self::Transclusions => "transclusions",
            Self::Continuous => "continuous",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "forbidden" => Some(Self::Forbidden),
            "transclusions" => Some(Self::Transclusions),
            "continuous" => Some(Self::Continuous),
            _ => None,
        }
    }
}

/// Kind of resource a location points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationType {
    Robots,
    Sitemap,
    Page,
    Transclusion,
}

impl LocationType {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Robots => "robots",
            Self::Sitemap => "sitemap",
            Self::Page => "page",
            Self::Transclusion => "transclusion",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "robots" => Some(Self::Robots),
            "sitemap" => Some(Self::Sitemap),
            "page" => Some(Self::Page),
            "transclusion" => Some(Self::Transclusion),
            _ => None,
        }
    }
}

/// Type of an archived record, named as in the `WARC-Type` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Warcinfo,
    Request,
    Response,
    Revisit,
    Resource,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warcinfo => "warcinfo",
            Self::Request => "request",
            Self::Response => "response",
            Self::Revisit => "revisit",
            Self::Resource => "resource",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "warcinfo" => Some(Self::Warcinfo),
            "request" => Some(Self::Request),
            "response" => Some(Self::Response),
            "revisit" => Some(Self::Revisit),
            "resource" => Some(Self::Resource),
            _ => None,
        }
    }
}

/// Represents an origin in the database
#[derive(Debug, Clone)]
pub struct OriginRecord {
    pub id: i64,
    pub name: String,
    pub discovered: DateTime<Utc>,
    pub last_visit: Option<DateTime<Utc>>,
    pub next_visit: Option<DateTime<Utc>>,
    /// Crawl-delay from robots.txt, in seconds
    pub robots_crawl_delay: Option<u32>,
    pub robots_txt: Option<Vec<u8>>,
    pub crawl_policy: Option<CrawlPolicy>,
}

/// Represents a location in the database
#[derive(Debug, Clone)]
pub struct LocationRecord {
    pub id: i64,
    pub origin_id: i64,
    pub url: String,
    pub location_type: LocationType,
    pub depth: u32,
    pub via: Option<i64>,
    pub discovered: DateTime<Utc>,
    pub last_visit: Option<DateTime<Utc>>,
    pub next_visit: Option<DateTime<Utc>>,
    pub priority: i32,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Response record that produced the cached validators
    pub etag_response_id: Option<Uuid>,
    pub etag_date: Option<DateTime<Utc>>,
    pub sitemap_changefreq: Option<String>,
    pub sitemap_priority: Option<f64>,
    pub sitemap_lastmod: Option<String>,
    pub title: Option<String>,
}

/// A location about to be inserted
#[derive(Debug, Clone)]
pub struct NewLocation {
    pub id: i64,
    pub origin_id: i64,
    pub url: String,
    pub location_type: LocationType,
    pub depth: u32,
    pub via: Option<i64>,
    pub discovered: DateTime<Utc>,
    pub next_visit: DateTime<Utc>,
    pub priority: i32,
}

/// Represents a completed visit
#[derive(Debug, Clone, PartialEq)]
pub struct VisitRecord {
    pub id: Uuid,
    pub method: String,
    pub location_id: i64,
    pub date: DateTime<Utc>,
    pub status: i32,
    pub content_type: Option<String>,
    pub content_length: Option<i64>,
}

/// Validator state cached on a location after a successful response
#[derive(Debug, Clone)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub response_id: Uuid,
    pub date: DateTime<Utc>,
}

/// Scheduling updates applied together with a new visit
#[derive(Debug, Clone)]
pub struct VisitBookkeeping {
    pub origin_id: i64,
    pub origin_next_visit: DateTime<Utc>,
    pub location_next_visit: DateTime<Utc>,
    pub validators: Option<Validators>,
}

/// One entry of the archive record index
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEntry {
    pub id: Uuid,
    pub visit_id: Option<Uuid>,
    pub record_type: RecordType,
    pub warc_id: Uuid,
    pub position: u64,
    pub length: u64,
    pub payload_digest: Option<String>,
}

/// Where a record lives on disk
#[derive(Debug, Clone)]
pub struct RecordLocation {
    pub path: String,
    pub position: u64,
    pub length: u64,
    pub record_type: RecordType,
}

/// Aggregate counts reported by `--stats`
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub origins: u64,
    pub locations: u64,
    pub visits: u64,
    pub records: u64,
    pub warc_files: u64,
    pub links: u64,
    pub visits_by_status: BTreeMap<i32, u64>,
}
