//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::storage::{
    CrawlPolicy, LocationRecord, NewLocation, OriginRecord, RecordEntry, RecordLocation,
    RecordType, Statistics, VisitBookkeeping, VisitRecord,
};
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid value in column {column}: {value}")]
    InvalidValue { column: &'static str, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines all database operations needed by the scheduler, the exchange
/// engine and the capture store. Callers share one backend behind a mutex.
pub trait Storage {
    // ===== Origins =====

    /// Inserts an origin unless it already exists
    ///
    /// # Returns
    ///
    /// `true` when a new row was created
    fn insert_origin(
        &mut self,
        id: i64,
        name: &str,
        discovered: DateTime<Utc>,
        policy: CrawlPolicy,
    ) -> StorageResult<bool>;

    /// Gets an origin by ID
    fn get_origin(&self, id: i64) -> StorageResult<Option<OriginRecord>>;

    /// Sets the crawl policy of an origin
    fn set_crawl_policy(&mut self, id: i64, policy: CrawlPolicy) -> StorageResult<()>;

    /// Makes an exhausted origin (null next visit) eligible at `at`
    ///
    /// Origins that already have a next visit keep it.
    fn wake_origin(&mut self, id: i64, at: DateTime<Utc>) -> StorageResult<()>;

    /// Returns the scheduled origin with the earliest next visit
    ///
    /// Only origins whose policy is unset or continuous are considered.
    fn peek_origin(&self) -> StorageResult<Option<OriginRecord>>;

    /// Parks an origin with no due locations
    ///
    /// Its next visit moves to the earliest future location visit, or to none at all
    /// until new work wakes it.
    fn exhaust_origin(&mut self, id: i64, now: DateTime<Utc>) -> StorageResult<()>;

    /// Stores the raw robots.txt body and its parsed crawl-delay
    fn update_origin_robots(
        &mut self,
        id: i64,
        crawl_delay: Option<u32>,
        robots_txt: &[u8],
    ) -> StorageResult<()>;

    // ===== Locations =====

    /// Inserts a location unless it already exists
    ///
    /// # Returns
    ///
    /// `true` when a new row was created
    fn insert_location(&mut self, location: &NewLocation) -> StorageResult<bool>;

    /// Gets a location by ID
    fn get_location(&self, id: i64) -> StorageResult<Option<LocationRecord>>;

    /// Returns the most urgent due location of an origin
    ///
    /// Ordered by priority, then sitemap priority (highest first), depth and next visit.
    fn peek_location(
        &self,
        origin_id: i64,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<LocationRecord>>;

    /// Records sitemap metadata for a location
    fn update_sitemap_data(
        &mut self,
        id: i64,
        changefreq: Option<&str>,
        priority: Option<f64>,
        lastmod: Option<&str>,
    ) -> StorageResult<()>;

    /// Records the rendered document title of a location
    fn update_location_title(&mut self, id: i64, title: &str) -> StorageResult<()>;

    /// Inserts a provenance edge between two locations
    fn insert_link(&mut self, src: i64, dst: i64) -> StorageResult<()>;

    /// Counts outgoing links of a location
    fn count_links_from(&self, src: i64) -> StorageResult<u64>;

    // ===== Visits =====

    /// Appends a visit and applies its scheduling updates in one transaction
    fn finish_visit(
        &mut self,
        visit: &VisitRecord,
        bookkeeping: &VisitBookkeeping,
    ) -> StorageResult<()>;

    /// Overwrites the status of a finished visit
    fn update_visit_status(&mut self, visit_id: Uuid, status: i32) -> StorageResult<()>;

    /// Gets a visit by ID
    fn get_visit(&self, visit_id: Uuid) -> StorageResult<Option<VisitRecord>>;

    /// Lists the visits of a location, oldest first
    fn visits_for_location(&self, location_id: i64) -> StorageResult<Vec<VisitRecord>>;

    // ===== Record index =====

    /// Registers a newly created archive file
    fn insert_warc(&mut self, id: Uuid, path: &str, created: DateTime<Utc>) -> StorageResult<()>;

    /// Adds an entry to the record index
    fn insert_record(&mut self, record: &RecordEntry) -> StorageResult<()>;

    /// Looks up the file, offset and type of a record
    fn locate_record(&self, id: Uuid) -> StorageResult<Option<RecordLocation>>;

    /// Lists index entries of one type belonging to a visit
    fn records_for_visit(
        &self,
        visit_id: Uuid,
        record_type: RecordType,
    ) -> StorageResult<Vec<RecordEntry>>;

    /// Finds the most recent response at a location with the given payload digest
    ///
    /// # Returns
    ///
    /// The response record id and its visit date
    fn find_response_by_payload_digest(
        &self,
        location_id: i64,
        digest: &str,
    ) -> StorageResult<Option<(Uuid, DateTime<Utc>)>>;

    /// Finds the response or revisit record of the visit closest in time to `as_of`
    fn last_response_id(
        &self,
        method: &str,
        location_id: i64,
        as_of: DateTime<Utc>,
    ) -> StorageResult<Option<Uuid>>;

    // ===== Statistics =====

    /// Gathers table counts and the visit status histogram
    fn statistics(&self) -> StorageResult<Statistics>;
}
