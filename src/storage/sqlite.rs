//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    from_millis, CrawlPolicy, LocationRecord, LocationType, NewLocation, OriginRecord,
    RecordEntry, RecordLocation, RecordType, Statistics, VisitBookkeeping, VisitRecord,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use uuid::Uuid;

const ORIGIN_COLUMNS: &str =
    "id, name, discovered, last_visit, next_visit, robots_crawl_delay, robots_txt, crawl_policy";

const LOCATION_COLUMNS: &str = "id, origin_id, url, type, depth, via, discovered, last_visit, \
     next_visit, priority, etag, last_modified, etag_response_id, etag_date, \
     sitemap_changefreq, sitemap_priority, sitemap_lastmod, title";

const VISIT_COLUMNS: &str = "id, method, location_id, date, status, content_type, content_length";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn invalid_value(idx: usize, column: &'static str, value: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(StorageError::InvalidValue { column, value }),
    )
}

fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => Uuid::parse_str(&text).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
        }),
        None => Ok(None),
    }
}

fn optional_date_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row.get::<_, Option<i64>>(idx)?.map(from_millis))
}

fn origin_from_row(row: &Row<'_>) -> rusqlite::Result<OriginRecord> {
    let policy: Option<String> = row.get(7)?;
    Ok(OriginRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        discovered: from_millis(row.get(2)?),
        last_visit: optional_date_column(row, 3)?,
        next_visit: optional_date_column(row, 4)?,
        robots_crawl_delay: row.get(5)?,
        robots_txt: row.get(6)?,
        crawl_policy: policy.as_deref().and_then(CrawlPolicy::from_db_string),
    })
}

fn location_from_row(row: &Row<'_>) -> rusqlite::Result<LocationRecord> {
    let type_text: String = row.get(3)?;
    let location_type = LocationType::from_db_string(&type_text)
        .ok_or_else(|| invalid_value(3, "location.type", type_text))?;
    Ok(LocationRecord {
        id: row.get(0)?,
        origin_id: row.get(1)?,
        url: row.get(2)?,
        location_type,
        depth: row.get(4)?,
        via: row.get(5)?,
        discovered: from_millis(row.get(6)?),
        last_visit: optional_date_column(row, 7)?,
        next_visit: optional_date_column(row, 8)?,
        priority: row.get(9)?,
        etag: row.get(10)?,
        last_modified: row.get(11)?,
        etag_response_id: optional_uuid_column(row, 12)?,
        etag_date: optional_date_column(row, 13)?,
        sitemap_changefreq: row.get(14)?,
        sitemap_priority: row.get(15)?,
        sitemap_lastmod: row.get(16)?,
        title: row.get(17)?,
    })
}

fn visit_from_row(row: &Row<'_>) -> rusqlite::Result<VisitRecord> {
    Ok(VisitRecord {
        id: uuid_column(row, 0)?,
        method: row.get(1)?,
        location_id: row.get(2)?,
        date: from_millis(row.get(3)?),
        status: row.get(4)?,
        content_type: row.get(5)?,
        content_length: row.get(6)?,
    })
}

fn record_type_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<RecordType> {
    let text: String = row.get(idx)?;
    RecordType::parse(&text).ok_or_else(|| invalid_value(idx, "record.type", text))
}

impl Storage for SqliteStorage {
    // ===== Origins =====

    fn insert_origin(
        &mut self,
        id: i64,
        name: &str,
        discovered: DateTime<Utc>,
        policy: CrawlPolicy,
    ) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO origin (id, name, discovered, crawl_policy) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, discovered.timestamp_millis(), policy.to_db_string()],
        )?;
        Ok(inserted > 0)
    }

    fn get_origin(&self, id: i64) -> StorageResult<Option<OriginRecord>> {
        let sql = format!("SELECT {} FROM origin WHERE id = ?1", ORIGIN_COLUMNS);
        let origin = self
            .conn
            .query_row(&sql, params![id], origin_from_row)
            .optional()?;
        Ok(origin)
    }

    fn set_crawl_policy(&mut self, id: i64, policy: CrawlPolicy) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE origin SET crawl_policy = ?1 WHERE id = ?2",
            params![policy.to_db_string(), id],
        )?;
        Ok(())
    }

    fn wake_origin(&mut self, id: i64, at: DateTime<Utc>) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE origin SET next_visit = COALESCE(next_visit, ?1) WHERE id = ?2",
            params![at.timestamp_millis(), id],
        )?;
        Ok(())
    }

    fn peek_origin(&self) -> StorageResult<Option<OriginRecord>> {
        let sql = format!(
            "SELECT {} FROM origin \
             WHERE (crawl_policy IS NULL OR crawl_policy = 'continuous') AND next_visit IS NOT NULL \
             ORDER BY next_visit LIMIT 1",
            ORIGIN_COLUMNS
        );
        let origin = self.conn.query_row(&sql, [], origin_from_row).optional()?;
        Ok(origin)
    }

    fn exhaust_origin(&mut self, id: i64, now: DateTime<Utc>) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE origin SET last_visit = ?1, \
             next_visit = (SELECT MIN(next_visit) FROM location WHERE origin_id = ?2 AND next_visit > ?1) \
             WHERE id = ?2",
            params![now.timestamp_millis(), id],
        )?;
        Ok(())
    }

    fn update_origin_robots(
        &mut self,
        id: i64,
        crawl_delay: Option<u32>,
        robots_txt: &[u8],
    ) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE origin SET robots_crawl_delay = ?1, robots_txt = ?2 WHERE id = ?3",
            params![crawl_delay, robots_txt, id],
        )?;
        Ok(())
    }

    // ===== Locations =====

    fn insert_location(&mut self, location: &NewLocation) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO location \
             (id, origin_id, url, type, depth, via, discovered, next_visit, priority) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                location.id,
                location.origin_id,
                location.url,
                location.location_type.to_db_string(),
                location.depth,
                location.via,
                location.discovered.timestamp_millis(),
                location.next_visit.timestamp_millis(),
                location.priority,
            ],
        )?;
        Ok(inserted > 0)
    }

    fn get_location(&self, id: i64) -> StorageResult<Option<LocationRecord>> {
        let sql = format!("SELECT {} FROM location WHERE id = ?1", LOCATION_COLUMNS);
        let location = self
            .conn
            .query_row(&sql, params![id], location_from_row)
            .optional()?;
        Ok(location)
    }

    fn peek_location(
        &self,
        origin_id: i64,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<LocationRecord>> {
        let sql = format!(
            "SELECT {} FROM location \
             WHERE origin_id = ?1 AND next_visit <= ?2 \
             ORDER BY priority ASC, sitemap_priority DESC, depth ASC, next_visit ASC LIMIT 1",
            LOCATION_COLUMNS
        );
        let location = self
            .conn
            .query_row(&sql, params![origin_id, now.timestamp_millis()], location_from_row)
            .optional()?;
        Ok(location)
    }

    fn update_sitemap_data(
        &mut self,
        id: i64,
        changefreq: Option<&str>,
        priority: Option<f64>,
        lastmod: Option<&str>,
    ) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE location SET sitemap_changefreq = ?1, sitemap_priority = ?2, sitemap_lastmod = ?3 \
             WHERE id = ?4",
            params![changefreq, priority, lastmod, id],
        )?;
        Ok(())
    }

    fn update_location_title(&mut self, id: i64, title: &str) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE location SET title = ?1 WHERE id = ?2",
            params![title, id],
        )?;
        Ok(())
    }

    fn insert_link(&mut self, src: i64, dst: i64) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO link (src, dst) VALUES (?1, ?2)",
            params![src, dst],
        )?;
        Ok(())
    }

    fn count_links_from(&self, src: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM link WHERE src = ?1",
            params![src],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Visits =====

    fn finish_visit(
        &mut self,
        visit: &VisitRecord,
        bookkeeping: &VisitBookkeeping,
    ) -> StorageResult<()> {
        let date = visit.date.timestamp_millis();
        let tx = self.conn.transaction()?;

        tx.execute(
            "UPDATE origin SET last_visit = ?1, next_visit = ?2 WHERE id = ?3",
            params![
                date,
                bookkeeping.origin_next_visit.timestamp_millis(),
                bookkeeping.origin_id
            ],
        )?;

        if let Some(validators) = &bookkeeping.validators {
            tx.execute(
                "UPDATE location SET etag = ?1, last_modified = ?2, etag_response_id = ?3, etag_date = ?4 \
                 WHERE id = ?5",
                params![
                    validators.etag,
                    validators.last_modified,
                    validators.response_id.to_string(),
                    validators.date.timestamp_millis(),
                    visit.location_id
                ],
            )?;
        }

        tx.execute(
            "UPDATE location SET last_visit = ?1, next_visit = ?2 WHERE id = ?3",
            params![
                date,
                bookkeeping.location_next_visit.timestamp_millis(),
                visit.location_id
            ],
        )?;

        tx.execute(
            "INSERT INTO visit (id, method, location_id, date, status, content_type, content_length) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                visit.id.to_string(),
                visit.method,
                visit.location_id,
                date,
                visit.status,
                visit.content_type,
                visit.content_length
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn update_visit_status(&mut self, visit_id: Uuid, status: i32) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE visit SET status = ?1 WHERE id = ?2",
            params![status, visit_id.to_string()],
        )?;
        Ok(())
    }

    fn get_visit(&self, visit_id: Uuid) -> StorageResult<Option<VisitRecord>> {
        let sql = format!("SELECT {} FROM visit WHERE id = ?1", VISIT_COLUMNS);
        let visit = self
            .conn
            .query_row(&sql, params![visit_id.to_string()], visit_from_row)
            .optional()?;
        Ok(visit)
    }

    fn visits_for_location(&self, location_id: i64) -> StorageResult<Vec<VisitRecord>> {
        let sql = format!(
            "SELECT {} FROM visit WHERE location_id = ?1 ORDER BY date ASC",
            VISIT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let visits = stmt
            .query_map(params![location_id], visit_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(visits)
    }

    // ===== Record index =====

    fn insert_warc(&mut self, id: Uuid, path: &str, created: DateTime<Utc>) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO warc (id, path, created) VALUES (?1, ?2, ?3)",
            params![id.to_string(), path, created.timestamp_millis()],
        )?;
        Ok(())
    }

    fn insert_record(&mut self, record: &RecordEntry) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO record (id, visit_id, type, warc_id, position, length, payload_digest) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id.to_string(),
                record.visit_id.map(|id| id.to_string()),
                record.record_type.as_str(),
                record.warc_id.to_string(),
                record.position as i64,
                record.length as i64,
                record.payload_digest,
            ],
        )?;
        Ok(())
    }

    fn locate_record(&self, id: Uuid) -> StorageResult<Option<RecordLocation>> {
        let location = self
            .conn
            .query_row(
                "SELECT w.path, r.position, r.length, r.type FROM record r \
                 JOIN warc w ON r.warc_id = w.id WHERE r.id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(RecordLocation {
                        path: row.get(0)?,
                        position: row.get::<_, i64>(1)? as u64,
                        length: row.get::<_, i64>(2)? as u64,
                        record_type: record_type_column(row, 3)?,
                    })
                },
            )
            .optional()?;
        Ok(location)
    }

    fn records_for_visit(
        &self,
        visit_id: Uuid,
        record_type: RecordType,
    ) -> StorageResult<Vec<RecordEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, visit_id, type, warc_id, position, length, payload_digest FROM record \
             WHERE visit_id = ?1 AND type = ?2 ORDER BY position ASC",
        )?;
        let records = stmt
            .query_map(params![visit_id.to_string(), record_type.as_str()], |row| {
                Ok(RecordEntry {
                    id: uuid_column(row, 0)?,
                    visit_id: optional_uuid_column(row, 1)?,
                    record_type: record_type_column(row, 2)?,
                    warc_id: uuid_column(row, 3)?,
                    position: row.get::<_, i64>(4)? as u64,
                    length: row.get::<_, i64>(5)? as u64,
                    payload_digest: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn find_response_by_payload_digest(
        &self,
        location_id: i64,
        digest: &str,
    ) -> StorageResult<Option<(Uuid, DateTime<Utc>)>> {
        let found = self
            .conn
            .query_row(
                "SELECT r.id, v.date FROM record r JOIN visit v ON r.visit_id = v.id \
                 WHERE v.location_id = ?1 AND r.type = 'response' AND r.payload_digest = ?2 \
                 ORDER BY v.date DESC LIMIT 1",
                params![location_id, digest],
                |row| Ok((uuid_column(row, 0)?, from_millis(row.get(1)?))),
            )
            .optional()?;
        Ok(found)
    }

    fn last_response_id(
        &self,
        method: &str,
        location_id: i64,
        as_of: DateTime<Utc>,
    ) -> StorageResult<Option<Uuid>> {
        let found = self
            .conn
            .query_row(
                "SELECT r.id FROM record r JOIN visit v ON r.visit_id = v.id \
                 WHERE v.location_id = ?1 AND v.method = ?2 AND r.type IN ('response', 'revisit') \
                 ORDER BY ABS(v.date - ?3) LIMIT 1",
                params![location_id, method, as_of.timestamp_millis()],
                |row| uuid_column(row, 0),
            )
            .optional()?;
        Ok(found)
    }

    // ===== Statistics =====

    fn statistics(&self) -> StorageResult<Statistics> {
        let count = |table: &str| -> StorageResult<u64> {
            let sql = format!("SELECT COUNT(*) FROM {}", table);
            let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(count as u64)
        };

        let mut stats = Statistics {
            origins: count("origin")?,
            locations: count("location")?,
            visits: count("visit")?,
            records: count("record")?,
            warc_files: count("warc")?,
            links: count("link")?,
            ..Default::default()
        };

        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM visit GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i32>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, count) = row?;
            stats.visits_by_status.insert(status, count as u64);
        }

        Ok(stats)
    }
}
