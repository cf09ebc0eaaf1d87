//! Database schema definitions
//!
//! Timestamps are stored as epoch milliseconds, record and visit ids as UUID text.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Network origins (scheme, host, port) and their politeness clock
CREATE TABLE IF NOT EXISTS origin (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    discovered INTEGER NOT NULL,
    last_visit INTEGER,
    next_visit INTEGER,
    robots_crawl_delay INTEGER,
    robots_txt BLOB,
    crawl_policy TEXT
);

CREATE INDEX IF NOT EXISTS idx_origin_next_visit ON origin(next_visit);

-- Every URL the crawler knows about
CREATE TABLE IF NOT EXISTS location (
    id INTEGER PRIMARY KEY,
    origin_id INTEGER NOT NULL REFERENCES origin(id),
    url TEXT NOT NULL,
    type TEXT NOT NULL,
    depth INTEGER NOT NULL,
    via INTEGER,
    discovered INTEGER NOT NULL,
    last_visit INTEGER,
    next_visit INTEGER,
    priority INTEGER NOT NULL,
    etag TEXT,
    last_modified TEXT,
    etag_response_id TEXT,
    etag_date INTEGER,
    sitemap_changefreq TEXT,
    sitemap_priority REAL,
    sitemap_lastmod TEXT,
    title TEXT
);

CREATE INDEX IF NOT EXISTS idx_location_schedule
    ON location(origin_id, next_visit, priority);

-- Completed fetch attempts
CREATE TABLE IF NOT EXISTS visit (
    id TEXT PRIMARY KEY,
    method TEXT NOT NULL,
    location_id INTEGER NOT NULL REFERENCES location(id),
    date INTEGER NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    content_length INTEGER
);

CREATE INDEX IF NOT EXISTS idx_visit_location ON visit(location_id, method, date);

-- Archive files
CREATE TABLE IF NOT EXISTS warc (
    id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    created INTEGER NOT NULL
);

-- Record index; rows are written before the visit they belong to
CREATE TABLE IF NOT EXISTS record (
    id TEXT PRIMARY KEY,
    visit_id TEXT,
    type TEXT NOT NULL,
    warc_id TEXT NOT NULL REFERENCES warc(id),
    position INTEGER NOT NULL,
    length INTEGER NOT NULL,
    payload_digest TEXT
);

CREATE INDEX IF NOT EXISTS idx_record_visit ON record(visit_id);
CREATE INDEX IF NOT EXISTS idx_record_digest ON record(payload_digest);

-- Link provenance
CREATE TABLE IF NOT EXISTS link (
    src INTEGER NOT NULL REFERENCES location(id),
    dst INTEGER NOT NULL REFERENCES location(id),
    PRIMARY KEY (src, dst)
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
