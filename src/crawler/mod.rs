//! Crawler module: scheduling, the per-visit exchange pipeline and page processing
//!
//! This module contains the core crawling logic, including:
//! - The coordinator that seeds, enqueues and steps through origins politely
//! - The exchange engine that fetches, deduplicates, archives and dispatches a visit
//! - Robots, sitemap and HTML processing of successful responses
//! - The browser pass that captures script-driven subresources on demand

mod coordinator;
mod exchange;
mod extractor;
mod fetcher;
mod render;
mod scheduler;
mod sitemap;

pub use coordinator::{Coordinator, StepOutcome, VisitOutcome};
pub use exchange::Exchange;
pub use extractor::{parse_page, ParsedPage, Resource, ResourceType};
pub use fetcher::build_http_client;
pub use render::RecordingInterceptor;
pub use scheduler::{politeness_delay, priority_for};
pub use sitemap::{parse_sitemap, ChangeFrequency, SitemapEntry, SitemapError};

/// Status stored for a location whose host could not be reached or read
pub const CONNECT_FAILED: i32 = -2;

/// Status stored when processing a successful response failed
pub const PROCESSING_FAILED: i32 = -5;

/// Status stored when the response could not be archived
pub const STORAGE_FAILED: i32 = -6;

/// Status stored when the origin's crawl policy forbids fetching
pub const POLICY_FORBIDDEN: i32 = -5000;

/// Status stored when robots.txt disallows the URL
pub const ROBOTS_DISALLOWED: i32 = -9998;

/// Status of a conditional request the server answered as unchanged
pub const NOT_MODIFIED: i32 = 304;

/// Whether a visit status is an HTTP success
pub fn is_success(status: i32) -> bool {
    (200..=299).contains(&status)
}
