//! Scheduling rules for the crawl frontier
//!
//! Locations are ordered by priority (lower is sooner) within an origin, and each
//! origin is spaced out by a politeness delay after every visit.

use crate::config::CrawlerConfig;
use crate::crawler::{POLICY_FORBIDDEN, ROBOTS_DISALLOWED};
use crate::storage::{LocationType, OriginRecord};
use chrono::{DateTime, Duration, Utc};

pub(crate) const ROBOTS_PRIORITY: i32 = 1;
pub(crate) const SITEMAP_PRIORITY: i32 = 2;
pub(crate) const NESTED_SITEMAP_PRIORITY: i32 = 3;
pub(crate) const PAGE_PRIORITY: i32 = 10;
pub(crate) const TRANSCLUSION_PRIORITY: i32 = 40;

/// Priority of a newly discovered location
///
/// # Arguments
///
/// * `location_type` - Type of the discovered location
/// * `found_in` - Type of the location it was found in, if any
///
/// # Returns
///
/// The priority value; sitemaps listed by a sitemap index rank just behind those
/// listed in robots.txt.
pub fn priority_for(location_type: LocationType, found_in: Option<LocationType>) -> i32 {
    match location_type {
        LocationType::Robots => ROBOTS_PRIORITY,
        LocationType::Sitemap if found_in == Some(LocationType::Sitemap) => NESTED_SITEMAP_PRIORITY,
        LocationType::Sitemap => SITEMAP_PRIORITY,
        LocationType::Page => PAGE_PRIORITY,
        LocationType::Transclusion => TRANSCLUSION_PRIORITY,
    }
}

/// Delay before the next visit to an origin
///
/// Denied visits never touched the host, so they cost nothing. Otherwise the
/// robots.txt crawl-delay applies when present and the configured default when
/// not, both capped at `max-delay-millis`.
pub fn politeness_delay(config: &CrawlerConfig, origin: &OriginRecord, status: i32) -> Duration {
    if status == ROBOTS_DISALLOWED || status == POLICY_FORBIDDEN {
        return Duration::zero();
    }
    let millis = origin
        .robots_crawl_delay
        .map(|seconds| u64::from(seconds) * 1000)
        .unwrap_or(config.default_delay_millis)
        .min(config.max_delay_millis);
    Duration::milliseconds(i64::try_from(millis).unwrap_or(i64::MAX))
}

/// When a location is due again after a visit at `date`
pub(crate) fn next_location_visit(config: &CrawlerConfig, date: DateTime<Utc>) -> DateTime<Utc> {
    date + Duration::hours(i64::from(config.revisit_interval_hours))
}

/// How long to sleep before an origin's next visit, if it lies in the future
pub(crate) fn time_until(next_visit: DateTime<Utc>, now: DateTime<Utc>) -> Option<std::time::Duration> {
    (next_visit - now).to_std().ok().filter(|wait| !wait.is_zero())
}
