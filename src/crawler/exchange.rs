//! The per-visit pipeline
//!
//! An exchange checks policy and robots.txt, fetches the location, archives the
//! response, records the visit with its scheduling updates and finally processes the
//! body according to the location type.

use crate::archive::http::RequestHead;
use crate::archive::{ArchiveError, Capture};
use crate::crawler::coordinator::{Coordinator, VisitOutcome};
use crate::crawler::extractor::parse_page;
use crate::crawler::fetcher::{fetch, is_forwardable};
use crate::crawler::render::render_page;
use crate::crawler::scheduler::{next_location_visit, politeness_delay};
use crate::crawler::sitemap::parse_sitemap;
use crate::crawler::{
    is_success, CONNECT_FAILED, POLICY_FORBIDDEN, PROCESSING_FAILED, ROBOTS_DISALLOWED,
    STORAGE_FAILED,
};
use crate::robots::{self, product_token};
use crate::storage::{
    CrawlPolicy, LocationRecord, LocationType, OriginRecord, Storage, Validators,
    VisitBookkeeping, VisitRecord,
};
use crate::url::{resolve_reference, CrawlUrl};
use crate::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One visit to one location
pub struct Exchange {
    coordinator: Arc<Coordinator>,
    origin: OriginRecord,
    location: LocationRecord,
    url: CrawlUrl,
    method: String,
    date: DateTime<Utc>,
    extra_headers: Vec<(String, String)>,
    nested: bool,
}

impl Exchange {
    /// Prepares a visit dated now
    ///
    /// # Errors
    ///
    /// Fails when the stored location URL no longer parses.
    pub fn new(
        coordinator: Arc<Coordinator>,
        origin: OriginRecord,
        location: LocationRecord,
        method: &str,
    ) -> Result<Self> {
        let url = CrawlUrl::parse(&location.url)?;
        Ok(Self {
            coordinator,
            origin,
            location,
            url,
            method: method.to_string(),
            date: Utc::now(),
            extra_headers: Vec::new(),
            nested: false,
        })
    }

    /// Marks this visit as triggered from inside a page render
    ///
    /// Headers the browser would have sent are forwarded, minus the ones the crawler
    /// controls itself. Nested visits never render.
    pub fn nested(mut self, headers: Vec<(String, String)>) -> Self {
        self.extra_headers = headers
            .into_iter()
            .filter(|(name, _)| is_forwardable(name))
            .collect();
        self.nested = true;
        self
    }

    /// Runs the whole pipeline
    ///
    /// Refusals and transport failures are ordinary outcomes with a negative status.
    /// Storage and archive failures are returned as errors, after the visit has been
    /// recorded as `STORAGE_FAILED` so both clocks still move on.
    pub async fn run(self) -> Result<VisitOutcome> {
        let via = match self.location.via {
            Some(via) => self.coordinator.storage().lock().get_location(via)?,
            None => None,
        };

        let mut capture = Capture::new(self.location.id, self.url.clone(), &self.method, self.date)?;
        let fetched = match self.refusal() {
            Some(status) => Ok(status),
            None => self.fetch(&mut capture, via.as_ref()).await,
        };
        let status = fetched.as_ref().map_or(STORAGE_FAILED, |status| *status);

        self.finish(&capture, status)?;
        self.log_visit(&capture, status, via.as_ref());
        let mut status = fetched?;

        if let Some(response_id) = capture.response_id {
            if capture.revisit_of.is_none() {
                if let Err(e) = self.process(response_id, status, capture.visit_id).await {
                    warn!("Processing {} failed: {}", self.url, e);
                    self.coordinator
                        .storage()
                        .lock()
                        .update_visit_status(capture.visit_id, PROCESSING_FAILED)?;
                    status = PROCESSING_FAILED;
                }
            }
        }

        Ok(VisitOutcome {
            visit_id: capture.visit_id,
            location_id: self.location.id,
            url: self.url,
            status,
            response_id: capture.response_id,
            revisit_of: capture.revisit_of.map(|(id, _)| id),
        })
    }

    /// Status of a visit that must not touch the host, if any
    fn refusal(&self) -> Option<i32> {
        if self.origin.crawl_policy == Some(CrawlPolicy::Forbidden) {
            return Some(POLICY_FORBIDDEN);
        }
        let config = &self.coordinator.config().crawler;
        if config.ignore_robots || self.location.location_type == LocationType::Robots {
            return None;
        }
        if robots::is_allowed(
            self.origin.robots_txt.as_deref(),
            self.url.as_str(),
            &config.user_agent,
        ) {
            None
        } else {
            Some(ROBOTS_DISALLOWED)
        }
    }

    /// Fetches and archives the location, returning the visit status
    async fn fetch(&self, capture: &mut Capture, via: Option<&LocationRecord>) -> Result<i32> {
        let config = &self.coordinator.config().crawler;
        let mut head = RequestHead::new(&self.method, &self.url.target())
            .header("Host", self.url.host_info())
            .header("User-Agent", config.user_agent.as_str())
            .header("Connection", "close");

        if config.dedupe_server {
            if let Some(record_id) = self.location.etag_response_id {
                if let Some(etag) = &self.location.etag {
                    head = head.header("If-None-Match", etag.as_str());
                }
                if let Some(last_modified) = &self.location.last_modified {
                    head = head.header("If-Modified-Since", last_modified.as_str());
                }
                if self.location.etag.is_some() || self.location.last_modified.is_some() {
                    capture.validator_record =
                        Some((record_id, self.location.etag_date.unwrap_or(self.date)));
                }
            }
        }
        if let Some(via) = via {
            head = head.header("Referer", via.url.as_str());
        }
        for (name, value) in &self.extra_headers {
            head = head.header(name, value.as_str());
        }

        if let Err(e) = fetch(self.coordinator.client(), &head, capture).await {
            debug!("Fetching {} failed: {}", self.url, e);
            return Ok(CONNECT_FAILED);
        }

        let algorithm = self.coordinator.config().archive.warc_digest_algorithm;
        let stored = match capture.compute_digest(algorithm) {
            Ok(()) => self.coordinator.store().save(capture),
            Err(e) => Err(ArchiveError::from(e)),
        };
        if let Err(e) = stored {
            warn!("Archiving {} failed: {}", self.url, e);
            return Err(e.into());
        }
        Ok(capture.status().map_or(CONNECT_FAILED, i32::from))
    }

    /// Appends the visit and moves both scheduling clocks
    fn finish(&self, capture: &Capture, status: i32) -> Result<()> {
        let config = &self.coordinator.config().crawler;
        let response = capture.response.as_ref();

        // Validators point at the record holding the payload
        let validators = match (response, capture.response_id) {
            (Some(head), Some(response_id)) if is_success(status) => {
                let (record_id, date) = capture.revisit_of.unwrap_or((response_id, self.date));
                Some(Validators {
                    etag: head.header("etag").map(str::to_string),
                    last_modified: head.header("last-modified").map(str::to_string),
                    response_id: record_id,
                    date,
                })
            }
            _ => None,
        };

        let visit = VisitRecord {
            id: capture.visit_id,
            method: self.method.clone(),
            location_id: self.location.id,
            date: self.date,
            status,
            content_type: response
                .and_then(|head| head.header("content-type"))
                .map(str::to_string),
            content_length: response.map(|_| capture.payload_length as i64),
        };
        let bookkeeping = VisitBookkeeping {
            origin_id: self.origin.id,
            origin_next_visit: Utc::now() + politeness_delay(config, &self.origin, status),
            location_next_visit: next_location_visit(config, self.date),
            validators,
        };
        self.coordinator
            .storage()
            .lock()
            .finish_visit(&visit, &bookkeeping)?;
        Ok(())
    }

    fn log_visit(&self, capture: &Capture, status: i32, via: Option<&LocationRecord>) {
        let response = capture.response.as_ref();
        info!(
            "{} {} {} {} {} {} {}",
            self.date.to_rfc3339_opts(SecondsFormat::Millis, true),
            status,
            response.map_or_else(|| "-".to_string(), |_| capture.payload_length.to_string()),
            self.url,
            self.location.location_type.to_db_string(),
            via.map_or("-", |via| via.url.as_str()),
            response
                .and_then(|head| head.header("content-type"))
                .unwrap_or("-"),
        );
    }

    /// Type-specific processing of a freshly archived response
    async fn process(&self, response_id: Uuid, status: i32, visit_id: Uuid) -> Result<()> {
        if (300..=399).contains(&status) {
            return self.follow_redirect(response_id);
        }
        if !is_success(status) {
            return Ok(());
        }

        let response = self.coordinator.store().read_response(response_id)?;
        match self.location.location_type {
            LocationType::Robots => self.process_robots(&response.payload),
            LocationType::Sitemap => self.process_sitemap(&response.payload),
            LocationType::Page => {
                let is_html = response
                    .header("content-type")
                    .map_or(true, |content_type| content_type.to_ascii_lowercase().contains("html"));
                if is_html {
                    self.process_page(&response.payload, visit_id).await
                } else {
                    Ok(())
                }
            }
            LocationType::Transclusion => Ok(()),
        }
    }

    fn follow_redirect(&self, response_id: Uuid) -> Result<()> {
        if self.location.location_type == LocationType::Robots {
            return Ok(());
        }
        let response = self.coordinator.store().read_response(response_id)?;
        if let Some(target) = response
            .header("location")
            .and_then(|location| resolve_reference(&self.url, location))
        {
            debug!("{} redirects to {}", self.url, target);
            self.coordinator
                .enqueue(&self.location, &target, self.location.location_type, self.date)?;
        }
        Ok(())
    }

    fn process_robots(&self, body: &[u8]) -> Result<()> {
        let config = &self.coordinator.config().crawler;
        let parsed = robots::parse_bounded(body, config.max_robots_bytes);
        let body = &body[..body.len().min(config.max_robots_bytes)];

        let crawl_delay = parsed
            .crawl_delay(product_token(&config.user_agent))
            .map(|seconds| seconds.ceil().min(f64::from(u32::MAX)) as u32);
        self.coordinator
            .storage()
            .lock()
            .update_origin_robots(self.origin.id, crawl_delay, body)?;

        for sitemap in parsed.sitemaps() {
            match self.url.resolve(sitemap) {
                Ok(target) => {
                    self.coordinator
                        .enqueue(&self.location, &target, LocationType::Sitemap, self.date)?;
                }
                Err(e) => debug!("Skipping sitemap {:?} in {}: {}", sitemap, self.url, e),
            }
        }
        Ok(())
    }

    fn process_sitemap(&self, body: &[u8]) -> Result<()> {
        let entries = parse_sitemap(body)?;
        debug!("Sitemap {} lists {} entries", self.url, entries.len());

        for entry in entries {
            let target = match self.url.resolve(&entry.loc) {
                Ok(target) => target,
                Err(e) => {
                    debug!("Skipping sitemap entry {:?}: {}", entry.loc, e);
                    continue;
                }
            };
            let added = self
                .coordinator
                .enqueue(&self.location, &target, entry.location_type, self.date)?;
            if let Some(location_id) = added {
                self.coordinator.storage().lock().update_sitemap_data(
                    location_id,
                    entry.changefreq.map(|changefreq| changefreq.as_str()),
                    entry.priority,
                    entry.lastmod.as_deref(),
                )?;
            }
        }
        Ok(())
    }

    async fn process_page(&self, body: &[u8], visit_id: Uuid) -> Result<()> {
        let html = String::from_utf8_lossy(body);
        let page = parse_page(&html, &self.url);

        for resource in &page.resources {
            self.coordinator.enqueue(
                &self.location,
                &resource.url,
                LocationType::Transclusion,
                self.date,
            )?;
        }
        for link in &page.links {
            self.coordinator
                .enqueue(&self.location, link, LocationType::Page, self.date)?;
        }
        debug!(
            "{}: {} resources, {} links",
            self.url,
            page.resources.len(),
            page.links.len()
        );

        if page.has_script && !self.nested {
            if let Err(e) = render_page(
                &self.coordinator,
                &self.location,
                &self.url,
                self.date,
                visit_id,
            )
            .await
            {
                warn!("Rendering {} failed: {}", self.url, e);
            }
        }
        Ok(())
    }
}
