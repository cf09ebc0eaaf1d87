//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the crawl loop and everything it shares with the exchanges
//! it runs:
//! - Seeding origins and enqueueing discovered locations
//! - Picking the next due origin and location and enforcing politeness
//! - Owning the storage handle, the capture store, the HTTP client and the browser

use crate::archive::{CaptureStore, DedupeSettings};
use crate::browser::Browser;
use crate::config::Config;
use crate::crawler::exchange::Exchange;
use crate::crawler::fetcher::build_http_client;
use crate::crawler::scheduler::{priority_for, time_until};
use crate::storage::{
    open_storage, CrawlPolicy, LocationRecord, LocationType, NewLocation, SharedStorage, Storage,
};
use crate::url::CrawlUrl;
use crate::{Result, TidemarkError};
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long the loop waits before looking again when there is nothing to do
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// What a finished visit produced
#[derive(Debug, Clone)]
pub struct VisitOutcome {
    pub visit_id: Uuid,
    pub location_id: i64,
    pub url: CrawlUrl,
    /// HTTP status or one of the negative sentinels
    pub status: i32,
    /// Response or revisit record written for this visit
    pub response_id: Option<Uuid>,
    /// Record the response was found to duplicate
    pub revisit_of: Option<Uuid>,
}

/// Result of a single scheduler step
#[derive(Debug)]
pub enum StepOutcome {
    /// Stepping is suspended
    Paused,
    /// No origin is scheduled
    Idle,
    /// The chosen origin had no due location
    Exhausted { origin_id: i64 },
    Visited(VisitOutcome),
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Config,
    storage: SharedStorage,
    store: CaptureStore,
    client: Client,
    browser: OnceCell<Option<Browser>>,
    paused: AtomicBool,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `storage` - The database shared with the capture store
    ///
    /// # Returns
    ///
    /// * `Ok(Arc<Coordinator>)` - Successfully created coordinator
    /// * `Err(TidemarkError)` - Failed to build the HTTP client
    pub fn new(config: Config, storage: SharedStorage) -> Result<Arc<Self>> {
        Self::build(config, storage, OnceCell::new())
    }

    /// Opens the database named in the configuration and creates a coordinator on it
    pub fn open(config: Config) -> Result<Arc<Self>> {
        let storage = open_storage(Path::new(&config.output.database_path))?;
        Self::new(config, storage)
    }

    /// Creates a coordinator that renders with an already connected browser
    #[cfg(test)]
    pub(crate) fn with_browser(
        config: Config,
        storage: SharedStorage,
        browser: Browser,
    ) -> Result<Arc<Self>> {
        Self::build(config, storage, OnceCell::from(Some(browser)))
    }

    fn build(
        config: Config,
        storage: SharedStorage,
        browser: OnceCell<Option<Browser>>,
    ) -> Result<Arc<Self>> {
        let client = build_http_client(&config.crawler.user_agent)?;
        let store = CaptureStore::new(
            config.archive.clone(),
            DedupeSettings::from(&config.crawler),
            Arc::clone(&storage),
        );
        Ok(Arc::new(Self {
            config,
            storage,
            store,
            client,
            browser,
            paused: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub fn store(&self) -> &CaptureStore {
        &self.store
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// Suspends stepping until [`Coordinator::resume`] is called
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Adds a seed URL
    ///
    /// The seed's origin becomes continuously crawled, and its robots.txt and the
    /// seed page itself are both due immediately.
    pub fn add_seed(&self, url: &str) -> Result<()> {
        let url = CrawlUrl::parse(url)?;
        let robots = url.resolve("/robots.txt")?;
        let now = Utc::now();

        let mut storage = self.storage.lock();
        let origin_id = url.origin_id();
        if !storage.insert_origin(origin_id, &url.origin(), now, CrawlPolicy::Continuous)? {
            storage.set_crawl_policy(origin_id, CrawlPolicy::Continuous)?;
        }
        for (target, location_type) in [(&robots, LocationType::Robots), (&url, LocationType::Page)] {
            storage.insert_location(&NewLocation {
                id: target.id(),
                origin_id,
                url: target.to_string(),
                location_type,
                depth: 0,
                via: None,
                discovered: now,
                next_visit: now,
                priority: priority_for(location_type, None),
            })?;
        }
        storage.wake_origin(origin_id, now)?;
        info!("Added seed {}", url);
        Ok(())
    }

    /// Records a location discovered at `from`
    ///
    /// Origins seen for the first time are only crawled for transclusions. Page and
    /// sitemap targets beyond the maximum depth are dropped.
    ///
    /// # Returns
    ///
    /// The target's location id, or None when it was dropped
    pub fn enqueue(
        &self,
        from: &LocationRecord,
        target: &CrawlUrl,
        location_type: LocationType,
        date: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let depth = from.depth + 1;
        if depth > self.config.crawler.max_depth && location_type != LocationType::Transclusion {
            debug!("Not enqueueing {} at depth {}", target, depth);
            return Ok(None);
        }

        let origin_id = target.origin_id();
        let mut storage = self.storage.lock();
        storage.insert_origin(origin_id, &target.origin(), date, CrawlPolicy::Transclusions)?;
        let inserted = storage.insert_location(&NewLocation {
            id: target.id(),
            origin_id,
            url: target.to_string(),
            location_type,
            depth,
            via: Some(from.id),
            discovered: date,
            next_visit: date,
            priority: priority_for(location_type, Some(from.location_type)),
        })?;
        if inserted {
            storage.wake_origin(origin_id, date)?;
        }
        storage.insert_link(from.id, target.id())?;
        Ok(Some(target.id()))
    }

    pub fn set_crawl_policy(&self, origin_id: i64, policy: CrawlPolicy) -> Result<()> {
        self.storage.lock().set_crawl_policy(origin_id, policy)?;
        Ok(())
    }

    /// Performs one scheduler step
    ///
    /// Sleeps until the earliest scheduled origin is due, then visits its most urgent
    /// due location. Only one step runs at a time, which keeps the per-origin delay
    /// exact.
    pub async fn step(self: &Arc<Self>) -> Result<StepOutcome> {
        if self.is_paused() {
            return Ok(StepOutcome::Paused);
        }

        let origin = self.storage.lock().peek_origin()?;
        let Some(origin) = origin else {
            return Ok(StepOutcome::Idle);
        };
        if let Some(wait) = origin.next_visit.and_then(|next| time_until(next, Utc::now())) {
            debug!("Waiting {:?} for {}", wait, origin.name);
            tokio::time::sleep(wait).await;
        }

        let now = Utc::now();
        let location = self.storage.lock().peek_location(origin.id, now)?;
        let Some(location) = location else {
            debug!("No due locations at {}", origin.name);
            self.storage.lock().exhaust_origin(origin.id, now)?;
            return Ok(StepOutcome::Exhausted { origin_id: origin.id });
        };

        let outcome = Exchange::new(Arc::clone(self), origin, location, "GET")?
            .run()
            .await?;
        Ok(StepOutcome::Visited(outcome))
    }

    /// Visits one location right away, ignoring the schedule
    pub async fn visit_location(self: &Arc<Self>, location_id: i64) -> Result<VisitOutcome> {
        let (origin, location) = {
            let storage = self.storage.lock();
            let location = storage
                .get_location(location_id)?
                .ok_or(TidemarkError::UnknownLocation(location_id))?;
            let origin = storage
                .get_origin(location.origin_id)?
                .ok_or(TidemarkError::UnknownOrigin(location.origin_id))?;
            (origin, location)
        };
        Exchange::new(Arc::clone(self), origin, location, "GET")?
            .run()
            .await
    }

    /// Steps until `max_steps` steps were taken, or forever
    ///
    /// # Returns
    ///
    /// The number of visits performed. A failed step is logged and the loop goes on.
    pub async fn run(self: &Arc<Self>, max_steps: Option<u64>) -> Result<u64> {
        let mut steps = 0u64;
        let mut visits = 0u64;
        while max_steps.map_or(true, |max| steps < max) {
            match self.step().await {
                Ok(StepOutcome::Paused | StepOutcome::Idle) => tokio::time::sleep(IDLE_WAIT).await,
                Ok(StepOutcome::Exhausted { .. }) => {}
                Ok(StepOutcome::Visited(_)) => visits += 1,
                Err(e) => {
                    // The failed visit is already bookkept, so the next step moves on
                    error!("Crawl step failed: {}", e);
                    tokio::time::sleep(IDLE_WAIT).await;
                }
            }
            steps += 1;
        }
        Ok(visits)
    }

    /// The rendering browser, launched on first use
    ///
    /// Returns None when rendering is disabled or the browser could not be started.
    pub(crate) async fn browser(&self) -> Option<&Browser> {
        if !self.config.browser.enabled {
            return None;
        }
        self.browser
            .get_or_init(|| async {
                match Browser::launch(&self.config.browser).await {
                    Ok(browser) => Some(browser),
                    Err(e) => {
                        warn!("Pages will not be rendered, browser failed to start: {}", e);
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    /// Stops the browser and closes the current archive file
    pub async fn close(&self) -> Result<()> {
        if let Some(Some(browser)) = self.browser.get() {
            browser.close().await;
        }
        self.store.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    fn coordinator(dir: &TempDir) -> Arc<Coordinator> {
        let mut config = Config::default();
        config.browser.enabled = false;
        config.archive.warc_filename = dir
            .path()
            .join("test-{SEQNO}.warc")
            .to_string_lossy()
            .into_owned();
        let storage = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        Coordinator::new(config, storage).unwrap()
    }

    #[test]
    fn test_add_seed_creates_robots_and_page() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        coordinator.add_seed("http://example.com/start").unwrap();

        let url = CrawlUrl::parse("http://example.com/start").unwrap();
        let robots = CrawlUrl::parse("http://example.com/robots.txt").unwrap();
        let storage = coordinator.storage().lock();

        let origin = storage.get_origin(url.origin_id()).unwrap().unwrap();
        assert_eq!(origin.crawl_policy, Some(CrawlPolicy::Continuous));
        assert!(origin.next_visit.is_some());

        let robots = storage.get_location(robots.id()).unwrap().unwrap();
        assert_eq!(robots.location_type, LocationType::Robots);
        assert_eq!(robots.priority, 1);
        let page = storage.get_location(url.id()).unwrap().unwrap();
        assert_eq!(page.location_type, LocationType::Page);
        assert_eq!(page.priority, 10);
        assert_eq!(page.depth, 0);
    }

    #[test]
    fn test_seeding_upgrades_discovered_origin() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        coordinator.add_seed("http://example.com/").unwrap();

        let from = coordinator
            .storage()
            .lock()
            .get_location(CrawlUrl::parse("http://example.com/").unwrap().id())
            .unwrap()
            .unwrap();
        let cdn = CrawlUrl::parse("http://cdn.example.net/app.js").unwrap();
        coordinator
            .enqueue(&from, &cdn, LocationType::Transclusion, Utc::now())
            .unwrap();
        let policy = |coordinator: &Coordinator| {
            coordinator
                .storage()
                .lock()
                .get_origin(cdn.origin_id())
                .unwrap()
                .unwrap()
                .crawl_policy
        };
        assert_eq!(policy(&coordinator), Some(CrawlPolicy::Transclusions));

        coordinator.add_seed("http://cdn.example.net/").unwrap();
        assert_eq!(policy(&coordinator), Some(CrawlPolicy::Continuous));
    }

    #[test]
    fn test_enqueue_records_link_and_priority() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        coordinator.add_seed("http://example.com/").unwrap();
        let from = coordinator
            .storage()
            .lock()
            .get_location(CrawlUrl::parse("http://example.com/robots.txt").unwrap().id())
            .unwrap()
            .unwrap();

        let sitemap = CrawlUrl::parse("http://example.com/sitemap.xml").unwrap();
        let id = coordinator
            .enqueue(&from, &sitemap, LocationType::Sitemap, Utc::now())
            .unwrap();
        assert_eq!(id, Some(sitemap.id()));

        // Enqueueing twice is harmless
        coordinator
            .enqueue(&from, &sitemap, LocationType::Sitemap, Utc::now())
            .unwrap();

        let storage = coordinator.storage().lock();
        let location = storage.get_location(sitemap.id()).unwrap().unwrap();
        assert_eq!(location.priority, 2);
        assert_eq!(location.depth, 1);
        assert_eq!(location.via, Some(from.id));
        assert_eq!(storage.count_links_from(from.id).unwrap(), 1);
    }

    #[test]
    fn test_enqueue_respects_max_depth() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        coordinator.add_seed("http://example.com/").unwrap();
        let mut from = coordinator
            .storage()
            .lock()
            .get_location(CrawlUrl::parse("http://example.com/").unwrap().id())
            .unwrap()
            .unwrap();
        from.depth = coordinator.config().crawler.max_depth;

        let deep = CrawlUrl::parse("http://example.com/deep").unwrap();
        let image = CrawlUrl::parse("http://example.com/deep.png").unwrap();
        assert_eq!(
            coordinator
                .enqueue(&from, &deep, LocationType::Page, Utc::now())
                .unwrap(),
            None
        );
        assert_eq!(
            coordinator
                .enqueue(&from, &image, LocationType::Transclusion, Utc::now())
                .unwrap(),
            Some(image.id())
        );
        assert!(coordinator.storage().lock().get_location(deep.id()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_step_when_idle_or_paused() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        assert!(matches!(coordinator.step().await.unwrap(), StepOutcome::Idle));

        coordinator.add_seed("http://example.com/").unwrap();
        coordinator.pause();
        assert!(coordinator.is_paused());
        assert!(matches!(coordinator.step().await.unwrap(), StepOutcome::Paused));
        coordinator.resume();
        assert!(!coordinator.is_paused());
    }

    #[tokio::test]
    async fn test_exhausted_origin_is_parked() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        coordinator.add_seed("http://example.com/").unwrap();

        let url = CrawlUrl::parse("http://example.com/").unwrap();
        let later = Utc::now() + chrono::Duration::hours(1);
        {
            // Push both seed locations into the future
            let mut storage = coordinator.storage().lock();
            for id in [url.id(), url.resolve("/robots.txt").unwrap().id()] {
                let location = storage.get_location(id).unwrap().unwrap();
                storage
                    .finish_visit(
                        &crate::storage::VisitRecord {
                            id: Uuid::now_v7(),
                            method: "GET".to_string(),
                            location_id: location.id,
                            date: Utc::now(),
                            status: 200,
                            content_type: None,
                            content_length: None,
                        },
                        &crate::storage::VisitBookkeeping {
                            origin_id: url.origin_id(),
                            origin_next_visit: Utc::now(),
                            location_next_visit: later,
                            validators: None,
                        },
                    )
                    .unwrap();
            }
        }

        let outcome = coordinator.step().await.unwrap();
        assert!(matches!(outcome, StepOutcome::Exhausted { origin_id } if origin_id == url.origin_id()));
        let origin = coordinator
            .storage()
            .lock()
            .get_origin(url.origin_id())
            .unwrap()
            .unwrap();
        assert_eq!(
            origin.next_visit.map(|next| next.timestamp_millis()),
            Some(later.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn test_visit_unknown_location() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        let result = coordinator.visit_location(42).await;
        assert!(matches!(result, Err(TidemarkError::UnknownLocation(42))));
    }

    #[tokio::test]
    async fn test_browser_disabled() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        assert!(coordinator.browser().await.is_none());
        coordinator.close().await.unwrap();
    }
}
