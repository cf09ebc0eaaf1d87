//! Browser pass over pages that run script
//!
//! Every subresource the rendered page asks for is answered from the archive. In
//! record mode, anything not archived yet is fetched first by a nested exchange.

use crate::browser::{Browser, PausedRequest, RequestInterceptor, Resolution, Tab};
use crate::crawler::coordinator::Coordinator;
use crate::crawler::exchange::Exchange;
use crate::crawler::extractor::ResourceType;
use crate::crawler::{POLICY_FORBIDDEN, ROBOTS_DISALLOWED};
use crate::storage::{CrawlPolicy, LocationRecord, LocationType, Storage};
use crate::url::CrawlUrl;
use crate::{Result, TidemarkError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Answers a page's subresource requests from the archive
pub struct RecordingInterceptor {
    coordinator: Arc<Coordinator>,
    page: LocationRecord,
    date: DateTime<Utc>,
    record_mode: bool,
}

impl RecordingInterceptor {
    /// Interceptor for `page` as visited at `date`
    pub fn new(coordinator: Arc<Coordinator>, page: LocationRecord, date: DateTime<Utc>) -> Self {
        let record_mode = coordinator.config().browser.record_mode;
        Self {
            coordinator,
            page,
            date,
            record_mode,
        }
    }

    /// Fetches a subresource that is not archived yet
    ///
    /// Returns the record to answer with, or the reason the request fails.
    async fn capture(
        &self,
        request: &PausedRequest,
        url: &CrawlUrl,
    ) -> Result<std::result::Result<Uuid, &'static str>> {
        let resource_type = ResourceType::from_browser(request.resource_type().unwrap_or_default());
        debug!("Capturing {} {}", resource_type.as_str(), url);
        self.coordinator
            .enqueue(&self.page, url, LocationType::Transclusion, self.date)?;

        let (origin, location) = {
            let storage = self.coordinator.storage().lock();
            let origin = storage
                .get_origin(url.origin_id())?
                .ok_or(TidemarkError::UnknownOrigin(url.origin_id()))?;
            let location = storage
                .get_location(url.id())?
                .ok_or(TidemarkError::UnknownLocation(url.id()))?;
            (origin, location)
        };
        if origin.crawl_policy == Some(CrawlPolicy::Forbidden) {
            return Ok(Err("AccessDenied"));
        }

        let outcome = Exchange::new(Arc::clone(&self.coordinator), origin, location, request.method())?
            .nested(request.headers().to_vec())
            .run()
            .await?;
        Ok(match (outcome.response_id, outcome.status) {
            (Some(record_id), _) => Ok(record_id),
            (None, POLICY_FORBIDDEN) => Err("AccessDenied"),
            (None, ROBOTS_DISALLOWED) => Err("BlockedByClient"),
            (None, _) => Err("Failed"),
        })
    }
}

#[async_trait]
impl RequestInterceptor for RecordingInterceptor {
    async fn intercept(&self, request: PausedRequest) -> anyhow::Result<Option<Resolution>> {
        let Ok(url) = CrawlUrl::parse(request.url()) else {
            // data:, blob: and the like never reach the network
            return Ok(Some(request.continue_normally()));
        };

        let archived = self
            .coordinator
            .storage()
            .lock()
            .last_response_id(request.method(), url.id(), self.date)?;
        let record_id = match archived {
            Some(record_id) => record_id,
            None if !self.record_mode => {
                trace!("{} is not archived", url);
                return Ok(Some(request.fail("InternetDisconnected")));
            }
            None => match self.capture(&request, &url).await? {
                Ok(record_id) => record_id,
                Err(reason) => {
                    debug!("Failing {}: {}", url, reason);
                    return Ok(Some(request.fail(reason)));
                }
            },
        };

        let response = self.coordinator.store().read_response(record_id)?;
        Ok(Some(request.fulfill(
            response.status,
            &response.reason,
            response.headers,
            response.payload,
        )))
    }
}

/// Renders `page` in a fresh tab
///
/// Stores a screenshot, enqueues the links present after scrolling and records the
/// document title. Does nothing when no browser is available.
pub(crate) async fn render_page(
    coordinator: &Arc<Coordinator>,
    page: &LocationRecord,
    url: &CrawlUrl,
    date: DateTime<Utc>,
    visit_id: Uuid,
) -> Result<()> {
    let Some(browser) = coordinator.browser().await else {
        return Ok(());
    };
    debug!("Rendering {}", url);
    let tab = browser.new_tab().await?;
    let result = render_in_tab(coordinator, browser, &tab, page, url, date, visit_id).await;
    if let Err(e) = tab.close().await {
        debug!("Closing tab for {}: {}", url, e);
    }
    result
}

async fn render_in_tab(
    coordinator: &Arc<Coordinator>,
    browser: &Browser,
    tab: &Tab,
    page: &LocationRecord,
    url: &CrawlUrl,
    date: DateTime<Utc>,
    visit_id: Uuid,
) -> Result<()> {
    if coordinator.config().browser.script_determinism {
        tab.override_date_and_random(date).await?;
    }
    let interceptor = RecordingInterceptor::new(Arc::clone(coordinator), page.clone(), date);
    tab.intercept_requests(Arc::new(interceptor)).await?;

    let navigation = tab.navigate(url.as_str()).await?;
    match tokio::time::timeout(browser.navigation_timeout(), navigation.wait()).await {
        Ok(loaded) => loaded?,
        Err(_) => warn!(
            "{} did not settle within {:?}, capturing it as is",
            url,
            browser.navigation_timeout()
        ),
    }

    let screenshot = tab.screenshot().await?;
    coordinator.store().write_resource(
        Some(visit_id),
        &format!("screenshot:{}", url),
        date,
        "image/jpeg",
        &screenshot,
    )?;

    tab.scroll_down().await?;
    for link in tab.extract_links().await? {
        match CrawlUrl::parse(&link) {
            Ok(target) => {
                coordinator.enqueue(page, &target, LocationType::Page, date)?;
            }
            Err(e) => trace!("Skipping rendered link {:?}: {}", link, e),
        }
    }

    let title = tab.title().await?;
    if !title.is_empty() {
        coordinator
            .storage()
            .lock()
            .update_location_title(page.id, &title)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::FakeRemote;
    use crate::config::Config;
    use crate::storage::{RecordType, SharedStorage, SqliteStorage};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use parking_lot::Mutex;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.browser.enabled = false;
        config.crawler.max_delay_millis = 0;
        config.archive.warc_filename = dir
            .path()
            .join("render-{SEQNO}.warc")
            .to_string_lossy()
            .into_owned();
        config
    }

    fn storage() -> SharedStorage {
        Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()))
    }

    fn seed_page(coordinator: &Coordinator, url: &str) -> LocationRecord {
        coordinator.add_seed(url).unwrap();
        let id = CrawlUrl::parse(url).unwrap().id();
        coordinator.storage().lock().get_location(id).unwrap().unwrap()
    }

    fn paused(url: &str) -> PausedRequest {
        PausedRequest::from_params(&json!({
            "requestId": "R1",
            "resourceType": "Image",
            "request": {
                "url": url,
                "method": "GET",
                "headers": { "Accept": "image/*", "User-Agent": "HeadlessChrome" }
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_subresource_is_captured_then_replayed() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.jpg"))
            .and(header("accept", "image/*"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/jpeg")
                    .set_body_bytes(b"fake jpeg".to_vec()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let coordinator = Coordinator::new(config(&dir), storage()).unwrap();
        let page = seed_page(&coordinator, &format!("{}/", server.uri()));
        let interceptor = RecordingInterceptor::new(Arc::clone(&coordinator), page, Utc::now());
        let image = format!("{}/a.jpg", server.uri());

        let resolution = interceptor.intercept(paused(&image)).await.unwrap().unwrap();
        assert_eq!(resolution.method(), "Fetch.fulfillRequest");
        let params = resolution.params();
        assert_eq!(params["responseCode"], 200);
        assert_eq!(params["body"], STANDARD.encode(b"fake jpeg"));

        let location = CrawlUrl::parse(&image).unwrap();
        let stored = coordinator
            .storage()
            .lock()
            .get_location(location.id())
            .unwrap()
            .unwrap();
        assert_eq!(stored.location_type, LocationType::Transclusion);

        // Served from the archive the second time
        let resolution = interceptor.intercept(paused(&image)).await.unwrap().unwrap();
        assert_eq!(resolution.params()["body"], STANDARD.encode(b"fake jpeg"));
        let visits = coordinator
            .storage()
            .lock()
            .visits_for_location(location.id())
            .unwrap();
        assert_eq!(visits.len(), 1);
    }

    #[tokio::test]
    async fn test_offline_mode_never_fetches() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = config(&dir);
        config.browser.record_mode = false;
        let coordinator = Coordinator::new(config, storage()).unwrap();
        let page = seed_page(&coordinator, &format!("{}/", server.uri()));
        let interceptor = RecordingInterceptor::new(Arc::clone(&coordinator), page, Utc::now());

        let resolution = interceptor
            .intercept(paused(&format!("{}/a.jpg", server.uri())))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolution.method(), "Fetch.failRequest");
        assert_eq!(resolution.params()["errorReason"], "InternetDisconnected");
    }

    #[tokio::test]
    async fn test_forbidden_origin_is_denied() {
        let dir = TempDir::new().unwrap();
        let coordinator = Coordinator::new(config(&dir), storage()).unwrap();
        let page = seed_page(&coordinator, "http://example.com/");

        let tracker = CrawlUrl::parse("http://tracker.example.net/pixel.gif").unwrap();
        coordinator
            .enqueue(&page, &tracker, LocationType::Transclusion, Utc::now())
            .unwrap();
        coordinator
            .set_crawl_policy(tracker.origin_id(), CrawlPolicy::Forbidden)
            .unwrap();

        let interceptor = RecordingInterceptor::new(Arc::clone(&coordinator), page, Utc::now());
        let resolution = interceptor
            .intercept(paused(tracker.as_str()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolution.params()["errorReason"], "AccessDenied");
    }

    #[tokio::test]
    async fn test_non_network_urls_continue() {
        let dir = TempDir::new().unwrap();
        let coordinator = Coordinator::new(config(&dir), storage()).unwrap();
        let page = seed_page(&coordinator, "http://example.com/");
        let interceptor = RecordingInterceptor::new(Arc::clone(&coordinator), page, Utc::now());

        let resolution = interceptor
            .intercept(paused("data:image/png;base64,AAAA"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolution.method(), "Fetch.continueRequest");
    }

    #[tokio::test]
    async fn test_render_page_records_screenshot_links_and_title() {
        let dir = TempDir::new().unwrap();
        let remote = FakeRemote::start();
        let mut config = config(&dir);
        config.browser.enabled = true;
        let coordinator = Coordinator::with_browser(config, storage(), remote.browser()).unwrap();

        let page = seed_page(&coordinator, "http://example.com/");
        let url = CrawlUrl::parse(&page.url).unwrap();
        let visit_id = Uuid::now_v7();
        render_page(&coordinator, &page, &url, Utc::now(), visit_id)
            .await
            .unwrap();

        let methods = remote.methods();
        for expected in [
            "Page.addScriptToEvaluateOnNewDocument",
            "Fetch.enable",
            "Page.navigate",
            "Page.captureScreenshot",
            "Target.closeTarget",
        ] {
            assert!(methods.iter().any(|m| m == expected), "{} not called", expected);
        }

        let storage = coordinator.storage().lock();
        let screenshots = storage.records_for_visit(visit_id, RecordType::Resource).unwrap();
        assert_eq!(screenshots.len(), 1);

        let next = CrawlUrl::parse("http://example.com/next").unwrap();
        let link = storage.get_location(next.id()).unwrap().unwrap();
        assert_eq!(link.location_type, LocationType::Page);
        assert_eq!(link.via, Some(page.id));

        let page = storage.get_location(page.id).unwrap().unwrap();
        assert_eq!(page.title.as_deref(), Some("Fake title"));
    }
}
