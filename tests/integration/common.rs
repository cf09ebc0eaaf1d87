use std::sync::Arc;
use tempfile::TempDir;
use tidemark::config::Config;
use tidemark::storage::{open_storage, LocationRecord, Storage, VisitRecord};
use tidemark::{Coordinator, CrawlUrl};

/// A coordinator over a scratch database and archive directory
pub struct Harness {
    pub dir: TempDir,
    pub coordinator: Arc<Coordinator>,
}

/// Creates a test configuration without delays or browser
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.crawler.user_agent = "tidemark-test/1.0".to_string();
    config.crawler.max_delay_millis = 0;
    config.crawler.default_delay_millis = 0;
    config.browser.enabled = false;
    config.archive.warc_filename = dir
        .path()
        .join("warcs/test-{TIMESTAMP}-{SEQNO}.warc")
        .to_string_lossy()
        .into_owned();
    config.output.database_path = dir.path().join("test.db").to_string_lossy().into_owned();
    config
}

pub fn harness() -> Harness {
    harness_with(|_| {})
}

/// Builds a harness after letting the caller adjust the configuration
pub fn harness_with(adjust: impl FnOnce(&mut Config)) -> Harness {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = test_config(&dir);
    adjust(&mut config);
    let storage = open_storage(&dir.path().join("test.db")).expect("Failed to open storage");
    let coordinator = Coordinator::new(config, storage).expect("Failed to create coordinator");
    Harness { dir, coordinator }
}

pub fn location(coordinator: &Coordinator, url: &str) -> Option<LocationRecord> {
    let id = CrawlUrl::parse(url).expect("Invalid URL").id();
    coordinator
        .storage()
        .lock()
        .get_location(id)
        .expect("Failed to read location")
}

pub fn location_id(url: &str) -> i64 {
    CrawlUrl::parse(url).expect("Invalid URL").id()
}

pub fn visits(coordinator: &Coordinator, url: &str) -> Vec<VisitRecord> {
    coordinator
        .storage()
        .lock()
        .visits_for_location(location_id(url))
        .expect("Failed to read visits")
}
