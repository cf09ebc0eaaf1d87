use serde::Deserialize;

/// Main configuration structure for Tidemark
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// User-Agent header sent with every request
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Fetch everything regardless of robots.txt
    #[serde(rename = "ignore-robots")]
    pub ignore_robots: bool,

    /// Upper bound on the delay between two visits to one origin (milliseconds)
    #[serde(rename = "max-delay-millis")]
    pub max_delay_millis: u64,

    /// Delay between visits when robots.txt gives no crawl-delay (milliseconds)
    #[serde(rename = "default-delay-millis")]
    pub default_delay_millis: u64,

    /// Maximum link depth from a seed
    #[serde(rename = "max-depth")]
    pub max_depth: u32,

    /// Bytes of robots.txt that are parsed
    #[serde(rename = "max-robots-bytes")]
    pub max_robots_bytes: usize,

    /// Interval before a visited location is due again (hours)
    #[serde(rename = "revisit-interval-hours")]
    pub revisit_interval_hours: u32,

    /// Send conditional requests and record 304s as revisits
    #[serde(rename = "dedupe-server")]
    pub dedupe_server: bool,

    /// Record payloads identical to an earlier capture as revisits
    #[serde(rename = "dedupe-digest")]
    pub dedupe_digest: bool,

    /// Smallest payload considered for digest dedupe (bytes)
    #[serde(rename = "dedupe-min-length")]
    pub dedupe_min_length: u64,

    /// URLs added as seeds at startup
    pub seeds: Vec<String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("tidemark/{}", env!("CARGO_PKG_VERSION")),
            ignore_robots: false,
            max_delay_millis: 30_000,
            default_delay_millis: 5_000,
            max_depth: 10,
            max_robots_bytes: 512 * 1024,
            revisit_interval_hours: 24,
            dedupe_server: true,
            dedupe_digest: true,
            dedupe_min_length: 0,
            seeds: Vec::new(),
        }
    }
}

/// Payload digest algorithms supported in archive records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
}

/// Archive file configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// File name template; `{TIMESTAMP}` and `{SEQNO}` are substituted
    #[serde(rename = "warc-filename")]
    pub warc_filename: String,

    /// Size after which a new archive file is started (0 = never rotate)
    #[serde(rename = "warc-max-length-bytes")]
    pub warc_max_length_bytes: u64,

    /// Algorithm for `WARC-Payload-Digest`
    #[serde(rename = "warc-digest-algorithm")]
    pub warc_digest_algorithm: DigestAlgorithm,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            warc_filename: "data/tidemark-{TIMESTAMP}-{SEQNO}.warc".to_string(),
            warc_max_length_bytes: 1024 * 1024 * 1024,
            warc_digest_algorithm: DigestAlgorithm::Sha1,
        }
    }
}

/// Headless browser configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Render pages containing script in a headless browser
    pub enabled: bool,

    /// Browser executable; when unset, common Chromium names are tried
    pub executable: Option<String>,

    /// Additional command line arguments for the browser
    #[serde(rename = "extra-args")]
    pub extra_args: Vec<String>,

    /// Fetch subresources that are not yet archived while rendering
    #[serde(rename = "record-mode")]
    pub record_mode: bool,

    /// Pin script date and random sources to the visit date
    #[serde(rename = "script-determinism")]
    pub script_determinism: bool,

    /// Timeout for a single remote call (seconds)
    #[serde(rename = "call-timeout-secs")]
    pub call_timeout_secs: u64,

    /// Timeout for a navigation to settle (seconds)
    #[serde(rename = "navigation-timeout-secs")]
    pub navigation_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            executable: None,
            extra_args: Vec::new(),
            record_mode: true,
            script_determinism: true,
            call_timeout_secs: 10,
            navigation_timeout_secs: 60,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database_path: "data/tidemark.db".to_string(),
        }
    }
}
