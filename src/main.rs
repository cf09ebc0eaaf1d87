//! Tidemark main entry point
//!
//! This is the command-line interface for the Tidemark archiving crawler.

use clap::Parser;
use std::path::{Path, PathBuf};
use tidemark::config::{load_config_with_hash, Config};
use tidemark::storage::{SqliteStorage, Storage};
use tidemark::Coordinator;
use tracing_subscriber::EnvFilter;

/// Tidemark: a polite, resumable archiving crawler
///
/// Tidemark crawls websites while respecting robots.txt and per-host delays,
/// records every exchange into WARC files with deduplication, and renders
/// script-driven pages in a headless browser to capture their subresources.
#[derive(Parser, Debug)]
#[command(name = "tidemark")]
#[command(version)]
#[command(about = "A polite, resumable archiving crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Additional seed URL (may be repeated)
    #[arg(long = "seed", value_name = "URL")]
    seeds: Vec<String>,

    /// Stop after this many scheduler steps
    #[arg(long, value_name = "N")]
    max_steps: Option<u64>,

    /// Never start the headless browser
    #[arg(long)]
    no_browser: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let mut config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    if cli.no_browser {
        config.browser.enabled = false;
    }

    let mut seeds = config.crawler.seeds.clone();
    for seed in &cli.seeds {
        tidemark::CrawlUrl::parse(seed).map_err(|e| format!("Invalid seed URL '{}': {}", seed, e))?;
        seeds.push(seed.clone());
    }

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config, &seeds);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(config, &seeds, cli.max_steps).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("tidemark=info,warn"),
            1 => EnvFilter::new("tidemark=debug,info"),
            2 => EnvFilter::new("tidemark=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config, seeds: &[String]) {
    println!("=== Tidemark Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  User agent: {}", config.crawler.user_agent);
    println!("  Ignore robots.txt: {}", config.crawler.ignore_robots);
    println!(
        "  Delay: {}ms default, {}ms max",
        config.crawler.default_delay_millis, config.crawler.max_delay_millis
    );
    println!("  Max depth: {}", config.crawler.max_depth);
    println!(
        "  Revisit interval: {}h",
        config.crawler.revisit_interval_hours
    );
    println!(
        "  Dedupe: server={}, digest={} (min {} bytes)",
        config.crawler.dedupe_server, config.crawler.dedupe_digest, config.crawler.dedupe_min_length
    );

    println!("\nArchive:");
    println!("  Files: {}", config.archive.warc_filename);
    println!("  Max length: {} bytes", config.archive.warc_max_length_bytes);
    println!("  Digest: {:?}", config.archive.warc_digest_algorithm);

    println!("\nBrowser:");
    println!("  Enabled: {}", config.browser.enabled);
    if let Some(executable) = &config.browser.executable {
        println!("  Executable: {}", executable);
    }
    println!("  Record mode: {}", config.browser.record_mode);
    println!("  Script determinism: {}", config.browser.script_determinism);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\nSeeds ({}):", seeds.len());
    for seed in seeds {
        println!("  - {}", seed);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Database: {}\n", config.output.database_path);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
    let stats = storage.statistics()?;

    println!("Origins:    {}", stats.origins);
    println!("Locations:  {}", stats.locations);
    println!("Visits:     {}", stats.visits);
    println!("Records:    {}", stats.records);
    println!("WARC files: {}", stats.warc_files);
    println!("Links:      {}", stats.links);

    if !stats.visits_by_status.is_empty() {
        println!("\nVisits by status:");
        for (status, count) in &stats.visits_by_status {
            println!("  {:>6}  {}", status, count);
        }
    }

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(
    config: Config,
    seeds: &[String],
    max_steps: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = Coordinator::open(config)?;
    for seed in seeds {
        coordinator.add_seed(seed)?;
    }
    tracing::info!("Starting crawl with {} seed URLs", seeds.len());

    let result = tokio::select! {
        result = coordinator.run(max_steps) => result.map(Some),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            Ok(None)
        }
    };

    let closed = coordinator.close().await;
    match result {
        Ok(visits) => {
            if let Some(visits) = visits {
                tracing::info!("Crawl finished after {} visits", visits);
            }
            closed?;
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
