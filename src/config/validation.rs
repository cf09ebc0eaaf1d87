use crate::config::types::Config;
use crate::url::CrawlUrl;
use crate::ConfigError;

/// Validates a configuration after parsing
///
/// Checks that all required fields are present and values are within acceptable ranges.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler(config)?;
    validate_archive(config)?;
    validate_browser(config)?;

    if config.output.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_crawler(config: &Config) -> Result<(), ConfigError> {
    let crawler = &config.crawler;

    if crawler.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if crawler.default_delay_millis > crawler.max_delay_millis {
        return Err(ConfigError::Validation(format!(
            "default-delay-millis ({}) cannot exceed max-delay-millis ({})",
            crawler.default_delay_millis, crawler.max_delay_millis
        )));
    }

    if crawler.max_robots_bytes == 0 {
        return Err(ConfigError::Validation(
            "max-robots-bytes must be greater than 0".to_string(),
        ));
    }

    if crawler.revisit_interval_hours == 0 {
        return Err(ConfigError::Validation(
            "revisit-interval-hours must be greater than 0".to_string(),
        ));
    }

    for seed in &crawler.seeds {
        CrawlUrl::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;
    }

    Ok(())
}

fn validate_archive(config: &Config) -> Result<(), ConfigError> {
    let template = &config.archive.warc_filename;

    if template.is_empty() {
        return Err(ConfigError::Validation(
            "warc-filename cannot be empty".to_string(),
        ));
    }

    // Rotation needs distinct names for each file
    if config.archive.warc_max_length_bytes > 0
        && !template.contains("{TIMESTAMP}")
        && !template.contains("{SEQNO}")
    {
        return Err(ConfigError::Validation(format!(
            "warc-filename '{}' must contain {{TIMESTAMP}} or {{SEQNO}} when rotation is enabled",
            template
        )));
    }

    Ok(())
}

fn validate_browser(config: &Config) -> Result<(), ConfigError> {
    let browser = &config.browser;

    if browser.call_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "call-timeout-secs must be greater than 0".to_string(),
        ));
    }

    if browser.navigation_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "navigation-timeout-secs must be greater than 0".to_string(),
        ));
    }

    if let Some(executable) = &browser.executable {
        if executable.trim().is_empty() {
            return Err(ConfigError::Validation(
                "executable cannot be empty when set".to_string(),
            ));
        }
    }

    Ok(())
}
