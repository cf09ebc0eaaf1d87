//! Robots.txt parser implementation
//!
//! Allow/disallow matching is delegated to the robotstxt crate. Crawl-delay and
//! sitemap directives, which that crate does not expose, are collected by a line scanner.

use robotstxt::DefaultMatcher;

/// Parsed robots.txt data
#[derive(Debug, Clone, Default)]
pub struct RobotsTxt {
    content: String,
    sitemaps: Vec<String>,
    groups: Vec<DelayGroup>,
}

/// Crawl-delay declared inside one user-agent group
#[derive(Debug, Clone)]
struct DelayGroup {
    agents: Vec<String>,
    delay: f64,
}

impl RobotsTxt {
    /// Parses raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        let mut sitemaps = Vec::new();
        let mut groups = Vec::new();
        let mut agents: Vec<String> = Vec::new();
        let mut in_rules = false;

        for line in content.lines() {
            let line = match line.find('#') {
                Some(start) => &line[..start],
                None => line,
            };
            let Some((key, value)) = line.trim().split_once(':') else {
                continue;
            };
            let value = value.trim();

            match key.trim().to_ascii_lowercase().as_str() {
                "user-agent" => {
                    // A user-agent line after rules starts a new group
                    if in_rules {
                        agents.clear();
                        in_rules = false;
                    }
                    agents.push(value.to_ascii_lowercase());
                }
                "crawl-delay" => {
                    in_rules = true;
                    match value.parse::<f64>() {
                        Ok(delay) if delay.is_finite() && delay >= 0.0 => groups.push(DelayGroup {
                            agents: agents.clone(),
                            delay,
                        }),
                        _ => tracing::debug!("Ignoring crawl-delay value {:?}", value),
                    }
                }
                // Sitemap lines are not bound to any group
                "sitemap" => {
                    if !value.is_empty() {
                        sitemaps.push(value.to_string());
                    }
                }
                _ => in_rules = true,
            }
        }

        Self {
            content: content.to_string(),
            sitemaps,
            groups,
        }
    }

    /// Parses robots.txt bytes, reading them as ISO-8859-1
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let content: String = bytes.iter().map(|&b| b as char).collect();
        Self::from_content(&content)
    }

    /// Checks if a URL is allowed for the given user agent
    ///
    /// # Arguments
    ///
    /// * `url` - The absolute URL to check
    /// * `user_agent` - The product token to match groups against
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.content.trim().is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }

    /// Gets the crawl delay in seconds for a user agent
    ///
    /// A group naming the agent wins over the `*` group.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        let agent = user_agent.to_ascii_lowercase();
        let specific = self.groups.iter().find(|group| {
            group
                .agents
                .iter()
                .any(|name| name != "*" && !name.is_empty() && agent.contains(name.as_str()))
        });
        let wildcard = || {
            self.groups
                .iter()
                .find(|group| group.agents.iter().any(|name| name == "*"))
        };
        specific.or_else(wildcard).map(|group| group.delay)
    }

    /// Sitemap URLs as written in the file (possibly relative)
    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}
