use crate::url::key_for;
use crate::UrlError;
use std::fmt;
use url::Url;

/// A canonicalized crawl URL
///
/// Parsing applies WHATWG canonicalization (lowercased scheme and host, default port
/// removal, dot-segment removal, percent-encoding) and strips the fragment, so two
/// references that differ only in their fragment share one location key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CrawlUrl {
    url: Url,
}

impl CrawlUrl {
    /// Parses and canonicalizes an absolute http(s) URL
    ///
    /// # Examples
    ///
    /// ```
    /// use tidemark::url::CrawlUrl;
    ///
    /// let url = CrawlUrl::parse("HTTP://Example.COM:80/a/../b#top").unwrap();
    /// assert_eq!(url.as_str(), "http://example.com/b");
    /// assert_eq!(url.origin(), "http://example.com");
    /// ```
    pub fn parse(input: &str) -> Result<Self, UrlError> {
        Self::from_url(Url::parse(input.trim())?)
    }

    /// Wraps an already parsed URL, applying the same rules as [`CrawlUrl::parse`]
    pub fn from_url(mut url: Url) -> Result<Self, UrlError> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(UrlError::InvalidScheme(url.scheme().to_string()));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(UrlError::MissingHost(url.to_string()));
        }
        url.set_fragment(None);
        Ok(Self { url })
    }

    /// Resolves a reference against this URL
    pub fn resolve(&self, reference: &str) -> Result<Self, UrlError> {
        Self::from_url(self.url.join(reference.trim())?)
    }

    /// Stable 64-bit key of the full canonical URL
    pub fn id(&self) -> i64 {
        key_for(self.url.as_str())
    }

    /// Stable 64-bit key of the origin
    pub fn origin_id(&self) -> i64 {
        key_for(&self.origin())
    }

    /// The origin as `scheme://host[:port]`
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    /// The request target: path plus query
    pub fn target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }

    /// The `Host` header value: host plus explicit port
    pub fn host_info(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for CrawlUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Resolves an href found in a document, skipping references that can never be fetched
///
/// Returns None for empty or fragment-only hrefs, `javascript:`, `mailto:`, `tel:` and
/// `data:` references, and anything that does not resolve to an http(s) URL.
pub fn resolve_reference(base: &CrawlUrl, href: &str) -> Option<CrawlUrl> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }
    base.resolve(href).ok()
}
