//! HTML extractor for links, subresources and metadata
//!
//! This module handles parsing archived HTML to extract:
//! - Links to follow (from `<a>`, `<area>` and canonical links)
//! - Subresources the page embeds (images, scripts, stylesheets, media, frames)
//! - The page title and whether the page runs script

use crate::url::{resolve_reference, CrawlUrl};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;

/// Kind of subresource, named like the browser's resource types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    Other,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "Document",
            Self::Stylesheet => "Stylesheet",
            Self::Image => "Image",
            Self::Media => "Media",
            Self::Font => "Font",
            Self::Script => "Script",
            Self::Other => "Other",
        }
    }

    /// Maps a browser resource type name; unknown names become `Other`
    pub fn from_browser(name: &str) -> Self {
        match name {
            "Document" => Self::Document,
            "Stylesheet" => Self::Stylesheet,
            "Image" => Self::Image,
            "Media" => Self::Media,
            "Font" => Self::Font,
            "Script" => Self::Script,
            _ => Self::Other,
        }
    }
}

/// A subresource embedded by a page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    pub method: String,
    pub url: CrawlUrl,
    pub resource_type: ResourceType,
}

/// Extracted information from an HTML page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// The page title (from the first `<title>` tag)
    pub title: Option<String>,

    /// Whether the page contains any `<script>` element
    pub has_script: bool,

    /// Embedded subresources, in document order without duplicates
    pub resources: Vec<Resource>,

    /// Outbound links, in document order without duplicates
    pub links: Vec<CrawlUrl>,
}

impl ParsedPage {
    fn add_link(&mut self, seen: &mut HashSet<CrawlUrl>, base: &CrawlUrl, href: &str) {
        if let Some(url) = resolve_reference(base, href) {
            if seen.insert(url.clone()) {
                self.links.push(url);
            }
        }
    }

    fn add_resource(
        &mut self,
        seen: &mut HashSet<CrawlUrl>,
        base: &CrawlUrl,
        href: &str,
        resource_type: ResourceType,
    ) {
        if let Some(url) = resolve_reference(base, href) {
            if seen.insert(url.clone()) {
                self.resources.push(Resource {
                    method: "GET".to_string(),
                    url,
                    resource_type,
                });
            }
        }
    }
}

/// Parses HTML content and extracts links, subresources and metadata
///
/// # Link Extraction Rules
///
/// **Links:** `<a href>` (except `download` links), `<area href>` and
/// `<link rel="canonical">`.
///
/// **Resources:** `src`, `srcset`, `data-src` and `data-srcset` of images and
/// sources, script sources, stylesheets, icons, media, video posters, frames,
/// meta refresh targets and `url(...)` references in inline styles.
///
/// `javascript:`, `mailto:`, `tel:`, `data:` and fragment-only references are skipped.
///
/// # Arguments
///
/// * `html` - The HTML content to parse
/// * `base` - The URL the document was fetched from
///
/// # Example
///
/// ```
/// use tidemark::crawler::parse_page;
/// use tidemark::url::CrawlUrl;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base = CrawlUrl::parse("https://example.com/").unwrap();
/// let parsed = parse_page(html, &base);
/// assert_eq!(parsed.title, Some("Test".to_string()));
/// assert_eq!(parsed.links[0].as_str(), "https://example.com/page");
/// ```
pub fn parse_page(html: &str, base: &CrawlUrl) -> ParsedPage {
    let document = Html::parse_document(html);
    let base = document_base(&document, base);

    let mut page = ParsedPage {
        title: extract_title(&document),
        ..ParsedPage::default()
    };
    let mut seen_links = HashSet::new();
    let mut seen_resources = HashSet::new();

    for element in document.root_element().descendants().filter_map(ElementRef::wrap) {
        let node = element.value();
        let attr = |name: &str| node.attr(name).unwrap_or_default();

        if let Some(style) = node.attr("style") {
            for href in css_urls(style) {
                page.add_resource(&mut seen_resources, &base, &href, ResourceType::Image);
            }
        }

        match node.name() {
            "a" => {
                if node.attr("download").is_none() {
                    page.add_link(&mut seen_links, &base, attr("href"));
                }
            }
            "area" => page.add_link(&mut seen_links, &base, attr("href")),
            "link" => {
                let rel = attr("rel").to_ascii_lowercase();
                let rels: Vec<&str> = rel.split_whitespace().collect();
                if rels.contains(&"canonical") {
                    page.add_link(&mut seen_links, &base, attr("href"));
                } else if rels.contains(&"stylesheet") {
                    page.add_resource(&mut seen_resources, &base, attr("href"), ResourceType::Stylesheet);
                } else if rels.contains(&"icon") {
                    page.add_resource(&mut seen_resources, &base, attr("href"), ResourceType::Image);
                }
            }
            "script" => {
                page.has_script = true;
                page.add_resource(&mut seen_resources, &base, attr("src"), ResourceType::Script);
            }
            "img" | "source" => {
                let in_media = element
                    .parent()
                    .and_then(ElementRef::wrap)
                    .map_or(false, |parent| matches!(parent.value().name(), "audio" | "video"));
                let resource_type = if node.name() == "source" && in_media {
                    ResourceType::Media
                } else {
                    ResourceType::Image
                };
                page.add_resource(&mut seen_resources, &base, attr("src"), resource_type);
                page.add_resource(&mut seen_resources, &base, attr("data-src"), resource_type);
                for href in srcset_urls(attr("srcset")).chain(srcset_urls(attr("data-srcset"))) {
                    page.add_resource(&mut seen_resources, &base, href, ResourceType::Image);
                }
            }
            "input" => page.add_resource(&mut seen_resources, &base, attr("src"), ResourceType::Image),
            "audio" | "track" => {
                page.add_resource(&mut seen_resources, &base, attr("src"), ResourceType::Media)
            }
            "video" => {
                page.add_resource(&mut seen_resources, &base, attr("poster"), ResourceType::Image);
                page.add_resource(&mut seen_resources, &base, attr("src"), ResourceType::Media);
            }
            "frame" | "iframe" => {
                page.add_resource(&mut seen_resources, &base, attr("src"), ResourceType::Document)
            }
            "meta" => {
                if attr("http-equiv").eq_ignore_ascii_case("refresh") {
                    if let Some(target) = refresh_target(attr("content")) {
                        page.add_resource(&mut seen_resources, &base, target, ResourceType::Document);
                    }
                }
            }
            "style" => {
                let css: String = element.text().collect();
                for href in css_urls(&css) {
                    page.add_resource(&mut seen_resources, &base, &href, ResourceType::Image);
                }
            }
            _ => {}
        }
    }

    page
}

/// Extracts the page title from the HTML document
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Honors `<base href>` when present
fn document_base(document: &Html, fetched_from: &CrawlUrl) -> CrawlUrl {
    Selector::parse("base[href]")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .and_then(|base| base.value().attr("href"))
                .and_then(|href| fetched_from.resolve(href).ok())
        })
        .unwrap_or_else(|| fetched_from.clone())
}

/// The URL candidates of a `srcset` attribute
fn srcset_urls(srcset: &str) -> impl Iterator<Item = &str> {
    srcset
        .split(',')
        .filter_map(|candidate| candidate.split_whitespace().next())
}

/// The target of a `<meta http-equiv="refresh" content="5; url=...">`
fn refresh_target(content: &str) -> Option<&str> {
    let (_, rest) = content.split_once(';')?;
    let rest = rest.trim();
    if !rest.get(..4)?.eq_ignore_ascii_case("url=") {
        return None;
    }
    let target = rest[4..].trim().trim_matches(|c| c == '\'' || c == '"');
    (!target.is_empty()).then_some(target)
}

/// `url(...)` and `@import "..."` references in a stylesheet or style attribute
fn css_urls(css: &str) -> Vec<String> {
    let mut urls = Vec::new();
    let lower = css.to_ascii_lowercase();

    let mut from = 0;
    while let Some(offset) = lower[from..].find("url(") {
        let start = from + offset + 4;
        let Some(length) = css[start..].find(')') else {
            break;
        };
        let value = css[start..start + length]
            .trim()
            .trim_matches(|c| c == '\'' || c == '"')
            .trim();
        if !value.is_empty() {
            urls.push(value.to_string());
        }
        from = start + length;
    }

    let mut from = 0;
    while let Some(offset) = lower[from..].find("@import") {
        let start = from + offset + "@import".len();
        let rest = css[start..].trim_start();
        if let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') {
            if let Some(end) = rest[1..].find(quote) {
                urls.push(rest[1..1 + end].to_string());
            }
        }
        from = start;
    }

    urls
}
