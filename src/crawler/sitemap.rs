//! Sitemap parsing
//!
//! Handles both `<urlset>` documents, whose entries are pages, and `<sitemapindex>`
//! documents, whose entries are further sitemaps.

use crate::storage::LocationType;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Errors raised while parsing a sitemap
#[derive(Debug, Error)]
pub enum SitemapError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Unexpected root element <{0}>")]
    UnexpectedRoot(String),

    #[error("Document has no root element")]
    Empty,
}

/// How often a page is expected to change, as declared by `<changefreq>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeFrequency {
    Always,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Never,
}

impl ChangeFrequency {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Some(Self::Always),
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "yearly" => Some(Self::Yearly),
            "never" => Some(Self::Never),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
            Self::Never => "never",
        }
    }
}

/// One `<url>` or `<sitemap>` entry
#[derive(Debug, Clone, PartialEq)]
pub struct SitemapEntry {
    /// The `<loc>` value, possibly relative
    pub loc: String,
    pub location_type: LocationType,
    pub changefreq: Option<ChangeFrequency>,
    pub priority: Option<f64>,
    pub lastmod: Option<String>,
}

#[derive(Clone, Copy)]
enum Field {
    Loc,
    ChangeFreq,
    Priority,
    LastMod,
}

#[derive(Default)]
struct PartialEntry {
    loc: String,
    changefreq: String,
    priority: String,
    lastmod: String,
}

impl PartialEntry {
    fn field_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::Loc => &mut self.loc,
            Field::ChangeFreq => &mut self.changefreq,
            Field::Priority => &mut self.priority,
            Field::LastMod => &mut self.lastmod,
        }
    }

    fn finish(self, location_type: LocationType) -> Option<SitemapEntry> {
        let loc = self.loc.trim();
        if loc.is_empty() {
            return None;
        }
        let lastmod = self.lastmod.trim();
        Some(SitemapEntry {
            loc: loc.to_string(),
            location_type,
            changefreq: ChangeFrequency::parse(&self.changefreq),
            priority: self.priority.trim().parse().ok(),
            lastmod: (!lastmod.is_empty()).then(|| lastmod.to_string()),
        })
    }
}

/// Parses a sitemap or sitemap index document
///
/// Elements from other namespaces nested inside an entry (images, news, ...) are
/// skipped; only direct children of `<url>` or `<sitemap>` are read.
///
/// # Errors
///
/// Returns `SitemapError::UnexpectedRoot` when the root is neither `urlset` nor
/// `sitemapindex`, and `SitemapError::Xml` for malformed XML.
pub fn parse_sitemap(body: &[u8]) -> Result<Vec<SitemapEntry>, SitemapError> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut entries = Vec::new();
    let mut entry_type = None;
    let mut depth = 0usize;
    let mut entry: Option<PartialEntry> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(element) => {
                depth += 1;
                let name = element.local_name();
                let name = name.as_ref();
                match depth {
                    1 => entry_type = Some(root_type(name)?),
                    2 if name == b"url" || name == b"sitemap" => entry = Some(PartialEntry::default()),
                    3 if entry.is_some() => {
                        field = match name {
                            b"loc" => Some(Field::Loc),
                            b"changefreq" => Some(Field::ChangeFreq),
                            b"priority" => Some(Field::Priority),
                            b"lastmod" => Some(Field::LastMod),
                            _ => None,
                        }
                    }
                    _ => {}
                }
            }
            Event::Empty(element) => {
                if depth == 0 {
                    entry_type = Some(root_type(element.local_name().as_ref())?);
                }
            }
            Event::Text(text) => {
                if let (Some(field), Some(entry)) = (field, entry.as_mut()) {
                    entry.field_mut(field).push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let (Some(field), Some(entry)) = (field, entry.as_mut()) {
                    entry
                        .field_mut(field)
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                match depth {
                    2 => {
                        if let (Some(done), Some(location_type)) = (entry.take(), entry_type) {
                            entries.extend(done.finish(location_type));
                        }
                    }
                    3 => field = None,
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    match entry_type {
        Some(_) => Ok(entries),
        None => Err(SitemapError::Empty),
    }
}

fn root_type(name: &[u8]) -> Result<LocationType, SitemapError> {
    match name {
        b"urlset" => Ok(LocationType::Page),
        b"sitemapindex" => Ok(LocationType::Sitemap),
        other => Err(SitemapError::UnexpectedRoot(
            String::from_utf8_lossy(other).into_owned(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urlset() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <url>
                <loc>http://example.com/</loc>
                <lastmod>2024-01-02</lastmod>
                <changefreq>daily</changefreq>
                <priority>0.8</priority>
              </url>
              <url><loc>/relative?a=1&amp;b=2</loc></url>
            </urlset>"#;
        let entries = parse_sitemap(xml).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].loc, "http://example.com/");
        assert_eq!(entries[0].location_type, LocationType::Page);
        assert_eq!(entries[0].changefreq, Some(ChangeFrequency::Daily));
        assert_eq!(entries[0].priority, Some(0.8));
        assert_eq!(entries[0].lastmod.as_deref(), Some("2024-01-02"));
        assert_eq!(entries[1].loc, "/relative?a=1&b=2");
        assert_eq!(entries[1].changefreq, None);
    }

    #[test]
    fn test_sitemap_index() {
        let xml = br#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <sitemap><loc>http://example.com/a.xml</loc></sitemap>
              <sitemap><loc>http://example.com/b.xml</loc></sitemap>
            </sitemapindex>"#;
        let entries = parse_sitemap(xml).unwrap();

        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .all(|entry| entry.location_type == LocationType::Sitemap));
    }

    #[test]
    fn test_nested_extension_elements_are_skipped() {
        let xml = br#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9"
                    xmlns:image="http://www.google.com/schemas/sitemap-image/1.1">
              <url>
                <loc>http://example.com/page</loc>
                <image:image><image:loc>http://example.com/photo.jpg</image:loc></image:image>
              </url>
            </urlset>"#;
        let entries = parse_sitemap(xml).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].loc, "http://example.com/page");
    }

    #[test]
    fn test_unknown_changefreq_and_bad_priority_are_ignored() {
        let xml = br#"<urlset><url><loc>/x</loc><changefreq>sometimes</changefreq><priority>high</priority></url></urlset>"#;
        let entries = parse_sitemap(xml).unwrap();
        assert_eq!(entries[0].changefreq, None);
        assert_eq!(entries[0].priority, None);
    }

    #[test]
    fn test_cdata_loc() {
        let xml = br#"<urlset><url><loc><![CDATA[http://example.com/?q=a&b]]></loc></url></urlset>"#;
        let entries = parse_sitemap(xml).unwrap();
        assert_eq!(entries[0].loc, "http://example.com/?q=a&b");
    }

    #[test]
    fn test_entries_without_loc_are_dropped() {
        let entries = parse_sitemap(b"<urlset><url><priority>1.0</priority></url></urlset>").unwrap();
        assert!(entries.is_empty());
        assert!(parse_sitemap(b"<urlset/>").unwrap().is_empty());
    }

    #[test]
    fn test_unexpected_root() {
        let result = parse_sitemap(b"<html><body>not a sitemap</body></html>");
        assert!(matches!(result, Err(SitemapError::UnexpectedRoot(name)) if name == "html"));
    }

    #[test]
    fn test_empty_document() {
        assert!(matches!(parse_sitemap(b""), Err(SitemapError::Empty)));
    }
}
