//! Robots.txt handling module
//!
//! Origins cache their raw robots.txt body in storage; it is re-parsed on demand
//! when an exchange needs to check a path.

mod parser;

pub use parser::RobotsTxt;

/// Extracts the product token of a User-Agent string
///
/// `"tidemark/0.1 (+https://example.org/bot)"` matches robots.txt groups as `"tidemark"`.
pub fn product_token(user_agent: &str) -> &str {
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .find(|part| !part.is_empty())
        .unwrap_or(user_agent)
}

/// Parses at most `max_bytes` of a robots.txt body
pub fn parse_bounded(body: &[u8], max_bytes: usize) -> RobotsTxt {
    let end = body.len().min(max_bytes);
    RobotsTxt::from_bytes(&body[..end])
}

/// Checks if a URL is allowed by a cached robots.txt body
///
/// A missing body allows everything.
pub fn is_allowed(robots_txt: Option<&[u8]>, url: &str, user_agent: &str) -> bool {
    match robots_txt {
        Some(body) => RobotsTxt::from_bytes(body).is_allowed(url, product_token(user_agent)),
        None => true,
    }
}
