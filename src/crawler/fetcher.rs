//! HTTP fetcher implementation
//!
//! This module handles the network side of an exchange:
//! - Building the HTTP client with the crawler's user agent
//! - Sending the recorded HTTP/1.0 request
//! - Streaming the raw response into the capture's spool file

use crate::archive::http::{latin1_string, RequestHead, ResponseHead};
use crate::archive::Capture;
use reqwest::header::{HOST, TRANSFER_ENCODING, USER_AGENT};
use reqwest::{redirect::Policy, Client, Method, Version};
use std::io;
use std::time::Duration;
use tracing::debug;

/// Browser request headers that are never forwarded by a nested exchange
const IGNORED_EXTRA_HEADERS: &[&str] = &[
    "content-length",
    "connection",
    "transfer-encoding",
    "host",
    "user-agent",
    "if-none-match",
    "if-modified-since",
    "referer",
    "te",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "upgrade-insecure-requests",
    "accept-encoding",
];

/// Builds an HTTP client with proper configuration
///
/// Redirects are not followed and bodies are not decompressed, so the archive
/// records exactly what the server sent.
///
/// # Arguments
///
/// * `user_agent` - The User-Agent header value
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(user_agent: &str) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::none()) // Redirects become locations of their own
        .http1_only()
        .build()
}

/// Whether a header supplied by the browser may be forwarded
pub(crate) fn is_forwardable(name: &str) -> bool {
    !name.starts_with(':') && !IGNORED_EXTRA_HEADERS.contains(&name.to_ascii_lowercase().as_str())
}

/// Sends `head` and spools the response into `capture`
///
/// The request head is recorded on the capture before anything is sent. The
/// response head is rebuilt from the status line and headers, leaving out
/// `Transfer-Encoding` since the spooled body is already de-chunked.
pub(crate) async fn fetch(
    client: &Client,
    head: &RequestHead,
    capture: &mut Capture,
) -> crate::Result<()> {
    capture.request = Some(head.to_bytes());

    let method = Method::from_bytes(head.method.as_bytes()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid request method {}", head.method),
        )
    })?;

    let mut request = client
        .request(method, capture.url.as_url().clone())
        .version(Version::HTTP_10);
    for (name, value) in &head.headers {
        // The client sets these itself
        if name.eq_ignore_ascii_case(HOST.as_str())
            || name.eq_ignore_ascii_case(USER_AGENT.as_str())
        {
            continue;
        }
        request = request.header(name.as_str(), value.as_str());
    }

    debug!("Fetching {}", capture.url);
    let mut response = request.send().await?;
    capture.ip = response.remote_addr().map(|addr| addr.ip());

    let status = response.status();
    let headers = response
        .headers()
        .iter()
        .filter(|(name, _)| **name != TRANSFER_ENCODING)
        .map(|(name, value)| (name.as_str().to_string(), latin1_string(value.as_bytes())))
        .collect();
    capture.begin_response(ResponseHead {
        version: version_string(response.version()).to_string(),
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or_default().to_string(),
        headers,
    })?;

    while let Some(chunk) = response.chunk().await? {
        capture.write_payload(&chunk)?;
    }
    Ok(())
}

fn version_string(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/1.1",
    }
}
