//! WARC 1.1 record framing
//!
//! A record is a version line, named header fields, a blank line, a content block of
//! `Content-Length` bytes and two trailing CRLFs.

use crate::archive::http::{latin1_bytes, latin1_string};
use crate::archive::ArchiveError;
use crate::storage::RecordType;
use chrono::{DateTime, SecondsFormat, Utc};
use std::io::{self, BufRead, Read, Write};
use uuid::Uuid;

pub const WARC_VERSION: &str = "WARC/1.1";

pub const PROFILE_SERVER_NOT_MODIFIED: &str =
    "http://netpreserve.org/warc/1.1/revisit/server-not-modified";
pub const PROFILE_IDENTICAL_PAYLOAD_DIGEST: &str =
    "http://netpreserve.org/warc/1.1/revisit/identical-payload-digest";

/// Ordered WARC header fields, excluding `Content-Length`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarcHeaders {
    fields: Vec<(String, String)>,
}

impl WarcHeaders {
    /// Starts a header set with the mandatory type, id and date fields
    pub fn new(record_type: RecordType, id: Uuid, date: DateTime<Utc>) -> Self {
        Self::default()
            .with("WARC-Type", record_type.as_str())
            .with("WARC-Record-ID", urn(id))
            .with("WARC-Date", format_date(date))
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields.push((name.to_string(), value.into()));
        self
    }

    pub fn with_opt(self, name: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.with(name, value),
            None => self,
        }
    }

    /// Case-insensitive lookup of the first field with this name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn record_type(&self) -> Option<RecordType> {
        self.get("WARC-Type").and_then(RecordType::parse)
    }

    pub fn record_id(&self) -> Option<Uuid> {
        self.get("WARC-Record-ID").and_then(parse_urn)
    }

    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.get("WARC-Date").and_then(parse_date)
    }

    fn to_bytes(&self, content_length: u64) -> Vec<u8> {
        let mut text = format!("{}\r\n", WARC_VERSION);
        for (name, value) in &self.fields {
            text.push_str(name);
            text.push_str(": ");
            text.push_str(value);
            text.push_str("\r\n");
        }
        text.push_str(&format!("Content-Length: {}\r\n\r\n", content_length));
        latin1_bytes(&text)
    }
}

/// A record read back from an archive file
#[derive(Debug, Clone)]
pub struct WarcRecord {
    pub headers: WarcHeaders,
    pub block: Vec<u8>,
}

pub fn urn(id: Uuid) -> String {
    format!("<urn:uuid:{}>", id)
}

pub fn parse_urn(value: &str) -> Option<Uuid> {
    let inner = value.trim().trim_start_matches('<').trim_end_matches('>');
    Uuid::parse_str(inner.strip_prefix("urn:uuid:")?).ok()
}

pub fn format_date(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// Writes one record
///
/// # Returns
///
/// The number of bytes written, including the trailing separator
pub fn write_record<W: Write, R: Read>(
    out: &mut W,
    headers: &WarcHeaders,
    block: R,
    block_len: u64,
) -> io::Result<u64> {
    let head = headers.to_bytes(block_len);
    out.write_all(&head)?;
    let copied = io::copy(&mut block.take(block_len), out)?;
    if copied != block_len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("record block ended after {} of {} bytes", copied, block_len),
        ));
    }
    out.write_all(b"\r\n\r\n")?;
    Ok(head.len() as u64 + block_len + 4)
}

/// Reads the record starting at the reader's current position
pub fn read_record<R: BufRead>(input: &mut R) -> Result<WarcRecord, ArchiveError> {
    let mut line = Vec::new();
    input.read_until(b'\n', &mut line)?;
    let version = latin1_string(&line);
    if !version.trim_end().starts_with("WARC/") {
        return Err(ArchiveError::Malformed(format!(
            "expected WARC version line, found {:?}",
            version.trim_end()
        )));
    }

    let mut headers = WarcHeaders::default();
    let mut content_length = None;
    loop {
        line.clear();
        if input.read_until(b'\n', &mut line)? == 0 {
            return Err(ArchiveError::Malformed("truncated WARC header".into()));
        }
        let text = latin1_string(&line);
        let text = text.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            break;
        }
        let Some((name, value)) = text.split_once(':') else {
            return Err(ArchiveError::Malformed(format!("bad WARC header line {:?}", text)));
        };
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case("Content-Length") {
            content_length = value.parse::<u64>().ok();
        } else {
            headers = headers.with(name, value);
        }
    }

    let length = content_length
        .ok_or_else(|| ArchiveError::Malformed("missing Content-Length".into()))?;
    let mut block = vec![0u8; length as usize];
    input.read_exact(&mut block)?;

    Ok(WarcRecord { headers, block })
}
