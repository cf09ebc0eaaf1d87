//! HTTP/1.x message heads as they are stored inside archive records
//!
//! Header values are kept as ISO-8859-1 text so arbitrary header bytes survive a
//! serialize/parse cycle unchanged.

use crate::archive::ArchiveError;

/// Request line plus headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    pub fn new(method: &str, target: &str) -> Self {
        Self {
            method: method.to_string(),
            target: target.to_string(),
            version: "HTTP/1.0".to_string(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = latin1_bytes(&format!(
            "{} {} {}\r\n",
            self.method, self.target, self.version
        ));
        write_headers(&mut out, &self.headers);
        out
    }
}

/// Status line plus headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// Case-insensitive lookup of the first header with this name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let status_line = if self.reason.is_empty() {
            format!("{} {}\r\n", self.version, self.status)
        } else {
            format!("{} {} {}\r\n", self.version, self.status, self.reason)
        };
        let mut out = latin1_bytes(&status_line);
        write_headers(&mut out, &self.headers);
        out
    }

    /// Parses a response head from the start of `data`
    ///
    /// # Returns
    ///
    /// The parsed head and the number of bytes it occupies, including the blank line
    pub fn parse(data: &[u8]) -> Result<(Self, usize), ArchiveError> {
        let (head_end, body_start) = find_head_end(data)
            .ok_or_else(|| ArchiveError::Malformed("unterminated HTTP response head".into()))?;
        let text = latin1_string(&data[..head_end]);
        let mut lines = text.split('\n').map(|line| line.trim_end_matches('\r'));

        let status_line = lines
            .next()
            .ok_or_else(|| ArchiveError::Malformed("missing status line".into()))?;
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default().to_string();
        if !version.starts_with("HTTP/") {
            return Err(ArchiveError::Malformed(format!(
                "bad status line: {}",
                status_line
            )));
        }
        let status = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| ArchiveError::Malformed(format!("bad status line: {}", status_line)))?;
        let reason = parts.next().unwrap_or_default().to_string();

        let mut headers = Vec::new();
        for line in lines.filter(|line| !line.is_empty()) {
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }

        Ok((
            Self {
                version,
                status,
                reason,
                headers,
            },
            body_start,
        ))
    }
}

/// Finds the blank line ending an HTTP head
///
/// Returns the end of the last header line and the start of the body.
pub fn find_head_end(data: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((pos, pos + 4));
    }
    data.windows(2)
        .position(|w| w == b"\n\n")
        .map(|pos| (pos, pos + 2))
}

fn write_headers(out: &mut Vec<u8>, headers: &[(String, String)]) {
    for (name, value) in headers {
        out.extend(latin1_bytes(name));
        out.extend_from_slice(b": ");
        out.extend(latin1_bytes(value));
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
}

pub fn latin1_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

pub fn latin1_bytes(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}
