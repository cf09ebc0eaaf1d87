use crate::archive::digest::{PayloadDigest, PayloadHasher};
use crate::archive::http::ResponseHead;
use crate::config::DigestAlgorithm;
use crate::url::CrawlUrl;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::net::IpAddr;
use uuid::Uuid;

/// One request/response pair on its way into the archive
///
/// The raw response (head and de-chunked body) is spooled to an anonymous temporary
/// file that disappears when the capture is dropped.
#[derive(Debug)]
pub struct Capture {
    pub visit_id: Uuid,
    pub location_id: i64,
    pub url: CrawlUrl,
    pub method: String,
    pub date: DateTime<Utc>,
    pub ip: Option<IpAddr>,
    /// Serialized request head, set once a request was sent
    pub request: Option<Vec<u8>>,
    pub response: Option<ResponseHead>,
    /// Response record whose validators were sent as conditional headers
    pub validator_record: Option<(Uuid, DateTime<Utc>)>,
    pub digest: Option<PayloadDigest>,
    pub payload_length: u64,

    // Filled in by the capture store
    pub request_id: Option<Uuid>,
    pub response_id: Option<Uuid>,
    pub revisit_of: Option<(Uuid, DateTime<Utc>)>,

    spool: File,
    head_len: u64,
}

impl Capture {
    pub fn new(location_id: i64, url: CrawlUrl, method: &str, date: DateTime<Utc>) -> io::Result<Self> {
        Ok(Self {
            visit_id: Uuid::now_v7(),
            location_id,
            url,
            method: method.to_string(),
            date,
            ip: None,
            request: None,
            response: None,
            validator_record: None,
            digest: None,
            payload_length: 0,
            request_id: None,
            response_id: None,
            revisit_of: None,
            spool: tempfile::tempfile()?,
            head_len: 0,
        })
    }

    /// Stores the response head; it becomes the start of the spooled message
    pub fn begin_response(&mut self, head: ResponseHead) -> io::Result<()> {
        let bytes = head.to_bytes();
        self.spool.set_len(0)?;
        self.spool.seek(SeekFrom::Start(0))?;
        self.spool.write_all(&bytes)?;
        self.head_len = bytes.len() as u64;
        self.payload_length = 0;
        self.response = Some(head);
        Ok(())
    }

    pub fn write_payload(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.spool.seek(SeekFrom::End(0))?;
        self.spool.write_all(chunk)?;
        self.payload_length += chunk.len() as u64;
        Ok(())
    }

    /// Hashes the spooled payload, recording its digest and length
    pub fn compute_digest(&mut self, algorithm: DigestAlgorithm) -> io::Result<()> {
        let mut hasher = PayloadHasher::new(algorithm);
        let mut length = 0u64;
        {
            let mut reader = self.payload_reader()?;
            let mut buf = [0u8; 8192];
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                length += n as u64;
            }
        }
        self.payload_length = length;
        self.digest = Some(hasher.finish());
        Ok(())
    }

    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|head| head.status)
    }

    /// Total spooled bytes: head plus payload
    pub fn message_length(&self) -> u64 {
        self.head_len + self.payload_length
    }

    pub fn head_length(&self) -> u64 {
        self.head_len
    }

    /// Reader over the whole spooled response message
    pub fn message_reader(&self) -> io::Result<impl Read + '_> {
        let mut file = &self.spool;
        file.seek(SeekFrom::Start(0))?;
        Ok(file.take(self.message_length()))
    }

    /// Reader over the spooled payload only
    pub fn payload_reader(&self) -> io::Result<impl Read + '_> {
        let mut file = &self.spool;
        file.seek(SeekFrom::Start(self.head_len))?;
        Ok(file.take(self.payload_length_on_disk()?))
    }

    /// Reads the whole payload into memory
    pub fn payload(&self) -> io::Result<Vec<u8>> {
        let mut payload = Vec::new();
        self.payload_reader()?.read_to_end(&mut payload)?;
        Ok(payload)
    }

    fn payload_length_on_disk(&self) -> io::Result<u64> {
        let len = self.spool.metadata()?.len();
        Ok(len.saturating_sub(self.head_len))
    }
}
