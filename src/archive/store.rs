use crate::archive::capture::Capture;
use crate::archive::http::ResponseHead;
use crate::archive::warc::{
    format_date, parse_urn, read_record, urn, write_record, WarcHeaders,
    PROFILE_IDENTICAL_PAYLOAD_DIGEST, PROFILE_SERVER_NOT_MODIFIED,
};
use crate::archive::ArchiveError;
use crate::config::{ArchiveConfig, CrawlerConfig};
use crate::crawler::NOT_MODIFIED;
use crate::storage::{RecordEntry, RecordType, SharedStorage, Storage};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_REVISIT_DEPTH: usize = 8;

static SERIAL: AtomicU32 = AtomicU32::new(0);

fn next_serial() -> u32 {
    SERIAL
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some((n + 1) % 100_000))
        .unwrap_or_else(|current| current)
}

fn expand_filename(template: &str, now: DateTime<Utc>, serial: u32) -> String {
    template
        .replace("{TIMESTAMP}", &now.format("%Y%m%d%H%M%S").to_string())
        .replace("{SEQNO}", &format!("{:05}", serial))
}

/// Which duplicate captures are written as revisit records
#[derive(Debug, Clone, Copy)]
pub struct DedupeSettings {
    pub server: bool,
    pub digest: bool,
    pub min_length: u64,
}

impl From<&CrawlerConfig> for DedupeSettings {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            server: config.dedupe_server,
            digest: config.dedupe_digest,
            min_length: config.dedupe_min_length,
        }
    }
}

/// A response read back from the archive
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    /// Id of the response record the payload came from
    pub record_id: Uuid,
    pub target_uri: String,
    pub date: DateTime<Utc>,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub payload: Vec<u8>,
}

impl CapturedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

struct WarcFile {
    id: Uuid,
    path: PathBuf,
    file: File,
    position: u64,
    /// Set when a partial record could not be removed; the file takes no more records
    damaged: bool,
}

impl WarcFile {
    /// Appends one record, returning its offset and length
    ///
    /// A record that fails halfway is cut off again, so the next record starts
    /// at the offset the index expects.
    fn append<R: Read>(
        &mut self,
        headers: &WarcHeaders,
        block: R,
        block_len: u64,
    ) -> io::Result<(u64, u64)> {
        let position = self.position;
        match write_record(&mut self.file, headers, block, block_len) {
            Ok(length) => {
                self.position += length;
                Ok((position, length))
            }
            Err(e) => {
                warn!("Discarding partial record in {}: {}", self.path.display(), e);
                let rollback = self
                    .file
                    .set_len(position)
                    .and_then(|_| self.file.seek(SeekFrom::Start(position)));
                if let Err(rollback) = rollback {
                    warn!("Retiring {}: {}", self.path.display(), rollback);
                    self.damaged = true;
                }
                Err(e)
            }
        }
    }
}

/// Append-only archive writer plus record index
pub struct CaptureStore {
    config: ArchiveConfig,
    dedupe: DedupeSettings,
    storage: SharedStorage,
    writer: Mutex<Option<WarcFile>>,
}

impl CaptureStore {
    pub fn new(config: ArchiveConfig, dedupe: DedupeSettings, storage: SharedStorage) -> Self {
        Self {
            config,
            dedupe,
            storage,
            writer: Mutex::new(None),
        }
    }

    fn rotate_if_needed(&self, slot: &mut Option<WarcFile>) -> Result<(), ArchiveError> {
        let max = self.config.warc_max_length_bytes;
        let full = match slot.as_ref() {
            Some(warc) => warc.damaged || (max > 0 && warc.position > max),
            None => true,
        };
        if !full {
            return Ok(());
        }

        if let Some(old) = slot.take() {
            old.file.sync_all()?;
            debug!("Closed archive file {}", old.path.display());
        }

        let path = PathBuf::from(expand_filename(
            &self.config.warc_filename,
            Utc::now(),
            next_serial(),
        ));
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;

        let id = Uuid::now_v7();
        let created = Utc::now();
        let fields = format!(
            "software: tidemark/{}\r\nformat: WARC File Format 1.1\r\n",
            env!("CARGO_PKG_VERSION")
        );
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let headers = WarcHeaders::new(RecordType::Warcinfo, id, created)
            .with("WARC-Filename", filename)
            .with("Content-Type", "application/warc-fields");

        let mut warc = WarcFile {
            id,
            path,
            file,
            position: 0,
            damaged: false,
        };
        warc.position = write_record(
            &mut warc.file,
            &headers,
            fields.as_bytes(),
            fields.len() as u64,
        )?;

        self.storage
            .lock()
            .insert_warc(id, &warc.path.to_string_lossy(), created)?;
        info!("Opened archive file {}", warc.path.display());
        *slot = Some(warc);
        Ok(())
    }

    fn index(&self, entry: &RecordEntry) -> Result<(), ArchiveError> {
        self.storage.lock().insert_record(entry)?;
        Ok(())
    }

    /// Picks the record a duplicate response should point back at
    fn revisit_target(
        &self,
        capture: &Capture,
        status: u16,
        digest: Option<&str>,
    ) -> Result<Option<(&'static str, Uuid, DateTime<Utc>)>, ArchiveError> {
        if self.dedupe.server && i32::from(status) == NOT_MODIFIED {
            if let Some((id, date)) = capture.validator_record {
                return Ok(Some((PROFILE_SERVER_NOT_MODIFIED, id, date)));
            }
        }

        if self.dedupe.digest && capture.payload_length >= self.dedupe.min_length {
            if let Some(digest) = digest {
                let duplicate = self
                    .storage
                    .lock()
                    .find_response_by_payload_digest(capture.location_id, digest)?;
                if let Some((id, date)) = duplicate {
                    return Ok(Some((PROFILE_IDENTICAL_PAYLOAD_DIGEST, id, date)));
                }
            }
        }

        Ok(None)
    }

    /// Writes the request record and the response or revisit record of a capture
    ///
    /// Nothing is written when no response was received.
    pub fn save(&self, capture: &mut Capture) -> Result<(), ArchiveError> {
        let (Some(request), Some(status)) = (capture.request.as_ref(), capture.status()) else {
            return Ok(());
        };

        let mut slot = self.writer.lock();
        self.rotate_if_needed(&mut slot)?;
        let Some(warc) = slot.as_mut() else {
            return Err(ArchiveError::Malformed("no archive file open".into()));
        };

        let target_uri = capture.url.to_string();
        let ip = capture.ip.map(|ip| ip.to_string());

        let request_id = Uuid::now_v7();
        let headers = WarcHeaders::new(RecordType::Request, request_id, capture.date)
            .with("WARC-Target-URI", target_uri.as_str())
            .with("WARC-Warcinfo-ID", urn(warc.id))
            .with_opt("WARC-IP-Address", ip.clone())
            .with("Content-Type", "application/http;msgtype=request");
        let (position, length) = warc.append(&headers, request.as_slice(), request.len() as u64)?;
        self.index(&RecordEntry {
            id: request_id,
            visit_id: Some(capture.visit_id),
            record_type: RecordType::Request,
            warc_id: warc.id,
            position,
            length,
            payload_digest: None,
        })?;

        let digest = capture.digest.as_ref().map(|digest| digest.label());
        let revisit = self.revisit_target(capture, status, digest.as_deref())?;

        // A not-modified response has no payload of its own to describe
        let digest = match revisit {
            Some((PROFILE_SERVER_NOT_MODIFIED, _, _)) => None,
            _ => digest,
        };

        let response_id = Uuid::now_v7();
        let record_type = if revisit.is_some() {
            RecordType::Revisit
        } else {
            RecordType::Response
        };
        let mut headers = WarcHeaders::new(record_type, response_id, capture.date)
            .with("WARC-Target-URI", target_uri.as_str())
            .with("WARC-Warcinfo-ID", urn(warc.id))
            .with("WARC-Concurrent-To", urn(request_id))
            .with_opt("WARC-IP-Address", ip)
            .with_opt("WARC-Payload-Digest", digest.clone())
            .with("Content-Type", "application/http;msgtype=response");
        if let Some((profile, refers_to, refers_date)) = revisit {
            headers = headers
                .with("WARC-Profile", profile)
                .with("WARC-Refers-To", urn(refers_to))
                .with("WARC-Refers-To-Target-URI", target_uri.as_str())
                .with("WARC-Refers-To-Date", format_date(refers_date));
        }

        // Revisits carry only the response head
        let block_len = if revisit.is_some() {
            capture.head_length()
        } else {
            capture.message_length()
        };
        let (position, length) = warc.append(&headers, capture.message_reader()?, block_len)?;
        self.index(&RecordEntry {
            id: response_id,
            visit_id: Some(capture.visit_id),
            record_type,
            warc_id: warc.id,
            position,
            length,
            payload_digest: digest,
        })?;
        drop(slot);

        capture.request_id = Some(request_id);
        capture.response_id = Some(response_id);
        capture.revisit_of = revisit.map(|(_, id, date)| (id, date));
        Ok(())
    }

    /// Writes a standalone resource record, such as a rendered screenshot
    pub fn write_resource(
        &self,
        visit_id: Option<Uuid>,
        target_uri: &str,
        date: DateTime<Utc>,
        content_type: &str,
        body: &[u8],
    ) -> Result<Uuid, ArchiveError> {
        let mut slot = self.writer.lock();
        self.rotate_if_needed(&mut slot)?;
        let Some(warc) = slot.as_mut() else {
            return Err(ArchiveError::Malformed("no archive file open".into()));
        };

        let id = Uuid::now_v7();
        let headers = WarcHeaders::new(RecordType::Resource, id, date)
            .with("WARC-Target-URI", target_uri)
            .with("WARC-Warcinfo-ID", urn(warc.id))
            .with("Content-Type", content_type);
        let (position, length) = warc.append(&headers, body, body.len() as u64)?;
        self.index(&RecordEntry {
            id,
            visit_id,
            record_type: RecordType::Resource,
            warc_id: warc.id,
            position,
            length,
            payload_digest: None,
        })?;
        Ok(id)
    }

    /// Reads the response stored under `record_id`, following revisit references
    pub fn read_response(&self, record_id: Uuid) -> Result<CapturedResponse, ArchiveError> {
        let mut id = record_id;
        for _ in 0..MAX_REVISIT_DEPTH {
            let location = self
                .storage
                .lock()
                .locate_record(id)?
                .ok_or(ArchiveError::UnknownRecord(id))?;

            let mut reader = BufReader::new(File::open(&location.path)?);
            reader.seek(SeekFrom::Start(location.position))?;
            let record = read_record(&mut reader)?;

            match record.headers.record_type() {
                Some(RecordType::Response) => return parse_response(id, record),
                Some(RecordType::Revisit) => {
                    id = record
                        .headers
                        .get("WARC-Refers-To")
                        .and_then(parse_urn)
                        .ok_or_else(|| {
                            ArchiveError::Malformed(format!("revisit {} has no WARC-Refers-To", id))
                        })?;
                }
                other => {
                    return Err(ArchiveError::NotAResponse {
                        id,
                        record_type: other
                            .map(|kind| kind.as_str().to_string())
                            .unwrap_or_else(|| "unknown".to_string()),
                    })
                }
            }
        }
        Err(ArchiveError::RevisitChainTooLong(record_id))
    }

    /// Flushes and closes the current archive file
    pub fn close(&self) -> Result<(), ArchiveError> {
        if let Some(warc) = self.writer.lock().take() {
            warc.file.sync_all()?;
            info!("Closed archive file {}", warc.path.display());
        }
        Ok(())
    }
}

fn parse_response(
    id: Uuid,
    record: crate::archive::warc::WarcRecord,
) -> Result<CapturedResponse, ArchiveError> {
    let (head, body_start) = ResponseHead::parse(&record.block)?;
    let payload = record.block[body_start..].to_vec();
    Ok(CapturedResponse {
        record_id: id,
        target_uri: record
            .headers
            .get("WARC-Target-URI")
            .unwrap_or_default()
            .to_string(),
        date: record.headers.date().unwrap_or_default(),
        status: head.status,
        reason: head.reason,
        headers: head.headers,
        payload,
    })
}
