//! Capture store
//!
//! Serializes request/response pairs into rotating, append-only WARC files, indexes
//! every record by file and byte offset, and reads responses back for replay.

mod capture;
mod digest;
pub mod http;
mod store;
pub mod warc;

pub use capture::Capture;
pub use digest::{PayloadDigest, PayloadHasher};
pub use store::{CaptureStore, CapturedResponse, DedupeSettings};

use crate::storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while writing or reading archive records
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("Record {0} is not in the index")]
    UnknownRecord(Uuid),

    #[error("Record {id} is a {record_type} record, not a response or revisit")]
    NotAResponse { id: Uuid, record_type: String },

    #[error("Revisit chain starting at {0} is too long")]
    RevisitChainTooLong(Uuid),
}
