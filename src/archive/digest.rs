use crate::config::DigestAlgorithm;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Streaming payload hasher for one of the supported algorithms
pub enum PayloadHasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl PayloadHasher {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha1 => Self::Sha1(Sha1::new()),
            DigestAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(hasher) => hasher.update(data),
            Self::Sha256(hasher) => hasher.update(data),
        }
    }

    pub fn finish(self) -> PayloadDigest {
        match self {
            Self::Sha1(hasher) => PayloadDigest {
                algorithm: DigestAlgorithm::Sha1,
                bytes: hasher.finalize().to_vec(),
            },
            Self::Sha256(hasher) => PayloadDigest {
                algorithm: DigestAlgorithm::Sha256,
                bytes: hasher.finalize().to_vec(),
            },
        }
    }
}

/// A payload digest, rendered as `sha1:BASE32` the way `WARC-Payload-Digest` carries it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDigest {
    algorithm: DigestAlgorithm,
    bytes: Vec<u8>,
}

impl PayloadDigest {
    pub fn of(algorithm: DigestAlgorithm, data: &[u8]) -> Self {
        let mut hasher = PayloadHasher::new(algorithm);
        hasher.update(data);
        hasher.finish()
    }

    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PayloadDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.algorithm {
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha256 => "sha256",
        };
        write!(f, "{}:{}", name, base32(&self.bytes))
    }
}

/// RFC 4648 base32 with padding
fn base32(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() + 4) / 5 * 8);
    for chunk in data.chunks(5) {
        let mut buf = [0u8; 5];
        buf[..chunk.len()].copy_from_slice(chunk);
        let bits = buf.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        let symbols = (chunk.len() * 8 + 4) / 5;
        for i in 0..8 {
            if i < symbols {
                let index = ((bits >> (35 - i * 5)) & 0x1f) as usize;
                out.push(BASE32_ALPHABET[index] as char);
            } else {
                out.push('=');
            }
        }
    }
    out
}
