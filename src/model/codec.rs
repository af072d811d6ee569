//! Versioned binary envelope for exported model and dataset snapshots
//!
//! Layout (little-endian):
//!
//! ```text
//! magic[4] | format_version u16 | reserved u16 | payload_len u64 | sha256[32] | payload
//! ```
//!
//! The payload is MessagePack. Readers check magic, version, length and the
//! checksum, in that order, before decoding anything.

use crate::error::{EngineError, Result};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

pub const FORMAT_VERSION: u16 = 1;
pub const HEADER_LEN: usize = 4 + 2 + 2 + 8 + 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Model,
    Dataset,
}

impl BlobKind {
    pub fn magic(&self) -> &'static [u8; 4] {
        match self {
            BlobKind::Model => b"BMDL",
            BlobKind::Dataset => b"BDST",
        }
    }
}

/// Hex SHA-256, as used in logs and sync reports
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn encode<T: Serialize>(kind: BlobKind, value: &T) -> Result<Vec<u8>> {
    let payload = rmp_serde::to_vec_named(value)
        .map_err(|e| EngineError::Format(format!("encode payload: {}", e)))?;

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(kind.magic());
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&Sha256::digest(&payload));
    out.extend_from_slice(&payload);
    Ok(out)
}

pub fn decode<T: DeserializeOwned>(kind: BlobKind, bytes: &[u8]) -> Result<T> {
    if bytes.len() < 4 || &bytes[0..4] != kind.magic() {
        return Err(EngineError::Format(format!(
            "not a {:?} blob (bad magic)",
            kind
        )));
    }
    if bytes.len() < HEADER_LEN {
        return Err(EngineError::TruncatedData {
            declared: HEADER_LEN,
            available: bytes.len(),
        });
    }

    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(EngineError::IncompatibleVersion {
            expected: FORMAT_VERSION,
            found: version,
        });
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[8..16]);
    let declared = u64::from_le_bytes(len_bytes) as usize;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() != declared {
        return Err(EngineError::TruncatedData {
            declared,
            available: payload.len(),
        });
    }

    if Sha256::digest(payload).as_slice() != &bytes[16..48] {
        return Err(EngineError::Format("checksum mismatch".to_string()));
    }

    rmp_serde::from_slice(payload)
        .map_err(|e| EngineError::Format(format!("decode payload: {}", e)))
}
