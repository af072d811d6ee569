//! Engine error taxonomy
//!
//! Every boundary operation fails with one of these variants. The numeric
//! codes are stable: the C boundary returns them as negative integers.

use crate::model::Modality;
use thiserror::Error;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Malformed container: {0}")]
    Format(String),

    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Truncated data: declared {declared} bytes, only {available} present")]
    TruncatedData { declared: usize, available: usize },

    #[error("Insufficient audio: need at least {needed} samples, got {got}")]
    InsufficientAudio { needed: usize, got: usize },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Normalization statistics not loaded for {0} modality")]
    StatisticsUnavailable(Modality),

    #[error("Model not loaded")]
    ModelNotLoaded,

    #[error("No enrolled {modality} template for '{identifier}'")]
    UnknownIdentity {
        identifier: String,
        modality: Modality,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Incompatible artifact version: expected {expected}, found {found}")]
    IncompatibleVersion { expected: u16, found: u16 },

    #[error("Artifact '{0}' is not in the allow-list")]
    ForbiddenArtifact(String),

    #[error("Buffer too small: need {needed} bytes, capacity {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Stable numeric code, negative for use as a C return value
    pub fn code(&self) -> i32 {
        match self {
            EngineError::Format(_) => -2,
            EngineError::UnsupportedEncoding(_) => -3,
            EngineError::TruncatedData { .. } => -4,
            EngineError::InsufficientAudio { .. } => -5,
            EngineError::DimensionMismatch { .. } => -6,
            EngineError::StatisticsUnavailable(_) => -7,
            EngineError::ModelNotLoaded => -8,
            EngineError::UnknownIdentity { .. } => -9,
            EngineError::NotFound(_) => -10,
            EngineError::InvalidInput(_) => -11,
            EngineError::BufferTooSmall { .. } => -12,
            EngineError::IncompatibleVersion { .. } => -13,
            EngineError::ForbiddenArtifact(_) => -14,
            EngineError::Network(_) => -15,
            EngineError::Cancelled => -16,
            EngineError::Storage(_) => -17,
        }
    }

    /// Short machine-readable label, used in JSON error payloads
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Format(_) => "format",
            EngineError::UnsupportedEncoding(_) => "unsupported_encoding",
            EngineError::TruncatedData { .. } => "truncated_data",
            EngineError::InsufficientAudio { .. } => "insufficient_audio",
            EngineError::DimensionMismatch { .. } => "dimension_mismatch",
            EngineError::StatisticsUnavailable(_) => "statistics_unavailable",
            EngineError::ModelNotLoaded => "model_not_loaded",
            EngineError::UnknownIdentity { .. } => "unknown_identity",
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::BufferTooSmall { .. } => "buffer_too_small",
            EngineError::IncompatibleVersion { .. } => "incompatible_version",
            EngineError::ForbiddenArtifact(_) => "forbidden_artifact",
            EngineError::Network(_) => "network",
            EngineError::Cancelled => "cancelled",
            EngineError::Storage(_) => "storage",
        }
    }

    /// Transient failures the caller may simply retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Network(_) | EngineError::Cancelled)
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Format(format!("JSON: {}", e))
    }
}

impl From<crate::validation::ValidationError> for EngineError {
    fn from(e: crate::validation::ValidationError) -> Self {
        EngineError::InvalidInput(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_negative_and_distinct() {
        let errors = vec![
            EngineError::Format(String::new()),
            EngineError::UnsupportedEncoding(String::new()),
            EngineError::TruncatedData {
                declared: 1,
                available: 0,
            },
            EngineError::InsufficientAudio { needed: 1, got: 0 },
            EngineError::DimensionMismatch {
                expected: 1,
                got: 0,
            },
            EngineError::StatisticsUnavailable(Modality::Voice),
            EngineError::ModelNotLoaded,
            EngineError::UnknownIdentity {
                identifier: "u".into(),
                modality: Modality::Ear,
            },
            EngineError::NotFound(String::new()),
            EngineError::InvalidInput(String::new()),
            EngineError::BufferTooSmall {
                needed: 2,
                capacity: 1,
            },
            EngineError::IncompatibleVersion {
                expected: 1,
                found: 2,
            },
            EngineError::ForbiddenArtifact(String::new()),
            EngineError::Network(String::new()),
            EngineError::Cancelled,
            EngineError::Storage(String::new()),
        ];

        let mut codes: Vec<i32> = errors.iter().map(|e| e.code()).collect();
        assert!(codes.iter().all(|&c| c < -1));
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_only_network_is_retryable() {
        assert!(EngineError::Network("timeout".into()).is_retryable());
        assert!(!EngineError::Storage("disk full".into()).is_retryable());
    }
}
