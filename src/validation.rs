/**
 * Input Validation Module
 *
 * Centralized validation for everything that crosses the C boundary:
 * identifiers, thresholds, server URLs, artifact names and phrase text.
 */
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Value too long: max {max}, got {actual}")]
    ValueTooLong { max: usize, actual: usize },
}

const MAX_IDENTIFIER_LEN: usize = 128;
const MAX_PHRASE_LEN: usize = 512;
const MAX_CATEGORY_LEN: usize = 64;

/// Validate an external user identifier (non-empty, max 128 chars, no controls or separators)
pub fn validate_identifier(id: &str) -> Result<String, ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::InvalidFormat(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if id.len() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::ValueTooLong {
            max: MAX_IDENTIFIER_LEN,
            actual: id.len(),
        });
    }

    if id.chars().any(|c| c.is_control() || c == '/' || c == '\\') {
        return Err(ValidationError::InvalidFormat(
            "Identifier contains control characters or path separators".to_string(),
        ));
    }

    Ok(id.to_string())
}

/// Validate a caller-supplied decision threshold (finite)
pub fn validate_threshold(threshold: f64) -> Result<f64, ValidationError> {
    if !threshold.is_finite() {
        return Err(ValidationError::InvalidRange(format!(
            "Threshold must be finite, got {}",
            threshold
        )));
    }
    Ok(threshold)
}

/// Map the C convention (negative = default) to an optional override
pub fn threshold_override(threshold: f64) -> Result<Option<f64>, ValidationError> {
    if threshold.is_nan() {
        return Err(ValidationError::InvalidRange(
            "Threshold is NaN".to_string(),
        ));
    }
    if threshold < 0.0 {
        return Ok(None);
    }
    validate_threshold(threshold).map(Some)
}

/// Validate sync server URL (http/https with a host)
pub fn validate_server_url(raw: &str) -> Result<url::Url, ValidationError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| ValidationError::InvalidFormat(format!("Invalid URL: {}", e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidFormat(format!(
            "URL scheme '{}' not supported",
            parsed.scheme()
        )));
    }

    if parsed.host_str().is_none() {
        return Err(ValidationError::InvalidFormat("URL has no host".to_string()));
    }

    Ok(parsed)
}

/// Validate a remote artifact file name (single path component, no traversal)
pub fn validate_artifact_name(name: &str) -> Result<String, ValidationError> {
    if name.is_empty() || name.len() > 64 {
        return Err(ValidationError::InvalidFormat(
            "Artifact name must be 1-64 characters".to_string(),
        ));
    }

    if name.contains("..") {
        return Err(ValidationError::InvalidPath(
            "Artifact name contains traversal".to_string(),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(ValidationError::InvalidFormat(
            "Artifact name can only contain letters, numbers, '.', '_' and '-'".to_string(),
        ));
    }

    Ok(name.to_string())
}

/// Validate challenge phrase text and category
pub fn validate_phrase(text: &str, category: &str) -> Result<(), ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidFormat(
            "Phrase text cannot be empty".to_string(),
        ));
    }

    if text.len() > MAX_PHRASE_LEN {
        return Err(ValidationError::ValueTooLong {
            max: MAX_PHRASE_LEN,
            actual: text.len(),
        });
    }

    if category.len() > MAX_CATEGORY_LEN {
        return Err(ValidationError::ValueTooLong {
            max: MAX_CATEGORY_LEN,
            actual: category.len(),
        });
    }

    if text.chars().any(|c| c.is_control() && c != '\n') {
        return Err(ValidationError::InvalidFormat(
            "Phrase text contains control characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate a capture file path handed in over the C boundary
pub fn validate_input_file(path: &str) -> Result<PathBuf, ValidationError> {
    if path.is_empty() {
        return Err(ValidationError::InvalidPath(
            "Path cannot be empty".to_string(),
        ));
    }

    if path.contains('\0') {
        return Err(ValidationError::InvalidPath(
            "Path contains null byte".to_string(),
        ));
    }

    let path_buf = PathBuf::from(path);
    if !Path::new(&path_buf).is_file() {
        return Err(ValidationError::InvalidPath(format!(
            "'{}' is not a readable file",
            path
        )));
    }

    Ok(path_buf)
}
