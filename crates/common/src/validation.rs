//! Input sanitation for data the relay forwards to the worker
//!
//! Public HTTP callers control paths and headers; these helpers keep control
//! characters and oversized values out of REQUEST frames and worker logs.

use thiserror::Error;

/// Maximum length for HTTP header values
pub const MAX_HEADER_VALUE_LENGTH: usize = 8192;

/// Maximum length for HTTP paths
pub const MAX_PATH_LENGTH: usize = 2048;

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Path too long: {0} bytes (max: {1})")]
    PathTooLong(usize, usize),

    #[error("Header value too long: {0} bytes (max: {1})")]
    HeaderValueTooLong(usize, usize),

    #[error("Invalid header name")]
    InvalidHeaderName,
}

/// Validate and sanitize an HTTP path
///
/// - Removes control characters
/// - Enforces length limits
/// - Ensures path starts with /
///
/// # Examples
///
/// ```
/// use tts_tunnel_common::validation::validate_path;
///
/// assert_eq!(validate_path("api/v1/status").unwrap(), "/api/v1/status");
/// assert_eq!(validate_path("").unwrap(), "/");
/// ```
pub fn validate_path(path: &str) -> Result<String, ValidationError> {
    if path.len() > MAX_PATH_LENGTH {
        return Err(ValidationError::PathTooLong(path.len(), MAX_PATH_LENGTH));
    }

    let sanitized: String = path.chars().filter(|c| !c.is_control()).collect();

    if sanitized.is_empty() {
        Ok("/".to_string())
    } else if sanitized.starts_with('/') {
        Ok(sanitized)
    } else {
        Ok(format!("/{}", sanitized))
    }
}

/// Sanitize an HTTP header value, keeping tabs
pub fn sanitize_header_value(value: &str) -> Result<String, ValidationError> {
    if value.len() > MAX_HEADER_VALUE_LENGTH {
        return Err(ValidationError::HeaderValueTooLong(
            value.len(),
            MAX_HEADER_VALUE_LENGTH,
        ));
    }

    Ok(value
        .chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .collect())
}

/// Sanitize an HTTP header name: ASCII only, lowercased, no control characters
pub fn sanitize_header_name(name: &str) -> Result<String, ValidationError> {
    if !name.is_ascii() {
        return Err(ValidationError::InvalidHeaderName);
    }

    let sanitized: String = name.chars().filter(|c| !c.is_control()).collect();

    if sanitized.is_empty() {
        return Err(ValidationError::InvalidHeaderName);
    }

    Ok(sanitized.to_lowercase())
}
