//! Error taxonomy
//!
//! `VisionError` covers the detector/recognizer adapters and is always
//! absorbed at the pipeline boundary. `RegistryError` is operational and
//! propagates to the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisionError {
    /// Detector model not loaded (missing asset, probe failed)
    #[error("detector model unavailable: {0}")]
    ModelUnavailable(String),

    /// Detector was available but inference failed
    #[error("detection failed: {0}")]
    Detection(String),

    /// OCR call exceeded its deadline
    #[error("recognition timed out after {0} ms")]
    RecognitionTimeout(u64),

    /// OCR transport error, non-2xx, malformed body or provider-reported error
    #[error("recognition service error: {0}")]
    RecognitionService(String),

    /// Empty or undecodable image
    #[error("invalid upload: {0}")]
    InvalidUpload(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Store unreachable or a query failed
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    /// Unique key violation (plate already mapped)
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<rusqlite::Error> for RegistryError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::ConstraintViolation) => RegistryError::Conflict(e.to_string()),
            _ => RegistryError::Unavailable(e.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for RegistryError {
    fn from(e: tokio::task::JoinError) -> Self {
        RegistryError::Unavailable(format!("registry task failed: {e}"))
    }
}
