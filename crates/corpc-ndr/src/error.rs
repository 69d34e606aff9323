//! NDR error types

use thiserror::Error;

/// NDR encoding/decoding errors
#[derive(Debug, Error)]
pub enum NdrError {
    #[error("buffer underflow: needed {needed} bytes, have {have}")]
    BufferUnderflow { needed: usize, have: usize },

    #[error("invalid string: {0}")]
    InvalidString(String),

    #[error("invalid pointer: referent id {0}")]
    InvalidPointer(u32),

    #[error("array bounds mismatch: conformance {conformance}, actual {actual}")]
    BoundsMismatch { conformance: u32, actual: u32 },

    #[error("invalid union selector: {0}")]
    InvalidSelector(i64),

    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    #[error("UTF-16 error: lone surrogate")]
    Utf16Error,
}

/// Result type for NDR operations
pub type Result<T> = std::result::Result<T, NdrError>;
