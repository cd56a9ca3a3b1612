//! Error types for record decoding.

use thiserror::Error;

pub type RecordResult<T> = Result<T, RecordError>;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid record format: {0}")]
    InvalidFormat(String),

    #[error("invalid section {section}: {reason}")]
    InvalidSection { section: u8, reason: String },

    #[error("missing section {0}")]
    MissingSection(u8),

    #[error("unsupported template {template} in section {section}")]
    UnsupportedTemplate { section: u8, template: u16 },

    #[error("unpacking error: {0}")]
    Unpacking(String),

    #[error("record truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

impl RecordError {
    pub(crate) fn section(section: u8, reason: impl Into<String>) -> Self {
        Self::InvalidSection {
            section,
            reason: reason.into(),
        }
    }
}
