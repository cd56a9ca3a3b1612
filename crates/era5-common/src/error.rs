//! Error taxonomy for the conversion pipeline.

use thiserror::Error;

use crate::coordinate::Coordinate;

/// Result type alias using ConversionError.
pub type ConversionResult<T> = Result<T, ConversionError>;

/// How far a failure propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Aborts the whole run before any work starts.
    Run,
    /// Aborts everything touching the affected store.
    Store,
    /// Affects a single coordinate; sibling partitions continue.
    Coordinate,
    /// Aborts the enclosing merge.
    Merge,
    /// Aborts a single regrid request.
    Request,
}

/// Primary error type for conversion operations.
#[derive(Debug, Error)]
pub enum ConversionError {
    // === Static configuration ===
    #[error("configuration error: {0}")]
    Configuration(String),

    // === Per-coordinate ===
    #[error("no record for {variable} at {coordinate}")]
    MissingRecord {
        variable: String,
        coordinate: Coordinate,
    },

    #[error("failed to decode {variable} at {coordinate}: {reason}")]
    Decode {
        variable: String,
        coordinate: Coordinate,
        reason: String,
    },

    // === Store level ===
    #[error("chunk {chunk_index} of {store}/{variable} already exists with different content")]
    ChunkConflict {
        store: String,
        variable: String,
        chunk_index: u64,
    },

    #[error("schema mismatch for store {store}: {reason}")]
    SchemaMismatch { store: String, reason: String },

    #[error("storage error: {0}")]
    Storage(String),

    // === Merge level ===
    #[error("incompatible {axis} axes: {reason}")]
    IncompatibleAxes { axis: String, reason: String },

    #[error("variable {variable} declared with conflicting schemas: {reason}")]
    VariableCollision { variable: String, reason: String },

    #[error("store {store} changed while merging (metadata version {before} -> {after})")]
    ConcurrentModification { store: String, before: u64, after: u64 },

    // === Regrid ===
    #[error("no transform defined from {from} to {to}")]
    UnsupportedGrid { from: String, to: String },
}

impl ConversionError {
    /// Stable name of the error class, used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::MissingRecord { .. } => "MissingRecordError",
            Self::Decode { .. } => "DecodeError",
            Self::ChunkConflict { .. } => "ChunkConflictError",
            Self::SchemaMismatch { .. } => "SchemaMismatchError",
            Self::Storage(_) => "StorageError",
            Self::IncompatibleAxes { .. } => "IncompatibleAxesError",
            Self::VariableCollision { .. } => "VariableCollisionError",
            Self::ConcurrentModification { .. } => "ConcurrentModificationError",
            Self::UnsupportedGrid { .. } => "UnsupportedGridError",
        }
    }

    /// How far this error propagates.
    pub fn scope(&self) -> ErrorScope {
        match self {
            Self::Configuration(_) => ErrorScope::Run,
            Self::MissingRecord { .. } | Self::Decode { .. } => ErrorScope::Coordinate,
            Self::ChunkConflict { .. } | Self::SchemaMismatch { .. } | Self::Storage(_) => {
                ErrorScope::Store
            }
            Self::IncompatibleAxes { .. }
            | Self::VariableCollision { .. }
            | Self::ConcurrentModification { .. } => ErrorScope::Merge,
            Self::UnsupportedGrid { .. } => ErrorScope::Request,
        }
    }

    /// Create a Configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a Storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a SchemaMismatch error.
    pub fn schema_mismatch(store: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            store: store.into(),
            reason: reason.into(),
        }
    }

    /// Create an IncompatibleAxes error.
    pub fn incompatible_axes(axis: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IncompatibleAxes {
            axis: axis.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for ConversionError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ConversionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("JSON error: {}", err))
    }
}
