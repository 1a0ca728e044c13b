//! # Error Types
//!
//! Domain-specific error types for roster-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  roster-core errors (this file)                                        │
//! │  ├── CoreError     - Parsing and domain rule failures                  │
//! │  └── MappingError  - Field mapping / transform failures (per record)   │
//! │                                                                         │
//! │  roster-db errors (separate crate)                                     │
//! │  └── DbError       - Database operation failures                       │
//! │                                                                         │
//! │  roster-sync errors (separate crate)                                   │
//! │  └── SyncError     - Run, queue and scheduler failures                 │
//! │                                                                         │
//! │  Flow: MappingError → CoreError → SyncError → job status / sync_error  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A textual enum value (status, entity type, policy) was not recognised.
    #[error("Unknown {kind}: '{value}'")]
    UnknownValue { kind: &'static str, value: String },

    /// A cron trigger expression failed validation.
    ///
    /// ## When This Occurs
    /// - Wrong number of fields (must be exactly 5)
    /// - A value outside the field's range (e.g. minute 61)
    /// - A malformed step or range (`*/0`, `5-2`)
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    /// Source payload was not a JSON object.
    #[error("Invalid source data: {0}")]
    InvalidSourceData(String),

    /// Mapping error (wraps MappingError).
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),
}

impl CoreError {
    /// Creates an UnknownValue error.
    pub fn unknown(kind: &'static str, value: impl Into<String>) -> Self {
        CoreError::UnknownValue {
            kind,
            value: value.into(),
        }
    }

    /// Creates an InvalidCron error.
    pub fn invalid_cron(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::InvalidCron {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Mapping Error
// =============================================================================

/// Field mapping failures.
///
/// These are record-level: the engine logs them against the offending
/// `sourceId` and keeps processing the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    /// A required source field is absent (or null) and has no default.
    #[error("Required field '{field}' is missing")]
    MissingRequiredField { field: String },

    /// A transform could not be applied to the field's value.
    #[error("Transform '{transform}' failed on field '{field}': {reason}")]
    TransformFailed {
        field: String,
        transform: String,
        reason: String,
    },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
