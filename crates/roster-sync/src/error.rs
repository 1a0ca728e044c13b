//! # Sync Error Types
//!
//! Error types for sync runs, the job queue and the scheduler.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Provider     │  │     Contention          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Unavailable    │  │  AlreadyInProgress      │ │
//! │  │  UnknownProvider│  │  RateLimited    │  │  TenantLimitReached     │ │
//! │  │  ConfigLoad     │  │  Rejected       │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Database     │  │    Scheduler    │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  DatabaseError  │  │  InvalidSchedule│  │  ChannelError           │ │
//! │  │  Mapping        │  │  SchedulerError │  │  SerializationFailed    │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `is_retryable()` drives both in-run page retries and the processor's
//! choice between rescheduling a job and dead-lettering it.

use thiserror::Error;

use roster_core::{CoreError, MappingError};

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering run, queue and scheduler failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// No provider is configured for (tenant, provider).
    #[error("Unknown provider '{provider_id}' for tenant '{tenant_id}'")]
    UnknownProvider {
        tenant_id: String,
        provider_id: String,
    },

    // =========================================================================
    // Provider Errors
    // =========================================================================
    /// The SIS could not be reached or returned a server error.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The SIS rejected the request (bad credentials, bad filter, ...).
    #[error("Provider rejected request: {0}")]
    ProviderRejected(String),

    /// The SIS asked us to slow down.
    #[error("Provider rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// The provider does not implement an operation.
    #[error("Provider does not support {operation}")]
    Unsupported { operation: String },

    /// A page said more data follows but gave no cursor to fetch it with.
    #[error("Provider reported more {entity_type} pages without a cursor")]
    MissingCursor { entity_type: String },

    // =========================================================================
    // Database & Mapping Errors
    // =========================================================================
    /// Database query failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Field mapping failed for a record.
    #[error("Mapping failed: {0}")]
    Mapping(#[from] MappingError),

    /// Domain validation failed (bad enum text, bad source payload).
    #[error("Invalid data: {0}")]
    InvalidData(String),

    // =========================================================================
    // Contention Errors
    // =========================================================================
    /// Another run holds the provider lock.
    #[error("Sync already in progress for {tenant_id}/{provider_id} (held by {holder})")]
    AlreadyInProgress {
        tenant_id: String,
        provider_id: String,
        holder: String,
    },

    /// The tenant already has the maximum number of providers syncing.
    #[error("Tenant '{tenant_id}' already has {limit} syncs running")]
    TenantLimitReached { tenant_id: String, limit: u32 },

    // =========================================================================
    // Scheduler Errors
    // =========================================================================
    /// A trigger expression was rejected.
    #[error("Invalid schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    /// The cron backend failed.
    #[error("Scheduler error: {0}")]
    SchedulerError(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Failed to serialize a payload.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<roster_db::DbError> for SyncError {
    fn from(err: roster_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Mapping(e) => SyncError::Mapping(e),
            CoreError::InvalidCron { expression, reason } => {
                SyncError::InvalidSchedule { expression, reason }
            }
            other => SyncError::InvalidData(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for SyncError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        SyncError::SchedulerError(format!("{err:?}"))
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the failed operation may succeed when retried.
    ///
    /// ## Retryable Errors
    /// - Provider outages and rate limits
    /// - Database errors (busy, pool exhausted)
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors, unknown providers
    /// - Requests the provider rejected outright
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ProviderUnavailable(_)
                | SyncError::RateLimited { .. }
                | SyncError::DatabaseError(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::UnknownProvider { .. }
                | SyncError::InvalidSchedule { .. }
        )
    }

    /// Returns true if the run never started because of lock contention.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            SyncError::AlreadyInProgress { .. } | SyncError::TenantLimitReached { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ProviderUnavailable("503".into()).is_retryable());
        assert!(SyncError::RateLimited { retry_after_ms: 500 }.is_retryable());
        assert!(SyncError::DatabaseError("database is locked".into()).is_retryable());

        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!SyncError::ProviderRejected("401".into()).is_retryable());
        assert!(!SyncError::MissingCursor {
            entity_type: "student".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_config_and_contention_categories() {
        let unknown = SyncError::UnknownProvider {
            tenant_id: "t1".into(),
            provider_id: "nope".into(),
        };
        assert!(unknown.is_config_error());
        assert!(!unknown.is_retryable());

        let busy = SyncError::AlreadyInProgress {
            tenant_id: "t1".into(),
            provider_id: "p1".into(),
            holder: "node-a:run-1".into(),
        };
        assert!(busy.is_contention());
        assert!(busy.to_string().contains("already in progress"));
    }

    #[test]
    fn test_core_error_conversion() {
        let err: SyncError = CoreError::invalid_cron("* *", "expected 5 fields").into();
        assert!(matches!(err, SyncError::InvalidSchedule { .. }));

        let err: SyncError = CoreError::from(MappingError::MissingRequiredField {
            field: "email".into(),
        })
        .into();
        assert!(matches!(err, SyncError::Mapping(_)));
    }
}
