//! # roster-core: Pure Sync Logic
//!
//! Domain types and deterministic algorithms for incremental SIS roster
//! synchronisation. Nothing in this crate performs I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Roster Sync Architecture                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 apps/sync-daemon (binary)                       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │   roster-sync: engine, job processor, scheduler, locks          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ roster-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐  │   │
//! │  │   │  types  │ │ hashing │ │ mapping │ │conflict │ │schedule │  │   │
//! │  │   │ entity  │ │canonical│ │transform│ │ policy  │ │  cron   │  │   │
//! │  │   │ order   │ │  sha256 │ │ required│ │  diffs  │ │  check  │  │   │
//! │  │   └─────────┘ └─────────┘ └─────────┘ └─────────┘ └─────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    roster-db (SQLite)                           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Entity types, delta records, sync state, jobs, conflicts
//! - [`hashing`] - Canonical JSON and content hashes for change detection
//! - [`mapping`] - Field mappings and transforms
//! - [`conflict`] - Conflict policies and field diffs
//! - [`backoff`] - Job retry delay schedule
//! - [`schedule`] - Cron expression validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use roster_core::hashing::content_hash;
//! use roster_core::SourceData;
//! use serde_json::json;
//!
//! let a = SourceData::from_value(json!({"given": "Ann", "grade": 7})).unwrap();
//! let b = SourceData::from_value(json!({"grade": 7.0, "given": "Ann"})).unwrap();
//!
//! // Key order and integral floats do not affect the hash
//! assert_eq!(content_hash(&a), content_hash(&b));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod backoff;
pub mod conflict;
pub mod error;
pub mod hashing;
pub mod mapping;
pub mod schedule;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, MappingError};
pub use mapping::{FieldMapping, Transform};
pub use schedule::CronExpression;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default page size requested from providers.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default number of attempts before a job is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
