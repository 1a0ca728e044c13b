//! # roster-db: Database Layer for Roster Sync
//!
//! SQLite persistence for the sync engine, job queue and locks, using sqlx
//! for async access.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Roster Sync Data Flow                            │
//! │                                                                         │
//! │  DeltaSyncEngine / JobProcessor / SyncScheduler                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     roster-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ SyncState     │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ Entity        │    │ 001_roster_  │  │   │
//! │  │   │ Connection    │    │ History/Error │    │   sync.sql   │  │   │
//! │  │   │ Management    │    │ Conflict      │    │              │  │   │
//! │  │   │               │    │ Queue/Run/Lock│    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use roster_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("roster.db")).await?;
//!
//! let state = db.sync_state().get_or_create("tenant-1", "clever").await?;
//! let job = db.queue().dequeue(chrono::Utc::now()).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::audit::{SyncErrorRepository, SyncHistoryRepository};
pub use repository::conflict::ConflictRepository;
pub use repository::entity::EntityRepository;
pub use repository::lock::{LockHolder, LockRepository};
pub use repository::queue::QueueRepository;
pub use repository::run::RunRepository;
pub use repository::state::SyncStateRepository;
