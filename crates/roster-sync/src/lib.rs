//! # roster-sync: Delta Sync Engine for Roster Sync
//!
//! Pulls orgs, terms, people, classes and enrollments from SIS providers, applies
//! the changes to the local store, and runs the queue, cron triggers and
//! locks that decide when each provider syncs.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Control Plane                               │
//! │                                                                         │
//! │  ┌────────────────┐   enqueue   ┌────────────────┐                     │
//! │  │ SyncScheduler  │────────────►│  sync_job_queue│◄──── queue_job()    │
//! │  │ cron triggers  │             │  (roster-db)   │                     │
//! │  └────────────────┘             └───────┬────────┘                     │
//! │                                         │ dequeue (attempts, due,      │
//! │                                         │  priority, FIFO)             │
//! │                                 ┌───────▼────────┐                     │
//! │                                 │  JobProcessor  │  semaphore-bounded  │
//! │                                 │  retry / dead  │  workers            │
//! │                                 └───────┬────────┘                     │
//! │                                         │ run_sync                     │
//! │                                 ┌───────▼────────┐   ┌──────────────┐  │
//! │                                 │  SyncService   │──►│ LockManager  │  │
//! │                                 │  runs, status  │   │ per provider │  │
//! │                                 └───────┬────────┘   └──────────────┘  │
//! │                                         │                              │
//! │                                 ┌───────▼────────┐                     │
//! │                                 │DeltaSyncEngine │  org → term →       │
//! │                                 │ hash, map, diff│  users → class →    │
//! │                                 │                │  enrollment → ...   │
//! │                                 └───────┬────────┘                     │
//! │                                         │ SisProvider                  │
//! │                                         ▼                              │
//! │                                   SIS adapters                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Properties
//!
//! - **Incremental**: delta tokens and page cursors are persisted after every
//!   page, so an interrupted run resumes where it stopped
//! - **Quiet re-runs**: unchanged records are detected by content hash and
//!   never rewritten
//! - **Exclusive**: at most one run per (tenant, provider), across instances
//!   when the database lock backend is used
//! - **Durable jobs**: failed jobs back off exponentially and land in the
//!   dead-letter state once attempts are exhausted

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod engine;
pub mod error;
pub mod lock;
pub mod processor;
pub mod provider;
pub mod scheduler;
pub mod service;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{
    DatabaseSettings, InstanceConfig, LockBackend, PageRetry, ProviderConfig, QueueSettings,
    SchedulerSettings, SyncConfig, SyncSettings,
};
pub use engine::{DeltaSyncConfig, DeltaSyncEngine, DeltaSyncOutcome};
pub use error::{SyncError, SyncResult};
pub use lock::{
    DatabaseLockStore, LockManager, LockRequest, LockStore, MemoryLockStore, ProviderLock,
};
pub use processor::{JobProcessor, JobProcessorHandle};
pub use provider::{
    DeltaPage, DeltaQuery, FetchPage, FetchQuery, MemoryProvider, ProviderFactory, SisProvider,
    SourceRecord, StaticProviderFactory,
};
pub use scheduler::{ScheduledSync, SyncScheduler};
pub use service::{RunSyncOutcome, SyncService, SyncStatusReport};
