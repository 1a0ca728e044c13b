//! # Repository Module
//!
//! Database repository implementations for roster sync.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Who Writes What                                      │
//! │                                                                         │
//! │  DeltaSyncEngine ──► SyncStateRepository   (checkpoint, cursors)       │
//! │                 ├──► EntityRepository      (local roster records)      │
//! │                 ├──► SyncHistoryRepository (append-only audit)         │
//! │                 ├──► SyncErrorRepository   (record-level failures)     │
//! │                 └──► ConflictRepository    (arbitration outcomes)      │
//! │                                                                         │
//! │  SyncService ─────► RunRepository         (runSync records)           │
//! │                 └──► LockRepository        (database lock backend)     │
//! │                                                                         │
//! │  JobProcessor ────► QueueRepository       (claim / retry / dead letter)│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All queries are runtime-checked (`sqlx::query` + `bind`). Rows decode into
//! private `FromRow` structs and are converted to `roster_core` types, with
//! JSON columns parsed here so callers never see raw text.

pub mod audit;
pub mod conflict;
pub mod entity;
pub mod lock;
pub mod queue;
pub mod run;
pub mod state;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{DbError, DbResult};

/// Serialises a value for a JSON column.
pub(crate) fn to_json<T: Serialize>(column: &str, value: &T) -> DbResult<String> {
    serde_json::to_string(value).map_err(|e| DbError::invalid_data(column, e))
}

/// Parses a JSON column.
pub(crate) fn from_json<T: DeserializeOwned>(column: &str, text: &str) -> DbResult<T> {
    serde_json::from_str(text).map_err(|e| DbError::invalid_data(column, e))
}
