//! # Domain Types
//!
//! Core types shared by every layer of the roster sync engine.
//!
//! ## Entity Dependency Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Entity Processing Order                              │
//! │                                                                         │
//! │  org ─► term ─► teacher ─► student ─► parent ─► class ─► enrollment    │
//! │                                                              │          │
//! │                                  demographic ◄─ relationship ◄┘         │
//! │                                                                         │
//! │  A type is always applied after everything it may reference:           │
//! │  classes reference orgs/terms/teachers, enrollments reference          │
//! │  classes and students, relationships link students and parents.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The declaration order of [`EntityType`] IS the dependency order, so the
//! derived `Ord` sorts entity types into processing order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

// =============================================================================
// Entity Type
// =============================================================================

/// A roster entity kind reported by a SIS.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum EntityType {
    Org,
    Term,
    Teacher,
    Student,
    Parent,
    Class,
    Enrollment,
    Relationship,
    Demographic,
}

impl EntityType {
    /// Every entity type in dependency order.
    pub const ALL: [EntityType; 9] = [
        EntityType::Org,
        EntityType::Term,
        EntityType::Teacher,
        EntityType::Student,
        EntityType::Parent,
        EntityType::Class,
        EntityType::Enrollment,
        EntityType::Relationship,
        EntityType::Demographic,
    ];

    /// Returns the enabled subset in dependency order, deduplicated.
    ///
    /// An empty `enabled` slice means "everything".
    pub fn ordered(enabled: &[EntityType]) -> Vec<EntityType> {
        if enabled.is_empty() {
            return Self::ALL.to_vec();
        }
        Self::ALL
            .iter()
            .copied()
            .filter(|t| enabled.contains(t))
            .collect()
    }

    /// The user role a full-fetch `fetchUsers` call filters by, if this
    /// entity type is a kind of user.
    pub fn user_role(&self) -> Option<&'static str> {
        match self {
            EntityType::Teacher => Some("teacher"),
            EntityType::Student => Some("student"),
            EntityType::Parent => Some("parent"),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Org => "org",
            EntityType::Term => "term",
            EntityType::Teacher => "teacher",
            EntityType::Student => "student",
            EntityType::Parent => "parent",
            EntityType::Class => "class",
            EntityType::Enrollment => "enrollment",
            EntityType::Relationship => "relationship",
            EntityType::Demographic => "demographic",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "org" | "orgs" | "school" => Ok(EntityType::Org),
            "term" | "terms" | "academic_session" => Ok(EntityType::Term),
            "teacher" | "teachers" => Ok(EntityType::Teacher),
            "student" | "students" => Ok(EntityType::Student),
            "parent" | "parents" | "guardian" => Ok(EntityType::Parent),
            "class" | "classes" | "section" => Ok(EntityType::Class),
            "enrollment" | "enrollments" => Ok(EntityType::Enrollment),
            "relationship" | "relationships" => Ok(EntityType::Relationship),
            "demographic" | "demographics" => Ok(EntityType::Demographic),
            other => Err(CoreError::unknown("entity type", other)),
        }
    }
}

// =============================================================================
// Delta Records
// =============================================================================

/// The kind of change a provider reports for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum DeltaOperation {
    Create,
    Update,
    Delete,
    /// Association added (e.g. student linked to a class). Applied as an upsert.
    Link,
    /// Association removed. Applied as an upsert of the association record.
    Unlink,
}

impl DeltaOperation {
    pub fn is_delete(&self) -> bool {
        matches!(self, DeltaOperation::Delete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaOperation::Create => "create",
            DeltaOperation::Update => "update",
            DeltaOperation::Delete => "delete",
            DeltaOperation::Link => "link",
            DeltaOperation::Unlink => "unlink",
        }
    }
}

impl fmt::Display for DeltaOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque key/value payload of a source record.
///
/// Backed by a `BTreeMap` so iteration (and therefore hashing) is always in
/// lexicographic key order. See [`crate::hashing`] for the canonical form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceData(BTreeMap<String, Value>);

impl SourceData {
    pub fn new() -> Self {
        SourceData(BTreeMap::new())
    }

    /// Builds source data from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Object(map) => Ok(SourceData(map.into_iter().collect())),
            Value::Null => Ok(SourceData::new()),
            other => Err(CoreError::InvalidSourceData(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.0
    }

    /// Converts into a `serde_json::Value::Object`.
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect())
    }
}

impl From<BTreeMap<String, Value>> for SourceData {
    fn from(map: BTreeMap<String, Value>) -> Self {
        SourceData(map)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for SourceData {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        SourceData(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One change reported by a provider during a sync pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaRecord {
    pub entity_type: EntityType,
    pub operation: DeltaOperation,
    pub source_id: String,
    #[serde(default)]
    pub source_data: SourceData,
    /// Hash reported by the provider. The engine ignores it and hashes
    /// `source_data` itself.
    #[serde(default)]
    pub current_hash: Option<String>,
    /// When the change happened at the source.
    pub timestamp: DateTime<Utc>,
}

impl DeltaRecord {
    /// Creates an upsert-style record (`create`/`update`/`link`/`unlink`).
    pub fn upsert(
        entity_type: EntityType,
        operation: DeltaOperation,
        source_id: impl Into<String>,
        source_data: SourceData,
        timestamp: DateTime<Utc>,
    ) -> Self {
        DeltaRecord {
            entity_type,
            operation,
            source_id: source_id.into(),
            source_data,
            current_hash: None,
            timestamp,
        }
    }

    /// Creates a delete record.
    pub fn delete(
        entity_type: EntityType,
        source_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        DeltaRecord {
            entity_type,
            operation: DeltaOperation::Delete,
            source_id: source_id.into(),
            source_data: SourceData::new(),
            current_hash: None,
            timestamp,
        }
    }
}

// =============================================================================
// Sync State
// =============================================================================

/// Lifecycle status of a (tenant, provider) sync state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum SyncStateStatus {
    #[default]
    Idle,
    Syncing,
    Error,
    /// A run was cancelled; cursors are kept so the next run resumes.
    Paused,
}

impl fmt::Display for SyncStateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStateStatus::Idle => "idle",
            SyncStateStatus::Syncing => "syncing",
            SyncStateStatus::Error => "error",
            SyncStateStatus::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// Per-run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncStats {
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
    pub errors: u64,
    pub conflicts: u64,
}

impl SyncStats {
    /// Adds another set of counters into this one.
    pub fn merge(&mut self, other: &SyncStats) {
        self.creates += other.creates;
        self.updates += other.updates;
        self.deletes += other.deletes;
        self.errors += other.errors;
        self.conflicts += other.conflicts;
    }

    /// Total number of records that changed local state.
    pub fn changes(&self) -> u64 {
        self.creates + self.updates + self.deletes
    }
}

/// Checkpoint for one (tenant, provider) pair.
///
/// Created on the first sync attempt, mutated only by the delta sync engine,
/// never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub tenant_id: String,
    pub provider_id: String,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_delta_token: Option<String>,
    /// Entity type name → opaque continuation cursor.
    pub entity_cursors: BTreeMap<String, String>,
    pub status: SyncStateStatus,
    pub stats: SyncStats,
    pub error_message: Option<String>,
    /// Write counter; a save against a stale revision is rejected.
    #[serde(default)]
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncState {
    /// A fresh state: no checkpoint, idle.
    pub fn new(tenant_id: impl Into<String>, provider_id: impl Into<String>) -> Self {
        let now = Utc::now();
        SyncState {
            tenant_id: tenant_id.into(),
            provider_id: provider_id.into(),
            last_sync_time: None,
            last_delta_token: None,
            entity_cursors: BTreeMap::new(),
            status: SyncStateStatus::Idle,
            stats: SyncStats::default(),
            error_message: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn cursor(&self, entity_type: EntityType) -> Option<&str> {
        self.entity_cursors
            .get(entity_type.as_str())
            .map(String::as_str)
    }

    pub fn set_cursor(&mut self, entity_type: EntityType, cursor: impl Into<String>) {
        self.entity_cursors
            .insert(entity_type.as_str().to_string(), cursor.into());
    }

    pub fn clear_cursor(&mut self, entity_type: EntityType) {
        self.entity_cursors.remove(entity_type.as_str());
    }
}

// =============================================================================
// Local Entities
// =============================================================================

/// A roster record as stored locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEntity {
    pub id: String,
    pub tenant_id: String,
    pub provider_id: String,
    pub entity_type: EntityType,
    pub source_id: String,
    /// Mapped fields.
    pub data: SourceData,
    /// Hash of the raw source payload last applied.
    pub source_hash: String,
    pub last_synced_at: DateTime<Utc>,
    /// Set by local edits, cleared when a sync write lands.
    pub local_modified_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocalEntity {
    /// True if the record was edited locally after its last sync write.
    pub fn is_locally_modified(&self) -> bool {
        self.local_modified_at
            .map_or(false, |modified| modified > self.last_synced_at)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

// =============================================================================
// Audit Trail
// =============================================================================

/// What happened to a record when it was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum HistoryOutcome {
    /// Local state changed.
    Applied,
    /// Hash matched; nothing written to the entity.
    Unchanged,
    /// Held for manual conflict resolution.
    ConflictPending,
    /// Conflict resolved in favour of local data.
    KeptLocal,
    /// Soft-deleted by a reconciliation pass.
    Reconciled,
}

/// One append-only audit row. Every applied delta record produces exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    pub id: String,
    pub tenant_id: String,
    pub provider_id: String,
    pub sync_run_id: Option<String>,
    pub entity_type: EntityType,
    pub source_id: String,
    /// `create`, `update` or `delete`.
    pub operation: DeltaOperation,
    pub outcome: HistoryOutcome,
    pub changed_fields: u32,
    pub payload: Value,
    pub source_hash: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// A record-level failure logged during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncErrorEntry {
    pub id: String,
    pub tenant_id: String,
    pub provider_id: String,
    pub sync_run_id: Option<String>,
    pub entity_type: EntityType,
    pub source_id: String,
    pub message: String,
    pub payload: Option<Value>,
    pub recorded_at: DateTime<Utc>,
}

// =============================================================================
// Conflicts
// =============================================================================

/// How an incoming change meets a locally modified record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Apply incoming unconditionally; no conflict is recorded.
    #[default]
    SourceWins,
    /// Keep local data; record a conflict resolved to target.
    TargetWins,
    /// Compare timestamps; record a conflict resolved to the winner.
    NewestWins,
    /// Record a pending conflict; apply nothing until resolved.
    Manual,
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictPolicy::SourceWins => "source_wins",
            ConflictPolicy::TargetWins => "target_wins",
            ConflictPolicy::NewestWins => "newest_wins",
            ConflictPolicy::Manual => "manual",
        };
        f.write_str(s)
    }
}

impl FromStr for ConflictPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "source_wins" | "source" => Ok(ConflictPolicy::SourceWins),
            "target_wins" | "target" | "local_wins" => Ok(ConflictPolicy::TargetWins),
            "newest_wins" | "newest" => Ok(ConflictPolicy::NewestWins),
            "manual" => Ok(ConflictPolicy::Manual),
            other => Err(CoreError::unknown("conflict policy", other)),
        }
    }
}

/// Which differing fields a conflict row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictScope {
    /// Only the first differing field in key order.
    #[default]
    FirstField,
    /// Every differing field, collected into one conflict row.
    AllFields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum ConflictStatus {
    Pending,
    Resolved,
}

/// Disposition of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum ConflictResolution {
    Source,
    Target,
    Manual,
}

impl FromStr for ConflictResolution {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "source" => Ok(ConflictResolution::Source),
            "target" => Ok(ConflictResolution::Target),
            "manual" => Ok(ConflictResolution::Manual),
            other => Err(CoreError::unknown("conflict resolution", other)),
        }
    }
}

/// A disagreement between an incoming change and local edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub id: String,
    pub tenant_id: String,
    pub provider_id: String,
    pub entity_type: EntityType,
    /// Local entity id.
    pub entity_id: String,
    pub source_id: String,
    /// Field name, or a comma-joined list when scoped to all fields.
    pub field: String,
    pub source_value: Value,
    pub target_value: Value,
    pub status: ConflictStatus,
    pub resolution: Option<ConflictResolution>,
    /// Raw source payload and hash, kept so a later `source` resolution can
    /// apply the full incoming record.
    pub source_payload: Value,
    pub source_hash: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Jobs and Runs
// =============================================================================

/// Job queue states.
///
/// ```text
/// pending ──► processing ──► completed (row removed)
///                 │
///                 ├──► retrying ──► processing ...
///                 │
///                 └──► failed (dead letter, held for operator retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
        };
        f.write_str(s)
    }
}

/// A queued sync job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: String,
    pub tenant_id: String,
    pub provider_id: String,
    /// Empty means "all types the provider is configured for".
    pub entity_types: Vec<EntityType>,
    pub priority: i32,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Earliest time the job may be claimed.
    pub scheduled_at: DateTime<Utc>,
    pub error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncJob {
    /// True once the job has used up its attempts.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Parameters for enqueueing a job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub tenant_id: String,
    pub provider_id: String,
    pub entity_types: Option<Vec<EntityType>>,
    pub priority: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl JobRequest {
    pub fn new(tenant_id: impl Into<String>, provider_id: impl Into<String>) -> Self {
        JobRequest {
            tenant_id: tenant_id.into(),
            provider_id: provider_id.into(),
            entity_types: None,
            priority: 0,
            scheduled_at: None,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn entity_types(mut self, types: Vec<EntityType>) -> Self {
        self.entity_types = Some(types);
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

/// Terminal (or running) status of one `runSync` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum RunStatus {
    Running,
    /// Completed with no record errors.
    Success,
    /// Completed, but some records failed.
    Partial,
    Failure,
    Cancelled,
}

impl RunStatus {
    /// Terminal status for a completed run with the given counters.
    pub fn from_stats(stats: &SyncStats) -> Self {
        if stats.errors > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Success
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Success => "SUCCESS",
            RunStatus::Partial => "PARTIAL",
            RunStatus::Failure => "FAILURE",
            RunStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// One `runSync` invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: String,
    pub tenant_id: String,
    pub provider_id: String,
    pub job_id: Option<String>,
    pub status: RunStatus,
    pub stats: SyncStats,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Locks
// =============================================================================

/// Result of trying to take a per-provider lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAcquisition {
    Acquired,
    /// Another live holder owns the provider lock.
    AlreadyHeld { holder: String },
    /// The tenant already has `limit` providers syncing.
    TenantLimitReached { limit: u32 },
}

impl LockAcquisition {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockAcquisition::Acquired)
    }
}

/// Key for the lock that serialises runs of one provider.
pub fn provider_lock_key(tenant_id: &str, provider_id: &str) -> String {
    format!("sync:{}:{}", tenant_id, provider_id)
}
