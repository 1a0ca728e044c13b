//! # Scripted In-Memory Provider
//!
//! A [`SisProvider`] backed by an in-process record set. Tests script it
//! directly; the daemon loads one per `[[providers]]` entry from a JSON
//! fixture.
//!
//! ## Delta Model
//! ```text
//! every upsert/delete bumps a global sequence number
//!
//!   delta token  = sequence at the time of the fetch
//!   cursor       = offset into the changes newer than the caller's token
//!
//!   token absent → snapshot of live records (no tombstones)
//!   token = n    → every change with seq > n, deletes included
//! ```
//!
//! `remove_silently` drops a record without a tombstone, which only a
//! reconciliation pass can notice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use roster_core::{DeltaOperation, DeltaRecord, EntityType, SourceData};

use super::{DeltaPage, DeltaQuery, FetchPage, FetchQuery, SisProvider, SourceRecord};
use crate::error::{SyncError, SyncResult};

/// Kind of failure to inject into the next fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Retryable outage.
    Unavailable,
    /// Permanent rejection.
    Rejected,
}

#[derive(Debug, Clone)]
struct StoredRecord {
    data: SourceData,
    created_seq: u64,
    seq: u64,
    updated_at: DateTime<Utc>,
    deleted: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    seq: u64,
    records: BTreeMap<EntityType, BTreeMap<String, StoredRecord>>,
    fetch_log: Vec<EntityType>,
    fail_remaining: u32,
    fail_mode: Option<FailureMode>,
    fetch_calls: u64,
}

impl MemoryState {
    fn upsert(&mut self, entity_type: EntityType, source_id: &str, data: SourceData, at: DateTime<Utc>) {
        self.seq += 1;
        let seq = self.seq;
        let records = self.records.entry(entity_type).or_default();
        match records.get_mut(source_id) {
            Some(existing) => {
                existing.data = data;
                existing.seq = seq;
                existing.updated_at = at;
                if existing.deleted {
                    existing.deleted = false;
                    existing.created_seq = seq;
                }
            }
            None => {
                records.insert(
                    source_id.to_string(),
                    StoredRecord {
                        data,
                        created_seq: seq,
                        seq,
                        updated_at: at,
                        deleted: false,
                    },
                );
            }
        }
    }

    fn take_failure(&mut self) -> Option<SyncError> {
        if self.fail_remaining == 0 {
            return None;
        }
        self.fail_remaining -= 1;
        match self.fail_mode? {
            FailureMode::Unavailable => Some(SyncError::ProviderUnavailable(
                "scripted outage".into(),
            )),
            FailureMode::Rejected => Some(SyncError::ProviderRejected(
                "scripted rejection".into(),
            )),
        }
    }

    fn live(&self, entity_type: EntityType) -> Vec<(&String, &StoredRecord)> {
        self.records
            .get(&entity_type)
            .map(|records| records.iter().filter(|(_, r)| !r.deleted).collect())
            .unwrap_or_default()
    }
}

/// Scripted SIS adapter.
#[derive(Debug)]
pub struct MemoryProvider {
    name: String,
    supports_delta: bool,
    supports_deletion_detection: bool,
    rate_limit_delay: Option<Duration>,
    fetch_delay: Option<Duration>,
    state: Mutex<MemoryState>,
}

impl MemoryProvider {
    /// A delta-capable provider with deletion detection.
    pub fn new(name: impl Into<String>) -> Self {
        MemoryProvider {
            name: name.into(),
            supports_delta: true,
            supports_deletion_detection: true,
            rate_limit_delay: None,
            fetch_delay: None,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn with_delta(mut self, supported: bool) -> Self {
        self.supports_delta = supported;
        self
    }

    pub fn with_deletion_detection(mut self, supported: bool) -> Self {
        self.supports_deletion_detection = supported;
        self
    }

    pub fn with_rate_limit(mut self, delay: Duration) -> Self {
        self.rate_limit_delay = Some(delay);
        self
    }

    /// Adds latency to every page fetch.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Seeds a record while building the provider.
    pub fn with_record(
        mut self,
        entity_type: EntityType,
        source_id: impl Into<String>,
        data: SourceData,
    ) -> Self {
        let source_id = source_id.into();
        self.state
            .get_mut()
            .upsert(entity_type, &source_id, data, Utc::now());
        self
    }

    /// Loads a provider from a JSON fixture file.
    ///
    /// ```json
    /// {
    ///   "name": "clever",
    ///   "supports_delta": true,
    ///   "supports_deletion_detection": true,
    ///   "rate_limit_ms": 0,
    ///   "records": {
    ///     "org": [{ "source_id": "org-1", "data": { "name": "Lincoln High" } }]
    ///   }
    /// }
    /// ```
    pub fn from_fixture(path: &Path) -> SyncResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::InvalidConfig(format!("Cannot read fixture {}: {}", path.display(), e))
        })?;
        let fixture: Fixture = serde_json::from_str(&contents).map_err(|e| {
            SyncError::InvalidConfig(format!("Invalid fixture {}: {}", path.display(), e))
        })?;

        let mut provider = MemoryProvider::new(fixture.name)
            .with_delta(fixture.supports_delta)
            .with_deletion_detection(fixture.supports_deletion_detection);
        if fixture.rate_limit_ms > 0 {
            provider = provider.with_rate_limit(Duration::from_millis(fixture.rate_limit_ms));
        }

        let mut count = 0;
        for (type_name, records) in fixture.records {
            let entity_type: EntityType = type_name.parse()?;
            for record in records {
                let at = record.updated_at.unwrap_or_else(Utc::now);
                provider
                    .state
                    .get_mut()
                    .upsert(entity_type, &record.source_id, record.data, at);
                count += 1;
            }
        }

        debug!(path = %path.display(), records = count, "Loaded provider fixture");
        Ok(provider)
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    /// Creates or changes a record, stamped now.
    pub async fn upsert(&self, entity_type: EntityType, source_id: &str, data: SourceData) {
        self.upsert_at(entity_type, source_id, data, Utc::now()).await;
    }

    /// Creates or changes a record with an explicit source timestamp.
    pub async fn upsert_at(
        &self,
        entity_type: EntityType,
        source_id: &str,
        data: SourceData,
        at: DateTime<Utc>,
    ) {
        self.state.lock().await.upsert(entity_type, source_id, data, at);
    }

    /// Deletes a record and leaves a tombstone for delta fetches.
    pub async fn delete(&self, entity_type: EntityType, source_id: &str) {
        let mut state = self.state.lock().await;
        state.seq += 1;
        let seq = state.seq;
        if let Some(record) = state
            .records
            .get_mut(&entity_type)
            .and_then(|records| records.get_mut(source_id))
        {
            record.deleted = true;
            record.seq = seq;
            record.updated_at = Utc::now();
        }
    }

    /// Drops a record without any delta trace.
    pub async fn remove_silently(&self, entity_type: EntityType, source_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(records) = state.records.get_mut(&entity_type) {
            records.remove(source_id);
        }
    }

    /// Makes the next `times` page fetches fail.
    pub async fn fail_next(&self, times: u32, mode: FailureMode) {
        let mut state = self.state.lock().await;
        state.fail_remaining = times;
        state.fail_mode = Some(mode);
    }

    /// Entity types in the order their pages were requested.
    pub async fn fetch_log(&self) -> Vec<EntityType> {
        self.state.lock().await.fetch_log.clone()
    }

    /// Total page fetch attempts, failed ones included.
    pub async fn fetch_calls(&self) -> u64 {
        self.state.lock().await.fetch_calls
    }

    async fn before_fetch(&self, entity_type: EntityType) -> SyncResult<()> {
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().await;
        state.fetch_calls += 1;
        if let Some(err) = state.take_failure() {
            return Err(err);
        }
        state.fetch_log.push(entity_type);
        Ok(())
    }

    async fn full_page(&self, entity_type: EntityType, query: &FetchQuery) -> SyncResult<FetchPage> {
        self.before_fetch(entity_type).await?;
        let state = self.state.lock().await;

        let live = state.live(entity_type);
        let offset = parse_cursor(query.cursor.as_deref())?;
        let limit = query.limit.max(1);
        let end = (offset + limit).min(live.len());

        let records = live
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|(id, r)| SourceRecord {
                source_id: (*id).clone(),
                data: r.data.clone(),
                updated_at: Some(r.updated_at),
            })
            .collect();
        let has_more = end < live.len();

        Ok(FetchPage {
            records,
            has_more,
            next_cursor: has_more.then(|| end.to_string()),
        })
    }
}

fn parse_cursor(cursor: Option<&str>) -> SyncResult<usize> {
    match cursor {
        None => Ok(0),
        Some(c) => c
            .parse()
            .map_err(|_| SyncError::ProviderRejected(format!("invalid cursor '{}'", c))),
    }
}

#[async_trait]
impl SisProvider for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_delta(&self) -> bool {
        self.supports_delta
    }

    fn supports_deletion_detection(&self) -> bool {
        self.supports_deletion_detection
    }

    fn rate_limit_delay(&self) -> Option<Duration> {
        self.rate_limit_delay
    }

    async fn fetch_delta(&self, entity_type: EntityType, query: &DeltaQuery) -> SyncResult<DeltaPage> {
        if !self.supports_delta {
            return Err(SyncError::Unsupported {
                operation: "fetch_delta".into(),
            });
        }
        self.before_fetch(entity_type).await?;
        let state = self.state.lock().await;

        let baseline = match query.delta_token.as_deref() {
            None => None,
            Some(token) => Some(token.parse::<u64>().map_err(|_| {
                SyncError::ProviderRejected(format!("invalid delta token '{}'", token))
            })?),
        };

        let mut changes: Vec<(&String, &StoredRecord)> = state
            .records
            .get(&entity_type)
            .map(|records| {
                records
                    .iter()
                    .filter(|(_, r)| match baseline {
                        None => !r.deleted,
                        Some(b) => r.seq > b,
                    })
                    .collect()
            })
            .unwrap_or_default();
        changes.sort_by_key(|(_, r)| r.seq);

        let offset = parse_cursor(query.cursor.as_deref())?;
        let limit = query.limit.max(1);
        let end = (offset + limit).min(changes.len());

        let records = changes
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|(id, r)| {
                if r.deleted {
                    DeltaRecord::delete(entity_type, (*id).clone(), r.updated_at)
                } else {
                    let operation = match baseline {
                        Some(b) if r.created_seq <= b => DeltaOperation::Update,
                        _ => DeltaOperation::Create,
                    };
                    DeltaRecord::upsert(entity_type, operation, (*id).clone(), r.data.clone(), r.updated_at)
                }
            })
            .collect();
        let has_more = end < changes.len();

        Ok(DeltaPage {
            records,
            has_more,
            next_cursor: has_more.then(|| end.to_string()),
            delta_token: Some(state.seq.to_string()),
        })
    }

    async fn get_all_source_ids(
        &self,
        entity_type: EntityType,
        _filters: &BTreeMap<String, String>,
    ) -> SyncResult<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .live(entity_type)
            .into_iter()
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn fetch_orgs(&self, query: &FetchQuery) -> SyncResult<FetchPage> {
        self.full_page(EntityType::Org, query).await
    }

    async fn fetch_users(&self, query: &FetchQuery) -> SyncResult<FetchPage> {
        let entity_type = match query.role.as_deref() {
            Some("teacher") => EntityType::Teacher,
            Some("student") => EntityType::Student,
            Some("parent") => EntityType::Parent,
            other => {
                return Err(SyncError::ProviderRejected(format!(
                    "unknown user role {:?}",
                    other
                )))
            }
        };
        self.full_page(entity_type, query).await
    }

    async fn fetch_classes(&self, query: &FetchQuery) -> SyncResult<FetchPage> {
        self.full_page(EntityType::Class, query).await
    }

    async fn fetch_enrollments(&self, query: &FetchQuery) -> SyncResult<FetchPage> {
        self.full_page(EntityType::Enrollment, query).await
    }
}

// =============================================================================
// Fixture Format
// =============================================================================

#[derive(Debug, Deserialize)]
struct Fixture {
    name: String,
    #[serde(default = "default_true")]
    supports_delta: bool,
    #[serde(default = "default_true")]
    supports_deletion_detection: bool,
    #[serde(default)]
    rate_limit_ms: u64,
    #[serde(default)]
    records: BTreeMap<String, Vec<FixtureRecord>>,
}

#[derive(Debug, Deserialize)]
struct FixtureRecord {
    source_id: String,
    #[serde(default)]
    data: SourceData,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(v: serde_json::Value) -> SourceData {
        SourceData::from_value(v).unwrap()
    }

    fn query(token: Option<&str>, cursor: Option<&str>, limit: usize) -> DeltaQuery {
        DeltaQuery {
            delta_token: token.map(str::to_string),
            cursor: cursor.map(str::to_string),
            limit,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_snapshot_then_delta() {
        let provider = MemoryProvider::new("mem")
            .with_record(EntityType::Student, "s1", data(json!({"n": 1})))
            .with_record(EntityType::Student, "s2", data(json!({"n": 2})))
            .with_record(EntityType::Student, "s3", data(json!({"n": 3})));

        let first = provider
            .fetch_delta(EntityType::Student, &query(None, None, 2))
            .await
            .unwrap();
        assert_eq!(first.records.len(), 2);
        assert!(first.has_more);
        assert_eq!(first.next_cursor.as_deref(), Some("2"));

        let second = provider
            .fetch_delta(EntityType::Student, &query(None, Some("2"), 2))
            .await
            .unwrap();
        assert_eq!(second.records.len(), 1);
        assert!(!second.has_more);
        assert!(second.next_cursor.is_none());
        let token = second.delta_token.unwrap();

        provider.upsert(EntityType::Student, "s2", data(json!({"n": 20}))).await;
        provider.delete(EntityType::Student, "s3").await;

        let delta = provider
            .fetch_delta(EntityType::Student, &query(Some(&token), None, 10))
            .await
            .unwrap();
        let ops: Vec<_> = delta.records.iter().map(|r| (r.source_id.as_str(), r.operation)).collect();
        assert_eq!(ops, vec![("s2", DeltaOperation::Update), ("s3", DeltaOperation::Delete)]);
    }

    #[tokio::test]
    async fn test_silent_removal_and_source_ids() {
        let provider = MemoryProvider::new("mem")
            .with_record(EntityType::Class, "a", SourceData::new())
            .with_record(EntityType::Class, "b", SourceData::new());
        provider.remove_silently(EntityType::Class, "a").await;

        let ids = provider
            .get_all_source_ids(EntityType::Class, &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(ids, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_injected_failures_and_fetch_log() {
        let provider = MemoryProvider::new("mem");
        provider.fail_next(1, FailureMode::Unavailable).await;

        let err = provider
            .fetch_delta(EntityType::Org, &query(None, None, 10))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        provider.fetch_delta(EntityType::Org, &query(None, None, 10)).await.unwrap();
        provider.fetch_delta(EntityType::Term, &query(None, None, 10)).await.unwrap();
        assert_eq!(provider.fetch_log().await, vec![EntityType::Org, EntityType::Term]);
        assert_eq!(provider.fetch_calls().await, 3);
    }

    #[tokio::test]
    async fn test_full_fetch_users_by_role() {
        let provider = MemoryProvider::new("mem")
            .with_delta(false)
            .with_record(EntityType::Teacher, "t1", SourceData::new())
            .with_record(EntityType::Student, "s1", SourceData::new());

        let page = provider
            .fetch_users(&FetchQuery {
                role: Some("teacher".into()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].source_id, "t1");

        assert!(provider
            .fetch_delta(EntityType::Teacher, &query(None, None, 10))
            .await
            .is_err());
    }
}
