//! # Sync Service
//!
//! The control-plane entry point: runs one provider sync under its lock,
//! records the run, and exposes queue and conflict operations to callers.
//!
//! ## run_sync
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  factory.create(tenant, provider)      unknown ──► UnknownProvider      │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  locks.acquire(tenant, provider, run)  busy ──► AlreadyInProgress /     │
//! │        │                                        TenantLimitReached      │
//! │        ▼                                                                │
//! │  runs.start ──► engine.execute ──► runs.finish(SUCCESS | PARTIAL |      │
//! │        │                                       FAILURE | CANCELLED)     │
//! │        ▼                                                                │
//! │  locks.release                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use roster_core::mapping::apply_mappings;
use roster_core::{
    ConflictResolution, ConflictStatus, DeltaOperation, EntityType, HistoryOutcome, JobRequest,
    RunStatus, SourceData, SyncConflict, SyncHistoryEntry, SyncJob, SyncRun, SyncState, SyncStats,
};
use roster_db::Database;

use crate::config::SyncConfig;
use crate::engine::{DeltaSyncConfig, DeltaSyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::lock::{LockManager, ProviderLock};
use crate::provider::{ProviderFactory, SisProvider};

/// Result of a run that got past its lock.
#[derive(Debug)]
pub struct RunSyncOutcome {
    pub sync_run_id: String,
    pub status: RunStatus,
    pub stats: SyncStats,
    /// Set when the run failed.
    pub error: Option<SyncError>,
}

impl RunSyncOutcome {
    /// The run completed, possibly with per-record errors.
    pub fn success(&self) -> bool {
        matches!(self.status, RunStatus::Success | RunStatus::Partial)
    }
}

/// Snapshot returned by [`SyncService::get_sync_status`].
#[derive(Debug, Clone)]
pub struct SyncStatusReport {
    /// A run holds the provider lock, on this instance or another.
    pub is_running: bool,
    /// Id of the in-flight run, if it belongs to this instance.
    pub sync_run_id: Option<String>,
    /// Current lock holder (`instance:run`), if any.
    pub lock_holder: Option<String>,
    pub running_for: Option<Duration>,
    pub state: Option<SyncState>,
    pub last_run: Option<SyncRun>,
    pub pending_conflicts: i64,
}

#[derive(Debug, Clone)]
struct ActiveRun {
    run_id: String,
    started_at: DateTime<Utc>,
    cancel: Arc<AtomicBool>,
    lock: ProviderLock,
}

type ProviderKey = (String, String);

/// Runs syncs and answers operator queries.
#[derive(Clone)]
pub struct SyncService {
    db: Database,
    config: Arc<SyncConfig>,
    factory: Arc<dyn ProviderFactory>,
    locks: LockManager,
    engine: DeltaSyncEngine,
    active: Arc<Mutex<HashMap<ProviderKey, ActiveRun>>>,
}

impl SyncService {
    pub fn new(
        db: Database,
        config: Arc<SyncConfig>,
        factory: Arc<dyn ProviderFactory>,
        locks: LockManager,
    ) -> Self {
        let engine = DeltaSyncEngine::new(db.clone()).with_page_retry(config.sync.page_retry());
        SyncService {
            db,
            config,
            factory,
            locks,
            engine,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Builds a service with locks on the configured backend.
    pub fn from_config(
        db: Database,
        config: Arc<SyncConfig>,
        factory: Arc<dyn ProviderFactory>,
    ) -> Self {
        let locks = LockManager::from_config(&config, &db);
        SyncService::new(db, config, factory, locks)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Runs one sync for (tenant, provider).
    ///
    /// Contention and unknown providers are returned as errors before any
    /// run is recorded. Once the run has started its failure is reported in
    /// the outcome instead.
    ///
    /// `entity_types` narrows the run; `None` or empty uses the provider's
    /// configured types.
    pub async fn run_sync(
        &self,
        tenant_id: &str,
        provider_id: &str,
        job_id: Option<&str>,
        entity_types: Option<Vec<EntityType>>,
    ) -> SyncResult<RunSyncOutcome> {
        let provider = self.factory.create(tenant_id, provider_id)?;
        let run_id = Uuid::new_v4().to_string();
        let lock = self.locks.acquire(tenant_id, provider_id, &run_id).await?;

        let started_at = Utc::now();
        if let Err(err) = self
            .db
            .runs()
            .start(&run_id, tenant_id, provider_id, job_id, started_at)
            .await
        {
            self.release_lock(&lock).await;
            return Err(err.into());
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let key = (tenant_id.to_string(), provider_id.to_string());
        self.active.lock().await.insert(
            key.clone(),
            ActiveRun {
                run_id: run_id.clone(),
                started_at,
                cancel: cancel.clone(),
                lock: lock.clone(),
            },
        );

        info!(
            tenant_id,
            provider_id,
            sync_run_id = %run_id,
            job_id = job_id.unwrap_or("-"),
            "Sync run started"
        );

        let result = match self.engine_config(
            tenant_id,
            provider_id,
            provider,
            &run_id,
            cancel.clone(),
            entity_types,
        ) {
            Ok(config) => self.engine.execute(&config).await,
            Err(err) => Err(err),
        };

        let outcome = match result {
            Ok(done) => RunSyncOutcome {
                sync_run_id: run_id.clone(),
                status: if done.cancelled {
                    RunStatus::Cancelled
                } else {
                    RunStatus::from_stats(&done.stats)
                },
                stats: done.stats,
                error: None,
            },
            Err(err) => {
                let stats = match self.db.sync_state().get(tenant_id, provider_id).await {
                    Ok(Some(state)) => state.stats,
                    _ => SyncStats::default(),
                };
                RunSyncOutcome {
                    sync_run_id: run_id.clone(),
                    status: RunStatus::Failure,
                    stats,
                    error: Some(err),
                }
            }
        };

        let message = outcome.error.as_ref().map(ToString::to_string);
        let finished = self
            .db
            .runs()
            .finish(&run_id, outcome.status, &outcome.stats, message.as_deref(), Utc::now())
            .await;

        {
            let mut active = self.active.lock().await;
            if active.get(&key).is_some_and(|run| run.run_id == run_id) {
                active.remove(&key);
            }
        }
        // cancel_sync already released it
        if !cancel.load(Ordering::SeqCst) {
            self.release_lock(&lock).await;
        }
        finished?;

        info!(
            tenant_id,
            provider_id,
            sync_run_id = %run_id,
            status = %outcome.status,
            changes = outcome.stats.changes(),
            errors = outcome.stats.errors,
            "Sync run finished"
        );
        Ok(outcome)
    }

    /// Asks an in-flight run to stop after its current page and frees the
    /// provider lock right away.
    ///
    /// Returns false if nothing is running for (tenant, provider).
    pub async fn cancel_sync(&self, tenant_id: &str, provider_id: &str) -> bool {
        let run = {
            let mut active = self.active.lock().await;
            match active.remove(&(tenant_id.to_string(), provider_id.to_string())) {
                Some(run) => run,
                None => return false,
            }
        };

        info!(tenant_id, provider_id, sync_run_id = %run.run_id, "Cancelling sync run");
        run.cancel.store(true, Ordering::SeqCst);
        self.release_lock(&run.lock).await;
        true
    }

    pub async fn get_sync_status(
        &self,
        tenant_id: &str,
        provider_id: &str,
    ) -> SyncResult<SyncStatusReport> {
        let running = self
            .active
            .lock()
            .await
            .get(&(tenant_id.to_string(), provider_id.to_string()))
            .cloned();
        let lock_holder = self.locks.holder(tenant_id, provider_id).await?;

        let state = self.db.sync_state().get(tenant_id, provider_id).await?;
        let last_run = self.db.runs().latest(tenant_id, provider_id).await?;
        let pending_conflicts = self
            .db
            .conflicts()
            .count_pending(tenant_id, provider_id)
            .await?;

        Ok(SyncStatusReport {
            is_running: running.is_some() || lock_holder.is_some(),
            sync_run_id: running.as_ref().map(|r| r.run_id.clone()),
            lock_holder,
            running_for: running.map(|r| {
                (Utc::now() - r.started_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO)
            }),
            state,
            last_run,
            pending_conflicts,
        })
    }

    pub async fn list_recent_runs(
        &self,
        tenant_id: &str,
        provider_id: &str,
        limit: u32,
    ) -> SyncResult<Vec<SyncRun>> {
        Ok(self
            .db
            .runs()
            .list_recent(tenant_id, provider_id, limit)
            .await?)
    }

    fn engine_config(
        &self,
        tenant_id: &str,
        provider_id: &str,
        provider: Arc<dyn SisProvider>,
        run_id: &str,
        cancel: Arc<AtomicBool>,
        entity_types: Option<Vec<EntityType>>,
    ) -> SyncResult<DeltaSyncConfig> {
        let settings = &self.config.sync;
        let mut config = DeltaSyncConfig::new(tenant_id, provider_id, provider)
            .batch_size(settings.batch_size)
            .conflict_policy(settings.conflict_policy)
            .conflict_scope(settings.conflict_scope)
            .sync_run_id(run_id)
            .cancel_flag(cancel);

        if let Some(provider_config) = self.config.provider(tenant_id, provider_id) {
            config = config
                .batch_size(provider_config.batch_size.unwrap_or(settings.batch_size))
                .conflict_policy(provider_config.conflict_policy.unwrap_or(settings.conflict_policy))
                .conflict_scope(provider_config.conflict_scope.unwrap_or(settings.conflict_scope))
                .entity_types(provider_config.entity_types.clone())
                .field_mappings(provider_config.mappings()?)
                .filters(provider_config.filters.clone());
        }

        match entity_types {
            Some(types) if !types.is_empty() => Ok(config.entity_types(types)),
            _ => Ok(config),
        }
    }

    async fn release_lock(&self, lock: &ProviderLock) {
        if let Err(err) = self.locks.release(lock).await {
            warn!(lock_key = %lock.key, error = %err, "Failed to release provider lock");
        }
    }

    // =========================================================================
    // Queue
    // =========================================================================

    /// Adds a job to the queue with the configured attempt budget.
    pub async fn queue_job(&self, request: JobRequest) -> SyncResult<SyncJob> {
        if request.tenant_id.is_empty() || request.provider_id.is_empty() {
            return Err(SyncError::InvalidData(
                "job needs a tenant and a provider".into(),
            ));
        }
        let job = self
            .db
            .queue()
            .enqueue(&request, self.config.queue.max_attempts)
            .await?;
        info!(
            job_id = %job.id,
            tenant_id = %job.tenant_id,
            provider_id = %job.provider_id,
            priority = job.priority,
            "Sync job queued"
        );
        Ok(job)
    }

    /// Moves dead-lettered jobs back to pending with a fresh attempt budget.
    pub async fn retry_failed_jobs(&self, tenant_id: Option<&str>) -> SyncResult<u64> {
        let count = self.db.queue().retry_failed(tenant_id).await?;
        info!(count, tenant_id = tenant_id.unwrap_or("*"), "Requeued failed jobs");
        Ok(count)
    }

    pub async fn list_dead_letters(&self, tenant_id: Option<&str>) -> SyncResult<Vec<SyncJob>> {
        Ok(self.db.queue().list_dead_letters(tenant_id).await?)
    }

    /// Jobs waiting to run (pending or retrying).
    pub async fn queue_depth(&self) -> SyncResult<i64> {
        Ok(self.db.queue().depth().await?)
    }

    // =========================================================================
    // Conflicts
    // =========================================================================

    pub async fn list_pending_conflicts(
        &self,
        tenant_id: &str,
        provider_id: Option<&str>,
    ) -> SyncResult<Vec<SyncConflict>> {
        Ok(self.db.conflicts().list_pending(tenant_id, provider_id).await?)
    }

    /// Resolves a pending conflict.
    ///
    /// - `Source`: the stored source payload is mapped and applied
    /// - `Target` / `Manual`: local data stays; the source hash is recorded
    ///   so the same payload does not conflict again
    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: ConflictResolution,
    ) -> SyncResult<SyncConflict> {
        let conflicts = self.db.conflicts();
        let conflict = conflicts.get(conflict_id).await?;
        if conflict.status != ConflictStatus::Pending {
            return Err(SyncError::InvalidData(format!(
                "conflict {} is already resolved",
                conflict_id
            )));
        }

        let now = Utc::now();
        let entities = self.db.entities();
        let (outcome, changed_fields) = match resolution {
            ConflictResolution::Source => {
                let source = SourceData::from_value(conflict.source_payload.clone())?;
                let mappings = match self.config.provider(&conflict.tenant_id, &conflict.provider_id) {
                    Some(provider_config) => provider_config
                        .mappings()?
                        .remove(&conflict.entity_type)
                        .unwrap_or_default(),
                    None => Vec::new(),
                };
                let data = apply_mappings(&mappings, &source)?;
                entities
                    .apply_sync(&conflict.entity_id, &data, &conflict.source_hash, now)
                    .await?;
                (HistoryOutcome::Applied, data.len() as u32)
            }
            ConflictResolution::Target | ConflictResolution::Manual => {
                entities
                    .acknowledge_hash(&conflict.entity_id, &conflict.source_hash, now)
                    .await?;
                (HistoryOutcome::KeptLocal, 0)
            }
        };

        if !conflicts.resolve(conflict_id, resolution, now).await? {
            return Err(SyncError::InvalidData(format!(
                "conflict {} was resolved concurrently",
                conflict_id
            )));
        }

        self.db
            .history()
            .append(&SyncHistoryEntry {
                id: Uuid::new_v4().to_string(),
                tenant_id: conflict.tenant_id.clone(),
                provider_id: conflict.provider_id.clone(),
                sync_run_id: None,
                entity_type: conflict.entity_type,
                source_id: conflict.source_id.clone(),
                operation: DeltaOperation::Update,
                outcome,
                changed_fields,
                payload: conflict.source_payload.clone(),
                source_hash: Some(conflict.source_hash.clone()),
                recorded_at: now,
            })
            .await?;

        info!(
            conflict_id,
            resolution = ?resolution,
            entity_id = %conflict.entity_id,
            "Conflict resolved"
        );
        Ok(conflicts.get(conflict_id).await?)
    }
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("instance_id", &self.config.instance_id())
            .field("locks", &self.locks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::provider::{MemoryProvider, StaticProviderFactory};
    use roster_core::{ConflictPolicy, JobStatus};
    use roster_db::DbConfig;
    use serde_json::json;

    fn data(value: serde_json::Value) -> SourceData {
        SourceData::from_value(value).unwrap()
    }

    async fn service_with(provider: Arc<MemoryProvider>, config: SyncConfig) -> SyncService {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let factory = StaticProviderFactory::new().with("t1", "p1", provider);
        SyncService::from_config(db, Arc::new(config), Arc::new(factory))
    }

    fn roster() -> Arc<MemoryProvider> {
        Arc::new(
            MemoryProvider::new("sis")
                .with_record(EntityType::Org, "org-1", data(json!({"name": "North"})))
                .with_record(EntityType::Student, "s-1", data(json!({"name": "Ana"}))),
        )
    }

    #[tokio::test]
    async fn test_run_sync_records_run() {
        let service = service_with(roster(), SyncConfig::default()).await;

        let outcome = service.run_sync("t1", "p1", None, None).await.unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.stats.creates, 2);

        let run = service.database().runs().get(&outcome.sync_run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.stats.creates, 2);
        assert!(run.finished_at.is_some());

        let status = service.get_sync_status("t1", "p1").await.unwrap();
        assert!(!status.is_running);
        assert_eq!(status.last_run.unwrap().id, outcome.sync_run_id);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_config_error() {
        let service = service_with(roster(), SyncConfig::default()).await;
        let err = service.run_sync("t1", "nope", None, None).await.unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_exclusive() {
        let provider = Arc::new(
            MemoryProvider::new("slow")
                .with_fetch_delay(Duration::from_millis(50))
                .with_record(EntityType::Org, "org-1", data(json!({"name": "North"}))),
        );
        let service = Arc::new(service_with(provider, SyncConfig::default()).await);

        let first = {
            let service = service.clone();
            tokio::spawn(async move { service.run_sync("t1", "p1", None, None).await })
        };
        while !service.get_sync_status("t1", "p1").await.unwrap().is_running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let second = service.run_sync("t1", "p1", None, None).await;
        assert!(matches!(second, Err(SyncError::AlreadyInProgress { .. })));

        let first = first.await.unwrap().unwrap();
        assert!(first.success());
    }

    #[tokio::test]
    async fn test_cancel_stops_run() {
        let provider = Arc::new(
            MemoryProvider::new("slow")
                .with_fetch_delay(Duration::from_millis(100))
                .with_record(EntityType::Org, "org-1", data(json!({"name": "North"}))),
        );
        let service = Arc::new(service_with(provider, SyncConfig::default()).await);
        assert!(!service.cancel_sync("t1", "p1").await);

        let run = {
            let service = service.clone();
            tokio::spawn(async move { service.run_sync("t1", "p1", None, None).await })
        };
        while !service.get_sync_status("t1", "p1").await.unwrap().is_running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(service.cancel_sync("t1", "p1").await);

        let outcome = run.await.unwrap().unwrap();
        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert!(!outcome.success());

        let state = service
            .database()
            .sync_state()
            .get("t1", "p1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.status, roster_core::SyncStateStatus::Paused);
    }

    /// Hands out the given adapters in order, repeating the last one.
    struct SequencedFactory {
        providers: std::sync::Mutex<Vec<Arc<dyn SisProvider>>>,
    }

    impl ProviderFactory for SequencedFactory {
        fn create(&self, _tenant_id: &str, _provider_id: &str) -> SyncResult<Arc<dyn SisProvider>> {
            let mut providers = self.providers.lock().unwrap();
            if providers.len() > 1 {
                Ok(providers.remove(0))
            } else {
                Ok(providers[0].clone())
            }
        }
    }

    #[tokio::test]
    async fn test_cancelled_run_leaves_successor_state_alone() {
        let record = data(json!({"name": "North"}));
        let slow: Arc<dyn SisProvider> = Arc::new(
            MemoryProvider::new("slow")
                .with_fetch_delay(Duration::from_millis(150))
                .with_record(EntityType::Org, "org-1", record.clone()),
        );
        let fast: Arc<dyn SisProvider> =
            Arc::new(MemoryProvider::new("fast").with_record(EntityType::Org, "org-1", record));
        let factory = SequencedFactory {
            providers: std::sync::Mutex::new(vec![slow, fast]),
        };
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let service = Arc::new(SyncService::from_config(
            db,
            Arc::new(SyncConfig::default()),
            Arc::new(factory),
        ));

        let first = {
            let service = service.clone();
            tokio::spawn(async move { service.run_sync("t1", "p1", None, None).await })
        };
        while !service.get_sync_status("t1", "p1").await.unwrap().is_running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(service.cancel_sync("t1", "p1").await);

        let second = service.run_sync("t1", "p1", None, None).await.unwrap();
        assert_eq!(second.status, RunStatus::Success);
        let states = service.database().sync_state();
        let after_second = states.get("t1", "p1").await.unwrap().unwrap();
        assert_eq!(after_second.status, roster_core::SyncStateStatus::Idle);
        assert!(after_second.last_delta_token.is_some());

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.status, RunStatus::Cancelled);

        let final_state = states.get("t1", "p1").await.unwrap().unwrap();
        assert_eq!(final_state.status, roster_core::SyncStateStatus::Idle);
        assert_eq!(final_state.last_delta_token, after_second.last_delta_token);
        assert_eq!(final_state.last_sync_time, after_second.last_sync_time);
        assert_eq!(final_state.revision, after_second.revision);
    }

    #[tokio::test]
    async fn test_status_sees_lock_held_elsewhere() {
        let mut config = SyncConfig::default();
        config.scheduler.lock_backend = crate::config::LockBackend::Database;
        let service = service_with(roster(), config).await;

        let other_node = LockManager::new(
            Arc::new(crate::lock::DatabaseLockStore::new(service.database())),
            "node-b",
            Duration::from_secs(60),
            None,
        );
        let held = other_node.acquire("t1", "p1", "run-9").await.unwrap();

        let status = service.get_sync_status("t1", "p1").await.unwrap();
        assert!(status.is_running);
        assert!(status.sync_run_id.is_none());
        assert_eq!(status.lock_holder.as_deref(), Some("node-b:run-9"));
        assert!(matches!(
            service.run_sync("t1", "p1", None, None).await,
            Err(SyncError::AlreadyInProgress { .. })
        ));

        assert!(other_node.release(&held).await.unwrap());
        let status = service.get_sync_status("t1", "p1").await.unwrap();
        assert!(!status.is_running);
        assert!(status.lock_holder.is_none());
    }

    #[tokio::test]
    async fn test_resolve_conflict_with_source() {
        let provider = Arc::new(
            MemoryProvider::new("sis")
                .with_delta(false)
                .with_record(EntityType::Student, "s-1", data(json!({"name": "Ana"}))),
        );
        let mut config = SyncConfig::default();
        config.providers.push(
            ProviderConfig::new("t1", "p1")
                .entity_types(vec![EntityType::Student])
                .conflict_policy(ConflictPolicy::Manual),
        );
        let service = service_with(provider.clone(), config).await;
        service.run_sync("t1", "p1", None, None).await.unwrap();

        let db = service.database();
        let entity = db
            .entities()
            .find("t1", "p1", EntityType::Student, "s-1")
            .await
            .unwrap()
            .unwrap();
        db.entities()
            .apply_local_edit(&entity.id, &data(json!({"name": "Ana L."})), Utc::now())
            .await
            .unwrap();
        provider
            .upsert(EntityType::Student, "s-1", data(json!({"name": "Ana Maria"})))
            .await;
        service.run_sync("t1", "p1", None, None).await.unwrap();

        let pending = service.list_pending_conflicts("t1", None).await.unwrap();
        assert_eq!(pending.len(), 1);

        let resolved = service
            .resolve_conflict(&pending[0].id, ConflictResolution::Source)
            .await
            .unwrap();
        assert_eq!(resolved.status, ConflictStatus::Resolved);
        assert_eq!(resolved.resolution, Some(ConflictResolution::Source));

        let entity = db.entities().get(&entity.id).await.unwrap();
        assert_eq!(entity.data.get("name"), Some(&json!("Ana Maria")));
        assert!(service.list_pending_conflicts("t1", None).await.unwrap().is_empty());

        let again = service
            .resolve_conflict(&pending[0].id, ConflictResolution::Target)
            .await;
        assert!(again.is_err());

        // The acknowledged payload no longer conflicts.
        let outcome = service.run_sync("t1", "p1", None, None).await.unwrap();
        assert_eq!(outcome.stats.conflicts, 0);
    }

    #[tokio::test]
    async fn test_queue_operations() {
        let service = service_with(roster(), SyncConfig::default()).await;

        let job = service
            .queue_job(JobRequest::new("t1", "p1").priority(3))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.max_attempts, 5);
        assert_eq!(service.queue_depth().await.unwrap(), 1);

        let queue = service.database().queue();
        let claimed = queue.dequeue(Utc::now()).await.unwrap().unwrap();
        queue.mark_dead(&claimed.id, 5, "provider down").await.unwrap();
        assert_eq!(service.list_dead_letters(Some("t1")).await.unwrap().len(), 1);

        assert_eq!(service.retry_failed_jobs(Some("t1")).await.unwrap(), 1);
        assert_eq!(service.queue_depth().await.unwrap(), 1);
        assert!(service.list_dead_letters(None).await.unwrap().is_empty());

        assert!(service.queue_job(JobRequest::new("", "p1")).await.is_err());
    }
}
