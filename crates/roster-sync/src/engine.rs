//! # Delta Sync Engine
//!
//! Pulls changes for one (tenant, provider) and applies them to the local
//! roster store.
//!
//! ## Run Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        execute(config)                                  │
//! │                                                                         │
//! │  state ← get_or_create(tenant, provider); claim with status = syncing  │
//! │  (later saves are fenced: a newer claim makes them no-ops and stops    │
//! │   this run as if cancelled)                                            │
//! │                                                                         │
//! │  for type in dependency order:                                         │
//! │    org → term → teacher → student → parent → class → enrollment →      │
//! │    relationship → demographic                                          │
//! │    ┌──────────────────────────────────────────────────────────────────┐ │
//! │    │ loop:                                                            │ │
//! │    │   cancelled? ──► status = paused, stop                           │ │
//! │    │   pause for rate limit (all but the first fetch)                 │ │
//! │    │   page ← fetch_delta / full fetch (retried with backoff)         │ │
//! │    │   apply each record ──► entity + history (+ conflict)            │ │
//! │    │            └─ failure ──► sync_error, errors += 1, keep going    │ │
//! │    │   persist cursor; stop when !has_more                            │ │
//! │    └──────────────────────────────────────────────────────────────────┘ │
//! │                                                                         │
//! │  deletion detection? ──► soft-delete local ids the SIS no longer has   │
//! │                                                                         │
//! │  status = idle, last_sync_time = now, delta token advanced             │
//! │  (any unrecovered error: status = error, cursors kept for resume)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Applying One Record
//! ```text
//! delete ─────────────────────────────────► soft-delete
//! no local row ───────────────────────────► insert                (create)
//! soft-deleted local row ─────────────────► overwrite, revive     (update)
//! hash unchanged ─────────────────────────► history only          (unchanged)
//! locally modified, policy ≠ source_wins ─► arbitrate + conflict row
//! otherwise ──────────────────────────────► overwrite             (update)
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use roster_core::conflict::{arbitrate, diff_fields, scope_conflict, ConflictDecision, ConflictFields};
use roster_core::hashing::content_hash;
use roster_core::mapping::apply_mappings;
use roster_core::{
    ConflictPolicy, ConflictScope, ConflictStatus, DeltaOperation, DeltaRecord, EntityType,
    FieldMapping, HistoryOutcome, LocalEntity, SourceData, SyncConflict, SyncErrorEntry,
    SyncHistoryEntry, SyncState, SyncStateStatus, SyncStats, DEFAULT_BATCH_SIZE,
};
use roster_db::Database;

use crate::config::PageRetry;
use crate::error::{SyncError, SyncResult};
use crate::provider::{fetch_full_page, DeltaQuery, FetchQuery, SisProvider};

// =============================================================================
// Run Configuration
// =============================================================================

/// Everything one run needs to know about its provider.
#[derive(Clone)]
pub struct DeltaSyncConfig {
    pub tenant_id: String,
    pub provider_id: String,
    pub provider: Arc<dyn SisProvider>,
    /// Page size requested from the provider.
    pub batch_size: usize,
    pub conflict_policy: ConflictPolicy,
    pub conflict_scope: ConflictScope,
    /// Types to sync. Empty means every type.
    pub entity_types: Vec<EntityType>,
    pub field_mappings: BTreeMap<EntityType, Vec<FieldMapping>>,
    /// Provider-specific filters passed through on every fetch.
    pub filters: BTreeMap<String, String>,
    /// Run id stamped on history and error rows.
    pub sync_run_id: Option<String>,
    /// Cooperative cancellation flag, checked before each type and page.
    pub cancel: Arc<AtomicBool>,
}

impl DeltaSyncConfig {
    pub fn new(
        tenant_id: impl Into<String>,
        provider_id: impl Into<String>,
        provider: Arc<dyn SisProvider>,
    ) -> Self {
        DeltaSyncConfig {
            tenant_id: tenant_id.into(),
            provider_id: provider_id.into(),
            provider,
            batch_size: DEFAULT_BATCH_SIZE,
            conflict_policy: ConflictPolicy::default(),
            conflict_scope: ConflictScope::default(),
            entity_types: Vec::new(),
            field_mappings: BTreeMap::new(),
            filters: BTreeMap::new(),
            sync_run_id: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn conflict_scope(mut self, scope: ConflictScope) -> Self {
        self.conflict_scope = scope;
        self
    }

    pub fn entity_types(mut self, types: Vec<EntityType>) -> Self {
        self.entity_types = types;
        self
    }

    pub fn field_mappings(mut self, mappings: BTreeMap<EntityType, Vec<FieldMapping>>) -> Self {
        self.field_mappings = mappings;
        self
    }

    pub fn filters(mut self, filters: BTreeMap<String, String>) -> Self {
        self.filters = filters;
        self
    }

    pub fn sync_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.sync_run_id = Some(run_id.into());
        self
    }

    pub fn cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn mappings_for(&self, entity_type: EntityType) -> &[FieldMapping] {
        self.field_mappings
            .get(&entity_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaSyncOutcome {
    pub stats: SyncStats,
    /// The run stopped early, on its cancel flag or because a newer run
    /// claimed the state. Cursors were kept.
    pub cancelled: bool,
}

/// Mutable bookkeeping for one run.
#[derive(Debug, Default)]
struct RunProgress {
    stats: SyncStats,
    fetches: u64,
    /// Token from the first page of the run. Changes made while the run was
    /// in flight are newer than it, so the next run picks them up again.
    delta_token: Option<String>,
}

/// Where paging goes after a cursor save.
#[derive(Debug)]
enum Checkpoint {
    Next(String),
    Done,
    /// Another run claimed the state; this one must stop writing.
    Superseded,
}

// =============================================================================
// Delta Sync Engine
// =============================================================================

/// Applies provider changes for one (tenant, provider) at a time.
///
/// Callers serialise runs per provider; the engine itself takes no locks.
#[derive(Debug, Clone)]
pub struct DeltaSyncEngine {
    db: Database,
    page_retry: PageRetry,
}

impl DeltaSyncEngine {
    pub fn new(db: Database) -> Self {
        DeltaSyncEngine {
            db,
            page_retry: PageRetry::default(),
        }
    }

    pub fn with_page_retry(mut self, page_retry: PageRetry) -> Self {
        self.page_retry = page_retry;
        self
    }

    /// Runs a sync and returns its counters.
    ///
    /// A cancelled run returns the counters gathered so far.
    pub async fn execute_delta_sync(&self, config: &DeltaSyncConfig) -> SyncResult<SyncStats> {
        self.execute(config).await.map(|outcome| outcome.stats)
    }

    /// Runs a sync and reports whether it completed or was cancelled.
    pub async fn execute(&self, config: &DeltaSyncConfig) -> SyncResult<DeltaSyncOutcome> {
        let states = self.db.sync_state();
        let mut state = states
            .get_or_create(&config.tenant_id, &config.provider_id)
            .await?;
        state.status = SyncStateStatus::Syncing;
        states.claim(&mut state).await?;

        info!(
            tenant_id = %config.tenant_id,
            provider_id = %config.provider_id,
            provider = config.provider.name(),
            delta = config.provider.supports_delta(),
            resuming = !state.entity_cursors.is_empty(),
            "Delta sync starting"
        );

        let mut progress = RunProgress::default();
        let result = self.sync_all(config, &mut state, &mut progress).await;
        state.stats = progress.stats;

        match result {
            Ok(true) => {
                state.status = SyncStateStatus::Idle;
                state.last_sync_time = Some(Utc::now());
                if let Some(token) = progress.delta_token.take() {
                    state.last_delta_token = Some(token);
                }
                state.error_message = None;
                if !states.save(&mut state).await? {
                    warn!(
                        tenant_id = %config.tenant_id,
                        provider_id = %config.provider_id,
                        "Sync state taken over by a newer run, completion not recorded"
                    );
                }

                info!(
                    tenant_id = %config.tenant_id,
                    provider_id = %config.provider_id,
                    creates = progress.stats.creates,
                    updates = progress.stats.updates,
                    deletes = progress.stats.deletes,
                    errors = progress.stats.errors,
                    conflicts = progress.stats.conflicts,
                    "Delta sync completed"
                );
                Ok(DeltaSyncOutcome {
                    stats: progress.stats,
                    cancelled: false,
                })
            }
            Ok(false) => {
                state.status = SyncStateStatus::Paused;
                if !states.save(&mut state).await? {
                    debug!(
                        tenant_id = %config.tenant_id,
                        provider_id = %config.provider_id,
                        "Sync state taken over by a newer run, leaving it"
                    );
                }

                info!(
                    tenant_id = %config.tenant_id,
                    provider_id = %config.provider_id,
                    "Delta sync cancelled, cursors kept"
                );
                Ok(DeltaSyncOutcome {
                    stats: progress.stats,
                    cancelled: true,
                })
            }
            Err(err) => {
                error!(
                    tenant_id = %config.tenant_id,
                    provider_id = %config.provider_id,
                    error = %err,
                    "Delta sync failed"
                );
                state.status = SyncStateStatus::Error;
                state.error_message = Some(err.to_string());
                match states.save(&mut state).await {
                    Ok(true) => {}
                    Ok(false) => debug!("Sync state taken over by a newer run, error not recorded"),
                    Err(save_err) => warn!(error = %save_err, "Failed to record sync error state"),
                }
                Err(err)
            }
        }
    }

    /// Returns false if the run was cancelled.
    async fn sync_all(
        &self,
        config: &DeltaSyncConfig,
        state: &mut SyncState,
        progress: &mut RunProgress,
    ) -> SyncResult<bool> {
        let types = EntityType::ordered(&config.entity_types);

        for &entity_type in &types {
            if config.is_cancelled() {
                return Ok(false);
            }
            let completed = if config.provider.supports_delta() {
                self.sync_delta_type(config, entity_type, state, progress)
                    .await?
            } else {
                self.sync_full_type(config, entity_type, state, progress)
                    .await?
            };
            if !completed {
                return Ok(false);
            }
        }

        if config.provider.supports_deletion_detection() {
            for &entity_type in &types {
                if config.is_cancelled() {
                    return Ok(false);
                }
                self.reconcile_type(config, entity_type, progress).await?;
            }
        }

        Ok(true)
    }

    // =========================================================================
    // Paging
    // =========================================================================

    async fn sync_delta_type(
        &self,
        config: &DeltaSyncConfig,
        entity_type: EntityType,
        state: &mut SyncState,
        progress: &mut RunProgress,
    ) -> SyncResult<bool> {
        let provider = config.provider.as_ref();
        let mut cursor = state.cursor(entity_type).map(str::to_string);

        loop {
            if config.is_cancelled() {
                return Ok(false);
            }
            self.pace(provider, progress).await;

            let query = DeltaQuery {
                since: state.last_sync_time,
                cursor: cursor.clone(),
                delta_token: state.last_delta_token.clone(),
                limit: config.batch_size,
                filters: config.filters.clone(),
            };
            let q = &query;
            let page = self
                .fetch_with_retry(entity_type, move || provider.fetch_delta(entity_type, q))
                .await?;
            progress.fetches += 1;
            if progress.delta_token.is_none() {
                progress.delta_token = page.delta_token.clone();
            }

            debug!(
                entity_type = %entity_type,
                records = page.records.len(),
                has_more = page.has_more,
                "Fetched delta page"
            );

            for record in &page.records {
                self.apply_logged(config, record, &mut progress.stats).await?;
            }

            match self
                .advance_cursor(state, entity_type, page.has_more, page.next_cursor)
                .await?
            {
                Checkpoint::Next(next) => cursor = Some(next),
                Checkpoint::Done => return Ok(true),
                Checkpoint::Superseded => return Ok(false),
            }
        }
    }

    async fn sync_full_type(
        &self,
        config: &DeltaSyncConfig,
        entity_type: EntityType,
        state: &mut SyncState,
        progress: &mut RunProgress,
    ) -> SyncResult<bool> {
        let provider = config.provider.as_ref();
        let mut cursor = state.cursor(entity_type).map(str::to_string);

        loop {
            if config.is_cancelled() {
                return Ok(false);
            }
            self.pace(provider, progress).await;

            let query = FetchQuery {
                cursor: cursor.clone(),
                limit: config.batch_size,
                role: None,
                filters: config.filters.clone(),
            };
            let q = &query;
            let fetched = self
                .fetch_with_retry(entity_type, move || async move {
                    match fetch_full_page(provider, entity_type, q).await {
                        Some(result) => result.map(Some),
                        None => Ok(None),
                    }
                })
                .await?;
            let Some(page) = fetched else {
                warn!(
                    entity_type = %entity_type,
                    provider = provider.name(),
                    "No full fetch for entity type, skipping"
                );
                return Ok(true);
            };
            progress.fetches += 1;

            debug!(
                entity_type = %entity_type,
                records = page.records.len(),
                has_more = page.has_more,
                "Fetched full page"
            );

            for source in page.records {
                let record = DeltaRecord::upsert(
                    entity_type,
                    DeltaOperation::Update,
                    source.source_id,
                    source.data,
                    // Unknown change time sorts before any local edit.
                    source.updated_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                );
                self.apply_logged(config, &record, &mut progress.stats)
                    .await?;
            }

            match self
                .advance_cursor(state, entity_type, page.has_more, page.next_cursor)
                .await?
            {
                Checkpoint::Next(next) => cursor = Some(next),
                Checkpoint::Done => return Ok(true),
                Checkpoint::Superseded => return Ok(false),
            }
        }
    }

    /// Persists the cursor after a page and says what to fetch next.
    async fn advance_cursor(
        &self,
        state: &mut SyncState,
        entity_type: EntityType,
        has_more: bool,
        next_cursor: Option<String>,
    ) -> SyncResult<Checkpoint> {
        match (has_more, next_cursor) {
            (true, None) => {
                return Err(SyncError::MissingCursor {
                    entity_type: entity_type.to_string(),
                })
            }
            (_, Some(next)) => state.set_cursor(entity_type, next),
            (false, None) => state.clear_cursor(entity_type),
        }
        if !self.db.sync_state().save(state).await? {
            warn!(
                tenant_id = %state.tenant_id,
                provider_id = %state.provider_id,
                entity_type = %entity_type,
                "Sync state taken over by a newer run, stopping"
            );
            return Ok(Checkpoint::Superseded);
        }

        match state.cursor(entity_type) {
            Some(next) if has_more => Ok(Checkpoint::Next(next.to_string())),
            _ => Ok(Checkpoint::Done),
        }
    }

    /// Honours the provider's rate limit between consecutive fetches.
    async fn pace(&self, provider: &dyn SisProvider, progress: &RunProgress) {
        if progress.fetches == 0 {
            return;
        }
        if let Some(delay) = provider.rate_limit_delay() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Retries retryable fetch failures with exponential backoff until the
    /// elapsed budget runs out.
    async fn fetch_with_retry<T, F, Fut>(&self, entity_type: EntityType, mut fetch: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut backoff = ExponentialBackoff {
            current_interval: self.page_retry.initial_interval,
            initial_interval: self.page_retry.initial_interval,
            max_interval: self.page_retry.max_interval,
            multiplier: 2.0,
            max_elapsed_time: Some(self.page_retry.max_elapsed),
            ..Default::default()
        };
        backoff.reset();

        loop {
            let err = match fetch().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_retryable() || self.page_retry.max_elapsed.is_zero() {
                return Err(err);
            }

            match backoff.next_backoff() {
                Some(mut delay) => {
                    if let SyncError::RateLimited { retry_after_ms } = &err {
                        delay = delay.max(std::time::Duration::from_millis(*retry_after_ms));
                    }
                    warn!(
                        entity_type = %entity_type,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!(entity_type = %entity_type, error = %err, "Fetch retries exhausted");
                    return Err(err);
                }
            }
        }
    }

    // =========================================================================
    // Applying Records
    // =========================================================================

    /// Applies one record, turning a failure into a `sync_error` row.
    async fn apply_logged(
        &self,
        config: &DeltaSyncConfig,
        record: &DeltaRecord,
        stats: &mut SyncStats,
    ) -> SyncResult<()> {
        if let Err(err) = self.apply_record(config, record, stats).await {
            self.record_failure(config, record, &err, stats).await?;
        }
        Ok(())
    }

    async fn apply_record(
        &self,
        config: &DeltaSyncConfig,
        record: &DeltaRecord,
        stats: &mut SyncStats,
    ) -> SyncResult<()> {
        let entities = self.db.entities();
        let now = Utc::now();

        if record.operation.is_delete() {
            let removed = entities
                .soft_delete(
                    &config.tenant_id,
                    &config.provider_id,
                    record.entity_type,
                    &record.source_id,
                    now,
                )
                .await?;
            // Idempotent: a repeated or unknown delete still counts.
            stats.deletes += 1;
            let outcome = if removed {
                HistoryOutcome::Applied
            } else {
                HistoryOutcome::Unchanged
            };
            return self
                .log(config, record, DeltaOperation::Delete, outcome, 0, None)
                .await;
        }

        let hash = content_hash(&record.source_data);
        if record.current_hash.as_deref().is_some_and(|reported| reported != hash) {
            debug!(
                entity_type = %record.entity_type,
                source_id = %record.source_id,
                "Provider hash differs from content hash, using content hash"
            );
        }

        let existing = entities
            .find(
                &config.tenant_id,
                &config.provider_id,
                record.entity_type,
                &record.source_id,
            )
            .await?;

        let Some(local) = existing else {
            let data = apply_mappings(config.mappings_for(record.entity_type), &record.source_data)?;
            entities
                .insert(
                    &config.tenant_id,
                    &config.provider_id,
                    record.entity_type,
                    &record.source_id,
                    &data,
                    &hash,
                    now,
                )
                .await?;
            stats.creates += 1;
            return self
                .log(
                    config,
                    record,
                    DeltaOperation::Create,
                    HistoryOutcome::Applied,
                    data.len() as u32,
                    Some(&hash),
                )
                .await;
        };

        if !local.is_deleted() && local.source_hash == hash {
            return self
                .log(
                    config,
                    record,
                    DeltaOperation::Update,
                    HistoryOutcome::Unchanged,
                    0,
                    Some(&hash),
                )
                .await;
        }

        let data = apply_mappings(config.mappings_for(record.entity_type), &record.source_data)?;
        let diffs = diff_fields(&data, &local.data);

        if !local.is_deleted()
            && local.is_locally_modified()
            && config.conflict_policy != ConflictPolicy::SourceWins
        {
            if let Some(fields) = scope_conflict(&diffs, config.conflict_scope) {
                let incoming = Incoming {
                    record,
                    data,
                    hash,
                    changed_fields: diffs.len() as u32,
                };
                return self
                    .resolve_conflict(config, &local, incoming, fields, stats)
                    .await;
            }
        }

        entities.apply_sync(&local.id, &data, &hash, now).await?;
        stats.updates += 1;
        self.log(
            config,
            record,
            DeltaOperation::Update,
            HistoryOutcome::Applied,
            diffs.len() as u32,
            Some(&hash),
        )
        .await
    }

    /// Arbitrates an incoming change against local edits and records the
    /// conflict row.
    async fn resolve_conflict(
        &self,
        config: &DeltaSyncConfig,
        local: &LocalEntity,
        incoming: Incoming<'_>,
        fields: ConflictFields,
        stats: &mut SyncStats,
    ) -> SyncResult<()> {
        let record = incoming.record;
        let now = Utc::now();
        let local_modified_at = local.local_modified_at.unwrap_or(local.last_synced_at);
        let decision = arbitrate(config.conflict_policy, record.timestamp, local_modified_at);

        if decision == ConflictDecision::Defer
            && self.has_pending_conflict(&local.id, &incoming.hash).await?
        {
            return self
                .log(
                    config,
                    record,
                    DeltaOperation::Update,
                    HistoryOutcome::ConflictPending,
                    0,
                    Some(&incoming.hash),
                )
                .await;
        }

        let resolution = decision.resolution();
        let conflict = SyncConflict {
            id: Uuid::new_v4().to_string(),
            tenant_id: config.tenant_id.clone(),
            provider_id: config.provider_id.clone(),
            entity_type: record.entity_type,
            entity_id: local.id.clone(),
            source_id: record.source_id.clone(),
            field: fields.field,
            source_value: fields.source_value,
            target_value: fields.target_value,
            status: if resolution.is_some() {
                ConflictStatus::Resolved
            } else {
                ConflictStatus::Pending
            },
            resolution,
            source_payload: record.source_data.to_value(),
            source_hash: incoming.hash.clone(),
            created_at: now,
            resolved_at: resolution.map(|_| now),
        };
        self.db.conflicts().insert(&conflict).await?;
        stats.conflicts += 1;

        debug!(
            entity_type = %record.entity_type,
            source_id = %record.source_id,
            field = %conflict.field,
            decision = ?decision,
            "Conflict with local edits"
        );

        let entities = self.db.entities();
        match decision {
            ConflictDecision::ApplySource => {
                entities
                    .apply_sync(&local.id, &incoming.data, &incoming.hash, now)
                    .await?;
                stats.updates += 1;
                self.log(
                    config,
                    record,
                    DeltaOperation::Update,
                    HistoryOutcome::Applied,
                    incoming.changed_fields,
                    Some(&incoming.hash),
                )
                .await
            }
            ConflictDecision::KeepTarget => {
                entities
                    .acknowledge_hash(&local.id, &incoming.hash, now)
                    .await?;
                self.log(
                    config,
                    record,
                    DeltaOperation::Update,
                    HistoryOutcome::KeptLocal,
                    0,
                    Some(&incoming.hash),
                )
                .await
            }
            ConflictDecision::Defer => {
                self.log(
                    config,
                    record,
                    DeltaOperation::Update,
                    HistoryOutcome::ConflictPending,
                    0,
                    Some(&incoming.hash),
                )
                .await
            }
        }
    }

    async fn has_pending_conflict(&self, entity_id: &str, source_hash: &str) -> SyncResult<bool> {
        let conflicts = self.db.conflicts().list_for_entity(entity_id).await?;
        Ok(conflicts
            .iter()
            .any(|c| c.status == ConflictStatus::Pending && c.source_hash == source_hash))
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Soft-deletes local records whose source id the SIS no longer reports.
    async fn reconcile_type(
        &self,
        config: &DeltaSyncConfig,
        entity_type: EntityType,
        progress: &mut RunProgress,
    ) -> SyncResult<()> {
        let provider = config.provider.as_ref();
        let filters = &config.filters;

        self.pace(provider, progress).await;
        let remote = match self
            .fetch_with_retry(entity_type, move || {
                provider.get_all_source_ids(entity_type, filters)
            })
            .await
        {
            Ok(ids) => ids,
            Err(SyncError::Unsupported { operation }) => {
                debug!(entity_type = %entity_type, operation = %operation, "Reconciliation skipped");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        progress.fetches += 1;

        let remote: HashSet<String> = remote.into_iter().collect();
        let local = self
            .db
            .entities()
            .active_source_ids(&config.tenant_id, &config.provider_id, entity_type)
            .await?;

        let missing: Vec<String> = local
            .into_iter()
            .filter(|id| !remote.contains(id))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        info!(
            entity_type = %entity_type,
            count = missing.len(),
            "Reconciling records missing at source"
        );

        for source_id in missing {
            let record = DeltaRecord::delete(entity_type, source_id, Utc::now());
            if let Err(err) = self.reconcile_record(config, &record, &mut progress.stats).await {
                self.record_failure(config, &record, &err, &mut progress.stats)
                    .await?;
            }
        }
        Ok(())
    }

    async fn reconcile_record(
        &self,
        config: &DeltaSyncConfig,
        record: &DeltaRecord,
        stats: &mut SyncStats,
    ) -> SyncResult<()> {
        let removed = self
            .db
            .entities()
            .soft_delete(
                &config.tenant_id,
                &config.provider_id,
                record.entity_type,
                &record.source_id,
                record.timestamp,
            )
            .await?;
        if !removed {
            return Ok(());
        }
        stats.deletes += 1;
        self.log(
            config,
            record,
            DeltaOperation::Delete,
            HistoryOutcome::Reconciled,
            0,
            None,
        )
        .await
    }

    // =========================================================================
    // Audit
    // =========================================================================

    async fn log(
        &self,
        config: &DeltaSyncConfig,
        record: &DeltaRecord,
        operation: DeltaOperation,
        outcome: HistoryOutcome,
        changed_fields: u32,
        source_hash: Option<&str>,
    ) -> SyncResult<()> {
        let entry = SyncHistoryEntry {
            id: Uuid::new_v4().to_string(),
            tenant_id: config.tenant_id.clone(),
            provider_id: config.provider_id.clone(),
            sync_run_id: config.sync_run_id.clone(),
            entity_type: record.entity_type,
            source_id: record.source_id.clone(),
            operation,
            outcome,
            changed_fields,
            payload: record.source_data.to_value(),
            source_hash: source_hash.map(str::to_string),
            recorded_at: Utc::now(),
        };
        self.db.history().append(&entry).await?;
        Ok(())
    }

    async fn record_failure(
        &self,
        config: &DeltaSyncConfig,
        record: &DeltaRecord,
        err: &SyncError,
        stats: &mut SyncStats,
    ) -> SyncResult<()> {
        warn!(
            entity_type = %record.entity_type,
            source_id = %record.source_id,
            error = %err,
            "Failed to apply record"
        );
        stats.errors += 1;

        let entry = SyncErrorEntry {
            id: Uuid::new_v4().to_string(),
            tenant_id: config.tenant_id.clone(),
            provider_id: config.provider_id.clone(),
            sync_run_id: config.sync_run_id.clone(),
            entity_type: record.entity_type,
            source_id: record.source_id.clone(),
            message: err.to_string(),
            payload: Some(record.source_data.to_value()),
            recorded_at: Utc::now(),
        };
        self.db.sync_errors().record(&entry).await?;
        Ok(())
    }
}

/// An upsert that reached arbitration.
struct Incoming<'a> {
    record: &'a DeltaRecord,
    data: SourceData,
    hash: String,
    changed_fields: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::FailureMode;
    use crate::provider::{DeltaPage, FetchPage, MemoryProvider, SourceRecord};
    use async_trait::async_trait;
    use roster_db::DbConfig;
    use serde_json::json;
    use std::time::Duration;

    fn data(value: serde_json::Value) -> SourceData {
        SourceData::from_value(value).unwrap()
    }

    fn fast_retry() -> PageRetry {
        PageRetry {
            initial_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(20),
            max_elapsed: Duration::from_secs(5),
        }
    }

    async fn setup() -> (Database, DeltaSyncEngine) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let engine = DeltaSyncEngine::new(db.clone()).with_page_retry(fast_retry());
        (db, engine)
    }

    fn seeded_provider() -> Arc<MemoryProvider> {
        Arc::new(
            MemoryProvider::new("sis")
                .with_record(EntityType::Org, "org-1", data(json!({"name": "North High"})))
                .with_record(EntityType::Class, "c-1", data(json!({"title": "Algebra"})))
                .with_record(EntityType::Student, "s-1", data(json!({"name": "Ana"})))
                .with_record(EntityType::Student, "s-2", data(json!({"name": "Ben"})))
                .with_record(EntityType::Student, "s-3", data(json!({"name": "Cy"}))),
        )
    }

    #[tokio::test]
    async fn test_first_run_creates_and_second_run_is_quiet() {
        let (db, engine) = setup().await;
        let provider = seeded_provider();
        let config = DeltaSyncConfig::new("t1", "p1", provider.clone());

        let stats = engine.execute_delta_sync(&config).await.unwrap();
        assert_eq!(stats.creates, 5);
        assert_eq!(stats.changes(), 5);

        let state = db.sync_state().get("t1", "p1").await.unwrap().unwrap();
        assert_eq!(state.status, SyncStateStatus::Idle);
        assert!(state.last_sync_time.is_some());
        assert!(state.last_delta_token.is_some());
        assert!(state.entity_cursors.is_empty());

        let stats = engine.execute_delta_sync(&config).await.unwrap();
        assert_eq!(stats.changes(), 0);
        assert_eq!(db.history().count("t1", "p1").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_types_fetched_in_dependency_order() {
        let (_db, engine) = setup().await;
        let provider = seeded_provider();
        let config = DeltaSyncConfig::new("t1", "p1", provider.clone()).entity_types(vec![
            EntityType::Student,
            EntityType::Class,
            EntityType::Org,
        ]);

        engine.execute_delta_sync(&config).await.unwrap();
        assert_eq!(
            provider.fetch_log().await,
            vec![EntityType::Org, EntityType::Student, EntityType::Class]
        );
    }

    #[tokio::test]
    async fn test_updates_and_deletes_between_runs() {
        let (db, engine) = setup().await;
        let provider = seeded_provider();
        let config = DeltaSyncConfig::new("t1", "p1", provider.clone());
        engine.execute_delta_sync(&config).await.unwrap();

        provider
            .upsert(EntityType::Student, "s-1", data(json!({"name": "Ana Maria"})))
            .await;
        provider.delete(EntityType::Student, "s-2").await;
        provider
            .upsert(EntityType::Student, "s-4", data(json!({"name": "Dee"})))
            .await;

        let stats = engine.execute_delta_sync(&config).await.unwrap();
        assert_eq!((stats.creates, stats.updates, stats.deletes), (1, 1, 1));

        let entities = db.entities();
        let ana = entities
            .find("t1", "p1", EntityType::Student, "s-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ana.data.get("name"), Some(&json!("Ana Maria")));
        assert_eq!(
            entities.count_active("t1", "p1", EntityType::Student).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_unchanged_hash_writes_history_only() {
        let (db, engine) = setup().await;
        let provider = Arc::new(
            MemoryProvider::new("sis")
                .with_delta(false)
                .with_record(EntityType::Org, "org-1", data(json!({"name": "North"}))),
        );
        let config = DeltaSyncConfig::new("t1", "p1", provider).entity_types(vec![EntityType::Org]);

        engine.execute_delta_sync(&config).await.unwrap();
        let stats = engine.execute_delta_sync(&config).await.unwrap();
        assert_eq!(stats.changes(), 0);

        let history = db
            .history()
            .list_for_source("t1", "p1", EntityType::Org, "org-1")
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].outcome, HistoryOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_full_fetch_skips_types_without_operation() {
        let (db, engine) = setup().await;
        let provider = Arc::new(
            MemoryProvider::new("sis")
                .with_delta(false)
                .with_deletion_detection(false)
                .with_record(EntityType::Term, "term-1", data(json!({"name": "Fall"})))
                .with_record(EntityType::Teacher, "t-1", data(json!({"name": "Kim"}))),
        );
        let config = DeltaSyncConfig::new("t1", "p1", provider);

        let stats = engine.execute_delta_sync(&config).await.unwrap();
        assert_eq!(stats.creates, 1);
        assert!(db
            .entities()
            .find("t1", "p1", EntityType::Term, "term-1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_paging_persists_and_clears_cursors() {
        let (db, engine) = setup().await;
        let provider = seeded_provider();
        let config = DeltaSyncConfig::new("t1", "p1", provider.clone())
            .entity_types(vec![EntityType::Student])
            .batch_size(1);

        let stats = engine.execute_delta_sync(&config).await.unwrap();
        assert_eq!(stats.creates, 3);
        assert_eq!(provider.fetch_calls().await, 3);

        let state = db.sync_state().get("t1", "p1").await.unwrap().unwrap();
        assert!(state.cursor(EntityType::Student).is_none());
    }

    #[tokio::test]
    async fn test_mapping_failure_is_recorded_and_run_continues() {
        let (db, engine) = setup().await;
        let provider = Arc::new(
            MemoryProvider::new("sis")
                .with_record(EntityType::Student, "s-1", data(json!({"mail": "a@x.org"})))
                .with_record(EntityType::Student, "s-2", data(json!({"name": "no mail"}))),
        );
        let mut mappings = BTreeMap::new();
        mappings.insert(
            EntityType::Student,
            vec![FieldMapping::new("mail", "email").required()],
        );
        let config = DeltaSyncConfig::new("t1", "p1", provider)
            .field_mappings(mappings)
            .sync_run_id("run-1");

        let stats = engine.execute_delta_sync(&config).await.unwrap();
        assert_eq!(stats.creates, 1);
        assert_eq!(stats.errors, 1);

        let errors = db.sync_errors().list_for_run("run-1").await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].source_id, "s-2");

        let stored = db
            .entities()
            .find("t1", "p1", EntityType::Student, "s-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.data.get("email"), Some(&json!("a@x.org")));
    }

    async fn edit_locally(db: &Database, source_id: &str, name: &str) {
        let entity = db
            .entities()
            .find("t1", "p1", EntityType::Student, source_id)
            .await
            .unwrap()
            .unwrap();
        db.entities()
            .apply_local_edit(&entity.id, &data(json!({"name": name})), Utc::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_target_wins_keeps_local_edit() {
        let (db, engine) = setup().await;
        let provider = seeded_provider();
        let config = DeltaSyncConfig::new("t1", "p1", provider.clone())
            .entity_types(vec![EntityType::Student])
            .conflict_policy(ConflictPolicy::TargetWins);
        engine.execute_delta_sync(&config).await.unwrap();

        edit_locally(&db, "s-1", "Ana (local)").await;
        provider
            .upsert(EntityType::Student, "s-1", data(json!({"name": "Ana (sis)"})))
            .await;

        let stats = engine.execute_delta_sync(&config).await.unwrap();
        assert_eq!(stats.conflicts, 1);
        assert_eq!(stats.updates, 0);

        let entity = db
            .entities()
            .find("t1", "p1", EntityType::Student, "s-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entity.data.get("name"), Some(&json!("Ana (local)")));

        let conflicts = db.conflicts().list_for_entity(&entity.id).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].status, ConflictStatus::Resolved);
        assert_eq!(conflicts[0].field, "name");
    }

    #[tokio::test]
    async fn test_manual_policy_defers_once() {
        let (db, engine) = setup().await;
        let provider = Arc::new(
            MemoryProvider::new("sis")
                .with_delta(false)
                .with_record(EntityType::Student, "s-1", data(json!({"name": "Ana"}))),
        );
        let config = DeltaSyncConfig::new("t1", "p1", provider.clone())
            .entity_types(vec![EntityType::Student])
            .conflict_policy(ConflictPolicy::Manual);
        engine.execute_delta_sync(&config).await.unwrap();

        edit_locally(&db, "s-1", "Ana (local)").await;
        provider
            .upsert(EntityType::Student, "s-1", data(json!({"name": "Ana (sis)"})))
            .await;

        let first = engine.execute_delta_sync(&config).await.unwrap();
        assert_eq!(first.conflicts, 1);
        let second = engine.execute_delta_sync(&config).await.unwrap();
        assert_eq!(second.conflicts, 0);

        let pending = db.conflicts().list_pending("t1", Some("p1")).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].source_payload, json!({"name": "Ana (sis)"}));
    }

    #[tokio::test]
    async fn test_newest_wins_applies_newer_source() {
        let (db, engine) = setup().await;
        let provider = seeded_provider();
        let config = DeltaSyncConfig::new("t1", "p1", provider.clone())
            .entity_types(vec![EntityType::Student])
            .conflict_policy(ConflictPolicy::NewestWins);
        engine.execute_delta_sync(&config).await.unwrap();

        edit_locally(&db, "s-1", "Ana (local)").await;
        provider
            .upsert_at(
                EntityType::Student,
                "s-1",
                data(json!({"name": "Ana (sis)"})),
                Utc::now() + chrono::Duration::minutes(5),
            )
            .await;

        let stats = engine.execute_delta_sync(&config).await.unwrap();
        assert_eq!((stats.conflicts, stats.updates), (1, 1));

        let entity = db
            .entities()
            .find("t1", "p1", EntityType::Student, "s-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entity.data.get("name"), Some(&json!("Ana (sis)")));
        assert!(!entity.is_locally_modified());
    }

    /// One student, full fetch only, without a source change time.
    struct Undated {
        name: std::sync::Mutex<String>,
    }

    #[async_trait]
    impl SisProvider for Undated {
        fn name(&self) -> &str {
            "undated"
        }
        fn supports_delta(&self) -> bool {
            false
        }
        fn supports_deletion_detection(&self) -> bool {
            false
        }
        async fn fetch_users(&self, _query: &FetchQuery) -> SyncResult<FetchPage> {
            let name = self.name.lock().unwrap().clone();
            Ok(FetchPage {
                records: vec![SourceRecord {
                    source_id: "s-1".into(),
                    data: data(json!({"name": name})),
                    updated_at: None,
                }],
                has_more: false,
                next_cursor: None,
            })
        }
    }

    #[tokio::test]
    async fn test_newest_wins_keeps_local_edit_over_undated_source() {
        let (db, engine) = setup().await;
        let provider = Arc::new(Undated {
            name: std::sync::Mutex::new("Ana".into()),
        });
        let config = DeltaSyncConfig::new("t1", "p1", provider.clone())
            .entity_types(vec![EntityType::Student])
            .conflict_policy(ConflictPolicy::NewestWins);
        engine.execute_delta_sync(&config).await.unwrap();

        edit_locally(&db, "s-1", "Ana (local)").await;
        *provider.name.lock().unwrap() = "Ana (sis)".into();

        let stats = engine.execute_delta_sync(&config).await.unwrap();
        assert_eq!((stats.conflicts, stats.updates), (1, 0));

        let entity = db
            .entities()
            .find("t1", "p1", EntityType::Student, "s-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entity.data.get("name"), Some(&json!("Ana (local)")));
    }

    /// One student whose reported hash never changes, whatever the payload.
    struct FixedHash {
        name: std::sync::Mutex<String>,
    }

    #[async_trait]
    impl SisProvider for FixedHash {
        fn name(&self) -> &str {
            "fixed-hash"
        }
        fn supports_delta(&self) -> bool {
            true
        }
        fn supports_deletion_detection(&self) -> bool {
            false
        }
        async fn fetch_delta(
            &self,
            entity_type: EntityType,
            _query: &DeltaQuery,
        ) -> SyncResult<DeltaPage> {
            let name = self.name.lock().unwrap().clone();
            let mut record = DeltaRecord::upsert(
                entity_type,
                DeltaOperation::Update,
                "s-1",
                data(json!({"name": name})),
                Utc::now(),
            );
            record.current_hash = Some("0000".into());
            Ok(DeltaPage {
                records: vec![record],
                has_more: false,
                next_cursor: None,
                delta_token: Some("1".into()),
            })
        }
    }

    #[tokio::test]
    async fn test_reported_hash_is_not_trusted() {
        let (db, engine) = setup().await;
        let provider = Arc::new(FixedHash {
            name: std::sync::Mutex::new("Ana".into()),
        });
        let config = DeltaSyncConfig::new("t1", "p1", provider.clone())
            .entity_types(vec![EntityType::Student]);

        let first = engine.execute_delta_sync(&config).await.unwrap();
        assert_eq!(first.creates, 1);

        let quiet = engine.execute_delta_sync(&config).await.unwrap();
        assert_eq!(quiet.changes(), 0);

        *provider.name.lock().unwrap() = "Ana Maria".into();
        let changed = engine.execute_delta_sync(&config).await.unwrap();
        assert_eq!(changed.updates, 1);

        let entity = db
            .entities()
            .find("t1", "p1", EntityType::Student, "s-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entity.data.get("name"), Some(&json!("Ana Maria")));
        assert_eq!(
            entity.source_hash,
            content_hash(&data(json!({"name": "Ana Maria"})))
        );
    }

    #[tokio::test]
    async fn test_reconciliation_soft_deletes_missing_ids() {
        let (db, engine) = setup().await;
        let provider = seeded_provider();
        let config = DeltaSyncConfig::new("t1", "p1", provider.clone())
            .entity_types(vec![EntityType::Student]);
        engine.execute_delta_sync(&config).await.unwrap();

        provider.remove_silently(EntityType::Student, "s-2").await;
        let stats = engine.execute_delta_sync(&config).await.unwrap();
        assert_eq!(stats.deletes, 1);

        let ids = db
            .entities()
            .active_source_ids("t1", "p1", EntityType::Student)
            .await
            .unwrap();
        assert_eq!(ids, vec!["s-1".to_string(), "s-3".to_string()]);

        let history = db
            .history()
            .list_for_source("t1", "p1", EntityType::Student, "s-2")
            .await
            .unwrap();
        assert_eq!(history.last().unwrap().outcome, HistoryOutcome::Reconciled);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_in_run() {
        let (_db, engine) = setup().await;
        let provider = seeded_provider();
        provider.fail_next(2, FailureMode::Unavailable).await;
        let config = DeltaSyncConfig::new("t1", "p1", provider.clone())
            .entity_types(vec![EntityType::Org]);

        let stats = engine.execute_delta_sync(&config).await.unwrap();
        assert_eq!(stats.creates, 1);
        assert_eq!(provider.fetch_calls().await, 3);
    }

    #[tokio::test]
    async fn test_failed_run_marks_state_error() {
        let (db, engine) = setup().await;
        let engine = engine.with_page_retry(PageRetry::disabled());
        let provider = seeded_provider();
        provider.fail_next(1, FailureMode::Unavailable).await;
        let config = DeltaSyncConfig::new("t1", "p1", provider);

        let err = engine.execute_delta_sync(&config).await.unwrap_err();
        assert!(err.is_retryable());

        let state = db.sync_state().get("t1", "p1").await.unwrap().unwrap();
        assert_eq!(state.status, SyncStateStatus::Error);
        assert!(state.error_message.unwrap().contains("unavailable"));
        assert!(state.last_sync_time.is_none());
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let (_db, engine) = setup().await;
        let provider = seeded_provider();
        provider.fail_next(1, FailureMode::Rejected).await;
        let config = DeltaSyncConfig::new("t1", "p1", provider.clone());

        let err = engine.execute_delta_sync(&config).await.unwrap_err();
        assert!(matches!(err, SyncError::ProviderRejected(_)));
        assert_eq!(provider.fetch_calls().await, 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_pauses() {
        let (db, engine) = setup().await;
        let provider = seeded_provider();
        let cancel = Arc::new(AtomicBool::new(true));
        let config = DeltaSyncConfig::new("t1", "p1", provider.clone()).cancel_flag(cancel);

        let outcome = engine.execute(&config).await.unwrap();
        assert!(outcome.cancelled);
        assert_eq!(provider.fetch_calls().await, 0);

        let state = db.sync_state().get("t1", "p1").await.unwrap().unwrap();
        assert_eq!(state.status, SyncStateStatus::Paused);
    }

    #[tokio::test]
    async fn test_rate_limit_spaces_fetches() {
        let (_db, engine) = setup().await;
        let provider = Arc::new(
            MemoryProvider::new("sis")
                .with_deletion_detection(false)
                .with_rate_limit(Duration::from_millis(30)),
        );
        let config = DeltaSyncConfig::new("t1", "p1", provider.clone()).entity_types(vec![
            EntityType::Org,
            EntityType::Class,
            EntityType::Student,
        ]);

        let started = std::time::Instant::now();
        engine.execute_delta_sync(&config).await.unwrap();
        assert_eq!(provider.fetch_calls().await, 3);
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    /// Two pages of students; the second page fails while `fail` is set.
    struct TwoPages {
        fail: AtomicBool,
        cursors: tokio::sync::Mutex<Vec<Option<String>>>,
        omit_cursor: bool,
    }

    impl TwoPages {
        fn new(fail: bool, omit_cursor: bool) -> Self {
            TwoPages {
                fail: AtomicBool::new(fail),
                cursors: tokio::sync::Mutex::new(Vec::new()),
                omit_cursor,
            }
        }
    }

    #[async_trait]
    impl SisProvider for TwoPages {
        fn name(&self) -> &str {
            "two-pages"
        }
        fn supports_delta(&self) -> bool {
            true
        }
        fn supports_deletion_detection(&self) -> bool {
            false
        }
        async fn fetch_delta(
            &self,
            entity_type: EntityType,
            query: &DeltaQuery,
        ) -> SyncResult<DeltaPage> {
            self.cursors.lock().await.push(query.cursor.clone());
            let now = Utc::now();
            match query.cursor.as_deref() {
                None => Ok(DeltaPage {
                    records: vec![DeltaRecord::upsert(
                        entity_type,
                        DeltaOperation::Create,
                        "s-1",
                        data(json!({"name": "Ana"})),
                        now,
                    )],
                    has_more: true,
                    next_cursor: (!self.omit_cursor).then(|| "page-2".to_string()),
                    delta_token: Some("7".into()),
                }),
                Some(_) if self.fail.load(Ordering::SeqCst) => {
                    Err(SyncError::ProviderRejected("page 2 unavailable".into()))
                }
                Some(_) => Ok(DeltaPage {
                    records: vec![DeltaRecord::upsert(
                        entity_type,
                        DeltaOperation::Create,
                        "s-2",
                        data(json!({"name": "Ben"})),
                        now,
                    )],
                    has_more: false,
                    next_cursor: None,
                    delta_token: Some("7".into()),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_failed_run_resumes_from_cursor() {
        let (db, engine) = setup().await;
        let provider = Arc::new(TwoPages::new(true, false));
        let config = DeltaSyncConfig::new("t1", "p1", provider.clone())
            .entity_types(vec![EntityType::Student]);

        assert!(engine.execute_delta_sync(&config).await.is_err());
        let state = db.sync_state().get("t1", "p1").await.unwrap().unwrap();
        assert_eq!(state.cursor(EntityType::Student), Some("page-2"));

        provider.fail.store(false, Ordering::SeqCst);
        let stats = engine.execute_delta_sync(&config).await.unwrap();
        assert_eq!(stats.creates, 1);

        let cursors = provider.cursors.lock().await.clone();
        assert_eq!(cursors.last().unwrap().as_deref(), Some("page-2"));
        assert_eq!(
            db.entities()
                .count_active("t1", "p1", EntityType::Student)
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_more_pages_without_cursor_fails() {
        let (_db, engine) = setup().await;
        let provider = Arc::new(TwoPages::new(false, true));
        let config = DeltaSyncConfig::new("t1", "p1", provider)
            .entity_types(vec![EntityType::Student]);

        let err = engine.execute_delta_sync(&config).await.unwrap_err();
        assert!(matches!(err, SyncError::MissingCursor { .. }));
    }
}
