//! # Sync State Repository
//!
//! One checkpoint row per (tenant, provider). Rows are created on the first
//! sync attempt and never deleted.
//!
//! Every write bumps `revision`. A run claims the row once at start; later
//! saves only land while the row still carries the revision that run last
//! wrote, so a run that lost its lock cannot overwrite its successor.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::debug;

use roster_core::{SyncState, SyncStateStatus, SyncStats};

use super::{from_json, to_json};
use crate::error::{DbError, DbResult};

#[derive(sqlx::FromRow)]
struct SyncStateRow {
    tenant_id: String,
    provider_id: String,
    last_sync_time: Option<DateTime<Utc>>,
    last_delta_token: Option<String>,
    entity_cursors: String,
    status: SyncStateStatus,
    stats: String,
    error_message: Option<String>,
    revision: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SyncStateRow {
    fn into_state(self) -> DbResult<SyncState> {
        let entity_cursors: BTreeMap<String, String> =
            from_json("sync_state.entity_cursors", &self.entity_cursors)?;
        let stats: SyncStats = from_json("sync_state.stats", &self.stats)?;

        Ok(SyncState {
            tenant_id: self.tenant_id,
            provider_id: self.provider_id,
            last_sync_time: self.last_sync_time,
            last_delta_token: self.last_delta_token,
            entity_cursors,
            status: self.status,
            stats,
            error_message: self.error_message,
            revision: self.revision,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Repository for sync checkpoints.
#[derive(Debug, Clone)]
pub struct SyncStateRepository {
    pool: SqlitePool,
}

impl SyncStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncStateRepository { pool }
    }

    /// Loads the state for (tenant, provider), if any sync was ever attempted.
    pub async fn get(&self, tenant_id: &str, provider_id: &str) -> DbResult<Option<SyncState>> {
        let row = sqlx::query_as::<_, SyncStateRow>(
            r#"
            SELECT tenant_id, provider_id, last_sync_time, last_delta_token,
                   entity_cursors, status, stats, error_message, revision, created_at, updated_at
            FROM sync_state
            WHERE tenant_id = ?1 AND provider_id = ?2
            "#,
        )
        .bind(tenant_id)
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SyncStateRow::into_state).transpose()
    }

    /// Loads the state, creating a fresh idle row on first use.
    pub async fn get_or_create(&self, tenant_id: &str, provider_id: &str) -> DbResult<SyncState> {
        let fresh = SyncState::new(tenant_id, provider_id);

        let result = sqlx::query(
            r#"
            INSERT INTO sync_state (
                tenant_id, provider_id, entity_cursors, status, stats, created_at, updated_at
            ) VALUES (?1, ?2, '{}', ?3, ?4, ?5, ?5)
            ON CONFLICT (tenant_id, provider_id) DO NOTHING
            "#,
        )
        .bind(tenant_id)
        .bind(provider_id)
        .bind(SyncStateStatus::Idle)
        .bind(to_json("sync_state.stats", &fresh.stats)?)
        .bind(fresh.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!(tenant_id, provider_id, "Created sync state");
        }

        match self.get(tenant_id, provider_id).await? {
            Some(state) => Ok(state),
            None => Ok(fresh),
        }
    }

    /// Takes the row over for a new run, whatever revision it carries.
    ///
    /// Writes every mutable field of `state` and leaves `state.revision` at
    /// the stored value, so later [`save`](Self::save) calls from this run
    /// succeed until someone else claims the row.
    pub async fn claim(&self, state: &mut SyncState) -> DbResult<()> {
        let revision: i64 = sqlx::query_scalar(
            r#"
            UPDATE sync_state SET
                last_sync_time = ?3,
                last_delta_token = ?4,
                entity_cursors = ?5,
                status = ?6,
                stats = ?7,
                error_message = ?8,
                revision = revision + 1,
                updated_at = ?9
            WHERE tenant_id = ?1 AND provider_id = ?2
            RETURNING revision
            "#,
        )
        .bind(&state.tenant_id)
        .bind(&state.provider_id)
        .bind(state.last_sync_time)
        .bind(&state.last_delta_token)
        .bind(to_json("sync_state.entity_cursors", &state.entity_cursors)?)
        .bind(state.status)
        .bind(to_json("sync_state.stats", &state.stats)?)
        .bind(&state.error_message)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound {
            entity: "sync_state".into(),
            id: format!("{}/{}", state.tenant_id, state.provider_id),
        })?;

        state.revision = revision;
        Ok(())
    }

    /// Writes every mutable field of `state` if the stored row is still at
    /// `state.revision`, then advances `state.revision`.
    ///
    /// Returns false, writing nothing, when another writer got there first.
    pub async fn save(&self, state: &mut SyncState) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_state SET
                last_sync_time = ?4,
                last_delta_token = ?5,
                entity_cursors = ?6,
                status = ?7,
                stats = ?8,
                error_message = ?9,
                revision = revision + 1,
                updated_at = ?10
            WHERE tenant_id = ?1 AND provider_id = ?2 AND revision = ?3
            "#,
        )
        .bind(&state.tenant_id)
        .bind(&state.provider_id)
        .bind(state.revision)
        .bind(state.last_sync_time)
        .bind(&state.last_delta_token)
        .bind(to_json("sync_state.entity_cursors", &state.entity_cursors)?)
        .bind(state.status)
        .bind(to_json("sync_state.stats", &state.stats)?)
        .bind(&state.error_message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(
                tenant_id = %state.tenant_id,
                provider_id = %state.provider_id,
                revision = state.revision,
                "Stale sync state write skipped"
            );
            return Ok(false);
        }
        state.revision += 1;
        Ok(true)
    }

    /// Lists every checkpoint for a tenant.
    pub async fn list_for_tenant(&self, tenant_id: &str) -> DbResult<Vec<SyncState>> {
        let rows = sqlx::query_as::<_, SyncStateRow>(
            r#"
            SELECT tenant_id, provider_id, last_sync_time, last_delta_token,
                   entity_cursors, status, stats, error_message, revision, created_at, updated_at
            FROM sync_state
            WHERE tenant_id = ?1
            ORDER BY provider_id
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SyncStateRow::into_state).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use roster_core::EntityType;

    #[tokio::test]
    async fn test_get_or_create_then_save() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sync_state();

        assert!(repo.get("t1", "p1").await.unwrap().is_none());

        let mut state = repo.get_or_create("t1", "p1").await.unwrap();
        assert_eq!(state.status, SyncStateStatus::Idle);
        assert!(state.entity_cursors.is_empty());

        state.status = SyncStateStatus::Syncing;
        state.set_cursor(EntityType::Student, "page-3");
        state.last_delta_token = Some("tok-9".into());
        state.stats.creates = 4;
        assert!(repo.save(&mut state).await.unwrap());
        assert_eq!(state.revision, 1);

        let loaded = repo.get_or_create("t1", "p1").await.unwrap();
        assert_eq!(loaded.status, SyncStateStatus::Syncing);
        assert_eq!(loaded.cursor(EntityType::Student), Some("page-3"));
        assert_eq!(loaded.last_delta_token.as_deref(), Some("tok-9"));
        assert_eq!(loaded.stats.creates, 4);
        assert_eq!(loaded.revision, 1);
        assert_eq!(repo.list_for_tenant("t1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_claim_fences_out_stale_writer() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sync_state();

        let mut old_run = repo.get_or_create("t1", "p1").await.unwrap();
        old_run.status = SyncStateStatus::Syncing;
        repo.claim(&mut old_run).await.unwrap();

        let mut new_run = repo.get("t1", "p1").await.unwrap().unwrap();
        repo.claim(&mut new_run).await.unwrap();
        new_run.status = SyncStateStatus::Idle;
        new_run.last_delta_token = Some("tok-new".into());
        assert!(repo.save(&mut new_run).await.unwrap());

        old_run.status = SyncStateStatus::Paused;
        old_run.last_delta_token = None;
        assert!(!repo.save(&mut old_run).await.unwrap());

        let stored = repo.get("t1", "p1").await.unwrap().unwrap();
        assert_eq!(stored.status, SyncStateStatus::Idle);
        assert_eq!(stored.last_delta_token.as_deref(), Some("tok-new"));
        assert_eq!(stored.revision, new_run.revision);
    }

    #[tokio::test]
    async fn test_claim_requires_existing_row() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut state = SyncState::new("t1", "missing");
        assert!(matches!(
            db.sync_state().claim(&mut state).await,
            Err(DbError::NotFound { .. })
        ));
    }
}
