//! # Sync Run Repository
//!
//! One row per `run_sync` invocation, written `running` at start and closed
//! with a terminal status.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use roster_core::{RunStatus, SyncRun, SyncStats};

use super::{from_json, to_json};
use crate::error::{DbError, DbResult};

#[derive(sqlx::FromRow)]
struct RunRow {
    id: String,
    tenant_id: String,
    provider_id: String,
    job_id: Option<String>,
    status: RunStatus,
    stats: String,
    error: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl RunRow {
    fn into_run(self) -> DbResult<SyncRun> {
        let stats: SyncStats = from_json("sync_runs.stats", &self.stats)?;
        Ok(SyncRun {
            id: self.id,
            tenant_id: self.tenant_id,
            provider_id: self.provider_id,
            job_id: self.job_id,
            status: self.status,
            stats,
            error: self.error,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

const SELECT_RUN: &str = r#"
    SELECT id, tenant_id, provider_id, job_id, status, stats, error, started_at, finished_at
    FROM sync_runs
"#;

#[derive(Debug, Clone)]
pub struct RunRepository {
    pool: SqlitePool,
}

impl RunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        RunRepository { pool }
    }

    /// Opens a run in `running` state.
    pub async fn start(
        &self,
        id: &str,
        tenant_id: &str,
        provider_id: &str,
        job_id: Option<&str>,
        started_at: DateTime<Utc>,
    ) -> DbResult<SyncRun> {
        let run = SyncRun {
            id: id.to_string(),
            tenant_id: tenant_id.to_string(),
            provider_id: provider_id.to_string(),
            job_id: job_id.map(str::to_string),
            status: RunStatus::Running,
            stats: SyncStats::default(),
            error: None,
            started_at,
            finished_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO sync_runs (id, tenant_id, provider_id, job_id, status, stats, started_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&run.id)
        .bind(&run.tenant_id)
        .bind(&run.provider_id)
        .bind(&run.job_id)
        .bind(run.status)
        .bind(to_json("sync_runs.stats", &run.stats)?)
        .bind(run.started_at)
        .execute(&self.pool)
        .await?;

        Ok(run)
    }

    /// Closes a run with its terminal status and counters.
    pub async fn finish(
        &self,
        id: &str,
        status: RunStatus,
        stats: &SyncStats,
        error: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_runs SET status = ?2, stats = ?3, error = ?4, finished_at = ?5
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(to_json("sync_runs.stats", stats)?)
        .bind(error)
        .bind(finished_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SyncRun", id));
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> DbResult<SyncRun> {
        let sql = format!("{} WHERE id = ?1", SELECT_RUN);
        let row = sqlx::query_as::<_, RunRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("SyncRun", id))?;

        row.into_run()
    }

    /// Most recently started run for a provider.
    pub async fn latest(&self, tenant_id: &str, provider_id: &str) -> DbResult<Option<SyncRun>> {
        let sql = format!(
            "{} WHERE tenant_id = ?1 AND provider_id = ?2 ORDER BY started_at DESC, rowid DESC LIMIT 1",
            SELECT_RUN
        );
        let row = sqlx::query_as::<_, RunRow>(&sql)
            .bind(tenant_id)
            .bind(provider_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(RunRow::into_run).transpose()
    }

    /// Runs for a provider, newest first.
    pub async fn list_recent(
        &self,
        tenant_id: &str,
        provider_id: &str,
        limit: u32,
    ) -> DbResult<Vec<SyncRun>> {
        let sql = format!(
            "{} WHERE tenant_id = ?1 AND provider_id = ?2 ORDER BY started_at DESC, rowid DESC LIMIT ?3",
            SELECT_RUN
        );
        let rows = sqlx::query_as::<_, RunRow>(&sql)
            .bind(tenant_id)
            .bind(provider_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(RunRow::into_run).collect()
    }
}
