//! # Queue Repository
//!
//! Durable job queue backing the processor.
//!
//! ## Claim Order
//! ```text
//! eligible = status IN (pending, retrying) AND process_at <= now
//!
//! ORDER BY attempts ASC      fresh work before retries
//!          process_at ASC    oldest due first
//!          priority DESC     ties go to the higher priority
//! ```
//!
//! A claim is one `UPDATE ... WHERE id = (SELECT ...) RETURNING` statement,
//! so concurrent processors sharing the database can never claim the same
//! row. Completed jobs are deleted; `failed` rows are the dead-letter set.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use roster_core::{EntityType, JobRequest, JobStatus, SyncJob};

use super::{from_json, to_json};
use crate::error::{DbError, DbResult};

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    tenant_id: String,
    provider_id: String,
    entity_types: String,
    priority: i64,
    status: JobStatus,
    attempts: i64,
    max_attempts: i64,
    process_at: DateTime<Utc>,
    last_error: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn into_job(self) -> DbResult<SyncJob> {
        let entity_types: Vec<EntityType> =
            from_json("sync_queue.entity_types", &self.entity_types)?;
        Ok(SyncJob {
            id: self.id,
            tenant_id: self.tenant_id,
            provider_id: self.provider_id,
            entity_types,
            priority: self.priority as i32,
            status: self.status,
            attempts: self.attempts.max(0) as u32,
            max_attempts: self.max_attempts.max(0) as u32,
            scheduled_at: self.process_at,
            error: self.last_error,
            claimed_at: self.claimed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const JOB_COLUMNS: &str = "id, tenant_id, provider_id, entity_types, priority, status, attempts, \
     max_attempts, process_at, last_error, claimed_at, created_at, updated_at";

/// Repository for the sync job queue.
#[derive(Debug, Clone)]
pub struct QueueRepository {
    pool: SqlitePool,
}

impl QueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        QueueRepository { pool }
    }

    /// Inserts a pending job, due at `request.scheduled_at` or now.
    pub async fn enqueue(&self, request: &JobRequest, max_attempts: u32) -> DbResult<SyncJob> {
        let now = Utc::now();
        let job = SyncJob {
            id: Uuid::new_v4().to_string(),
            tenant_id: request.tenant_id.clone(),
            provider_id: request.provider_id.clone(),
            entity_types: request.entity_types.clone().unwrap_or_default(),
            priority: request.priority,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts,
            scheduled_at: request.scheduled_at.unwrap_or(now),
            error: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO sync_queue (
                id, tenant_id, provider_id, entity_types, priority, status,
                attempts, max_attempts, process_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?9, ?9)
            "#,
        )
        .bind(&job.id)
        .bind(&job.tenant_id)
        .bind(&job.provider_id)
        .bind(to_json("sync_queue.entity_types", &job.entity_types)?)
        .bind(i64::from(job.priority))
        .bind(job.status)
        .bind(i64::from(job.max_attempts))
        .bind(job.scheduled_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(job_id = %job.id, tenant_id = %job.tenant_id, provider_id = %job.provider_id, "Job enqueued");
        Ok(job)
    }

    pub async fn get(&self, id: &str) -> DbResult<SyncJob> {
        let sql = format!("SELECT {} FROM sync_queue WHERE id = ?1", JOB_COLUMNS);
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Job", id))?;

        row.into_job()
    }

    /// Atomically claims the next eligible job, if any.
    pub async fn dequeue(&self, now: DateTime<Utc>) -> DbResult<Option<SyncJob>> {
        let sql = format!(
            r#"
            UPDATE sync_queue SET status = 'processing', claimed_at = ?1, updated_at = ?1
            WHERE id = (
                SELECT id FROM sync_queue
                WHERE status IN ('pending', 'retrying') AND process_at <= ?1
                ORDER BY attempts ASC, process_at ASC, priority DESC, rowid ASC
                LIMIT 1
            )
            RETURNING {}
            "#,
            JOB_COLUMNS
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        row.map(JobRow::into_job).transpose()
    }

    /// Removes a finished job.
    pub async fn complete(&self, id: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM sync_queue WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records a failed attempt and schedules the next one.
    pub async fn schedule_retry(
        &self,
        id: &str,
        attempts: u32,
        process_at: DateTime<Utc>,
        error: &str,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE sync_queue SET
                status = 'retrying',
                attempts = ?2,
                process_at = ?3,
                last_error = ?4,
                claimed_at = NULL,
                updated_at = ?5
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(i64::from(attempts))
        .bind(process_at)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Moves a job to the dead-letter set.
    pub async fn mark_dead(&self, id: &str, attempts: u32, error: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE sync_queue SET
                status = 'failed',
                attempts = ?2,
                last_error = ?3,
                claimed_at = NULL,
                updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(i64::from(attempts))
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Puts a claimed job back to pending without charging an attempt.
    pub async fn requeue(&self, id: &str, process_at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE sync_queue SET
                status = 'pending',
                process_at = ?2,
                claimed_at = NULL,
                updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(process_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Resets dead letters (optionally for one tenant) to pending with zero
    /// attempts, due immediately. Returns how many were requeued.
    pub async fn retry_failed(&self, tenant_id: Option<&str>) -> DbResult<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE sync_queue SET
                status = 'pending',
                attempts = 0,
                process_at = ?2,
                last_error = NULL,
                claimed_at = NULL,
                updated_at = ?2
            WHERE status = 'failed' AND (?1 IS NULL OR tenant_id = ?1)
            "#,
        )
        .bind(tenant_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Dead letters, oldest first.
    pub async fn list_dead_letters(&self, tenant_id: Option<&str>) -> DbResult<Vec<SyncJob>> {
        let sql = format!(
            "SELECT {} FROM sync_queue WHERE status = 'failed' \
             AND (?1 IS NULL OR tenant_id = ?1) ORDER BY updated_at ASC, rowid ASC",
            JOB_COLUMNS
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    /// Releases jobs claimed before `claimed_before` back to pending.
    pub async fn release_stale(&self, claimed_before: DateTime<Utc>) -> DbResult<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE sync_queue SET
                status = 'pending',
                process_at = ?2,
                claimed_at = NULL,
                updated_at = ?2
            WHERE status = 'processing' AND claimed_at < ?1
            "#,
        )
        .bind(claimed_before)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Number of jobs waiting to be claimed (pending or retrying).
    pub async fn depth(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sync_queue WHERE status IN ('pending', 'retrying')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Number of jobs currently claimed.
    pub async fn processing_count(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue WHERE status = 'processing'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::Duration;

    async fn setup() -> QueueRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().queue()
    }

    #[tokio::test]
    async fn test_enqueue_and_claim() {
        let repo = setup().await;
        let job = repo
            .enqueue(
                &JobRequest::new("t1", "p1").entity_types(vec![EntityType::Student]),
                5,
            )
            .await
            .unwrap();
        assert_eq!(repo.depth().await.unwrap(), 1);

        let claimed = repo.dequeue(Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.entity_types, vec![EntityType::Student]);
        assert!(claimed.claimed_at.is_some());

        // Nothing else is eligible
        assert!(repo.dequeue(Utc::now()).await.unwrap().is_none());
        assert_eq!(repo.processing_count().await.unwrap(), 1);

        repo.complete(&job.id).await.unwrap();
        assert!(matches!(repo.get(&job.id).await, Err(DbError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_claim_order() {
        let repo = setup().await;
        let now = Utc::now();
        let earlier = now - Duration::seconds(30);

        let retried = repo
            .enqueue(&JobRequest::new("t1", "retried").scheduled_at(earlier), 5)
            .await
            .unwrap();
        repo.schedule_retry(&retried.id, 1, earlier, "boom").await.unwrap();

        let low = repo
            .enqueue(&JobRequest::new("t1", "low").scheduled_at(earlier), 5)
            .await
            .unwrap();
        let high = repo
            .enqueue(&JobRequest::new("t1", "high").priority(10).scheduled_at(earlier), 5)
            .await
            .unwrap();
        let future = repo
            .enqueue(&JobRequest::new("t1", "future").scheduled_at(now + Duration::hours(1)), 5)
            .await
            .unwrap();

        let order: Vec<String> = {
            let mut ids = Vec::new();
            while let Some(job) = repo.dequeue(now).await.unwrap() {
                ids.push(job.id);
            }
            ids
        };

        assert_eq!(order, vec![high.id, low.id, retried.id]);
        assert_eq!(repo.get(&future.id).await.unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_dead_letter_and_retry_failed() {
        let repo = setup().await;
        let job = repo.enqueue(&JobRequest::new("t1", "p1"), 2).await.unwrap();
        repo.dequeue(Utc::now()).await.unwrap();
        repo.mark_dead(&job.id, 2, "provider down").await.unwrap();

        let dead = repo.list_dead_letters(Some("t1")).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].error.as_deref(), Some("provider down"));
        assert!(dead[0].is_exhausted());
        assert!(repo.list_dead_letters(Some("t2")).await.unwrap().is_empty());
        assert_eq!(repo.depth().await.unwrap(), 0);

        assert_eq!(repo.retry_failed(None).await.unwrap(), 1);
        let reset = repo.get(&job.id).await.unwrap();
        assert_eq!(reset.status, JobStatus::Pending);
        assert_eq!(reset.attempts, 0);
        assert!(repo.dequeue(Utc::now()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_requeue_keeps_attempts() {
        let repo = setup().await;
        let job = repo.enqueue(&JobRequest::new("t1", "p1"), 5).await.unwrap();
        repo.dequeue(Utc::now()).await.unwrap();
        repo.schedule_retry(&job.id, 2, Utc::now(), "x").await.unwrap();
        repo.dequeue(Utc::now()).await.unwrap();

        repo.requeue(&job.id, Utc::now()).await.unwrap();
        let requeued = repo.get(&job.id).await.unwrap();
        assert_eq!(requeued.status, JobStatus::Pending);
        assert_eq!(requeued.attempts, 2);
    }

    #[tokio::test]
    async fn test_release_stale_claims() {
        let repo = setup().await;
        let job = repo
            .enqueue(
                &JobRequest::new("t1", "p1").scheduled_at(Utc::now() - Duration::hours(1)),
                5,
            )
            .await
            .unwrap();

        // Claimed half an hour ago by a processor that never finished
        let claimed = repo
            .dequeue(Utc::now() - Duration::minutes(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, job.id);

        assert_eq!(repo.release_stale(Utc::now() - Duration::hours(1)).await.unwrap(), 0);
        assert_eq!(repo.release_stale(Utc::now() + Duration::seconds(1)).await.unwrap(), 1);
        assert_eq!(repo.get(&job.id).await.unwrap().status, JobStatus::Pending);
    }
}
