//! # Audit Repositories
//!
//! `sync_history` is the FERPA audit trail: one row per applied delta record,
//! insert-only. Triggers in the schema reject UPDATE and DELETE, and this
//! repository exposes no way to issue either.
//!
//! `sync_error` holds record-level failures that did not stop their batch.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use roster_core::{DeltaOperation, EntityType, HistoryOutcome, SyncErrorEntry, SyncHistoryEntry};

use super::{from_json, to_json};
use crate::error::DbResult;

// =============================================================================
// History
// =============================================================================

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: String,
    tenant_id: String,
    provider_id: String,
    sync_run_id: Option<String>,
    entity_type: EntityType,
    source_id: String,
    operation: DeltaOperation,
    outcome: HistoryOutcome,
    changed_fields: i64,
    payload: String,
    source_hash: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl HistoryRow {
    fn into_entry(self) -> DbResult<SyncHistoryEntry> {
        Ok(SyncHistoryEntry {
            id: self.id,
            tenant_id: self.tenant_id,
            provider_id: self.provider_id,
            sync_run_id: self.sync_run_id,
            entity_type: self.entity_type,
            source_id: self.source_id,
            operation: self.operation,
            outcome: self.outcome,
            changed_fields: self.changed_fields.max(0) as u32,
            payload: from_json("sync_history.payload", &self.payload)?,
            source_hash: self.source_hash,
            recorded_at: self.recorded_at,
        })
    }
}

/// Append-only repository for the audit trail.
#[derive(Debug, Clone)]
pub struct SyncHistoryRepository {
    pool: SqlitePool,
}

impl SyncHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncHistoryRepository { pool }
    }

    /// Appends one audit row.
    pub async fn append(&self, entry: &SyncHistoryEntry) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_history (
                id, tenant_id, provider_id, sync_run_id, entity_type, source_id,
                operation, outcome, changed_fields, payload, source_hash, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.tenant_id)
        .bind(&entry.provider_id)
        .bind(&entry.sync_run_id)
        .bind(entry.entity_type)
        .bind(&entry.source_id)
        .bind(entry.operation)
        .bind(entry.outcome)
        .bind(i64::from(entry.changed_fields))
        .bind(to_json("sync_history.payload", &entry.payload)?)
        .bind(&entry.source_hash)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// History of one source record, oldest first.
    pub async fn list_for_source(
        &self,
        tenant_id: &str,
        provider_id: &str,
        entity_type: EntityType,
        source_id: &str,
    ) -> DbResult<Vec<SyncHistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, tenant_id, provider_id, sync_run_id, entity_type, source_id,
                   operation, outcome, changed_fields, payload, source_hash, recorded_at
            FROM sync_history
            WHERE tenant_id = ?1 AND provider_id = ?2 AND entity_type = ?3 AND source_id = ?4
            ORDER BY recorded_at ASC, rowid ASC
            "#,
        )
        .bind(tenant_id)
        .bind(provider_id)
        .bind(entity_type)
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HistoryRow::into_entry).collect()
    }

    /// All rows written by one run, in insertion order.
    pub async fn list_for_run(&self, sync_run_id: &str) -> DbResult<Vec<SyncHistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, tenant_id, provider_id, sync_run_id, entity_type, source_id,
                   operation, outcome, changed_fields, payload, source_hash, recorded_at
            FROM sync_history
            WHERE sync_run_id = ?1
            ORDER BY rowid ASC
            "#,
        )
        .bind(sync_run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HistoryRow::into_entry).collect()
    }

    /// Total rows for a (tenant, provider).
    pub async fn count(&self, tenant_id: &str, provider_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sync_history WHERE tenant_id = ?1 AND provider_id = ?2",
        )
        .bind(tenant_id)
        .bind(provider_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

// =============================================================================
// Record Errors
// =============================================================================

#[derive(sqlx::FromRow)]
struct ErrorRow {
    id: String,
    tenant_id: String,
    provider_id: String,
    sync_run_id: Option<String>,
    entity_type: EntityType,
    source_id: String,
    message: String,
    payload: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl ErrorRow {
    fn into_entry(self) -> DbResult<SyncErrorEntry> {
        let payload = match self.payload {
            Some(text) => Some(from_json("sync_error.payload", &text)?),
            None => None,
        };
        Ok(SyncErrorEntry {
            id: self.id,
            tenant_id: self.tenant_id,
            provider_id: self.provider_id,
            sync_run_id: self.sync_run_id,
            entity_type: self.entity_type,
            source_id: self.source_id,
            message: self.message,
            payload,
            recorded_at: self.recorded_at,
        })
    }
}

/// Repository for record-level sync failures.
#[derive(Debug, Clone)]
pub struct SyncErrorRepository {
    pool: SqlitePool,
}

impl SyncErrorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncErrorRepository { pool }
    }

    pub async fn record(&self, entry: &SyncErrorEntry) -> DbResult<()> {
        let payload = match &entry.payload {
            Some(value) => Some(to_json("sync_error.payload", value)?),
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO sync_error (
                id, tenant_id, provider_id, sync_run_id, entity_type, source_id,
                message, payload, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.tenant_id)
        .bind(&entry.provider_id)
        .bind(&entry.sync_run_id)
        .bind(entry.entity_type)
        .bind(&entry.source_id)
        .bind(&entry.message)
        .bind(payload)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_for_run(&self, sync_run_id: &str) -> DbResult<Vec<SyncErrorEntry>> {
        let rows = sqlx::query_as::<_, ErrorRow>(
            r#"
            SELECT id, tenant_id, provider_id, sync_run_id, entity_type, source_id,
                   message, payload, recorded_at
            FROM sync_error
            WHERE sync_run_id = ?1
            ORDER BY rowid ASC
            "#,
        )
        .bind(sync_run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ErrorRow::into_entry).collect()
    }

    pub async fn count(&self, tenant_id: &str, provider_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sync_error WHERE tenant_id = ?1 AND provider_id = ?2",
        )
        .bind(tenant_id)
        .bind(provider_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::{Database, DbConfig};
    use serde_json::json;
    use uuid::Uuid;

    fn entry(run: &str, source_id: &str) -> SyncHistoryEntry {
        SyncHistoryEntry {
            id: Uuid::new_v4().to_string(),
            tenant_id: "t1".into(),
            provider_id: "p1".into(),
            sync_run_id: Some(run.into()),
            entity_type: EntityType::Student,
            source_id: source_id.into(),
            operation: DeltaOperation::Update,
            outcome: HistoryOutcome::Unchanged,
            changed_fields: 0,
            payload: json!({"name": "Ann"}),
            source_hash: Some("h".into()),
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_and_list() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.history();

        repo.append(&entry("run-1", "s-1")).await.unwrap();
        repo.append(&entry("run-1", "s-2")).await.unwrap();
        repo.append(&entry("run-2", "s-1")).await.unwrap();

        assert_eq!(repo.list_for_run("run-1").await.unwrap().len(), 2);
        let s1 = repo
            .list_for_source("t1", "p1", EntityType::Student, "s-1")
            .await
            .unwrap();
        assert_eq!(s1.len(), 2);
        assert_eq!(s1[0].payload, json!({"name": "Ann"}));
        assert_eq!(repo.count("t1", "p1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_history_is_append_only() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.history().append(&entry("run-1", "s-1")).await.unwrap();

        let update: DbError = sqlx::query("UPDATE sync_history SET outcome = 'applied'")
            .execute(db.pool())
            .await
            .unwrap_err()
            .into();
        assert!(matches!(update, DbError::ConstraintViolation(_)));

        let delete = sqlx::query("DELETE FROM sync_history").execute(db.pool()).await;
        assert!(delete.is_err());
        assert_eq!(db.history().count("t1", "p1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_record_errors() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sync_errors();

        repo.record(&SyncErrorEntry {
            id: Uuid::new_v4().to_string(),
            tenant_id: "t1".into(),
            provider_id: "p1".into(),
            sync_run_id: Some("run-1".into()),
            entity_type: EntityType::Teacher,
            source_id: "x-1".into(),
            message: "Required field 'email' is missing".into(),
            payload: Some(json!({"name": "Bob"})),
            recorded_at: Utc::now(),
        })
        .await
        .unwrap();

        let errors = repo.list_for_run("run-1").await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].source_id, "x-1");
        assert_eq!(errors[0].payload, Some(json!({"name": "Bob"})));
        assert_eq!(repo.count("t1", "p1").await.unwrap(), 1);
    }
}
