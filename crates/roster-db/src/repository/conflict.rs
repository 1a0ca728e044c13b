//! # Conflict Repository
//!
//! Conflicts are written by the engine when an incoming change meets a
//! locally modified record under any policy other than `source_wins`.
//! Pending rows wait for an operator; resolved rows are kept as history.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use roster_core::{ConflictResolution, ConflictStatus, EntityType, SyncConflict};

use super::{from_json, to_json};
use crate::error::{DbError, DbResult};

#[derive(sqlx::FromRow)]
struct ConflictRow {
    id: String,
    tenant_id: String,
    provider_id: String,
    entity_type: EntityType,
    entity_id: String,
    source_id: String,
    field: String,
    source_value: String,
    target_value: String,
    status: ConflictStatus,
    resolution: Option<ConflictResolution>,
    source_payload: String,
    source_hash: String,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl ConflictRow {
    fn into_conflict(self) -> DbResult<SyncConflict> {
        Ok(SyncConflict {
            id: self.id,
            tenant_id: self.tenant_id,
            provider_id: self.provider_id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            source_id: self.source_id,
            field: self.field,
            source_value: from_json("sync_conflict.source_value", &self.source_value)?,
            target_value: from_json("sync_conflict.target_value", &self.target_value)?,
            status: self.status,
            resolution: self.resolution,
            source_payload: from_json("sync_conflict.source_payload", &self.source_payload)?,
            source_hash: self.source_hash,
            created_at: self.created_at,
            resolved_at: self.resolved_at,
        })
    }
}

const SELECT_CONFLICT: &str = r#"
    SELECT id, tenant_id, provider_id, entity_type, entity_id, source_id, field,
           source_value, target_value, status, resolution, source_payload,
           source_hash, created_at, resolved_at
    FROM sync_conflict
"#;

/// Repository for sync conflicts.
#[derive(Debug, Clone)]
pub struct ConflictRepository {
    pool: SqlitePool,
}

impl ConflictRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ConflictRepository { pool }
    }

    pub async fn insert(&self, conflict: &SyncConflict) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_conflict (
                id, tenant_id, provider_id, entity_type, entity_id, source_id, field,
                source_value, target_value, status, resolution, source_payload,
                source_hash, created_at, resolved_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(&conflict.id)
        .bind(&conflict.tenant_id)
        .bind(&conflict.provider_id)
        .bind(conflict.entity_type)
        .bind(&conflict.entity_id)
        .bind(&conflict.source_id)
        .bind(&conflict.field)
        .bind(to_json("sync_conflict.source_value", &conflict.source_value)?)
        .bind(to_json("sync_conflict.target_value", &conflict.target_value)?)
        .bind(conflict.status)
        .bind(conflict.resolution)
        .bind(to_json("sync_conflict.source_payload", &conflict.source_payload)?)
        .bind(&conflict.source_hash)
        .bind(conflict.created_at)
        .bind(conflict.resolved_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> DbResult<SyncConflict> {
        let sql = format!("{} WHERE id = ?1", SELECT_CONFLICT);
        let row = sqlx::query_as::<_, ConflictRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Conflict", id))?;

        row.into_conflict()
    }

    /// Pending conflicts for a tenant, optionally narrowed to one provider.
    pub async fn list_pending(
        &self,
        tenant_id: &str,
        provider_id: Option<&str>,
    ) -> DbResult<Vec<SyncConflict>> {
        let sql = format!(
            "{} WHERE tenant_id = ?1 AND (?2 IS NULL OR provider_id = ?2) \
             AND status = 'pending' ORDER BY created_at ASC, rowid ASC",
            SELECT_CONFLICT
        );
        let rows = sqlx::query_as::<_, ConflictRow>(&sql)
            .bind(tenant_id)
            .bind(provider_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ConflictRow::into_conflict).collect()
    }

    /// Every conflict recorded against one local entity, oldest first.
    pub async fn list_for_entity(&self, entity_id: &str) -> DbResult<Vec<SyncConflict>> {
        let sql = format!(
            "{} WHERE entity_id = ?1 ORDER BY created_at ASC, rowid ASC",
            SELECT_CONFLICT
        );
        let rows = sqlx::query_as::<_, ConflictRow>(&sql)
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ConflictRow::into_conflict).collect()
    }

    /// Marks a pending conflict resolved. Returns false if it was not pending.
    pub async fn resolve(
        &self,
        id: &str,
        resolution: ConflictResolution,
        resolved_at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_conflict SET status = 'resolved', resolution = ?2, resolved_at = ?3
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(resolution)
        .bind(resolved_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count_pending(&self, tenant_id: &str, provider_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM sync_conflict
            WHERE tenant_id = ?1 AND provider_id = ?2 AND status = 'pending'
            "#,
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
    use crate::{Database, DbConfig};
    use serde_json::json;
    use uuid::Uuid;

    fn conflict(provider: &str, status: ConflictStatus) -> SyncConflict {
        SyncConflict {
            id: Uuid::new_v4().to_string(),
            tenant_id: "t1".into(),
            provider_id: provider.into(),
            entity_type: EntityType::Student,
            entity_id: "e-1".into(),
            source_id: "s-1".into(),
            field: "name".into(),
            source_value: json!("Ann Lee"),
            target_value: json!("Annie"),
            status,
            resolution: None,
            source_payload: json!({"name": "Ann Lee"}),
            source_hash: "h2".into(),
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_list_pending() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.conflicts();

        let a = conflict("p1", ConflictStatus::Pending);
        repo.insert(&a).await.unwrap();
        repo.insert(&conflict("p2", ConflictStatus::Pending)).await.unwrap();

        let mut resolved = conflict("p1", ConflictStatus::Resolved);
        resolved.resolution = Some(ConflictResolution::Target);
        resolved.resolved_at = Some(Utc::now());
        repo.insert(&resolved).await.unwrap();

        assert_eq!(repo.list_pending("t1", None).await.unwrap().len(), 2);
        let p1 = repo.list_pending("t1", Some("p1")).await.unwrap();
        assert_eq!(p1.len(), 1);
        assert_eq!(p1[0].id, a.id);
        assert_eq!(p1[0].source_value, json!("Ann Lee"));
        assert_eq!(repo.count_pending("t1", "p1").await.unwrap(), 1);
        assert_eq!(repo.list_for_entity("e-1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_resolve_only_once() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.conflicts();
        let c = conflict("p1", ConflictStatus::Pending);
        repo.insert(&c).await.unwrap();

        assert!(repo.resolve(&c.id, ConflictResolution::Manual, Utc::now()).await.unwrap());
        assert!(!repo.resolve(&c.id, ConflictResolution::Source, Utc::now()).await.unwrap());

        let loaded = repo.get(&c.id).await.unwrap();
        assert_eq!(loaded.status, ConflictStatus::Resolved);
        assert_eq!(loaded.resolution, Some(ConflictResolution::Manual));
        assert!(loaded.resolved_at.is_some());
    }
}
