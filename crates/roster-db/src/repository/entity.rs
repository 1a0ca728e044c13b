//! # Roster Entity Repository
//!
//! The local store sync writes land in. Deletes are soft (`deleted_at`), so
//! history stays joinable and a record that reappears is revived in place.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use roster_core::{EntityType, LocalEntity, SourceData};

use super::{from_json, to_json};
use crate::error::{DbError, DbResult};

#[derive(sqlx::FromRow)]
struct EntityRow {
    id: String,
    tenant_id: String,
    provider_id: String,
    entity_type: EntityType,
    source_id: String,
    data: String,
    source_hash: String,
    last_synced_at: DateTime<Utc>,
    local_modified_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EntityRow {
    fn into_entity(self) -> DbResult<LocalEntity> {
        let data: SourceData = from_json("roster_entities.data", &self.data)?;
        Ok(LocalEntity {
            id: self.id,
            tenant_id: self.tenant_id,
            provider_id: self.provider_id,
            entity_type: self.entity_type,
            source_id: self.source_id,
            data,
            source_hash: self.source_hash,
            last_synced_at: self.last_synced_at,
            local_modified_at: self.local_modified_at,
            deleted_at: self.deleted_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SELECT_ENTITY: &str = r#"
    SELECT id, tenant_id, provider_id, entity_type, source_id, data, source_hash,
           last_synced_at, local_modified_at, deleted_at, created_at, updated_at
    FROM roster_entities
"#;

/// Repository for local roster records.
#[derive(Debug, Clone)]
pub struct EntityRepository {
    pool: SqlitePool,
}

impl EntityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        EntityRepository { pool }
    }

    /// Finds a record by its source identity, including soft-deleted ones.
    pub async fn find(
        &self,
        tenant_id: &str,
        provider_id: &str,
        entity_type: EntityType,
        source_id: &str,
    ) -> DbResult<Option<LocalEntity>> {
        let sql = format!(
            "{} WHERE tenant_id = ?1 AND provider_id = ?2 AND entity_type = ?3 AND source_id = ?4",
            SELECT_ENTITY
        );
        let row = sqlx::query_as::<_, EntityRow>(&sql)
            .bind(tenant_id)
            .bind(provider_id)
            .bind(entity_type)
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(EntityRow::into_entity).transpose()
    }

    /// Loads a record by local id.
    pub async fn get(&self, id: &str) -> DbResult<LocalEntity> {
        let sql = format!("{} WHERE id = ?1", SELECT_ENTITY);
        let row = sqlx::query_as::<_, EntityRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Entity", id))?;

        row.into_entity()
    }

    /// Inserts a newly synced record.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        &self,
        tenant_id: &str,
        provider_id: &str,
        entity_type: EntityType,
        source_id: &str,
        data: &SourceData,
        source_hash: &str,
        synced_at: DateTime<Utc>,
    ) -> DbResult<LocalEntity> {
        let entity = LocalEntity {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            provider_id: provider_id.to_string(),
            entity_type,
            source_id: source_id.to_string(),
            data: data.clone(),
            source_hash: source_hash.to_string(),
            last_synced_at: synced_at,
            local_modified_at: None,
            deleted_at: None,
            created_at: synced_at,
            updated_at: synced_at,
        };

        sqlx::query(
            r#"
            INSERT INTO roster_entities (
                id, tenant_id, provider_id, entity_type, source_id, data, source_hash,
                last_synced_at, local_modified_at, deleted_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, NULL, ?8, ?8)
            "#,
        )
        .bind(&entity.id)
        .bind(&entity.tenant_id)
        .bind(&entity.provider_id)
        .bind(entity.entity_type)
        .bind(&entity.source_id)
        .bind(to_json("roster_entities.data", &entity.data)?)
        .bind(&entity.source_hash)
        .bind(synced_at)
        .execute(&self.pool)
        .await?;

        Ok(entity)
    }

    /// Overwrites a record with synced data.
    ///
    /// Clears the local-modification marker and revives soft-deleted rows.
    pub async fn apply_sync(
        &self,
        id: &str,
        data: &SourceData,
        source_hash: &str,
        synced_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE roster_entities SET
                data = ?2,
                source_hash = ?3,
                last_synced_at = ?4,
                local_modified_at = NULL,
                deleted_at = NULL,
                updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(to_json("roster_entities.data", data)?)
        .bind(source_hash)
        .bind(synced_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Entity", id));
        }
        Ok(())
    }

    /// Records that the incoming hash was seen without touching local data.
    ///
    /// Used when local edits win a conflict: the next run with the same
    /// payload is then a no-op instead of a repeated conflict.
    pub async fn acknowledge_hash(
        &self,
        id: &str,
        source_hash: &str,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE roster_entities SET source_hash = ?2, updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(source_hash)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Applies a local (operator) edit and stamps `local_modified_at`.
    pub async fn apply_local_edit(
        &self,
        id: &str,
        data: &SourceData,
        modified_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE roster_entities SET
                data = ?2,
                local_modified_at = ?3,
                updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(to_json("roster_entities.data", data)?)
        .bind(modified_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Entity", id));
        }
        Ok(())
    }

    /// Soft-deletes an active record. Returns false if it was absent or
    /// already deleted.
    pub async fn soft_delete(
        &self,
        tenant_id: &str,
        provider_id: &str,
        entity_type: EntityType,
        source_id: &str,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE roster_entities SET deleted_at = ?5, updated_at = ?5
            WHERE tenant_id = ?1 AND provider_id = ?2 AND entity_type = ?3
              AND source_id = ?4 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(provider_id)
        .bind(entity_type)
        .bind(source_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Source ids of all active records of one type.
    pub async fn active_source_ids(
        &self,
        tenant_id: &str,
        provider_id: &str,
        entity_type: EntityType,
    ) -> DbResult<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT source_id FROM roster_entities
            WHERE tenant_id = ?1 AND provider_id = ?2 AND entity_type = ?3
              AND deleted_at IS NULL
            ORDER BY source_id
            "#,
        )
        .bind(tenant_id)
        .bind(provider_id)
        .bind(entity_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Counts active records of one type.
    pub async fn count_active(
        &self,
        tenant_id: &str,
        provider_id: &str,
        entity_type: EntityType,
    ) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM roster_entities
            WHERE tenant_id = ?1 AND provider_id = ?2 AND entity_type = ?3
              AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(provider_id)
        .bind(entity_type)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
