//! # Lock Repository
//!
//! Table-backed provider locks, used when several daemon instances share one
//! database. A row is a held lock; expiry makes an abandoned lock reclaimable.
//!
//! ```text
//! try_acquire(key)
//!   1. DELETE rows whose expires_at has passed
//!   2. INSERT ... SELECT ... WHERE tenant holds < limit
//!        ON CONFLICT(lock_key) DO NOTHING
//!   3. nothing inserted?  key present  -> AlreadyHeld
//!                         key absent   -> TenantLimitReached
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use roster_core::LockAcquisition;

use crate::error::DbResult;

/// Current owner of a lock row.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LockHolder {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LockRepository {
    pool: SqlitePool,
}

impl LockRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LockRepository { pool }
    }

    /// Tries to take `lock_key` for `holder`.
    ///
    /// `tenant_limit` caps how many locks one tenant may hold at once;
    /// `None` means no cap.
    #[allow(clippy::too_many_arguments)]
    pub async fn try_acquire(
        &self,
        lock_key: &str,
        tenant_id: &str,
        provider_id: &str,
        holder: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        tenant_limit: Option<u32>,
    ) -> DbResult<LockAcquisition> {
        let reclaimed = sqlx::query("DELETE FROM sync_locks WHERE expires_at <= ?1")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if reclaimed > 0 {
            warn!(reclaimed, "Reclaimed expired sync locks");
        }

        let limit = tenant_limit.map(i64::from).unwrap_or(i64::MAX);
        let inserted = sqlx::query(
            r#"
            INSERT INTO sync_locks (lock_key, tenant_id, provider_id, holder, acquired_at, expires_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6
            WHERE (SELECT COUNT(*) FROM sync_locks WHERE tenant_id = ?2) < ?7
            ON CONFLICT (lock_key) DO NOTHING
            "#,
        )
        .bind(lock_key)
        .bind(tenant_id)
        .bind(provider_id)
        .bind(holder)
        .bind(now)
        .bind(expires_at)
        .bind(limit)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted > 0 {
            debug!(lock_key, holder, "Lock acquired");
            return Ok(LockAcquisition::Acquired);
        }

        match self.holder(lock_key).await? {
            Some(current) => Ok(LockAcquisition::AlreadyHeld {
                holder: current.holder,
            }),
            None => Ok(LockAcquisition::TenantLimitReached {
                limit: tenant_limit.unwrap_or(u32::MAX),
            }),
        }
    }

    /// Releases `lock_key` if `holder` still owns it.
    pub async fn release(&self, lock_key: &str, holder: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM sync_locks WHERE lock_key = ?1 AND holder = ?2")
            .bind(lock_key)
            .bind(holder)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn holder(&self, lock_key: &str) -> DbResult<Option<LockHolder>> {
        let row = sqlx::query_as::<_, LockHolder>(
            "SELECT holder, acquired_at, expires_at FROM sync_locks WHERE lock_key = ?1",
        )
        .bind(lock_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}
