//! # Provider Locks
//!
//! Serialises runs of one (tenant, provider) and caps how many providers a
//! tenant may sync at once.
//!
//! ## Backends
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  LockManager ──► Arc<dyn LockStore>                                     │
//! │                     │                                                   │
//! │                     ├── MemoryLockStore    one process                  │
//! │                     └── DatabaseLockStore  instances sharing a database │
//! │                                                                         │
//! │  key    = "sync:{tenant}:{provider}"                                    │
//! │  holder = "{instance}:{run id}"  (release only by the same holder)      │
//! │  expiry = lock timeout; an expired lock is reclaimed by the next taker  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use roster_core::{provider_lock_key, LockAcquisition};
use roster_db::{Database, LockRepository};

use crate::config::{LockBackend, SyncConfig};
use crate::error::{SyncError, SyncResult};

/// Arguments to [`LockStore::try_acquire`].
#[derive(Debug, Clone)]
pub struct LockRequest<'a> {
    pub lock_key: &'a str,
    pub tenant_id: &'a str,
    pub provider_id: &'a str,
    pub holder: &'a str,
    pub ttl: Duration,
    /// Most locks one tenant may hold; `None` means no cap.
    pub tenant_limit: Option<u32>,
}

/// Storage for provider locks.
#[async_trait]
pub trait LockStore: Send + Sync {
    async fn try_acquire(&self, request: &LockRequest<'_>) -> SyncResult<LockAcquisition>;

    /// Releases `lock_key` if `holder` still owns it.
    async fn release(&self, lock_key: &str, holder: &str) -> SyncResult<bool>;

    async fn holder(&self, lock_key: &str) -> SyncResult<Option<String>>;
}

// =============================================================================
// In-Process Store
// =============================================================================

#[derive(Debug, Clone)]
struct HeldLock {
    tenant_id: String,
    holder: String,
    expires_at: Instant,
}

/// Locks held in process memory.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    locks: Mutex<HashMap<String, HeldLock>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_acquire(&self, request: &LockRequest<'_>) -> SyncResult<LockAcquisition> {
        let mut locks = self.locks.lock().await;
        let now = Instant::now();

        let before = locks.len();
        locks.retain(|_, lock| lock.expires_at > now);
        if locks.len() < before {
            warn!(reclaimed = before - locks.len(), "Reclaimed expired sync locks");
        }

        if let Some(current) = locks.get(request.lock_key) {
            return Ok(LockAcquisition::AlreadyHeld {
                holder: current.holder.clone(),
            });
        }

        if let Some(limit) = request.tenant_limit {
            let held = locks
                .values()
                .filter(|lock| lock.tenant_id == request.tenant_id)
                .count();
            if held >= limit as usize {
                return Ok(LockAcquisition::TenantLimitReached { limit });
            }
        }

        locks.insert(
            request.lock_key.to_string(),
            HeldLock {
                tenant_id: request.tenant_id.to_string(),
                holder: request.holder.to_string(),
                expires_at: now + request.ttl,
            },
        );
        Ok(LockAcquisition::Acquired)
    }

    async fn release(&self, lock_key: &str, holder: &str) -> SyncResult<bool> {
        let mut locks = self.locks.lock().await;
        match locks.get(lock_key) {
            Some(current) if current.holder == holder => {
                locks.remove(lock_key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn holder(&self, lock_key: &str) -> SyncResult<Option<String>> {
        let locks = self.locks.lock().await;
        let now = Instant::now();
        Ok(locks
            .get(lock_key)
            .filter(|lock| lock.expires_at > now)
            .map(|lock| lock.holder.clone()))
    }
}

// =============================================================================
// Database Store
// =============================================================================

/// Locks stored in the `sync_locks` table.
#[derive(Debug, Clone)]
pub struct DatabaseLockStore {
    repo: LockRepository,
}

impl DatabaseLockStore {
    pub fn new(db: &Database) -> Self {
        DatabaseLockStore { repo: db.locks() }
    }
}

#[async_trait]
impl LockStore for DatabaseLockStore {
    async fn try_acquire(&self, request: &LockRequest<'_>) -> SyncResult<LockAcquisition> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(request.ttl)
            .map_err(|e| SyncError::InvalidConfig(format!("lock timeout out of range: {}", e)))?;

        let acquisition = self
            .repo
            .try_acquire(
                request.lock_key,
                request.tenant_id,
                request.provider_id,
                request.holder,
                now,
                now + ttl,
                request.tenant_limit,
            )
            .await?;
        Ok(acquisition)
    }

    async fn release(&self, lock_key: &str, holder: &str) -> SyncResult<bool> {
        Ok(self.repo.release(lock_key, holder).await?)
    }

    async fn holder(&self, lock_key: &str) -> SyncResult<Option<String>> {
        let current = self.repo.holder(lock_key).await?;
        Ok(current
            .filter(|lock| lock.expires_at > Utc::now())
            .map(|lock| lock.holder))
    }
}

// =============================================================================
// Lock Manager
// =============================================================================

/// A held provider lock. Pass it back to [`LockManager::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderLock {
    pub key: String,
    pub holder: String,
    pub tenant_id: String,
    pub provider_id: String,
}

/// Takes and releases provider locks for one daemon instance.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    instance_id: String,
    ttl: Duration,
    tenant_limit: Option<u32>,
}

impl LockManager {
    pub fn new(
        store: Arc<dyn LockStore>,
        instance_id: impl Into<String>,
        ttl: Duration,
        tenant_limit: Option<u32>,
    ) -> Self {
        LockManager {
            store,
            instance_id: instance_id.into(),
            ttl,
            tenant_limit,
        }
    }

    /// Builds a manager on the backend named in the config.
    pub fn from_config(config: &SyncConfig, db: &Database) -> Self {
        let store: Arc<dyn LockStore> = match config.scheduler.lock_backend {
            LockBackend::Memory => Arc::new(MemoryLockStore::new()),
            LockBackend::Database => Arc::new(DatabaseLockStore::new(db)),
        };
        LockManager::new(
            store,
            config.instance_id(),
            config.lock_timeout(),
            config.scheduler.tenant_limit(),
        )
    }

    /// Takes the lock for (tenant, provider) on behalf of `run_id`.
    ///
    /// Contention comes back as [`SyncError::AlreadyInProgress`] or
    /// [`SyncError::TenantLimitReached`].
    pub async fn acquire(
        &self,
        tenant_id: &str,
        provider_id: &str,
        run_id: &str,
    ) -> SyncResult<ProviderLock> {
        let key = provider_lock_key(tenant_id, provider_id);
        let holder = format!("{}:{}", self.instance_id, run_id);

        let request = LockRequest {
            lock_key: &key,
            tenant_id,
            provider_id,
            holder: &holder,
            ttl: self.ttl,
            tenant_limit: self.tenant_limit,
        };

        match self.store.try_acquire(&request).await? {
            LockAcquisition::Acquired => {
                debug!(lock_key = %key, holder = %holder, "Provider lock acquired");
                Ok(ProviderLock {
                    key,
                    holder,
                    tenant_id: tenant_id.to_string(),
                    provider_id: provider_id.to_string(),
                })
            }
            LockAcquisition::AlreadyHeld { holder } => Err(SyncError::AlreadyInProgress {
                tenant_id: tenant_id.to_string(),
                provider_id: provider_id.to_string(),
                holder,
            }),
            LockAcquisition::TenantLimitReached { limit } => Err(SyncError::TenantLimitReached {
                tenant_id: tenant_id.to_string(),
                limit,
            }),
        }
    }

    pub async fn release(&self, lock: &ProviderLock) -> SyncResult<bool> {
        let released = self.store.release(&lock.key, &lock.holder).await?;
        if !released {
            warn!(
                lock_key = %lock.key,
                holder = %lock.holder,
                "Provider lock was no longer held at release"
            );
        }
        Ok(released)
    }

    /// Current holder of the (tenant, provider) lock, if any.
    pub async fn holder(&self, tenant_id: &str, provider_id: &str) -> SyncResult<Option<String>> {
        self.store
            .holder(&provider_lock_key(tenant_id, provider_id))
            .await
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("instance_id", &self.instance_id)
            .field("ttl", &self.ttl)
            .field("tenant_limit", &self.tenant_limit)
            .finish()
    }
}
