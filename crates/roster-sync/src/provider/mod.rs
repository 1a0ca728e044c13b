//! # SIS Provider Contract
//!
//! The capability contract every SIS adapter implements, and the factory the
//! service uses to resolve (tenant, provider) to an adapter.
//!
//! ## Capabilities
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SisProvider                                      │
//! │                                                                         │
//! │  supports_delta() ──► true   fetch_delta(type, query) page by page     │
//! │                   └─► false  fetch_orgs / fetch_users(role) /          │
//! │                              fetch_classes / fetch_enrollments         │
//! │                                                                         │
//! │  supports_deletion_detection() ──► get_all_source_ids(type)            │
//! │                                    (reconciliation pass)                │
//! │                                                                         │
//! │  rate_limit_delay() ──► pause between page fetches                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Wire formats and authentication belong to concrete adapters. The crate
//! ships [`MemoryProvider`], a scripted adapter for tests and fixture runs.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use roster_core::{DeltaRecord, EntityType, SourceData};

use crate::error::{SyncError, SyncResult};

pub use memory::MemoryProvider;

// =============================================================================
// Query and Page Types
// =============================================================================

/// Arguments to [`SisProvider::fetch_delta`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaQuery {
    /// Last successful sync time, absent on a first run.
    pub since: Option<DateTime<Utc>>,
    /// Continuation cursor for this entity type.
    pub cursor: Option<String>,
    /// Provider-wide delta token from the previous run.
    pub delta_token: Option<String>,
    pub limit: usize,
    pub filters: BTreeMap<String, String>,
}

/// One page of changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaPage {
    pub records: Vec<DeltaRecord>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
    pub delta_token: Option<String>,
}

/// Arguments to the full-fetch operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchQuery {
    pub cursor: Option<String>,
    pub limit: usize,
    /// User role for `fetch_users` (`teacher`, `student`, `parent`).
    pub role: Option<String>,
    pub filters: BTreeMap<String, String>,
}

/// A full record returned by a non-delta fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source_id: String,
    #[serde(default)]
    pub data: SourceData,
    /// Last change at the source, if the SIS reports one.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// One page of full records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchPage {
    pub records: Vec<SourceRecord>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

// =============================================================================
// Provider Trait
// =============================================================================

/// A Student Information System adapter.
///
/// Optional operations default to [`SyncError::Unsupported`].
#[async_trait]
pub trait SisProvider: Send + Sync {
    /// Short provider name used in logs.
    fn name(&self) -> &str;

    fn supports_delta(&self) -> bool;

    fn supports_deletion_detection(&self) -> bool;

    /// Minimum pause between consecutive page fetches.
    fn rate_limit_delay(&self) -> Option<Duration> {
        None
    }

    async fn fetch_delta(
        &self,
        entity_type: EntityType,
        _query: &DeltaQuery,
    ) -> SyncResult<DeltaPage> {
        Err(unsupported("fetch_delta", entity_type))
    }

    /// Every source id currently present at the SIS for one type.
    async fn get_all_source_ids(
        &self,
        entity_type: EntityType,
        _filters: &BTreeMap<String, String>,
    ) -> SyncResult<Vec<String>> {
        Err(unsupported("get_all_source_ids", entity_type))
    }

    async fn fetch_orgs(&self, _query: &FetchQuery) -> SyncResult<FetchPage> {
        Err(unsupported("fetch_orgs", EntityType::Org))
    }

    async fn fetch_users(&self, _query: &FetchQuery) -> SyncResult<FetchPage> {
        Err(SyncError::Unsupported {
            operation: "fetch_users".into(),
        })
    }

    async fn fetch_classes(&self, _query: &FetchQuery) -> SyncResult<FetchPage> {
        Err(unsupported("fetch_classes", EntityType::Class))
    }

    async fn fetch_enrollments(&self, _query: &FetchQuery) -> SyncResult<FetchPage> {
        Err(unsupported("fetch_enrollments", EntityType::Enrollment))
    }
}

fn unsupported(operation: &str, entity_type: EntityType) -> SyncError {
    SyncError::Unsupported {
        operation: format!("{} ({})", operation, entity_type),
    }
}

/// Routes a full fetch for `entity_type` to the matching provider operation.
///
/// Returns `None` for types that have no full-fetch operation.
pub async fn fetch_full_page(
    provider: &dyn SisProvider,
    entity_type: EntityType,
    query: &FetchQuery,
) -> Option<SyncResult<FetchPage>> {
    match entity_type {
        EntityType::Org => Some(provider.fetch_orgs(query).await),
        EntityType::Teacher | EntityType::Student | EntityType::Parent => {
            let mut query = query.clone();
            query.role = entity_type.user_role().map(str::to_string);
            Some(provider.fetch_users(&query).await)
        }
        EntityType::Class => Some(provider.fetch_classes(query).await),
        EntityType::Enrollment => Some(provider.fetch_enrollments(query).await),
        EntityType::Term | EntityType::Relationship | EntityType::Demographic => None,
    }
}

// =============================================================================
// Provider Factory
// =============================================================================

/// Resolves a (tenant, provider) pair to an adapter.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, tenant_id: &str, provider_id: &str) -> SyncResult<Arc<dyn SisProvider>>;
}

/// A factory over a fixed set of adapters.
#[derive(Default, Clone)]
pub struct StaticProviderFactory {
    providers: HashMap<(String, String), Arc<dyn SisProvider>>,
}

impl StaticProviderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        tenant_id: impl Into<String>,
        provider_id: impl Into<String>,
        provider: Arc<dyn SisProvider>,
    ) {
        self.providers
            .insert((tenant_id.into(), provider_id.into()), provider);
    }

    pub fn with(
        mut self,
        tenant_id: impl Into<String>,
        provider_id: impl Into<String>,
        provider: Arc<dyn SisProvider>,
    ) -> Self {
        self.register(tenant_id, provider_id, provider);
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl ProviderFactory for StaticProviderFactory {
    fn create(&self, tenant_id: &str, provider_id: &str) -> SyncResult<Arc<dyn SisProvider>> {
        self.providers
            .get(&(tenant_id.to_string(), provider_id.to_string()))
            .cloned()
            .ok_or_else(|| SyncError::UnknownProvider {
                tenant_id: tenant_id.to_string(),
                provider_id: provider_id.to_string(),
            })
    }
}

impl std::fmt::Debug for StaticProviderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.providers.keys().collect();
        keys.sort();
        f.debug_struct("StaticProviderFactory")
            .field("providers", &keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DeltaOnly;

    #[async_trait]
    impl SisProvider for DeltaOnly {
        fn name(&self) -> &str {
            "delta-only"
        }
        fn supports_delta(&self) -> bool {
            true
        }
        fn supports_deletion_detection(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_default_operations_are_unsupported() {
        let provider = DeltaOnly;
        assert!(provider.rate_limit_delay().is_none());

        let err = provider
            .fetch_delta(EntityType::Student, &DeltaQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Unsupported { .. }));
        assert!(!err.is_retryable());

        assert!(fetch_full_page(&provider, EntityType::Term, &FetchQuery::default())
            .await
            .is_none());
        let users = fetch_full_page(&provider, EntityType::Parent, &FetchQuery::default())
            .await
            .unwrap();
        assert!(users.is_err());
    }

    #[test]
    fn test_static_factory() {
        let factory = StaticProviderFactory::new().with("t1", "p1", Arc::new(DeltaOnly));
        assert_eq!(factory.len(), 1);
        assert_eq!(factory.create("t1", "p1").unwrap().name(), "delta-only");

        let err = factory.create("t1", "p2").err().unwrap();
        assert!(err.is_config_error());
    }
}
