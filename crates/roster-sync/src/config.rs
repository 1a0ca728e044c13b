//! # Sync Configuration
//!
//! Configuration management for the sync daemon and engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     ROSTER_INSTANCE_ID=sync-node-1                                     │
//! │     ROSTER_DATABASE_PATH=/var/lib/roster/roster.db                     │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/roster-sync/sync.toml (Linux)                            │
//! │     ~/Library/Application Support/com.roster.sync/sync.toml (macOS)    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     memory locks, 4 workers, source_wins                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [instance]
//! id = "sync-node-1"
//!
//! [database]
//! path = "/var/lib/roster/roster.db"
//!
//! [sync]
//! batch_size = 100
//! conflict_policy = "newest_wins"
//!
//! [queue]
//! concurrency = 4
//! max_attempts = 5
//!
//! [scheduler]
//! lock_backend = "database"
//! tenant_concurrency = 2
//!
//! [[providers]]
//! tenant_id = "district-12"
//! provider_id = "clever"
//! schedule = "*/15 * * * *"
//! entity_types = ["org", "teacher", "student", "class", "enrollment"]
//! fixture = "fixtures/clever.json"
//!
//! [[providers.field_mappings.student]]
//! source_field = "email"
//! target_field = "email"
//! transform = "lowercase"
//! required = true
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use roster_core::{
    ConflictPolicy, ConflictScope, CronExpression, EntityType, FieldMapping, DEFAULT_BATCH_SIZE,
    DEFAULT_MAX_ATTEMPTS,
};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Instance Configuration
// =============================================================================

/// Identity of this daemon process. Used as the first half of lock holders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(default = "default_instance_id")]
    pub id: String,
}

fn default_instance_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("roster-{}", &suffix[..8])
}

impl Default for InstanceConfig {
    fn default() -> Self {
        InstanceConfig {
            id: default_instance_id(),
        }
    }
}

// =============================================================================
// Database Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path. `:memory:` gives a throwaway database.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("com", "roster", "sync")
        .map(|dirs| dirs.data_dir().join("roster.db"))
        .unwrap_or_else(|| PathBuf::from("roster.db"))
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Engine defaults, overridable per provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Records requested per provider page.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub conflict_policy: ConflictPolicy,

    #[serde(default)]
    pub conflict_scope: ConflictScope,

    /// First delay when a page fetch fails with a retryable error.
    #[serde(default = "default_page_retry_initial")]
    pub page_retry_initial_ms: u64,

    /// Longest single delay between page retries.
    #[serde(default = "default_page_retry_max_interval")]
    pub page_retry_max_interval_ms: u64,

    /// Total time a page may spend retrying before the run aborts.
    #[serde(default = "default_page_retry_budget")]
    pub page_retry_max_elapsed_secs: u64,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_page_retry_initial() -> u64 {
    500
}
fn default_page_retry_max_interval() -> u64 {
    30_000
}
fn default_page_retry_budget() -> u64 {
    120
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            batch_size: default_batch_size(),
            conflict_policy: ConflictPolicy::default(),
            conflict_scope: ConflictScope::default(),
            page_retry_initial_ms: default_page_retry_initial(),
            page_retry_max_interval_ms: default_page_retry_max_interval(),
            page_retry_max_elapsed_secs: default_page_retry_budget(),
        }
    }
}

impl SyncSettings {
    /// In-run retry policy for provider page fetches.
    pub fn page_retry(&self) -> PageRetry {
        PageRetry {
            initial_interval: Duration::from_millis(self.page_retry_initial_ms),
            max_interval: Duration::from_millis(self.page_retry_max_interval_ms),
            max_elapsed: Duration::from_secs(self.page_retry_max_elapsed_secs),
        }
    }
}

/// Backoff bounds for retrying a failed page fetch inside one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRetry {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Zero disables in-run retries.
    pub max_elapsed: Duration,
}

impl Default for PageRetry {
    fn default() -> Self {
        SyncSettings::default().page_retry()
    }
}

impl PageRetry {
    /// Fail on the first error.
    pub fn disabled() -> Self {
        PageRetry {
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            max_elapsed: Duration::ZERO,
        }
    }
}

// =============================================================================
// Queue Settings
// =============================================================================

/// Job processor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Jobs processed at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Delay between polls of an empty queue (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Delay before polling again when every worker slot is busy.
    #[serde(default = "default_busy_poll_delay")]
    pub busy_poll_delay_ms: u64,

    /// Base retry delay; attempt n waits `retry_delay_ms * 2^(n-1)`.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// How long shutdown waits for in-flight jobs before aborting them.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Claims older than this are treated as abandoned.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    #[serde(default = "default_stale_sweep_interval")]
    pub stale_sweep_interval_secs: u64,

    /// Deferral for a job that lost a lock race (milliseconds).
    #[serde(default = "default_contention_delay")]
    pub contention_delay_ms: u64,
}

fn default_concurrency() -> usize {
    4
}
fn default_poll_interval() -> u64 {
    1_000
}
fn default_busy_poll_delay() -> u64 {
    250
}
fn default_retry_delay() -> u64 {
    30_000
}
fn default_max_retry_delay() -> u64 {
    3_600_000
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_shutdown_timeout() -> u64 {
    30
}
fn default_stale_after() -> u64 {
    3_600
}
fn default_stale_sweep_interval() -> u64 {
    60
}
fn default_contention_delay() -> u64 {
    5_000
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            busy_poll_delay_ms: default_busy_poll_delay(),
            retry_delay_ms: default_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
            max_attempts: default_max_attempts(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            stale_after_secs: default_stale_after(),
            stale_sweep_interval_secs: default_stale_sweep_interval(),
            contention_delay_ms: default_contention_delay(),
        }
    }
}

// =============================================================================
// Scheduler Settings
// =============================================================================

/// Where provider locks live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockBackend {
    /// In-process map. Only safe with a single daemon.
    #[default]
    Memory,
    /// `sync_locks` table shared by every process on the database.
    Database,
}

impl std::fmt::Display for LockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockBackend::Memory => write!(f, "memory"),
            LockBackend::Database => write!(f, "database"),
        }
    }
}

impl std::str::FromStr for LockBackend {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "local" => Ok(LockBackend::Memory),
            "database" | "db" | "sqlite" => Ok(LockBackend::Database),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown lock backend: '{}'. Valid options: memory, database",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Age after which a provider lock is considered abandoned.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,

    /// Providers of one tenant allowed to sync at once. 0 = unlimited.
    #[serde(default = "default_tenant_concurrency")]
    pub tenant_concurrency: u32,

    #[serde(default)]
    pub lock_backend: LockBackend,
}

fn default_lock_timeout() -> u64 {
    3_600
}
fn default_tenant_concurrency() -> u32 {
    2
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            lock_timeout_secs: default_lock_timeout(),
            tenant_concurrency: default_tenant_concurrency(),
            lock_backend: LockBackend::default(),
        }
    }
}

impl SchedulerSettings {
    pub fn tenant_limit(&self) -> Option<u32> {
        (self.tenant_concurrency > 0).then_some(self.tenant_concurrency)
    }
}

// =============================================================================
// Provider Configuration
// =============================================================================

/// One (tenant, provider) pair the daemon syncs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub tenant_id: String,
    pub provider_id: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Five-field cron expression. Absent means manual runs only.
    #[serde(default)]
    pub schedule: Option<String>,

    /// Entity types to sync. Empty means all.
    #[serde(default)]
    pub entity_types: Vec<EntityType>,

    #[serde(default)]
    pub batch_size: Option<usize>,

    #[serde(default)]
    pub conflict_policy: Option<ConflictPolicy>,

    #[serde(default)]
    pub conflict_scope: Option<ConflictScope>,

    /// Priority of jobs the scheduler enqueues for this provider.
    #[serde(default)]
    pub priority: i32,

    /// JSON fixture for the scripted in-memory provider.
    #[serde(default)]
    pub fixture: Option<PathBuf>,

    /// Passed through to every provider call.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,

    /// Mappings keyed by entity type name.
    #[serde(default)]
    pub field_mappings: BTreeMap<String, Vec<FieldMapping>>,
}

fn default_true() -> bool {
    true
}

impl ProviderConfig {
    pub fn new(tenant_id: impl Into<String>, provider_id: impl Into<String>) -> Self {
        ProviderConfig {
            tenant_id: tenant_id.into(),
            provider_id: provider_id.into(),
            enabled: true,
            schedule: None,
            entity_types: Vec::new(),
            batch_size: None,
            conflict_policy: None,
            conflict_scope: None,
            priority: 0,
            fixture: None,
            filters: BTreeMap::new(),
            field_mappings: BTreeMap::new(),
        }
    }

    pub fn schedule(mut self, expression: impl Into<String>) -> Self {
        self.schedule = Some(expression.into());
        self
    }

    pub fn entity_types(mut self, types: Vec<EntityType>) -> Self {
        self.entity_types = types;
        self
    }

    pub fn conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = Some(policy);
        self
    }

    pub fn conflict_scope(mut self, scope: ConflictScope) -> Self {
        self.conflict_scope = Some(scope);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn mapping(mut self, entity_type: EntityType, mapping: FieldMapping) -> Self {
        self.field_mappings
            .entry(entity_type.as_str().to_string())
            .or_default()
            .push(mapping);
        self
    }

    /// Field mappings keyed by parsed entity type.
    pub fn mappings(&self) -> SyncResult<BTreeMap<EntityType, Vec<FieldMapping>>> {
        self.field_mappings
            .iter()
            .map(|(name, rules)| {
                let entity_type: EntityType = name.parse().map_err(|_| {
                    SyncError::InvalidConfig(format!(
                        "Unknown entity type '{}' in field_mappings for {}/{}",
                        name, self.tenant_id, self.provider_id
                    ))
                })?;
                Ok((entity_type, rules.clone()))
            })
            .collect()
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub instance: InstanceConfig,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated instance ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.instance.id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("instance.id must not be empty".into()));
        }

        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.batch_size must be greater than 0".into(),
            ));
        }

        if self.queue.concurrency == 0 {
            return Err(SyncError::InvalidConfig(
                "queue.concurrency must be greater than 0".into(),
            ));
        }

        if self.queue.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "queue.max_attempts must be greater than 0".into(),
            ));
        }

        if self.queue.max_retry_delay_ms < self.queue.retry_delay_ms {
            return Err(SyncError::InvalidConfig(
                "queue.max_retry_delay_ms must not be below queue.retry_delay_ms".into(),
            ));
        }

        if self.scheduler.lock_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "scheduler.lock_timeout_secs must be greater than 0".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if provider.tenant_id.is_empty() || provider.provider_id.is_empty() {
                return Err(SyncError::InvalidConfig(
                    "providers need both tenant_id and provider_id".into(),
                ));
            }
            if !seen.insert((provider.tenant_id.as_str(), provider.provider_id.as_str())) {
                return Err(SyncError::InvalidConfig(format!(
                    "Duplicate provider {}/{}",
                    provider.tenant_id, provider.provider_id
                )));
            }
            if provider.batch_size == Some(0) {
                return Err(SyncError::InvalidConfig(format!(
                    "batch_size for {}/{} must be greater than 0",
                    provider.tenant_id, provider.provider_id
                )));
            }
            // Schedules are checked again at registration; catch typos early
            if let Some(ref schedule) = provider.schedule {
                CronExpression::parse(schedule)?;
            }
            provider.mappings()?;
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("ROSTER_INSTANCE_ID") {
            debug!(instance_id = %id, "Overriding instance ID from environment");
            self.instance.id = id;
        }

        if let Ok(path) = std::env::var("ROSTER_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(value) = std::env::var("ROSTER_BATCH_SIZE") {
            if let Ok(n) = value.parse::<usize>() {
                self.sync.batch_size = n;
            }
        }

        if let Ok(value) = std::env::var("ROSTER_CONFLICT_POLICY") {
            match value.parse() {
                Ok(policy) => self.sync.conflict_policy = policy,
                Err(_) => warn!(policy = %value, "Unknown conflict policy in environment"),
            }
        }

        if let Ok(value) = std::env::var("ROSTER_QUEUE_CONCURRENCY") {
            if let Ok(n) = value.parse::<usize>() {
                debug!(concurrency = n, "Overriding queue concurrency from environment");
                self.queue.concurrency = n;
            }
        }

        if let Ok(value) = std::env::var("ROSTER_MAX_ATTEMPTS") {
            if let Ok(n) = value.parse::<u32>() {
                self.queue.max_attempts = n;
            }
        }

        if let Ok(value) = std::env::var("ROSTER_TENANT_CONCURRENCY") {
            if let Ok(n) = value.parse::<u32>() {
                self.scheduler.tenant_concurrency = n;
            }
        }

        if let Ok(value) = std::env::var("ROSTER_LOCK_BACKEND") {
            match value.parse() {
                Ok(backend) => self.scheduler.lock_backend = backend,
                Err(_) => warn!(backend = %value, "Unknown lock backend in environment"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "roster", "sync").map(|dirs| {
            let config_dir = dirs.config_dir();
            config_dir.join("sync.toml")
        })
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn instance_id(&self) -> &str {
        &self.instance.id
    }

    pub fn provider(&self, tenant_id: &str, provider_id: &str) -> Option<&ProviderConfig> {
        self.providers
            .iter()
            .find(|p| p.tenant_id == tenant_id && p.provider_id == provider_id)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue.poll_interval_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.scheduler.lock_timeout_secs)
    }
}
