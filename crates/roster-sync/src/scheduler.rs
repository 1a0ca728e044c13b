//! # Sync Scheduler
//!
//! Cron triggers that enqueue sync jobs. The scheduler never runs a sync
//! itself; it only feeds the queue, so retries and locking stay in one place.
//!
//! ```text
//! [[providers]] schedule = "*/15 * * * *"
//!        │
//!        ▼  CronExpression::parse (5 fields, validated)
//!        │
//!        ▼  scheduler_form() = "0 */15 * * * *"
//! JobScheduler ── fires ──► SyncService::queue_job(JobRequest)
//! ```
//!
//! One trigger per (tenant, provider); scheduling again replaces it.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use roster_core::{CronExpression, JobRequest};

use crate::error::SyncResult;
use crate::service::SyncService;

/// A registered trigger, as reported by [`SyncScheduler::get_scheduled_jobs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledSync {
    pub tenant_id: String,
    pub provider_id: String,
    /// Normalised 5-field expression.
    pub expression: String,
    pub priority: i32,
    pub trigger_id: Uuid,
    /// Next fire time, once the scheduler is running.
    pub next_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct Registration {
    trigger_id: Uuid,
    expression: CronExpression,
    priority: i32,
}

/// Cron-driven job producer.
pub struct SyncScheduler {
    scheduler: JobScheduler,
    service: Arc<SyncService>,
    registrations: Mutex<HashMap<(String, String), Registration>>,
}

impl SyncScheduler {
    pub async fn new(service: Arc<SyncService>) -> SyncResult<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(SyncScheduler {
            scheduler,
            service,
            registrations: Mutex::new(HashMap::new()),
        })
    }

    /// Registers every enabled provider with a schedule, then starts firing.
    ///
    /// Providers with an invalid expression are logged and skipped. Returns
    /// how many triggers were registered.
    pub async fn start(&self) -> SyncResult<usize> {
        let providers = self.service.config().providers.clone();
        let mut registered = 0;

        for provider in providers.iter().filter(|p| p.enabled) {
            let Some(expression) = provider.schedule.as_deref() else {
                continue;
            };
            match self
                .schedule_provider_sync(
                    &provider.tenant_id,
                    &provider.provider_id,
                    expression,
                    provider.priority,
                )
                .await
            {
                Ok(_) => registered += 1,
                Err(err) => warn!(
                    tenant_id = %provider.tenant_id,
                    provider_id = %provider.provider_id,
                    error = %err,
                    "Skipping provider schedule"
                ),
            }
        }

        self.scheduler.start().await?;
        info!(triggers = registered, "Sync scheduler started");
        Ok(registered)
    }

    /// Adds or replaces the trigger for (tenant, provider).
    pub async fn schedule_provider_sync(
        &self,
        tenant_id: &str,
        provider_id: &str,
        expression: &str,
        priority: i32,
    ) -> SyncResult<Uuid> {
        let cron = CronExpression::parse(expression)?;

        let service = self.service.clone();
        let tenant = tenant_id.to_string();
        let provider = provider_id.to_string();
        let job = Job::new_async(cron.scheduler_form().as_str(), move |_uuid, _scheduler| {
            let service = service.clone();
            let tenant = tenant.clone();
            let provider = provider.clone();
            Box::pin(async move {
                enqueue_scheduled(&service, &tenant, &provider, priority).await;
            })
        })?;

        let key = (tenant_id.to_string(), provider_id.to_string());
        let mut registrations = self.registrations.lock().await;
        if let Some(previous) = registrations.remove(&key) {
            self.scheduler.remove(&previous.trigger_id).await?;
            debug!(tenant_id, provider_id, "Replaced provider schedule");
        }

        let trigger_id = self.scheduler.add(job).await?;
        registrations.insert(
            key,
            Registration {
                trigger_id,
                expression: cron,
                priority,
            },
        );

        info!(tenant_id, provider_id, expression, "Provider sync scheduled");
        Ok(trigger_id)
    }

    /// Removes the trigger for (tenant, provider). Returns false if none.
    pub async fn unschedule_provider_sync(
        &self,
        tenant_id: &str,
        provider_id: &str,
    ) -> SyncResult<bool> {
        let key = (tenant_id.to_string(), provider_id.to_string());
        let Some(registration) = self.registrations.lock().await.remove(&key) else {
            return Ok(false);
        };
        self.scheduler.remove(&registration.trigger_id).await?;
        info!(tenant_id, provider_id, "Provider sync unscheduled");
        Ok(true)
    }

    /// Registered triggers, sorted by tenant then provider.
    pub async fn get_scheduled_jobs(&self) -> SyncResult<Vec<ScheduledSync>> {
        let registrations = self.registrations.lock().await.clone();
        let mut scheduler = self.scheduler.clone();

        let mut jobs = Vec::with_capacity(registrations.len());
        for ((tenant_id, provider_id), registration) in registrations {
            let next_run = scheduler
                .next_tick_for_job(registration.trigger_id)
                .await?;
            jobs.push(ScheduledSync {
                tenant_id,
                provider_id,
                expression: registration.expression.as_string(),
                priority: registration.priority,
                trigger_id: registration.trigger_id,
                next_run,
            });
        }
        jobs.sort_by(|a, b| {
            (a.tenant_id.as_str(), a.provider_id.as_str())
                .cmp(&(b.tenant_id.as_str(), b.provider_id.as_str()))
        });
        Ok(jobs)
    }

    /// Stops firing triggers.
    pub async fn shutdown(&self) -> SyncResult<()> {
        let mut scheduler = self.scheduler.clone();
        scheduler.shutdown().await?;
        info!("Sync scheduler stopped");
        Ok(())
    }
}

/// Trigger body: queue one job for the provider.
async fn enqueue_scheduled(service: &SyncService, tenant_id: &str, provider_id: &str, priority: i32) {
    let request = JobRequest::new(tenant_id, provider_id).priority(priority);
    match service.queue_job(request).await {
        Ok(job) => debug!(job_id = %job.id, tenant_id, provider_id, "Scheduled sync queued"),
        Err(err) => error!(tenant_id, provider_id, error = %err, "Failed to queue scheduled sync"),
    }
}
