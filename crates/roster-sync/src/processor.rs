//! # Job Processor
//!
//! Claims queued sync jobs and runs them with bounded concurrency.
//!
//! ## Job Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       JobProcessor loop                                 │
//! │                                                                         │
//! │  poll ──► free worker slot? ──no──► wait busy_poll_delay                │
//! │              │yes                                                       │
//! │              ▼                                                          │
//! │          dequeue (atomic claim) ──none──► wait poll_interval            │
//! │              │                                                          │
//! │              ▼                                                          │
//! │          run_sync(tenant, provider, job)                                │
//! │              │                                                          │
//! │   ┌──────────┼───────────────┬────────────────────┬──────────────────┐  │
//! │   ▼          ▼               ▼                    ▼                  │  │
//! │ success   lock contention  retryable,         non-retryable or       │  │
//! │ (delete)  (requeue, no     attempts left      attempts exhausted     │  │
//! │           attempt charged) (retrying at       (failed, dead letter)  │  │
//! │                            now + d·2^(n-1))                          │  │
//! │                                                                         │
//! │  every stale_sweep_interval: claims older than stale_after → pending   │
//! │  shutdown: stop claiming, wait shutdown_timeout, then abort            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use roster_core::backoff::retry_delay;
use roster_core::SyncJob;

use crate::config::QueueSettings;
use crate::error::{SyncError, SyncResult};
use crate::service::SyncService;

fn chrono_delay(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
}

// =============================================================================
// Job Worker
// =============================================================================

/// Runs one claimed job and records its fate in the queue.
#[derive(Clone)]
struct JobWorker {
    service: Arc<SyncService>,
    settings: QueueSettings,
}

impl JobWorker {
    async fn execute(&self, job: SyncJob) {
        let attempt = job.attempts + 1;
        debug!(
            job_id = %job.id,
            tenant_id = %job.tenant_id,
            provider_id = %job.provider_id,
            attempt,
            "Processing sync job"
        );

        let entity_types = (!job.entity_types.is_empty()).then(|| job.entity_types.clone());
        let failure = match self
            .service
            .run_sync(&job.tenant_id, &job.provider_id, Some(&job.id), entity_types)
            .await
        {
            Ok(outcome) => outcome.error,
            Err(err) => Some(err),
        };

        if let Err(err) = self.settle(&job, attempt, failure).await {
            error!(job_id = %job.id, error = %err, "Failed to update job after run");
        }
    }

    async fn settle(&self, job: &SyncJob, attempt: u32, failure: Option<SyncError>) -> SyncResult<()> {
        let queue = self.service.database().queue();
        let now = Utc::now();

        let Some(err) = failure else {
            queue.complete(&job.id).await?;
            info!(job_id = %job.id, attempt, "Sync job completed");
            return Ok(());
        };

        if err.is_contention() {
            let delay = Duration::from_millis(self.settings.contention_delay_ms);
            queue.requeue(&job.id, now + chrono_delay(delay)).await?;
            debug!(job_id = %job.id, error = %err, "Provider busy, job deferred");
            return Ok(());
        }

        let message = err.to_string();
        if !err.is_retryable() || attempt >= job.max_attempts {
            queue.mark_dead(&job.id, attempt, &message).await?;
            error!(
                job_id = %job.id,
                attempt,
                max_attempts = job.max_attempts,
                error = %message,
                "Sync job moved to dead letters"
            );
            return Ok(());
        }

        let delay = retry_delay(
            Duration::from_millis(self.settings.retry_delay_ms),
            attempt,
            Duration::from_millis(self.settings.max_retry_delay_ms),
        );
        queue
            .schedule_retry(&job.id, attempt, now + chrono_delay(delay), &message)
            .await?;
        warn!(
            job_id = %job.id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %message,
            "Sync job failed, retry scheduled"
        );
        Ok(())
    }
}

// =============================================================================
// Job Processor
// =============================================================================

/// Polls the queue and dispatches jobs to workers.
pub struct JobProcessor {
    worker: JobWorker,

    /// Shutdown receiver.
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling the job processor.
#[derive(Clone)]
pub struct JobProcessorHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl JobProcessorHandle {
    /// Stops claiming jobs and drains the ones in flight.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Processor shutdown channel closed".into()))
    }
}

impl JobProcessor {
    /// Creates a processor using the service's queue settings.
    pub fn new(service: Arc<SyncService>) -> (Self, JobProcessorHandle) {
        let settings = service.config().queue.clone();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let processor = JobProcessor {
            worker: JobWorker { service, settings },
            shutdown_rx,
        };
        (processor, JobProcessorHandle { shutdown_tx })
    }

    fn settings(&self) -> &QueueSettings {
        &self.worker.settings
    }

    /// Runs the processor loop.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        let settings = self.settings().clone();
        info!(
            concurrency = settings.concurrency,
            poll_interval_ms = settings.poll_interval_ms,
            "Job processor starting"
        );

        let semaphore = Arc::new(Semaphore::new(settings.concurrency));
        let mut tasks = JoinSet::new();
        let mut stale_interval =
            tokio::time::interval(Duration::from_secs(settings.stale_sweep_interval_secs.max(1)));
        stale_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut next_poll = Duration::ZERO;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(next_poll) => {
                    next_poll = self.dispatch(&semaphore, &mut tasks).await;
                }

                // First tick fires immediately, so abandoned claims from a
                // previous process are released at startup.
                _ = stale_interval.tick() => {
                    self.release_stale().await;
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Sync job task failed");
                    }
                    next_poll = Duration::ZERO;
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Job processor shutting down");
                    break;
                }
            }
        }

        self.drain(tasks, Duration::from_secs(settings.shutdown_timeout_secs))
            .await;
        info!("Job processor stopped");
    }

    /// Claims jobs until the queue is empty or every slot is busy, and
    /// returns how long to wait before polling again.
    async fn dispatch(&self, semaphore: &Arc<Semaphore>, tasks: &mut JoinSet<()>) -> Duration {
        let settings = self.settings();
        let queue = self.worker.service.database().queue();

        loop {
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                debug!("All workers busy");
                return Duration::from_millis(settings.busy_poll_delay_ms);
            };

            match queue.dequeue(Utc::now()).await {
                Ok(Some(job)) => {
                    let worker = self.worker.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        worker.execute(job).await;
                    });
                }
                Ok(None) => return Duration::from_millis(settings.poll_interval_ms),
                Err(e) => {
                    error!(error = %e, "Failed to claim sync job");
                    return Duration::from_millis(settings.poll_interval_ms);
                }
            }
        }
    }

    async fn release_stale(&self) {
        let cutoff = Utc::now() - chrono_delay(Duration::from_secs(self.settings().stale_after_secs));
        match self.worker.service.database().queue().release_stale(cutoff).await {
            Ok(0) => {}
            Ok(count) => warn!(count, "Released stale sync jobs"),
            Err(e) => error!(error = %e, "Failed to release stale sync jobs"),
        }
    }

    async fn drain(&self, mut tasks: JoinSet<()>, timeout: Duration) {
        if tasks.is_empty() {
            return;
        }
        info!(in_flight = tasks.len(), "Waiting for in-flight sync jobs");

        let waited = tokio::time::timeout(timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if waited.is_err() {
            warn!(
                remaining = tasks.len(),
                "Shutdown timeout reached, aborting sync jobs"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }

    /// Claims and runs a single due job inline.
    ///
    /// Returns false when nothing was due.
    pub async fn process_next(&self) -> SyncResult<bool> {
        let job = self
            .worker
            .service
            .database()
            .queue()
            .dequeue(Utc::now())
            .await?;
        match job {
            Some(job) => {
                self.worker.execute(job).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
