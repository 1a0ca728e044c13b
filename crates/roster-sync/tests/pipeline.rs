//! End-to-end runs through the service, queue and processor against an
//! in-memory SIS and an in-memory SQLite store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use roster_core::hashing::content_hash;
use roster_core::{EntityType, HistoryOutcome, JobRequest, RunStatus, SourceData};
use roster_db::{Database, DbConfig};
use roster_sync::provider::memory::FailureMode;
use roster_sync::{
    JobProcessor, MemoryProvider, StaticProviderFactory, SyncConfig, SyncError, SyncService,
};

fn data(value: serde_json::Value) -> SourceData {
    SourceData::from_value(value).unwrap()
}

fn district() -> Arc<MemoryProvider> {
    Arc::new(
        MemoryProvider::new("district-sis")
            .with_record(EntityType::Org, "org-1", data(json!({"name": "Lincoln High"})))
            .with_record(
                EntityType::Teacher,
                "t-1",
                data(json!({"given_name": "Ruth", "family_name": "Okafor"})),
            )
            .with_record(
                EntityType::Student,
                "s-1",
                data(json!({"given_name": "Ana", "grade": 9})),
            )
            .with_record(
                EntityType::Student,
                "s-2",
                data(json!({"given_name": "Ben", "grade": 10})),
            )
            .with_record(
                EntityType::Class,
                "c-1",
                data(json!({"title": "Algebra I", "org": "org-1"})),
            )
            .with_record(
                EntityType::Enrollment,
                "e-1",
                data(json!({"class": "c-1", "user": "s-1", "role": "student"})),
            ),
    )
}

fn quiet_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.sync.page_retry_max_elapsed_secs = 0;
    config.queue.retry_delay_ms = 0;
    config.queue.max_retry_delay_ms = 0;
    config.queue.max_attempts = 2;
    config
}

async fn service(provider: Arc<MemoryProvider>, config: SyncConfig) -> Arc<SyncService> {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let factory = StaticProviderFactory::new().with("district-7", "sis", provider);
    Arc::new(SyncService::from_config(
        db,
        Arc::new(config),
        Arc::new(factory),
    ))
}

#[tokio::test]
async fn test_initial_sync_then_quiet_rerun() {
    let provider = district();
    let service = service(provider.clone(), quiet_config()).await;

    let first = service.run_sync("district-7", "sis", None, None).await.unwrap();
    assert_eq!(first.status, RunStatus::Success);
    assert_eq!(first.stats.creates, 6);

    let mut log = provider.fetch_log().await;
    log.dedup();
    assert_eq!(log, EntityType::ALL.to_vec());

    let second = service.run_sync("district-7", "sis", None, None).await.unwrap();
    assert_eq!(second.stats.changes(), 0);
    assert_eq!(second.stats.errors, 0);

    let runs = service.list_recent_runs("district-7", "sis", 10).await.unwrap();
    assert_eq!(runs.len(), 2);
}

#[tokio::test]
async fn test_reordered_payload_is_unchanged() {
    let a = data(json!({"given_name": "Ana", "grade": 9}));
    let b = data(json!({"grade": 9.0, "given_name": "Ana"}));
    assert_eq!(content_hash(&a), content_hash(&b));

    let provider = district();
    let service = service(provider.clone(), quiet_config()).await;
    service.run_sync("district-7", "sis", None, None).await.unwrap();

    provider.upsert(EntityType::Student, "s-1", b).await;
    let outcome = service.run_sync("district-7", "sis", None, None).await.unwrap();
    assert_eq!(outcome.stats.updates, 0);

    let history = service
        .database()
        .history()
        .list_for_source("district-7", "sis", EntityType::Student, "s-1")
        .await
        .unwrap();
    assert_eq!(history.last().unwrap().outcome, HistoryOutcome::Unchanged);
}

#[tokio::test]
async fn test_silent_removal_is_reconciled() {
    let provider = Arc::new(
        MemoryProvider::new("district-sis")
            .with_record(EntityType::Student, "A", data(json!({"given_name": "Ada"})))
            .with_record(EntityType::Student, "B", data(json!({"given_name": "Bea"})))
            .with_record(EntityType::Student, "C", data(json!({"given_name": "Cal"}))),
    );
    let service = service(provider.clone(), quiet_config()).await;
    service.run_sync("district-7", "sis", None, None).await.unwrap();

    provider.remove_silently(EntityType::Student, "B").await;
    let outcome = service.run_sync("district-7", "sis", None, None).await.unwrap();
    assert_eq!(outcome.stats.deletes, 1);

    let ids = service
        .database()
        .entities()
        .active_source_ids("district-7", "sis", EntityType::Student)
        .await
        .unwrap();
    assert_eq!(ids, vec!["A".to_string(), "C".to_string()]);
}

#[tokio::test]
async fn test_overlapping_runs_are_rejected() {
    let provider = Arc::new(
        MemoryProvider::new("slow-sis")
            .with_fetch_delay(Duration::from_millis(40))
            .with_record(EntityType::Org, "org-1", data(json!({"name": "Lincoln High"}))),
    );
    let service = service(provider, quiet_config()).await;

    let running = {
        let service = service.clone();
        tokio::spawn(async move { service.run_sync("district-7", "sis", None, None).await })
    };
    while !service
        .get_sync_status("district-7", "sis")
        .await
        .unwrap()
        .is_running
    {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = service
        .run_sync("district-7", "sis", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::AlreadyInProgress { .. }));
    assert!(running.await.unwrap().unwrap().success());
}

#[tokio::test]
async fn test_exhausted_job_is_dead_lettered_and_revived() {
    let provider = district();
    let service = service(provider.clone(), quiet_config()).await;
    provider.fail_next(100, FailureMode::Unavailable).await;

    let job = service
        .queue_job(JobRequest::new("district-7", "sis"))
        .await
        .unwrap();
    let (processor, _handle) = JobProcessor::new(service.clone());
    while processor.process_next().await.unwrap() {}

    let dead = service.list_dead_letters(Some("district-7")).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, job.id);
    assert_eq!(dead[0].attempts, 2);

    provider.fail_next(0, FailureMode::Unavailable).await;
    assert_eq!(service.retry_failed_jobs(None).await.unwrap(), 1);
    assert!(processor.process_next().await.unwrap());

    let queue = service.database().queue();
    assert!(queue.get(&job.id).await.is_err());
    assert_eq!(queue.depth().await.unwrap(), 0);

    let runs = service.list_recent_runs("district-7", "sis", 10).await.unwrap();
    assert_eq!(runs.len(), 3);
    assert_eq!(
        runs.iter().filter(|r| r.status == RunStatus::Success).count(),
        1
    );
    assert!(queue.list_dead_letters(None).await.unwrap().is_empty());
}
