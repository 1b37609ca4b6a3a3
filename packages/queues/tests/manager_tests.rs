mod common;

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use queue_core::{JobState, QueueError};
use queues::{ManagedQueue, QueueManager, QueueService};

use common::FakeChannel;

type Service = QueueService<serde_json::Value>;

fn service(channel: &Arc<FakeChannel>) -> Arc<Service> {
    Arc::new(QueueService::new(channel.clone()))
}

#[test]
fn registering_two_queues_keeps_both() {
    let manager = QueueManager::new();
    manager.register_queue("mail", service(&FakeChannel::new("mail")));
    manager.register_queue("reports", service(&FakeChannel::new("reports")));

    assert_eq!(manager.len(), 2);
    assert_eq!(manager.queue_names(), vec!["mail".to_string(), "reports".to_string()]);
    assert!(manager.get_queue("mail").is_some());
    assert!(manager.get_queue("unknown").is_none());
}

#[test]
fn registering_an_existing_name_replaces_it() {
    let manager = QueueManager::new();
    let first: Arc<dyn ManagedQueue> = service(&FakeChannel::new("mail"));
    let second: Arc<dyn ManagedQueue> = service(&FakeChannel::new("mail"));

    manager.register_queue("mail", first.clone());
    manager.register_queue("mail", second.clone());

    assert_eq!(manager.len(), 1);
    let current = manager.get_queue("mail").expect("mail registered");
    assert!(Arc::ptr_eq(&current, &second));
    assert!(!Arc::ptr_eq(&current, &first));
}

#[test]
fn unregister_removes_only_the_named_queue() {
    let manager = QueueManager::new();
    manager.register_queue("mail", service(&FakeChannel::new("mail")));
    manager.register_queue("reports", service(&FakeChannel::new("reports")));

    assert!(manager.unregister_queue("mail").is_some());
    assert!(manager.unregister_queue("mail").is_none());
    assert_eq!(manager.get_all_queues().len(), 1);
}

#[tokio::test]
async fn global_status_of_empty_manager_is_empty() -> Result<(), Box<dyn Error>> {
    let manager = QueueManager::new();
    assert!(manager.is_empty());
    assert!(manager.get_global_status().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn global_status_reports_each_queue() -> Result<(), Box<dyn Error>> {
    let mail = FakeChannel::new("mail");
    let reports = FakeChannel::new("reports");
    mail.insert(JobState::Waiting);
    mail.insert(JobState::Completed);
    reports.insert(JobState::Failed);

    let manager = QueueManager::new();
    manager.register_queue("mail", service(&mail));
    manager.register_queue("reports", service(&reports));

    let status = manager.get_global_status().await?;
    assert_eq!(status.len(), 2);
    assert_eq!(status["mail"].waiting, 1);
    assert_eq!(status["mail"].completed, 1);
    assert_eq!(status["reports"].failed, 1);
    assert_eq!(status["reports"].outstanding(), 0);
    Ok(())
}

#[tokio::test]
async fn global_status_fails_when_one_queue_fails() {
    let mail = FakeChannel::new("mail");
    let reports = FakeChannel::new("reports");
    reports.fail_status.store(true, Ordering::SeqCst);

    let manager = QueueManager::new();
    manager.register_queue("mail", service(&mail));
    manager.register_queue("reports", service(&reports));

    let err = manager.get_global_status().await.unwrap_err();
    assert!(matches!(&err, QueueError::PartialFanout { queue, .. } if queue == "reports"));
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn fleet_operations_on_empty_manager_succeed() -> Result<(), Box<dyn Error>> {
    let manager = QueueManager::new();
    manager.pause_all_queues().await?;
    manager.resume_all_queues().await?;
    manager.clear_all_queues().await?;
    manager.stop_all().await?;
    Ok(())
}

#[tokio::test]
async fn pause_and_resume_reach_every_queue() -> Result<(), Box<dyn Error>> {
    let mail = FakeChannel::new("mail");
    let reports = FakeChannel::new("reports");
    let manager = QueueManager::new();
    manager.register_queue("mail", service(&mail));
    manager.register_queue("reports", service(&reports));

    manager.pause_all_queues().await?;
    assert!(mail.paused.load(Ordering::SeqCst));
    assert!(reports.paused.load(Ordering::SeqCst));

    manager.resume_all_queues().await?;
    assert!(!mail.paused.load(Ordering::SeqCst));
    assert!(!reports.paused.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn one_failing_pause_fails_pause_all() {
    let mail = FakeChannel::new("mail");
    let reports = FakeChannel::new("reports");
    reports.fail_pause.store(true, Ordering::SeqCst);

    let manager = QueueManager::new();
    manager.register_queue("mail", service(&mail));
    manager.register_queue("reports", service(&reports));

    let err = manager.pause_all_queues().await.unwrap_err();
    match err {
        QueueError::PartialFanout { queue, source } => {
            assert_eq!(queue, "reports");
            assert!(matches!(*source, QueueError::BrokerUnavailable(_)));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn clear_all_drains_pending_jobs_everywhere() -> Result<(), Box<dyn Error>> {
    let mail = FakeChannel::new("mail");
    let reports = FakeChannel::new("reports");
    mail.insert(JobState::Waiting);
    reports.insert(JobState::Delayed);
    reports.insert(JobState::Failed);

    let manager = QueueManager::new();
    manager.register_queue("mail", service(&mail));
    manager.register_queue("reports", service(&reports));

    manager.clear_all_queues().await?;
    assert_eq!(mail.job_count(), 0);
    assert_eq!(reports.job_count(), 1);
    Ok(())
}

#[tokio::test]
async fn start_and_register_skips_services_that_fail_to_start() -> Result<(), Box<dyn Error>> {
    let manager = QueueManager::new();

    let ready = FakeChannel::new("mail");
    manager.start_and_register(service(&ready)).await?;
    assert!(manager.get_queue("mail").is_some());

    let down = FakeChannel::new("reports");
    down.ready.store(false, Ordering::SeqCst);
    assert!(manager.start_and_register(service(&down)).await.is_err());
    assert!(manager.get_queue("reports").is_none());

    manager.stop_all().await?;
    assert!(ready.closed.load(Ordering::SeqCst));
    Ok(())
}
