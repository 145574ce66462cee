//! End-to-end tests for the reminder service with a live dispatch loop.
//!
//! Each test runs a real [`ReminderService`] on a temp data dir and a
//! wiremock gateway. Cron expressions are picked at least 25 minutes
//! away from now so no natural fire can race the assertions; missed-fire
//! behavior is provoked with backdated store rows instead.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::time::Duration;

use chrono::{Timelike, Utc};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pester::{
    GatewayConfig, MissedFirePolicy, NewTask, ReminderError, ReminderService, SchedulerConfig,
    Task, TaskPatch, TaskStore,
};

fn service_config(root: &Path, gateway_url: &str) -> SchedulerConfig {
    SchedulerConfig {
        gateway: GatewayConfig {
            base_url: gateway_url.to_owned(),
            timeout_secs: 2,
        },
        data_dir: Some(root.to_path_buf()),
        ..SchedulerConfig::default()
    }
}

fn far_minute() -> u32 {
    (Utc::now().minute() + 30) % 60
}

/// An hourly cron whose next fire is ~30 minutes out.
fn far_cron() -> String {
    format!("{} * * * *", far_minute())
}

/// Insert a task created three days ago whose daily fire time is ~30
/// minutes away from now, as if the daemon had been down since then.
fn insert_backdated(root: &Path, topic: &str) -> String {
    let store = TaskStore::open(root).expect("open store");
    let created = Utc::now().timestamp() - 3 * 86_400;
    let cron = format!("{} 6 * * *", far_minute());
    let task = Task::from_new(NewTask::new(topic, cron, "stand up"), created);
    store.insert(&task).expect("insert backdated task");
    task.id
}

#[tokio::test]
async fn create_update_delete_reach_both_store_and_loop() {
    let dir = TempDir::new().expect("tempdir");
    let server = MockServer::start().await;
    let config = service_config(dir.path(), &server.uri());
    let (service, join) = ReminderService::start(&config).expect("start service");

    let task = service
        .create(NewTask::new("chores", far_cron(), "water the plants").with_title("Plants"))
        .expect("create");
    assert_eq!(service.list().expect("list").len(), 1);

    let jobs = service.jobs().await.expect("jobs");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].task_id, task.id);
    assert_eq!(jobs[0].topic, "chores");
    assert!(jobs[0].next_fire_at.is_some());

    // Updating the schedule must replace the job, not duplicate it.
    let patch = TaskPatch {
        cron: Some(format!("{} 6 * * mon", far_minute())),
        ..TaskPatch::default()
    };
    let updated = service.update(&task.id, patch).expect("update");
    assert!(updated.cron.ends_with("6 * * mon"));
    assert_eq!(service.jobs().await.expect("jobs").len(), 1);

    service.delete(&task.id).expect("delete");
    assert!(service.list().expect("list").is_empty());
    assert!(service.jobs().await.expect("jobs").is_empty());
    assert!(matches!(
        service.get(&task.id),
        Err(ReminderError::NotFound(_))
    ));

    drop(service);
    join.await.expect("loop exits");
}

#[tokio::test]
async fn disabled_tasks_stay_out_of_the_dispatch_loop() {
    let dir = TempDir::new().expect("tempdir");
    let server = MockServer::start().await;
    let config = service_config(dir.path(), &server.uri());
    let (service, join) = ReminderService::start(&config).expect("start service");

    let mut new = NewTask::new("quiet", far_cron(), "not yet");
    new.enabled = false;
    let task = service.create(new).expect("create");
    assert_eq!(service.list().expect("list").len(), 1);
    assert!(service.jobs().await.expect("jobs").is_empty());

    service.enable(&task.id).expect("enable");
    assert_eq!(service.jobs().await.expect("jobs").len(), 1);

    let snoozed = service.snooze(&task.id, 4).expect("snooze");
    assert!(!snoozed.enabled);
    assert!(snoozed.snoozed_until.is_some());
    assert!(service.jobs().await.expect("jobs").is_empty());

    let woken = service.reactivate(&task.id).expect("reactivate");
    assert!(woken.enabled);
    assert!(woken.snoozed_until.is_none());
    assert_eq!(service.jobs().await.expect("jobs").len(), 1);

    drop(service);
    join.await.expect("loop exits");
}

#[tokio::test]
async fn invalid_input_is_rejected_before_anything_persists() {
    let dir = TempDir::new().expect("tempdir");
    let server = MockServer::start().await;
    let config = service_config(dir.path(), &server.uri());
    let (service, join) = ReminderService::start(&config).expect("start service");

    let err = service
        .create(NewTask::new("chores", "not a cron", "x"))
        .unwrap_err();
    assert!(matches!(err, ReminderError::Cron(_)));

    let err = service
        .create(NewTask::new("bad topic!", far_cron(), "x"))
        .unwrap_err();
    assert!(matches!(err, ReminderError::InvalidTopic(_)));

    assert!(service.list().expect("list").is_empty());
    assert!(service.jobs().await.expect("jobs").is_empty());

    drop(service);
    join.await.expect("loop exits");
}

#[tokio::test]
async fn restart_rebuilds_jobs_from_the_store() {
    let dir = TempDir::new().expect("tempdir");
    let server = MockServer::start().await;
    let config = service_config(dir.path(), &server.uri());

    let (service, join) = ReminderService::start(&config).expect("first start");
    let kept = service
        .create(NewTask::new("am", far_cron(), "morning"))
        .expect("create kept");
    let off = service
        .create(NewTask::new("pm", far_cron(), "evening"))
        .expect("create off");
    service.disable(&off.id).expect("disable");
    drop(service);
    join.await.expect("first loop exits");

    let (service, join) = ReminderService::start(&config).expect("second start");
    assert_eq!(service.list().expect("list").len(), 2);

    // Only the enabled task comes back as a job.
    let jobs = service.jobs().await.expect("jobs");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].task_id, kept.id);
    assert!(
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .is_empty()
    );

    drop(service);
    join.await.expect("second loop exits");
}

#[tokio::test]
async fn catch_up_policy_fires_missed_reminders_after_restart() {
    let dir = TempDir::new().expect("tempdir");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/standup"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let id = insert_backdated(dir.path(), "standup");

    let mut config = service_config(dir.path(), &server.uri());
    config.missed_fires = MissedFirePolicy::CatchUp;
    let (service, join) = ReminderService::start(&config).expect("start service");

    // recover() marks the missed fire due immediately; wait for the
    // loop to deliver and record it.
    let mut recorded = None;
    for _ in 0..50 {
        let task = service.get(&id).expect("get task");
        if task.fire_count >= 1 {
            recorded = Some(task);
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let task = recorded.expect("missed reminder was never delivered");
    assert_eq!(task.fire_count, 1);
    assert!(task.last_fired_at.is_some());
    assert!(task.last_error.is_none());

    // Exactly one catch-up fire, then back onto the regular schedule.
    assert_eq!(server.received_requests().await.unwrap_or_default().len(), 1);
    let jobs = service.jobs().await.expect("jobs");
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].next_fire_at.expect("rescheduled") > Utc::now().timestamp());

    drop(service);
    join.await.expect("loop exits");
}

#[tokio::test]
async fn skip_policy_leaves_missed_fires_behind() {
    let dir = TempDir::new().expect("tempdir");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    insert_backdated(dir.path(), "standup");

    let config = service_config(dir.path(), &server.uri());
    let (service, join) = ReminderService::start(&config).expect("start service");

    // Give the loop a moment in which a backfill would have happened.
    tokio::time::sleep(Duration::from_millis(700)).await;

    let jobs = service.jobs().await.expect("jobs");
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].next_fire_at.expect("scheduled") > Utc::now().timestamp());
    assert!(
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .is_empty()
    );

    let task = service.list().expect("list").remove(0);
    assert_eq!(task.fire_count, 0);
    assert!(task.last_fired_at.is_none());

    drop(service);
    join.await.expect("loop exits");
}
