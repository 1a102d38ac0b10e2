//! Persistence across simulated process restarts
//!
//! The queue lives in SQLite; a new process (or the daemon noticing
//! posts written by chirp-queue) must resume pending work without any
//! manual re-registration.

use libchirpcast::content::FixedGenerator;
use libchirpcast::delivery::MockDeliveryClient;
use libchirpcast::scheduler::create_post;
use libchirpcast::{
    Config, Database, PostRequest, PostStatus, QuotaTracker, ScheduleKind, Scheduler,
};
use std::sync::Arc;
use std::time::Duration;

fn scheduler(db: Database, delivery: MockDeliveryClient) -> Scheduler {
    Scheduler::new(
        db,
        QuotaTracker::new(17),
        Arc::new(delivery),
        Arc::new(FixedGenerator::always("restart survivor")),
        Config::default_config().scheduler,
    )
}

async fn wait_for_status(db: &Database, post_id: &str, status: PostStatus) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stored = db.get_scheduled_post(post_id).await.unwrap().unwrap();
        if stored.status == status {
            return;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "post never reached {} (currently {})",
            status,
            stored.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn recurring_schedule_survives_restart() {
    let temp = tempfile::TempDir::new().unwrap();
    let db_path = temp.path().join("chirpcast.db").to_string_lossy().to_string();

    // First process: schedule an hourly post, then go away
    let hourly_id = {
        let db = Database::new(&db_path).await.unwrap();
        let sched = scheduler(db, MockDeliveryClient::success());
        let post = sched
            .submit_schedule(
                &PostRequest {
                    custom_prompt: Some("hourly".to_string()),
                    ..Default::default()
                },
                ScheduleKind::Hourly,
                None,
                None,
            )
            .await
            .unwrap();
        post.id
    };

    // Second process sees the pending post with its rule intact
    let db = Database::new(&db_path).await.unwrap();
    let stored = db.get_scheduled_post(&hourly_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Scheduled);
    assert_eq!(stored.schedule_expression.as_deref(), Some("0 * * * *"));

    // And its loop registers it without help: the startup reconcile
    // also picks up a pending one-shot, which fires immediately.
    let once_id = create_post(
        &db,
        &PostRequest {
            literal_text: Some("left over from last run".to_string()),
            ..Default::default()
        },
        ScheduleKind::OnceImmediate,
        None,
        None,
    )
    .await
    .unwrap()
    .id;

    let mock = MockDeliveryClient::success();
    let sched = scheduler(db.clone(), mock.clone());
    sched.start().await;

    wait_for_status(&db, &once_id, PostStatus::Sent).await;
    sched.shutdown().await;

    assert_eq!(mock.captured_posts()[0].text, "left over from last run");
    // The hourly post is still pending, waiting for its next firing
    let stored = db.get_scheduled_post(&hourly_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Scheduled);
}

#[tokio::test]
async fn daemon_picks_up_posts_written_by_another_process() {
    let temp = tempfile::TempDir::new().unwrap();
    let db_path = temp.path().join("chirpcast.db").to_string_lossy().to_string();

    let db = Database::new(&db_path).await.unwrap();

    // chirp-queue writes straight to the store, no scheduler involved
    let queue_db = Database::new(&db_path).await.unwrap();
    let post = create_post(
        &queue_db,
        &PostRequest {
            literal_text: Some("queued externally".to_string()),
            ..Default::default()
        },
        ScheduleKind::OnceImmediate,
        None,
        None,
    )
    .await
    .unwrap();

    let mock = MockDeliveryClient::success();
    let sched = scheduler(db.clone(), mock.clone());
    sched.start().await;

    wait_for_status(&db, &post.id, PostStatus::Sent).await;
    sched.shutdown().await;

    assert_eq!(mock.captured_posts()[0].text, "queued externally");
    let history = db.attempts_for_post(&post.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
}

#[tokio::test]
async fn quota_counter_persists_across_restart() {
    let temp = tempfile::TempDir::new().unwrap();
    let db_path = temp.path().join("chirpcast.db").to_string_lossy().to_string();
    let now = chrono::Utc::now();

    {
        let db = Database::new(&db_path).await.unwrap();
        let quota = QuotaTracker::new(17);
        for _ in 0..5 {
            assert!(quota.check_and_record(&db, now).await.unwrap());
        }
    }

    let db = Database::new(&db_path).await.unwrap();
    let quota = QuotaTracker::new(17);
    assert_eq!(quota.sent_today(&db, now).await.unwrap(), 5);
    assert_eq!(quota.remaining(&db, now).await.unwrap(), 12);
}
