//! End-to-end delivery flows against an in-memory store

use chrono::Utc;
use libchirpcast::content::FixedGenerator;
use libchirpcast::delivery::MockDeliveryClient;
use libchirpcast::error::DeliveryError;
use libchirpcast::scheduler::DeliveryOutcome;
use libchirpcast::types::AttemptSource;
use libchirpcast::{
    ChirpcastError, Config, Database, PostRequest, PostStatus, QuotaTracker, ScheduleKind,
    Scheduler,
};
use std::sync::Arc;

fn scheduler(db: Database, delivery: MockDeliveryClient, generator: FixedGenerator, limit: u32) -> Scheduler {
    Scheduler::new(
        db,
        QuotaTracker::new(limit),
        Arc::new(delivery),
        Arc::new(generator),
        Config::default_config().scheduler,
    )
}

#[tokio::test]
async fn daily_schedule_fires_and_records_everything() {
    let db = Database::in_memory().await.unwrap();
    let mock = MockDeliveryClient::success();
    let quota = QuotaTracker::new(17);

    // Part of today's budget is already spent
    let now = Utc::now();
    for _ in 0..12 {
        assert!(quota.check_and_record(&db, now).await.unwrap());
    }
    assert_eq!(quota.remaining(&db, now).await.unwrap(), 5);

    let sched = scheduler(
        db.clone(),
        mock.clone(),
        FixedGenerator::always("Big developments in AI today"),
        17,
    );

    let request = PostRequest {
        custom_prompt: Some("AI news".to_string()),
        ..Default::default()
    };
    let post = sched
        .submit_schedule(&request, ScheduleKind::Daily, Some("09:00"), None)
        .await
        .unwrap();
    assert_eq!(post.schedule_expression.as_deref(), Some("0 9 * * *"));

    // The firing itself
    let outcome = sched.deliver_post(&post.id).await.unwrap();
    let tweet_id = match outcome {
        DeliveryOutcome::Sent { tweet_id, text } => {
            assert!(text.chars().count() <= 280);
            tweet_id
        }
        other => panic!("expected Sent, got {:?}", other),
    };

    let stored = db.get_scheduled_post(&post.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Sent);
    assert_eq!(stored.tweet_id.as_deref(), Some(tweet_id.as_str()));

    let history = db.attempts_for_post(&post.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
    assert_eq!(history[0].source, AttemptSource::Scheduled);

    // One more slot consumed
    assert_eq!(quota.remaining(&db, now).await.unwrap(), 4);
}

#[tokio::test]
async fn recurring_post_accumulates_history_after_first_success() {
    let db = Database::in_memory().await.unwrap();
    let mock = MockDeliveryClient::success();
    let sched = scheduler(
        db.clone(),
        mock.clone(),
        FixedGenerator::scripted(vec!["first take".to_string(), "second take".to_string()]),
        17,
    );

    let request = PostRequest {
        custom_prompt: Some("hourly thought".to_string()),
        ..Default::default()
    };
    let post = sched
        .submit_schedule(&request, ScheduleKind::Hourly, None, None)
        .await
        .unwrap();

    sched.deliver_post(&post.id).await.unwrap();
    let after_first = db.get_scheduled_post(&post.id).await.unwrap().unwrap();
    assert_eq!(after_first.status, PostStatus::Sent);
    let first_tweet = after_first.tweet_id.clone();

    // Second firing posts fresh content; the record stays as it was
    sched.deliver_post(&post.id).await.unwrap();
    let after_second = db.get_scheduled_post(&post.id).await.unwrap().unwrap();
    assert_eq!(after_second.tweet_id, first_tweet);

    let history = db.attempts_for_post(&post.id).await.unwrap();
    assert_eq!(history.len(), 2);
    let texts = mock.captured_posts();
    assert_eq!(texts[0].text, "first take");
    assert_eq!(texts[1].text, "second take");
}

#[tokio::test]
async fn unauthorized_failure_is_silent_in_history() {
    let db = Database::in_memory().await.unwrap();
    let mock =
        MockDeliveryClient::always_failing(DeliveryError::Unauthorized("token expired".to_string()));
    let sched = scheduler(db.clone(), mock, FixedGenerator::always("x"), 17);

    let request = PostRequest {
        literal_text: Some("will not go out".to_string()),
        ..Default::default()
    };
    let post = sched
        .submit_schedule(&request, ScheduleKind::OnceImmediate, None, None)
        .await
        .unwrap();

    assert!(sched.deliver_post(&post.id).await.is_err());

    let stored = db.get_scheduled_post(&post.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Failed);
    assert!(stored
        .error_message
        .as_deref()
        .unwrap()
        .contains("token expired"));

    // Config-class failures append zero history records
    assert!(db.attempts_for_post(&post.id).await.unwrap().is_empty());
    assert!(db.list_attempts(10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_post_cannot_be_delivered() {
    let db = Database::in_memory().await.unwrap();
    let mock = MockDeliveryClient::success();
    let sched = scheduler(db.clone(), mock.clone(), FixedGenerator::always("x"), 17);

    let post = sched
        .submit_schedule(
            &PostRequest {
                literal_text: Some("never mind".to_string()),
                ..Default::default()
            },
            ScheduleKind::Daily,
            Some("12:00"),
            None,
        )
        .await
        .unwrap();

    assert!(sched.cancel(&post.id).await.unwrap());

    let err = sched.deliver_post(&post.id).await.unwrap_err();
    assert!(matches!(err, ChirpcastError::InvalidInput(_)));
    assert_eq!(mock.post_call_count(), 0);

    let stored = db.get_scheduled_post(&post.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Cancelled);
}

#[tokio::test]
async fn immediate_and_scheduled_share_one_quota() {
    let db = Database::in_memory().await.unwrap();
    let mock = MockDeliveryClient::success();
    let sched = scheduler(db.clone(), mock, FixedGenerator::always("x"), 2);

    // Immediate send takes slot one
    sched
        .submit_now(&PostRequest {
            literal_text: Some("first".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    // A scheduled firing takes slot two
    let post = sched
        .submit_schedule(
            &PostRequest {
                literal_text: Some("second".to_string()),
                ..Default::default()
            },
            ScheduleKind::OnceImmediate,
            None,
            None,
        )
        .await
        .unwrap();
    sched.deliver_post(&post.id).await.unwrap();

    // Both sources now see an exhausted budget
    let err = sched
        .submit_now(&PostRequest {
            literal_text: Some("third".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ChirpcastError::QuotaExhausted));

    let stats = db.stats(Utc::now()).await.unwrap();
    assert_eq!(stats.sent_today, 2);
    assert_eq!(stats.total_sent, 2);
}

#[tokio::test]
async fn quota_deferral_leaves_recurring_post_untouched() {
    let db = Database::in_memory().await.unwrap();
    let mock = MockDeliveryClient::success();
    let sched = scheduler(db.clone(), mock.clone(), FixedGenerator::always("x"), 0);

    let post = sched
        .submit_schedule(
            &PostRequest {
                custom_prompt: Some("daily digest".to_string()),
                ..Default::default()
            },
            ScheduleKind::Daily,
            Some("09:00"),
            None,
        )
        .await
        .unwrap();

    let outcome = sched.deliver_post(&post.id).await.unwrap();
    assert!(matches!(outcome, DeliveryOutcome::QuotaDeferred { .. }));

    // Not a failure: record unchanged, nothing posted, no history
    let stored = db.get_scheduled_post(&post.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Scheduled);
    assert_eq!(stored.error_message, None);
    assert_eq!(mock.post_call_count(), 0);
    assert!(db.attempts_for_post(&post.id).await.unwrap().is_empty());
}
