//! Scheduling and delivery engine
//!
//! Holds upcoming firings in a min-heap keyed by fire time and sleeps
//! until the earliest one, instead of polling the store on a fixed
//! interval. A command channel feeds registrations and cancellations
//! into the loop; a periodic reconcile pass picks up posts written by
//! other processes. Each firing runs as its own task, so a slow
//! delivery never delays the next occurrence.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::content::{ContentGenerator, Tone, MAX_POST_LENGTH};
use crate::delivery::DeliveryClient;
use crate::error::{ChirpcastError, ContentError, Result};
use crate::media::resolve_media;
use crate::quota::QuotaTracker;
use crate::schedule::{resolve_expression, CronSchedule};
use crate::types::{AttemptSource, DeliveryAttempt, PostStatus, ScheduleKind, ScheduledPost};
use crate::Database;

/// Prompt used when a post asks for generated content without saying
/// what about.
const DEFAULT_PROMPT: &str =
    "Share an interesting insight about technology or software engineering";

/// How often the loop re-reads the store for posts registered by other
/// processes.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

/// Sleep cap when the heap is empty.
const IDLE_SLEEP: Duration = Duration::from_secs(60);

/// A request to post, immediately or on a schedule.
#[derive(Debug, Clone, Default)]
pub struct PostRequest {
    /// Verbatim text; generated from `custom_prompt` when absent.
    pub literal_text: Option<String>,
    pub custom_prompt: Option<String>,
    pub include_image: bool,
    pub image_url: Option<String>,
    pub image_prompt: Option<String>,
    /// Local image to upload as-is. Immediate posts only; schedules
    /// cannot reference files that may be gone by fire time.
    pub image_file: Option<String>,
}

/// What a delivery run concluded.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    Sent { tweet_id: String, text: String },
    /// The daily quota was exhausted; the firing was deferred, not
    /// failed.
    QuotaDeferred { resume_at: DateTime<Utc> },
}

enum Command {
    Register { post_id: String, fire_at: DateTime<Utc> },
    Unregister { post_id: String },
    Cancel { post_id: String },
    Shutdown,
}

/// Heap entry; `Reverse` turns the max-heap into earliest-first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Firing {
    fire_at: DateTime<Utc>,
    post_id: String,
}

pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    control: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

struct SchedulerInner {
    db: Database,
    quota: QuotaTracker,
    delivery: Arc<dyn DeliveryClient>,
    generator: Arc<dyn ContentGenerator>,
    http: reqwest::Client,
    config: SchedulerConfig,
}

/// Validate a request and persist it as a scheduled post.
///
/// Shared by the queue CLI (which has no running loop) and the
/// scheduler's own submission path. Literal text longer than the post
/// limit is rejected here, before anything reaches the store.
pub async fn create_post(
    db: &Database,
    request: &PostRequest,
    kind: ScheduleKind,
    time: Option<&str>,
    custom_expression: Option<&str>,
) -> Result<ScheduledPost> {
    let literal_text = normalize_literal(request.literal_text.as_deref())?;
    let expression = resolve_expression(kind, time, custom_expression)?;

    let mut post = ScheduledPost::new(kind, expression);
    post.literal_text = literal_text;
    post.custom_prompt = request
        .custom_prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);
    post.include_image = request.include_image;
    post.image_url = request.image_url.clone();
    post.image_prompt = request.image_prompt.clone();

    db.create_scheduled_post(&post).await?;
    Ok(post)
}

fn normalize_literal(text: Option<&str>) -> Result<Option<String>> {
    let text = match text.map(str::trim) {
        Some(t) if !t.is_empty() => t,
        _ => return Ok(None),
    };
    let len = text.chars().count();
    if len > MAX_POST_LENGTH {
        return Err(ChirpcastError::InvalidInput(format!(
            "Post text is {} characters; the limit is {}",
            len, MAX_POST_LENGTH
        )));
    }
    Ok(Some(text.to_string()))
}

impl Scheduler {
    pub fn new(
        db: Database,
        quota: QuotaTracker,
        delivery: Arc<dyn DeliveryClient>,
        generator: Arc<dyn ContentGenerator>,
        config: SchedulerConfig,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            inner: Arc::new(SchedulerInner {
                db,
                quota,
                delivery,
                generator,
                http,
                config,
            }),
            control: Mutex::new(None),
            handle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.inner.quota
    }

    /// Spawn the scheduling loop. Pending posts in the store are
    /// registered on startup, so a restart resumes where the previous
    /// run left off.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.control.lock().unwrap() = Some(tx.clone());
        *handle = Some(tokio::spawn(run_loop(self.inner.clone(), rx, tx)));
    }

    /// Stop the loop and wait for in-flight deliveries to finish.
    pub async fn shutdown(&self) {
        self.send(Command::Shutdown);
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("scheduler loop ended abnormally: {}", e);
            }
        }
        *self.control.lock().unwrap() = None;
    }

    /// Post right now, synchronously, with retry.
    ///
    /// An exhausted daily quota is an error here (there is a caller
    /// waiting for an answer), unlike scheduled firings which defer.
    pub async fn submit_now(&self, request: &PostRequest) -> Result<DeliveryOutcome> {
        let job = Job::from_request(request)?;
        let outcome = self
            .inner
            .deliver_with_retry(
                &job,
                AttemptSource::Immediate,
                self.inner.config.max_attempts_immediate,
            )
            .await?;

        match outcome {
            DeliveryOutcome::Sent { .. } => Ok(outcome),
            DeliveryOutcome::QuotaDeferred { .. } => Err(ChirpcastError::QuotaExhausted),
        }
    }

    /// Persist a scheduled post and hand it to the running loop.
    pub async fn submit_schedule(
        &self,
        request: &PostRequest,
        kind: ScheduleKind,
        time: Option<&str>,
        custom_expression: Option<&str>,
    ) -> Result<ScheduledPost> {
        let post = create_post(&self.inner.db, request, kind, time, custom_expression).await?;

        if let Some(fire_at) = next_fire_time(&post, Utc::now())? {
            self.send(Command::Register {
                post_id: post.id.clone(),
                fire_at,
            });
        }
        Ok(post)
    }

    /// Cancel a pending post. Returns false when the post was already
    /// terminal (or unknown), in which case nothing changed.
    pub async fn cancel(&self, post_id: &str) -> Result<bool> {
        let applied = self.inner.db.mark_cancelled(post_id).await?;
        if applied {
            self.send(Command::Cancel {
                post_id: post_id.to_string(),
            });
        }
        Ok(applied)
    }

    /// Run every pending one-shot post now, without the loop. Returns
    /// the number of posts that were sent.
    pub async fn flush_pending(&self) -> Result<usize> {
        let pending = self
            .inner
            .db
            .list_scheduled_posts(Some(PostStatus::Scheduled))
            .await?;

        let mut sent = 0;
        for post in pending {
            if post.schedule_kind.is_recurring() {
                continue;
            }
            if let Ok(DeliveryOutcome::Sent { .. }) = self.inner.run_occurrence(&post).await {
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Deliver one stored post right now, regardless of its schedule.
    ///
    /// One firing of a recurring post; the full terminal transition for
    /// a one-shot post.
    pub async fn deliver_post(&self, post_id: &str) -> Result<DeliveryOutcome> {
        let post = self
            .inner
            .db
            .get_scheduled_post(post_id)
            .await?
            .ok_or_else(|| {
                ChirpcastError::InvalidInput(format!("Post not found: {}", post_id))
            })?;

        if post.status == PostStatus::Cancelled
            || (!post.schedule_kind.is_recurring() && post.status.is_terminal())
        {
            return Err(ChirpcastError::InvalidInput(format!(
                "Post is already {}: {}",
                post.status, post_id
            )));
        }

        self.inner.run_occurrence(&post).await
    }

    fn send(&self, command: Command) {
        let control = self.control.lock().unwrap();
        if let Some(tx) = control.as_ref() {
            // A closed channel means the loop already shut down
            let _ = tx.send(command);
        }
    }
}

/// The next time a pending post should fire: now for one-shot posts,
/// the next cron occurrence for recurring ones.
fn next_fire_time(post: &ScheduledPost, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    match &post.schedule_expression {
        None => Ok(Some(now)),
        Some(expr) => {
            let schedule = CronSchedule::parse(expr)?;
            Ok(Some(schedule.next_after(now)?))
        }
    }
}

async fn run_loop(
    inner: Arc<SchedulerInner>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    tx: mpsc::UnboundedSender<Command>,
) {
    let mut heap: BinaryHeap<Reverse<Firing>> = BinaryHeap::new();
    let mut tracked: HashSet<String> = HashSet::new();
    let mut attempts: JoinSet<()> = JoinSet::new();

    if let Err(e) = reconcile(&inner, &mut heap, &mut tracked).await {
        error!("startup reconcile failed: {}", e);
    }
    info!(pending = tracked.len(), "scheduler loop started");

    let mut reconcile_tick = tokio::time::interval(RECONCILE_INTERVAL);
    reconcile_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    reconcile_tick.tick().await; // the first tick fires immediately

    loop {
        let sleep_for = heap
            .peek()
            .map(|Reverse(firing)| {
                (firing.fire_at - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO)
            })
            .unwrap_or(IDLE_SLEEP);

        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Register { post_id, fire_at }) => {
                    debug!(post_id = %post_id, fire_at = %fire_at, "registered");
                    tracked.insert(post_id.clone());
                    heap.push(Reverse(Firing { fire_at, post_id }));
                }
                Some(Command::Unregister { post_id }) => {
                    tracked.remove(&post_id);
                }
                Some(Command::Cancel { post_id }) => {
                    // Stale heap entries are skipped at pop time
                    tracked.remove(&post_id);
                }
                Some(Command::Shutdown) | None => break,
            },
            _ = reconcile_tick.tick() => {
                if let Err(e) = reconcile(&inner, &mut heap, &mut tracked).await {
                    warn!("reconcile failed: {}", e);
                }
            }
            _ = tokio::time::sleep(sleep_for) => {
                fire_due(&inner, &mut heap, &mut tracked, &mut attempts, &tx).await;
            }
            Some(result) = attempts.join_next(), if !attempts.is_empty() => {
                if let Err(e) = result {
                    error!("delivery task panicked: {}", e);
                }
            }
        }
    }

    info!(in_flight = attempts.len(), "scheduler loop stopping");
    while attempts.join_next().await.is_some() {}
}

/// Register pending posts from the store that the loop is not yet
/// tracking. This is how posts written by other processes get picked
/// up, and how a restart resumes.
async fn reconcile(
    inner: &SchedulerInner,
    heap: &mut BinaryHeap<Reverse<Firing>>,
    tracked: &mut HashSet<String>,
) -> Result<()> {
    let pending = inner
        .db
        .list_scheduled_posts(Some(PostStatus::Scheduled))
        .await?;
    let now = Utc::now();

    for post in pending {
        if tracked.contains(&post.id) {
            continue;
        }
        match next_fire_time(&post, now) {
            Ok(Some(fire_at)) => {
                debug!(post_id = %post.id, fire_at = %fire_at, "picked up pending post");
                tracked.insert(post.id.clone());
                heap.push(Reverse(Firing {
                    fire_at,
                    post_id: post.id,
                }));
            }
            Ok(None) => {}
            Err(e) => {
                // A stored expression that no longer parses must not
                // wedge the loop; fail the record instead.
                warn!(post_id = %post.id, "unusable schedule expression: {}", e);
                let _ = inner
                    .db
                    .mark_failed(&post.id, &format!("Unusable schedule expression: {}", e))
                    .await;
            }
        }
    }
    Ok(())
}

async fn fire_due(
    inner: &Arc<SchedulerInner>,
    heap: &mut BinaryHeap<Reverse<Firing>>,
    tracked: &mut HashSet<String>,
    attempts: &mut JoinSet<()>,
    tx: &mpsc::UnboundedSender<Command>,
) {
    let now = Utc::now();

    while let Some(Reverse(firing)) = heap.peek() {
        if firing.fire_at > now {
            break;
        }
        let Reverse(firing) = heap.pop().expect("peeked entry exists");

        if !tracked.contains(&firing.post_id) {
            continue; // cancelled while queued
        }

        let post = match inner.db.get_scheduled_post(&firing.post_id).await {
            Ok(Some(post)) => post,
            Ok(None) => {
                tracked.remove(&firing.post_id);
                continue;
            }
            Err(e) => {
                warn!(post_id = %firing.post_id, "failed to load post: {}", e);
                continue;
            }
        };

        if post.status == PostStatus::Cancelled {
            tracked.remove(&firing.post_id);
            continue;
        }

        if post.schedule_kind.is_recurring() {
            // Recurring posts keep firing past the first occurrence;
            // register the next one before this one runs.
            match next_fire_time(&post, now) {
                Ok(Some(next)) => heap.push(Reverse(Firing {
                    fire_at: next,
                    post_id: post.id.clone(),
                })),
                _ => {
                    tracked.remove(&post.id);
                }
            }
        } else if post.status.is_terminal() {
            tracked.remove(&firing.post_id);
            continue;
        }

        let inner = inner.clone();
        let tx = tx.clone();
        attempts.spawn(async move {
            let result = inner.run_occurrence(&post).await;
            if post.schedule_kind.is_recurring() {
                return;
            }
            // One-shot follow-up: defer on quota, otherwise the record
            // is terminal now and the loop can forget it.
            match result {
                Ok(DeliveryOutcome::QuotaDeferred { resume_at }) => {
                    let _ = tx.send(Command::Register {
                        post_id: post.id.clone(),
                        fire_at: resume_at,
                    });
                }
                _ => {
                    let _ = tx.send(Command::Unregister {
                        post_id: post.id.clone(),
                    });
                }
            }
        });
    }
}

/// Job payload for one delivery run, detached from any stored record so
/// the immediate path can use the same pipeline.
struct Job {
    post_id: Option<String>,
    literal_text: Option<String>,
    custom_prompt: Option<String>,
    include_image: bool,
    image_url: Option<String>,
    image_prompt: Option<String>,
    image_file: Option<String>,
}

impl Job {
    fn from_request(request: &PostRequest) -> Result<Self> {
        Ok(Self {
            post_id: None,
            literal_text: normalize_literal(request.literal_text.as_deref())?,
            custom_prompt: request.custom_prompt.clone(),
            include_image: request.include_image,
            image_url: request.image_url.clone(),
            image_prompt: request.image_prompt.clone(),
            image_file: request.image_file.clone(),
        })
    }

    fn from_post(post: &ScheduledPost) -> Self {
        // A prompt-based post regenerates every firing. The record's
        // literal_text holds the last delivered text (mark_sent writes
        // it back) and must not shadow the prompt.
        let literal_text = if post.custom_prompt.is_some() {
            None
        } else {
            post.literal_text.clone()
        };
        Self {
            post_id: Some(post.id.clone()),
            literal_text,
            custom_prompt: post.custom_prompt.clone(),
            include_image: post.include_image,
            image_url: post.image_url.clone(),
            image_prompt: post.image_prompt.clone(),
            image_file: None,
        }
    }
}

enum AttemptResult {
    Sent { tweet_id: String, text: String, had_media: bool },
    QuotaDenied,
}

impl SchedulerInner {
    /// Run one firing of a stored post end to end.
    ///
    /// The first successful firing moves the record to `sent`; the
    /// guarded transition makes later firings of a recurring post
    /// no-ops on the record while history keeps accumulating.
    async fn run_occurrence(&self, post: &ScheduledPost) -> Result<DeliveryOutcome> {
        let job = Job::from_post(post);
        let max_attempts = self.config.max_attempts_scheduled;

        match self.deliver_with_retry(&job, AttemptSource::Scheduled, max_attempts).await {
            Ok(DeliveryOutcome::Sent { tweet_id, text }) => {
                info!(post_id = %post.id, tweet_id = %tweet_id, "post delivered");
                if let Err(e) = self.db.mark_sent(&post.id, &tweet_id, &text).await {
                    error!(post_id = %post.id, "failed to record sent status: {}", e);
                }
                Ok(DeliveryOutcome::Sent { tweet_id, text })
            }
            Ok(deferred @ DeliveryOutcome::QuotaDeferred { .. }) => {
                info!(post_id = %post.id, "quota exhausted, deferred");
                Ok(deferred)
            }
            Err(e) => {
                warn!(post_id = %post.id, "delivery failed: {}", e);
                if let Err(db_err) = self.db.mark_failed(&post.id, &e.to_string()).await {
                    error!(post_id = %post.id, "failed to record failure: {}", db_err);
                }
                Err(e)
            }
        }
    }

    /// The retry wrapper around single attempts. Transient failures
    /// back off exponentially (base * 2^(attempt-1)); quota denial is
    /// never retried, it is a deferral.
    async fn deliver_with_retry(
        &self,
        job: &Job,
        source: AttemptSource,
        max_attempts: u32,
    ) -> Result<DeliveryOutcome> {
        let max_attempts = max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.attempt(job, source).await {
                Ok(AttemptResult::Sent { tweet_id, text, had_media }) => {
                    let record = DeliveryAttempt::success(
                        job.post_id.clone(),
                        text.clone(),
                        tweet_id.clone(),
                        had_media,
                        source,
                    );
                    if let Err(e) = self.db.append_attempt(&record).await {
                        error!("failed to append history: {}", e);
                    }
                    return Ok(DeliveryOutcome::Sent { tweet_id, text });
                }
                Ok(AttemptResult::QuotaDenied) => {
                    return Ok(DeliveryOutcome::QuotaDeferred {
                        resume_at: self.quota.reset_at(Utc::now()),
                    });
                }
                Err(e) => {
                    if is_transient(&e) && attempt < max_attempts {
                        let delay = self.backoff_delay(attempt);
                        debug!(attempt, delay_secs = delay.as_secs(), "retrying after transient failure: {}", e);
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    // Configuration-class failures stay off the history
                    // log; they say nothing about the content.
                    if !is_configuration_failure(&e) {
                        let text = job
                            .literal_text
                            .clone()
                            .or_else(|| job.custom_prompt.clone())
                            .unwrap_or_default();
                        let record = DeliveryAttempt::failure(
                            job.post_id.clone(),
                            text,
                            e.to_string(),
                            source,
                        );
                        if let Err(db_err) = self.db.append_attempt(&record).await {
                            error!("failed to append history: {}", db_err);
                        }
                    }
                    return Err(e);
                }
            }
        }

        unreachable!("retry loop always returns")
    }

    /// One delivery attempt: text, media, quota admission, post.
    ///
    /// The cheap quota pre-check runs before content generation so an
    /// exhausted day does not burn provider tokens. The binding check
    /// is the atomic admission just before the post; a failed post
    /// gives its slot back.
    async fn attempt(&self, job: &Job, source: AttemptSource) -> Result<AttemptResult> {
        let now = Utc::now();
        if !self.quota.check(&self.db, now).await? {
            return Ok(AttemptResult::QuotaDenied);
        }

        let text = match &job.literal_text {
            Some(text) => text.clone(),
            None => {
                let prompt = job.custom_prompt.as_deref().unwrap_or(DEFAULT_PROMPT);
                self.generator
                    .generate(prompt, Tone::default(), MAX_POST_LENGTH)
                    .await?
            }
        };

        let media_id = if let Some(path) = &job.image_file {
            Some(self.delivery.upload_media(std::path::Path::new(path)).await?)
        } else if job.include_image {
            // The placeholder falls back to the content prompt when no
            // dedicated image prompt was given.
            resolve_media(
                &self.http,
                self.delivery.as_ref(),
                job.image_url.as_deref(),
                job.image_prompt.as_deref().or(job.custom_prompt.as_deref()),
            )
            .await?
        } else {
            None
        };

        let now = Utc::now();
        if !self.quota.check_and_record(&self.db, now).await? {
            return Ok(AttemptResult::QuotaDenied);
        }

        match self.delivery.post_text(&text, media_id.as_deref()).await {
            Ok(tweet_id) => {
                debug!(tweet_id = %tweet_id, source = %source, "delivery accepted");
                Ok(AttemptResult::Sent {
                    tweet_id,
                    text,
                    had_media: media_id.is_some(),
                })
            }
            Err(e) => {
                // The slot counts successful sends only
                if let Err(release_err) = self.quota.release(&self.db, now).await {
                    error!("failed to release quota slot: {}", release_err);
                }
                Err(e)
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_secs(self.config.retry_base_secs.saturating_mul(factor))
    }
}

fn is_transient(error: &ChirpcastError) -> bool {
    match error {
        ChirpcastError::Delivery(e) => e.is_transient(),
        ChirpcastError::Content(e) => e.is_transient(),
        // A hiccup in the store is worth one more try
        ChirpcastError::Database(_) => true,
        _ => false,
    }
}

fn is_configuration_failure(error: &ChirpcastError) -> bool {
    match error {
        ChirpcastError::Delivery(e) => e.is_configuration(),
        ChirpcastError::Content(ContentError::MissingConfig(_)) => true,
        _ => false,
    }
}
