//! Core types for Chirpcast

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChirpcastError;

/// Lifecycle of a scheduled post.
///
/// `Sent`, `Failed` and `Cancelled` are terminal: the database layer
/// refuses to transition a record out of them. Recurring schedules keep
/// firing after the first occurrence, but later occurrences only append
/// history rows, they never rewrite the record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "TEXT")]
pub enum PostStatus {
    Scheduled,
    Sent,
    Failed,
    Cancelled,
}

impl PostStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PostStatus::Scheduled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Scheduled => "scheduled",
            PostStatus::Sent => "sent",
            PostStatus::Failed => "failed",
            PostStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "sent" => PostStatus::Sent,
            "failed" => PostStatus::Failed,
            "cancelled" => PostStatus::Cancelled,
            _ => PostStatus::Scheduled,
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a post recurs. Resolved once, at creation, into a normalized
/// cron expression (`None` for one-shot posts).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScheduleKind {
    OnceImmediate,
    EveryMinute,
    Hourly,
    Daily,
    Weekly,
    CustomCron,
}

impl ScheduleKind {
    pub fn is_recurring(&self) -> bool {
        !matches!(self, ScheduleKind::OnceImmediate)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::OnceImmediate => "once",
            ScheduleKind::EveryMinute => "every-minute",
            ScheduleKind::Hourly => "hourly",
            ScheduleKind::Daily => "daily",
            ScheduleKind::Weekly => "weekly",
            ScheduleKind::CustomCron => "custom",
        }
    }
}

impl std::str::FromStr for ScheduleKind {
    type Err = ChirpcastError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "once" | "now" => Ok(ScheduleKind::OnceImmediate),
            "every-minute" | "minutely" => Ok(ScheduleKind::EveryMinute),
            "hourly" => Ok(ScheduleKind::Hourly),
            "daily" => Ok(ScheduleKind::Daily),
            "weekly" => Ok(ScheduleKind::Weekly),
            "custom" | "cron" => Ok(ScheduleKind::CustomCron),
            other => Err(ChirpcastError::InvalidInput(format!(
                "Unsupported schedule kind: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted posting intent, one-shot or recurring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: String,
    /// Verbatim text to post. When absent, content is generated from
    /// `custom_prompt` at fire time.
    pub literal_text: Option<String>,
    pub custom_prompt: Option<String>,
    pub schedule_kind: ScheduleKind,
    /// Normalized 5-field cron expression; `None` for one-shot posts.
    pub schedule_expression: Option<String>,
    pub include_image: bool,
    pub image_url: Option<String>,
    pub image_prompt: Option<String>,
    pub status: PostStatus,
    pub tweet_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub sent_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub cancelled_at: Option<i64>,
}

impl ScheduledPost {
    pub fn new(kind: ScheduleKind, expression: Option<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            literal_text: None,
            custom_prompt: None,
            schedule_kind: kind,
            schedule_expression: expression,
            include_image: false,
            image_url: None,
            image_prompt: None,
            status: PostStatus::Scheduled,
            tweet_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
            failed_at: None,
            cancelled_at: None,
        }
    }
}

/// Where a delivery attempt originated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttemptSource {
    Immediate,
    Scheduled,
}

impl AttemptSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptSource::Immediate => "immediate",
            AttemptSource::Scheduled => "scheduled",
        }
    }
}

impl std::fmt::Display for AttemptSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only history entry, one per delivery attempt.
///
/// Never mutated after creation; configuration-class failures are not
/// recorded here at all (they land on the post's `error_message`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: Option<i64>,
    pub post_id: Option<String>,
    pub text: String,
    pub tweet_id: Option<String>,
    pub had_media: bool,
    pub source: AttemptSource,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: i64,
}

impl DeliveryAttempt {
    pub fn success(post_id: Option<String>, text: String, tweet_id: String, had_media: bool, source: AttemptSource) -> Self {
        Self {
            id: None,
            post_id,
            text,
            tweet_id: Some(tweet_id),
            had_media,
            source,
            success: true,
            error_message: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn failure(post_id: Option<String>, text: String, error: String, source: AttemptSource) -> Self {
        Self {
            id: None,
            post_id,
            text,
            tweet_id: None,
            had_media: false,
            source,
            success: false,
            error_message: Some(error),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Aggregate queue statistics for the stats boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub sent_today: u32,
    pub total_sent: u64,
    pub pending_scheduled: u64,
}
