//! Durable job store: scheduled posts, delivery history, quota rows

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::types::{AttemptSource, DeliveryAttempt, PostStatus, QueueStats, ScheduledPost};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // mode=rwc so the database file is created if it doesn't exist;
        // forward slashes keep the URL valid on Windows too.
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// Open an in-memory database (tests and mock runs).
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(DbError::SqlxError)?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persist a new scheduled post
    pub async fn create_scheduled_post(&self, post: &ScheduledPost) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_posts (
                id, literal_text, custom_prompt, schedule_kind, schedule_expression,
                include_image, image_url, image_prompt, status, tweet_id, error_message,
                created_at, updated_at, sent_at, failed_at, cancelled_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.literal_text)
        .bind(&post.custom_prompt)
        .bind(post.schedule_kind.as_str())
        .bind(&post.schedule_expression)
        .bind(post.include_image as i32)
        .bind(&post.image_url)
        .bind(&post.image_prompt)
        .bind(post.status.as_str())
        .bind(&post.tweet_id)
        .bind(&post.error_message)
        .bind(post.created_at)
        .bind(post.updated_at)
        .bind(post.sent_at)
        .bind(post.failed_at)
        .bind(post.cancelled_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Get a scheduled post by ID
    pub async fn get_scheduled_post(&self, post_id: &str) -> Result<Option<ScheduledPost>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM scheduled_posts WHERE id = ?
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| row_to_post(&r)))
    }

    /// List posts, optionally filtered by status, newest first
    pub async fn list_scheduled_posts(
        &self,
        status: Option<PostStatus>,
    ) -> Result<Vec<ScheduledPost>> {
        let rows = match status {
            Some(s) => {
                sqlx::query(
                    r#"
                    SELECT * FROM scheduled_posts WHERE status = ?
                    ORDER BY created_at DESC
                    "#,
                )
                .bind(s.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM scheduled_posts ORDER BY created_at DESC
                    "#,
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(row_to_post).collect())
    }

    /// Transition a post to `sent`.
    ///
    /// Guarded: only applies while the record is still `scheduled`, so a
    /// record that reached a terminal state is never rewritten. Returns
    /// whether the transition applied.
    pub async fn mark_sent(&self, post_id: &str, tweet_id: &str, final_text: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'sent', tweet_id = ?, literal_text = ?, sent_at = ?, updated_at = ?,
                error_message = NULL
            WHERE id = ? AND status = 'scheduled'
            "#,
        )
        .bind(tweet_id)
        .bind(final_text)
        .bind(now)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Transition a post to `failed` with an error message. Guarded like
    /// `mark_sent`.
    pub async fn mark_failed(&self, post_id: &str, error: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'failed', error_message = ?, failed_at = ?, updated_at = ?
            WHERE id = ? AND status = 'scheduled'
            "#,
        )
        .bind(error)
        .bind(now)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Transition a post to `cancelled`. Guarded like `mark_sent`.
    pub async fn mark_cancelled(&self, post_id: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'cancelled', cancelled_at = ?, updated_at = ?
            WHERE id = ? AND status = 'scheduled'
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Append a delivery attempt to the history log
    pub async fn append_attempt(&self, attempt: &DeliveryAttempt) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delivery_history (post_id, text, tweet_id, had_media, source, success, error_message, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&attempt.post_id)
        .bind(&attempt.text)
        .bind(&attempt.tweet_id)
        .bind(attempt.had_media as i32)
        .bind(attempt.source.as_str())
        .bind(attempt.success as i32)
        .bind(&attempt.error_message)
        .bind(attempt.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// List delivery history, newest first, paged by limit/offset
    pub async fn list_attempts(&self, limit: i64, offset: i64) -> Result<Vec<DeliveryAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM delivery_history
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(row_to_attempt).collect())
    }

    /// All attempts recorded for one post, newest first
    pub async fn attempts_for_post(&self, post_id: &str) -> Result<Vec<DeliveryAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM delivery_history
            WHERE post_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(row_to_attempt).collect())
    }

    /// Aggregate stats: successful sends today (UTC), total successful
    /// sends, and posts still waiting in the queue.
    pub async fn stats(&self, now: chrono::DateTime<chrono::Utc>) -> Result<QueueStats> {
        let day_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc().timestamp())
            .unwrap_or(0);

        let sent_today: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM delivery_history WHERE success = 1 AND created_at >= ?",
        )
        .bind(day_start)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let total_sent: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM delivery_history WHERE success = 1")
                .fetch_one(&self.pool)
                .await
                .map_err(DbError::SqlxError)?;

        let pending: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM scheduled_posts WHERE status = 'scheduled'")
                .fetch_one(&self.pool)
                .await
                .map_err(DbError::SqlxError)?;

        Ok(QueueStats {
            sent_today: sent_today.0 as u32,
            total_sent: total_sent.0 as u64,
            pending_scheduled: pending.0 as u64,
        })
    }
}

fn row_to_post(r: &sqlx::sqlite::SqliteRow) -> ScheduledPost {
    use std::str::FromStr;

    ScheduledPost {
        id: r.get("id"),
        literal_text: r.get("literal_text"),
        custom_prompt: r.get("custom_prompt"),
        schedule_kind: crate::types::ScheduleKind::from_str(r.get::<String, _>("schedule_kind").as_str())
            .unwrap_or(crate::types::ScheduleKind::OnceImmediate),
        schedule_expression: r.get("schedule_expression"),
        include_image: r.get::<i32, _>("include_image") != 0,
        image_url: r.get("image_url"),
        image_prompt: r.get("image_prompt"),
        status: PostStatus::from_str_lossy(r.get::<String, _>("status").as_str()),
        tweet_id: r.get("tweet_id"),
        error_message: r.get("error_message"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
        sent_at: r.get("sent_at"),
        failed_at: r.get("failed_at"),
        cancelled_at: r.get("cancelled_at"),
    }
}

fn row_to_attempt(r: &sqlx::sqlite::SqliteRow) -> DeliveryAttempt {
    DeliveryAttempt {
        id: r.get("id"),
        post_id: r.get("post_id"),
        text: r.get("text"),
        tweet_id: r.get("tweet_id"),
        had_media: r.get::<i32, _>("had_media") != 0,
        source: match r.get::<String, _>("source").as_str() {
            "immediate" => AttemptSource::Immediate,
            _ => AttemptSource::Scheduled,
        },
        success: r.get::<i32, _>("success") != 0,
        error_message: r.get("error_message"),
        created_at: r.get("created_at"),
    }
}
