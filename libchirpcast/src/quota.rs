//! Daily posting quota
//!
//! Tracks successful sends per UTC calendar day in a durable counter
//! shared by every request source. The check and the increment are a
//! single SQL statement, so concurrent firings cannot both take the
//! last slot.

use chrono::{DateTime, Duration, Utc};

use crate::error::{DbError, Result};
use crate::Database;

/// Default daily cap on successful sends.
pub const DEFAULT_DAILY_LIMIT: u32 = 17;

/// Tracker for the global daily send budget
#[derive(Debug, Clone)]
pub struct QuotaTracker {
    daily_limit: u32,
}

impl QuotaTracker {
    pub fn new(daily_limit: u32) -> Self {
        Self { daily_limit }
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    /// Check whether a send would be admitted right now (without
    /// claiming a slot).
    ///
    /// A storage error propagates; callers must treat it as "cannot
    /// send", never as unlimited budget.
    pub async fn check(&self, db: &Database, now: DateTime<Utc>) -> Result<bool> {
        let count = get_day_count(db, &day_key(now)).await?;
        Ok(count < self.daily_limit)
    }

    /// Atomically claim a send slot for today.
    ///
    /// Returns Ok(true) if the slot was claimed, Ok(false) if the quota
    /// is exhausted. The conditional upsert makes check-then-increment
    /// one admission decision under concurrency.
    pub async fn check_and_record(&self, db: &Database, now: DateTime<Utc>) -> Result<bool> {
        if self.daily_limit == 0 {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO daily_quota (day, sent_count)
            VALUES (?, 1)
            ON CONFLICT(day)
            DO UPDATE SET sent_count = sent_count + 1
            WHERE sent_count < ?
            "#,
        )
        .bind(day_key(now))
        .bind(self.daily_limit)
        .execute(db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Give a claimed slot back. Used when an admitted send ultimately
    /// fails, so the counter only counts successful sends.
    pub async fn release(&self, db: &Database, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE daily_quota SET sent_count = sent_count - 1
            WHERE day = ? AND sent_count > 0
            "#,
        )
        .bind(day_key(now))
        .execute(db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Remaining budget for today
    pub async fn remaining(&self, db: &Database, now: DateTime<Utc>) -> Result<u32> {
        let count = get_day_count(db, &day_key(now)).await?;
        Ok(self.daily_limit.saturating_sub(count))
    }

    /// Successful sends recorded for today
    pub async fn sent_today(&self, db: &Database, now: DateTime<Utc>) -> Result<u32> {
        get_day_count(db, &day_key(now)).await
    }

    /// The next UTC midnight, when the budget resets
    pub fn reset_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let tomorrow = now.date_naive() + Duration::days(1);
        tomorrow.and_hms_opt(0, 0, 0).expect("midnight is valid").and_utc()
    }
}

impl Default for QuotaTracker {
    fn default() -> Self {
        Self::new(DEFAULT_DAILY_LIMIT)
    }
}

/// Counter key for a calendar day, e.g. "2026-08-29". Rows from prior
/// days are inert because the key differs; no cleanup needed.
fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

async fn get_day_count(db: &Database, day: &str) -> Result<u32> {
    let row = sqlx::query_as::<_, (Option<i64>,)>(
        r#"
        SELECT sent_count FROM daily_quota WHERE day = ?
        "#,
    )
    .bind(day)
    .fetch_optional(db.pool())
    .await
    .map_err(DbError::SqlxError)?;

    Ok(row.and_then(|r| r.0).unwrap_or(0) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn setup() -> Database {
        Database::in_memory().await.unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[tokio::test]
    async fn test_first_send_allowed() {
        let db = setup().await;
        let quota = QuotaTracker::default();
        let now = Utc::now();

        assert!(quota.check(&db, now).await.unwrap());
        assert!(quota.check_and_record(&db, now).await.unwrap());
        assert_eq!(quota.sent_today(&db, now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_limit_enforced() {
        let db = setup().await;
        let quota = QuotaTracker::new(17);
        let now = Utc::now();

        for i in 0..17 {
            assert!(
                quota.check_and_record(&db, now).await.unwrap(),
                "send {} should be admitted",
                i + 1
            );
        }

        // The 18th admission attempt must be denied
        assert!(!quota.check_and_record(&db, now).await.unwrap());
        assert!(!quota.check(&db, now).await.unwrap());
        assert_eq!(quota.remaining(&db, now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_admissions_never_exceed_limit() {
        let temp = tempfile::TempDir::new().unwrap();
        let db_path = temp.path().join("quota.db");
        let db = Database::new(&db_path.to_string_lossy()).await.unwrap();
        let quota = QuotaTracker::new(17);
        let now = Utc::now();

        // Fire 40 admissions concurrently against the shared counter
        let tasks: Vec<_> = (0..40)
            .map(|_| {
                let db = db.clone();
                let quota = quota.clone();
                tokio::spawn(async move { quota.check_and_record(&db, now).await.unwrap() })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 17);
        assert_eq!(quota.sent_today(&db, now).await.unwrap(), 17);
    }

    #[tokio::test]
    async fn test_daily_reset_at_utc_midnight() {
        let db = setup().await;
        let quota = QuotaTracker::new(17);

        let late = at(2026, 8, 29, 23, 59, 59);
        for _ in 0..17 {
            assert!(quota.check_and_record(&db, late).await.unwrap());
        }
        assert!(!quota.check(&db, late).await.unwrap());

        // One second past midnight the full budget is back
        let next_day = at(2026, 8, 30, 0, 0, 1);
        assert_eq!(quota.remaining(&db, next_day).await.unwrap(), 17);
        assert!(quota.check(&db, next_day).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_returns_slot() {
        let db = setup().await;
        let quota = QuotaTracker::new(2);
        let now = Utc::now();

        assert!(quota.check_and_record(&db, now).await.unwrap());
        assert!(quota.check_and_record(&db, now).await.unwrap());
        assert!(!quota.check_and_record(&db, now).await.unwrap());

        quota.release(&db, now).await.unwrap();
        assert!(quota.check_and_record(&db, now).await.unwrap());
        assert_eq!(quota.sent_today(&db, now).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_release_never_goes_negative() {
        let db = setup().await;
        let quota = QuotaTracker::new(5);
        let now = Utc::now();

        quota.release(&db, now).await.unwrap();
        assert_eq!(quota.sent_today(&db, now).await.unwrap(), 0);
        assert_eq!(quota.remaining(&db, now).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_zero_limit_denies_everything() {
        let db = setup().await;
        let quota = QuotaTracker::new(0);
        let now = Utc::now();

        assert!(!quota.check(&db, now).await.unwrap());
        assert!(!quota.check_and_record(&db, now).await.unwrap());
    }

    #[test]
    fn test_reset_at_is_next_utc_midnight() {
        let quota = QuotaTracker::default();
        let now = Utc.with_ymd_and_hms(2026, 8, 29, 15, 30, 0).unwrap();
        let reset = quota.reset_at(now);
        assert_eq!(reset, Utc.with_ymd_and_hms(2026, 8, 30, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_day_key_format() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 3, 0, 0).unwrap();
        assert_eq!(day_key(now), "2026-01-05");
    }
}
