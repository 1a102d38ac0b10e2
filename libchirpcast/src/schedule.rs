//! Schedule resolution and cron evaluation
//!
//! A schedule kind plus optional time-of-day input is resolved once, at
//! creation, into a normalized 5-field cron expression. The evaluator
//! supports the subset those expressions use: `*`, `*/n`, and literal
//! values per field.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use crate::error::{ChirpcastError, Result};
use crate::types::ScheduleKind;

/// Fallback weekday for weekly schedules (cron Sunday).
const WEEKLY_DEFAULT_DOW: u32 = 0;

/// Resolve a schedule kind into its normalized recurrence rule.
///
/// Returns `None` for one-shot posts; every recurring kind yields a
/// 5-field cron expression. `time` is "HH:MM" for daily/weekly kinds
/// (default 00:00); `custom` carries the caller-supplied expression for
/// `CustomCron`.
pub fn resolve_expression(
    kind: ScheduleKind,
    time: Option<&str>,
    custom: Option<&str>,
) -> Result<Option<String>> {
    let expr = match kind {
        ScheduleKind::OnceImmediate => return Ok(None),
        ScheduleKind::EveryMinute => "* * * * *".to_string(),
        ScheduleKind::Hourly => "0 * * * *".to_string(),
        ScheduleKind::Daily => {
            let (hour, minute) = time.map(parse_time).transpose()?.unwrap_or((0, 0));
            format!("{} {} * * *", minute, hour)
        }
        ScheduleKind::Weekly => {
            let (hour, minute) = time.map(parse_time).transpose()?.unwrap_or((0, 0));
            format!("{} {} * * {}", minute, hour, WEEKLY_DEFAULT_DOW)
        }
        ScheduleKind::CustomCron => {
            let expr = custom.ok_or_else(|| {
                ChirpcastError::InvalidInput(
                    "Custom schedule requires a cron expression".to_string(),
                )
            })?;
            // Validates field count and syntax before anything is persisted
            CronSchedule::parse(expr)?;
            expr.split_whitespace().collect::<Vec<_>>().join(" ")
        }
    };

    // Normalized expressions must always evaluate
    CronSchedule::parse(&expr)?;
    Ok(Some(expr))
}

/// Parse a "HH:MM" time-of-day string
pub fn parse_time(input: &str) -> Result<(u32, u32)> {
    let parts: Vec<&str> = input.split(':').collect();
    if parts.len() != 2 {
        return Err(ChirpcastError::InvalidInput(format!(
            "Time must be HH:MM, got: {}",
            input
        )));
    }

    let hour: u32 = parts[0]
        .parse()
        .map_err(|_| ChirpcastError::InvalidInput(format!("Invalid hour in time: {}", input)))?;
    let minute: u32 = parts[1]
        .parse()
        .map_err(|_| ChirpcastError::InvalidInput(format!("Invalid minute in time: {}", input)))?;

    if hour > 23 || minute > 59 {
        return Err(ChirpcastError::InvalidInput(format!(
            "Time out of range: {}",
            input
        )));
    }

    Ok((hour, minute))
}

/// One cron field: `*`, `*/n`, or a literal value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Any,
    Step(u32),
    Exact(u32),
}

impl Field {
    fn matches(&self, value: u32) -> bool {
        match self {
            Field::Any => true,
            Field::Step(n) => value % n == 0,
            Field::Exact(v) => value == *v,
        }
    }

    fn is_restricted(&self) -> bool {
        !matches!(self, Field::Any)
    }
}

/// A parsed 5-field cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CronSchedule {
    /// Parse and validate a 5-field cron expression
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ChirpcastError::InvalidInput(format!(
                "Cron expression must have exactly 5 fields, got {}: {}",
                fields.len(),
                expr
            )));
        }

        Ok(Self {
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            day_of_month: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            day_of_week: parse_field(fields[4], 0, 6)?,
        })
    }

    /// Whether the given instant (truncated to the minute) matches
    fn matches(&self, dt: DateTime<Utc>) -> bool {
        if !self.minute.matches(dt.minute())
            || !self.hour.matches(dt.hour())
            || !self.month.matches(dt.month())
        {
            return false;
        }

        // cron Sunday is 0
        let dow = dt.weekday().num_days_from_sunday();
        let dom_ok = self.day_of_month.matches(dt.day());
        let dow_ok = self.day_of_week.matches(dow);

        // Standard cron: when both day fields are restricted, either may match
        if self.day_of_month.is_restricted() && self.day_of_week.is_restricted() {
            dom_ok || dow_ok
        } else {
            dom_ok && dow_ok
        }
    }

    /// The next matching instant strictly after `after`.
    ///
    /// Scans minute by minute; the supported field forms guarantee a
    /// match within 366 days, but the scan is bounded anyway.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
        // Truncate to the minute, then step strictly forward
        let mut candidate = after
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(after)
            + Duration::minutes(1);

        const MAX_SCAN_MINUTES: i64 = 366 * 24 * 60;
        for _ in 0..MAX_SCAN_MINUTES {
            if self.matches(candidate) {
                return Ok(candidate);
            }
            candidate += Duration::minutes(1);
        }

        Err(ChirpcastError::InvalidInput(
            "Cron expression never matches within a year".to_string(),
        ))
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<Field> {
    if field == "*" {
        return Ok(Field::Any);
    }

    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().map_err(|_| {
            ChirpcastError::InvalidInput(format!("Invalid cron step: {}", field))
        })?;
        if n == 0 || n > max {
            return Err(ChirpcastError::InvalidInput(format!(
                "Cron step out of range: {}",
                field
            )));
        }
        return Ok(Field::Step(n));
    }

    let value: u32 = field.parse().map_err(|_| {
        ChirpcastError::InvalidInput(format!("Unsupported cron field: {}", field))
    })?;
    if value < min || value > max {
        return Err(ChirpcastError::InvalidInput(format!(
            "Cron value {} out of range {}-{}",
            value, min, max
        )));
    }
    Ok(Field::Exact(value))
}
