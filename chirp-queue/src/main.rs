//! chirp-queue - Manage the scheduled post queue
//!
//! Creates, lists and cancels scheduled posts, and reports queue and
//! quota statistics. The chirp-send daemon picks up new posts within a
//! minute; this tool never posts anything itself.

use clap::{Parser, Subcommand};
use libchirpcast::content::OpenAiGenerator;
use libchirpcast::delivery::TwitterClient;
use libchirpcast::scheduler::{create_post, DeliveryOutcome};
use libchirpcast::types::QueueStats;
use libchirpcast::{
    ChirpcastError, Config, Database, PostRequest, PostStatus, QuotaTracker, Result, ScheduleKind,
    ScheduledPost, Scheduler,
};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "chirp-queue")]
#[command(version)]
#[command(about = "Manage scheduled posts")]
#[command(long_about = "\
chirp-queue - Manage scheduled posts

DESCRIPTION:
    chirp-queue manages the Chirpcast post queue. Use it to schedule
    recurring or one-shot posts, list and cancel pending ones, and view
    delivery history and quota statistics. Delivery itself is done by
    the chirp-send daemon, which notices new posts within a minute.

COMMANDS:
    schedule    Add a post to the queue
    list        List posts in the queue
    cancel      Cancel a pending post
    now         Deliver a queued post immediately
    history     Show the delivery history
    stats       Show queue and quota statistics

USAGE EXAMPLES:
    # Generate and post every day at 09:00 UTC
    chirp-queue schedule --prompt \"morning engineering insight\" --every daily --at 09:00

    # Post fixed text every hour
    chirp-queue schedule --text \"We are hiring\" --every hourly

    # Custom cron rule (every 15 minutes)
    chirp-queue schedule --prompt \"status ping\" --cron \"*/15 * * * *\"

    # Queue a one-shot post for the daemon
    chirp-queue schedule --text \"Release day!\" --every once

    # List pending posts as JSON
    chirp-queue list --status scheduled --format json

    # Cancel a post
    chirp-queue cancel <POST_ID>

    # Deliver a queued post right now
    chirp-queue now <POST_ID>

    # Recent deliveries and today's quota usage
    chirp-queue history --limit 20
    chirp-queue stats

CONFIGURATION:
    Configuration file: ~/.config/chirpcast/config.toml
    Database location:  ~/.local/share/chirpcast/chirpcast.db

    Override with environment variables:
        CHIRPCAST_CONFIG - Path to config file

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Database or configuration error
    3 - Invalid input (bad post ID, cron expression, etc.)
    4 - Daily quota exhausted (now)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a post to the queue
    Schedule {
        /// Literal text to post
        #[arg(short, long, conflicts_with = "prompt")]
        text: Option<String>,

        /// Generate the post text from this prompt at fire time
        #[arg(short, long)]
        prompt: Option<String>,

        /// Recurrence: once, every-minute, hourly, daily, weekly, custom
        #[arg(short, long, default_value = "once", value_name = "KIND")]
        every: String,

        /// Time of day for daily/weekly schedules, HH:MM (UTC)
        #[arg(long, value_name = "HH:MM")]
        at: Option<String>,

        /// Custom cron expression (implies --every custom)
        #[arg(long, value_name = "EXPR")]
        cron: Option<String>,

        /// Attach an image to each post
        #[arg(long)]
        image: bool,

        /// Image URL to attach (implies --image)
        #[arg(long, value_name = "URL")]
        image_url: Option<String>,

        /// Render the image from this text (implies --image)
        #[arg(long, value_name = "TEXT")]
        image_prompt: Option<String>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List posts in the queue
    List {
        /// Filter by status: scheduled, sent, failed, cancelled
        #[arg(short, long)]
        status: Option<String>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Cancel a pending post
    Cancel {
        /// Post ID to cancel
        post_id: Option<String>,

        /// Cancel all pending posts
        #[arg(long)]
        all: bool,

        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Deliver a queued post immediately
    Now {
        /// Post ID to deliver
        post_id: String,
    },

    /// Show the delivery history
    History {
        /// Maximum entries to show
        #[arg(short, long, default_value = "20")]
        limit: i64,

        /// Entries to skip (paging)
        #[arg(short, long, default_value = "0")]
        offset: i64,

        /// Only history for this post
        #[arg(long, value_name = "POST_ID")]
        post: Option<String>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show queue and quota statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    libchirpcast::logging::init_from_env(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;

    match cli.command {
        Commands::Schedule {
            text,
            prompt,
            every,
            at,
            cron,
            image,
            image_url,
            image_prompt,
            format,
        } => {
            validate_format(&format)?;
            let kind = if cron.is_some() {
                ScheduleKind::CustomCron
            } else {
                ScheduleKind::from_str(&every)?
            };
            let request = PostRequest {
                literal_text: text,
                custom_prompt: prompt,
                include_image: image || image_url.is_some() || image_prompt.is_some(),
                image_url,
                image_prompt,
                image_file: None,
            };
            let post = create_post(&db, &request, kind, at.as_deref(), cron.as_deref()).await?;
            output_scheduled(&post, &format);
        }
        Commands::List { status, format } => {
            validate_format(&format)?;
            let status = status.as_deref().map(parse_status).transpose()?;
            let posts = db.list_scheduled_posts(status).await?;
            output_list(&posts, &format);
        }
        Commands::Cancel {
            post_id,
            all,
            force,
        } => {
            cmd_cancel(&db, post_id.as_deref(), all, force).await?;
        }
        Commands::Now { post_id } => {
            let scheduler = Scheduler::new(
                db,
                QuotaTracker::new(config.quota.daily_limit),
                Arc::new(TwitterClient::from_config(&config)),
                Arc::new(OpenAiGenerator::from_config(&config)),
                config.scheduler.clone(),
            );
            match scheduler.deliver_post(&post_id).await? {
                DeliveryOutcome::Sent { tweet_id, .. } => {
                    println!("Posted: {}", tweet_id);
                }
                DeliveryOutcome::QuotaDeferred { resume_at } => {
                    eprintln!("Daily quota exhausted; resets at {}", resume_at.to_rfc3339());
                    return Err(ChirpcastError::QuotaExhausted);
                }
            }
        }
        Commands::History {
            limit,
            offset,
            post,
            format,
        } => {
            validate_format(&format)?;
            let attempts = match post {
                Some(post_id) => db.attempts_for_post(&post_id).await?,
                None => db.list_attempts(limit.max(0), offset.max(0)).await?,
            };
            output_history(&attempts, &format);
        }
        Commands::Stats { format } => {
            validate_format(&format)?;
            let now = chrono::Utc::now();
            let quota = QuotaTracker::new(config.quota.daily_limit);
            let stats = db.stats(now).await?;
            let remaining = quota.remaining(&db, now).await?;
            output_stats(&stats, &quota, remaining, now, &format);
        }
    }

    Ok(())
}

async fn cmd_cancel(
    db: &Database,
    post_id: Option<&str>,
    all: bool,
    force: bool,
) -> Result<()> {
    if all {
        let pending = db.list_scheduled_posts(Some(PostStatus::Scheduled)).await?;
        if pending.is_empty() {
            println!("Nothing to cancel");
            return Ok(());
        }
        if !force && !confirm(&format!("Cancel {} pending post(s)?", pending.len()))? {
            println!("Aborted");
            return Ok(());
        }
        let mut cancelled = 0;
        for post in &pending {
            if db.mark_cancelled(&post.id).await? {
                cancelled += 1;
            }
        }
        println!("Cancelled {} post(s)", cancelled);
        return Ok(());
    }

    let post_id = post_id.ok_or_else(|| {
        ChirpcastError::InvalidInput("Provide a post ID or --all".to_string())
    })?;
    if db.mark_cancelled(post_id).await? {
        println!("Cancelled: {}", post_id);
    } else {
        return Err(ChirpcastError::InvalidInput(format!(
            "Post not found or already completed: {}",
            post_id
        )));
    }
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    use std::io::{BufRead, Write};

    print!("{} [y/N] ", question);
    std::io::stdout().flush().ok();
    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .map_err(|e| ChirpcastError::InvalidInput(format!("Failed to read stdin: {}", e)))?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn validate_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(ChirpcastError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

fn parse_status(s: &str) -> Result<PostStatus> {
    match s {
        "scheduled" => Ok(PostStatus::Scheduled),
        "sent" => Ok(PostStatus::Sent),
        "failed" => Ok(PostStatus::Failed),
        "cancelled" => Ok(PostStatus::Cancelled),
        other => Err(ChirpcastError::InvalidInput(format!(
            "Unknown status '{}'. Valid: scheduled, sent, failed, cancelled",
            other
        ))),
    }
}

fn output_scheduled(post: &ScheduledPost, format: &str) {
    if format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(post).unwrap_or_default()
        );
    } else {
        match &post.schedule_expression {
            Some(expr) => println!("Scheduled: {} ({})", post.id, expr),
            None => println!("Queued: {} (one-shot)", post.id),
        }
    }
}

fn output_list(posts: &[ScheduledPost], format: &str) {
    if format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(posts).unwrap_or_default()
        );
        return;
    }

    for post in posts {
        let what = post
            .literal_text
            .as_deref()
            .or(post.custom_prompt.as_deref())
            .unwrap_or("(generated)");
        let when = post.schedule_expression.as_deref().unwrap_or("once");
        println!(
            "{} | {} | {} | {}",
            post.id,
            post.status,
            when,
            preview(what, 50)
        );
    }
}

fn output_history(attempts: &[libchirpcast::DeliveryAttempt], format: &str) {
    if format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(attempts).unwrap_or_default()
        );
        return;
    }

    for attempt in attempts {
        let when = chrono::DateTime::from_timestamp(attempt.created_at, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| attempt.created_at.to_string());
        if attempt.success {
            println!(
                "{} | sent | {} | {}",
                when,
                attempt.tweet_id.as_deref().unwrap_or("-"),
                preview(&attempt.text, 50)
            );
        } else {
            println!(
                "{} | failed | {} | {}",
                when,
                attempt.error_message.as_deref().unwrap_or("unknown error"),
                preview(&attempt.text, 50)
            );
        }
    }
}

fn output_stats(
    stats: &QueueStats,
    quota: &QuotaTracker,
    remaining: u32,
    now: chrono::DateTime<chrono::Utc>,
    format: &str,
) {
    let reset_at = quota.reset_at(now);
    if format == "json" {
        let json = serde_json::json!({
            "sent_today": stats.sent_today,
            "total_sent": stats.total_sent,
            "pending_scheduled": stats.pending_scheduled,
            "daily_limit": quota.daily_limit(),
            "quota_remaining": remaining,
            "quota_resets_at": reset_at.to_rfc3339(),
        });
        println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
    } else {
        println!("Sent today:     {} / {}", stats.sent_today, quota.daily_limit());
        println!("Quota resets:   {}", reset_at.format("%Y-%m-%d %H:%M UTC"));
        println!("Total sent:     {}", stats.total_sent);
        println!("Pending posts:  {}", stats.pending_scheduled);
    }
}

/// Truncate content for one-line listings
fn preview(content: &str, max_len: usize) -> String {
    let flattened = content.replace('\n', " ");
    if flattened.chars().count() <= max_len {
        flattened
    } else {
        let cut: String = flattened.chars().take(max_len).collect();
        format!("{}...", cut)
    }
}
