//! chirp-send - Background daemon for scheduled posting
//!
//! Runs the scheduling loop: delivers queued posts at their fire
//! times, enforces the shared daily quota, and picks up posts added by
//! chirp-queue while it is running.

use clap::Parser;
use libchirpcast::content::OpenAiGenerator;
use libchirpcast::delivery::{DeliveryClient, TwitterClient};
use libchirpcast::{Config, Database, QuotaTracker, Result, Scheduler};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "chirp-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled posting")]
#[command(long_about = "\
chirp-send - Background daemon for scheduled posting

DESCRIPTION:
    chirp-send is a long-running daemon that delivers queued posts at
    their scheduled times. It sleeps until the next firing instead of
    polling, generates content at fire time for prompt-based posts,
    retries transient failures with exponential backoff, and defers
    (never fails) posts that hit the daily quota.

    Posts added with chirp-queue while the daemon is running are picked
    up within a minute. On restart, pending posts resume automatically.

USAGE:
    # Run in foreground (logs to stderr)
    chirp-send

    # Enable verbose logging
    chirp-send --verbose

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes in-flight deliveries)

CONFIGURATION:
    Configuration file: ~/.config/chirpcast/config.toml
    Database location:  ~/.local/share/chirpcast/chirpcast.db

    [quota]
    daily_limit = 17    # successful sends per UTC day

    [scheduler]
    max_attempts_scheduled = 3   # attempts per scheduled firing
    retry_base_secs = 5          # backoff base delay

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Deliver pending one-shot posts once and exit (for testing)
    #[arg(long, hide = true)]
    once: bool,
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

    let delivery = TwitterClient::from_config(&config);
    if !delivery.is_configured() {
        warn!("no posting credentials found; deliveries will fail until TWITTER_BEARER_TOKEN is set");
    }

    let scheduler = Scheduler::new(
        db,
        QuotaTracker::new(config.quota.daily_limit),
        Arc::new(delivery),
        Arc::new(OpenAiGenerator::from_config(&config)),
        config.scheduler.clone(),
    );

    if cli.once {
        let sent = scheduler.flush_pending().await?;
        info!(sent, "processed pending posts once, exiting");
        return Ok(());
    }

    info!("chirp-send daemon starting");

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    scheduler.start().await;

    while !shutdown.load(Ordering::Relaxed) {
        sleep(Duration::from_secs(1)).await;
    }

    info!("shutdown requested, draining in-flight deliveries");
    scheduler.shutdown().await;
    info!("chirp-send daemon stopped");

    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|e| {
        libchirpcast::ChirpcastError::InvalidInput(format!("Signal setup failed: {}", e))
    })?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("received shutdown signal");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal");
            shutdown.store(true, Ordering::Relaxed);
        }
    });
    Ok(())
}
