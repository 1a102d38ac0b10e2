//! Logging setup shared by the Chirpcast binaries
//!
//! Text output for interactive use, JSON for anything that scrapes the
//! daemon's stderr. `CHIRPCAST_LOG_FORMAT` and `CHIRPCAST_LOG_LEVEL`
//! select the defaults; `RUST_LOG` still wins for filtering.

use std::str::FromStr;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Plain text to stderr, safe to pipe
    #[default]
    Text,
    /// One JSON object per line
    Json,
    /// Colored, multi-line (development)
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                other
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        };
        write!(f, "{}", name)
    }
}

/// Install the global subscriber. Call once, at startup.
///
/// `verbose` forces debug level unless `RUST_LOG` is set.
pub fn init(format: LogFormat, level: &str, verbose: bool) {
    let fallback = if verbose { "debug" } else { level };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .flatten_event(true)
                .with_target(true)
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
    }
}

/// Initialize from `CHIRPCAST_LOG_FORMAT` / `CHIRPCAST_LOG_LEVEL`,
/// falling back to text at info level.
pub fn init_from_env(verbose: bool) {
    let format = std::env::var("CHIRPCAST_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();
    let level = std::env::var("CHIRPCAST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    init(format, &level, verbose);
}
