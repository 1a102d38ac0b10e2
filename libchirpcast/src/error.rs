//! Error types for Chirpcast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChirpcastError>;

#[derive(Error, Debug)]
pub enum ChirpcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Content generation error: {0}")]
    Content(#[from] ContentError),

    #[error("Daily posting quota exhausted")]
    QuotaExhausted,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ChirpcastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ChirpcastError::InvalidInput(_) => 3,
            ChirpcastError::QuotaExhausted => 4,
            ChirpcastError::Delivery(DeliveryError::Unconfigured(_))
            | ChirpcastError::Delivery(DeliveryError::Unauthorized(_))
            | ChirpcastError::Content(ContentError::MissingConfig(_)) => 2,
            _ => 1,
        }
    }

    /// HTTP status for the submission boundary.
    ///
    /// Validation failures map to 400, an exhausted daily quota to 429,
    /// everything else to 500 (the submitter cannot act on the detail).
    pub fn http_status(&self) -> u16 {
        match self {
            ChirpcastError::InvalidInput(_) => 400,
            ChirpcastError::QuotaExhausted => 429,
            _ => 500,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failure categories reported by the delivery client.
///
/// The client reports what the remote service said; retry and quota
/// policy live in the scheduler.
#[derive(Error, Debug, Clone)]
pub enum DeliveryError {
    #[error("Delivery credentials missing or placeholder: {0}")]
    Unconfigured(String),

    #[error("Authentication rejected: {0}")]
    Unauthorized(String),

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Rate limited by platform: {0}")]
    RateLimited(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Platform API error: {0}")]
    Api(String),
}

impl DeliveryError {
    /// Transient failures are retried with backoff before the attempt
    /// is marked failed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeliveryError::Network(_) | DeliveryError::RateLimited(_)
        )
    }

    /// Configuration-class failures (bad or demo credentials, and the
    /// platform throttling that is indistinguishable from them) are
    /// recorded on the post but kept out of the delivery history.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DeliveryError::Unconfigured(_)
                | DeliveryError::Unauthorized(_)
                | DeliveryError::Forbidden(_)
                | DeliveryError::RateLimited(_)
        )
    }
}

#[derive(Error, Debug, Clone)]
pub enum ContentError {
    #[error("Content API not configured: {0}. Set OPENAI_API_KEY or add an api_key to the [content] config section")]
    MissingConfig(String),

    #[error("Content API quota exceeded: {0}. Wait for the provider window to reset or lower the posting frequency")]
    QuotaExceeded(String),

    #[error("Content rejected by safety filter: {0}. Rephrase the prompt; retrying the same prompt will be rejected again")]
    SafetyRejected(String),

    #[error("Content generation failed: {0}")]
    Generation(String),
}

impl ContentError {
    /// Only plain generation failures (network hiccups, 5xx) are worth
    /// retrying; a safety rejection repeats for the same prompt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ContentError::Generation(_) | ContentError::QuotaExceeded(_)
        )
    }
}
