//! Chirpcast - quota-aware scheduled posting for X/Twitter
//!
//! This library provides the core functionality behind the Chirpcast
//! tools: a durable post queue, a shared daily send quota, AI content
//! generation, and a scheduling loop that delivers posts on time.

pub mod config;
pub mod content;
pub mod db;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod media;
pub mod quota;
pub mod schedule;
pub mod scheduler;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{ChirpcastError, Result};
pub use quota::QuotaTracker;
pub use scheduler::{DeliveryOutcome, PostRequest, Scheduler};
pub use types::{DeliveryAttempt, PostStatus, ScheduleKind, ScheduledPost};
