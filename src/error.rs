//! Infra-level errors — the boundary where the FSM's world of plain
//! [`crate::core_types::VendorCode`] values meets Rust's `Result`.
//!
//! Vendor result codes are never converted into these types; `BotError`
//! exists only for config loading, process bootstrap, and the inside of
//! challenge-resolver providers (§7 of SPEC_FULL.md).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("attendee list must not be empty")]
    EmptyAttendees,

    #[error("phone must be empty or exactly 11 digits, got {0:?}")]
    InvalidPhone(String),

    #[error("count ({count}) must equal the number of attendees ({attendees})")]
    CountMismatch { count: u32, attendees: usize },
}

#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("solver returned an empty validate string")]
    EmptySolution,

    #[error("solver request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("manual resolver webdriver session failed: {0}")]
    WebDriver(String),

    #[error("manual resolver timed out waiting for #validate")]
    Timeout,

    #[error("unsupported challenge type: {0}")]
    UnsupportedType(String),

    #[error("phone challenge requires a configured phone number")]
    MissingPhone,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook delivery failed: {0}")]
    Webhook(#[from] reqwest::Error),

    #[error("smtp delivery failed: {0}")]
    Smtp(String),
}

#[derive(Debug, Error)]
pub enum BotError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client build failed: {0}")]
    ClientBuild(#[from] reqwest::Error),
}
