//! Error types for inbox-sift.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an oracle failure, used by the retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleErrorKind {
    Timeout,
    RateLimited,
    Transient,
    Fatal,
}

/// Classification oracle errors.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Oracle {backend} did not answer within {timeout:?}")]
    Timeout { backend: String, timeout: Duration },

    #[error("Oracle {backend} rate limited: {reason}")]
    RateLimited { backend: String, reason: String },

    #[error("Oracle {backend} request failed: {reason}")]
    Transient { backend: String, reason: String },

    #[error("Oracle {backend} failed permanently: {reason}")]
    Fatal { backend: String, reason: String },
}

impl OracleError {
    pub fn kind(&self) -> OracleErrorKind {
        match self {
            Self::Timeout { .. } => OracleErrorKind::Timeout,
            Self::RateLimited { .. } => OracleErrorKind::RateLimited,
            Self::Transient { .. } => OracleErrorKind::Transient,
            Self::Fatal { .. } => OracleErrorKind::Fatal,
        }
    }
}

/// Malformed oracle output. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Reply is not a valid JSON object: {reason}")]
    InvalidJson { reason: String, raw: String },

    #[error("Category {category:?} is not one of the allowed labels")]
    UnknownCategory { category: String, raw: String },
}

impl ParseError {
    /// The normalized reply text that failed to parse.
    pub fn raw(&self) -> &str {
        match self {
            Self::InvalidJson { raw, .. } | Self::UnknownCategory { raw, .. } => raw,
        }
    }
}

/// Mailbox transport and mutation errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("Authentication failed for {user}")]
    AuthFailed { user: String },

    #[error("Failed to select mailbox {mailbox}: {reason}")]
    Select { mailbox: String, reason: String },

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Fetch of uid {uid} failed: {reason}")]
    Fetch { uid: u32, reason: String },

    #[error("Flag update on uid {uid} failed: {reason}")]
    Flag { uid: u32, reason: String },

    #[error("Move of uid {uid} to {folder} failed: {reason}")]
    Move {
        uid: u32,
        folder: String,
        reason: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Checkpoint persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Checkpoint file {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Scan-fatal errors. Per-message failures never surface here.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Mailbox unavailable: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Checkpoint persistence failed: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
