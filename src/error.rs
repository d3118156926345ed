//! Error types for filegate.

use std::time::Duration;

use thiserror::Error;

/// Reason a download token failed to resolve.
///
/// The distinction exists for administrator diagnostics only. End users get
/// a single "link unavailable" category regardless of the reason, so a
/// probing client cannot tell a never-issued token from an expired one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenDenial {
    /// No file carries this token.
    Unknown,
    /// The file exists but is past its expiry timestamp.
    Expired,
    /// The file has been soft-deleted.
    Deleted,
}

/// Common error type for filegate.
#[derive(Error, Debug)]
pub enum FilegateError {
    /// Database error.
    ///
    /// Wraps errors from sqlx; converted automatically.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error (storage volume).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Caller is neither the owner of the resource nor an administrator.
    #[error("not owner of {0}")]
    OwnerMismatch(String),

    /// Subscription quota exhausted (file count or storage bytes).
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Subscription expired and the user is not on an active trial.
    #[error("subscription expired")]
    SubscriptionExpired,

    /// User is blocked by an administrator.
    #[error("user {0} is blocked")]
    UserBlocked(i64),

    /// Required channel membership could not be confirmed.
    #[error("channel membership required")]
    ChannelMembershipRequired,

    /// Too many actions in the sliding window.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Time until the oldest in-window action leaves the window.
        retry_after: Duration,
    },

    /// File exceeds the configured size limit.
    #[error("file too large: {size} bytes (limit {limit})")]
    SizeTooLarge {
        /// Declared or observed size in bytes.
        size: u64,
        /// Configured maximum in bytes.
        limit: u64,
    },

    /// File extension is on the blocklist (or missing from the allowlist).
    #[error("extension not allowed: {0}")]
    ExtensionBlocked(String),

    /// Download token did not resolve.
    #[error("invalid download token")]
    InvalidToken(TokenDenial),

    /// Validation error for user input.
    #[error("validation error: {0}")]
    Validation(String),

    /// URL fetch failed or was rejected.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl FilegateError {
    /// Stable message category for the bot/panel layer.
    ///
    /// Every denial maps to a fixed category so callers never inspect error
    /// internals to decide what to tell the user. The three token denials
    /// deliberately collapse into one category.
    pub fn user_message(&self) -> &'static str {
        match self {
            FilegateError::NotFound(_) => "not-found",
            FilegateError::OwnerMismatch(_) => "not-allowed",
            FilegateError::QuotaExceeded(_) => "quota-exceeded",
            FilegateError::SubscriptionExpired => "subscription-expired",
            FilegateError::UserBlocked(_) => "blocked",
            FilegateError::ChannelMembershipRequired => "channel-required",
            FilegateError::RateLimited { .. } => "rate-limited",
            FilegateError::SizeTooLarge { .. } => "file-too-large",
            FilegateError::ExtensionBlocked(_) => "extension-blocked",
            FilegateError::InvalidToken(_) => "link-unavailable",
            FilegateError::Validation(_) => "invalid-request",
            FilegateError::Fetch(_) => "fetch-failed",
            FilegateError::Database(_) | FilegateError::Io(_) | FilegateError::Config(_) => {
                "internal-error"
            }
        }
    }
}

// Conversion from sqlx errors
impl From<sqlx::Error> for FilegateError {
    fn from(e: sqlx::Error) -> Self {
        FilegateError::Database(e.to_string())
    }
}

/// Result type alias for filegate operations.
pub type Result<T> = std::result::Result<T, FilegateError>;
