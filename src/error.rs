use std::time::Duration;

/// Error taxonomy shared across the service. The monitoring loop catches
/// every variant at the filter boundary; only `Config` aborts startup.
#[derive(Debug, thiserror::Error)]
pub enum SniperError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    /// Benign signal: a user or portal quota was exhausted. Not a failure.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The chat channel rejected the user permanently (bot blocked).
    #[error("user unreachable: {0}")]
    UserUnreachable(i64),

    /// Uniqueness violation on notification insert. Treated as
    /// "already delivered" by callers.
    #[error("data integrity: {0}")]
    DataIntegrity(String),

    /// An invariant was violated upstream (e.g. a filter with no
    /// keywords reached scoring). Logged loudly, filter skipped.
    #[error("contract violation: {0}")]
    Contract(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl SniperError {
    /// Whether the error is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, SniperError::Network(_))
    }
}

/// Outcome of a single chat delivery attempt, translated from the chat
/// vendor's error surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered; carries the vendor message id when available.
    Ok(Option<i64>),
    /// The user disabled the bot channel. Caller should flip
    /// `monitoring_enabled` off.
    UserBlocked,
    /// Malformed chat id. Log and drop.
    BadRecipient,
    /// Network error or vendor 5xx.
    Transient,
    /// Vendor asks to wait before retrying.
    RateLimited(Duration),
}

impl SendOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, SendOutcome::Ok(_))
    }
}
