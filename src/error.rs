//! Error types for the Ratekeeper service.

use thiserror::Error;

/// Main error type for rate limiting operations.
#[derive(Error, Debug)]
pub enum RateLimitError {
    /// Malformed entry or policy; fatal at configuration load time.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A check referenced a bucket that is not configured.
    #[error("Unknown rate limit bucket: {0}")]
    UnknownBucket(String),

    /// The backing store could not be reached in time.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A store detected an invariant violation in its own state.
    #[error("Internal store error: {0}")]
    InternalStore(String),

    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RateLimitError {
    /// Whether the configured failure mode applies to this error.
    pub fn is_store_outage(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

/// Result type alias for rate limiting operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;
