use thiserror::Error;

/// Application-wide error types for Reaper.
///
/// The display strings double as the input of the error classifiers, so
/// status codes and signal words ("CAPTCHA", "rate limit") must stay in them.
/// Target URLs stay out of the display; callers log them as fields.
#[derive(Error, Debug)]
pub enum AppError {
    /// Navigation completed with an HTTP error status.
    #[error("HTTP {status}")]
    HttpStatus { status: u16, url: String },

    /// Navigation produced no response at all.
    #[error("HTTP No response")]
    NoResponse(String),

    /// A CAPTCHA challenge was found on the page.
    #[error("CAPTCHA detected and not solved")]
    CaptchaDetected,

    /// Browser driver failure (session, navigation, DOM access).
    #[error("Browser error: {0}")]
    Browser(String),

    /// A remote call exceeded its time budget.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// AI inference call failed.
    #[error("Inference error: {0}")]
    Inference(String),

    /// AI inference returned no text.
    #[error("Empty response from model")]
    EmptyResponse,

    /// Rate limit or quota exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The host is shutting down.
    #[error("Cancelled by shutdown")]
    Cancelled,

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error came from an elapsed time budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AppError::Timeout(_))
    }

    /// Returns true if the target answered with a blocking status (403/429).
    pub fn is_block(&self) -> bool {
        matches!(self, AppError::HttpStatus { status: 403 | 429, .. })
    }
}
