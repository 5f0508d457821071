//! Retry decisions for failed attempts.
//!
//! The two remote operations use opposite defaults: scraping retries unless a
//! block signal shows up, enrichment gives up unless the model was merely
//! rate-limited.

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Transient failure; try again after backoff.
    Retry,
    /// Throttled by the remote side; try again after backoff.
    RateLimited,
    /// Retrying cannot help.
    Terminal,
}

impl Verdict {
    pub fn should_retry(&self) -> bool {
        !matches!(self, Verdict::Terminal)
    }
}

/// Classifies an attempt's error message.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &str) -> Verdict;
}

/// Browser failures: retry by default, stop on CAPTCHA, 403, or 429.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScrapeErrorClassifier;

impl ErrorClassifier for ScrapeErrorClassifier {
    fn classify(&self, error: &str) -> Verdict {
        let error = error.to_lowercase();
        if error.contains("captcha") || has_status(&error, "403") || has_status(&error, "429") {
            Verdict::Terminal
        } else {
            Verdict::Retry
        }
    }
}

/// True when `code` appears as a whole number, not inside a longer one.
fn has_status(error: &str, code: &str) -> bool {
    error
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token == code)
}

/// Model failures: stop by default, retry on rate limit or quota.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnrichmentErrorClassifier;

impl ErrorClassifier for EnrichmentErrorClassifier {
    fn classify(&self, error: &str) -> Verdict {
        let error = error.to_lowercase();
        if error.contains("rate limit") || error.contains("quota") {
            Verdict::RateLimited
        } else {
            Verdict::Terminal
        }
    }
}
