use std::time::Duration;

/// Exponential backoff: `min(2^attempt * base, cap)`.
///
/// Attempt 0 is the immediate first try and never waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl BackoffPolicy {
    /// Browser retries: 2s, 4s, 8s, ... capped at one minute.
    pub const SCRAPE: BackoffPolicy = BackoffPolicy {
        base: Duration::from_secs(1),
        cap: Duration::from_secs(60),
    };

    /// Model retries: 10s, 20s, 40s, ... capped at two minutes.
    pub const ENRICHMENT: BackoffPolicy = BackoffPolicy {
        base: Duration::from_secs(5),
        cap: Duration::from_secs(120),
    };

    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}
