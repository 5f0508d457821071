pub mod backoff;
pub mod classify;
pub mod config;
pub mod cron;
pub mod dispatch;
pub mod enrich;
pub mod error;
pub mod fingerprint;
pub mod models;
pub mod proxy;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod scrape;
pub mod traits;
pub mod util;

#[cfg(test)]
pub(crate) mod testutil;

pub use backoff::BackoffPolicy;
pub use classify::{EnrichmentErrorClassifier, ErrorClassifier, ScrapeErrorClassifier, Verdict};
pub use config::Settings;
pub use dispatch::DispatchGuard;
pub use enrich::EnrichmentClient;
pub use error::AppError;
pub use models::{
    EnrichmentResult, ExtractedElement, ExtractionResult, ExtractionStatus, JobDefinition, JobId,
    JobOutcome,
};
pub use proxy::ProxyRotator;
pub use runner::JobRunner;
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerReporter, TracingSchedulerReporter};
pub use scrape::ScrapeSession;
pub use traits::{
    BrowserDriver, BrowserSession, InferenceBackend, JobSource, OutcomeSink, PageElement,
    SessionConfig, TracingSink,
};
