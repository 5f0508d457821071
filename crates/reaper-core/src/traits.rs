use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{JobDefinition, JobId, JobOutcome};

/// Browser window size reported to the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Per-session browser settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub user_agent: String,
    pub viewport: Viewport,
    pub locale: String,
    pub timezone: String,
    /// Egress proxy server, e.g. `http://10.0.0.1:3128`.
    pub proxy: Option<String>,
    /// Apply the driver's anti-fingerprinting initialisation.
    pub stealth: bool,
}

/// Opens isolated browser sessions.
pub trait BrowserDriver: Send + Sync + Clone {
    type Session: BrowserSession;

    fn open_session(
        &self,
        config: &SessionConfig,
    ) -> impl Future<Output = Result<Self::Session, AppError>> + Send;
}

/// One isolated browser context with a single page.
pub trait BrowserSession: Send + Sync {
    type Element: PageElement;

    /// Navigate and return the main document's HTTP status, or `None` when
    /// the navigation produced no response.
    fn navigate(
        &self,
        url: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<u16>, AppError>> + Send;

    /// Wait until the page has stopped loading resources.
    fn wait_for_idle(&self, timeout: Duration) -> impl Future<Output = Result<(), AppError>> + Send;

    fn query_all(
        &self,
        selector: &str,
    ) -> impl Future<Output = Result<Vec<Self::Element>, AppError>> + Send;

    /// Serialized DOM of the current page.
    fn content(&self) -> impl Future<Output = Result<String, AppError>> + Send;

    /// Release the page and its browser context.
    fn close(self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A DOM element returned by [`BrowserSession::query_all`].
pub trait PageElement: Send + Sync {
    fn text(&self) -> impl Future<Output = Result<Option<String>, AppError>> + Send;

    fn attributes(&self) -> impl Future<Output = Result<BTreeMap<String, String>, AppError>> + Send;

    fn inner_markup(&self) -> impl Future<Output = Result<String, AppError>> + Send;

    fn tag_name(&self) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Text generation by a hosted model.
pub trait InferenceBackend: Send + Sync + Clone {
    fn generate(
        &self,
        model: &str,
        prompt: &str,
        temperature: f32,
        max_output_tokens: u32,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Read-only view of the job configuration store.
pub trait JobSource: Send + Sync + Clone {
    /// All definitions with `active = true`.
    fn list_active(&self) -> impl Future<Output = Result<Vec<JobDefinition>, AppError>> + Send;

    fn get(&self, id: JobId) -> impl Future<Output = Result<Option<JobDefinition>, AppError>> + Send;

    /// Start time of the job's most recent recorded run.
    fn last_run(
        &self,
        id: JobId,
    ) -> impl Future<Output = Result<Option<DateTime<Utc>>, AppError>> + Send;
}

/// Receives one outcome per completed run.
pub trait OutcomeSink: Send + Sync + Clone {
    fn record(&self, outcome: &JobOutcome) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// An OutcomeSink that only logs, for use when persistence is not needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OutcomeSink for TracingSink {
    async fn record(&self, outcome: &JobOutcome) -> Result<(), AppError> {
        tracing::info!(
            job_id = outcome.job_id,
            status = %outcome.status,
            elements = outcome.extraction.elements.len(),
            cost = outcome.cost(),
            duration_secs = outcome.duration.as_secs_f64(),
            error = ?outcome.error(),
            "Job outcome"
        );
        Ok(())
    }
}
