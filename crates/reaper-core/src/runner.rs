use std::panic::AssertUnwindSafe;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use tracing::Instrument;

use crate::enrich::EnrichmentClient;
use crate::error::AppError;
use crate::models::{JobDefinition, JobId, JobOutcome};
use crate::scrape::ScrapeSession;
use crate::traits::{BrowserDriver, InferenceBackend, JobSource};
use crate::util::panic_message;

/// Runs one job end to end: scrape with retries, then enrich when the scrape
/// produced elements.
///
/// Always yields a [`JobOutcome`]. Extraction decides the job's status; a
/// failed enrichment is recorded on the outcome without downgrading it.
pub struct JobRunner<D: BrowserDriver, I: InferenceBackend> {
    scraper: ScrapeSession<D>,
    enricher: EnrichmentClient<I>,
}

impl<D: BrowserDriver, I: InferenceBackend> JobRunner<D, I> {
    pub fn new(scraper: ScrapeSession<D>, enricher: EnrichmentClient<I>) -> Self {
        Self { scraper, enricher }
    }

    pub async fn run(&self, job: &JobDefinition) -> JobOutcome {
        let span = tracing::info_span!("job", job_id = job.id, name = %job.name);
        match AssertUnwindSafe(self.run_inner(job))
            .catch_unwind()
            .instrument(span)
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(job_id = job.id, panic = %message, "Job run panicked");
                JobOutcome::failed(job.id, format!("Unexpected failure: {message}"))
            }
        }
    }

    /// Look the job up in `source` and run it. A missing job or a failing
    /// lookup yields a failed outcome.
    pub async fn run_by_id<S: JobSource>(&self, source: &S, id: JobId) -> JobOutcome {
        match source.get(id).await {
            Ok(Some(job)) => self.run(&job).await,
            Ok(None) => {
                let err = AppError::ConfigError(format!("Scrape config {id} not found"));
                tracing::error!(job_id = id, error = %err, "Job lookup failed");
                JobOutcome::failed(id, err.to_string())
            }
            Err(err) => {
                tracing::error!(job_id = id, error = %err, "Job lookup failed");
                JobOutcome::failed(id, err.to_string())
            }
        }
    }

    async fn run_inner(&self, job: &JobDefinition) -> JobOutcome {
        if !job.active {
            let err = AppError::ConfigError(format!("Scrape config {} is not active", job.id));
            tracing::warn!(error = %err, "Skipping inactive job");
            return JobOutcome::failed(job.id, err.to_string());
        }

        let started_at = Utc::now();
        let clock = Instant::now();

        let extraction = self.scraper.execute_with_retries(job).await;

        let enrichment = if extraction.has_data() {
            let result = self
                .enricher
                .execute_with_retries(&extraction.elements, &job.prompt, &job.model)
                .await;
            if let Some(error) = &result.error {
                tracing::warn!(%error, "Enrichment failed, keeping extraction result");
            }
            Some(result)
        } else {
            tracing::info!(
                status = %extraction.status,
                elements = extraction.elements.len(),
                "No data to enrich"
            );
            None
        };

        let outcome = JobOutcome {
            job_id: job.id,
            status: extraction.status,
            extraction,
            enrichment,
            started_at,
            completed_at: Utc::now(),
            duration: clock.elapsed(),
        };

        tracing::info!(
            status = %outcome.status,
            cost = outcome.cost(),
            duration_secs = outcome.duration.as_secs_f64(),
            "Job finished"
        );
        outcome
    }
}
