//! Wiring of the Chromium driver and the LLM client into a runner.

use anyhow::{Context, Result};
use reaper_client::{ChromiumDriver, LlmClient};
use reaper_core::models::{JobId, JobOutcome};
use reaper_core::traits::OutcomeSink;
use reaper_core::{
    EnrichmentClient, JobRunner, ScrapeSession, Scheduler, Settings, TracingSchedulerReporter,
    TracingSink,
};
use reaper_db::Database;
use tokio_util::sync::CancellationToken;

/// Scrape and enrichment clients share `cancel`, so a shutdown aborts both.
fn build_runner(
    driver: ChromiumDriver,
    llm: LlmClient,
    settings: &Settings,
    cancel: CancellationToken,
) -> JobRunner<ChromiumDriver, LlmClient> {
    let scraper = ScrapeSession::new(driver)
        .with_proxies(settings.proxy_rotator(), settings.proxy_enabled)
        .with_cancellation(cancel.clone());
    let enricher = EnrichmentClient::new(llm)
        .with_max_retries(settings.enrichment_max_retries)
        .with_cancellation(cancel);
    JobRunner::new(scraper, enricher)
}

async fn launch_browser() -> Result<ChromiumDriver> {
    ChromiumDriver::launch()
        .await
        .context("Failed to launch headless Chromium")
}

/// Run the scheduler until Ctrl-C, then wait for in-flight jobs.
pub async fn run_scheduler(db: &Database, settings: &Settings, llm: LlmClient) -> Result<()> {
    let cancel = CancellationToken::new();
    let driver = launch_browser().await?;
    let runner = build_runner(driver, llm, settings, cancel.clone());
    let scheduler = Scheduler::new(
        db.job_configs(),
        db.results(),
        runner,
        settings.scheduler_config(),
    )
    .with_cancellation(cancel.clone());

    let signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                signal.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to install Ctrl-C handler"),
        }
    });

    scheduler
        .run(&TracingSchedulerReporter)
        .await
        .context("Scheduler stopped with an error")
}

/// Run one stored job immediately. The outcome is stored unless `save` is
/// false, in which case it is only logged.
pub async fn run_job(
    db: &Database,
    settings: &Settings,
    llm: LlmClient,
    id: JobId,
    save: bool,
) -> Result<JobOutcome> {
    let driver = launch_browser().await?;
    let runner = build_runner(driver, llm, settings, CancellationToken::new());
    let outcome = runner.run_by_id(&db.job_configs(), id).await;

    if save {
        db.results()
            .record(&outcome)
            .await
            .context("Failed to store job outcome")?;
    } else {
        TracingSink.record(&outcome).await?;
    }

    Ok(outcome)
}
