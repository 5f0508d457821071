use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::cron;
use crate::dispatch::{DEFAULT_DISPATCH_WINDOW_SECS, DispatchGuard};
use crate::error::AppError;
use crate::models::{JobDefinition, JobId, JobOutcome};
use crate::runner::JobRunner;
use crate::traits::{BrowserDriver, InferenceBackend, JobSource, OutcomeSink};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub dispatch_window: TimeDelta,
    pub max_concurrent_jobs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            dispatch_window: TimeDelta::seconds(DEFAULT_DISPATCH_WINDOW_SECS),
            max_concurrent_jobs: 5,
        }
    }
}

/// Events emitted by the scheduler for monitoring/logging.
#[derive(Debug, Clone)]
pub enum SchedulerEvent<'a> {
    Started {
        tick_interval: Duration,
        max_concurrent_jobs: usize,
    },
    Tick {
        at: DateTime<Utc>,
        active_jobs: usize,
    },
    JobSuppressed {
        job_id: JobId,
    },
    JobDispatched {
        job_id: JobId,
        name: &'a str,
    },
    TickFailed {
        error: &'a str,
    },
    ShuttingDown {
        in_flight: usize,
    },
    Stopped,
}

/// Trait for receiving scheduler events (decoupled logging).
pub trait SchedulerReporter: Send + Sync {
    fn report(&self, event: SchedulerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSchedulerReporter;

impl SchedulerReporter for TracingSchedulerReporter {
    fn report(&self, event: SchedulerEvent<'_>) {
        match event {
            SchedulerEvent::Started {
                tick_interval,
                max_concurrent_jobs,
            } => {
                tracing::info!(
                    tick_secs = tick_interval.as_secs(),
                    max_concurrent_jobs,
                    "Scheduler started"
                );
            }
            SchedulerEvent::Tick { at, active_jobs } => {
                tracing::debug!(%at, active_jobs, "Checking scheduled jobs");
            }
            SchedulerEvent::JobSuppressed { job_id } => {
                tracing::debug!(job_id, "Job ran recently, skipping");
            }
            SchedulerEvent::JobDispatched { job_id, name } => {
                tracing::info!(job_id, %name, "Scheduled scrape job");
            }
            SchedulerEvent::TickFailed { error } => {
                tracing::error!(%error, "Scheduled job check failed");
            }
            SchedulerEvent::ShuttingDown { in_flight } => {
                tracing::info!(in_flight, "Scheduler shutting down, waiting for running jobs");
            }
            SchedulerEvent::Stopped => {
                tracing::info!("Scheduler stopped");
            }
        }
    }
}

/// Periodic tick: list active jobs, keep those whose schedule matches and
/// that the dispatch guard lets through, and run each as its own task.
///
/// At most `max_concurrent_jobs` runs execute at once; the rest wait for a
/// permit. Every run hands its outcome to the sink. A run still waiting for
/// its permit when the shutdown token fires is recorded as cancelled and
/// never opens a browser.
pub struct Scheduler<S, O, D, I>
where
    S: JobSource,
    O: OutcomeSink,
    D: BrowserDriver,
    I: InferenceBackend,
{
    source: S,
    sink: O,
    runner: Arc<JobRunner<D, I>>,
    guard: DispatchGuard,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    config: SchedulerConfig,
}

impl<S, O, D, I> Scheduler<S, O, D, I>
where
    S: JobSource,
    O: OutcomeSink + 'static,
    D: BrowserDriver + 'static,
    I: InferenceBackend + 'static,
{
    pub fn new(source: S, sink: O, runner: JobRunner<D, I>, config: SchedulerConfig) -> Self {
        Self {
            source,
            sink,
            runner: Arc::new(runner),
            guard: DispatchGuard::new(config.dispatch_window),
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            config,
        }
    }

    /// Shutdown token. Pass the one the runner's scrape and enrichment
    /// clients were built with, so in-flight attempts abort promptly.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs dispatched but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Evaluate every active job against `now` and dispatch the eligible ones.
    ///
    /// A job whose schedule does not parse is skipped, as is a job whose
    /// last-run lookup fails; neither aborts the tick.
    pub async fn tick<R: SchedulerReporter>(
        &self,
        now: DateTime<Utc>,
        reporter: &R,
    ) -> Result<Vec<JobId>, AppError> {
        let jobs = self.source.list_active().await?;
        reporter.report(SchedulerEvent::Tick {
            at: now,
            active_jobs: jobs.len(),
        });

        let mut dispatched = Vec::new();
        for job in jobs {
            if !cron::matches(&job.schedule, &now) {
                continue;
            }

            let last_run = match self.source.last_run(job.id).await {
                Ok(last_run) => last_run,
                Err(e) => {
                    tracing::error!(job_id = job.id, error = %e, "Failed to look up last run");
                    continue;
                }
            };

            if !self.guard.should_dispatch(job.id, last_run, now) {
                reporter.report(SchedulerEvent::JobSuppressed { job_id: job.id });
                continue;
            }

            reporter.report(SchedulerEvent::JobDispatched {
                job_id: job.id,
                name: &job.name,
            });
            dispatched.push(job.id);
            self.spawn_run(job);
        }

        Ok(dispatched)
    }

    fn spawn_run(&self, job: JobDefinition) {
        let runner = Arc::clone(&self.runner);
        let sink = self.sink.clone();
        let permits = Arc::clone(&self.permits);
        let cancel = self.cancel.clone();

        self.tracker.spawn(async move {
            let outcome = match permits.acquire_owned().await {
                Ok(_permit) if cancel.is_cancelled() => {
                    tracing::info!(job_id = job.id, "Shutdown before the job started");
                    JobOutcome::failed(job.id, AppError::Cancelled.to_string())
                }
                Ok(_permit) => runner.run(&job).await,
                Err(_) => JobOutcome::failed(job.id, "Scheduler closed before the job started"),
            };
            if let Err(e) = sink.record(&outcome).await {
                tracing::error!(job_id = job.id, error = %e, "Failed to record job outcome");
            }
        });
    }

    /// Tick every `tick_interval` until the shutdown token fires, then wait
    /// for the running jobs to hand their outcomes to the sink.
    pub async fn run<R: SchedulerReporter>(&self, reporter: &R) -> Result<(), AppError> {
        reporter.report(SchedulerEvent::Started {
            tick_interval: self.config.tick_interval,
            max_concurrent_jobs: self.config.max_concurrent_jobs,
        });

        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                () = self.cancel.cancelled() => break,
            }

            if let Err(e) = self.tick(Utc::now(), reporter).await {
                let error = e.to_string();
                reporter.report(SchedulerEvent::TickFailed { error: &error });
            }
        }

        reporter.report(SchedulerEvent::ShuttingDown {
            in_flight: self.in_flight(),
        });
        self.drain().await;
        reporter.report(SchedulerEvent::Stopped);

        Ok(())
    }

    /// Wait until every dispatched run has finished.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
