#[cfg(feature = "browser")]
mod engine;

use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use reaper_client::LlmClient;
use reaper_client::llm::DEFAULT_BASE_URL;
use reaper_core::cron::{self, COMMON_SCHEDULES, Schedule};
use reaper_core::models::{JobDefinition, JobId};
use reaper_core::traits::JobSource;
use reaper_db::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "reaper", version, about = "Scheduled browser scraping with AI enrichment")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct LlmArgs {
    /// API key for the OpenAI-compatible endpoint
    #[arg(long, env = "REAPER_API_KEY", hide_env_values = true)]
    api_key: String,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "REAPER_LLM_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,
}

impl LlmArgs {
    fn client(&self) -> Result<LlmClient> {
        LlmClient::with_base_url(&self.api_key, &self.base_url)
            .context("Failed to create LLM client")
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until Ctrl-C (requires DATABASE_URL)
    Run {
        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Run one job now and print its outcome as JSON
    RunJob {
        /// Job id in scrape_configs
        #[arg(long)]
        id: JobId,

        /// Log the outcome instead of storing it
        #[arg(long, default_value_t = false)]
        no_save: bool,

        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Inspect cron expressions
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },

    /// Manage stored job definitions
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },

    /// Show run statistics
    Stats {
        /// Look-back window in hours
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },

    /// Delete stored results older than the given number of days
    Cleanup {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },

    /// List models offered by the LLM endpoint
    Models {
        #[command(flatten)]
        llm: LlmArgs,
    },
}

#[derive(Subcommand)]
enum CronAction {
    /// Validate an expression
    Check { expr: String },

    /// Print the next times an expression fires
    Next {
        expr: String,

        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },

    /// Print the named common schedules
    List,
}

#[derive(Args)]
struct NewJobArgs {
    #[arg(long)]
    name: String,

    #[arg(long)]
    url: String,

    /// CSS selector of the elements to extract
    #[arg(long)]
    selector: String,

    /// Five-field cron expression
    #[arg(long)]
    schedule: String,

    /// Enrichment instruction
    #[arg(long)]
    prompt: String,

    #[arg(long)]
    model: Option<String>,

    /// Seconds to wait after the page settles
    #[arg(long)]
    wait_time: Option<u64>,

    #[arg(long)]
    max_retries: Option<u32>,

    /// Per-attempt page timeout in seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Route this job through the proxy pool
    #[arg(long, default_value_t = false)]
    proxy: bool,

    /// Store the job without scheduling it
    #[arg(long, default_value_t = false)]
    inactive: bool,
}

impl NewJobArgs {
    fn into_job(self) -> JobDefinition {
        let mut job = JobDefinition::new(
            0,
            self.name,
            self.url,
            self.selector,
            self.schedule,
            self.prompt,
        )
        .with_proxy(self.proxy);
        if let Some(model) = self.model {
            job = job.with_model(model);
        }
        if let Some(secs) = self.wait_time {
            job = job.with_wait_time(secs);
        }
        if let Some(max) = self.max_retries {
            job = job.with_max_retries(max);
        }
        if let Some(secs) = self.timeout {
            job = job.with_timeout(secs);
        }
        if self.inactive {
            job = job.inactive();
        }
        job
    }
}

#[derive(Subcommand)]
enum JobsAction {
    /// List active jobs with their next run
    List,

    /// Add a job definition
    Add(NewJobArgs),

    /// Resume scheduling a job
    Enable { id: JobId },

    /// Stop scheduling a job
    Disable { id: JobId },

    /// Show the latest runs of a job
    History {
        id: JobId,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("reaper=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { llm } => cmd_run(&llm).await?,
        Commands::RunJob { id, no_save, llm } => cmd_run_job(id, !no_save, &llm).await?,
        Commands::Cron { action } => cmd_cron(action)?,
        Commands::Jobs { action } => {
            let db = connect_db().await?;
            cmd_jobs(action, &db).await?;
        }
        Commands::Stats { hours } => {
            let db = connect_db().await?;
            cmd_stats(hours, &db).await?;
        }
        Commands::Cleanup { days } => {
            let db = connect_db().await?;
            let deleted = db
                .results()
                .purge_older_than(days)
                .await
                .context("Cleanup failed")?;
            println!("Deleted {deleted} results older than {days} days");
        }
        Commands::Models { llm } => {
            for model in llm.client()?.list_models().await {
                println!("{model}");
            }
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply pending migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

#[cfg(feature = "browser")]
async fn cmd_run(llm: &LlmArgs) -> Result<()> {
    let settings = reaper_core::Settings::from_env()?;
    let db = connect_db().await?;
    engine::run_scheduler(&db, &settings, llm.client()?).await
}

#[cfg(feature = "browser")]
async fn cmd_run_job(id: JobId, save: bool, llm: &LlmArgs) -> Result<()> {
    let settings = reaper_core::Settings::from_env()?;
    let db = connect_db().await?;
    let outcome = engine::run_job(&db, &settings, llm.client()?, id, save).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

#[cfg(not(feature = "browser"))]
async fn cmd_run(_llm: &LlmArgs) -> Result<()> {
    anyhow::bail!("`reaper run` needs a browser: rebuild with `--features browser`")
}

#[cfg(not(feature = "browser"))]
async fn cmd_run_job(_id: JobId, _save: bool, _llm: &LlmArgs) -> Result<()> {
    anyhow::bail!("`reaper run-job` needs a browser: rebuild with `--features browser`")
}

fn cmd_cron(action: CronAction) -> Result<()> {
    match action {
        CronAction::Check { expr } => {
            let schedule =
                Schedule::parse(&expr).with_context(|| format!("Invalid cron expression '{expr}'"))?;
            println!("'{expr}' is valid");
            if let Some(next) = schedule.next_after(Utc::now()) {
                println!("Next run: {}", next.format("%Y-%m-%d %H:%M UTC"));
            }
        }
        CronAction::Next { expr, count } => {
            let schedule =
                Schedule::parse(&expr).with_context(|| format!("Invalid cron expression '{expr}'"))?;
            let mut from = Utc::now();
            for _ in 0..count {
                let Some(next) = schedule.next_after(from) else {
                    println!("No match within a year");
                    break;
                };
                println!("{}", next.format("%Y-%m-%d %H:%M UTC"));
                from = next;
            }
        }
        CronAction::List => {
            for (name, expr) in COMMON_SCHEDULES {
                println!("{name:<20} {expr}");
            }
        }
    }
    Ok(())
}

async fn cmd_jobs(action: JobsAction, db: &Database) -> Result<()> {
    let repo = db.job_configs();

    match action {
        JobsAction::List => {
            let jobs = repo.list_active().await?;
            if jobs.is_empty() {
                println!("No active jobs");
                return Ok(());
            }
            let now = Utc::now();
            for job in &jobs {
                println!(
                    "  [{}] {} '{}' next: {} ({})",
                    job.id,
                    job.name,
                    job.schedule,
                    cron::next_match(&job.schedule, now).format("%Y-%m-%d %H:%M UTC"),
                    job.url,
                );
            }
            println!("\nTotal: {} active jobs", jobs.len());
        }
        JobsAction::Add(args) => {
            let job = args.into_job();
            let id = repo.create(&job).await?;
            println!("Created job {id}");
        }
        JobsAction::Enable { id } => set_active(db, id, true).await?,
        JobsAction::Disable { id } => set_active(db, id, false).await?,
        JobsAction::History { id, limit } => {
            let history = db.results().recent(id, limit).await?;
            if history.is_empty() {
                println!("No runs recorded for job {id}");
                return Ok(());
            }
            println!("Run history for job {id}:\n");
            for run in &history {
                println!(
                    "  [{}] {} attempts={} duration={:.1}s cost=${:.6}{}",
                    run.status,
                    run.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    run.scrape_attempts,
                    run.duration_seconds.unwrap_or_default(),
                    run.enrichment_cost.unwrap_or_default(),
                    run.error_message
                        .as_deref()
                        .map(|e| format!(" error: {e}"))
                        .unwrap_or_default(),
                );
            }
            println!("\nTotal: {} runs", history.len());
        }
    }
    Ok(())
}

async fn set_active(db: &Database, id: JobId, active: bool) -> Result<()> {
    if !db.job_configs().set_active(id, active).await? {
        anyhow::bail!("Job {id} not found");
    }
    println!("Job {id} {}", if active { "enabled" } else { "disabled" });
    Ok(())
}

async fn cmd_stats(hours: u32, db: &Database) -> Result<()> {
    let since = Utc::now() - TimeDelta::hours(i64::from(hours));
    let summary = db.results().summary(since).await?;

    println!("Runs in the last {hours}h:");
    println!("  total:        {}", summary.total_runs);
    println!("  successful:   {}", summary.successful_runs);
    println!("  success rate: {:.1}%", summary.success_rate);
    println!("  total cost:   ${:.6}", summary.total_cost);
    println!("  avg duration: {:.2}s", summary.avg_duration_secs);
    Ok(())
}
