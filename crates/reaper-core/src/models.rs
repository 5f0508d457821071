use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a job definition in the configuration store.
pub type JobId = i64;

/// Snapshot of a job's configuration, read once per tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: JobId,
    pub name: String,
    /// Page to open.
    pub url: String,
    /// CSS selector run against the rendered page.
    pub selector: String,
    /// Five-field cron expression.
    pub schedule: String,
    /// Instruction text handed to the model together with the extracted data.
    pub prompt: String,
    pub model: String,
    pub proxy_enabled: bool,
    /// Extra seconds to wait after the page settles.
    pub wait_time: u64,
    pub max_retries: u32,
    /// Per-call browser timeout in seconds.
    pub timeout: u64,
    pub active: bool,
}

impl JobDefinition {
    /// Create a definition with the store's column defaults.
    pub fn new(
        id: JobId,
        name: impl Into<String>,
        url: impl Into<String>,
        selector: impl Into<String>,
        schedule: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            url: url.into(),
            selector: selector.into(),
            schedule: schedule.into(),
            prompt: prompt.into(),
            model: crate::enrich::DEFAULT_MODEL.to_string(),
            proxy_enabled: false,
            wait_time: 5,
            max_retries: 3,
            timeout: 30,
            active: true,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_wait_time(mut self, secs: u64) -> Self {
        self.wait_time = secs;
        self
    }

    pub fn with_proxy(mut self, enabled: bool) -> Self {
        self.proxy_enabled = enabled;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Final status of an extraction, and therefore of the whole job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Success,
    Failed,
    Timeout,
    Blocked,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStatus::Success => "success",
            ExtractionStatus::Failed => "failed",
            ExtractionStatus::Timeout => "timeout",
            ExtractionStatus::Blocked => "blocked",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionStatus::Success)
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExtractionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(ExtractionStatus::Success),
            "failed" => Ok(ExtractionStatus::Failed),
            "timeout" => Ok(ExtractionStatus::Timeout),
            "blocked" => Ok(ExtractionStatus::Blocked),
            _ => Err(format!("Unknown extraction status: {}", s)),
        }
    }
}

/// How one retry iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RetryableFailure,
    TerminalFailure,
}

/// One iteration of a retry loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    /// 0 for the first try.
    pub attempt: u32,
    /// Backoff slept before this attempt.
    pub waited: Duration,
    pub outcome: AttemptOutcome,
    pub elapsed: Duration,
}

/// One element matched by the job's selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedElement {
    /// Trimmed text content.
    pub text: String,
    pub attributes: BTreeMap<String, String>,
    /// Inner markup of the element.
    pub html: String,
    /// Lowercase tag name.
    pub tag_name: String,
}

/// Result of a page extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub status: ExtractionStatus,
    /// Full page content at extraction time.
    pub raw_html: Option<String>,
    pub elements: Vec<ExtractedElement>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Filled by the retry loop; empty for a single attempt.
    #[serde(default)]
    pub attempts: Vec<ExecutionAttempt>,
}

impl ExtractionResult {
    pub fn success(
        raw_html: String,
        elements: Vec<ExtractedElement>,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            status: ExtractionStatus::Success,
            raw_html: Some(raw_html),
            elements,
            error: None,
            started_at,
            duration,
            attempts: Vec::new(),
        }
    }

    pub fn failure(
        status: ExtractionStatus,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            status,
            raw_html: None,
            elements: Vec::new(),
            error: Some(error.into()),
            started_at,
            duration,
            attempts: Vec::new(),
        }
    }

    /// True when the run should move on to enrichment.
    pub fn has_data(&self) -> bool {
        self.status.is_success() && !self.elements.is_empty()
    }
}

/// Result of an enrichment call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResult {
    /// Parsed model output, or the raw-text envelope.
    pub data: Option<serde_json::Value>,
    pub model_used: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Estimated cost in USD.
    pub cost: f64,
    pub duration: Duration,
    pub error: Option<String>,
    #[serde(default)]
    pub attempts: Vec<ExecutionAttempt>,
}

impl EnrichmentResult {
    pub fn failed(model: &str, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            data: None,
            model_used: model.to_string(),
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            duration,
            error: Some(error.into()),
            attempts: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Record emitted once per job run; never mutated after hand-off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub status: ExtractionStatus,
    pub extraction: ExtractionResult,
    pub enrichment: Option<EnrichmentResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration: Duration,
}

impl JobOutcome {
    /// A failed outcome for a run that never got going.
    pub fn failed(job_id: JobId, error: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            status: ExtractionStatus::Failed,
            extraction: ExtractionResult::failure(
                ExtractionStatus::Failed,
                error,
                now,
                Duration::ZERO,
            ),
            enrichment: None,
            started_at: now,
            completed_at: now,
            duration: Duration::ZERO,
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.extraction.error.as_deref()
    }

    /// Enrichment cost, zero when enrichment did not run.
    pub fn cost(&self) -> f64 {
        self.enrichment.as_ref().map_or(0.0, |e| e.cost)
    }
}
