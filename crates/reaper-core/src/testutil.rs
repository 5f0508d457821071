//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::fingerprint::CAPTCHA_SELECTORS;
use crate::models::{JobDefinition, JobId, JobOutcome};
use crate::traits::{
    BrowserDriver, BrowserSession, InferenceBackend, JobSource, OutcomeSink, PageElement,
    SessionConfig,
};

/// Pops the front of a script, but keeps replaying the last entry.
fn next_scripted<T: Clone>(queue: &Mutex<Vec<T>>) -> Option<T> {
    let mut queue = queue.lock().unwrap();
    match queue.len() {
        0 => None,
        1 => Some(queue[0].clone()),
        _ => Some(queue.remove(0)),
    }
}

// ---------------------------------------------------------------------------
// MockDriver
// ---------------------------------------------------------------------------

/// What a mock page does when driven.
#[derive(Debug, Clone)]
pub struct MockPage {
    pub status: Option<u16>,
    pub navigate_error: Option<String>,
    /// Navigation never completes.
    pub hang: bool,
    /// Navigation panics.
    pub panic: bool,
    pub captcha: bool,
    /// Matched elements fail when read.
    pub broken_elements: bool,
    pub elements: Vec<MockElement>,
    pub html: String,
}

impl MockPage {
    pub fn ok(elements: Vec<MockElement>) -> Self {
        Self {
            status: Some(200),
            navigate_error: None,
            hang: false,
            panic: false,
            captcha: false,
            broken_elements: false,
            elements,
            html: "<html><body>mock</body></html>".to_string(),
        }
    }

    pub fn status(code: u16) -> Self {
        Self {
            status: Some(code),
            ..Self::ok(vec![])
        }
    }

    pub fn no_response() -> Self {
        Self {
            status: None,
            ..Self::ok(vec![])
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            navigate_error: Some(message.to_string()),
            ..Self::ok(vec![])
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::ok(vec![])
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Self::ok(vec![])
        }
    }

    pub fn captcha() -> Self {
        Self {
            captcha: true,
            ..Self::ok(vec![MockElement::new("ignored", "div")])
        }
    }

    pub fn with_broken_elements(mut self) -> Self {
        self.broken_elements = true;
        self
    }
}

/// Mock driver that serves scripted pages, one per opened session.
/// The last page repeats once the script runs out.
#[derive(Clone)]
pub struct MockDriver {
    pages: Arc<Mutex<Vec<MockPage>>>,
    pub opened: Arc<Mutex<Vec<SessionConfig>>>,
    pub closed: Arc<Mutex<u32>>,
}

impl MockDriver {
    pub fn new(pages: Vec<MockPage>) -> Self {
        Self {
            pages: Arc::new(Mutex::new(pages)),
            opened: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(Mutex::new(0)),
        }
    }

    pub fn always(page: MockPage) -> Self {
        Self::new(vec![page])
    }

    pub fn sessions_opened(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn sessions_closed(&self) -> u32 {
        *self.closed.lock().unwrap()
    }
}

impl BrowserDriver for MockDriver {
    type Session = MockSession;

    async fn open_session(&self, config: &SessionConfig) -> Result<MockSession, AppError> {
        self.opened.lock().unwrap().push(config.clone());
        let page = next_scripted(&self.pages).unwrap_or_else(|| MockPage::ok(vec![]));
        Ok(MockSession {
            page,
            closed: Arc::clone(&self.closed),
        })
    }
}

pub struct MockSession {
    page: MockPage,
    closed: Arc<Mutex<u32>>,
}

impl BrowserSession for MockSession {
    type Element = MockElement;

    async fn navigate(&self, _url: &str, _timeout: std::time::Duration) -> Result<Option<u16>, AppError> {
        if self.page.hang {
            std::future::pending::<()>().await;
        }
        if self.page.panic {
            panic!("mock navigation panicked");
        }
        if let Some(message) = &self.page.navigate_error {
            return Err(AppError::Browser(message.clone()));
        }
        Ok(self.page.status)
    }

    async fn wait_for_idle(&self, _timeout: std::time::Duration) -> Result<(), AppError> {
        Ok(())
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<MockElement>, AppError> {
        if CAPTCHA_SELECTORS.contains(&selector) {
            return Ok(if self.page.captcha {
                vec![MockElement::new("", "div")]
            } else {
                vec![]
            });
        }
        let mut elements = self.page.elements.clone();
        if self.page.broken_elements {
            for element in &mut elements {
                element.broken = true;
            }
        }
        Ok(elements)
    }

    async fn content(&self) -> Result<String, AppError> {
        Ok(self.page.html.clone())
    }

    async fn close(self) -> Result<(), AppError> {
        *self.closed.lock().unwrap() += 1;
        Ok(())
    }
}

/// Element as the driver reports it: untrimmed text, driver-cased tag.
#[derive(Debug, Clone)]
pub struct MockElement {
    pub text: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub html: String,
    pub tag: String,
    pub broken: bool,
}

impl MockElement {
    pub fn new(text: &str, tag: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            attributes: BTreeMap::new(),
            html: text.to_string(),
            tag: tag.to_string(),
            broken: false,
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }
}

impl PageElement for MockElement {
    async fn text(&self) -> Result<Option<String>, AppError> {
        if self.broken {
            return Err(AppError::Browser("element detached".into()));
        }
        Ok(self.text.clone())
    }

    async fn attributes(&self) -> Result<BTreeMap<String, String>, AppError> {
        Ok(self.attributes.clone())
    }

    async fn inner_markup(&self) -> Result<String, AppError> {
        Ok(self.html.clone())
    }

    async fn tag_name(&self) -> Result<String, AppError> {
        Ok(self.tag.clone())
    }
}

// ---------------------------------------------------------------------------
// MockInference
// ---------------------------------------------------------------------------

/// Scripted model reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(String),
    RateLimited,
    Hang,
}

/// Mock backend that replays scripted replies; the last one repeats.
#[derive(Clone)]
pub struct MockInference {
    replies: Arc<Mutex<Vec<MockReply>>>,
    /// (model, prompt) of every call.
    pub calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockInference {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn text(reply: &str) -> Self {
        Self::new(vec![MockReply::Text(reply.to_string())])
    }

    pub fn failing(message: &str) -> Self {
        Self::new(vec![MockReply::Fail(message.to_string())])
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl InferenceBackend for MockInference {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        _temperature: f32,
        _max_output_tokens: u32,
    ) -> Result<String, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((model.to_string(), prompt.to_string()));
        match next_scripted(&self.replies).unwrap_or(MockReply::Text("{}".into())) {
            MockReply::Text(text) => Ok(text),
            MockReply::Fail(message) => Err(AppError::Inference(message)),
            MockReply::RateLimited => Err(AppError::RateLimitExceeded),
            MockReply::Hang => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// MockJobSource
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MockJobSource {
    pub jobs: Arc<Mutex<Vec<JobDefinition>>>,
    pub last_runs: Arc<Mutex<HashMap<JobId, DateTime<Utc>>>>,
    list_error: Arc<Mutex<Option<AppError>>>,
}

impl MockJobSource {
    pub fn new(jobs: Vec<JobDefinition>) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(jobs)),
            ..Self::default()
        }
    }

    pub fn with_last_run(self, id: JobId, at: DateTime<Utc>) -> Self {
        self.last_runs.lock().unwrap().insert(id, at);
        self
    }

    /// The next `list_active` call fails with `error`.
    pub fn fail_next_list(&self, error: AppError) {
        *self.list_error.lock().unwrap() = Some(error);
    }
}

impl JobSource for MockJobSource {
    async fn list_active(&self) -> Result<Vec<JobDefinition>, AppError> {
        if let Some(err) = self.list_error.lock().unwrap().take() {
            return Err(err);
        }
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.active)
            .cloned()
            .collect())
    }

    async fn get(&self, id: JobId) -> Result<Option<JobDefinition>, AppError> {
        Ok(self.jobs.lock().unwrap().iter().find(|j| j.id == id).cloned())
    }

    async fn last_run(&self, id: JobId) -> Result<Option<DateTime<Utc>>, AppError> {
        Ok(self.last_runs.lock().unwrap().get(&id).copied())
    }
}

// ---------------------------------------------------------------------------
// MockSink
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MockSink {
    pub outcomes: Arc<Mutex<Vec<JobOutcome>>>,
}

impl MockSink {
    pub fn recorded(&self) -> Vec<JobOutcome> {
        self.outcomes.lock().unwrap().clone()
    }
}

impl OutcomeSink for MockSink {
    async fn record(&self, outcome: &JobOutcome) -> Result<(), AppError> {
        self.outcomes.lock().unwrap().push(outcome.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Active every-minute job with no settle delay.
pub fn make_test_job(id: JobId) -> JobDefinition {
    JobDefinition::new(
        id,
        format!("job-{id}"),
        "https://example.com/news",
        "h2.title",
        "* * * * *",
        "Summarise the headlines",
    )
    .with_wait_time(0)
}

pub fn headlines() -> Vec<MockElement> {
    vec![
        MockElement::new("  First headline \n", "H2").with_attribute("class", "title"),
        MockElement::new("Second headline", "H2"),
        MockElement::new("Third headline", "H2"),
    ]
}
