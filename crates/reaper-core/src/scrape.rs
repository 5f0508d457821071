use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffPolicy;
use crate::classify::ScrapeErrorClassifier;
use crate::error::AppError;
use crate::fingerprint::{self, CAPTCHA_SELECTORS};
use crate::models::{ExtractedElement, ExtractionResult, ExtractionStatus, JobDefinition};
use crate::proxy::ProxyRotator;
use crate::retry::RetryLoop;
use crate::traits::{BrowserDriver, BrowserSession, PageElement};
use crate::util::{bounded, panic_message};

/// Upper bound on waiting for the page to go network-idle.
pub const NETWORK_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Drives one browser session per attempt: fingerprint → navigate → settle →
/// CAPTCHA probe → extract → snapshot.
///
/// Generic over the browser via [`BrowserDriver`], so tests run without a
/// real browser.
#[derive(Clone)]
pub struct ScrapeSession<D: BrowserDriver> {
    driver: D,
    proxies: ProxyRotator,
    /// Global proxy switch; a job only gets a proxy when this and its own
    /// flag are both set.
    proxy_enabled: bool,
    backoff: BackoffPolicy,
    classifier: ScrapeErrorClassifier,
    cancel: CancellationToken,
}

impl<D: BrowserDriver> ScrapeSession<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            proxies: ProxyRotator::new(),
            proxy_enabled: false,
            backoff: BackoffPolicy::SCRAPE,
            classifier: ScrapeErrorClassifier,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_proxies(mut self, proxies: ProxyRotator, enabled: bool) -> Self {
        self.proxies = proxies;
        self.proxy_enabled = enabled;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Abort in-flight attempts and backoff sleeps when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// One attempt. Never returns an error: failures become a result with a
    /// failed, timeout, or blocked status.
    pub async fn execute(&self, job: &JobDefinition) -> ExtractionResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        tracing::info!(job_id = job.id, url = %job.url, "Starting scrape");

        match self.attempt(job).await {
            Ok((raw_html, elements)) => {
                tracing::info!(
                    job_id = job.id,
                    elements = elements.len(),
                    html_bytes = raw_html.len(),
                    "Scrape completed"
                );
                ExtractionResult::success(raw_html, elements, started_at, clock.elapsed())
            }
            Err(err) => {
                tracing::error!(job_id = job.id, url = %job.url, error = %err, "Scrape failed");
                ExtractionResult::failure(status_for(&err), err.to_string(), started_at, clock.elapsed())
            }
        }
    }

    /// Repeat [`execute`](Self::execute) up to `job.max_retries` more times
    /// with exponential backoff. CAPTCHA, 403, and 429 stop the loop at once.
    pub async fn execute_with_retries(&self, job: &JobDefinition) -> ExtractionResult {
        RetryLoop::new(
            "scrape",
            self.backoff,
            &self.classifier,
            job.max_retries,
            &self.cancel,
        )
        .run(|_| self.execute(job))
        .await
    }

    async fn attempt(
        &self,
        job: &JobDefinition,
    ) -> Result<(String, Vec<ExtractedElement>), AppError> {
        let proxy = if job.proxy_enabled && self.proxy_enabled {
            self.proxies.next()
        } else {
            None
        };
        if let Some(proxy) = &proxy {
            tracing::debug!(job_id = job.id, %proxy, "Using proxy");
        }

        let config = fingerprint::session_config(proxy);
        let session = bounded(job.timeout(), self.driver.open_session(&config)).await?;

        let result = tokio::select! {
            r = AssertUnwindSafe(self.drive(&session, job)).catch_unwind() => {
                r.unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(job_id = job.id, panic = %message, "Browser session panicked");
                    Err(AppError::Browser(format!("Session panicked: {message}")))
                })
            }
            () = self.cancel.cancelled() => Err(AppError::Cancelled),
        };

        // The session is released on every path, including a panic in `drive`.
        if let Err(e) = bounded(job.timeout(), session.close()).await {
            tracing::warn!(job_id = job.id, error = %e, "Failed to close browser session");
        }
        result
    }

    async fn drive(
        &self,
        session: &D::Session,
        job: &JobDefinition,
    ) -> Result<(String, Vec<ExtractedElement>), AppError> {
        let timeout = job.timeout();

        match bounded(timeout, session.navigate(&job.url, timeout)).await? {
            None => return Err(AppError::NoResponse(job.url.clone())),
            Some(status) if status >= 400 => {
                return Err(AppError::HttpStatus {
                    status,
                    url: job.url.clone(),
                });
            }
            Some(_) => {}
        }

        if let Err(e) = bounded(NETWORK_IDLE_TIMEOUT, session.wait_for_idle(NETWORK_IDLE_TIMEOUT)).await {
            tracing::warn!(job_id = job.id, error = %e, "Page did not reach network idle");
        }
        if job.wait_time > 0 {
            tokio::time::sleep(Duration::from_secs(job.wait_time)).await;
        }

        check_captcha(session, timeout).await?;

        let elements = match bounded(timeout, extract_elements(session, &job.selector)).await {
            Ok(elements) => elements,
            Err(e) => {
                tracing::warn!(job_id = job.id, selector = %job.selector, error = %e, "Element extraction failed");
                Vec::new()
            }
        };

        let raw_html = bounded(timeout, session.content()).await?;
        Ok((raw_html, elements))
    }
}

async fn check_captcha<S: BrowserSession>(session: &S, timeout: Duration) -> Result<(), AppError> {
    for selector in CAPTCHA_SELECTORS {
        let found = bounded(timeout, session.query_all(selector)).await?;
        if !found.is_empty() {
            tracing::warn!(selector, "CAPTCHA detected");
            return Err(AppError::CaptchaDetected);
        }
    }
    Ok(())
}

async fn extract_elements<S: BrowserSession>(
    session: &S,
    selector: &str,
) -> Result<Vec<ExtractedElement>, AppError> {
    let handles = session.query_all(selector).await?;
    let mut elements = Vec::with_capacity(handles.len());
    for handle in &handles {
        elements.push(ExtractedElement {
            text: handle.text().await?.unwrap_or_default().trim().to_string(),
            attributes: handle.attributes().await?,
            html: handle.inner_markup().await?,
            tag_name: handle.tag_name().await?.to_lowercase(),
        });
    }
    Ok(elements)
}

fn status_for(err: &AppError) -> ExtractionStatus {
    if err.is_timeout() {
        ExtractionStatus::Timeout
    } else if err.is_block() {
        ExtractionStatus::Blocked
    } else {
        ExtractionStatus::Failed
    }
}
