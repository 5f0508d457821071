use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetLocaleOverrideParams, SetTimezoneOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::element::Element;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use reaper_core::error::AppError;
use reaper_core::traits::{BrowserDriver, BrowserSession, PageElement, SessionConfig};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

fn browser_err(context: &str, e: impl std::fmt::Display) -> AppError {
    AppError::Browser(format!("{context}: {e}"))
}

/// Headless Chromium over the Chrome DevTools Protocol.
///
/// A single Chromium process is shared across all clones of this struct.
/// Every [`BrowserDriver::open_session`] call creates a fresh browser
/// context, so cookies, proxy, and emulation settings never leak between
/// sessions.
#[derive(Clone)]
pub struct ChromiumDriver {
    browser: Arc<Browser>,
}

impl ChromiumDriver {
    /// Launch a headless Chromium.
    ///
    /// Requires a Chromium / Chrome binary reachable via `$PATH`, `CHROME_BIN`,
    /// or one of the well-known install locations.
    pub async fn launch() -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder();
        builder = builder.no_sandbox().disable_default_args();

        if let Some(bin) = Self::find_chrome_binary() {
            tracing::info!(binary = %bin.display(), "Using Chrome binary");
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .build()
            .map_err(|e| browser_err("Browser config error", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| browser_err("Failed to launch browser", e))?;

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!(error = %e, "Browser CDP handler error");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
        })
    }

    /// Snap-packaged Chromium ships a wrapper that rejects headless flags, so
    /// the real binary inside the snap is preferred.
    fn find_chrome_binary() -> Option<PathBuf> {
        let candidates: &[&str] = &[
            "/snap/chromium/current/usr/lib/chromium-browser/chrome",
            "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ];

        if let Ok(p) = std::env::var("CHROME_BIN") {
            let path = PathBuf::from(&p);
            if path.exists() {
                return Some(path);
            }
        }

        candidates.iter().map(PathBuf::from).find(|p| p.exists())
    }

    async fn dispose_context(&self, id: BrowserContextId) {
        if let Err(e) = self
            .browser
            .execute(DisposeBrowserContextParams::new(id))
            .await
        {
            tracing::warn!(error = %e, "Failed to dispose browser context");
        }
    }

    async fn prepare_page(&self, page: &Page, config: &SessionConfig) -> Result<(), AppError> {
        page.set_user_agent(config.user_agent.clone())
            .await
            .map_err(|e| browser_err("Failed to set user agent", e))?;

        page.execute(SetDeviceMetricsOverrideParams::new(
            i64::from(config.viewport.width),
            i64::from(config.viewport.height),
            1.0,
            false,
        ))
        .await
        .map_err(|e| browser_err("Failed to set viewport", e))?;

        page.execute(SetTimezoneOverrideParams::new(config.timezone.clone()))
            .await
            .map_err(|e| browser_err("Failed to set timezone", e))?;

        page.execute(SetLocaleOverrideParams {
            locale: Some(config.locale.clone()),
        })
        .await
        .map_err(|e| browser_err("Failed to set locale", e))?;

        if config.stealth {
            page.enable_stealth_mode()
                .await
                .map_err(|e| browser_err("Failed to enable stealth mode", e))?;
        }
        Ok(())
    }
}

impl BrowserDriver for ChromiumDriver {
    type Session = ChromiumSession;

    async fn open_session(&self, config: &SessionConfig) -> Result<ChromiumSession, AppError> {
        let mut context = CreateBrowserContextParams::default();
        context.proxy_server = config.proxy.clone();

        let context_id = self
            .browser
            .execute(context)
            .await
            .map_err(|e| browser_err("Failed to create browser context", e))?
            .result
            .browser_context_id;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(|e| browser_err("Invalid target parameters", e))?;

        let page = match self.browser.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                self.dispose_context(context_id).await;
                return Err(browser_err("Failed to open page", e));
            }
        };

        if let Err(e) = self.prepare_page(&page, config).await {
            let _ = page.close().await;
            self.dispose_context(context_id).await;
            return Err(e);
        }

        tracing::debug!(user_agent = %config.user_agent, proxy = ?config.proxy, "Browser session opened");
        Ok(ChromiumSession {
            driver: self.clone(),
            page,
            context_id,
        })
    }
}

/// One browser context with a single page.
pub struct ChromiumSession {
    driver: ChromiumDriver,
    page: Page,
    context_id: BrowserContextId,
}

impl BrowserSession for ChromiumSession {
    type Element = ChromiumElement;

    async fn navigate(&self, url: &str, timeout: Duration) -> Result<Option<u16>, AppError> {
        let navigation = async {
            let navigated = self
                .page
                .execute(NavigateParams::new(url))
                .await
                .map_err(|e| browser_err("Navigation failed", e))?;
            if let Some(error_text) = &navigated.result.error_text {
                return Err(AppError::Browser(format!("Navigation failed: {error_text}")));
            }

            let request = self
                .page
                .wait_for_navigation_response()
                .await
                .map_err(|e| browser_err("Navigation failed", e))?;

            Ok(request
                .and_then(|r| r.response.as_ref().map(|resp| resp.status))
                .and_then(|status| u16::try_from(status).ok()))
        };

        tokio::time::timeout(timeout, navigation)
            .await
            .map_err(|_| AppError::Timeout(timeout.as_secs()))?
    }

    async fn wait_for_idle(&self, timeout: Duration) -> Result<(), AppError> {
        let poll = async {
            loop {
                let state: String = self
                    .page
                    .evaluate("document.readyState")
                    .await
                    .map_err(|e| browser_err("Failed to read ready state", e))?
                    .into_value()
                    .map_err(|e| browser_err("Unexpected ready state", e))?;
                if state == "complete" {
                    return Ok(());
                }
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| AppError::Timeout(timeout.as_secs()))?
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<ChromiumElement>, AppError> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(|e| browser_err(&format!("Query '{selector}' failed"), e))?;
        Ok(elements.into_iter().map(ChromiumElement).collect())
    }

    async fn content(&self) -> Result<String, AppError> {
        self.page
            .content()
            .await
            .map_err(|e| browser_err("Failed to read page content", e))
    }

    async fn close(self) -> Result<(), AppError> {
        let closed = self
            .page
            .close()
            .await
            .map_err(|e| browser_err("Failed to close page", e));
        self.driver.dispose_context(self.context_id).await;
        closed
    }
}

pub struct ChromiumElement(Element);

impl ChromiumElement {
    async fn js_string(&self, function: &str) -> Result<Option<String>, AppError> {
        let returns = self
            .0
            .call_js_fn(function, false)
            .await
            .map_err(|e| browser_err("Element script failed", e))?;
        Ok(returns
            .result
            .value
            .and_then(|v| v.as_str().map(String::from)))
    }
}

impl PageElement for ChromiumElement {
    async fn text(&self) -> Result<Option<String>, AppError> {
        self.js_string("function() { return this.textContent; }")
            .await
    }

    async fn attributes(&self) -> Result<BTreeMap<String, String>, AppError> {
        let flat = self
            .0
            .attributes()
            .await
            .map_err(|e| browser_err("Failed to read attributes", e))?;
        // CDP returns [name, value, name, value, ...].
        Ok(flat
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect())
    }

    async fn inner_markup(&self) -> Result<String, AppError> {
        Ok(self
            .0
            .inner_html()
            .await
            .map_err(|e| browser_err("Failed to read inner HTML", e))?
            .unwrap_or_default())
    }

    async fn tag_name(&self) -> Result<String, AppError> {
        Ok(self
            .js_string("function() { return this.tagName; }")
            .await?
            .unwrap_or_default())
    }
}
