/// Smoke-test for `ChromiumDriver`.
///
/// Launches a headless Chromium, scrapes the `<h1>` of <https://example.com>
/// through a one-off job, and prints the extraction result.
///
/// Run with:
///   cargo run -p reaper-client --example browser_smoke --features browser
use reaper_client::ChromiumDriver;
use reaper_core::{ExtractionStatus, JobDefinition, ScrapeSession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    println!("Launching headless browser…");
    let driver = ChromiumDriver::launch().await?;

    let job = JobDefinition::new(0, "smoke", "https://example.com", "h1", "* * * * *", "")
        .with_wait_time(0)
        .with_max_retries(0);
    let result = ScrapeSession::new(driver).execute(&job).await;

    assert_eq!(
        result.status,
        ExtractionStatus::Success,
        "scrape failed: {:?}",
        result.error
    );
    let heading = result.elements.first().map(|e| e.text.as_str());
    assert_eq!(heading, Some("Example Domain"), "unexpected <h1>");

    let html_len = result.raw_html.as_deref().map_or(0, str::len);
    println!("OK: {} element(s), {html_len} bytes of rendered HTML", result.elements.len());
    println!("{}", serde_json::to_string_pretty(&result.elements)?);
    Ok(())
}
