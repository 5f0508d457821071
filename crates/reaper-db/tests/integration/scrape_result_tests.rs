use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use reaper_core::models::{
    EnrichmentResult, ExtractedElement, ExtractionResult, ExtractionStatus, JobId, JobOutcome,
};
use reaper_core::traits::{JobSource, OutcomeSink};
use reaper_db::{JobConfigRepository, ScrapeResultRepository};

use crate::integration::common::{sample_job, setup_test_db};

fn success_outcome(job_id: JobId, cost: f64, secs: u64) -> JobOutcome {
    let started_at = Utc::now();
    let element = ExtractedElement {
        text: "First headline".into(),
        attributes: BTreeMap::from([("class".to_string(), "title".to_string())]),
        html: "First headline".into(),
        tag_name: "H2".into(),
    };
    let extraction = ExtractionResult::success(
        "<html><h2 class=\"title\">First headline</h2></html>".into(),
        vec![element],
        started_at,
        Duration::from_secs(secs),
    );
    let enrichment = EnrichmentResult {
        data: Some(serde_json::json!({"summary": "one headline"})),
        model_used: "gemini-pro".into(),
        input_tokens: 120,
        output_tokens: 8,
        cost,
        duration: Duration::from_secs(1),
        error: None,
        attempts: Vec::new(),
    };
    JobOutcome {
        job_id,
        status: ExtractionStatus::Success,
        extraction,
        enrichment: Some(enrichment),
        started_at,
        completed_at: started_at + TimeDelta::seconds(secs as i64),
        duration: Duration::from_secs(secs),
    }
}

fn failed_outcome(job_id: JobId, status: ExtractionStatus, error: &str) -> JobOutcome {
    let started_at = Utc::now();
    JobOutcome {
        job_id,
        status,
        extraction: ExtractionResult::failure(status, error, started_at, Duration::from_secs(3)),
        enrichment: None,
        started_at,
        completed_at: started_at + TimeDelta::seconds(3),
        duration: Duration::from_secs(3),
    }
}

#[tokio::test]
async fn save_and_list_recent() {
    let (pool, _container) = setup_test_db().await;
    let jobs = JobConfigRepository::new(pool.clone());
    let results = ScrapeResultRepository::new(pool);

    let job_id = jobs.create(&sample_job("news")).await.unwrap();
    let first = results.save(&success_outcome(job_id, 0.002, 4)).await.unwrap();
    let second = results
        .save(&failed_outcome(job_id, ExtractionStatus::Blocked, "HTTP 403"))
        .await
        .unwrap();

    let recent = results.recent(job_id, 10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].id, second);
    assert_eq!(recent[0].status, "blocked");
    assert_eq!(
        recent[0].error_message.as_deref(),
        Some("HTTP 403")
    );
    assert_eq!(recent[0].enrichment_cost, None);
    assert_eq!(recent[1].id, first);
    assert_eq!(recent[1].status, "success");
    assert_eq!(recent[1].scrape_attempts, 1);
    assert_eq!(recent[1].enrichment_cost, Some(0.002));

    assert_eq!(results.recent(job_id, 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn extracted_data_only_stored_on_success() {
    let (pool, _container) = setup_test_db().await;
    let jobs = JobConfigRepository::new(pool.clone());
    let results = ScrapeResultRepository::new(pool.clone());

    let job_id = jobs.create(&sample_job("news")).await.unwrap();
    let ok = results.save(&success_outcome(job_id, 0.0, 1)).await.unwrap();
    let failed = results
        .save(&failed_outcome(job_id, ExtractionStatus::Timeout, "Request timed out after 30 seconds"))
        .await
        .unwrap();

    let row: (Option<serde_json::Value>, Option<serde_json::Value>) = sqlx::query_as(
        "SELECT extracted_data, enrichment_data FROM scrape_results WHERE id = $1",
    )
    .bind(ok)
    .fetch_one(&pool)
    .await
    .unwrap();
    let extracted = row.0.expect("success keeps extracted data");
    assert_eq!(extracted[0]["text"], "First headline");
    assert_eq!(extracted[0]["attributes"]["class"], "title");
    assert_eq!(row.1, Some(serde_json::json!({"summary": "one headline"})));

    let row: (Option<serde_json::Value>, Option<String>) =
        sqlx::query_as("SELECT extracted_data, raw_html FROM scrape_results WHERE id = $1")
            .bind(failed)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(row.0.is_none());
    assert!(row.1.is_none());
}

#[tokio::test]
async fn recorded_outcome_drives_last_run() {
    let (pool, _container) = setup_test_db().await;
    let jobs = JobConfigRepository::new(pool.clone());
    let results = ScrapeResultRepository::new(pool);

    let job_id = jobs.create(&sample_job("news")).await.unwrap();
    let outcome = success_outcome(job_id, 0.0, 2);
    results.record(&outcome).await.unwrap();

    let last = jobs.last_run(job_id).await.unwrap().expect("run recorded");
    let drift = (last - outcome.started_at).num_milliseconds().abs();
    assert!(drift < 1, "stored start time drifted by {drift}ms");
}

#[tokio::test]
async fn summary_aggregates_runs() {
    let (pool, _container) = setup_test_db().await;
    let jobs = JobConfigRepository::new(pool.clone());
    let results = ScrapeResultRepository::new(pool);
    let since = Utc::now() - TimeDelta::hours(1);

    let empty = results.summary(since).await.unwrap();
    assert_eq!(empty.total_runs, 0);
    assert_eq!(empty.success_rate, 0.0);

    let job_id = jobs.create(&sample_job("news")).await.unwrap();
    results.save(&success_outcome(job_id, 0.25, 2)).await.unwrap();
    results.save(&success_outcome(job_id, 0.5, 4)).await.unwrap();
    results
        .save(&failed_outcome(job_id, ExtractionStatus::Failed, "boom"))
        .await
        .unwrap();
    results
        .save(&failed_outcome(job_id, ExtractionStatus::Blocked, "HTTP 429"))
        .await
        .unwrap();

    let summary = results.summary(since).await.unwrap();
    assert_eq!(summary.total_runs, 4);
    assert_eq!(summary.successful_runs, 2);
    assert!((summary.success_rate - 50.0).abs() < 1e-9);
    assert!((summary.total_cost - 0.75).abs() < 1e-9);
    assert!((summary.avg_duration_secs - 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn purge_removes_only_old_runs() {
    let (pool, _container) = setup_test_db().await;
    let jobs = JobConfigRepository::new(pool.clone());
    let results = ScrapeResultRepository::new(pool.clone());

    let job_id = jobs.create(&sample_job("news")).await.unwrap();
    let old = results.save(&success_outcome(job_id, 0.0, 1)).await.unwrap();
    let fresh = results.save(&success_outcome(job_id, 0.0, 1)).await.unwrap();

    sqlx::query("UPDATE scrape_results SET started_at = NOW() - INTERVAL '45 days' WHERE id = $1")
        .bind(old)
        .execute(&pool)
        .await
        .unwrap();

    let deleted = results.purge_older_than(30).await.unwrap();
    assert_eq!(deleted, 1);

    let remaining: Vec<_> = results
        .recent(job_id, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(remaining, vec![fresh]);
}

#[tokio::test]
async fn deleting_config_cascades_to_results() {
    let (pool, _container) = setup_test_db().await;
    let jobs = JobConfigRepository::new(pool.clone());
    let results = ScrapeResultRepository::new(pool.clone());

    let job_id = jobs.create(&sample_job("news")).await.unwrap();
    results.save(&success_outcome(job_id, 0.0, 1)).await.unwrap();

    sqlx::query("DELETE FROM scrape_configs WHERE id = $1")
        .bind(job_id)
        .execute(&pool)
        .await
        .unwrap();

    assert!(results.recent(job_id, 10).await.unwrap().is_empty());
}
