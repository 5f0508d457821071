use reaper_core::error::AppError;
use reaper_core::traits::JobSource;
use reaper_db::JobConfigRepository;

use crate::integration::common::{sample_job, setup_test_db};

#[tokio::test]
async fn create_and_get_round_trips_fields() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobConfigRepository::new(pool);

    let job = sample_job("news")
        .with_model("gemini-1.5-flash")
        .with_max_retries(5)
        .with_wait_time(2)
        .with_proxy(true);
    let id = repo.create(&job).await.unwrap();
    assert!(id > 0);

    let stored = repo.get(id).await.unwrap().expect("Job should exist");
    assert_eq!(stored.id, id);
    assert_eq!(stored.name, "news");
    assert_eq!(stored.url, "https://example.com/news");
    assert_eq!(stored.selector, "h2.title");
    assert_eq!(stored.schedule, "*/15 * * * *");
    assert_eq!(stored.model, "gemini-1.5-flash");
    assert_eq!(stored.max_retries, 5);
    assert_eq!(stored.wait_time, 2);
    assert_eq!(stored.timeout, 30);
    assert!(stored.proxy_enabled);
    assert!(stored.active);
}

#[tokio::test]
async fn job_columns_match_the_definition() {
    let (pool, _container) = setup_test_db().await;

    let columns: Vec<String> = sqlx::query_scalar(
        "SELECT column_name::TEXT FROM information_schema.columns \
         WHERE table_name = 'scrape_configs' ORDER BY ordinal_position",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert!(!columns.iter().any(|c| c == "region"));
    assert!(columns.iter().any(|c| c == "timeout"));

    let repo = JobConfigRepository::new(pool);
    let id = repo.create(&sample_job("slow").with_timeout(90)).await.unwrap();
    assert_eq!(repo.get(id).await.unwrap().unwrap().timeout, 90);
}

#[tokio::test]
async fn get_missing_returns_none() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobConfigRepository::new(pool);

    assert!(repo.get(4242).await.unwrap().is_none());
}

#[tokio::test]
async fn create_rejects_invalid_schedule() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobConfigRepository::new(pool);

    let mut job = sample_job("broken");
    job.schedule = "every day".into();
    let err = repo.create(&job).await.unwrap_err();
    assert!(matches!(err, AppError::ConfigError(_)));
}

#[tokio::test]
async fn duplicate_name_is_database_error() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobConfigRepository::new(pool);

    repo.create(&sample_job("dup")).await.unwrap();
    let err = repo.create(&sample_job("dup")).await.unwrap_err();
    assert!(matches!(err, AppError::DatabaseError(_)));
}

#[tokio::test]
async fn list_active_skips_inactive_jobs() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobConfigRepository::new(pool);

    let a = repo.create(&sample_job("a")).await.unwrap();
    let b = repo.create(&sample_job("b").inactive()).await.unwrap();
    let c = repo.create(&sample_job("c")).await.unwrap();

    let ids: Vec<_> = repo
        .list_active()
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.id)
        .collect();
    assert_eq!(ids, vec![a, c]);

    assert!(repo.set_active(b, true).await.unwrap());
    assert!(repo.set_active(a, false).await.unwrap());
    let ids: Vec<_> = repo
        .list_active()
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.id)
        .collect();
    assert_eq!(ids, vec![b, c]);
}

#[tokio::test]
async fn set_active_on_missing_job_reports_false() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobConfigRepository::new(pool);

    assert!(!repo.set_active(999, false).await.unwrap());
}

#[tokio::test]
async fn last_run_is_none_without_results() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobConfigRepository::new(pool);

    let id = repo.create(&sample_job("fresh")).await.unwrap();
    assert!(repo.last_run(id).await.unwrap().is_none());
}
