pub mod common;
mod job_config_tests;
mod scrape_result_tests;
