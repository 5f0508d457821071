pub mod config;
pub mod database;
pub mod job_repository;
pub mod result_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use job_repository::JobConfigRepository;
pub use result_repository::{RunSummary, ScrapeResultRepository, StoredResult};
