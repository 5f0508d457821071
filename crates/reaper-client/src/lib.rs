#[cfg(feature = "browser")]
pub mod browser_driver;
pub mod llm;

#[cfg(feature = "browser")]
pub use browser_driver::{ChromiumDriver, ChromiumElement, ChromiumSession};
pub use llm::LlmClient;
