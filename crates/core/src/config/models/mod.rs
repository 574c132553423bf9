pub mod app_config;
pub mod distributor;
pub mod logging;
pub mod orchestration;

pub use app_config::AppConfig;
pub use distributor::DistributorConfig;
pub use logging::LoggingConfig;
pub use orchestration::{OrchestrationConfig, RetryPolicy};
