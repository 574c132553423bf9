pub mod config;
pub mod errors;
pub mod logging;
pub mod observability;
pub mod shutdown;

pub use config::*;
pub use errors::*;
pub use logging::init_logging;
pub use observability::{MetricsCollector, StructuredLogger};
pub use shutdown::{ShutdownListener, ShutdownSignal};
