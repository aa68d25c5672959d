//! Telemetry Module

mod logging;
pub(crate) mod metrics;

pub use self::logging::init_logging;
pub use self::metrics::init_metrics;
