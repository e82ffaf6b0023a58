pub mod logging;
pub mod metrics;

pub use logging::{request_id, RequestLogging};
pub use metrics::MetricsMiddleware;
