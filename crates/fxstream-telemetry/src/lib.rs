//! Prometheus metrics and structured logging for fxstream.
//!
//! - Structured logging with tracing (pretty in development, JSON in production)
//! - Prometheus metrics for connection state, inbound traffic and commands

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
