//! Command-line streaming price client.
//!
//! Wires the `fxstream-ws` session to configuration, credentials,
//! telemetry and a reconnect policy.

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::{AppConfig, CredentialSource};
pub use error::{AppError, AppResult};
