//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("Stream error: {0}")]
    Stream(#[from] fxstream_ws::StreamError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] fxstream_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

pub type AppResult<T> = Result<T, AppError>;
