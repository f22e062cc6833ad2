//! Application configuration.
//!
//! Loaded from a TOML file with `FXSTREAM__<SECTION>__<KEY>` environment
//! overrides, e.g. `FXSTREAM__STREAM__HOST=stream.example.com`.

use crate::error::{AppError, AppResult};
use fxstream_ws::{
    endpoint_url, Credentials, DataRequestType, SessionConfig, SignatureField, SubscriptionSpec,
    DEFAULT_SIGNING_PATH,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

const ENV_PREFIX: &str = "FXSTREAM";

// ============================================================================
// Stream endpoint
// ============================================================================

/// Endpoint and handshake settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Host (and optional port), without scheme.
    pub host: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_tls")]
    pub tls: bool,
    /// Path signed in the auth request; independent of `path`.
    #[serde(default = "default_signing_path")]
    pub signing_path: String,
    #[serde(default)]
    pub signature_field: SignatureField,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_path() -> String {
    "/price.tickers".to_string()
}

fn default_tls() -> bool {
    true
}

fn default_signing_path() -> String {
    DEFAULT_SIGNING_PATH.to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            path: default_path(),
            tls: default_tls(),
            signing_path: default_signing_path(),
            signature_field: SignatureField::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl StreamConfig {
    pub fn url(&self) -> String {
        endpoint_url(&self.host, &self.path, self.tls)
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Where API credentials come from. Never stored in the main config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CredentialSource {
    /// Read from environment variables (development).
    Env {
        #[serde(default = "default_api_key_var")]
        api_key_var: String,
        #[serde(default = "default_secret_key_var")]
        secret_key_var: String,
        #[serde(default = "default_passphrase_var")]
        passphrase_var: String,
    },
    /// Read from a TOML file with `api_key`, `secret_key` and `passphrase`
    /// (production, recommend 0600 permissions).
    File { path: PathBuf },
}

fn default_api_key_var() -> String {
    "FXSTREAM_API_KEY".to_string()
}

fn default_secret_key_var() -> String {
    "FXSTREAM_SECRET_KEY".to_string()
}

fn default_passphrase_var() -> String {
    "FXSTREAM_PASSPHRASE".to_string()
}

impl Default for CredentialSource {
    fn default() -> Self {
        Self::Env {
            api_key_var: default_api_key_var(),
            secret_key_var: default_secret_key_var(),
            passphrase_var: default_passphrase_var(),
        }
    }
}

#[derive(Deserialize)]
struct CredentialsFile {
    api_key: String,
    secret_key: String,
    passphrase: String,
}

impl CredentialSource {
    /// Load and decode the credentials.
    ///
    /// # Errors
    /// Returns `AppError::Credentials` if a variable is missing, the file
    /// cannot be read or parsed, or the secret is not valid base64.
    pub fn load(&self) -> AppResult<Credentials> {
        let (api_key, secret_key, passphrase) = match self {
            Self::Env {
                api_key_var,
                secret_key_var,
                passphrase_var,
            } => (
                read_var(api_key_var)?,
                Zeroizing::new(read_var(secret_key_var)?),
                Zeroizing::new(read_var(passphrase_var)?),
            ),
            Self::File { path } => {
                let content = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
                    AppError::Credentials(format!(
                        "Failed to read credentials file {}: {e}",
                        path.display()
                    ))
                })?);
                let file: CredentialsFile = toml::from_str(&content).map_err(|e| {
                    AppError::Credentials(format!("Failed to parse credentials file: {e}"))
                })?;
                (
                    file.api_key,
                    Zeroizing::new(file.secret_key),
                    Zeroizing::new(file.passphrase),
                )
            }
        };

        Credentials::new(api_key.trim(), secret_key.trim(), passphrase.as_str())
            .map_err(|e| AppError::Credentials(e.to_string()))
    }
}

fn read_var(name: &str) -> AppResult<String> {
    std::env::var(name)
        .map_err(|_| AppError::Credentials(format!("Environment variable {name} not set")))
}

// ============================================================================
// Subscriptions and reconnect
// ============================================================================

/// One subscription sent after every successful auth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub base_token: String,
    pub quote_token: String,
    /// Token the levels are denominated in. Defaults to `base_token`.
    #[serde(default)]
    pub quantity_token: Option<String>,
    pub levels: Vec<f64>,
}

impl SubscriptionConfig {
    pub fn to_spec(&self) -> SubscriptionSpec {
        SubscriptionSpec::new(
            self.base_token.clone(),
            self.quote_token.clone(),
            self.quantity_token
                .clone()
                .unwrap_or_else(|| self.base_token.clone()),
            self.levels.clone(),
        )
    }

    fn validate(&self) -> AppResult<()> {
        let pair = format!("{}/{}", self.base_token, self.quote_token);
        if self.base_token.trim().is_empty() || self.quote_token.trim().is_empty() {
            return Err(AppError::Config(format!("Subscription {pair}: empty token")));
        }
        if self.levels.is_empty() {
            return Err(AppError::Config(format!(
                "Subscription {pair}: at least one quantity level is required"
            )));
        }
        if let Some(level) = self.levels.iter().find(|l| !l.is_finite() || **l <= 0.0) {
            return Err(AppError::Config(format!(
                "Subscription {pair}: quantity level {level} must be positive"
            )));
        }
        Ok(())
    }
}

/// Reconnect policy applied by the application around `open()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_enabled")]
    pub enabled: bool,
    /// 0 = infinite.
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_reconnect_enabled() -> bool {
    true
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: default_reconnect_enabled(),
            max_attempts: 0,
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

// ============================================================================
// AppConfig
// ============================================================================

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub stream: StreamConfig,
    #[serde(default)]
    pub credentials: CredentialSource,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
    /// Data requests issued after every successful auth.
    #[serde(default)]
    pub data_requests: Vec<DataRequestType>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl AppConfig {
    /// Load from a TOML file, apply environment overrides and validate.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let config: Self = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| {
                AppError::Config(format!("Failed to load {}: {e}", path.display()))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate TOML text without environment overrides.
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.stream.host.trim().is_empty() {
            return Err(AppError::Config("stream.host must not be empty".to_string()));
        }
        if self.stream.host.contains("://") {
            return Err(AppError::Config(
                "stream.host must not include a scheme; use stream.tls".to_string(),
            ));
        }
        if !self.stream.signing_path.starts_with('/') {
            return Err(AppError::Config(
                "stream.signing_path must start with '/'".to_string(),
            ));
        }
        for subscription in &self.subscriptions {
            subscription.validate()?;
        }
        if self.reconnect.base_delay_ms == 0
            || self.reconnect.base_delay_ms > self.reconnect.max_delay_ms
        {
            return Err(AppError::Config(
                "reconnect.base_delay_ms must be positive and not exceed max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Session settings derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            url: self.stream.url(),
            signing_path: self.stream.signing_path.clone(),
            signature_field: self.stream.signature_field,
            initial_subscriptions: self.subscriptions.iter().map(|s| s.to_spec()).collect(),
        }
    }
}
