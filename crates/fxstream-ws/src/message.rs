//! Wire message types and codec.
//!
//! Outbound commands are flat JSON objects discriminated by `action`; the
//! discriminant comes from the `OutboundRequest` variant, never from a field.
//! Inbound messages share one envelope shape discriminated by `event`.

use crate::error::{StreamError, StreamResult};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

// ============================================================================
// Outbound
// ============================================================================

/// Name of the signature field in the auth request.
///
/// Vendor documentation has used both spellings; every reference client
/// sends `sign`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureField {
    #[default]
    Sign,
    Signature,
}

impl SignatureField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sign => "sign",
            Self::Signature => "signature",
        }
    }
}

/// Auth handshake request.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthRequest {
    pub api_key: String,
    pub passphrase: String,
    pub signature: String,
    /// Unix seconds used in the pre-hash string.
    pub timestamp: i64,
    pub request_id: String,
    pub signature_field: SignatureField,
}

impl Serialize for AuthRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("AuthRequest", 5)?;
        s.serialize_field("api_key", &self.api_key)?;
        s.serialize_field("passphrase", &self.passphrase)?;
        s.serialize_field(self.signature_field.as_str(), &self.signature)?;
        s.serialize_field("timestamp", &self.timestamp)?;
        s.serialize_field("request_id", &self.request_id)?;
        s.end()
    }
}

/// Base/quote pair identifying one price stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenPair {
    pub base_token: String,
    pub quote_token: String,
}

impl TokenPair {
    pub fn new(base_token: impl Into<String>, quote_token: impl Into<String>) -> Self {
        Self {
            base_token: base_token.into(),
            quote_token: quote_token.into(),
        }
    }
}

impl fmt::Display for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base_token, self.quote_token)
    }
}

/// Quantity ladder requested for a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityLevels {
    pub token: String,
    pub levels: Vec<f64>,
}

/// What to subscribe to: a pair plus the quantity ladder to price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    #[serde(flatten)]
    pub pair: TokenPair,
    pub quantity: QuantityLevels,
}

impl SubscriptionSpec {
    pub fn new(
        base_token: impl Into<String>,
        quote_token: impl Into<String>,
        quantity_token: impl Into<String>,
        levels: Vec<f64>,
    ) -> Self {
        Self {
            pair: TokenPair::new(base_token, quote_token),
            quantity: QuantityLevels {
                token: quantity_token.into(),
                levels,
            },
        }
    }
}

/// Static limits the server reports on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataRequestType {
    MaxLevels,
    AllowedMarkets,
    MaxConnections,
}

/// Outbound command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OutboundRequest {
    Auth(AuthRequest),
    Subscribe(SubscribeRequest),
    Unsubscribe(UnsubscribeRequest),
    #[serde(rename = "data_request")]
    Data(DataRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub base_token: String,
    pub quote_token: String,
    pub quantity: QuantityLevels,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    pub base_token: String,
    pub quote_token: String,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequest {
    pub request_type: DataRequestType,
    pub request_id: String,
}

impl OutboundRequest {
    pub fn subscribe(spec: &SubscriptionSpec, request_id: impl Into<String>) -> Self {
        Self::Subscribe(SubscribeRequest {
            base_token: spec.pair.base_token.clone(),
            quote_token: spec.pair.quote_token.clone(),
            quantity: spec.quantity.clone(),
            request_id: request_id.into(),
        })
    }

    pub fn unsubscribe(pair: &TokenPair, request_id: impl Into<String>) -> Self {
        Self::Unsubscribe(UnsubscribeRequest {
            base_token: pair.base_token.clone(),
            quote_token: pair.quote_token.clone(),
            request_id: request_id.into(),
        })
    }

    pub fn data(request_type: DataRequestType, request_id: impl Into<String>) -> Self {
        Self::Data(DataRequest {
            request_type,
            request_id: request_id.into(),
        })
    }

    /// Correlation id carried by this command.
    pub fn request_id(&self) -> &str {
        match self {
            Self::Auth(r) => &r.request_id,
            Self::Subscribe(r) => &r.request_id,
            Self::Unsubscribe(r) => &r.request_id,
            Self::Data(r) => &r.request_id,
        }
    }

    /// Value of the `action` discriminant.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
            Self::Data(_) => "data_request",
        }
    }
}

/// Encode a command as compact JSON text.
pub fn encode(request: &OutboundRequest) -> StreamResult<String> {
    Ok(serde_json::to_string(request)?)
}

// ============================================================================
// Inbound
// ============================================================================

/// Dispatch key of an inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    AuthResponse,
    SubscribeResponse,
    UnsubscribeResponse,
    DataResponse,
    Stream,
    /// Anything the client does not know about yet.
    Unknown(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::AuthResponse => "auth_response",
            Self::SubscribeResponse => "subscribe_response",
            Self::UnsubscribeResponse => "unsubscribe_response",
            Self::DataResponse => "data_response",
            Self::Stream => "stream",
            Self::Unknown(other) => other,
        }
    }
}

impl From<String> for EventKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "auth_response" => Self::AuthResponse,
            "subscribe_response" => Self::SubscribeResponse,
            "unsubscribe_response" => Self::UnsubscribeResponse,
            "data_response" => Self::DataResponse,
            "stream" => Self::Stream,
            _ => Self::Unknown(value),
        }
    }
}

impl From<EventKind> for String {
    fn from(value: EventKind) -> Self {
        match value {
            EventKind::Unknown(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generic inbound message before event-specific interpretation.
///
/// Unknown fields are ignored so the vendor can extend the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub event: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

impl InboundEnvelope {
    /// `status` equals `success`, ignoring case.
    pub fn is_success(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("success"))
    }

    /// `status` equals `error`, ignoring case.
    pub fn is_error(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("error"))
    }

    /// Error payload if present, otherwise the body.
    pub fn detail(&self) -> Option<&serde_json::Value> {
        self.error.as_ref().or(self.body.as_ref())
    }

    /// Human-readable failure reason for logs and callbacks.
    pub fn failure_reason(&self) -> String {
        match self.detail() {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => format!(
                "status={}",
                self.status.as_deref().unwrap_or("<absent>")
            ),
        }
    }

    /// Parse a `stream` body into typed price updates.
    ///
    /// The body is normally an array of updates; a single object is
    /// accepted too. Elements that fail to parse are counted.
    pub fn price_updates(&self) -> PriceUpdatesResult {
        match &self.body {
            Some(body) => parse_price_updates(body),
            None => PriceUpdatesResult::default(),
        }
    }
}

/// Decode inbound text into an envelope.
///
/// # Errors
/// `StreamError::Decode` with the raw text when the input is not a JSON
/// object carrying a string `event`.
pub fn decode(text: &str) -> StreamResult<InboundEnvelope> {
    serde_json::from_str(text).map_err(|e| StreamError::decode(e.to_string(), text))
}

// ============================================================================
// Price updates
// ============================================================================

/// One priced quantity level from a `stream` push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// Server creation time.
    pub t_create: i64,
    pub quantity: f64,
    pub quantity_token: String,
    pub base_token: String,
    pub quote_token: String,
    /// Absent when the level cannot be filled on that side.
    #[serde(default)]
    pub buy_price: Option<f64>,
    #[serde(default)]
    pub sell_price: Option<f64>,
}

impl PriceUpdate {
    pub fn pair(&self) -> TokenPair {
        TokenPair::new(self.base_token.clone(), self.quote_token.clone())
    }

    /// Buy minus sell, when both sides are quoted.
    pub fn spread(&self) -> Option<f64> {
        match (self.buy_price, self.sell_price) {
            (Some(buy), Some(sell)) => Some(buy - sell),
            _ => None,
        }
    }
}

/// Result of parsing a stream body.
#[derive(Debug, Clone, Default)]
pub struct PriceUpdatesResult {
    pub updates: Vec<PriceUpdate>,
    pub failed_count: usize,
}

pub fn parse_price_updates(body: &serde_json::Value) -> PriceUpdatesResult {
    match body {
        serde_json::Value::Array(arr) => {
            let mut updates = Vec::with_capacity(arr.len());
            let mut failed_count = 0;

            for v in arr {
                match PriceUpdate::deserialize(v) {
                    Ok(update) => updates.push(update),
                    Err(e) => {
                        tracing::debug!(error = %e, element = ?v, "Failed to parse price update");
                        failed_count += 1;
                    }
                }
            }

            PriceUpdatesResult {
                updates,
                failed_count,
            }
        }
        serde_json::Value::Object(_) => match PriceUpdate::deserialize(body) {
            Ok(update) => PriceUpdatesResult {
                updates: vec![update],
                failed_count: 0,
            },
            Err(e) => {
                tracing::debug!(error = %e, "Failed to parse single price update");
                PriceUpdatesResult {
                    updates: vec![],
                    failed_count: 1,
                }
            }
        },
        other => {
            tracing::warn!(data_type = ?other, "stream body is neither Array nor Object");
            PriceUpdatesResult {
                updates: vec![],
                failed_count: 1,
            }
        }
    }
}
