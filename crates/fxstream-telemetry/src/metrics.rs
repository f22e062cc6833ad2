//! Prometheus metrics for the streaming client.
//!
//! Covers:
//! - Connection and session state
//! - Inbound events and price updates
//! - Command outcomes and auth failures
//! - Disconnects and reconnect attempts
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, a fatal configuration error that should
//! crash at first use. These panics only occur during static initialization.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram_vec, register_int_gauge_vec, Counter, CounterVec, Encoder, Gauge,
    GaugeVec, HistogramVec, IntGaugeVec, TextEncoder,
};

/// Session lifecycle states, as reported by the session.
const SESSION_STATES: &[&str] = &[
    "disconnected",
    "connecting",
    "awaiting_auth",
    "authenticated",
    "closed",
];

/// Transport connection state (1 = authenticated, 0 = otherwise).
pub static STREAM_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "fxstream_connected",
        "Stream session authenticated (1=yes)"
    )
    .unwrap()
});

/// Session state machine current state.
pub static SESSION_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "fxstream_session_state",
        "Session state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Session events by kind.
pub static EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fxstream_events_total",
        "Session events delivered to the application",
        &["event"]
    )
    .unwrap()
});

/// Individual price levels received.
pub static PRICE_UPDATES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fxstream_price_updates_total",
        "Price levels received",
        &["pair"]
    )
    .unwrap()
});

/// Price levels in a stream body that failed to parse.
pub static PRICE_PARSE_FAILURES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "fxstream_price_parse_failures_total",
        "Price levels that failed to parse"
    )
    .unwrap()
});

/// Latest buy/sell spread per pair and quantity.
pub static SPREAD: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "fxstream_spread",
        "Latest buy minus sell price",
        &["pair", "quantity"]
    )
    .unwrap()
});

/// Age of a price level on arrival, from its server creation time.
pub static PRICE_AGE_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "fxstream_price_age_ms",
        "Price level age on arrival in milliseconds",
        &["pair"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap()
});

/// Command responses by kind and outcome.
pub static COMMAND_RESULTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fxstream_command_results_total",
        "Command responses by kind and outcome",
        &["kind", "outcome"]
    )
    .unwrap()
});

/// Rejected auth requests.
pub static AUTH_FAILURES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "fxstream_auth_failures_total",
        "Auth requests rejected by the server"
    )
    .unwrap()
});

/// Disconnects by reason.
pub static DISCONNECTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fxstream_disconnects_total",
        "Session disconnects",
        &["reason"]
    )
    .unwrap()
});

/// Reconnect attempts by the reason of the preceding disconnect.
pub static RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fxstream_reconnect_total",
        "Reconnect attempts",
        &["reason"]
    )
    .unwrap()
});

/// Session message counters (received, decode errors, discarded, ...).
pub static SESSION_COUNTERS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "fxstream_session_counters",
        "Session message counters since start",
        &["counter"]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Set the session state. Only the active state is 1.
    pub fn session_state(state: &str) {
        for s in SESSION_STATES {
            SESSION_STATE.with_label_values(&[s]).set(0.0);
        }
        SESSION_STATE.with_label_values(&[state]).set(1.0);
        STREAM_CONNECTED.set(if state == "authenticated" { 1.0 } else { 0.0 });
    }

    pub fn event(event: &str) {
        EVENTS_TOTAL.with_label_values(&[event]).inc();
    }

    /// Record one parsed price level.
    pub fn price_update(pair: &str, quantity: f64, spread: Option<f64>, age_ms: Option<f64>) {
        PRICE_UPDATES_TOTAL.with_label_values(&[pair]).inc();
        if let Some(spread) = spread {
            SPREAD
                .with_label_values(&[pair, &quantity.to_string()])
                .set(spread);
        }
        if let Some(age_ms) = age_ms {
            PRICE_AGE_MS.with_label_values(&[pair]).observe(age_ms);
        }
    }

    pub fn price_parse_failures(count: usize) {
        if count > 0 {
            PRICE_PARSE_FAILURES_TOTAL.inc_by(count as f64);
        }
    }

    pub fn command_result(kind: &str, ok: bool) {
        let outcome = if ok { "success" } else { "error" };
        COMMAND_RESULTS_TOTAL
            .with_label_values(&[kind, outcome])
            .inc();
    }

    pub fn auth_failure() {
        AUTH_FAILURES_TOTAL.inc();
    }

    pub fn disconnect(reason: &str) {
        DISCONNECTS_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn reconnect(reason: &str) {
        RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Mirror a cumulative session counter.
    pub fn session_counter(name: &str, value: u64) {
        SESSION_COUNTERS
            .with_label_values(&[name])
            .set(i64::try_from(value).unwrap_or(i64::MAX));
    }

    /// Render every registered metric in the Prometheus text format.
    ///
    /// # Errors
    /// Returns `TelemetryError::Metrics` if encoding fails.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
