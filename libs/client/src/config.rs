//! Configuration for the delivery engine.
//!
//! Endpoint and origin resolve from explicit arguments first, then from the
//! environment, then from defaults. A missing or unusable endpoint does not
//! fail construction: it leaves the engine disabled, and every public
//! operation becomes a silent no-op.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::warn;

/// Endpoint used when neither an argument nor the environment provides one.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:5175";

/// Origin label used when neither an argument nor the environment provides one.
pub const DEFAULT_ORIGIN: &str = "client";

/// Environment variable overriding the collector endpoint.
pub const ENDPOINT_ENV: &str = "BEACON_COLLECTOR_URL";

/// Environment variable overriding the origin label.
pub const ORIGIN_ENV: &str = "BEACON_ORIGIN";

/// Configuration for a [`crate::TelemetryClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Collector WebSocket URL. `None` disables the engine entirely.
    pub endpoint: Option<String>,

    /// Label stamped on every log/endWorkflow envelope by façade callers.
    pub origin: String,

    /// Grace period before forced teardown on disconnect, in milliseconds.
    pub disconnect_grace_ms: u64,

    /// Keep-alive period, in milliseconds.
    pub heartbeat_interval_ms: u64,

    /// Cooperative delay between queued sends, in milliseconds.
    pub drain_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Some(DEFAULT_ENDPOINT.to_string()),
            origin: DEFAULT_ORIGIN.to_string(),
            disconnect_grace_ms: 2_000,
            heartbeat_interval_ms: 20_000,
            drain_delay_ms: 1,
        }
    }
}

impl ClientConfig {
    /// Configuration pointing at an explicit collector endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: sanitize_endpoint(endpoint.into()),
            ..Self::default()
        }
    }

    /// Configuration with no endpoint: every engine operation no-ops.
    pub fn disabled() -> Self {
        Self {
            endpoint: None,
            ..Self::default()
        }
    }

    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        let endpoint = env::var(ENDPOINT_ENV).unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        let origin = env::var(ORIGIN_ENV).unwrap_or_else(|_| DEFAULT_ORIGIN.to_string());

        Self {
            endpoint: sanitize_endpoint(endpoint),
            origin,
            ..Self::default()
        }
    }

    /// Override the origin label.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.drain_delay_ms)
    }
}

/// Validate an endpoint URL, degrading to `None` (disabled engine) when it is
/// unusable rather than failing construction.
fn sanitize_endpoint(raw: String) -> Option<String> {
    match url::Url::parse(&raw) {
        Ok(parsed) if matches!(parsed.scheme(), "ws" | "wss") => Some(raw),
        Ok(parsed) => {
            warn!(
                scheme = parsed.scheme(),
                "unsupported collector URL scheme, telemetry disabled"
            );
            None
        }
        Err(e) => {
            warn!(error = %e, url = %raw, "invalid collector URL, telemetry disabled");
            None
        }
    }
}
