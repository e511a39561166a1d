//! Clock source for telemetry timestamps.
//!
//! Two readings go out on the wire: a wall-clock ISO-8601 `timestamp` for
//! humans, and a high-resolution `clientTime` in epoch milliseconds that the
//! collector uses for skew correction during time sync.

use chrono::{SecondsFormat, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

/// High-resolution client clock reading: epoch milliseconds rendered as a
/// float string with microsecond precision.
pub fn client_time() -> String {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{:.3}", elapsed.as_secs_f64() * 1000.0)
}

/// ISO-8601 UTC wall-clock time with millisecond precision.
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
