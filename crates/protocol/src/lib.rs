//! Dispatchlink Protocol
//!
//! Shared types for the push channel and the conversation REST API.
//! Push frames are STOMP text frames carried over a WebSocket; their bodies
//! and the REST payloads are JSON.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

// Re-exports
pub mod frame;
pub mod types;

pub use frame::{Command, Frame, FrameError};
pub use types::*;

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Generate a notification id from a timestamp and a random suffix
pub fn new_notification_id(millis: u128) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", millis, &suffix[..8])
}

/// Largest epoch-millis value that still formats as a four-digit year
/// (9999-12-31T23:59:59.999Z).
pub const MAX_TIMESTAMP_MILLIS: u128 = 253_402_300_799_999;

/// Format millis-since-epoch as an ISO 8601 timestamp. Values past
/// [`MAX_TIMESTAMP_MILLIS`] are clamped to it.
pub fn iso_timestamp(millis: u128) -> String {
    let millis = millis.min(MAX_TIMESTAMP_MILLIS);
    let total_secs = millis / 1000;
    let frac = millis % 1000;
    let secs = total_secs % 60;
    let total_mins = total_secs / 60;
    let mins = total_mins % 60;
    let total_hours = total_mins / 60;
    let hours = total_hours % 24;
    let days_since_epoch = (total_hours / 24) as i64;

    let (y, m, d) = civil_from_days(days_since_epoch);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        y, m, d, hours, mins, secs, frac
    )
}

/// Proleptic Gregorian (year, month, day) for a day count since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
