use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::warn;

/// Lowest multiplier freshness decay can reach.
pub const FRESHNESS_FLOOR: f64 = 0.5;

/// Weight of `ln(age_days + 1)` in the decay.
pub const FRESHNESS_DECAY: f64 = 0.05;

// SQLite CURRENT_TIMESTAMP style, written by older stores. Always UTC.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse an RFC3339 or SQLite-style UTC timestamp.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    NAIVE_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(raw, format)
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    })
}

/// `max(0.5, 1 - 0.05 * ln(age_days + 1))`, with negative or non-finite ages
/// treated as zero so clock skew never raises a score.
///
/// 0 days -> 1.0, 30 days -> ~0.83, 365 days -> ~0.70.
pub fn decay(age_days: f64) -> f64 {
    let age = if age_days.is_finite() {
        age_days.max(0.0)
    } else {
        0.0
    };

    (1.0 - FRESHNESS_DECAY * (age + 1.0).ln()).max(FRESHNESS_FLOOR)
}

/// Multiplier for a record last verified at `last_verified_at`.
///
/// Missing or unparsable timestamps yield 1.0.
pub fn freshness_multiplier(last_verified_at: &str, now: DateTime<Utc>) -> f64 {
    match parse_timestamp(last_verified_at) {
        Some(verified) => {
            let age_days = (now - verified).num_milliseconds() as f64 / 86_400_000.0;
            decay(age_days)
        }
        None => {
            warn!(
                "Unparsable last_verified_at {:?}, skipping freshness decay",
                last_verified_at
            );
            1.0
        }
    }
}
