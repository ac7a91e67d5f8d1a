//! Timestamp normalization between store-native units and Unix milliseconds.
//!
//! The store records timestamps relative to its own epoch (2001-01-01 UTC)
//! and the integer's unit is not self-describing: depending on the store
//! version it may be seconds, milliseconds, microseconds, or nanoseconds.
//! Units are inferred by magnitude banding; the bands real data occupies
//! (seconds for legacy stores, nanoseconds for modern ones) are disjoint
//! from the small values synthetic data uses.

/// Seconds between 1970-01-01 and 2001-01-01.
pub const APPLE_EPOCH_SECS: i64 = 978_307_200;

/// The store epoch expressed in Unix milliseconds.
pub const APPLE_EPOCH_MS: i64 = APPLE_EPOCH_SECS * 1000;

/// A fixed interpretation of the store's native timestamp unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeScale {
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

/// Infer the unit of a raw store timestamp by magnitude.
///
/// The 1e9..1e12 band is ambiguous (a plausible millisecond value overlaps a
/// plausible nanosecond value near the epoch); it is read as milliseconds,
/// fixed in both conversion directions.
pub fn infer_scale(raw: i64) -> TimeScale {
    let magnitude = raw.abs();
    if magnitude >= 1_000_000_000_000_000 {
        TimeScale::Nanoseconds
    } else if magnitude >= 1_000_000_000_000 {
        TimeScale::Microseconds
    } else if magnitude >= 1_000_000_000 {
        TimeScale::Milliseconds
    } else if magnitude >= 1_000_000 {
        TimeScale::Microseconds
    } else if magnitude >= 1_000 {
        TimeScale::Milliseconds
    } else {
        TimeScale::Seconds
    }
}

/// Convert a raw store timestamp to canonical Unix milliseconds.
///
/// `None` in, `None` out; never panics.
pub fn to_canonical_ms(raw: Option<i64>) -> Option<i64> {
    let raw = raw?;
    let since_epoch_ms = match infer_scale(raw) {
        TimeScale::Seconds => raw.saturating_mul(1000),
        TimeScale::Milliseconds => raw,
        TimeScale::Microseconds => raw / 1_000,
        TimeScale::Nanoseconds => raw / 1_000_000,
    };
    Some(since_epoch_ms.saturating_add(APPLE_EPOCH_MS))
}

/// Convert canonical Unix milliseconds back to raw store units at a fixed
/// scale. Used for building query bounds; the scale comes from
/// [`detect_scale`] so that bounds and stored rows agree.
pub fn to_raw_units(ms: i64, scale: TimeScale) -> i64 {
    let since_epoch_ms = ms.saturating_sub(APPLE_EPOCH_MS);
    match scale {
        TimeScale::Seconds => since_epoch_ms / 1000,
        TimeScale::Milliseconds => since_epoch_ms,
        TimeScale::Microseconds => since_epoch_ms.saturating_mul(1_000),
        TimeScale::Nanoseconds => since_epoch_ms.saturating_mul(1_000_000),
    }
}

/// Fix a single scale for a session by sampling the largest stored
/// timestamp. Uses the same banding as [`infer_scale`] so bound conversion
/// and row conversion cannot disagree. An empty store defaults to
/// nanoseconds (what modern stores write).
pub fn detect_scale(max_raw: Option<i64>) -> TimeScale {
    match max_raw {
        Some(raw) => infer_scale(raw),
        None => TimeScale::Nanoseconds,
    }
}

#[cfg(test)]
#[path = "timestamp_tests.rs"]
mod tests;
