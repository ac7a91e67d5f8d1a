//! Unit tests for timestamp normalization.

use super::*;

#[test]
fn null_in_null_out() {
    assert_eq!(to_canonical_ms(None), None);
}

#[test]
fn zero_maps_to_the_epoch_offset() {
    assert_eq!(to_canonical_ms(Some(0)), Some(APPLE_EPOCH_MS));
}

#[test]
fn band_inference() {
    assert_eq!(infer_scale(500), TimeScale::Seconds);
    assert_eq!(infer_scale(5_000), TimeScale::Milliseconds);
    assert_eq!(infer_scale(5_000_000), TimeScale::Microseconds);
    // The ambiguous band reads as milliseconds, by policy.
    assert_eq!(infer_scale(5_000_000_000), TimeScale::Milliseconds);
    assert_eq!(infer_scale(5_000_000_000_000), TimeScale::Microseconds);
    assert_eq!(infer_scale(700_000_000_000_000_000), TimeScale::Nanoseconds);
}

#[test]
fn seconds_band_converts() {
    // 500 seconds past the store epoch.
    assert_eq!(to_canonical_ms(Some(500)), Some(APPLE_EPOCH_MS + 500_000));
}

#[test]
fn nanoseconds_band_converts() {
    let raw = 700_000_000_000_000_000_i64;
    assert_eq!(
        to_canonical_ms(Some(raw)),
        Some(APPLE_EPOCH_MS + raw / 1_000_000)
    );
}

#[test]
fn monotonic_within_each_band() {
    let bands: [(i64, i64); 4] = [
        (10, 900),
        (2_000, 900_000),
        (2_000_000, 900_000_000),
        (2_000_000_000_000_000, 900_000_000_000_000_000),
    ];
    for (lo, hi) in bands {
        let mid = lo + (hi - lo) / 2;
        let a = to_canonical_ms(Some(lo));
        let b = to_canonical_ms(Some(mid));
        let c = to_canonical_ms(Some(hi));
        assert!(a < b && b < c, "band [{lo}, {hi}] not monotonic");
    }
}

#[test]
fn round_trip_at_fixed_scales() {
    let seconds = 500_i64;
    let ms = to_canonical_ms(Some(seconds)).unwrap();
    assert_eq!(to_raw_units(ms, TimeScale::Seconds), seconds);

    let nanos = 700_000_000_000_000_000_i64;
    let ms = to_canonical_ms(Some(nanos)).unwrap();
    assert_eq!(to_raw_units(ms, TimeScale::Nanoseconds), nanos);
}

#[test]
fn detect_scale_from_store_maximum() {
    assert_eq!(detect_scale(Some(600_000_000)), TimeScale::Seconds);
    assert_eq!(
        detect_scale(Some(700_000_000_000_000_000)),
        TimeScale::Nanoseconds
    );
    // Empty store: assume what modern stores write.
    assert_eq!(detect_scale(None), TimeScale::Nanoseconds);
}
