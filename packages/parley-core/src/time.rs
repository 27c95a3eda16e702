//! Wall-clock helpers.
//!
//! Message timestamps are stored as microseconds since the Unix epoch, so
//! every timestamp the service assigns is truncated to that precision up
//! front. A value handed back to a client as a cursor then compares exactly
//! against the stored column.

use chrono::{DateTime, SubsecRound, Utc};

/// Number of fractional-second digits kept on stored timestamps.
const STORED_SUBSEC_DIGITS: u16 = 6;

/// Returns the current UTC time at storage precision.
pub fn now() -> DateTime<Utc> {
    to_stored_precision(Utc::now())
}

/// Drops anything finer than a microsecond.
pub fn to_stored_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(STORED_SUBSEC_DIGITS)
}

/// Converts a timestamp to its stored integer form.
pub fn to_micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

/// Stored integer form of an exclusive upper bound.
///
/// A sub-microsecond remainder rounds up, so `stored < bound` selects the
/// same rows it would against the full-precision instant.
pub fn to_micros_ceil(ts: &DateTime<Utc>) -> i64 {
    let micros = ts.timestamp_micros();
    if ts.timestamp_subsec_nanos() % 1_000 == 0 {
        micros
    } else {
        micros + 1
    }
}

/// Converts a stored integer back into a timestamp.
pub fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros)
}

/// Returns the current Unix timestamp in seconds.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}
