//! Time and timestamp helpers.

use chrono::{DateTime, TimeDelta, Utc};

/// UTC timestamp attached to every observed or emitted message.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Convert fractional seconds (as decoded from the wire) into a [`TimeDelta`].
///
/// Sub-millisecond precision is dropped. Returns `None` for negative,
/// non-finite or out-of-range values.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn seconds(secs: f64) -> Option<TimeDelta> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    TimeDelta::try_milliseconds((secs * 1000.0).round() as i64)
}

/// Whether `later` falls no more than `window` after `earlier`.
///
/// A window reaching past the last representable time holds everything.
#[must_use]
pub fn within(earlier: Timestamp, later: Timestamp, window: TimeDelta) -> bool {
    earlier
        .checked_add_signed(window)
        .is_none_or(|limit| later <= limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_return_current_utc_time() {
        let before = Utc::now();
        let ts = now();
        let after = Utc::now();
        assert!(ts >= before);
        assert!(ts <= after);
    }

    #[test]
    fn should_convert_fractional_seconds() {
        assert_eq!(seconds(1.5), Some(TimeDelta::milliseconds(1500)));
        assert_eq!(seconds(305.0), Some(TimeDelta::seconds(305)));
    }

    #[test]
    fn should_reject_unrepresentable_seconds() {
        assert_eq!(seconds(-1.0), None);
        assert_eq!(seconds(f64::NAN), None);
        assert_eq!(seconds(f64::INFINITY), None);
        assert_eq!(seconds(1e17), None);
        assert_eq!(seconds(-1e17), None);
    }

    #[test]
    fn should_not_overflow_with_window_past_end_of_time() {
        let t0 = now();
        assert!(within(t0, t0 + TimeDelta::days(365), TimeDelta::days(1_000_000_000)));
    }

    #[test]
    fn should_accept_later_inside_window_only() {
        let t0 = now();
        let window = TimeDelta::seconds(305);
        assert!(within(t0, t0 + TimeDelta::seconds(305), window));
        assert!(within(t0, t0 - TimeDelta::seconds(1), window));
        assert!(!within(t0, t0 + TimeDelta::seconds(306), window));
    }
}
