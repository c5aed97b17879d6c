//! Timestamp helpers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current time as whole seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Current time rendered for the envelope `synctime` field.
///
/// The field is opaque to the protocol; peers treat it as an ordering hint
/// only, so a decimal seconds string is sufficient and stable.
pub fn synctime() -> String {
    now_secs().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_secs_is_monotonic_enough() {
        let a = now_secs();
        let b = now_secs();
        assert!(b >= a);
        // Sanity: after 2020, before 2100.
        assert!(a > 1_577_836_800);
        assert!(a < 4_102_444_800);
    }

    #[test]
    fn test_synctime_is_decimal() {
        let s = synctime();
        assert!(s.parse::<u64>().is_ok());
    }
}
