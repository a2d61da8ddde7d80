//! Epoch-millisecond clock helpers shared by session and cipher code.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current time as milliseconds since the Unix epoch.
///
/// A clock set before 1970 yields 0 rather than panicking.
#[must_use]
pub(crate) fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_ms_is_after_2020() {
        // 2020-01-01T00:00:00Z in ms
        assert!(epoch_ms() > 1_577_836_800_000);
    }
}
