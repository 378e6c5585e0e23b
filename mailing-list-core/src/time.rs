//! Time helpers (§2 "Time/type helpers").

use chrono::{DateTime, TimeZone, Utc};

/// Returns the current time truncated to whole seconds, matching the
/// precision RFC-3339 timestamps are compared at elsewhere in the system.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.timestamp_opt(now.timestamp(), 0).single().unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_truncated_to_whole_seconds() {
        assert_eq!(now().timestamp_subsec_nanos(), 0);
    }
}
