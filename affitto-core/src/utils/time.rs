use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Current instant in UTC formatted as RFC3339 (e.g. "2025-11-02T12:34:56Z").
/// Used for user/property rows, where second precision is enough.
pub fn now_timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339).expect("error formatting timestamp")
}

/// Current unix time in microseconds. Message rows store this integer so the
/// strictly-increasing-per-thread invariant can be enforced by comparison.
pub fn now_micros() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000) as i64
}

/// Render a microsecond unix timestamp as RFC3339 UTC for the wire.
pub fn rfc3339_from_micros(micros: i64) -> String {
    let dt = OffsetDateTime::from_unix_timestamp_nanos(micros as i128 * 1_000)
        .expect("timestamp out of range");
    dt.format(&Rfc3339).expect("error formatting timestamp")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_render_keeps_ordering() {
        let a = rfc3339_from_micros(1_700_000_000_000_000);
        let b = rfc3339_from_micros(1_700_000_000_000_001);
        assert_ne!(a, b);
        assert!(b.starts_with("2023-11-14T"));
    }

    #[test]
    fn now_micros_is_not_in_the_past() {
        // 2024-01-01T00:00:00Z
        assert!(now_micros() > 1_704_067_200_000_000);
    }
}
