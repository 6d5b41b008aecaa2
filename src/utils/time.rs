use jiff::Timestamp;

/// Milliseconds between the FILETIME epoch (1601-01-01 UTC) and the Unix epoch.
pub const FILETIME_UNIX_EPOCH_DIFF_MS: i64 = 11_644_473_600_000;

/// Convert a Windows FILETIME (100-ns ticks since 1601-01-01 UTC) to a UTC instant.
///
/// `0` is treated as the Unix epoch per spec §4.4.
pub fn timestamp_from_filetime(ticks: u64) -> Timestamp {
    if ticks == 0 {
        return Timestamp::UNIX_EPOCH;
    }
    let total_ms = (ticks / 10_000) as i64 - FILETIME_UNIX_EPOCH_DIFF_MS;
    let remainder_100ns = (ticks % 10_000) as i64;
    let nanos = total_ms
        .checked_mul(1_000_000)
        .and_then(|ms_ns| ms_ns.checked_add(remainder_100ns * 100))
        .unwrap_or(0);
    Timestamp::from_nanosecond(nanos as i128).unwrap_or(Timestamp::UNIX_EPOCH)
}

/// Fields of a `SystemTime` variant value (spec §4.5); treated as UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemTimeFields {
    pub year: u16,
    pub month: u16,
    pub day_of_week: u16,
    pub day: u16,
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub milliseconds: u16,
}

impl SystemTimeFields {
    pub fn to_timestamp(self) -> Option<Timestamp> {
        let date = jiff::civil::date(self.year as i16, self.month as i8, self.day as i8);
        let time = jiff::civil::time(
            self.hour as i8,
            self.minute as i8,
            self.second as i8,
            (self.milliseconds as i32) * 1_000_000,
        );
        let dt = date.ok()?.to_datetime(time.ok()?);
        dt.to_zoned(jiff::tz::TimeZone::UTC).ok().map(|z| z.timestamp())
    }
}

/// Render a timestamp as ISO-8601 UTC (`YYYY-MM-DDTHH:MM:SS.ssssssZ`), matching the
/// format expected throughout `ResolvedEvent` (spec §3).
pub fn format_iso8601(ts: Timestamp) -> String {
    ts.strftime("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_filetime_is_unix_epoch() {
        assert_eq!(timestamp_from_filetime(0), Timestamp::UNIX_EPOCH);
    }

    #[test]
    fn known_filetime_value() {
        // 2009-07-25T23:00:00Z, a commonly cited FILETIME test vector.
        let ticks: u64 = 128_930_364_000_000_000;
        let ts = timestamp_from_filetime(ticks);
        let rendered = format_iso8601(ts);
        assert!(rendered.starts_with("2009-07-25T23:00:00"));
    }
}
