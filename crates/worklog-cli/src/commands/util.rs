//! Shared formatting helpers for CLI commands.

use chrono::{Local, TimeZone};

/// Formats an epoch-milliseconds timestamp in local time.
pub fn format_timestamp(ms: i64) -> String {
    Local
        .timestamp_millis_opt(ms)
        .single()
        .map_or_else(|| format!("{ms} ms"), |dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Formats a duration as `HH:MM:SS`, flooring sub-second remainders.
pub fn format_duration(duration: chrono::Duration) -> String {
    let seconds = duration.num_seconds().max(0);
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        seconds % 3600 / 60,
        seconds % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formats_as_clock_time() {
        assert_eq!(format_duration(chrono::Duration::milliseconds(0)), "00:00:00");
        assert_eq!(format_duration(chrono::Duration::milliseconds(999)), "00:00:00");
        assert_eq!(
            format_duration(chrono::Duration::milliseconds(1_800_000)),
            "00:30:00"
        );
        assert_eq!(
            format_duration(chrono::Duration::seconds(25 * 3600 + 61)),
            "25:01:01"
        );
    }

    #[test]
    fn negative_durations_floor_at_zero() {
        assert_eq!(format_duration(chrono::Duration::seconds(-5)), "00:00:00");
    }
}
