//! Record timestamps and durations.
//!
//! Timestamps are wall-clock local time in the short `YYmmdd_HHMMSS` form
//! (e.g. `251231_143022`). A legacy 12-digit form without the underscore is
//! still accepted on read; writes always emit the modern form.

use chrono::{Local, NaiveDateTime, TimeZone};

/// Current timestamp in `YYmmdd_HHMMSS` form.
pub fn generate_timestamp() -> String {
    Local::now().format("%y%m%d_%H%M%S").to_string()
}

/// Parse either timestamp form into a local datetime.
///
/// Returns `None` for anything that is not a 13-char underscored or
/// 12-digit timestamp.
pub fn parse_timestamp(timestamp: &str) -> Option<chrono::DateTime<Local>> {
    let compact = match timestamp.len() {
        13 if timestamp.as_bytes().get(6) == Some(&b'_') => timestamp.replace('_', ""),
        12 if timestamp.chars().all(|c| c.is_ascii_digit()) => timestamp.to_string(),
        _ => return None,
    };
    let naive = NaiveDateTime::parse_from_str(&compact, "%y%m%d%H%M%S").ok()?;
    Local.from_local_datetime(&naive).single()
}

/// Age of a timestamp in seconds, or `None` if it cannot be parsed.
pub fn age_seconds(timestamp: &str) -> Option<i64> {
    let then = parse_timestamp(timestamp)?;
    Some((Local::now() - then).num_seconds())
}

/// Seconds elapsed between two timestamps.
pub fn duration_between(start: &str, end: &str) -> Option<i64> {
    let start = parse_timestamp(start)?;
    let end = parse_timestamp(end)?;
    Some((end - start).num_seconds())
}

/// Format a duration as `XhYmZs`, `XmYs`, or `Xs`.
pub fn format_duration(seconds: i64) -> String {
    let total = seconds.max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{hours}h{minutes}m{secs}s")
    } else if minutes > 0 {
        format!("{minutes}m{secs}s")
    } else {
        format!("{secs}s")
    }
}

/// Whether a string is a bare timestamp in either accepted form.
pub fn is_timestamp(value: &str) -> bool {
    parse_timestamp(value).is_some()
}

/// Whether a suffix value is a timestamp older than the given timeout.
///
/// Suffixes of the form `<agent>-YYmmdd_HHMMSS` are checked against their
/// trailing timestamp; bare timestamps are checked directly.
pub fn is_suffix_stale(suffix: &str, zombie_timeout_seconds: u64) -> bool {
    let ts = suffix_timestamp(suffix);
    match ts.and_then(|t| age_seconds(t)) {
        Some(age) => age > zombie_timeout_seconds as i64,
        None => false,
    }
}

/// Extract the timestamp portion of an agent or bare-timestamp suffix.
pub fn suffix_timestamp(suffix: &str) -> Option<&str> {
    if is_timestamp(suffix) {
        return Some(suffix);
    }
    // Agent form: word chars, a dash, then a 13-char underscored timestamp.
    let (agent, ts) = suffix.rsplit_once('-')?;
    if !agent.is_empty() && ts.len() == 13 && ts.as_bytes()[6] == b'_' && is_timestamp(ts) {
        Some(ts)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn generated_timestamp_round_trips() {
        let ts = generate_timestamp();
        assert_eq!(ts.len(), 13);
        assert_eq!(ts.as_bytes()[6], b'_');
        assert!(parse_timestamp(&ts).is_some());
    }

    #[rstest]
    #[case("251231_143022", true)]
    #[case("251231143022", true)] // legacy 12-digit form
    #[case("251231_14302", false)]
    #[case("not-a-timestamp", false)]
    #[case("2512311430221", false)]
    fn timestamp_forms(#[case] input: &str, #[case] valid: bool) {
        assert_eq!(is_timestamp(input), valid, "{input}");
    }

    #[rstest]
    #[case(0, "0s")]
    #[case(45, "45s")]
    #[case(83, "1m23s")]
    #[case(120, "2m0s")]
    #[case(3723, "1h2m3s")]
    fn durations(#[case] seconds: i64, #[case] expected: &str) {
        assert_eq!(format_duration(seconds), expected);
    }

    #[test]
    fn duration_between_forms() {
        assert_eq!(duration_between("251231_140000", "251231_140012"), Some(12));
        // Mixed legacy and modern forms still compare.
        assert_eq!(duration_between("251231140000", "251231_140100"), Some(60));
        assert_eq!(duration_between("junk", "251231_140100"), None);
    }

    #[test]
    fn agent_suffix_timestamps() {
        assert_eq!(suffix_timestamp("fix_hook-251230_151429"), Some("251230_151429"));
        assert_eq!(suffix_timestamp("251230_151429"), Some("251230_151429"));
        assert_eq!(suffix_timestamp("Hook Command Failed"), None);
        assert_eq!(suffix_timestamp("-251230_151429"), None);
    }

    #[test]
    fn stale_suffix_detection() {
        // A timestamp from 2020 is far past any sane timeout.
        assert!(is_suffix_stale("200101_000000", 7200));
        assert!(is_suffix_stale("crs-200101_000000", 7200));
        assert!(!is_suffix_stale("ZOMBIE", 7200));
        let fresh = generate_timestamp();
        assert!(!is_suffix_stale(&fresh, 7200));
    }
}
