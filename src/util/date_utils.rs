use chrono::{DateTime, Duration, NaiveDate, TimeZone as _, Utc};

use crate::error::AqiError;

/**
Convert a NaiveDate (YYYY-MM-DD) to a DateTime<Utc> at the beginning of that day (00:00:00 UTC).

## Arguments
* `date` - The NaiveDate to convert.

## Returns
The corresponding DateTime<Utc> or an AqiError if the date is invalid.
 */
pub fn date_to_datetime(date: &NaiveDate) -> Result<DateTime<Utc>, AqiError> {
    match date.and_hms_opt(0, 0, 0) {
        Some(naive_datetime) => Ok(Utc.from_utc_datetime(&naive_datetime)),
        None => Err(AqiError::ConfigError(format!(
            "Failed to create naive datetime from date: {}",
            date
        ))),
    }
}

/// Converts provider epoch seconds into a UTC instant.
pub fn from_epoch_seconds(seconds: i64) -> Result<DateTime<Utc>, AqiError> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or(AqiError::InvalidTimestamp(seconds))
}

/// A half-open `[start, end)` range requested from the provider in one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    pub fn start_epoch(&self) -> i64 {
        self.start.timestamp()
    }

    pub fn end_epoch(&self) -> i64 {
        self.end.timestamp()
    }
}

impl std::fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/**
Split `[since, until)` into consecutive windows of at most `window` length.
The last window is clipped to `until`.

## Returns
The windows in chronological order, empty when `since >= until`.
 */
pub fn fetch_windows(
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    window: Duration,
) -> Result<Vec<FetchWindow>, AqiError> {
    if window <= Duration::zero() {
        return Err(AqiError::ConfigError(format!(
            "Invalid window duration: {}",
            window
        )));
    }

    let mut windows = Vec::new();
    let mut current_start = since;
    while current_start < until {
        let current_end = (current_start + window).min(until);
        windows.push(FetchWindow {
            start: current_start,
            end: current_end,
        });
        current_start = current_end;
    }
    Ok(windows)
}

/// Absolute number of calendar days between two dates.
pub fn days_apart(a: NaiveDate, b: NaiveDate) -> i64 {
    (a - b).num_days().abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_to_datetime_valid() {
        let date = NaiveDate::from_ymd_opt(2023, 10, 26).unwrap();
        let dt = date_to_datetime(&date).unwrap();
        assert_eq!(
            dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            "2023-10-26 00:00:00"
        );
    }

    #[test]
    fn test_fetch_windows_multiple_chunks() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 6, 13, 12, 0, 0).unwrap();
        let windows = fetch_windows(start, end, Duration::days(5)).unwrap();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].start, start);
        assert_eq!(windows[0].end, start + Duration::days(5));
        assert_eq!(windows[1].start, windows[0].end);
        assert_eq!(windows[2].end, end);
    }

    #[test]
    fn test_fetch_windows_exact_boundary() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let end = start + Duration::days(10);
        let windows = fetch_windows(start, end, Duration::days(5)).unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].end, end);
    }

    #[test]
    fn test_fetch_windows_invalid_range() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        assert!(fetch_windows(start, start, Duration::days(5))
            .unwrap()
            .is_empty());
        assert!(fetch_windows(start, start - Duration::hours(1), Duration::days(5))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_fetch_windows_rejects_zero_window() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let result = fetch_windows(start, start + Duration::days(1), Duration::zero());
        assert!(matches!(result, Err(AqiError::ConfigError(_))));
    }

    #[test]
    fn test_from_epoch_seconds() {
        let dt = from_epoch_seconds(1_748_736_000).unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-06-01T00:00:00+00:00");
        assert!(from_epoch_seconds(i64::MAX).is_err());
    }

    #[test]
    fn test_days_apart_is_symmetric() {
        let a = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let b = NaiveDate::from_ymd_opt(2025, 6, 6).unwrap();
        assert_eq!(days_apart(a, b), 5);
        assert_eq!(days_apart(b, a), 5);
        assert_eq!(days_apart(a, a), 0);
    }
}
