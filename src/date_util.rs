use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, TimeZone, Weekday,
};
use serde::Serialize;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// A half-open `[start_ms, end_ms)` window of epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeRange {
    pub fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Self {
        Self {
            start_ms: start.timestamp_millis(),
            end_ms: end.timestamp_millis(),
        }
    }

    pub fn contains(&self, ms: i64) -> bool {
        ms >= self.start_ms && ms < self.end_ms
    }

    pub fn contains_opt(&self, ms: Option<i64>) -> bool {
        ms.is_some_and(|ms| self.contains(ms))
    }
}

/// Get the quarter (1-4) for a given date.
pub fn quarter_of(d: NaiveDate) -> u8 {
    ((d.month() - 1) / 3 + 1) as u8
}

/// Midnight of `d` in the given offset.
pub fn midnight(tz: &FixedOffset, d: NaiveDate) -> DateTime<FixedOffset> {
    let naive = d.and_time(chrono::NaiveTime::MIN);
    tz.from_local_datetime(&naive)
        .single()
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

/// First moment of the calendar month containing `now`.
pub fn start_of_month(now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let d = now.date_naive().with_day(1).unwrap_or(now.date_naive());
    midnight(now.offset(), d)
}

/// First moment of the calendar week containing `now`, for weeks beginning on `week_start`.
pub fn start_of_week(now: DateTime<FixedOffset>, week_start: Weekday) -> DateTime<FixedOffset> {
    let today = now.date_naive();
    let back = (today.weekday().num_days_from_monday() + 7
        - week_start.num_days_from_monday())
        % 7;
    let back = back as i64;
    midnight(now.offset(), today - Duration::days(back))
}

/// Shift a date by whole calendar months, clamping to the month end.
pub fn add_months(d: NaiveDate, months: i32) -> NaiveDate {
    let shifted = if months >= 0 {
        d.checked_add_months(Months::new(months as u32))
    } else {
        d.checked_sub_months(Months::new(months.unsigned_abs()))
    };
    shifted.unwrap_or(d)
}

/// Epoch milliseconds to hours.
pub fn ms_to_hours(ms: f64) -> f64 {
    ms / MS_PER_HOUR
}

/// Round to two decimal places.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<FixedOffset> {
        utc().with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_quarter_of() {
        assert_eq!(quarter_of(NaiveDate::from_ymd_opt(2025, 3, 31).unwrap()), 1);
        assert_eq!(quarter_of(NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()), 2);
        assert_eq!(
            quarter_of(NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()),
            4
        );
    }

    #[test]
    fn test_start_of_month() {
        assert_eq!(start_of_month(at(2025, 3, 17, 15)), at(2025, 3, 1, 0));
    }

    #[test]
    fn test_start_of_month_respects_offset() {
        let est = FixedOffset::west_opt(5 * 3600).unwrap();
        let now = est.with_ymd_and_hms(2025, 3, 1, 2, 0, 0).unwrap();
        let start = start_of_month(now);
        assert_eq!(start, est.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_start_of_week() {
        // 2025-03-19 is a Wednesday
        let now = at(2025, 3, 19, 10);
        assert_eq!(start_of_week(now, Weekday::Mon), at(2025, 3, 17, 0));
        assert_eq!(start_of_week(now, Weekday::Sun), at(2025, 3, 16, 0));
        assert_eq!(start_of_week(now, Weekday::Wed), at(2025, 3, 19, 0));
    }

    #[test]
    fn test_add_months_clamps() {
        let jan31 = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        assert_eq!(add_months(jan31, 1), NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
        assert_eq!(add_months(jan31, -3), NaiveDate::from_ymd_opt(2024, 10, 31).unwrap());
    }

    #[test]
    fn test_hours_and_rounding() {
        assert_eq!(ms_to_hours(7_200_000.0), 2.0);
        assert_eq!(round2(1.23456), 1.23);
        assert_eq!(round2(2.0 / 3.0), 0.67);
    }

    #[test]
    fn test_time_range_is_half_open() {
        let r = TimeRange::new(at(2025, 3, 1, 0), at(2025, 4, 1, 0));
        assert!(r.contains(r.start_ms));
        assert!(!r.contains(r.end_ms));
        assert!(!r.contains_opt(None));
    }
}
