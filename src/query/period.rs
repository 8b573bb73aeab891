use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate};
use serde::Serialize;

use crate::date_util::{add_months, midnight, quarter_of, TimeRange};
use crate::error::{Error, Result};

/// A reporting window over task update timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum TimePeriod {
    #[default]
    AllTime,
    ThisMonth,
    PreviousMonth,
    Last30Days,
    ThisQuarter,
    LastQuarter,
    ThisYear,
    LastYear,
    /// Explicit calendar month (year, month).
    Month(i32, u8),
}

impl TimePeriod {
    /// Parse a period string.
    ///
    /// Supported formats:
    /// - `all-time`, `this-month`, `previous-month`, `last-30-days`
    /// - `this-quarter`, `last-quarter`, `this-year`, `last-year`
    /// - `2025-03` (calendar month)
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        let period = match s.as_str() {
            "" | "all-time" | "all" => TimePeriod::AllTime,
            "this-month" | "mtd" => TimePeriod::ThisMonth,
            "previous-month" | "last-month" => TimePeriod::PreviousMonth,
            "last-30-days" | "30d" => TimePeriod::Last30Days,
            "this-quarter" | "qtd" => TimePeriod::ThisQuarter,
            "last-quarter" => TimePeriod::LastQuarter,
            "this-year" | "ytd" => TimePeriod::ThisYear,
            "last-year" => TimePeriod::LastYear,
            other => return parse_month(other),
        };
        Ok(period)
    }

    /// Canonical key, stable across parse/print.
    pub fn to_key(&self) -> String {
        match self {
            TimePeriod::AllTime => "all-time".into(),
            TimePeriod::ThisMonth => "this-month".into(),
            TimePeriod::PreviousMonth => "previous-month".into(),
            TimePeriod::Last30Days => "last-30-days".into(),
            TimePeriod::ThisQuarter => "this-quarter".into(),
            TimePeriod::LastQuarter => "last-quarter".into(),
            TimePeriod::ThisYear => "this-year".into(),
            TimePeriod::LastYear => "last-year".into(),
            TimePeriod::Month(y, m) => format!("{y}-{m:02}"),
        }
    }

    /// Resolve to a half-open update-timestamp range relative to `now`.
    /// `None` means unbounded.
    pub fn range(&self, now: DateTime<FixedOffset>) -> Option<TimeRange> {
        let tz = *now.offset();
        let today = now.date_naive();
        let day = |d: NaiveDate| midnight(&tz, d);
        let month_start = today.with_day(1).unwrap_or(today);
        let quarter_start = quarter_start(today);
        let year_start = month_start.with_month(1).unwrap_or(month_start);
        let end_of_today = day(today + Duration::days(1));

        let (start, end) = match self {
            TimePeriod::AllTime => return None,
            TimePeriod::ThisMonth => (day(month_start), end_of_today),
            TimePeriod::PreviousMonth => (day(add_months(month_start, -1)), day(month_start)),
            TimePeriod::Last30Days => (now - Duration::days(30), end_of_today),
            TimePeriod::ThisQuarter => (day(quarter_start), end_of_today),
            TimePeriod::LastQuarter => (day(add_months(quarter_start, -3)), day(quarter_start)),
            TimePeriod::ThisYear => (day(year_start), end_of_today),
            TimePeriod::LastYear => (day(add_months(year_start, -12)), day(year_start)),
            TimePeriod::Month(y, m) => {
                let start = NaiveDate::from_ymd_opt(*y, *m as u32, 1)?;
                (day(start), day(add_months(start, 1)))
            }
        };
        Some(TimeRange::new(start, end))
    }
}

impl std::fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_key())
    }
}

fn quarter_start(d: NaiveDate) -> NaiveDate {
    let month = (quarter_of(d) as u32 - 1) * 3 + 1;
    NaiveDate::from_ymd_opt(d.year(), month, 1).unwrap_or(d)
}

fn parse_month(s: &str) -> Result<TimePeriod> {
    let (year, month) = s
        .split_once('-')
        .ok_or_else(|| Error::InvalidPeriod(s.to_string()))?;
    let year: i32 = year
        .parse()
        .map_err(|_| Error::InvalidPeriod(s.to_string()))?;
    let month: u8 = month
        .parse()
        .map_err(|_| Error::InvalidPeriod(s.to_string()))?;
    if !(1..=12).contains(&month) || year.to_string().len() != 4 {
        return Err(Error::InvalidPeriod(s.to_string()));
    }
    Ok(TimePeriod::Month(year, month))
}
