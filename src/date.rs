use std::fmt;
use std::str::FromStr;
use time::{Date, Month};

/// A calendar day used both for selecting source files (`YYYYMMDD` in key names)
/// and for filtering records (`YYYY-MM-DD` prefix of event timestamps).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReportDate(Date);

impl ReportDate {
    pub fn new(year: i32, month: u8, day: u8) -> Self {
        let month = Month::try_from(month).expect("Month must be 1..=12");
        let date = Date::from_calendar_date(year, month, day).expect("invalid calendar day");
        Self(date)
    }

    pub fn today() -> Self {
        Self(time::OffsetDateTime::now_utc().date())
    }

    pub fn next(self) -> Option<Self> {
        self.0.next_day().map(Self)
    }

    pub fn prev(self) -> Option<Self> {
        self.0.previous_day().map(Self)
    }

    /// `YYYYMMDD`, as used in object keys and output file names.
    pub fn compact(self) -> String {
        format!("{:04}{:02}{:02}", self.0.year(), u8::from(self.0.month()), self.0.day())
    }

    /// `YYYY-MM-DD`, the prefix every event timestamp of that day carries.
    pub fn dashed(self) -> String {
        format!("{:04}-{:02}-{:02}", self.0.year(), u8::from(self.0.month()), self.0.day())
    }

    /// Days whose source files may hold events of `self`: one day before, the day itself,
    /// and `days_after` days after.
    pub fn look_around(self, days_after: u32) -> Vec<ReportDate> {
        let lo = self.prev().unwrap_or(self);
        let mut hi = self;
        for _ in 0..days_after {
            match hi.next() {
                Some(n) => hi = n,
                None => break,
            }
        }
        iter_days(lo, hi).collect()
    }
}

impl fmt::Display for ReportDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.compact())
    }
}

/// Strip `-` and `/` separators: "2016-06-01" and "2016/06/01" both become "20160601".
pub fn normalize_date_str(s: &str) -> String {
    s.trim().chars().filter(|c| *c != '-' && *c != '/').collect()
}

impl FromStr for ReportDate {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact = normalize_date_str(s);
        if compact.len() != 8 || !compact.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("expected YYYYMMDD, got {s:?}"));
        }
        let year: i32 = compact[..4].parse().map_err(|_| "invalid year")?;
        let month: u8 = compact[4..6].parse().map_err(|_| "invalid month")?;
        let day: u8 = compact[6..8].parse().map_err(|_| "invalid day")?;
        let month = Month::try_from(month).map_err(|_| "month must be 01..12".to_string())?;
        let date = Date::from_calendar_date(year, month, day)
            .map_err(|e| format!("invalid date {s:?}: {e}"))?;
        Ok(Self(date))
    }
}

/// Inclusive iteration from `start` to `end` (if `start` <= `end`), else empty.
pub fn iter_days(start: ReportDate, end: ReportDate) -> impl Iterator<Item = ReportDate> {
    let mut curr = if start <= end { Some(start) } else { None };
    std::iter::from_fn(move || {
        let ret = curr?;
        curr = ret.next().filter(|n| *n <= end);
        Some(ret)
    })
}

/// Every day any reporting day in `start..=end` needs source files from.
pub fn fetch_window(start: ReportDate, end: ReportDate, days_after: u32) -> Vec<ReportDate> {
    if start > end {
        return Vec::new();
    }
    let lo = start.prev().unwrap_or(start);
    let hi = end.look_around(days_after).last().copied().unwrap_or(end);
    iter_days(lo, hi).collect()
}
