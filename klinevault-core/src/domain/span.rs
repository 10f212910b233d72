//! Inclusive calendar date span.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::timeframe::start_of_day;
use super::DomainError;

/// Inclusive `[start, end]` range of UTC calendar dates. `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSpan", into = "RawSpan")]
pub struct DateSpan {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Serialize, Deserialize)]
struct RawSpan {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawSpan> for DateSpan {
    type Error = DomainError;

    fn try_from(raw: RawSpan) -> Result<Self, Self::Error> {
        DateSpan::new(raw.start, raw.end)
    }
}

impl From<DateSpan> for RawSpan {
    fn from(span: DateSpan) -> Self {
        RawSpan {
            start: span.start,
            end: span.end,
        }
    }
}

impl DateSpan {
    /// Build a span, rejecting `start > end` with [`DomainError::InvalidRange`].
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DomainError> {
        if start > end {
            return Err(DomainError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse two `YYYY-MM-DD` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, DomainError> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|_| DomainError::InvalidDate(s.to_string()))
        };
        Self::new(parse(start)?, parse(end)?)
    }

    /// Single-day span.
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// First day, inclusive.
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last day, inclusive.
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of calendar days covered (at least 1).
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Whether `date` lies within `[start, end]`.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Every calendar day from `start` to `end`.
    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    /// First instant of the span (start date, 00:00 UTC).
    pub fn start_instant(&self) -> DateTime<Utc> {
        start_of_day(self.start)
    }

    /// Exclusive upper bound (day after end, 00:00 UTC).
    pub fn end_instant_exclusive(&self) -> DateTime<Utc> {
        start_of_day(self.end) + Duration::days(1)
    }
}

impl fmt::Display for DateSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
