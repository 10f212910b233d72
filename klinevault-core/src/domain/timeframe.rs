//! Kline timeframes and their expected open-time grid.
//!
//! Fixed-width timeframes align to the Unix epoch, except `1w` which opens on
//! Monday 00:00 UTC. `1mo` steps calendar months from the first of the month.

use chrono::{DateTime, Datelike, Months, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DomainError;

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;
/// 1970-01-01 was a Thursday; the first Monday is four days later.
const WEEK_OFFSET_MS: i64 = 4 * DAY_MS;

/// Candle bucket width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "3d")]
    D3,
    #[serde(rename = "1w")]
    W1,
    #[serde(rename = "1mo")]
    Mo1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 15] = [
        Timeframe::M1,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H2,
        Timeframe::H4,
        Timeframe::H6,
        Timeframe::H8,
        Timeframe::H12,
        Timeframe::D1,
        Timeframe::D3,
        Timeframe::W1,
        Timeframe::Mo1,
    ];

    /// Interval string as used in archive paths and file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H8 => "8h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
            Timeframe::D3 => "3d",
            Timeframe::W1 => "1w",
            Timeframe::Mo1 => "1mo",
        }
    }

    /// Fixed step in milliseconds. `None` for calendar months.
    pub fn step_ms(&self) -> Option<i64> {
        let ms = match self {
            Timeframe::M1 => MINUTE_MS,
            Timeframe::M3 => 3 * MINUTE_MS,
            Timeframe::M5 => 5 * MINUTE_MS,
            Timeframe::M15 => 15 * MINUTE_MS,
            Timeframe::M30 => 30 * MINUTE_MS,
            Timeframe::H1 => HOUR_MS,
            Timeframe::H2 => 2 * HOUR_MS,
            Timeframe::H4 => 4 * HOUR_MS,
            Timeframe::H6 => 6 * HOUR_MS,
            Timeframe::H8 => 8 * HOUR_MS,
            Timeframe::H12 => 12 * HOUR_MS,
            Timeframe::D1 => DAY_MS,
            Timeframe::D3 => 3 * DAY_MS,
            Timeframe::W1 => 7 * DAY_MS,
            Timeframe::Mo1 => return None,
        };
        Some(ms)
    }

    fn offset_ms(&self) -> i64 {
        match self {
            Timeframe::W1 => WEEK_OFFSET_MS,
            _ => 0,
        }
    }

    /// Whether `t` sits on a bucket boundary of this timeframe.
    pub fn is_aligned(&self, t: DateTime<Utc>) -> bool {
        match self.step_ms() {
            Some(step) => (t.timestamp_millis() - self.offset_ms()).rem_euclid(step) == 0,
            None => {
                t.day() == 1
                    && t.num_seconds_from_midnight() == 0
                    && t.timestamp_subsec_nanos() == 0
            }
        }
    }

    /// First boundary at or after `t`.
    pub fn align_ceil(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        if self.is_aligned(t) {
            return t;
        }
        match self.step_ms() {
            Some(step) => {
                let ms = t.timestamp_millis();
                let rem = (ms - self.offset_ms()).rem_euclid(step);
                millis_to_utc(ms + step - rem)
            }
            None => {
                let first = NaiveDate::from_ymd_opt(t.year(), t.month(), 1)
                    .and_then(|d| d.checked_add_months(Months::new(1)))
                    .unwrap_or(NaiveDate::MAX);
                start_of_day(first)
            }
        }
    }

    /// Boundary following the aligned instant `t`.
    pub fn next(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        match self.step_ms() {
            Some(step) => millis_to_utc(t.timestamp_millis() + step),
            None => t
                .checked_add_months(Months::new(1))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Every boundary in `[from, until)`, in increasing order.
    pub fn grid(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> TimeGrid {
        TimeGrid {
            timeframe: *self,
            cursor: self.align_ceil(from),
            until,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Timeframe::ALL
            .iter()
            .copied()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| DomainError::UnknownTimeframe(s.to_string()))
    }
}

/// Iterator over expected open-times.
#[derive(Debug, Clone)]
pub struct TimeGrid {
    timeframe: Timeframe,
    cursor: DateTime<Utc>,
    until: DateTime<Utc>,
}

impl Iterator for TimeGrid {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.until {
            return None;
        }
        let current = self.cursor;
        self.cursor = self.timeframe.next(current);
        Some(current)
    }
}

pub(crate) fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub(crate) fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}
