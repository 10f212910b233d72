//! Range planning: which remote archives cover a date span.
//!
//! Every calendar month lying fully inside the span becomes one monthly
//! archive; the leading and trailing partial-month days become one daily
//! archive each. The resulting periods never overlap and their union is
//! exactly the span.

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::domain::{DateSpan, DomainError, MarketType, SymbolSpec, Timeframe};

/// Archive granularity. Monthly sorts before daily for the same start day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Monthly,
    Daily,
}

impl Granularity {
    /// Directory name used both remotely and in the local cache.
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Monthly => "monthly",
            Granularity::Daily => "daily",
        }
    }
}

/// Calendar period covered by one archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    Day(NaiveDate),
    /// Identified by its first day.
    Month(NaiveDate),
}

impl Period {
    pub fn first_day(&self) -> NaiveDate {
        match self {
            Period::Day(d) | Period::Month(d) => *d,
        }
    }

    pub fn last_day(&self) -> NaiveDate {
        match self {
            Period::Day(d) => *d,
            Period::Month(first) => last_day_of_month(*first),
        }
    }

    pub fn granularity(&self) -> Granularity {
        match self {
            Period::Day(_) => Granularity::Daily,
            Period::Month(_) => Granularity::Monthly,
        }
    }

    /// `YYYY-MM-DD` for days, `YYYY-MM` for months.
    pub fn label(&self) -> String {
        match self {
            Period::Day(d) => d.format("%Y-%m-%d").to_string(),
            Period::Month(d) => d.format("%Y-%m").to_string(),
        }
    }

    /// Whether `date` falls inside this period.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.first_day() <= date && date <= self.last_day()
    }
}

/// One addressable remote archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawArchiveRef", into = "RawArchiveRef")]
pub struct ArchiveRef {
    spec: SymbolSpec,
    period: Period,
}

#[derive(Serialize, Deserialize)]
struct RawArchiveRef {
    spec: SymbolSpec,
    period: Period,
}

impl From<RawArchiveRef> for ArchiveRef {
    fn from(raw: RawArchiveRef) -> Self {
        ArchiveRef::new(raw.spec, raw.period)
    }
}

impl From<ArchiveRef> for RawArchiveRef {
    fn from(archive: ArchiveRef) -> Self {
        RawArchiveRef {
            spec: archive.spec,
            period: archive.period,
        }
    }
}

impl ArchiveRef {
    /// Archive for `period`. A monthly period is moved to the first of its month.
    pub fn new(spec: SymbolSpec, period: Period) -> Self {
        let period = match period {
            Period::Month(day) => Period::Month(first_day_of_month(day)),
            day => day,
        };
        Self { spec, period }
    }

    /// Daily archive for `day`.
    pub fn daily(spec: SymbolSpec, day: NaiveDate) -> Self {
        Self::new(spec, Period::Day(day))
    }

    /// Monthly archive for the month containing `day`.
    pub fn monthly(spec: SymbolSpec, day: NaiveDate) -> Self {
        Self::new(spec, Period::Month(first_day_of_month(day)))
    }

    /// Series this archive belongs to.
    pub fn spec(&self) -> &SymbolSpec {
        &self.spec
    }

    /// Calendar period covered, day or month.
    pub fn period(&self) -> Period {
        self.period
    }

    pub fn granularity(&self) -> Granularity {
        self.period.granularity()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.period.first_day()
    }

    pub fn last_day(&self) -> NaiveDate {
        self.period.last_day()
    }

    /// Period part of the file name, `YYYY-MM` or `YYYY-MM-DD`.
    pub fn period_label(&self) -> String {
        self.period.label()
    }

    /// File stem shared by the ZIP and the CSV inside it: `ETHUSDT-15m-2024-01-01`.
    pub fn stem(&self) -> String {
        format!(
            "{}-{}-{}",
            self.spec.symbol(),
            self.spec.timeframe(),
            self.period.label()
        )
    }

    /// Remote file name, e.g. `ETHUSDT-15m-2024-01-01.zip`.
    pub fn file_name(&self) -> String {
        format!("{}.zip", self.stem())
    }

    /// Name of the CSV entry expected inside the archive.
    pub fn csv_name(&self) -> String {
        format!("{}.csv", self.stem())
    }

    /// Path below the host's data root.
    pub fn remote_path(&self) -> String {
        format!(
            "{}/{}/klines/{}/{}/{}",
            self.spec.market().remote_segment(),
            self.granularity().as_str(),
            self.spec.symbol(),
            self.spec.timeframe(),
            self.file_name()
        )
    }

    /// Full archive URL under `base_url`; a trailing slash is ignored.
    pub fn url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.remote_path())
    }

    /// Checksum companion lives next to the archive with a `.CHECKSUM` suffix.
    pub fn checksum_url(&self, base_url: &str) -> String {
        format!("{}.CHECKSUM", self.url(base_url))
    }

    fn sort_key(&self) -> (NaiveDate, Granularity, &str, MarketType, Timeframe) {
        (
            self.first_day(),
            self.granularity(),
            self.spec.symbol(),
            self.spec.market(),
            self.spec.timeframe(),
        )
    }
}

impl Ord for ArchiveRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for ArchiveRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ArchiveRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.spec.market(), self.stem())
    }
}

/// Plan the archives covering `span`, in chronological order.
pub fn plan(spec: &SymbolSpec, span: &DateSpan) -> Vec<ArchiveRef> {
    plan_with_cutoff(spec, span, None)
}

/// Like [`plan`], but months ending on or after `cutoff` are split into daily
/// archives. Monthly archives only appear once the month is over, so callers
/// pass the first day of the current month.
pub fn plan_with_cutoff(
    spec: &SymbolSpec,
    span: &DateSpan,
    cutoff: Option<NaiveDate>,
) -> Vec<ArchiveRef> {
    let mut refs = Vec::new();
    let mut day = span.start();

    loop {
        let month_start = first_day_of_month(day);
        let month_end = last_day_of_month(day);
        let month_published = cutoff.map_or(true, |c| month_end < c);

        let next = if day == month_start && month_end <= span.end() && month_published {
            refs.push(ArchiveRef::monthly(spec.clone(), day));
            month_end.succ_opt()
        } else {
            refs.push(ArchiveRef::daily(spec.clone(), day));
            day.succ_opt()
        };

        match next {
            Some(d) if d <= span.end() => day = d,
            _ => break,
        }
    }

    refs
}

/// Plan from raw dates, surfacing an inverted range as `InvalidRange`.
pub fn plan_range(
    spec: &SymbolSpec,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<ArchiveRef>, DomainError> {
    let span = DateSpan::new(start, end)?;
    Ok(plan(spec, &span))
}

fn first_day_of_month(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

fn last_day_of_month(day: NaiveDate) -> NaiveDate {
    first_day_of_month(day)
        .checked_add_months(Months::new(1))
        .and_then(|d| d.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}
