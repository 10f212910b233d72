//! Gap detection against the timeframe's expected open-time grid.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::domain::{CandleSeries, DateSpan, Timeframe};

/// Coverage the collector accepts as complete.
pub const DEFAULT_COVERAGE_THRESHOLD: f64 = 0.99;

/// Maximal run of consecutive missing open-times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Gap {
    pub first_missing: DateTime<Utc>,
    pub last_missing: DateTime<Utc>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GapReport {
    pub gaps: Vec<Gap>,
    pub total_missing: u64,
    pub total_expected: u64,
}

impl GapReport {
    /// No expected open-time is missing.
    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
    }

    /// Expected open-times absent from the series.
    pub fn missing_count(&self) -> u64 {
        self.total_missing
    }

    /// Size of the expected grid over the span.
    pub fn expected_count(&self) -> u64 {
        self.total_expected
    }

    /// Fraction of expected open-times present. An empty domain counts as full.
    pub fn coverage(&self) -> f64 {
        if self.total_expected == 0 {
            return 1.0;
        }
        (self.total_expected - self.total_missing) as f64 / self.total_expected as f64
    }

    /// Coverage reaches `threshold`, e.g. [`DEFAULT_COVERAGE_THRESHOLD`].
    pub fn is_complete(&self, threshold: f64) -> bool {
        self.coverage() >= threshold
    }

    /// Longest gap; the earliest wins a tie.
    pub fn largest(&self) -> Option<&Gap> {
        self.gaps.iter().rev().max_by_key(|g| g.count)
    }
}

/// Walk the expected grid over `span` against `series` in lock-step.
///
/// Candles outside the span or off the grid are ignored.
pub fn detect_gaps(series: &CandleSeries, span: &DateSpan, timeframe: Timeframe) -> GapReport {
    let mut gaps: Vec<Gap> = Vec::new();
    let mut total_expected = 0u64;
    let mut total_missing = 0u64;
    let mut previous_present = true;

    let mut actual = series.iter().map(|c| c.open_time).peekable();

    for expected in timeframe.grid(span.start_instant(), span.end_instant_exclusive()) {
        total_expected += 1;
        while actual.next_if(|t| *t < expected).is_some() {}

        if actual.next_if_eq(&expected).is_some() {
            previous_present = true;
            continue;
        }

        total_missing += 1;
        match gaps.last_mut() {
            Some(gap) if !previous_present => {
                gap.last_missing = expected;
                gap.count += 1;
            }
            _ => gaps.push(Gap {
                first_missing: expected,
                last_missing: expected,
                count: 1,
            }),
        }
        previous_present = false;
    }

    let report = GapReport {
        gaps,
        total_missing,
        total_expected,
    };
    info!(
        event_type = "gap_report",
        span = %span,
        timeframe = %timeframe,
        expected = report.total_expected,
        missing = report.total_missing,
        gaps = report.gaps.len(),
        "Gap detection complete"
    );
    report
}
