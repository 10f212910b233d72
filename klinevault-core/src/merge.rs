//! Series merging.
//!
//! Archives are applied in plan order (period start, monthly before daily),
//! never in arrival order, so the merged series does not depend on how the
//! decoded archives were submitted.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::decode::DecodedArchive;
use crate::domain::{Candle, CandleSeries};

/// Which row survives when two archives disagree on the same open-time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// The archive later in plan order wins.
    #[default]
    LaterWins,
    EarlierWins,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub archives: usize,
    pub input_rows: usize,
    /// Rows whose open-time was already present.
    pub duplicates: usize,
    /// Duplicates whose OHLCV differed from the row already present.
    pub conflicts: usize,
}

#[derive(Debug, Clone)]
pub struct Merged {
    pub series: CandleSeries,
    pub stats: MergeStats,
}

/// Merge decoded archives into one series with exactly one candle per open-time.
pub fn merge(archives: &[DecodedArchive], policy: MergePolicy) -> Merged {
    let mut ordered: Vec<&DecodedArchive> = archives.iter().collect();
    ordered.sort_by(|a, b| a.archive.cmp(&b.archive));

    let mut rows: BTreeMap<DateTime<Utc>, Candle> = BTreeMap::new();
    let mut stats = MergeStats {
        archives: ordered.len(),
        ..MergeStats::default()
    };

    for decoded in ordered {
        for candle in &decoded.candles {
            stats.input_rows += 1;
            match rows.get_mut(&candle.open_time) {
                None => {
                    rows.insert(candle.open_time, *candle);
                }
                Some(existing) => {
                    stats.duplicates += 1;
                    if existing.same_values(candle) {
                        continue;
                    }
                    stats.conflicts += 1;
                    debug!(
                        event_type = "merge_conflict",
                        archive = %decoded.archive,
                        open_time = %candle.open_time,
                        policy = ?policy,
                        "Duplicate open-time with differing values"
                    );
                    if policy == MergePolicy::LaterWins {
                        *existing = *candle;
                    }
                }
            }
        }
    }

    let series = CandleSeries::from_sorted(rows.into_values().collect());
    info!(
        event_type = "merge_complete",
        archives = stats.archives,
        rows = series.len(),
        duplicates = stats.duplicates,
        conflicts = stats.conflicts,
        "Merged decoded archives"
    );

    Merged { series, stats }
}
