//! Candles, the canonical OHLCV row, and the merged series.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::SeriesFingerprint;

/// One OHLCV bar keyed by its open-time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Bitwise equality of the OHLCV payload (NaN-safe, distinguishes -0.0).
    pub fn same_values(&self, other: &Candle) -> bool {
        self.open.to_bits() == other.open.to_bits()
            && self.high.to_bits() == other.high.to_bits()
            && self.low.to_bits() == other.low.to_bits()
            && self.close.to_bits() == other.close.to_bits()
            && self.volume.to_bits() == other.volume.to_bits()
    }

    /// high >= low and the open/close sit inside the range.
    pub fn is_sane(&self) -> bool {
        self.high >= self.low
            && self.open >= self.low
            && self.open <= self.high
            && self.close >= self.low
            && self.close <= self.high
            && self.volume >= 0.0
    }
}

/// Strictly increasing, duplicate-free sequence of candles.
///
/// Only the merger builds one, so the ordering invariant holds for every
/// value a caller receives.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

/// Row count and time bounds of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeriesStats {
    pub rows: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

impl CandleSeries {
    /// Caller guarantees strictly increasing open-times.
    pub(crate) fn from_sorted(candles: Vec<Candle>) -> Self {
        debug_assert!(candles.windows(2).all(|w| w[0].open_time < w[1].open_time));
        Self { candles }
    }

    /// Series without candles.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Candles in open-time order.
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// Number of candles.
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Earliest candle, if any.
    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    /// Latest candle, if any.
    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Binary search by open-time.
    pub fn get(&self, open_time: DateTime<Utc>) -> Option<&Candle> {
        self.candles
            .binary_search_by_key(&open_time, |c| c.open_time)
            .ok()
            .map(|i| &self.candles[i])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candle> {
        self.candles.iter()
    }

    pub fn into_vec(self) -> Vec<Candle> {
        self.candles
    }

    /// Row count and first/last open-time.
    pub fn stats(&self) -> SeriesStats {
        SeriesStats {
            rows: self.candles.len(),
            first: self.first().map(|c| c.open_time),
            last: self.last().map(|c| c.open_time),
        }
    }

    /// BLAKE3 over open-times and the little-endian bytes of every OHLCV field.
    ///
    /// Two series share a fingerprint exactly when they are byte-identical.
    pub fn fingerprint(&self) -> SeriesFingerprint {
        let mut hasher = blake3::Hasher::new();
        for c in &self.candles {
            hasher.update(&c.open_time.timestamp_millis().to_le_bytes());
            hasher.update(&c.open.to_le_bytes());
            hasher.update(&c.high.to_le_bytes());
            hasher.update(&c.low.to_le_bytes());
            hasher.update(&c.close.to_le_bytes());
            hasher.update(&c.volume.to_le_bytes());
        }
        SeriesFingerprint(hasher.finalize().to_hex().to_string())
    }
}

impl<'a> IntoIterator for &'a CandleSeries {
    type Item = &'a Candle;
    type IntoIter = std::slice::Iter<'a, Candle>;

    fn into_iter(self) -> Self::IntoIter {
        self.candles.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(hour: u32, close: f64) -> Candle {
        Candle {
            open_time: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 10.0,
        }
    }

    #[test]
    fn lookup_by_open_time() {
        let series = CandleSeries::from_sorted(vec![candle(0, 100.0), candle(1, 101.0)]);
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        assert_eq!(series.get(t).unwrap().close, 101.0);
        assert!(series
            .get(Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap())
            .is_none());
    }

    #[test]
    fn fingerprint_tracks_values() {
        let a = CandleSeries::from_sorted(vec![candle(0, 100.0), candle(1, 101.0)]);
        let b = CandleSeries::from_sorted(vec![candle(0, 100.0), candle(1, 101.0)]);
        let c = CandleSeries::from_sorted(vec![candle(0, 100.0), candle(1, 101.5)]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn stats_of_empty_series() {
        let stats = CandleSeries::empty().stats();
        assert_eq!(stats.rows, 0);
        assert!(stats.first.is_none());
    }

    #[test]
    fn sanity_check() {
        assert!(candle(0, 100.0).is_sane());
        let mut bad = candle(0, 100.0);
        bad.high = bad.low - 1.0;
        assert!(!bad.is_sane());
    }
}
