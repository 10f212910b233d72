//! KlineVault Core: the pure half of the kline archive pipeline.
//!
//! Nothing in this crate blocks or touches the network:
//! - Domain types (symbols, market types, timeframes, date spans, candles)
//! - Range planning into daily and monthly archive references
//! - SHA-256 checksum verification
//! - Decoding of zipped kline CSVs
//! - Deterministic merging into one candle series
//! - Gap detection against the expected open-time grid

pub mod checksum;
pub mod decode;
pub mod domain;
pub mod gaps;
pub mod merge;
pub mod plan;

pub use checksum::{verify, ChecksumVerdict};
pub use decode::{decode_archive, DecodeError, DecodeStatus, DecodedArchive, RowError};
pub use domain::{
    Candle, CandleSeries, DateSpan, DomainError, MarketType, SymbolSpec, Timeframe,
};
pub use gaps::{detect_gaps, Gap, GapReport};
pub use merge::{merge, MergePolicy, MergeStats, Merged};
pub use plan::{plan, plan_range, plan_with_cutoff, ArchiveRef, Granularity, Period};
