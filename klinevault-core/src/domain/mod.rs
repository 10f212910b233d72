//! Domain types for KlineVault

pub mod candle;
pub mod ids;
pub mod market;
pub mod span;
pub mod symbol;
pub mod timeframe;

pub use candle::{Candle, CandleSeries, SeriesStats};
pub use ids::SeriesFingerprint;
pub use market::MarketType;
pub use span::DateSpan;
pub use symbol::SymbolSpec;
pub use timeframe::{TimeGrid, Timeframe};

use chrono::NaiveDate;
use thiserror::Error;

/// Errors raised while constructing domain values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("invalid range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("invalid date '{0}' (expected YYYY-MM-DD)")]
    InvalidDate(String),

    #[error("unknown timeframe '{0}'")]
    UnknownTimeframe(String),

    #[error("unknown market type '{0}' (expected spot, futures-usdt or futures-coin)")]
    UnknownMarketType(String),

    #[error("symbol must not be empty")]
    EmptySymbol,
}
