//! SymbolSpec: which series is being collected.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{DomainError, MarketType, Timeframe};

/// Symbol, market and timeframe of one series. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSymbolSpec", into = "RawSymbolSpec")]
pub struct SymbolSpec {
    symbol: String,
    market: MarketType,
    timeframe: Timeframe,
}

#[derive(Serialize, Deserialize)]
struct RawSymbolSpec {
    symbol: String,
    market: MarketType,
    timeframe: Timeframe,
}

impl TryFrom<RawSymbolSpec> for SymbolSpec {
    type Error = DomainError;

    fn try_from(raw: RawSymbolSpec) -> Result<Self, Self::Error> {
        SymbolSpec::new(&raw.symbol, raw.market, raw.timeframe)
    }
}

impl From<SymbolSpec> for RawSymbolSpec {
    fn from(spec: SymbolSpec) -> Self {
        RawSymbolSpec {
            symbol: spec.symbol,
            market: spec.market,
            timeframe: spec.timeframe,
        }
    }
}

impl SymbolSpec {
    /// Build a spec with an explicit market type. The symbol is upper-cased.
    pub fn new(
        symbol: &str,
        market: MarketType,
        timeframe: Timeframe,
    ) -> Result<Self, DomainError> {
        let symbol = symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(DomainError::EmptySymbol);
        }
        Ok(Self {
            symbol,
            market,
            timeframe,
        })
    }

    /// Build a spec, inferring the market type from the symbol name.
    pub fn inferred(symbol: &str, timeframe: Timeframe) -> Result<Self, DomainError> {
        Self::new(symbol, MarketType::classify(symbol), timeframe)
    }

    /// Upper-cased exchange symbol, e.g. `ETHUSDT`.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn market(&self) -> MarketType {
        self.market
    }

    /// Candle width of the series.
    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }
}

impl fmt::Display for SymbolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.market, self.symbol, self.timeframe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_is_normalized() {
        let spec = SymbolSpec::new(" ethusdt ", MarketType::Spot, Timeframe::H1).unwrap();
        assert_eq!(spec.symbol(), "ETHUSDT");
        assert_eq!(spec.to_string(), "spot:ETHUSDT@1h");
    }

    #[test]
    fn empty_symbol_rejected() {
        assert!(matches!(
            SymbolSpec::new("  ", MarketType::Spot, Timeframe::H1),
            Err(DomainError::EmptySymbol)
        ));
    }

    #[test]
    fn deserialization_goes_through_constructor() {
        let spec: SymbolSpec =
            serde_json::from_str(r#"{"symbol":" ethusdt","market":"spot","timeframe":"1h"}"#)
                .unwrap();
        assert_eq!(spec.symbol(), "ETHUSDT");
        assert!(
            serde_json::from_str::<SymbolSpec>(r#"{"symbol":"","market":"spot","timeframe":"1h"}"#)
                .is_err()
        );

        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(serde_json::from_str::<SymbolSpec>(&json).unwrap(), spec);
    }

    #[test]
    fn inferred_market_for_perpetual() {
        let spec = SymbolSpec::inferred("ethusd_perp", Timeframe::M15).unwrap();
        assert_eq!(spec.market(), MarketType::FuturesCoin);
        assert_eq!(spec.symbol(), "ETHUSD_PERP");
    }
}
