//! Market type classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DomainError;

/// Suffix carried by coin-margined perpetual symbols (e.g. `ETHUSD_PERP`).
const PERPETUAL_SUFFIX: &str = "_PERP";

/// Trading venue classification for an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarketType {
    Spot,
    FuturesUsdt,
    FuturesCoin,
}

impl MarketType {
    /// Infer the market type from a symbol name.
    ///
    /// Coin-margined perpetuals carry a `_PERP` suffix; everything else is
    /// assumed to be USDT-margined futures. Spot is never inferred, it must be
    /// requested explicitly.
    pub fn classify(symbol: &str) -> Self {
        if symbol.to_ascii_uppercase().ends_with(PERPETUAL_SUFFIX) {
            MarketType::FuturesCoin
        } else {
            MarketType::FuturesUsdt
        }
    }

    /// Path segment used by the archive host.
    pub fn remote_segment(&self) -> &'static str {
        match self {
            MarketType::Spot => "spot",
            MarketType::FuturesUsdt => "futures/um",
            MarketType::FuturesCoin => "futures/cm",
        }
    }

    /// Stable name used for local cache directories and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Spot => "spot",
            MarketType::FuturesUsdt => "futures-usdt",
            MarketType::FuturesCoin => "futures-coin",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spot" => Ok(MarketType::Spot),
            "futures-usdt" | "um" => Ok(MarketType::FuturesUsdt),
            "futures-coin" | "cm" => Ok(MarketType::FuturesCoin),
            other => Err(DomainError::UnknownMarketType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perpetual_suffix_is_coin_margined() {
        assert_eq!(MarketType::classify("ETHUSD_PERP"), MarketType::FuturesCoin);
        assert_eq!(MarketType::classify("btcusd_perp"), MarketType::FuturesCoin);
    }

    #[test]
    fn plain_symbol_defaults_to_usdt_futures() {
        assert_eq!(MarketType::classify("ETHUSDT"), MarketType::FuturesUsdt);
        assert_eq!(MarketType::classify("PERPUSDT"), MarketType::FuturesUsdt);
    }

    #[test]
    fn parse_and_display_agree() {
        for mt in [MarketType::Spot, MarketType::FuturesUsdt, MarketType::FuturesCoin] {
            assert_eq!(mt.to_string().parse::<MarketType>().unwrap(), mt);
        }
        assert!("options".parse::<MarketType>().is_err());
    }

    #[test]
    fn remote_segments() {
        assert_eq!(MarketType::Spot.remote_segment(), "spot");
        assert_eq!(MarketType::FuturesUsdt.remote_segment(), "futures/um");
        assert_eq!(MarketType::FuturesCoin.remote_segment(), "futures/cm");
    }
}
