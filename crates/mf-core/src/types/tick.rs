//! Market data units carried on the feed.

use std::fmt;

use super::symbol::Symbol;

/// Highest valid news sentiment; 50 is neutral.
pub const MAX_SENTIMENT: u8 = 100;

/// One unit of market data: a price update or a news sentiment value.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    Price { symbol: Symbol, price: f64 },
    News { sentiment: u8 },
}

impl Tick {
    pub fn price(symbol: Symbol, price: f64) -> Self {
        Self::Price { symbol, price }
    }

    pub fn news(sentiment: u8) -> Self {
        Self::News { sentiment }
    }

    pub fn is_news(&self) -> bool {
        matches!(self, Self::News { .. })
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Price { symbol, price } => write!(f, "Price({symbol} {price:.2})"),
            Self::News { sentiment } => write!(f, "News({sentiment})"),
        }
    }
}
