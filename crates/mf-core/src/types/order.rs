//! Order records exchanged between signal consumers and the order sink.
//!
//! One JSON object per frame, terminated by the feed delimiter. Older
//! producers sent the quantity as `qty`, newer ones as `size`; both are
//! named fields here and [`OrderRecord::quantity`] defines which one wins.

use serde::{Deserialize, Serialize};

use crate::error::MfError;

/// Buy or sell direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// A JSON number or a numeric string (`10` or `"10"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Number(f64),
    Text(String),
}

impl Numeric {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<f64> for Numeric {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

/// Wire schema of an order submission. Every field is optional so that a
/// partially filled record is still printed rather than rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Record kind; producers send `"ORDER"`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Legacy quantity field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qty: Option<Numeric>,
    /// Current quantity field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Numeric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Numeric>,
    /// Seconds since Unix epoch at submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl OrderRecord {
    /// Build a new-style order as sent by the strategy.
    pub fn new(direction: Direction, symbol: &str, size: f64, price: f64, timestamp: f64) -> Self {
        Self {
            kind: Some("ORDER".to_string()),
            side: Some(direction.to_string()),
            symbol: Some(symbol.to_string()),
            qty: None,
            size: Some(size.into()),
            price: Some(price.into()),
            timestamp: Some(timestamp),
        }
    }

    /// Parse one frame payload.
    pub fn from_json(payload: &[u8]) -> Result<Self, MfError> {
        serde_json::from_slice(payload).map_err(|e| MfError::Order(e.to_string()))
    }

    /// Serialize to the JSON payload (without delimiter).
    pub fn to_json(&self) -> Result<String, MfError> {
        serde_json::to_string(self).map_err(|e| MfError::Order(e.to_string()))
    }

    /// Effective quantity: `qty` when present, otherwise `size`.
    pub fn quantity(&self) -> Option<&Numeric> {
        self.qty.as_ref().or(self.size.as_ref())
    }

    /// Effective price; missing or unparsable prices read as `0.0`.
    pub fn effective_price(&self) -> f64 {
        self.price.as_ref().and_then(Numeric::as_f64).unwrap_or(0.0)
    }

    /// Upper-cased side, `"UNKNOWN"` when absent.
    pub fn effective_side(&self) -> String {
        self.side.as_deref().map(str::to_ascii_uppercase).unwrap_or_else(|| "UNKNOWN".to_string())
    }
}

impl std::fmt::Display for Numeric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}
