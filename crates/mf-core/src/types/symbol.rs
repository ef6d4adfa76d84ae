//! Ticker symbols and their fixed-width table representation.
//!
//! Price records store symbols in a `[u8; SYMBOL_LEN]` slot so the shared
//! table has a fixed record size. [`Symbol`] is the validated, owned form
//! used everywhere else; it can only hold strings that fit the slot and that
//! cannot collide with the wire grammar (`TAG "," VALUE "*"`).

use std::fmt;

use crate::error::MfError;

/// Length of the fixed symbol slot in a price record.
pub const SYMBOL_LEN: usize = 12;

/// A validated, upper-case ticker symbol of at most [`SYMBOL_LEN`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(String);

impl Symbol {
    /// Normalize (trim + upper-case) and validate a symbol.
    pub fn new(raw: &str) -> Result<Self, MfError> {
        let s = raw.trim().to_ascii_uppercase();
        let reason = if s.is_empty() {
            Some("empty")
        } else if s.len() > SYMBOL_LEN {
            Some("longer than 12 bytes")
        } else if !s.bytes().all(|b| b.is_ascii_graphic() && b != b',' && b != crate::codec::DELIMITER) {
            Some("contains a reserved or non-printable byte")
        } else if s == crate::codec::NEWS_TAG {
            Some("reserved for news frames")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(MfError::InvalidSymbol { symbol: raw.to_string(), reason }),
            None => Ok(Self(s)),
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fixed-width, NUL-padded form stored in the shared table.
    #[inline]
    pub fn to_bytes(&self) -> [u8; SYMBOL_LEN] {
        symbol_to_bytes(&self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Symbol {
    type Err = MfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Copy a symbol string into a fixed `[u8; SYMBOL_LEN]` slot.
///
/// Remaining bytes are zero-filled; input longer than the slot is truncated.
#[inline]
pub fn symbol_to_bytes(s: &str) -> [u8; SYMBOL_LEN] {
    let mut buf = [0u8; SYMBOL_LEN];
    let len = s.len().min(SYMBOL_LEN);
    buf[..len].copy_from_slice(&s.as_bytes()[..len]);
    buf
}

/// Read a symbol back from a fixed slot, stopping at the first NUL.
///
/// Returns `""` for a blank slot or for bytes that are not valid UTF-8.
#[inline]
pub fn symbol_from_bytes(buf: &[u8]) -> &str {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    std::str::from_utf8(&buf[..end]).unwrap_or("")
}

/// Parse a comma-separated symbol list (`"aapl, msft"`), skipping blanks.
pub fn parse_symbol_list(list: &str) -> Result<Vec<Symbol>, MfError> {
    list.split(',').filter(|s| !s.trim().is_empty()).map(Symbol::new).collect()
}
