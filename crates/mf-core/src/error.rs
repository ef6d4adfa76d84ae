//! Typed error definitions for the market feed system.
//!
//! [`MfError`] covers the failures callers are expected to match on (a
//! missing descriptor, a schema mismatch, an unknown-symbol precondition).
//! Everything else travels as `anyhow::Error` at orchestration seams; all
//! variants implement `std::error::Error` via `thiserror`, so they convert
//! into `anyhow::Result` with `?`.

use std::path::PathBuf;

use thiserror::Error;

/// Domain-specific errors for the market feed system.
#[derive(Debug, Error)]
pub enum MfError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// A symbol failed validation (empty, too long, illegal bytes).
    #[error("invalid symbol {symbol:?}: {reason}")]
    InvalidSymbol { symbol: String, reason: &'static str },

    /// A price was negative or not finite.
    #[error("invalid price {0}")]
    InvalidPrice(f64),

    /// The discovery descriptor does not exist; the table cannot be attached.
    #[error("table descriptor {} not found; start the populator first", .0.display())]
    DescriptorMissing(PathBuf),

    /// The descriptor declares a record layout this build does not understand.
    #[error("table schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The segment or the caller disagrees with the descriptor's capacity.
    #[error("table capacity mismatch ({what}): expected {expected}, found {actual}")]
    CapacityMismatch { what: &'static str, expected: u64, actual: u64 },

    /// Segment creation, mapping, or access error.
    #[error("table error: {0}")]
    Table(String),

    /// Advisory lock acquisition or release error.
    #[error("table lock error on {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The reconnect loop gave up because its backoff policy ran out of attempts.
    #[error("feed {label}: gave up after {attempts} connect attempts")]
    RetriesExhausted { label: String, attempts: u32 },

    /// Order record parsing error.
    #[error("order parse error: {0}")]
    Order(String),
}
