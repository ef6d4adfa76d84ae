//! Discovery descriptor written once by the process that creates a table.
//!
//! Late joiners read it to learn the segment name, capacity, record layout
//! and ordered symbol list before computing any offset into the segment.
//!
//! # Example (`market.meta.json`)
//!
//! ```json
//! {
//!   "segment": "market.seg",
//!   "capacity": 4,
//!   "schema": { "record_size": 24, "symbol_offset": 0, "symbol_len": 12,
//!               "price_offset": 16, "price_encoding": "f64le" },
//!   "symbols": ["AAPL", "MSFT", "GOOG", "AMZN"],
//!   "created_at_ms": 1760860800000
//! }
//! ```

use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};

use crate::{error::MfError, types::SYMBOL_LEN, types::Symbol};

/// Bytes per price record.
pub const RECORD_SIZE: usize = 24;
/// Offset of the NUL-padded symbol within a record.
pub const SYMBOL_OFFSET: usize = 0;
/// Offset of the little-endian `f64` price within a record.
pub const PRICE_OFFSET: usize = 16;

const PRICE_ENCODING: &str = "f64le";

/// Shape of one record in the segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub record_size: usize,
    pub symbol_offset: usize,
    pub symbol_len: usize,
    pub price_offset: usize,
    pub price_encoding: String,
}

impl RecordSchema {
    /// The layout compiled into this build.
    pub fn current() -> Self {
        Self {
            record_size: RECORD_SIZE,
            symbol_offset: SYMBOL_OFFSET,
            symbol_len: SYMBOL_LEN,
            price_offset: PRICE_OFFSET,
            price_encoding: PRICE_ENCODING.to_string(),
        }
    }
}

/// Externally persisted table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Segment file name, relative to the table directory.
    pub segment: String,
    /// Number of records in the segment.
    pub capacity: usize,
    pub schema: RecordSchema,
    /// Symbols in record order. May be shorter than `capacity`; the tail
    /// records are blank.
    pub symbols: Vec<String>,
    pub created_at_ms: u64,
}

impl TableDescriptor {
    /// Expected segment length in bytes.
    pub fn segment_len(&self) -> u64 {
        (self.capacity * self.schema.record_size) as u64
    }

    /// Read the descriptor at `path`.
    ///
    /// A missing file is reported as [`MfError::DescriptorMissing`] so callers
    /// can fail with a clear message instead of guessing a layout.
    pub fn load(path: &Path) -> Result<Self, MfError> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(MfError::DescriptorMissing(path.to_path_buf()));
            }
            Err(e) => return Err(MfError::Table(format!("read {}: {e}", path.display()))),
        };
        let desc: Self = serde_json::from_str(&content)
            .map_err(|e| MfError::SchemaMismatch(format!("unreadable descriptor {}: {e}", path.display())))?;
        desc.validate()?;
        Ok(desc)
    }

    /// Write the descriptor to `path` via a temporary file and rename, so
    /// readers never observe a half-written file.
    pub fn store(&self, path: &Path) -> Result<(), MfError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| MfError::Table(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| MfError::Table(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, path).map_err(|e| MfError::Table(format!("rename to {}: {e}", path.display())))?;
        Ok(())
    }

    /// Check that this build can safely interpret the described segment.
    pub fn validate(&self) -> Result<(), MfError> {
        let current = RecordSchema::current();
        if self.schema != current {
            return Err(MfError::SchemaMismatch(format!(
                "descriptor declares {:?}, this build uses {:?}",
                self.schema, current
            )));
        }
        if self.capacity == 0 || self.symbols.len() > self.capacity {
            return Err(MfError::CapacityMismatch {
                what: "descriptor symbols",
                expected: self.capacity as u64,
                actual: self.symbols.len() as u64,
            });
        }
        for s in &self.symbols {
            let sym = Symbol::new(s)?;
            if sym.as_str() != s {
                return Err(MfError::SchemaMismatch(format!("descriptor symbol {s:?} is not normalized")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TableDescriptor {
        TableDescriptor {
            segment: "market.seg".into(),
            capacity: 2,
            schema: RecordSchema::current(),
            symbols: vec!["AAPL".into(), "MSFT".into()],
            created_at_ms: 1,
        }
    }

    #[test]
    fn store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("market.meta.json");
        sample().store(&path).unwrap();
        assert_eq!(TableDescriptor::load(&path).unwrap(), sample());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_descriptor_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = TableDescriptor::load(&dir.path().join("nope.meta.json")).unwrap_err();
        assert!(matches!(err, MfError::DescriptorMissing(_)));
    }

    #[test]
    fn foreign_schema_rejected() {
        let mut desc = sample();
        desc.schema.price_encoding = "f32be".into();
        assert!(matches!(desc.validate(), Err(MfError::SchemaMismatch(_))));
    }

    #[test]
    fn too_many_symbols_rejected() {
        let mut desc = sample();
        desc.capacity = 1;
        assert!(matches!(desc.validate(), Err(MfError::CapacityMismatch { .. })));
    }
}
