//! Cross-process "last known price" table.
//!
//! A fixed-capacity array of `(symbol, price)` records in a memory-mapped
//! segment file. The first process to create the segment owns its layout and
//! writes a [`TableDescriptor`]; every later process attaches by reading that
//! descriptor. All access goes through the table's [`TableLock`].
//!
//! # Artifacts (per table `name` in directory `dir`)
//!
//! ```text
//! dir/
//! ├── <name>.seg        capacity × 24-byte records, mapped MAP_SHARED
//! ├── <name>.meta.json  TableDescriptor, written once at creation
//! └── <name>.lock       flock(2) target for the readers-writer discipline
//! ```
//!
//! # Record layout
//!
//! ```text
//! ┌──────────────────────┬──────────┬───────────────────┐
//! │ symbol [u8; 12] NUL  │ reserved │ price f64 LE      │
//! │ offset 0             │ 12..16   │ offset 16         │
//! └──────────────────────┴──────────┴───────────────────┘
//! ```
//!
//! Nothing here unlinks the artifacts on drop: they outlive the creating
//! process and are reused by the next `create_or_attach` with the same name.
//! [`PriceTable::unlink`] removes them explicitly.

pub mod descriptor;
pub mod lock;

use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use ahash::AHashSet;
use memmap2::MmapRaw;
use tracing::{debug, info};

pub use descriptor::{PRICE_OFFSET, RECORD_SIZE, RecordSchema, SYMBOL_OFFSET, TableDescriptor};
pub use lock::{LockGuard, LockMode, TableLock};

use crate::{
    error::MfError,
    time_util,
    types::{SYMBOL_LEN, Symbol, symbol_from_bytes},
};

/// Which side of the create/attach race this process landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// This process created and initialized the segment; it is the owner.
    Created,
    /// The segment already existed and was attached.
    Attached,
}

/// File locations of one table's artifacts.
#[derive(Debug, Clone)]
pub struct TablePaths {
    pub segment: PathBuf,
    pub descriptor: PathBuf,
    pub lock: PathBuf,
}

impl TablePaths {
    pub fn new(dir: &Path, name: &str) -> Result<Self, MfError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(MfError::Config(format!("invalid table name {name:?}")));
        }
        Ok(Self {
            segment: dir.join(format!("{name}.seg")),
            descriptor: dir.join(format!("{name}.meta.json")),
            lock: dir.join(format!("{name}.lock")),
        })
    }
}

/// A mapped price table. Cheap to share behind an `Arc`; every operation
/// takes the cross-process lock itself.
pub struct PriceTable {
    map: MmapRaw,
    /// Keeps the segment file open for the lifetime of the mapping.
    _file: File,
    lock: TableLock,
    descriptor: TableDescriptor,
    paths: TablePaths,
}

impl std::fmt::Debug for PriceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceTable")
            .field("segment", &self.paths.segment)
            .field("capacity", &self.descriptor.capacity)
            .field("symbols", &self.descriptor.symbols)
            .finish()
    }
}

impl PriceTable {
    /// Create the table, or attach to it if another process already did.
    ///
    /// On creation `symbols` is validated, every symbol's price starts at
    /// `0.0` and the descriptor is persisted. On attach, `symbols` is ignored
    /// entirely in favour of the descriptor's list, but `capacity` must match: a disagreement is a
    /// misconfiguration, not something to migrate.
    ///
    /// The whole call runs under the exclusive table lock, so concurrent
    /// callers see exactly one `Created` and the rest `Attached`, and no
    /// attacher can observe a half-initialized segment.
    pub fn create_or_attach(
        dir: &Path,
        name: &str,
        capacity: usize,
        symbols: &[Symbol],
    ) -> Result<(Self, Outcome), MfError> {
        let paths = TablePaths::new(dir, name)?;
        fs::create_dir_all(dir).map_err(|e| MfError::Table(format!("create {}: {e}", dir.display())))?;

        let lock = TableLock::open(&paths.lock)?;
        let _guard = lock.exclusive()?;

        let created = OpenOptions::new().read(true).write(true).create_new(true).open(&paths.segment);
        match created {
            Ok(file) => {
                let table = validate_layout(capacity, symbols)
                    .and_then(|()| Self::initialize(file, lock.clone(), paths.clone(), capacity, symbols))
                    .inspect_err(|_| {
                        // Leave no segment without a descriptor behind.
                        let _ = fs::remove_file(&paths.segment);
                        let _ = fs::remove_file(&paths.descriptor);
                    })?;
                info!(
                    "[table] created '{name}' at {} ({} symbols, capacity {capacity})",
                    paths.segment.display(),
                    symbols.len()
                );
                Ok((table, Outcome::Created))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let table = Self::map_existing(lock.clone(), paths)?;
                if table.capacity() != capacity {
                    return Err(MfError::CapacityMismatch {
                        what: "requested capacity",
                        expected: table.capacity() as u64,
                        actual: capacity as u64,
                    });
                }
                info!("[table] attached to existing '{name}' ({} symbols)", table.descriptor.symbols.len());
                Ok((table, Outcome::Attached))
            }
            Err(e) => Err(MfError::Table(format!("create {}: {e}", paths.segment.display()))),
        }
    }

    /// Attach to an existing table. Fails with
    /// [`MfError::DescriptorMissing`] if no process has created it yet.
    pub fn attach(dir: &Path, name: &str) -> Result<Self, MfError> {
        let paths = TablePaths::new(dir, name)?;
        if !paths.descriptor.exists() {
            return Err(MfError::DescriptorMissing(paths.descriptor));
        }
        let lock = TableLock::open(&paths.lock)?;
        let _guard = lock.shared()?;
        let table = Self::map_existing(lock.clone(), paths)?;
        info!("[table] attached to '{name}' ({} symbols)", table.descriptor.symbols.len());
        Ok(table)
    }

    /// Remove the segment, descriptor and lock artifacts of table `name`.
    ///
    /// Only safe while no other process is using the table: handles already
    /// mapped keep working on the orphaned segment, but they would lock a
    /// different lock file than newcomers. The next `create_or_attach`
    /// creates a fresh table.
    pub fn unlink(dir: &Path, name: &str) -> Result<(), MfError> {
        let paths = TablePaths::new(dir, name)?;
        for path in [&paths.segment, &paths.descriptor, &paths.lock] {
            match fs::remove_file(path) {
                Ok(()) => debug!("[table] removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(MfError::Table(format!("remove {}: {e}", path.display()))),
            }
        }
        Ok(())
    }

    /// Overwrite the price of `symbol`.
    ///
    /// Returns `Ok(false)` and leaves the table untouched when the symbol is
    /// not part of the frozen symbol set.
    pub fn update(&self, symbol: &Symbol, price: f64) -> Result<bool, MfError> {
        if !price.is_finite() || price < 0.0 {
            return Err(MfError::InvalidPrice(price));
        }
        let key = symbol.to_bytes();
        let _guard = self.lock.exclusive()?;
        match self.find(&key) {
            Some(slot) => {
                self.write_price(slot, price);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Latest price of `symbol`, or `None` if the symbol is not in the table.
    pub fn read(&self, symbol: &Symbol) -> Result<Option<f64>, MfError> {
        let key = symbol.to_bytes();
        let _guard = self.lock.shared()?;
        Ok(self.find(&key).map(|slot| self.read_price(slot)))
    }

    /// Every populated record, in table order, under a single shared hold.
    pub fn snapshot(&self) -> Result<Vec<(String, f64)>, MfError> {
        let _guard = self.lock.shared()?;
        Ok((0..self.capacity())
            .filter_map(|slot| {
                let sym = self.read_symbol(slot);
                let name = symbol_from_bytes(&sym);
                (!name.is_empty()).then(|| (name.to_string(), self.read_price(slot)))
            })
            .collect())
    }

    pub fn capacity(&self) -> usize {
        self.descriptor.capacity
    }

    /// Symbols in record order, as declared by the descriptor.
    pub fn symbols(&self) -> &[String] {
        &self.descriptor.symbols
    }

    pub fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    pub fn paths(&self) -> &TablePaths {
        &self.paths
    }

    // -----------------------------------------------------------------------
    // Setup
    // -----------------------------------------------------------------------

    fn initialize(
        file: File,
        lock: TableLock,
        paths: TablePaths,
        capacity: usize,
        symbols: &[Symbol],
    ) -> Result<Self, MfError> {
        let len = (capacity * RECORD_SIZE) as u64;
        file.set_len(len).map_err(|e| MfError::Table(format!("size segment: {e}")))?;
        let map = MmapRaw::map_raw(&file).map_err(|e| MfError::Table(format!("mmap failed: {e}")))?;

        let segment = file_name(&paths.segment);
        let descriptor = TableDescriptor {
            segment,
            capacity,
            schema: RecordSchema::current(),
            symbols: symbols.iter().map(|s| s.as_str().to_string()).collect(),
            created_at_ms: time_util::now_ms(),
        };

        let table = Self { map, _file: file, lock, descriptor, paths };
        for slot in 0..capacity {
            let sym = symbols.get(slot).map(Symbol::to_bytes).unwrap_or([0; SYMBOL_LEN]);
            table.write_symbol(slot, &sym);
            table.write_price(slot, 0.0);
        }
        table.map.flush().map_err(|e| MfError::Table(format!("flush segment: {e}")))?;
        table.descriptor.store(&table.paths.descriptor)?;
        Ok(table)
    }

    /// Map a segment created earlier. The caller holds the table lock.
    fn map_existing(lock: TableLock, paths: TablePaths) -> Result<Self, MfError> {
        let descriptor = TableDescriptor::load(&paths.descriptor)?;
        let segment = file_name(&paths.segment);
        if descriptor.segment != segment {
            return Err(MfError::SchemaMismatch(format!(
                "descriptor names segment {:?}, expected {segment:?}",
                descriptor.segment
            )));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&paths.segment)
            .map_err(|e| MfError::Table(format!("open {}: {e}", paths.segment.display())))?;

        let actual = file.metadata().map_err(|e| MfError::Table(format!("stat segment: {e}")))?.len();
        if actual != descriptor.segment_len() {
            return Err(MfError::CapacityMismatch {
                what: "segment bytes",
                expected: descriptor.segment_len(),
                actual,
            });
        }
        let map = MmapRaw::map_raw(&file).map_err(|e| MfError::Table(format!("mmap failed: {e}")))?;
        let table = Self { map, _file: file, lock, descriptor, paths };

        for slot in 0..table.capacity() {
            let expected = table.descriptor.symbols.get(slot).map(String::as_str).unwrap_or("");
            let sym = table.read_symbol(slot);
            let found = symbol_from_bytes(&sym);
            if found != expected {
                return Err(MfError::SchemaMismatch(format!(
                    "record {slot} holds {found:?}, descriptor declares {expected:?}"
                )));
            }
        }
        Ok(table)
    }

    // -----------------------------------------------------------------------
    // Raw record access. Callers hold the table lock.
    // -----------------------------------------------------------------------

    fn find(&self, key: &[u8; SYMBOL_LEN]) -> Option<usize> {
        (0..self.capacity()).find(|&slot| &self.read_symbol(slot) == key)
    }

    #[inline]
    fn record_ptr(&self, slot: usize, offset: usize) -> *mut u8 {
        debug_assert!(slot < self.capacity());
        // SAFETY: slot < capacity and the mapping is capacity * RECORD_SIZE
        // bytes (checked against the file length when mapping).
        unsafe { self.map.as_mut_ptr().add(slot * RECORD_SIZE + offset) }
    }

    fn read_symbol(&self, slot: usize) -> [u8; SYMBOL_LEN] {
        let mut out = [0u8; SYMBOL_LEN];
        // SAFETY: the source range lies inside the mapping (see record_ptr).
        unsafe { std::ptr::copy_nonoverlapping(self.record_ptr(slot, SYMBOL_OFFSET), out.as_mut_ptr(), SYMBOL_LEN) };
        out
    }

    fn write_symbol(&self, slot: usize, sym: &[u8; SYMBOL_LEN]) {
        // SAFETY: the destination range lies inside the mapping.
        unsafe { std::ptr::copy_nonoverlapping(sym.as_ptr(), self.record_ptr(slot, SYMBOL_OFFSET), SYMBOL_LEN) };
    }

    fn read_price(&self, slot: usize) -> f64 {
        let mut raw = [0u8; 8];
        // SAFETY: the source range lies inside the mapping.
        unsafe { std::ptr::copy_nonoverlapping(self.record_ptr(slot, PRICE_OFFSET), raw.as_mut_ptr(), 8) };
        f64::from_le_bytes(raw)
    }

    fn write_price(&self, slot: usize, price: f64) {
        let raw = price.to_le_bytes();
        // SAFETY: the destination range lies inside the mapping.
        unsafe { std::ptr::copy_nonoverlapping(raw.as_ptr(), self.record_ptr(slot, PRICE_OFFSET), 8) };
    }
}

fn validate_layout(capacity: usize, symbols: &[Symbol]) -> Result<(), MfError> {
    if symbols.is_empty() {
        return Err(MfError::Config("a price table needs at least one symbol".into()));
    }
    if symbols.len() > capacity {
        return Err(MfError::CapacityMismatch {
            what: "symbols for capacity",
            expected: capacity as u64,
            actual: symbols.len() as u64,
        });
    }
    let mut seen = AHashSet::with_capacity(symbols.len());
    for s in symbols {
        if !seen.insert(s.as_str()) {
            return Err(MfError::Config(format!("duplicate symbol {s}")));
        }
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn syms(list: &[&str]) -> Vec<Symbol> {
        list.iter().map(|s| Symbol::new(s).unwrap()).collect()
    }

    fn sym(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    #[test]
    fn create_then_read_and_update() {
        let dir = tempfile::tempdir().unwrap();
        let (table, outcome) = PriceTable::create_or_attach(dir.path(), "mkt", 2, &syms(&["AAPL", "MSFT"])).unwrap();
        assert_eq!(outcome, Outcome::Created);
        assert_eq!(table.read(&sym("AAPL")).unwrap(), Some(0.0));

        assert!(table.update(&sym("AAPL"), 172.53).unwrap());
        assert_eq!(table.read(&sym("AAPL")).unwrap(), Some(172.53));
        assert_eq!(table.read(&sym("MSFT")).unwrap(), Some(0.0));
        assert_eq!(table.read(&sym("GOOG")).unwrap(), None);
    }

    #[test]
    fn unknown_symbol_never_grows_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let (table, _) = PriceTable::create_or_attach(dir.path(), "mkt", 3, &syms(&["AAPL", "MSFT"])).unwrap();
        table.update(&sym("MSFT"), 10.0).unwrap();
        let before = table.snapshot().unwrap();

        assert!(!table.update(&sym("TSLA"), 99.0).unwrap());
        assert_eq!(table.snapshot().unwrap(), before);
        assert_eq!(table.capacity(), 3);
        assert_eq!(table.read(&sym("TSLA")).unwrap(), None);
    }

    #[test]
    fn second_caller_attaches_and_sees_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (a, first) = PriceTable::create_or_attach(dir.path(), "mkt", 1, &syms(&["X"])).unwrap();
        let (b, second) = PriceTable::create_or_attach(dir.path(), "mkt", 1, &syms(&["IGNORED"])).unwrap();
        assert_eq!((first, second), (Outcome::Created, Outcome::Attached));
        assert_eq!(b.symbols(), ["X"]);

        a.update(&sym("X"), 100.0).unwrap();
        assert_eq!(b.read(&sym("X")).unwrap(), Some(100.0));
    }

    #[test]
    fn concurrent_create_yields_exactly_one_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    PriceTable::create_or_attach(&path, "race", 2, &syms(&["A", "B"])).map(|(_, o)| o)
                })
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|o| **o == Outcome::Created).count(), 1);
        assert_eq!(outcomes.iter().filter(|o| **o == Outcome::Attached).count(), 7);
    }

    #[test]
    fn attach_without_descriptor_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = PriceTable::attach(dir.path(), "missing").unwrap_err();
        assert!(matches!(err, MfError::DescriptorMissing(_)));
    }

    #[test]
    fn capacity_disagreement_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        PriceTable::create_or_attach(dir.path(), "mkt", 2, &syms(&["A", "B"])).unwrap();
        let err = PriceTable::create_or_attach(dir.path(), "mkt", 3, &syms(&["A", "B"])).unwrap_err();
        assert!(matches!(err, MfError::CapacityMismatch { .. }));
    }

    #[test]
    fn truncated_segment_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (table, _) = PriceTable::create_or_attach(dir.path(), "mkt", 2, &syms(&["A", "B"])).unwrap();
        let seg = table.paths().segment.clone();
        drop(table);
        OpenOptions::new().write(true).open(&seg).unwrap().set_len(RECORD_SIZE as u64).unwrap();
        assert!(matches!(PriceTable::attach(dir.path(), "mkt"), Err(MfError::CapacityMismatch { .. })));
    }

    #[test]
    fn rejects_bad_layouts() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PriceTable::create_or_attach(dir.path(), "a", 1, &[]).is_err());
        assert!(PriceTable::create_or_attach(dir.path(), "b", 1, &syms(&["A", "B"])).is_err());
        assert!(PriceTable::create_or_attach(dir.path(), "c", 2, &syms(&["A", "a"])).is_err());
        assert!(PriceTable::create_or_attach(dir.path(), "../d", 1, &syms(&["A"])).is_err());
        assert!(!dir.path().join("c.seg").exists());
    }

    #[test]
    fn attach_ignores_requested_symbols() {
        let dir = tempfile::tempdir().unwrap();
        PriceTable::create_or_attach(dir.path(), "t", 1, &syms(&["X"])).unwrap();

        let (empty, outcome) = PriceTable::create_or_attach(dir.path(), "t", 1, &[]).unwrap();
        assert_eq!(outcome, Outcome::Attached);
        assert_eq!(empty.symbols(), ["X"]);

        let (longer, outcome) = PriceTable::create_or_attach(dir.path(), "t", 1, &syms(&["A", "B"])).unwrap();
        assert_eq!(outcome, Outcome::Attached);
        assert_eq!(longer.symbols(), ["X"]);
    }

    #[test]
    fn descriptor_naming_another_segment_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (table, _) = PriceTable::create_or_attach(dir.path(), "mkt", 1, &syms(&["A"])).unwrap();
        let meta = table.paths().descriptor.clone();
        drop(table);

        let mut descriptor = TableDescriptor::load(&meta).unwrap();
        descriptor.segment = "other.seg".into();
        descriptor.store(&meta).unwrap();
        assert!(matches!(PriceTable::attach(dir.path(), "mkt"), Err(MfError::SchemaMismatch(_))));
    }

    #[test]
    fn invalid_price_rejected_before_locking() {
        let dir = tempfile::tempdir().unwrap();
        let (table, _) = PriceTable::create_or_attach(dir.path(), "mkt", 1, &syms(&["A"])).unwrap();
        assert!(matches!(table.update(&sym("A"), -1.0), Err(MfError::InvalidPrice(_))));
        assert!(matches!(table.update(&sym("A"), f64::NAN), Err(MfError::InvalidPrice(_))));
        // Lock was never taken, so a write still goes through.
        assert!(table.update(&sym("A"), 1.0).unwrap());
    }

    #[test]
    fn unlink_allows_fresh_create() {
        let dir = tempfile::tempdir().unwrap();
        let (table, _) = PriceTable::create_or_attach(dir.path(), "mkt", 1, &syms(&["A"])).unwrap();
        table.update(&sym("A"), 5.0).unwrap();
        drop(table);

        PriceTable::unlink(dir.path(), "mkt").unwrap();
        let (fresh, outcome) = PriceTable::create_or_attach(dir.path(), "mkt", 1, &syms(&["B"])).unwrap();
        assert_eq!(outcome, Outcome::Created);
        assert_eq!(fresh.symbols(), ["B"]);
        // Unlinking twice is fine.
        PriceTable::unlink(dir.path(), "mkt").unwrap();
        PriceTable::unlink(dir.path(), "mkt").unwrap();
    }

    #[test]
    fn no_torn_reads_under_contention() {
        const A: f64 = 1111.11;
        const B: f64 = 98765.4321;

        let dir = tempfile::tempdir().unwrap();
        let (table, _) = PriceTable::create_or_attach(dir.path(), "mkt", 1, &syms(&["X"])).unwrap();
        let table = Arc::new(table);
        let x = sym("X");

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let t = Arc::clone(&table);
                let x = x.clone();
                std::thread::spawn(move || {
                    for n in 0..500 {
                        let v = if (i + n) % 2 == 0 { A } else { B };
                        assert!(t.update(&x, v).unwrap());
                    }
                })
            })
            .collect();

        // A second, independently attached handle reads like another process would.
        let reader_table = Arc::new(PriceTable::attach(dir.path(), "mkt").unwrap());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let t = Arc::clone(&reader_table);
                let x = x.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let v = t.read(&x).unwrap().unwrap();
                        assert!(v == 0.0 || v == A || v == B, "torn read: {v}");
                    }
                })
            })
            .collect();

        for h in writers.into_iter().chain(readers) {
            h.join().unwrap();
        }
    }
}
