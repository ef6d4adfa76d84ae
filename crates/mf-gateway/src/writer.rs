//! Table writer loop that runs on a dedicated blocking thread.
//!
//! Receives price updates from the feed task over a crossbeam channel and
//! applies them with [`PriceTable::update`]. Lock waits happen here, never on
//! the tokio reactor.

use ahash::AHashSet;
use crossbeam_channel::Receiver;
use mf_core::{cpu_affinity, table::PriceTable, types::Symbol};
use tracing::{debug, info, warn};

/// Counters reported when the channel closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub applied: u64,
    /// Symbols outside the table's frozen set.
    pub unknown: u64,
    pub failed: u64,
}

/// Apply updates from `rx` until every sender is dropped.
///
/// If `cpu_core` is `Some`, the thread is pinned before the loop starts.
pub fn run_table_writer(
    label: &str,
    rx: Receiver<(Symbol, f64)>,
    table: &PriceTable,
    cpu_core: Option<i32>,
) -> WriterStats {
    cpu_affinity::maybe_bind(cpu_core);
    let mut stats = WriterStats::default();
    let mut unknown = AHashSet::new();

    info!("[{label}] table writer started");

    while let Ok((symbol, price)) = rx.recv() {
        match table.update(&symbol, price) {
            Ok(true) => stats.applied += 1,
            Ok(false) => {
                stats.unknown += 1;
                if unknown.insert(symbol.clone()) {
                    warn!("[{label}] {symbol} is not in the table, its updates are ignored");
                } else {
                    debug!("[{label}] {symbol} is not in the table, ignored");
                }
            }
            Err(e) => {
                stats.failed += 1;
                warn!("[{label}] update {symbol} -> {price} failed: {e}");
            }
        }
    }

    info!(
        "[{label}] table writer exited ({} applied, {} unknown, {} failed)",
        stats.applied, stats.unknown, stats.failed
    );
    stats
}
