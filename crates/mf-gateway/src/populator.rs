//! Feed-to-table bridge.
//!
//! ```text
//! gateway ──TCP──► FeedClient (tokio) ──crossbeam──► table writer (blocking thread) ──► PriceTable
//! ```
//!
//! The populator is the only process that creates the price table; its
//! `Created` outcome makes it the table's owner. Everything else attaches.

use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use crossbeam_channel::TrySendError;
use mf_core::{
    config::AppConfig,
    feed::{FeedClient, FeedConfig, FixedBackoff},
    service::Service,
    table::{Outcome, PriceTable},
    types::{Symbol, Tick},
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, info, warn};

use crate::writer::{WriterStats, run_table_writer};

/// Depth of the feed-to-writer channel.
const WRITER_QUEUE: usize = 8192;

/// Everything the populator needs, resolved from config.
#[derive(Debug, Clone)]
pub struct PopulatorSettings {
    pub gateway_addr: String,
    pub read_timeout: Duration,
    pub backoff: FixedBackoff,
    pub table_dir: PathBuf,
    pub table_name: String,
    pub capacity: usize,
    pub symbols: Vec<Symbol>,
    pub cpu_core: Option<i32>,
    /// Unlink leftover table artifacts before creating.
    pub fresh: bool,
}

impl PopulatorSettings {
    /// The table's symbol set is the gateway's universe.
    pub fn from_config(cfg: &AppConfig, fresh: bool) -> Result<Self> {
        let symbols = cfg.gateway.effective_symbols()?;
        let p = &cfg.populator;
        Ok(Self {
            gateway_addr: p.effective_gateway_addr(),
            read_timeout: p.effective_read_timeout(),
            backoff: FixedBackoff { delay: p.effective_backoff(), max_attempts: p.max_attempts },
            table_dir: cfg.table.effective_dir(),
            table_name: cfg.table.effective_name(),
            capacity: cfg.table.effective_capacity(symbols.len()),
            symbols,
            cpu_core: p.cpu_core,
            fresh,
        })
    }
}

/// Create (or reuse) the table described by `settings`.
pub fn open_table(settings: &PopulatorSettings) -> Result<(PriceTable, Outcome)> {
    if settings.fresh {
        PriceTable::unlink(&settings.table_dir, &settings.table_name)?;
        info!("[populator] removed previous '{}' artifacts", settings.table_name);
    }
    let (table, outcome) =
        PriceTable::create_or_attach(&settings.table_dir, &settings.table_name, settings.capacity, &settings.symbols)?;
    if outcome == Outcome::Attached {
        let missing: Vec<&str> = settings
            .symbols
            .iter()
            .filter(|s| !table.symbols().iter().any(|t| t == s.as_str()))
            .map(Symbol::as_str)
            .collect();
        if !missing.is_empty() {
            warn!("[populator] reused table has no slot for {missing:?}; run with --fresh to rebuild it");
        }
    }
    Ok((table, outcome))
}

/// The populator process.
pub struct PopulatorService {
    settings: PopulatorSettings,
    outcome: Option<Outcome>,
    shutdown: Option<watch::Sender<bool>>,
    feed_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<WriterStats>>,
}

impl PopulatorService {
    pub fn new(settings: PopulatorSettings) -> Self {
        Self { settings, outcome: None, shutdown: None, feed_task: None, writer_task: None }
    }

    /// How the table was obtained, available after `start`.
    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }
}

#[async_trait]
impl Service for PopulatorService {
    fn name(&self) -> &str {
        "populator"
    }

    async fn start(&mut self) -> Result<()> {
        let (table, outcome) = open_table(&self.settings)?;
        match outcome {
            Outcome::Created => info!("[populator] owns table '{}'", self.settings.table_name),
            Outcome::Attached => info!("[populator] reusing table '{}'", self.settings.table_name),
        }
        self.outcome = Some(outcome);

        let (tx, rx) = crossbeam_channel::bounded::<(Symbol, f64)>(WRITER_QUEUE);
        let cpu_core = self.settings.cpu_core;
        self.writer_task =
            Some(tokio::task::spawn_blocking(move || run_table_writer("populator", rx, &table, cpu_core)));

        let mut feed = FeedConfig::new("feed-populator", self.settings.gateway_addr.clone());
        feed.read_timeout = self.settings.read_timeout;
        let client = FeedClient::new(feed, self.settings.backoff);

        let on_tick = move |tick: Tick| {
            if let Tick::Price { symbol, price } = tick {
                match tx.try_send((symbol, price)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => warn!("[feed-populator] writer queue full, tick dropped"),
                    Err(TrySendError::Disconnected(_)) => {}
                }
            }
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        self.feed_task = Some(tokio::spawn(async move {
            if let Err(e) = client.run(on_tick, stop_rx).await {
                error!("[feed-populator] {e}");
            }
        }));
        self.shutdown = Some(stop_tx);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        // The feed task owns the channel sender; the writer drains and exits
        // once it is gone.
        if let Some(task) = self.feed_task.take() {
            task.await?;
        }
        if let Some(task) = self.writer_task.take() {
            let stats = task.await?;
            info!("[populator] stopped ({} prices applied)", stats.applied);
        }
        Ok(())
    }
}
