//! Crossover strategy that trades on the shared price table.
//!
//! Prices come from polling the table; news sentiment comes from its own
//! gateway subscription. When the price and news signals agree and the
//! position differs, an order goes to the order sink. The position only
//! flips once the sink accepted the connection and the write.

use std::{path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use async_trait::async_trait;
use mf_core::{
    config::AppConfig,
    error::MfError,
    feed::{FeedClient, FeedConfig, FixedBackoff},
    service::Service,
    table::PriceTable,
    time_util,
    types::{Direction, OrderRecord, Symbol, Tick},
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    order_sink::submit_order,
    signal::{NewsSignal, PriceSignal, agreement},
};

const ORDER_TIMEOUT: Duration = Duration::from_secs(2);

/// Current exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Position {
    #[default]
    Flat,
    Long,
    Short,
}

impl Position {
    fn after(direction: Direction) -> Self {
        match direction {
            Direction::Buy => Self::Long,
            Direction::Sell => Self::Short,
        }
    }
}

/// Everything the strategy needs, resolved from config.
#[derive(Debug, Clone)]
pub struct StrategySettings {
    pub table_dir: PathBuf,
    pub table_name: String,
    /// `None` trades the table's first symbol.
    pub symbol: Option<String>,
    pub short: usize,
    pub long: usize,
    pub bullish: u8,
    pub bearish: u8,
    pub gateway_addr: String,
    pub order_sink_addr: String,
    pub poll_interval: Duration,
    pub order_size: u64,
    pub news_backoff: FixedBackoff,
}

impl StrategySettings {
    /// `symbol` (from the command line) overrides `strategy.symbol`.
    pub fn from_config(cfg: &AppConfig, symbol: Option<String>) -> Result<Self> {
        let s = &cfg.strategy;
        s.validate()?;
        Ok(Self {
            table_dir: cfg.table.effective_dir(),
            table_name: cfg.table.effective_name(),
            symbol: symbol.or_else(|| s.symbol.clone()),
            short: s.effective_short(),
            long: s.effective_long(),
            bullish: s.effective_bullish(),
            bearish: s.effective_bearish(),
            gateway_addr: s.effective_gateway_addr(),
            order_sink_addr: s.effective_order_sink_addr(),
            poll_interval: s.effective_poll_interval(),
            order_size: s.effective_order_size(),
            news_backoff: FixedBackoff::default(),
        })
    }
}

/// Signal state for one symbol over an attached table.
pub struct Strategy {
    table: PriceTable,
    symbol: Symbol,
    prices: PriceSignal,
    news: NewsSignal,
    position: Position,
    last_price: Option<f64>,
}

impl Strategy {
    /// Attach to the table. A missing table is fatal: the populator must run
    /// first.
    pub fn new(settings: &StrategySettings) -> Result<Self> {
        let table = PriceTable::attach(&settings.table_dir, &settings.table_name)?;
        let symbol = match &settings.symbol {
            Some(raw) => Symbol::new(raw)?,
            None => match table.symbols().first() {
                Some(first) => Symbol::new(first)?,
                None => bail!(MfError::Config("table has no symbols to trade".into())),
            },
        };
        if !table.symbols().iter().any(|s| s == symbol.as_str()) {
            bail!(MfError::Config(format!("{symbol} is not in table '{}'", settings.table_name)));
        }
        Ok(Self {
            table,
            symbol,
            prices: PriceSignal::new(settings.short, settings.long)?,
            news: NewsSignal::new(settings.bullish, settings.bearish),
            position: Position::Flat,
            last_price: None,
        })
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn on_sentiment(&mut self, sentiment: u8) {
        self.news.set(sentiment);
    }

    /// Sample the table once. Returns the order to place, if the signals
    /// agree on a direction the position does not already reflect.
    pub fn poll(&mut self) -> Result<Option<(Direction, f64)>, MfError> {
        if let Some(price) = self.table.read(&self.symbol)? {
            self.prices.push(price);
            self.last_price = Some(price);
        }
        let Some(direction) = agreement(self.prices.signal(), self.news.signal()) else {
            return Ok(None);
        };
        if Position::after(direction) == self.position {
            return Ok(None);
        }
        Ok(self.last_price.map(|price| (direction, price)))
    }

    /// Record a successfully submitted order.
    pub fn filled(&mut self, direction: Direction) {
        self.position = Position::after(direction);
    }
}

/// The strategy process.
pub struct StrategyService {
    settings: StrategySettings,
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl StrategyService {
    pub fn new(settings: StrategySettings) -> Self {
        Self { settings, shutdown: None, tasks: Vec::new() }
    }
}

#[async_trait]
impl Service for StrategyService {
    fn name(&self) -> &str {
        "strategy"
    }

    async fn start(&mut self) -> Result<()> {
        let strategy = Strategy::new(&self.settings)?;
        info!(
            "[strategy] trading {} (SMA {}/{}, news >{} / <{})",
            strategy.symbol(),
            self.settings.short,
            self.settings.long,
            self.settings.bullish,
            self.settings.bearish
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let (news_tx, news_rx) = watch::channel(None::<u8>);

        let feed = FeedClient::new(
            FeedConfig::new("feed-strategy", self.settings.gateway_addr.clone()),
            self.settings.news_backoff,
        );
        let feed_stop = stop_rx.clone();
        self.tasks.push(tokio::spawn(async move {
            let on_tick = move |tick: Tick| {
                if let Tick::News { sentiment } = tick {
                    debug!("[strategy] news sentiment {sentiment}");
                    news_tx.send_replace(Some(sentiment));
                }
            };
            if let Err(e) = feed.run(on_tick, feed_stop).await {
                error!("[feed-strategy] {e}");
            }
        }));

        self.tasks.push(tokio::spawn(trade_loop(
            strategy,
            news_rx,
            self.settings.order_sink_addr.clone(),
            self.settings.order_size,
            self.settings.poll_interval,
            stop_rx,
        )));
        self.shutdown = Some(stop_tx);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        for task in self.tasks.drain(..) {
            task.await?;
        }
        info!("[strategy] stopped");
        Ok(())
    }
}

async fn trade_loop(
    mut strategy: Strategy,
    news: watch::Receiver<Option<u8>>,
    order_sink_addr: String,
    order_size: u64,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            _ = ticker.tick() => {}
        }

        let latest = *news.borrow();
        if let Some(sentiment) = latest {
            strategy.on_sentiment(sentiment);
        }

        let (direction, price) = match strategy.poll() {
            Ok(Some(order)) => order,
            Ok(None) => continue,
            Err(e) => {
                warn!("[strategy] table read failed: {e}");
                continue;
            }
        };

        let symbol = strategy.symbol().as_str();
        let record = OrderRecord::new(direction, symbol, order_size as f64, price, time_util::now_secs_f64());
        match submit_order(&order_sink_addr, &record, ORDER_TIMEOUT).await {
            Ok(()) => {
                info!("[strategy] sent order {direction} {symbol} @ {price:.2}");
                strategy.filled(direction);
            }
            Err(e) => warn!("[strategy] failed to send order {direction} {symbol}: {e:#}"),
        }
    }
}
