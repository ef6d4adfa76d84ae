//! Configuration parsing for the market feed processes.
//!
//! Every process reads the same JSON file and picks the section for its role.
//! All sections and all fields are optional; defaults are resolved by the
//! `effective_*` accessors so an empty object (`{}`) is a valid config.
//!
//! # Example config
//!
//! ```json
//! {
//!   "log": { "module_name": "mf", "log_path": "/tmp/log", "format": "json" },
//!   "gateway": {
//!     "port": 9999,
//!     "initial_prices_csv": "prices.csv",
//!     "interval_ms": 1000,
//!     "news_interval_ms": 5000,
//!     "sigma": 0.0015
//!   },
//!   "table": { "dir": "/dev/shm/mf", "name": "market", "capacity": 16 },
//!   "populator": { "gateway_addr": "127.0.0.1:9999", "backoff_ms": 2000, "cpu_core": 3 },
//!   "strategy": { "symbol": "AAPL", "short": 5, "long": 20 },
//!   "order_sink": { "port": 10000 }
//! }
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

use crate::{error::MfError, logging::LogFormat, types::Symbol};

/// Symbols the gateway simulates when neither a list nor a CSV is configured.
pub const DEFAULT_SYMBOLS: [&str; 4] = ["AAPL", "MSFT", "GOOG", "AMZN"];

/// Starting price for a configured symbol that the CSV does not mention.
pub const CSV_FALLBACK_PRICE: f64 = 100.0;

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log: LogConfig,
    pub gateway: GatewayConfig,
    pub table: TableConfig,
    pub populator: PopulatorConfig,
    pub strategy: StrategyConfig,
    pub order_sink: OrderSinkConfig,
}

/// Logging metadata block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// Log file prefix; the runner falls back to the subcommand name.
    pub module_name: Option<String>,
    pub log_path: Option<String>,
    pub format: Option<LogFormat>,
}

impl LogConfig {
    pub fn effective_format(&self) -> LogFormat {
        self.format.unwrap_or_default()
    }
}

/// Price and news broadcaster.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Explicit symbol list. Takes precedence over the CSV's symbol column.
    pub symbols: Option<Vec<String>>,
    /// `SYMBOL,PRICE` rows with starting prices.
    #[serde(alias = "csv")]
    pub initial_prices_csv: Option<PathBuf>,
    #[serde(alias = "interval")]
    pub interval_ms: Option<u64>,
    #[serde(alias = "news_interval")]
    pub news_interval_ms: Option<u64>,
    /// Standard deviation of the relative per-cycle price change.
    pub sigma: Option<f64>,
    pub floor: Option<f64>,
    /// Decimal places kept after each update.
    pub precision: Option<u32>,
    /// Per-subscriber send timeout. Unset means a stalled subscriber stalls the pass.
    pub send_timeout_ms: Option<u64>,
    /// Log fan-out latency stats every N emission cycles (0 disables).
    pub latency_report_cycles: Option<u64>,
}

impl GatewayConfig {
    pub fn effective_bind_addr(&self) -> String {
        format!("{}:{}", self.host.as_deref().unwrap_or("0.0.0.0"), self.port.unwrap_or(9999))
    }

    pub fn effective_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.unwrap_or(1_000))
    }

    pub fn effective_news_interval(&self) -> Duration {
        Duration::from_millis(self.news_interval_ms.unwrap_or(5_000))
    }

    pub fn effective_sigma(&self) -> f64 {
        self.sigma.unwrap_or(0.0015)
    }

    pub fn effective_floor(&self) -> f64 {
        self.floor.unwrap_or(0.01)
    }

    pub fn effective_precision(&self) -> u32 {
        self.precision.unwrap_or(2)
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout_ms.map(Duration::from_millis)
    }

    pub fn effective_latency_report_cycles(&self) -> u64 {
        self.latency_report_cycles.unwrap_or(60)
    }

    /// Resolve the simulated universe: each symbol with its starting price,
    /// or `None` when the gateway should pick one at random.
    ///
    /// - `symbols` set, CSV set: CSV prices, [`CSV_FALLBACK_PRICE`] for gaps.
    /// - `symbols` set, no CSV: random starting prices.
    /// - CSV only: every CSV row, in file order.
    /// - neither: [`DEFAULT_SYMBOLS`] at random prices.
    pub fn resolve_universe(&self) -> anyhow::Result<Vec<(Symbol, Option<f64>)>> {
        let csv_prices = match &self.initial_prices_csv {
            Some(path) => Some(load_initial_prices(path)?),
            None => None,
        };

        let universe = match (&self.symbols, csv_prices) {
            (Some(list), csv) => {
                let mut out = Vec::with_capacity(list.len());
                for raw in list {
                    let sym = Symbol::new(raw)?;
                    let price = csv.as_ref().map(|rows| {
                        rows.iter().find(|(s, _)| *s == sym).map_or(CSV_FALLBACK_PRICE, |(_, p)| *p)
                    });
                    out.push((sym, price));
                }
                out
            }
            (None, Some(rows)) => rows.into_iter().map(|(s, p)| (s, Some(p))).collect(),
            (None, None) => {
                DEFAULT_SYMBOLS.iter().map(|s| Symbol::new(s).map(|s| (s, None))).collect::<Result<_, _>>()?
            }
        };

        if universe.is_empty() {
            return Err(MfError::Config("gateway symbol universe is empty".into()).into());
        }
        Ok(universe)
    }

    /// Just the symbols of [`resolve_universe`](Self::resolve_universe).
    pub fn effective_symbols(&self) -> anyhow::Result<Vec<Symbol>> {
        Ok(self.resolve_universe()?.into_iter().map(|(s, _)| s).collect())
    }
}

/// Location and size of the shared price table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableConfig {
    pub dir: Option<PathBuf>,
    pub name: Option<String>,
    /// Record slots; defaults to the number of symbols.
    pub capacity: Option<usize>,
}

impl TableConfig {
    pub fn effective_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn effective_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "market".to_string())
    }

    pub fn effective_capacity(&self, symbol_count: usize) -> usize {
        self.capacity.unwrap_or(symbol_count)
    }
}

/// Feed consumer that writes prices into the table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PopulatorConfig {
    pub gateway_addr: Option<String>,
    pub read_timeout_ms: Option<u64>,
    pub backoff_ms: Option<u64>,
    /// Give up after this many consecutive failures. Unset retries forever.
    pub max_attempts: Option<u32>,
    /// Pin the table writer thread to this core.
    #[serde(alias = "cpu_affinity")]
    pub cpu_core: Option<i32>,
}

impl PopulatorConfig {
    pub fn effective_gateway_addr(&self) -> String {
        self.gateway_addr.clone().unwrap_or_else(|| "127.0.0.1:9999".to_string())
    }

    pub fn effective_read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.unwrap_or(5_000))
    }

    pub fn effective_backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms.unwrap_or(2_000))
    }
}

/// Crossover strategy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrategyConfig {
    /// Traded symbol; defaults to the first symbol in the table.
    pub symbol: Option<String>,
    pub short: Option<usize>,
    pub long: Option<usize>,
    pub bullish: Option<u8>,
    pub bearish: Option<u8>,
    pub gateway_addr: Option<String>,
    #[serde(alias = "order_manager_addr")]
    pub order_sink_addr: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub order_size: Option<u64>,
}

impl StrategyConfig {
    pub fn effective_short(&self) -> usize {
        self.short.unwrap_or(5)
    }

    pub fn effective_long(&self) -> usize {
        self.long.unwrap_or(20)
    }

    pub fn effective_bullish(&self) -> u8 {
        self.bullish.unwrap_or(60)
    }

    pub fn effective_bearish(&self) -> u8 {
        self.bearish.unwrap_or(40)
    }

    pub fn effective_gateway_addr(&self) -> String {
        self.gateway_addr.clone().unwrap_or_else(|| "127.0.0.1:9999".to_string())
    }

    pub fn effective_order_sink_addr(&self) -> String {
        self.order_sink_addr.clone().unwrap_or_else(|| "127.0.0.1:10000".to_string())
    }

    pub fn effective_poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(500))
    }

    pub fn effective_order_size(&self) -> u64 {
        self.order_size.unwrap_or(100)
    }

    /// Window sizes must satisfy `1 <= short <= long`.
    pub fn validate(&self) -> Result<(), MfError> {
        let (short, long) = (self.effective_short(), self.effective_long());
        if short == 0 || short > long {
            return Err(MfError::Config(format!("strategy windows need 1 <= short <= long, got {short}/{long}")));
        }
        if self.effective_bearish() > self.effective_bullish() {
            return Err(MfError::Config("strategy bearish threshold is above bullish".into()));
        }
        Ok(())
    }
}

/// Order submission endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderSinkConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl OrderSinkConfig {
    pub fn effective_bind_addr(&self) -> String {
        format!("{}:{}", self.host.as_deref().unwrap_or("127.0.0.1"), self.port.unwrap_or(10000))
    }
}

/// Load and parse a JSON config file.
pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    let config: AppConfig =
        serde_json::from_str(&content).with_context(|| format!("parse config {}", path.display()))?;
    Ok(config)
}

/// Read `SYMBOL,PRICE` rows. Rows with an invalid symbol or unparsable price
/// are skipped with a warning; extra columns are ignored.
pub fn load_initial_prices(path: &Path) -> anyhow::Result<Vec<(Symbol, f64)>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("open price csv {}", path.display()))?;

    let mut rows: Vec<(Symbol, f64)> = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("read price csv {}", path.display()))?;
        let (Some(raw_sym), Some(raw_px)) = (record.get(0), record.get(1)) else {
            continue;
        };
        let Ok(sym) = Symbol::new(raw_sym) else {
            warn!("[config] skipping csv row with invalid symbol {raw_sym:?}");
            continue;
        };
        let price = match raw_px.parse::<f64>() {
            Ok(p) if p.is_finite() && p >= 0.0 => p,
            _ => {
                warn!("[config] skipping csv row {sym} with price {raw_px:?}");
                continue;
            }
        };
        match rows.iter_mut().find(|(s, _)| *s == sym) {
            Some(row) => row.1 = price,
            None => rows.push((sym, price)),
        }
    }
    Ok(rows)
}
