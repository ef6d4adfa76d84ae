//! # mf-runner
//!
//! Entry point for every market feed process. One binary, one subcommand per
//! role; each role runs as its own OS process.
//!
//! # Usage
//!
//! ```bash
//! mf-runner --config mf.json gateway --symbols AAPL,MSFT
//! mf-runner --config mf.json populator --fresh --symbols AAPL,MSFT
//! mf-runner --config mf.json strategy --symbol AAPL
//! mf-runner --config mf.json order-sink
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mf_core::{
    config::{AppConfig, load_config},
    service::Service,
    types::parse_symbol_list,
};
use mf_gateway::{GatewayService, PopulatorService, PopulatorSettings};
use mf_strategy::{OrderSinkService, StrategyService, StrategySettings};
use tracing::{error, info};

/// Simulated market feed with a cross-process price table.
#[derive(Parser)]
#[command(name = "mf-runner", about = "Simulated market feed runner")]
struct Cli {
    /// Configuration file path (JSON). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log directory for file output; overrides `log.log_path`.
    #[arg(long)]
    log_dir: Option<String>,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Broadcast simulated prices and news.
    Gateway {
        /// Comma-separated symbols; overrides `gateway.symbols` and the CSV's list.
        #[arg(long)]
        symbols: Option<String>,
    },
    /// Feed gateway prices into the shared table.
    Populator {
        /// Remove an existing table before creating it.
        #[arg(long)]
        fresh: bool,
        /// Comma-separated table symbols; should match the gateway's `--symbols`.
        #[arg(long)]
        symbols: Option<String>,
    },
    /// Trade one symbol from the shared table.
    Strategy {
        /// Symbol to trade; defaults to the table's first symbol.
        #[arg(long)]
        symbol: Option<String>,
    },
    /// Receive and log orders.
    OrderSink,
}

impl Role {
    fn module_name(&self) -> &'static str {
        match self {
            Self::Gateway { .. } => "gateway",
            Self::Populator { .. } => "populator",
            Self::Strategy { .. } => "strategy",
            Self::OrderSink => "order-sink",
        }
    }

    fn build(self, config: &AppConfig) -> Result<Box<dyn Service>> {
        Ok(match self {
            Self::Gateway { symbols } => {
                let config = with_symbols(config, symbols.as_deref())?;
                Box::new(GatewayService::new(config.gateway))
            }
            Self::Populator { fresh, symbols } => {
                let config = with_symbols(config, symbols.as_deref())?;
                Box::new(PopulatorService::new(PopulatorSettings::from_config(&config, fresh)?))
            }
            Self::Strategy { symbol } => Box::new(StrategyService::new(StrategySettings::from_config(config, symbol)?)),
            Self::OrderSink => Box::new(OrderSinkService::new(config.order_sink.clone())),
        })
    }
}

/// Apply a `--symbols` override to the gateway universe, which both the
/// gateway and the populator's table are built from.
fn with_symbols(config: &AppConfig, symbols: Option<&str>) -> Result<AppConfig> {
    let mut config = config.clone();
    if let Some(list) = symbols {
        let parsed = parse_symbol_list(list)?;
        config.gateway.symbols = Some(parsed.iter().map(|s| s.as_str().to_string()).collect());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    // 2. Initialize logging
    let module_name = config.log.module_name.clone().unwrap_or_else(|| cli.role.module_name().to_string());
    let log_dir = cli.log_dir.clone().or_else(|| config.log.log_path.clone());
    mf_core::logging::init_logging(&cli.log_level, log_dir.as_deref(), &module_name, config.log.effective_format());

    match &cli.config {
        Some(path) => info!("mf-runner starting, config={}, log_level={}", path.display(), cli.log_level),
        None => info!("mf-runner starting with default config, log_level={}", cli.log_level),
    }

    // 3. Build and start the service for this role
    let mut service = cli.role.build(&config)?;
    service.start().await?;
    info!("service '{}' started, press Ctrl+C to stop", service.name());

    // 4. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // 5. Stop
    if let Err(e) = service.stop().await {
        error!("error stopping '{}': {e:#}", service.name());
    }
    info!("service stopped, goodbye");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["mf-runner", "--config", "mf.json", "populator", "--fresh"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("mf.json")));
        assert!(matches!(cli.role, Role::Populator { fresh: true, symbols: None }));

        let cli = Cli::try_parse_from(["mf-runner", "-l", "debug", "strategy", "--symbol", "msft"]).unwrap();
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.role, Role::Strategy { symbol: Some(ref s) } if s == "msft"));

        let cli = Cli::try_parse_from(["mf-runner", "order-sink"]).unwrap();
        assert_eq!(cli.role.module_name(), "order-sink");
    }

    #[test]
    fn bad_symbol_list_is_rejected() {
        let role = Role::Gateway { symbols: Some("AAPL,NOT VALID".into()) };
        assert!(role.build(&AppConfig::default()).is_err());
    }

    #[test]
    fn populator_table_follows_symbol_override() {
        let cli = Cli::try_parse_from(["mf-runner", "populator", "--symbols", "tsla,nvda"]).unwrap();
        let Role::Populator { fresh, symbols } = cli.role else { panic!("expected populator") };
        let config = with_symbols(&AppConfig::default(), symbols.as_deref()).unwrap();
        let settings = PopulatorSettings::from_config(&config, fresh).unwrap();
        let names: Vec<_> = settings.symbols.iter().map(|s| s.as_str()).collect();
        assert_eq!(names, ["TSLA", "NVDA"]);
        assert_eq!(settings.capacity, 2);
    }

    #[test]
    fn role_is_required() {
        assert!(Cli::try_parse_from(["mf-runner"]).is_err());
    }

    #[test]
    fn builds_every_role_from_defaults() {
        let config = AppConfig::default();
        let roles = [
            Role::Gateway { symbols: Some("aapl,msft".into()) },
            Role::Populator { fresh: false, symbols: None },
            Role::Strategy { symbol: None },
            Role::OrderSink,
        ];
        for role in roles {
            let name = role.module_name();
            assert_eq!(role.build(&config).unwrap().name(), name);
        }
    }
}
