//! Logging initialization using the `tracing` ecosystem.
//!
//! Every process in the system (gateway, populator, strategy, order sink)
//! calls [`init_logging`] once before doing anything else. Provides:
//! - Console output (colored, human-readable, or JSON)
//! - File output (daily rotation via `tracing-appender`)
//! - Configurable log level via env var `RUST_LOG` or explicit parameter

use serde::Deserialize;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Output encoding for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Initialize the global tracing subscriber.
///
/// # Parameters
///
/// - `log_level`: default level if `RUST_LOG` env var is not set (e.g. `"info"`)
/// - `log_dir`: optional directory for daily-rotating log files
/// - `module_name`: log file prefix, one per process role (e.g. `"gateway"`)
/// - `format`: console/file line encoding
pub fn init_logging(log_level: &str, log_dir: Option<&str>, module_name: &str, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(env_filter);

    // The layer types differ per format, so each arm installs its own stack.
    match (format, log_dir) {
        (LogFormat::Pretty, Some(dir)) => {
            let file_appender = tracing_appender::rolling::daily(dir, module_name);
            registry
                .with(fmt::layer().with_target(true).with_thread_ids(true).with_ansi(true))
                .with(fmt::layer().with_writer(file_appender).with_ansi(false).with_target(true))
                .init();
        }
        (LogFormat::Pretty, None) => {
            registry.with(fmt::layer().with_target(true).with_thread_ids(true).with_ansi(true)).init();
        }
        (LogFormat::Json, Some(dir)) => {
            let file_appender = tracing_appender::rolling::daily(dir, module_name);
            registry
                .with(fmt::layer().json().with_target(true))
                .with(fmt::layer().json().with_writer(file_appender).with_target(true))
                .init();
        }
        (LogFormat::Json, None) => {
            registry.with(fmt::layer().json().with_target(true)).init();
        }
    }
}
