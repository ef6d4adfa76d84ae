//! # mf-core
//!
//! Shared building blocks for the market feed processes:
//!
//! - **Types** (`types`): symbols, ticks, order records
//! - **Codec** (`codec`): delimiter framing and the `TAG,VALUE` grammar
//! - **Price table** (`table`): file-backed shared segment, descriptor, advisory lock
//! - **Feed** (`feed`): reconnecting TCP consumer with pluggable backoff
//! - **Configuration** (`config`): JSON config and CSV initial prices
//! - **Error types** (`error`): `MfError` via thiserror
//! - **Service** (`service`): start/stop lifecycle trait used by the runner
//! - **Latency** (`latency`): histogram for fan-out timing
//! - **CPU affinity** (`cpu_affinity`): core pinning for the table writer
//! - **Time utilities** (`time_util`): wall-clock timestamps
//! - **Logging** (`logging`): tracing-based structured logging

pub mod codec;
pub mod config;
pub mod cpu_affinity;
pub mod error;
pub mod feed;
pub mod latency;
pub mod logging;
pub mod service;
pub mod table;
pub mod time_util;
pub mod types;

pub use types::*;
