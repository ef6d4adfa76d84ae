//! # mf-strategy
//!
//! Consumer roles of the market feed:
//!
//! - [`signal`]: SMA crossover and news threshold signals
//! - [`strategy`]: [`StrategyService`], polls the shared table and places orders
//! - [`order_sink`]: [`OrderSinkService`], receives and logs orders

pub mod order_sink;
pub mod signal;
pub mod strategy;

pub use order_sink::{AcceptedOrder, OrderSinkService};
pub use strategy::{StrategyService, StrategySettings};
