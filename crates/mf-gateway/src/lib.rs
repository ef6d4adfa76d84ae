//! # mf-gateway
//!
//! Producer and table-writing roles of the market feed:
//!
//! - [`model`]: random-walk price model and news sentiment
//! - [`broadcaster`]: TCP fan-out with an accept task and an emission task
//! - [`gateway`]: [`GatewayService`], the broadcaster as a runnable service
//! - [`writer`]: blocking table writer loop
//! - [`populator`]: [`PopulatorService`], gateway feed into the shared table

pub mod broadcaster;
pub mod gateway;
pub mod model;
pub mod populator;
pub mod writer;

pub use gateway::GatewayService;
pub use populator::{PopulatorService, PopulatorSettings};
