//! Consumer side of a TCP feed: retry policies and the reconnect loop.

pub mod backoff;
pub mod client;

pub use backoff::{BackoffPolicy, ExponentialBackoff, FixedBackoff};
pub use client::{FeedClient, FeedConfig, FeedStats, LinkState};
