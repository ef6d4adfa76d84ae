//! Random-walk price model and news sentiment source.
//!
//! Each cycle every symbol moves by a Gaussian relative shock:
//!
//! ```text
//! price' = round(max(price * (1 + N(0, sigma)), floor), precision)
//! ```
//!
//! The RNG is injected so tests can seed it and get a reproducible stream.

use mf_core::{
    config::GatewayConfig,
    error::MfError,
    types::{MAX_SENTIMENT, Symbol, Tick},
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};

/// Range for starting prices that were not configured.
const RANDOM_START: std::ops::RangeInclusive<f64> = 50.0..=500.0;

/// Shape of the random walk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalkParams {
    pub sigma: f64,
    pub floor: f64,
    pub precision: u32,
}

impl Default for WalkParams {
    fn default() -> Self {
        Self { sigma: 0.0015, floor: 0.01, precision: 2 }
    }
}

impl WalkParams {
    pub fn from_config(cfg: &GatewayConfig) -> Self {
        Self { sigma: cfg.effective_sigma(), floor: cfg.effective_floor(), precision: cfg.effective_precision() }
    }
}

/// Round half away from zero to `precision` decimal places.
pub fn round_to(value: f64, precision: u32) -> f64 {
    let scale = 10f64.powi(precision as i32);
    (value * scale).round() / scale
}

/// One step of the walk for a single price, given an already drawn shock.
#[inline]
pub fn next_price(price: f64, shock: f64, params: &WalkParams) -> f64 {
    round_to((price * (1.0 + shock)).max(params.floor), params.precision)
}

/// Current prices for a fixed, ordered symbol universe.
pub struct PriceModel {
    symbols: Vec<Symbol>,
    prices: Vec<f64>,
    params: WalkParams,
    noise: Normal<f64>,
    rng: StdRng,
}

impl PriceModel {
    /// Build a model over `universe`; symbols without a starting price get a
    /// random one in `[50, 500]`.
    pub fn new(universe: Vec<(Symbol, Option<f64>)>, params: WalkParams, mut rng: StdRng) -> Result<Self, MfError> {
        if universe.is_empty() {
            return Err(MfError::Config("price model needs at least one symbol".into()));
        }
        let noise = Normal::new(0.0, params.sigma)
            .map_err(|e| MfError::Config(format!("invalid sigma {}: {e}", params.sigma)))?;

        let mut symbols = Vec::with_capacity(universe.len());
        let mut prices = Vec::with_capacity(universe.len());
        for (sym, start) in universe {
            let start = match start {
                Some(p) if p.is_finite() && p >= 0.0 => p,
                Some(p) => return Err(MfError::InvalidPrice(p)),
                None => round_to(rng.gen_range(RANDOM_START), params.precision),
            };
            symbols.push(sym);
            prices.push(start);
        }
        Ok(Self { symbols, prices, params, noise, rng })
    }

    /// Model seeded from the OS entropy source.
    pub fn from_entropy(universe: Vec<(Symbol, Option<f64>)>, params: WalkParams) -> Result<Self, MfError> {
        Self::new(universe, params, StdRng::from_entropy())
    }

    /// Advance every price by one step and return the new price ticks in
    /// universe order.
    pub fn step(&mut self) -> Vec<Tick> {
        let mut ticks = Vec::with_capacity(self.symbols.len());
        for (sym, price) in self.symbols.iter().zip(self.prices.iter_mut()) {
            let shock = self.noise.sample(&mut self.rng);
            *price = next_price(*price, shock, &self.params);
            ticks.push(Tick::price(sym.clone(), *price));
        }
        ticks
    }

    /// Uniform sentiment in `0..=100`.
    pub fn next_sentiment(&mut self) -> u8 {
        self.rng.gen_range(0..=MAX_SENTIMENT)
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn prices(&self) -> &[f64] {
        &self.prices
    }
}
