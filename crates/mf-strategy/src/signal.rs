//! Trading signals: moving-average crossover on prices, thresholds on news.

use std::collections::VecDeque;

use mf_core::{error::MfError, types::Direction};

/// SMA(short) vs SMA(long) over the last `long` prices.
#[derive(Debug, Clone)]
pub struct PriceSignal {
    short: usize,
    long: usize,
    window: VecDeque<f64>,
}

impl PriceSignal {
    pub fn new(short: usize, long: usize) -> Result<Self, MfError> {
        if short == 0 || short > long {
            return Err(MfError::Config(format!("price signal needs 1 <= short <= long, got {short}/{long}")));
        }
        Ok(Self { short, long, window: VecDeque::with_capacity(long) })
    }

    pub fn push(&mut self, price: f64) {
        if self.window.len() == self.long {
            self.window.pop_front();
        }
        self.window.push_back(price);
    }

    /// `None` until the window is full. Ties read as `Sell`.
    pub fn signal(&self) -> Option<Direction> {
        if self.window.len() < self.long {
            return None;
        }
        let long_sma = self.window.iter().sum::<f64>() / self.long as f64;
        let short_sma = self.window.iter().rev().take(self.short).sum::<f64>() / self.short as f64;
        Some(if short_sma > long_sma { Direction::Buy } else { Direction::Sell })
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

/// Latest sentiment against bullish/bearish thresholds (both exclusive).
#[derive(Debug, Clone)]
pub struct NewsSignal {
    bullish: u8,
    bearish: u8,
    latest: Option<u8>,
}

impl NewsSignal {
    pub fn new(bullish: u8, bearish: u8) -> Self {
        Self { bullish, bearish, latest: None }
    }

    pub fn set(&mut self, sentiment: u8) {
        self.latest = Some(sentiment);
    }

    pub fn latest(&self) -> Option<u8> {
        self.latest
    }

    pub fn signal(&self) -> Option<Direction> {
        match self.latest? {
            s if s > self.bullish => Some(Direction::Buy),
            s if s < self.bearish => Some(Direction::Sell),
            _ => None,
        }
    }
}

/// The direction both signals agree on, if any.
pub fn agreement(price: Option<Direction>, news: Option<Direction>) -> Option<Direction> {
    match (price, news) {
        (Some(p), Some(n)) if p == n => Some(p),
        _ => None,
    }
}
