//! [`Service`] wrapper that runs the broadcaster.

use std::net::SocketAddr;

use anyhow::Result;
use async_trait::async_trait;
use mf_core::{config::GatewayConfig, service::Service};
use rand::{SeedableRng, rngs::StdRng};
use tokio::{sync::watch, task::JoinHandle};
use tracing::info;

use crate::{
    broadcaster::{BroadcastConfig, Broadcaster},
    model::{PriceModel, WalkParams},
};

/// The price and news gateway process.
pub struct GatewayService {
    config: GatewayConfig,
    seed: Option<u64>,
    local_addr: Option<SocketAddr>,
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl GatewayService {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config, seed: None, local_addr: None, shutdown: None, tasks: Vec::new() }
    }

    /// Seed the price model for a reproducible stream.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Bound address, available after `start`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn broadcast_config(&self) -> BroadcastConfig {
        BroadcastConfig {
            interval: self.config.effective_interval(),
            news_interval: self.config.effective_news_interval(),
            send_timeout: self.config.send_timeout(),
            latency_report_cycles: self.config.effective_latency_report_cycles(),
        }
    }
}

#[async_trait]
impl Service for GatewayService {
    fn name(&self) -> &str {
        "gateway"
    }

    async fn start(&mut self) -> Result<()> {
        let universe = self.config.resolve_universe()?;
        let params = WalkParams::from_config(&self.config);
        let model = match self.seed {
            Some(seed) => PriceModel::new(universe, params, StdRng::seed_from_u64(seed))?,
            None => PriceModel::from_entropy(universe, params)?,
        };
        for (sym, px) in model.symbols().iter().zip(model.prices()) {
            info!("[gateway] {sym} starts at {px:.2}");
        }

        let broadcaster = Broadcaster::bind(&self.config.effective_bind_addr(), model, self.broadcast_config()).await?;
        let addr = broadcaster.local_addr()?;
        info!("[gateway] listening on {addr}");

        let (tx, rx) = watch::channel(false);
        self.tasks = broadcaster.spawn(rx);
        self.shutdown = Some(tx);
        self.local_addr = Some(addr);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        for task in self.tasks.drain(..) {
            task.await?;
        }
        info!("[gateway] stopped");
        Ok(())
    }
}
