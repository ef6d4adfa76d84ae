//! TCP fan-out of price and news ticks.
//!
//! Two tasks share one [`SubscriberSet`]:
//!
//! ```text
//!   accept task ──push──►  SubscriberSet  ◄──snapshot / remove dead── emission task
//!                          (std Mutex)                                   │
//!                                                                       │ sleep(interval − elapsed)
//!                                                        PriceModel ────┘
//! ```
//!
//! The lock is only held to push, snapshot or remove; sends happen on the
//! snapshot with the lock released. Subscribers are written to one after
//! another, so a slow reader delays everyone behind it unless a send timeout
//! is configured. Shutdown interrupts a pass that is stuck on such a reader.

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use ahash::AHashSet;
use anyhow::Context;
use mf_core::{codec, latency::LatencyCollector, types::Tick};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::model::PriceModel;

/// Emission settings.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub interval: Duration,
    pub news_interval: Duration,
    /// Give up on a subscriber whose send takes longer than this.
    pub send_timeout: Option<Duration>,
    /// Log latency stats every N cycles; 0 disables.
    pub latency_report_cycles: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            news_interval: Duration::from_secs(5),
            send_timeout: None,
            latency_report_cycles: 60,
        }
    }
}

struct Subscriber {
    id: u64,
    peer: SocketAddr,
    stream: Arc<tokio::sync::Mutex<TcpStream>>,
}

/// Connected subscribers, shared between the accept and emission tasks.
#[derive(Clone, Default)]
pub struct SubscriberSet {
    inner: Arc<Mutex<Vec<Subscriber>>>,
    next_id: Arc<AtomicU64>,
}

/// Result of one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub removed: usize,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sub = Subscriber { id, peer, stream: Arc::new(tokio::sync::Mutex::new(stream)) };
        let n = {
            let mut subs = self.lock();
            subs.push(sub);
            subs.len()
        };
        info!("[gateway] subscriber {peer} connected ({n} total)");
    }

    fn snapshot(&self) -> Vec<(u64, SocketAddr, Arc<tokio::sync::Mutex<TcpStream>>)> {
        self.lock().iter().map(|s| (s.id, s.peer, Arc::clone(&s.stream))).collect()
    }

    fn remove(&self, dead: &AHashSet<u64>) -> Vec<Subscriber> {
        let mut subs = self.lock();
        let (gone, kept): (Vec<_>, Vec<_>) = subs.drain(..).partition(|s| dead.contains(&s.id));
        *subs = kept;
        gone
    }

    /// Send `payload` to every subscriber, then drop the ones that failed.
    pub async fn fan_out(&self, payload: &[u8], send_timeout: Option<Duration>) -> FanOut {
        let mut dead = AHashSet::default();
        let mut delivered = 0;

        for (id, peer, stream) in self.snapshot() {
            let mut sock = stream.lock().await;
            let sent = match send_timeout {
                Some(limit) => match tokio::time::timeout(limit, sock.write_all(payload)).await {
                    Ok(res) => res,
                    Err(_) => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "send timed out")),
                },
                None => sock.write_all(payload).await,
            };
            match sent {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!("[gateway] send to {peer} failed: {e}");
                    dead.insert(id);
                }
            }
        }

        if dead.is_empty() {
            return FanOut { delivered, removed: 0 };
        }
        let gone = self.remove(&dead);
        let removed = gone.len();
        for sub in gone {
            info!("[gateway] removing disconnected subscriber {}", sub.peer);
            let _ = sub.stream.lock().await.shutdown().await;
        }
        FanOut { delivered, removed }
    }

    async fn close_all(&self) {
        let all: Vec<Subscriber> = self.lock().drain(..).collect();
        for sub in all {
            let _ = sub.stream.lock().await.shutdown().await;
        }
    }
}

/// A bound gateway, ready to spawn its accept and emission tasks.
pub struct Broadcaster {
    listener: TcpListener,
    model: PriceModel,
    config: BroadcastConfig,
    subscribers: SubscriberSet,
}

impl Broadcaster {
    pub async fn bind(addr: &str, model: PriceModel, config: BroadcastConfig) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.with_context(|| format!("bind gateway on {addr}"))?;
        Ok(Self { listener, model, config, subscribers: SubscriberSet::new() })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn subscribers(&self) -> SubscriberSet {
        self.subscribers.clone()
    }

    /// Spawn both tasks. They run until `true` is published on `shutdown`.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let Self { listener, model, config, subscribers } = self;
        let accept = tokio::spawn(accept_loop(listener, subscribers.clone(), shutdown.clone()));
        let emit = tokio::spawn(emit_loop(model, subscribers, config, shutdown));
        vec![accept, emit]
    }
}

async fn accept_loop(listener: TcpListener, subscribers: SubscriberSet, mut shutdown: watch::Receiver<bool>) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            res = listener.accept() => res,
        };
        match accepted {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("[gateway] set_nodelay for {peer}: {e}");
                }
                subscribers.add(stream, peer);
            }
            Err(e) => {
                // Emission keeps serving whoever is already connected.
                error!("[gateway] accept failed, no longer accepting subscribers: {e}");
                return;
            }
        }
    }
    debug!("[gateway] accept task stopped");
}

async fn emit_loop(
    mut model: PriceModel,
    subscribers: SubscriberSet,
    config: BroadcastConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut latency = LatencyCollector::new();
    let mut payload = Vec::with_capacity(model.symbols().len() * 24);
    let mut last_news = Instant::now();
    let mut cycles: u64 = 0;

    info!(
        "[gateway] emitting {} symbols every {:?}, news every {:?}",
        model.symbols().len(),
        config.interval,
        config.news_interval
    );

    loop {
        let started = Instant::now();

        payload.clear();
        for tick in model.step() {
            codec::encode_into(&tick, &mut payload);
        }
        let pass_started = Instant::now();
        let pass = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            pass = subscribers.fan_out(&payload, config.send_timeout) => pass,
        };
        if pass.delivered + pass.removed > 0 {
            latency.record(pass_started.elapsed());
        }

        if last_news.elapsed() >= config.news_interval {
            let sentiment = model.next_sentiment();
            let news = codec::encode(&Tick::news(sentiment));
            let pass = tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                pass = subscribers.fan_out(&news, config.send_timeout) => pass,
            };
            debug!("[gateway] news sentiment {sentiment} sent to {} subscribers", pass.delivered);
            last_news = Instant::now();
        }

        cycles += 1;
        if config.latency_report_cycles > 0 && cycles % config.latency_report_cycles == 0 {
            if let Some(stats) = latency.stats() {
                info!("[gateway] fan-out latency over {} cycles: {stats}", config.latency_report_cycles);
            }
            latency.reset();
        }

        let pause = config.interval.saturating_sub(started.elapsed());
        if pause.is_zero() {
            warn!("[gateway] cycle took {:?}, longer than the {:?} interval", started.elapsed(), config.interval);
        }
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }

    subscribers.close_all().await;
    info!("[gateway] emission stopped after {cycles} cycles");
}

#[cfg(test)]
mod tests {
    use mf_core::{codec::FrameBuffer, types::Symbol};
    use rand::{SeedableRng, rngs::StdRng};
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::model::WalkParams;

    fn flat_model() -> PriceModel {
        let params = WalkParams { sigma: 0.0, ..WalkParams::default() };
        PriceModel::new(vec![(Symbol::new("X").unwrap(), Some(100.0))], params, StdRng::seed_from_u64(1)).unwrap()
    }

    fn fast() -> BroadcastConfig {
        BroadcastConfig {
            interval: Duration::from_millis(20),
            news_interval: Duration::from_millis(60),
            send_timeout: Some(Duration::from_secs(1)),
            latency_report_cycles: 5,
        }
    }

    async fn next_ticks(sock: &mut TcpStream, frames: &mut FrameBuffer) -> Vec<Tick> {
        let mut chunk = [0u8; 1024];
        loop {
            let n = tokio::time::timeout(Duration::from_secs(5), sock.read(&mut chunk)).await.unwrap().unwrap();
            assert!(n > 0, "gateway closed the stream");
            frames.feed(&chunk[..n]);
            let ticks = frames.drain_ticks();
            if !ticks.is_empty() {
                return ticks;
            }
        }
    }

    async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn every_subscriber_gets_prices_and_news() {
        let gw = Broadcaster::bind("127.0.0.1:0", flat_model(), fast()).await.unwrap();
        let addr = gw.local_addr().unwrap();
        let subs = gw.subscribers();
        let (stop_tx, stop_rx) = watch::channel(false);
        let tasks = gw.spawn(stop_rx);

        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();
        wait_until("two subscribers", || subs.len() == 2).await;

        for sock in [&mut a, &mut b] {
            let mut frames = FrameBuffer::new();
            let mut saw_news = false;
            while !saw_news {
                for tick in next_ticks(sock, &mut frames).await {
                    match tick {
                        Tick::Price { symbol, price } => {
                            assert_eq!(symbol.as_str(), "X");
                            assert_eq!(price, 100.0);
                        }
                        Tick::News { .. } => saw_news = true,
                    }
                }
            }
        }

        stop_tx.send(true).unwrap();
        for t in tasks {
            t.await.unwrap();
        }
        assert!(subs.is_empty());
    }

    #[tokio::test]
    async fn dead_subscribers_are_pruned() {
        let gw = Broadcaster::bind("127.0.0.1:0", flat_model(), fast()).await.unwrap();
        let addr = gw.local_addr().unwrap();
        let subs = gw.subscribers();
        let (stop_tx, stop_rx) = watch::channel(false);
        let tasks = gw.spawn(stop_rx);

        let mut live = TcpStream::connect(addr).await.unwrap();
        let gone = TcpStream::connect(addr).await.unwrap();
        wait_until("two subscribers", || subs.len() == 2).await;

        drop(gone);
        wait_until("dead subscriber removal", || subs.len() == 1).await;

        // The survivor keeps receiving.
        let mut frames = FrameBuffer::new();
        assert!(!next_ticks(&mut live, &mut frames).await.is_empty());

        stop_tx.send(true).unwrap();
        for t in tasks {
            t.await.unwrap();
        }
    }

    #[tokio::test]
    async fn stop_is_not_blocked_by_a_stalled_subscriber() {
        let universe = (0..400).map(|i| (Symbol::new(&format!("S{i}")).unwrap(), Some(100.0))).collect();
        let model = PriceModel::new(universe, WalkParams::default(), StdRng::seed_from_u64(7)).unwrap();
        let config = BroadcastConfig {
            interval: Duration::from_millis(1),
            news_interval: Duration::from_millis(50),
            send_timeout: None,
            latency_report_cycles: 0,
        };
        let gw = Broadcaster::bind("127.0.0.1:0", model, config).await.unwrap();
        let addr = gw.local_addr().unwrap();
        let subs = gw.subscribers();
        let (stop_tx, stop_rx) = watch::channel(false);
        let tasks = gw.spawn(stop_rx);

        // Connects, never reads: socket buffers fill and sends block.
        let _stalled = TcpStream::connect(addr).await.unwrap();
        wait_until("stalled subscriber", || subs.len() == 1).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        stop_tx.send(true).unwrap();
        for t in tasks {
            tokio::time::timeout(Duration::from_secs(5), t)
                .await
                .expect("gateway task ignored shutdown")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn fan_out_without_subscribers_is_a_noop() {
        let subs = SubscriberSet::new();
        assert_eq!(subs.fan_out(b"X,1*", None).await, FanOut::default());
    }
}
