//! Reconnecting TCP feed consumer.
//!
//! `FeedClient::run` drives one link through
//!
//! ```text
//!   ┌──────────────┐ connect  ┌────────────┐   ok    ┌───────────┐
//!   │ Disconnected │────────► │ Connecting │───────► │ Streaming │
//!   └──────────────┘          └────────────┘         └───────────┘
//!          ▲   ▲  backoff, retry     │                      │
//!          │   └─────────────────────┘   EOF / read error   │
//!          └────────────────────────────────────────────────┘
//! ```
//!
//! and only leaves the cycle on shutdown or when the [`BackoffPolicy`] gives
//! up. Each connection starts with an empty [`FrameBuffer`]; bytes left over
//! from a previous connection are discarded, and ticks sent while the link
//! was down are lost (at-most-once, best effort).

use std::time::Duration;

use tokio::{io::AsyncReadExt, net::TcpStream, sync::watch};
use tracing::{debug, info, trace, warn};

use super::backoff::BackoffPolicy;
use crate::{
    codec::{self, FrameBuffer},
    error::MfError,
    types::Tick,
};

/// Size of the socket read buffer.
const READ_CHUNK: usize = 4096;

/// Observable link state, published on a `watch` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Streaming,
}

/// Configuration for one feed link.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Log label (e.g. `"feed-populator"`).
    pub label: String,
    /// Producer address, `host:port`.
    pub addr: String,
    /// Read timeout. Expiry is not an error, only a liveness tick.
    pub read_timeout: Duration,
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
}

impl FeedConfig {
    pub fn new(label: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            addr: addr.into(),
            read_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    /// Connections that reached `Streaming`.
    pub connections: u64,
    /// Frames decoded and delivered.
    pub ticks: u64,
    /// Frames dropped as malformed or oversized.
    pub dropped: u64,
}

enum StreamEnd {
    Shutdown,
    Closed,
    Failed(std::io::Error),
}

/// A feed consumer that survives producer restarts.
pub struct FeedClient<P> {
    config: FeedConfig,
    policy: P,
    state_tx: watch::Sender<LinkState>,
}

impl<P: BackoffPolicy> FeedClient<P> {
    pub fn new(config: FeedConfig, policy: P) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        Self { config, policy, state_tx }
    }

    /// Subscribe to state transitions.
    pub fn state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// Run the reconnect loop, calling `on_tick` for every decoded tick.
    ///
    /// Returns `Ok` when `true` is published on `shutdown` (or its sender is
    /// dropped) and [`MfError::RetriesExhausted`] when the policy gives up.
    /// Transport errors never escape; they are logged and retried.
    pub async fn run<F>(mut self, mut on_tick: F, mut shutdown: watch::Receiver<bool>) -> Result<FeedStats, MfError>
    where
        F: FnMut(Tick) + Send,
    {
        let label = self.config.label.clone();
        let mut stats = FeedStats::default();
        let mut frames = FrameBuffer::new();
        let mut failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(LinkState::Connecting);
            debug!("[{label}] connecting to {}", self.config.addr);

            let attempt = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&self.config.addr));
            let connected = tokio::select! {
                _ = wait_shutdown(&mut shutdown) => break,
                res = attempt => match res {
                    Ok(Ok(stream)) => Some(stream),
                    Ok(Err(e)) => {
                        warn!("[{label}] connect to {} failed: {e}", self.config.addr);
                        None
                    }
                    Err(_) => {
                        warn!("[{label}] connect to {} timed out", self.config.addr);
                        None
                    }
                },
            };

            if let Some(mut stream) = connected {
                let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| self.config.addr.clone());
                failures = 0;
                self.policy.reset();
                frames.clear();
                stats.connections += 1;
                self.set_state(LinkState::Streaming);
                info!("[{label}] connected to {peer}, streaming");

                let end =
                    stream_frames(&self.config, &mut stream, &mut frames, &mut on_tick, &mut shutdown, &mut stats).await;
                match end {
                    StreamEnd::Shutdown => break,
                    StreamEnd::Closed => warn!("[{label}] {peer} closed the connection"),
                    StreamEnd::Failed(e) => warn!("[{label}] read from {peer} failed: {e}"),
                }
            }

            self.set_state(LinkState::Disconnected);
            failures = failures.saturating_add(1);
            let Some(delay) = self.policy.next_delay(failures) else {
                warn!("[{label}] giving up after {failures} failed attempts");
                return Err(MfError::RetriesExhausted { label, attempts: failures });
            };
            info!("[{label}] reconnecting in {delay:?}");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_shutdown(&mut shutdown) => break,
            }
        }

        self.set_state(LinkState::Disconnected);
        info!(
            "[{label}] stopped ({} connections, {} ticks, {} dropped)",
            stats.connections, stats.ticks, stats.dropped
        );
        Ok(stats)
    }

    fn set_state(&self, state: LinkState) {
        self.state_tx.send_replace(state);
    }
}

async fn stream_frames<F>(
    config: &FeedConfig,
    stream: &mut TcpStream,
    frames: &mut FrameBuffer,
    on_tick: &mut F,
    shutdown: &mut watch::Receiver<bool>,
    stats: &mut FeedStats,
) -> StreamEnd
where
    F: FnMut(Tick) + Send,
{
    let label = &config.label;
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let read = tokio::select! {
            _ = wait_shutdown(shutdown) => return StreamEnd::Shutdown,
            r = tokio::time::timeout(config.read_timeout, stream.read(&mut chunk)) => r,
        };

        match read {
            Err(_) => trace!("[{label}] no data for {:?}", config.read_timeout),
            Ok(Ok(0)) => return StreamEnd::Closed,
            Ok(Ok(n)) => {
                let discarded = frames.feed(&chunk[..n]);
                if discarded > 0 {
                    stats.dropped += 1;
                    warn!("[{label}] discarded {discarded} bytes without a frame delimiter");
                }
                for frame in frames.drain() {
                    match codec::decode(&frame) {
                        Some(tick) => {
                            stats.ticks += 1;
                            on_tick(tick);
                        }
                        None => {
                            stats.dropped += 1;
                            debug!("[{label}] dropped malformed frame {:?}", String::from_utf8_lossy(&frame));
                        }
                    }
                }
            }
            Ok(Err(e)) => return StreamEnd::Failed(e),
        }
    }
}

/// Resolves once `true` is published or the sender side is gone.
async fn wait_shutdown(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::{io::AsyncWriteExt, net::TcpListener, sync::mpsc};

    use super::*;
    use crate::{feed::FixedBackoff, types::Symbol};

    fn px(sym: &str, price: f64) -> Tick {
        Tick::price(Symbol::new(sym).unwrap(), price)
    }

    fn fast_config(addr: SocketAddr) -> FeedConfig {
        let mut cfg = FeedConfig::new("feed-test", addr.to_string());
        cfg.read_timeout = Duration::from_millis(50);
        cfg.connect_timeout = Duration::from_millis(500);
        cfg
    }

    async fn serve_once(listener: &TcpListener, payload: &[u8]) {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(payload).await.unwrap();
        sock.shutdown().await.unwrap();
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Tick>) -> Tick {
        tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn delivers_ticks_and_skips_garbage() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let client = FeedClient::new(fast_config(addr), FixedBackoff::new(Duration::from_millis(20)));
        let task = tokio::spawn(client.run(move |t| tx.send(t).unwrap(), stop_rx));

        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"A,1*junk*NE").await.unwrap();
        sock.write_all(b"WS,80*").await.unwrap();

        assert_eq!(recv(&mut rx).await, px("A", 1.0));
        assert_eq!(recv(&mut rx).await, Tick::news(80));

        stop_tx.send(true).unwrap();
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats, FeedStats { connections: 1, ticks: 2, dropped: 1 });
    }

    #[tokio::test]
    async fn resumes_after_producer_restart() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let client = FeedClient::new(fast_config(addr), FixedBackoff::new(Duration::from_millis(20)));
        let mut state = client.state();
        let task = tokio::spawn(client.run(move |t| tx.send(t).unwrap(), stop_rx));

        // First producer life: one tick, then the process "dies".
        serve_once(&listener, b"A,1*").await;
        drop(listener);
        assert_eq!(recv(&mut rx).await, px("A", 1.0));
        tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| *s == LinkState::Disconnected))
            .await
            .unwrap()
            .unwrap();

        // Down for a while; the client keeps retrying.
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Second life on the same port.
        let listener = TcpListener::bind(addr).await.unwrap();
        serve_once(&listener, b"A,2*").await;
        assert_eq!(recv(&mut rx).await, px("A", 2.0));

        stop_tx.send(true).unwrap();
        let stats = task.await.unwrap().unwrap();
        assert!(stats.connections >= 2);
    }

    #[tokio::test]
    async fn partial_frame_does_not_survive_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let client = FeedClient::new(fast_config(addr), FixedBackoff::new(Duration::from_millis(10)));
        let task = tokio::spawn(client.run(move |t| tx.send(t).unwrap(), stop_rx));

        serve_once(&listener, b"A,1*B,").await;
        serve_once(&listener, b"2*C,3*").await;

        assert_eq!(recv(&mut rx).await, px("A", 1.0));
        assert_eq!(recv(&mut rx).await, px("C", 3.0));

        stop_tx.send(true).unwrap();
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn policy_can_give_up() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let (_stop_tx, stop_rx) = watch::channel(false);
        let client = FeedClient::new(fast_config(addr), FixedBackoff::new(Duration::ZERO).with_max_attempts(3));

        let err = client.run(|_| {}, stop_rx).await.unwrap_err();
        assert!(matches!(err, MfError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn shutdown_interrupts_backoff() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let (stop_tx, stop_rx) = watch::channel(false);
        let client = FeedClient::new(fast_config(addr), FixedBackoff::new(Duration::from_secs(3600)));
        let task = tokio::spawn(client.run(|_| {}, stop_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
        assert_eq!(stats.connections, 0);
    }
}
