//! Order submission endpoint.
//!
//! Accepts TCP connections carrying delimiter-framed JSON [`OrderRecord`]s.
//! Each connection gets its own task and [`FrameBuffer`]. Parsed orders get a
//! process-wide increasing id, are logged, and are optionally forwarded on
//! an mpsc channel. Frames that are not valid JSON are logged and skipped.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use mf_core::{
    codec::{self, FrameBuffer},
    config::OrderSinkConfig,
    service::Service,
    types::OrderRecord,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

/// An order that parsed, with the id the sink assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedOrder {
    pub id: u64,
    pub record: OrderRecord,
}

impl AcceptedOrder {
    /// `Received Order {id}: {SIDE} {qty} {symbol} @ {price:.2}`
    pub fn summary(&self) -> String {
        let qty = self.record.quantity().map_or_else(|| "UNKNOWN".to_string(), ToString::to_string);
        let symbol = self.record.symbol.as_deref().unwrap_or("UNKNOWN");
        format!(
            "Received Order {}: {} {} {} @ {:.2}",
            self.id,
            self.record.effective_side(),
            qty,
            symbol,
            self.record.effective_price()
        )
    }
}

/// A bound order sink.
pub struct OrderSink {
    listener: TcpListener,
    next_id: Arc<AtomicU64>,
}

impl OrderSink {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.with_context(|| format!("bind order sink on {addr}"))?;
        Ok(Self { listener, next_id: Arc::new(AtomicU64::new(1)) })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Spawn the accept task. Connection tasks inherit `shutdown`.
    pub fn spawn(
        self,
        forward: Option<mpsc::UnboundedSender<AcceptedOrder>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut connections = Vec::new();
            loop {
                let accepted = tokio::select! {
                    _ = shutdown.wait_for(|stop| *stop) => break,
                    res = self.listener.accept() => res,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        debug!("[order-sink] connection from {peer}");
                        connections.retain(|h: &JoinHandle<()>| !h.is_finished());
                        connections.push(tokio::spawn(handle_connection(
                            stream,
                            peer,
                            Arc::clone(&self.next_id),
                            forward.clone(),
                            shutdown.clone(),
                        )));
                    }
                    Err(e) => {
                        error!("[order-sink] accept failed, no longer accepting: {e}");
                        break;
                    }
                }
            }
            for conn in connections {
                let _ = conn.await;
            }
            info!("[order-sink] stopped");
        })
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    next_id: Arc<AtomicU64>,
    forward: Option<mpsc::UnboundedSender<AcceptedOrder>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut frames = FrameBuffer::new();
    let mut chunk = [0u8; 1024];

    loop {
        let read = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            r = stream.read(&mut chunk) => r,
        };
        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("[order-sink] {peer} disconnected: {e}");
                break;
            }
        };
        let discarded = frames.feed(&chunk[..n]);
        if discarded > 0 {
            warn!("[order-sink] discarded {discarded} bytes from {peer} without a frame delimiter");
        }
        for frame in frames.drain() {
            match OrderRecord::from_json(&frame) {
                Ok(record) => {
                    let order = AcceptedOrder { id: next_id.fetch_add(1, Ordering::Relaxed), record };
                    info!("{}", order.summary());
                    if let Some(tx) = &forward {
                        let _ = tx.send(order);
                    }
                }
                Err(e) => warn!("[order-sink] failed to process order from {peer}: {e}"),
            }
        }
    }
    if frames.pending() > 0 {
        debug!("[order-sink] {peer} left {} unterminated bytes", frames.pending());
    }
}

/// Send one order on a fresh connection to the sink at `addr`.
pub async fn submit_order(addr: &str, record: &OrderRecord, timeout: Duration) -> Result<()> {
    let payload = codec::frame(record.to_json()?.as_bytes());
    let send = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(&payload).await?;
        stream.shutdown().await?;
        Ok::<_, std::io::Error>(())
    };
    tokio::time::timeout(timeout, send)
        .await
        .with_context(|| format!("order submission to {addr} timed out"))?
        .with_context(|| format!("submit order to {addr}"))?;
    Ok(())
}

/// The order sink process.
pub struct OrderSinkService {
    config: OrderSinkConfig,
    forward: Option<mpsc::UnboundedSender<AcceptedOrder>>,
    local_addr: Option<SocketAddr>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl OrderSinkService {
    pub fn new(config: OrderSinkConfig) -> Self {
        Self { config, forward: None, local_addr: None, shutdown: None, task: None }
    }

    /// Also deliver every accepted order to `tx`.
    pub fn with_forward(mut self, tx: mpsc::UnboundedSender<AcceptedOrder>) -> Self {
        self.forward = Some(tx);
        self
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

#[async_trait]
impl Service for OrderSinkService {
    fn name(&self) -> &str {
        "order-sink"
    }

    async fn start(&mut self) -> Result<()> {
        let sink = OrderSink::bind(&self.config.effective_bind_addr()).await?;
        let addr = sink.local_addr()?;
        info!("[order-sink] listening on {addr}");
        let (tx, rx) = watch::channel(false);
        self.task = Some(sink.spawn(self.forward.take(), rx));
        self.shutdown = Some(tx);
        self.local_addr = Some(addr);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            task.await?;
        }
        Ok(())
    }
}
