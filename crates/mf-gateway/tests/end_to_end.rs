//! Gateway → populator → shared table, over real loopback sockets.

use std::{io::Write, path::Path, time::Duration};

use mf_core::{
    config::{AppConfig, GatewayConfig},
    feed::{FeedClient, FeedConfig, FixedBackoff},
    service::Service,
    table::{Outcome, PriceTable},
    types::{Symbol, Tick},
};
use mf_gateway::{GatewayService, PopulatorService, PopulatorSettings};
use tokio::{io::AsyncWriteExt, net::TcpListener, sync::{mpsc, watch}};

fn sym(s: &str) -> Symbol {
    Symbol::new(s).unwrap()
}

fn populator_settings(dir: &Path, gateway_addr: String) -> PopulatorSettings {
    PopulatorSettings {
        gateway_addr,
        read_timeout: Duration::from_millis(100),
        backoff: FixedBackoff::new(Duration::from_millis(50)),
        table_dir: dir.to_path_buf(),
        table_name: "e2e".into(),
        capacity: 1,
        symbols: vec![sym("X")],
        cpu_core: None,
        fresh: false,
    }
}

fn flat_gateway(csv: &Path, port: u16) -> GatewayConfig {
    GatewayConfig {
        host: Some("127.0.0.1".into()),
        port: Some(port),
        initial_prices_csv: Some(csv.to_path_buf()),
        interval_ms: Some(20),
        news_interval_ms: Some(100),
        sigma: Some(0.0),
        ..Default::default()
    }
}

fn price_csv(body: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(body.as_bytes()).unwrap();
    f
}

async fn wait_for_price(dir: &Path, symbol: &str, want: f64) {
    let table = PriceTable::attach(dir, "e2e").unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if table.read(&sym(symbol)).unwrap() == Some(want) {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "{symbol} never reached {want}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn price_lands_in_table_and_news_reaches_subscriber() {
    let dir = tempfile::tempdir().unwrap();
    let producer = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = producer.local_addr().unwrap();

    let mut populator = PopulatorService::new(populator_settings(dir.path(), addr.to_string()));
    populator.start().await.unwrap();
    assert_eq!(populator.outcome(), Some(Outcome::Created));
    assert_eq!(PriceTable::attach(dir.path(), "e2e").unwrap().read(&sym("X")).unwrap(), Some(0.0));

    let (news_tx, mut news_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = watch::channel(false);
    let subscriber = FeedClient::new(FeedConfig::new("news-test", addr.to_string()), FixedBackoff::default());
    let news_task = tokio::spawn(subscriber.run(
        move |tick| {
            if tick.is_news() {
                news_tx.send(tick).unwrap();
            }
        },
        stop_rx,
    ));

    let mut socks = Vec::new();
    for _ in 0..2 {
        let (sock, _) = producer.accept().await.unwrap();
        socks.push(sock);
    }
    for sock in &mut socks {
        sock.write_all(b"X,100.00*").await.unwrap();
    }
    wait_for_price(dir.path(), "X", 100.0).await;

    for sock in &mut socks {
        sock.write_all(b"NEWS,80*").await.unwrap();
    }
    let news = tokio::time::timeout(Duration::from_secs(5), news_rx.recv()).await.unwrap().unwrap();
    assert_eq!(news, Tick::news(80));

    // News never touches the table.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(PriceTable::attach(dir.path(), "e2e").unwrap().read(&sym("X")).unwrap(), Some(100.0));

    stop_tx.send(true).unwrap();
    news_task.await.unwrap().unwrap();
    assert!(news_rx.try_recv().is_err(), "exactly one news tick expected");
    populator.stop().await.unwrap();
}

#[tokio::test]
async fn populator_follows_gateway_restart() {
    let dir = tempfile::tempdir().unwrap();
    let first_csv = price_csv("X,100\n");
    let mut gateway = GatewayService::new(flat_gateway(first_csv.path(), 0)).with_seed(1);
    gateway.start().await.unwrap();
    let addr = gateway.local_addr().unwrap();

    let mut populator = PopulatorService::new(populator_settings(dir.path(), addr.to_string()));
    populator.start().await.unwrap();
    wait_for_price(dir.path(), "X", 100.0).await;

    gateway.stop().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second_csv = price_csv("X,200\n");
    let mut gateway = GatewayService::new(flat_gateway(second_csv.path(), addr.port())).with_seed(2);
    gateway.start().await.unwrap();
    wait_for_price(dir.path(), "X", 200.0).await;

    populator.stop().await.unwrap();
    gateway.stop().await.unwrap();
}

#[tokio::test]
async fn second_populator_reuses_the_table() {
    let dir = tempfile::tempdir().unwrap();
    let settings = populator_settings(dir.path(), "127.0.0.1:9".into());

    let mut first = PopulatorService::new(settings.clone());
    first.start().await.unwrap();
    let mut second = PopulatorService::new(settings.clone());
    second.start().await.unwrap();
    assert_eq!(first.outcome(), Some(Outcome::Created));
    assert_eq!(second.outcome(), Some(Outcome::Attached));

    let mut fresh = PopulatorService::new(PopulatorSettings { fresh: true, ..settings });
    fresh.start().await.unwrap();
    assert_eq!(fresh.outcome(), Some(Outcome::Created));

    for svc in [&mut first, &mut second, &mut fresh] {
        svc.stop().await.unwrap();
    }
}

#[test]
fn settings_follow_config() {
    let cfg: AppConfig = serde_json::from_str(
        r#"{ "gateway": {"symbols": ["aapl", "msft"]},
             "table": {"dir": "/tmp/mf-test", "capacity": 8},
             "populator": {"gateway_addr": "10.0.0.2:9999", "backoff_ms": 250, "max_attempts": 3, "cpu_core": 1} }"#,
    )
    .unwrap();
    let s = PopulatorSettings::from_config(&cfg, true).unwrap();
    assert_eq!(s.symbols, vec![sym("AAPL"), sym("MSFT")]);
    assert_eq!(s.capacity, 8);
    assert_eq!(s.gateway_addr, "10.0.0.2:9999");
    assert_eq!(s.backoff.delay, Duration::from_millis(250));
    assert_eq!(s.backoff.max_attempts, Some(3));
    assert_eq!(s.cpu_core, Some(1));
    assert!(s.fresh);
}
