//! Relay channel properties: ordering, close idempotence, non-blocking drops,
//! and the reconnect-once policy over a public `ConnectionFactory`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

use stream_relay::net::Connection;
use stream_relay::relay::channel;
use stream_relay::{
    ClientError, Config, ConnectionFactory, Endpoint, ProxyConfig, RelayItem, Request,
    StreamClient,
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
}

#[tokio::test]
async fn test_ten_thousand_fragments_arrive_in_order() {
    let (tx, rx) = channel(64);
    tokio::spawn(async move {
        let _guard = tx.close_guard();
        for i in 0..10_000u32 {
            tx.send(char::from(b'a' + (i % 26) as u8).to_string()).await;
        }
    });

    let items = rx.collect().await;
    assert_eq!(items.len(), 10_000);
    for (i, item) in items.iter().enumerate() {
        let expected = char::from(b'a' + (i % 26) as u8).to_string();
        assert_eq!(item, &RelayItem::Fragment(expected), "mismatch at {i}");
    }
}

#[tokio::test]
async fn test_blocking_producer_fragments_arrive_in_order() {
    let client = StreamClient::with_factory(NeverFactory, &Config::default());
    let rx = client.spawn_blocking_producer(|tx| {
        for i in 0..50 {
            // Capacity is 64, so nothing is dropped
            if !tx.try_send(i.to_string()) {
                return Err(format!("fragment {i} dropped"));
            }
        }
        Ok(())
    });
    let expected: Vec<_> = (0..50).map(|i| RelayItem::Fragment(i.to_string())).collect();
    assert_eq!(rx.collect().await, expected);
}

proptest! {
    #[test]
    fn test_close_is_idempotent_from_both_sides(
        queued in 0usize..20,
        producer_closes in 0usize..4,
        consumer_closes in 0usize..4,
    ) {
        let items = runtime().block_on(async move {
            let (tx, mut rx) = channel(32);
            for i in 0..queued {
                tx.send(i.to_string()).await;
            }
            for _ in 0..producer_closes {
                tx.close();
            }
            drop(tx);
            for _ in 0..consumer_closes {
                rx.close();
            }
            rx.collect().await
        });

        if consumer_closes > 0 {
            prop_assert!(items.is_empty());
        } else {
            let expected: Vec<_> = (0..queued).map(|i| RelayItem::Fragment(i.to_string())).collect();
            prop_assert_eq!(items, expected);
        }
    }

    #[test]
    fn test_try_send_keeps_the_first_capacity_items(
        capacity in 1usize..16,
        attempts in 0usize..64,
    ) {
        let (accepted, items) = runtime().block_on(async move {
            let (tx, rx) = channel(capacity);
            let accepted = (0..attempts).filter(|i| tx.try_send(i.to_string())).count();
            tx.close();
            (accepted, rx.collect().await)
        });

        let kept = attempts.min(capacity);
        prop_assert_eq!(accepted, kept);
        let expected: Vec<_> = (0..kept).map(|i| RelayItem::Fragment(i.to_string())).collect();
        prop_assert_eq!(items, expected);
    }

    #[test]
    fn test_try_send_after_close_always_drops(capacity in 1usize..16) {
        let dropped = runtime().block_on(async move {
            let (tx, _rx) = channel(capacity);
            tx.close();
            !tx.try_send("late")
        });
        prop_assert!(dropped);
    }
}

/// A factory that must never be asked for a connection.
struct NeverFactory;

#[async_trait]
impl ConnectionFactory for NeverFactory {
    type Stream = DuplexStream;

    async fn connect(
        &self,
        _endpoint: &Endpoint,
        _proxy: Option<&ProxyConfig>,
    ) -> Result<Connection<DuplexStream>, ClientError> {
        Err(ClientError::Worker("no connections in this test".to_string()))
    }
}

/// Closes the first `closes` connections right after reading the request,
/// then answers with a two-chunk body.
struct FlakyFactory {
    closes: usize,
    connects: Arc<AtomicUsize>,
}

#[async_trait]
impl ConnectionFactory for FlakyFactory {
    type Stream = DuplexStream;

    async fn connect(
        &self,
        _endpoint: &Endpoint,
        _proxy: Option<&ProxyConfig>,
    ) -> Result<Connection<DuplexStream>, ClientError> {
        let n = self.connects.fetch_add(1, Ordering::SeqCst);
        let close = n < self.closes;
        let (client, mut server) = duplex(16 * 1024);
        tokio::spawn(async move {
            let mut req = vec![0u8; 4096];
            let _ = server.read(&mut req).await;
            if !close {
                let _ = server
                    .write_all(
                        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nhel\r\n2\r\nlo\r\n0\r\n\r\n",
                    )
                    .await;
            }
            let _ = server.shutdown().await;
        });
        Ok(Connection::direct(client))
    }
}

async fn run_flaky(closes: usize) -> (Vec<RelayItem>, usize) {
    let connects = Arc::new(AtomicUsize::new(0));
    let factory = FlakyFactory {
        closes,
        connects: connects.clone(),
    };
    let client = StreamClient::with_factory(factory, &Config::default());
    let rx = client.stream_request(Endpoint::new("example.com", 443), None, Request::get("/"), 200);
    let items = rx.collect().await;
    (items, connects.load(Ordering::SeqCst))
}

#[tokio::test]
async fn test_no_close_means_single_connection() {
    let (items, connects) = run_flaky(0).await;
    assert_eq!(
        items,
        vec![
            RelayItem::Fragment("hel".into()),
            RelayItem::Fragment("lo".into())
        ]
    );
    assert_eq!(connects, 1);
}

#[tokio::test]
async fn test_one_close_is_retried() {
    let (items, connects) = run_flaky(1).await;
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| !item.is_error()));
    assert_eq!(connects, 2);
}

#[tokio::test]
async fn test_two_closes_stop_after_two_connections() {
    let (items, connects) = run_flaky(2).await;
    assert_eq!(items.len(), 1);
    assert!(items[0].is_error());
    assert_eq!(connects, 2);
}
