//! Streaming client entry point.
//!
//! `StreamClient` ties the pieces together: each streaming request gets its
//! own task and relay channel; the task parses the proxy, connects (with the
//! reconnect-once policy), runs the streaming engine and reports the first
//! terminal error through the channel before closing it.

use std::sync::Arc;

use log::{debug, error, warn};

use crate::config::Config;
use crate::error_handling::{ClientError, ErrorKind, ErrorStats, InitializationError, Status};
use crate::http::{engine, fetch_whole, HttpResponseSnapshot, Request};
use crate::net::{with_reconnect, Attempt, ConnectionFactory, Connector, Endpoint, ProxyConfig};
use crate::pool::BlockingPool;
use crate::relay::{self, RelayReceiver, RelaySender};

/// Client for streaming and whole-body exchanges.
///
/// Methods that spawn tasks must be called from within a tokio runtime.
pub struct StreamClient<F: ConnectionFactory = Connector> {
    factory: Arc<F>,
    channel_capacity: usize,
    pool: BlockingPool,
    stats: Arc<ErrorStats>,
}

impl<F: ConnectionFactory> Clone for StreamClient<F> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            channel_capacity: self.channel_capacity,
            pool: self.pool.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl StreamClient<Connector> {
    /// Creates a client with the production connector.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the TLS
    /// configuration cannot be built.
    pub fn new(config: &Config) -> Result<Self, InitializationError> {
        config.validate()?;
        let connector = Connector::new(config)?;
        Ok(Self::with_factory(connector, config))
    }
}

impl<F> StreamClient<F>
where
    F: ConnectionFactory + 'static,
{
    /// Creates a client over a custom connection factory.
    pub fn with_factory(factory: F, config: &Config) -> Self {
        Self {
            factory: Arc::new(factory),
            channel_capacity: config.channel_capacity.max(1),
            pool: BlockingPool::new(config.blocking_threads),
            stats: Arc::new(ErrorStats::new()),
        }
    }

    /// Failure counters across every exchange run by this client (and its clones).
    pub fn error_stats(&self) -> &ErrorStats {
        &self.stats
    }

    pub fn pool(&self) -> &BlockingPool {
        &self.pool
    }

    /// Starts a streaming exchange and returns its relay receiver immediately.
    ///
    /// The receiver yields `Fragment`s in arrival order, then either ends, or
    /// yields exactly one `Error` and ends. A malformed `proxy_url` is
    /// reported as that error before any connection is attempted, and so is a
    /// request head holding CR, LF or NUL where the wire forbids it. Closing or
    /// dropping the receiver cancels the exchange.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - The TLS server to talk to
    /// * `proxy_url` - Optional forward proxy, `scheme://[user:pass@]host:port`
    /// * `request` - The request; `Host` defaults to the endpoint
    /// * `expected_status` - The only status accepted as success
    pub fn stream_request(
        &self,
        endpoint: Endpoint,
        proxy_url: Option<String>,
        request: Request,
        expected_status: u16,
    ) -> RelayReceiver {
        let (sender, receiver) = relay::channel(self.channel_capacity);
        let factory = self.factory.clone();
        let stats = self.stats.clone();

        tokio::spawn(async move {
            let _guard = sender.close_guard();
            let exchange = run_stream(
                factory.as_ref(),
                &endpoint,
                proxy_url.as_deref(),
                &request,
                expected_status,
                &sender,
                &stats,
            );
            let outcome = tokio::select! {
                result = exchange => Some(result),
                _ = sender.closed() => None,
            };
            let Some(result) = outcome else {
                debug!("Relay for {endpoint} closed by consumer, exchange cancelled");
                return;
            };
            let status = Status::of(&result);
            match result {
                Ok(()) => debug!("Stream from {endpoint} complete ({status:?})"),
                Err(e) => {
                    stats.increment(e.kind());
                    error!("Stream from {endpoint} failed ({}, {status:?}): {e}", e.kind());
                    sender.send_error(e.to_string()).await;
                }
            }
        });

        receiver
    }

    /// Fetches a whole response, decompressing its body.
    ///
    /// Any status is accepted. The reconnect-once policy applies.
    ///
    /// # Errors
    ///
    /// Returns the first terminal `ClientError`.
    pub async fn fetch(
        &self,
        endpoint: &Endpoint,
        proxy_url: Option<&str>,
        request: Request,
    ) -> Result<HttpResponseSnapshot, ClientError> {
        let result = self.run_fetch(endpoint, proxy_url, request).await;
        if let Err(e) = &result {
            self.stats.increment(e.kind());
            warn!("Fetch from {endpoint} failed ({}): {e}", e.kind());
        }
        result
    }

    async fn run_fetch(
        &self,
        endpoint: &Endpoint,
        proxy_url: Option<&str>,
        request: Request,
    ) -> Result<HttpResponseSnapshot, ClientError> {
        let proxy = proxy_url.map(ProxyConfig::parse).transpose()?;
        endpoint.validate()?;
        let request = request.with_default_host(endpoint);
        request.validate()?;
        let stats: &ErrorStats = &self.stats;
        with_reconnect(
            self.factory.as_ref(),
            endpoint,
            proxy.as_ref(),
            |conn, attempt| {
                note_attempt(stats, attempt);
                let request = request.clone();
                Box::pin(async move { fetch_whole(conn, &request).await })
            },
        )
        .await
    }

    /// Runs a blocking producer on the worker pool and relays what it sends.
    ///
    /// The producer must only use the non-blocking [`RelaySender::try_send`]
    /// and should stop once [`RelaySender::is_closed`] reports the consumer
    /// went away. Returning `Err(message)` (or panicking) ends the stream with
    /// one `Error` item.
    pub fn spawn_blocking_producer<P>(&self, producer: P) -> RelayReceiver
    where
        P: FnOnce(&RelaySender) -> Result<(), String> + Send + 'static,
    {
        let (sender, receiver) = relay::channel(self.channel_capacity);
        let pool = self.pool.clone();
        let stats = self.stats.clone();

        tokio::spawn(async move {
            let _guard = sender.close_guard();
            let worker_sender = sender.clone();
            let message = match pool.run(move || producer(&worker_sender)).await {
                Ok(Ok(())) => return,
                Ok(Err(message)) => message,
                Err(e) => e.to_string(),
            };
            stats.increment(ErrorKind::WorkerError);
            error!("Blocking producer failed: {message}");
            sender.send_error(message).await;
        });

        receiver
    }
}

fn note_attempt(stats: &ErrorStats, attempt: Attempt) {
    if attempt == Attempt::Reconnect {
        stats.record_reconnect();
    }
}

async fn run_stream<F>(
    factory: &F,
    endpoint: &Endpoint,
    proxy_url: Option<&str>,
    request: &Request,
    expected_status: u16,
    sender: &RelaySender,
    stats: &ErrorStats,
) -> Result<(), ClientError>
where
    F: ConnectionFactory + ?Sized,
{
    let proxy = proxy_url.map(ProxyConfig::parse).transpose()?;
    endpoint.validate()?;
    let request = request.clone().with_default_host(endpoint);
    request.validate()?;

    with_reconnect(factory, endpoint, proxy.as_ref(), |conn, attempt| {
        note_attempt(stats, attempt);
        let request = request.clone();
        let sender = sender.clone();
        Box::pin(async move {
            engine::stream(conn, &request, expected_status, |text| sender.send(text)).await?;
            Ok(())
        })
    })
    .await
}
