//! Connection factory and the reconnect-once policy.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use trust_dns_resolver::TokioAsyncResolver;

use crate::config::Config;
use crate::error_handling::ClientError;
use crate::http::ResponseHead;
use crate::initialization::init_resolver;
use crate::net::tls::{build_connector, establish};
use crate::net::tunnel::{connect_tcp, negotiate_connect};
use crate::net::{Endpoint, ProxyConfig};

/// An established session, owned by one exchange.
#[derive(Debug)]
pub struct Connection<S> {
    pub stream: S,
    /// The proxy's CONNECT reply when the session is tunnelled.
    pub tunnel_head: Option<ResponseHead>,
}

impl<S> Connection<S> {
    pub fn direct(stream: S) -> Self {
        Self {
            stream,
            tunnel_head: None,
        }
    }

    pub fn is_tunnelled(&self) -> bool {
        self.tunnel_head.is_some()
    }
}

/// Produces fresh connections to an endpoint, optionally through a proxy.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        proxy: Option<&ProxyConfig>,
    ) -> Result<Connection<Self::Stream>, ClientError>;
}

/// The production factory: DNS, TCP, optional CONNECT tunnel, then TLS.
#[derive(Clone)]
pub struct Connector {
    resolver: Arc<TokioAsyncResolver>,
    tls: TlsConnector,
    connect_timeout: Duration,
}

impl Connector {
    /// Builds a connector from the client configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::TlsConfig` if the TLS configuration cannot be built.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        Ok(Self::with_resolver(
            init_resolver(),
            build_connector(config.tls_mode)?,
            config.connect_timeout,
        ))
    }

    pub fn with_resolver(
        resolver: Arc<TokioAsyncResolver>,
        tls: TlsConnector,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            tls,
            connect_timeout,
        }
    }
}

#[async_trait]
impl ConnectionFactory for Connector {
    type Stream = TlsStream<TcpStream>;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        proxy: Option<&ProxyConfig>,
    ) -> Result<Connection<Self::Stream>, ClientError> {
        let (tcp, tunnel_head) = match proxy {
            None => {
                let tcp = connect_tcp(&self.resolver, endpoint, self.connect_timeout).await?;
                (tcp, None)
            }
            Some(proxy) => {
                debug!("Connecting to proxy {} for {endpoint}", proxy.endpoint());
                let mut tcp =
                    connect_tcp(&self.resolver, &proxy.endpoint(), self.connect_timeout).await?;
                let head = negotiate_connect(&mut tcp, endpoint, proxy).await?;
                (tcp, Some(head))
            }
        };
        let stream = establish(&self.tls, tcp, endpoint.host()).await?;
        Ok(Connection {
            stream,
            tunnel_head,
        })
    }
}

/// Which connection an operation is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Initial,
    Reconnect,
}

/// Runs `op` on a fresh connection, rebuilding it once if the peer closed
/// before answering.
///
/// Only a retryable error (see [`ClientError::is_retryable`]) on the initial
/// attempt triggers the rebuild; a second close, and every other error, is returned as is.
/// Connection failures are never retried.
pub async fn with_reconnect<F, T, Op>(
    factory: &F,
    endpoint: &Endpoint,
    proxy: Option<&ProxyConfig>,
    mut op: Op,
) -> Result<T, ClientError>
where
    F: ConnectionFactory + ?Sized,
    Op: for<'c> FnMut(
        &'c mut Connection<F::Stream>,
        Attempt,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'c>>,
{
    let mut attempt = Attempt::Initial;
    loop {
        let mut conn = factory.connect(endpoint, proxy).await?;
        match op(&mut conn, attempt).await {
            Err(e) if e.is_retryable() && attempt == Attempt::Initial => {
                warn!("{endpoint} closed the connection before responding, reconnecting once");
                attempt = Attempt::Reconnect;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{duplex, DuplexStream};

    /// Hands out in-memory connections and counts them.
    struct CountingFactory {
        connects: AtomicUsize,
    }

    #[async_trait]
    impl ConnectionFactory for CountingFactory {
        type Stream = DuplexStream;

        async fn connect(
            &self,
            _endpoint: &Endpoint,
            _proxy: Option<&ProxyConfig>,
        ) -> Result<Connection<DuplexStream>, ClientError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let (client, _server) = duplex(64);
            Ok(Connection::direct(client))
        }
    }

    fn factory() -> CountingFactory {
        CountingFactory {
            connects: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_reconnects_exactly_once_on_close() {
        let factory = factory();
        let endpoint = Endpoint::new("example.com", 443);
        let mut attempts = Vec::new();
        let result: Result<(), _> = with_reconnect(&factory, &endpoint, None, |_conn, attempt| {
            attempts.push(attempt);
            Box::pin(async { Err(ClientError::UnexpectedClose) })
        })
        .await;
        assert!(matches!(result, Err(ClientError::UnexpectedClose)));
        assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
        assert_eq!(attempts, vec![Attempt::Initial, Attempt::Reconnect]);
    }

    #[tokio::test]
    async fn test_second_attempt_success_is_returned() {
        let factory = factory();
        let endpoint = Endpoint::new("example.com", 443);
        let result = with_reconnect(&factory, &endpoint, None, |_conn, attempt| {
            Box::pin(async move {
                match attempt {
                    Attempt::Initial => Err(ClientError::UnexpectedClose),
                    Attempt::Reconnect => Ok(7u32),
                }
            })
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let factory = factory();
        let endpoint = Endpoint::new("example.com", 443);
        let result: Result<(), _> = with_reconnect(&factory, &endpoint, None, |_conn, _| {
            Box::pin(async {
                Err(ClientError::UnexpectedStatus {
                    status: 500,
                    reason: "Internal Server Error".into(),
                })
            })
        })
        .await;
        assert!(matches!(result, Err(ClientError::UnexpectedStatus { .. })));
        assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconnect_count_follows_is_retryable() {
        let errors: Vec<fn() -> ClientError> = vec![
            || ClientError::UnexpectedClose,
            || ClientError::InvalidRequest("header value contains LF".into()),
            || ClientError::ChunkDecode("bad size line".into()),
            || ClientError::Read(std::io::Error::from(std::io::ErrorKind::ConnectionReset)),
        ];
        for make in errors {
            let factory = factory();
            let endpoint = Endpoint::new("example.com", 443);
            let result: Result<(), _> =
                with_reconnect(&factory, &endpoint, None, move |_conn, _| {
                    Box::pin(async move { Err(make()) })
                })
                .await;
            let err = result.unwrap_err();
            let expected = if err.is_retryable() { 2 } else { 1 };
            assert_eq!(
                factory.connects.load(Ordering::SeqCst),
                expected,
                "unexpected connect count for {err:?}"
            );
        }
    }

    #[test]
    fn test_connection_direct_is_not_tunnelled() {
        let (client, _server) = duplex(8);
        assert!(!Connection::direct(client).is_tunnelled());
    }
}
