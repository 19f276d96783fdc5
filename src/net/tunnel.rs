//! TCP connect and proxy tunnel negotiation.
//!
//! Resolves a host with the shared resolver, connects to the first reachable
//! address within the connect timeout, and, when a proxy is configured,
//! negotiates an HTTP `CONNECT` tunnel to the real target.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::BytesMut;
use log::{debug, info};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use trust_dns_resolver::TokioAsyncResolver;

use crate::config::{HEADER_HOST, HEADER_PROXY_AUTHORIZATION};
use crate::error_handling::ClientError;
use crate::http::{read_head, ResponseHead};
use crate::net::{Endpoint, ProxyConfig};

/// Resolves `host` to its addresses. IP literals are returned as is.
///
/// # Errors
///
/// Returns `ClientError::Resolution` if the lookup fails or yields nothing.
pub async fn resolve(resolver: &TokioAsyncResolver, host: &str) -> Result<Vec<IpAddr>, ClientError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }
    let lookup = resolver
        .lookup_ip(host)
        .await
        .map_err(|e| ClientError::Resolution {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
    let addrs: Vec<IpAddr> = lookup.iter().collect();
    if addrs.is_empty() {
        return Err(ClientError::Resolution {
            host: host.to_string(),
            reason: "no addresses returned".to_string(),
        });
    }
    debug!("Resolved {host} to {addrs:?}");
    Ok(addrs)
}

/// Connects to `endpoint`, trying each resolved address in turn.
///
/// DNS resolution and the connect attempts share one `timeout` budget.
///
/// # Errors
///
/// - `ClientError::ConnectTimeout` if the budget runs out
/// - `ClientError::Resolution` if the host does not resolve
/// - `ClientError::Connect` with the last attempt's error if no address accepts
pub async fn connect_tcp(
    resolver: &TokioAsyncResolver,
    endpoint: &Endpoint,
    timeout: Duration,
) -> Result<TcpStream, ClientError> {
    let attempt = async {
        let addrs = resolve(resolver, endpoint.host()).await?;
        let mut last_err = None;
        for ip in addrs {
            let addr = SocketAddr::new(ip, endpoint.port());
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    // Small request writes should not wait on Nagle
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Could not set TCP_NODELAY on {addr}: {e}");
                    }
                    debug!("Connected to {endpoint} via {addr}");
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Connect to {addr} failed: {e}");
                    last_err = Some(e);
                }
            }
        }
        Err(ClientError::Connect {
            target: endpoint.authority(),
            source: last_err.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no address to connect to")
            }),
        })
    };

    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::ConnectTimeout {
            target: endpoint.authority(),
            secs: timeout.as_secs(),
        }),
    }
}

/// Builds the `CONNECT` request for `target`.
///
/// # Errors
///
/// Returns `ClientError::InvalidRequest` if the target host cannot be written
/// into a request line.
pub fn connect_request(target: &Endpoint, proxy: &ProxyConfig) -> Result<String, ClientError> {
    target.validate()?;
    let authority = target.authority();
    let mut req = format!("CONNECT {authority} HTTP/1.1\r\n{HEADER_HOST}: {authority}\r\n");
    if let Some(auth) = proxy.basic_auth() {
        req.push_str(&format!("{HEADER_PROXY_AUTHORIZATION}: {auth}\r\n"));
    }
    req.push_str("\r\n");
    Ok(req)
}

/// Asks the proxy on `stream` to open a tunnel to `target`.
///
/// # Returns
///
/// The proxy's response head. After a successful return `stream` carries raw
/// bytes to and from `target`.
///
/// # Errors
///
/// - `ClientError::ProxyHandshake` if the exchange fails at the I/O level, the
///   proxy closes early, or sends bytes past its response head
/// - `ClientError::ProxyTunnel` if the proxy answers with anything but 200
/// - `ClientError::InvalidRequest` if the target host is unusable
pub async fn negotiate_connect<S>(
    stream: &mut S,
    target: &Endpoint,
    proxy: &ProxyConfig,
) -> Result<ResponseHead, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let proxy_addr = proxy.endpoint().authority();
    let handshake = |reason: String| ClientError::ProxyHandshake {
        proxy: proxy_addr.clone(),
        reason,
    };

    let request = connect_request(target, proxy)?;
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| handshake(e.to_string()))?;
    stream.flush().await.map_err(|e| handshake(e.to_string()))?;

    let mut buf = BytesMut::new();
    let head = match read_head(stream, &mut buf).await {
        Ok(head) => head,
        Err(ClientError::UnexpectedClose) => {
            return Err(handshake("proxy closed the connection".to_string()))
        }
        Err(e) => return Err(handshake(e.to_string())),
    };

    if head.status() != 200 {
        return Err(ClientError::ProxyTunnel {
            target: target.authority(),
            status: head.status(),
            reason: head.reason().to_string(),
        });
    }
    if !buf.is_empty() {
        return Err(handshake(format!(
            "{} unexpected bytes after the CONNECT response",
            buf.len()
        )));
    }
    info!("Tunnel to {target} established through {proxy_addr}");
    Ok(head)
}
