// Shared test helpers: a stub TLS origin and a stub CONNECT proxy.
//
// Both listen on 127.0.0.1 with an ephemeral port and record what they see so
// tests can assert on connection counts and request heads.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use stream_relay::Endpoint;

/// What the origin does with the Nth connection.
#[derive(Clone)]
#[allow(dead_code)] // Not every test file uses every reply
pub enum Reply {
    /// Read the request, then close the session without answering.
    Close,
    /// Read the request, write these bytes, then close.
    Respond(Vec<u8>),
    /// Read the request, write these bytes, then keep the session open
    /// until the client goes away.
    Hold(Vec<u8>),
}

/// A chunked `200 OK` carrying the given chunks.
#[allow(dead_code)]
pub fn chunked_ok(chunks: &[&str]) -> Reply {
    let mut wire = String::from("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n");
    for chunk in chunks {
        wire.push_str(&format!("{:x}\r\n{chunk}\r\n", chunk.len()));
    }
    wire.push_str("0\r\n\r\n");
    Reply::Respond(wire.into_bytes())
}

/// Builds a TLS acceptor with a fresh self-signed certificate for `localhost`.
pub fn tls_acceptor() -> TlsAcceptor {
    let key_pair = rcgen::KeyPair::generate().expect("Failed to generate key pair");
    let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
        .expect("Failed to build certificate params")
        .self_signed(&key_pair)
        .expect("Failed to self-sign certificate");
    let cert_der: CertificateDer<'static> = cert.der().clone();
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .expect("Failed to select protocol versions")
    .with_no_client_auth()
    .with_single_cert(vec![cert_der], key_der)
    .expect("Failed to build server config");
    TlsAcceptor::from(Arc::new(config))
}

/// Reads until the end of an HTTP head and returns it as text.
pub async fn read_http_head<S: AsyncRead + Unpin>(stream: &mut S) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(1) => head.push(byte[0]),
            _ => break,
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// A running stub origin.
pub struct StubOrigin {
    pub addr: SocketAddr,
    pub accepts: Arc<AtomicUsize>,
    pub requests: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl StubOrigin {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.addr.port())
    }

    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests lock poisoned").clone()
    }
}

/// Spawns a TLS origin answering the Nth connection with `replies[N]`
/// (the last reply repeats).
pub async fn spawn_tls_origin(replies: Vec<Reply>) -> StubOrigin {
    assert!(!replies.is_empty(), "at least one reply is required");
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind origin");
    let addr = listener.local_addr().expect("origin has no address");
    let accepts = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let acceptor = tls_acceptor();

    {
        let accepts = accepts.clone();
        let requests = requests.clone();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let n = accepts.fetch_add(1, Ordering::SeqCst);
                let reply = replies[n.min(replies.len() - 1)].clone();
                let acceptor = acceptor.clone();
                let requests = requests.clone();
                tokio::spawn(async move {
                    let Ok(mut tls) = acceptor.accept(tcp).await else {
                        return;
                    };
                    let head = read_http_head(&mut tls).await;
                    requests.lock().expect("requests lock poisoned").push(head);
                    match reply {
                        Reply::Close => {}
                        Reply::Respond(bytes) => {
                            let _ = tls.write_all(&bytes).await;
                        }
                        Reply::Hold(bytes) => {
                            let _ = tls.write_all(&bytes).await;
                            let mut sink = [0u8; 256];
                            while let Ok(n) = tls.read(&mut sink).await {
                                if n == 0 {
                                    break;
                                }
                            }
                        }
                    }
                    // Sends close_notify
                    let _ = tls.shutdown().await;
                });
            }
        });
    }

    StubOrigin {
        addr,
        accepts,
        requests,
    }
}

/// A running stub CONNECT proxy.
#[allow(dead_code)]
pub struct StubProxy {
    pub addr: SocketAddr,
    pub heads: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl StubProxy {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url_with_credentials(&self, user: &str, pass: &str) -> String {
        format!("http://{user}:{pass}@{}", self.addr)
    }

    pub fn heads(&self) -> Vec<String> {
        self.heads.lock().expect("heads lock poisoned").clone()
    }
}

/// Spawns a CONNECT proxy. When `required_auth` is set, requests without
/// exactly that `Proxy-Authorization` value get a 407.
#[allow(dead_code)]
pub async fn spawn_connect_proxy(required_auth: Option<&'static str>) -> StubProxy {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind proxy");
    let addr = listener.local_addr().expect("proxy has no address");
    let heads = Arc::new(Mutex::new(Vec::new()));

    {
        let heads = heads.clone();
        tokio::spawn(async move {
            while let Ok((mut client, _)) = listener.accept().await {
                let heads = heads.clone();
                tokio::spawn(async move {
                    let head = read_http_head(&mut client).await;
                    heads.lock().expect("heads lock poisoned").push(head.clone());

                    let authorized = match required_auth {
                        Some(auth) => head
                            .lines()
                            .any(|l| l == format!("Proxy-Authorization: {auth}")),
                        None => true,
                    };
                    if !authorized {
                        let _ = client
                            .write_all(
                                b"HTTP/1.1 407 Proxy Authentication Required\r\nContent-Length: 0\r\n\r\n",
                            )
                            .await;
                        return;
                    }

                    let target = head
                        .lines()
                        .next()
                        .and_then(|line| line.split(' ').nth(1))
                        .unwrap_or_default()
                        .to_string();
                    let Ok(mut upstream) = TcpStream::connect(target.as_str()).await else {
                        let _ = client.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await;
                        return;
                    };
                    if client
                        .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                        .await
                        .is_err()
                    {
                        return;
                    }
                    let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
                });
            }
        });
    }

    StubProxy { addr, heads }
}
