//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use relay_proxy::config::{ProxyConfig, UpstreamConfig};
use relay_proxy::observability::ProxyMetrics;
use relay_proxy::proxy::ProxyServer;
use relay_proxy::Shutdown;

/// A mock upstream that records every request it receives.
pub struct MockUpstream {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl MockUpstream {
    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn first_request(&self) -> String {
        self.requests.lock().unwrap().first().cloned().unwrap_or_default()
    }
}

/// Start a mock upstream that reads the full request, waits `delay`, then
/// answers 200 with the request body echoed back (or `fallback_body` when
/// the request had none).
pub async fn start_echo_upstream(delay: Duration, fallback_body: &'static str) -> MockUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let requests: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let accept_hits = hits.clone();
    let accept_requests = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            accept_hits.fetch_add(1, Ordering::SeqCst);
            let requests = accept_requests.clone();
            tokio::spawn(async move {
                let request = read_http_request(&mut socket).await;
                let body = request
                    .split_once("\r\n\r\n")
                    .map(|(_, b)| b.to_string())
                    .unwrap_or_default();
                requests.lock().unwrap().push(request);

                tokio::time::sleep(delay).await;

                let body = if body.is_empty() { fallback_body.to_string() } else { body };
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    MockUpstream { addr, hits, requests }
}

/// Start a mock upstream that reads the request and then never answers.
pub async fn start_silent_upstream() -> MockUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let requests: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let accept_hits = hits.clone();
    let accept_requests = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            accept_hits.fetch_add(1, Ordering::SeqCst);
            let requests = accept_requests.clone();
            tokio::spawn(async move {
                let request = read_http_request(&mut socket).await;
                requests.lock().unwrap().push(request);
                tokio::time::sleep(Duration::from_secs(60)).await;
                drop(socket);
            });
        }
    });

    MockUpstream { addr, hits, requests }
}

/// Start a mock upstream that answers immediately but then keeps dribbling
/// body bytes until the peer goes away. Used to exercise the total
/// deadline mid-stream.
pub async fn start_dribble_upstream() -> MockUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let requests: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let accept_hits = hits.clone();
    let accept_requests = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            accept_hits.fetch_add(1, Ordering::SeqCst);
            let requests = accept_requests.clone();
            tokio::spawn(async move {
                let request = read_http_request(&mut socket).await;
                requests.lock().unwrap().push(request);

                let header = "HTTP/1.1 200 OK\r\nContent-Length: 1000000\r\n\r\n";
                if socket.write_all(header.as_bytes()).await.is_err() {
                    return;
                }
                loop {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    if socket.write_all(b"x").await.is_err() {
                        break;
                    }
                    let _ = socket.flush().await;
                }
            });
        }
    });

    MockUpstream { addr, hits, requests }
}

/// Read one HTTP request (preamble plus a Content-Length body if any).
async fn read_http_request(socket: &mut TcpStream) -> String {
    let mut data: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find_subsequence(&data, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut buf).await.unwrap_or(0);
        if n == 0 {
            return String::from_utf8_lossy(&data).into_owned();
        }
        data.extend_from_slice(&buf[..n]);
    };

    let headers = String::from_utf8_lossy(&data[..header_end]).to_lowercase();
    let content_length: usize = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0);

    while data.len() < header_end + content_length {
        let n = socket.read(&mut buf).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }
    String::from_utf8_lossy(&data).into_owned()
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// A proxy instance running on an ephemeral port with its own metrics sink.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub metrics: Arc<ProxyMetrics>,
    pub shutdown: Shutdown,
    pub config_updates: mpsc::UnboundedSender<ProxyConfig>,
}

pub fn upstream_entry(addr: SocketAddr) -> UpstreamConfig {
    UpstreamConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
    }
}

pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let metrics = Arc::new(ProxyMetrics::new());
    let shutdown = Shutdown::new();
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = ProxyServer::new(config, metrics.clone()).unwrap();
    let shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, updates_rx, shutdown_rx).await;
    });

    TestProxy {
        addr,
        metrics,
        shutdown,
        config_updates: updates_tx,
    }
}

/// Send raw bytes, half-close, and collect the entire response until the
/// proxy closes the connection.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response).await;
    String::from_utf8_lossy(&response).into_owned()
}
