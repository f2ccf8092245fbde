//! Per-connection request lifecycle.

use std::io::ErrorKind;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::ProxyError;
use crate::http::request::{self, RequestHead, CHUNK_SIZE};
use crate::http::response::{parse_status_from_chunk, write_error_response};
use crate::observability::metrics::{ProxyMetrics, UpstreamErrorKind};
use crate::proxy::server::ProxyState;
use crate::timeouts::TimeoutKind;
use crate::upstream::Upstream;

/// Drive one client connection to completion.
///
/// Every acquired resource lives in this scope: the client permit, the
/// upstream permit, and both sockets unwind together whether the exchange
/// finishes, fails, or the task is cancelled.
pub async fn handle_client(
    stream: TcpStream,
    state: Arc<ProxyState>,
    metrics: Arc<ProxyMetrics>,
    trace_id: String,
) {
    let _client_permit = state.limits.client_connection().await;
    tracing::debug!(in_use = state.limits.clients_in_use(), "Client connection admitted");

    let (read_half, write_half) = stream.into_split();
    let mut client_reader = BufReader::new(read_half);
    let mut client_writer = write_half;

    // Parsing is bounded by the read deadline so a stalled preamble cannot
    // pin a permit forever.
    let head = match state
        .policy
        .with_read(request::read_request_head(&mut client_reader))
        .await
    {
        Ok(Ok(head)) => head,
        Ok(Err(ProxyError::PeerClosed)) => {
            tracing::debug!("Client closed before sending a request");
            return;
        }
        Ok(Err(ProxyError::MalformedRequest(reason))) => {
            metrics.record_parse_error();
            metrics.record_response_status(400);
            tracing::warn!(reason, "Rejecting malformed request");
            let _ = write_error_response(&mut client_writer, "HTTP/1.1", 400, "Malformed request")
                .await;
            return;
        }
        Ok(Err(error)) => {
            tracing::warn!(%error, "Failed reading request preamble");
            return;
        }
        Err(_) => {
            tracing::debug!("Timed out waiting for request preamble");
            return;
        }
    };

    let started = metrics.record_request_start();
    tracing::info!(
        method = head.method(),
        path = head.path(),
        version = head.version(),
        "Request received"
    );

    let upstream = state.pool.get_next().clone();
    metrics.record_upstream_request(&upstream.key());
    tracing::debug!(upstream = %upstream, "Selected upstream");

    let _upstream_permit = state.limits.upstream_connection(&upstream).await;

    let upstream_stream = match state
        .policy
        .with_connect(TcpStream::connect((upstream.host.as_str(), upstream.port)))
        .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(error)) => {
            let kind = if error.kind() == ErrorKind::ConnectionRefused {
                UpstreamErrorKind::ConnectionRefused
            } else {
                UpstreamErrorKind::Other
            };
            metrics.record_upstream_error(&upstream.key(), kind);
            metrics.record_response_status(502);
            tracing::error!(upstream = %upstream, %error, "Cannot connect to upstream");
            let _ = write_error_response(
                &mut client_writer,
                head.version(),
                502,
                &format!("Upstream unavailable: {}", error),
            )
            .await;
            return;
        }
        Err(_) => {
            metrics.record_timeout_error(TimeoutKind::Connect);
            metrics.record_upstream_error(&upstream.key(), UpstreamErrorKind::Timeout);
            metrics.record_response_status(504);
            tracing::error!(
                upstream = %upstream,
                connect_ms = state.policy.connect_ms,
                "Connection to upstream timed out"
            );
            let _ =
                write_error_response(&mut client_writer, head.version(), 504, "Upstream timeout")
                    .await;
            return;
        }
    };
    tracing::debug!(upstream = %upstream, "Connected to upstream");

    let mut bytes_relayed: u64 = 0;
    let mut response_status: u16 = 200;
    let outcome = state
        .policy
        .with_total(run_exchange(
            &state,
            &head,
            &trace_id,
            &mut client_reader,
            &mut client_writer,
            upstream_stream,
            &mut bytes_relayed,
            &mut response_status,
        ))
        .await
        .and_then(|inner| inner);

    match outcome {
        Ok(()) => {
            metrics.record_request_done(started, response_status, bytes_relayed);
            tracing::info!(
                upstream = %upstream,
                status = response_status,
                bytes = bytes_relayed,
                "Finished proxying"
            );
        }
        Err(error) => {
            respond_to_failure(error, bytes_relayed, &head, &upstream, &mut client_writer, &metrics)
                .await;
        }
    }
}

/// The bounded part of the exchange: request up, response down. Runs
/// under the total deadline; each phase applies its own deadline inside.
#[allow(clippy::too_many_arguments)]
async fn run_exchange(
    state: &ProxyState,
    head: &RequestHead,
    trace_id: &str,
    client_reader: &mut BufReader<OwnedReadHalf>,
    client_writer: &mut OwnedWriteHalf,
    upstream_stream: TcpStream,
    bytes_relayed: &mut u64,
    response_status: &mut u16,
) -> Result<(), ProxyError> {
    let (mut upstream_reader, mut upstream_writer) = upstream_stream.into_split();

    // Preamble and body go up under the write deadline; every chunk waits
    // for the socket to drain before producing more.
    state
        .policy
        .with_write(async {
            head.write_upstream_preamble(&mut upstream_writer, trace_id).await?;
            request::stream_request_body(head.body(), client_reader, &mut upstream_writer).await?;
            Ok::<(), ProxyError>(())
        })
        .await??;
    tracing::debug!("Request sent to upstream, waiting for response");

    // Response pump: forced Connection: close means EOF ends the response.
    // Bytes are forwarded verbatim; only the first chunk's status line is
    // peeked at for metrics.
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut first_chunk = true;
    loop {
        let got = state.policy.with_read(upstream_reader.read(&mut buf)).await??;
        if got == 0 {
            tracing::debug!("Upstream closed the response (EOF)");
            break;
        }
        if first_chunk {
            *response_status = parse_status_from_chunk(&buf[..got]);
            first_chunk = false;
        }
        write_to_client(client_writer, &buf[..got]).await?;
        *bytes_relayed += got as u64;
    }

    // Half-close the upstream leg first, then drain the client leg.
    let _ = upstream_writer.shutdown().await;
    client_writer.flush().await.map_err(|_| ProxyError::PeerClosed)?;
    Ok(())
}

/// Write one response chunk and drain. A failure here means the client
/// went away, which cancels the upstream leg without error metrics.
async fn write_to_client<W>(writer: &mut W, chunk: &[u8]) -> Result<(), ProxyError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(chunk).await.map_err(|_| ProxyError::PeerClosed)?;
    writer.flush().await.map_err(|_| ProxyError::PeerClosed)?;
    Ok(())
}

/// Map an exchange failure to the client response and metrics.
///
/// Once response bytes have been relayed there is no way to send a
/// synthetic status, so the connection terminates mid-stream instead.
async fn respond_to_failure(
    error: ProxyError,
    bytes_relayed: u64,
    head: &RequestHead,
    upstream: &Upstream,
    client_writer: &mut OwnedWriteHalf,
    metrics: &ProxyMetrics,
) {
    let response_started = bytes_relayed > 0;
    match error {
        ProxyError::Timeout(kind) => {
            metrics.record_timeout_error(kind);
            if kind != TimeoutKind::Total {
                metrics.record_upstream_error(&upstream.key(), UpstreamErrorKind::Timeout);
            }
            tracing::error!(
                upstream = %upstream,
                phase = %kind,
                bytes_relayed,
                "Exchange deadline exceeded"
            );
            if !response_started {
                metrics.record_response_status(504);
                let _ = write_error_response(
                    client_writer,
                    head.version(),
                    504,
                    "Upstream timeout",
                )
                .await;
            }
        }
        ProxyError::PeerClosed => {
            // Client went away (or stopped mid-body); the upstream leg is
            // already cancelled by unwinding. The 502 is best-effort and
            // usually lands on a closed socket.
            tracing::warn!(upstream = %upstream, bytes_relayed, "Client left mid-exchange");
            if !response_started {
                let _ = write_error_response(
                    client_writer,
                    head.version(),
                    502,
                    "Upstream error: request body incomplete",
                )
                .await;
            }
        }
        ProxyError::Io(error) => {
            metrics.record_upstream_error(&upstream.key(), UpstreamErrorKind::Other);
            tracing::error!(upstream = %upstream, %error, "Error relaying upstream response");
            if !response_started {
                metrics.record_response_status(502);
                let _ = write_error_response(
                    client_writer,
                    head.version(),
                    502,
                    &format!("Upstream error: {}", error),
                )
                .await;
            }
        }
        // Parse and connect failures are handled before the exchange.
        other @ (ProxyError::MalformedRequest(_) | ProxyError::Connect(_)) => {
            tracing::error!(upstream = %upstream, error = %other, "Unexpected failure stage");
        }
    }
}
