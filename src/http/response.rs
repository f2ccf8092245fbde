//! Synthetic error responses and best-effort response inspection.
//!
//! The proxy never parses upstream responses beyond peeking at the status
//! line of the first chunk; everything else is relayed verbatim.

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Write a minimal plain-text error response and flush it.
///
/// The version echoes the client's request version when known; the body is
/// a single line describing the cause (no stack traces).
pub async fn write_error_response<W>(
    writer: &mut W,
    version: &str,
    status: u16,
    body: &str,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let response = format!(
        "{} {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        version,
        status,
        reason_phrase(status),
        body.len(),
        body
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        404 => "Not Found",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "Error",
    }
}

/// Best-effort status code from the first response chunk, for metrics
/// only. Unparseable input counts as 200 so an odd upstream still gets
/// bucketed somewhere.
pub fn parse_status_from_chunk(chunk: &[u8]) -> u16 {
    let first_line = chunk.split(|&b| b == b'\r').next().unwrap_or(chunk);
    let mut parts = first_line.splitn(3, |&b| b == b' ');
    let _version = parts.next();
    parts
        .next()
        .and_then(|code| std::str::from_utf8(code).ok())
        .and_then(|code| code.parse().ok())
        .unwrap_or(200)
}

/// Metric label for a status code's class.
pub fn status_class(status: u16) -> &'static str {
    match status {
        s if s < 300 => "2xx",
        s if s < 400 => "3xx",
        s if s < 500 => "4xx",
        _ => "5xx",
    }
}
