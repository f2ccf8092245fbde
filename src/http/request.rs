//! Request preamble parsing, re-emission, and body streaming.

use std::collections::HashMap;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProxyError;

/// Hard cap on the whole preamble (request line + headers + CRLFCRLF).
pub const MAX_PREAMBLE_BYTES: usize = 65_536;
/// Hard cap on a single line, terminator included.
pub const MAX_HEADER_LINE_BYTES: usize = 8_192;
/// Hard cap on the number of header lines.
pub const MAX_HEADER_COUNT: usize = 100;
/// Relay chunk size for both body directions.
pub const CHUNK_SIZE: usize = 65_536;

/// How the request body is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// No body follows the preamble.
    None,
    /// Exactly this many bytes follow.
    Length(u64),
    /// Opaque bytes until the client stops sending. Covers
    /// `Transfer-Encoding` payloads, which are relayed without re-framing.
    UntilClose,
}

/// A parsed, immutable request preamble.
///
/// Headers keep their original casing and arrival order for emission;
/// lookup goes through a lowercased first-occurrence index. Duplicates are
/// preserved in order.
#[derive(Debug)]
pub struct RequestHead {
    method: String,
    path: String,
    version: String,
    headers: Vec<(String, String)>,
    index: HashMap<String, usize>,
    body: BodyKind,
}

impl RequestHead {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn body(&self) -> BodyKind {
        self.body
    }

    /// First value for `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.index
            .get(&name.to_ascii_lowercase())
            .map(|&i| self.headers[i].1.as_str())
    }

    /// All headers in arrival order, original casing.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Emit the preamble for the upstream leg: request line unchanged,
    /// headers in original order, any client `Connection` (and stale
    /// `X-Trace-ID`) dropped, then the forced `Connection: close` and the
    /// proxy's trace header.
    pub async fn write_upstream_preamble<W>(
        &self,
        writer: &mut W,
        trace_id: &str,
    ) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut preamble = String::with_capacity(256);
        preamble.push_str(&self.method);
        preamble.push(' ');
        preamble.push_str(&self.path);
        preamble.push(' ');
        preamble.push_str(&self.version);
        preamble.push_str("\r\n");

        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("connection") || name.eq_ignore_ascii_case("x-trace-id") {
                continue;
            }
            preamble.push_str(name);
            preamble.push_str(": ");
            preamble.push_str(value);
            preamble.push_str("\r\n");
        }
        preamble.push_str("Connection: close\r\n");
        preamble.push_str("X-Trace-ID: ");
        preamble.push_str(trace_id);
        preamble.push_str("\r\n\r\n");

        writer.write_all(preamble.as_bytes()).await?;
        writer.flush().await
    }
}

/// Parse a request preamble off `reader`.
///
/// Fails with `MalformedRequest` when the grammar or any limit is
/// violated, including the terminating CRLFCRLF not appearing within
/// `MAX_PREAMBLE_BYTES`. A connection that closes before sending a single
/// byte yields `PeerClosed` instead, so idle probes do not count as parse
/// errors.
pub async fn read_request_head<R>(reader: &mut R) -> Result<RequestHead, ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    let mut budget = MAX_PREAMBLE_BYTES;

    let request_line = match read_preamble_line(reader, &mut budget).await? {
        Some(line) => line,
        None => return Err(ProxyError::PeerClosed),
    };

    let mut tokens = request_line.split_whitespace();
    let (method, path, version) = match (tokens.next(), tokens.next(), tokens.next(), tokens.next())
    {
        (Some(m), Some(p), Some(v), None) => (m, p, v),
        _ => return Err(ProxyError::MalformedRequest("request line is not three tokens")),
    };
    if !is_token(method) {
        return Err(ProxyError::MalformedRequest("method is not a token"));
    }
    if version != "HTTP/1.1" && version != "HTTP/1.0" {
        return Err(ProxyError::MalformedRequest("unsupported HTTP version"));
    }

    let mut headers: Vec<(String, String)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    loop {
        let line = match read_preamble_line(reader, &mut budget).await? {
            Some(line) => line,
            None => return Err(ProxyError::MalformedRequest("eof before end of headers")),
        };
        if line.is_empty() {
            break;
        }
        if headers.len() == MAX_HEADER_COUNT {
            return Err(ProxyError::MalformedRequest("too many headers"));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or(ProxyError::MalformedRequest("header line has no colon"))?;
        if !is_token(name) {
            return Err(ProxyError::MalformedRequest("header name is not a token"));
        }
        let value = value.trim_matches(|c| c == ' ' || c == '\t').to_string();
        index.entry(name.to_ascii_lowercase()).or_insert(headers.len());
        headers.push((name.to_string(), value));
    }

    let body = classify_body(method, &headers, &index)?;

    Ok(RequestHead {
        method: method.to_string(),
        path: path.to_string(),
        version: version.to_string(),
        headers,
        index,
        body,
    })
}

/// Read one CRLF-terminated line, enforcing the per-line and preamble
/// budgets. Returns `None` only on EOF at a line boundary with the whole
/// preamble still unread (a silent client close).
async fn read_preamble_line<R>(
    reader: &mut R,
    budget: &mut usize,
) -> Result<Option<String>, ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    if *budget == 0 {
        return Err(ProxyError::MalformedRequest("preamble exceeds size limit"));
    }
    let cap = MAX_HEADER_LINE_BYTES.min(*budget);
    let mut raw = Vec::with_capacity(64);
    let read = {
        let mut limited = reader.take(cap as u64);
        limited.read_until(b'\n', &mut raw).await?
    };

    if read == 0 {
        return if *budget == MAX_PREAMBLE_BYTES {
            Ok(None)
        } else {
            Err(ProxyError::MalformedRequest("eof inside preamble"))
        };
    }
    *budget -= read;

    if raw.last() != Some(&b'\n') {
        // The line cap or the preamble budget ran out before a terminator.
        return Err(if read == MAX_HEADER_LINE_BYTES {
            ProxyError::MalformedRequest("header line exceeds size limit")
        } else if *budget == 0 {
            ProxyError::MalformedRequest("preamble exceeds size limit")
        } else {
            ProxyError::MalformedRequest("eof inside preamble")
        });
    }
    raw.pop();
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }

    String::from_utf8(raw)
        .map(Some)
        .map_err(|_| ProxyError::MalformedRequest("preamble is not valid UTF-8"))
}

/// ASCII token per the header-field grammar.
fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

fn classify_body(
    method: &str,
    headers: &[(String, String)],
    index: &HashMap<String, usize>,
) -> Result<BodyKind, ProxyError> {
    // Transfer-Encoding wins over Content-Length; the payload is relayed
    // as opaque bytes either way.
    if index.contains_key("transfer-encoding") {
        return Ok(BodyKind::UntilClose);
    }
    if let Some(&i) = index.get("content-length") {
        let n: u64 = headers[i]
            .1
            .trim()
            .parse()
            .map_err(|_| ProxyError::MalformedRequest("invalid Content-Length"))?;
        return Ok(BodyKind::Length(n));
    }
    // Without framing headers, only the write-ish methods may carry a
    // body (terminated by client close). Reading a body off a GET that
    // never sends one would hang on an open socket.
    match method {
        "POST" | "PUT" | "PATCH" => Ok(BodyKind::UntilClose),
        _ => Ok(BodyKind::None),
    }
}

/// Stream the request body from `reader` to `writer` in bounded chunks,
/// flushing after each chunk so the producer stays coupled to the
/// consumer. Returns the byte count. A client that closes before
/// delivering a declared `Content-Length` yields `PeerClosed`.
pub async fn stream_request_body<R, W>(
    body: BodyKind,
    reader: &mut R,
    writer: &mut W,
) -> Result<u64, ProxyError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut copied = 0u64;
    match body {
        BodyKind::None => {}
        BodyKind::Length(total) => {
            let mut buf = vec![0u8; CHUNK_SIZE.min(total.max(1) as usize)];
            let mut remaining = total;
            while remaining > 0 {
                let want = remaining.min(buf.len() as u64) as usize;
                let got = reader.read(&mut buf[..want]).await?;
                if got == 0 {
                    return Err(ProxyError::PeerClosed);
                }
                writer.write_all(&buf[..got]).await?;
                writer.flush().await?;
                remaining -= got as u64;
                copied += got as u64;
            }
        }
        BodyKind::UntilClose => {
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                let got = reader.read(&mut buf).await?;
                if got == 0 {
                    break;
                }
                writer.write_all(&buf[..got]).await?;
                writer.flush().await?;
                copied += got as u64;
            }
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn parse(input: &str) -> Result<RequestHead, ProxyError> {
        let mut reader = BufReader::new(input.as_bytes());
        read_request_head(&mut reader).await
    }

    #[tokio::test]
    async fn parses_a_simple_get() {
        let head = parse("GET /index.html HTTP/1.1\r\nHost: example\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(head.method(), "GET");
        assert_eq!(head.path(), "/index.html");
        assert_eq!(head.version(), "HTTP/1.1");
        assert_eq!(head.header("host"), Some("example"));
        assert_eq!(head.header("HOST"), Some("example"));
        assert_eq!(head.body(), BodyKind::None);
    }

    #[tokio::test]
    async fn preserves_order_and_duplicates() {
        let head = parse(
            "GET / HTTP/1.1\r\nHost: a\r\nX-Tag: one\r\nX-Tag: two\r\n\r\n",
        )
        .await
        .unwrap();
        let names: Vec<&str> = head.headers().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Host", "X-Tag", "X-Tag"]);
        // Lookup returns the first occurrence.
        assert_eq!(head.header("x-tag"), Some("one"));
    }

    #[tokio::test]
    async fn content_length_sets_body() {
        let head = parse("POST /e HTTP/1.1\r\nContent-Length: 11\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(head.body(), BodyKind::Length(11));
    }

    #[tokio::test]
    async fn transfer_encoding_wins_over_content_length() {
        let head = parse(
            "POST / HTTP/1.1\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\n",
        )
        .await
        .unwrap();
        assert_eq!(head.body(), BodyKind::UntilClose);
    }

    #[tokio::test]
    async fn post_without_framing_headers_streams_until_close() {
        let head = parse("POST /e HTTP/1.1\r\nHost: a\r\n\r\n").await.unwrap();
        assert_eq!(head.body(), BodyKind::UntilClose);
    }

    #[tokio::test]
    async fn bad_content_length_is_malformed() {
        let err = parse("POST / HTTP/1.1\r\nContent-Length: eleven\r\n\r\n")
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn rejects_unknown_version() {
        let err = parse("GET / HTTP/2.0\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn rejects_request_line_with_extra_tokens() {
        let err = parse("GET / HTTP/1.1 extra\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn rejects_header_without_colon() {
        let err = parse("GET / HTTP/1.1\r\nNoColonHere\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn immediate_close_is_peer_closed_not_malformed() {
        let err = parse("").await.unwrap_err();
        assert!(matches!(err, ProxyError::PeerClosed));
    }

    #[tokio::test]
    async fn eof_mid_preamble_is_malformed() {
        let err = parse("GET / HTTP/1.1\r\nHost: a\r\n").await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn oversized_header_line_is_rejected() {
        let input = format!("GET / HTTP/1.1\r\nX-Big: {}\r\n\r\n", "v".repeat(9_000));
        let err = parse(&input).await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn missing_terminator_within_budget_is_rejected() {
        // Headers that keep coming until the preamble budget runs out.
        let mut input = String::from("GET / HTTP/1.1\r\n");
        for i in 0..12 {
            input.push_str(&format!("X-Fill-{}: {}\r\n", i, "f".repeat(8_000)));
        }
        let err = parse(&input).await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn too_many_headers_rejected() {
        let mut input = String::from("GET / HTTP/1.1\r\n");
        for i in 0..(MAX_HEADER_COUNT + 1) {
            input.push_str(&format!("X-N-{}: v\r\n", i));
        }
        input.push_str("\r\n");
        let err = parse(&input).await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn emission_forces_close_and_trace_header() {
        let head = parse(
            "GET /p HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\nX-Trace-ID: stale\r\nAccept: */*\r\n\r\n",
        )
        .await
        .unwrap();

        let mut out = Vec::new();
        head.write_upstream_preamble(&mut out, "abc123").await.unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("GET /p HTTP/1.1\r\n"));
        assert!(text.contains("Host: x\r\n"));
        assert!(text.contains("Accept: */*\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.contains("X-Trace-ID: abc123\r\n"));
        assert!(!text.contains("keep-alive"));
        assert!(!text.contains("stale"));
        assert!(text.ends_with("\r\n\r\n"));
        // Re-emitted preamble parses back cleanly.
        let mut reader = BufReader::new(text.as_bytes());
        let reparsed = read_request_head(&mut reader).await.unwrap();
        assert_eq!(reparsed.header("connection"), Some("close"));
    }

    #[tokio::test]
    async fn streams_exactly_content_length_bytes() {
        let payload = b"hello world and then some trailing noise";
        let mut reader: &[u8] = payload;
        let mut out = Vec::new();
        let copied = stream_request_body(BodyKind::Length(11), &mut reader, &mut out)
            .await
            .unwrap();
        assert_eq!(copied, 11);
        assert_eq!(&out, b"hello world");
    }

    #[tokio::test]
    async fn short_body_read_is_peer_closed() {
        let mut reader: &[u8] = b"hi";
        let mut out = Vec::new();
        let err = stream_request_body(BodyKind::Length(10), &mut reader, &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::PeerClosed));
    }

    #[tokio::test]
    async fn until_close_copies_everything() {
        let mut reader: &[u8] = b"opaque chunked stuff";
        let mut out = Vec::new();
        let copied = stream_request_body(BodyKind::UntilClose, &mut reader, &mut out)
            .await
            .unwrap();
        assert_eq!(copied, 20);
        assert_eq!(&out, b"opaque chunked stuff");
    }
}
