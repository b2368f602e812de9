use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace, warn};

use crate::base::config::ConnectionSettings;
use crate::base::neterror::NetError;
use crate::h1::chunked::{self, ChunkedDecoder, DecodeStep};
use crate::http::request::HttpRequest;
use crate::http::response::{HttpResponse, ResponseBody};
use crate::socket::client::{BoxedSocket, StreamSocket};

/// Write-side coalescing buffer size; larger writes bypass the buffer.
const WRITE_BUFFER_SIZE: usize = 16 * 1024;

/// Read granularity for refilling the parse buffer.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Receives the connection back when its response body reaches a terminal
/// state. The pool is the single owner; the body only borrows the
/// connection for the duration of the read.
pub trait ConnectionReturn: Send {
    /// The response completed. `reusable` reflects keep-alive gating.
    fn return_connection(self: Box<Self>, conn: Http1Connection, reusable: bool);
    /// The connection was permanently detached (101 / CONNECT tunnel).
    fn detach(self: Box<Self>);
}

pub type ReturnHook = Box<dyn ConnectionReturn>;

/// Parsed response head.
struct ResponseHead {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    will_close: bool,
}

/// An exclusive HTTP/1.1 connection over one buffered duplex stream.
pub struct Http1Connection {
    socket: BoxedSocket,
    read_buf: BytesMut,
    write_buf: BytesMut,
    settings: Arc<ConnectionSettings>,
    created_at: Instant,
    idle_since: Instant,
    /// Cleared when the response forbids reuse (`Connection: close`,
    /// close-delimited body, skipped 100-continue body).
    reusable: bool,
    /// Set for upgrade/CONNECT passthrough; the connection never returns
    /// to the pool.
    detached: bool,
}

impl std::fmt::Debug for Http1Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http1Connection")
            .field("reusable", &self.reusable)
            .field("detached", &self.detached)
            .field("buffered", &self.read_buf.len())
            .finish()
    }
}

impl Http1Connection {
    pub fn new(socket: BoxedSocket, settings: Arc<ConnectionSettings>) -> Self {
        let now = Instant::now();
        Self {
            socket,
            read_buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            write_buf: BytesMut::with_capacity(WRITE_BUFFER_SIZE),
            settings,
            created_at: now,
            idle_since: now,
            reusable: true,
            detached: false,
        }
    }

    /// Whether the connection has outlived its configured lifetime.
    pub fn is_expired(&self) -> bool {
        match self.settings.pooled_connection_lifetime {
            Some(lifetime) => self.created_at.elapsed() >= lifetime,
            None => false,
        }
    }

    pub fn idle_duration(&self) -> Duration {
        self.idle_since.elapsed()
    }

    pub fn mark_returned(&mut self) {
        self.idle_since = Instant::now();
    }

    /// Liveness pre-check before reuse: keep-alive allowed, nothing
    /// unparsed on the wire, and the transport quiet.
    pub fn is_usable(&self) -> bool {
        if self.detached || !self.reusable || !self.read_buf.is_empty() {
            return false;
        }
        self.socket.is_connected_and_idle()
    }

    /// Serialize one request, parse one response. Consumes the connection;
    /// it comes back through `hook` when the body completes.
    pub async fn send_request(
        mut self,
        mut request: HttpRequest,
        hook: ReturnHook,
    ) -> Result<HttpResponse, NetError> {
        let method = request.method.clone();
        let is_connect = method == Method::CONNECT;

        self.write_request_head(&request)?;

        let head = if request.expect_continue && !request.body.is_empty() {
            self.flush().await?;
            self.exchange_with_continue(&mut request).await?
        } else {
            self.send_body(&mut request.body).await?;
            self.flush().await?;
            self.read_final_head().await?
        };

        self.reusable &= !head.will_close;

        let framing = select_framing(&method, is_connect, &head)?;
        trace!(status = %head.status, ?framing, "response head parsed");

        if matches!(framing, Framing::Upgrade) {
            self.detached = true;
            self.reusable = false;
        }

        let body = Http1Body::new(self, hook, framing);
        Ok(HttpResponse {
            status: head.status,
            version: head.version,
            headers: head.headers,
            body: ResponseBody::H1(body),
        })
    }

    // -- request serialization --

    fn write_request_head(&mut self, request: &HttpRequest) -> Result<(), NetError> {
        let mut head = Vec::with_capacity(256);
        head.extend_from_slice(request.method.as_str().as_bytes());
        head.push(b' ');
        head.extend_from_slice(request.target().as_bytes());
        head.extend_from_slice(b" HTTP/1.1\r\n");

        if !request.headers.contains_key(http::header::HOST) {
            head.extend_from_slice(b"host: ");
            head.extend_from_slice(request.authority()?.as_bytes());
            head.extend_from_slice(b"\r\n");
        }

        for (name, value) in request.headers.iter() {
            head.extend_from_slice(name.as_str().as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }

        match request.body.known_length() {
            Some(0) => {}
            Some(len) => {
                if !request.headers.contains_key(http::header::CONTENT_LENGTH) {
                    head.extend_from_slice(format!("content-length: {len}\r\n").as_bytes());
                }
            }
            None => {
                head.extend_from_slice(b"transfer-encoding: chunked\r\n");
            }
        }

        if request.expect_continue && !request.body.is_empty() {
            head.extend_from_slice(b"expect: 100-continue\r\n");
        }

        head.extend_from_slice(b"\r\n");
        self.write_buf.extend_from_slice(&head);
        Ok(())
    }

    async fn send_body(&mut self, body: &mut crate::http::RequestBody) -> Result<(), NetError> {
        match body.known_length() {
            Some(0) => Ok(()),
            Some(_) => {
                while let Some(chunk) = body.next_chunk().await? {
                    self.buffer(&chunk).await?;
                }
                Ok(())
            }
            None => {
                while let Some(chunk) = body.next_chunk().await? {
                    if chunk.is_empty() {
                        continue;
                    }
                    let mut framed = Vec::with_capacity(chunk.len() + 16);
                    chunked::encode_chunk(&chunk, &mut framed);
                    self.buffer(&framed).await?;
                }
                let mut last = Vec::with_capacity(8);
                chunked::encode_last_chunk(&mut last);
                self.buffer(&last).await
            }
        }
    }

    /// Expect:100-continue exchange. Headers are already flushed; the body
    /// waits behind a 1xx signal or the configured timeout, whichever
    /// comes first.
    async fn exchange_with_continue(
        &mut self,
        request: &mut HttpRequest,
    ) -> Result<ResponseHead, NetError> {
        let timeout = self.settings.expect_100_continue_timeout;
        let early = match tokio::time::timeout(timeout, self.parse_response_head()).await {
            // Timer fired first: the server is silent, send the body.
            Err(_) => None,
            Ok(head) => Some(head?),
        };

        match early {
            None => {
                self.send_body(&mut request.body).await?;
                self.flush().await?;
                self.read_final_head().await
            }
            Some(head) if head.status.as_u16() / 100 == 1 && head.status.as_u16() != 101 => {
                // Any informational status releases the body.
                self.send_body(&mut request.body).await?;
                self.flush().await?;
                self.read_final_head().await
            }
            Some(head) => {
                // Final status before the body went out: cancel the send.
                // The advertised body never followed the headers, so the
                // connection cannot be reused.
                debug!(status = %head.status, "100-continue: body send cancelled");
                self.reusable = false;
                Ok(head)
            }
        }
    }

    // -- response parsing --

    async fn read_final_head(&mut self) -> Result<ResponseHead, NetError> {
        loop {
            let head = self.parse_response_head().await?;
            let code = head.status.as_u16();
            if code / 100 == 1 && code != 101 {
                // Informational responses (100, 103) are skipped.
                continue;
            }
            return Ok(head);
        }
    }

    /// Incrementally scan for a complete head, enforcing the cumulative
    /// header byte budget before buffering anything beyond it.
    async fn parse_response_head(&mut self) -> Result<ResponseHead, NetError> {
        let budget = self.settings.max_response_headers_len;
        loop {
            if let Some(end) = find_double_crlf(&self.read_buf) {
                if end + 4 > budget {
                    return Err(NetError::ResponseHeadersTooBig);
                }
                let head_bytes = self.read_buf.split_to(end + 4);
                return parse_head(&head_bytes[..end]);
            }
            if self.read_buf.len() > budget {
                return Err(NetError::ResponseHeadersTooBig);
            }
            let n = self.fill_read_buf().await?;
            if n == 0 {
                return if self.read_buf.is_empty() {
                    Err(NetError::EmptyResponse)
                } else {
                    Err(NetError::InvalidHttpResponse)
                };
            }
        }
    }

    async fn fill_read_buf(&mut self) -> Result<usize, NetError> {
        self.read_buf.reserve(READ_CHUNK_SIZE);
        let n = self.socket.read_buf(&mut self.read_buf).await?;
        Ok(n)
    }

    // -- write buffering --

    /// Coalesce into the write buffer; flush when full. Writes at or above
    /// the buffer size go straight to the transport.
    async fn buffer(&mut self, data: &[u8]) -> Result<(), NetError> {
        if self.write_buf.len() + data.len() > WRITE_BUFFER_SIZE {
            self.flush().await?;
        }
        if data.len() >= WRITE_BUFFER_SIZE {
            self.socket.write_all(data).await?;
        } else {
            self.write_buf.extend_from_slice(data);
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), NetError> {
        if !self.write_buf.is_empty() {
            let data = self.write_buf.split();
            self.socket.write_all(&data).await?;
        }
        self.socket.flush().await?;
        Ok(())
    }
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parse status line + header lines. Obsolete folded continuation lines
/// are merged into the preceding value with a single space.
fn parse_head(head: &[u8]) -> Result<ResponseHead, NetError> {
    let mut lines = head.split(|&b| b == b'\n').map(|l| l.strip_suffix(b"\r").unwrap_or(l));

    let status_line = lines.next().ok_or(NetError::InvalidHttpResponse)?;
    let (version, status) = parse_status_line(status_line)?;

    let mut raw: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if line[0] == b' ' || line[0] == b'\t' {
            // Folded continuation: rewrite into the previous value.
            let Some(last) = raw.last_mut() else {
                return Err(NetError::InvalidHttpResponse);
            };
            last.1.push(b' ');
            last.1.extend_from_slice(trim_bytes(line));
            continue;
        }
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or(NetError::InvalidHttpResponse)?;
        let name = trim_bytes(&line[..colon]).to_vec();
        let value = trim_bytes(&line[colon + 1..]).to_vec();
        if name.is_empty() {
            return Err(NetError::InvalidHttpResponse);
        }
        raw.push((name, value));
    }

    let mut headers = HeaderMap::with_capacity(raw.len());
    let mut will_close = version == Version::HTTP_10;
    let mut seen_content_length: Option<Vec<u8>> = None;
    for (name, value) in raw {
        let header_name =
            HeaderName::from_bytes(&name).map_err(|_| NetError::InvalidHttpResponse)?;
        let header_value =
            HeaderValue::from_bytes(&value).map_err(|_| NetError::InvalidHttpResponse)?;
        if header_name == http::header::CONNECTION {
            for token in value.split(|&b| b == b',') {
                let token = trim_bytes(token);
                if token.eq_ignore_ascii_case(b"close") {
                    will_close = true;
                } else if token.eq_ignore_ascii_case(b"keep-alive") {
                    will_close = false;
                }
            }
        }
        if header_name == http::header::CONTENT_LENGTH {
            if let Some(prev) = &seen_content_length {
                if prev != &value {
                    return Err(NetError::InvalidHttpResponse);
                }
            }
            seen_content_length = Some(value.clone());
        }
        headers.append(header_name, header_value);
    }

    Ok(ResponseHead {
        status,
        version,
        headers,
        will_close,
    })
}

fn parse_status_line(line: &[u8]) -> Result<(Version, StatusCode), NetError> {
    let text = std::str::from_utf8(line).map_err(|_| NetError::InvalidHttpResponse)?;
    let mut parts = text.splitn(3, ' ');
    let version = match parts.next() {
        Some("HTTP/1.1") => Version::HTTP_11,
        Some("HTTP/1.0") => Version::HTTP_10,
        _ => return Err(NetError::InvalidHttpResponse),
    };
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or(NetError::InvalidHttpResponse)?;
    Ok((version, status))
}

fn trim_bytes(b: &[u8]) -> &[u8] {
    let start = b.iter().position(|&c| c != b' ' && c != b'\t').unwrap_or(b.len());
    let end = b
        .iter()
        .rposition(|&c| c != b' ' && c != b'\t')
        .map(|p| p + 1)
        .unwrap_or(start);
    &b[start..end]
}

/// Response body framing, selected once after the head parses.
#[derive(Debug)]
enum Framing {
    /// HEAD / 204 / 304 / zero content-length: complete immediately.
    Empty,
    /// Declared content-length; completes when the count is exhausted.
    ContentLength { remaining: u64 },
    /// Chunked transfer-coding.
    Chunked { decoder: ChunkedDecoder },
    /// No length information: read until the peer closes.
    ReadToEnd,
    /// 101 / CONNECT success: raw passthrough, connection detached.
    Upgrade,
}

fn select_framing(
    method: &Method,
    is_connect: bool,
    head: &ResponseHead,
) -> Result<Framing, NetError> {
    let status = head.status;

    if status == StatusCode::SWITCHING_PROTOCOLS || (is_connect && status.is_success()) {
        return Ok(Framing::Upgrade);
    }
    if *method == Method::HEAD
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(Framing::Empty);
    }

    let chunked = head
        .headers
        .get_all(http::header::TRANSFER_ENCODING)
        .iter()
        .flat_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case("chunked"));
    if chunked {
        return Ok(Framing::Chunked {
            decoder: ChunkedDecoder::new(),
        });
    }

    if let Some(value) = head.headers.get(http::header::CONTENT_LENGTH) {
        let len = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or(NetError::InvalidHttpResponse)?;
        if len == 0 {
            return Ok(Framing::Empty);
        }
        return Ok(Framing::ContentLength { remaining: len });
    }

    Ok(Framing::ReadToEnd)
}

/// Streaming HTTP/1.1 response body. Owns the connection until a terminal
/// state, then hands it back through the pool's return hook.
pub struct Http1Body {
    conn: Option<Http1Connection>,
    hook: Option<ReturnHook>,
    framing: Framing,
    trailers: Option<HeaderMap>,
    done: bool,
}

impl std::fmt::Debug for Http1Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http1Body")
            .field("framing", &self.framing)
            .field("done", &self.done)
            .finish()
    }
}

impl Http1Body {
    fn new(conn: Http1Connection, hook: ReturnHook, framing: Framing) -> Self {
        let mut body = Self {
            conn: Some(conn),
            hook: Some(hook),
            framing,
            trailers: None,
            done: false,
        };
        if matches!(body.framing, Framing::Empty) {
            body.finish();
        }
        body
    }

    /// Pull the next body chunk; `None` at end of body.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, NetError> {
        if self.done {
            return Ok(None);
        }
        let result = self.next_chunk_inner().await;
        match &result {
            Ok(None) => self.finish(),
            Err(e) => {
                warn!(error = %e, "response body read failed");
                self.dispose();
            }
            Ok(Some(_)) => {}
        }
        result
    }

    async fn next_chunk_inner(&mut self) -> Result<Option<Bytes>, NetError> {
        let conn = self.conn.as_mut().ok_or(NetError::ConnectionAborted)?;
        match &mut self.framing {
            Framing::Empty => Ok(None),
            Framing::ContentLength { remaining } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                if conn.read_buf.is_empty() {
                    let n = conn.fill_read_buf().await?;
                    if n == 0 {
                        return Err(NetError::ContentLengthMismatch);
                    }
                }
                let take = (*remaining).min(conn.read_buf.len() as u64) as usize;
                let data = conn.read_buf.split_to(take).freeze();
                *remaining -= take as u64;
                Ok(Some(data))
            }
            Framing::Chunked { decoder } => loop {
                match decoder.decode(&mut conn.read_buf)? {
                    DecodeStep::Data(data) => return Ok(Some(data)),
                    DecodeStep::Finished => {
                        let mut trailers = HeaderMap::new();
                        for (name, value) in decoder.take_trailers() {
                            if let (Ok(n), Ok(v)) = (
                                HeaderName::from_bytes(name.as_bytes()),
                                HeaderValue::from_str(&value),
                            ) {
                                trailers.append(n, v);
                            }
                        }
                        if !trailers.is_empty() {
                            self.trailers = Some(trailers);
                        }
                        return Ok(None);
                    }
                    DecodeStep::NeedMore => {
                        let n = conn.fill_read_buf().await?;
                        if n == 0 {
                            return Err(NetError::IncompleteChunkedEncoding);
                        }
                    }
                }
            },
            Framing::ReadToEnd | Framing::Upgrade => {
                if !conn.read_buf.is_empty() {
                    let data = conn.read_buf.split().freeze();
                    return Ok(Some(data));
                }
                let n = conn.fill_read_buf().await?;
                if n == 0 {
                    return Ok(None);
                }
                Ok(Some(conn.read_buf.split().freeze()))
            }
        }
    }

    /// Trailer headers, present after a chunked body finished with them.
    pub fn trailers(&self) -> Option<&HeaderMap> {
        self.trailers.as_ref()
    }

    /// Read and discard the rest of the body within the configured drain
    /// limits so the connection can be salvaged. Returns whether the body
    /// reached its end.
    pub async fn drain(&mut self) -> Result<bool, NetError> {
        if self.done {
            return Ok(true);
        }
        let (max_size, max_time) = match self.conn.as_ref() {
            Some(c) => (
                c.settings.max_response_drain_size,
                c.settings.max_response_drain_time,
            ),
            None => return Ok(false),
        };
        let mut drained = 0usize;
        let deadline = tokio::time::Instant::now() + max_time;

        loop {
            let next = tokio::time::timeout_at(deadline, self.chunk()).await;
            match next {
                Err(_) => {
                    self.dispose();
                    return Ok(false);
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(None)) => return Ok(true),
                Ok(Ok(Some(data))) => {
                    drained += data.len();
                    if drained > max_size {
                        self.dispose();
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// For upgrade/CONNECT responses: take the raw duplex connection.
    pub fn into_upgraded(mut self) -> Option<Http1Connection> {
        if matches!(self.framing, Framing::Upgrade) {
            if let Some(hook) = self.hook.take() {
                hook.detach();
            }
            self.done = true;
            self.conn.take()
        } else {
            None
        }
    }

    fn finish(&mut self) {
        self.done = true;
        let (Some(conn), Some(hook)) = (self.conn.take(), self.hook.take()) else {
            return;
        };
        if conn.detached {
            hook.detach();
            return;
        }
        // Reuse requires keep-alive gating passed and nothing unread
        // beyond the body end.
        let reusable = conn.reusable && conn.read_buf.is_empty();
        hook.return_connection(conn, reusable);
    }

    fn dispose(&mut self) {
        self.done = true;
        if let (Some(conn), Some(hook)) = (self.conn.take(), self.hook.take()) {
            hook.return_connection(conn, false);
        }
    }
}

impl Drop for Http1Body {
    fn drop(&mut self) {
        if !self.done {
            if let (Some(conn), Some(hook)) = (self.conn.take(), self.hook.take()) {
                // Unfinished body: the connection state is unknown.
                hook.return_connection(conn, false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_variants() {
        assert_eq!(
            parse_status_line(b"HTTP/1.1 200 OK").unwrap(),
            (Version::HTTP_11, StatusCode::OK)
        );
        assert_eq!(
            parse_status_line(b"HTTP/1.0 404 Not Found").unwrap(),
            (Version::HTTP_10, StatusCode::NOT_FOUND)
        );
        // Reason phrase is optional.
        assert_eq!(
            parse_status_line(b"HTTP/1.1 204").unwrap(),
            (Version::HTTP_11, StatusCode::NO_CONTENT)
        );
        assert!(parse_status_line(b"HTTP/2 200 OK").is_err());
        assert!(parse_status_line(b"garbage").is_err());
    }

    #[test]
    fn head_parse_with_folded_header() {
        let head =
            b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\nx-folded: first\r\n second part\r\n";
        let parsed = parse_head(head).unwrap();
        assert_eq!(parsed.status, StatusCode::OK);
        assert_eq!(
            parsed.headers.get("x-folded").unwrap(),
            "first second part"
        );
    }

    #[test]
    fn connection_close_detected() {
        let head = b"HTTP/1.1 200 OK\r\nconnection: close\r\n";
        assert!(parse_head(head).unwrap().will_close);

        let head = b"HTTP/1.1 200 OK\r\ncontent-length: 3\r\n";
        assert!(!parse_head(head).unwrap().will_close);

        // HTTP/1.0 defaults to close without keep-alive.
        let head = b"HTTP/1.0 200 OK\r\n";
        assert!(parse_head(head).unwrap().will_close);
        let head = b"HTTP/1.0 200 OK\r\nconnection: keep-alive\r\n";
        assert!(!parse_head(head).unwrap().will_close);
    }

    #[test]
    fn conflicting_content_length_rejected() {
        let head = b"HTTP/1.1 200 OK\r\ncontent-length: 3\r\ncontent-length: 5\r\n";
        assert!(parse_head(head).is_err());
        // Duplicate-but-identical is tolerated.
        let head = b"HTTP/1.1 200 OK\r\ncontent-length: 3\r\ncontent-length: 3\r\n";
        assert!(parse_head(head).is_ok());
    }

    #[test]
    fn framing_selection() {
        let head = parse_head(b"HTTP/1.1 204 No Content\r\n").unwrap();
        assert!(matches!(
            select_framing(&Method::GET, false, &head).unwrap(),
            Framing::Empty
        ));

        let head = parse_head(b"HTTP/1.1 200 OK\r\ncontent-length: 10\r\n").unwrap();
        assert!(matches!(
            select_framing(&Method::HEAD, false, &head).unwrap(),
            Framing::Empty
        ));
        assert!(matches!(
            select_framing(&Method::GET, false, &head).unwrap(),
            Framing::ContentLength { remaining: 10 }
        ));

        let head =
            parse_head(b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n").unwrap();
        assert!(matches!(
            select_framing(&Method::GET, false, &head).unwrap(),
            Framing::Chunked { .. }
        ));

        let head = parse_head(b"HTTP/1.1 200 OK\r\n").unwrap();
        assert!(matches!(
            select_framing(&Method::GET, false, &head).unwrap(),
            Framing::ReadToEnd
        ));

        let head = parse_head(b"HTTP/1.1 200 OK\r\n").unwrap();
        assert!(matches!(
            select_framing(&Method::CONNECT, true, &head).unwrap(),
            Framing::Upgrade
        ));
    }

    #[test]
    fn bad_content_length_rejected() {
        let head = parse_head(b"HTTP/1.1 200 OK\r\ncontent-length: nope\r\n").unwrap();
        assert!(select_framing(&Method::GET, false, &head).is_err());
    }
}
