use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::{Buf, BytesMut};
use http::Version;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::base::config::ConnectionSettings;
use crate::base::neterror::NetError;
use crate::codec::qpack;
use crate::h2::connection::build_request_fields;
use crate::h3::frame::{self, decode_frame_header, is_reserved_h2_type};
use crate::h3::quic::{
    QuicConnection, QuicRecvStream, QuicSendStream, H3_CLOSED_CRITICAL_STREAM, H3_FRAME_UNEXPECTED,
    H3_ID_ERROR, H3_MISSING_SETTINGS, H3_NO_ERROR, H3_STREAM_CREATION_ERROR,
};
use crate::h3::settings::Settings;
use crate::h3::stream::{Http3Body, Http3RequestStream};
use crate::http::request::HttpRequest;
use crate::http::response::{HttpResponse, ResponseBody};

// Unidirectional stream type prefixes (RFC 9114 Section 6.2).
const STREAM_TYPE_CONTROL: u64 = 0x00;
const STREAM_TYPE_PUSH: u64 = 0x01;
const STREAM_TYPE_QPACK_ENCODER: u64 = 0x02;
const STREAM_TYPE_QPACK_DECODER: u64 = 0x03;

struct H3ConnState {
    closed: Option<NetError>,
    shutting_down: bool,
    control_seen: bool,
    qpack_encoder_seen: bool,
    qpack_decoder_seen: bool,
    remote_settings: Option<Settings>,
}

/// A client-side HTTP/3 connection over an abstract QUIC transport.
///
/// Setup opens the local control stream and sends SETTINGS before any
/// peer-initiated stream is accepted; an accept loop then classifies
/// incoming unidirectional streams for the connection's lifetime.
pub struct Http3Connection {
    quic: Arc<dyn QuicConnection>,
    settings: Arc<ConnectionSettings>,
    state: Mutex<H3ConnState>,
    /// First-unprocessed-request-id cutoff from a peer GOAWAY.
    goaway_tx: watch::Sender<Option<u64>>,
    /// Keeps the control send stream open: closing it is a connection
    /// error for the peer.
    control_send: Mutex<Option<Box<dyn QuicSendStream>>>,
    active_requests: AtomicUsize,
    created_at: Instant,
    idle_since: Mutex<Instant>,
}

impl std::fmt::Debug for Http3Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("Http3Connection")
            .field("shutting_down", &state.shutting_down)
            .field("closed", &state.closed)
            .field("active_requests", &self.active_requests.load(Ordering::Relaxed))
            .finish()
    }
}

impl Http3Connection {
    /// Establish the HTTP/3 layer on an already-connected QUIC session.
    pub async fn new(
        quic: Arc<dyn QuicConnection>,
        settings: Arc<ConnectionSettings>,
    ) -> Result<Arc<Self>, NetError> {
        // Control stream first: type prefix + SETTINGS, before accepting
        // anything from the peer.
        let mut control = quic.open_unidirectional().await?;
        let local_settings = Settings::client(settings.max_response_headers_len as u64);
        let mut buf = Vec::with_capacity(16);
        frame::encode_varint(&mut buf, STREAM_TYPE_CONTROL);
        frame::encode_frame_header(
            &mut buf,
            frame::FRAME_SETTINGS,
            local_settings.encoded_len() as u64,
        );
        local_settings.encode(&mut buf);
        control.write_all(&buf).await.map_err(NetError::from)?;
        control.flush().await.map_err(NetError::from)?;

        let (goaway_tx, _) = watch::channel(None);
        let now = Instant::now();
        let conn = Arc::new(Self {
            quic,
            settings,
            state: Mutex::new(H3ConnState {
                closed: None,
                shutting_down: false,
                control_seen: false,
                qpack_encoder_seen: false,
                qpack_decoder_seen: false,
                remote_settings: None,
            }),
            goaway_tx,
            control_send: Mutex::new(Some(control)),
            active_requests: AtomicUsize::new(0),
            created_at: now,
            idle_since: Mutex::new(now),
        });

        tokio::spawn(Arc::clone(&conn).accept_loop());
        Ok(conn)
    }

    // -- pool-facing surface --

    pub fn is_shutting_down(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.shutting_down || state.closed.is_some() || self.quic.is_closed()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed.is_some() || self.quic.is_closed()
    }

    pub fn is_expired(&self) -> bool {
        match self.settings.pooled_connection_lifetime {
            Some(lifetime) => self.created_at.elapsed() >= lifetime,
            None => false,
        }
    }

    pub fn active_request_count(&self) -> usize {
        self.active_requests.load(Ordering::Relaxed)
    }

    pub fn idle_duration(&self) -> std::time::Duration {
        self.idle_since.lock().unwrap().elapsed()
    }

    /// Stop taking new requests; the transport closes once drained.
    pub fn shutdown(&self) {
        self.state.lock().unwrap().shutting_down = true;
        if self.active_request_count() == 0 {
            self.quic.close(H3_NO_ERROR);
        }
    }

    /// Send one request on a fresh bidirectional stream.
    pub async fn send_request(
        self: &Arc<Self>,
        mut request: HttpRequest,
    ) -> Result<HttpResponse, NetError> {
        {
            let state = self.state.lock().unwrap();
            if let Some(err) = state.closed {
                return Err(err);
            }
            if state.shutting_down {
                return Err(NetError::RetryOnNewConnection);
            }
        }

        // Blocks while the peer's concurrent-stream budget is exhausted.
        let (mut send, recv) = self.quic.open_bidirectional().await?;
        let id = send.id();

        if let Some(cutoff) = *self.goaway_tx.subscribe().borrow() {
            if id >= cutoff {
                send.reset(H3_NO_ERROR);
                return Err(NetError::RetryOnNewConnection);
            }
        }

        self.active_requests.fetch_add(1, Ordering::Relaxed);
        let result = self.exchange(&mut request, &mut send, recv, id).await;
        if result.is_err() {
            send.reset(H3_NO_ERROR);
            self.request_finished();
        }
        result
    }

    async fn exchange(
        self: &Arc<Self>,
        request: &mut HttpRequest,
        send: &mut Box<dyn QuicSendStream>,
        recv: Box<dyn QuicRecvStream>,
        id: u64,
    ) -> Result<HttpResponse, NetError> {
        let fields = build_request_fields(request)?;
        let mut head_buf = Vec::with_capacity(256);
        let mut block = Vec::with_capacity(128);
        qpack::encode(&fields, &mut block);
        frame::encode_frame_header(&mut head_buf, frame::FRAME_HEADERS, block.len() as u64);
        head_buf.extend_from_slice(&block);

        let expect_continue = request.expect_continue && !request.body.is_empty();
        let known_len = request.body.known_length();

        let mut rs = Http3RequestStream::new(
            id,
            recv,
            self.goaway_tx.subscribe(),
            self.settings.max_response_headers_len,
        );

        if expect_continue {
            send.write_all(&head_buf).await.map_err(NetError::from)?;
            send.flush().await.map_err(NetError::from)?;
            let proceed = match tokio::time::timeout(
                self.settings.expect_100_continue_timeout,
                rs.next_head_block(),
            )
            .await
            {
                Err(_) => true,
                Ok(Ok(Some(head))) if head.status.is_informational() => true,
                Ok(Ok(Some(head))) => {
                    // Final response preempted the body.
                    send.shutdown().await.ok();
                    trace!(stream = id, status = %head.status, "body send cancelled");
                    let body = Http3Body::new(rs, Arc::clone(self));
                    return Ok(HttpResponse {
                        status: head.status,
                        version: Version::HTTP_3,
                        headers: head.headers,
                        body: ResponseBody::H3(body),
                    });
                }
                Ok(Ok(None)) => return Err(NetError::Http3ProtocolError),
                Ok(Err(e)) => return Err(self.classify_stream_error(e)),
            };
            if proceed {
                self.send_body(send, request, known_len, &mut Vec::new()).await?;
            }
        } else if request.body.is_empty() {
            send.write_all(&head_buf).await.map_err(NetError::from)?;
        } else {
            // Known content length: the single DATA envelope rides in the
            // same gathered write as the headers.
            self.send_body(send, request, known_len, &mut head_buf).await?;
        }
        send.shutdown().await.map_err(NetError::from)?;

        let head = match rs.read_final_head().await {
            Ok(head) => head,
            Err(e) => return Err(self.classify_stream_error(e)),
        };
        trace!(stream = id, status = %head.status, "response head received");

        Ok(HttpResponse {
            status: head.status,
            version: Version::HTTP_3,
            headers: head.headers,
            body: ResponseBody::H3(Http3Body::new(rs, Arc::clone(self))),
        })
    }

    /// Write the request body as DATA frames. With a known length the
    /// caller passes the pending header bytes so envelope + headers leave
    /// in one write.
    async fn send_body(
        &self,
        send: &mut Box<dyn QuicSendStream>,
        request: &mut HttpRequest,
        known_len: Option<u64>,
        pending: &mut Vec<u8>,
    ) -> Result<(), NetError> {
        match known_len {
            Some(0) => {
                if !pending.is_empty() {
                    send.write_all(pending).await.map_err(NetError::from)?;
                }
            }
            Some(len) => {
                frame::encode_frame_header(pending, frame::FRAME_DATA, len);
                let mut sent = 0u64;
                while let Some(chunk) = request.body.next_chunk().await? {
                    sent += chunk.len() as u64;
                    if sent > len {
                        return Err(NetError::ContentLengthMismatch);
                    }
                    if !pending.is_empty() {
                        send.write_all(pending).await.map_err(NetError::from)?;
                        pending.clear();
                    }
                    send.write_all(&chunk).await.map_err(NetError::from)?;
                }
                if !pending.is_empty() {
                    // Empty body stream despite a declared length.
                    send.write_all(pending).await.map_err(NetError::from)?;
                    pending.clear();
                }
                if sent != len {
                    return Err(NetError::ContentLengthMismatch);
                }
            }
            None => {
                if !pending.is_empty() {
                    send.write_all(pending).await.map_err(NetError::from)?;
                    pending.clear();
                }
                while let Some(chunk) = request.body.next_chunk().await? {
                    if chunk.is_empty() {
                        continue;
                    }
                    let mut envelope = Vec::with_capacity(16);
                    frame::encode_frame_header(
                        &mut envelope,
                        frame::FRAME_DATA,
                        chunk.len() as u64,
                    );
                    send.write_all(&envelope).await.map_err(NetError::from)?;
                    send.write_all(&chunk).await.map_err(NetError::from)?;
                }
            }
        }
        Ok(())
    }

    /// Frame violations that implicate the whole connection tear it down;
    /// everything else stays scoped to the one stream.
    fn classify_stream_error(&self, error: NetError) -> NetError {
        if error == NetError::Http3FrameUnexpected {
            self.abort_connection(error, H3_FRAME_UNEXPECTED);
        }
        error
    }

    pub(crate) fn note_request_stream_error(&self, error: NetError) {
        let _ = self.classify_stream_error(error);
    }

    pub(crate) fn request_finished(&self) {
        let before = self.active_requests.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(before > 0);
        *self.idle_since.lock().unwrap() = Instant::now();
        if before == 1 && self.state.lock().unwrap().shutting_down {
            self.quic.close(H3_NO_ERROR);
        }
    }

    fn abort_connection(&self, error: NetError, code: u64) {
        {
            let mut state = self.state.lock().unwrap();
            if state.closed.is_some() {
                return;
            }
            state.closed = Some(error);
            state.shutting_down = true;
        }
        warn!(error = %error, code, "HTTP/3 connection aborted");
        self.quic.close(code);
        // Wake request streams parked on the GOAWAY watch.
        self.goaway_tx.send_replace(Some(0));
    }

    // -- peer-initiated unidirectional streams --

    async fn accept_loop(self: Arc<Self>) {
        loop {
            let recv = match self.quic.accept_unidirectional().await {
                Ok(recv) => recv,
                Err(_) => {
                    // Transport gone: surface through normal stream errors.
                    let mut state = self.state.lock().unwrap();
                    if state.closed.is_none() {
                        state.closed = Some(NetError::ConnectionClosed);
                        state.shutting_down = true;
                    }
                    return;
                }
            };
            if let Err(e) = self.classify_uni_stream(recv).await {
                self.abort_connection(e, H3_STREAM_CREATION_ERROR);
                return;
            }
        }
    }

    async fn classify_uni_stream(
        self: &Arc<Self>,
        mut recv: Box<dyn QuicRecvStream>,
    ) -> Result<(), NetError> {
        let stream_type = match read_stream_type(&mut recv).await? {
            Some(t) => t,
            None => return Ok(()), // closed before the type byte
        };
        match stream_type {
            STREAM_TYPE_CONTROL => {
                {
                    let mut state = self.state.lock().unwrap();
                    if state.control_seen {
                        // Exactly one control stream is allowed.
                        return Err(NetError::Http3ProtocolError);
                    }
                    state.control_seen = true;
                }
                let conn = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = conn.control_loop(recv).await {
                        let code = match e {
                            NetError::Http3ClosedCriticalStream => H3_CLOSED_CRITICAL_STREAM,
                            NetError::Http3FrameUnexpected => H3_FRAME_UNEXPECTED,
                            _ => H3_MISSING_SETTINGS,
                        };
                        conn.abort_connection(e, code);
                    }
                });
                Ok(())
            }
            STREAM_TYPE_PUSH => {
                // Server push is unsupported and we never raised
                // MAX_PUSH_ID: any push stream is an id-space violation.
                self.abort_connection(NetError::Http3ProtocolError, H3_ID_ERROR);
                Err(NetError::Http3ProtocolError)
            }
            STREAM_TYPE_QPACK_ENCODER | STREAM_TYPE_QPACK_DECODER => {
                {
                    let mut state = self.state.lock().unwrap();
                    let seen = if stream_type == STREAM_TYPE_QPACK_ENCODER {
                        &mut state.qpack_encoder_seen
                    } else {
                        &mut state.qpack_decoder_seen
                    };
                    if *seen {
                        // Duplicates carry nothing we use; drain them too.
                        debug!(stream_type, "duplicate QPACK stream ignored");
                    }
                    *seen = true;
                }
                // No dynamic QPACK table: drain and discard forever.
                tokio::spawn(async move {
                    let mut sink = [0u8; 4096];
                    while let Ok(n) = recv.read(&mut sink).await {
                        if n == 0 {
                            break;
                        }
                    }
                });
                Ok(())
            }
            other => {
                trace!(stream_type = other, "unknown uni stream aborted");
                recv.stop(H3_STREAM_CREATION_ERROR);
                Ok(())
            }
        }
    }

    async fn control_loop(
        self: &Arc<Self>,
        mut recv: Box<dyn QuicRecvStream>,
    ) -> Result<(), NetError> {
        let mut buf = BytesMut::with_capacity(4096);
        let mut first_frame = true;
        loop {
            let envelope = loop {
                match decode_frame_header(&buf)? {
                    Some((frame_type, len, consumed)) => {
                        buf.advance(consumed);
                        break Some((frame_type, len));
                    }
                    None => {
                        buf.reserve(4096);
                        let n = recv
                            .read_buf(&mut buf)
                            .await
                            .map_err(|e| NetError::from_io(&e))?;
                        if n == 0 {
                            if buf.is_empty() {
                                break None;
                            }
                            return Err(NetError::Http3ProtocolError);
                        }
                    }
                }
            };

            let Some((frame_type, len)) = envelope else {
                // The peer closed its control stream: connection error.
                return Err(NetError::Http3ClosedCriticalStream);
            };

            if is_reserved_h2_type(frame_type) {
                return Err(NetError::Http3FrameUnexpected);
            }
            if first_frame && frame_type != frame::FRAME_SETTINGS {
                return Err(NetError::Http3ProtocolError);
            }

            // Pull the whole payload (control frames are small).
            while (buf.len() as u64) < len {
                buf.reserve(4096);
                let n = recv
                    .read_buf(&mut buf)
                    .await
                    .map_err(|e| NetError::from_io(&e))?;
                if n == 0 {
                    return Err(NetError::Http3ClosedCriticalStream);
                }
            }
            let payload = buf.split_to(len as usize);

            match frame_type {
                frame::FRAME_SETTINGS => {
                    let settings = Settings::decode(&payload)?;
                    let mut state = self.state.lock().unwrap();
                    if state.remote_settings.is_some() {
                        return Err(NetError::Http3FrameUnexpected);
                    }
                    debug!(?settings, "peer SETTINGS received");
                    state.remote_settings = Some(settings);
                }
                frame::FRAME_GOAWAY => {
                    let (id, _) = frame::decode_varint(&payload)
                        .ok_or(NetError::Http3ProtocolError)?;
                    let previous = *self.goaway_tx.subscribe().borrow();
                    if let Some(prev) = previous {
                        // The cutoff may only move down.
                        if id > prev {
                            return Err(NetError::Http3ProtocolError);
                        }
                    }
                    debug!(cutoff = id, "GOAWAY received");
                    self.state.lock().unwrap().shutting_down = true;
                    self.goaway_tx.send_replace(Some(id));
                }
                frame::FRAME_DATA | frame::FRAME_HEADERS => {
                    return Err(NetError::Http3FrameUnexpected);
                }
                frame::FRAME_CANCEL_PUSH | frame::FRAME_PUSH_PROMISE
                | frame::FRAME_MAX_PUSH_ID => {
                    // Push machinery we never enabled.
                    return Err(NetError::Http3FrameUnexpected);
                }
                _ => {
                    // Unknown control frames are ignored.
                }
            }
            first_frame = false;
        }
    }
}

impl Drop for Http3Connection {
    fn drop(&mut self) {
        if let Some(control) = self.control_send.lock().unwrap().take() {
            drop(control);
        }
        self.quic.close(H3_NO_ERROR);
    }
}

/// Read the unidirectional stream's type varint. `None` when the stream
/// ended before delivering it.
async fn read_stream_type(
    recv: &mut Box<dyn QuicRecvStream>,
) -> Result<Option<u64>, NetError> {
    let mut buf = Vec::with_capacity(8);
    loop {
        if let Some((value, _)) = frame::decode_varint(&buf) {
            return Ok(Some(value));
        }
        let mut byte = [0u8; 1];
        let n = recv.read(&mut byte).await.map_err(|e| NetError::from_io(&e))?;
        if n == 0 {
            return Ok(None);
        }
        buf.push(byte[0]);
    }
}
