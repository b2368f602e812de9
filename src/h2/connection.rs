use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use bytes::Bytes;
use http::Version;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace, warn};

use crate::base::config::{ConnectionSettings, KeepAlivePingPolicy};
use crate::base::neterror::NetError;
use crate::codec::{hpack, CodecError, HeaderField};
use crate::h2::flowcontrol::{FlowControl, SendCredit};
use crate::h2::frame::{
    self, ErrorCode, Frame, FrameHeader, FRAME_HEADER_LEN, MAX_FRAME_SIZE,
};
use crate::h2::rtt::RttEstimator;
use crate::h2::settings::Settings;
use crate::h2::stream::{Http2Body, Http2StreamShared};
use crate::http::request::HttpRequest;
use crate::http::response::{HttpResponse, ResponseBody};
use crate::socket::client::BoxedSocket;

/// HTTP/2 connection preface (RFC 7540 Section 3.5).
const CLIENT_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Our connection-level receive window after the setup extension.
const CONNECTION_WINDOW_SIZE: u32 = 64 * 1024 * 1024;

/// Batch threshold for connection-level WINDOW_UPDATE frames.
const CONNECTION_WINDOW_THRESHOLD: u32 = CONNECTION_WINDOW_SIZE / 8;

/// Writer flushes once its coalescing buffer reaches this size.
const WRITE_FLUSH_THRESHOLD: usize = 32 * 1024;

/// PING payload reserved for keep-alive probes; RTT pings count from 1.
const KEEPALIVE_PING_PAYLOAD: u64 = 0;

/// One entry in the write-serialization queue: a reserved byte count and a
/// callback that renders the frame into the reserved slice. The consumer
/// emits entries strictly in submission order, so frames never interleave
/// mid-frame and HEADERS+CONTINUATION sequences stay contiguous.
struct WriteRequest {
    len: usize,
    flush: bool,
    render: Box<dyn FnOnce(&mut [u8]) + Send>,
}

enum WriteItem {
    Frame(WriteRequest),
    Shutdown,
}

struct ConnInner {
    streams: HashMap<u32, Arc<Http2StreamShared>>,
    /// Next client stream id; odd, strictly increasing, assigned at
    /// header-send time under this lock.
    next_stream_id: u32,
    /// Streams reserved or in the map; never exceeds `max_concurrent`.
    active_streams: usize,
    max_concurrent_streams: usize,
    remote_initial_window: i64,
    remote_max_frame_size: usize,
    goaway_last_id: Option<u32>,
    shutting_down: bool,
    closed: Option<NetError>,
    encoder: hpack::Encoder,
    /// Pending HPACK table shrink requested by the peer's SETTINGS.
    pending_encoder_size: Option<usize>,
}

struct KeepaliveState {
    awaiting_ack_since: Option<Instant>,
}

/// A multiplexed client-side HTTP/2 connection.
///
/// Owns its transport exclusively: a read-loop task parses frames, a
/// write-loop task serializes them, and request coroutines coordinate
/// through the stream map and the write queue.
pub struct Http2Connection {
    settings: Arc<ConnectionSettings>,
    inner: Mutex<ConnInner>,
    write_tx: mpsc::UnboundedSender<WriteItem>,
    conn_send_credit: SendCredit,
    rtt: RttEstimator,
    /// Wakes requests waiting for concurrent-stream credit.
    stream_slots: Notify,
    last_activity: Mutex<Instant>,
    keepalive: Mutex<KeepaliveState>,
    created_at: Instant,
    idle_since: Mutex<Instant>,
    /// Latest `Alt-Svc` value delivered via an ALTSVC frame.
    altsvc: Mutex<Option<String>>,
}

impl std::fmt::Debug for Http2Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("Http2Connection")
            .field("active_streams", &inner.active_streams)
            .field("shutting_down", &inner.shutting_down)
            .field("goaway_last_id", &inner.goaway_last_id)
            .field("closed", &inner.closed)
            .finish()
    }
}

impl Http2Connection {
    /// Take ownership of `socket`, emit the client preface, and spawn the
    /// frame read loop and write-serialization loop.
    pub fn new(socket: BoxedSocket, settings: Arc<ConnectionSettings>) -> Arc<Self> {
        let (reader, writer) = tokio::io::split(socket);
        let (write_tx, write_rx) = mpsc::unbounded_channel();

        let now = Instant::now();
        let conn = Arc::new(Self {
            inner: Mutex::new(ConnInner {
                streams: HashMap::new(),
                next_stream_id: 1,
                active_streams: 0,
                max_concurrent_streams: usize::MAX,
                remote_initial_window: crate::h2::flowcontrol::DEFAULT_WINDOW_SIZE,
                remote_max_frame_size: MAX_FRAME_SIZE as usize,
                goaway_last_id: None,
                shutting_down: false,
                closed: None,
                encoder: hpack::Encoder::new(4096),
                pending_encoder_size: None,
            }),
            write_tx,
            conn_send_credit: SendCredit::new(crate::h2::flowcontrol::DEFAULT_WINDOW_SIZE),
            rtt: RttEstimator::new(),
            stream_slots: Notify::new(),
            last_activity: Mutex::new(now),
            keepalive: Mutex::new(KeepaliveState {
                awaiting_ack_since: None,
            }),
            created_at: now,
            idle_since: Mutex::new(now),
            altsvc: Mutex::new(None),
            settings: Arc::clone(&settings),
        });

        conn.queue_preface();

        tokio::spawn(Self::write_loop(
            Arc::downgrade(&conn),
            write_rx,
            writer,
        ));
        {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                let err = match conn.run_read_loop(reader).await {
                    Ok(()) => NetError::ConnectionClosed,
                    Err(e) => e,
                };
                conn.abort_connection(err);
            });
        }
        if settings.keep_alive_ping_delay.is_some() {
            tokio::spawn(Self::keepalive_loop(Arc::downgrade(&conn)));
        }
        conn
    }

    fn queue_preface(&self) {
        let client_settings = Settings::client(
            self.settings.initial_http2_stream_window_size,
            self.settings.max_response_headers_len as u32,
        );
        let mut buf = Vec::with_capacity(CLIENT_PREFACE.len() + 64);
        buf.extend_from_slice(CLIENT_PREFACE);
        frame::encode_settings_frame(&client_settings, false, &mut buf);
        frame::encode_window_update_frame(
            0,
            CONNECTION_WINDOW_SIZE - crate::h2::flowcontrol::DEFAULT_WINDOW_SIZE as u32,
            &mut buf,
        );
        let _ = self.enqueue_bytes(buf, true);
    }

    // -- pool-facing surface --

    /// Whether a new stream could be opened right now without waiting.
    pub fn can_accept_new_stream(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.closed.is_none()
            && !inner.shutting_down
            && inner.active_streams < inner.max_concurrent_streams
    }

    pub fn is_shutting_down(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.shutting_down || inner.closed.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed.is_some()
    }

    pub fn is_expired(&self) -> bool {
        match self.settings.pooled_connection_lifetime {
            Some(lifetime) => self.created_at.elapsed() >= lifetime,
            None => false,
        }
    }

    pub fn active_stream_count(&self) -> usize {
        self.inner.lock().unwrap().active_streams
    }

    pub fn idle_duration(&self) -> std::time::Duration {
        self.idle_since.lock().unwrap().elapsed()
    }

    pub fn mark_returned(&self) {
        *self.idle_since.lock().unwrap() = Instant::now();
    }

    /// Latest ALTSVC frame value, if the server advertised one.
    pub fn take_alt_svc(&self) -> Option<String> {
        self.altsvc.lock().unwrap().take()
    }

    /// Graceful local shutdown: no new streams; in-flight streams finish.
    pub fn shutdown(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.shutting_down {
                return;
            }
            inner.shutting_down = true;
        }
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + 8);
        frame::encode_goaway_frame(0, ErrorCode::NoError, &mut buf);
        let _ = self.enqueue_bytes(buf, true);
        self.stream_slots.notify_waiters();
    }

    /// Send one request over a new stream on this connection.
    pub async fn send_request(
        self: &Arc<Self>,
        mut request: HttpRequest,
    ) -> Result<HttpResponse, NetError> {
        let fields = build_request_fields(&request)?;
        let body_empty = request.body.is_empty();
        let expect_continue = request.expect_continue && !body_empty;
        let end_stream = body_empty && !expect_continue;

        self.reserve_stream_slot().await?;

        // Stream id assignment, HPACK encoding, and write-queue submission
        // happen under one lock so wire order matches encoder order.
        let stream = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(err) = inner.closed {
                self.release_slot(&mut inner);
                return Err(err);
            }
            if inner.shutting_down {
                self.release_slot(&mut inner);
                return Err(NetError::RetryOnNewConnection);
            }

            let id = inner.next_stream_id;
            inner.next_stream_id += 2;

            let mut block = Vec::with_capacity(128);
            if let Some(size) = inner.pending_encoder_size.take() {
                inner.encoder.set_max_table_size(size, &mut block);
            }
            inner.encoder.encode(&fields, &mut block);

            let stream = Arc::new(Http2StreamShared::new(
                id,
                self.settings.initial_http2_stream_window_size,
                inner.remote_initial_window,
            ));
            inner.streams.insert(id, Arc::clone(&stream));

            let mut frames = Vec::with_capacity(block.len() + FRAME_HEADER_LEN * 2);
            frame::encode_headers_frames(
                id,
                &block,
                end_stream,
                inner.remote_max_frame_size,
                &mut frames,
            );
            // End-of-stream and Expect:100-continue headers demand a
            // flush. The submission stays under the lock: wire order must
            // match HPACK encoder order.
            let len = frames.len();
            let sent = self.write_tx.send(WriteItem::Frame(WriteRequest {
                len,
                flush: end_stream || expect_continue,
                render: Box::new(move |slice| slice.copy_from_slice(&frames)),
            }));
            if sent.is_err() {
                let err = inner.closed.unwrap_or(NetError::ConnectionAborted);
                inner.streams.remove(&id);
                self.release_slot(&mut inner);
                return Err(err);
            }
            trace!(stream = id, end_stream, "request headers queued");
            stream
        };

        if !end_stream {
            let send_body = if expect_continue {
                match tokio::time::timeout(
                    self.settings.expect_100_continue_timeout,
                    stream.wait_for_continue(),
                )
                .await
                {
                    // Timer fired: stop waiting and send anyway.
                    Err(_) => true,
                    Ok(Ok(go)) => go,
                    Ok(Err(e)) => {
                        self.cancel_stream(stream.id);
                        return Err(e);
                    }
                }
            } else {
                true
            };

            if send_body {
                if let Err(e) = self.send_body(&stream, &mut request).await {
                    // A body-send fault is only fatal while no response
                    // exists; a server may legitimately complete the
                    // exchange before consuming the whole body.
                    let response_ready = stream.inner.lock().unwrap().head.is_some();
                    if !response_ready {
                        self.cancel_stream(stream.id);
                        return Err(e);
                    }
                }
            } else {
                // Final response preempted the body; close our side.
                self.enqueue_data_frame(stream.id, Bytes::new(), true)?;
            }
        }

        let (status, headers) = match stream.wait_for_head().await {
            Ok(head) => head,
            Err(e) => {
                self.cancel_stream(stream.id);
                return Err(e);
            }
        };

        Ok(HttpResponse {
            status,
            version: Version::HTTP_2,
            headers,
            body: ResponseBody::H2(Http2Body::new(stream, Arc::clone(self))),
        })
    }

    // -- stream bookkeeping --

    async fn reserve_stream_slot(&self) -> Result<(), NetError> {
        loop {
            let notified = self.stream_slots.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(err) = inner.closed {
                    return Err(err);
                }
                if inner.shutting_down {
                    return Err(NetError::RetryOnNewConnection);
                }
                if inner.active_streams < inner.max_concurrent_streams {
                    inner.active_streams += 1;
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    fn release_slot(&self, inner: &mut ConnInner) {
        inner.active_streams = inner.active_streams.saturating_sub(1);
        self.stream_slots.notify_waiters();
    }

    fn remove_stream(&self, id: u32) -> Option<Arc<Http2StreamShared>> {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner.streams.remove(&id);
        if removed.is_some() {
            self.release_slot(&mut inner);
        }
        removed
    }

    /// Reader finished the stream cleanly.
    pub(crate) fn finish_stream(&self, id: u32) {
        self.remove_stream(id);
    }

    /// Reader abandoned the stream: reset it without touching siblings.
    pub(crate) fn cancel_stream(&self, id: u32) {
        if let Some(stream) = self.remove_stream(id) {
            stream.abort(NetError::Cancelled);
            let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + 4);
            frame::encode_rst_stream_frame(id, ErrorCode::Cancel, &mut buf);
            let _ = self.enqueue_bytes(buf, true);
        }
    }

    /// The reader consumed body bytes: extend the stream window, growing
    /// it when RTT-based estimation says the window is the bottleneck.
    pub(crate) fn note_body_consumed(&self, stream: &Http2StreamShared, n: usize) {
        if let Some(increment) = stream.register_consumed(n, &self.settings, self.rtt.min_rtt())
        {
            let id = stream.id;
            let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + 4);
            frame::encode_window_update_frame(id, increment, &mut buf);
            let _ = self.enqueue_bytes(buf, false);
        }
    }

    // -- body send path --

    async fn send_body(
        &self,
        stream: &Arc<Http2StreamShared>,
        request: &mut HttpRequest,
    ) -> Result<(), NetError> {
        let max_frame = self.inner.lock().unwrap().remote_max_frame_size;

        while let Some(chunk) = request.body.next_chunk().await? {
            let mut offset = 0;
            while offset < chunk.len() {
                let want = (chunk.len() - offset).min(max_frame) as u32;
                // Stream credit first, then connection credit; both may
                // grant less than requested.
                let stream_grant = stream.send_credit.acquire(want).await?;
                let conn_grant = match self.conn_send_credit.acquire(stream_grant).await {
                    Ok(n) => n,
                    Err(e) => {
                        stream.send_credit.release_unused(stream_grant);
                        return Err(e);
                    }
                };
                if conn_grant < stream_grant {
                    stream.send_credit.release_unused(stream_grant - conn_grant);
                }
                let data = chunk.slice(offset..offset + conn_grant as usize);
                offset += conn_grant as usize;
                self.enqueue_data_frame(stream.id, data, false)?;
            }
        }
        self.enqueue_data_frame(stream.id, Bytes::new(), true)
    }

    fn enqueue_data_frame(
        &self,
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
    ) -> Result<(), NetError> {
        let len = FRAME_HEADER_LEN + data.len();
        self.enqueue_frame(len, end_stream, move |slice| {
            frame::write_frame_header(
                slice,
                data.len() as u32,
                frame::FRAME_DATA,
                if end_stream { frame::FLAG_END_STREAM } else { 0 },
                stream_id,
            );
            slice[FRAME_HEADER_LEN..].copy_from_slice(&data);
        })
    }

    // -- write queue --

    fn enqueue_frame(
        &self,
        len: usize,
        flush: bool,
        render: impl FnOnce(&mut [u8]) + Send + 'static,
    ) -> Result<(), NetError> {
        self.write_tx
            .send(WriteItem::Frame(WriteRequest {
                len,
                flush,
                render: Box::new(render),
            }))
            .map_err(|_| self.closed_error())
    }

    /// Convenience for pre-rendered frame bytes.
    fn enqueue_bytes(&self, bytes: Vec<u8>, flush: bool) -> Result<(), NetError> {
        let len = bytes.len();
        self.enqueue_frame(len, flush, move |slice| slice.copy_from_slice(&bytes))
    }

    fn closed_error(&self) -> NetError {
        self.inner
            .lock()
            .unwrap()
            .closed
            .unwrap_or(NetError::ConnectionAborted)
    }

    async fn write_loop(
        conn: Weak<Http2Connection>,
        mut rx: mpsc::UnboundedReceiver<WriteItem>,
        mut writer: WriteHalf<BoxedSocket>,
    ) {
        fn render_into(buf: &mut Vec<u8>, req: WriteRequest) -> bool {
            let start = buf.len();
            buf.resize(start + req.len, 0);
            (req.render)(&mut buf[start..]);
            req.flush
        }

        let mut buf: Vec<u8> = Vec::with_capacity(WRITE_FLUSH_THRESHOLD * 2);
        'outer: loop {
            let Some(item) = rx.recv().await else {
                break;
            };
            let mut force_flush = false;
            let mut shutdown = false;
            match item {
                WriteItem::Frame(req) => force_flush |= render_into(&mut buf, req),
                WriteItem::Shutdown => {
                    shutdown = true;
                    force_flush = true;
                }
            }

            // Batch whatever else is already queued, up to the threshold.
            while !shutdown && buf.len() < WRITE_FLUSH_THRESHOLD {
                match rx.try_recv() {
                    Ok(WriteItem::Frame(req)) => {
                        force_flush |= render_into(&mut buf, req);
                    }
                    Ok(WriteItem::Shutdown) => {
                        shutdown = true;
                        force_flush = true;
                    }
                    Err(_) => break,
                }
            }

            // Opportunistic flush: on demand, at the threshold, or when
            // the queue drained.
            if force_flush || buf.len() >= WRITE_FLUSH_THRESHOLD || rx.is_empty() {
                if let Err(e) = writer.write_all(&buf).await {
                    if let Some(conn) = conn.upgrade() {
                        conn.abort_connection(NetError::from_io(&e));
                    }
                    break 'outer;
                }
                buf.clear();
                if writer.flush().await.is_err() {
                    break 'outer;
                }
            }
            if shutdown {
                break;
            }
        }
        let _ = writer.shutdown().await;
    }

    // -- read loop --

    async fn run_read_loop(
        self: &Arc<Self>,
        mut reader: ReadHalf<BoxedSocket>,
    ) -> Result<(), NetError> {
        let mut decoder = hpack::Decoder::new(4096);
        let mut first_frame = true;
        // (stream id, accumulated fragments, end_stream) while a header
        // block is open; nothing else may interleave.
        let mut continuation: Option<(u32, Vec<u8>, bool)> = None;
        let mut conn_recv = FlowControl::new(CONNECTION_WINDOW_SIZE as i64);
        let mut conn_pending_update: u32 = 0;

        loop {
            let mut header_buf = [0u8; FRAME_HEADER_LEN];
            reader
                .read_exact(&mut header_buf)
                .await
                .map_err(|e| NetError::from_io(&e))?;
            let header = FrameHeader::parse(&header_buf);

            if header.length > MAX_FRAME_SIZE {
                // An oversized first frame usually means the peer does not
                // speak HTTP/2 at all.
                return Err(if first_frame {
                    NetError::Http2ProtocolError
                } else {
                    NetError::Http2FrameSizeError
                });
            }

            let mut payload = vec![0u8; header.length as usize];
            reader
                .read_exact(&mut payload)
                .await
                .map_err(|e| NetError::from_io(&e))?;
            let frame = frame::parse_frame(header, Bytes::from(payload))?;

            if first_frame {
                match &frame {
                    Frame::Settings { ack: false, .. } => {}
                    _ => return Err(NetError::Http2ProtocolError),
                }
                first_frame = false;
            }

            if let Some((expected_id, _, _)) = &continuation {
                match &frame {
                    Frame::Continuation { stream_id, .. } if stream_id == expected_id => {}
                    _ => return Err(NetError::Http2ProtocolError),
                }
            }

            self.touch_activity();

            match frame {
                Frame::Settings { ack, settings } => {
                    if !ack {
                        self.apply_remote_settings(settings)?;
                    }
                }
                Frame::Headers {
                    stream_id,
                    fragment,
                    end_stream,
                    end_headers,
                } => {
                    if end_headers {
                        self.dispatch_header_block(
                            &mut decoder,
                            stream_id,
                            &fragment,
                            end_stream,
                        )?;
                    } else {
                        continuation = Some((stream_id, fragment.to_vec(), end_stream));
                    }
                    self.maybe_send_rtt_ping();
                }
                Frame::Continuation {
                    stream_id,
                    fragment,
                    end_headers,
                } => {
                    {
                        let Some((_, fragments, _)) = continuation.as_mut() else {
                            return Err(NetError::Http2ProtocolError);
                        };
                        fragments.extend_from_slice(&fragment);
                        if fragments.len() > self.settings.max_response_headers_len {
                            return Err(NetError::ResponseHeadersTooBig);
                        }
                    }
                    if end_headers {
                        let (_, fragments, end_stream) = continuation.take().unwrap();
                        self.dispatch_header_block(
                            &mut decoder,
                            stream_id,
                            &fragments,
                            end_stream,
                        )?;
                    }
                }
                Frame::Data {
                    stream_id,
                    payload,
                    padding,
                    end_stream,
                } => {
                    let wire_len = payload.len() as u32 + padding;
                    conn_recv.consume(wire_len)?;
                    conn_pending_update += wire_len;
                    if conn_pending_update >= CONNECTION_WINDOW_THRESHOLD {
                        let increment = conn_pending_update;
                        conn_pending_update = 0;
                        conn_recv.increase(increment)?;
                        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + 4);
                        frame::encode_window_update_frame(0, increment, &mut buf);
                        let _ = self.enqueue_bytes(buf, false);
                    }

                    let stream = self.lookup_stream(stream_id);
                    match stream {
                        Some(stream) => {
                            if padding > 0 {
                                self.note_body_consumed(&stream, padding as usize);
                            }
                            stream.on_data(payload, end_stream)?;
                        }
                        None => {
                            // Stale stream (reset or post-GOAWAY): the
                            // bytes still count against flow control.
                        }
                    }
                    self.maybe_send_rtt_ping();
                }
                Frame::RstStream {
                    stream_id,
                    error_code,
                } => {
                    if let Some(stream) = self.remove_stream(stream_id) {
                        let error = match error_code {
                            // Refused before processing: safe to retry
                            // elsewhere.
                            ErrorCode::RefusedStream => NetError::RetryOnNewConnection,
                            ErrorCode::Http11Required => NetError::RetryLowerVersion,
                            _ => NetError::Http2StreamClosed,
                        };
                        debug!(stream = stream_id, ?error_code, "stream reset by peer");
                        stream.abort(error);
                    }
                }
                Frame::Ping { ack, payload } => {
                    if !ack {
                        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + 8);
                        frame::encode_ping_frame(payload, true, &mut buf);
                        let _ = self.enqueue_bytes(buf, true);
                    } else if payload == KEEPALIVE_PING_PAYLOAD {
                        self.keepalive.lock().unwrap().awaiting_ack_since = None;
                    } else {
                        self.rtt.on_ping_ack(payload)?;
                    }
                }
                Frame::GoAway {
                    last_stream_id,
                    error_code,
                } => {
                    self.handle_goaway(last_stream_id, error_code);
                    if error_code != ErrorCode::NoError {
                        return Err(NetError::Http2GoawayReceived);
                    }
                }
                Frame::WindowUpdate {
                    stream_id,
                    increment,
                } => {
                    if stream_id == 0 {
                        self.conn_send_credit.grant(increment)?;
                    } else if let Some(stream) = self.lookup_stream(stream_id) {
                        if stream.send_credit.grant(increment).is_err() {
                            // Stream-level overflow resets just the stream.
                            self.reset_stream(stream_id, ErrorCode::FlowControlError);
                        }
                    }
                }
                Frame::AltSvc { origin, value, .. } => {
                    if !origin.is_empty() || !value.is_empty() {
                        if let Ok(text) = std::str::from_utf8(&value) {
                            *self.altsvc.lock().unwrap() = Some(text.to_string());
                        }
                    }
                }
                Frame::PushPromise { .. } => {
                    // We always send ENABLE_PUSH=0.
                    return Err(NetError::Http2ProtocolError);
                }
                Frame::Priority { .. } | Frame::Unknown { .. } => {}
            }
        }
    }

    fn dispatch_header_block(
        self: &Arc<Self>,
        decoder: &mut hpack::Decoder,
        stream_id: u32,
        block: &[u8],
        end_stream: bool,
    ) -> Result<(), NetError> {
        // Decode even for unknown streams: HPACK state is shared.
        let decoded = decoder
            .decode(block, self.settings.max_response_headers_len)
            .map_err(|e| match e {
                CodecError::HeaderListTooLarge => NetError::ResponseHeadersTooBig,
                _ => NetError::Http2CompressionError,
            })?;

        if let Some(stream) = self.lookup_stream(stream_id) {
            if let Err(e) = stream.on_header_block(decoded.fields, end_stream) {
                // Per-stream protocol violation: reset just this stream.
                warn!(stream = stream_id, error = %e, "malformed header block");
                self.reset_stream(stream_id, ErrorCode::ProtocolError);
            }
        }
        Ok(())
    }

    fn reset_stream(&self, stream_id: u32, code: ErrorCode) {
        if let Some(stream) = self.remove_stream(stream_id) {
            stream.abort(NetError::Http2ProtocolError);
        }
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + 4);
        frame::encode_rst_stream_frame(stream_id, code, &mut buf);
        let _ = self.enqueue_bytes(buf, true);
    }

    fn lookup_stream(&self, id: u32) -> Option<Arc<Http2StreamShared>> {
        self.inner.lock().unwrap().streams.get(&id).cloned()
    }

    fn apply_remote_settings(&self, settings: Settings) -> Result<(), NetError> {
        let (streams, delta) = {
            let mut inner = self.inner.lock().unwrap();
            let delta = i64::from(settings.initial_window_size) - inner.remote_initial_window;
            inner.remote_initial_window = i64::from(settings.initial_window_size);
            inner.remote_max_frame_size = settings.max_frame_size as usize;
            inner.max_concurrent_streams = settings
                .max_concurrent_streams
                .map(|v| v as usize)
                .unwrap_or(usize::MAX);
            if (settings.header_table_size as usize) < 4096 {
                inner.pending_encoder_size = Some(settings.header_table_size as usize);
            }
            let streams: Vec<_> = inner.streams.values().cloned().collect();
            (streams, delta)
        };

        // Adjust send windows on all open streams (RFC 7540 Section 6.9.2).
        if delta != 0 {
            for stream in streams {
                stream.send_credit.adjust(delta)?;
            }
        }

        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN);
        frame::encode_settings_frame(&Settings::default(), true, &mut buf);
        let _ = self.enqueue_bytes(buf, true);
        self.stream_slots.notify_waiters();
        Ok(())
    }

    fn handle_goaway(&self, last_stream_id: u32, error_code: ErrorCode) {
        debug!(last_stream_id, ?error_code, "GOAWAY received");
        self.rtt.on_goaway();
        let abandoned: Vec<Arc<Http2StreamShared>> = {
            let mut inner = self.inner.lock().unwrap();
            inner.shutting_down = true;
            inner.goaway_last_id = Some(last_stream_id);
            let ids: Vec<u32> = inner
                .streams
                .keys()
                .copied()
                .filter(|id| *id > last_stream_id)
                .collect();
            let mut abandoned = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(stream) = inner.streams.remove(&id) {
                    inner.active_streams = inner.active_streams.saturating_sub(1);
                    abandoned.push(stream);
                }
            }
            abandoned
        };
        // Streams above the cutoff were never processed: retryable
        // elsewhere, as if they had never been sent.
        for stream in abandoned {
            stream.abort(NetError::RetryOnNewConnection);
        }
        self.stream_slots.notify_waiters();
    }

    fn abort_connection(&self, error: NetError) {
        let streams: Vec<Arc<Http2StreamShared>> = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed.is_some() {
                return;
            }
            inner.closed = Some(error);
            inner.shutting_down = true;
            inner.active_streams = 0;
            inner.streams.drain().map(|(_, s)| s).collect()
        };
        if !streams.is_empty() {
            warn!(error = %error, streams = streams.len(), "connection aborted");
        }
        for stream in streams {
            stream.abort(error);
        }
        self.conn_send_credit.fail(error);
        self.stream_slots.notify_waiters();
        let _ = self.write_tx.send(WriteItem::Shutdown);
    }

    fn touch_activity(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    fn maybe_send_rtt_ping(&self) {
        if let Some(payload) = self.rtt.maybe_start_ping() {
            let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + 8);
            frame::encode_ping_frame(payload, false, &mut buf);
            let _ = self.enqueue_bytes(buf, true);
        }
    }

    async fn keepalive_loop(conn: Weak<Http2Connection>) {
        let delay = {
            let Some(conn) = conn.upgrade() else { return };
            match conn.settings.keep_alive_ping_delay {
                Some(d) => d,
                None => return,
            }
        };
        let mut interval = tokio::time::interval(delay.min(std::time::Duration::from_secs(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let Some(conn) = conn.upgrade() else { return };
            if conn.is_closed() {
                return;
            }

            // Outstanding keep-alive ping past its deadline?
            let overdue = {
                let keepalive = conn.keepalive.lock().unwrap();
                keepalive
                    .awaiting_ack_since
                    .map(|since| since.elapsed() > conn.settings.keep_alive_ping_timeout)
                    .unwrap_or(false)
            };
            if overdue {
                warn!("keep-alive ping timed out");
                conn.abort_connection(NetError::Http2PingFailed);
                return;
            }

            let idle_for = conn.last_activity.lock().unwrap().elapsed();
            if idle_for < delay {
                continue;
            }
            if conn.settings.keep_alive_ping_policy == KeepAlivePingPolicy::WithActiveRequests
                && conn.active_stream_count() == 0
            {
                continue;
            }

            let mut keepalive = conn.keepalive.lock().unwrap();
            if keepalive.awaiting_ack_since.is_none() {
                keepalive.awaiting_ack_since = Some(Instant::now());
                drop(keepalive);
                let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + 8);
                frame::encode_ping_frame(KEEPALIVE_PING_PAYLOAD, false, &mut buf);
                let _ = conn.enqueue_bytes(buf, true);
            }
        }
    }
}

/// Translate the request into a header field list: pseudo-headers first,
/// then regular headers with connection-specific names dropped. The HTTP/3
/// engine shares this shape; only the compression differs.
pub(crate) fn build_request_fields(
    request: &HttpRequest,
) -> Result<Vec<HeaderField>, NetError> {
    let mut fields = Vec::with_capacity(request.headers.len() + 5);
    fields.push(HeaderField::new(
        &b":method"[..],
        request.method.as_str().as_bytes().to_vec(),
    ));
    let scheme: &[u8] = if request.is_secure() { b"https" } else { b"http" };
    fields.push(HeaderField::new(&b":scheme"[..], scheme));
    fields.push(HeaderField::new(
        &b":authority"[..],
        request.authority()?.into_bytes(),
    ));
    fields.push(HeaderField::new(
        &b":path"[..],
        request.target().into_bytes(),
    ));

    for (name, value) in request.headers.iter() {
        // Connection-specific headers do not cross into HTTP/2.
        if *name == http::header::CONNECTION
            || *name == http::header::TRANSFER_ENCODING
            || *name == http::header::UPGRADE
            || *name == http::header::HOST
            || name.as_str() == "keep-alive"
        {
            continue;
        }
        fields.push(HeaderField::new(
            name.as_str().as_bytes().to_vec(),
            value.as_bytes().to_vec(),
        ));
    }

    if let Some(len) = request.body.known_length() {
        if len > 0 && !request.headers.contains_key(http::header::CONTENT_LENGTH) {
            fields.push(HeaderField::new(
                &b"content-length"[..],
                len.to_string().into_bytes(),
            ));
        }
    }
    if request.expect_continue && !request.body.is_empty() {
        fields.push(HeaderField::new(&b"expect"[..], &b"100-continue"[..]));
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_request() -> HttpRequest {
        HttpRequest::get("https://example.com/path?q=1").unwrap()
    }

    #[test]
    fn request_fields_have_pseudo_headers_first() {
        let mut request = test_request();
        request
            .headers
            .insert("x-custom", "v".parse().unwrap());
        request
            .headers
            .insert(http::header::CONNECTION, "close".parse().unwrap());
        let fields = build_request_fields(&request).unwrap();
        assert_eq!(&fields[0].name[..], b":method");
        assert_eq!(&fields[0].value[..], b"GET");
        assert_eq!(&fields[1].name[..], b":scheme");
        assert_eq!(&fields[1].value[..], b"https");
        assert_eq!(&fields[2].name[..], b":authority");
        assert_eq!(&fields[2].value[..], b"example.com");
        assert_eq!(&fields[3].name[..], b":path");
        assert_eq!(&fields[3].value[..], b"/path?q=1");
        // connection: close must be dropped.
        assert!(fields.iter().all(|f| f.name != "connection"));
        assert!(fields.iter().any(|f| f.name == "x-custom"));
    }

    #[test]
    fn content_length_added_for_known_body() {
        let mut request = test_request();
        request.body = crate::http::RequestBody::from("hello");
        let fields = build_request_fields(&request).unwrap();
        assert!(fields
            .iter()
            .any(|f| f.name == "content-length" && f.value == "5"));
    }
}
