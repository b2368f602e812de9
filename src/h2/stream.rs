//! Per-stream state for multiplexed HTTP/2 exchanges.
//!
//! Each logical request-response pair is one `Http2StreamShared`, owned by
//! the connection's stream map and back-referenced (non-owning) from the
//! reader. State transitions happen on the connection's read loop; readers
//! park on the notify handle and are signalled once per transition.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tokio::sync::Notify;
use tracing::trace;

use crate::base::config::ConnectionSettings;
use crate::base::neterror::NetError;
use crate::codec::HeaderField;
use crate::h2::connection::Http2Connection;
use crate::h2::flowcontrol::SendCredit;

/// Response-protocol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseProtocolState {
    /// Waiting for the first header block (must carry `:status`).
    ExpectingStatus,
    /// A 1xx block is being skipped; loops back to `ExpectingStatus`.
    ExpectingIgnoredHeaders,
    /// Final status seen; body data may follow.
    ExpectingData,
    /// END_STREAM after trailers or data; both sides done reading.
    Complete,
    /// Reset, cancelled, or torn down with the connection.
    Aborted,
}

pub(crate) struct StreamInner {
    pub proto: ResponseProtocolState,
    pub recv_buf: BytesMut,
    pub head: Option<(StatusCode, HeaderMap)>,
    pub trailers: Option<HeaderMap>,
    pub error: Option<NetError>,
    /// An informational response arrived; releases a deferred 100-continue
    /// body.
    pub saw_informational: bool,
    /// Header block fragments accumulate here until END_HEADERS.
    pub header_fragments: BytesMut,
    pub fragment_end_stream: bool,

    // Receive-window management (consumption side).
    pub window_size: u32,
    pub pending_window_update: u32,
    pub last_window_update_at: Instant,
}

pub(crate) struct Http2StreamShared {
    pub id: u32,
    pub inner: Mutex<StreamInner>,
    pub notify: Notify,
    pub send_credit: SendCredit,
}

impl Http2StreamShared {
    pub(crate) fn new(id: u32, initial_recv_window: u32, initial_send_window: i64) -> Self {
        Self {
            id,
            inner: Mutex::new(StreamInner {
                proto: ResponseProtocolState::ExpectingStatus,
                recv_buf: BytesMut::new(),
                head: None,
                trailers: None,
                error: None,
                saw_informational: false,
                header_fragments: BytesMut::new(),
                fragment_end_stream: false,
                window_size: initial_recv_window,
                pending_window_update: 0,
                last_window_update_at: Instant::now(),
            }),
            notify: Notify::new(),
            send_credit: SendCredit::new(initial_send_window),
        }
    }

    /// Apply a fully-reassembled, decoded header block.
    pub(crate) fn on_header_block(
        &self,
        fields: Vec<HeaderField>,
        end_stream: bool,
    ) -> Result<(), NetError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.proto {
            ResponseProtocolState::ExpectingStatus => {
                let (status, headers) = split_response_head(&fields)?;
                if status.is_informational() {
                    if status == StatusCode::SWITCHING_PROTOCOLS || end_stream {
                        return Err(NetError::Http2ProtocolError);
                    }
                    inner.proto = ResponseProtocolState::ExpectingIgnoredHeaders;
                    inner.saw_informational = true;
                    // Informational blocks are dropped; loop back.
                    inner.proto = ResponseProtocolState::ExpectingStatus;
                } else {
                    inner.head = Some((status, headers));
                    inner.proto = if end_stream {
                        ResponseProtocolState::Complete
                    } else {
                        ResponseProtocolState::ExpectingData
                    };
                }
            }
            ResponseProtocolState::ExpectingData => {
                // Trailing headers: no pseudo-headers, END_STREAM required.
                if !end_stream {
                    return Err(NetError::Http2ProtocolError);
                }
                let trailers = to_trailer_map(&fields)?;
                inner.trailers = Some(trailers);
                inner.proto = ResponseProtocolState::Complete;
            }
            ResponseProtocolState::Complete | ResponseProtocolState::Aborted => {
                return Err(NetError::Http2StreamClosed);
            }
            ResponseProtocolState::ExpectingIgnoredHeaders => {
                return Err(NetError::Http2ProtocolError);
            }
        }
        let completed = inner.proto == ResponseProtocolState::Complete;
        drop(inner);
        if completed {
            // The peer finished the exchange; release any body sender
            // blocked on credit.
            self.send_credit.fail(NetError::Http2StreamClosed);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    pub(crate) fn on_data(&self, payload: Bytes, end_stream: bool) -> Result<(), NetError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.proto {
            ResponseProtocolState::ExpectingData => {}
            ResponseProtocolState::Aborted => return Ok(()),
            _ => return Err(NetError::Http2ProtocolError),
        }
        inner.recv_buf.extend_from_slice(&payload);
        let completed = end_stream;
        if end_stream {
            inner.proto = ResponseProtocolState::Complete;
        }
        drop(inner);
        if completed {
            self.send_credit.fail(NetError::Http2StreamClosed);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Abort the stream with a cause. Idempotent; a reset arriving after
    /// END_STREAM is not surfaced.
    pub(crate) fn abort(&self, error: NetError) {
        let mut inner = self.inner.lock().unwrap();
        match inner.proto {
            ResponseProtocolState::Complete => return,
            ResponseProtocolState::Aborted => {
                if inner.error.is_none() {
                    inner.error = Some(error);
                }
                return;
            }
            _ => {}
        }
        inner.proto = ResponseProtocolState::Aborted;
        inner.error = Some(error);
        drop(inner);
        self.send_credit.fail(error);
        self.notify.notify_waiters();
    }

    /// Wait until the final response head is available (or failure).
    pub(crate) async fn wait_for_head(&self) -> Result<(StatusCode, HeaderMap), NetError> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(err) = inner.error {
                    return Err(err);
                }
                if let Some((status, headers)) = inner.head.take() {
                    return Ok((status, headers));
                }
                if inner.proto == ResponseProtocolState::Aborted {
                    return Err(inner.error.unwrap_or(NetError::Http2StreamClosed));
                }
            }
            notified.await;
        }
    }

    /// Wait for either an informational response or the final head, used
    /// by the deferred 100-continue body send. Returns true when the body
    /// should be sent.
    pub(crate) async fn wait_for_continue(&self) -> Result<bool, NetError> {
        loop {
            let notified = self.notify.notified();
            {
                let inner = self.inner.lock().unwrap();
                if let Some(err) = inner.error {
                    return Err(err);
                }
                if inner.saw_informational {
                    return Ok(true);
                }
                if inner.head.is_some() || inner.proto == ResponseProtocolState::Complete {
                    // Final response arrived first: drop the body send.
                    return Ok(false);
                }
                if inner.proto == ResponseProtocolState::Aborted {
                    return Err(inner.error.unwrap_or(NetError::Http2StreamClosed));
                }
            }
            notified.await;
        }
    }

    /// Register consumed (or padding) bytes against the receive window and
    /// compute the WINDOW_UPDATE increment to send, growing the window
    /// when the RTT heuristic says it is the bottleneck.
    pub(crate) fn register_consumed(
        &self,
        n: usize,
        settings: &ConnectionSettings,
        min_rtt: Option<std::time::Duration>,
    ) -> Option<u32> {
        let mut inner = self.inner.lock().unwrap();
        inner.pending_window_update += n as u32;
        if inner.pending_window_update < inner.window_size / 8 {
            return None;
        }

        let mut increment = inner.pending_window_update;
        if settings.enable_http2_window_scaling {
            if let Some(rtt) = min_rtt {
                let elapsed = inner.last_window_update_at.elapsed();
                let delivered = f64::from(inner.pending_window_update);
                let scale = settings.window_scale_threshold_multiplier;
                // Window is the bottleneck when the bytes-in-flight the
                // peer could have sent over one RTT exceed what the
                // current window allows.
                if delivered * rtt.as_secs_f64()
                    > f64::from(inner.window_size) * elapsed.as_secs_f64() * scale
                {
                    let grown = (inner.window_size * 2)
                        .min(settings.max_http2_stream_window_size);
                    if grown > inner.window_size {
                        trace!(
                            stream = self.id,
                            from = inner.window_size,
                            to = grown,
                            "stream window scaled up"
                        );
                        increment += grown - inner.window_size;
                        inner.window_size = grown;
                    }
                }
            }
        }

        inner.pending_window_update = 0;
        inner.last_window_update_at = Instant::now();
        Some(increment)
    }
}

/// Split a decoded response block into status + headers. `:status` must
/// be present and precede every regular field; unknown response
/// pseudo-headers are rejected. Shared with the HTTP/3 engine, which has
/// the same pseudo-header rules.
pub(crate) fn split_response_head(
    fields: &[HeaderField],
) -> Result<(StatusCode, HeaderMap), NetError> {
    let mut status: Option<StatusCode> = None;
    let mut headers = HeaderMap::with_capacity(fields.len());
    let mut seen_regular = false;

    for field in fields {
        if field.name.starts_with(b":") {
            if seen_regular || field.name != ":status" || status.is_some() {
                return Err(NetError::Http2ProtocolError);
            }
            let code = std::str::from_utf8(&field.value)
                .ok()
                .and_then(|s| s.parse::<u16>().ok())
                .and_then(|c| StatusCode::from_u16(c).ok())
                .ok_or(NetError::Http2ProtocolError)?;
            status = Some(code);
        } else {
            seen_regular = true;
            let name = HeaderName::from_bytes(&field.name)
                .map_err(|_| NetError::Http2ProtocolError)?;
            let value = HeaderValue::from_bytes(&field.value)
                .map_err(|_| NetError::Http2ProtocolError)?;
            headers.append(name, value);
        }
    }

    let status = status.ok_or(NetError::Http2ProtocolError)?;
    Ok((status, headers))
}

pub(crate) fn to_trailer_map(fields: &[HeaderField]) -> Result<HeaderMap, NetError> {
    let mut trailers = HeaderMap::with_capacity(fields.len());
    for field in fields {
        if field.name.starts_with(b":") {
            return Err(NetError::Http2ProtocolError);
        }
        let name =
            HeaderName::from_bytes(&field.name).map_err(|_| NetError::Http2ProtocolError)?;
        let value =
            HeaderValue::from_bytes(&field.value).map_err(|_| NetError::Http2ProtocolError)?;
        trailers.append(name, value);
    }
    Ok(trailers)
}

/// Streaming HTTP/2 response body: a non-owning view of one stream on a
/// shared connection.
pub struct Http2Body {
    stream: Arc<Http2StreamShared>,
    conn: Arc<Http2Connection>,
    trailers: Option<HeaderMap>,
    done: bool,
}

impl std::fmt::Debug for Http2Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http2Body")
            .field("stream", &self.stream.id)
            .field("done", &self.done)
            .finish()
    }
}

impl Http2Body {
    pub(crate) fn new(stream: Arc<Http2StreamShared>, conn: Arc<Http2Connection>) -> Self {
        let mut body = Self {
            stream,
            conn,
            trailers: None,
            done: false,
        };
        // A stream that ended with the header block has no body to pull;
        // release its slot immediately.
        let already_complete = {
            let mut inner = body.stream.inner.lock().unwrap();
            if inner.proto == ResponseProtocolState::Complete && inner.recv_buf.is_empty() {
                body.trailers = inner.trailers.take();
                true
            } else {
                false
            }
        };
        if already_complete {
            body.finish();
        }
        body
    }

    /// Pull the next body chunk; `None` at end of stream.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, NetError> {
        if self.done {
            return Ok(None);
        }
        loop {
            let notified = self.stream.notify.notified();
            {
                let mut inner = self.stream.inner.lock().unwrap();
                if !inner.recv_buf.is_empty() {
                    let data = inner.recv_buf.split().freeze();
                    drop(inner);
                    self.conn.note_body_consumed(&self.stream, data.len());
                    return Ok(Some(data));
                }
                match inner.proto {
                    ResponseProtocolState::Complete => {
                        self.trailers = inner.trailers.take();
                        drop(inner);
                        drop(notified);
                        self.finish();
                        return Ok(None);
                    }
                    ResponseProtocolState::Aborted => {
                        let err = inner.error.unwrap_or(NetError::Http2StreamClosed);
                        drop(inner);
                        drop(notified);
                        self.finish();
                        return Err(err);
                    }
                    _ => {}
                }
            }
            notified.await;
        }
    }

    pub fn trailers(&self) -> Option<&HeaderMap> {
        self.trailers.as_ref()
    }

    fn finish(&mut self) {
        if !self.done {
            self.done = true;
            self.conn.finish_stream(self.stream.id);
        }
    }
}

impl Drop for Http2Body {
    fn drop(&mut self) {
        if !self.done {
            // Abandoned mid-body: reset only this stream, never the
            // shared connection.
            self.conn.cancel_stream(self.stream.id);
        }
    }
}
