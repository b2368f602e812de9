//! HTTP/3 request-stream engine.
//!
//! Each request-response exchange owns one bidirectional QUIC stream.
//! Frames arrive as varint envelopes; QUIC delivers flow control and
//! ordering, so the reader here is a plain buffered envelope parser with
//! GOAWAY-driven cancellation layered on top.

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use tokio::io::AsyncReadExt;
use tokio::sync::watch;

use crate::base::neterror::NetError;
use crate::codec::qpack;
use crate::h2::stream::{split_response_head, to_trailer_map};
use crate::h3::connection::Http3Connection;
use crate::h3::frame::{self, decode_frame_header, is_reserved_h2_type};
use crate::h3::quic::{self, QuicRecvStream, H3_REQUEST_CANCELLED};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// One decoded response header block.
pub(crate) struct HeadBlock {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Buffered reader over one request stream's receive side.
pub(crate) struct Http3RequestStream {
    pub id: u64,
    recv: Box<dyn QuicRecvStream>,
    buf: BytesMut,
    eof: bool,
    goaway: watch::Receiver<Option<u64>>,
    max_header_section: usize,
}

impl Http3RequestStream {
    pub(crate) fn new(
        id: u64,
        recv: Box<dyn QuicRecvStream>,
        goaway: watch::Receiver<Option<u64>>,
        max_header_section: usize,
    ) -> Self {
        Self {
            id,
            recv,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            eof: false,
            goaway,
            max_header_section,
        }
    }

    fn goaway_cutoff_hit(&self) -> bool {
        // GOAWAY announces the first unprocessed request-stream id;
        // streams at or above it were never handled.
        matches!(*self.goaway.borrow(), Some(cutoff) if self.id >= cutoff)
    }

    /// Read more bytes, aborting if a GOAWAY cutoff covers this stream.
    async fn fill(&mut self) -> Result<(), NetError> {
        if self.goaway_cutoff_hit() {
            self.recv.stop(H3_REQUEST_CANCELLED);
            return Err(NetError::RetryOnNewConnection);
        }
        loop {
            self.buf.reserve(READ_CHUNK_SIZE);
            tokio::select! {
                read = self.recv.read_buf(&mut self.buf) => {
                    match read {
                        Ok(0) => self.eof = true,
                        Ok(_) => {}
                        Err(e) => return Err(quic::map_read_error(&e)),
                    }
                    return Ok(());
                }
                changed = self.goaway.changed() => {
                    if changed.is_ok() && self.goaway_cutoff_hit() {
                        self.recv.stop(H3_REQUEST_CANCELLED);
                        return Err(NetError::RetryOnNewConnection);
                    }
                    // Watch closed or cutoff below us: keep reading.
                }
            }
        }
    }

    /// Next frame envelope, or `None` at a clean end of stream. Envelope
    /// truncation and HTTP/2 leftovers are protocol errors.
    pub(crate) async fn next_envelope(&mut self) -> Result<Option<(u64, u64)>, NetError> {
        loop {
            match decode_frame_header(&self.buf)? {
                Some((frame_type, len, consumed)) => {
                    self.buf.advance(consumed);
                    if is_reserved_h2_type(frame_type) {
                        return Err(NetError::Http3FrameUnexpected);
                    }
                    return Ok(Some((frame_type, len)));
                }
                None => {
                    if self.eof {
                        return if self.buf.is_empty() {
                            Ok(None)
                        } else {
                            Err(NetError::Http3ProtocolError)
                        };
                    }
                    self.fill().await?;
                }
            }
        }
    }

    /// Read exactly `len` payload bytes (bounded use: header blocks).
    async fn read_payload(&mut self, len: u64) -> Result<Bytes, NetError> {
        if len as usize > self.max_header_section {
            return Err(NetError::ResponseHeadersTooBig);
        }
        let len = len as usize;
        while self.buf.len() < len {
            if self.eof {
                return Err(NetError::Http3ProtocolError);
            }
            self.fill().await?;
        }
        Ok(self.buf.split_to(len).freeze())
    }

    /// Pull up to one buffered slice of DATA payload, at most `remaining`.
    pub(crate) async fn read_data(&mut self, remaining: u64) -> Result<Bytes, NetError> {
        while self.buf.is_empty() {
            if self.eof {
                return Err(NetError::Http3ProtocolError);
            }
            self.fill().await?;
        }
        let take = (remaining).min(self.buf.len() as u64) as usize;
        Ok(self.buf.split_to(take).freeze())
    }

    /// Read and decode one HEADERS block.
    pub(crate) async fn read_header_block(&mut self, len: u64) -> Result<Vec<crate::codec::HeaderField>, NetError> {
        let block = self.read_payload(len).await?;
        qpack::decode(&block, self.max_header_section).map_err(|e| match e {
            crate::codec::CodecError::HeaderListTooLarge => NetError::ResponseHeadersTooBig,
            _ => NetError::Http3ProtocolError,
        })
    }

    /// Read header blocks until a non-informational status arrives.
    /// Informational responses loop; DATA before HEADERS is an error.
    pub(crate) async fn read_final_head(&mut self) -> Result<HeadBlock, NetError> {
        loop {
            match self.next_head_block().await? {
                Some(head) if head.status.is_informational() => continue,
                Some(head) => return Ok(head),
                None => return Err(NetError::Http3ProtocolError),
            }
        }
    }

    /// Read the next HEADERS block, skipping nothing. `None` on a stream
    /// that ended before any HEADERS.
    pub(crate) async fn next_head_block(&mut self) -> Result<Option<HeadBlock>, NetError> {
        match self.next_envelope().await? {
            Some((frame::FRAME_HEADERS, len)) => {
                let fields = self.read_header_block(len).await?;
                let (status, headers) = split_response_head(&fields)
                    .map_err(|_| NetError::Http3ProtocolError)?;
                Ok(Some(HeadBlock { status, headers }))
            }
            Some((frame::FRAME_DATA, _)) => Err(NetError::Http3ProtocolError),
            Some((frame::FRAME_SETTINGS | frame::FRAME_GOAWAY, _)) => {
                // Connection-level frames on a request stream.
                Err(NetError::Http3FrameUnexpected)
            }
            Some((_, len)) => {
                // Unknown frames are skipped.
                self.skip_payload(len).await?;
                Box::pin(self.next_head_block()).await
            }
            None => Ok(None),
        }
    }

    async fn skip_payload(&mut self, mut len: u64) -> Result<(), NetError> {
        while len > 0 {
            let chunk = self.read_data(len).await?;
            len -= chunk.len() as u64;
        }
        Ok(())
    }

    pub(crate) fn stop(&mut self, code: u64) {
        self.recv.stop(code);
    }
}

/// Streaming HTTP/3 response body.
pub struct Http3Body {
    stream: Option<Http3RequestStream>,
    conn: Arc<Http3Connection>,
    remaining_data: u64,
    trailers: Option<HeaderMap>,
    done: bool,
}

impl std::fmt::Debug for Http3Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http3Body")
            .field("remaining_data", &self.remaining_data)
            .field("done", &self.done)
            .finish()
    }
}

impl Http3Body {
    pub(crate) fn new(stream: Http3RequestStream, conn: Arc<Http3Connection>) -> Self {
        Self {
            stream: Some(stream),
            conn,
            remaining_data: 0,
            trailers: None,
            done: false,
        }
    }

    /// Pull the next body chunk; `None` at end of stream.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, NetError> {
        if self.done {
            return Ok(None);
        }
        let result = self.chunk_inner().await;
        match &result {
            Ok(None) => self.finish(),
            Err(e) => {
                self.conn.note_request_stream_error(*e);
                if let Some(stream) = self.stream.as_mut() {
                    stream.stop(quic::H3_REQUEST_CANCELLED);
                }
                self.finish();
            }
            Ok(Some(_)) => {}
        }
        result
    }

    async fn chunk_inner(&mut self) -> Result<Option<Bytes>, NetError> {
        let stream = self.stream.as_mut().ok_or(NetError::ConnectionAborted)?;
        loop {
            if self.remaining_data > 0 {
                let data = stream.read_data(self.remaining_data).await?;
                self.remaining_data -= data.len() as u64;
                return Ok(Some(data));
            }
            match stream.next_envelope().await? {
                Some((frame::FRAME_DATA, len)) => {
                    self.remaining_data = len;
                }
                Some((frame::FRAME_HEADERS, len)) => {
                    // Trailing header block, then nothing but end-of-stream.
                    let fields = stream.read_header_block(len).await?;
                    let trailers =
                        to_trailer_map(&fields).map_err(|_| NetError::Http3ProtocolError)?;
                    self.trailers = Some(trailers);
                    return match stream.next_envelope().await? {
                        None => Ok(None),
                        Some(_) => Err(NetError::Http3ProtocolError),
                    };
                }
                Some((frame::FRAME_SETTINGS | frame::FRAME_GOAWAY, _)) => {
                    return Err(NetError::Http3FrameUnexpected);
                }
                Some((_, len)) => {
                    stream.skip_payload(len).await?;
                }
                None => return Ok(None),
            }
        }
    }

    pub fn trailers(&self) -> Option<&HeaderMap> {
        self.trailers.as_ref()
    }

    fn finish(&mut self) {
        if !self.done {
            self.done = true;
            self.stream = None;
            self.conn.request_finished();
        }
    }
}

impl Drop for Http3Body {
    fn drop(&mut self) {
        if !self.done {
            if let Some(stream) = self.stream.as_mut() {
                stream.stop(H3_REQUEST_CANCELLED);
            }
            self.conn.request_finished();
        }
    }
}
