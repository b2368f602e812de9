//! QUIC transport collaborator interface.
//!
//! The engine never opens sockets or performs the QUIC handshake; a
//! caller-supplied [`QuicConnector`] yields connections, and streams are
//! plain `AsyncRead`/`AsyncWrite` objects with QUIC reset/stop verbs and
//! transport-assigned ids. An abrupt peer abort surfaces as an I/O error
//! wrapping [`StreamAborted`] so the engine can map application error
//! codes onto retry semantics.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::base::neterror::NetError;

// HTTP/3 application error codes (RFC 9114 Section 8.1).
pub const H3_NO_ERROR: u64 = 0x100;
pub const H3_GENERAL_PROTOCOL_ERROR: u64 = 0x101;
pub const H3_STREAM_CREATION_ERROR: u64 = 0x103;
pub const H3_CLOSED_CRITICAL_STREAM: u64 = 0x104;
pub const H3_FRAME_UNEXPECTED: u64 = 0x105;
pub const H3_FRAME_ERROR: u64 = 0x106;
pub const H3_ID_ERROR: u64 = 0x108;
pub const H3_SETTINGS_ERROR: u64 = 0x109;
pub const H3_MISSING_SETTINGS: u64 = 0x10a;
pub const H3_REQUEST_REJECTED: u64 = 0x10b;
pub const H3_REQUEST_CANCELLED: u64 = 0x10c;
pub const H3_VERSION_FALLBACK: u64 = 0x110;

/// Payload carried inside an `io::Error` when the peer aborted a stream
/// with an application error code.
#[derive(Debug)]
pub struct StreamAborted {
    pub code: u64,
}

impl std::fmt::Display for StreamAborted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream aborted by peer (code {:#x})", self.code)
    }
}

impl std::error::Error for StreamAborted {}

/// Map a request-stream abort code onto the retry taxonomy: the peer not
/// speaking HTTP/3 well retries lower, transient rejection retries on a
/// new connection, everything else is a request-fatal error.
pub fn map_stream_abort(code: u64) -> NetError {
    match code {
        H3_VERSION_FALLBACK => NetError::RetryLowerVersion,
        H3_REQUEST_REJECTED => NetError::RetryOnNewConnection,
        H3_REQUEST_CANCELLED | H3_NO_ERROR => NetError::Http3ProtocolError,
        _ => NetError::Http3ProtocolError,
    }
}

/// Translate a stream-read error, unwrapping QUIC abort codes.
pub(crate) fn map_read_error(err: &std::io::Error) -> NetError {
    if let Some(inner) = err.get_ref() {
        if let Some(aborted) = inner.downcast_ref::<StreamAborted>() {
            return map_stream_abort(aborted.code);
        }
    }
    NetError::from_io(err)
}

/// Client-initiated or peer-initiated QUIC send stream.
pub trait QuicSendStream: AsyncWrite + Unpin + Send {
    /// Transport-assigned stream id.
    fn id(&self) -> u64;
    /// Abruptly terminate the send side with an application error code.
    fn reset(&mut self, error_code: u64);
}

/// QUIC receive stream.
pub trait QuicRecvStream: AsyncRead + Unpin + Send {
    fn id(&self) -> u64;
    /// Tell the peer to stop sending, with an application error code.
    fn stop(&mut self, error_code: u64);
}

/// One established QUIC connection. Stream-budget blocking is the
/// transport's concern: `open_bidirectional` waits while the peer's
/// concurrent-stream allowance is exhausted.
pub trait QuicConnection: Send + Sync {
    fn open_bidirectional(
        &self,
    ) -> BoxFuture<'_, Result<(Box<dyn QuicSendStream>, Box<dyn QuicRecvStream>), NetError>>;

    fn open_unidirectional(&self) -> BoxFuture<'_, Result<Box<dyn QuicSendStream>, NetError>>;

    /// Accept the next peer-initiated unidirectional stream.
    fn accept_unidirectional(&self) -> BoxFuture<'_, Result<Box<dyn QuicRecvStream>, NetError>>;

    /// Close the whole connection with an application error code.
    fn close(&self, error_code: u64);

    fn is_closed(&self) -> bool;
}

/// QUIC session establishment (UDP socket, handshake, ALPN "h3").
pub trait QuicConnector: Send + Sync {
    fn connect<'a>(
        &'a self,
        host: &'a str,
        port: u16,
        server_name: &'a str,
    ) -> BoxFuture<'a, Result<Arc<dyn QuicConnection>, NetError>>;
}
