use thiserror::Error;

/// Network-stack error codes.
///
/// One flat enum for every failure the stack can surface, with a negative
/// numeric diagnostic code per variant (`as_i32`). Variants fall into the
/// taxonomy the pool's retry loop cares about: transport faults, protocol
/// violations (connection-fatal vs stream-fatal), flow-control violations,
/// internal retry markers, and cancellation.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum NetError {
    // Transport faults
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Socket not connected")]
    SocketNotConnected,
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("Tunnel connection failed")]
    TunnelConnectionFailed,
    #[error("ALPN negotiation failed")]
    AlpnNegotiationFailed,
    #[error("Data received unexpectedly on idle connection")]
    DataReceivedUnexpectedly,

    // HTTP/1.1 parse and framing errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Invalid HTTP response")]
    InvalidHttpResponse,
    #[error("Empty response")]
    EmptyResponse,
    #[error("Response headers too big")]
    ResponseHeadersTooBig,
    #[error("Invalid chunked encoding")]
    InvalidChunkedEncoding,
    #[error("Incomplete chunked encoding")]
    IncompleteChunkedEncoding,
    #[error("Content-Length mismatch")]
    ContentLengthMismatch,
    #[error("Response body too big to drain")]
    ResponseBodyTooBigToDrain,
    #[error("Expected 100-continue was never signalled")]
    ExpectationFailed,

    // HTTP/2 errors
    #[error("HTTP/2 protocol error")]
    Http2ProtocolError,
    #[error("HTTP/2 flow control error")]
    Http2FlowControlError,
    #[error("HTTP/2 frame size error")]
    Http2FrameSizeError,
    #[error("HTTP/2 compression error")]
    Http2CompressionError,
    #[error("HTTP/2 server refused stream")]
    Http2ServerRefusedStream,
    #[error("HTTP/2 PING failed")]
    Http2PingFailed,
    #[error("HTTP/2 stream closed")]
    Http2StreamClosed,
    #[error("HTTP/2 connection shut down by GOAWAY")]
    Http2GoawayReceived,

    // HTTP/3 / QUIC errors
    #[error("QUIC protocol error")]
    QuicProtocolError,
    #[error("QUIC handshake failed")]
    QuicHandshakeFailed,
    #[error("HTTP/3 protocol error")]
    Http3ProtocolError,
    #[error("HTTP/3 frame unexpected on this stream")]
    Http3FrameUnexpected,
    #[error("HTTP/3 critical stream closed")]
    Http3ClosedCriticalStream,

    // Version-negotiation retry markers. These never reach the caller:
    // the pool's retry loop consumes them, except when the request's
    // version policy forbids the implied fallback.
    #[error("Retry the request at a lower HTTP version")]
    RetryLowerVersion,
    #[error("Retry the request on a new connection")]
    RetryOnNewConnection,
    #[error("Retry the request, concurrent stream limit reached")]
    RetryStreamLimitReached,

    // Terminal pool outcomes
    #[error("Too many retries")]
    TooManyRetries,
    #[error("HTTP version required by policy is not available")]
    VersionNotSupported,

    // Cancellation. Never conflated with protocol errors, even when an
    // internal teardown triggered it.
    #[error("Request cancelled")]
    Cancelled,

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    /// Diagnostic numeric code: transport faults in the -1xx range,
    /// HTTP-layer errors in the -3xx range, stack-internal markers from
    /// -900 down.
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed => -104,
            NetError::NameNotResolved => -105,
            NetError::TunnelConnectionFailed => -111,
            NetError::SocketNotConnected => -112,
            NetError::ConnectionTimedOut => -118,
            NetError::AlpnNegotiationFailed => -122,

            NetError::InvalidUrl => -300,
            NetError::InvalidHttpResponse => -320,
            NetError::InvalidChunkedEncoding => -321,
            NetError::EmptyResponse => -324,
            NetError::ResponseHeadersTooBig => -325,
            NetError::ExpectationFailed => -331,
            NetError::Http2ProtocolError => -337,
            NetError::ResponseBodyTooBigToDrain => -345,
            NetError::Http2ServerRefusedStream => -351,
            NetError::Http2PingFailed => -352,
            NetError::ContentLengthMismatch => -354,
            NetError::IncompleteChunkedEncoding => -355,
            NetError::QuicProtocolError => -356,
            NetError::QuicHandshakeFailed => -358,
            NetError::Http2FlowControlError => -361,
            NetError::Http2FrameSizeError => -362,
            NetError::Http2CompressionError => -363,
            NetError::TooManyRetries => -375,
            NetError::Http2StreamClosed => -376,
            NetError::Http2GoawayReceived => -379,
            NetError::Http3ProtocolError => -380,
            NetError::Http3FrameUnexpected => -381,
            NetError::Http3ClosedCriticalStream => -382,
            NetError::VersionNotSupported => -383,

            NetError::DataReceivedUnexpectedly => -902,
            NetError::RetryLowerVersion => -910,
            NetError::RetryOnNewConnection => -911,
            NetError::RetryStreamLimitReached => -912,
            NetError::Cancelled => -999,
            NetError::Unknown(code) => *code,
        }
    }

    /// Whether this error is one of the internal version-negotiation
    /// markers the pool's retry loop must consume.
    pub fn is_retry_marker(&self) -> bool {
        matches!(
            self,
            NetError::RetryLowerVersion
                | NetError::RetryOnNewConnection
                | NetError::RetryStreamLimitReached
        )
    }

    /// Whether a fresh connection attempt may transparently retry after
    /// this error. True only for faults that occur before any request
    /// bytes could have been observed by an origin (connect-phase faults).
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            NetError::ConnectionRefused
                | NetError::ConnectionFailed
                | NetError::NameNotResolved
                | NetError::ConnectionTimedOut
                | NetError::TunnelConnectionFailed
                | NetError::AlpnNegotiationFailed
                | NetError::QuicHandshakeFailed
        )
    }

    /// Map an I/O error to the closest transport fault.
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionReset => NetError::ConnectionReset,
            ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
            ErrorKind::ConnectionAborted => NetError::ConnectionAborted,
            ErrorKind::NotConnected => NetError::SocketNotConnected,
            ErrorKind::TimedOut => NetError::ConnectionTimedOut,
            ErrorKind::UnexpectedEof => NetError::ConnectionClosed,
            ErrorKind::BrokenPipe => NetError::ConnectionClosed,
            _ => NetError::ConnectionFailed,
        }
    }
}

impl From<std::io::Error> for NetError {
    fn from(err: std::io::Error) -> Self {
        NetError::from_io(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_markers_classified() {
        assert!(NetError::RetryLowerVersion.is_retry_marker());
        assert!(NetError::RetryOnNewConnection.is_retry_marker());
        assert!(NetError::RetryStreamLimitReached.is_retry_marker());
        assert!(!NetError::ConnectionReset.is_retry_marker());
        assert!(!NetError::Cancelled.is_retry_marker());
    }

    #[test]
    fn io_error_mapping() {
        use std::io::{Error, ErrorKind};
        assert_eq!(
            NetError::from(Error::new(ErrorKind::ConnectionReset, "rst")),
            NetError::ConnectionReset
        );
        assert_eq!(
            NetError::from(Error::new(ErrorKind::UnexpectedEof, "eof")),
            NetError::ConnectionClosed
        );
    }

    #[test]
    fn diagnostic_codes_are_negative_and_distinct() {
        let all = [
            NetError::ConnectionClosed,
            NetError::ConnectionReset,
            NetError::ResponseHeadersTooBig,
            NetError::Http2ProtocolError,
            NetError::Http2FlowControlError,
            NetError::RetryLowerVersion,
            NetError::Cancelled,
        ];
        let mut codes: Vec<i32> = all.iter().map(|e| e.as_i32()).collect();
        assert!(codes.iter().all(|c| *c < 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }
}
