//! HTTP/3 connection engine (RFC 9114).
//!
//! The same multiplexing goal as HTTP/2, but over independently
//! flow-controlled QUIC streams: QUIC replaces the frame read loop, the
//! write queue, and per-stream windows, leaving this engine the frame
//! envelopes, QPACK headers, control-stream bookkeeping, and GOAWAY
//! semantics. The QUIC transport itself is a collaborator behind the
//! traits in [`quic`].

pub mod connection;
pub mod frame;
pub mod quic;
pub mod settings;
pub mod stream;

pub use connection::Http3Connection;
pub use quic::{QuicConnection, QuicConnector, QuicRecvStream, QuicSendStream};
pub use stream::Http3Body;
