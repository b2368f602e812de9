//! HTTP/2 connection engine (RFC 7540).
//!
//! One engine instance owns one transport stream and multiplexes many
//! logical request streams over it: a dedicated frame read loop, a
//! single-consumer write-serialization loop, HPACK header compression,
//! per-stream and connection-level flow control with RTT-driven window
//! scaling, and keep-alive pings.

pub mod connection;
pub mod flowcontrol;
pub mod frame;
pub mod rtt;
pub mod settings;
pub mod stream;

pub use connection::Http2Connection;
pub use stream::Http2Body;
