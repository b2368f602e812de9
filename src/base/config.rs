//! Connection-stack configuration.
//!
//! One plain-data settings struct consumed by the pool and the per-version
//! connection engines. Every tunable the engines recognize lives here with
//! its default; nothing reads environment state.

use std::time::Duration;

/// Highest HTTP version the stack may negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HttpVersion {
    Http11,
    Http2,
    Http3,
}

/// When HTTP/2 keep-alive pings are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeepAlivePingPolicy {
    /// Ping only while at least one stream is active.
    #[default]
    WithActiveRequests,
    /// Ping whenever the connection is idle past the delay.
    Always,
}

/// Tunables for the connection pool and protocol engines.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Maximum concurrent HTTP/1.1 connections per destination.
    pub max_connections_per_server: usize,
    /// Total lifetime after which a pooled connection is retired.
    /// `None` means unlimited.
    pub pooled_connection_lifetime: Option<Duration>,
    /// How long a connection may sit idle before the scavenger drops it.
    pub pooled_connection_idle_timeout: Duration,
    /// Transport connect timeout (TCP + TLS, or QUIC handshake).
    pub connect_timeout: Duration,
    /// Cumulative byte budget for response status line + headers.
    pub max_response_headers_len: usize,
    /// Largest unread body the engine will drain to salvage a connection.
    pub max_response_drain_size: usize,
    /// Longest time spent draining an unread body.
    pub max_response_drain_time: Duration,
    /// How long to hold the request body waiting for a 1xx after
    /// sending `Expect: 100-continue`.
    pub expect_100_continue_timeout: Duration,

    /// Initial HTTP/2 per-stream receive window.
    pub initial_http2_stream_window_size: u32,
    /// Cap for dynamic HTTP/2 per-stream window growth.
    pub max_http2_stream_window_size: u32,
    /// Whether RTT-based stream window scaling is active.
    pub enable_http2_window_scaling: bool,
    /// Bandwidth-delay threshold multiplier for window doubling.
    pub window_scale_threshold_multiplier: f64,

    /// Idle delay before a keep-alive PING. `None` disables pings.
    pub keep_alive_ping_delay: Option<Duration>,
    /// How long to wait for a PING ACK before aborting the connection.
    pub keep_alive_ping_timeout: Duration,
    pub keep_alive_ping_policy: KeepAlivePingPolicy,

    /// Allow more than one HTTP/2 connection per destination once the
    /// concurrent-stream limit is exhausted.
    pub enable_multiple_http2_connections: bool,
    /// Version ceiling for negotiation.
    pub max_http_version: HttpVersion,
    /// Connection-failure retry budget for one logical request.
    pub max_connect_retries: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_connections_per_server: 6,
            pooled_connection_lifetime: None,
            pooled_connection_idle_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
            max_response_headers_len: 64 * 1024,
            max_response_drain_size: 1024 * 1024,
            max_response_drain_time: Duration::from_secs(2),
            expect_100_continue_timeout: Duration::from_secs(1),
            initial_http2_stream_window_size: 65_535,
            max_http2_stream_window_size: 16 * 1024 * 1024,
            enable_http2_window_scaling: true,
            window_scale_threshold_multiplier: 1.0,
            keep_alive_ping_delay: None,
            keep_alive_ping_timeout: Duration::from_secs(20),
            keep_alive_ping_policy: KeepAlivePingPolicy::default(),
            enable_multiple_http2_connections: false,
            max_http_version: HttpVersion::Http2,
            max_connect_retries: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = ConnectionSettings::default();
        assert_eq!(s.max_connections_per_server, 6);
        assert_eq!(s.initial_http2_stream_window_size, 65_535);
        assert!(s.max_http2_stream_window_size >= s.initial_http2_stream_window_size);
        assert_eq!(s.max_connect_retries, 3);
        assert_eq!(s.max_http_version, HttpVersion::Http2);
    }

    #[test]
    fn version_ordering() {
        assert!(HttpVersion::Http11 < HttpVersion::Http2);
        assert!(HttpVersion::Http2 < HttpVersion::Http3);
    }
}
