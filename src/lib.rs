//! # socknet
//!
//! A pooled, multi-version HTTP client stack for Rust.
//!
//! `socknet` implements the transport half of an HTTP client: connection
//! pooling with per-destination admission control, and hand-written
//! protocol engines for HTTP/1.1, HTTP/2, and HTTP/3.
//!
//! ## Features
//!
//! - **Connection Pooling**: per-destination pools with idle reuse,
//!   request queuing, lifetime/idle scavenging, and version fallback
//! - **HTTP/1.1**: buffered exclusive connections, chunked transfer
//!   coding, folded headers, 100-continue, keep-alive gating
//! - **HTTP/2**: full frame state machine, HPACK, stream multiplexing,
//!   flow-control windows with RTT-based scaling, keep-alive pings
//! - **HTTP/3**: QPACK and frame envelopes over an abstract QUIC
//!   transport, control-stream bookkeeping, GOAWAY-driven retry
//! - **Alt-Svc**: HTTP/3 upgrade learning with expiry and blocklisting
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use socknet::base::config::ConnectionSettings;
//! use socknet::http::HttpRequest;
//! use socknet::pool::PoolManager;
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = PoolManager::new(ConnectionSettings::default());
//!     manager.start_cleanup_task();
//!     let request = HttpRequest::get("http://example.com/").unwrap();
//!     let response = manager.send(request).await.unwrap();
//!     println!("Status: {}", response.status());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error codes and the configuration surface
//! - [`codec`] - HPACK and QPACK header-block adapters
//! - [`socket`] - Transport traits and connection establishment
//! - [`h1`] - HTTP/1.1 connection engine
//! - [`h2`] - HTTP/2 connection engine
//! - [`h3`] - HTTP/3 connection engine over abstract QUIC
//! - [`pool`] - Connection pools and the pool manager
//! - [`http`] - Request/response value carriers
//!
//! External concerns stay external: TLS, proxy tunneling, DNS policy,
//! QUIC, authentication, and decompression plug in through collaborator
//! traits.

pub mod base;
pub mod codec;
pub mod h1;
pub mod h2;
pub mod h3;
pub mod http;
pub mod pool;
pub mod socket;
