//! Transport sockets and connection-establishment collaborators.
//!
//! The engines own one [`BoxedSocket`] each and never establish transports
//! themselves: DNS+TCP, TLS, and proxy tunneling are collaborator traits
//! the pool invokes at connection-creation time.
//!
//! [`BoxedSocket`]: client::BoxedSocket

pub mod client;
pub mod connector;

pub use client::{BoxedSocket, Liveness, StreamSocket};
pub use connector::{Connector, ProxyTunnel, TcpConnector, TlsHandshake, TlsSession};
