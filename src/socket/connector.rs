//! Connection-establishment collaborators.
//!
//! The pool drives these in order when it creates a connection:
//! [`Connector`] (DNS + TCP), then optionally [`ProxyTunnel`], then
//! optionally [`TlsHandshake`]. Only the TCP connector ships with a
//! default implementation; TLS and proxying are supplied by the caller.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::net::TcpStream;

use crate::base::neterror::NetError;
use crate::socket::client::BoxedSocket;

/// DNS resolution + transport connect.
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        host: &'a str,
        port: u16,
    ) -> BoxFuture<'a, Result<BoxedSocket, NetError>>;
}

/// Outcome of a TLS handshake: the wrapped stream plus the ALPN protocol
/// the peer agreed to, if any.
#[derive(Debug)]
pub struct TlsSession {
    pub socket: BoxedSocket,
    pub alpn: Option<String>,
}

/// TLS session establishment over an already-connected socket.
pub trait TlsHandshake: Send + Sync {
    fn handshake<'a>(
        &'a self,
        socket: BoxedSocket,
        server_name: &'a str,
        alpn: &'a [&'static str],
    ) -> BoxFuture<'a, Result<TlsSession, NetError>>;
}

/// CONNECT-style tunnel establishment through a proxy, invoked before TLS
/// when the pool key is a tunneled one.
pub trait ProxyTunnel: Send + Sync {
    fn establish<'a>(
        &'a self,
        socket: BoxedSocket,
        target_host: &'a str,
        target_port: u16,
    ) -> BoxFuture<'a, Result<BoxedSocket, NetError>>;
}

/// Default connector: tokio DNS lookup + TCP connect under a timeout.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for TcpConnector {
    fn connect<'a>(
        &'a self,
        host: &'a str,
        port: u16,
    ) -> BoxFuture<'a, Result<BoxedSocket, NetError>> {
        Box::pin(async move {
            let connect = async {
                let mut last_err = NetError::NameNotResolved;
                let addrs = tokio::net::lookup_host((host, port))
                    .await
                    .map_err(|_| NetError::NameNotResolved)?;
                for addr in addrs {
                    match TcpStream::connect(addr).await {
                        Ok(stream) => {
                            stream.set_nodelay(true).ok();
                            return Ok(Box::new(stream) as BoxedSocket);
                        }
                        Err(e) => last_err = NetError::from_io(&e),
                    }
                }
                Err(last_err)
            };
            match tokio::time::timeout(self.connect_timeout, connect).await {
                Ok(result) => result,
                Err(_) => Err(NetError::ConnectionTimedOut),
            }
        })
    }
}
