use std::fmt;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// Result of a non-blocking liveness probe on an idle socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Connected with no pending data: safe to reuse.
    Idle,
    /// The peer sent bytes while the connection was idle. A pooled
    /// connection in this state must not be reused.
    DataAvailable,
    /// EOF or transport error observed.
    Closed,
}

/// A connected duplex byte stream (TCP, or TLS-wrapped by a collaborator).
pub trait StreamSocket: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {
    /// Non-blocking probe via a zero-consumption peek. Transports that
    /// cannot peek (in-memory pipes, TLS wrappers) report `Idle` and rely
    /// on the engine's own read-side detection.
    fn liveness(&self) -> Liveness {
        Liveness::Idle
    }

    fn is_connected(&self) -> bool {
        self.liveness() != Liveness::Closed
    }

    /// Connected with nothing unread on the wire.
    fn is_connected_and_idle(&self) -> bool {
        self.liveness() == Liveness::Idle
    }
}

pub type BoxedSocket = Box<dyn StreamSocket>;

impl StreamSocket for TcpStream {
    fn liveness(&self) -> Liveness {
        if self.peer_addr().is_err() {
            return Liveness::Closed;
        }
        // One-byte peek; Pending means connected-and-quiet.
        let mut buf = [0u8; 1];
        let mut read_buf = ReadBuf::new(&mut buf);
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        match self.poll_peek(&mut cx, &mut read_buf) {
            Poll::Pending => Liveness::Idle,
            Poll::Ready(Ok(0)) => Liveness::Closed,
            Poll::Ready(Ok(_)) => Liveness::DataAvailable,
            Poll::Ready(Err(_)) => Liveness::Closed,
        }
    }
}

// In-memory transport used throughout the test suites.
impl StreamSocket for tokio::io::DuplexStream {}

impl StreamSocket for BoxedSocket {
    fn liveness(&self) -> Liveness {
        (**self).liveness()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn tcp_liveness_states() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        assert_eq!(client.liveness(), Liveness::Idle);

        server.write_all(b"x").await.unwrap();
        // Wait for delivery.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(client.liveness(), Liveness::DataAvailable);

        drop(server);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        // Unread data still pending counts as data, not closed.
        assert_ne!(client.liveness(), Liveness::Idle);
    }

    #[tokio::test]
    async fn duplex_reports_idle() {
        let (a, _b) = tokio::io::duplex(64);
        assert_eq!(a.liveness(), Liveness::Idle);
        assert!(a.is_connected_and_idle());
    }
}
