//! Request body for methods that send data.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::base::neterror::NetError;

/// Request body abstraction: an optional pre-known length plus the ability
/// to copy itself, chunk by chunk, into whatever sink the engine provides.
#[derive(Default)]
pub enum RequestBody {
    /// No body (GET, HEAD, DELETE).
    #[default]
    Empty,
    /// Body with raw bytes; length always known.
    Bytes(Bytes),
    /// Streaming body. `len` of `None` forces chunked framing on HTTP/1.1.
    Stream {
        len: Option<u64>,
        stream: BoxStream<'static, Result<Bytes, NetError>>,
    },
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("RequestBody::Empty"),
            RequestBody::Bytes(b) => write!(f, "RequestBody::Bytes({} bytes)", b.len()),
            RequestBody::Stream { len, .. } => {
                write!(f, "RequestBody::Stream(len={len:?})")
            }
        }
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Bytes(Bytes::from(s))
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(v: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(v))
    }
}

impl From<&'static str> for RequestBody {
    fn from(s: &'static str) -> Self {
        RequestBody::Bytes(Bytes::from_static(s.as_bytes()))
    }
}

impl From<Bytes> for RequestBody {
    fn from(b: Bytes) -> Self {
        RequestBody::Bytes(b)
    }
}

impl RequestBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
            || matches!(self, RequestBody::Bytes(b) if b.is_empty())
    }

    /// Byte count when known up front. Engines with a known length can
    /// frame the body without chunking.
    pub fn known_length(&self) -> Option<u64> {
        match self {
            RequestBody::Empty => Some(0),
            RequestBody::Bytes(b) => Some(b.len() as u64),
            RequestBody::Stream { len, .. } => *len,
        }
    }

    /// Pull the next chunk. `None` means the body is exhausted. A `Bytes`
    /// body yields itself exactly once.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, NetError> {
        match self {
            RequestBody::Empty => Ok(None),
            RequestBody::Bytes(b) => {
                if b.is_empty() {
                    Ok(None)
                } else {
                    let out = std::mem::take(b);
                    Ok(Some(out))
                }
            }
            RequestBody::Stream { stream, .. } => match stream.next().await {
                Some(chunk) => chunk.map(Some),
                None => Ok(None),
            },
        }
    }

    /// Copy the whole remaining body into `sink` without flushing it.
    pub async fn copy_to<W>(&mut self, sink: &mut W) -> Result<u64, NetError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut written = 0u64;
        while let Some(chunk) = self.next_chunk().await? {
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body() {
        let body = RequestBody::Empty;
        assert!(body.is_empty());
        assert_eq!(body.known_length(), Some(0));
    }

    #[tokio::test]
    async fn bytes_body_yields_once() {
        let mut body = RequestBody::from("hello");
        assert_eq!(body.known_length(), Some(5));
        assert_eq!(
            body.next_chunk().await.unwrap(),
            Some(Bytes::from_static(b"hello"))
        );
        assert_eq!(body.next_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn stream_body_copies_in_order() {
        let chunks: Vec<Result<Bytes, NetError>> = vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cd")),
            Ok(Bytes::from_static(b"e")),
        ];
        let mut body = RequestBody::Stream {
            len: Some(5),
            stream: futures::stream::iter(chunks).boxed(),
        };
        let mut sink = Vec::new();
        let n = body.copy_to(&mut sink).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(sink, b"abcde");
    }
}
