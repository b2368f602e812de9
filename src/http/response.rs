//! Response value carrier with a streaming body.

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode, Version};

use crate::base::neterror::NetError;

/// The response a caller receives: head fields plus a pull-based body
/// backed by the connection that produced it.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl HttpResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Collect the whole body into memory.
    pub async fn bytes(self) -> Result<Bytes, NetError> {
        self.body.bytes().await
    }

    /// Collect the whole body as UTF-8 text (lossy).
    pub async fn text(self) -> Result<String, NetError> {
        let bytes = self.body.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Per-engine response body stream. The variant is fixed when the response
/// head is parsed and never changes afterwards.
#[derive(Debug)]
pub enum ResponseBody {
    /// No body at all (engine produced the head without a stream).
    Empty,
    H1(crate::h1::Http1Body),
    H2(crate::h2::Http2Body),
    H3(crate::h3::Http3Body),
}

impl ResponseBody {
    /// Pull the next chunk; `None` marks end of body. Reading to the end
    /// (or dropping the body) releases the underlying connection.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, NetError> {
        match self {
            ResponseBody::Empty => Ok(None),
            ResponseBody::H1(body) => body.chunk().await,
            ResponseBody::H2(body) => body.chunk().await,
            ResponseBody::H3(body) => body.chunk().await,
        }
    }

    /// Trailing headers, when the protocol delivered any after the body.
    pub fn trailers(&self) -> Option<&HeaderMap> {
        match self {
            ResponseBody::Empty => None,
            ResponseBody::H1(body) => body.trailers(),
            ResponseBody::H2(body) => body.trailers(),
            ResponseBody::H3(body) => body.trailers(),
        }
    }

    /// Read the remaining body into one buffer.
    pub async fn bytes(mut self) -> Result<Bytes, NetError> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }
}
