//! Chunked transfer-coding (RFC 7230 Section 4.1).
//!
//! The decoder is an incremental state machine fed from the connection's
//! read buffer; it never requires a full chunk to be resident before
//! yielding data, so multi-megabyte chunks stream through the fixed-size
//! read path.

use bytes::{Buf, Bytes, BytesMut};

use crate::base::neterror::NetError;

/// Longest accepted chunk-size line, extensions included.
const MAX_CHUNK_HEADER_LEN: usize = 256;

/// Cumulative cap on trailer bytes.
const MAX_TRAILER_LEN: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Expecting `<hex-size>[;ext]\r\n`.
    ChunkHeader,
    /// Expecting chunk payload bytes.
    ChunkData,
    /// Expecting the `\r\n` closing a chunk payload.
    ChunkTerminator,
    /// After the zero chunk: trailer lines until a blank line.
    Trailers,
    Done,
}

/// One parser step outcome.
#[derive(Debug)]
pub enum DecodeStep {
    /// Body data became available.
    Data(Bytes),
    /// Parser needs more input bytes.
    NeedMore,
    /// Terminal chunk and trailers fully consumed.
    Finished,
}

/// Incremental chunked-body decoder.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: State,
    /// Bytes left in the current chunk payload.
    remaining: u64,
    /// Raw trailer lines, exposed after completion.
    trailers: Vec<(String, String)>,
    trailer_bytes: usize,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self {
            state: State::ChunkHeader,
            remaining: 0,
            trailers: Vec::new(),
            trailer_bytes: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Trailer name/value pairs, valid once `is_done()`.
    pub fn take_trailers(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.trailers)
    }

    /// Consume as much of `buf` as possible, advancing the state machine.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeStep, NetError> {
        loop {
            match self.state {
                State::ChunkHeader => {
                    let Some(line_end) = find_crlf(buf) else {
                        if buf.len() > MAX_CHUNK_HEADER_LEN {
                            return Err(NetError::InvalidChunkedEncoding);
                        }
                        return Ok(DecodeStep::NeedMore);
                    };
                    if line_end > MAX_CHUNK_HEADER_LEN {
                        return Err(NetError::InvalidChunkedEncoding);
                    }
                    let size = parse_chunk_size(&buf[..line_end])?;
                    buf.advance(line_end + 2);
                    if size == 0 {
                        self.state = State::Trailers;
                    } else {
                        self.remaining = size;
                        self.state = State::ChunkData;
                    }
                }
                State::ChunkData => {
                    if buf.is_empty() {
                        return Ok(DecodeStep::NeedMore);
                    }
                    let take = (self.remaining).min(buf.len() as u64) as usize;
                    let data = buf.split_to(take).freeze();
                    self.remaining -= take as u64;
                    if self.remaining == 0 {
                        self.state = State::ChunkTerminator;
                    }
                    return Ok(DecodeStep::Data(data));
                }
                State::ChunkTerminator => {
                    if buf.len() < 2 {
                        return Ok(DecodeStep::NeedMore);
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(NetError::InvalidChunkedEncoding);
                    }
                    buf.advance(2);
                    self.state = State::ChunkHeader;
                }
                State::Trailers => {
                    let Some(line_end) = find_crlf(buf) else {
                        if buf.len() > MAX_TRAILER_LEN {
                            return Err(NetError::InvalidChunkedEncoding);
                        }
                        return Ok(DecodeStep::NeedMore);
                    };
                    self.trailer_bytes += line_end + 2;
                    if self.trailer_bytes > MAX_TRAILER_LEN {
                        return Err(NetError::InvalidChunkedEncoding);
                    }
                    if line_end == 0 {
                        buf.advance(2);
                        self.state = State::Done;
                        return Ok(DecodeStep::Finished);
                    }
                    let line = buf.split_to(line_end);
                    buf.advance(2);
                    if let Some(colon) = line.iter().position(|&b| b == b':') {
                        let name = String::from_utf8_lossy(&line[..colon]).trim().to_string();
                        let value = String::from_utf8_lossy(&line[colon + 1..])
                            .trim()
                            .to_string();
                        self.trailers.push((name, value));
                    }
                }
                State::Done => return Ok(DecodeStep::Finished),
            }
        }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, NetError> {
    // Strip chunk extensions (";key=value").
    let size_part = match line.iter().position(|&b| b == b';') {
        Some(p) => &line[..p],
        None => line,
    };
    let text = std::str::from_utf8(size_part)
        .map_err(|_| NetError::InvalidChunkedEncoding)?
        .trim();
    if text.is_empty() || text.len() > 16 {
        return Err(NetError::InvalidChunkedEncoding);
    }
    u64::from_str_radix(text, 16).map_err(|_| NetError::InvalidChunkedEncoding)
}

/// Write one chunk's framing + payload into `out`.
pub fn encode_chunk(data: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

/// Terminal zero chunk with no trailers.
pub fn encode_last_chunk(out: &mut Vec<u8>) {
    out.extend_from_slice(b"0\r\n\r\n");
}
