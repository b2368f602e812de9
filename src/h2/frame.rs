//! HTTP/2 frame codec (RFC 7540 Section 4).
//!
//! Frames carry a fixed 9-byte header: 24-bit payload length, 8-bit type,
//! 8-bit flags, reserved bit + 31-bit stream identifier, all big-endian.
//! Parsing validates the stream-id rules per frame type so the connection
//! loop can treat any `Err` as a connection-level fault.

use bytes::{Buf, Bytes};

use crate::base::neterror::NetError;
use crate::h2::settings::Settings;

/// Frame header size in bytes.
pub const FRAME_HEADER_LEN: usize = 9;

/// Largest payload we accept; we advertise the RFC default and never raise it.
pub const MAX_FRAME_SIZE: u32 = 16_384;

// Frame type constants (RFC 7540 Section 6; ALTSVC from RFC 7838).
pub const FRAME_DATA: u8 = 0x0;
pub const FRAME_HEADERS: u8 = 0x1;
pub const FRAME_PRIORITY: u8 = 0x2;
pub const FRAME_RST_STREAM: u8 = 0x3;
pub const FRAME_SETTINGS: u8 = 0x4;
pub const FRAME_PUSH_PROMISE: u8 = 0x5;
pub const FRAME_PING: u8 = 0x6;
pub const FRAME_GOAWAY: u8 = 0x7;
pub const FRAME_WINDOW_UPDATE: u8 = 0x8;
pub const FRAME_CONTINUATION: u8 = 0x9;
pub const FRAME_ALTSVC: u8 = 0xa;

// Flag constants.
pub const FLAG_END_STREAM: u8 = 0x1;
pub const FLAG_ACK: u8 = 0x1;
pub const FLAG_END_HEADERS: u8 = 0x4;
pub const FLAG_PADDED: u8 = 0x8;
pub const FLAG_PRIORITY: u8 = 0x20;

/// HTTP/2 error codes (RFC 7540 Section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    pub fn from_u32(v: u32) -> Self {
        match v {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            _ => Self::InternalError,
        }
    }
}

/// Decoded 9-byte frame header.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    pub fn parse(buf: &[u8; FRAME_HEADER_LEN]) -> Self {
        let length =
            (u32::from(buf[0]) << 16) | (u32::from(buf[1]) << 8) | u32::from(buf[2]);
        let stream_id = ((u32::from(buf[5]) << 24)
            | (u32::from(buf[6]) << 16)
            | (u32::from(buf[7]) << 8)
            | u32::from(buf[8]))
            & 0x7fff_ffff;
        Self {
            length,
            frame_type: buf[3],
            flags: buf[4],
            stream_id,
        }
    }
}

/// Write a frame header into the first 9 bytes of `buf`.
pub fn write_frame_header(
    buf: &mut [u8],
    payload_len: u32,
    frame_type: u8,
    flags: u8,
    stream_id: u32,
) {
    buf[0] = (payload_len >> 16) as u8;
    buf[1] = (payload_len >> 8) as u8;
    buf[2] = payload_len as u8;
    buf[3] = frame_type;
    buf[4] = flags;
    let sid = stream_id & 0x7fff_ffff;
    buf[5] = (sid >> 24) as u8;
    buf[6] = (sid >> 16) as u8;
    buf[7] = (sid >> 8) as u8;
    buf[8] = sid as u8;
}

/// A parsed incoming frame.
#[derive(Debug)]
pub enum Frame {
    Data {
        stream_id: u32,
        payload: Bytes,
        /// Padding bytes count toward flow control but not toward the body.
        padding: u32,
        end_stream: bool,
    },
    Headers {
        stream_id: u32,
        fragment: Bytes,
        end_stream: bool,
        end_headers: bool,
    },
    Priority {
        stream_id: u32,
    },
    RstStream {
        stream_id: u32,
        error_code: ErrorCode,
    },
    Settings {
        ack: bool,
        settings: Settings,
    },
    PushPromise {
        stream_id: u32,
    },
    Ping {
        ack: bool,
        payload: u64,
    },
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        fragment: Bytes,
        end_headers: bool,
    },
    AltSvc {
        stream_id: u32,
        origin: Bytes,
        value: Bytes,
    },
    /// Unknown frame types are ignored per spec.
    Unknown {
        frame_type: u8,
    },
}

/// Parse one frame payload against its header, validating stream-id and
/// length rules. Errors are connection-level faults.
pub fn parse_frame(header: FrameHeader, mut payload: Bytes) -> Result<Frame, NetError> {
    debug_assert_eq!(header.length as usize, payload.len());
    let sid = header.stream_id;
    match header.frame_type {
        FRAME_DATA => {
            if sid == 0 {
                return Err(NetError::Http2ProtocolError);
            }
            let mut padding = 0u32;
            if header.flags & FLAG_PADDED != 0 {
                if payload.is_empty() {
                    return Err(NetError::Http2FrameSizeError);
                }
                let pad_len = payload[0] as usize;
                payload.advance(1);
                if pad_len > payload.len() {
                    return Err(NetError::Http2ProtocolError);
                }
                payload.truncate(payload.len() - pad_len);
                padding = pad_len as u32 + 1;
            }
            Ok(Frame::Data {
                stream_id: sid,
                payload,
                padding,
                end_stream: header.flags & FLAG_END_STREAM != 0,
            })
        }
        FRAME_HEADERS => {
            if sid == 0 {
                return Err(NetError::Http2ProtocolError);
            }
            if header.flags & FLAG_PADDED != 0 {
                if payload.is_empty() {
                    return Err(NetError::Http2FrameSizeError);
                }
                let pad_len = payload[0] as usize;
                payload.advance(1);
                if pad_len > payload.len() {
                    return Err(NetError::Http2ProtocolError);
                }
                payload.truncate(payload.len() - pad_len);
            }
            if header.flags & FLAG_PRIORITY != 0 {
                if payload.len() < 5 {
                    return Err(NetError::Http2FrameSizeError);
                }
                payload.advance(5);
            }
            Ok(Frame::Headers {
                stream_id: sid,
                fragment: payload,
                end_stream: header.flags & FLAG_END_STREAM != 0,
                end_headers: header.flags & FLAG_END_HEADERS != 0,
            })
        }
        FRAME_PRIORITY => {
            if sid == 0 || payload.len() != 5 {
                return Err(NetError::Http2ProtocolError);
            }
            Ok(Frame::Priority { stream_id: sid })
        }
        FRAME_RST_STREAM => {
            if sid == 0 {
                return Err(NetError::Http2ProtocolError);
            }
            if payload.len() != 4 {
                return Err(NetError::Http2FrameSizeError);
            }
            let code = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            Ok(Frame::RstStream {
                stream_id: sid,
                error_code: ErrorCode::from_u32(code),
            })
        }
        FRAME_SETTINGS => {
            if sid != 0 {
                return Err(NetError::Http2ProtocolError);
            }
            let ack = header.flags & FLAG_ACK != 0;
            if ack {
                if !payload.is_empty() {
                    return Err(NetError::Http2FrameSizeError);
                }
                return Ok(Frame::Settings {
                    ack,
                    settings: Settings::default(),
                });
            }
            if payload.len() % 6 != 0 {
                return Err(NetError::Http2FrameSizeError);
            }
            let settings = Settings::decode(&payload)?;
            Ok(Frame::Settings { ack, settings })
        }
        FRAME_PUSH_PROMISE => {
            if sid == 0 {
                return Err(NetError::Http2ProtocolError);
            }
            Ok(Frame::PushPromise { stream_id: sid })
        }
        FRAME_PING => {
            if sid != 0 {
                return Err(NetError::Http2ProtocolError);
            }
            if payload.len() != 8 {
                return Err(NetError::Http2FrameSizeError);
            }
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&payload);
            Ok(Frame::Ping {
                ack: header.flags & FLAG_ACK != 0,
                payload: u64::from_be_bytes(bytes),
            })
        }
        FRAME_GOAWAY => {
            if sid != 0 {
                return Err(NetError::Http2ProtocolError);
            }
            if payload.len() < 8 {
                return Err(NetError::Http2FrameSizeError);
            }
            let last = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
                & 0x7fff_ffff;
            let code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
            Ok(Frame::GoAway {
                last_stream_id: last,
                error_code: ErrorCode::from_u32(code),
            })
        }
        FRAME_WINDOW_UPDATE => {
            if payload.len() != 4 {
                return Err(NetError::Http2FrameSizeError);
            }
            let increment = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
                & 0x7fff_ffff;
            if increment == 0 {
                return Err(NetError::Http2ProtocolError);
            }
            Ok(Frame::WindowUpdate {
                stream_id: sid,
                increment,
            })
        }
        FRAME_CONTINUATION => {
            if sid == 0 {
                return Err(NetError::Http2ProtocolError);
            }
            Ok(Frame::Continuation {
                stream_id: sid,
                fragment: payload,
                end_headers: header.flags & FLAG_END_HEADERS != 0,
            })
        }
        FRAME_ALTSVC => {
            if payload.len() < 2 {
                return Err(NetError::Http2FrameSizeError);
            }
            let origin_len =
                usize::from(u16::from_be_bytes([payload[0], payload[1]]));
            payload.advance(2);
            if origin_len > payload.len() {
                return Err(NetError::Http2FrameSizeError);
            }
            let origin = payload.split_to(origin_len);
            Ok(Frame::AltSvc {
                stream_id: sid,
                origin,
                value: payload,
            })
        }
        other => Ok(Frame::Unknown { frame_type: other }),
    }
}

// -- Outgoing frame encoders. Each returns a complete frame buffer the
// write loop copies into its reserved slot. --

pub fn encode_data_frame(stream_id: u32, data: &[u8], end_stream: bool, out: &mut Vec<u8>) {
    let start = out.len();
    out.resize(start + FRAME_HEADER_LEN, 0);
    let flags = if end_stream { FLAG_END_STREAM } else { 0 };
    write_frame_header(
        &mut out[start..],
        data.len() as u32,
        FRAME_DATA,
        flags,
        stream_id,
    );
    out.extend_from_slice(data);
}

/// HEADERS plus CONTINUATION frames as needed to fit `max_frame_size`.
pub fn encode_headers_frames(
    stream_id: u32,
    block: &[u8],
    end_stream: bool,
    max_frame_size: usize,
    out: &mut Vec<u8>,
) {
    let mut first = true;
    let mut rest = block;
    loop {
        let take = rest.len().min(max_frame_size);
        let (fragment, remaining) = rest.split_at(take);
        rest = remaining;
        let end_headers = rest.is_empty();

        let mut flags = 0u8;
        let frame_type = if first {
            if end_stream {
                flags |= FLAG_END_STREAM;
            }
            FRAME_HEADERS
        } else {
            FRAME_CONTINUATION
        };
        if end_headers {
            flags |= FLAG_END_HEADERS;
        }

        let start = out.len();
        out.resize(start + FRAME_HEADER_LEN, 0);
        write_frame_header(
            &mut out[start..],
            fragment.len() as u32,
            frame_type,
            flags,
            stream_id,
        );
        out.extend_from_slice(fragment);

        first = false;
        if end_headers {
            break;
        }
    }
}

pub fn encode_settings_frame(settings: &Settings, ack: bool, out: &mut Vec<u8>) {
    let payload = if ack { Vec::new() } else { settings.encode_to_vec() };
    let start = out.len();
    out.resize(start + FRAME_HEADER_LEN, 0);
    let flags = if ack { FLAG_ACK } else { 0 };
    write_frame_header(&mut out[start..], payload.len() as u32, FRAME_SETTINGS, flags, 0);
    out.extend_from_slice(&payload);
}

pub fn encode_window_update_frame(stream_id: u32, increment: u32, out: &mut Vec<u8>) {
    let start = out.len();
    out.resize(start + FRAME_HEADER_LEN, 0);
    write_frame_header(&mut out[start..], 4, FRAME_WINDOW_UPDATE, 0, stream_id);
    out.extend_from_slice(&(increment & 0x7fff_ffff).to_be_bytes());
}

pub fn encode_rst_stream_frame(stream_id: u32, error_code: ErrorCode, out: &mut Vec<u8>) {
    let start = out.len();
    out.resize(start + FRAME_HEADER_LEN, 0);
    write_frame_header(&mut out[start..], 4, FRAME_RST_STREAM, 0, stream_id);
    out.extend_from_slice(&(error_code as u32).to_be_bytes());
}

pub fn encode_ping_frame(payload: u64, ack: bool, out: &mut Vec<u8>) {
    let start = out.len();
    out.resize(start + FRAME_HEADER_LEN, 0);
    let flags = if ack { FLAG_ACK } else { 0 };
    write_frame_header(&mut out[start..], 8, FRAME_PING, flags, 0);
    out.extend_from_slice(&payload.to_be_bytes());
}

pub fn encode_goaway_frame(last_stream_id: u32, error_code: ErrorCode, out: &mut Vec<u8>) {
    let start = out.len();
    out.resize(start + FRAME_HEADER_LEN, 0);
    write_frame_header(&mut out[start..], 8, FRAME_GOAWAY, 0, 0);
    out.extend_from_slice(&(last_stream_id & 0x7fff_ffff).to_be_bytes());
    out.extend_from_slice(&(error_code as u32).to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(buf: &[u8]) -> Result<Frame, NetError> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&buf[..FRAME_HEADER_LEN]);
        let header = FrameHeader::parse(&header);
        parse_frame(header, Bytes::copy_from_slice(&buf[FRAME_HEADER_LEN..]))
    }

    #[test]
    fn header_round_trip() {
        let mut buf = [0u8; FRAME_HEADER_LEN];
        write_frame_header(&mut buf, 0x01_02_03, FRAME_HEADERS, FLAG_END_HEADERS, 77);
        let parsed = FrameHeader::parse(&buf);
        assert_eq!(parsed.length, 0x01_02_03);
        assert_eq!(parsed.frame_type, FRAME_HEADERS);
        assert_eq!(parsed.flags, FLAG_END_HEADERS);
        assert_eq!(parsed.stream_id, 77);
    }

    #[test]
    fn data_frame_round_trip() {
        let mut wire = Vec::new();
        encode_data_frame(3, b"hello", true, &mut wire);
        match parse(&wire).unwrap() {
            Frame::Data {
                stream_id,
                payload,
                end_stream,
                padding,
            } => {
                assert_eq!(stream_id, 3);
                assert_eq!(&payload[..], b"hello");
                assert!(end_stream);
                assert_eq!(padding, 0);
            }
            f => panic!("unexpected {f:?}"),
        }
    }

    #[test]
    fn padded_data_strips_padding() {
        // Hand-build a padded DATA frame: pad_len=3, body "ab", padding 3.
        let mut wire = vec![0u8; FRAME_HEADER_LEN];
        let payload = [3u8, b'a', b'b', 0, 0, 0];
        write_frame_header(&mut wire, payload.len() as u32, FRAME_DATA, FLAG_PADDED, 5);
        wire.extend_from_slice(&payload);
        match parse(&wire).unwrap() {
            Frame::Data {
                payload, padding, ..
            } => {
                assert_eq!(&payload[..], b"ab");
                assert_eq!(padding, 4); // pad bytes + length octet
            }
            f => panic!("unexpected {f:?}"),
        }
    }

    #[test]
    fn bad_padding_is_protocol_error() {
        let mut wire = vec![0u8; FRAME_HEADER_LEN];
        let payload = [9u8, b'a']; // pad_len 9 > remaining 1
        write_frame_header(&mut wire, payload.len() as u32, FRAME_DATA, FLAG_PADDED, 5);
        wire.extend_from_slice(&payload);
        assert_eq!(parse(&wire).unwrap_err(), NetError::Http2ProtocolError);
    }

    #[test]
    fn data_on_stream_zero_rejected() {
        let mut wire = Vec::new();
        encode_data_frame(0, b"x", false, &mut wire);
        assert_eq!(parse(&wire).unwrap_err(), NetError::Http2ProtocolError);
    }

    #[test]
    fn settings_on_nonzero_stream_rejected() {
        let mut wire = Vec::new();
        encode_settings_frame(&Settings::default(), false, &mut wire);
        wire[8] = 1; // poke stream id
        assert_eq!(parse(&wire).unwrap_err(), NetError::Http2ProtocolError);
    }

    #[test]
    fn zero_window_increment_rejected() {
        let mut wire = vec![0u8; FRAME_HEADER_LEN];
        write_frame_header(&mut wire, 4, FRAME_WINDOW_UPDATE, 0, 1);
        wire.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(parse(&wire).unwrap_err(), NetError::Http2ProtocolError);
    }

    #[test]
    fn ping_round_trip() {
        let mut wire = Vec::new();
        encode_ping_frame(0xdead_beef, false, &mut wire);
        match parse(&wire).unwrap() {
            Frame::Ping { ack, payload } => {
                assert!(!ack);
                assert_eq!(payload, 0xdead_beef);
            }
            f => panic!("unexpected {f:?}"),
        }
    }

    #[test]
    fn goaway_round_trip() {
        let mut wire = Vec::new();
        encode_goaway_frame(7, ErrorCode::NoError, &mut wire);
        match parse(&wire).unwrap() {
            Frame::GoAway {
                last_stream_id,
                error_code,
            } => {
                assert_eq!(last_stream_id, 7);
                assert_eq!(error_code, ErrorCode::NoError);
            }
            f => panic!("unexpected {f:?}"),
        }
    }

    #[test]
    fn headers_split_into_continuations() {
        let block = vec![0xAAu8; 100];
        let mut wire = Vec::new();
        encode_headers_frames(9, &block, false, 40, &mut wire);

        // Expect HEADERS(40) + CONTINUATION(40) + CONTINUATION(20).
        let mut offset = 0;
        let mut types = Vec::new();
        let mut last_flags = 0;
        while offset < wire.len() {
            let mut header = [0u8; FRAME_HEADER_LEN];
            header.copy_from_slice(&wire[offset..offset + FRAME_HEADER_LEN]);
            let h = FrameHeader::parse(&header);
            types.push(h.frame_type);
            last_flags = h.flags;
            offset += FRAME_HEADER_LEN + h.length as usize;
        }
        assert_eq!(
            types,
            vec![FRAME_HEADERS, FRAME_CONTINUATION, FRAME_CONTINUATION]
        );
        assert_ne!(last_flags & FLAG_END_HEADERS, 0);
    }

    #[test]
    fn unknown_frame_type_ignored() {
        let mut wire = vec![0u8; FRAME_HEADER_LEN];
        write_frame_header(&mut wire, 0, 0x42, 0, 0);
        assert!(matches!(
            parse(&wire).unwrap(),
            Frame::Unknown { frame_type: 0x42 }
        ));
    }

    #[test]
    fn altsvc_frame_parses_origin_and_value() {
        let mut wire = vec![0u8; FRAME_HEADER_LEN];
        let origin = b"example.com";
        let value = b"h3=\":443\"; ma=3600";
        let mut payload = Vec::new();
        payload.extend_from_slice(&(origin.len() as u16).to_be_bytes());
        payload.extend_from_slice(origin);
        payload.extend_from_slice(value);
        write_frame_header(&mut wire, payload.len() as u32, FRAME_ALTSVC, 0, 0);
        wire.extend_from_slice(&payload);
        match parse(&wire).unwrap() {
            Frame::AltSvc {
                origin: o,
                value: v,
                ..
            } => {
                assert_eq!(&o[..], origin);
                assert_eq!(&v[..], value);
            }
            f => panic!("unexpected {f:?}"),
        }
    }
}
