//! HTTP/3 SETTINGS (RFC 9114 Section 7.2.4).

use crate::base::neterror::NetError;
use crate::h3::frame::{decode_varint, encode_varint, varint_len};

const SETTINGS_QPACK_MAX_TABLE_CAPACITY: u64 = 0x01;
const SETTINGS_MAX_FIELD_SECTION_SIZE: u64 = 0x06;
const SETTINGS_QPACK_BLOCKED_STREAMS: u64 = 0x07;

/// Identifiers carried over from HTTP/2 that MUST NOT appear in HTTP/3
/// SETTINGS (RFC 9114 Section 7.2.4.1).
const RESERVED_H2_SETTINGS: &[u64] = &[0x02, 0x03, 0x04, 0x05];

/// HTTP/3 SETTINGS parameters. This client only ever advertises a
/// max-field-section-size; QPACK dynamic-table parameters stay at their
/// table-less defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    /// SETTINGS_QPACK_MAX_TABLE_CAPACITY (0x01). Default 0.
    pub qpack_max_table_capacity: u64,
    /// SETTINGS_MAX_FIELD_SECTION_SIZE (0x06). Default unlimited.
    pub max_field_section_size: u64,
    /// SETTINGS_QPACK_BLOCKED_STREAMS (0x07). Default 0.
    pub qpack_blocked_streams: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            qpack_max_table_capacity: 0,
            max_field_section_size: u64::MAX,
            qpack_blocked_streams: 0,
        }
    }
}

impl Settings {
    pub fn client(max_field_section_size: u64) -> Self {
        Self {
            max_field_section_size,
            ..Default::default()
        }
    }

    /// Encode as (identifier, value) varint pairs; defaults are omitted.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        if self.qpack_max_table_capacity != 0 {
            encode_varint(buf, SETTINGS_QPACK_MAX_TABLE_CAPACITY);
            encode_varint(buf, self.qpack_max_table_capacity);
        }
        if self.max_field_section_size != u64::MAX {
            encode_varint(buf, SETTINGS_MAX_FIELD_SECTION_SIZE);
            encode_varint(buf, self.max_field_section_size);
        }
        if self.qpack_blocked_streams != 0 {
            encode_varint(buf, SETTINGS_QPACK_BLOCKED_STREAMS);
            encode_varint(buf, self.qpack_blocked_streams);
        }
    }

    pub fn encoded_len(&self) -> usize {
        let mut len = 0;
        if self.qpack_max_table_capacity != 0 {
            len += varint_len(SETTINGS_QPACK_MAX_TABLE_CAPACITY)
                + varint_len(self.qpack_max_table_capacity);
        }
        if self.max_field_section_size != u64::MAX {
            len += varint_len(SETTINGS_MAX_FIELD_SECTION_SIZE)
                + varint_len(self.max_field_section_size);
        }
        if self.qpack_blocked_streams != 0 {
            len += varint_len(SETTINGS_QPACK_BLOCKED_STREAMS)
                + varint_len(self.qpack_blocked_streams);
        }
        len
    }

    /// Decode a SETTINGS payload. Reserved HTTP/2 identifiers are a
    /// connection-level settings error; unknown identifiers are ignored.
    pub fn decode(mut buf: &[u8]) -> Result<Self, NetError> {
        let mut settings = Settings::default();
        while !buf.is_empty() {
            let (id, n) = decode_varint(buf).ok_or(NetError::Http3ProtocolError)?;
            buf = &buf[n..];
            let (value, n) = decode_varint(buf).ok_or(NetError::Http3ProtocolError)?;
            buf = &buf[n..];
            if RESERVED_H2_SETTINGS.contains(&id) {
                return Err(NetError::Http3ProtocolError);
            }
            match id {
                SETTINGS_QPACK_MAX_TABLE_CAPACITY => settings.qpack_max_table_capacity = value,
                SETTINGS_MAX_FIELD_SECTION_SIZE => settings.max_field_section_size = value,
                SETTINGS_QPACK_BLOCKED_STREAMS => settings.qpack_blocked_streams = value,
                _ => {}
            }
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_settings_round_trip() {
        let settings = Settings::client(64 * 1024);
        let mut buf = Vec::new();
        settings.encode(&mut buf);
        assert_eq!(buf.len(), settings.encoded_len());
        let decoded = Settings::decode(&buf).unwrap();
        assert_eq!(decoded.max_field_section_size, 64 * 1024);
        assert_eq!(decoded.qpack_max_table_capacity, 0);
    }

    #[test]
    fn reserved_h2_identifier_rejected() {
        let mut buf = Vec::new();
        encode_varint(&mut buf, 0x04); // INITIAL_WINDOW_SIZE, HTTP/2-only
        encode_varint(&mut buf, 65_535);
        assert_eq!(
            Settings::decode(&buf).unwrap_err(),
            NetError::Http3ProtocolError
        );
    }

    #[test]
    fn unknown_identifier_ignored() {
        let mut buf = Vec::new();
        encode_varint(&mut buf, 0x21); // GREASE-range identifier
        encode_varint(&mut buf, 1);
        let decoded = Settings::decode(&buf).unwrap();
        assert_eq!(decoded.max_field_section_size, u64::MAX);
    }

    #[test]
    fn truncated_payload_rejected() {
        let mut buf = Vec::new();
        encode_varint(&mut buf, SETTINGS_MAX_FIELD_SECTION_SIZE);
        // Value varint claims 4 bytes but only 1 follows.
        buf.push(0x80);
        assert!(Settings::decode(&buf).is_err());
    }
}
