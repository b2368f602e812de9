//! QPACK header compression, static table only (RFC 9204).
//!
//! Stateless QPACK: the 99-entry static table, no dynamic table, no
//! encoder/decoder stream state. Every field section is encoded with
//! Required Insert Count 0, so blocks never wait on table updates and the
//! peer's encoder stream can be drained unread. This is the profile the
//! connection advertises (`SETTINGS_QPACK_MAX_TABLE_CAPACITY` = 0).

use bytes::Bytes;

use super::{decode_prefix_int, encode_prefix_int, huffman, CodecError, HeaderField};

/// QPACK static table (RFC 9204 Appendix A), 0-based on the wire.
static STATIC_TABLE: [(&str, &str); 99] = [
    (":authority", ""),
    (":path", "/"),
    ("age", "0"),
    ("content-disposition", ""),
    ("content-length", "0"),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("referer", ""),
    ("set-cookie", ""),
    (":method", "CONNECT"),
    (":method", "DELETE"),
    (":method", "GET"),
    (":method", "HEAD"),
    (":method", "OPTIONS"),
    (":method", "POST"),
    (":method", "PUT"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "103"),
    (":status", "200"),
    (":status", "304"),
    (":status", "404"),
    (":status", "503"),
    ("accept", "*/*"),
    ("accept", "application/dns-message"),
    ("accept-encoding", "gzip, deflate, br"),
    ("accept-ranges", "bytes"),
    ("access-control-allow-headers", "cache-control"),
    ("access-control-allow-headers", "content-type"),
    ("access-control-allow-origin", "*"),
    ("cache-control", "max-age=0"),
    ("cache-control", "max-age=2592000"),
    ("cache-control", "max-age=604800"),
    ("cache-control", "no-cache"),
    ("cache-control", "no-store"),
    ("cache-control", "public, max-age=31536000"),
    ("content-encoding", "br"),
    ("content-encoding", "gzip"),
    ("content-type", "application/dns-message"),
    ("content-type", "application/javascript"),
    ("content-type", "application/json"),
    ("content-type", "application/x-www-form-urlencoded"),
    ("content-type", "image/gif"),
    ("content-type", "image/jpeg"),
    ("content-type", "image/png"),
    ("content-type", "text/css"),
    ("content-type", "text/html; charset=utf-8"),
    ("content-type", "text/plain"),
    ("content-type", "text/plain;charset=utf-8"),
    ("range", "bytes=0-"),
    ("strict-transport-security", "max-age=31536000"),
    ("strict-transport-security", "max-age=31536000; includesubdomains"),
    ("strict-transport-security", "max-age=31536000; includesubdomains; preload"),
    ("vary", "accept-encoding"),
    ("vary", "origin"),
    ("x-content-type-options", "nosniff"),
    ("x-xss-protection", "1; mode=block"),
    (":status", "100"),
    (":status", "204"),
    (":status", "206"),
    (":status", "302"),
    (":status", "400"),
    (":status", "403"),
    (":status", "421"),
    (":status", "425"),
    (":status", "500"),
    ("accept-language", ""),
    ("access-control-allow-credentials", "FALSE"),
    ("access-control-allow-credentials", "TRUE"),
    ("access-control-allow-headers", "*"),
    ("access-control-allow-methods", "get"),
    ("access-control-allow-methods", "get, post, options"),
    ("access-control-allow-methods", "options"),
    ("access-control-expose-headers", "content-length"),
    ("access-control-request-headers", "content-type"),
    ("access-control-request-method", "get"),
    ("access-control-request-method", "post"),
    ("alt-svc", "clear"),
    ("authorization", ""),
    ("content-security-policy", "script-src 'none'; object-src 'none'; base-uri 'none'"),
    ("early-data", "1"),
    ("expect-ct", ""),
    ("forwarded", ""),
    ("if-range", ""),
    ("origin", ""),
    ("purpose", "prefetch"),
    ("server", ""),
    ("timing-allow-origin", "*"),
    ("upgrade-insecure-requests", "1"),
    ("user-agent", ""),
    ("x-forwarded-for", ""),
    ("x-frame-options", "deny"),
    ("x-frame-options", "sameorigin"),
];

fn static_field(index: usize) -> Option<HeaderField> {
    let (name, value) = STATIC_TABLE.get(index)?;
    Some(HeaderField {
        name: Bytes::from_static(name.as_bytes()),
        value: Bytes::from_static(value.as_bytes()),
    })
}

fn find_static(name: &[u8], value: &[u8]) -> (Option<usize>, Option<usize>) {
    let mut name_only = None;
    for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
        if n.as_bytes() == name {
            if v.as_bytes() == value {
                return (Some(i), name_only);
            }
            if name_only.is_none() {
                name_only = Some(i);
            }
        }
    }
    (None, name_only)
}

fn is_sensitive(name: &[u8]) -> bool {
    name == b"authorization" || name == b"proxy-authorization" || name == b"cookie"
}

fn encode_string(buf: &mut Vec<u8>, data: &[u8]) {
    let huf_len = huffman::encoded_len(data);
    if huf_len < data.len() {
        encode_prefix_int(buf, huf_len as u64, 7, 0x80);
        huffman::encode(data, buf);
    } else {
        encode_prefix_int(buf, data.len() as u64, 7, 0x00);
        buf.extend_from_slice(data);
    }
}

/// Encode a field section: Required Insert Count 0 + Delta Base 0 prefix,
/// then each field in its most compact static-table representation.
pub fn encode(headers: &[HeaderField], buf: &mut Vec<u8>) {
    encode_prefix_int(buf, 0, 8, 0x00);
    encode_prefix_int(buf, 0, 7, 0x00);

    for field in headers {
        let sensitive = is_sensitive(&field.name);
        let (full, name_only) = find_static(&field.name, &field.value);
        if let Some(index) = full {
            if sensitive {
                // Keep credentials out of indexed form: literal with name
                // reference, N=1 (0x20), T=1 static (0x10).
                encode_prefix_int(buf, index as u64, 4, 0x70);
                encode_string(buf, &field.value);
            } else {
                // Indexed field line, static: pattern 1 T=1, 6-bit index.
                encode_prefix_int(buf, index as u64, 6, 0xc0);
            }
        } else if let Some(index) = name_only {
            // Literal with static name reference: 01 N T=1, 4-bit index.
            let pattern = if sensitive { 0x70 } else { 0x50 };
            encode_prefix_int(buf, index as u64, 4, pattern);
            encode_string(buf, &field.value);
        } else {
            // Literal with literal name: 001 N H, 3-bit name length.
            let n_bit = if sensitive { 0x10 } else { 0x00 };
            let huf_len = huffman::encoded_len(&field.name);
            if huf_len < field.name.len() {
                encode_prefix_int(buf, huf_len as u64, 3, 0x28 | n_bit);
                huffman::encode(&field.name, buf);
            } else {
                encode_prefix_int(buf, field.name.len() as u64, 3, 0x20 | n_bit);
                buf.extend_from_slice(&field.name);
            }
            encode_string(buf, &field.value);
        }
    }
}

fn require<T>(opt: Option<T>) -> Result<T, CodecError> {
    opt.ok_or(CodecError::Truncated)
}

fn decode_string(buf: &[u8], prefix_bits: u8, huffman_bit: u8) -> Result<(Bytes, usize), CodecError> {
    if buf.is_empty() {
        return Err(CodecError::Truncated);
    }
    let huffman_coded = buf[0] & huffman_bit != 0;
    let (len, used) = require(decode_prefix_int(buf, prefix_bits)?)?;
    let len = len as usize;
    if buf.len() < used + len {
        return Err(CodecError::Truncated);
    }
    let raw = &buf[used..used + len];
    let data = if huffman_coded {
        Bytes::from(huffman::decode(raw)?)
    } else {
        Bytes::copy_from_slice(raw)
    };
    Ok((data, used + len))
}

/// Decode a field section, enforcing `max_field_section_size` cumulatively.
///
/// Dynamic-table references (Required Insert Count > 0, post-base forms,
/// T=0 indexes) are rejected: this decoder never told the peer it had
/// table capacity, so any such reference is a peer error.
pub fn decode(block: &[u8], max_field_section_size: usize) -> Result<Vec<HeaderField>, CodecError> {
    let (ric, used) = require(decode_prefix_int(block, 8)?)?;
    if ric != 0 {
        return Err(CodecError::InvalidIndex);
    }
    let mut buf = &block[used..];
    let (_delta_base, used) = require(decode_prefix_int(buf, 7)?)?;
    buf = &buf[used..];

    let mut fields = Vec::new();
    let mut charged = 0usize;

    while !buf.is_empty() {
        let first = buf[0];
        if first & 0x80 != 0 {
            // Indexed field line; T must be static.
            if first & 0x40 == 0 {
                return Err(CodecError::InvalidIndex);
            }
            let (index, used) = require(decode_prefix_int(buf, 6)?)?;
            buf = &buf[used..];
            let field = static_field(index as usize).ok_or(CodecError::InvalidIndex)?;
            charged += super::hpack::INDEXED_STATIC_CHARGE;
            if charged > max_field_section_size {
                return Err(CodecError::HeaderListTooLarge);
            }
            fields.push(field);
        } else if first & 0x40 != 0 {
            // Literal with name reference; T must be static.
            if first & 0x10 == 0 {
                return Err(CodecError::InvalidIndex);
            }
            let (index, used) = require(decode_prefix_int(buf, 4)?)?;
            buf = &buf[used..];
            let name = static_field(index as usize)
                .ok_or(CodecError::InvalidIndex)?
                .name;
            let (value, used) = decode_string(buf, 7, 0x80)?;
            buf = &buf[used..];
            let field = HeaderField { name, value };
            charged += field.budget_size();
            if charged > max_field_section_size {
                return Err(CodecError::HeaderListTooLarge);
            }
            fields.push(field);
        } else if first & 0x20 != 0 {
            // Literal with literal name; H bit for the name is bit 3.
            let (name, used) = decode_string(buf, 3, 0x08)?;
            buf = &buf[used..];
            let (value, used) = decode_string(buf, 7, 0x80)?;
            buf = &buf[used..];
            let field = HeaderField { name, value };
            charged += field.budget_size();
            if charged > max_field_section_size {
                return Err(CodecError::HeaderListTooLarge);
            }
            fields.push(field);
        } else {
            // Post-base forms require the dynamic table.
            return Err(CodecError::InvalidIndex);
        }
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &'static str, value: &'static str) -> HeaderField {
        HeaderField::new(name.as_bytes(), value.as_bytes())
    }

    const NO_LIMIT: usize = usize::MAX;

    #[test]
    fn static_table_has_99_entries() {
        assert_eq!(STATIC_TABLE.len(), 99);
        assert_eq!(STATIC_TABLE[17], (":method", "GET"));
    }

    #[test]
    fn indexed_round_trip() {
        let headers = vec![field(":method", "GET"), field(":path", "/")];
        let mut buf = Vec::new();
        encode(&headers, &mut buf);
        assert_eq!(decode(&buf, NO_LIMIT).unwrap(), headers);
    }

    #[test]
    fn name_reference_round_trip() {
        let headers = vec![field(":path", "/query?x=1"), field(":status", "200")];
        let mut buf = Vec::new();
        encode(&headers, &mut buf);
        assert_eq!(decode(&buf, NO_LIMIT).unwrap(), headers);
    }

    #[test]
    fn literal_name_round_trip() {
        let headers = vec![field("x-trace-id", "0af7651916cd43dd8448eb211c80319c")];
        let mut buf = Vec::new();
        encode(&headers, &mut buf);
        assert_eq!(decode(&buf, NO_LIMIT).unwrap(), headers);
    }

    #[test]
    fn sensitive_header_not_indexed() {
        let headers = vec![field("authorization", "Bearer token")];
        let mut buf = Vec::new();
        encode(&headers, &mut buf);
        // First field byte after the 2-byte section prefix must be the
        // literal-with-name-reference form with N set, never indexed.
        assert_eq!(buf[2] & 0xf0, 0x70);
        assert_eq!(decode(&buf, NO_LIMIT).unwrap(), headers);
    }

    #[test]
    fn dynamic_reference_rejected() {
        // RIC = 1 implies dynamic table state we never granted.
        let block = [0x01, 0x00, 0xc0];
        assert_eq!(
            decode(&block, NO_LIMIT).unwrap_err(),
            CodecError::InvalidIndex
        );
    }

    #[test]
    fn field_section_budget_enforced() {
        let big = "v".repeat(2048);
        let headers = vec![HeaderField::new(&b"x-big"[..], big.into_bytes())];
        let mut buf = Vec::new();
        encode(&headers, &mut buf);
        assert_eq!(
            decode(&buf, 256).unwrap_err(),
            CodecError::HeaderListTooLarge
        );
    }

    #[test]
    fn truncated_block_rejected() {
        let headers = vec![field("x-custom", "abcdef")];
        let mut buf = Vec::new();
        encode(&headers, &mut buf);
        assert_eq!(
            decode(&buf[..buf.len() - 2], NO_LIMIT).unwrap_err(),
            CodecError::Truncated
        );
    }
}
