//! HPACK header compression (RFC 7541).
//!
//! Encoder and decoder over the 61-entry static table, a size-managed
//! dynamic table, Huffman string literals, and the shared prefix-integer
//! codec. The static table is pre-mapped to `'static` descriptors so a
//! fully-indexed field decodes without copying and charges only a fixed
//! amount against the header-list budget instead of its name+value bytes.

use std::collections::VecDeque;

use bytes::Bytes;

use super::{decode_prefix_int, encode_prefix_int, huffman, CodecError, HeaderField};

/// Budget charge for a fully-indexed static entry: the per-entry overhead
/// only, since no name/value bytes crossed the wire.
pub const INDEXED_STATIC_CHARGE: usize = 32;

/// HPACK static table (RFC 7541 Appendix A), 1-based on the wire.
static STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Resolve a 1-based static index to a borrowed descriptor.
fn static_entry(index: usize) -> Option<HeaderField> {
    let (name, value) = STATIC_TABLE.get(index.checked_sub(1)?)?;
    Some(HeaderField {
        name: Bytes::from_static(name.as_bytes()),
        value: Bytes::from_static(value.as_bytes()),
    })
}

enum StaticMatch {
    Full(usize),
    NameOnly(usize),
    Miss,
}

fn static_lookup(name: &[u8], value: &[u8]) -> StaticMatch {
    let mut name_only = None;
    for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
        if n.as_bytes() == name {
            if v.as_bytes() == value {
                return StaticMatch::Full(i + 1);
            }
            if name_only.is_none() {
                name_only = Some(i + 1);
            }
        }
    }
    match name_only {
        Some(i) => StaticMatch::NameOnly(i),
        None => StaticMatch::Miss,
    }
}

/// Header names that must never enter a compression table.
fn is_sensitive(name: &[u8]) -> bool {
    name == b"authorization" || name == b"proxy-authorization" || name == b"cookie"
}

/// Size-managed dynamic table shared by encoder and decoder directions.
pub struct DynamicTable {
    entries: VecDeque<HeaderField>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    /// 0-based lookup, newest entry first (RFC 7541 Section 2.3.2).
    fn get(&self, index: usize) -> Option<&HeaderField> {
        self.entries.get(index)
    }

    fn insert(&mut self, field: HeaderField) {
        let entry_size = field.budget_size();
        if entry_size > self.max_size {
            // An oversized entry empties the table.
            self.entries.clear();
            self.size = 0;
            return;
        }
        while self.size + entry_size > self.max_size {
            if let Some(evicted) = self.entries.pop_back() {
                self.size -= evicted.budget_size();
            }
        }
        self.size += entry_size;
        self.entries.push_front(field);
    }

    fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        while self.size > self.max_size {
            if let Some(evicted) = self.entries.pop_back() {
                self.size -= evicted.budget_size();
            }
        }
    }

    fn find(&self, name: &[u8], value: &[u8]) -> Option<(usize, bool)> {
        let mut name_only = None;
        for (i, f) in self.entries.iter().enumerate() {
            if f.name == name {
                if f.value == value {
                    return Some((i, true));
                }
                if name_only.is_none() {
                    name_only = Some(i);
                }
            }
        }
        name_only.map(|i| (i, false))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// HPACK encoder (request direction).
pub struct Encoder {
    table: DynamicTable,
}

impl Encoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
        }
    }

    /// Encode a header list into `buf`.
    pub fn encode(&mut self, headers: &[HeaderField], buf: &mut Vec<u8>) {
        for field in headers {
            self.encode_field(field, buf);
        }
    }

    fn encode_field(&mut self, field: &HeaderField, buf: &mut Vec<u8>) {
        if is_sensitive(&field.name) {
            // Literal, never indexed (pattern 0001, 4-bit prefix).
            match static_lookup(&field.name, &field.value) {
                StaticMatch::Full(i) | StaticMatch::NameOnly(i) => {
                    encode_prefix_int(buf, i as u64, 4, 0x10);
                }
                StaticMatch::Miss => {
                    encode_prefix_int(buf, 0, 4, 0x10);
                    encode_string(&field.name, buf);
                }
            }
            encode_string(&field.value, buf);
            return;
        }

        match static_lookup(&field.name, &field.value) {
            StaticMatch::Full(i) => {
                // Indexed (pattern 1, 7-bit prefix).
                encode_prefix_int(buf, i as u64, 7, 0x80);
                return;
            }
            StaticMatch::NameOnly(i) => {
                // Literal with incremental indexing, static name ref.
                encode_prefix_int(buf, i as u64, 6, 0x40);
                encode_string(&field.value, buf);
                self.table.insert(field.clone());
                return;
            }
            StaticMatch::Miss => {}
        }

        if let Some((dyn_index, full)) = self.table.find(&field.name, &field.value) {
            let wire_index = (STATIC_TABLE.len() + 1 + dyn_index) as u64;
            if full {
                encode_prefix_int(buf, wire_index, 7, 0x80);
                return;
            }
            encode_prefix_int(buf, wire_index, 6, 0x40);
            encode_string(&field.value, buf);
            self.table.insert(field.clone());
            return;
        }

        // Literal with incremental indexing, literal name.
        encode_prefix_int(buf, 0, 6, 0x40);
        encode_string(&field.name, buf);
        encode_string(&field.value, buf);
        self.table.insert(field.clone());
    }

    /// Emit a dynamic table size update and shrink the local table.
    pub fn set_max_table_size(&mut self, new_size: usize, buf: &mut Vec<u8>) {
        encode_prefix_int(buf, new_size as u64, 5, 0x20);
        self.table.set_max_size(new_size);
    }
}

/// Emit a string literal, Huffman-coded when that is shorter.
fn encode_string(data: &[u8], buf: &mut Vec<u8>) {
    let huff_len = huffman::encoded_len(data);
    if huff_len < data.len() {
        encode_prefix_int(buf, huff_len as u64, 7, 0x80);
        huffman::encode(data, buf);
    } else {
        encode_prefix_int(buf, data.len() as u64, 7, 0x00);
        buf.extend_from_slice(data);
    }
}

/// Outcome of decoding one header block.
#[derive(Debug)]
pub struct DecodedBlock {
    pub fields: Vec<HeaderField>,
    /// Budget consumed, with the static fast-path discount applied.
    pub charged_size: usize,
}

/// HPACK decoder (response direction).
pub struct Decoder {
    table: DynamicTable,
    /// Ceiling the peer may raise the dynamic table to.
    protocol_max_table_size: usize,
}

impl Decoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
            protocol_max_table_size: max_table_size,
        }
    }

    pub fn set_max_table_size(&mut self, max_size: usize) {
        self.protocol_max_table_size = max_size;
        self.table.set_max_size(max_size.min(self.table.max_size));
    }

    /// Decode a complete header block, enforcing `max_header_list_size`
    /// as a cumulative budget. Fully-indexed static references charge
    /// [`INDEXED_STATIC_CHARGE`] instead of their name+value bytes.
    pub fn decode(
        &mut self,
        block: &[u8],
        max_header_list_size: usize,
    ) -> Result<DecodedBlock, CodecError> {
        let mut fields = Vec::new();
        let mut charged = 0usize;
        let mut buf = block;

        while !buf.is_empty() {
            let first = buf[0];
            if first & 0x80 != 0 {
                // Indexed header field.
                let (index, used) = require(decode_prefix_int(buf, 7)?)?;
                buf = &buf[used..];
                if index == 0 {
                    return Err(CodecError::InvalidIndex);
                }
                let index = index as usize;
                if index <= STATIC_TABLE.len() {
                    // Static fast path: pre-mapped descriptor, fixed charge.
                    let field = static_entry(index).ok_or(CodecError::InvalidIndex)?;
                    charged += INDEXED_STATIC_CHARGE;
                    check_budget(charged, max_header_list_size)?;
                    fields.push(field);
                } else {
                    let dyn_index = index - STATIC_TABLE.len() - 1;
                    let field = self
                        .table
                        .get(dyn_index)
                        .ok_or(CodecError::InvalidIndex)?
                        .clone();
                    charged += field.budget_size();
                    check_budget(charged, max_header_list_size)?;
                    fields.push(field);
                }
            } else if first & 0x40 != 0 {
                // Literal with incremental indexing.
                let (field, used) = self.decode_literal(buf, 6)?;
                buf = &buf[used..];
                charged += field.budget_size();
                check_budget(charged, max_header_list_size)?;
                self.table.insert(field.clone());
                fields.push(field);
            } else if first & 0x20 != 0 {
                // Dynamic table size update.
                let (size, used) = require(decode_prefix_int(buf, 5)?)?;
                buf = &buf[used..];
                if size as usize > self.protocol_max_table_size {
                    return Err(CodecError::InvalidIndex);
                }
                self.table.set_max_size(size as usize);
            } else {
                // Literal without indexing (0000) or never indexed (0001).
                let (field, used) = self.decode_literal(buf, 4)?;
                buf = &buf[used..];
                charged += field.budget_size();
                check_budget(charged, max_header_list_size)?;
                fields.push(field);
            }
        }

        Ok(DecodedBlock {
            fields,
            charged_size: charged,
        })
    }

    fn decode_literal(
        &self,
        buf: &[u8],
        prefix_bits: u8,
    ) -> Result<(HeaderField, usize), CodecError> {
        let (name_index, mut used) = require(decode_prefix_int(buf, prefix_bits)?)?;
        let name = if name_index == 0 {
            let (name, n) = decode_string(&buf[used..])?;
            used += n;
            name
        } else {
            let index = name_index as usize;
            if index <= STATIC_TABLE.len() {
                static_entry(index).ok_or(CodecError::InvalidIndex)?.name
            } else {
                self.table
                    .get(index - STATIC_TABLE.len() - 1)
                    .ok_or(CodecError::InvalidIndex)?
                    .name
                    .clone()
            }
        };
        let (value, n) = decode_string(&buf[used..])?;
        used += n;
        Ok((HeaderField { name, value }, used))
    }
}

fn require<T>(opt: Option<T>) -> Result<T, CodecError> {
    opt.ok_or(CodecError::Truncated)
}

fn check_budget(charged: usize, budget: usize) -> Result<(), CodecError> {
    if charged > budget {
        return Err(CodecError::HeaderListTooLarge);
    }
    Ok(())
}

fn decode_string(buf: &[u8]) -> Result<(Bytes, usize), CodecError> {
    if buf.is_empty() {
        return Err(CodecError::Truncated);
    }
    let huffman_coded = buf[0] & 0x80 != 0;
    let (len, used) = require(decode_prefix_int(buf, 7)?)?;
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

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &'static str, value: &'static str) -> HeaderField {
        HeaderField::new(name.as_bytes(), value.as_bytes())
    }

    #[test]
    fn static_table_has_61_entries() {
        assert_eq!(STATIC_TABLE.len(), 61);
        assert_eq!(static_entry(2).unwrap().value, &b"GET"[..]);
        assert_eq!(static_entry(61).unwrap().name, &b"www-authenticate"[..]);
        assert!(static_entry(0).is_none());
        assert!(static_entry(62).is_none());
    }

    #[test]
    fn fully_indexed_round_trip() {
        let mut enc = Encoder::new(4096);
        let mut dec = Decoder::new(4096);
        let headers = vec![field(":method", "GET"), field(":path", "/")];
        let mut block = Vec::new();
        enc.encode(&headers, &mut block);
        // Both are full static matches: one byte each.
        assert_eq!(block.len(), 2);
        let out = dec.decode(&block, 16 * 1024).unwrap();
        assert_eq!(out.fields, headers);
        assert_eq!(out.charged_size, 2 * INDEXED_STATIC_CHARGE);
    }

    #[test]
    fn literal_round_trip_and_dynamic_reuse() {
        let mut enc = Encoder::new(4096);
        let mut dec = Decoder::new(4096);
        let headers = vec![field("x-custom", "first-value")];

        let mut block1 = Vec::new();
        enc.encode(&headers, &mut block1);
        let out1 = dec.decode(&block1, 16 * 1024).unwrap();
        assert_eq!(out1.fields, headers);

        // Second occurrence should be a short indexed reference.
        let mut block2 = Vec::new();
        enc.encode(&headers, &mut block2);
        assert!(block2.len() < block1.len());
        let out2 = dec.decode(&block2, 16 * 1024).unwrap();
        assert_eq!(out2.fields, headers);
    }

    #[test]
    fn sensitive_headers_never_indexed() {
        let mut enc = Encoder::new(4096);
        let headers = vec![field("authorization", "Basic dXNlcjpwYXNz")];
        let mut block = Vec::new();
        enc.encode(&headers, &mut block);
        // Pattern 0001 with the static name index for authorization (23).
        assert_eq!(block[0], 0x10 | 23);
        assert_eq!(enc.table.len(), 0);

        let mut dec = Decoder::new(4096);
        let out = dec.decode(&block, 16 * 1024).unwrap();
        assert_eq!(out.fields, headers);
        assert!(dec.table.is_empty());
    }

    #[test]
    fn header_list_budget_enforced() {
        let mut enc = Encoder::new(4096);
        let big = "v".repeat(4000);
        let headers = vec![HeaderField::new(&b"x-big"[..], big.into_bytes())];
        let mut block = Vec::new();
        enc.encode(&headers, &mut block);

        let mut dec = Decoder::new(4096);
        assert_eq!(
            dec.decode(&block, 1024).unwrap_err(),
            CodecError::HeaderListTooLarge
        );
    }

    #[test]
    fn indexed_static_charge_is_discounted() {
        // accept-encoding: gzip, deflate is static index 16; the literal
        // bytes would charge 14 + 13 + 32 = 59, the indexed form only 32.
        let mut enc = Encoder::new(4096);
        let headers = vec![field("accept-encoding", "gzip, deflate")];
        let mut block = Vec::new();
        enc.encode(&headers, &mut block);
        let mut dec = Decoder::new(4096);
        let out = dec.decode(&block, 16 * 1024).unwrap();
        assert_eq!(out.charged_size, INDEXED_STATIC_CHARGE);
    }

    #[test]
    fn zero_index_rejected() {
        let mut dec = Decoder::new(4096);
        assert_eq!(
            dec.decode(&[0x80], 1024).unwrap_err(),
            CodecError::InvalidIndex
        );
    }

    #[test]
    fn table_size_update_over_protocol_max_rejected() {
        let mut dec = Decoder::new(4096);
        // 0x20 pattern with a size far above the protocol max.
        let mut block = Vec::new();
        encode_prefix_int(&mut block, 1 << 20, 5, 0x20);
        assert_eq!(
            dec.decode(&block, 1024).unwrap_err(),
            CodecError::InvalidIndex
        );
    }

    #[test]
    fn eviction_keeps_size_bounded() {
        let mut table = DynamicTable::new(100);
        table.insert(field("aaaa", "bbbb")); // 40
        table.insert(field("cccc", "dddd")); // 40
        assert_eq!(table.len(), 2);
        table.insert(field("eeee", "ffff")); // 40, evicts oldest
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0).unwrap().name, &b"eeee"[..]);
    }
}
