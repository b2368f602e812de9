//! Huffman coding for HPACK string literals (RFC 7541 Appendix B).
//!
//! The code table is the fixed one from the RFC: 256 byte symbols plus EOS,
//! code lengths 5..30 bits. Decoding is canonical-by-length: entries are
//! indexed once, sorted by (length, code), then each symbol is resolved
//! with a binary search over the codes of the current bit length.

use std::sync::OnceLock;

use super::CodecError;

/// (code, bit length) per symbol; index 0..=255 are byte values, 256 is EOS.
static CODES: [(u32, u8); 257] = [
    (0x1ff8, 13),
    (0x7fffd8, 23),
    (0xfffffe2, 28),
    (0xfffffe3, 28),
    (0xfffffe4, 28),
    (0xfffffe5, 28),
    (0xfffffe6, 28),
    (0xfffffe7, 28),
    (0xfffffe8, 28),
    (0xffffea, 24),
    (0x3ffffffc, 30),
    (0xfffffe9, 28),
    (0xfffffea, 28),
    (0x3ffffffd, 30),
    (0xfffffeb, 28),
    (0xfffffec, 28),
    (0xfffffed, 28),
    (0xfffffee, 28),
    (0xfffffef, 28),
    (0xffffff0, 28),
    (0xffffff1, 28),
    (0xffffff2, 28),
    (0x3ffffffe, 30),
    (0xffffff3, 28),
    (0xffffff4, 28),
    (0xffffff5, 28),
    (0xffffff6, 28),
    (0xffffff7, 28),
    (0xffffff8, 28),
    (0xffffff9, 28),
    (0xffffffa, 28),
    (0xffffffb, 28),
    (0x14, 6),
    (0x3f8, 10),
    (0x3f9, 10),
    (0xffa, 12),
    (0x1ff9, 13),
    (0x15, 6),
    (0xf8, 8),
    (0x7fa, 11),
    (0x3fa, 10),
    (0x3fb, 10),
    (0xf9, 8),
    (0x7fb, 11),
    (0xfa, 8),
    (0x16, 6),
    (0x17, 6),
    (0x18, 6),
    (0x0, 5),
    (0x1, 5),
    (0x2, 5),
    (0x19, 6),
    (0x1a, 6),
    (0x1b, 6),
    (0x1c, 6),
    (0x1d, 6),
    (0x1e, 6),
    (0x1f, 6),
    (0x5c, 7),
    (0xfb, 8),
    (0x7ffc, 15),
    (0x20, 6),
    (0xffb, 12),
    (0x3fc, 10),
    (0x1ffa, 13),
    (0x21, 6),
    (0x5d, 7),
    (0x5e, 7),
    (0x5f, 7),
    (0x60, 7),
    (0x61, 7),
    (0x62, 7),
    (0x63, 7),
    (0x64, 7),
    (0x65, 7),
    (0x66, 7),
    (0x67, 7),
    (0x68, 7),
    (0x69, 7),
    (0x6a, 7),
    (0x6b, 7),
    (0x6c, 7),
    (0x6d, 7),
    (0x6e, 7),
    (0x6f, 7),
    (0x70, 7),
    (0x71, 7),
    (0x72, 7),
    (0xfc, 8),
    (0x73, 7),
    (0xfd, 8),
    (0x1ffb, 13),
    (0x7fff0, 19),
    (0x1ffc, 13),
    (0x3ffc, 14),
    (0x22, 6),
    (0x7ffd, 15),
    (0x3, 5),
    (0x23, 6),
    (0x4, 5),
    (0x24, 6),
    (0x5, 5),
    (0x25, 6),
    (0x26, 6),
    (0x27, 6),
    (0x6, 5),
    (0x74, 7),
    (0x75, 7),
    (0x28, 6),
    (0x29, 6),
    (0x2a, 6),
    (0x7, 5),
    (0x2b, 6),
    (0x76, 7),
    (0x2c, 6),
    (0x8, 5),
    (0x9, 5),
    (0x2d, 6),
    (0x77, 7),
    (0x78, 7),
    (0x79, 7),
    (0x7a, 7),
    (0x7b, 7),
    (0x7ffe, 15),
    (0x7fc, 11),
    (0x3ffd, 14),
    (0x1ffd, 13),
    (0xffffffc, 28),
    (0xfffe6, 20),
    (0x3fffd2, 22),
    (0xfffe7, 20),
    (0xfffe8, 20),
    (0x3fffd3, 22),
    (0x3fffd4, 22),
    (0x3fffd5, 22),
    (0x7fffd9, 23),
    (0x3fffd6, 22),
    (0x7fffda, 23),
    (0x7fffdb, 23),
    (0x7fffdc, 23),
    (0x7fffdd, 23),
    (0x7fffde, 23),
    (0xffffeb, 24),
    (0x7fffdf, 23),
    (0xffffec, 24),
    (0xffffed, 24),
    (0x3fffd7, 22),
    (0x7fffe0, 23),
    (0xffffee, 24),
    (0x7fffe1, 23),
    (0x7fffe2, 23),
    (0x7fffe3, 23),
    (0x7fffe4, 23),
    (0x1fffdc, 21),
    (0x3fffd8, 22),
    (0x7fffe5, 23),
    (0x3fffd9, 22),
    (0x7fffe6, 23),
    (0x7fffe7, 23),
    (0xffffef, 24),
    (0x3fffda, 22),
    (0x1fffdd, 21),
    (0xfffe9, 20),
    (0x3fffdb, 22),
    (0x3fffdc, 22),
    (0x7fffe8, 23),
    (0x7fffe9, 23),
    (0x1fffde, 21),
    (0x7fffea, 23),
    (0x3fffdd, 22),
    (0x3fffde, 22),
    (0xfffff0, 24),
    (0x1fffdf, 21),
    (0x3fffdf, 22),
    (0x7fffeb, 23),
    (0x7fffec, 23),
    (0x1fffe0, 21),
    (0x1fffe1, 21),
    (0x3fffe0, 22),
    (0x1fffe2, 21),
    (0x7fffed, 23),
    (0x3fffe1, 22),
    (0x7fffee, 23),
    (0x7fffef, 23),
    (0xfffea, 20),
    (0x3fffe2, 22),
    (0x3fffe3, 22),
    (0x3fffe4, 22),
    (0x7ffff0, 23),
    (0x3fffe5, 22),
    (0x3fffe6, 22),
    (0x7ffff1, 23),
    (0x3ffffe0, 26),
    (0x3ffffe1, 26),
    (0xfffeb, 20),
    (0x7fff1, 19),
    (0x3fffe7, 22),
    (0x7ffff2, 23),
    (0x3fffe8, 22),
    (0x1ffffec, 25),
    (0x3ffffe2, 26),
    (0x3ffffe3, 26),
    (0x3ffffe4, 26),
    (0x7ffffde, 27),
    (0x7ffffdf, 27),
    (0x3ffffe5, 26),
    (0xfffff1, 24),
    (0x1ffffed, 25),
    (0x7fff2, 19),
    (0x1fffe3, 21),
    (0x3ffffe6, 26),
    (0x7ffffe0, 27),
    (0x7ffffe1, 27),
    (0x3ffffe7, 26),
    (0x7ffffe2, 27),
    (0xfffff2, 24),
    (0x1fffe4, 21),
    (0x1fffe5, 21),
    (0x3ffffe8, 26),
    (0x3ffffe9, 26),
    (0xffffffd, 28),
    (0x7ffffe3, 27),
    (0x7ffffe4, 27),
    (0x7ffffe5, 27),
    (0xfffec, 20),
    (0xfffff3, 24),
    (0xfffed, 20),
    (0x1fffe6, 21),
    (0x3fffe9, 22),
    (0x1fffe7, 21),
    (0x1fffe8, 21),
    (0x7ffff3, 23),
    (0x3fffea, 22),
    (0x3fffeb, 22),
    (0x1ffffee, 25),
    (0x1ffffef, 25),
    (0xfffff4, 24),
    (0xfffff5, 24),
    (0x3ffffea, 26),
    (0x7ffff4, 23),
    (0x3ffffeb, 26),
    (0x7ffffe6, 27),
    (0x3ffffec, 26),
    (0x3ffffed, 26),
    (0x7ffffe7, 27),
    (0x7ffffe8, 27),
    (0x7ffffe9, 27),
    (0x7ffffea, 27),
    (0x7ffffeb, 27),
    (0xffffffe, 28),
    (0x7ffffec, 27),
    (0x7ffffed, 27),
    (0x7ffffee, 27),
    (0x7ffffef, 27),
    (0x7fffff0, 27),
    (0x3ffffee, 26),
    (0x3fffffff, 30),
];

struct DecodeIndex {
    /// (bits, code, symbol), sorted by (bits, code).
    sorted: Vec<(u8, u32, u16)>,
    /// Half-open range into `sorted` per bit length.
    by_len: [(usize, usize); 31],
}

fn decode_index() -> &'static DecodeIndex {
    static INDEX: OnceLock<DecodeIndex> = OnceLock::new();
    INDEX.get_or_init(|| {
        let mut sorted: Vec<(u8, u32, u16)> = CODES
            .iter()
            .enumerate()
            .map(|(sym, &(code, bits))| (bits, code, sym as u16))
            .collect();
        sorted.sort_unstable();
        let mut by_len = [(0usize, 0usize); 31];
        let mut start = 0;
        while start < sorted.len() {
            let bits = sorted[start].0 as usize;
            let end = sorted[start..]
                .iter()
                .position(|e| e.0 as usize != bits)
                .map(|p| start + p)
                .unwrap_or(sorted.len());
            by_len[bits] = (start, end);
            start = end;
        }
        DecodeIndex { sorted, by_len }
    })
}

/// Decode a Huffman-encoded string literal.
///
/// Trailing padding must be the most-significant bits of EOS: all ones,
/// strictly shorter than one byte. Anything else is a compression error,
/// as is an explicit EOS code in the data.
pub(crate) fn decode(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let index = decode_index();
    let mut out = Vec::with_capacity(input.len() * 2);
    let mut code = 0u32;
    let mut bits = 0u8;

    for &byte in input {
        for shift in (0..8).rev() {
            code = (code << 1) | u32::from((byte >> shift) & 1);
            bits += 1;
            let (start, end) = index.by_len[usize::from(bits)];
            if start < end {
                if let Ok(pos) =
                    index.sorted[start..end].binary_search_by_key(&code, |e| e.1)
                {
                    let sym = index.sorted[start + pos].2;
                    if sym == 256 {
                        return Err(CodecError::Compression);
                    }
                    out.push(sym as u8);
                    code = 0;
                    bits = 0;
                }
            }
            if bits == 30 {
                // Longest code is 30 bits; no match by now means garbage.
                return Err(CodecError::Compression);
            }
        }
    }

    if bits >= 8 || (bits > 0 && code != (1u32 << bits) - 1) {
        return Err(CodecError::Compression);
    }
    Ok(out)
}

/// Length in bytes of `input` once Huffman encoded.
pub(crate) fn encoded_len(input: &[u8]) -> usize {
    let total_bits: usize = input
        .iter()
        .map(|&b| usize::from(CODES[usize::from(b)].1))
        .sum();
    total_bits.div_ceil(8)
}

/// Huffman-encode `input`, padding the final byte with EOS prefix bits.
pub(crate) fn encode(input: &[u8], out: &mut Vec<u8>) {
    let mut acc = 0u64;
    let mut acc_bits = 0u8;
    for &b in input {
        let (code, bits) = CODES[usize::from(b)];
        acc = (acc << bits) | u64::from(code);
        acc_bits += bits;
        while acc_bits >= 8 {
            acc_bits -= 8;
            out.push((acc >> acc_bits) as u8);
        }
    }
    if acc_bits > 0 {
        // Pad with the high bits of EOS (all ones).
        let pad = 8 - acc_bits;
        out.push(((acc << pad) as u8) | ((1u8 << pad) - 1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_ascii() {
        let samples: &[&[u8]] = &[
            b"www.example.com",
            b"no-cache",
            b"custom-key",
            b"custom-value",
            b"",
            b"a",
        ];
        for s in samples {
            let mut enc = Vec::new();
            encode(s, &mut enc);
            assert_eq!(enc.len(), encoded_len(s));
            assert_eq!(decode(&enc).unwrap(), *s, "sample {s:?}");
        }
    }

    #[test]
    fn rfc_vector_www_example_com() {
        // RFC 7541 C.4.1.
        let encoded = [
            0xf1u8, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff,
        ];
        assert_eq!(decode(&encoded).unwrap(), b"www.example.com");
        let mut out = Vec::new();
        encode(b"www.example.com", &mut out);
        assert_eq!(out, encoded);
    }

    #[test]
    fn bad_padding_rejected() {
        // 'a' is 00011 (5 bits); pad with zeros instead of ones.
        assert!(decode(&[0b0001_1000]).is_err());
    }

    #[test]
    fn round_trip_all_bytes() {
        let all: Vec<u8> = (0u8..=255).collect();
        let mut enc = Vec::new();
        encode(&all, &mut enc);
        assert_eq!(decode(&enc).unwrap(), all);
    }
}
