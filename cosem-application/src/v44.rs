//! V.44 dictionary compression
//!
//! Bitstream grammar (LSB-first within bytes):
//! - `1` + c2-bit codeword field: values 0..=3 are control codes (1 = flush,
//!   2 = stepup), values >= 4 index the dictionary
//! - `0` directly after a codeword event: one flag bit, `1` = string
//!   extension length follows, `0` = literal ordinal (c5 bits)
//! - `0` elsewhere: literal ordinal (c5 bits)
//!
//! c2 starts at 6 and a stepup before a codeword widens it by one bit; c5
//! starts at 7 and a stepup before an ordinal widens it to 8. Extension
//! lengths use the group coding {1}, {2..4}, {5..12}, {13..255}.
//!
//! The dictionary holds up to 1525 codewords of strings up to 255 bytes.
//! Both sides apply the same update per event: the previous event's string
//! extended by one character, plus the extended string after a string
//! extension. Entries may reference a string whose continuation had not yet
//! been produced when the entry was created (the repeated-codeword case);
//! byte-sequential copying resolves them.

use cosem_core::error::{DlmsError, DlmsResult};
use std::collections::HashMap;

/// Total codeword space including the four control codes
const MAX_CODEWORDS: usize = 1525;
const FIRST_CODE: usize = 4;
const CONTROL_FLUSH: u32 = 1;
const CONTROL_STEPUP: u32 = 2;
/// Longest dictionary string
const MAX_STRING: usize = 255;
const INITIAL_C2: u32 = 6;
const INITIAL_C5: u32 = 7;
/// Codes run out before c2 can legitimately pass this width
const MAX_C2: u32 = 11;

struct BitWriter {
    bytes: Vec<u8>,
    current: u8,
    filled: u32,
}

impl BitWriter {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            current: 0,
            filled: 0,
        }
    }

    fn write_bit(&mut self, bit: u32) {
        if bit & 1 != 0 {
            self.current |= 1 << self.filled;
        }
        self.filled += 1;
        if self.filled == 8 {
            self.bytes.push(self.current);
            self.current = 0;
            self.filled = 0;
        }
    }

    /// Write `n` bits of `value`, least significant first
    fn write_bits(&mut self, value: u32, n: u32) {
        for i in 0..n {
            self.write_bit((value >> i) & 1);
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.filled > 0 {
            self.bytes.push(self.current);
        }
        self.bytes
    }
}

struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    fn read_bit(&mut self) -> Option<u32> {
        let byte = *self.data.get(self.bit_pos / 8)?;
        let bit = (byte >> (self.bit_pos % 8)) & 1;
        self.bit_pos += 1;
        Some(bit as u32)
    }

    fn read_bits(&mut self, n: u32) -> Option<u32> {
        let mut value = 0u32;
        for i in 0..n {
            value |= self.read_bit()? << i;
        }
        Some(value)
    }

    fn align(&mut self) {
        self.bit_pos = self.bit_pos.div_ceil(8) * 8;
    }

    fn remaining_bits(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.bit_pos)
    }
}

/// Dictionary entry: a span of the shared history
#[derive(Debug, Clone, Copy)]
struct Entry {
    pos: usize,
    len: usize,
}

struct Dictionary {
    entries: Vec<Entry>,
    /// First two bytes of each entry string, for encoder lookup
    index: HashMap<[u8; 2], Vec<u16>>,
}

impl Dictionary {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn next_code(&self) -> usize {
        FIRST_CODE + self.entries.len()
    }

    fn is_full(&self) -> bool {
        self.next_code() >= MAX_CODEWORDS
    }

    /// Record a new string; skipped silently once the dictionary is full
    fn add(&mut self, history: &[u8], pos: usize, len: usize) {
        if self.is_full() || len < 2 || len > MAX_STRING {
            return;
        }
        let id = self.entries.len() as u16;
        self.entries.push(Entry { pos, len });
        if pos + 1 < history.len() {
            self.index
                .entry([history[pos], history[pos + 1]])
                .or_default()
                .push(id);
        }
    }

    fn get(&self, code: usize) -> Option<Entry> {
        self.entries.get(code.checked_sub(FIRST_CODE)?).copied()
    }

    /// Longest entry fully matching the input at `pos`
    fn longest_match(&self, input: &[u8], pos: usize) -> Option<(usize, Entry)> {
        if pos + 1 >= input.len() {
            return None;
        }
        let candidates = self.index.get(&[input[pos], input[pos + 1]])?;
        let mut best: Option<(usize, Entry)> = None;
        for &id in candidates {
            let entry = self.entries[id as usize];
            if entry.len > input.len() - pos {
                continue;
            }
            if best.map(|(_, b)| entry.len <= b.len).unwrap_or(false) {
                continue;
            }
            // Entries may overlap the match position; compare byte-wise.
            let matches = (0..entry.len).all(|i| input[entry.pos + i] == input[pos + i]);
            if matches {
                best = Some((FIRST_CODE + id as usize, entry));
            }
        }
        best
    }
}

fn write_extension_length(w: &mut BitWriter, len: usize) {
    match len {
        1 => w.write_bit(0),
        2..=4 => {
            w.write_bit(1);
            w.write_bit(0);
            w.write_bits((len - 2) as u32, 2);
        }
        5..=12 => {
            w.write_bit(1);
            w.write_bit(1);
            w.write_bit(0);
            w.write_bits((len - 5) as u32, 3);
        }
        _ => {
            w.write_bit(1);
            w.write_bit(1);
            w.write_bit(1);
            w.write_bits(len as u32, 8);
        }
    }
}

fn read_extension_length(r: &mut BitReader<'_>) -> DlmsResult<usize> {
    let corrupt = || DlmsError::Decoding("truncated string extension".to_string());
    if r.read_bit().ok_or_else(corrupt)? == 0 {
        return Ok(1);
    }
    if r.read_bit().ok_or_else(corrupt)? == 0 {
        return Ok(r.read_bits(2).ok_or_else(corrupt)? as usize + 2);
    }
    if r.read_bit().ok_or_else(corrupt)? == 0 {
        return Ok(r.read_bits(3).ok_or_else(corrupt)? as usize + 5);
    }
    let len = r.read_bits(8).ok_or_else(corrupt)? as usize;
    if len < 13 {
        return Err(DlmsError::Decoding(format!(
            "invalid string extension length {}",
            len
        )));
    }
    Ok(len)
}

/// Compress a byte sequence into a V.44 bitstream
pub fn compress(input: &[u8]) -> Vec<u8> {
    let mut dict = Dictionary::new();
    let mut w = BitWriter::new();
    let mut c2 = INITIAL_C2;
    let mut c2n = 1u32 << INITIAL_C2;
    let mut c5 = INITIAL_C5;
    let mut prev: Option<(usize, usize)> = None;
    let mut after_codeword = false;
    let mut pos = 0usize;

    while pos < input.len() {
        if let Some((code, entry)) = dict.longest_match(input, pos) {
            // String extension: continue comparing past the entry against
            // the history that followed its occurrence.
            let mut ext = 0usize;
            while entry.len + ext < MAX_STRING
                && pos + entry.len + ext < input.len()
                && input[entry.pos + entry.len + ext] == input[pos + entry.len + ext]
            {
                ext += 1;
            }

            while code as u32 >= c2n {
                w.write_bit(1);
                w.write_bits(CONTROL_STEPUP, c2);
                c2 += 1;
                c2n <<= 1;
            }
            w.write_bit(1);
            w.write_bits(code as u32, c2);
            if ext > 0 {
                w.write_bit(0);
                w.write_bit(1);
                write_extension_length(&mut w, ext);
            }

            if let Some((ppos, plen)) = prev {
                dict.add(input, ppos, plen + 1);
            }
            if ext > 0 {
                dict.add(input, entry.pos, entry.len + ext);
            }
            prev = Some((pos, entry.len + ext));
            pos += entry.len + ext;
            after_codeword = ext == 0;
        } else {
            let byte = input[pos];
            if (byte as u32) >= (1 << c5) {
                w.write_bit(1);
                w.write_bits(CONTROL_STEPUP, c2);
                c5 = 8;
            }
            w.write_bit(0);
            if after_codeword {
                // Distinguish the literal from a string extension.
                w.write_bit(0);
            }
            w.write_bits(byte as u32, c5);

            if let Some((ppos, plen)) = prev {
                dict.add(input, ppos, plen + 1);
            }
            prev = Some((pos, 1));
            pos += 1;
            after_codeword = false;
        }
    }

    w.write_bit(1);
    w.write_bits(CONTROL_FLUSH, c2);
    w.finish()
}

/// Decompress a V.44 bitstream
pub fn decompress(data: &[u8]) -> DlmsResult<Vec<u8>> {
    let mut dict = Dictionary::new();
    let mut r = BitReader::new(data);
    let mut out: Vec<u8> = Vec::new();
    let mut c2 = INITIAL_C2;
    let mut c2n = 1u32 << INITIAL_C2;
    let mut c5 = INITIAL_C5;
    let mut prev: Option<(usize, usize)> = None;
    // Entry behind the latest codeword, for string extensions
    let mut last_entry: Option<Entry> = None;
    let mut after_codeword = false;

    'stream: loop {
        let Some(bit) = r.read_bit() else {
            break;
        };

        if bit == 1 {
            loop {
                let Some(field) = r.read_bits(c2) else {
                    break 'stream;
                };
                if field == CONTROL_FLUSH {
                    r.align();
                    if r.remaining_bits() == 0 {
                        break 'stream;
                    }
                    after_codeword = false;
                    continue 'stream;
                }
                if field == CONTROL_STEPUP {
                    let Some(next) = r.read_bit() else {
                        break 'stream;
                    };
                    if next == 1 {
                        c2 += 1;
                        c2n <<= 1;
                        if c2 > MAX_C2 {
                            return Err(DlmsError::Decoding(
                                "codeword width stepped beyond the dictionary bounds".to_string(),
                            ));
                        }
                        continue;
                    }
                    // The consumed bit opened an ordinal token; fall through.
                    c5 = (c5 + 1).min(8);
                    break;
                }
                if (field as usize) < FIRST_CODE {
                    return Err(DlmsError::Decoding(format!(
                        "reserved control code {}",
                        field
                    )));
                }
                if field >= c2n {
                    return Err(DlmsError::Decoding(
                        "codeword exceeds the current width".to_string(),
                    ));
                }
                let entry = dict.get(field as usize).ok_or_else(|| {
                    DlmsError::Decoding(format!(
                        "codeword {} outside the dictionary bounds",
                        field
                    ))
                })?;
                let start = out.len();
                copy_from_history(&mut out, entry.pos, entry.len)?;
                if let Some((ppos, plen)) = prev {
                    dict.add(&out, ppos, plen + 1);
                }
                prev = Some((start, entry.len));
                last_entry = Some(entry);
                after_codeword = true;
                continue 'stream;
            }
        }

        // Ordinal, or a string extension right after a codeword.
        if after_codeword {
            let Some(flag) = r.read_bit() else {
                break;
            };
            after_codeword = false;
            if flag == 1 {
                let ext = read_extension_length(&mut r)?;
                let entry = last_entry.ok_or_else(|| {
                    DlmsError::Decoding("string extension without a codeword".to_string())
                })?;
                copy_from_history(&mut out, entry.pos + entry.len, ext)?;
                dict.add(&out, entry.pos, entry.len + ext);
                let (ppos, plen) =
                    prev.expect("codeword event always sets the previous string");
                prev = Some((ppos, plen + ext));
                continue;
            }
        }
        let Some(value) = r.read_bits(c5) else {
            break;
        };
        let start = out.len();
        out.push(value as u8);
        if let Some((ppos, plen)) = prev {
            dict.add(&out, ppos, plen + 1);
        }
        prev = Some((start, 1));
        after_codeword = false;
    }

    Ok(out)
}

/// Byte-sequential copy so entries may overlap the write position
fn copy_from_history(out: &mut Vec<u8>, pos: usize, len: usize) -> DlmsResult<()> {
    for i in 0..len {
        let src = pos + i;
        if src >= out.len() {
            return Err(DlmsError::Decoding(
                "dictionary entry references bytes outside the history".to_string(),
            ));
        }
        out.push(out[src]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(input: &[u8]) {
        let compressed = compress(input);
        let back = decompress(&compressed).unwrap();
        assert_eq!(back, input, "input length {}", input.len());
    }

    #[test]
    fn test_roundtrip_trivial() {
        roundtrip(b"");
        roundtrip(b"a");
        roundtrip(b"ab");
        roundtrip(b"aaaa");
    }

    #[test]
    fn test_roundtrip_repetitive_text() {
        roundtrip(b"the quick brown fox jumps over the lazy dog. the quick brown fox!");
        roundtrip(&b"abcabcabcabcabcabcabcabcabcabc".repeat(40));
        // Long runs drive the string-extension path hard.
        roundtrip(&vec![0x55u8; 10_000]);
    }

    #[test]
    fn test_roundtrip_high_bytes_stepup() {
        // Bytes above 0x7F force the ordinal width stepup.
        let input: Vec<u8> = (0..=255u8).collect();
        roundtrip(&input);
        roundtrip(&input.repeat(16));
    }

    #[test]
    fn test_roundtrip_pseudo_random_64k() {
        // xorshift keeps the test deterministic.
        let mut state = 0x2545F491_4F6CDD1Du64;
        let mut input = Vec::with_capacity(64 * 1024);
        while input.len() < 64 * 1024 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            input.extend_from_slice(&state.to_le_bytes());
        }
        roundtrip(&input);
    }

    #[test]
    fn test_roundtrip_mixed_structure() {
        // Interleave compressible and incompressible stretches.
        let mut state = 1u64;
        let mut input = Vec::new();
        for round in 0..200 {
            input.extend_from_slice(b"register-read:1-0:1.8.0.255;");
            for _ in 0..round % 17 {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                input.push((state >> 33) as u8);
            }
        }
        roundtrip(&input);
    }

    #[test]
    fn test_dictionary_bounds_error() {
        // Token `1` + codeword field 10 with an empty dictionary.
        let stream = [0x15u8];
        assert!(matches!(
            decompress(&stream),
            Err(DlmsError::Decoding(_))
        ));
    }

    #[test]
    fn test_corrupted_streams_do_not_panic() {
        let input = b"the quick brown fox jumps over the lazy dog. the quick brown fox!";
        let compressed = compress(input);
        for i in 0..compressed.len() {
            for bit in 0..8 {
                let mut bad = compressed.clone();
                bad[i] ^= 1 << bit;
                // Any outcome but a panic is acceptable.
                let _ = decompress(&bad);
            }
        }
    }
}
