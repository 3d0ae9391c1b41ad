//! Canonical static Huffman over byte symbols.
//!
//! Frame layout (self-describing; the writer and reader are a pair):
//!
//! ```text
//! [mode u8]
//!   mode 0 (stored):  body = the input bytes unchanged
//!   mode 1 (huffman): varint(n_symbols) | code_len[256] (u8 each) | bitstream
//! ```
//!
//! Codes are canonical: symbols sorted by (length, symbol value) receive
//! consecutive codes, so the table is just one length byte per symbol.
//! The bitstream is MSB-first; trailing pad bits in the last byte are zero.
//! The encoder emits whichever mode is smaller, so tiny or incompressible
//! streams never pay the 256-byte table.

use crate::error::{GcError, Result};
use crate::varint::{read_uvarint, write_uvarint, MAX_LEN};

const MODE_STORED: u8 = 0;
const MODE_HUFFMAN: u8 = 1;

/// Longest accepted code; far above anything the paired encoder emits.
const MAX_CODE_LEN: u8 = 63;

pub fn encode(data: &[u8]) -> Vec<u8> {
    let stored_len = 1 + data.len();

    if data.is_empty() {
        return vec![MODE_STORED];
    }

    let mut freq = [0u64; 256];
    for &b in data {
        freq[b as usize] += 1;
    }

    let lengths = code_lengths(&freq);
    // The bit accumulator holds one code plus at most seven carry bits.
    if lengths.iter().any(|&l| l > 56) {
        let mut out = Vec::with_capacity(stored_len);
        out.push(MODE_STORED);
        out.extend_from_slice(data);
        return out;
    }
    let codes = canonical_codes(&lengths);

    // Bitstream size in bits, then bytes.
    let total_bits: u64 = freq
        .iter()
        .zip(lengths.iter())
        .map(|(&f, &l)| f * u64::from(l))
        .sum();
    let huff_len = 1 + varint_len(data.len() as u64) + 256 + ((total_bits + 7) / 8) as usize;
    if huff_len >= stored_len {
        let mut out = Vec::with_capacity(stored_len);
        out.push(MODE_STORED);
        out.extend_from_slice(data);
        return out;
    }

    let mut out = Vec::with_capacity(huff_len);
    out.push(MODE_HUFFMAN);
    write_uvarint(&mut out, data.len() as u64);
    out.extend_from_slice(&lengths);

    let mut acc: u64 = 0;
    let mut nbits: u32 = 0;
    for &b in data {
        let (code, len) = codes[b as usize];
        acc = (acc << len) | u64::from(code);
        nbits += u32::from(len);
        while nbits >= 8 {
            nbits -= 8;
            out.push((acc >> nbits) as u8);
        }
    }
    if nbits > 0 {
        out.push((acc << (8 - nbits)) as u8);
    }
    out
}

pub fn decode(comp: &[u8]) -> Result<Vec<u8>> {
    let (&mode, body) = comp
        .split_first()
        .ok_or_else(|| GcError::Corrupt("huffman: empty frame".into()))?;
    match mode {
        MODE_STORED => Ok(body.to_vec()),
        MODE_HUFFMAN => decode_huffman(body),
        other => Err(GcError::Corrupt(format!("huffman: unknown mode {}", other))),
    }
}

fn decode_huffman(body: &[u8]) -> Result<Vec<u8>> {
    let mut idx = 0;
    let n = read_uvarint(body, &mut idx)?;
    if n > MAX_LEN {
        return Err(GcError::Corrupt("huffman: symbol count above ceiling".into()));
    }
    let n = n as usize;
    if idx + 256 > body.len() {
        return Err(GcError::Corrupt("huffman: truncated code table".into()));
    }
    let mut lengths = [0u8; 256];
    lengths.copy_from_slice(&body[idx..idx + 256]);
    idx += 256;
    let bitstream = &body[idx..];

    let table = DecodeTable::build(&lengths)?;

    let mut out = Vec::with_capacity(n);
    let mut code: u64 = 0;
    let mut len: u8 = 0;
    'bits: for &byte in bitstream {
        for bit_index in 0..8 {
            let bit = (byte >> (7 - bit_index)) & 1;
            code = (code << 1) | u64::from(bit);
            len += 1;
            if len > MAX_CODE_LEN {
                return Err(GcError::Corrupt("huffman: code length overflow".into()));
            }
            if let Some(sym) = table.lookup(code, len) {
                out.push(sym);
                code = 0;
                len = 0;
                if out.len() == n {
                    break 'bits;
                }
            }
        }
    }
    if out.len() != n {
        return Err(GcError::Corrupt(format!(
            "huffman: bitstream exhausted: got={} expected={}",
            out.len(),
            n
        )));
    }
    Ok(out)
}

/// Compute code lengths from frequencies with a two-queue-free heap merge.
/// A single distinct symbol gets length 1.
fn code_lengths(freq: &[u64; 256]) -> [u8; 256] {
    #[derive(Clone)]
    struct Node {
        sym: Option<u8>,
        left: usize,
        right: usize,
    }

    let mut lengths = [0u8; 256];
    let used: Vec<u8> = (0..=255u8).filter(|&s| freq[s as usize] > 0).collect();
    match used.len() {
        0 => return lengths,
        1 => {
            lengths[used[0] as usize] = 1;
            return lengths;
        }
        _ => {}
    }

    let mut arena: Vec<Node> = Vec::with_capacity(used.len() * 2);
    // Min-heap keyed on (freq, insertion order) keeps the merge deterministic.
    let mut heap: std::collections::BinaryHeap<std::cmp::Reverse<(u64, usize, usize)>> =
        std::collections::BinaryHeap::new();
    let mut counter = 0usize;
    for &s in &used {
        arena.push(Node { sym: Some(s), left: usize::MAX, right: usize::MAX });
        heap.push(std::cmp::Reverse((freq[s as usize], counter, arena.len() - 1)));
        counter += 1;
    }
    while heap.len() > 1 {
        let std::cmp::Reverse((f1, _, n1)) = heap.pop().unwrap();
        let std::cmp::Reverse((f2, _, n2)) = heap.pop().unwrap();
        arena.push(Node { sym: None, left: n1, right: n2 });
        heap.push(std::cmp::Reverse((f1 + f2, counter, arena.len() - 1)));
        counter += 1;
    }
    let root = heap.pop().unwrap().0 .2;

    // Iterative depth walk.
    let mut stack = vec![(root, 0u8)];
    while let Some((ni, depth)) = stack.pop() {
        let node = &arena[ni];
        match node.sym {
            Some(s) => lengths[s as usize] = depth.max(1),
            None => {
                stack.push((node.left, depth + 1));
                stack.push((node.right, depth + 1));
            }
        }
    }
    lengths
}

/// Canonical (code, length) per symbol from the length table.
fn canonical_codes(lengths: &[u8; 256]) -> [(u64, u8); 256] {
    let mut codes = [(0u64, 0u8); 256];
    let mut order: Vec<u8> = (0..=255u8).filter(|&s| lengths[s as usize] > 0).collect();
    order.sort_by_key(|&s| (lengths[s as usize], s));
    let mut code: u64 = 0;
    let mut prev_len: u8 = 0;
    for &s in &order {
        let len = lengths[s as usize];
        code <<= len - prev_len;
        codes[s as usize] = (code, len);
        code += 1;
        prev_len = len;
    }
    codes
}

/// Canonical decoding table: per length, the first code and the symbol range.
struct DecodeTable {
    first_code: [u64; 64],
    offset: [usize; 64],
    count: [usize; 64],
    symbols: Vec<u8>,
}

impl DecodeTable {
    fn build(lengths: &[u8; 256]) -> Result<Self> {
        let mut symbols: Vec<u8> = (0..=255u8).filter(|&s| lengths[s as usize] > 0).collect();
        symbols.sort_by_key(|&s| (lengths[s as usize], s));
        if symbols.is_empty() {
            return Err(GcError::Corrupt("huffman: empty code table".into()));
        }

        let mut count = [0usize; 64];
        for &s in &symbols {
            let l = lengths[s as usize];
            if l > MAX_CODE_LEN {
                return Err(GcError::Corrupt("huffman: code length out of range".into()));
            }
            count[l as usize] += 1;
        }

        // Kraft check keeps a corrupted table from producing overlapping codes.
        let mut kraft: u128 = 0;
        for l in 1..64usize {
            kraft += (count[l] as u128) << (64 - l);
        }
        if kraft > 1u128 << 64 {
            return Err(GcError::Corrupt("huffman: invalid code table (Kraft)".into()));
        }

        let mut first_code = [0u64; 64];
        let mut offset = [0usize; 64];
        let mut code: u64 = 0;
        let mut seen: usize = 0;
        for l in 1..64usize {
            first_code[l] = code;
            offset[l] = seen;
            code = (code + count[l] as u64) << 1;
            seen += count[l];
        }
        Ok(DecodeTable { first_code, offset, count, symbols })
    }

    fn lookup(&self, code: u64, len: u8) -> Option<u8> {
        let l = len as usize;
        let idx = code.checked_sub(self.first_code[l])? as usize;
        if idx < self.count[l] {
            Some(self.symbols[self.offset[l] + idx])
        } else {
            None
        }
    }
}

fn varint_len(mut x: u64) -> usize {
    let mut n = 1;
    while x >= 0x80 {
        x >>= 7;
        n += 1;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(data: &[u8]) {
        let comp = encode(data);
        let back = decode(&comp).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn roundtrip_text() {
        roundtrip(b"the quick brown fox jumps over the lazy dog, again and again and again");
    }

    #[test]
    fn roundtrip_single_symbol() {
        roundtrip(&[b'a'; 1000]);
    }

    #[test]
    fn roundtrip_two_symbols() {
        roundtrip(&[0u8, 1, 0, 0, 1, 0, 1, 1, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn roundtrip_all_bytes() {
        let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        roundtrip(&data);
    }

    #[test]
    fn tiny_input_uses_stored_mode() {
        let comp = encode(b"ab");
        assert_eq!(comp[0], MODE_STORED);
        assert_eq!(decode(&comp).unwrap(), b"ab");
    }

    #[test]
    fn empty_roundtrip() {
        roundtrip(b"");
    }

    #[test]
    fn truncated_bitstream_is_corrupt() {
        let skewed: Vec<u8> = std::iter::repeat(b'x')
            .take(2000)
            .chain((0..=255u8).cycle().take(600))
            .collect();
        let comp = encode(&skewed);
        assert_eq!(comp[0], MODE_HUFFMAN);
        let cut = &comp[..comp.len() - 4];
        assert!(decode(cut).is_err());
    }
}
