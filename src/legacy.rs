//! Read-only support for legacy containers (versions 1 through 5).
//!
//! The modern writer emits v6 only; these decoders keep old archives
//! readable. The legacy formats share a frequency-table Huffman coder whose
//! tree shape depends on heap insertion order, reproduced here exactly so the
//! historical writer/reader pairing holds:
//!
//! - v1: one byte stream. `N u64be | num_syms u16be | (sym u8, freq u32be)* |
//!   lastbits u8 | bitstream`
//! - v2: mask/vowels/consonant split, each with a full 256-entry `u32be`
//!   frequency table, `lastbits` and a `u64be` bitstream size.
//! - v3/v4: token-id streams (syllables / words) with an inline vocabulary
//!   (`u16be` length-prefixed tokens) and a per-id frequency table.
//! - v5: string layer/codec ids, JSON meta (bytes wrapped as
//!   `{"__t":"bytes","b64":…}`), `u32be` meta and payload lengths. Payloads
//!   dispatch on the `ZRAW1` fast path or the legacy huffman payload kinds
//!   (0 = bytes, 1 = ids with vocab in meta, 2 = ids with inline vocab).
//!
//! [`decompress_any`] is the universal entry: it detects the version byte and
//! routes v1–v5 here and v6 to the native engine.

use base64::Engine as _;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::container::{decompress_v6, MAGIC, VER_V6};
use crate::error::{GcError, Result};
use crate::layers::{self, LayerEnv, LayerId, StreamMap};
use crate::mbn::ST_MAIN;
use crate::varint::read_len;

const VER_V1: u8 = 1;
const VER_V2: u8 = 2;
const VER_V3: u8 = 3;
const VER_V4: u8 = 4;
const VER_V5: u8 = 5;

const ZRAW1_MAGIC: &[u8; 5] = b"ZRAW1";

const KIND_BYTES: u8 = 0;
const KIND_IDS_META_VOCAB: u8 = 1;
const KIND_IDS_INLINE_VOCAB: u8 = 2;

/// Decode any GCC container, v1 through v6.
pub fn decompress_any(blob: &[u8], env: &LayerEnv) -> Result<Vec<u8>> {
    if blob.len() < 4 || &blob[..3] != MAGIC {
        return Err(GcError::Corrupt("not a GCC container (bad magic)".into()));
    }
    match blob[3] {
        VER_V1 => decompress_v1(blob),
        VER_V2 => decompress_v2(blob),
        VER_V3 | VER_V4 => decompress_v3_v4(blob),
        VER_V5 => decompress_v5(blob, env),
        VER_V6 => decompress_v6(blob, env),
        other => Err(GcError::UnsupportedVersion(format!("container version {}", other))),
    }
}

// ---- legacy frequency-tree huffman --------------------------------------

struct Node {
    sym: Option<u32>,
    left: usize,
    right: usize,
}

struct Tree {
    arena: Vec<Node>,
    root: usize,
}

/// Rebuild the historical tree: leaves pushed in symbol order, merges keyed on
/// (freq, insertion counter), single-symbol streams get a zero-frequency dummy
/// leaf at `(sym + 1) % alphabet`.
fn build_tree(freq: &[u64]) -> Option<Tree> {
    let mut arena: Vec<Node> = Vec::new();
    let mut heap: BinaryHeap<Reverse<(u64, u64, usize)>> = BinaryHeap::new();
    let mut counter = 0u64;

    for (sym, &f) in freq.iter().enumerate() {
        if f > 0 {
            arena.push(Node { sym: Some(sym as u32), left: usize::MAX, right: usize::MAX });
            heap.push(Reverse((f, counter, arena.len() - 1)));
            counter += 1;
        }
    }
    if heap.is_empty() {
        return None;
    }
    if heap.len() == 1 {
        let only_sym = arena[0].sym.unwrap();
        let dummy_sym = (only_sym as usize + 1) % freq.len();
        arena.push(Node { sym: Some(dummy_sym as u32), left: usize::MAX, right: usize::MAX });
        heap.push(Reverse((0, counter, arena.len() - 1)));
        counter += 1;
    }
    while heap.len() > 1 {
        let Reverse((f1, _, n1)) = heap.pop().unwrap();
        let Reverse((f2, _, n2)) = heap.pop().unwrap();
        arena.push(Node { sym: None, left: n1, right: n2 });
        heap.push(Reverse((f1 + f2, counter, arena.len() - 1)));
        counter += 1;
    }
    let root = heap.pop().unwrap().0 .2;
    Some(Tree { arena, root })
}

/// Decode `n` symbols from an MSB-first bitstream where the final byte holds
/// only `lastbits` valid bits (0 means the last byte is full).
fn decode_bitstream(tree: &Tree, bitstream: &[u8], n: usize, lastbits: u8) -> Result<Vec<u32>> {
    let mut out = Vec::with_capacity(n);
    if n == 0 {
        return Ok(out);
    }
    let mut node = tree.root;
    for (i, &byte) in bitstream.iter().enumerate() {
        let bits = if i == bitstream.len() - 1 && lastbits != 0 { lastbits } else { 8 };
        for bit_index in 0..bits {
            let bit = (byte >> (7 - bit_index)) & 1;
            let cur = &tree.arena[node];
            node = if bit == 0 { cur.left } else { cur.right };
            if node == usize::MAX {
                return Err(GcError::Corrupt("legacy huffman: walk fell off the tree".into()));
            }
            if let Some(sym) = tree.arena[node].sym {
                out.push(sym);
                node = tree.root;
                if out.len() == n {
                    return Ok(out);
                }
            }
        }
    }
    Err(GcError::Corrupt(format!(
        "legacy huffman: bitstream exhausted: got={} expected={}",
        out.len(),
        n
    )))
}

fn huffman_bytes(freq: &[u64], bitstream: &[u8], n: usize, lastbits: u8) -> Result<Vec<u8>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let tree = build_tree(freq)
        .ok_or_else(|| GcError::Corrupt("legacy huffman: empty frequency table".into()))?;
    let syms = decode_bitstream(&tree, bitstream, n, lastbits)?;
    Ok(syms.into_iter().map(|s| s as u8).collect())
}

// ---- big-endian field helpers -------------------------------------------

fn take<'a>(blob: &'a [u8], idx: &mut usize, n: usize, what: &str) -> Result<&'a [u8]> {
    let end = idx
        .checked_add(n)
        .filter(|&e| e <= blob.len())
        .ok_or_else(|| GcError::Corrupt(format!("legacy: truncated {}", what)))?;
    let s = &blob[*idx..end];
    *idx = end;
    Ok(s)
}

fn read_u8(blob: &[u8], idx: &mut usize, what: &str) -> Result<u8> {
    Ok(take(blob, idx, 1, what)?[0])
}

fn read_u16be(blob: &[u8], idx: &mut usize, what: &str) -> Result<u16> {
    let s = take(blob, idx, 2, what)?;
    Ok(u16::from_be_bytes([s[0], s[1]]))
}

fn read_u32be(blob: &[u8], idx: &mut usize, what: &str) -> Result<u32> {
    let s = take(blob, idx, 4, what)?;
    Ok(u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
}

fn read_u64be(blob: &[u8], idx: &mut usize, what: &str) -> Result<u64> {
    let s = take(blob, idx, 8, what)?;
    Ok(u64::from_be_bytes(s.try_into().unwrap()))
}

// ---- v1 ------------------------------------------------------------------

fn decompress_v1(blob: &[u8]) -> Result<Vec<u8>> {
    let mut idx = 4;
    let n = read_u64be(blob, &mut idx, "v1 N")? as usize;
    let num_syms = read_u16be(blob, &mut idx, "v1 num_syms")? as usize;

    let mut freq = vec![0u64; 256];
    for _ in 0..num_syms {
        let sym = read_u8(blob, &mut idx, "v1 freq sym")?;
        let f = read_u32be(blob, &mut idx, "v1 freq value")?;
        freq[sym as usize] = u64::from(f);
    }
    let lastbits = read_u8(blob, &mut idx, "v1 lastbits")?;
    huffman_bytes(&freq, &blob[idx..], n, lastbits)
}

// ---- v2 ------------------------------------------------------------------

struct V2Stream {
    freq: Vec<u64>,
    lastbits: u8,
    bsize: usize,
}

fn read_v2_stream_header(blob: &[u8], idx: &mut usize) -> Result<V2Stream> {
    let mut freq = vec![0u64; 256];
    for f in freq.iter_mut() {
        *f = u64::from(read_u32be(blob, idx, "v2 freq")?);
    }
    let lastbits = read_u8(blob, idx, "v2 lastbits")?;
    let bsize = read_u64be(blob, idx, "v2 bsize")? as usize;
    Ok(V2Stream { freq, lastbits, bsize })
}

fn decompress_v2(blob: &[u8]) -> Result<Vec<u8>> {
    let mut idx = 4;
    let n = read_u64be(blob, &mut idx, "v2 N")? as usize;
    let len_v = read_u64be(blob, &mut idx, "v2 LEN_V")? as usize;
    let len_c = read_u64be(blob, &mut idx, "v2 LEN_C")? as usize;

    let h_mask = read_v2_stream_header(blob, &mut idx)?;
    let h_vowels = read_v2_stream_header(blob, &mut idx)?;
    let h_cons = read_v2_stream_header(blob, &mut idx)?;

    let bs_mask = take(blob, &mut idx, h_mask.bsize, "v2 mask bitstream")?;
    let bs_vowels = take(blob, &mut idx, h_vowels.bsize, "v2 vowels bitstream")?;
    let bs_cons = take(blob, &mut idx, h_cons.bsize, "v2 cons bitstream")?;

    let mask = huffman_bytes(&h_mask.freq, bs_mask, n, h_mask.lastbits)?;
    let vowels = huffman_bytes(&h_vowels.freq, bs_vowels, len_v, h_vowels.lastbits)?;
    let cons = huffman_bytes(&h_cons.freq, bs_cons, len_c, h_cons.lastbits)?;

    crate::layers::simple::decode_vc0(&mask, &vowels, &cons)
}

// ---- v3 / v4 -------------------------------------------------------------

fn decompress_v3_v4(blob: &[u8]) -> Result<Vec<u8>> {
    let mut idx = 4;
    let n_tokens = read_u64be(blob, &mut idx, "v3 N_TOKENS")? as usize;
    let vocab_size = read_u32be(blob, &mut idx, "v3 VOCAB_SIZE")? as usize;

    let mut vocab: Vec<&[u8]> = Vec::with_capacity(vocab_size.min(1 << 20));
    for _ in 0..vocab_size {
        let len = read_u16be(blob, &mut idx, "v3 token len")? as usize;
        vocab.push(take(blob, &mut idx, len, "v3 token")?);
    }

    let mut freq = vec![0u64; vocab_size];
    for f in freq.iter_mut() {
        *f = u64::from(read_u32be(blob, &mut idx, "v3 freq")?);
    }
    let lastbits = read_u8(blob, &mut idx, "v3 lastbits")?;

    if n_tokens == 0 {
        return Ok(Vec::new());
    }
    let tree = build_tree(&freq)
        .ok_or_else(|| GcError::Corrupt("v3: empty frequency table".into()))?;
    let ids = decode_bitstream(&tree, &blob[idx..], n_tokens, lastbits)?;

    let mut out = Vec::new();
    for id in ids {
        let tok = vocab
            .get(id as usize)
            .ok_or_else(|| GcError::Corrupt(format!("v3: token id {} out of range", id)))?;
        out.extend_from_slice(tok);
    }
    Ok(out)
}

// ---- v5 ------------------------------------------------------------------

fn decompress_v5(blob: &[u8], env: &LayerEnv) -> Result<Vec<u8>> {
    let mut idx = 4;
    let layer_len = read_u8(blob, &mut idx, "v5 layer len")? as usize;
    let layer_name = std::str::from_utf8(take(blob, &mut idx, layer_len, "v5 layer id")?)
        .map_err(|_| GcError::Corrupt("v5: layer id is not UTF-8".into()))?
        .to_string();
    let codec_len = read_u8(blob, &mut idx, "v5 codec len")? as usize;
    let _codec_name = take(blob, &mut idx, codec_len, "v5 codec id")?;

    let meta_len = read_u32be(blob, &mut idx, "v5 meta len")? as usize;
    let meta_raw = take(blob, &mut idx, meta_len, "v5 meta")?;
    let payload_len = read_u32be(blob, &mut idx, "v5 payload len")? as usize;
    let payload = take(blob, &mut idx, payload_len, "v5 payload")?;

    let layer = LayerId::from_name(&layer_name)
        .ok_or_else(|| GcError::Corrupt(format!("v5: unknown layer {:?}", layer_name)))?;
    let meta: serde_json::Value = if meta_raw.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(meta_raw)
            .map_err(|e| GcError::Corrupt(format!("v5: meta JSON: {}", e)))?
    };

    // ZRAW1 fast path: single bytes stream, zstd frame with explicit length.
    if payload.len() >= 5 && &payload[..5] == ZRAW1_MAGIC {
        let mut pidx = 5;
        let ulen = read_len(payload, &mut pidx)?;
        let raw = zstd::stream::decode_all(&payload[pidx..])
            .map_err(|e| GcError::Corrupt(format!("ZRAW1: zstd decode: {}", e)))?;
        if raw.len() != ulen {
            return Err(GcError::Corrupt("ZRAW1: uncompressed length mismatch".into()));
        }
        let mut streams = StreamMap::new();
        streams.insert(ST_MAIN, raw);
        return layers::decode(layer, &streams, &[], env);
    }

    // Legacy huffman payload kinds.
    let kind = *payload
        .first()
        .ok_or_else(|| GcError::Corrupt("v5: empty payload".into()))?;
    match kind {
        KIND_BYTES => {
            let n = meta_u64(&meta, "n")? as usize;
            let mut pidx = 1;
            let num = read_u32be(payload, &mut pidx, "v5 bytes num_used")? as usize;
            let mut freq = vec![0u64; 256];
            for _ in 0..num {
                let sym = read_u8(payload, &mut pidx, "v5 bytes sym")?;
                let f = read_u32be(payload, &mut pidx, "v5 bytes freq")?;
                freq[sym as usize] = u64::from(f);
            }
            let lastbits = read_u8(payload, &mut pidx, "v5 bytes lastbits")?;
            let symbols = huffman_bytes(&freq, &payload[pidx..], n, lastbits)?;
            let mut streams = StreamMap::new();
            streams.insert(ST_MAIN, symbols);
            layers::decode(layer, &streams, &[], env)
        }
        KIND_IDS_META_VOCAB => {
            let n_symbols = meta_u64(&meta, "n_symbols")? as usize;
            let vocab = meta_vocab_list(&meta)?;
            let mut pidx = 1;
            let vocab_size = read_u32be(payload, &mut pidx, "v5 ids vocab_size")? as usize;
            if vocab_size != vocab.len() {
                return Err(GcError::Corrupt("v5: vocab size mismatch between meta and payload".into()));
            }
            decode_legacy_ids(payload, pidx, vocab_size, n_symbols, &vocab)
        }
        KIND_IDS_INLINE_VOCAB => {
            let n_symbols = meta_u64(&meta, "n_symbols")? as usize;
            let mut pidx = 1;
            let vocab_blob_len = read_u32be(payload, &mut pidx, "v5 vocab blob len")? as usize;
            let vocab_blob = take(payload, &mut pidx, vocab_blob_len, "v5 vocab blob")?;
            let vocab = crate::layers::vocab::unpack_vocab(vocab_blob)?;
            decode_legacy_ids(payload, pidx, vocab.len(), n_symbols, &vocab)
        }
        other => Err(GcError::Corrupt(format!("v5: unknown payload kind {}", other))),
    }
}

fn decode_legacy_ids(
    payload: &[u8],
    mut idx: usize,
    vocab_size: usize,
    n_symbols: usize,
    vocab: &[Vec<u8>],
) -> Result<Vec<u8>> {
    let num = read_u32be(payload, &mut idx, "v5 ids num_used")? as usize;
    let mut freq = vec![0u64; vocab_size];
    for _ in 0..num {
        let sym = read_u32be(payload, &mut idx, "v5 ids sym")? as usize;
        let f = read_u32be(payload, &mut idx, "v5 ids freq")?;
        if sym >= vocab_size {
            return Err(GcError::Corrupt("v5: frequency symbol above vocab size".into()));
        }
        freq[sym] = u64::from(f);
    }
    let lastbits = read_u8(payload, &mut idx, "v5 ids lastbits")?;

    if n_symbols == 0 {
        return Ok(Vec::new());
    }
    let tree = build_tree(&freq)
        .ok_or_else(|| GcError::Corrupt("v5: empty frequency table".into()))?;
    let ids = decode_bitstream(&tree, &payload[idx..], n_symbols, lastbits)?;

    let mut out = Vec::new();
    for id in ids {
        let tok = vocab
            .get(id as usize)
            .ok_or_else(|| GcError::Corrupt(format!("v5: token id {} out of range", id)))?;
        out.extend_from_slice(tok);
    }
    Ok(out)
}

fn meta_u64(meta: &serde_json::Value, key: &str) -> Result<u64> {
    meta.get(key)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| GcError::Corrupt(format!("v5: meta field {:?} missing", key)))
}

/// Extract `layer_meta.vocab_list` from v5 JSON meta. Entries are either
/// strings or `{"__t":"bytes","b64":…}` wrappers.
fn meta_vocab_list(meta: &serde_json::Value) -> Result<Vec<Vec<u8>>> {
    let list = meta
        .get("layer_meta")
        .and_then(|m| m.get("vocab_list"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| GcError::Corrupt("v5: meta has no layer_meta.vocab_list".into()))?;
    let mut out = Vec::with_capacity(list.len());
    for item in list {
        match item {
            serde_json::Value::String(s) => out.push(s.clone().into_bytes()),
            serde_json::Value::Object(obj)
                if obj.get("__t").and_then(|t| t.as_str()) == Some("bytes") =>
            {
                let b64 = obj
                    .get("b64")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| GcError::Corrupt("v5: bytes wrapper without b64".into()))?;
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(b64)
                    .map_err(|e| GcError::Corrupt(format!("v5: vocab base64: {}", e)))?;
                out.push(bytes);
            }
            _ => return Err(GcError::Corrupt("v5: unexpected vocab_list entry".into())),
        }
    }
    Ok(out)
}
