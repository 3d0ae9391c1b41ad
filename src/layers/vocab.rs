//! Vocabulary-based layers: token/line dictionaries with an integer id stream.
//!
//! The vocabulary travels in layer meta as a "VB2" blob:
//!
//! ```text
//! "VB2\0" | varint(count) | repeat( varint(len) | token bytes )
//! ```
//!
//! The reader also accepts the historical u32-big-endian framing
//! (`u32 count | repeat(u32 len | bytes)`) so vocabularies copied out of old
//! containers keep parsing. The writer always emits VB2.

use crate::error::{GcError, Result};
use crate::mbn::ST_MAIN;
use crate::varint::{decode_uints, encode_uints, read_len, read_uvarint, write_uvarint};

use super::Encoded;

const MAGIC_VB2: &[u8; 4] = b"VB2\0";

pub fn pack_vocab(vocab: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC_VB2);
    write_uvarint(&mut out, vocab.len() as u64);
    for tok in vocab {
        write_uvarint(&mut out, tok.len() as u64);
        out.extend_from_slice(tok);
    }
    out
}

pub fn unpack_vocab(blob: &[u8]) -> Result<Vec<Vec<u8>>> {
    if blob.len() >= 4 && &blob[..4] == MAGIC_VB2 {
        let mut idx = 4;
        let n = read_len(blob, &mut idx)?;
        let mut vocab = Vec::with_capacity(n.min(1 << 20));
        for _ in 0..n {
            let len = read_len(blob, &mut idx)?;
            let end = idx
                .checked_add(len)
                .filter(|&e| e <= blob.len())
                .ok_or_else(|| GcError::Corrupt("vocab VB2: truncated token".into()))?;
            vocab.push(blob[idx..end].to_vec());
            idx = end;
        }
        if idx != blob.len() {
            return Err(GcError::Corrupt("vocab VB2: trailing garbage".into()));
        }
        return Ok(vocab);
    }

    // Legacy u32-BE framing.
    if blob.len() < 4 {
        return Err(GcError::Corrupt("vocab: blob too short".into()));
    }
    let n = u32::from_be_bytes([blob[0], blob[1], blob[2], blob[3]]) as usize;
    let mut idx = 4;
    let mut vocab = Vec::with_capacity(n.min(1 << 20));
    for _ in 0..n {
        if idx + 4 > blob.len() {
            return Err(GcError::Corrupt("vocab: truncated length".into()));
        }
        let len =
            u32::from_be_bytes([blob[idx], blob[idx + 1], blob[idx + 2], blob[idx + 3]]) as usize;
        idx += 4;
        let end = idx
            .checked_add(len)
            .filter(|&e| e <= blob.len())
            .ok_or_else(|| GcError::Corrupt("vocab: truncated token".into()))?;
        vocab.push(blob[idx..end].to_vec());
        idx = end;
    }
    if idx != blob.len() {
        return Err(GcError::Corrupt("vocab: trailing garbage".into()));
    }
    Ok(vocab)
}

fn is_ascii_letter(b: u8) -> bool {
    b.is_ascii_alphabetic()
}

fn is_vowel(b: u8) -> bool {
    matches!(b, b'a' | b'e' | b'i' | b'o' | b'u' | b'A' | b'E' | b'I' | b'O' | b'U')
}

/// Letter runs split into pseudo-syllables (break after each vowel),
/// non-letter runs kept as whole blocks.
fn tokenize_syllables(data: &[u8]) -> Vec<&[u8]> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < data.len() {
        if is_ascii_letter(data[i]) {
            let start = i;
            while i < data.len() && is_ascii_letter(data[i]) {
                i += 1;
            }
            let mut syl_start = start;
            for j in start..i {
                if is_vowel(data[j]) {
                    tokens.push(&data[syl_start..=j]);
                    syl_start = j + 1;
                }
            }
            if syl_start < i {
                tokens.push(&data[syl_start..i]);
            }
        } else {
            let start = i;
            while i < data.len() && !is_ascii_letter(data[i]) {
                i += 1;
            }
            tokens.push(&data[start..i]);
        }
    }
    tokens
}

/// Whole ASCII words plus non-letter blocks.
fn tokenize_words(data: &[u8]) -> Vec<&[u8]> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let letter = is_ascii_letter(data[i]);
        let start = i;
        while i < data.len() && is_ascii_letter(data[i]) == letter {
            i += 1;
        }
        tokens.push(&data[start..i]);
    }
    tokens
}

/// Newline-preserving line split. Any split that concatenates back is lossless.
fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    data.split_inclusive(|&b| b == b'\n').collect()
}

/// First-seen vocabulary order: identical input always yields identical ids.
fn build_vocab<'a>(tokens: &[&'a [u8]]) -> (Vec<Vec<u8>>, Vec<u64>) {
    let mut index: std::collections::HashMap<&'a [u8], u64> = std::collections::HashMap::new();
    let mut vocab: Vec<Vec<u8>> = Vec::new();
    let mut ids = Vec::with_capacity(tokens.len());
    for &tok in tokens {
        let id = *index.entry(tok).or_insert_with(|| {
            vocab.push(tok.to_vec());
            (vocab.len() - 1) as u64
        });
        ids.push(id);
    }
    (vocab, ids)
}

fn encode_token_layer(tokens: &[&[u8]]) -> Encoded {
    let (vocab, ids) = build_vocab(tokens);
    Encoded {
        streams: vec![(ST_MAIN, encode_uints(&ids))],
        meta: pack_vocab(&vocab),
    }
}

pub fn encode_syllables(data: &[u8]) -> Result<Encoded> {
    Ok(encode_token_layer(&tokenize_syllables(data)))
}

pub fn encode_words(data: &[u8]) -> Result<Encoded> {
    Ok(encode_token_layer(&tokenize_words(data)))
}

pub fn encode_lines_dict(data: &[u8]) -> Result<Encoded> {
    Ok(encode_token_layer(&split_lines(data)))
}

pub fn decode_ids_with_vocab(main: &[u8], meta: &[u8]) -> Result<Vec<u8>> {
    let ids = decode_uints(main)?;
    let vocab = if meta.is_empty() { Vec::new() } else { unpack_vocab(meta)? };
    let mut out = Vec::new();
    for id in ids {
        let tok = vocab
            .get(id as usize)
            .ok_or_else(|| GcError::Corrupt(format!("vocab layer: id {} out of range", id)))?;
        out.extend_from_slice(tok);
    }
    Ok(out)
}

/// Like `lines_dict`, but the main stream run-length-encodes the id sequence
/// as `(id, run)` varint pairs. Meta carries `n_lines` before the vocab blob.
pub fn encode_lines_rle(data: &[u8]) -> Result<Encoded> {
    let lines = split_lines(data);
    let (vocab, ids) = build_vocab(&lines);

    let mut main = Vec::new();
    let mut i = 0;
    while i < ids.len() {
        let id = ids[i];
        let mut run = 1u64;
        while i + (run as usize) < ids.len() && ids[i + run as usize] == id {
            run += 1;
        }
        write_uvarint(&mut main, id);
        write_uvarint(&mut main, run);
        i += run as usize;
    }

    let mut meta = Vec::new();
    write_uvarint(&mut meta, lines.len() as u64);
    meta.extend_from_slice(&pack_vocab(&vocab));

    Ok(Encoded { streams: vec![(ST_MAIN, main)], meta })
}

pub fn decode_lines_rle(main: &[u8], meta: &[u8]) -> Result<Vec<u8>> {
    if meta.is_empty() {
        if main.is_empty() {
            return Ok(Vec::new());
        }
        return Err(GcError::Corrupt("lines_rle: missing meta".into()));
    }
    let mut midx = 0;
    let n_lines = read_len(meta, &mut midx)?;
    let vocab = unpack_vocab(&meta[midx..])?;

    let mut out = Vec::new();
    let mut seen = 0usize;
    let mut idx = 0;
    while idx < main.len() {
        let id = read_uvarint(main, &mut idx)?;
        let run = read_uvarint(main, &mut idx)?;
        if run == 0 {
            return Err(GcError::Corrupt("lines_rle: zero-length run".into()));
        }
        let tok = vocab
            .get(id as usize)
            .ok_or_else(|| GcError::Corrupt(format!("lines_rle: id {} out of range", id)))?;
        if seen as u64 + run > n_lines as u64 {
            return Err(GcError::Corrupt("lines_rle: run count above n_lines".into()));
        }
        for _ in 0..run {
            out.extend_from_slice(tok);
        }
        seen += run as usize;
    }
    if seen != n_lines {
        return Err(GcError::Corrupt(format!(
            "lines_rle: line count mismatch: got={} expected={}",
            seen, n_lines
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vb2_roundtrip_and_legacy_fallback() {
        let vocab = vec![b"ca".to_vec(), b"sa".to_vec(), b" \n".to_vec(), Vec::new()];
        let blob = pack_vocab(&vocab);
        assert_eq!(unpack_vocab(&blob).unwrap(), vocab);

        // Legacy u32-BE framing still parses.
        let mut legacy = Vec::new();
        legacy.extend_from_slice(&2u32.to_be_bytes());
        legacy.extend_from_slice(&2u32.to_be_bytes());
        legacy.extend_from_slice(b"ab");
        legacy.extend_from_slice(&1u32.to_be_bytes());
        legacy.extend_from_slice(b"c");
        assert_eq!(unpack_vocab(&legacy).unwrap(), vec![b"ab".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn syllable_tokens_break_after_vowels() {
        let toks = tokenize_syllables(b"casa blu");
        let expect: Vec<&[u8]> = vec![b"ca", b"sa", b" ", b"blu"];
        assert_eq!(toks, expect);
    }

    #[test]
    fn word_tokens_alternate_letter_blocks() {
        let toks = tokenize_words(b"ciao, mondo 42");
        let expect: Vec<&[u8]> = vec![b"ciao", b", ", b"mondo", b" 42"];
        assert_eq!(toks, expect);
    }

    #[test]
    fn lines_rle_compresses_repeats() {
        let data = b"same\nsame\nsame\nother\nsame\n";
        let enc = encode_lines_rle(data).unwrap();
        assert_eq!(decode_lines_rle(&enc.streams[0].1, &enc.meta).unwrap(), data);
    }

    #[test]
    fn lines_rle_line_count_is_checked() {
        let data = b"a\nb\n";
        let enc = encode_lines_rle(data).unwrap();
        let mut meta = Vec::new();
        write_uvarint(&mut meta, 5); // lie about n_lines
        let vocab_at = {
            let mut idx = 0;
            read_uvarint(&enc.meta, &mut idx).unwrap();
            idx
        };
        meta.extend_from_slice(&enc.meta[vocab_at..]);
        assert!(decode_lines_rle(&enc.streams[0].1, &meta).is_err());
    }
}
