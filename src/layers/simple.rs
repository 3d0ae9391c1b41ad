//! The identity layer and the vowel/consonant/other split.

use crate::error::{GcError, Result};
use crate::mbn::{ST_CONS, ST_MAIN, ST_MASK, ST_VOWELS};

use super::Encoded;

pub fn encode_bytes(data: &[u8]) -> Result<Encoded> {
    Ok(Encoded { streams: vec![(ST_MAIN, data.to_vec())], meta: Vec::new() })
}

const MASK_VOWEL: u8 = b'V';
const MASK_CONS: u8 = b'C';
const MASK_OTHER: u8 = b'O';

fn is_vowel(b: u8) -> bool {
    matches!(b, b'a' | b'e' | b'i' | b'o' | b'u' | b'A' | b'E' | b'I' | b'O' | b'U')
}

/// Three streams: a V/C/O mask, the vowels, and everything else.
/// Reconstruction walks the mask and pulls from the matching stream.
pub fn encode_vc0(data: &[u8]) -> Result<Encoded> {
    let mut mask = Vec::with_capacity(data.len());
    let mut vowels = Vec::new();
    let mut cons = Vec::new();

    for &b in data {
        if is_vowel(b) {
            mask.push(MASK_VOWEL);
            vowels.push(b);
        } else if b.is_ascii_alphabetic() {
            mask.push(MASK_CONS);
            cons.push(b);
        } else {
            mask.push(MASK_OTHER);
            cons.push(b);
        }
    }

    Ok(Encoded {
        streams: vec![(ST_MASK, mask), (ST_VOWELS, vowels), (ST_CONS, cons)],
        meta: Vec::new(),
    })
}

pub fn decode_vc0(mask: &[u8], vowels: &[u8], cons: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(mask.len());
    let mut iv = 0;
    let mut ic = 0;
    for &m in mask {
        if m == MASK_VOWEL {
            let b = *vowels
                .get(iv)
                .ok_or_else(|| GcError::Corrupt("vc0: VOWELS stream exhausted".into()))?;
            out.push(b);
            iv += 1;
        } else {
            let b = *cons
                .get(ic)
                .ok_or_else(|| GcError::Corrupt("vc0: CONS stream exhausted".into()))?;
            out.push(b);
            ic += 1;
        }
    }
    if iv != vowels.len() || ic != cons.len() {
        return Err(GcError::Corrupt("vc0: trailing bytes in symbol streams".into()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vc0_separates_and_merges() {
        let enc = encode_vc0(b"Ciao, mondo 42!").unwrap();
        assert_eq!(enc.streams.len(), 3);
        let mask = &enc.streams[0].1;
        let vowels = &enc.streams[1].1;
        let cons = &enc.streams[2].1;
        assert_eq!(mask, b"CVVVOOCVCCVOOOO");
        assert_eq!(vowels, b"iaooo");
        assert_eq!(decode_vc0(mask, vowels, cons).unwrap(), b"Ciao, mondo 42!");
    }

    #[test]
    fn vc0_truncated_stream_is_corrupt() {
        let enc = encode_vc0(b"aeiou").unwrap();
        let mask = &enc.streams[0].1;
        assert!(decode_vc0(mask, b"aei", b"").is_err());
    }
}
