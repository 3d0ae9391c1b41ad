//! Numeric stream codecs.
//!
//! Both codecs operate on the raw NUMS/IDS wire format: a concatenation of
//! unsigned LEB128 varints, one per integer (see [`crate::varint`]).
//!
//! `num_v0` (code 5) is that stream verbatim: encode and decode validate the
//! framing and pass the bytes through.
//!
//! `num_v1` (code 7) prefixes one mode byte and re-encodes the values:
//!
//! ```text
//! [mode u8] body
//!   0 plain  — body = the input varint stream unchanged
//!   1 delta  — zigzag varints of consecutive differences (first value included)
//!   2 zigzag — zigzag varints of the values
//!   3 rle    — (value uvarint, run uvarint) pairs
//!   4 shared — dict tag (8 bytes) + code stream; code 0 escapes a literal
//!              uvarint value, code k refers to dict entry k-1
//! ```
//!
//! The encoder tries every applicable mode and keeps the smallest blob; ties
//! break on the lowest mode byte, so the choice is deterministic. Old streams
//! written as `num_v0` stay readable because the codes are distinct.

use sha2::{Digest, Sha256};

use crate::error::{GcError, Result};
use crate::varint::{
    decode_uints, encode_uints, read_uvarint, write_uvarint, zigzag_decode, zigzag_encode, MAX_LEN,
};

pub const MODE_PLAIN: u8 = 0;
pub const MODE_DELTA: u8 = 1;
pub const MODE_ZIGZAG: u8 = 2;
pub const MODE_RLE: u8 = 3;
pub const MODE_SHARED: u8 = 4;

/// Streams shorter than this never try the shared dictionary (the tag alone
/// would dominate).
const SHARED_MIN_VALUES: usize = 8;

/// Bucket-level shared value dictionary, carried in GCA archives as the
/// `num_dict_v1` resource.
#[derive(Debug, Clone)]
pub struct NumDict {
    values: Vec<u64>,
    tag8: [u8; 8],
}

impl NumDict {
    pub fn new(values: Vec<u64>) -> Self {
        let tag8 = dict_tag8(&values);
        NumDict { values, tag8 }
    }

    /// Parse the resource blob (the varint encoding of the dict values).
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        let values = decode_uints(blob)
            .map_err(|_| GcError::Corrupt("num_dict_v1: blob is not a varint stream".into()))?;
        Ok(NumDict::new(values))
    }

    pub fn to_blob(&self) -> Vec<u8> {
        encode_uints(&self.values)
    }

    pub fn values(&self) -> &[u64] {
        &self.values
    }

    pub fn tag8(&self) -> [u8; 8] {
        self.tag8
    }
}

/// Stable 8-byte tag of a dict: first 8 bytes of SHA-256 over its wire form.
pub fn dict_tag8(values: &[u64]) -> [u8; 8] {
    let raw = encode_uints(values);
    let digest = Sha256::digest(&raw);
    let mut tag = [0u8; 8];
    tag.copy_from_slice(&digest[..8]);
    tag
}

pub fn encode_v0(data: &[u8]) -> Result<Vec<u8>> {
    decode_uints(data)
        .map_err(|_| GcError::Corrupt("num_v0: input is not a varint stream".into()))?;
    Ok(data.to_vec())
}

pub fn decode_v0(comp: &[u8]) -> Result<Vec<u8>> {
    decode_uints(comp)
        .map_err(|_| GcError::Corrupt("num_v0: payload is not a varint stream".into()))?;
    Ok(comp.to_vec())
}

pub fn encode_v1(data: &[u8], dict: Option<&NumDict>) -> Result<Vec<u8>> {
    let values = decode_uints(data)
        .map_err(|_| GcError::Corrupt("num_v1: input is not a varint stream".into()))?;

    let mut best = Vec::with_capacity(1 + data.len());
    best.push(MODE_PLAIN);
    best.extend_from_slice(data);

    let mut consider = |cand: Vec<u8>, best: &mut Vec<u8>| {
        if cand.len() < best.len() {
            *best = cand;
        }
    };

    // DELTA needs values inside i64 so differences stay exact.
    if values.len() > 1 && values.iter().all(|&v| v <= i64::MAX as u64) {
        let mut body = vec![MODE_DELTA];
        let mut prev: i64 = 0;
        for &v in &values {
            write_uvarint(&mut body, zigzag_encode(v as i64 - prev));
            prev = v as i64;
        }
        consider(body, &mut best);
    }

    if !values.is_empty() && values.iter().all(|&v| v <= i64::MAX as u64) {
        let mut body = vec![MODE_ZIGZAG];
        for &v in &values {
            write_uvarint(&mut body, zigzag_encode(v as i64));
        }
        consider(body, &mut best);
    }

    if values.len() > 1 {
        let mut body = vec![MODE_RLE];
        let mut i = 0;
        while i < values.len() {
            let v = values[i];
            let mut run = 1u64;
            while i + (run as usize) < values.len() && values[i + run as usize] == v {
                run += 1;
            }
            write_uvarint(&mut body, v);
            write_uvarint(&mut body, run);
            i += run as usize;
        }
        consider(body, &mut best);
    }

    if let Some(d) = dict {
        if values.len() >= SHARED_MIN_VALUES && !d.values.is_empty() {
            let mut body = vec![MODE_SHARED];
            body.extend_from_slice(&d.tag8);
            for &v in &values {
                match d.values.iter().position(|&x| x == v) {
                    Some(j) => write_uvarint(&mut body, (j + 1) as u64),
                    None => {
                        write_uvarint(&mut body, 0);
                        write_uvarint(&mut body, v);
                    }
                }
            }
            consider(body, &mut best);
        }
    }

    Ok(best)
}

pub fn decode_v1(comp: &[u8], dict: Option<&NumDict>) -> Result<Vec<u8>> {
    let (&mode, body) = comp
        .split_first()
        .ok_or_else(|| GcError::Corrupt("num_v1: empty frame".into()))?;

    let out = match mode {
        MODE_PLAIN => {
            decode_uints(body)
                .map_err(|_| GcError::Corrupt("num_v1: plain body is not a varint stream".into()))?;
            body.to_vec()
        }
        MODE_DELTA => {
            let mut values = Vec::new();
            let mut idx = 0;
            let mut prev: i64 = 0;
            while idx < body.len() {
                let d = zigzag_decode(read_uvarint(body, &mut idx)?);
                let v = prev
                    .checked_add(d)
                    .ok_or_else(|| GcError::Corrupt("num_v1: delta overflow".into()))?;
                if v < 0 {
                    return Err(GcError::Corrupt("num_v1: delta underflow".into()));
                }
                values.push(v as u64);
                prev = v;
            }
            encode_uints(&values)
        }
        MODE_ZIGZAG => {
            let mut values = Vec::new();
            let mut idx = 0;
            while idx < body.len() {
                let v = zigzag_decode(read_uvarint(body, &mut idx)?);
                if v < 0 {
                    return Err(GcError::Corrupt("num_v1: negative value in zigzag body".into()));
                }
                values.push(v as u64);
            }
            encode_uints(&values)
        }
        MODE_RLE => {
            let mut values = Vec::new();
            let mut idx = 0;
            while idx < body.len() {
                let v = read_uvarint(body, &mut idx)?;
                let run = read_uvarint(body, &mut idx)?;
                if run == 0 {
                    return Err(GcError::Corrupt("num_v1: zero-length run".into()));
                }
                if values.len() as u64 + run > MAX_LEN {
                    return Err(GcError::Corrupt("num_v1: run expansion above ceiling".into()));
                }
                for _ in 0..run {
                    values.push(v);
                }
            }
            encode_uints(&values)
        }
        MODE_SHARED => {
            if body.len() < 8 {
                return Err(GcError::Corrupt("num_v1: shared body too short".into()));
            }
            let d = dict.ok_or_else(|| {
                GcError::MissingResource("num_v1: shared dict not configured".into())
            })?;
            if body[..8] != d.tag8 {
                return Err(GcError::Corrupt("num_v1: shared dict tag mismatch".into()));
            }
            let codes = &body[8..];
            let mut values = Vec::new();
            let mut idx = 0;
            while idx < codes.len() {
                let code = read_uvarint(codes, &mut idx)?;
                if code == 0 {
                    values.push(read_uvarint(codes, &mut idx)?);
                } else {
                    let j = (code - 1) as usize;
                    let v = *d
                        .values
                        .get(j)
                        .ok_or_else(|| GcError::Corrupt("num_v1: code outside dict".into()))?;
                    values.push(v);
                }
            }
            encode_uints(&values)
        }
        other => return Err(GcError::Corrupt(format!("num_v1: unknown mode {}", other))),
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(values: &[u64]) -> Vec<u8> {
        encode_uints(values)
    }

    #[test]
    fn v0_is_validated_identity() {
        let raw = stream(&[1, 2, 3, 1000]);
        assert_eq!(encode_v0(&raw).unwrap(), raw);
        assert_eq!(decode_v0(&raw).unwrap(), raw);
        assert!(decode_v0(&[0x80]).is_err());
    }

    #[test]
    fn v1_roundtrip_each_shape() {
        let shapes: Vec<Vec<u64>> = vec![
            vec![],
            vec![7],
            vec![100, 101, 102, 103, 104, 105, 106, 107],
            vec![5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 9],
            vec![1, 1_000_000, 3, 999, 0, 42, 42, 42],
        ];
        for values in shapes {
            let raw = stream(&values);
            let comp = encode_v1(&raw, None).unwrap();
            let back = decode_v1(&comp, None).unwrap();
            assert_eq!(back, raw, "values {:?}", values);
        }
    }

    #[test]
    fn v1_picks_delta_for_ascending_runs() {
        let values: Vec<u64> = (1_000_000..1_000_100).collect();
        let raw = stream(&values);
        let comp = encode_v1(&raw, None).unwrap();
        assert_eq!(comp[0], MODE_DELTA);
        assert!(comp.len() < raw.len());
        assert_eq!(decode_v1(&comp, None).unwrap(), raw);
    }

    #[test]
    fn v1_picks_rle_for_constant_runs() {
        let values = vec![30u64; 500];
        let raw = stream(&values);
        let comp = encode_v1(&raw, None).unwrap();
        assert_eq!(comp[0], MODE_RLE);
        assert_eq!(decode_v1(&comp, None).unwrap(), raw);
    }

    #[test]
    fn v1_shared_dict_roundtrip_and_tag_check() {
        let dict = NumDict::new(vec![0, 1, 22, 30, 100]);
        let values = vec![22u64, 22, 30, 100, 0, 1, 22, 77, 22, 30, 22, 22];
        let raw = stream(&values);
        let comp = encode_v1(&raw, Some(&dict)).unwrap();
        assert_eq!(comp[0], MODE_SHARED);
        assert_eq!(decode_v1(&comp, Some(&dict)).unwrap(), raw);

        // Missing dict on decode is a resource error, not corruption.
        match decode_v1(&comp, None) {
            Err(GcError::MissingResource(_)) => {}
            other => panic!("expected MissingResource, got {:?}", other.map(|_| ())),
        }

        // A different dict has a different tag.
        let wrong = NumDict::new(vec![9, 8, 7]);
        assert!(decode_v1(&comp, Some(&wrong)).is_err());
    }

    #[test]
    fn v1_unknown_mode_is_corrupt() {
        assert!(decode_v1(&[9, 0, 0], None).is_err());
    }

    #[test]
    fn dict_tag_is_stable() {
        let a = NumDict::new(vec![1, 2, 3]);
        let b = NumDict::new(vec![1, 2, 3]);
        assert_eq!(a.tag8(), b.tag8());
    }
}
