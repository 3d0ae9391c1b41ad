//! # MBN multi-stream payload
//!
//! Self-describing bundle of independently-coded streams:
//!
//! ```text
//! "MBN" | varint(nstreams)
//!   per stream: stype u8 | codec u8 | varint(ulen) | varint(clen) |
//!               varint(mlen) | mlen meta bytes | clen comp bytes
//! ```
//!
//! Parsing is strict: every varint must terminate inside the buffer, every
//! declared length must fit, and duplicate `stype` values are rejected as
//! corrupt. Unknown codec codes fail at stream decode time; unknown stream
//! types are tolerated here (the layer simply skips them).

use crate::error::{GcError, Result};
use crate::varint::{read_len, write_uvarint};

pub const MBN_MAGIC: &[u8; 3] = b"MBN";

// Stream types (u8). Keep these stable.
pub const ST_MAIN: u8 = 0;
pub const ST_MASK: u8 = 1;
pub const ST_VOWELS: u8 = 2;
pub const ST_CONS: u8 = 3;
pub const ST_TEXT: u8 = 10;
pub const ST_NUMS: u8 = 11;
pub const ST_TPL: u8 = 20;
pub const ST_IDS: u8 = 21;
pub const ST_META: u8 = 250;

/// Sanity ceiling on the stream count of a single bundle.
const MAX_STREAMS: u64 = 10_000;

/// One stream record of a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MbnStream {
    pub stype: u8,
    pub codec: u8,
    pub ulen: usize,
    pub meta: Vec<u8>,
    pub comp: Vec<u8>,
}

pub fn is_mbn(payload: &[u8]) -> bool {
    payload.len() >= 3 && &payload[..3] == MBN_MAGIC
}

pub fn pack_mbn(streams: &[MbnStream]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MBN_MAGIC);
    write_uvarint(&mut out, streams.len() as u64);
    for s in streams {
        out.push(s.stype);
        out.push(s.codec);
        write_uvarint(&mut out, s.ulen as u64);
        write_uvarint(&mut out, s.comp.len() as u64);
        write_uvarint(&mut out, s.meta.len() as u64);
        out.extend_from_slice(&s.meta);
        out.extend_from_slice(&s.comp);
    }
    out
}

pub fn unpack_mbn(payload: &[u8]) -> Result<Vec<MbnStream>> {
    if !is_mbn(payload) {
        return Err(GcError::Corrupt("MBN: bad magic".into()));
    }
    let mut idx = 3;
    let n = read_len(payload, &mut idx)?;
    if n as u64 > MAX_STREAMS {
        return Err(GcError::Corrupt("MBN: stream count above ceiling".into()));
    }
    if n < 1 {
        return Err(GcError::Corrupt("MBN: empty bundle".into()));
    }

    let mut seen = [false; 256];
    let mut streams = Vec::with_capacity(n);
    for _ in 0..n {
        if idx + 2 > payload.len() {
            return Err(GcError::Corrupt("MBN: truncated stream header".into()));
        }
        let stype = payload[idx];
        let codec = payload[idx + 1];
        idx += 2;

        if seen[stype as usize] {
            return Err(GcError::Corrupt(format!("MBN: duplicate stype {}", stype)));
        }
        seen[stype as usize] = true;

        let ulen = read_len(payload, &mut idx)?;
        let clen = read_len(payload, &mut idx)?;
        let mlen = read_len(payload, &mut idx)?;

        let meta_end = idx
            .checked_add(mlen)
            .filter(|&e| e <= payload.len())
            .ok_or_else(|| GcError::Corrupt("MBN: truncated stream meta".into()))?;
        let meta = payload[idx..meta_end].to_vec();
        idx = meta_end;

        let comp_end = idx
            .checked_add(clen)
            .filter(|&e| e <= payload.len())
            .ok_or_else(|| GcError::Corrupt("MBN: truncated stream data".into()))?;
        let comp = payload[idx..comp_end].to_vec();
        idx = comp_end;

        streams.push(MbnStream { stype, codec, ulen, meta, comp });
    }
    Ok(streams)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_parse_roundtrip_preserves_order() {
        let streams = vec![
            MbnStream { stype: ST_TEXT, codec: 6, ulen: 5, meta: Vec::new(), comp: vec![1, 2] },
            MbnStream { stype: ST_NUMS, codec: 7, ulen: 4, meta: vec![0xFF], comp: vec![0xAA] },
        ];
        let payload = pack_mbn(&streams);
        assert_eq!(unpack_mbn(&payload).unwrap(), streams);
    }

    #[test]
    fn reference_single_stream_bytes() {
        // 1 stream, stype MAIN, codec raw, "abc".
        let payload = [
            0x4D, 0x42, 0x4E, 0x01, 0x00, 0x03, 0x03, 0x03, 0x00, 0x61, 0x62, 0x63,
        ];
        let streams = unpack_mbn(&payload).unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].stype, ST_MAIN);
        assert_eq!(streams[0].codec, 3);
        assert_eq!(streams[0].ulen, 3);
        assert!(streams[0].meta.is_empty());
        assert_eq!(streams[0].comp, b"abc");
    }

    #[test]
    fn reference_two_stream_text_nums() {
        let payload = [
            0x4D, 0x42, 0x4E, 0x02, // magic, 2 streams
            0x0A, 0x06, 0x05, 0x02, 0x00, 0x01, 0x02, // TEXT zlib ulen=5 clen=2
            0x0B, 0x07, 0x04, 0x01, 0x01, 0xFF, 0xAA, // NUMS num_v1 ulen=4 meta=FF
        ];
        let streams = unpack_mbn(&payload).unwrap();
        assert_eq!(streams.len(), 2);
        assert_eq!((streams[0].stype, streams[0].codec, streams[0].ulen), (ST_TEXT, 6, 5));
        assert_eq!(streams[0].comp, vec![0x01, 0x02]);
        assert_eq!((streams[1].stype, streams[1].codec, streams[1].ulen), (ST_NUMS, 7, 4));
        assert_eq!(streams[1].meta, vec![0xFF]);
        assert_eq!(streams[1].comp, vec![0xAA]);
    }

    #[test]
    fn duplicate_stype_is_corrupt() {
        let streams = vec![
            MbnStream { stype: ST_MAIN, codec: 3, ulen: 1, meta: Vec::new(), comp: vec![0] },
            MbnStream { stype: ST_MAIN, codec: 3, ulen: 1, meta: Vec::new(), comp: vec![1] },
        ];
        assert!(unpack_mbn(&pack_mbn(&streams)).is_err());
    }

    #[test]
    fn empty_bundle_is_corrupt() {
        assert!(unpack_mbn(&pack_mbn(&[])).is_err());
    }

    #[test]
    fn truncated_lengths_are_corrupt() {
        let streams = vec![MbnStream {
            stype: ST_MAIN,
            codec: 3,
            ulen: 3,
            meta: Vec::new(),
            comp: b"abc".to_vec(),
        }];
        let payload = pack_mbn(&streams);
        assert!(unpack_mbn(&payload[..payload.len() - 1]).is_err());
    }
}
