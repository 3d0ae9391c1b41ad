//! # Container v6
//!
//! Outer file framing and the compress/decompress engine on top of it.
//!
//! ```text
//! "GCC" | version=6 u8 | flags u8 | layer_code u8 | codec_code u8
//!   [flags & F_HAS_META]        varint(meta_len) | meta bytes
//!   [flags & F_HAS_PAYLOAD_LEN] varint(payload_len)
//! payload (rest of file when no payload length)
//! ```
//!
//! The writer convention: when the payload is MBN and the layer has meta, the
//! meta rides in the META stream (compressible); the header meta slot is used
//! only on the single-codec path. Reserved flag bits are an unsupported
//! version, unknown layer/codec codes are corruption.

use std::collections::BTreeMap;

use crate::codecs::{self, CodecId};
use crate::error::{GcError, Result};
use crate::layers::{self, LayerEnv, LayerId, StreamMap};
use crate::mbn::{self, MbnStream, ST_META};
use crate::varint::{read_len, write_uvarint};

pub const MAGIC: &[u8; 3] = b"GCC";
pub const VER_V6: u8 = 6;

pub const F_HAS_META: u8 = 0x01;
pub const F_HAS_PAYLOAD_LEN: u8 = 0x02;
/// Payload is an out-of-band lossy artifact; not part of the roundtrip contract.
pub const F_KIND_EXTRACT: u8 = 0x80;

const KNOWN_FLAGS: u8 = F_HAS_META | F_HAS_PAYLOAD_LEN | F_KIND_EXTRACT;

#[derive(Debug)]
pub struct V6Header<'a> {
    pub layer: LayerId,
    pub codec: CodecId,
    pub is_extract: bool,
    pub meta: &'a [u8],
    pub payload: &'a [u8],
}

pub fn is_container_v6(blob: &[u8]) -> bool {
    blob.len() >= 5 && &blob[..3] == MAGIC && blob[3] == VER_V6
}

pub fn pack_container_v6(
    payload: &[u8],
    layer: LayerId,
    codec: CodecId,
    meta: &[u8],
    is_extract: bool,
) -> Vec<u8> {
    let mut flags = 0u8;
    if is_extract {
        flags |= F_KIND_EXTRACT;
    }
    if !meta.is_empty() {
        flags |= F_HAS_META;
    }

    let mut out = Vec::with_capacity(7 + meta.len() + payload.len());
    out.extend_from_slice(MAGIC);
    out.push(VER_V6);
    out.push(flags);
    out.push(layer.code());
    out.push(codec.code());
    if !meta.is_empty() {
        write_uvarint(&mut out, meta.len() as u64);
        out.extend_from_slice(meta);
    }
    // Payload length omitted: payload spans to end of file.
    out.extend_from_slice(payload);
    out
}

pub fn unpack_container_v6(blob: &[u8]) -> Result<V6Header<'_>> {
    if blob.len() < 7 {
        return Err(GcError::Corrupt("v6: blob too short".into()));
    }
    if &blob[..3] != MAGIC {
        return Err(GcError::Corrupt("v6: bad magic".into()));
    }
    if blob[3] != VER_V6 {
        return Err(GcError::UnsupportedVersion(format!(
            "v6 reader: container version {}",
            blob[3]
        )));
    }

    let flags = blob[4];
    if flags & !KNOWN_FLAGS != 0 {
        return Err(GcError::UnsupportedVersion(format!(
            "v6: reserved flag bits set: 0x{:02x}",
            flags & !KNOWN_FLAGS
        )));
    }

    let layer = LayerId::from_code(blob[5])
        .ok_or_else(|| GcError::Corrupt(format!("v6: unknown layer code {}", blob[5])))?;
    let codec = CodecId::from_code(blob[6])
        .ok_or_else(|| GcError::Corrupt(format!("v6: unknown codec code {}", blob[6])))?;

    let mut idx = 7;
    let meta: &[u8] = if flags & F_HAS_META != 0 {
        let mlen = read_len(blob, &mut idx)?;
        let end = idx
            .checked_add(mlen)
            .filter(|&e| e <= blob.len())
            .ok_or_else(|| GcError::Corrupt("v6: truncated meta".into()))?;
        let m = &blob[idx..end];
        idx = end;
        m
    } else {
        &[]
    };

    let payload: &[u8] = if flags & F_HAS_PAYLOAD_LEN != 0 {
        let plen = read_len(blob, &mut idx)?;
        let end = idx
            .checked_add(plen)
            .filter(|&e| e <= blob.len())
            .ok_or_else(|| GcError::Corrupt("v6: truncated payload".into()))?;
        &blob[idx..end]
    } else {
        &blob[idx..]
    };

    Ok(V6Header {
        layer,
        codec,
        is_extract: flags & F_KIND_EXTRACT != 0,
        meta,
        payload,
    })
}

/// Single-codec container: the layer must produce exactly one stream, which is
/// compressed as the whole payload; layer meta rides in the header slot.
pub fn compress_v6(data: &[u8], layer: LayerId, codec: CodecId, env: &LayerEnv) -> Result<Vec<u8>> {
    if codec == CodecId::Mbn {
        return Err(GcError::Usage("v6: mbn is chosen by the engine, not as a stream codec".into()));
    }
    let enc = layers::encode(layer, data, env)?;
    if enc.streams.len() != 1 {
        return Err(GcError::Usage(format!(
            "v6: layer {} produces {} streams, MBN framing required",
            layer.name(),
            enc.streams.len()
        )));
    }
    let comp = codecs::encode(codec, &enc.streams[0].1, env.num_dict.as_ref())?;
    Ok(pack_container_v6(&comp, layer, codec, &enc.meta, false))
}

/// MBN container: every stream is compressed with its assigned codec, layer
/// meta (if any) becomes a raw-coded META stream, and the container codec
/// code is `mbn`.
pub fn compress_v6_mbn(
    data: &[u8],
    layer: LayerId,
    default_codec: CodecId,
    stream_codecs: &BTreeMap<u8, CodecId>,
    env: &LayerEnv,
) -> Result<Vec<u8>> {
    if default_codec == CodecId::Mbn || stream_codecs.values().any(|&c| c == CodecId::Mbn) {
        return Err(GcError::Usage("v6: mbn cannot compress an individual stream".into()));
    }

    let enc = layers::encode(layer, data, env)?;

    let mut records: Vec<MbnStream> = Vec::with_capacity(enc.streams.len() + 1);
    for (stype, raw) in &enc.streams {
        let codec = stream_codecs.get(stype).copied().unwrap_or(default_codec);
        let comp = codecs::encode(codec, raw, env.num_dict.as_ref())?;
        records.push(MbnStream {
            stype: *stype,
            codec: codec.code(),
            ulen: raw.len(),
            meta: Vec::new(),
            comp,
        });
    }
    if !enc.meta.is_empty() {
        records.push(MbnStream {
            stype: ST_META,
            codec: CodecId::Raw.code(),
            ulen: enc.meta.len(),
            meta: Vec::new(),
            comp: enc.meta.clone(),
        });
    }

    let payload = mbn::pack_mbn(&records);
    Ok(pack_container_v6(&payload, layer, CodecId::Mbn, &[], false))
}

/// Decode a v6 container back to the original bytes.
pub fn decompress_v6(blob: &[u8], env: &LayerEnv) -> Result<Vec<u8>> {
    let h = unpack_container_v6(blob)?;
    if h.is_extract {
        return Err(GcError::Usage(
            "container is a lossy extract artifact, not a compressed file".into(),
        ));
    }

    if mbn::is_mbn(h.payload) {
        let records = mbn::unpack_mbn(h.payload)?;

        let mut streams: StreamMap = StreamMap::new();
        let mut meta: Vec<u8> = Vec::new();
        for rec in records {
            let codec = CodecId::from_code(rec.codec)
                .ok_or_else(|| GcError::Corrupt(format!("MBN: unknown codec code {}", rec.codec)))?;
            let raw = codecs::decode(codec, &rec.comp, Some(rec.ulen), env.num_dict.as_ref())?;
            if rec.stype == ST_META {
                meta = raw;
            } else {
                streams.insert(rec.stype, raw);
            }
        }
        return layers::decode(h.layer, &streams, &meta, env);
    }

    if h.codec == CodecId::Mbn {
        return Err(GcError::Corrupt("v6: codec mbn but payload is not a bundle".into()));
    }
    if h.layer.stream_types().len() > 1 {
        return Err(GcError::Corrupt(format!(
            "v6: layer {} requires a bundle payload",
            h.layer.name()
        )));
    }

    let raw = codecs::decode(h.codec, h.payload, None, env.num_dict.as_ref())?;
    let mut streams = StreamMap::new();
    streams.insert(mbn::ST_MAIN, raw);
    layers::decode(h.layer, &streams, h.meta, env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_header_bytes() {
        // (layer split_text_nums=6, codec mbn=4, empty meta) -> 47 43 43 06 00 06 04
        let blob = pack_container_v6(b"MBN...", LayerId::SplitTextNums, CodecId::Mbn, &[], false);
        assert_eq!(&blob[..7], &[0x47, 0x43, 0x43, 0x06, 0x00, 0x06, 0x04]);
    }

    #[test]
    fn header_roundtrip_with_meta() {
        let blob = pack_container_v6(b"payload", LayerId::Bytes, CodecId::Zlib, b"mm", true);
        let h = unpack_container_v6(&blob).unwrap();
        assert_eq!(h.layer, LayerId::Bytes);
        assert_eq!(h.codec, CodecId::Zlib);
        assert!(h.is_extract);
        assert_eq!(h.meta, b"mm");
        assert_eq!(h.payload, b"payload");
    }

    #[test]
    fn payload_len_flag_is_honored() {
        // Hand-build a header with F_HAS_PAYLOAD_LEN and trailing garbage.
        let mut blob = Vec::new();
        blob.extend_from_slice(MAGIC);
        blob.push(VER_V6);
        blob.push(F_HAS_PAYLOAD_LEN);
        blob.push(LayerId::Bytes.code());
        blob.push(CodecId::Raw.code());
        blob.push(3); // varint payload_len
        blob.extend_from_slice(b"abcXXXX");
        let h = unpack_container_v6(&blob).unwrap();
        assert_eq!(h.payload, b"abc");
    }

    #[test]
    fn bad_magic_is_corrupt_and_bad_version_is_unsupported() {
        let blob = pack_container_v6(b"p", LayerId::Bytes, CodecId::Raw, &[], false);
        let mut wrong_magic = blob.clone();
        wrong_magic[0] = b'X';
        assert!(matches!(unpack_container_v6(&wrong_magic), Err(GcError::Corrupt(_))));

        let mut wrong_ver = blob.clone();
        wrong_ver[3] = 9;
        assert!(matches!(
            unpack_container_v6(&wrong_ver),
            Err(GcError::UnsupportedVersion(_))
        ));

        let mut reserved_flag = blob;
        reserved_flag[4] |= 0x10;
        assert!(matches!(
            unpack_container_v6(&reserved_flag),
            Err(GcError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn unknown_layer_or_codec_code_is_corrupt() {
        let blob = pack_container_v6(b"p", LayerId::Bytes, CodecId::Raw, &[], false);
        let mut bad_layer = blob.clone();
        bad_layer[5] = 200;
        assert!(matches!(unpack_container_v6(&bad_layer), Err(GcError::Corrupt(_))));
        let mut bad_codec = blob;
        bad_codec[6] = 200;
        assert!(matches!(unpack_container_v6(&bad_codec), Err(GcError::Corrupt(_))));
    }

    #[test]
    fn single_codec_roundtrip() {
        let env = LayerEnv::default();
        let data = b"plain bytes with 123 numbers";
        for codec in [CodecId::Raw, CodecId::Zlib, CodecId::Zstd, CodecId::ZstdTight, CodecId::Huffman] {
            let blob = compress_v6(data, LayerId::Bytes, codec, &env).unwrap();
            assert_eq!(decompress_v6(&blob, &env).unwrap(), data);
        }
    }

    #[test]
    fn mbn_roundtrip_with_per_stream_codecs() {
        let env = LayerEnv::default();
        let data = b"RIGA 1 QTA 10 PREZZO 0.75\nRIGA 2 QTA 20 PREZZO 0.85\n";
        let mut sc = BTreeMap::new();
        sc.insert(mbn::ST_TEXT, CodecId::Zlib);
        sc.insert(mbn::ST_NUMS, CodecId::NumV1);
        let blob =
            compress_v6_mbn(data, LayerId::SplitTextNums, CodecId::Zlib, &sc, &env).unwrap();
        let h = unpack_container_v6(&blob).unwrap();
        assert_eq!(h.codec, CodecId::Mbn);
        assert!(mbn::is_mbn(h.payload));
        assert_eq!(decompress_v6(&blob, &env).unwrap(), data);
    }

    #[test]
    fn mbn_roundtrip_all_multistream_layers() {
        let env = LayerEnv::default();
        let data = b"FATTURA 77\nRIGA vite QTA 9\nRIGA dado QTA 12\n";
        for layer in [
            LayerId::Vc0,
            LayerId::SplitTextNums,
            LayerId::TplLinesV0,
            LayerId::TplLinesSharedV0,
            LayerId::SyllablesIt,
            LayerId::WordsIt,
            LayerId::LinesDict,
            LayerId::LinesRle,
        ] {
            let blob =
                compress_v6_mbn(data, layer, CodecId::Zlib, &BTreeMap::new(), &env).unwrap();
            assert_eq!(decompress_v6(&blob, &env).unwrap(), data, "layer {}", layer.name());
        }
    }

    #[test]
    fn multistream_layer_requires_mbn_on_single_path() {
        let env = LayerEnv::default();
        assert!(matches!(
            compress_v6(b"abc", LayerId::Vc0, CodecId::Zlib, &env),
            Err(GcError::Usage(_))
        ));
    }

    #[test]
    fn ulen_tamper_is_detected() {
        let env = LayerEnv::default();
        let data = b"numbers 123 and 456";
        let blob =
            compress_v6_mbn(data, LayerId::SplitTextNums, CodecId::Zlib, &BTreeMap::new(), &env)
                .unwrap();
        // Flip a ulen varint inside the bundle: find the MBN payload and bump
        // the first stream's ulen byte.
        let h = unpack_container_v6(&blob).unwrap();
        let payload_at = blob.len() - h.payload.len();
        let mut tampered = blob.clone();
        // stream header starts after "MBN" + nstreams varint: stype, codec, ulen...
        tampered[payload_at + 6] ^= 0x01;
        assert!(decompress_v6(&tampered, &env).is_err());
    }
}
