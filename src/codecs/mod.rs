//! # Codec registry
//!
//! Byte-to-byte compressors with stable numeric codes. The container stores
//! only the code, so the mapping must never change once files exist:
//!
//! | code | codec |
//! |---|---|
//! | 0 | `huffman` |
//! | 1 | `zstd` |
//! | 2 | `zstd_tight` |
//! | 3 | `raw` |
//! | 4 | `mbn` (meta-codec: payload is a multi-stream bundle) |
//! | 5 | `num_v0` |
//! | 6 | `zlib` |
//! | 7 | `num_v1` |
//!
//! Uniform contract: `encode(bytes) -> bytes`, `decode(bytes, ulen) -> bytes`
//! where `ulen` is the expected decompressed length, used as a post-condition
//! check whenever the caller knows it.

pub mod huffman;
pub mod num;

use std::io::Write;

use crate::error::{GcError, Result};
pub use num::NumDict;

/// zstd level used by both zstd codecs, matching the archival default.
const ZSTD_LEVEL: i32 = 19;
/// zlib level for the zlib codec.
const ZLIB_LEVEL: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CodecId {
    Huffman,
    Zstd,
    ZstdTight,
    Raw,
    Mbn,
    NumV0,
    Zlib,
    NumV1,
}

impl CodecId {
    pub fn code(self) -> u8 {
        match self {
            CodecId::Huffman => 0,
            CodecId::Zstd => 1,
            CodecId::ZstdTight => 2,
            CodecId::Raw => 3,
            CodecId::Mbn => 4,
            CodecId::NumV0 => 5,
            CodecId::Zlib => 6,
            CodecId::NumV1 => 7,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => CodecId::Huffman,
            1 => CodecId::Zstd,
            2 => CodecId::ZstdTight,
            3 => CodecId::Raw,
            4 => CodecId::Mbn,
            5 => CodecId::NumV0,
            6 => CodecId::Zlib,
            7 => CodecId::NumV1,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            CodecId::Huffman => "huffman",
            CodecId::Zstd => "zstd",
            CodecId::ZstdTight => "zstd_tight",
            CodecId::Raw => "raw",
            CodecId::Mbn => "mbn",
            CodecId::NumV0 => "num_v0",
            CodecId::Zlib => "zlib",
            CodecId::NumV1 => "num_v1",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "huffman" => CodecId::Huffman,
            "zstd" => CodecId::Zstd,
            "zstd_tight" => CodecId::ZstdTight,
            "raw" => CodecId::Raw,
            "mbn" => CodecId::Mbn,
            "num_v0" => CodecId::NumV0,
            "zlib" => CodecId::Zlib,
            "num_v1" => CodecId::NumV1,
            _ => return None,
        })
    }
}

/// Compress `data` under `id`. `num_dict` is the optional bucket-level shared
/// dictionary consulted only by `num_v1`.
pub fn encode(id: CodecId, data: &[u8], num_dict: Option<&NumDict>) -> Result<Vec<u8>> {
    match id {
        CodecId::Raw => Ok(data.to_vec()),
        CodecId::Zlib => {
            let mut enc = flate2::write::ZlibEncoder::new(
                Vec::new(),
                flate2::Compression::new(ZLIB_LEVEL),
            );
            enc.write_all(data)
                .and_then(|_| enc.finish())
                .map_err(|e| GcError::Corrupt(format!("zlib encode: {}", e)))
        }
        CodecId::Zstd => zstd::stream::encode_all(data, ZSTD_LEVEL)
            .map_err(|e| GcError::Corrupt(format!("zstd encode: {}", e))),
        CodecId::ZstdTight => {
            // Tight frames drop the content-size field and checksum to shave
            // the per-frame overhead on tiny streams.
            let mut enc = zstd::stream::Encoder::new(Vec::new(), ZSTD_LEVEL)
                .map_err(|e| GcError::Corrupt(format!("zstd encoder: {}", e)))?;
            enc.include_checksum(false)
                .map_err(|e| GcError::Corrupt(format!("zstd encoder: {}", e)))?;
            enc.include_contentsize(false)
                .map_err(|e| GcError::Corrupt(format!("zstd encoder: {}", e)))?;
            enc.write_all(data)
                .map_err(|e| GcError::Corrupt(format!("zstd encode: {}", e)))?;
            enc.finish()
                .map_err(|e| GcError::Corrupt(format!("zstd encode: {}", e)))
        }
        CodecId::Huffman => Ok(huffman::encode(data)),
        CodecId::NumV0 => num::encode_v0(data),
        CodecId::NumV1 => num::encode_v1(data, num_dict),
        CodecId::Mbn => Err(GcError::Usage(
            "mbn is a payload framing, not a stream codec".into(),
        )),
    }
}

/// Decompress `comp` under `id`. When `ulen` is known the decompressed length
/// is validated against it.
pub fn decode(
    id: CodecId,
    comp: &[u8],
    ulen: Option<usize>,
    num_dict: Option<&NumDict>,
) -> Result<Vec<u8>> {
    let out = match id {
        CodecId::Raw => comp.to_vec(),
        CodecId::Zlib => {
            use std::io::Read;
            let mut dec = flate2::read::ZlibDecoder::new(comp);
            let mut out = Vec::new();
            dec.read_to_end(&mut out)
                .map_err(|e| GcError::Corrupt(format!("zlib decode: {}", e)))?;
            out
        }
        CodecId::Zstd | CodecId::ZstdTight => zstd::stream::decode_all(comp)
            .map_err(|e| GcError::Corrupt(format!("zstd decode: {}", e)))?,
        CodecId::Huffman => huffman::decode(comp)?,
        CodecId::NumV0 => num::decode_v0(comp)?,
        CodecId::NumV1 => num::decode_v1(comp, num_dict)?,
        CodecId::Mbn => {
            return Err(GcError::Corrupt(
                "mbn payload reached the stream-codec decoder".into(),
            ))
        }
    };
    if let Some(n) = ulen {
        if out.len() != n {
            return Err(GcError::Corrupt(format!(
                "{}: length mismatch after decompression: got={} expected={}",
                id.name(),
                out.len(),
                n
            )));
        }
    }
    Ok(out)
}
