//! # Semantic layers
//!
//! A layer is a reversible transform from input bytes to one or more named
//! symbol streams plus optional metadata. The container stores the numeric
//! layer code, so the mapping must never change once files exist:
//!
//! | code | layer |
//! |---|---|
//! | 0 | `bytes` |
//! | 1 | `syllables_it` |
//! | 2 | `words_it` |
//! | 3 | `vc0` |
//! | 4 | `lines_dict` |
//! | 5 | `lines_rle` |
//! | 6 | `split_text_nums` |
//! | 7 | `tpl_lines_v0` |
//! | 8 | `tpl_lines_shared_v0` |
//!
//! Contract: for every layer `L` and input `x`,
//! `decode(encode(x).streams, encode(x).meta) == x` bytewise. Text-centric
//! layers refuse inapplicable input (non-UTF-8, embedded NUL) instead of
//! degrading to a lossy transform.

pub mod simple;
pub mod split_text_nums;
pub mod tpl_lines;
pub mod vocab;

use std::collections::BTreeMap;

use crate::codecs::NumDict;
use crate::error::{GcError, Result};
use crate::mbn::{ST_CONS, ST_IDS, ST_MAIN, ST_MASK, ST_META, ST_NUMS, ST_TEXT, ST_TPL, ST_VOWELS};
pub use tpl_lines::TplDict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LayerId {
    Bytes,
    SyllablesIt,
    WordsIt,
    Vc0,
    LinesDict,
    LinesRle,
    SplitTextNums,
    TplLinesV0,
    TplLinesSharedV0,
}

impl LayerId {
    pub fn code(self) -> u8 {
        match self {
            LayerId::Bytes => 0,
            LayerId::SyllablesIt => 1,
            LayerId::WordsIt => 2,
            LayerId::Vc0 => 3,
            LayerId::LinesDict => 4,
            LayerId::LinesRle => 5,
            LayerId::SplitTextNums => 6,
            LayerId::TplLinesV0 => 7,
            LayerId::TplLinesSharedV0 => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => LayerId::Bytes,
            1 => LayerId::SyllablesIt,
            2 => LayerId::WordsIt,
            3 => LayerId::Vc0,
            4 => LayerId::LinesDict,
            5 => LayerId::LinesRle,
            6 => LayerId::SplitTextNums,
            7 => LayerId::TplLinesV0,
            8 => LayerId::TplLinesSharedV0,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            LayerId::Bytes => "bytes",
            LayerId::SyllablesIt => "syllables_it",
            LayerId::WordsIt => "words_it",
            LayerId::Vc0 => "vc0",
            LayerId::LinesDict => "lines_dict",
            LayerId::LinesRle => "lines_rle",
            LayerId::SplitTextNums => "split_text_nums",
            LayerId::TplLinesV0 => "tpl_lines_v0",
            LayerId::TplLinesSharedV0 => "tpl_lines_shared_v0",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "bytes" => LayerId::Bytes,
            "syllables_it" => LayerId::SyllablesIt,
            "words_it" => LayerId::WordsIt,
            "vc0" => LayerId::Vc0,
            "lines_dict" => LayerId::LinesDict,
            "lines_rle" => LayerId::LinesRle,
            "split_text_nums" => LayerId::SplitTextNums,
            "tpl_lines_v0" => LayerId::TplLinesV0,
            "tpl_lines_shared_v0" => LayerId::TplLinesSharedV0,
            _ => return None,
        })
    }

    /// Stream roles this layer emits, in emission order (META excluded).
    pub fn stream_types(self) -> &'static [u8] {
        match self {
            LayerId::Vc0 => &[ST_MASK, ST_VOWELS, ST_CONS],
            LayerId::SplitTextNums => &[ST_TEXT, ST_NUMS],
            LayerId::TplLinesV0 | LayerId::TplLinesSharedV0 => &[ST_TPL, ST_IDS, ST_NUMS],
            _ => &[ST_MAIN],
        }
    }
}

/// Optional bucket-level context consulted by shared-dict layers and codecs.
#[derive(Debug, Default, Clone)]
pub struct LayerEnv {
    pub tpl_dict: Option<TplDict>,
    pub num_dict: Option<NumDict>,
}

/// Result of a layer encode: raw streams in emission order plus packed meta
/// (empty when the layer has none).
#[derive(Debug, Clone)]
pub struct Encoded {
    pub streams: Vec<(u8, Vec<u8>)>,
    pub meta: Vec<u8>,
}

pub type StreamMap = BTreeMap<u8, Vec<u8>>;

pub fn encode(layer: LayerId, data: &[u8], env: &LayerEnv) -> Result<Encoded> {
    match layer {
        LayerId::Bytes => simple::encode_bytes(data),
        LayerId::Vc0 => simple::encode_vc0(data),
        LayerId::SyllablesIt => vocab::encode_syllables(data),
        LayerId::WordsIt => vocab::encode_words(data),
        LayerId::LinesDict => vocab::encode_lines_dict(data),
        LayerId::LinesRle => vocab::encode_lines_rle(data),
        LayerId::SplitTextNums => split_text_nums::encode(data),
        LayerId::TplLinesV0 => tpl_lines::encode_v0(data),
        LayerId::TplLinesSharedV0 => tpl_lines::encode_shared(data, env.tpl_dict.as_ref()),
    }
}

pub fn decode(layer: LayerId, streams: &StreamMap, meta: &[u8], env: &LayerEnv) -> Result<Vec<u8>> {
    match layer {
        LayerId::Bytes => Ok(main_stream(streams).to_vec()),
        LayerId::Vc0 => simple::decode_vc0(
            stream_or_empty(streams, ST_MASK),
            stream_or_empty(streams, ST_VOWELS),
            stream_or_empty(streams, ST_CONS),
        ),
        LayerId::SyllablesIt | LayerId::WordsIt => {
            vocab::decode_ids_with_vocab(main_stream(streams), meta)
        }
        LayerId::LinesDict => vocab::decode_ids_with_vocab(main_stream(streams), meta),
        LayerId::LinesRle => vocab::decode_lines_rle(main_stream(streams), meta),
        LayerId::SplitTextNums => split_text_nums::decode(
            stream_or_empty(streams, ST_TEXT),
            stream_or_empty(streams, ST_NUMS),
            meta,
        ),
        LayerId::TplLinesV0 => tpl_lines::decode_v0(
            stream_or_empty(streams, ST_TPL),
            stream_or_empty(streams, ST_IDS),
            stream_or_empty(streams, ST_NUMS),
            meta,
        ),
        LayerId::TplLinesSharedV0 => tpl_lines::decode_shared(
            stream_or_empty(streams, ST_TPL),
            stream_or_empty(streams, ST_IDS),
            stream_or_empty(streams, ST_NUMS),
            meta,
            env.tpl_dict.as_ref(),
        ),
    }
}

fn stream_or_empty(streams: &StreamMap, stype: u8) -> &[u8] {
    streams.get(&stype).map(Vec::as_slice).unwrap_or(&[])
}

/// MAIN stream, or the first non-META stream as fallback (lowest stype wins).
fn main_stream(streams: &StreamMap) -> &[u8] {
    if let Some(main) = streams.get(&ST_MAIN) {
        return main;
    }
    for (&stype, data) in streams {
        if stype != ST_META {
            return data;
        }
    }
    &[]
}

/// Convenience used by tests and the pipeline engine: roundtrip through a
/// layer without any container framing.
pub fn roundtrip_check(layer: LayerId, data: &[u8], env: &LayerEnv) -> Result<()> {
    let enc = encode(layer, data, env)?;
    let map: StreamMap = enc.streams.iter().cloned().collect();
    let back = decode(layer, &map, &enc.meta, env)?;
    if back != data {
        return Err(GcError::Corrupt(format!(
            "layer {}: roundtrip mismatch",
            layer.name()
        )));
    }
    Ok(())
}
