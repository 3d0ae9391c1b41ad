//! Pipeline spec (v1) and the file-mode engine.
//!
//! A pipeline spec is a small, strict JSON object making encode plans
//! reproducible:
//!
//! ```json
//! {
//!   "spec": "gcc-ocf.pipeline.v1",
//!   "name": "text-nums",
//!   "layer": "split_text_nums",
//!   "codec": "zlib",
//!   "stream_codecs": { "TEXT": "zlib", "NUMS": "num_v1" },
//!   "mbn": true
//! }
//! ```
//!
//! Unknown keys are rejected. `codec` defaults to `zlib`; `mbn` is tri-state
//! (forced on, forbidden, or auto: MBN iff the layer has more than one stream
//! or `stream_codecs` is set).

use std::collections::BTreeMap;

use crate::codecs::CodecId;
use crate::container::{compress_v6, compress_v6_mbn};
use crate::error::{GcError, Result};
use crate::layers::{LayerEnv, LayerId};
use crate::mbn::{ST_CONS, ST_IDS, ST_MAIN, ST_MASK, ST_META, ST_NUMS, ST_TEXT, ST_TPL, ST_VOWELS};

pub const SPEC_ID_V1: &str = "gcc-ocf.pipeline.v1";

/// A single lossless encode plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSpec {
    pub name: String,
    pub layer: LayerId,
    pub codec: CodecId,
    /// Per-stream codec overrides keyed by stype.
    pub stream_codecs: Option<BTreeMap<u8, CodecId>>,
    pub mbn: Option<bool>,
}

impl PipelineSpec {
    pub fn new(layer: LayerId, codec: CodecId) -> Self {
        PipelineSpec { name: "pipeline".into(), layer, codec, stream_codecs: None, mbn: None }
    }

    /// Canonical `TEXT:zlib,NUMS:num_v1` rendering, deterministic order.
    pub fn stream_codecs_spec(&self) -> Option<String> {
        let sc = self.stream_codecs.as_ref()?;
        if sc.is_empty() {
            return None;
        }
        let mut parts: Vec<String> = sc
            .iter()
            .map(|(&stype, codec)| format!("{}:{}", stream_name(stype), codec.name()))
            .collect();
        parts.sort();
        Some(parts.join(","))
    }
}

pub fn stream_name(stype: u8) -> &'static str {
    match stype {
        ST_MAIN => "MAIN",
        ST_MASK => "MASK",
        ST_VOWELS => "VOWELS",
        ST_CONS => "CONS",
        ST_TEXT => "TEXT",
        ST_NUMS => "NUMS",
        ST_TPL => "TPL",
        ST_IDS => "IDS",
        ST_META => "META",
        _ => "?",
    }
}

pub fn stream_by_name(name: &str) -> Option<u8> {
    Some(match name {
        "MAIN" => ST_MAIN,
        "MASK" => ST_MASK,
        "VOWELS" => ST_VOWELS,
        "CONS" => ST_CONS,
        "TEXT" => ST_TEXT,
        "NUMS" => ST_NUMS,
        "TPL" => ST_TPL,
        "IDS" => ST_IDS,
        "META" => ST_META,
        _ => return None,
    })
}

/// Load a pipeline spec from inline JSON or `@file.json`.
pub fn load_pipeline_spec(arg: &str) -> Result<PipelineSpec> {
    let text = read_json_arg(arg)?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| GcError::Usage(format!("pipeline: invalid JSON: {}", e)))?;
    parse_pipeline_spec(&value)
}

pub(crate) fn read_json_arg(arg: &str) -> Result<String> {
    let s = arg.trim();
    if s.is_empty() {
        return Err(GcError::Usage("pipeline: empty argument".into()));
    }
    if let Some(path) = s.strip_prefix('@') {
        return std::fs::read_to_string(path)
            .map_err(|e| GcError::Usage(format!("pipeline: cannot read {}: {}", path, e)));
    }
    Ok(s.to_string())
}

pub fn parse_pipeline_spec(value: &serde_json::Value) -> Result<PipelineSpec> {
    let obj = value
        .as_object()
        .ok_or_else(|| GcError::Usage("pipeline: JSON must be an object".into()))?;

    const ALLOWED: [&str; 6] = ["spec", "name", "layer", "codec", "stream_codecs", "mbn"];
    let mut extra: Vec<&str> = obj
        .keys()
        .map(String::as_str)
        .filter(|k| !ALLOWED.contains(k))
        .collect();
    extra.sort_unstable();
    if !extra.is_empty() {
        return Err(GcError::Usage(format!(
            "pipeline: unsupported keys: {}",
            extra.join(", ")
        )));
    }

    match obj.get("spec").and_then(|v| v.as_str()) {
        Some(SPEC_ID_V1) => {}
        other => {
            return Err(GcError::Usage(format!(
                "pipeline: unsupported spec {:?} (expected {:?})",
                other, SPEC_ID_V1
            )))
        }
    }

    let name = match obj.get("name") {
        None => "pipeline".to_string(),
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(_) => return Err(GcError::Usage("pipeline: 'name' must be a string".into())),
    };

    let layer_name = obj
        .get("layer")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GcError::Usage("pipeline: 'layer' is required".into()))?;
    let layer = LayerId::from_name(layer_name)
        .ok_or_else(|| GcError::Usage(format!("pipeline: unknown layer {:?}", layer_name)))?;

    let codec = match obj.get("codec") {
        None => CodecId::Zlib,
        Some(serde_json::Value::String(s)) => CodecId::from_name(s.trim())
            .ok_or_else(|| GcError::Usage(format!("pipeline: unknown codec {:?}", s)))?,
        Some(_) => return Err(GcError::Usage("pipeline: 'codec' must be a string".into())),
    };

    let stream_codecs = match obj.get("stream_codecs") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => Some(parse_stream_codecs(v)?),
    };

    let mbn = match obj.get("mbn") {
        None => None,
        Some(serde_json::Value::Bool(b)) => Some(*b),
        Some(_) => return Err(GcError::Usage("pipeline: 'mbn' must be a boolean".into())),
    };

    Ok(PipelineSpec { name, layer, codec, stream_codecs, mbn })
}

pub(crate) fn parse_stream_codecs(value: &serde_json::Value) -> Result<BTreeMap<u8, CodecId>> {
    let obj = value
        .as_object()
        .ok_or_else(|| GcError::Usage("'stream_codecs' must be an object".into()))?;
    let mut out = BTreeMap::new();
    for (k, v) in obj {
        let stype = stream_by_name(k.trim().to_uppercase().as_str())
            .ok_or_else(|| GcError::Usage(format!("stream_codecs: unknown stream {:?}", k)))?;
        let codec_name = v
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GcError::Usage(format!("stream_codecs[{:?}] must be a codec id", k)))?;
        let codec = CodecId::from_name(codec_name)
            .ok_or_else(|| GcError::Usage(format!("stream_codecs: unknown codec {:?}", codec_name)))?;
        out.insert(stype, codec);
    }
    Ok(out)
}

/// Parse a `TEXT:zlib,NUMS:num_v1` style override string.
pub fn parse_stream_codecs_arg(arg: &str) -> Result<BTreeMap<u8, CodecId>> {
    let mut out = BTreeMap::new();
    for part in arg.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, codec_name) = part
            .split_once(':')
            .ok_or_else(|| GcError::Usage(format!("stream codec {:?} must be NAME:codec", part)))?;
        let stype = stream_by_name(name.trim().to_uppercase().as_str())
            .ok_or_else(|| GcError::Usage(format!("unknown stream {:?}", name)))?;
        let codec = CodecId::from_name(codec_name.trim())
            .ok_or_else(|| GcError::Usage(format!("unknown codec {:?}", codec_name)))?;
        out.insert(stype, codec);
    }
    Ok(out)
}

/// File-mode engine: run a pipeline spec over one input, producing a v6
/// container. Single stream + no per-stream codecs + MBN not forced means the
/// codec output is the raw payload; anything else gets MBN framing.
pub fn run_pipeline(spec: &PipelineSpec, data: &[u8], env: &LayerEnv) -> Result<Vec<u8>> {
    let multi_stream = spec.layer.stream_types().len() > 1;
    let wants_mbn = match spec.mbn {
        Some(true) => true,
        Some(false) => {
            if multi_stream {
                return Err(GcError::Usage(format!(
                    "pipeline: layer {} needs MBN framing but the spec forbids it",
                    spec.layer.name()
                )));
            }
            false
        }
        None => multi_stream || spec.stream_codecs.is_some(),
    };

    if wants_mbn {
        let empty = BTreeMap::new();
        let sc = spec.stream_codecs.as_ref().unwrap_or(&empty);
        compress_v6_mbn(data, spec.layer, spec.codec, sc, env)
    } else {
        compress_v6(data, spec.layer, spec.codec, env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::decompress_v6;

    #[test]
    fn spec_parses_with_defaults() {
        let spec = load_pipeline_spec(r#"{"spec":"gcc-ocf.pipeline.v1","layer":"bytes"}"#).unwrap();
        assert_eq!(spec.layer, LayerId::Bytes);
        assert_eq!(spec.codec, CodecId::Zlib);
        assert_eq!(spec.name, "pipeline");
        assert!(spec.stream_codecs.is_none());
        assert!(spec.mbn.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = load_pipeline_spec(
            r#"{"spec":"gcc-ocf.pipeline.v1","layer":"bytes","surprise":1}"#,
        )
        .unwrap_err();
        assert!(matches!(err, GcError::Usage(_)));
    }

    #[test]
    fn wrong_schema_id_is_rejected() {
        assert!(load_pipeline_spec(r#"{"spec":"nope","layer":"bytes"}"#).is_err());
    }

    #[test]
    fn stream_codecs_parse_and_render() {
        let spec = load_pipeline_spec(
            r#"{"spec":"gcc-ocf.pipeline.v1","layer":"split_text_nums",
                "stream_codecs":{"text":"zlib","NUMS":"num_v1"}}"#,
        )
        .unwrap();
        assert_eq!(spec.stream_codecs_spec().unwrap(), "NUMS:num_v1,TEXT:zlib");
    }

    #[test]
    fn engine_auto_selects_mbn_for_multistream_layers() {
        let env = LayerEnv::default();
        let data = b"line 1 with 44\nline 2 with 55\n";

        let single = PipelineSpec::new(LayerId::Bytes, CodecId::Zlib);
        let blob = run_pipeline(&single, data, &env).unwrap();
        assert!(!crate::mbn::is_mbn(
            crate::container::unpack_container_v6(&blob).unwrap().payload
        ));
        assert_eq!(decompress_v6(&blob, &env).unwrap(), data);

        let multi = PipelineSpec::new(LayerId::SplitTextNums, CodecId::Zlib);
        let blob = run_pipeline(&multi, data, &env).unwrap();
        assert!(crate::mbn::is_mbn(
            crate::container::unpack_container_v6(&blob).unwrap().payload
        ));
        assert_eq!(decompress_v6(&blob, &env).unwrap(), data);
    }

    #[test]
    fn forced_mbn_on_single_stream_layer() {
        let env = LayerEnv::default();
        let mut spec = PipelineSpec::new(LayerId::Bytes, CodecId::Zlib);
        spec.mbn = Some(true);
        let blob = run_pipeline(&spec, b"abc", &env).unwrap();
        assert!(crate::mbn::is_mbn(
            crate::container::unpack_container_v6(&blob).unwrap().payload
        ));
        assert_eq!(decompress_v6(&blob, &env).unwrap(), b"abc");
    }

    #[test]
    fn forbidden_mbn_on_multistream_layer_is_usage_error() {
        let env = LayerEnv::default();
        let mut spec = PipelineSpec::new(LayerId::Vc0, CodecId::Zlib);
        spec.mbn = Some(false);
        assert!(matches!(run_pipeline(&spec, b"abc", &env), Err(GcError::Usage(_))));
    }
}
