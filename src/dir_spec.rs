//! Directory pipeline spec (`gcc-ocf.dir_pipeline.v1`).
//!
//! Controls directory-mode behaviour (bucketing, autopick, candidate pools,
//! bucket resources) reproducibly. The parser is strict: unknown keys are
//! errors, defaults mirror the built-in behaviour.

use std::collections::BTreeMap;

use crate::codecs::CodecId;
use crate::error::{GcError, Result};
use crate::fingerprint::BucketType;
use crate::layers::LayerId;
use crate::pipeline::{parse_stream_codecs, read_json_arg};

pub const SCHEMA_ID: &str = "gcc-ocf.dir_pipeline.v1";

/// One candidate compression plan of a bucket-type pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirPlan {
    pub layer: LayerId,
    pub codec: CodecId,
    pub stream_codecs: Option<BTreeMap<u8, CodecId>>,
    pub note: String,
}

impl DirPlan {
    pub fn new(layer: LayerId, codec: CodecId, note: &str) -> Self {
        DirPlan { layer, codec, stream_codecs: None, note: note.to_string() }
    }

    pub fn with_streams(mut self, streams: &[(u8, CodecId)]) -> Self {
        self.stream_codecs = Some(streams.iter().copied().collect());
        self
    }

    /// Deterministic identity used in reports and the TOP db.
    pub fn key(&self) -> String {
        let mut key = format!("{}+{}", self.layer.name(), self.codec.name());
        if let Some(sc) = &self.stream_codecs {
            if !sc.is_empty() {
                let parts: Vec<String> = sc
                    .iter()
                    .map(|(&st, c)| format!("{}:{}", crate::pipeline::stream_name(st), c.name()))
                    .collect();
                key.push_str(";streams=");
                key.push_str(&parts.join(","));
            }
        }
        if !self.note.is_empty() {
            key.push_str(";note=");
            key.push_str(&self.note);
        }
        key
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutopickSpec {
    pub enabled: Option<bool>,
    pub sample_n: Option<u32>,
    pub top_k: Option<u32>,
    pub top_db_max: Option<u32>,
    pub refresh_top: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceSpec {
    pub enabled: Option<bool>,
    pub k: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct DirPipelineSpec {
    pub buckets: Option<u32>,
    pub archive: Option<bool>,
    pub autopick: AutopickSpec,
    pub candidate_pools: BTreeMap<BucketType, Vec<DirPlan>>,
    pub num_dict_v1: ResourceSpec,
    pub tpl_dict_v0: ResourceSpec,
}

/// Load and validate a dir pipeline spec from `@file.json` or inline JSON.
pub fn load_dir_pipeline_spec(arg: &str) -> Result<DirPipelineSpec> {
    let text = read_json_arg(arg)?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| GcError::Usage(format!("dir pipeline spec: invalid JSON: {}", e)))?;
    parse_dir_pipeline_spec(&value)
}

pub fn parse_dir_pipeline_spec(value: &serde_json::Value) -> Result<DirPipelineSpec> {
    let obj = object(value, "root")?;
    ensure_allowed(
        "root",
        obj,
        &["spec", "buckets", "archive", "autopick", "candidate_pools", "resources"],
    )?;

    match obj.get("spec").and_then(|v| v.as_str()) {
        Some(SCHEMA_ID) => {}
        other => {
            return Err(GcError::Usage(format!(
                "dir pipeline spec: spec must be {:?}, got {:?}",
                SCHEMA_ID, other
            )))
        }
    }

    let buckets = match obj.get("buckets") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => {
            let n = v
                .as_u64()
                .filter(|&n| n > 0)
                .ok_or_else(|| GcError::Usage("dir pipeline spec: buckets must be > 0".into()))?;
            Some(n as u32)
        }
    };

    let archive = match obj.get("archive") {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::Bool(b)) => Some(*b),
        Some(_) => return Err(GcError::Usage("dir pipeline spec: archive must be a bool".into())),
    };

    let autopick = parse_autopick(obj.get("autopick"))?;
    let candidate_pools = parse_pools(obj.get("candidate_pools"))?;
    let (num_dict_v1, tpl_dict_v0) = parse_resources(obj.get("resources"))?;

    Ok(DirPipelineSpec { buckets, archive, autopick, candidate_pools, num_dict_v1, tpl_dict_v0 })
}

fn object<'a>(
    value: &'a serde_json::Value,
    what: &str,
) -> Result<&'a serde_json::Map<String, serde_json::Value>> {
    value
        .as_object()
        .ok_or_else(|| GcError::Usage(format!("dir pipeline spec: {} must be an object", what)))
}

fn ensure_allowed(
    what: &str,
    obj: &serde_json::Map<String, serde_json::Value>,
    allowed: &[&str],
) -> Result<()> {
    let mut extra: Vec<&str> = obj
        .keys()
        .map(String::as_str)
        .filter(|k| !allowed.contains(k))
        .collect();
    extra.sort_unstable();
    if !extra.is_empty() {
        return Err(GcError::Usage(format!(
            "dir pipeline spec: unsupported keys in {}: {}",
            what,
            extra.join(", ")
        )));
    }
    Ok(())
}

fn parse_autopick(value: Option<&serde_json::Value>) -> Result<AutopickSpec> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok(AutopickSpec::default());
    };
    let obj = object(value, "autopick")?;
    ensure_allowed(
        "autopick",
        obj,
        &["enabled", "sample_n", "top_k", "top_db_max", "refresh_top"],
    )?;

    let bool_field = |key: &str| -> Result<Option<bool>> {
        match obj.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(GcError::Usage(format!(
                "dir pipeline spec: autopick.{} must be a bool",
                key
            ))),
        }
    };
    let int_field = |key: &str| -> Result<Option<u64>> {
        match obj.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| {
                    GcError::Usage(format!("dir pipeline spec: autopick.{} must be an int", key))
                }),
        }
    };

    let sample_n = int_field("sample_n")?;
    if let Some(n) = sample_n {
        if !(1..=8).contains(&n) {
            return Err(GcError::Usage(
                "dir pipeline spec: autopick.sample_n must be between 1 and 8".into(),
            ));
        }
    }
    let top_db_max = int_field("top_db_max")?;
    if let Some(n) = top_db_max {
        if n < 1 {
            return Err(GcError::Usage(
                "dir pipeline spec: autopick.top_db_max must be >= 1".into(),
            ));
        }
    }

    Ok(AutopickSpec {
        enabled: bool_field("enabled")?,
        sample_n: sample_n.map(|n| n as u32),
        top_k: int_field("top_k")?.map(|n| n as u32),
        top_db_max: top_db_max.map(|n| n as u32),
        refresh_top: bool_field("refresh_top")?,
    })
}

fn parse_plan(value: &serde_json::Value) -> Result<DirPlan> {
    let obj = object(value, "plan")?;
    ensure_allowed("plan", obj, &["layer", "codec", "stream_codecs", "note"])?;

    let layer_name = obj
        .get("layer")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GcError::Usage("dir pipeline spec: plan.layer is required".into()))?;
    let layer = LayerId::from_name(layer_name)
        .ok_or_else(|| GcError::Usage(format!("dir pipeline spec: unknown layer {:?}", layer_name)))?;

    let codec_name = obj
        .get("codec")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GcError::Usage("dir pipeline spec: plan.codec is required".into()))?;
    let codec = CodecId::from_name(codec_name)
        .ok_or_else(|| GcError::Usage(format!("dir pipeline spec: unknown codec {:?}", codec_name)))?;

    let note = match obj.get("note") {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(_) => return Err(GcError::Usage("dir pipeline spec: plan.note must be a string".into())),
    };

    let stream_codecs = match obj.get("stream_codecs") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => Some(parse_stream_codecs(v)?),
    };

    Ok(DirPlan { layer, codec, stream_codecs, note })
}

fn parse_pools(value: Option<&serde_json::Value>) -> Result<BTreeMap<BucketType, Vec<DirPlan>>> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok(BTreeMap::new());
    };
    let obj = object(value, "candidate_pools")?;
    let mut pools = BTreeMap::new();
    for (key, plans_value) in obj {
        let bt = BucketType::from_name(key.trim()).ok_or_else(|| {
            GcError::Usage(format!("dir pipeline spec: unknown bucket type {:?}", key))
        })?;
        let list = plans_value.as_array().ok_or_else(|| {
            GcError::Usage(format!("dir pipeline spec: candidate_pools[{}] must be a list", key))
        })?;
        let plans = list.iter().map(parse_plan).collect::<Result<Vec<_>>>()?;
        pools.insert(bt, plans);
    }
    Ok(pools)
}

fn parse_resources(
    value: Option<&serde_json::Value>,
) -> Result<(ResourceSpec, ResourceSpec)> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok((ResourceSpec::default(), ResourceSpec::default()));
    };
    let obj = object(value, "resources")?;
    ensure_allowed("resources", obj, &["num_dict_v1", "tpl_dict_v0"])?;

    let parse_one = |key: &str| -> Result<ResourceSpec> {
        let Some(v) = obj.get(key).filter(|v| !v.is_null()) else {
            return Ok(ResourceSpec::default());
        };
        let o = object(v, key)?;
        ensure_allowed(key, o, &["enabled", "k"])?;
        let enabled = match o.get("enabled") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::Bool(b)) => Some(*b),
            Some(_) => {
                return Err(GcError::Usage(format!(
                    "dir pipeline spec: resources.{}.enabled must be a bool",
                    key
                )))
            }
        };
        let k = match o.get("k") {
            None | Some(serde_json::Value::Null) => None,
            Some(v) => Some(v.as_u64().ok_or_else(|| {
                GcError::Usage(format!("dir pipeline spec: resources.{}.k must be >= 0", key))
            })? as u32),
        };
        Ok(ResourceSpec { enabled, k })
    };

    Ok((parse_one("num_dict_v1")?, parse_one("tpl_dict_v0")?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbn::{ST_NUMS, ST_TEXT};

    const FULL: &str = r#"{
        "spec": "gcc-ocf.dir_pipeline.v1",
        "buckets": 4,
        "archive": true,
        "autopick": {"enabled": true, "sample_n": 4, "top_k": 5, "refresh_top": true},
        "candidate_pools": {
            "mixed_text_nums": [
                {"layer": "tpl_lines_shared_v0", "codec": "zlib", "note": "tpl-shared"},
                {"layer": "split_text_nums", "codec": "zlib",
                 "stream_codecs": {"TEXT": "zlib", "NUMS": "num_v1"}}
            ]
        },
        "resources": {
            "tpl_dict_v0": {"enabled": true, "k": 128},
            "num_dict_v1": {"enabled": true, "k": 64}
        }
    }"#;

    #[test]
    fn full_spec_parses() {
        let spec = load_dir_pipeline_spec(FULL).unwrap();
        assert_eq!(spec.buckets, Some(4));
        assert_eq!(spec.archive, Some(true));
        assert_eq!(spec.autopick.sample_n, Some(4));
        assert_eq!(spec.autopick.top_k, Some(5));
        let pool = &spec.candidate_pools[&BucketType::MixedTextNums];
        assert_eq!(pool.len(), 2);
        assert_eq!(pool[0].layer, LayerId::TplLinesSharedV0);
        assert_eq!(
            pool[1].stream_codecs.as_ref().unwrap()[&ST_TEXT],
            CodecId::Zlib
        );
        assert_eq!(
            pool[1].stream_codecs.as_ref().unwrap()[&ST_NUMS],
            CodecId::NumV1
        );
        assert_eq!(spec.tpl_dict_v0.k, Some(128));
        assert_eq!(spec.num_dict_v1.enabled, Some(true));
    }

    #[test]
    fn unknown_root_key_is_rejected() {
        let err = load_dir_pipeline_spec(
            r#"{"spec":"gcc-ocf.dir_pipeline.v1","surprise":true}"#,
        )
        .unwrap_err();
        assert!(matches!(err, GcError::Usage(_)));
    }

    #[test]
    fn sample_n_range_is_enforced() {
        let err = load_dir_pipeline_spec(
            r#"{"spec":"gcc-ocf.dir_pipeline.v1","autopick":{"sample_n":9}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, GcError::Usage(_)));
    }

    #[test]
    fn plan_keys_are_deterministic() {
        let plan = DirPlan::new(LayerId::SplitTextNums, CodecId::Zlib, "stn")
            .with_streams(&[(ST_TEXT, CodecId::Zlib), (ST_NUMS, CodecId::NumV1)]);
        assert_eq!(plan.key(), "split_text_nums+zlib;streams=TEXT:zlib,NUMS:num_v1;note=stn");
    }
}
