//! # Directory packer (classic mode)
//!
//! Pack pipeline:
//!
//! 1. Walk the input tree deterministically (lexicographic by relative path).
//! 2. Fingerprint every file and classify it (textish / mixed_text_nums /
//!    binaryish).
//! 3. Route each file to `simhash64 % buckets`.
//! 4. Per bucket, pick a plan: TOP-db hit reuses the cached winner, otherwise
//!    *autopick* compresses a small sample with every candidate and scores by
//!    total compressed size (ties: lowest size, then plan note).
//! 5. Compress every file with the winning plan into v6 containers; bucket
//!    resources (shared template / value dictionaries) are built once and
//!    stored as `__res__/` entries.
//! 6. Emit `bucket_NN.gca` per bucket, a top-level `manifest.jsonl` and a
//!    deterministic `autopick_report.json`.
//!
//! The TOP db is the only cross-invocation state: a small JSON cache of
//! winning plans keyed by `(bucket_type, digit-density band)`, read at pack
//! start and written atomically (temp + rename) at pack end.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::codecs::{CodecId, NumDict};
use crate::dir_spec::{DirPipelineSpec, DirPlan};
use crate::error::{GcError, Result};
use crate::fingerprint::{classify, digit_band, fingerprint_bytes, BucketType};
use crate::gca::{sha256_hex, GcaReader, GcaWriter};
use crate::layers::{self, LayerEnv, LayerId, TplDict};
use crate::legacy::decompress_any;
use crate::mbn::{ST_NUMS, ST_TEXT};
use crate::pipeline::{run_pipeline, stream_by_name, stream_name, PipelineSpec};
use crate::varint::decode_uints;

pub const MANIFEST_NAME: &str = "manifest.jsonl";
pub const REPORT_NAME: &str = "autopick_report.json";
pub const TOP_DB_NAME: &str = "top_pipelines.json";

const DEFAULT_BUCKETS: u32 = 16;
const DEFAULT_SAMPLE_N: u32 = 3;
const DEFAULT_TOP_DB_MAX: u32 = 12;
/// Plans kept per TOP-db entry; fixed by the format.
const TOP_K: usize = 2;
const DEFAULT_TPL_DICT_K: u32 = 128;
const DEFAULT_NUM_DICT_K: u32 = 64;

pub const RES_TPL_DICT: &str = "tpl_dict_v0";
pub const RES_NUM_DICT: &str = "num_dict_v1";

#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    /// Bucket count override; precedence: this > spec.buckets > 16.
    pub buckets: Option<u32>,
    pub spec: Option<DirPipelineSpec>,
    /// TOP db location; defaults to `<output>/top_pipelines.json`.
    pub top_db: Option<PathBuf>,
}

pub fn archive_name(bucket: u32) -> String {
    format!("bucket_{:02}.gca", bucket)
}

// ---- deterministic walk --------------------------------------------------

/// All regular files under `root`, sorted by POSIX-style relative path.
pub fn walk_files(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| GcError::Usage(format!("walk {}: {}", root.display(), e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| GcError::Usage(format!("path outside root: {}", entry.path().display())))?;
        let rel_posix = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push((rel_posix, entry.path().to_path_buf()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

// ---- default candidate pools ---------------------------------------------

fn split_text_nums_plan(note: &str) -> DirPlan {
    DirPlan::new(LayerId::SplitTextNums, CodecId::Zlib, note)
        .with_streams(&[(ST_TEXT, CodecId::Zlib), (ST_NUMS, CodecId::NumV1)])
}

pub fn default_pool(bt: BucketType) -> Vec<DirPlan> {
    match bt {
        BucketType::Textish => vec![
            split_text_nums_plan("stn-zlib-numv1"),
            DirPlan::new(LayerId::LinesRle, CodecId::Zlib, "lines-rle"),
            DirPlan::new(LayerId::Bytes, CodecId::Zstd, "bytes-zstd"),
            DirPlan::new(LayerId::Bytes, CodecId::Zlib, "bytes-zlib"),
        ],
        BucketType::MixedTextNums => vec![
            DirPlan::new(LayerId::TplLinesV0, CodecId::Zlib, "tpl-zlib"),
            split_text_nums_plan("stn-zlib-numv1"),
            DirPlan::new(LayerId::Bytes, CodecId::Zstd, "bytes-zstd"),
        ],
        BucketType::Binaryish => vec![
            DirPlan::new(LayerId::Bytes, CodecId::Zstd, "bytes-zstd"),
            DirPlan::new(LayerId::Bytes, CodecId::ZstdTight, "bytes-zstd-tight"),
            DirPlan::new(LayerId::Bytes, CodecId::Zlib, "bytes-zlib"),
        ],
    }
}

// ---- TOP db ---------------------------------------------------------------

fn plan_to_json(plan: &DirPlan) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    obj.insert("layer".into(), serde_json::Value::String(plan.layer.name().into()));
    obj.insert("codec".into(), serde_json::Value::String(plan.codec.name().into()));
    if let Some(sc) = &plan.stream_codecs {
        let mut streams = serde_json::Map::new();
        for (&stype, codec) in sc {
            streams.insert(
                stream_name(stype).to_string(),
                serde_json::Value::String(codec.name().into()),
            );
        }
        obj.insert("stream_codecs".into(), serde_json::Value::Object(streams));
    }
    if !plan.note.is_empty() {
        obj.insert("note".into(), serde_json::Value::String(plan.note.clone()));
    }
    serde_json::Value::Object(obj)
}

fn plan_from_json(value: &serde_json::Value) -> Option<DirPlan> {
    let obj = value.as_object()?;
    let layer = LayerId::from_name(obj.get("layer")?.as_str()?)?;
    let codec = CodecId::from_name(obj.get("codec")?.as_str()?)?;
    let stream_codecs = match obj.get("stream_codecs") {
        None => None,
        Some(v) => {
            let mut sc = BTreeMap::new();
            for (k, vv) in v.as_object()? {
                sc.insert(stream_by_name(k)?, CodecId::from_name(vv.as_str()?)?);
            }
            Some(sc)
        }
    };
    let note = obj
        .get("note")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    Some(DirPlan { layer, codec, stream_codecs, note })
}

/// Bounded cache of winning plans, oldest entry evicted first.
#[derive(Debug, Default)]
pub struct TopDb {
    entries: Vec<(String, Vec<DirPlan>)>,
}

impl TopDb {
    /// Missing or unreadable db reads as empty; the cache is advisory.
    pub fn load(path: &Path) -> TopDb {
        let Ok(text) = std::fs::read_to_string(path) else {
            return TopDb::default();
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
            return TopDb::default();
        };
        let mut entries = Vec::new();
        if let Some(list) = value.get("entries").and_then(|v| v.as_array()) {
            for item in list {
                let Some(key) = item.get("key").and_then(|v| v.as_str()) else { continue };
                let Some(plans) = item.get("plans").and_then(|v| v.as_array()) else { continue };
                let plans: Vec<DirPlan> = plans.iter().filter_map(plan_from_json).collect();
                if !plans.is_empty() {
                    entries.push((key.to_string(), plans));
                }
            }
        }
        TopDb { entries }
    }

    pub fn get(&self, key: &str) -> Option<&[DirPlan]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, plans)| plans.as_slice())
    }

    pub fn put(&mut self, key: &str, plans: Vec<DirPlan>, max_entries: usize) {
        self.entries.retain(|(k, _)| k != key);
        self.entries.push((key.to_string(), plans));
        while self.entries.len() > max_entries {
            self.entries.remove(0);
        }
    }

    /// Atomic write: temp file in the same directory, then rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut list = Vec::new();
        for (key, plans) in &self.entries {
            let mut obj = serde_json::Map::new();
            obj.insert("key".into(), serde_json::Value::String(key.clone()));
            obj.insert(
                "plans".into(),
                serde_json::Value::Array(plans.iter().map(plan_to_json).collect()),
            );
            list.push(serde_json::Value::Object(obj));
        }
        let mut root = serde_json::Map::new();
        root.insert("version".into(), serde_json::Value::from(1));
        root.insert("entries".into(), serde_json::Value::Array(list));
        let text = serde_json::to_string_pretty(&serde_json::Value::Object(root))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GcError::io(e, parent))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text.as_bytes()).map_err(|e| GcError::io(e, &tmp))?;
        std::fs::rename(&tmp, path).map_err(|e| GcError::io(e, path))?;
        Ok(())
    }
}

// ---- bucket resources ----------------------------------------------------

/// Lazily-built per-bucket shared dictionaries.
#[derive(Default)]
struct BucketResources {
    tpl: Option<TplDict>,
    num: Option<NumDict>,
}

impl BucketResources {
    fn ensure_tpl(&mut self, files: &[Vec<u8>], k: usize) -> &TplDict {
        if self.tpl.is_none() {
            // Frequency-ranked templates across the bucket, first-seen breaks ties.
            let mut order: Vec<layers::tpl_lines::Template> = Vec::new();
            let mut count: std::collections::HashMap<layers::tpl_lines::Template, u64> =
                std::collections::HashMap::new();
            for data in files {
                for tpl in layers::tpl_lines::collect_templates(data) {
                    if !count.contains_key(&tpl) {
                        order.push(tpl.clone());
                    }
                    *count.entry(tpl).or_insert(0) += 1;
                }
            }
            let mut ranked: Vec<(usize, layers::tpl_lines::Template)> =
                order.into_iter().enumerate().collect();
            ranked.sort_by(|(ia, ta), (ib, tb)| {
                count[tb].cmp(&count[ta]).then(ia.cmp(ib))
            });
            let picked: Vec<layers::tpl_lines::Template> =
                ranked.into_iter().take(k).map(|(_, t)| t).collect();
            self.tpl = Some(TplDict::new(picked));
        }
        self.tpl.as_ref().unwrap()
    }

    fn ensure_num(&mut self, files: &[Vec<u8>], layer: LayerId, k: usize) -> &NumDict {
        if self.num.is_none() {
            let env = LayerEnv::default();
            let mut order: Vec<u64> = Vec::new();
            let mut count: std::collections::HashMap<u64, u64> = std::collections::HashMap::new();
            for data in files {
                let Ok(enc) = layers::encode(layer, data, &env) else { continue };
                for (stype, raw) in &enc.streams {
                    if *stype != ST_NUMS {
                        continue;
                    }
                    if let Ok(values) = decode_uints(raw) {
                        for v in values {
                            if !count.contains_key(&v) {
                                order.push(v);
                            }
                            *count.entry(v).or_insert(0) += 1;
                        }
                    }
                }
            }
            order.sort_by(|a, b| count[b].cmp(&count[a]).then(a.cmp(b)));
            order.truncate(k);
            self.num = Some(NumDict::new(order));
        }
        self.num.as_ref().unwrap()
    }
}

fn plan_uses_num_v1(plan: &DirPlan) -> bool {
    plan.codec == CodecId::NumV1
        || plan
            .stream_codecs
            .as_ref()
            .is_some_and(|sc| sc.values().any(|&c| c == CodecId::NumV1))
}

fn plan_spec(plan: &DirPlan) -> PipelineSpec {
    PipelineSpec {
        name: if plan.note.is_empty() { "plan".into() } else { plan.note.clone() },
        layer: plan.layer,
        codec: plan.codec,
        stream_codecs: plan.stream_codecs.clone(),
        mbn: None,
    }
}

// ---- pack ----------------------------------------------------------------

struct FileRecord {
    rel: String,
    path: PathBuf,
    size: u64,
    input_sha256: String,
    bucket: u32,
    ftype: BucketType,
}

pub fn pack_dir(input: &Path, output: &Path, opts: &PackOptions) -> Result<()> {
    if !input.is_dir() {
        return Err(GcError::Usage(format!("input is not a directory: {}", input.display())));
    }
    let spec = opts.spec.clone().unwrap_or_default();
    if spec.archive == Some(false) {
        return Err(GcError::Usage("dir pack: non-archive mode is not supported".into()));
    }

    let buckets = opts
        .buckets
        .or(spec.buckets)
        .unwrap_or(DEFAULT_BUCKETS)
        .max(1);
    let autopick_enabled = spec.autopick.enabled.unwrap_or(true);
    let sample_n = spec.autopick.sample_n.unwrap_or(DEFAULT_SAMPLE_N) as usize;
    let top_db_max = spec.autopick.top_db_max.unwrap_or(DEFAULT_TOP_DB_MAX) as usize;
    let refresh_top = spec.autopick.refresh_top.unwrap_or(false);

    std::fs::create_dir_all(output).map_err(|e| GcError::io(e, output))?;
    let top_db_path = opts
        .top_db
        .clone()
        .unwrap_or_else(|| output.join(TOP_DB_NAME));
    let mut top_db = TopDb::load(&top_db_path);

    // Phase 1: fingerprint + classify + route.
    let mut records: Vec<FileRecord> = Vec::new();
    for (rel, path) in walk_files(input)? {
        let data = std::fs::read(&path).map_err(|e| GcError::io(e, &path))?;
        let fp = fingerprint_bytes(&data);
        records.push(FileRecord {
            rel,
            path,
            size: data.len() as u64,
            input_sha256: sha256_hex(&data),
            bucket: (fp.simhash64 % u64::from(buckets)) as u32,
            ftype: classify(&data),
        });
    }

    let mut by_bucket: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (i, rec) in records.iter().enumerate() {
        by_bucket.entry(rec.bucket).or_default().push(i);
    }

    let mut manifest_lines: Vec<serde_json::Value> = Vec::new();
    let mut report_buckets = serde_json::Map::new();
    let mut total_in = 0u64;
    let mut total_out = 0u64;

    for (&bucket, members) in &by_bucket {
        let bucket_type = majority_type(records.as_slice(), members);
        let pool = spec
            .candidate_pools
            .get(&bucket_type)
            .cloned()
            .unwrap_or_else(|| default_pool(bucket_type));
        if pool.is_empty() {
            return Err(GcError::Usage(format!(
                "dir pack: empty candidate pool for {}",
                bucket_type.name()
            )));
        }

        // Sample: the first files of the bucket in walk order.
        let sample_idx: Vec<usize> = members.iter().copied().take(sample_n.max(1)).collect();
        let mut sample_bytes: Vec<Vec<u8>> = Vec::with_capacity(sample_idx.len());
        for &i in &sample_idx {
            sample_bytes
                .push(std::fs::read(&records[i].path).map_err(|e| GcError::io(e, &records[i].path))?);
        }
        let sample_concat: Vec<u8> = sample_bytes.concat();
        let top_key = format!("{}|{}", bucket_type.name(), digit_band(&sample_concat));

        // TOP db lookup happens first so the resource-mining pass below also
        // covers a cached plan the current pool no longer lists.
        let cached_plan: Option<DirPlan> = if refresh_top {
            None
        } else {
            top_db.get(&top_key).map(|plans| plans[0].clone())
        };

        // Bucket bytes for resource mining (all members, loaded only when a
        // shared-dict plan is in play).
        let mut resources = BucketResources::default();
        let needs_bucket_bytes = pool
            .iter()
            .chain(cached_plan.iter())
            .any(|p| p.layer == LayerId::TplLinesSharedV0 || plan_uses_num_v1(p));
        let bucket_bytes: Vec<Vec<u8>> = if needs_bucket_bytes {
            let mut all = Vec::with_capacity(members.len());
            for &i in members {
                all.push(
                    std::fs::read(&records[i].path).map_err(|e| GcError::io(e, &records[i].path))?,
                );
            }
            all
        } else {
            Vec::new()
        };

        let tpl_k = spec.tpl_dict_v0.k.unwrap_or(DEFAULT_TPL_DICT_K) as usize;
        let num_k = spec.num_dict_v1.k.unwrap_or(DEFAULT_NUM_DICT_K) as usize;
        let tpl_allowed = spec.tpl_dict_v0.enabled.unwrap_or(true);
        let num_allowed = spec.num_dict_v1.enabled.unwrap_or(false);

        let env_for = |plan: &DirPlan, res: &mut BucketResources| -> Result<LayerEnv> {
            let mut env = LayerEnv::default();
            if plan.layer == LayerId::TplLinesSharedV0 {
                if !tpl_allowed {
                    return Err(GcError::Usage(
                        "dir pack: tpl_lines_shared_v0 plan but tpl_dict_v0 resource disabled"
                            .into(),
                    ));
                }
                env.tpl_dict = Some(res.ensure_tpl(&bucket_bytes, tpl_k).clone());
            }
            if num_allowed && plan_uses_num_v1(plan) {
                env.num_dict = Some(res.ensure_num(&bucket_bytes, plan.layer, num_k).clone());
            }
            Ok(env)
        };

        // Plan selection: TOP db first, then autopick, then pool head.
        let mut candidates_report: Vec<serde_json::Value> = Vec::new();
        let mut source = "top_db";
        let chosen: DirPlan = if let Some(cached) = cached_plan {
            cached
        } else if autopick_enabled {
            source = "autopick";
            let mut scored: Vec<(u64, DirPlan)> = Vec::new();
            for plan in &pool {
                let env = match env_for(plan, &mut resources) {
                    Ok(env) => env,
                    Err(_) => continue,
                };
                let spec1 = plan_spec(plan);
                let mut total = 0u64;
                let mut ok = true;
                for data in &sample_bytes {
                    match run_pipeline(&spec1, data, &env) {
                        Ok(blob) => total += blob.len() as u64,
                        Err(_) => {
                            ok = false;
                            break;
                        }
                    }
                }
                let mut rep = serde_json::Map::new();
                rep.insert("plan".into(), serde_json::Value::String(plan.key()));
                if ok {
                    rep.insert("sample_total".into(), serde_json::Value::from(total));
                    scored.push((total, plan.clone()));
                } else {
                    rep.insert("inapplicable".into(), serde_json::Value::Bool(true));
                }
                candidates_report.push(serde_json::Value::Object(rep));
            }
            if scored.is_empty() {
                return Err(GcError::Usage(format!(
                    "dir pack: no applicable plan for bucket {} ({})",
                    bucket,
                    bucket_type.name()
                )));
            }
            scored.sort_by(|(sa, pa), (sb, pb)| {
                sa.cmp(sb).then(pa.note.cmp(&pb.note)).then(pa.key().cmp(&pb.key()))
            });
            let winners: Vec<DirPlan> =
                scored.iter().take(TOP_K).map(|(_, p)| p.clone()).collect();
            let best = winners[0].clone();
            top_db.put(&top_key, winners, top_db_max);
            best
        } else {
            source = "pool_head";
            pool[0].clone()
        };

        println!(
            "[autopick] bucket {:02} type={} plan={} ({})",
            bucket,
            bucket_type.name(),
            chosen.key(),
            source
        );

        // Compress the bucket.
        let chosen_env = env_for(&chosen, &mut resources)?;
        let fallback = DirPlan::new(LayerId::Bytes, CodecId::Zstd, "fallback-bytes-zstd");
        let arch = archive_name(bucket);
        let mut writer = GcaWriter::create(&output.join(&arch))?;

        for &i in members {
            let rec = &records[i];
            let data = std::fs::read(&rec.path).map_err(|e| GcError::io(e, &rec.path))?;
            total_in += data.len() as u64;

            // A bucket can mix content kinds (routing is by hash); files the
            // chosen layer cannot represent fall back to bytes+zstd.
            let (blob, plan_used, fell_back) =
                match run_pipeline(&plan_spec(&chosen), &data, &chosen_env) {
                    Ok(blob) => (blob, &chosen, false),
                    Err(GcError::Usage(_)) => {
                        let blob =
                            run_pipeline(&plan_spec(&fallback), &data, &LayerEnv::default())?;
                        (blob, &fallback, true)
                    }
                    Err(e) => return Err(e),
                };
            total_out += blob.len() as u64;

            let mut meta = serde_json::Map::new();
            meta.insert("plan".into(), serde_json::Value::String(plan_used.key()));
            meta.insert("input_sha256".into(), serde_json::Value::String(rec.input_sha256.clone()));
            meta.insert("input_length".into(), serde_json::Value::from(rec.size));
            let entry = writer.append(&rec.rel, &blob, meta)?;

            let mut row = serde_json::Map::new();
            row.insert("rel".into(), serde_json::Value::String(rec.rel.clone()));
            row.insert("bucket".into(), serde_json::Value::from(bucket));
            row.insert("archive".into(), serde_json::Value::String(arch.clone()));
            row.insert("archive_offset".into(), serde_json::Value::from(entry.offset));
            row.insert("archive_length".into(), serde_json::Value::from(entry.length));
            row.insert(
                "blob_sha256".into(),
                entry.blob_sha256().map(|s| serde_json::Value::String(s.into())).unwrap_or_default(),
            );
            row.insert("input_sha256".into(), serde_json::Value::String(rec.input_sha256.clone()));
            row.insert("input_length".into(), serde_json::Value::from(rec.size));
            if fell_back {
                row.insert("plan_fallback".into(), serde_json::Value::Bool(true));
            }
            manifest_lines.push(serde_json::Value::Object(row));
        }

        // Bucket resources, after the blobs.
        let mut res_names: Vec<String> = Vec::new();
        let mut res_meta = serde_json::Map::new();
        if let Some(tpl) = chosen_env.tpl_dict.as_ref() {
            let blob = tpl.to_blob();
            let mut meta = serde_json::Map::new();
            meta.insert("k".into(), serde_json::Value::from(tpl.len()));
            meta.insert(
                "tag8_hex".into(),
                serde_json::Value::String(hex8(tpl.tag8())),
            );
            let entry = writer.append_resource(RES_TPL_DICT, &blob, meta)?;
            let mut m = serde_json::Map::new();
            m.insert(
                "blob_sha256".into(),
                entry.blob_sha256().map(|s| serde_json::Value::String(s.into())).unwrap_or_default(),
            );
            res_meta.insert(RES_TPL_DICT.into(), serde_json::Value::Object(m));
            res_names.push(RES_TPL_DICT.into());
        }
        if let Some(num) = chosen_env.num_dict.as_ref() {
            let blob = num.to_blob();
            let mut meta = serde_json::Map::new();
            meta.insert("k".into(), serde_json::Value::from(num.values().len()));
            meta.insert(
                "tag8_hex".into(),
                serde_json::Value::String(hex8(num.tag8())),
            );
            let entry = writer.append_resource(RES_NUM_DICT, &blob, meta)?;
            let mut m = serde_json::Map::new();
            m.insert(
                "blob_sha256".into(),
                entry.blob_sha256().map(|s| serde_json::Value::String(s.into())).unwrap_or_default(),
            );
            res_meta.insert(RES_NUM_DICT.into(), serde_json::Value::Object(m));
            res_names.push(RES_NUM_DICT.into());
        }
        writer.finish()?;

        // bucket_summary manifest record.
        let mut summary = serde_json::Map::new();
        summary.insert("kind".into(), serde_json::Value::String("bucket_summary".into()));
        summary.insert("bucket".into(), serde_json::Value::from(bucket));
        summary.insert("bucket_type".into(), serde_json::Value::String(bucket_type.name().into()));
        summary.insert("archive".into(), serde_json::Value::String(arch.clone()));
        summary.insert("plan".into(), serde_json::Value::String(chosen.key()));
        summary.insert(
            "bucket_resources".into(),
            serde_json::Value::Array(
                res_names.iter().map(|n| serde_json::Value::String(n.clone())).collect(),
            ),
        );
        summary.insert("bucket_resources_meta".into(), serde_json::Value::Object(res_meta));
        manifest_lines.push(serde_json::Value::Object(summary));

        // Report entry.
        let mut rep = serde_json::Map::new();
        rep.insert("bucket_type".into(), serde_json::Value::String(bucket_type.name().into()));
        rep.insert("files".into(), serde_json::Value::from(members.len()));
        rep.insert("source".into(), serde_json::Value::String(source.into()));
        let mut chosen_rep = serde_json::Map::new();
        chosen_rep.insert("layer_id".into(), serde_json::Value::String(chosen.layer.name().into()));
        chosen_rep.insert("codec_text".into(), serde_json::Value::String(chosen.codec.name().into()));
        if !chosen.note.is_empty() {
            chosen_rep.insert("note".into(), serde_json::Value::String(chosen.note.clone()));
        }
        chosen_rep.insert("key".into(), serde_json::Value::String(chosen.key()));
        rep.insert("chosen".into(), serde_json::Value::Object(chosen_rep));
        rep.insert("candidates".into(), serde_json::Value::Array(candidates_report));
        report_buckets.insert(format!("{:02}", bucket), serde_json::Value::Object(rep));
    }

    // Manifest.
    let manifest_path = output.join(MANIFEST_NAME);
    let mut f = std::fs::File::create(&manifest_path).map_err(|e| GcError::io(e, &manifest_path))?;
    for line in &manifest_lines {
        serde_json::to_writer(&mut f, line)?;
        f.write_all(b"\n").map_err(|e| GcError::io(e, &manifest_path))?;
    }
    f.flush().map_err(|e| GcError::io(e, &manifest_path))?;

    // Deterministic report: no timestamps, no absolute paths.
    let mut report = serde_json::Map::new();
    report.insert("buckets".into(), serde_json::Value::Object(report_buckets));
    let report_path = output.join(REPORT_NAME);
    std::fs::write(
        &report_path,
        serde_json::to_string_pretty(&serde_json::Value::Object(report))?,
    )
    .map_err(|e| GcError::io(e, &report_path))?;

    top_db.save(&top_db_path)?;

    println!(
        "[dir-pack] {} files, {} buckets, {} -> {} bytes",
        records.len(),
        by_bucket.len(),
        total_in,
        total_out
    );
    Ok(())
}

fn hex8(tag: [u8; 8]) -> String {
    tag.iter().map(|b| format!("{:02x}", b)).collect()
}

fn majority_type(records: &[FileRecord], members: &[usize]) -> BucketType {
    let mut counts: BTreeMap<BucketType, usize> = BTreeMap::new();
    for &i in members {
        *counts.entry(records[i].ftype).or_insert(0) += 1;
    }
    let priority = |t: BucketType| match t {
        BucketType::Binaryish => 0,
        BucketType::Textish => 1,
        BucketType::MixedTextNums => 2,
    };
    counts
        .into_iter()
        .max_by_key(|&(t, c)| (c, priority(t)))
        .map(|(t, _)| t)
        .unwrap_or(BucketType::Textish)
}

// ---- manifest reading (shared with unpack and verify) ---------------------

#[derive(Debug, Clone)]
pub struct ManifestFileRec {
    pub rel: String,
    pub bucket: u32,
    pub archive: String,
    pub archive_offset: u64,
    pub archive_length: u64,
    pub blob_sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BucketSummaryRec {
    pub bucket: u32,
    pub bucket_resources: Vec<String>,
    pub bucket_resources_meta: serde_json::Map<String, serde_json::Value>,
}

pub struct Manifest {
    pub files: Vec<ManifestFileRec>,
    pub bucket_summaries: BTreeMap<u32, BucketSummaryRec>,
}

pub fn read_manifest(path: &Path) -> Result<Manifest> {
    let text = std::fs::read_to_string(path)
        .map_err(|_| GcError::Corrupt(format!("manifest not found: {}", path.display())))?;

    let mut files = Vec::new();
    let mut bucket_summaries = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(line)
            .map_err(|e| GcError::Corrupt(format!("manifest JSONL: {}", e)))?;
        let Some(obj) = value.as_object() else { continue };

        if obj.get("kind").and_then(|v| v.as_str()) == Some("bucket_summary") {
            let bucket = obj.get("bucket").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            let resources = obj
                .get("bucket_resources")
                .and_then(|v| v.as_array())
                .map(|l| {
                    l.iter()
                        .filter_map(|v| v.as_str())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let meta = obj
                .get("bucket_resources_meta")
                .and_then(|v| v.as_object())
                .cloned()
                .unwrap_or_default();
            bucket_summaries.insert(
                bucket,
                BucketSummaryRec { bucket, bucket_resources: resources, bucket_resources_meta: meta },
            );
            continue;
        }

        // File rows need rel + archive; error rows and strangers are skipped.
        let Some(rel) = obj.get("rel").and_then(|v| v.as_str()) else { continue };
        if obj.contains_key("error") {
            continue;
        }
        let Some(archive) = obj.get("archive").and_then(|v| v.as_str()) else { continue };
        files.push(ManifestFileRec {
            rel: rel.to_string(),
            bucket: obj.get("bucket").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            archive: archive.to_string(),
            archive_offset: obj.get("archive_offset").and_then(|v| v.as_u64()).unwrap_or(0),
            archive_length: obj.get("archive_length").and_then(|v| v.as_u64()).unwrap_or(0),
            blob_sha256: obj
                .get("blob_sha256")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        });
    }
    Ok(Manifest { files, bucket_summaries })
}

/// Resources of an open archive, parsed into a layer environment.
pub fn archive_env(reader: &mut GcaReader) -> Result<LayerEnv> {
    let mut env = LayerEnv::default();
    for (name, blob, _entry) in reader.load_resources()? {
        match name.as_str() {
            RES_TPL_DICT => env.tpl_dict = Some(TplDict::from_blob(&blob)?),
            RES_NUM_DICT => env.num_dict = Some(NumDict::from_blob(&blob)?),
            _ => {}
        }
    }
    Ok(env)
}

// ---- unpack ---------------------------------------------------------------

pub fn unpack_dir(packed: &Path, restore: &Path) -> Result<()> {
    let manifest = read_manifest(&packed.join(MANIFEST_NAME))?;
    std::fs::create_dir_all(restore).map_err(|e| GcError::io(e, restore))?;

    let mut by_archive: BTreeMap<&str, Vec<&ManifestFileRec>> = BTreeMap::new();
    for rec in &manifest.files {
        by_archive.entry(rec.archive.as_str()).or_default().push(rec);
    }

    let mut restored = 0usize;
    for (arch, recs) in by_archive {
        let mut reader = GcaReader::open(&packed.join(arch))?;
        let env = archive_env(&mut reader)?;
        for rec in recs {
            let blob = reader.read_blob(rec.archive_offset, rec.archive_length)?;
            let data = decompress_any(&blob, &env)?;
            let out_path = restore.join(&rec.rel);
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| GcError::io(e, parent))?;
            }
            std::fs::write(&out_path, &data).map_err(|e| GcError::io(e, &out_path))?;
            restored += 1;
        }
    }
    println!("[dir-unpack] restored {} files -> {}", restored, restore.display());
    Ok(())
}
