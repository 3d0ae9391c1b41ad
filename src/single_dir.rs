//! Single-container directory packing.
//!
//! Text-only mode concatenates every file (all must be UTF-8 text) in
//! deterministic order and compresses the concat with the fixed winning
//! pipeline for text corpora: `split_text_nums` + MBN `{TEXT: zlib,
//! NUMS: num_v1}`. Output layout:
//!
//! ```text
//! <out_dir>/bundle.gcc          GCC container (any reader version can open it)
//! <out_dir>/bundle_index.json   slice index into the decompressed concat
//! ```
//!
//! Mixed mode keeps the single-container UX for directories that also hold
//! binary files: textish files (UTF-8, no NUL bytes) go to `bundle_text.gcc`
//! with the text pipeline, everything else to `bundle_bin.gcc` as
//! `bytes + zstd`, each with its own index.
//!
//! The index schema is `gcc-ocf.dir_bundle_index.v1`: per file
//! `{rel, offset, length, sha256}` as coordinates into the decompressed
//! concat stream, plus the concat hash and the pipeline that was used.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codecs::CodecId;
use crate::dir_pack::walk_files;
use crate::error::{GcError, Result};
use crate::gca::sha256_hex;
use crate::layers::{LayerEnv, LayerId};
use crate::legacy::decompress_any;
use crate::mbn::{ST_NUMS, ST_TEXT};
use crate::pipeline::{run_pipeline, PipelineSpec};

pub const SPEC_INDEX_V1: &str = "gcc-ocf.dir_bundle_index.v1";

pub const BUNDLE_GCC: &str = "bundle.gcc";
pub const BUNDLE_INDEX: &str = "bundle_index.json";

pub const BUNDLE_TEXT_GCC: &str = "bundle_text.gcc";
pub const BUNDLE_TEXT_INDEX: &str = "bundle_text_index.json";
pub const BUNDLE_BIN_GCC: &str = "bundle_bin.gcc";
pub const BUNDLE_BIN_INDEX: &str = "bundle_bin_index.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirIndexEntry {
    pub rel: String,
    pub offset: u64,
    pub length: u64,
    pub sha256: String,
}

/// The `dir_bundle_index.v1` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirBundleIndex {
    pub spec: String,
    pub root: String,
    pub kind: String,
    pub count: usize,
    pub files: Vec<DirIndexEntry>,
    pub concat_sha256: String,
    pub layer_used: String,
    pub codec_used: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_codecs_used: Option<String>,
}

impl DirBundleIndex {
    fn new(root: &str, kind: &str) -> Self {
        DirBundleIndex {
            spec: SPEC_INDEX_V1.to_string(),
            root: root.to_string(),
            kind: kind.to_string(),
            count: 0,
            files: Vec::new(),
            concat_sha256: String::new(),
            layer_used: String::new(),
            codec_used: String::new(),
            stream_codecs_used: None,
        }
    }

    pub fn read(path: &Path, expected_kind: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|_| GcError::Corrupt(format!("bundle index not found: {}", path.display())))?;
        let idx: DirBundleIndex = serde_json::from_str(&text)
            .map_err(|e| GcError::Corrupt(format!("bundle index JSON: {}", e)))?;
        if idx.spec != SPEC_INDEX_V1 {
            return Err(GcError::Corrupt(format!("bundle index spec: {:?}", idx.spec)));
        }
        if idx.kind != expected_kind {
            return Err(GcError::Corrupt(format!(
                "bundle index kind {:?} (expected {:?})",
                idx.kind, expected_kind
            )));
        }
        if idx.count != idx.files.len() {
            return Err(GcError::Corrupt("bundle index count mismatch".into()));
        }
        Ok(idx)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|e| GcError::io(e, path))
    }
}

fn text_pipeline() -> PipelineSpec {
    PipelineSpec {
        name: "single-text".into(),
        layer: LayerId::SplitTextNums,
        codec: CodecId::Zlib,
        stream_codecs: Some(
            [(ST_TEXT, CodecId::Zlib), (ST_NUMS, CodecId::NumV1)].into_iter().collect(),
        ),
        mbn: None,
    }
}

const TEXT_STREAM_CODECS: &str = "TEXT:zlib,NUMS:num_v1";

/// UTF-8 and NUL-free: the routing predicate of mixed mode and the acceptance
/// predicate of text-only mode.
fn is_textish_utf8(data: &[u8]) -> bool {
    !data.contains(&0) && std::str::from_utf8(data).is_ok()
}

fn root_name(input: &Path) -> String {
    input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dir".to_string())
}

// ---- text-only mode -------------------------------------------------------

pub fn is_single_container_dir(out: &Path) -> bool {
    out.join(BUNDLE_GCC).is_file() && out.join(BUNDLE_INDEX).is_file()
}

pub fn pack_single_dir(input: &Path, output: &Path) -> Result<()> {
    if !input.is_dir() {
        return Err(GcError::Usage(format!("input is not a directory: {}", input.display())));
    }
    std::fs::create_dir_all(output).map_err(|e| GcError::io(e, output))?;

    let mut idx = DirBundleIndex::new(&root_name(input), "text");
    idx.layer_used = LayerId::SplitTextNums.name().to_string();
    idx.codec_used = CodecId::Zlib.name().to_string();
    idx.stream_codecs_used = Some(TEXT_STREAM_CODECS.to_string());

    let mut concat: Vec<u8> = Vec::new();
    for (rel, path) in walk_files(input)? {
        let data = std::fs::read(&path).map_err(|e| GcError::io(e, &path))?;
        if !is_textish_utf8(&data) {
            return Err(GcError::Usage(format!(
                "single-container: not UTF-8 text: {} (use 'dir pack' for binary data)",
                rel
            )));
        }
        idx.files.push(DirIndexEntry {
            rel,
            offset: concat.len() as u64,
            length: data.len() as u64,
            sha256: sha256_hex(&data),
        });
        concat.extend_from_slice(&data);
    }
    idx.count = idx.files.len();
    idx.concat_sha256 = sha256_hex(&concat);
    idx.write(&output.join(BUNDLE_INDEX))?;

    let blob = run_pipeline(&text_pipeline(), &concat, &LayerEnv::default())?;
    let gcc_path = output.join(BUNDLE_GCC);
    std::fs::write(&gcc_path, &blob).map_err(|e| GcError::io(e, &gcc_path))?;

    println!(
        "[bundle-pack] {} files, {} -> {} bytes",
        idx.count,
        concat.len(),
        blob.len()
    );
    Ok(())
}

fn extract_concat(bundle: &Path) -> Result<Vec<u8>> {
    let blob = std::fs::read(bundle)
        .map_err(|_| GcError::Corrupt(format!("bundle not found: {}", bundle.display())))?;
    decompress_any(&blob, &LayerEnv::default())
}

fn slice_entry<'a>(concat: &'a [u8], e: &DirIndexEntry) -> Result<&'a [u8]> {
    let start = e.offset as usize;
    let end = start
        .checked_add(e.length as usize)
        .filter(|&end| end <= concat.len())
        .ok_or_else(|| GcError::Corrupt(format!("bundle slice out of range: {}", e.rel)))?;
    Ok(&concat[start..end])
}

pub fn unpack_single_dir(packed: &Path, restore: &Path) -> Result<()> {
    if !is_single_container_dir(packed) {
        return Err(GcError::Corrupt(format!(
            "not a single-container dir: {}",
            packed.display()
        )));
    }
    let idx = DirBundleIndex::read(&packed.join(BUNDLE_INDEX), "text")?;
    let concat = extract_concat(&packed.join(BUNDLE_GCC))?;
    restore_entries(&idx, &concat, restore)?;
    println!("[bundle-unpack] restored {} files -> {}", idx.count, restore.display());
    Ok(())
}

fn restore_entries(idx: &DirBundleIndex, concat: &[u8], restore: &Path) -> Result<()> {
    std::fs::create_dir_all(restore).map_err(|e| GcError::io(e, restore))?;
    for e in &idx.files {
        let data = slice_entry(concat, e)?;
        let out_path = restore.join(&e.rel);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GcError::io(e, parent))?;
        }
        std::fs::write(&out_path, data).map_err(|e| GcError::io(e, &out_path))?;
    }
    Ok(())
}

/// Light: container frame + concat hash. Full: per-file slice hashes too.
pub fn verify_single_dir(packed: &Path, full: bool) -> Result<()> {
    if !is_single_container_dir(packed) {
        return Err(GcError::Corrupt(format!(
            "not a single-container dir: {}",
            packed.display()
        )));
    }
    let idx = DirBundleIndex::read(&packed.join(BUNDLE_INDEX), "text")?;
    let concat = extract_concat(&packed.join(BUNDLE_GCC))?;
    verify_bundle_against_index(&idx, &concat, full)
}

fn verify_bundle_against_index(idx: &DirBundleIndex, concat: &[u8], full: bool) -> Result<()> {
    if idx.concat_sha256 != sha256_hex(concat) {
        return Err(GcError::Corrupt("bundle concat sha256 mismatch (index vs payload)".into()));
    }
    if !full {
        return Ok(());
    }
    for e in &idx.files {
        let data = slice_entry(concat, e)?;
        if sha256_hex(data) != e.sha256 {
            return Err(GcError::HashMismatch(format!("bundle file hash mismatch: {}", e.rel)));
        }
    }
    Ok(())
}

// ---- mixed mode ------------------------------------------------------------

pub fn is_single_container_mixed_dir(out: &Path) -> bool {
    out.join(BUNDLE_TEXT_GCC).is_file()
        && out.join(BUNDLE_TEXT_INDEX).is_file()
        && out.join(BUNDLE_BIN_GCC).is_file()
        && out.join(BUNDLE_BIN_INDEX).is_file()
}

pub fn pack_single_mixed_dir(input: &Path, output: &Path) -> Result<()> {
    if !input.is_dir() {
        return Err(GcError::Usage(format!("input is not a directory: {}", input.display())));
    }
    std::fs::create_dir_all(output).map_err(|e| GcError::io(e, output))?;

    let root = root_name(input);
    let mut text_idx = DirBundleIndex::new(&root, "text");
    text_idx.layer_used = LayerId::SplitTextNums.name().to_string();
    text_idx.codec_used = CodecId::Zlib.name().to_string();
    text_idx.stream_codecs_used = Some(TEXT_STREAM_CODECS.to_string());
    let mut bin_idx = DirBundleIndex::new(&root, "bin");
    bin_idx.layer_used = LayerId::Bytes.name().to_string();
    bin_idx.codec_used = CodecId::Zstd.name().to_string();

    let mut text_concat: Vec<u8> = Vec::new();
    let mut bin_concat: Vec<u8> = Vec::new();
    for (rel, path) in walk_files(input)? {
        let data = std::fs::read(&path).map_err(|e| GcError::io(e, &path))?;
        let sha = sha256_hex(&data);
        if is_textish_utf8(&data) {
            text_idx.files.push(DirIndexEntry {
                rel,
                offset: text_concat.len() as u64,
                length: data.len() as u64,
                sha256: sha,
            });
            text_concat.extend_from_slice(&data);
        } else {
            bin_idx.files.push(DirIndexEntry {
                rel,
                offset: bin_concat.len() as u64,
                length: data.len() as u64,
                sha256: sha,
            });
            bin_concat.extend_from_slice(&data);
        }
    }

    text_idx.count = text_idx.files.len();
    text_idx.concat_sha256 = sha256_hex(&text_concat);
    text_idx.write(&output.join(BUNDLE_TEXT_INDEX))?;
    bin_idx.count = bin_idx.files.len();
    bin_idx.concat_sha256 = sha256_hex(&bin_concat);
    bin_idx.write(&output.join(BUNDLE_BIN_INDEX))?;

    let env = LayerEnv::default();
    let text_blob = run_pipeline(&text_pipeline(), &text_concat, &env)?;
    std::fs::write(output.join(BUNDLE_TEXT_GCC), &text_blob)
        .map_err(|e| GcError::io(e, output))?;
    let bin_blob = run_pipeline(
        &PipelineSpec::new(LayerId::Bytes, CodecId::Zstd),
        &bin_concat,
        &env,
    )?;
    std::fs::write(output.join(BUNDLE_BIN_GCC), &bin_blob).map_err(|e| GcError::io(e, output))?;

    println!(
        "[bundle-pack] mixed: {} text + {} bin files, {} -> {} bytes",
        text_idx.count,
        bin_idx.count,
        text_concat.len() + bin_concat.len(),
        text_blob.len() + bin_blob.len()
    );
    Ok(())
}

pub fn unpack_single_mixed_dir(packed: &Path, restore: &Path) -> Result<()> {
    if !is_single_container_mixed_dir(packed) {
        return Err(GcError::Corrupt(format!(
            "not a single-container mixed dir: {}",
            packed.display()
        )));
    }
    let text_idx = DirBundleIndex::read(&packed.join(BUNDLE_TEXT_INDEX), "text")?;
    let bin_idx = DirBundleIndex::read(&packed.join(BUNDLE_BIN_INDEX), "bin")?;
    let text_concat = extract_concat(&packed.join(BUNDLE_TEXT_GCC))?;
    let bin_concat = extract_concat(&packed.join(BUNDLE_BIN_GCC))?;
    restore_entries(&text_idx, &text_concat, restore)?;
    restore_entries(&bin_idx, &bin_concat, restore)?;
    println!(
        "[bundle-unpack] restored {} files -> {}",
        text_idx.count + bin_idx.count,
        restore.display()
    );
    Ok(())
}

/// In full mode any decode failure counts as tampering: a corrupted payload
/// can break codec structure before any hash gets compared.
pub fn verify_single_mixed_dir(packed: &Path, full: bool) -> Result<()> {
    if !is_single_container_mixed_dir(packed) {
        return Err(GcError::Corrupt(format!(
            "not a single-container mixed dir: {}",
            packed.display()
        )));
    }
    let text_idx = DirBundleIndex::read(&packed.join(BUNDLE_TEXT_INDEX), "text")?;
    let bin_idx = DirBundleIndex::read(&packed.join(BUNDLE_BIN_INDEX), "bin")?;

    let run = || -> Result<()> {
        let text_concat = extract_concat(&packed.join(BUNDLE_TEXT_GCC))?;
        let bin_concat = extract_concat(&packed.join(BUNDLE_BIN_GCC))?;
        verify_bundle_against_index(&text_idx, &text_concat, full)?;
        verify_bundle_against_index(&bin_idx, &bin_concat, full)?;
        Ok(())
    };
    match run() {
        Ok(()) => Ok(()),
        Err(e @ GcError::HashMismatch(_)) => Err(e),
        Err(e) if full => Err(GcError::HashMismatch(format!("tamper detected: {}", e))),
        Err(e) => Err(e),
    }
}
