//! Per-line template mining.
//!
//! Each line is split into static chunks and numeric fields. The skeleton
//! (chunks) is deduplicated into a template dictionary carried in the TPL
//! stream; the per-line template id goes to IDS and the numeric fields go to
//! NUMS as `(sign, digits_len, magnitude)` triples, so zero padding and an
//! explicit `+` survive the roundtrip.
//!
//! TPL stream format:
//!
//! ```text
//! varint(n_templates)
//!   per template: varint(n_chunks) then varint(len) | chunk bytes
//! ```
//!
//! NUMS stream (uvarints): `n_lines`, then per line `n_nums` followed by the
//! triples.
//!
//! A numeric field is a run of ASCII digits, optionally preceded by a unary
//! `+`/`-`. The sign is unary only at line start, after whitespace, or after
//! a value separator, so dates and ranges like `2024-01-01` keep their `-` in
//! the template. Digit runs longer than 18 digits are split into several
//! fields (empty chunks in between) to stay inside u64.
//!
//! `tpl_lines_shared_v0` adds a bucket-level base dictionary: the TPL stream
//! then carries only templates missing from the base, IDS addresses the
//! concatenated `base + delta` space, and meta pins the base with its size
//! and 8-byte tag.

use sha2::{Digest, Sha256};

use crate::error::{GcError, Result};
use crate::mbn::{ST_IDS, ST_NUMS, ST_TPL};
use crate::varint::{decode_uints, encode_uints, read_len, read_uvarint, write_uvarint};

use super::Encoded;

const SIGN_NONE: u64 = 0;
const SIGN_PLUS: u64 = 1;
const SIGN_MINUS: u64 = 2;

const FMT_VERSION: u8 = 1;
const TOK_RULES: u8 = 1;

const FLAG_EMPTY: u8 = 0x01;

const MAX_FIELD_DIGITS: usize = 18;

pub type Template = Vec<Vec<u8>>;

/// Bucket-level shared template dictionary (`tpl_dict_v0` archive resource).
#[derive(Debug, Clone)]
pub struct TplDict {
    templates: Vec<Template>,
    tag8: [u8; 8],
}

const TPLD_MAGIC: &[u8; 4] = b"TPLD";
const TPLD_VER: u8 = 1;

impl TplDict {
    pub fn new(templates: Vec<Template>) -> Self {
        let blob = Self::blob_of(&templates);
        let mut tag8 = [0u8; 8];
        tag8.copy_from_slice(&Sha256::digest(&blob)[..8]);
        TplDict { templates, tag8 }
    }

    fn blob_of(templates: &[Template]) -> Vec<u8> {
        let mut blob = Vec::new();
        blob.extend_from_slice(TPLD_MAGIC);
        blob.extend_from_slice(&[TPLD_VER, FMT_VERSION, TOK_RULES, 0]);
        blob.extend_from_slice(&pack_templates(templates));
        blob
    }

    pub fn to_blob(&self) -> Vec<u8> {
        Self::blob_of(&self.templates)
    }

    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        if blob.len() < 8 || &blob[..4] != TPLD_MAGIC {
            return Err(GcError::Corrupt("tpl_dict_v0: bad magic".into()));
        }
        if blob[4] != TPLD_VER {
            return Err(GcError::Corrupt(format!(
                "tpl_dict_v0: unsupported version {}",
                blob[4]
            )));
        }
        let templates = unpack_templates(&blob[8..])?;
        let mut tag8 = [0u8; 8];
        tag8.copy_from_slice(&Sha256::digest(blob)[..8]);
        Ok(TplDict { templates, tag8 })
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn tag8(&self) -> [u8; 8] {
        self.tag8
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

pub fn pack_templates(templates: &[Template]) -> Vec<u8> {
    let mut out = Vec::new();
    write_uvarint(&mut out, templates.len() as u64);
    for chunks in templates {
        write_uvarint(&mut out, chunks.len() as u64);
        for c in chunks {
            write_uvarint(&mut out, c.len() as u64);
            out.extend_from_slice(c);
        }
    }
    out
}

pub fn unpack_templates(raw: &[u8]) -> Result<Vec<Template>> {
    let mut idx = 0;
    let n = read_len(raw, &mut idx)?;
    let mut out = Vec::with_capacity(n.min(1 << 20));
    for _ in 0..n {
        let n_chunks = read_len(raw, &mut idx)?;
        if n_chunks < 1 {
            return Err(GcError::Corrupt("tpl_lines: template without chunks".into()));
        }
        let mut chunks = Vec::with_capacity(n_chunks.min(1 << 20));
        for _ in 0..n_chunks {
            let len = read_len(raw, &mut idx)?;
            let end = idx
                .checked_add(len)
                .filter(|&e| e <= raw.len())
                .ok_or_else(|| GcError::Corrupt("tpl_lines: truncated chunk".into()))?;
            chunks.push(raw[idx..end].to_vec());
            idx = end;
        }
        out.push(chunks);
    }
    if idx != raw.len() {
        return Err(GcError::Corrupt("tpl_lines: trailing bytes in TPL stream".into()));
    }
    Ok(out)
}

fn is_unary_sign(line: &[u8], pos: usize) -> bool {
    if pos == 0 {
        return true;
    }
    matches!(
        line[pos - 1],
        b'\t' | b'\n' | b'\r' | b' ' | b'(' | b'[' | b'{' | b'<' | b'=' | b':' | b',' | b';'
    )
}

/// Split one line into `n_nums + 1` chunks and the numeric triples between them.
fn split_line(line: &[u8]) -> (Template, Vec<(u64, u64, u64)>) {
    let n = line.len();
    let mut i = 0;
    let mut last = 0;
    let mut chunks: Template = Vec::new();
    let mut nums: Vec<(u64, u64, u64)> = Vec::new();

    while i < n {
        let c = line[i];
        let (start, sign, digits_from) = if (c == b'+' || c == b'-')
            && i + 1 < n
            && line[i + 1].is_ascii_digit()
            && is_unary_sign(line, i)
        {
            let sign = if c == b'+' { SIGN_PLUS } else { SIGN_MINUS };
            (i, sign, i + 1)
        } else if c.is_ascii_digit() {
            (i, SIGN_NONE, i)
        } else {
            i += 1;
            continue;
        };

        let mut j = digits_from;
        while j < n && line[j].is_ascii_digit() && (j - digits_from) < MAX_FIELD_DIGITS {
            j += 1;
        }

        chunks.push(line[last..start].to_vec());
        last = j;

        let digits = &line[digits_from..j];
        let mut magnitude: u64 = 0;
        for &d in digits {
            magnitude = magnitude * 10 + u64::from(d - b'0');
        }
        nums.push((sign, digits.len() as u64, magnitude));

        i = j;
    }

    chunks.push(line[last..].to_vec());
    (chunks, nums)
}

fn encode_lines(data: &[u8]) -> (Vec<Template>, Vec<u64>, Vec<u64>, bool) {
    let lines: Vec<&[u8]> = data.split_inclusive(|&b| b == b'\n').collect();

    if lines.is_empty() {
        // Self-contained empty-file encoding: one placeholder line with an
        // empty template and no numbers.
        return (vec![vec![Vec::new()]], vec![0], vec![1, 0], true);
    }

    let mut templates: Vec<Template> = Vec::new();
    let mut index: std::collections::HashMap<Template, u64> = std::collections::HashMap::new();
    let mut ids: Vec<u64> = Vec::with_capacity(lines.len());
    let mut nums: Vec<u64> = Vec::new();
    nums.push(lines.len() as u64);

    for line in lines {
        let (chunks, line_nums) = split_line(line);
        let tid = *index.entry(chunks.clone()).or_insert_with(|| {
            templates.push(chunks);
            (templates.len() - 1) as u64
        });
        ids.push(tid);

        nums.push(line_nums.len() as u64);
        for (sign, dlen, mag) in line_nums {
            nums.push(sign);
            nums.push(dlen);
            nums.push(mag);
        }
    }

    (templates, ids, nums, false)
}

pub fn encode_v0(data: &[u8]) -> Result<Encoded> {
    let (templates, ids, nums, _empty) = encode_lines(data);
    Ok(Encoded {
        streams: vec![
            (ST_TPL, pack_templates(&templates)),
            (ST_IDS, encode_uints(&ids)),
            (ST_NUMS, encode_uints(&nums)),
        ],
        meta: vec![FMT_VERSION, TOK_RULES],
    })
}

pub fn decode_v0(tpl: &[u8], ids_raw: &[u8], nums_raw: &[u8], meta: &[u8]) -> Result<Vec<u8>> {
    let (fmt, _tok, empty) = unpack_meta_v0(meta)?;
    if fmt != FMT_VERSION {
        return Err(GcError::Corrupt(format!("tpl_lines_v0: unsupported fmt {}", fmt)));
    }
    let templates = unpack_templates(tpl)?;
    render(&templates, ids_raw, nums_raw, empty, "tpl_lines_v0")
}

fn unpack_meta_v0(meta: &[u8]) -> Result<(u8, u8, bool)> {
    if meta.is_empty() {
        return Ok((FMT_VERSION, TOK_RULES, false));
    }
    if meta.len() < 2 {
        return Err(GcError::Corrupt("tpl_lines_v0: meta too short".into()));
    }
    Ok((meta[0], meta[1], false))
}

/// Rebuild the text from templates, per-line ids and the numeric triples.
fn render(
    templates: &[Template],
    ids_raw: &[u8],
    nums_raw: &[u8],
    empty_hint: bool,
    what: &str,
) -> Result<Vec<u8>> {
    let ids = decode_uints(ids_raw)?;
    let nums = decode_uints(nums_raw)?;
    if nums.is_empty() {
        return Err(GcError::Corrupt(format!("{}: empty NUMS stream", what)));
    }

    let mut idx = 0;
    let n_lines = nums[idx] as usize;
    idx += 1;

    if n_lines != ids.len() && !(empty_hint && n_lines == 1 && ids.len() == 1) {
        return Err(GcError::Corrupt(format!(
            "{}: line count mismatch between NUMS and IDS",
            what
        )));
    }

    let mut out = Vec::new();
    for li in 0..n_lines {
        let n_nums = *nums
            .get(idx)
            .ok_or_else(|| GcError::Corrupt(format!("{}: truncated NUMS stream", what)))?
            as usize;
        idx += 1;

        let tid = ids.get(li).copied().unwrap_or(0) as usize;
        let chunks = templates
            .get(tid)
            .ok_or_else(|| GcError::Corrupt(format!("{}: template id {} out of range", what, tid)))?;
        let expected = chunks.len().saturating_sub(1);
        if n_nums != expected {
            return Err(GcError::Corrupt(format!(
                "{}: field count mismatch: got={} expected={}",
                what, n_nums, expected
            )));
        }

        out.extend_from_slice(&chunks[0]);
        for ni in 0..n_nums {
            if idx + 3 > nums.len() {
                return Err(GcError::Corrupt(format!("{}: truncated triple", what)));
            }
            let sign = nums[idx];
            let dlen = nums[idx + 1] as usize;
            let mag = nums[idx + 2];
            idx += 3;

            match sign {
                SIGN_NONE => {}
                SIGN_PLUS => out.push(b'+'),
                SIGN_MINUS => out.push(b'-'),
                other => {
                    return Err(GcError::Corrupt(format!("{}: bad sign code {}", what, other)))
                }
            }

            if dlen < 1 || dlen > MAX_FIELD_DIGITS {
                return Err(GcError::Corrupt(format!("{}: bad digits_len {}", what, dlen)));
            }
            let digits = mag.to_string();
            if digits.len() > dlen {
                return Err(GcError::Corrupt(format!(
                    "{}: digits_len {} smaller than value width {}",
                    what,
                    dlen,
                    digits.len()
                )));
            }
            for _ in digits.len()..dlen {
                out.push(b'0');
            }
            out.extend_from_slice(digits.as_bytes());
            out.extend_from_slice(&chunks[ni + 1]);
        }
    }

    if idx != nums.len() {
        return Err(GcError::Corrupt(format!("{}: trailing data in NUMS stream", what)));
    }
    Ok(out)
}

// ---- shared-dict variant -------------------------------------------------

pub fn encode_shared(data: &[u8], base: Option<&TplDict>) -> Result<Encoded> {
    let (templates, ids, nums, empty) = encode_lines(data);

    if empty {
        return Ok(Encoded {
            streams: vec![
                (ST_TPL, pack_templates(&templates)),
                (ST_IDS, encode_uints(&ids)),
                (ST_NUMS, encode_uints(&nums)),
            ],
            meta: pack_meta_shared(FLAG_EMPTY, 0, None),
        });
    }

    let base = match base {
        Some(b) if !b.is_empty() => b,
        _ => {
            return Ok(Encoded {
                streams: vec![
                    (ST_TPL, pack_templates(&templates)),
                    (ST_IDS, encode_uints(&ids)),
                    (ST_NUMS, encode_uints(&nums)),
                ],
                meta: pack_meta_shared(0, 0, None),
            })
        }
    };

    // Map every local template into the (base + delta) space.
    let base_index: std::collections::HashMap<&Template, u64> = base
        .templates()
        .iter()
        .enumerate()
        .map(|(i, t)| (t, i as u64))
        .collect();

    let mut delta: Vec<Template> = Vec::new();
    let mut delta_index: std::collections::HashMap<Template, u64> =
        std::collections::HashMap::new();
    let mut tid_map: Vec<u64> = Vec::with_capacity(templates.len());

    for tpl in &templates {
        if let Some(&bi) = base_index.get(tpl) {
            tid_map.push(bi);
        } else {
            let di = *delta_index.entry(tpl.clone()).or_insert_with(|| {
                delta.push(tpl.clone());
                (delta.len() - 1) as u64
            });
            tid_map.push(base.len() as u64 + di);
        }
    }

    let ids2: Vec<u64> = ids.iter().map(|&t| tid_map[t as usize]).collect();

    Ok(Encoded {
        streams: vec![
            (ST_TPL, pack_templates(&delta)),
            (ST_IDS, encode_uints(&ids2)),
            (ST_NUMS, encode_uints(&nums)),
        ],
        meta: pack_meta_shared(0, base.len() as u64, Some(base.tag8())),
    })
}

pub fn decode_shared(
    tpl: &[u8],
    ids_raw: &[u8],
    nums_raw: &[u8],
    meta: &[u8],
    base: Option<&TplDict>,
) -> Result<Vec<u8>> {
    let (fmt, _tok, flags, base_n, base_tag8) = unpack_meta_shared(meta)?;
    if fmt != FMT_VERSION {
        return Err(GcError::Corrupt(format!(
            "tpl_lines_shared_v0: unsupported fmt {}",
            fmt
        )));
    }
    let empty = flags & FLAG_EMPTY != 0;

    let templates: Vec<Template> = if base_n > 0 {
        let b = base.ok_or_else(|| {
            GcError::MissingResource("tpl_lines_shared_v0: base dict required but not configured".into())
        })?;
        if b.len() as u64 != base_n {
            return Err(GcError::Corrupt("tpl_lines_shared_v0: base_n mismatch".into()));
        }
        match base_tag8 {
            Some(tag) if tag == b.tag8() => {}
            _ => return Err(GcError::Corrupt("tpl_lines_shared_v0: base tag8 mismatch".into())),
        }
        let delta = unpack_templates(tpl)?;
        b.templates().iter().cloned().chain(delta).collect()
    } else {
        unpack_templates(tpl)?
    };

    render(&templates, ids_raw, nums_raw, empty, "tpl_lines_shared_v0")
}

fn pack_meta_shared(flags: u8, base_n: u64, base_tag8: Option<[u8; 8]>) -> Vec<u8> {
    let mut out = vec![FMT_VERSION, TOK_RULES, flags];
    write_uvarint(&mut out, base_n);
    if base_n > 0 {
        out.extend_from_slice(&base_tag8.expect("tag8 required when base_n > 0"));
    }
    out
}

fn unpack_meta_shared(meta: &[u8]) -> Result<(u8, u8, u8, u64, Option<[u8; 8]>)> {
    if meta.is_empty() {
        return Ok((FMT_VERSION, TOK_RULES, 0, 0, None));
    }
    if meta.len() < 3 {
        return Err(GcError::Corrupt("tpl_lines_shared_v0: meta too short".into()));
    }
    let (fmt, tok, flags) = (meta[0], meta[1], meta[2]);
    let mut idx = 3;
    let base_n = read_uvarint(meta, &mut idx)?;
    let tag = if base_n > 0 {
        if idx + 8 > meta.len() {
            return Err(GcError::Corrupt("tpl_lines_shared_v0: truncated tag8".into()));
        }
        let mut t = [0u8; 8];
        t.copy_from_slice(&meta[idx..idx + 8]);
        idx += 8;
        Some(t)
    } else {
        None
    };
    if idx != meta.len() {
        return Err(GcError::Corrupt("tpl_lines_shared_v0: trailing meta bytes".into()));
    }
    Ok((fmt, tok, flags, base_n, tag))
}

/// Unique line templates of one input, first-seen order. Used by the
/// directory packer to mine a bucket-level dictionary.
pub fn collect_templates(data: &[u8]) -> Vec<Template> {
    let (templates, _, _, empty) = encode_lines(data);
    if empty {
        Vec::new()
    } else {
        templates
    }
}
