//! Verification: light (structural) and full (hash-level) integrity checks.
//!
//! - `verify_gca`: one archive. Light validates the trailer, the index CRC
//!   and the index-body SHA from the trailer record; full recomputes every
//!   blob's SHA-256/CRC32 against the index fields (streaming, chunked).
//! - `verify_packed_dir`: manifest + every referenced archive, plus the
//!   manifest/index cross-check — `(archive_offset, archive_length)` is the
//!   authoritative key, `rel` (exact, then unique suffix) the best-effort
//!   secondary — and the bucket-summary resource presence check.
//! - `verify_container_file`: single `.gcc` file; full also decodes it.
//!
//! Findings are aggregated per artifact and the most severe one is reported
//! (severity follows the exit-code ladder, HashMismatch highest).

use std::collections::HashMap;
use std::path::Path;

use crate::dir_pack::{read_manifest, Manifest, ManifestFileRec, MANIFEST_NAME};
use crate::error::{GcError, Result};
use crate::gca::{sha256_hex, GcaEntry, GcaReader, RES_PREFIX};
use crate::layers::LayerEnv;
use crate::legacy::decompress_any;

/// Keep the worst finding; `None` means clean so far.
fn worse(current: Option<GcError>, new: GcError) -> Option<GcError> {
    match current {
        None => Some(new),
        Some(old) if new.severity() > old.severity() => Some(new),
        Some(old) => Some(old),
    }
}

/// Verify a single GCA1 archive.
pub fn verify_gca(path: &Path, full: bool) -> Result<()> {
    if !path.is_file() {
        return Err(GcError::Corrupt(format!("GCA not found: {}", path.display())));
    }
    let mut reader = GcaReader::open(path)?;

    // Trailer record: recompute the index-body hash over every entry line.
    let raw = reader.index_raw()?.to_vec();
    if let Some(trailer) = reader.index_trailer()? {
        if let Some(expected) = trailer.meta.get("index_body_sha256").and_then(|v| v.as_str()) {
            let lines: Vec<&[u8]> = raw.split_inclusive(|&b| b == b'\n').collect();
            let body: Vec<u8> = lines[..lines.len().saturating_sub(1)].concat();
            if sha256_hex(&body) != expected {
                return Err(GcError::HashMismatch(format!(
                    "GCA index_body_sha256 mismatch: {}",
                    path.display()
                )));
            }
        }
    }

    if full {
        let entries: Vec<GcaEntry> = reader.entries()?.to_vec();
        for e in &entries {
            if e.kind() == "trailer" || e.length == 0 {
                continue;
            }
            let (got_sha, got_crc) = reader.sha256_crc32_blob(e.offset, e.length)?;
            if let Some(want) = e.blob_sha256() {
                if got_sha != want {
                    return Err(GcError::HashMismatch(format!(
                        "GCA blob hash mismatch for {}",
                        e.rel
                    )));
                }
            }
            if let Some(want) = e.blob_crc32() {
                if got_crc != want {
                    return Err(GcError::HashMismatch(format!(
                        "GCA blob CRC mismatch for {}",
                        e.rel
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Verify a classic packed directory (manifest + per-bucket archives).
pub fn verify_packed_dir(output: &Path, full: bool) -> Result<()> {
    let manifest = read_manifest(&output.join(MANIFEST_NAME))?;

    let mut archives: Vec<&str> = manifest.files.iter().map(|r| r.archive.as_str()).collect();
    archives.sort_unstable();
    archives.dedup();

    let mut finding: Option<GcError> = None;
    for arch in &archives {
        if let Err(e) = verify_gca(&output.join(arch), full) {
            finding = worse(finding, e);
        }
        if let Err(e) = cross_check_archive(output, arch, &manifest, full) {
            finding = worse(finding, e);
        }
    }
    match finding {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn cross_check_archive(output: &Path, arch: &str, manifest: &Manifest, full: bool) -> Result<()> {
    let recs: Vec<&ManifestFileRec> =
        manifest.files.iter().filter(|r| r.archive == arch).collect();
    let mut reader = GcaReader::open(&output.join(arch))?;

    let entries: Vec<GcaEntry> = reader.entries()?.to_vec();
    let mut by_rel: HashMap<&str, &GcaEntry> = HashMap::new();
    let mut by_offlen: HashMap<(u64, u64), &GcaEntry> = HashMap::new();
    for e in &entries {
        if e.kind() == "trailer" {
            continue;
        }
        if !e.rel.is_empty() {
            by_rel.insert(e.rel.as_str(), e);
        }
        by_offlen.insert((e.offset, e.length), e);
    }

    for rec in &recs {
        let mut entry = by_rel.get(rec.rel.as_str()).copied();
        if entry.is_none() {
            // Some writers prefix rel (e.g. "files/a.txt"): suffix match if unique.
            let suffix = format!("/{}", rec.rel);
            let mut candidates = by_rel
                .iter()
                .filter(|(r, _)| r.ends_with(&suffix))
                .map(|(_, e)| *e);
            if let (Some(only), None) = (candidates.next(), candidates.next()) {
                entry = Some(only);
            }
        }
        if entry.is_none() {
            entry = by_offlen.get(&(rec.archive_offset, rec.archive_length)).copied();
        }
        let Some(entry) = entry else {
            return Err(GcError::Corrupt(format!(
                "manifest points at a missing entry in {}: {}",
                arch, rec.rel
            )));
        };

        if let (Some(m), Some(a)) = (rec.blob_sha256.as_deref(), entry.blob_sha256()) {
            if m != a {
                return Err(GcError::HashMismatch(format!(
                    "manifest/index blob_sha256 mismatch: {}",
                    rec.rel
                )));
            }
        }

        if full {
            let (got_sha, got_crc) =
                reader.sha256_crc32_blob(rec.archive_offset, rec.archive_length)?;
            if let Some(want) = entry.blob_sha256() {
                if got_sha != want {
                    return Err(GcError::HashMismatch(format!("blob hash mismatch: {}", rec.rel)));
                }
            }
            if let Some(want) = entry.blob_crc32() {
                if got_crc != want {
                    return Err(GcError::HashMismatch(format!("blob CRC mismatch: {}", rec.rel)));
                }
            }
        }
    }

    // Required resources declared by the bucket summaries of this archive.
    let buckets: Vec<u32> = {
        let mut b: Vec<u32> = recs.iter().map(|r| r.bucket).collect();
        b.sort_unstable();
        b.dedup();
        b
    };
    for bucket in buckets {
        let Some(summary) = manifest.bucket_summaries.get(&bucket) else { continue };
        for name in &summary.bucket_resources {
            let res_rel = format!("{}{}", RES_PREFIX, name);
            let Some(entry) = by_rel.get(res_rel.as_str()) else {
                return Err(GcError::MissingResource(format!(
                    "resource missing in {}: bucket={} name={}",
                    arch, bucket, name
                )));
            };
            let declared_sha = summary
                .bucket_resources_meta
                .get(name)
                .and_then(|m| m.get("blob_sha256"))
                .and_then(|v| v.as_str());
            if let (Some(want), Some(have)) = (declared_sha, entry.blob_sha256()) {
                if want != have {
                    return Err(GcError::HashMismatch(format!(
                        "resource sha mismatch: {} {}",
                        arch, name
                    )));
                }
            }
            if full {
                if let Some(want) = declared_sha {
                    let (got_sha, _) = reader.sha256_crc32_blob(entry.offset, entry.length)?;
                    if got_sha != want {
                        return Err(GcError::HashMismatch(format!(
                            "resource blob hash mismatch: {} {}",
                            arch, name
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Verify a single container file. Light parses the frame; full decodes it.
pub fn verify_container_file(path: &Path, full: bool) -> Result<()> {
    if !path.is_file() {
        return Err(GcError::Corrupt(format!("file not found: {}", path.display())));
    }
    let blob = std::fs::read(path).map_err(|e| GcError::io(e, path))?;

    if blob.len() < 4 || &blob[..3] != crate::container::MAGIC {
        return Err(GcError::Corrupt(format!("not a GCC container: {}", path.display())));
    }
    if blob[3] == crate::container::VER_V6 {
        crate::container::unpack_container_v6(&blob)?;
    } else if !(1..=6).contains(&blob[3]) {
        return Err(GcError::UnsupportedVersion(format!("container version {}", blob[3])));
    }

    if full {
        decompress_any(&blob, &LayerEnv::default())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gca::GcaWriter;

    #[test]
    fn verify_gca_light_passes_and_detects_blob_tamper_in_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.gca");
        let mut w = GcaWriter::create(&path).unwrap();
        w.append("f", b"some blob payload bytes", serde_json::Map::new()).unwrap();
        w.finish().unwrap();

        verify_gca(&path, false).unwrap();
        verify_gca(&path, true).unwrap();

        // Flip one blob byte: light still passes, full reports HashMismatch.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[2] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();
        verify_gca(&path, false).unwrap();
        assert!(matches!(verify_gca(&path, true), Err(GcError::HashMismatch(_))));
    }
}
