//! # GCA1 bucket archive
//!
//! A GCA archive is not a compression container: every entry payload is an
//! existing, self-contained blob (typically a v6 container). Layout:
//!
//! ```text
//! [blob0][blob1]...[blobN-1][index_zlib][TRAILER]
//! ```
//!
//! The fixed 16-byte trailer, read from the end of the file:
//!
//! ```text
//! magic      4B  "GCA1"
//! index_len  8B  u64 little endian
//! index_crc  4B  u32 little endian, CRC32 over index_zlib
//! ```
//!
//! `index_zlib` is zlib-compressed UTF-8 JSONL. Every entry line carries at
//! least `rel`, `offset`, `length`; the writer adds `blob_sha256` and
//! `blob_crc32`. Resource entries live under `rel = "__res__/NAME"` with
//! `kind = "resource"`. The final line is a trailer record
//! (`gca.index_trailer.v1`) whose `index_body_sha256` covers the concatenated
//! entry lines including their terminating newlines.
//!
//! The archive is append-friendly: blobs first, then index + trailer.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32;
use sha2::{Digest, Sha256};

use crate::error::{GcError, Result};

pub const GCA_MAGIC: &[u8; 4] = b"GCA1";
pub const TRAILER_LEN: u64 = 16;

pub const RES_PREFIX: &str = "__res__/";
pub const INDEX_TRAILER_SCHEMA: &str = "gca.index_trailer.v1";

/// zlib level for the index; small and worth squeezing.
const INDEX_ZLIB_LEVEL: u32 = 9;

/// Streaming hash chunk.
pub const CHUNK_SIZE: usize = 256 * 1024;

fn hex(digest: &[u8]) -> String {
    let mut s = String::with_capacity(digest.len() * 2);
    for b in digest {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex(&Sha256::digest(data))
}

pub fn crc32_of(data: &[u8]) -> u32 {
    let mut h = Crc32::new();
    h.update(data);
    h.finalize()
}

#[derive(Debug, Clone)]
pub struct GcaEntry {
    pub rel: String,
    pub offset: u64,
    pub length: u64,
    /// Extra index fields (integrity hashes, resource metadata, plan notes).
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl GcaEntry {
    pub fn kind(&self) -> &str {
        self.meta.get("kind").and_then(|v| v.as_str()).unwrap_or("entry")
    }

    pub fn blob_sha256(&self) -> Option<&str> {
        self.meta.get("blob_sha256").and_then(|v| v.as_str())
    }

    pub fn blob_crc32(&self) -> Option<u32> {
        self.meta.get("blob_crc32").and_then(|v| v.as_u64()).map(|v| v as u32)
    }

    pub fn res_name(&self) -> Option<String> {
        if let Some(n) = self.meta.get("res_name").and_then(|v| v.as_str()) {
            return Some(n.to_string());
        }
        self.rel.strip_prefix(RES_PREFIX).map(str::to_string)
    }

    pub fn is_resource(&self) -> bool {
        self.kind() == "resource" || self.rel.starts_with(RES_PREFIX)
    }
}

// ---- writer --------------------------------------------------------------

pub struct GcaWriter {
    path: PathBuf,
    file: File,
    offset: u64,
    entries: Vec<GcaEntry>,
    closed: bool,
}

impl GcaWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GcError::io(e, parent))?;
        }
        let file = File::create(path).map_err(|e| GcError::io(e, path))?;
        Ok(GcaWriter {
            path: path.to_path_buf(),
            file,
            offset: 0,
            entries: Vec::new(),
            closed: false,
        })
    }

    /// Append a blob and record its index entry. Integrity hashes are filled
    /// in unless the caller already provided them in `meta`.
    pub fn append(
        &mut self,
        rel: &str,
        blob: &[u8],
        meta: serde_json::Map<String, serde_json::Value>,
    ) -> Result<&GcaEntry> {
        if self.closed {
            return Err(GcError::Usage("GCA writer already closed".into()));
        }
        let mut meta = meta;
        meta.entry("blob_sha256".to_string())
            .or_insert_with(|| serde_json::Value::String(sha256_hex(blob)));
        meta.entry("blob_crc32".to_string())
            .or_insert_with(|| serde_json::Value::from(crc32_of(blob)));

        self.file.write_all(blob).map_err(|e| GcError::io(e, &self.path))?;
        let entry = GcaEntry {
            rel: rel.to_string(),
            offset: self.offset,
            length: blob.len() as u64,
            meta,
        };
        self.offset += blob.len() as u64;
        self.entries.push(entry);
        Ok(self.entries.last().unwrap())
    }

    /// Append a bucket-level resource under the reserved rel prefix.
    pub fn append_resource(
        &mut self,
        name: &str,
        blob: &[u8],
        meta: serde_json::Map<String, serde_json::Value>,
    ) -> Result<&GcaEntry> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GcError::Usage("GCA resource name is empty".into()));
        }
        let mut meta = meta;
        meta.entry("kind".to_string())
            .or_insert_with(|| serde_json::Value::String("resource".into()));
        meta.entry("res_name".to_string())
            .or_insert_with(|| serde_json::Value::String(name.to_string()));
        let rel = format!("{}{}", RES_PREFIX, name);
        self.append(&rel, blob, meta)
    }

    pub fn entries(&self) -> &[GcaEntry] {
        &self.entries
    }

    /// Build the JSONL index, compress it, and write index + trailer.
    pub fn finish(mut self) -> Result<()> {
        let mut body = Vec::new();
        for e in &self.entries {
            let mut obj = serde_json::Map::new();
            obj.insert("rel".into(), serde_json::Value::String(e.rel.clone()));
            obj.insert("offset".into(), serde_json::Value::from(e.offset));
            obj.insert("length".into(), serde_json::Value::from(e.length));
            for (k, v) in &e.meta {
                obj.entry(k.clone()).or_insert_with(|| v.clone());
            }
            serde_json::to_writer(&mut body, &serde_json::Value::Object(obj))?;
            body.push(b'\n');
        }
        let body_sha = sha256_hex(&body);

        let mut trailer_rec = serde_json::Map::new();
        trailer_rec.insert("kind".into(), serde_json::Value::String("trailer".into()));
        trailer_rec.insert(
            "schema".into(),
            serde_json::Value::String(INDEX_TRAILER_SCHEMA.into()),
        );
        trailer_rec.insert("entries".into(), serde_json::Value::from(self.entries.len()));
        trailer_rec.insert("index_body_sha256".into(), serde_json::Value::String(body_sha));

        let mut index_raw = body;
        serde_json::to_writer(&mut index_raw, &serde_json::Value::Object(trailer_rec))?;
        index_raw.push(b'\n');

        let mut enc = flate2::write::ZlibEncoder::new(
            Vec::new(),
            flate2::Compression::new(INDEX_ZLIB_LEVEL),
        );
        enc.write_all(&index_raw).map_err(|e| GcError::io(e, &self.path))?;
        let index_zlib = enc.finish().map_err(|e| GcError::io(e, &self.path))?;
        let index_crc = crc32_of(&index_zlib);

        self.file.write_all(&index_zlib).map_err(|e| GcError::io(e, &self.path))?;
        self.file.write_all(GCA_MAGIC).map_err(|e| GcError::io(e, &self.path))?;
        self.file
            .write_all(&(index_zlib.len() as u64).to_le_bytes())
            .map_err(|e| GcError::io(e, &self.path))?;
        self.file
            .write_all(&index_crc.to_le_bytes())
            .map_err(|e| GcError::io(e, &self.path))?;
        self.file.flush().map_err(|e| GcError::io(e, &self.path))?;
        self.closed = true;
        Ok(())
    }
}

// ---- reader --------------------------------------------------------------

pub struct GcaReader {
    path: PathBuf,
    file: File,
    index: Option<Vec<GcaEntry>>,
    index_raw: Vec<u8>,
}

impl GcaReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| GcError::io(e, path))?;
        Ok(GcaReader { path: path.to_path_buf(), file, index: None, index_raw: Vec::new() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_index(&mut self) -> Result<()> {
        if self.index.is_some() {
            return Ok(());
        }
        let size = self
            .file
            .seek(SeekFrom::End(0))
            .map_err(|e| GcError::io(e, &self.path))?;
        if size < TRAILER_LEN {
            return Err(GcError::Corrupt(format!("GCA: file too short: {}", self.path.display())));
        }
        self.file
            .seek(SeekFrom::Start(size - TRAILER_LEN))
            .map_err(|e| GcError::io(e, &self.path))?;
        let mut trailer = [0u8; TRAILER_LEN as usize];
        self.file
            .read_exact(&mut trailer)
            .map_err(|e| GcError::io(e, &self.path))?;

        if &trailer[..4] != GCA_MAGIC {
            return Err(GcError::Corrupt(format!("GCA: bad trailer magic: {}", self.path.display())));
        }
        let index_len = u64::from_le_bytes(trailer[4..12].try_into().unwrap());
        let index_crc = u32::from_le_bytes(trailer[12..16].try_into().unwrap());
        if index_len == 0 || index_len > size - TRAILER_LEN {
            return Err(GcError::Corrupt(format!("GCA: invalid index_len: {}", self.path.display())));
        }

        let index_off = size - TRAILER_LEN - index_len;
        self.file
            .seek(SeekFrom::Start(index_off))
            .map_err(|e| GcError::io(e, &self.path))?;
        let mut index_zlib = vec![0u8; index_len as usize];
        self.file
            .read_exact(&mut index_zlib)
            .map_err(|e| GcError::io(e, &self.path))?;

        if crc32_of(&index_zlib) != index_crc {
            return Err(GcError::Corrupt(format!("GCA: index CRC mismatch: {}", self.path.display())));
        }

        let mut dec = flate2::read::ZlibDecoder::new(&index_zlib[..]);
        let mut index_raw = Vec::new();
        dec.read_to_end(&mut index_raw)
            .map_err(|e| GcError::Corrupt(format!("GCA: index inflate: {}", e)))?;

        let mut entries = Vec::new();
        for line in index_raw.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            let value: serde_json::Value = serde_json::from_slice(line)
                .map_err(|e| GcError::Corrupt(format!("GCA: index JSONL: {}", e)))?;
            let obj = value
                .as_object()
                .ok_or_else(|| GcError::Corrupt("GCA: index line is not an object".into()))?;

            let rel = obj.get("rel").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let offset = obj.get("offset").and_then(|v| v.as_u64()).unwrap_or(0);
            let length = obj.get("length").and_then(|v| v.as_u64()).unwrap_or(0);
            let mut meta = serde_json::Map::new();
            for (k, v) in obj {
                if !matches!(k.as_str(), "rel" | "offset" | "length") {
                    meta.insert(k.clone(), v.clone());
                }
            }
            entries.push(GcaEntry { rel, offset, length, meta });
        }

        self.index_raw = index_raw;
        self.index = Some(entries);
        Ok(())
    }

    /// Decompressed JSONL index bytes (entry lines plus trailer record).
    pub fn index_raw(&mut self) -> Result<&[u8]> {
        self.load_index()?;
        Ok(&self.index_raw)
    }

    /// The parsed trailer record, if the last index line is one.
    pub fn index_trailer(&mut self) -> Result<Option<GcaEntry>> {
        self.load_index()?;
        let entries = self.index.as_ref().unwrap();
        Ok(entries.last().filter(|e| e.kind() == "trailer").cloned())
    }

    pub fn entries(&mut self) -> Result<&[GcaEntry]> {
        self.load_index()?;
        Ok(self.index.as_deref().unwrap())
    }

    pub fn get_blob(&mut self, rel: &str) -> Result<Vec<u8>> {
        self.load_index()?;
        let (offset, length) = {
            let entries = self.index.as_ref().unwrap();
            let e = entries
                .iter()
                .find(|e| e.rel == rel && e.kind() != "trailer")
                .ok_or_else(|| GcError::Corrupt(format!("GCA: no entry for {:?}", rel)))?;
            (e.offset, e.length)
        };
        self.read_blob(offset, length)
    }

    pub fn read_blob(&mut self, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| GcError::io(e, &self.path))?;
        let mut blob = vec![0u8; length as usize];
        self.file
            .read_exact(&mut blob)
            .map_err(|_| GcError::Corrupt(format!("GCA: truncated blob: {}", self.path.display())))?;
        Ok(blob)
    }

    /// Streaming SHA-256 + CRC32 of a blob segment, chunked to bound memory.
    pub fn sha256_crc32_blob(&mut self, offset: u64, length: u64) -> Result<(String, u32)> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| GcError::io(e, &self.path))?;
        let mut sha = Sha256::new();
        let mut crc = Crc32::new();
        let mut remaining = length;
        let mut buf = vec![0u8; CHUNK_SIZE];
        while remaining > 0 {
            let n = remaining.min(CHUNK_SIZE as u64) as usize;
            self.file.read_exact(&mut buf[..n]).map_err(|_| {
                GcError::Corrupt(format!("GCA: truncated blob: {}", self.path.display()))
            })?;
            sha.update(&buf[..n]);
            crc.update(&buf[..n]);
            remaining -= n as u64;
        }
        Ok((hex(&sha.finalize()), crc.finalize()))
    }

    /// Bucket-level resources: name to (blob, entry).
    pub fn load_resources(&mut self) -> Result<Vec<(String, Vec<u8>, GcaEntry)>> {
        self.load_index()?;
        let picks: Vec<GcaEntry> = self
            .index
            .as_ref()
            .unwrap()
            .iter()
            .filter(|e| e.kind() != "trailer" && e.is_resource() && e.length > 0)
            .cloned()
            .collect();
        let mut out = Vec::with_capacity(picks.len());
        for e in picks {
            let name = match e.res_name() {
                Some(n) if !n.is_empty() => n,
                _ => continue,
            };
            let blob = self.read_blob(e.offset, e.length)?;
            out.push((name, blob, e));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join(name);
        (dir, p)
    }

    #[test]
    fn write_read_roundtrip() {
        let (_dir, path) = scratch("bucket.gca");
        let mut w = GcaWriter::create(&path).unwrap();
        w.append("a.txt", b"first blob", serde_json::Map::new()).unwrap();
        w.append("b.txt", b"second blob, a bit longer", serde_json::Map::new()).unwrap();
        w.append_resource("num_dict_v1", b"\x01\x02\x03", serde_json::Map::new()).unwrap();
        w.finish().unwrap();

        let mut r = GcaReader::open(&path).unwrap();
        assert_eq!(r.get_blob("a.txt").unwrap(), b"first blob");
        assert_eq!(r.get_blob("b.txt").unwrap(), b"second blob, a bit longer");

        let trailer = r.index_trailer().unwrap().expect("trailer record");
        assert_eq!(trailer.meta.get("entries").and_then(|v| v.as_u64()), Some(3));

        let res = r.load_resources().unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].0, "num_dict_v1");
        assert_eq!(res[0].1, vec![1, 2, 3]);
    }

    #[test]
    fn trailer_layout_is_exact() {
        let (_dir, path) = scratch("trailer.gca");
        let mut w = GcaWriter::create(&path).unwrap();
        w.append("x", b"payload", serde_json::Map::new()).unwrap();
        w.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let t = &bytes[bytes.len() - 16..];
        assert_eq!(&t[..4], b"GCA1");
        let index_len = u64::from_le_bytes(t[4..12].try_into().unwrap()) as usize;
        let crc = u32::from_le_bytes(t[12..16].try_into().unwrap());
        let index_zlib = &bytes[bytes.len() - 16 - index_len..bytes.len() - 16];
        assert_eq!(crc32_of(index_zlib), crc);
    }

    #[test]
    fn index_body_sha_covers_entry_lines() {
        let (_dir, path) = scratch("sha.gca");
        let mut w = GcaWriter::create(&path).unwrap();
        w.append("one", b"1", serde_json::Map::new()).unwrap();
        w.append("two", b"22", serde_json::Map::new()).unwrap();
        w.finish().unwrap();

        let mut r = GcaReader::open(&path).unwrap();
        let raw = r.index_raw().unwrap().to_vec();
        let lines: Vec<&[u8]> = raw.split_inclusive(|&b| b == b'\n').collect();
        let body: Vec<u8> = lines[..lines.len() - 1].concat();
        let expected = sha256_hex(&body);
        let trailer = r.index_trailer().unwrap().unwrap();
        assert_eq!(
            trailer.meta.get("index_body_sha256").and_then(|v| v.as_str()),
            Some(expected.as_str())
        );
    }

    #[test]
    fn corrupt_index_is_detected() {
        let (_dir, path) = scratch("corrupt.gca");
        let mut w = GcaWriter::create(&path).unwrap();
        w.append("x", b"data data data", serde_json::Map::new()).unwrap();
        w.finish().unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let index_len =
            u64::from_le_bytes(bytes[bytes.len() - 12..bytes.len() - 4].try_into().unwrap())
                as usize;
        let flip_at = bytes.len() - 16 - index_len / 2;
        bytes[flip_at] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let mut r = GcaReader::open(&path).unwrap();
        assert!(matches!(r.entries(), Err(GcError::Corrupt(_))));
    }

    #[test]
    fn corrupt_trailer_is_detected() {
        let (_dir, path) = scratch("badtrailer.gca");
        let mut w = GcaWriter::create(&path).unwrap();
        w.append("x", b"data", serde_json::Map::new()).unwrap();
        w.finish().unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let at = bytes.len() - 16;
        bytes[at] ^= 0xFF; // break the magic
        std::fs::write(&path, &bytes).unwrap();

        let mut r = GcaReader::open(&path).unwrap();
        assert!(matches!(r.entries(), Err(GcError::Corrupt(_))));
    }
}
