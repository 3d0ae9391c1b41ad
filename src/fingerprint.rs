//! Content fingerprinting and bucket-type classification.
//!
//! The fingerprint is a SimHash-style 64-bit signature: token (or shingle)
//! hashes vote per bit, weighted by capped frequency, so near-duplicate
//! content lands on nearby signatures and the bucket assignment
//! (`simhash64 % buckets`) groups similar files deterministically.
//!
//! Classification is cheap and deterministic:
//! - not UTF-8, contains NUL, or mostly unprintable -> `binaryish`
//! - printable text with a high digit share -> `mixed_text_nums`
//! - otherwise -> `textish`

use sha2::{Digest, Sha256};

/// At most this many leading bytes feed the fingerprint.
const MAX_FINGERPRINT_BYTES: usize = 1_000_000;
/// Binary shingling window and cap.
const BIN_SHINGLE: usize = 4;
const BIN_MAX_BYTES: usize = 200_000;
/// Per-token weight cap keeps one hot token from dominating the signature.
const TOKEN_WEIGHT_CAP: i64 = 20;
/// Printable-ratio threshold for "looks like text".
const PRINTABLE_RATIO: f64 = 0.85;
/// Digit share separating plain text from number-heavy text.
const DIGIT_RATIO_MIXED: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BucketType {
    Textish,
    MixedTextNums,
    Binaryish,
}

impl BucketType {
    pub fn name(self) -> &'static str {
        match self {
            BucketType::Textish => "textish",
            BucketType::MixedTextNums => "mixed_text_nums",
            BucketType::Binaryish => "binaryish",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "textish" => BucketType::Textish,
            "mixed_text_nums" => BucketType::MixedTextNums,
            "binaryish" => BucketType::Binaryish,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Fingerprint {
    pub simhash64: u64,
    pub is_text: bool,
    pub token_count: usize,
    pub algo: &'static str,
}

/// Stable 64-bit hash: the first 8 bytes of SHA-256, big endian.
fn h64(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    u64::from_be_bytes(digest[..8].try_into().unwrap())
}

fn simhash64<I: IntoIterator<Item = (u64, i64)>>(weighted: I) -> u64 {
    let mut acc = [0i64; 64];
    for (h, w) in weighted {
        for (i, slot) in acc.iter_mut().enumerate() {
            if (h >> i) & 1 == 1 {
                *slot += w;
            } else {
                *slot -= w;
            }
        }
    }
    let mut out = 0u64;
    for (i, &v) in acc.iter().enumerate() {
        if v >= 0 {
            out |= 1 << i;
        }
    }
    out
}

fn printable_ratio(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 1.0;
    }
    let printable = data
        .iter()
        .filter(|&&b| (32..=126).contains(&b) || matches!(b, 9 | 10 | 13))
        .count();
    printable as f64 / data.len() as f64
}

pub fn fingerprint_bytes(data: &[u8]) -> Fingerprint {
    let b = &data[..data.len().min(MAX_FINGERPRINT_BYTES)];
    if b.is_empty() {
        return Fingerprint { simhash64: 0, is_text: true, token_count: 0, algo: "simhash64:text" };
    }

    let is_text = printable_ratio(b) >= PRINTABLE_RATIO;
    if is_text {
        let txt = String::from_utf8_lossy(b).to_lowercase();
        let tokens = word_tokens(&txt);
        if tokens.is_empty() {
            // Fall back to hashing non-blank lines.
            let lines: Vec<&str> = txt.lines().filter(|l| !l.trim().is_empty()).take(5000).collect();
            let sig = simhash64(lines.iter().map(|l| (h64(l.as_bytes()), 1)));
            return Fingerprint {
                simhash64: sig,
                is_text: true,
                token_count: lines.len(),
                algo: "simhash64:lines",
            };
        }

        let mut freq: std::collections::HashMap<&str, i64> = std::collections::HashMap::new();
        let token_count = tokens.len();
        for t in tokens {
            let w = freq.entry(t).or_insert(0);
            *w = (*w + 1).min(TOKEN_WEIGHT_CAP);
        }
        let mut weighted: Vec<(u64, i64)> =
            freq.into_iter().map(|(t, w)| (h64(t.as_bytes()), w)).collect();
        weighted.sort_unstable();
        return Fingerprint {
            simhash64: simhash64(weighted),
            is_text: true,
            token_count,
            algo: "simhash64:tokens",
        };
    }

    // Binary: fixed-stride 4-byte shingles.
    let window = &b[..b.len().min(BIN_MAX_BYTES)];
    let mut weighted = Vec::new();
    let mut i = 0;
    while i + BIN_SHINGLE <= window.len() {
        weighted.push((h64(&window[i..i + BIN_SHINGLE]), 1));
        i += BIN_SHINGLE;
    }
    Fingerprint {
        simhash64: simhash64(weighted.iter().copied()),
        is_text: false,
        token_count: weighted.len(),
        algo: "simhash64:bin4",
    }
}

/// Alphanumeric/underscore runs of length >= 2.
fn word_tokens(txt: &str) -> Vec<&str> {
    let bytes = txt.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            if i - start >= 2 {
                out.push(&txt[start..i]);
            }
        } else {
            i += 1;
        }
    }
    out
}

pub fn digit_ratio(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let digits = data.iter().filter(|b| b.is_ascii_digit()).count();
    digits as f64 / data.len() as f64
}

/// Classify one file's content for candidate-pool routing.
pub fn classify(data: &[u8]) -> BucketType {
    if data.contains(&0) || std::str::from_utf8(data).is_err() {
        return BucketType::Binaryish;
    }
    if printable_ratio(data) < PRINTABLE_RATIO {
        return BucketType::Binaryish;
    }
    if digit_ratio(data) >= DIGIT_RATIO_MIXED {
        BucketType::MixedTextNums
    } else {
        BucketType::Textish
    }
}

/// Digit-density band of a byte sample; part of the TOP-db cache key.
pub fn digit_band(data: &[u8]) -> &'static str {
    let r = digit_ratio(data);
    if r < 0.02 {
        "d0"
    } else if r < 0.05 {
        "d1"
    } else if r < 0.15 {
        "d2"
    } else {
        "d3"
    }
}
