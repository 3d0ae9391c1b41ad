//! Lossless TEXT/NUMS split.
//!
//! The TEXT stream is the input with every maximal run of ASCII digits
//! replaced by a single sentinel byte `0x00`; the NUMS stream is the parsed
//! values as concatenated uvarints. Reconstruction walks TEXT and splices the
//! decimal rendering of the next value at each sentinel.
//!
//! Losslessness rules:
//! - Leading zeros of a run stay in TEXT as literal digits before the
//!   sentinel (an all-zero run keeps its final zero as the value 0), so the
//!   decimal rendering of the value restores the run exactly.
//! - Runs longer than [`MAX_RUN_DIGITS`] digits are split into several
//!   values; adjacent sentinels concatenate back to the original run.
//! - The layer is text-centric: input must be valid UTF-8 and must not
//!   contain NUL bytes, otherwise it is inapplicable and the engine has to
//!   pick another layer. This keeps the sentinel collision-free.
//!
//! Meta is two bytes `(fmt, tok)` versioning the stream format and the
//! tokenizer rules; empty meta reads as version zero.

use crate::error::{GcError, Result};
use crate::mbn::{ST_NUMS, ST_TEXT};
use crate::varint::{decode_uints, encode_uints};

use super::Encoded;

const SENTINEL: u8 = 0x00;

/// Longest digit run encoded as a single value; 18 decimal digits always fit u64.
const MAX_RUN_DIGITS: usize = 18;

const FMT_VERSION: u8 = 1;
const TOK_RULES: u8 = 1;

pub fn encode(data: &[u8]) -> Result<Encoded> {
    if data.contains(&SENTINEL) {
        return Err(GcError::Usage(
            "split_text_nums: inapplicable, input contains NUL bytes".into(),
        ));
    }
    if std::str::from_utf8(data).is_err() {
        return Err(GcError::Usage(
            "split_text_nums: inapplicable, input is not valid UTF-8".into(),
        ));
    }

    let mut text = Vec::with_capacity(data.len());
    let mut values: Vec<u64> = Vec::new();

    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        if !b.is_ascii_digit() {
            text.push(b);
            i += 1;
            continue;
        }

        let start = i;
        while i < data.len() && data[i].is_ascii_digit() {
            i += 1;
        }
        for chunk in data[start..i].chunks(MAX_RUN_DIGITS) {
            // Keep leading zeros as literal text; an all-zero chunk keeps its
            // last digit as the value 0.
            let first_nonzero = chunk
                .iter()
                .position(|&d| d != b'0')
                .unwrap_or(chunk.len() - 1);
            text.extend_from_slice(&chunk[..first_nonzero]);
            let mut value: u64 = 0;
            for &d in &chunk[first_nonzero..] {
                value = value * 10 + u64::from(d - b'0');
            }
            text.push(SENTINEL);
            values.push(value);
        }
    }

    let meta = if values.is_empty() && text.is_empty() {
        Vec::new()
    } else {
        vec![FMT_VERSION, TOK_RULES]
    };

    Ok(Encoded {
        streams: vec![(ST_TEXT, text), (ST_NUMS, encode_uints(&values))],
        meta,
    })
}

pub fn decode(text: &[u8], nums: &[u8], meta: &[u8]) -> Result<Vec<u8>> {
    let fmt = meta.first().copied().unwrap_or(0);
    if fmt > FMT_VERSION {
        return Err(GcError::Corrupt(format!(
            "split_text_nums: unsupported fmt {}",
            fmt
        )));
    }

    let values = decode_uints(nums)?;
    let mut next = values.iter();

    let mut out = Vec::with_capacity(text.len() + values.len() * 4);
    for &b in text {
        if b == SENTINEL {
            let v = next.next().ok_or_else(|| {
                GcError::Corrupt("split_text_nums: NUMS stream exhausted".into())
            })?;
            let mut buf = [0u8; 20];
            let mut n = 0;
            let mut x = *v;
            loop {
                buf[19 - n] = b'0' + (x % 10) as u8;
                n += 1;
                x /= 10;
                if x == 0 {
                    break;
                }
            }
            out.extend_from_slice(&buf[20 - n..]);
        } else {
            out.push(b);
        }
    }
    if next.next().is_some() {
        return Err(GcError::Corrupt(
            "split_text_nums: NUMS stream has trailing values".into(),
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(data: &[u8]) -> (Vec<u8>, Vec<u64>, Vec<u8>) {
        let e = encode(data).unwrap();
        let text = e.streams[0].1.clone();
        let nums = decode_uints(&e.streams[1].1).unwrap();
        (text, nums, e.meta)
    }

    fn roundtrip(data: &[u8]) {
        let e = encode(data).unwrap();
        let back = decode(&e.streams[0].1, &e.streams[1].1, &e.meta).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn reference_split() {
        // "abc123def0xyz" -> TEXT "abc\x00def\x00xyz", NUMS [123, 0]
        let (text, nums, _) = enc(b"abc123def0xyz");
        assert_eq!(text, b"abc\x00def\x00xyz");
        assert_eq!(nums, vec![123, 0]);
        roundtrip(b"abc123def0xyz");
    }

    #[test]
    fn leading_zeros_stay_in_text() {
        let (text, nums, _) = enc(b"id=007;");
        assert_eq!(text, b"id=00\x00;");
        assert_eq!(nums, vec![7]);
        roundtrip(b"id=007;");
        roundtrip(b"000");
        roundtrip(b"0");
    }

    #[test]
    fn long_runs_are_chunked() {
        let data = b"n=123456789012345678901234567890!";
        let (_, nums, _) = enc(data);
        assert_eq!(nums.len(), 2);
        roundtrip(data);
    }

    #[test]
    fn no_digits_means_empty_nums() {
        let (text, nums, _) = enc(b"plain words only");
        assert_eq!(text, b"plain words only");
        assert!(nums.is_empty());
        roundtrip(b"plain words only");
    }

    #[test]
    fn empty_input_roundtrips_with_empty_meta() {
        let e = encode(b"").unwrap();
        assert!(e.meta.is_empty());
        roundtrip(b"");
    }

    #[test]
    fn dates_and_ranges_keep_separators_in_text() {
        let (text, nums, _) = enc(b"2024-01-01 10-12");
        assert_eq!(text, b"\x00-0\x00-0\x00 \x00-\x00");
        assert_eq!(nums, vec![2024, 1, 1, 10, 12]);
        roundtrip(b"2024-01-01 10-12");
    }

    #[test]
    fn inapplicable_inputs_are_usage_errors() {
        assert!(matches!(encode(b"has\x00nul"), Err(GcError::Usage(_))));
        assert!(matches!(encode(&[0xFF, 0xFE, b'1']), Err(GcError::Usage(_))));
    }

    #[test]
    fn missing_values_are_corrupt() {
        let e = encode(b"a1b2").unwrap();
        let short = encode_uints(&[1]);
        assert!(decode(&e.streams[0].1, &short, &e.meta).is_err());
    }
}
