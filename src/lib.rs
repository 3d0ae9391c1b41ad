//! # gcpack core library
//!
//! A lossless compression framework organized as a layered "onion": a
//! semantic *layer* transforms input bytes into one or more symbol streams
//! (plus optional metadata), a *codec* compresses each stream, and a
//! *container* frames the result for durable storage.
//!
//! ## Key modules
//!
//! - [`layers`]: reversible byte-to-streams transforms (identity, V/C/O
//!   split, text/number split, per-line template mining, vocabularies).
//! - [`codecs`]: byte compressors with stable numeric codes (zstd, zlib,
//!   canonical Huffman, varint-based numeric codecs).
//! - [`mbn`]: the self-describing multi-stream payload format.
//! - [`container`]: the v6 `GCC` container framing and the engine on top.
//! - [`legacy`]: read-only support for container versions 1 through 5.
//! - [`gca`]: the `GCA1` bucket archive (blobs + CRC-protected compressed
//!   JSONL index).
//! - [`dir_pack`]: the directory packer (fingerprint, bucketize, autopick,
//!   manifest) and its unpack counterpart.
//! - [`single_dir`]: single-container directory bundles (text-only / mixed).
//! - [`verify`]: light and full integrity checking for every artifact kind.

pub mod cli;
pub mod codecs;
pub mod container;
pub mod dir_pack;
pub mod dir_spec;
pub mod error;
pub mod fingerprint;
pub mod gca;
pub mod layers;
pub mod legacy;
pub mod mbn;
pub mod pipeline;
pub mod single_dir;
pub mod varint;
pub mod verify;

pub use error::{GcError, Result};
