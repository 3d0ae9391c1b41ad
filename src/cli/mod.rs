//! Command-line surface of `gcpack`.
//!
//! Subcommands map one-to-one onto the library operations; `run` returns the
//! crate error so `main` can translate it into the stable exit codes.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::codecs::CodecId;
use crate::dir_pack::{self, PackOptions};
use crate::dir_spec::load_dir_pipeline_spec;
use crate::error::{GcError, Result};
use crate::layers::{LayerEnv, LayerId};
use crate::legacy::decompress_any;
use crate::pipeline::{
    load_pipeline_spec, parse_stream_codecs_arg, run_pipeline, PipelineSpec,
};
use crate::single_dir;
use crate::verify;

#[derive(Parser, Debug)]
#[command(name = "gcpack", author, version, about = "Layered lossless compression toolkit", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compress one file into a v6 container.
    #[command(alias = "c")]
    Compress {
        input: PathBuf,

        /// Output container path (e.g. data.gcc).
        #[arg(short, long)]
        output: PathBuf,

        /// Pipeline spec: inline JSON or @file.json. Overrides --layer/--codec.
        #[arg(long)]
        pipeline: Option<String>,

        /// Semantic layer id.
        #[arg(long, default_value = "bytes")]
        layer: String,

        /// Default codec id for unnamed streams.
        #[arg(long, default_value = "zlib")]
        codec: String,

        /// Per-stream codec overrides, e.g. TEXT:zlib,NUMS:num_v1.
        #[arg(long)]
        stream_codecs: Option<String>,

        /// Force (true) or forbid (false) MBN framing; auto when omitted.
        #[arg(long)]
        mbn: Option<bool>,
    },

    /// Decompress any GCC container (v1..v6).
    #[command(alias = "d")]
    Decompress {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Verify a single container file.
    Verify {
        path: PathBuf,

        /// Recompute hashes / decode the payload, not just the structure.
        #[arg(long)]
        full: bool,
    },

    /// Directory workflow: bucketized archives with per-bucket autopick.
    #[command(subcommand)]
    Dir(DirCommands),

    /// Single-container directory bundles (text-only or mixed).
    #[command(subcommand)]
    Bundle(BundleCommands),
}

#[derive(Subcommand, Debug)]
pub enum DirCommands {
    /// Pack a directory into manifest.jsonl + per-bucket .gca archives.
    Pack {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Override bucket count (default: spec.buckets or 16).
        #[arg(long)]
        buckets: Option<u32>,

        /// Dir pipeline spec JSON (@file.json or inline) controlling pools,
        /// autopick and resources.
        #[arg(long)]
        pipeline: Option<String>,

        /// TOP db path (default: <output>/top_pipelines.json).
        #[arg(long)]
        top_db: Option<PathBuf>,
    },

    /// Restore a packed directory.
    Unpack {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Verify a packed directory (light by default).
    Verify {
        path: PathBuf,

        #[arg(long)]
        full: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum BundleCommands {
    /// Pack a directory into a single container (text-only unless --mixed).
    Pack {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Split into a text bundle and a binary bundle instead of failing
        /// on non-UTF-8 input.
        #[arg(long)]
        mixed: bool,
    },

    /// Restore a single-container directory (mode auto-detected).
    Unpack {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Verify a single-container directory (mode auto-detected).
    Verify {
        path: PathBuf,

        #[arg(long)]
        full: bool,
    },
}

pub fn run(args: Args) -> Result<()> {
    match args.command {
        Commands::Compress { input, output, pipeline, layer, codec, stream_codecs, mbn } => {
            let spec = match pipeline {
                Some(arg) => load_pipeline_spec(&arg)?,
                None => {
                    let layer = LayerId::from_name(&layer)
                        .ok_or_else(|| GcError::Usage(format!("unknown layer {:?}", layer)))?;
                    let codec = CodecId::from_name(&codec)
                        .ok_or_else(|| GcError::Usage(format!("unknown codec {:?}", codec)))?;
                    let stream_codecs = stream_codecs
                        .as_deref()
                        .map(parse_stream_codecs_arg)
                        .transpose()?;
                    PipelineSpec { name: "cli".into(), layer, codec, stream_codecs, mbn }
                }
            };
            let data = std::fs::read(&input).map_err(|e| GcError::io(e, &input))?;
            let blob = run_pipeline(&spec, &data, &LayerEnv::default())?;
            std::fs::write(&output, &blob).map_err(|e| GcError::io(e, &output))?;
            println!(
                "[compress] {} -> {} ({} -> {} bytes)",
                input.display(),
                output.display(),
                data.len(),
                blob.len()
            );
            Ok(())
        }

        Commands::Decompress { input, output } => {
            let blob = std::fs::read(&input).map_err(|e| GcError::io(e, &input))?;
            let data = decompress_any(&blob, &LayerEnv::default())?;
            std::fs::write(&output, &data).map_err(|e| GcError::io(e, &output))?;
            println!(
                "[decompress] {} -> {} ({} -> {} bytes)",
                input.display(),
                output.display(),
                blob.len(),
                data.len()
            );
            Ok(())
        }

        Commands::Verify { path, full } => {
            verify::verify_container_file(&path, full)?;
            println!("[verify] OK: {}", path.display());
            Ok(())
        }

        Commands::Dir(cmd) => match cmd {
            DirCommands::Pack { input, output, buckets, pipeline, top_db } => {
                let spec = pipeline.as_deref().map(load_dir_pipeline_spec).transpose()?;
                let opts = PackOptions { buckets, spec, top_db };
                dir_pack::pack_dir(&input, &output, &opts)
            }
            DirCommands::Unpack { input, output } => dir_pack::unpack_dir(&input, &output),
            DirCommands::Verify { path, full } => {
                verify::verify_packed_dir(&path, full)?;
                println!("[verify] OK: {}", path.display());
                Ok(())
            }
        },

        Commands::Bundle(cmd) => match cmd {
            BundleCommands::Pack { input, output, mixed } => {
                if mixed {
                    single_dir::pack_single_mixed_dir(&input, &output)
                } else {
                    single_dir::pack_single_dir(&input, &output)
                }
            }
            BundleCommands::Unpack { input, output } => {
                if single_dir::is_single_container_mixed_dir(&input) {
                    single_dir::unpack_single_mixed_dir(&input, &output)
                } else {
                    single_dir::unpack_single_dir(&input, &output)
                }
            }
            BundleCommands::Verify { path, full } => {
                if single_dir::is_single_container_mixed_dir(&path) {
                    single_dir::verify_single_mixed_dir(&path, full)?;
                } else {
                    single_dir::verify_single_dir(&path, full)?;
                }
                println!("[verify] OK: {}", path.display());
                Ok(())
            }
        },
    }
}
