//! Main entry point for the gcpack CLI app.

use clap::Parser;
use gcpack::cli;

fn main() {
    let args = cli::Args::parse();
    if let Err(e) = cli::run(args) {
        eprintln!("gcpack: {}", e);
        std::process::exit(e.exit_code());
    }
}
