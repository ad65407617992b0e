//! # `extentkv-cli`
//!
//! Command line front end over `extentkv::Store`. Initializes `env_logger` honoring `RUST_LOG`
//! the way this lineage's binaries do, then dispatches to the `cli` module.

mod cli;

use clap::Parser;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = cli::Cli::parse();
    cli::run(cli)
}
