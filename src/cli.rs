//! # Command line interface
//!
//! A thin `clap`-derived front end over [`extentkv::Store`]. Not part of the store's core
//! contract — a convenience wrapper for operational poking, taking keys and values as UTF-8
//! command-line arguments (or, for `set`, read from stdin when `--value` is omitted).

use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use extentkv::Store;

#[derive(Parser)]
#[command(name = "extentkv-cli", version, about = "Poke at an extentkv store file")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Fetch the value stored for a key.
    Get {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        key: String,
    },
    /// Insert or overwrite a key's value.
    Set {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        key: String,
        /// Value to store. If omitted, read from stdin.
        #[arg(long)]
        value: Option<String>,
    },
    /// Delete a key, if present.
    Del {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        key: String,
    },
    /// Print a small operational summary of the store.
    Stat {
        #[arg(long)]
        store: PathBuf,
    },
}

pub fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Get { store, key } => {
            let store = Store::open(store)?;
            let value = store.get(key.as_bytes())?;
            println!("{}", String::from_utf8_lossy(&value));
            Ok(())
        }
        Command::Set { store, key, value } => {
            let mut store = Store::open(store)?;
            let value = match value {
                Some(v) => v.into_bytes(),
                None => {
                    let mut buf = Vec::new();
                    std::io::stdin().read_to_end(&mut buf)?;
                    buf
                }
            };
            store.set(key.as_bytes(), &value)?;
            Ok(())
        }
        Command::Del { store, key } => {
            let mut store = Store::open(store)?;
            store.del(key.as_bytes())?;
            Ok(())
        }
        Command::Stat { store } => {
            let store = Store::open(store)?;
            println!("{}", store.stat());
            Ok(())
        }
    }
}
