//! cconartist - sensor data collection server
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
//!
//! Devices on the local network push measurements over TCP and UDP. Each
//! server decodes its packets and appends the values to memory-mapped
//! stream files, one per device and measurement.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.cconartist/
//! ├── config.json     # Servers, pre-declared streams, storage settings
//! ├── mappings.txt    # MAC=name, names new stream files
//! └── streams/
//!     ├── office_temperature.rwstream   # Streams receiving data
//!     └── 2024/*.rostream               # Historical streams
//! ```

pub mod cmd;
pub mod server;

pub use cconartist_core::paths::*;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "cconartist")]
#[command(author, version, about = "cconartist - sensor data collection server")]
pub struct Cli {
    /// Configuration file (defaults to ./config.json, then ~/.cconartist/config.json)
    #[arg(short, long, global = true, env = "CCONARTIST_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the configured servers until interrupted
    Serve,
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Validate a package manifest and print its build graph
    Graph {
        /// Manifest to load (defaults to the built-in cconartist manifest)
        #[arg(long)]
        manifest: Option<PathBuf>,
        /// Show links and copy plan of one target
        #[arg(long)]
        target: Option<String>,
        /// Root that copy sources are relative to
        #[arg(long, default_value = ".")]
        source_root: PathBuf,
        /// Root that copy destinations are relative to
        #[arg(long, default_value = "target/bin")]
        output_root: PathBuf,
    },
    /// Inspect stream files
    Streams {
        #[command(subcommand)]
        command: StreamCommands,
    },
    /// Device name mappings
    Mappings {
        #[command(subcommand)]
        command: MappingCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Parse and validate the configuration
    Check,
}

#[derive(Debug, Subcommand)]
pub enum StreamCommands {
    /// List stream files with their headers
    List {
        /// Stream directory (defaults to the configured one)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Print the items of one stream file
    Dump {
        /// Stream file
        file: PathBuf,
        /// Render records with this decoder (sensor, geekopen, image)
        #[arg(long)]
        decoder: Option<String>,
        /// Print at most this many items, newest last
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Debug, Subcommand)]
pub enum MappingCommands {
    /// Parse the mappings file and list its entries
    Check {
        /// Mappings file (defaults to the configured one)
        #[arg(long)]
        file: Option<PathBuf>,
    },
}
