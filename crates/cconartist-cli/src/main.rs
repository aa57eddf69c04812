//! cconartist - sensor data collection server

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cconartist_cli::cmd;
use cconartist_cli::{Cli, Commands, ConfigCommands, MappingCommands, StreamCommands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Serve => cmd::serve::serve(config).await,
        Commands::Config { command } => match command {
            ConfigCommands::Check => cmd::config::check(config),
        },
        Commands::Graph {
            manifest,
            target,
            source_root,
            output_root,
        } => cmd::graph::graph(
            manifest.as_deref(),
            target.as_deref(),
            &source_root,
            &output_root,
        ),
        Commands::Streams { command } => match command {
            StreamCommands::List { dir } => cmd::streams::list(config, dir.as_deref()),
            StreamCommands::Dump {
                file,
                decoder,
                limit,
            } => cmd::streams::dump(&file, decoder.as_deref(), limit),
        },
        Commands::Mappings { command } => match command {
            MappingCommands::Check { file } => cmd::mappings::check(config, file.as_deref()),
        },
    }
}
