//! `config check`
use anyhow::Result;
use cconartist_core::DecoderRegistry;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use std::path::Path;

use super::load_config;
use crate::server::check_decoders;

/// Validate the configuration and print what it declares.
pub fn check(path: Option<&Path>) -> Result<()> {
    let (path, config) = load_config(path)?;
    check_decoders(&config, &DecoderRegistry::with_builtin())?;

    let mut servers = Table::new();
    servers
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Server", "Type", "Port", "Decoders"]);
    for server in &config.servers {
        servers.add_row(vec![
            server.name.clone(),
            server.kind.to_string(),
            server.port.to_string(),
            server.decoders.join(", "),
        ]);
    }
    println!("{servers}");

    if !config.streams.is_empty() {
        let mut streams = Table::new();
        streams
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Stream", "Key", "Layout"]);
        for stream in &config.streams {
            streams.add_row(vec![
                stream.name.clone(),
                cconartist_schema::describe_stream_key(stream.stream_key()),
                stream.stream_type().to_string(),
            ]);
        }
        println!("{streams}");
    }

    println!("Streams:  {}", config.storage.streams_dir.display());
    println!("Mappings: {}", config.storage.mappings.display());
    println!("{} is valid", path.display());
    Ok(())
}
