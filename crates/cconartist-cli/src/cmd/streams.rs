//! `streams list` and `streams dump`
use anyhow::{bail, Context, Result};
use cconartist_core::{Decoder, DecoderRegistry, StreamFile, StreamManager};
use cconartist_schema::{describe_stream_key, split_stream_key, StreamHeader, StreamType, UserType};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use std::path::Path;

use super::{format_time, load_config};

/// List every stream file under the stream directory.
pub fn list(config: Option<&Path>, dir: Option<&Path>) -> Result<()> {
    let (dir, max_streams) = match dir {
        Some(dir) => (dir.to_path_buf(), cconartist_schema::config::DEFAULT_MAX_STREAMS),
        None => {
            let (_, config) = load_config(config)?;
            (config.storage.streams_dir, config.storage.max_streams)
        }
    };
    if !dir.is_dir() {
        bail!("Stream directory {} does not exist", dir.display());
    }

    let manager = StreamManager::open(&dir, max_streams)
        .with_context(|| format!("Failed to open streams in {}", dir.display()))?;
    let summaries = manager.summaries();
    if summaries.is_empty() {
        println!("No streams in {}", dir.display());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Id", "File", "Stream", "Layout", "Items", "First", "Last", "Used"]);
    for summary in &summaries {
        let file = summary
            .path
            .strip_prefix(&dir)
            .unwrap_or(&summary.path)
            .display()
            .to_string();
        let h = &summary.header;
        table.add_row(vec![
            summary.id.to_string(),
            file,
            describe_stream_key(h.user_id),
            h.stream_type.to_string(),
            h.item_count.to_string(),
            format_time(h.time_begin),
            format_time(h.time_end),
            usage(h),
        ]);
    }
    println!("{table}");
    println!(
        "{} streams receiving data, {} historical",
        manager.rw_count(),
        manager.ro_count()
    );
    Ok(())
}

fn usage(header: &StreamHeader) -> String {
    let used = header.write_cursor as f64 / header.stream_size.max(1) as f64;
    format!("{:.1}%", used * 100.0)
}

/// Print the last `limit` items of `file`.
pub fn dump(file: &Path, decoder: Option<&str>, limit: usize) -> Result<()> {
    let stream =
        StreamFile::open_ro(file).with_context(|| format!("Failed to open {}", file.display()))?;
    let header = *stream.header();

    let decoder: Option<Box<dyn Decoder>> = match decoder {
        Some(name) => Some(
            DecoderRegistry::with_builtin()
                .create(name)
                .with_context(|| format!("Unknown decoder '{name}'"))?,
        ),
        None => {
            let (_, user_type) = split_stream_key(header.user_id);
            UserType::from_u8(user_type)
                .and_then(DecoderRegistry::for_user_type)
                .and_then(|name| DecoderRegistry::with_builtin().create(name))
        }
    };

    println!("Stream:  {}", describe_stream_key(header.user_id));
    println!("Layout:  {} (generation {})", header.stream_type, header.user_index);
    println!(
        "Items:   {} from {} to {}",
        header.item_count,
        format_time(header.time_begin),
        format_time(header.time_end)
    );

    let skip = header.item_count.saturating_sub(limit as u64) as usize;
    for item in stream.items().skip(skip) {
        let value = render(header.stream_type, item.data, header.user_id, decoder.as_deref());
        println!("{}  {value}", format_time(item.time));
    }
    Ok(())
}

fn render(stream_type: StreamType, data: &[u8], key: u64, decoder: Option<&dyn Decoder>) -> String {
    if let Some(value) = scalar(stream_type, data) {
        return value;
    }
    match decoder.map(|d| d.build_ui(key, data)) {
        Some(Ok(ui)) => ui
            .items
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        Some(Err(e)) => format!("<{e}> {}", hex::encode(data)),
        None => hex::encode(data),
    }
}

/// Little-endian scalar item as text.
fn scalar(stream_type: StreamType, data: &[u8]) -> Option<String> {
    fn bytes<const N: usize>(data: &[u8]) -> Option<[u8; N]> {
        data.get(..N)?.try_into().ok()
    }
    Some(match stream_type {
        StreamType::U8 => data.first()?.to_string(),
        StreamType::S8 => i8::from_le_bytes(bytes(data)?).to_string(),
        StreamType::U16 => u16::from_le_bytes(bytes(data)?).to_string(),
        StreamType::S16 => i16::from_le_bytes(bytes(data)?).to_string(),
        StreamType::U32 => u32::from_le_bytes(bytes(data)?).to_string(),
        StreamType::S32 => i32::from_le_bytes(bytes(data)?).to_string(),
        StreamType::F32 => f32::from_le_bytes(bytes(data)?).to_string(),
        StreamType::F64 => f64::from_le_bytes(bytes(data)?).to_string(),
        StreamType::Fixed | StreamType::Variable => return None,
    })
}
