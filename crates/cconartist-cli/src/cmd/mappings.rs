//! `mappings check`
use anyhow::{bail, Context, Result};
use cconartist_core::stream::Mappings;
use cconartist_schema::format_mac;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use std::path::Path;

use super::load_config;

/// Parse the mappings file and list its entries.
pub fn check(config: Option<&Path>, file: Option<&Path>) -> Result<()> {
    let path = match file {
        Some(file) => file.to_path_buf(),
        None => load_config(config)?.1.storage.mappings,
    };

    let mut mappings = Mappings::new(&path);
    let loaded = mappings
        .reload_if_changed()
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if !loaded {
        bail!("Mappings file {} does not exist", path.display());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Device", "Name"]);
    for (mac, name) in mappings.iter() {
        table.add_row(vec![format_mac(mac), name.to_string()]);
    }
    println!("{table}");
    println!("{} devices mapped in {}", mappings.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mappings.txt");
        std::fs::write(&path, "# devices\n00:11:22:33:44:55=office\n").unwrap();
        check(None, Some(&path)).unwrap();
        assert!(check(None, Some(&dir.path().join("missing.txt"))).is_err());
    }
}
