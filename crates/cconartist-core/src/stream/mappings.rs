//! Device id to stream name mappings.
//!
//! The mappings file is line based, each line `ID=name` where `ID` is a
//! device MAC address. Streams for unknown devices are only created once an
//! operator adds a line for them.

use cconartist_schema::parse_mac;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Longest stored name, in bytes.
pub const MAX_NAME_LEN: usize = 63;

/// Files larger than this are not loaded.
pub const MAX_FILE_SIZE: u64 = 64 * 1024;

/// Parsed contents of a mappings file.
#[derive(Debug, Clone)]
pub struct Mappings {
    path: PathBuf,
    modified: Option<SystemTime>,
    version: u64,
    entries: BTreeMap<u64, String>,
}

impl Mappings {
    /// Empty mappings backed by `path`; nothing is read until
    /// [`Mappings::reload_if_changed`].
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            modified: None,
            version: 0,
            entries: BTreeMap::new(),
        }
    }

    /// Read the file if its modification time differs from the last load.
    /// Returns whether the entries were replaced. A missing file is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns the I/O error when the file exists but cannot be read.
    pub fn reload_if_changed(&mut self) -> std::io::Result<bool> {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no mappings file");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let modified = metadata.modified()?;
        if self.modified == Some(modified) {
            return Ok(false);
        }
        if metadata.len() > MAX_FILE_SIZE {
            warn!(
                path = %self.path.display(),
                size = metadata.len(),
                "mappings file too large, ignoring"
            );
            return Ok(false);
        }

        let text = std::fs::read_to_string(&self.path)?;
        self.entries = parse(&text);
        self.modified = Some(modified);
        self.version += 1;
        debug!(path = %self.path.display(), entries = self.entries.len(), version = self.version, "loaded mappings");
        Ok(true)
    }

    /// File the mappings are read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Incremented on every successful reload.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Name mapped to device `id`.
    pub fn get(&self, id: u64) -> Option<&str> {
        self.entries.get(&id).map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are loaded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by device id.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &str)> + '_ {
        self.entries.iter().map(|(id, name)| (*id, name.as_str()))
    }
}

/// Parse `ID=name` lines. Blank lines and `#` comments are skipped, as are
/// lines with an invalid id or a name that is not a plain file name.
pub fn parse(text: &str) -> BTreeMap<u64, String> {
    let mut entries = BTreeMap::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((id, name)) = line.split_once('=') else {
            warn!(line = number + 1, "mapping line without '='");
            continue;
        };
        let id = match parse_mac(id.trim()) {
            Ok(id) => id,
            Err(e) => {
                warn!(line = number + 1, "skipping mapping: {e}");
                continue;
            }
        };
        let name = truncate(name.trim(), MAX_NAME_LEN);
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            warn!(line = number + 1, name, "skipping mapping with invalid name");
            continue;
        }
        entries.insert(id, name.to_string());
    }
    entries
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    #[test]
    fn test_parse_lines() {
        let text = "\
# living room
001122334455=living_room

00:11:22:33:44:66 = kitchen
00-11-22-33-44-77=garage
nonsense
zz=bad
001122334488=../escape
";
        let entries = parse(text);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[&0x0011_2233_4455], "living_room");
        assert_eq!(entries[&0x0011_2233_4466], "kitchen");
        assert_eq!(entries[&0x0011_2233_4477], "garage");
    }

    #[test]
    fn test_name_truncated() {
        let long = "n".repeat(100);
        let entries = parse(&format!("001122334455={long}"));
        assert_eq!(entries[&0x0011_2233_4455].len(), MAX_NAME_LEN);

        // Never splits a multi-byte character.
        let wide = "é".repeat(40);
        let entries = parse(&format!("001122334455={wide}"));
        assert_eq!(entries[&0x0011_2233_4455].len(), 62);
    }

    #[test]
    fn test_reload_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mappings.txt");
        let mut mappings = Mappings::new(&path);

        assert!(!mappings.reload_if_changed().unwrap());
        assert_eq!(mappings.version(), 0);

        std::fs::write(&path, "001122334455=one\n").unwrap();
        assert!(mappings.reload_if_changed().unwrap());
        assert_eq!(mappings.version(), 1);
        assert_eq!(mappings.get(0x0011_2233_4455), Some("one"));
        assert!(!mappings.reload_if_changed().unwrap());
        assert_eq!(mappings.version(), 1);

        std::fs::write(&path, "001122334455=two\n001122334466=three\n").unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();
        assert!(mappings.reload_if_changed().unwrap());
        assert_eq!(mappings.version(), 2);
        assert_eq!(mappings.get(0x0011_2233_4455), Some("two"));
        assert_eq!(mappings.len(), 2);
    }
}
