use super::{StreamError, StreamFile, StreamItem};
use crate::registry::{StreamIdRegistry, DEFAULT_SHARD_BITS};
use cconartist_schema::stream::{RO_EXTENSION, RW_EXTENSION};
use cconartist_schema::{StreamHeader, StreamId, StreamMode, StreamType};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Largest number of read-write streams addressable by a [`StreamId`].
const MAX_INDEX: usize = u16::MAX as usize;

/// One row of [`StreamManager::summaries`].
#[derive(Debug, Clone)]
pub struct StreamSummary {
    /// Handle of the stream
    pub id: StreamId,
    /// File backing the stream
    pub path: PathBuf,
    /// Snapshot of the header
    pub header: StreamHeader,
}

/// Owns every open stream under a base directory.
///
/// Read-write streams (`*.rwstream` in the base directory) receive new
/// items and are looked up by user id. Read-only streams (`*.rostream`,
/// inside numeric directories such as `2024/`) are historical and only reachable by id.
#[derive(Debug)]
pub struct StreamManager {
    base_path: PathBuf,
    max_streams: usize,
    rw: Vec<StreamFile>,
    ro: Vec<StreamFile>,
    registry: StreamIdRegistry,
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().is_some_and(|e| e == ext)
}

fn in_numeric_dir(path: &Path) -> bool {
    path.parent()
        .and_then(Path::file_name)
        .and_then(|name| name.to_str())
        .is_some_and(|name| !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()))
}

/// Suffix given to a duplicate read-write stream so later scans skip it.
const DUPLICATE_SUFFIX: &str = "dup";

impl StreamManager {
    /// Open the base directory, creating it if needed, and load every
    /// stream file found in it. Unreadable files are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Io`] if the base directory cannot be created.
    pub fn open(base_path: &Path, max_streams: usize) -> Result<Self, StreamError> {
        std::fs::create_dir_all(base_path).map_err(|source| StreamError::Io {
            path: base_path.to_path_buf(),
            source,
        })?;

        let max_streams = max_streams.clamp(1, MAX_INDEX);
        let mut manager = Self {
            base_path: base_path.to_path_buf(),
            max_streams,
            rw: Vec::new(),
            ro: Vec::new(),
            registry: StreamIdRegistry::new(max_streams, DEFAULT_SHARD_BITS),
        };

        let mut rw_paths = Vec::new();
        let mut ro_paths = Vec::new();
        for entry in walkdir::WalkDir::new(base_path)
            .min_depth(1)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            match entry.depth() {
                1 if has_extension(path, RW_EXTENSION) => rw_paths.push(path.to_path_buf()),
                2 if has_extension(path, RO_EXTENSION) && in_numeric_dir(path) => {
                    ro_paths.push(path.to_path_buf());
                }
                _ => {}
            }
        }

        for path in ro_paths {
            match StreamFile::open_ro(&path) {
                Ok(file) if manager.ro.len() < MAX_INDEX => manager.ro.push(file),
                Ok(_) => warn!(path = %path.display(), "too many read-only streams, skipping"),
                Err(e) => warn!(error = %e, "skipping read-only stream"),
            }
        }
        for path in rw_paths {
            if let Err(e) = manager.adopt(&path) {
                warn!(error = %e, path = %path.display(), "skipping read-write stream");
            }
        }

        info!(
            base = %manager.base_path.display(),
            rw = manager.rw.len(),
            ro = manager.ro.len(),
            "stream manager ready"
        );
        Ok(manager)
    }

    /// Directory holding the streams.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Read-write stream limit.
    pub fn max_streams(&self) -> usize {
        self.max_streams
    }

    /// Number of open read-write streams.
    pub fn rw_count(&self) -> usize {
        self.rw.len()
    }

    /// Number of open read-only streams.
    pub fn ro_count(&self) -> usize {
        self.ro.len()
    }

    /// Path a stream named `name` is created at.
    pub fn stream_path(&self, name: &str) -> PathBuf {
        self.base_path.join(format!("{name}.{RW_EXTENSION}"))
    }

    /// Generation for a new stream of `user_id`: one past the largest
    /// generation among its read-only streams.
    pub fn next_user_index(&self, user_id: u64) -> u16 {
        self.ro
            .iter()
            .map(StreamFile::header)
            .filter(|h| h.user_id == user_id)
            .map(|h| h.user_index)
            .max()
            .unwrap_or(0)
            .saturating_add(1)
    }

    /// Create `<base>/<name>.rwstream` for `user_id` and return its id.
    /// A user id that already has a read-write stream keeps it.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Capacity`] when the limit is reached, or the
    /// error of [`StreamFile::create`].
    pub fn register(
        &mut self,
        name: &str,
        user_id: u64,
        stream_type: StreamType,
        sizeof_item: u32,
        file_size: u64,
        now: u64,
    ) -> Result<StreamId, StreamError> {
        if let Some(id) = self.registry.find(user_id) {
            return Ok(id);
        }
        self.ensure_capacity()?;

        let user_index = self.next_user_index(user_id);
        let path = self.stream_path(name);
        let file = StreamFile::create(&path, user_id, user_index, stream_type, sizeof_item, file_size, now)?;
        self.insert_rw(file)
    }

    /// Register a read-write stream file that was created elsewhere.
    ///
    /// If `user_id` already has a stream, that one is kept and the file at
    /// `path` is renamed to `<path>.dup`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Capacity`] or the error of
    /// [`StreamFile::open_rw`].
    pub fn adopt(&mut self, path: &Path) -> Result<StreamId, StreamError> {
        let file = StreamFile::open_rw(path)?;
        let user_id = file.header().user_id;
        if let Some(id) = self.registry.find(user_id) {
            drop(file);
            if self.get(id).is_some_and(|live| live.path() != path) {
                self.set_aside(path, user_id);
            }
            return Ok(id);
        }
        self.ensure_capacity()?;
        self.insert_rw(file)
    }

    fn set_aside(&self, path: &Path, user_id: u64) {
        let mut aside = path.as_os_str().to_os_string();
        aside.push(".");
        aside.push(DUPLICATE_SUFFIX);
        match std::fs::rename(path, &aside) {
            Ok(()) => warn!(
                path = %path.display(),
                user_id,
                "user id already has a stream, duplicate set aside"
            ),
            Err(e) => warn!(error = %e, path = %path.display(), user_id, "cannot set aside duplicate stream"),
        }
    }

    fn ensure_capacity(&self) -> Result<(), StreamError> {
        if self.rw.len() >= self.max_streams {
            return Err(StreamError::Capacity(self.max_streams));
        }
        Ok(())
    }

    fn insert_rw(&mut self, file: StreamFile) -> Result<StreamId, StreamError> {
        let header = *file.header();
        let id = StreamId::new(header.stream_type, StreamMode::ReadWrite, self.rw.len() as u16);
        self.registry.register(header.user_id, id)?;
        debug!(%id, user_id = header.user_id, path = %file.path().display(), "registered stream");
        self.rw.push(file);
        Ok(id)
    }

    /// Read-write stream of `user_id`.
    pub fn find(&self, user_id: u64) -> Option<StreamId> {
        self.registry.find(user_id)
    }

    fn get(&self, id: StreamId) -> Option<&StreamFile> {
        match id.mode()? {
            StreamMode::ReadWrite => self.rw.get(id.index()),
            StreamMode::ReadOnly => self.ro.get(id.index()),
        }
    }

    fn get_rw(&mut self, id: StreamId) -> Result<&mut StreamFile, StreamError> {
        match id.mode() {
            Some(StreamMode::ReadWrite) => self
                .rw
                .get_mut(id.index())
                .ok_or(StreamError::UnknownStream(id)),
            Some(StreamMode::ReadOnly) => match self.ro.get(id.index()) {
                Some(file) => Err(StreamError::ReadOnly(file.path().to_path_buf())),
                None => Err(StreamError::UnknownStream(id)),
            },
            None => Err(StreamError::UnknownStream(id)),
        }
    }

    /// Append a `u8` item.
    ///
    /// # Errors
    ///
    /// See [`StreamFile::write_item`]; also [`StreamError::UnknownStream`].
    pub fn write_u8(&mut self, id: StreamId, time: u64, value: u8) -> Result<(), StreamError> {
        self.get_rw(id)?.write_typed(StreamType::U8, time, &[value])
    }

    /// Append a `u16` item.
    ///
    /// # Errors
    ///
    /// See [`StreamManager::write_u8`].
    pub fn write_u16(&mut self, id: StreamId, time: u64, value: u16) -> Result<(), StreamError> {
        self.get_rw(id)?.write_typed(StreamType::U16, time, &value.to_le_bytes())
    }

    /// Append a `u32` item.
    ///
    /// # Errors
    ///
    /// See [`StreamManager::write_u8`].
    pub fn write_u32(&mut self, id: StreamId, time: u64, value: u32) -> Result<(), StreamError> {
        self.get_rw(id)?.write_typed(StreamType::U32, time, &value.to_le_bytes())
    }

    /// Append an `i8` item.
    ///
    /// # Errors
    ///
    /// See [`StreamManager::write_u8`].
    pub fn write_s8(&mut self, id: StreamId, time: u64, value: i8) -> Result<(), StreamError> {
        self.get_rw(id)?.write_typed(StreamType::S8, time, &value.to_le_bytes())
    }

    /// Append an `i16` item.
    ///
    /// # Errors
    ///
    /// See [`StreamManager::write_u8`].
    pub fn write_s16(&mut self, id: StreamId, time: u64, value: i16) -> Result<(), StreamError> {
        self.get_rw(id)?.write_typed(StreamType::S16, time, &value.to_le_bytes())
    }

    /// Append an `i32` item.
    ///
    /// # Errors
    ///
    /// See [`StreamManager::write_u8`].
    pub fn write_s32(&mut self, id: StreamId, time: u64, value: i32) -> Result<(), StreamError> {
        self.get_rw(id)?.write_typed(StreamType::S32, time, &value.to_le_bytes())
    }

    /// Append an `f32` item.
    ///
    /// # Errors
    ///
    /// See [`StreamManager::write_u8`].
    pub fn write_f32(&mut self, id: StreamId, time: u64, value: f32) -> Result<(), StreamError> {
        self.get_rw(id)?.write_typed(StreamType::F32, time, &value.to_le_bytes())
    }

    /// Append an `f64` item.
    ///
    /// # Errors
    ///
    /// See [`StreamManager::write_u8`].
    pub fn write_f64(&mut self, id: StreamId, time: u64, value: f64) -> Result<(), StreamError> {
        self.get_rw(id)?.write_typed(StreamType::F64, time, &value.to_le_bytes())
    }

    /// Append opaque data to a fixed or variable stream.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::TypeMismatch`] for scalar streams, otherwise
    /// see [`StreamFile::write_item`].
    pub fn write_data(&mut self, id: StreamId, time: u64, data: &[u8]) -> Result<(), StreamError> {
        let file = self.get_rw(id)?;
        match file.header().stream_type {
            StreamType::Fixed | StreamType::Variable => file.write_item(time, data),
            stream => Err(StreamError::TypeMismatch {
                stream,
                requested: StreamType::Variable,
            }),
        }
    }

    /// `(time_begin, time_end)` of any open stream.
    pub fn time_range(&self, id: StreamId) -> Option<(u64, u64)> {
        self.get(id).map(|f| (f.header().time_begin, f.header().time_end))
    }

    /// Owner of any open stream.
    pub fn user_id(&self, id: StreamId) -> Option<u64> {
        self.get(id).map(|f| f.header().user_id)
    }

    /// Up to `count` items starting at `first`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UnknownStream`] if the id is not open.
    pub fn read(&self, id: StreamId, first: u64, count: usize) -> Result<Vec<StreamItem<'_>>, StreamError> {
        let file = self.get(id).ok_or(StreamError::UnknownStream(id))?;
        Ok(file.items().skip(first as usize).take(count).collect())
    }

    /// Sync every read-write stream to disk. All streams are attempted; the
    /// first error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first [`StreamError::Io`] encountered.
    pub fn flush(&self) -> Result<(), StreamError> {
        let mut first_err = None;
        for file in &self.rw {
            if let Err(e) = file.sync() {
                warn!(error = %e, "stream flush failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// One summary per open stream, read-write first.
    pub fn summaries(&self) -> Vec<StreamSummary> {
        let rw = self.rw.iter().enumerate().map(|(i, f)| (StreamMode::ReadWrite, i, f));
        let ro = self.ro.iter().enumerate().map(|(i, f)| (StreamMode::ReadOnly, i, f));
        rw.chain(ro)
            .map(|(mode, i, f)| StreamSummary {
                id: StreamId::new(f.header().stream_type, mode, i as u16),
                path: f.path().to_path_buf(),
                header: *f.header(),
            })
            .collect()
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "final stream flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: u64 = 4096;

    #[test]
    fn test_register_and_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = StreamManager::open(dir.path(), 8).unwrap();

        let temp = manager.register("temp", 0x10, StreamType::S16, 0, SIZE, 100).unwrap();
        assert_eq!(temp.mode(), Some(StreamMode::ReadWrite));
        assert_eq!(manager.find(0x10), Some(temp));
        assert_eq!(manager.register("other", 0x10, StreamType::U8, 0, SIZE, 100).unwrap(), temp);
        assert!(!dir.path().join("other.rwstream").exists());

        manager.write_s16(temp, 100, -40).unwrap();
        manager.write_s16(temp, 130, 25).unwrap();
        assert!(matches!(
            manager.write_u8(temp, 140, 1),
            Err(StreamError::TypeMismatch { .. })
        ));
        assert!(matches!(
            manager.write_data(temp, 140, b"x"),
            Err(StreamError::TypeMismatch { .. })
        ));

        assert_eq!(manager.time_range(temp), Some((100, 130)));
        assert_eq!(manager.user_id(temp), Some(0x10));
        let items = manager.read(temp, 1, 10).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].time, 130);
        assert_eq!(i16::from_le_bytes([items[0].data[0], items[0].data[1]]), 25);
        manager.flush().unwrap();
    }

    #[test]
    fn test_every_scalar_writer() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = StreamManager::open(dir.path(), 16).unwrap();
        let ids: Vec<StreamId> = [
            StreamType::U8,
            StreamType::U16,
            StreamType::U32,
            StreamType::S8,
            StreamType::S32,
            StreamType::F32,
            StreamType::F64,
            StreamType::Variable,
        ]
        .iter()
        .enumerate()
        .map(|(i, ty)| m.register(&format!("s{i}"), i as u64, *ty, 0, SIZE, 0).unwrap())
        .collect();

        m.write_u8(ids[0], 1, 1).unwrap();
        m.write_u16(ids[1], 1, 2).unwrap();
        m.write_u32(ids[2], 1, 3).unwrap();
        m.write_s8(ids[3], 1, -4).unwrap();
        m.write_s32(ids[4], 1, -5).unwrap();
        m.write_f32(ids[5], 1, 6.5).unwrap();
        m.write_f64(ids[6], 1, 7.25).unwrap();
        m.write_data(ids[7], 1, b"eight").unwrap();

        assert_eq!(m.read(ids[5], 0, 1).unwrap()[0].data, 6.5f32.to_le_bytes());
        assert_eq!(m.read(ids[6], 0, 1).unwrap()[0].data, 7.25f64.to_le_bytes());
        assert_eq!(m.read(ids[7], 0, 1).unwrap()[0].data, b"eight");
        for id in ids {
            assert_eq!(m.read(id, 0, 10).unwrap().len(), 1);
        }
    }

    #[test]
    fn test_capacity_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = StreamManager::open(dir.path(), 2).unwrap();
        manager.register("a", 1, StreamType::U8, 0, SIZE, 0).unwrap();
        manager.register("b", 2, StreamType::U8, 0, SIZE, 0).unwrap();
        assert!(matches!(
            manager.register("c", 3, StreamType::U8, 0, SIZE, 0),
            Err(StreamError::Capacity(2))
        ));
        assert_eq!(manager.max_streams(), 2);
    }

    #[test]
    fn test_scan_and_user_index() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("2024");
        std::fs::create_dir(&archive).unwrap();
        StreamFile::create(&archive.join("old.rostream"), 0x42, 3, StreamType::U8, 0, SIZE, 0).unwrap();
        StreamFile::create(&archive.join("older.rostream"), 0x42, 1, StreamType::U8, 0, SIZE, 0).unwrap();
        StreamFile::create(&dir.path().join("live.rwstream"), 0x77, 1, StreamType::U16, 0, SIZE, 5).unwrap();
        // Ignored: wrong depth, non-numeric directory, wrong extension, garbage.
        StreamFile::create(&dir.path().join("stray.rostream"), 0x99, 1, StreamType::U8, 0, SIZE, 0).unwrap();
        let backup = dir.path().join("backup");
        std::fs::create_dir(&backup).unwrap();
        StreamFile::create(&backup.join("copy.rostream"), 0x42, 9, StreamType::U8, 0, SIZE, 0).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("broken.rwstream"), [0u8; 8]).unwrap();

        let mut manager = StreamManager::open(dir.path(), 8).unwrap();
        assert_eq!(manager.rw_count(), 1);
        assert_eq!(manager.ro_count(), 2);
        assert!(manager.find(0x77).is_some());
        assert!(manager.find(0x42).is_none());
        assert_eq!(manager.next_user_index(0x42), 4);
        assert_eq!(manager.next_user_index(0x1234), 1);

        let id = manager.register("new", 0x42, StreamType::U8, 0, SIZE, 10).unwrap();
        let summary = manager.summaries().into_iter().find(|s| s.id == id).unwrap();
        assert_eq!(summary.header.user_index, 4);

        // Read-only streams are readable by id but not writable.
        let ro = manager
            .summaries()
            .into_iter()
            .find(|s| s.id.mode() == Some(StreamMode::ReadOnly))
            .unwrap();
        assert_eq!(manager.user_id(ro.id), Some(0x42));
        assert!(manager.read(ro.id, 0, 1).unwrap().is_empty());
        assert!(matches!(manager.write_u8(ro.id, 10, 1), Err(StreamError::ReadOnly(_))));
    }

    #[test]
    fn test_adopt_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adopted.rwstream");
        StreamFile::create(&path, 0x55, 1, StreamType::U8, 0, SIZE, 0).unwrap();

        {
            let mut manager = StreamManager::open(&dir.path().join("empty"), 4).unwrap();
            let id = manager.adopt(&path).unwrap();
            assert_eq!(manager.adopt(&path).unwrap(), id);
            manager.write_u8(id, 3, 9).unwrap();
        }

        let manager = StreamManager::open(dir.path(), 4).unwrap();
        let id = manager.find(0x55).unwrap();
        assert_eq!(manager.read(id, 0, 5).unwrap()[0].data, [9u8]);
    }

    #[test]
    fn test_unknown_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = StreamManager::open(dir.path(), 4).unwrap();
        let ghost = StreamId::new(StreamType::U8, StreamMode::ReadWrite, 3);
        assert!(matches!(manager.write_u8(ghost, 0, 1), Err(StreamError::UnknownStream(_))));
        assert!(matches!(
            manager.write_u8(StreamId::INVALID, 0, 1),
            Err(StreamError::UnknownStream(_))
        ));
        assert_eq!(manager.time_range(ghost), None);
        assert!(manager.read(ghost, 0, 1).is_err());
    }

    #[test]
    fn test_duplicate_stream_set_aside() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = StreamManager::open(dir.path(), 4).unwrap();
        let live = manager.register("live", 0x66, StreamType::U8, 0, SIZE, 0).unwrap();
        manager.write_u8(live, 1, 7).unwrap();

        let extra = dir.path().join("extra.rwstream");
        StreamFile::create(&extra, 0x66, 1, StreamType::U8, 0, SIZE, 0).unwrap();
        assert_eq!(manager.adopt(&extra).unwrap(), live);
        assert!(!extra.exists());
        assert!(dir.path().join("extra.rwstream.dup").exists());
        assert!(dir.path().join("live.rwstream").exists());
        manager.flush().unwrap();
        drop(manager);

        let manager = StreamManager::open(dir.path(), 4).unwrap();
        assert_eq!(manager.rw_count(), 1);
        let id = manager.find(0x66).unwrap();
        assert_eq!(manager.read(id, 0, 5).unwrap()[0].data, [7u8]);
    }
}
