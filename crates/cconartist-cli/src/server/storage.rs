//! Stream storage as seen by the decoders.
//!
//! Writes are addressed by stream key. A key without an open stream is
//! either a configured stream, which is created on the spot, or a new
//! device, for which a stream request is queued and the sample dropped.

use cconartist_core::stream::{StreamRequest, StreamRequestManager};
use cconartist_core::{JobManager, StreamError, StreamManager, StreamSink};
use cconartist_schema::{describe_stream_key, Config, StreamConfig, StreamId, StreamType};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Seconds between periodic flushes.
pub const FLUSH_INTERVAL: u64 = 30;

#[derive(Debug)]
pub struct Storage {
    manager: StreamManager,
    requests: StreamRequestManager,
    streams: Vec<StreamConfig>,
    file_size: u64,
    last_flush: u64,
}

impl Storage {
    /// Open the configured stream directory.
    pub fn open(config: &Config, jobs: Arc<JobManager>, now: u64) -> Result<Self, StreamError> {
        let storage = &config.storage;
        let manager = StreamManager::open(&storage.streams_dir, storage.max_streams)?;
        let requests = StreamRequestManager::new(jobs, &storage.streams_dir, &storage.mappings, now);
        Ok(Self {
            manager,
            requests,
            streams: config.streams.clone(),
            file_size: storage.stream_file_size,
            last_flush: now,
        })
    }

    pub fn manager(&self) -> &StreamManager {
        &self.manager
    }

    pub fn requests(&self) -> &StreamRequestManager {
        &self.requests
    }

    /// Collect created stream files, queue mapped requests and flush
    /// every [`FLUSH_INTERVAL`] seconds.
    pub fn maintain(&mut self, now: u64) {
        self.requests.update(now);
        while let Some(done) = self.requests.pop_completed() {
            let stream = describe_stream_key(done.request.user_id);
            match done.result {
                Ok(path) => match self.manager.adopt(&path) {
                    Ok(id) => info!(%id, %stream, path = %path.display(), "stream created"),
                    Err(e) => warn!(%stream, path = %path.display(), "cannot open created stream: {e}"),
                },
                Err(e) => warn!(%stream, "stream creation failed: {e}"),
            }
        }

        if now.saturating_sub(self.last_flush) >= FLUSH_INTERVAL {
            self.flush();
            self.last_flush = now;
        }
    }

    pub fn flush(&self) {
        if let Err(e) = self.manager.flush() {
            warn!("stream flush failed: {e}");
        }
    }

    fn resolve(&mut self, key: u64, stream_type: StreamType, sizeof_item: u32, now: u64) -> Option<StreamId> {
        if let Some(id) = self.manager.find(key) {
            return Some(id);
        }

        if let Some(stream) = self.streams.iter().find(|s| s.stream_key() == key) {
            return match self.manager.register(
                &stream.name,
                key,
                stream.stream_type(),
                stream.data_size,
                self.file_size,
                now,
            ) {
                Ok(id) => {
                    info!(%id, name = %stream.name, "configured stream opened");
                    Some(id)
                }
                Err(e) => {
                    warn!(name = %stream.name, "cannot create configured stream: {e}");
                    None
                }
            };
        }

        let request = StreamRequest {
            user_id: key,
            user_index: self.manager.next_user_index(key),
            stream_type,
            sizeof_item,
            file_size: self.file_size,
        };
        if self.requests.push(request) {
            debug!(stream = %describe_stream_key(key), %stream_type, "new stream requested");
        }
        None
    }

    fn write_with(
        &mut self,
        key: u64,
        time: u64,
        stream_type: StreamType,
        sizeof_item: u32,
        write: impl FnOnce(&mut StreamManager, StreamId) -> Result<(), StreamError>,
    ) {
        let Some(id) = self.resolve(key, stream_type, sizeof_item, time) else {
            trace!(stream = %describe_stream_key(key), "no stream yet, sample dropped");
            return;
        };
        if let Err(e) = write(&mut self.manager, id) {
            warn!(stream = %describe_stream_key(key), "write failed: {e}");
        }
    }
}

impl StreamSink for Storage {
    fn write_u8(&mut self, key: u64, time: u64, value: u8) {
        self.write_with(key, time, StreamType::U8, 0, |m, id| m.write_u8(id, time, value));
    }

    fn write_u16(&mut self, key: u64, time: u64, value: u16) {
        self.write_with(key, time, StreamType::U16, 0, |m, id| m.write_u16(id, time, value));
    }

    fn write_u32(&mut self, key: u64, time: u64, value: u32) {
        self.write_with(key, time, StreamType::U32, 0, |m, id| m.write_u32(id, time, value));
    }

    fn write_s8(&mut self, key: u64, time: u64, value: i8) {
        self.write_with(key, time, StreamType::S8, 0, |m, id| m.write_s8(id, time, value));
    }

    fn write_s16(&mut self, key: u64, time: u64, value: i16) {
        self.write_with(key, time, StreamType::S16, 0, |m, id| m.write_s16(id, time, value));
    }

    fn write_s32(&mut self, key: u64, time: u64, value: i32) {
        self.write_with(key, time, StreamType::S32, 0, |m, id| m.write_s32(id, time, value));
    }

    fn write_f32(&mut self, key: u64, time: u64, value: f32) {
        self.write_with(key, time, StreamType::F32, 0, |m, id| m.write_f32(id, time, value));
    }

    fn write_f64(&mut self, key: u64, time: u64, value: f64) {
        self.write_with(key, time, StreamType::F64, 0, |m, id| m.write_f64(id, time, value));
    }

    fn write_fixed(&mut self, key: u64, time: u64, data: &[u8]) {
        let size = u32::try_from(data.len()).unwrap_or(u32::MAX);
        self.write_with(key, time, StreamType::Fixed, size, |m, id| m.write_data(id, time, data));
    }

    fn write_variable(&mut self, key: u64, time: u64, data: &[u8]) {
        self.write_with(key, time, StreamType::Variable, 0, |m, id| m.write_data(id, time, data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cconartist_schema::{stream_key, UserType};
    use std::path::Path;
    use std::time::Duration;

    const MAC: u64 = 0x0011_2233_4455;

    fn config(dir: &Path) -> Config {
        let mut config = Config::from_json_str(
            r#"{
                "streams": [
                    { "name": "office_temperature", "user_id": "00:11:22:33:44:55", "user_type": "temperature" }
                ],
                "storage": { "stream_file_size": 4096 }
            }"#,
        )
        .unwrap();
        config.storage.streams_dir = dir.join("streams");
        config.storage.mappings = dir.join("mappings.txt");
        config
    }

    fn open(dir: &Path, now: u64) -> Storage {
        Storage::open(&config(dir), Arc::new(JobManager::new(1, 8)), now).unwrap()
    }

    #[test]
    fn test_configured_stream_created_on_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = open(dir.path(), 100);
        let key = stream_key(MAC, UserType::Temperature.id());

        storage.write_s16(key, 100, -4);
        storage.write_s16(key, 101, 3);
        // wrong layout is logged, not stored
        storage.write_u8(key, 102, 1);

        let id = storage.manager().find(key).unwrap();
        let items = storage.manager().read(id, 0, 10).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].data, &3i16.to_le_bytes());
        assert!(dir.path().join("streams/office_temperature.rwstream").exists());
    }

    #[test]
    fn test_unknown_device_waits_for_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = open(dir.path(), 500);
        let key = stream_key(MAC, UserType::Humidity.id());

        storage.write_u8(key, 500, 40);
        storage.write_u8(key, 501, 41);
        assert!(storage.manager().find(key).is_none());
        assert_eq!(storage.requests().pending().len(), 1);

        std::fs::write(dir.path().join("mappings.txt"), "00:11:22:33:44:55=office\n").unwrap();
        for _ in 0..500 {
            storage.maintain(502);
            if storage.manager().find(key).is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let id = storage.manager().find(key).expect("stream adopted");
        storage.write_u8(key, 503, 42);
        let items = storage.manager().read(id, 0, 10).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].data, &[42]);
        assert!(dir.path().join("streams/office_humidity.rwstream").exists());
    }
}
