//! Deferred creation of stream files for devices seen on the wire.
//!
//! A packet from a device that has no stream yet produces a
//! [`StreamRequest`]. The request waits until the mappings file names the
//! device, then a job creates the file off the network thread and the
//! result comes back through [`StreamRequestManager::pop_completed`].

use super::{Mappings, StreamError, StreamFile};
use crate::jobs::{JobChannel, JobManager};
use cconartist_schema::stream::RW_EXTENSION;
use cconartist_schema::{split_stream_key, StreamType, UserType};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Seconds between checks of the mappings file.
pub const MAPPINGS_CHECK_INTERVAL: u64 = 10;

/// Requests that may wait for a mapping at once.
pub const MAX_REQUESTS: usize = 256;

/// A stream file that should exist for `user_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Stream key (device MAC and user type)
    pub user_id: u64,
    /// Generation written to the header
    pub user_index: u16,
    /// Item layout
    pub stream_type: StreamType,
    /// Item size for fixed streams
    pub sizeof_item: u32,
    /// Size of the file to create
    pub file_size: u64,
}

/// Outcome of a request.
#[derive(Debug)]
pub struct CompletedRequest {
    /// The request as pushed
    pub request: StreamRequest,
    /// Path of the created file
    pub result: Result<PathBuf, StreamError>,
}

/// Tracks pending requests and the mappings that unblock them.
pub struct StreamRequestManager {
    jobs: Arc<JobManager>,
    base_path: PathBuf,
    mappings_path: PathBuf,
    loaded: Option<Mappings>,
    names: BTreeMap<u64, String>,
    names_version: u64,
    last_check: u64,
    pending: Vec<StreamRequest>,
    in_flight: HashSet<u64>,
    completed: VecDeque<CompletedRequest>,
    mappings_channel: JobChannel<Mappings>,
    request_channel: JobChannel<CompletedRequest>,
}

impl fmt::Debug for StreamRequestManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRequestManager")
            .field("base_path", &self.base_path)
            .field("mappings_path", &self.mappings_path)
            .field("names", &self.names.len())
            .field("pending", &self.pending.len())
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl StreamRequestManager {
    /// Create a manager writing files into `base_path`. The first
    /// [`update`](Self::update) loads the mappings.
    pub fn new(jobs: Arc<JobManager>, base_path: &Path, mappings_path: &Path, now: u64) -> Self {
        let mappings_channel = jobs.channel(2);
        let request_channel = jobs.channel(MAX_REQUESTS);
        Self {
            jobs,
            base_path: base_path.to_path_buf(),
            mappings_path: mappings_path.to_path_buf(),
            loaded: Some(Mappings::new(mappings_path)),
            names: BTreeMap::new(),
            names_version: 0,
            last_check: now.saturating_sub(MAPPINGS_CHECK_INTERVAL),
            pending: Vec::new(),
            in_flight: HashSet::new(),
            completed: VecDeque::new(),
            mappings_channel,
            request_channel,
        }
    }

    /// Queue a request. Returns false if one for the same user id is
    /// already queued or running, or the queue is full.
    pub fn push(&mut self, request: StreamRequest) -> bool {
        if self.in_flight.contains(&request.user_id)
            || self.pending.iter().any(|r| r.user_id == request.user_id)
        {
            return false;
        }
        if self.pending.len() >= MAX_REQUESTS {
            warn!(user_id = request.user_id, "stream request queue full");
            return false;
        }
        debug!(user_id = request.user_id, "stream requested");
        self.pending.push(request);
        true
    }

    /// Drive reloads, collect finished jobs and dispatch mapped requests.
    pub fn update(&mut self, now: u64) {
        if now >= self.last_check.saturating_add(MAPPINGS_CHECK_INTERVAL) {
            if let Some(mappings) = self.loaded.take() {
                self.last_check = now;
                self.schedule_reload(mappings);
            }
        }

        while let Some(loaded) = self.mappings_channel.pop() {
            self.merge(&loaded);
            self.loaded = Some(loaded);
        }

        self.collect_completed();
        self.dispatch(now);
    }

    fn schedule_reload(&mut self, mut mappings: Mappings) {
        let submitted = self.jobs.submit(&self.mappings_channel, move || {
            if let Err(e) = mappings.reload_if_changed() {
                warn!(path = %mappings.path().display(), "failed to read mappings: {e}");
            }
            mappings
        });
        if let Err(e) = submitted {
            warn!("cannot schedule mappings reload: {e}");
            self.loaded = Some(Mappings::new(&self.mappings_path));
        }
    }

    // Names are only ever added; a renamed device keeps its first name
    // until restart so open files stay consistent.
    fn merge(&mut self, loaded: &Mappings) {
        let before = self.names.len();
        for (id, name) in loaded.iter() {
            self.names.entry(id).or_insert_with(|| name.to_string());
        }
        if self.names.len() > before {
            self.names_version += 1;
            info!(
                added = self.names.len() - before,
                total = self.names.len(),
                "stream mappings updated"
            );
        }
    }

    fn collect_completed(&mut self) {
        while let Some(done) = self.request_channel.pop() {
            self.in_flight.remove(&done.request.user_id);
            self.completed.push_back(done);
        }
    }

    fn dispatch(&mut self, now: u64) {
        let mut index = 0;
        while index < self.pending.len() {
            let Some(name) = self.file_name(self.pending[index].user_id) else {
                index += 1;
                continue;
            };
            let request = self.pending.remove(index);
            let user_id = request.user_id;
            let path = self.base_path.join(format!("{name}.{RW_EXTENSION}"));

            let job_request = request.clone();
            let submitted = self.jobs.submit(&self.request_channel, move || {
                let result = StreamFile::create(
                    &path,
                    job_request.user_id,
                    job_request.user_index,
                    job_request.stream_type,
                    job_request.sizeof_item,
                    job_request.file_size,
                    now,
                )
                .and_then(|file| {
                    file.sync()?;
                    Ok(path)
                });
                CompletedRequest {
                    request: job_request,
                    result,
                }
            });

            match submitted {
                Ok(()) => {
                    debug!(user_id, name, "dispatched stream creation");
                    self.in_flight.insert(user_id);
                }
                Err(e) => {
                    debug!(user_id, "stream creation deferred: {e}");
                    self.pending.insert(index, request);
                    return;
                }
            }
        }
    }

    /// File stem for a stream key: the device's mapped name followed by the
    /// user type key.
    pub fn file_name(&self, user_id: u64) -> Option<String> {
        let (mac, user_type) = split_stream_key(user_id);
        let name = self.names.get(&mac)?;
        Some(match UserType::from_u8(user_type) {
            Some(ut) => format!("{name}_{}", ut.key()),
            None => format!("{name}_{user_type}"),
        })
    }

    /// Next finished request.
    pub fn pop_completed(&mut self) -> Option<CompletedRequest> {
        self.collect_completed();
        self.completed.pop_front()
    }

    /// Requests still waiting for a mapping.
    pub fn pending(&self) -> &[StreamRequest] {
        &self.pending
    }

    /// Requests whose file is being created.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Name mapped to device `mac`.
    pub fn mapped_name(&self, mac: u64) -> Option<&str> {
        self.names.get(&mac).map(String::as_str)
    }

    /// Incremented whenever a reload adds names.
    pub fn mappings_version(&self) -> u64 {
        self.names_version
    }
}
