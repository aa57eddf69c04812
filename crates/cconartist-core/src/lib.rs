//! Engines behind the cconartist server: memory-mapped stream storage, the
//! job pool that creates stream files, packet decoders, connection tracking
//! and build-graph assembly for package manifests.

pub mod conman;
pub mod decoder;
pub mod graph;
pub mod jobs;
pub mod paths;
pub mod pool;
pub mod registry;
pub mod stream;

pub use conman::{Connection, ConnectionError, ConnectionId, ConnectionInfo, ConnectionKind, ConnectionManager};
pub use decoder::{DecodeError, Decoder, DecoderRegistry, StreamSink, UiElement, UiItem};
pub use graph::{BuildGraph, GraphError};
pub use jobs::{JobChannel, JobError, JobManager};
pub use paths::*;
pub use pool::{Packet, PacketPool};
pub use stream::{StreamError, StreamFile, StreamManager};

/// Current time in whole seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}
