//! Stream storage: memory-mapped files, the manager that owns them, and
//! the request pipeline that creates files for newly seen devices.

mod file;
mod manager;
pub mod mappings;
pub mod request;

pub use file::{StreamFile, StreamItem, StreamItems};
pub use manager::{StreamManager, StreamSummary};
pub use mappings::Mappings;
pub use request::{CompletedRequest, StreamRequest, StreamRequestManager};

use crate::registry::RegistryError;
use cconartist_schema::{HeaderError, StreamId, StreamType};
use std::path::PathBuf;

/// Errors reading, writing or managing streams.
#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    /// Filesystem or mapping failure.
    #[error("stream I/O error on {path}: {source}")]
    Io {
        /// Affected file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file does not start with a valid header.
    #[error("invalid stream file {path}: {source}")]
    Header {
        /// Affected file
        path: PathBuf,
        /// Decode failure
        #[source]
        source: HeaderError,
    },

    /// Requested file size cannot hold the header.
    #[error("stream file size {0} is smaller than the header")]
    FileTooSmall(u64),

    /// The item does not fit in the remaining space.
    #[error("stream {path} is full: need {needed} bytes, {remaining} left")]
    Full {
        /// Affected file
        path: PathBuf,
        /// Encoded item size
        needed: usize,
        /// Free bytes
        remaining: u64,
    },

    /// The write does not match the stream layout.
    #[error("cannot write {requested} item to {stream} stream")]
    TypeMismatch {
        /// Layout of the stream
        stream: StreamType,
        /// Layout of the write
        requested: StreamType,
    },

    /// The payload has the wrong length.
    #[error("payload of {actual} bytes, expected {expected}")]
    PayloadSize {
        /// Allowed size (maximum for fixed streams)
        expected: usize,
        /// Given size
        actual: usize,
    },

    /// Writes to read-only streams are rejected.
    #[error("stream {0} is read-only")]
    ReadOnly(PathBuf),

    /// Item time precedes the stream start.
    #[error("time {time} precedes stream start {begin}")]
    TimeBeforeStart {
        /// Item time
        time: u64,
        /// Stream `time_begin`
        begin: u64,
    },

    /// Item time is too far past the stream start to encode.
    #[error("time {0} is out of range for this stream")]
    TimeOverflow(u64),

    /// No open stream has this id.
    #[error("unknown stream id {0}")]
    UnknownStream(StreamId),

    /// Too many read-write streams.
    #[error("stream limit of {0} read-write streams reached")]
    Capacity(usize),

    /// The id registry rejected the stream.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
