//! Shared types and wire formats for cconartist.
//!
//! This crate has no I/O beyond reading configuration files. It defines the
//! measurement vocabulary ([`UserType`], [`ValueType`], [`Unit`]), the stream
//! file header, device ids, the server configuration and the package
//! manifest model.

pub mod config;
pub mod ids;
pub mod manifest;
pub mod stream;
pub mod user_type;
pub mod value;

// Re-exports
pub use config::{Config, ConfigError, ServerConfig, ServerKind, StorageConfig, StreamConfig};
pub use ids::{
    describe_stream_key, format_mac, mac_from_bytes, parse_mac, split_stream_key, stream_key,
    MacError,
};
pub use manifest::{
    ArtifactKind, ArtifactRef, CopyRule, DependencyDecl, ManifestError, PackageDecl,
    PackageManifest, TargetDecl,
};
pub use stream::{
    HeaderError, StreamHeader, StreamId, StreamMode, StreamType, RELATIVE_TIME_BYTES,
};
pub use user_type::UserType;
pub use value::{Unit, ValueType};
