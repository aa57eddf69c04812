//! Server configuration loaded from `config.json`.
//!
//! ```json
//! {
//!   "servers": [
//!     { "name": "GeekOpen", "type": "tcp", "port": 31330, "decoders": ["geekopen"] },
//!     { "name": "Discovery", "type": "udp", "port": 31371, "decoders": ["discovery"] }
//!   ],
//!   "streams": [
//!     { "name": "office", "user_id": "8C:CE:4E:50:AF:57", "user_type": "json",
//!       "stream_type": "variable", "data_size": 0 }
//!   ]
//! }
//! ```

use crate::ids::parse_mac;
use crate::stream::StreamType;
use crate::user_type::UserType;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Decoder name that turns a UDP server into a discovery responder.
pub const DISCOVERY_DECODER: &str = "discovery";

/// Default size of a newly created stream file (64 MiB).
pub const DEFAULT_STREAM_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Default number of read-write streams kept open.
pub const DEFAULT_MAX_STREAMS: usize = 4096;

/// Errors loading or validating a [`Config`].
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that was read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The JSON did not match the schema.
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A server listens on port 0.
    #[error("server '{0}' has no port")]
    ZeroPort(String),

    /// Two servers share a transport and port.
    #[error("servers '{first}' and '{second}' both listen on {kind} port {port}")]
    DuplicatePort {
        /// First server
        first: String,
        /// Second server
        second: String,
        /// Transport
        kind: ServerKind,
        /// Port number
        port: u16,
    },

    /// A server lists no decoders.
    #[error("server '{0}' has no decoders")]
    NoDecoders(String),

    /// Two streams share a name.
    #[error("duplicate stream name '{0}'")]
    DuplicateStream(String),

    /// A fixed stream has no item size.
    #[error("fixed stream '{0}' needs a non-zero data_size")]
    FixedWithoutSize(String),
}

/// Transport of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    /// Stream oriented, one decoder set per connection
    Tcp,
    /// Datagram oriented, one decoder set per peer
    Udp,
}

impl ServerKind {
    /// Byte used in discovery replies.
    pub fn code(self) -> u8 {
        match self {
            Self::Tcp => b'T',
            Self::Udp => b'U',
        }
    }
}

impl std::fmt::Display for ServerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        })
    }
}

/// One listening endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Display name
    pub name: String,
    /// Transport
    #[serde(rename = "type")]
    pub kind: ServerKind,
    /// Port bound on all interfaces
    pub port: u16,
    /// Decoders applied to every packet, in order
    #[serde(alias = "encoders", default)]
    pub decoders: Vec<String>,
}

impl ServerConfig {
    /// Whether this server answers discovery requests.
    pub fn is_discovery(&self) -> bool {
        self.kind == ServerKind::Udp && self.decoders.iter().any(|d| d == DISCOVERY_DECODER)
    }
}

/// A stream declared up front instead of requested by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// File stem of the stream
    pub name: String,
    /// Device id, a number or a MAC string
    #[serde(deserialize_with = "user_id_from_json")]
    pub user_id: u64,
    /// Measurement kind
    pub user_type: UserType,
    /// Item layout, derived from `user_type` when absent
    #[serde(default)]
    pub stream_type: Option<StreamType>,
    /// Item size of fixed streams
    #[serde(default)]
    pub data_size: u32,
}

impl StreamConfig {
    /// Effective item layout.
    pub fn stream_type(&self) -> StreamType {
        self.stream_type.unwrap_or_else(|| self.user_type.stream_type())
    }

    /// Stream key `user_id << 16 | user_type`.
    pub fn stream_key(&self) -> u64 {
        crate::ids::stream_key(self.user_id, self.user_type.id())
    }
}

/// Where and how streams are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding stream files, relative to the config file
    pub streams_dir: PathBuf,
    /// `ID=name` mappings file, relative to the config file
    pub mappings: PathBuf,
    /// Size of each new stream file in bytes
    pub stream_file_size: u64,
    /// Maximum number of read-write streams
    pub max_streams: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            streams_dir: PathBuf::from("streams"),
            mappings: PathBuf::from("mappings.txt"),
            stream_file_size: DEFAULT_STREAM_FILE_SIZE,
            max_streams: DEFAULT_MAX_STREAMS,
        }
    }
}

/// Top-level `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Listening endpoints
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    /// Pre-declared streams
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
    /// Storage settings
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Read, parse and validate a config file. Relative storage paths are
    /// resolved against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file is unreadable, malformed or invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json_str(&content)?;
        if let Some(dir) = path.parent() {
            config.storage.streams_dir = dir.join(&config.storage.streams_dir);
            config.storage.mappings = dir.join(&config.storage.mappings);
        }
        Ok(config)
    }

    /// Parse and validate JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on malformed JSON or a failed validation.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field rules.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, server) in self.servers.iter().enumerate() {
            if server.port == 0 {
                return Err(ConfigError::ZeroPort(server.name.clone()));
            }
            if server.decoders.is_empty() {
                return Err(ConfigError::NoDecoders(server.name.clone()));
            }
            if let Some(other) = self.servers[..i]
                .iter()
                .find(|o| o.kind == server.kind && o.port == server.port)
            {
                return Err(ConfigError::DuplicatePort {
                    first: other.name.clone(),
                    second: server.name.clone(),
                    kind: server.kind,
                    port: server.port,
                });
            }
        }

        let mut names = HashSet::new();
        for stream in &self.streams {
            if !names.insert(stream.name.as_str()) {
                return Err(ConfigError::DuplicateStream(stream.name.clone()));
            }
            if stream.stream_type() == StreamType::Fixed && stream.data_size == 0 {
                return Err(ConfigError::FixedWithoutSize(stream.name.clone()));
            }
        }
        Ok(())
    }

    /// Configured stream with the given stream key.
    pub fn stream_for_key(&self, key: u64) -> Option<&StreamConfig> {
        self.streams.iter().find(|s| s.stream_key() == key)
    }
}

fn user_id_from_json<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => parse_mac(&s)
            .or_else(|mac_err| {
                s.strip_prefix("0x")
                    .and_then(|h| u64::from_str_radix(h, 16).ok())
                    .ok_or(mac_err)
            })
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "servers": [
            { "name": "GeekOpen", "type": "tcp", "port": 31330, "decoders": ["geekopen"] },
            { "name": "SensorPacket", "type": "udp", "port": 31370, "decoders": ["sensor"] },
            { "name": "Discovery", "type": "udp", "port": 31371, "decoders": ["discovery"] }
        ],
        "streams": [
            { "name": "office-json", "user_id": "8C:CE:4E:50:AF:57", "user_type": "json" },
            { "name": "blob", "user_id": 42, "user_type": "sensor", "stream_type": "fixed", "data_size": 16 }
        ]
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::from_json_str(SAMPLE).unwrap();
        assert_eq!(config.servers.len(), 3);
        assert_eq!(config.servers[0].kind, ServerKind::Tcp);
        assert!(config.servers[2].is_discovery());
        assert!(!config.servers[1].is_discovery());

        let json = &config.streams[0];
        assert_eq!(json.user_id, 0x8CCE_4E50_AF57);
        assert_eq!(json.stream_type(), StreamType::Variable);
        assert_eq!(json.stream_key(), (0x8CCE_4E50_AF57 << 16) | 50);
        assert_eq!(config.streams[1].stream_type(), StreamType::Fixed);
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn test_encoders_alias() {
        let config = Config::from_json_str(
            r#"{"servers":[{"name":"s","type":"tcp","port":1,"encoders":["sensor"]}]}"#,
        )
        .unwrap();
        assert_eq!(config.servers[0].decoders, vec!["sensor".to_string()]);
    }

    #[test]
    fn test_validation_errors() {
        let zero = r#"{"servers":[{"name":"a","type":"tcp","port":0,"decoders":["x"]}]}"#;
        assert!(matches!(Config::from_json_str(zero), Err(ConfigError::ZeroPort(_))));

        let dup = r#"{"servers":[
            {"name":"a","type":"tcp","port":5,"decoders":["x"]},
            {"name":"b","type":"udp","port":5,"decoders":["x"]},
            {"name":"c","type":"tcp","port":5,"decoders":["x"]}]}"#;
        match Config::from_json_str(dup) {
            Err(ConfigError::DuplicatePort { first, second, .. }) => {
                assert_eq!(first, "a");
                assert_eq!(second, "c");
            }
            other => panic!("unexpected {other:?}"),
        }

        let empty = r#"{"servers":[{"name":"a","type":"tcp","port":5,"decoders":[]}]}"#;
        assert!(matches!(Config::from_json_str(empty), Err(ConfigError::NoDecoders(_))));

        let streams = r#"{"streams":[
            {"name":"s","user_id":1,"user_type":"temperature"},
            {"name":"s","user_id":2,"user_type":"humidity"}]}"#;
        assert!(matches!(
            Config::from_json_str(streams),
            Err(ConfigError::DuplicateStream(_))
        ));

        let fixed = r#"{"streams":[{"name":"f","user_id":1,"user_type":"image","stream_type":"fixed"}]}"#;
        assert!(matches!(
            Config::from_json_str(fixed),
            Err(ConfigError::FixedWithoutSize(_))
        ));
    }

    #[test]
    fn test_bad_json_and_user_ids() {
        assert!(matches!(Config::from_json_str("{"), Err(ConfigError::Parse(_))));
        let bad_mac = r#"{"streams":[{"name":"s","user_id":"zz","user_type":"uv"}]}"#;
        assert!(Config::from_json_str(bad_mac).is_err());
        let hex_id = r#"{"streams":[{"name":"s","user_id":"0x1F","user_type":"uv"}]}"#;
        assert_eq!(Config::from_json_str(hex_id).unwrap().streams[0].user_id, 0x1F);
    }

    #[test]
    fn test_load_resolves_storage_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"storage":{"streams_dir":"data"}}"#).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.storage.streams_dir, dir.path().join("data"));
        assert_eq!(config.storage.mappings, dir.path().join("mappings.txt"));
        assert_eq!(config.storage.max_streams, DEFAULT_MAX_STREAMS);

        assert!(matches!(
            Config::load(&dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
