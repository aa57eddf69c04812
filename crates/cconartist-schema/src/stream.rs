//! Stream identifiers and the on-disk stream header.
//!
//! A stream file starts with a fixed 72-byte little-endian [`StreamHeader`],
//! followed by items. Every item is prefixed with its time relative to
//! `time_begin`, stored in [`RELATIVE_TIME_BYTES`] bytes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of bytes used to store the relative time of an item.
pub const RELATIVE_TIME_BYTES: usize = 5;

/// Largest relative time that fits in [`RELATIVE_TIME_BYTES`].
pub const MAX_RELATIVE_TIME: u64 = (1 << (RELATIVE_TIME_BYTES * 8)) - 1;

/// Extension of stream files that are still being written.
pub const RW_EXTENSION: &str = "rwstream";

/// Extension of finalized, read-only stream files.
pub const RO_EXTENSION: &str = "rostream";

/// Item layout of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum StreamType {
    /// One unsigned byte per item
    U8 = 0x01,
    /// Unsigned 16-bit items
    U16 = 0x02,
    /// Unsigned 32-bit items
    U32 = 0x03,
    /// Signed 8-bit items
    S8 = 0x11,
    /// Signed 16-bit items
    S16 = 0x12,
    /// Signed 32-bit items
    S32 = 0x13,
    /// 32-bit float items
    F32 = 0x15,
    /// 64-bit float items
    F64 = 0x25,
    /// Fixed-size opaque items of `sizeof_item` bytes
    Fixed = 0x20,
    /// Length-prefixed opaque items
    Variable = 0x23,
}

impl StreamType {
    /// Decode a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => Self::U8,
            0x02 => Self::U16,
            0x03 => Self::U32,
            0x11 => Self::S8,
            0x12 => Self::S16,
            0x13 => Self::S32,
            0x15 => Self::F32,
            0x25 => Self::F64,
            0x20 => Self::Fixed,
            0x23 => Self::Variable,
            _ => return None,
        })
    }

    /// The wire code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Payload size of a scalar item, `None` for fixed and variable streams.
    pub fn item_size(self) -> Option<usize> {
        match self {
            Self::U8 | Self::S8 => Some(1),
            Self::U16 | Self::S16 => Some(2),
            Self::U32 | Self::S32 | Self::F32 => Some(4),
            Self::F64 => Some(8),
            Self::Fixed | Self::Variable => None,
        }
    }

    /// Lowercase name, as used in `config.json`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::S8 => "s8",
            Self::S16 => "s16",
            Self::S32 => "s32",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Fixed => "fixed",
            Self::Variable => "variable",
        }
    }
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a stream is open for appending or only for reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamMode {
    /// Finalized stream, mapped read-only
    ReadOnly = 1,
    /// Active stream, mapped read-write
    ReadWrite = 2,
}

/// Compact handle of an open stream: `type << 24 | mode << 16 | index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u32);

impl StreamId {
    /// Sentinel for "no stream".
    pub const INVALID: Self = Self(0xFFFF_FFFF);

    /// Compose a stream id.
    pub fn new(stream_type: StreamType, mode: StreamMode, index: u16) -> Self {
        Self(((stream_type.code() as u32) << 24) | ((mode as u32) << 16) | u32::from(index))
    }

    /// Rebuild from the raw representation.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw 32-bit representation.
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Item layout encoded in the id.
    pub fn stream_type(self) -> Option<StreamType> {
        StreamType::from_code((self.0 >> 24) as u8)
    }

    /// Mode encoded in the id.
    pub fn mode(self) -> Option<StreamMode> {
        match (self.0 >> 16) & 0xFF {
            1 => Some(StreamMode::ReadOnly),
            2 => Some(StreamMode::ReadWrite),
            _ => None,
        }
    }

    /// Slot index encoded in the id.
    pub fn index(self) -> usize {
        (self.0 & 0xFFFF) as usize
    }

    /// False for [`StreamId::INVALID`].
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Errors decoding a [`StreamHeader`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum HeaderError {
    /// Fewer than [`StreamHeader::SIZE`] bytes were available.
    #[error("stream header truncated: {0} bytes")]
    Truncated(usize),

    /// The stream type code is not known.
    #[error("unknown stream type code 0x{0:02x}")]
    UnknownType(u16),

    /// Cursor or size fields contradict each other.
    #[error("inconsistent stream header: {0}")]
    Inconsistent(&'static str),
}

/// Header at offset 0 of every stream file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    /// Owner of the stream (mostly a MAC address based key)
    pub user_id: u64,
    /// Generation of the stream when several historical streams share a user id
    pub user_index: u16,
    /// Item layout
    pub stream_type: StreamType,
    /// Size of each item for fixed streams
    pub sizeof_item: u32,
    /// Time of the first item (seconds since the epoch)
    pub time_begin: u64,
    /// Total size of the stream file in bytes
    pub stream_size: u64,
    /// Number of items written
    pub item_count: u64,
    /// Time of the last item
    pub time_end: u64,
    /// Offset where the next item is written
    pub write_cursor: u64,
}

impl StreamHeader {
    /// Encoded size of the header in bytes.
    pub const SIZE: usize = 72;

    /// Header of a fresh, empty stream.
    pub fn new(
        user_id: u64,
        user_index: u16,
        stream_type: StreamType,
        sizeof_item: u32,
        stream_size: u64,
        now: u64,
    ) -> Self {
        Self {
            user_id,
            user_index,
            stream_type,
            sizeof_item,
            time_begin: now,
            stream_size,
            item_count: 0,
            time_end: now,
            write_cursor: Self::SIZE as u64,
        }
    }

    /// Encode into the first [`StreamHeader::SIZE`] bytes of `out`.
    ///
    /// # Panics
    ///
    /// Panics if `out` is shorter than [`StreamHeader::SIZE`].
    pub fn encode_into(&self, out: &mut [u8]) {
        let out = &mut out[..Self::SIZE];
        out[0..8].copy_from_slice(&self.user_id.to_le_bytes());
        out[8..10].copy_from_slice(&self.user_index.to_le_bytes());
        out[10..12].copy_from_slice(&u16::from(self.stream_type.code()).to_le_bytes());
        out[12..16].fill(0); // reserved0, reserved1
        out[16..20].copy_from_slice(&self.sizeof_item.to_le_bytes());
        out[20..24].fill(0); // reserved2
        out[24..32].copy_from_slice(&self.time_begin.to_le_bytes());
        out[32..40].copy_from_slice(&self.stream_size.to_le_bytes());
        out[40..48].copy_from_slice(&self.item_count.to_le_bytes());
        out[48..56].copy_from_slice(&self.time_end.to_le_bytes());
        out[56..64].copy_from_slice(&self.write_cursor.to_le_bytes());
        out[64..72].fill(0);
    }

    /// Encode into a fresh array.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Decode and sanity-check a header.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError`] if the buffer is too short, the type code is
    /// unknown, or the cursor lies outside the stream.
    pub fn decode(buf: &[u8]) -> Result<Self, HeaderError> {
        if buf.len() < Self::SIZE {
            return Err(HeaderError::Truncated(buf.len()));
        }
        let u64_at = |o: usize| u64::from_le_bytes(buf[o..o + 8].try_into().unwrap_or([0; 8]));
        let type_code = u16::from_le_bytes([buf[10], buf[11]]);
        let stream_type = u8::try_from(type_code)
            .ok()
            .and_then(StreamType::from_code)
            .ok_or(HeaderError::UnknownType(type_code))?;

        let header = Self {
            user_id: u64_at(0),
            user_index: u16::from_le_bytes([buf[8], buf[9]]),
            stream_type,
            sizeof_item: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
            time_begin: u64_at(24),
            stream_size: u64_at(32),
            item_count: u64_at(40),
            time_end: u64_at(48),
            write_cursor: u64_at(56),
        };

        if header.write_cursor < Self::SIZE as u64 {
            return Err(HeaderError::Inconsistent("write cursor inside header"));
        }
        if header.write_cursor > header.stream_size {
            return Err(HeaderError::Inconsistent("write cursor beyond stream size"));
        }
        if header.time_end < header.time_begin {
            return Err(HeaderError::Inconsistent("time_end before time_begin"));
        }
        Ok(header)
    }

    /// Bytes still available for items.
    pub fn remaining(&self) -> u64 {
        self.stream_size.saturating_sub(self.write_cursor)
    }
}
