//! A single memory-mapped stream file.
//!
//! Layout: a 72-byte [`StreamHeader`] followed by items. Each item is
//! `relative_time (5 bytes LE) | payload`, where the payload is the scalar
//! value, `sizeof_item` bytes for fixed streams, or `len (u32 LE) | bytes`
//! for variable streams.

use super::StreamError;
use cconartist_schema::stream::{MAX_RELATIVE_TIME, RELATIVE_TIME_BYTES};
use cconartist_schema::{StreamHeader, StreamMode, StreamType};
use memmap2::{Mmap, MmapMut};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

const LENGTH_PREFIX_BYTES: usize = 4;

#[derive(Debug)]
enum Mapping {
    ReadWrite(MmapMut),
    ReadOnly(Mmap),
}

impl Mapping {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::ReadWrite(m) => &m[..],
            Self::ReadOnly(m) => &m[..],
        }
    }
}

/// One decoded item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamItem<'a> {
    /// Absolute time (seconds since the epoch)
    pub time: u64,
    /// Raw payload, without the time prefix or length prefix
    pub data: &'a [u8],
}

/// An open stream file.
#[derive(Debug)]
pub struct StreamFile {
    path: PathBuf,
    header: StreamHeader,
    map: Mapping,
}

impl StreamFile {
    /// Create a new read-write stream of `file_size` bytes.
    ///
    /// Fails if the file already exists.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Io`] on filesystem errors and
    /// [`StreamError::FileTooSmall`] if `file_size` cannot hold the header.
    pub fn create(
        path: &Path,
        user_id: u64,
        user_index: u16,
        stream_type: StreamType,
        sizeof_item: u32,
        file_size: u64,
        now: u64,
    ) -> Result<Self, StreamError> {
        if file_size < StreamHeader::SIZE as u64 {
            return Err(StreamError::FileTooSmall(file_size));
        }
        let io = |source| StreamError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(io)?;
        file.set_len(file_size).map_err(io)?;

        let mut map = unsafe { MmapMut::map_mut(&file) }.map_err(io)?;
        let header = StreamHeader::new(user_id, user_index, stream_type, sizeof_item, file_size, now);
        header.encode_into(&mut map);

        debug!(path = %path.display(), user_id, user_index, %stream_type, file_size, "created stream");
        Ok(Self {
            path: path.to_path_buf(),
            header,
            map: Mapping::ReadWrite(map),
        })
    }

    /// Open an existing stream for appending.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Io`] or [`StreamError::Header`] if the file is
    /// unreadable or not a stream.
    pub fn open_rw(path: &Path) -> Result<Self, StreamError> {
        let file = open(path, true)?;
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(|source| StreamError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let header = validate(path, &map)?;
        Ok(Self {
            path: path.to_path_buf(),
            header,
            map: Mapping::ReadWrite(map),
        })
    }

    /// Open an existing stream for reading only.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Io`] or [`StreamError::Header`] if the file is
    /// unreadable or not a stream.
    pub fn open_ro(path: &Path) -> Result<Self, StreamError> {
        let file = open(path, false)?;
        let map = unsafe { Mmap::map(&file) }.map_err(|source| StreamError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let header = validate(path, &map)?;
        Ok(Self {
            path: path.to_path_buf(),
            header,
            map: Mapping::ReadOnly(map),
        })
    }

    /// File path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current header.
    pub fn header(&self) -> &StreamHeader {
        &self.header
    }

    /// Mode the file was opened with.
    pub fn mode(&self) -> StreamMode {
        match self.map {
            Mapping::ReadWrite(_) => StreamMode::ReadWrite,
            Mapping::ReadOnly(_) => StreamMode::ReadOnly,
        }
    }

    /// Bytes an item with `payload_len` bytes of data occupies.
    fn encoded_len(&self, payload_len: usize) -> usize {
        match self.header.stream_type {
            StreamType::Fixed => RELATIVE_TIME_BYTES + self.header.sizeof_item as usize,
            StreamType::Variable => RELATIVE_TIME_BYTES + LENGTH_PREFIX_BYTES + payload_len,
            _ => RELATIVE_TIME_BYTES + payload_len,
        }
    }

    /// Whether not even the smallest item fits anymore.
    pub fn is_full(&self) -> bool {
        (self.header.remaining() as usize) < self.encoded_len(0).max(RELATIVE_TIME_BYTES + 1)
    }

    /// Append `payload` at `time` after checking it against `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::TypeMismatch`] if the stream has another layout.
    pub fn write_typed(
        &mut self,
        expected: StreamType,
        time: u64,
        payload: &[u8],
    ) -> Result<(), StreamError> {
        if self.header.stream_type != expected {
            return Err(StreamError::TypeMismatch {
                stream: self.header.stream_type,
                requested: expected,
            });
        }
        self.write_item(time, payload)
    }

    /// Append one item.
    ///
    /// # Errors
    ///
    /// * [`StreamError::ReadOnly`] on read-only maps
    /// * [`StreamError::PayloadSize`] if the payload does not match the layout
    /// * [`StreamError::TimeBeforeStart`] / [`StreamError::TimeOverflow`] if
    ///   `time` cannot be stored relative to `time_begin`
    /// * [`StreamError::Full`] if the item does not fit
    pub fn write_item(&mut self, time: u64, payload: &[u8]) -> Result<(), StreamError> {
        let Mapping::ReadWrite(map) = &mut self.map else {
            return Err(StreamError::ReadOnly(self.path.clone()));
        };

        let header = &mut self.header;
        match header.stream_type {
            StreamType::Fixed => {
                if payload.len() > header.sizeof_item as usize {
                    return Err(StreamError::PayloadSize {
                        expected: header.sizeof_item as usize,
                        actual: payload.len(),
                    });
                }
            }
            StreamType::Variable => {
                if u32::try_from(payload.len()).is_err() {
                    return Err(StreamError::PayloadSize {
                        expected: u32::MAX as usize,
                        actual: payload.len(),
                    });
                }
            }
            scalar => {
                let size = scalar.item_size().unwrap_or(0);
                if payload.len() != size {
                    return Err(StreamError::PayloadSize {
                        expected: size,
                        actual: payload.len(),
                    });
                }
            }
        }

        if time < header.time_begin {
            return Err(StreamError::TimeBeforeStart {
                time,
                begin: header.time_begin,
            });
        }
        let relative = time - header.time_begin;
        if relative > MAX_RELATIVE_TIME {
            return Err(StreamError::TimeOverflow(time));
        }

        let needed = match header.stream_type {
            StreamType::Fixed => RELATIVE_TIME_BYTES + header.sizeof_item as usize,
            StreamType::Variable => RELATIVE_TIME_BYTES + LENGTH_PREFIX_BYTES + payload.len(),
            _ => RELATIVE_TIME_BYTES + payload.len(),
        };
        if needed as u64 > header.remaining() {
            return Err(StreamError::Full {
                path: self.path.clone(),
                needed,
                remaining: header.remaining(),
            });
        }

        let start = header.write_cursor as usize;
        let out = &mut map[start..start + needed];
        out[..RELATIVE_TIME_BYTES].copy_from_slice(&relative.to_le_bytes()[..RELATIVE_TIME_BYTES]);
        let body = &mut out[RELATIVE_TIME_BYTES..];
        match header.stream_type {
            StreamType::Variable => {
                let len = payload.len() as u32;
                body[..LENGTH_PREFIX_BYTES].copy_from_slice(&len.to_le_bytes());
                body[LENGTH_PREFIX_BYTES..].copy_from_slice(payload);
            }
            StreamType::Fixed => {
                body[..payload.len()].copy_from_slice(payload);
                body[payload.len()..].fill(0);
            }
            _ => body.copy_from_slice(payload),
        }

        header.write_cursor += needed as u64;
        header.item_count += 1;
        header.time_end = header.time_end.max(time);
        header.encode_into(map);
        Ok(())
    }

    /// Iterate over all written items.
    pub fn items(&self) -> StreamItems<'_> {
        let bytes = self.map.bytes();
        let end = (self.header.write_cursor as usize).min(bytes.len());
        StreamItems {
            data: &bytes[..end],
            offset: StreamHeader::SIZE,
            header: &self.header,
        }
    }

    /// The item at `index`, if written.
    pub fn item(&self, index: u64) -> Option<StreamItem<'_>> {
        if index >= self.header.item_count {
            return None;
        }
        let fixed = match self.header.stream_type {
            StreamType::Variable => None,
            StreamType::Fixed => Some(self.header.sizeof_item as usize),
            scalar => scalar.item_size(),
        };
        match fixed {
            // Fixed-width items can be addressed directly.
            Some(width) => {
                let offset = StreamHeader::SIZE + index as usize * (RELATIVE_TIME_BYTES + width);
                let mut iter = self.items();
                iter.offset = offset;
                iter.next()
            }
            None => self.items().nth(index as usize),
        }
    }

    /// Flush dirty pages to disk. A no-op for read-only maps.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Io`] if the flush fails.
    pub fn sync(&self) -> Result<(), StreamError> {
        if let Mapping::ReadWrite(map) = &self.map {
            map.flush().map_err(|source| StreamError::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Iterator over the items of a [`StreamFile`].
#[derive(Debug)]
pub struct StreamItems<'a> {
    data: &'a [u8],
    offset: usize,
    header: &'a StreamHeader,
}

impl<'a> Iterator for StreamItems<'a> {
    type Item = StreamItem<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.data.get(self.offset..)?;
        if rest.len() < RELATIVE_TIME_BYTES {
            return None;
        }
        let mut time = [0u8; 8];
        time[..RELATIVE_TIME_BYTES].copy_from_slice(&rest[..RELATIVE_TIME_BYTES]);
        let rest = &rest[RELATIVE_TIME_BYTES..];

        let (skip, len) = match self.header.stream_type {
            StreamType::Variable => {
                let prefix: [u8; LENGTH_PREFIX_BYTES] = rest.get(..LENGTH_PREFIX_BYTES)?.try_into().ok()?;
                (LENGTH_PREFIX_BYTES, u32::from_le_bytes(prefix) as usize)
            }
            StreamType::Fixed => (0, self.header.sizeof_item as usize),
            scalar => (0, scalar.item_size()?),
        };
        let data = rest.get(skip..skip + len)?;
        self.offset += RELATIVE_TIME_BYTES + skip + len;
        Some(StreamItem {
            time: self.header.time_begin + u64::from_le_bytes(time),
            data,
        })
    }
}

fn open(path: &Path, writable: bool) -> Result<File, StreamError> {
    OpenOptions::new()
        .read(true)
        .write(writable)
        .open(path)
        .map_err(|source| StreamError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn validate(path: &Path, bytes: &[u8]) -> Result<StreamHeader, StreamError> {
    let header = StreamHeader::decode(bytes).map_err(|source| StreamError::Header {
        path: path.to_path_buf(),
        source,
    })?;
    if header.stream_size > bytes.len() as u64 {
        return Err(StreamError::Header {
            path: path.to_path_buf(),
            source: cconartist_schema::HeaderError::Inconsistent("stream size exceeds file size"),
        });
    }
    Ok(header)
}
