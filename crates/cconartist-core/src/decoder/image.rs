//! Images sent in blocks.
//!
//! Every packet starts with a 40-byte little-endian header followed by the
//! block data. The u32 fields are naturally aligned, leaving two padding
//! bytes after the height:
//!
//! ```text
//! 0  mac[6] sig[4]="IMG"+version type:u16 bpp:u16 width:u16 height:u16
//! 18 pad[2]
//! 20 block_count:u32 block_index:u32 data_offset:u32 data_size:u32 total_size:u32
//! ```
//!
//! Packets may be split across or packed into reads, so input is framed by
//! the announced block size. Blocks are assembled per connection. Once every
//! block arrived the image is stored as a 12-byte record header (type, bpp, width, height as u16,
//! total size as u32) followed by the image bytes.

use super::{DecodeError, Decoder, StreamSink, UiElement, UiItem};
use cconartist_schema::{mac_from_bytes, stream_key, UserType};
use tracing::debug;

/// Registry name.
pub const NAME: &str = "image";

/// Size of the wire header.
pub const PACKET_HEADER_LEN: usize = 40;

/// Size of the stored record header.
pub const RECORD_HEADER_LEN: usize = 12;

/// Largest accepted image.
pub const MAX_IMAGE_SIZE: usize = 16 * 1024 * 1024;

const SIGNATURE: &[u8; 3] = b"IMG";

/// Parsed wire header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePacketHeader {
    /// Device id
    pub mac: u64,
    /// Fourth signature byte
    pub version: u8,
    /// Encoding
    pub image_type: u16,
    /// Bits per pixel
    pub bpp: u16,
    /// Width in pixels
    pub width: u16,
    /// Height in pixels
    pub height: u16,
    /// Number of blocks the image is split into
    pub block_count: u32,
    /// Index of this block
    pub block_index: u32,
    /// Offset of this block in the image
    pub data_offset: u32,
    /// Bytes in this block
    pub data_size: u32,
    /// Size of the whole image
    pub total_size: u32,
}

fn u16_at(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

impl ImagePacketHeader {
    /// Parse and check the header at the start of `packet`.
    ///
    /// The block data may still be missing.
    ///
    /// # Errors
    ///
    /// Rejects short headers, a wrong signature, block indices beyond the
    /// block count and block data outside the image.
    pub fn parse(packet: &[u8]) -> Result<Self, DecodeError> {
        if packet.len() < PACKET_HEADER_LEN {
            return Err(DecodeError::Truncated {
                expected: PACKET_HEADER_LEN,
                actual: packet.len(),
            });
        }
        if &packet[6..9] != SIGNATURE {
            return Err(DecodeError::BadSignature([packet[6], packet[7], packet[8]]));
        }
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&packet[..6]);

        let header = Self {
            mac: mac_from_bytes(&mac),
            version: packet[9],
            image_type: u16_at(packet, 10),
            bpp: u16_at(packet, 12),
            width: u16_at(packet, 14),
            height: u16_at(packet, 16),
            block_count: u32_at(packet, 20),
            block_index: u32_at(packet, 24),
            data_offset: u32_at(packet, 28),
            data_size: u32_at(packet, 32),
            total_size: u32_at(packet, 36),
        };

        if header.block_index >= header.block_count {
            return Err(DecodeError::BlockOutOfRange {
                index: header.block_index,
                count: header.block_count,
            });
        }
        if header.total_size as usize > MAX_IMAGE_SIZE {
            return Err(DecodeError::Oversized {
                size: header.total_size as usize,
                limit: MAX_IMAGE_SIZE,
            });
        }
        if header.block_count > header.total_size.max(1) {
            return Err(DecodeError::TooManyBlocks {
                count: header.block_count,
                total: header.total_size,
            });
        }
        let end = u64::from(header.data_offset) + u64::from(header.data_size);
        if end > u64::from(header.total_size) {
            return Err(DecodeError::DataOutOfRange {
                offset: header.data_offset,
                size: header.data_size,
                total: header.total_size,
            });
        }
        Ok(header)
    }

    /// Encode the stored record header.
    pub fn record_header(&self) -> [u8; RECORD_HEADER_LEN] {
        let mut out = [0u8; RECORD_HEADER_LEN];
        out[0..2].copy_from_slice(&self.image_type.to_le_bytes());
        out[2..4].copy_from_slice(&self.bpp.to_le_bytes());
        out[4..6].copy_from_slice(&self.width.to_le_bytes());
        out[6..8].copy_from_slice(&self.height.to_le_bytes());
        out[8..12].copy_from_slice(&self.total_size.to_le_bytes());
        out
    }

    /// Wire length of the packet, header included.
    pub fn packet_len(&self) -> usize {
        PACKET_HEADER_LEN + self.data_size as usize
    }

    fn same_image(&self, other: &Self) -> bool {
        self.mac == other.mac
            && self.image_type == other.image_type
            && self.block_count == other.block_count
            && self.total_size == other.total_size
    }
}

#[derive(Debug, Clone)]
struct Assembly {
    header: ImagePacketHeader,
    received: Vec<bool>,
    remaining: usize,
    record: Vec<u8>,
}

impl Assembly {
    fn new(header: ImagePacketHeader) -> Self {
        let mut record = Vec::with_capacity(RECORD_HEADER_LEN + header.total_size as usize);
        record.extend_from_slice(&header.record_header());
        record.resize(RECORD_HEADER_LEN + header.total_size as usize, 0);
        Self {
            header,
            received: vec![false; header.block_count as usize],
            remaining: header.block_count as usize,
            record,
        }
    }
}

/// Per-connection image assembly.
#[derive(Debug, Default, Clone)]
pub struct ImageDecoder {
    current: Option<Assembly>,
    pending: Vec<u8>,
}

impl ImageDecoder {
    /// Blocks still missing from the image being assembled.
    pub fn missing_blocks(&self) -> Option<usize> {
        self.current.as_ref().map(|a| a.remaining)
    }

    /// Bytes of an incomplete packet waiting for more input.
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    fn accept(&mut self, header: ImagePacketHeader, data: &[u8], now: u64, sink: &mut dyn StreamSink) {
        let mut assembly = match self.current.take() {
            Some(a) if a.header.same_image(&header) => a,
            Some(a) => {
                debug!(missing = a.remaining, "discarding incomplete image");
                Assembly::new(header)
            }
            None => Assembly::new(header),
        };

        let start = RECORD_HEADER_LEN + header.data_offset as usize;
        assembly.record[start..start + data.len()].copy_from_slice(data);

        let index = header.block_index as usize;
        if !assembly.received[index] {
            assembly.received[index] = true;
            assembly.remaining -= 1;
        }

        if assembly.remaining == 0 {
            debug!(
                width = header.width,
                height = header.height,
                size = header.total_size,
                "image complete"
            );
            sink.write_variable(stream_key(header.mac, UserType::Image.id()), now, &assembly.record);
        } else {
            self.current = Some(assembly);
        }
    }
}

impl Decoder for ImageDecoder {
    fn name(&self) -> &'static str {
        NAME
    }

    fn write_to_stream(&mut self, packet: &[u8], now: u64, sink: &mut dyn StreamSink) -> Result<(), DecodeError> {
        let mut buffer = std::mem::take(&mut self.pending);
        buffer.extend_from_slice(packet);

        let mut consumed = 0;
        let result = loop {
            let rest = &buffer[consumed..];
            if rest.len() < PACKET_HEADER_LEN {
                break Ok(());
            }
            let header = match ImagePacketHeader::parse(rest) {
                Ok(header) => header,
                Err(e) => {
                    consumed = buffer.len();
                    break Err(e);
                }
            };
            let len = header.packet_len();
            if rest.len() < len {
                break Ok(());
            }
            self.accept(header, &rest[PACKET_HEADER_LEN..len], now, sink);
            consumed += len;
        };

        self.pending = buffer.split_off(consumed);
        result
    }

    fn build_ui(&self, _key: u64, data: &[u8]) -> Result<UiElement, DecodeError> {
        if data.len() < RECORD_HEADER_LEN {
            return Err(DecodeError::Truncated {
                expected: RECORD_HEADER_LEN,
                actual: data.len(),
            });
        }
        let total = u32_at(data, 8) as usize;
        let bytes = &data[RECORD_HEADER_LEN..];
        if bytes.len() < total {
            return Err(DecodeError::Truncated {
                expected: RECORD_HEADER_LEN + total,
                actual: data.len(),
            });
        }
        Ok(UiElement {
            items: vec![UiItem::Image {
                key: "Image".to_string(),
                image_type: u16_at(data, 0),
                width: u16_at(data, 4),
                height: u16_at(data, 6),
                data: bytes[..total].to_vec(),
            }],
        })
    }
}
