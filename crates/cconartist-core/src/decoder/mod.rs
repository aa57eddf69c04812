//! Packet decoders.
//!
//! A decoder turns raw packets from one connection into stream writes and
//! renders stored items for display. Each connection owns its own decoder
//! instances, so decoders may keep per-connection state (the GeekOpen
//! device id, partially received images).

pub mod geekopen;
pub mod image;
pub mod sensor;

pub use geekopen::GeekOpenDecoder;
pub use image::ImageDecoder;
pub use sensor::SensorDecoder;

use cconartist_schema::UserType;
use std::collections::BTreeMap;
use std::fmt;

/// Destination of decoded values, addressed by stream key.
///
/// Implementations decide what happens to writes for keys without a
/// stream; decoders never see storage errors.
pub trait StreamSink {
    /// Append a `u8`.
    fn write_u8(&mut self, key: u64, time: u64, value: u8);
    /// Append a `u16`.
    fn write_u16(&mut self, key: u64, time: u64, value: u16);
    /// Append a `u32`.
    fn write_u32(&mut self, key: u64, time: u64, value: u32);
    /// Append an `i8`.
    fn write_s8(&mut self, key: u64, time: u64, value: i8);
    /// Append an `i16`.
    fn write_s16(&mut self, key: u64, time: u64, value: i16);
    /// Append an `i32`.
    fn write_s32(&mut self, key: u64, time: u64, value: i32);
    /// Append an `f32`.
    fn write_f32(&mut self, key: u64, time: u64, value: f32);
    /// Append an `f64`.
    fn write_f64(&mut self, key: u64, time: u64, value: f64);
    /// Append a fixed-size record.
    fn write_fixed(&mut self, key: u64, time: u64, data: &[u8]);
    /// Append a variable-size record.
    fn write_variable(&mut self, key: u64, time: u64, data: &[u8]);
}

/// Errors decoding a packet or a stored item.
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    /// Fewer bytes than the layout requires.
    #[error("packet truncated: need {expected} bytes, got {actual}")]
    Truncated {
        /// Required length
        expected: usize,
        /// Available length
        actual: usize,
    },

    /// Packet does not carry the expected signature.
    #[error("bad packet signature {0:02x?}")]
    BadSignature([u8; 3]),

    /// Block index beyond the announced block count.
    #[error("block {index} out of range, image has {count} blocks")]
    BlockOutOfRange {
        /// Received index
        index: u32,
        /// Announced count
        count: u32,
    },

    /// Block data does not fit in the announced image.
    #[error("block data {offset}+{size} exceeds image size {total}")]
    DataOutOfRange {
        /// Offset of the block
        offset: u32,
        /// Size of the block
        size: u32,
        /// Announced total
        total: u32,
    },

    /// More blocks than bytes in the image.
    #[error("{count} blocks announced for an image of {total} bytes")]
    TooManyBlocks {
        /// Announced block count
        count: u32,
        /// Announced total
        total: u32,
    },

    /// Announced size exceeds what the decoder accepts.
    #[error("payload of {size} bytes exceeds the limit of {limit}")]
    Oversized {
        /// Announced or buffered size
        size: usize,
        /// Maximum
        limit: usize,
    },

    /// Malformed JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One displayable value.
#[derive(Debug, Clone, PartialEq)]
pub enum UiItem {
    /// A labelled value.
    Text {
        /// Label
        key: String,
        /// Rendered value
        value: String,
    },
    /// Encoded or raw image bytes.
    Image {
        /// Label
        key: String,
        /// Encoding as sent by the device
        image_type: u16,
        /// Width in pixels
        width: u16,
        /// Height in pixels
        height: u16,
        /// Image bytes
        data: Vec<u8>,
    },
}

impl UiItem {
    /// Text item helper.
    pub fn text(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Text {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Label of the item.
    pub fn key(&self) -> &str {
        match self {
            Self::Text { key, .. } | Self::Image { key, .. } => key,
        }
    }
}

impl fmt::Display for UiItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text { key, value } => write!(f, "{key}: {value}"),
            Self::Image {
                key,
                image_type,
                width,
                height,
                data,
            } => write!(
                f,
                "{key}: type {image_type}, {width}x{height}, {} bytes",
                data.len()
            ),
        }
    }
}

/// Items rendered from one stored record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UiElement {
    /// Items in display order
    pub items: Vec<UiItem>,
}

/// Decoder of one packet format.
pub trait Decoder: Send {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// Decode `packet` received at `now` and write the values to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the packet is malformed; nothing is
    /// written for the rejected part.
    fn write_to_stream(&mut self, packet: &[u8], now: u64, sink: &mut dyn StreamSink) -> Result<(), DecodeError>;

    /// Render a record previously written to stream `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the record is malformed.
    fn build_ui(&self, key: u64, data: &[u8]) -> Result<UiElement, DecodeError>;
}

type Constructor = fn() -> Box<dyn Decoder>;

/// Decoder constructors by name.
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    constructors: BTreeMap<&'static str, Constructor>,
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("decoders", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DecoderRegistry {
    /// Registry with `sensor`, `geekopen` and `image`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::default();
        registry.register(sensor::NAME, || Box::new(SensorDecoder) as Box<dyn Decoder>);
        registry.register(geekopen::NAME, || {
            Box::new(GeekOpenDecoder::default()) as Box<dyn Decoder>
        });
        registry.register(image::NAME, || Box::new(ImageDecoder::default()) as Box<dyn Decoder>);
        registry
    }

    /// Add or replace a decoder.
    pub fn register(&mut self, name: &'static str, constructor: Constructor) {
        self.constructors.insert(name, constructor);
    }

    /// Fresh instance of decoder `name`.
    pub fn create(&self, name: &str) -> Option<Box<dyn Decoder>> {
        self.constructors.get(name).map(|new| new())
    }

    /// True if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }

    /// Decoder that renders records of `user_type`.
    pub fn for_user_type(user_type: UserType) -> Option<&'static str> {
        match user_type {
            UserType::Sensor => Some(sensor::NAME),
            UserType::Json => Some(geekopen::NAME),
            UserType::Image => Some(image::NAME),
            _ => None,
        }
    }
}

/// Sink that records every write, for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    pub writes: Vec<(u64, u64, Recorded)>,
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Recorded {
    U8(u8),
    U16(u16),
    U32(u32),
    S8(i8),
    S16(i16),
    S32(i32),
    F32(f32),
    F64(f64),
    Fixed(Vec<u8>),
    Variable(Vec<u8>),
}

#[cfg(test)]
impl RecordingSink {
    pub fn values_for(&self, key: u64) -> Vec<Recorded> {
        self.writes
            .iter()
            .filter(|(k, _, _)| *k == key)
            .map(|(_, _, v)| v.clone())
            .collect()
    }
}

#[cfg(test)]
impl StreamSink for RecordingSink {
    fn write_u8(&mut self, key: u64, time: u64, value: u8) {
        self.writes.push((key, time, Recorded::U8(value)));
    }
    fn write_u16(&mut self, key: u64, time: u64, value: u16) {
        self.writes.push((key, time, Recorded::U16(value)));
    }
    fn write_u32(&mut self, key: u64, time: u64, value: u32) {
        self.writes.push((key, time, Recorded::U32(value)));
    }
    fn write_s8(&mut self, key: u64, time: u64, value: i8) {
        self.writes.push((key, time, Recorded::S8(value)));
    }
    fn write_s16(&mut self, key: u64, time: u64, value: i16) {
        self.writes.push((key, time, Recorded::S16(value)));
    }
    fn write_s32(&mut self, key: u64, time: u64, value: i32) {
        self.writes.push((key, time, Recorded::S32(value)));
    }
    fn write_f32(&mut self, key: u64, time: u64, value: f32) {
        self.writes.push((key, time, Recorded::F32(value)));
    }
    fn write_f64(&mut self, key: u64, time: u64, value: f64) {
        self.writes.push((key, time, Recorded::F64(value)));
    }
    fn write_fixed(&mut self, key: u64, time: u64, data: &[u8]) {
        self.writes.push((key, time, Recorded::Fixed(data.to_vec())));
    }
    fn write_variable(&mut self, key: u64, time: u64, data: &[u8]) {
        self.writes.push((key, time, Recorded::Variable(data.to_vec())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = DecoderRegistry::with_builtin();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["geekopen", "image", "sensor"]);
        for name in ["sensor", "geekopen", "image"] {
            assert_eq!(registry.create(name).unwrap().name(), name);
        }
        assert!(registry.create("discovery").is_none());
        assert!(!registry.contains("plugin"));
    }

    #[test]
    fn test_decoder_for_user_type() {
        assert_eq!(DecoderRegistry::for_user_type(UserType::Json), Some("geekopen"));
        assert_eq!(DecoderRegistry::for_user_type(UserType::Temperature), None);
    }

    #[test]
    fn test_ui_item_display() {
        assert_eq!(UiItem::text("Packet Version", "1").to_string(), "Packet Version: 1");
    }
}
