//! GeekOpen smart plugs and relays.
//!
//! Devices send flat JSON objects over TCP, for example
//! `{"mac":"8CCE4E50AF57","key":0,"voltage":225.4,"current":0,"power":0.1,"energy":0.02}`.
//! Only some objects carry the `mac`; the first one seen identifies the
//! device for the rest of the connection. Objects may be split across or
//! packed into reads, so input is buffered until a complete object arrives.

use super::{DecodeError, Decoder, StreamSink, UiElement, UiItem};
use cconartist_schema::{parse_mac, stream_key, UserType};
use serde_json::{Map, Value};
use tracing::{debug, trace};

/// Registry name.
pub const NAME: &str = "geekopen";

/// Largest incomplete object kept between reads.
pub const MAX_BUFFERED: usize = 64 * 1024;

/// Per-connection GeekOpen state.
#[derive(Debug, Default, Clone)]
pub struct GeekOpenDecoder {
    device: Option<u64>,
    buffer: Vec<u8>,
}

impl GeekOpenDecoder {
    /// Device id learned from the `mac` property.
    pub fn device(&self) -> Option<u64> {
        self.device
    }

    fn handle(&mut self, object: &Map<String, Value>, raw: &[u8], now: u64, sink: &mut dyn StreamSink) {
        if self.device.is_none() {
            if let Some(Value::String(mac)) = object.get("mac") {
                match parse_mac(mac) {
                    Ok(device) => {
                        debug!(mac = %mac, "geekopen device identified");
                        self.device = Some(device);
                    }
                    Err(e) => debug!("ignoring geekopen mac: {e}"),
                }
            }
        }
        let Some(device) = self.device else {
            trace!("dropping geekopen object from unidentified device");
            return;
        };

        sink.write_variable(stream_key(device, UserType::Json.id()), now, raw);

        for (name, value) in object {
            let key = |ut: UserType| stream_key(device, ut.id());
            match name.as_str() {
                "voltage" => {
                    if let Some(v) = number(value) {
                        sink.write_f32(key(UserType::Voltage), now, v as f32);
                    }
                }
                "current" => {
                    if let Some(v) = number(value) {
                        sink.write_f32(key(UserType::Current), now, v as f32);
                    }
                }
                "power" => {
                    if let Some(v) = number(value) {
                        sink.write_f32(key(UserType::Power), now, v as f32);
                    }
                }
                "energy" => {
                    if let Some(v) = number(value) {
                        sink.write_f64(key(UserType::Energy), now, v);
                    }
                }
                other => {
                    if let Some(switch) = switch_channel(other).and_then(UserType::switch) {
                        sink.write_u8(key(switch), now, u8::from(switch_on(value)));
                    }
                }
            }
        }
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `key` and `key0` are the first channel, `keyN` the N-th.
fn switch_channel(name: &str) -> Option<u8> {
    let suffix = name.strip_prefix("key")?;
    if suffix.is_empty() {
        return Some(1);
    }
    match suffix.parse::<u8>().ok()? {
        0 => Some(1),
        n => Some(n),
    }
}

fn switch_on(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.to_string().starts_with('1'),
        Value::String(s) => s.starts_with(['1', 't', 'T']),
        _ => false,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

impl Decoder for GeekOpenDecoder {
    fn name(&self) -> &'static str {
        NAME
    }

    fn write_to_stream(&mut self, packet: &[u8], now: u64, sink: &mut dyn StreamSink) -> Result<(), DecodeError> {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.extend_from_slice(packet);

        let mut consumed = 0;
        let mut result = Ok(());
        let mut objects = serde_json::Deserializer::from_slice(&buffer).into_iter::<Map<String, Value>>();
        loop {
            match objects.next() {
                Some(Ok(object)) => {
                    let end = objects.byte_offset();
                    self.handle(&object, trim_ascii(&buffer[consumed..end]), now, sink);
                    consumed = end;
                }
                None => {
                    consumed = buffer.len();
                    break;
                }
                Some(Err(e)) if e.is_eof() => break,
                Some(Err(e)) => {
                    consumed = buffer.len();
                    result = Err(DecodeError::Json(e));
                    break;
                }
            }
        }

        let rest = &buffer[consumed..];
        if rest.len() > MAX_BUFFERED {
            return Err(DecodeError::Oversized {
                size: rest.len(),
                limit: MAX_BUFFERED,
            });
        }
        self.buffer = rest.to_vec();
        result
    }

    fn build_ui(&self, _key: u64, data: &[u8]) -> Result<UiElement, DecodeError> {
        let object: Map<String, Value> = serde_json::from_slice(data)?;
        Ok(UiElement {
            items: object
                .iter()
                .map(|(name, value)| UiItem::text(name.as_str(), display(value)))
                .collect(),
        })
    }
}
