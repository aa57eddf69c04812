//! Compact binary sensor packets.
//!
//! ```text
//! [len/2] [version] [mac x6] ([user type] [hi] [lo])*
//! ```
//!
//! The first byte is half the packet length, rounded down. Each value is
//! two bytes interpreted according to the stream type of its user type.

use super::{DecodeError, Decoder, StreamSink, UiElement, UiItem};
use cconartist_schema::{format_mac, mac_from_bytes, stream_key, StreamType, UserType};
use tracing::trace;

/// Registry name.
pub const NAME: &str = "sensor";

/// Length byte, version byte and MAC.
pub const HEADER_LEN: usize = 8;

/// User type and two value bytes.
pub const VALUE_LEN: usize = 3;

/// Stateless decoder for sensor packets.
#[derive(Debug, Default, Clone, Copy)]
pub struct SensorDecoder;

struct SensorPacket<'a> {
    length: usize,
    version: u8,
    mac: u64,
    body: &'a [u8],
}

impl<'a> SensorPacket<'a> {
    fn parse(packet: &'a [u8]) -> Result<Self, DecodeError> {
        if packet.len() < HEADER_LEN {
            return Err(DecodeError::Truncated {
                expected: HEADER_LEN,
                actual: packet.len(),
            });
        }
        let declared = usize::from(packet[0]) * 2;
        if declared > packet.len() {
            return Err(DecodeError::Truncated {
                expected: declared,
                actual: packet.len(),
            });
        }
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&packet[2..HEADER_LEN]);
        Ok(Self {
            length: declared,
            version: packet[1],
            mac: mac_from_bytes(&mac),
            body: packet,
        })
    }

    fn values(&self) -> impl Iterator<Item = (u8, u8, u8)> + 'a {
        let body: &'a [u8] = self.body;
        body[HEADER_LEN..]
            .chunks_exact(VALUE_LEN)
            .map(|v| (v[0], v[1], v[2]))
    }
}

/// Value of a two-byte reading as its stream type interprets it.
fn reading(stream_type: StreamType, hi: u8, lo: u8) -> Option<i32> {
    match stream_type {
        StreamType::U8 => Some(i32::from(lo)),
        StreamType::U16 => Some(i32::from(u16::from_be_bytes([hi, lo]))),
        StreamType::S8 => Some(i32::from(lo as i8)),
        StreamType::S16 => Some(i32::from(i16::from_be_bytes([hi, lo]))),
        _ => None,
    }
}

impl Decoder for SensorDecoder {
    fn name(&self) -> &'static str {
        NAME
    }

    fn write_to_stream(&mut self, packet: &[u8], now: u64, sink: &mut dyn StreamSink) -> Result<(), DecodeError> {
        let packet = SensorPacket::parse(packet)?;
        sink.write_variable(stream_key(packet.mac, UserType::Sensor.id()), now, packet.body);

        for (ty, hi, lo) in packet.values() {
            let Some(user_type) = UserType::from_u8(ty) else {
                trace!(user_type = ty, "skipping unknown user type");
                continue;
            };
            let key = stream_key(packet.mac, user_type.id());
            match user_type.stream_type() {
                StreamType::U8 => sink.write_u8(key, now, lo),
                StreamType::U16 => sink.write_u16(key, now, u16::from_be_bytes([hi, lo])),
                StreamType::S8 => sink.write_s8(key, now, lo as i8),
                StreamType::S16 => sink.write_s16(key, now, i16::from_be_bytes([hi, lo])),
                other => trace!(%user_type, stream_type = %other, "value does not fit two bytes"),
            }
        }
        Ok(())
    }

    fn build_ui(&self, _key: u64, data: &[u8]) -> Result<UiElement, DecodeError> {
        let packet = SensorPacket::parse(data)?;
        let mut items = vec![
            UiItem::text("Packet Length", format!("{} bytes", packet.length)),
            UiItem::text("Packet Version", packet.version.to_string()),
            UiItem::text("Device MAC Address", format_mac(packet.mac)),
        ];
        for (ty, hi, lo) in packet.values() {
            let user_type = UserType::from_u8(ty).unwrap_or(UserType::Unknown);
            let value = reading(user_type.stream_type(), hi, lo)
                .unwrap_or_else(|| i32::from(u16::from_be_bytes([hi, lo])));
            let unit = user_type.unit().symbol();
            let rendered = if unit.is_empty() {
                value.to_string()
            } else {
                format!("{value} {unit}")
            };
            items.push(UiItem::text(user_type.key(), rendered));
        }
        Ok(UiElement { items })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{Recorded, RecordingSink};

    const MAC: [u8; 6] = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];
    const DEVICE: u64 = 0x0011_2233_4455;

    fn packet(values: &[(UserType, u8, u8)]) -> Vec<u8> {
        let len = HEADER_LEN + values.len() * VALUE_LEN;
        let mut p = vec![(len / 2) as u8, 1];
        p.extend_from_slice(&MAC);
        for (ut, hi, lo) in values {
            p.extend_from_slice(&[ut.id(), *hi, *lo]);
        }
        p
    }

    #[test]
    fn test_values_written_per_user_type() {
        let data = packet(&[
            (UserType::Temperature, 0xFF, 0xF6),
            (UserType::Humidity, 0x00, 55),
            (UserType::Co2, 0x01, 0x90),
            (UserType::Rssi, 0x00, 0xC4),
        ]);
        let mut sink = RecordingSink::default();
        SensorDecoder.write_to_stream(&data, 1_700_000_000, &mut sink).unwrap();

        assert_eq!(
            sink.values_for(stream_key(DEVICE, UserType::Sensor.id())),
            vec![Recorded::Variable(data.clone())]
        );
        assert_eq!(
            sink.values_for(stream_key(DEVICE, UserType::Temperature.id())),
            vec![Recorded::S16(-10)]
        );
        assert_eq!(
            sink.values_for(stream_key(DEVICE, UserType::Humidity.id())),
            vec![Recorded::U8(55)]
        );
        assert_eq!(
            sink.values_for(stream_key(DEVICE, UserType::Co2.id())),
            vec![Recorded::U16(400)]
        );
        assert_eq!(
            sink.values_for(stream_key(DEVICE, UserType::Rssi.id())),
            vec![Recorded::S8(-60)]
        );
        assert!(sink.writes.iter().all(|(_, t, _)| *t == 1_700_000_000));
    }

    #[test]
    fn test_truncated_packets() {
        let mut sink = RecordingSink::default();
        assert!(matches!(
            SensorDecoder.write_to_stream(&[4, 1, 0], 0, &mut sink),
            Err(DecodeError::Truncated { expected: 8, actual: 3 })
        ));

        let mut data = packet(&[(UserType::Temperature, 0, 1), (UserType::Battery, 0, 1)]);
        data.pop();
        assert!(matches!(
            SensorDecoder.write_to_stream(&data, 0, &mut sink),
            Err(DecodeError::Truncated { expected: 14, actual: 13 })
        ));
        assert!(sink.writes.is_empty());
    }

    #[test]
    fn test_unknown_and_wide_types_skipped() {
        let mut data = packet(&[(UserType::Light, 0, 9), (UserType::Battery, 0, 80)]);
        data.extend_from_slice(&[44, 0, 1]);
        data[0] = (data.len() / 2) as u8;
        let mut sink = RecordingSink::default();
        SensorDecoder.write_to_stream(&data, 5, &mut sink).unwrap();
        // sensor record and battery only
        assert_eq!(sink.writes.len(), 2);
        assert_eq!(
            sink.values_for(stream_key(DEVICE, UserType::Battery.id())),
            vec![Recorded::U8(80)]
        );
    }

    #[test]
    fn test_build_ui() {
        let data = packet(&[(UserType::Temperature, 0x00, 21), (UserType::Battery, 0, 90)]);
        let ui = SensorDecoder.build_ui(0, &data).unwrap();
        let texts: Vec<String> = ui.items.iter().map(ToString::to_string).collect();
        assert_eq!(
            texts,
            vec![
                "Packet Length: 14 bytes",
                "Packet Version: 1",
                "Device MAC Address: 00:11:22:33:44:55",
                "temperature: 21 °C",
                "battery: 90 %",
            ]
        );
    }
}
