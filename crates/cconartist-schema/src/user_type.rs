//! Measurement kinds reported by devices.
//!
//! Each [`UserType`] has a stable numeric id (the low 16 bits of a stream
//! key), a serialization key, a UI label, a [`ValueType`] and a [`Unit`].

use crate::stream::StreamType;
use crate::value::{Unit, ValueType};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A kind of measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum UserType {
    Unknown = 0,
    Temperature = 1,
    Humidity = 2,
    Pressure = 3,
    Light = 4,
    Uv = 5,
    Co = 6,
    Co2 = 7,
    Hcho = 8,
    Voc = 9,
    Nox = 10,
    Pm005 = 11,
    Pm010 = 12,
    Pm025 = 13,
    Pm040 = 14,
    Pm100 = 15,
    Noise = 16,
    Vibration = 17,
    State = 18,
    Battery = 19,
    Switch1 = 21,
    Switch2 = 22,
    Switch3 = 23,
    Switch4 = 24,
    Switch5 = 25,
    Switch6 = 26,
    Switch7 = 27,
    Switch8 = 28,
    Presence1 = 31,
    Presence2 = 32,
    Presence3 = 33,
    Distance1 = 34,
    Distance2 = 35,
    Distance3 = 36,
    Px = 37,
    Py = 38,
    Pz = 39,
    Rssi = 40,
    Perf1 = 41,
    Perf2 = 42,
    Perf3 = 43,
    Voltage = 45,
    Current = 46,
    Power = 47,
    Energy = 48,
    Sensor = 49,
    Json = 50,
    Image = 51,
    GasMeter = 52,
    WaterMeter = 53,
    ElectricityMeter = 54,
}

struct Entry {
    key: &'static str,
    user_type: UserType,
    ui: &'static str,
    value_type: ValueType,
    unit: Unit,
}

const fn entry(
    key: &'static str,
    user_type: UserType,
    ui: &'static str,
    value_type: ValueType,
    unit: Unit,
) -> Entry {
    Entry {
        key,
        user_type,
        ui,
        value_type,
        unit,
    }
}

const UNKNOWN_INDEX: usize = 45;

// Sorted by key for binary search.
#[rustfmt::skip]
static TABLE: [Entry; 51] = [
    entry("battery",           UserType::Battery,          "Battery",              ValueType::U8,     Unit::Percent),
    entry("co",                UserType::Co,               "Carbon Monoxide",      ValueType::U16,    Unit::Ppm),
    entry("co2",               UserType::Co2,              "Carbon Dioxide",       ValueType::U16,    Unit::Ppm),
    entry("current",           UserType::Current,          "Current",              ValueType::F32,    Unit::MilliAmpere),
    entry("distance1",         UserType::Distance1,        "Distance1",            ValueType::U16,    Unit::Meters),
    entry("distance2",         UserType::Distance2,        "Distance2",            ValueType::U16,    Unit::Meters),
    entry("distance3",         UserType::Distance3,        "Distance3",            ValueType::U16,    Unit::Meters),
    entry("electricity_meter", UserType::ElectricityMeter, "Electricity Meter",    ValueType::F64,    Unit::KiloWattHour),
    entry("energy",            UserType::Energy,           "Energy",               ValueType::F64,    Unit::KiloWattHour),
    entry("gas_meter",         UserType::GasMeter,         "Gas Meter",            ValueType::F64,    Unit::CubicMeters),
    entry("hcho",              UserType::Hcho,             "Formaldehyde",         ValueType::U16,    Unit::Ppm),
    entry("humidity",          UserType::Humidity,         "Humidity",             ValueType::U8,     Unit::Percent),
    entry("image",             UserType::Image,            "Image",                ValueType::Binary, Unit::BinaryData),
    entry("json",              UserType::Json,             "JSON",                 ValueType::Text,   Unit::BinaryData),
    entry("light",             UserType::Light,            "Light",                ValueType::U32,    Unit::Lux),
    entry("noise",             UserType::Noise,            "Noise",                ValueType::U8,     Unit::Decibels),
    entry("nox",               UserType::Nox,              "Nitrogen Oxides",      ValueType::U16,    Unit::Ppm),
    entry("perf1",             UserType::Perf1,            "Performance Metric 1", ValueType::U32,    Unit::BinaryData),
    entry("perf2",             UserType::Perf2,            "Performance Metric 2", ValueType::U32,    Unit::BinaryData),
    entry("perf3",             UserType::Perf3,            "Performance Metric 3", ValueType::U32,    Unit::BinaryData),
    entry("pm0.5",             UserType::Pm005,            "PM 0.5",               ValueType::U16,    Unit::Ppm),
    entry("pm1.0",             UserType::Pm010,            "PM 1.0",               ValueType::U16,    Unit::Ppm),
    entry("pm10.0",            UserType::Pm100,            "PM 10.0",              ValueType::U16,    Unit::Ppm),
    entry("pm2.5",             UserType::Pm025,            "PM 2.5",               ValueType::U16,    Unit::Ppm),
    entry("pm4.0",             UserType::Pm040,            "PM 4.0",               ValueType::U16,    Unit::Ppm),
    entry("power",             UserType::Power,            "Power",                ValueType::F32,    Unit::Watts),
    entry("presence1",         UserType::Presence1,        "Presence1",            ValueType::U8,     Unit::PresentAbsent),
    entry("presence2",         UserType::Presence2,        "Presence2",            ValueType::U8,     Unit::PresentAbsent),
    entry("presence3",         UserType::Presence3,        "Presence3",            ValueType::U8,     Unit::PresentAbsent),
    entry("pressure",          UserType::Pressure,         "Pressure",             ValueType::U32,    Unit::Pascal),
    entry("px",                UserType::Px,               "Positional X",         ValueType::S32,    Unit::Meters),
    entry("py",                UserType::Py,               "Positional Y",         ValueType::S32,    Unit::Meters),
    entry("pz",                UserType::Pz,               "Positional Z",         ValueType::S32,    Unit::Meters),
    entry("rssi",              UserType::Rssi,             "RSSI",                 ValueType::S8,     Unit::DBm),
    entry("sensor",            UserType::Sensor,           "Sensor Packet",        ValueType::Binary, Unit::BinaryData),
    entry("state",             UserType::State,            "State",                ValueType::U8,     Unit::TrueFalse),
    entry("switch1",           UserType::Switch1,          "Switch1",              ValueType::U8,     Unit::OnOff),
    entry("switch2",           UserType::Switch2,          "Switch2",              ValueType::U8,     Unit::OnOff),
    entry("switch3",           UserType::Switch3,          "Switch3",              ValueType::U8,     Unit::OnOff),
    entry("switch4",           UserType::Switch4,          "Switch4",              ValueType::U8,     Unit::OnOff),
    entry("switch5",           UserType::Switch5,          "Switch5",              ValueType::U8,     Unit::OnOff),
    entry("switch6",           UserType::Switch6,          "Switch6",              ValueType::U8,     Unit::OnOff),
    entry("switch7",           UserType::Switch7,          "Switch7",              ValueType::U8,     Unit::OnOff),
    entry("switch8",           UserType::Switch8,          "Switch8",              ValueType::U8,     Unit::OnOff),
    entry("temperature",       UserType::Temperature,      "Temperature",          ValueType::S16,    Unit::Celsius),
    entry("unknown",           UserType::Unknown,          "Unknown",              ValueType::U8,     Unit::Unknown),
    entry("uv",                UserType::Uv,               "UV",                   ValueType::U8,     Unit::UvIndex),
    entry("vibration",         UserType::Vibration,        "Vibration",            ValueType::U16,    Unit::Hertz),
    entry("voc",               UserType::Voc,              "VOC",                  ValueType::U16,    Unit::Ppm),
    entry("voltage",           UserType::Voltage,          "Voltage",              ValueType::F32,    Unit::MilliVolt),
    entry("water_meter",       UserType::WaterMeter,       "Water Meter",          ValueType::F64,    Unit::CubicMeters),
];

impl UserType {
    /// Every known user type, ordered by key.
    pub fn all() -> impl Iterator<Item = UserType> {
        TABLE.iter().map(|e| e.user_type)
    }

    fn entry(self) -> &'static Entry {
        TABLE
            .iter()
            .find(|e| e.user_type == self)
            .unwrap_or(&TABLE[UNKNOWN_INDEX])
    }

    /// Look up a serialization key such as `"pm2.5"`.
    pub fn from_key(key: &str) -> Option<Self> {
        TABLE
            .binary_search_by(|e| e.key.cmp(key))
            .ok()
            .map(|i| TABLE[i].user_type)
    }

    /// Map a raw id, `None` for ids that are not assigned.
    pub fn from_u8(id: u8) -> Option<Self> {
        TABLE.iter().find(|e| e.user_type as u8 == id).map(|e| e.user_type)
    }

    /// Raw id.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Serialization key.
    pub fn key(self) -> &'static str {
        self.entry().key
    }

    /// Human readable label.
    pub fn ui_label(self) -> &'static str {
        self.entry().ui
    }

    /// Representation of one value.
    pub fn value_type(self) -> ValueType {
        self.entry().value_type
    }

    /// Physical unit.
    pub fn unit(self) -> Unit {
        self.entry().unit
    }

    /// Layout of the stream that stores values of this kind.
    pub fn stream_type(self) -> StreamType {
        match self.value_type() {
            ValueType::U8 => StreamType::U8,
            ValueType::U16 => StreamType::U16,
            ValueType::U32 => StreamType::U32,
            ValueType::S8 => StreamType::S8,
            ValueType::S16 => StreamType::S16,
            ValueType::S32 => StreamType::S32,
            ValueType::F32 => StreamType::F32,
            ValueType::F64 => StreamType::F64,
            ValueType::U64 | ValueType::S64 => StreamType::Fixed,
            ValueType::Binary | ValueType::Text => StreamType::Variable,
        }
    }

    /// The `n`-th switch (1 based), as used by multi-channel relays.
    pub fn switch(n: u8) -> Option<Self> {
        match n {
            1..=8 => Self::from_u8(UserType::Switch1 as u8 + n - 1),
            _ => None,
        }
    }
}

impl std::fmt::Display for UserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl Serialize for UserType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.key())
    }
}

impl<'de> Deserialize<'de> for UserType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let key = String::deserialize(deserializer)?;
        UserType::from_key(&key)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown user type '{key}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_sorted_and_complete() {
        for pair in TABLE.windows(2) {
            assert!(pair[0].key < pair[1].key, "{} >= {}", pair[0].key, pair[1].key);
        }
        for e in &TABLE {
            assert_eq!(UserType::from_key(e.key), Some(e.user_type));
            assert_eq!(e.user_type.key(), e.key);
        }
        assert_eq!(TABLE[UNKNOWN_INDEX].user_type, UserType::Unknown);
    }

    #[test]
    fn test_from_u8() {
        assert_eq!(UserType::from_u8(1), Some(UserType::Temperature));
        assert_eq!(UserType::from_u8(54), Some(UserType::ElectricityMeter));
        assert_eq!(UserType::from_u8(20), None);
        assert_eq!(UserType::from_u8(44), None);
        assert_eq!(UserType::from_u8(200), None);
    }

    #[test]
    fn test_from_key_misses() {
        assert_eq!(UserType::from_key("pm2.5"), Some(UserType::Pm025));
        assert_eq!(UserType::from_key("switch"), None);
        assert_eq!(UserType::from_key("Temperature"), None);
        assert_eq!(UserType::from_key(""), None);
    }

    #[test]
    fn test_derived_stream_types() {
        assert_eq!(UserType::Temperature.stream_type(), StreamType::S16);
        assert_eq!(UserType::Rssi.stream_type(), StreamType::S8);
        assert_eq!(UserType::Sensor.stream_type(), StreamType::Variable);
        assert_eq!(UserType::Json.stream_type(), StreamType::Variable);
        assert_eq!(UserType::Energy.stream_type(), StreamType::F64);
        assert_eq!(UserType::Temperature.unit(), Unit::Celsius);
    }

    #[test]
    fn test_switch_channels() {
        assert_eq!(UserType::switch(1), Some(UserType::Switch1));
        assert_eq!(UserType::switch(8), Some(UserType::Switch8));
        assert_eq!(UserType::switch(0), None);
        assert_eq!(UserType::switch(9), None);
    }

    #[test]
    fn test_serde_uses_keys() {
        let json = serde_json::to_string(&UserType::Co2).unwrap();
        assert_eq!(json, "\"co2\"");
        let back: UserType = serde_json::from_str("\"water_meter\"").unwrap();
        assert_eq!(back, UserType::WaterMeter);
        assert!(serde_json::from_str::<UserType>("\"nope\"").is_err());
    }
}
