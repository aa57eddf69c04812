//! Value representations and physical units attached to measurements.

use serde::{Deserialize, Serialize};

/// In-memory representation of a single measured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Unsigned 8-bit integer
    U8,
    /// Unsigned 16-bit integer
    U16,
    /// Unsigned 32-bit integer
    U32,
    /// Unsigned 64-bit integer
    U64,
    /// Signed 8-bit integer
    S8,
    /// Signed 16-bit integer
    S16,
    /// Signed 32-bit integer
    S32,
    /// Signed 64-bit integer
    S64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
    /// Opaque binary payload (sensor packets, images)
    Binary,
    /// Text payload (JSON)
    Text,
}

impl ValueType {
    /// Size in bytes of one value, `None` for payload types.
    pub fn size(self) -> Option<usize> {
        match self {
            Self::U8 | Self::S8 => Some(1),
            Self::U16 | Self::S16 => Some(2),
            Self::U32 | Self::S32 | Self::F32 => Some(4),
            Self::U64 | Self::S64 | Self::F64 => Some(8),
            Self::Binary | Self::Text => None,
        }
    }
}

/// Physical unit of a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    /// No known unit
    #[default]
    Unknown,
    /// Degrees Celsius
    Celsius,
    /// Percentage
    Percent,
    /// Pascal
    Pascal,
    /// Lux
    Lux,
    /// UV index
    UvIndex,
    /// Parts per million
    Ppm,
    /// Decibels
    Decibels,
    /// Hertz
    Hertz,
    /// Boolean state
    TrueFalse,
    /// Switch state
    OnOff,
    /// Presence state
    PresentAbsent,
    /// Meters
    Meters,
    /// Signal strength, dBm
    DBm,
    /// Opaque binary data
    BinaryData,
    /// Millivolt
    MilliVolt,
    /// Milliampere
    MilliAmpere,
    /// Watt
    Watts,
    /// Kilowatt hour
    KiloWattHour,
    /// Cubic meters
    CubicMeters,
}

impl Unit {
    /// Short symbol used when rendering a value.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Unknown | Self::BinaryData => "",
            Self::Celsius => "°C",
            Self::Percent => "%",
            Self::Pascal => "Pa",
            Self::Lux => "lx",
            Self::UvIndex => "UVI",
            Self::Ppm => "ppm",
            Self::Decibels => "dB",
            Self::Hertz => "Hz",
            Self::TrueFalse => "true/false",
            Self::OnOff => "on/off",
            Self::PresentAbsent => "present/absent",
            Self::Meters => "m",
            Self::DBm => "dBm",
            Self::MilliVolt => "mV",
            Self::MilliAmpere => "mA",
            Self::Watts => "W",
            Self::KiloWattHour => "kWh",
            Self::CubicMeters => "m³",
        }
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}
