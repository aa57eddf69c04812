//! Device identifiers and stream keys.
//!
//! Devices are identified by their 48-bit MAC address. A stream key combines
//! the MAC with a [`UserType`](crate::UserType) id: `mac << 16 | user_type`.

use thiserror::Error;

/// Errors parsing a MAC address.
#[derive(Error, Debug, PartialEq)]
pub enum MacError {
    /// Not 12 hex digits once separators are removed.
    #[error("invalid MAC address '{0}': expected 12 hex digits")]
    Length(String),

    /// Contains a character that is neither hex nor a separator.
    #[error("invalid MAC address '{0}': {1}")]
    Hex(String, hex::FromHexError),
}

/// Parse `001122334455`, `00:11:22:33:44:55` or `00-11-22-33-44-55`.
///
/// # Errors
///
/// Returns [`MacError`] when the input is not exactly six hex-encoded bytes.
pub fn parse_mac(s: &str) -> Result<u64, MacError> {
    let digits: String = s
        .trim()
        .chars()
        .filter(|c| !matches!(c, ':' | '-'))
        .collect();
    if digits.len() != 12 {
        return Err(MacError::Length(s.to_string()));
    }
    let mut bytes = [0u8; 6];
    hex::decode_to_slice(&digits, &mut bytes).map_err(|e| MacError::Hex(s.to_string(), e))?;
    Ok(mac_from_bytes(&bytes))
}

/// Render a MAC as `00:11:22:33:44:55` (upper case).
pub fn format_mac(mac: u64) -> String {
    let bytes = mac.to_be_bytes();
    hex::encode_upper(&bytes[2..])
        .as_bytes()
        .chunks(2)
        .map(|pair| std::str::from_utf8(pair).unwrap_or("??"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Big-endian MAC bytes to a 48-bit id.
pub fn mac_from_bytes(bytes: &[u8; 6]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// Stream key of a device measurement.
pub fn stream_key(mac: u64, user_type: u8) -> u64 {
    ((mac & 0xFFFF_FFFF_FFFF) << 16) | u64::from(user_type)
}

/// Split a stream key into MAC and user type id.
pub fn split_stream_key(key: u64) -> (u64, u8) {
    (key >> 16, (key & 0xFF) as u8)
}

/// Human readable stream key, `00:11:22:33:44:55/temperature`.
pub fn describe_stream_key(key: u64) -> String {
    let (mac, user_type) = split_stream_key(key);
    match crate::UserType::from_u8(user_type) {
        Some(ut) => format!("{}/{}", format_mac(mac), ut.key()),
        None => format!("{}/{user_type}", format_mac(mac)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mac_forms() {
        let expected = 0x8CCE_4E50_AF57;
        assert_eq!(parse_mac("8CCE4E50AF57"), Ok(expected));
        assert_eq!(parse_mac("8c:ce:4e:50:af:57"), Ok(expected));
        assert_eq!(parse_mac(" 8C-CE-4E-50-AF-57 "), Ok(expected));
    }

    #[test]
    fn test_parse_mac_rejects() {
        assert!(matches!(parse_mac("8CCE4E50AF"), Err(MacError::Length(_))));
        assert!(matches!(parse_mac("8CCE4E50AFZZ"), Err(MacError::Hex(..))));
        assert!(matches!(parse_mac(""), Err(MacError::Length(_))));
    }

    #[test]
    fn test_format_mac() {
        assert_eq!(format_mac(0x0011_2233_4455), "00:11:22:33:44:55");
        assert_eq!(format_mac(0xD48A_FC3A_53DE), "D4:8A:FC:3A:53:DE");
    }

    #[test]
    fn test_stream_key_roundtrip() {
        let mac = mac_from_bytes(&[0xD4, 0x8A, 0xFC, 0x3A, 0x53, 0xDE]);
        let key = stream_key(mac, 50);
        assert_eq!(key, 0xD48A_FC3A_53DE_0032);
        assert_eq!(split_stream_key(key), (mac, 50));
    }

    #[test]
    fn test_describe_stream_key() {
        let mac = 0x0011_2233_4455;
        assert_eq!(
            describe_stream_key(stream_key(mac, crate::UserType::Temperature.id())),
            "00:11:22:33:44:55/temperature"
        );
        assert_eq!(describe_stream_key(stream_key(mac, 250)), "00:11:22:33:44:55/250");
    }
}
