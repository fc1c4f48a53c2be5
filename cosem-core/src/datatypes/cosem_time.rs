//! COSEM Time type

use crate::datatypes::cosem_date::NOT_SPECIFIED;
use crate::error::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A COSEM Time: hour, minute, second, hundredths of a second
///
/// Each field supports the 0xff "not specified" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosemTime {
    hour: u8,
    minute: u8,
    second: u8,
    hundredths: u8,
}

impl CosemTime {
    pub const LENGTH: usize = 4;

    /// Constructs a COSEM Time with unspecified hundredths
    pub fn new(hour: u8, minute: u8, second: u8) -> DlmsResult<Self> {
        Self::new_with_hundredths(hour, minute, second, NOT_SPECIFIED)
    }

    pub fn new_with_hundredths(
        hour: u8,
        minute: u8,
        second: u8,
        hundredths: u8,
    ) -> DlmsResult<Self> {
        Self::verify(hour, "hour", 23)?;
        Self::verify(minute, "minute", 59)?;
        Self::verify(second, "second", 59)?;
        Self::verify(hundredths, "hundredths", 99)?;
        Ok(Self {
            hour,
            minute,
            second,
            hundredths,
        })
    }

    /// Decode from the fixed 4-byte wire form
    pub fn decode(octet_string: &[u8]) -> DlmsResult<Self> {
        if octet_string.len() != Self::LENGTH {
            return Err(DlmsError::Decoding(format!(
                "time must be {} bytes, got {}",
                Self::LENGTH,
                octet_string.len()
            )));
        }
        Ok(Self {
            hour: octet_string[0],
            minute: octet_string[1],
            second: octet_string[2],
            hundredths: octet_string[3],
        })
    }

    /// Encode to the fixed 4-byte wire form
    pub fn encode(&self) -> [u8; Self::LENGTH] {
        [self.hour, self.minute, self.second, self.hundredths]
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn second(&self) -> u8 {
        self.second
    }

    pub fn hundredths(&self) -> u8 {
        self.hundredths
    }

    /// True when hour and minute carry concrete values
    pub fn is_fully_specified(&self) -> bool {
        self.hour != NOT_SPECIFIED && self.minute != NOT_SPECIFIED
    }

    fn verify(value: u8, name: &str, upper_bound: u8) -> DlmsResult<()> {
        if value > upper_bound && value != NOT_SPECIFIED {
            Err(DlmsError::InvalidData(format!(
                "{} is out of range [0, {}], got {}",
                name, upper_bound, value
            )))
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for CosemTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosem_time_new() {
        let time = CosemTime::new(14, 30, 45).unwrap();
        assert_eq!(time.hour(), 14);
        assert_eq!(time.hundredths(), NOT_SPECIFIED);
        assert!(time.is_fully_specified());
    }

    #[test]
    fn test_cosem_time_wire_roundtrip() {
        let time = CosemTime::new(14, 30, 45).unwrap();
        let bytes = time.encode();
        assert_eq!(bytes, [0x0E, 0x1E, 0x2D, 0xFF]);
        assert_eq!(CosemTime::decode(&bytes).unwrap(), time);
    }

    #[test]
    fn test_cosem_time_invalid() {
        assert!(CosemTime::new(24, 0, 0).is_err());
        assert!(CosemTime::new(0, 60, 0).is_err());
        assert!(CosemTime::new_with_hundredths(0, 0, 0, 100).is_err());
    }
}
