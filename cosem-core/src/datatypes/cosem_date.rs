//! COSEM Date type

use crate::error::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker for a field the device left unspecified
pub const NOT_SPECIFIED: u8 = 0xff;
/// Year value meaning "not specified"
pub const YEAR_NOT_SPECIFIED: u16 = 0xffff;
/// Day-of-month marker: last day of the month
pub const LAST_DAY_OF_MONTH: u8 = 0xfe;
/// Day-of-month marker: second to last day of the month
pub const SECOND_LAST_DAY_OF_MONTH: u8 = 0xfd;
/// Month marker: daylight savings end
pub const DAYLIGHT_SAVINGS_END: u8 = 0xfd;
/// Month marker: daylight savings begin
pub const DAYLIGHT_SAVINGS_BEGIN: u8 = 0xfe;

/// A COSEM Date: year, month, day of month, day of week
///
/// Every field supports the protocol's "not specified" sentinel; the month
/// and day fields additionally support the daylight-savings / last-day
/// markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosemDate {
    year: u16,
    month: u8,
    day_of_month: u8,
    day_of_week: u8,
}

impl CosemDate {
    pub const LENGTH: usize = 5;

    /// Constructs a COSEM Date with an unspecified day of week
    pub fn new(year: u16, month: u8, day_of_month: u8) -> DlmsResult<Self> {
        Self::new_with_day_of_week(year, month, day_of_month, NOT_SPECIFIED)
    }

    /// Constructs a COSEM Date
    ///
    /// `day_of_week` runs 1 (Monday) to 7 (Sunday), or 0xff if not specified.
    pub fn new_with_day_of_week(
        year: u16,
        month: u8,
        day_of_month: u8,
        day_of_week: u8,
    ) -> DlmsResult<Self> {
        Self::verify_month(month)?;
        Self::verify_day_of_month(day_of_month)?;
        Self::verify_day_of_week(day_of_week)?;
        Ok(Self {
            year,
            month,
            day_of_month,
            day_of_week,
        })
    }

    /// Decode from the fixed 5-byte wire form
    pub fn decode(octet_string: &[u8]) -> DlmsResult<Self> {
        if octet_string.len() != Self::LENGTH {
            return Err(DlmsError::Decoding(format!(
                "date must be {} bytes, got {}",
                Self::LENGTH,
                octet_string.len()
            )));
        }
        Ok(Self {
            year: u16::from_be_bytes([octet_string[0], octet_string[1]]),
            month: octet_string[2],
            day_of_month: octet_string[3],
            day_of_week: octet_string[4],
        })
    }

    /// Encode to the fixed 5-byte wire form
    pub fn encode(&self) -> [u8; Self::LENGTH] {
        let year = self.year.to_be_bytes();
        [
            year[0],
            year[1],
            self.month,
            self.day_of_month,
            self.day_of_week,
        ]
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    pub fn day_of_month(&self) -> u8 {
        self.day_of_month
    }

    pub fn day_of_week(&self) -> u8 {
        self.day_of_week
    }

    /// True when year, month and day all carry concrete calendar values
    pub fn is_fully_specified(&self) -> bool {
        self.year != YEAR_NOT_SPECIFIED
            && (1..=12).contains(&self.month)
            && (1..=31).contains(&self.day_of_month)
    }

    fn verify_month(month: u8) -> DlmsResult<()> {
        let is_marker = month == DAYLIGHT_SAVINGS_END
            || month == DAYLIGHT_SAVINGS_BEGIN
            || month == NOT_SPECIFIED;
        if is_marker || (1..=12).contains(&month) {
            Ok(())
        } else {
            Err(DlmsError::InvalidData(format!(
                "month is out of range, got {}",
                month
            )))
        }
    }

    fn verify_day_of_month(day: u8) -> DlmsResult<()> {
        let is_marker =
            day == SECOND_LAST_DAY_OF_MONTH || day == LAST_DAY_OF_MONTH || day == NOT_SPECIFIED;
        if is_marker || (1..=31).contains(&day) {
            Ok(())
        } else {
            Err(DlmsError::InvalidData(format!(
                "day of month is out of range, got {}",
                day
            )))
        }
    }

    fn verify_day_of_week(day: u8) -> DlmsResult<()> {
        if day == NOT_SPECIFIED || (1..=7).contains(&day) {
            Ok(())
        } else {
            Err(DlmsError::InvalidData(format!(
                "day of week is out of range [1, 7], got {}",
                day
            )))
        }
    }
}

impl fmt::Display for CosemDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}",
            self.year, self.month, self.day_of_month
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosem_date_new() {
        let date = CosemDate::new(2024, 1, 15).unwrap();
        assert_eq!(date.year(), 2024);
        assert_eq!(date.month(), 1);
        assert_eq!(date.day_of_month(), 15);
        assert_eq!(date.day_of_week(), NOT_SPECIFIED);
        assert!(date.is_fully_specified());
    }

    #[test]
    fn test_cosem_date_wire_roundtrip() {
        let date = CosemDate::new(2024, 1, 15).unwrap();
        let bytes = date.encode();
        assert_eq!(bytes, [0x07, 0xE8, 0x01, 0x0F, 0xFF]);
        assert_eq!(CosemDate::decode(&bytes).unwrap(), date);
    }

    #[test]
    fn test_cosem_date_markers() {
        let date = CosemDate::new(YEAR_NOT_SPECIFIED, NOT_SPECIFIED, LAST_DAY_OF_MONTH).unwrap();
        assert!(!date.is_fully_specified());
    }

    #[test]
    fn test_cosem_date_invalid() {
        assert!(CosemDate::new(2024, 13, 1).is_err());
        assert!(CosemDate::new(2024, 1, 32).is_err());
        assert!(CosemDate::new_with_day_of_week(2024, 1, 1, 8).is_err());
    }
}
