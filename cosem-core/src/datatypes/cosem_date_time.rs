//! COSEM DateTime type

use crate::datatypes::cosem_date::{CosemDate, NOT_SPECIFIED};
use crate::datatypes::cosem_time::CosemTime;
use crate::error::{DlmsError, DlmsResult};
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deviation value meaning "not specified" (-32768)
pub const DEVIATION_NOT_SPECIFIED: i16 = i16::MIN;

/// Clock status flags carried in the last byte of a DateTime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockStatus {
    InvalidValue = 0x01,
    DoubtfulValue = 0x02,
    DifferentClockBase = 0x04,
    InvalidClockStatus = 0x08,
    DaylightSavingActive = 0x80,
}

impl ClockStatus {
    /// Pack a set of flags into the wire byte
    pub fn to_byte(statuses: &[ClockStatus]) -> u8 {
        statuses.iter().fold(0u8, |byte, s| byte | *s as u8)
    }

    /// Unpack the wire byte into the set flags
    pub fn from_byte(byte: u8) -> Vec<ClockStatus> {
        [
            ClockStatus::InvalidValue,
            ClockStatus::DoubtfulValue,
            ClockStatus::DifferentClockBase,
            ClockStatus::InvalidClockStatus,
            ClockStatus::DaylightSavingActive,
        ]
        .into_iter()
        .filter(|s| byte & *s as u8 != 0)
        .collect()
    }
}

/// A COSEM DateTime: date, time, deviation from UTC and clock status
///
/// Deviation is in minutes from local time to UTC, -720..=720, or
/// `DEVIATION_NOT_SPECIFIED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosemDateTime {
    date: CosemDate,
    time: CosemTime,
    deviation: i16,
    clock_status: u8,
}

impl CosemDateTime {
    pub const LENGTH: usize = 12;

    pub fn new(
        year: u16,
        month: u8,
        day_of_month: u8,
        hour: u8,
        minute: u8,
        second: u8,
        deviation: i16,
        clock_status: &[ClockStatus],
    ) -> DlmsResult<Self> {
        Self::from_parts(
            CosemDate::new(year, month, day_of_month)?,
            CosemTime::new(hour, minute, second)?,
            deviation,
            ClockStatus::to_byte(clock_status),
        )
    }

    pub fn from_parts(
        date: CosemDate,
        time: CosemTime,
        deviation: i16,
        clock_status: u8,
    ) -> DlmsResult<Self> {
        Self::verify_deviation(deviation)?;
        Ok(Self {
            date,
            time,
            deviation,
            clock_status,
        })
    }

    /// Decode from the fixed 12-byte wire form
    pub fn decode(octet_string: &[u8]) -> DlmsResult<Self> {
        if octet_string.len() != Self::LENGTH {
            return Err(DlmsError::Decoding(format!(
                "date-time must be {} bytes, got {}",
                Self::LENGTH,
                octet_string.len()
            )));
        }
        Ok(Self {
            date: CosemDate::decode(&octet_string[0..5])?,
            time: CosemTime::decode(&octet_string[5..9])?,
            deviation: i16::from_be_bytes([octet_string[9], octet_string[10]]),
            clock_status: octet_string[11],
        })
    }

    /// Encode to the fixed 12-byte wire form
    pub fn encode(&self) -> [u8; Self::LENGTH] {
        let mut bytes = [0u8; Self::LENGTH];
        bytes[0..5].copy_from_slice(&self.date.encode());
        bytes[5..9].copy_from_slice(&self.time.encode());
        bytes[9..11].copy_from_slice(&self.deviation.to_be_bytes());
        bytes[11] = self.clock_status;
        bytes
    }

    pub fn date(&self) -> &CosemDate {
        &self.date
    }

    pub fn time(&self) -> &CosemTime {
        &self.time
    }

    pub fn deviation(&self) -> i16 {
        self.deviation
    }

    pub fn clock_status(&self) -> u8 {
        self.clock_status
    }

    /// Convert to wall time
    ///
    /// Fails with `InvalidData` when year, month, day, hour, minute or the
    /// deviation carry an unspecified sentinel. An unspecified second counts
    /// as zero.
    pub fn to_date_time(&self) -> DlmsResult<DateTime<FixedOffset>> {
        if !self.date.is_fully_specified() || !self.time.is_fully_specified() {
            return Err(DlmsError::InvalidData(
                "date-time has unspecified fields".to_string(),
            ));
        }
        if self.deviation == DEVIATION_NOT_SPECIFIED {
            return Err(DlmsError::InvalidData(
                "date-time deviation not specified".to_string(),
            ));
        }
        let second = if self.time.second() == NOT_SPECIFIED {
            0
        } else {
            self.time.second()
        };
        // Deviation is minutes from local time to UTC, so the UTC offset is
        // its negation.
        let offset = FixedOffset::west_opt(self.deviation as i32 * 60).ok_or_else(|| {
            DlmsError::InvalidData(format!("deviation out of range: {}", self.deviation))
        })?;
        let naive = NaiveDate::from_ymd_opt(
            self.date.year() as i32,
            self.date.month() as u32,
            self.date.day_of_month() as u32,
        )
        .and_then(|d| {
            d.and_hms_opt(
                self.time.hour() as u32,
                self.time.minute() as u32,
                second as u32,
            )
        })
        .ok_or_else(|| DlmsError::InvalidData(format!("invalid calendar value: {}", self)))?;
        offset
            .from_local_datetime(&naive)
            .single()
            .ok_or_else(|| DlmsError::InvalidData(format!("ambiguous wall time: {}", self)))
    }

    fn verify_deviation(deviation: i16) -> DlmsResult<()> {
        if deviation == DEVIATION_NOT_SPECIFIED || (-720..=720).contains(&deviation) {
            Ok(())
        } else {
            Err(DlmsError::InvalidData(format!(
                "deviation is out of range [-720, 720], got {}",
                deviation
            )))
        }
    }
}

impl fmt::Display for CosemDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date, self.time)?;
        if self.deviation != DEVIATION_NOT_SPECIFIED {
            write!(f, " (dev {} min)", self.deviation)?;
        }
        Ok(())
    }
}
