//! A-XDR tag values and length coding

use cosem_core::error::{DlmsError, DlmsResult};

/// A-XDR tag values for the DLMS data types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxdrTag {
    Null = 0x00,
    Array = 0x01,
    Structure = 0x02,
    Boolean = 0x03,
    BitString = 0x04,
    DoubleLong = 0x05,
    DoubleLongUnsigned = 0x06,
    /// Legacy floating-point; same payload as Float32
    FloatingPoint = 0x07,
    OctetString = 0x09,
    VisibleString = 0x0A,
    Utf8String = 0x0C,
    Bcd = 0x0D,
    Integer = 0x0F,
    Long = 0x10,
    Unsigned = 0x11,
    LongUnsigned = 0x12,
    CompactArray = 0x13,
    Long64 = 0x14,
    Long64Unsigned = 0x15,
    Enum = 0x16,
    Float32 = 0x17,
    Float64 = 0x18,
    DateTime = 0x19,
    Date = 0x1A,
    Time = 0x1B,
    DontCare = 0xFF,
}

impl AxdrTag {
    /// Get tag from the wire byte
    pub fn from_u8(value: u8) -> DlmsResult<Self> {
        match value {
            0x00 => Ok(AxdrTag::Null),
            0x01 => Ok(AxdrTag::Array),
            0x02 => Ok(AxdrTag::Structure),
            0x03 => Ok(AxdrTag::Boolean),
            0x04 => Ok(AxdrTag::BitString),
            0x05 => Ok(AxdrTag::DoubleLong),
            0x06 => Ok(AxdrTag::DoubleLongUnsigned),
            0x07 => Ok(AxdrTag::FloatingPoint),
            0x09 => Ok(AxdrTag::OctetString),
            0x0A => Ok(AxdrTag::VisibleString),
            0x0C => Ok(AxdrTag::Utf8String),
            0x0D => Ok(AxdrTag::Bcd),
            0x0F => Ok(AxdrTag::Integer),
            0x10 => Ok(AxdrTag::Long),
            0x11 => Ok(AxdrTag::Unsigned),
            0x12 => Ok(AxdrTag::LongUnsigned),
            0x13 => Ok(AxdrTag::CompactArray),
            0x14 => Ok(AxdrTag::Long64),
            0x15 => Ok(AxdrTag::Long64Unsigned),
            0x16 => Ok(AxdrTag::Enum),
            0x17 => Ok(AxdrTag::Float32),
            0x18 => Ok(AxdrTag::Float64),
            0x19 => Ok(AxdrTag::DateTime),
            0x1A => Ok(AxdrTag::Date),
            0x1B => Ok(AxdrTag::Time),
            0xFF => Ok(AxdrTag::DontCare),
            _ => Err(DlmsError::Decoding(format!(
                "unknown A-XDR tag: 0x{:02X}",
                value
            ))),
        }
    }

    /// Convert tag to the wire byte
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// BER-style length coding used throughout the xDLMS layer
///
/// Short form is one byte for lengths below 128; long form is `0x80 | n`
/// followed by n big-endian bytes with n in 1..=4. The indefinite form
/// (0x80 alone) is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthEncoding {
    Short(u8),
    Long(usize),
}

impl LengthEncoding {
    /// Pick the canonical form for a value
    pub fn for_value(len: usize) -> Self {
        if len < 128 {
            LengthEncoding::Short(len as u8)
        } else {
            LengthEncoding::Long(len)
        }
    }

    /// The plain length value
    pub fn value(&self) -> usize {
        match self {
            LengthEncoding::Short(l) => *l as usize,
            LengthEncoding::Long(l) => *l,
        }
    }

    /// Encode length to bytes
    pub fn encode(&self) -> Vec<u8> {
        match self {
            LengthEncoding::Short(len) => vec![*len],
            LengthEncoding::Long(len) => {
                let mut bytes = Vec::new();
                let mut len = *len;
                while len > 0 {
                    bytes.push((len & 0xFF) as u8);
                    len >>= 8;
                }
                if bytes.is_empty() {
                    bytes.push(0);
                }
                bytes.reverse();
                let mut result = Vec::with_capacity(1 + bytes.len());
                result.push(0x80 | bytes.len() as u8);
                result.extend_from_slice(&bytes);
                result
            }
        }
    }

    /// Decode a length; returns the encoding and the bytes consumed
    pub fn decode(bytes: &[u8]) -> DlmsResult<(Self, usize)> {
        let first = *bytes
            .first()
            .ok_or_else(|| DlmsError::Decoding("not enough bytes for length".to_string()))?;
        if first & 0x80 == 0 {
            return Ok((LengthEncoding::Short(first), 1));
        }

        let length_of_length = (first & 0x7F) as usize;
        if length_of_length == 0 {
            return Err(DlmsError::Decoding(
                "indefinite length form is not supported".to_string(),
            ));
        }
        if length_of_length > 4 {
            return Err(DlmsError::Decoding(format!(
                "invalid length-of-length: {}",
                length_of_length
            )));
        }
        if bytes.len() < 1 + length_of_length {
            return Err(DlmsError::Decoding(
                "not enough bytes for long length".to_string(),
            ));
        }

        let mut len = 0usize;
        for &byte in &bytes[1..1 + length_of_length] {
            len = (len << 8) | byte as usize;
        }
        Ok((LengthEncoding::Long(len), 1 + length_of_length))
    }
}
