use crate::error::{DlmsError, DlmsResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `A-B:C.D.E.F` with `*F` and `.F` both accepted for the last separator
static OBIS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,3})-(\d{1,3}):(\d{1,3})\.(\d{1,3})\.(\d{1,3})[.*](\d{1,3})$")
        .expect("static OBIS pattern")
});

/// OBIS (Object Identification System) code identifying a COSEM object
///
/// Six unsigned 8-bit components A through F, compared componentwise and
/// carried on the wire as exactly six bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObisCode {
    bytes: [u8; 6],
}

impl ObisCode {
    /// Create a new OBIS code from the individual A..F components
    pub fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        Self {
            bytes: [a, b, c, d, e, f],
        }
    }

    /// Create an OBIS code from its 6-byte wire form
    pub fn from_bytes(bytes: &[u8]) -> DlmsResult<Self> {
        if bytes.len() != 6 {
            return Err(DlmsError::InvalidData(format!(
                "OBIS code must be 6 bytes, got {}",
                bytes.len()
            )));
        }
        let mut b = [0u8; 6];
        b.copy_from_slice(bytes);
        Ok(Self { bytes: b })
    }

    /// Parse an OBIS code from text
    ///
    /// Accepted forms:
    /// - `1-0:1.8.0.255` (the reduced OBIS display form, `*255` also accepted)
    /// - `1.0.1.8.0.255` (six dot-separated values)
    pub fn from_string(s: &str) -> DlmsResult<Self> {
        if let Some(code) = Self::parse_dash_format(s)? {
            return Ok(code);
        }
        if let Some(code) = Self::parse_dot_format(s) {
            return Ok(code);
        }
        Err(DlmsError::InvalidData(format!(
            "Invalid OBIS code format: {}",
            s
        )))
    }

    fn parse_dash_format(s: &str) -> DlmsResult<Option<Self>> {
        let Some(caps) = OBIS_RE.captures(s) else {
            return Ok(None);
        };
        let mut bytes = [0u8; 6];
        for (i, slot) in bytes.iter_mut().enumerate() {
            let group = caps.get(i + 1).expect("six capture groups").as_str();
            *slot = group.parse::<u8>().map_err(|_| {
                DlmsError::InvalidData(format!("OBIS component out of range: {}", group))
            })?;
        }
        Ok(Some(Self { bytes }))
    }

    fn parse_dot_format(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 6 {
            return None;
        }
        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] = part.parse::<u8>().ok()?;
        }
        Some(Self { bytes })
    }

    /// Get the OBIS code as a byte array reference
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.bytes
    }

    /// Get the OBIS code as a copied byte array
    pub fn to_bytes(&self) -> [u8; 6] {
        self.bytes
    }

    pub fn a(&self) -> u8 {
        self.bytes[0]
    }

    pub fn b(&self) -> u8 {
        self.bytes[1]
    }

    pub fn c(&self) -> u8 {
        self.bytes[2]
    }

    pub fn d(&self) -> u8 {
        self.bytes[3]
    }

    pub fn e(&self) -> u8 {
        self.bytes[4]
    }

    pub fn f(&self) -> u8 {
        self.bytes[5]
    }
}

impl FromStr for ObisCode {
    type Err = DlmsError;

    fn from_str(s: &str) -> DlmsResult<Self> {
        Self::from_string(s)
    }
}

impl fmt::Display for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}:{}.{}.{}.{}",
            self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3], self.bytes[4], self.bytes[5]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obis_code_new() {
        let code = ObisCode::new(1, 0, 1, 8, 0, 255);
        assert_eq!(code.a(), 1);
        assert_eq!(code.c(), 1);
        assert_eq!(code.f(), 255);
    }

    #[test]
    fn test_obis_code_from_string_dash() {
        let code = ObisCode::from_string("1-0:1.8.0.255").unwrap();
        assert_eq!(code, ObisCode::new(1, 0, 1, 8, 0, 255));
        let code = ObisCode::from_string("0-0:40.0.0*255").unwrap();
        assert_eq!(code, ObisCode::new(0, 0, 40, 0, 0, 255));
    }

    #[test]
    fn test_obis_code_from_string_dot() {
        let code = ObisCode::from_string("1.0.1.8.0.255").unwrap();
        assert_eq!(code, ObisCode::new(1, 0, 1, 8, 0, 255));
    }

    #[test]
    fn test_obis_code_rejects_garbage() {
        assert!(ObisCode::from_string("1-0:1.8.0").is_err());
        assert!(ObisCode::from_string("1-0:1.8.0.256").is_err());
        assert!(ObisCode::from_string("not an obis").is_err());
    }

    #[test]
    fn test_obis_code_display_roundtrip() {
        let code = ObisCode::new(1, 0, 99, 1, 0, 255);
        assert_eq!(format!("{}", code), "1-0:99.1.0.255");
        assert_eq!(ObisCode::from_string(&format!("{}", code)).unwrap(), code);
    }

    #[test]
    fn test_obis_code_wire() {
        let code = ObisCode::from_bytes(&[1, 0, 1, 8, 0, 255]).unwrap();
        assert_eq!(code.to_bytes(), [1, 0, 1, 8, 0, 255]);
        assert!(ObisCode::from_bytes(&[1, 2, 3]).is_err());
    }
}
