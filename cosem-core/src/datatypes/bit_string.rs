//! Bit string type for DLMS/COSEM data

use crate::error::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Arbitrary string of bits, MSB-first within each byte
///
/// A bit string value can have any length including zero; the bit length is
/// carried separately from the backing bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitString {
    bytes: Vec<u8>,
    num_bits: usize,
}

impl BitString {
    /// Construct a bit string from packed bytes and an explicit bit count
    pub fn new(bytes: Vec<u8>, num_bits: usize) -> DlmsResult<Self> {
        if num_bits > bytes.len() * 8 {
            return Err(DlmsError::InvalidData(format!(
                "bit string too short to hold all bits: need {} bytes for {} bits",
                num_bits.div_ceil(8),
                num_bits
            )));
        }
        Ok(Self { bytes, num_bits })
    }

    /// Construct a bit string from individual bit values, MSB-first
    pub fn from_bits(bits: &[bool]) -> Self {
        let mut bytes = vec![0u8; bits.len().div_ceil(8)];
        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                bytes[i / 8] |= 0x80 >> (i % 8);
            }
        }
        Self {
            bytes,
            num_bits: bits.len(),
        }
    }

    /// The packed bytes backing this bit string
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The number of valid bits
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// Read one bit; `None` when the index is past the end
    pub fn bit(&self, index: usize) -> Option<bool> {
        if index >= self.num_bits {
            return None;
        }
        Some(self.bytes[index / 8] & (0x80 >> (index % 8)) != 0)
    }
}

impl fmt::Display for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.num_bits {
            write!(f, "{}", if self.bit(i) == Some(true) { '1' } else { '0' })?;
        }
        Ok(())
    }
}
