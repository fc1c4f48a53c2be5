//! HDLC frame check sequence (FCS-16)

use cosem_core::error::{DlmsError, DlmsResult};

const INITIAL_FCS: u16 = 0xFFFF;
/// Residue left by running the checksum over data plus its own FCS
const GOOD_FCS: u16 = 0xF0B8;
/// Bit-reversed 0x1021 (x^16 + x^12 + x^5 + 1)
const KEY: u16 = 0x8408;

static FCS_TABLE: once_cell::sync::Lazy<[u16; 256]> = once_cell::sync::Lazy::new(|| {
    let mut table = [0u16; 256];
    for (b, entry) in table.iter_mut().enumerate() {
        let mut v = b as u16;
        for _ in 0..8 {
            v = if v & 1 == 1 { (v >> 1) ^ KEY } else { v >> 1 };
        }
        *entry = v;
    }
    table
});

/// Running FCS-16 calculator used for both HCS and FCS
#[derive(Debug, Clone)]
pub struct FcsCalc {
    fcs_value: u16,
}

impl FcsCalc {
    pub fn new() -> Self {
        Self {
            fcs_value: INITIAL_FCS,
        }
    }

    pub fn reset(&mut self) {
        self.fcs_value = INITIAL_FCS;
    }

    pub fn update(&mut self, data: u8) {
        self.fcs_value =
            (self.fcs_value >> 8) ^ FCS_TABLE[((self.fcs_value ^ data as u16) & 0xFF) as usize];
    }

    pub fn update_bytes(&mut self, data: &[u8]) {
        for &byte in data {
            self.update(byte);
        }
    }

    /// Checksum bytes to append, little-endian
    pub fn value_bytes(&self) -> [u8; 2] {
        let inv = self.fcs_value ^ 0xFFFF;
        [(inv & 0xFF) as u8, (inv >> 8) as u8]
    }

    /// Validate after also feeding the received checksum bytes
    pub fn validate(&self, what: &str) -> DlmsResult<()> {
        if self.fcs_value != GOOD_FCS {
            Err(DlmsError::FrameInvalid(format!(
                "{} check failed: residue 0x{:04X}",
                what, self.fcs_value
            )))
        } else {
            Ok(())
        }
    }
}

impl Default for FcsCalc {
    fn default() -> Self {
        Self::new()
    }
}
