//! A-XDR encoder for DLMS/COSEM data

use crate::axdr::types::{AxdrTag, LengthEncoding};
use cosem_core::datatypes::*;
use cosem_core::error::{DlmsError, DlmsResult};

/// A-XDR encoder writing typed values into a growable buffer
pub struct AxdrEncoder {
    buffer: Vec<u8>,
}

impl AxdrEncoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encode a tagged DataObject
    pub fn encode_data_object(&mut self, obj: &DataObject) -> DlmsResult<()> {
        match obj {
            DataObject::Null => self.encode_tag(AxdrTag::Null),
            DataObject::DontCare => self.encode_tag(AxdrTag::DontCare),
            DataObject::Boolean(b) => {
                self.encode_tag(AxdrTag::Boolean);
                self.buffer.push(if *b { 0xFF } else { 0x00 });
            }
            DataObject::Integer8(i) => {
                self.encode_tag(AxdrTag::Integer);
                self.buffer.push(*i as u8);
            }
            DataObject::Integer16(i) => {
                self.encode_tag(AxdrTag::Long);
                self.buffer.extend_from_slice(&i.to_be_bytes());
            }
            DataObject::Integer32(i) => {
                self.encode_tag(AxdrTag::DoubleLong);
                self.buffer.extend_from_slice(&i.to_be_bytes());
            }
            DataObject::Integer64(i) => {
                self.encode_tag(AxdrTag::Long64);
                self.buffer.extend_from_slice(&i.to_be_bytes());
            }
            DataObject::Unsigned8(u) => {
                self.encode_tag(AxdrTag::Unsigned);
                self.buffer.push(*u);
            }
            DataObject::Unsigned16(u) => {
                self.encode_tag(AxdrTag::LongUnsigned);
                self.buffer.extend_from_slice(&u.to_be_bytes());
            }
            DataObject::Unsigned32(u) => {
                self.encode_tag(AxdrTag::DoubleLongUnsigned);
                self.buffer.extend_from_slice(&u.to_be_bytes());
            }
            DataObject::Unsigned64(u) => {
                self.encode_tag(AxdrTag::Long64Unsigned);
                self.buffer.extend_from_slice(&u.to_be_bytes());
            }
            DataObject::Float32(f) => {
                self.encode_tag(AxdrTag::Float32);
                self.buffer.extend_from_slice(&f.to_bits().to_be_bytes());
            }
            DataObject::Float64(f) => {
                self.encode_tag(AxdrTag::Float64);
                self.buffer.extend_from_slice(&f.to_bits().to_be_bytes());
            }
            DataObject::Enumerate(e) => {
                self.encode_tag(AxdrTag::Enum);
                self.buffer.push(*e);
            }
            DataObject::Bcd(b) => {
                self.encode_tag(AxdrTag::Bcd);
                self.buffer.push(Self::pack_bcd(*b)?);
            }
            DataObject::OctetString(s) => {
                self.encode_tag(AxdrTag::OctetString);
                self.encode_length(s.len());
                self.buffer.extend_from_slice(s);
            }
            DataObject::VisibleString(s) => {
                self.encode_tag(AxdrTag::VisibleString);
                self.encode_length(s.len());
                self.buffer.extend_from_slice(s);
            }
            DataObject::Utf8String(s) => {
                self.encode_tag(AxdrTag::Utf8String);
                self.encode_length(s.len());
                self.buffer.extend_from_slice(s.as_bytes());
            }
            DataObject::BitString(bs) => {
                self.encode_tag(AxdrTag::BitString);
                self.encode_length(bs.num_bits());
                self.buffer.extend_from_slice(bs.as_bytes());
            }
            DataObject::Array(arr) => {
                self.encode_tag(AxdrTag::Array);
                self.encode_length(arr.len());
                for obj in arr {
                    self.encode_data_object(obj)?;
                }
            }
            DataObject::Structure(s) => {
                self.encode_tag(AxdrTag::Structure);
                self.encode_length(s.len());
                for obj in s {
                    self.encode_data_object(obj)?;
                }
            }
            DataObject::CompactArray(ca) => {
                self.encode_tag(AxdrTag::CompactArray);
                self.encode_compact_array(ca)?;
            }
            DataObject::Date(d) => {
                self.encode_tag(AxdrTag::Date);
                self.buffer.extend_from_slice(&d.encode());
            }
            DataObject::Time(t) => {
                self.encode_tag(AxdrTag::Time);
                self.buffer.extend_from_slice(&t.encode());
            }
            DataObject::DateTime(dt) => {
                self.encode_tag(AxdrTag::DateTime);
                self.buffer.extend_from_slice(&dt.encode());
            }
            DataObject::Error(_) => {
                return Err(DlmsError::Encoding(
                    "synthetic error values cannot be encoded".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Encode a value without its leading tag, as compact-array items are laid out
    pub fn encode_payload(&mut self, obj: &DataObject) -> DlmsResult<()> {
        let mut tagged = AxdrEncoder::new();
        tagged.encode_data_object(obj)?;
        // Containers keep their length prefix; only the tag byte is stripped.
        self.buffer.extend_from_slice(&tagged.buffer[1..]);
        Ok(())
    }

    fn encode_compact_array(&mut self, ca: &CompactArray) -> DlmsResult<()> {
        match ca.element_type() {
            CompactArrayType::Simple(tag) => {
                if matches!(
                    AxdrTag::from_u8(*tag)?,
                    AxdrTag::Array | AxdrTag::Structure | AxdrTag::CompactArray
                ) {
                    return Err(DlmsError::Encoding(format!(
                        "container tag 0x{:02X} not allowed in compact array contents",
                        tag
                    )));
                }
                self.buffer.push(*tag)
            }
            CompactArrayType::Structure(tags) => {
                for tag in tags {
                    if matches!(
                        AxdrTag::from_u8(*tag)?,
                        AxdrTag::Array | AxdrTag::Structure | AxdrTag::CompactArray
                    ) {
                        return Err(DlmsError::Encoding(format!(
                            "container tag 0x{:02X} not allowed in compact array contents",
                            tag
                        )));
                    }
                }
                self.buffer.push(AxdrTag::Structure.to_u8());
                self.encode_length(tags.len());
                self.buffer.extend_from_slice(tags);
            }
        }

        let mut contents = AxdrEncoder::new();
        for item in ca.items() {
            match (ca.element_type(), item) {
                (CompactArrayType::Structure(tags), DataObject::Structure(fields)) => {
                    if tags.len() != fields.len() {
                        return Err(DlmsError::Encoding(format!(
                            "compact array structure item has {} fields, descriptor lists {}",
                            fields.len(),
                            tags.len()
                        )));
                    }
                    for (tag, field) in tags.iter().zip(fields) {
                        contents.check_item_tag(*tag, field)?;
                        contents.encode_payload(field)?;
                    }
                }
                (CompactArrayType::Structure(_), other) => {
                    return Err(DlmsError::Encoding(format!(
                        "compact array item must be a structure, got {:?}",
                        other.get_type()
                    )));
                }
                (CompactArrayType::Simple(tag), item) => {
                    contents.check_item_tag(*tag, item)?;
                    contents.encode_payload(item)?;
                }
            }
        }

        self.encode_length(contents.buffer.len());
        self.buffer.extend_from_slice(&contents.buffer);
        Ok(())
    }

    fn check_item_tag(&self, expected: u8, item: &DataObject) -> DlmsResult<()> {
        let mut probe = AxdrEncoder::new();
        probe.encode_data_object(item)?;
        if probe.buffer[0] != expected {
            return Err(DlmsError::Encoding(format!(
                "compact array item tag 0x{:02X} does not match descriptor tag 0x{:02X}",
                probe.buffer[0], expected
            )));
        }
        Ok(())
    }

    pub fn encode_tag(&mut self, tag: AxdrTag) {
        self.buffer.push(tag.to_u8());
    }

    pub fn encode_length(&mut self, len: usize) {
        self.buffer
            .extend_from_slice(&LengthEncoding::for_value(len).encode());
    }

    pub fn encode_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    fn pack_bcd(value: i8) -> DlmsResult<u8> {
        let magnitude = value.unsigned_abs();
        if magnitude > 79 {
            return Err(DlmsError::Encoding(format!(
                "BCD magnitude out of range [0, 79]: {}",
                value
            )));
        }
        let sign = if value < 0 { 0x80 } else { 0x00 };
        Ok(sign | ((magnitude / 10) & 0x07) << 4 | (magnitude % 10))
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for AxdrEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode one DataObject into a fresh byte vector
pub fn encode(obj: &DataObject) -> DlmsResult<Vec<u8>> {
    let mut encoder = AxdrEncoder::new();
    encoder.encode_data_object(obj)?;
    Ok(encoder.into_bytes())
}
