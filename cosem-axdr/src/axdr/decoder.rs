//! A-XDR decoder for DLMS/COSEM data

use crate::axdr::types::{AxdrTag, LengthEncoding};
use cosem_core::datatypes::*;
use cosem_core::error::{DlmsError, DlmsResult};

/// A-XDR decoder walking a byte slice
pub struct AxdrDecoder<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> AxdrDecoder<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Decode one tagged DataObject
    pub fn decode_data_object(&mut self) -> DlmsResult<DataObject> {
        let tag = self.decode_tag()?;
        self.decode_body(tag)
    }

    fn decode_body(&mut self, tag: AxdrTag) -> DlmsResult<DataObject> {
        match tag {
            AxdrTag::Null => Ok(DataObject::Null),
            AxdrTag::DontCare => Ok(DataObject::DontCare),
            AxdrTag::Boolean => Ok(DataObject::Boolean(self.read_byte()? != 0x00)),
            AxdrTag::Integer => Ok(DataObject::Integer8(self.read_byte()? as i8)),
            AxdrTag::Long => Ok(DataObject::Integer16(i16::from_be_bytes(
                self.read_array::<2>()?,
            ))),
            AxdrTag::DoubleLong => Ok(DataObject::Integer32(i32::from_be_bytes(
                self.read_array::<4>()?,
            ))),
            AxdrTag::Long64 => Ok(DataObject::Integer64(i64::from_be_bytes(
                self.read_array::<8>()?,
            ))),
            AxdrTag::Unsigned => Ok(DataObject::Unsigned8(self.read_byte()?)),
            AxdrTag::LongUnsigned => Ok(DataObject::Unsigned16(u16::from_be_bytes(
                self.read_array::<2>()?,
            ))),
            AxdrTag::DoubleLongUnsigned => Ok(DataObject::Unsigned32(u32::from_be_bytes(
                self.read_array::<4>()?,
            ))),
            AxdrTag::Long64Unsigned => Ok(DataObject::Unsigned64(u64::from_be_bytes(
                self.read_array::<8>()?,
            ))),
            AxdrTag::FloatingPoint | AxdrTag::Float32 => Ok(DataObject::Float32(f32::from_bits(
                u32::from_be_bytes(self.read_array::<4>()?),
            ))),
            AxdrTag::Float64 => Ok(DataObject::Float64(f64::from_bits(u64::from_be_bytes(
                self.read_array::<8>()?,
            )))),
            AxdrTag::Enum => Ok(DataObject::Enumerate(self.read_byte()?)),
            AxdrTag::Bcd => Ok(DataObject::Bcd(Self::unpack_bcd(self.read_byte()?))),
            AxdrTag::OctetString => Ok(DataObject::OctetString(self.decode_octet_string()?)),
            AxdrTag::VisibleString => Ok(DataObject::VisibleString(self.decode_octet_string()?)),
            AxdrTag::Utf8String => {
                let bytes = self.decode_octet_string()?;
                let s = String::from_utf8(bytes)
                    .map_err(|e| DlmsError::Decoding(format!("invalid UTF-8 string: {}", e)))?;
                Ok(DataObject::Utf8String(s))
            }
            AxdrTag::BitString => Ok(DataObject::BitString(self.decode_bit_string()?)),
            AxdrTag::Array => {
                let len = self.decode_length()?;
                let mut array = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    array.push(self.decode_data_object()?);
                }
                DataObject::new_array(array)
            }
            AxdrTag::Structure => {
                let len = self.decode_length()?;
                let mut fields = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    fields.push(self.decode_data_object()?);
                }
                Ok(DataObject::Structure(fields))
            }
            AxdrTag::CompactArray => Ok(DataObject::CompactArray(self.decode_compact_array()?)),
            AxdrTag::Date => {
                let bytes = self.read_bytes(CosemDate::LENGTH)?;
                Ok(DataObject::Date(CosemDate::decode(bytes)?))
            }
            AxdrTag::Time => {
                let bytes = self.read_bytes(CosemTime::LENGTH)?;
                Ok(DataObject::Time(CosemTime::decode(bytes)?))
            }
            AxdrTag::DateTime => {
                let bytes = self.read_bytes(CosemDateTime::LENGTH)?;
                Ok(DataObject::DateTime(CosemDateTime::decode(bytes)?))
            }
        }
    }

    /// Decode a value whose tag is supplied out of band (compact-array item)
    pub fn decode_payload(&mut self, tag: u8) -> DlmsResult<DataObject> {
        let tag = AxdrTag::from_u8(tag)?;
        match tag {
            AxdrTag::Array | AxdrTag::Structure | AxdrTag::CompactArray => {
                Err(DlmsError::Decoding(format!(
                    "nested container tag 0x{:02X} not allowed in compact array contents",
                    tag.to_u8()
                )))
            }
            _ => self.decode_body(tag),
        }
    }

    fn decode_compact_array(&mut self) -> DlmsResult<CompactArray> {
        let content_tag = self.read_byte()?;
        let element_type = if content_tag == AxdrTag::Structure.to_u8() {
            let count = self.decode_length()?;
            let tags = self.read_bytes(count)?.to_vec();
            CompactArrayType::Structure(tags)
        } else {
            CompactArrayType::Simple(content_tag)
        };

        let contents_len = self.decode_length()?;
        let contents = self.read_bytes(contents_len)?;
        let mut inner = AxdrDecoder::new(contents);
        let mut items = Vec::new();
        while inner.remaining() > 0 {
            match &element_type {
                CompactArrayType::Simple(tag) => items.push(inner.decode_payload(*tag)?),
                CompactArrayType::Structure(tags) => {
                    let mut fields = Vec::with_capacity(tags.len());
                    for tag in tags {
                        fields.push(inner.decode_payload(*tag)?);
                    }
                    items.push(DataObject::Structure(fields));
                }
            }
        }
        CompactArray::new(element_type, items)
    }

    pub fn decode_tag(&mut self) -> DlmsResult<AxdrTag> {
        AxdrTag::from_u8(self.read_byte()?)
    }

    pub fn decode_length(&mut self) -> DlmsResult<usize> {
        let (enc, consumed) = LengthEncoding::decode(&self.buffer[self.position..])?;
        self.position += consumed;
        Ok(enc.value())
    }

    pub fn decode_octet_string(&mut self) -> DlmsResult<Vec<u8>> {
        let len = self.decode_length()?;
        Ok(self.read_bytes(len)?.to_vec())
    }

    fn decode_bit_string(&mut self) -> DlmsResult<BitString> {
        let num_bits = self.decode_length()?;
        let num_bytes = num_bits.div_ceil(8);
        let bytes = self.read_bytes(num_bytes)?.to_vec();
        BitString::new(bytes, num_bits)
    }

    fn unpack_bcd(byte: u8) -> i8 {
        let magnitude = (((byte >> 4) & 0x07) * 10 + (byte & 0x0F)) as i8;
        if byte & 0x80 != 0 {
            -magnitude
        } else {
            magnitude
        }
    }

    pub fn read_byte(&mut self) -> DlmsResult<u8> {
        let byte = *self
            .buffer
            .get(self.position)
            .ok_or_else(|| DlmsError::Decoding("not enough bytes".to_string()))?;
        self.position += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, len: usize) -> DlmsResult<&'a [u8]> {
        if self.position + len > self.buffer.len() {
            return Err(DlmsError::Decoding(format!(
                "not enough bytes: need {}, have {}",
                len,
                self.buffer.len() - self.position
            )));
        }
        let slice = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> DlmsResult<[u8; N]> {
        let slice = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }
}

/// Decode one DataObject from the head of a slice
pub fn decode(bytes: &[u8]) -> DlmsResult<DataObject> {
    AxdrDecoder::new(bytes).decode_data_object()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axdr::encoder::encode;

    fn roundtrip(obj: DataObject) {
        let bytes = encode(&obj).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(back, obj, "roundtrip through {:02X?}", bytes);
    }

    #[test]
    fn test_roundtrip_primitives() {
        roundtrip(DataObject::Null);
        roundtrip(DataObject::Boolean(true));
        roundtrip(DataObject::Integer8(-1));
        roundtrip(DataObject::Integer16(-12345));
        roundtrip(DataObject::Integer32(i32::MIN));
        roundtrip(DataObject::Integer64(i64::MAX));
        roundtrip(DataObject::Unsigned8(255));
        roundtrip(DataObject::Unsigned16(0xABCD));
        roundtrip(DataObject::Unsigned32(0xDEADBEEF));
        roundtrip(DataObject::Unsigned64(u64::MAX));
        roundtrip(DataObject::Float32(3.5));
        roundtrip(DataObject::Float64(-2.25e10));
        roundtrip(DataObject::Enumerate(30));
        roundtrip(DataObject::Bcd(-79));
        roundtrip(DataObject::Bcd(9));
        roundtrip(DataObject::DontCare);
    }

    #[test]
    fn test_roundtrip_strings() {
        roundtrip(DataObject::OctetString(vec![0u8; 300]));
        roundtrip(DataObject::VisibleString(b"hello meter".to_vec()));
        roundtrip(DataObject::Utf8String("héllo ☀".to_string()));
    }

    #[test]
    fn test_utf8_validity_enforced() {
        assert!(decode(&[0x0C, 0x02, 0xFF, 0xFE]).is_err());
    }

    #[test]
    fn test_roundtrip_bit_string_odd_lengths() {
        for bits in [1usize, 7, 8, 9, 130] {
            let bytes = vec![0xA5u8; bits.div_ceil(8)];
            roundtrip(DataObject::BitString(BitString::new(bytes, bits).unwrap()));
        }
    }

    #[test]
    fn test_roundtrip_nested_containers() {
        roundtrip(DataObject::Structure(vec![
            DataObject::new_array(vec![DataObject::Unsigned8(1), DataObject::Unsigned8(2)])
                .unwrap(),
            DataObject::Structure(vec![DataObject::Null, DataObject::Boolean(false)]),
            DataObject::OctetString(vec![1, 2, 3]),
        ]));
    }

    #[test]
    fn test_roundtrip_date_time_sentinels() {
        let dt = CosemDateTime::from_parts(
            CosemDate::new(0xFFFF, 0xFF, 0xFF).unwrap(),
            CosemTime::new(0xFF, 0xFF, 0xFF).unwrap(),
            DEVIATION_NOT_SPECIFIED,
            0,
        )
        .unwrap();
        roundtrip(DataObject::DateTime(dt));
        roundtrip(DataObject::Date(CosemDate::new(2024, 6, 1).unwrap()));
        roundtrip(DataObject::Time(CosemTime::new(23, 59, 59).unwrap()));
    }

    #[test]
    fn test_roundtrip_compact_array_structure() {
        let ca = CompactArray::new(
            CompactArrayType::Structure(vec![0x12, 0x09]),
            vec![
                DataObject::Structure(vec![
                    DataObject::Unsigned16(7),
                    DataObject::OctetString(vec![0xAB]),
                ]),
                DataObject::Structure(vec![
                    DataObject::Unsigned16(8),
                    DataObject::OctetString(vec![0xCD, 0xEF]),
                ]),
            ],
        )
        .unwrap();
        roundtrip(DataObject::CompactArray(ca));
    }

    #[test]
    fn test_legacy_floating_point_tag() {
        let bytes = [0x07, 0x40, 0x60, 0x00, 0x00];
        assert_eq!(decode(&bytes).unwrap(), DataObject::Float32(3.5));
    }

    #[test]
    fn test_truncated_input_fails() {
        assert!(decode(&[0x05, 0x12, 0x34]).is_err());
        assert!(decode(&[0x09, 0x05, 0x01]).is_err());
    }
}
