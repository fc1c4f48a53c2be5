//! Short-name READ and WRITE codecs

use crate::pdu::{tags, SnItem};
use cosem_axdr::{AxdrDecoder, AxdrEncoder, LengthEncoding};
use cosem_core::error::{DlmsError, DlmsResult};
use cosem_core::{DataAccessResult, DataObject};

/// `05 <n> { 02 <addr> | 04 <addr> <desc> <value> } …`
pub fn encode_read_request(items: &[SnItem]) -> DlmsResult<Vec<u8>> {
    let mut out = vec![tags::READ_REQUEST];
    out.extend_from_slice(&LengthEncoding::for_value(items.len()).encode());
    for item in items {
        match &item.access {
            Some(selection) => {
                out.push(0x04);
                out.extend_from_slice(&item.address.to_be_bytes());
                out.push(selection.descriptor);
                let mut encoder = AxdrEncoder::new();
                encoder.encode_data_object(&selection.data)?;
                out.extend_from_slice(encoder.as_bytes());
            }
            None => {
                out.push(0x02);
                out.extend_from_slice(&item.address.to_be_bytes());
            }
        }
    }
    Ok(out)
}

/// `05 01 05 <block-no>` requesting the next data block
pub fn encode_read_block_next(block_number: u16) -> Vec<u8> {
    let mut out = vec![tags::READ_REQUEST, 0x01, 0x05];
    out.extend_from_slice(&block_number.to_be_bytes());
    out
}

/// One item of a READ response
#[derive(Debug, Clone, PartialEq)]
pub enum ReadResponseItem {
    /// A value; rejected items arrive as `DataObject::Error`
    Data(DataObject),
    /// One block of a long response
    Block {
        last: bool,
        block_number: u16,
        data: Vec<u8>,
    },
}

/// Decode `0C <n> { 00 <value> | 01 <result> | 02 <block> } …`
pub fn decode_read_response(apdu: &[u8]) -> DlmsResult<Vec<ReadResponseItem>> {
    let mut dec = AxdrDecoder::new(apdu);
    let tag = dec.read_byte()?;
    if tag != tags::READ_RESPONSE {
        return Err(DlmsError::Protocol(format!(
            "expected ReadResponse, got tag 0x{:02X}",
            tag
        )));
    }
    let count = dec.decode_length()?;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        match dec.read_byte()? {
            0x00 => items.push(ReadResponseItem::Data(dec.decode_data_object()?)),
            0x01 => items.push(ReadResponseItem::Data(DataObject::Error(
                DataAccessResult::from_u8(dec.read_byte()?),
            ))),
            0x02 => {
                let last = dec.read_byte()? != 0;
                let block = dec.read_bytes(2)?;
                let block_number = u16::from_be_bytes([block[0], block[1]]);
                let len = dec.decode_length()?;
                let data = dec.read_bytes(len)?.to_vec();
                items.push(ReadResponseItem::Block {
                    last,
                    block_number,
                    data,
                });
            }
            other => {
                return Err(DlmsError::Protocol(format!(
                    "unknown ReadResponse item variant 0x{:02X}",
                    other
                )))
            }
        }
    }
    Ok(items)
}

/// `06 <n> <items> <n> <values>`
pub fn encode_write_request(items: &[SnItem]) -> DlmsResult<Vec<u8>> {
    let mut out = vec![tags::WRITE_REQUEST];
    out.extend_from_slice(&LengthEncoding::for_value(items.len()).encode());
    for item in items {
        out.push(0x02);
        out.extend_from_slice(&item.address.to_be_bytes());
    }
    out.extend_from_slice(&LengthEncoding::for_value(items.len()).encode());
    for item in items {
        let value = item.write_data.as_ref().ok_or_else(|| {
            DlmsError::Encoding("WRITE item carries no value".to_string())
        })?;
        let mut encoder = AxdrEncoder::new();
        encoder.encode_data_object(value)?;
        out.extend_from_slice(encoder.as_bytes());
    }
    Ok(out)
}

/// Decode `0D <n> { 00 | 01 <result> } …`
pub fn decode_write_response(apdu: &[u8]) -> DlmsResult<Vec<DataAccessResult>> {
    let mut dec = AxdrDecoder::new(apdu);
    let tag = dec.read_byte()?;
    if tag != tags::WRITE_RESPONSE {
        return Err(DlmsError::Protocol(format!(
            "expected WriteResponse, got tag 0x{:02X}",
            tag
        )));
    }
    let count = dec.decode_length()?;
    let mut results = Vec::with_capacity(count);
    for _ in 0..count {
        match dec.read_byte()? {
            0x00 => results.push(DataAccessResult::Success),
            0x01 => results.push(DataAccessResult::from_u8(dec.read_byte()?)),
            other => {
                return Err(DlmsError::Protocol(format!(
                    "unknown WriteResponse item variant 0x{:02X}",
                    other
                )))
            }
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_request_plain_and_parameterized() {
        let items = vec![
            SnItem::new(0x3208),
            SnItem::new(0x3210).with_access(1, DataObject::Unsigned8(2)),
        ];
        let request = encode_read_request(&items).unwrap();
        assert_eq!(
            request,
            vec![0x05, 0x02, 0x02, 0x32, 0x08, 0x04, 0x32, 0x10, 0x01, 0x11, 0x02]
        );
    }

    #[test]
    fn test_read_response_mixed_items() {
        let response = [0x0Cu8, 0x03, 0x00, 0x12, 0x00, 0x2A, 0x01, 0x03, 0x00, 0x00];
        let items = decode_read_response(&response).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], ReadResponseItem::Data(DataObject::Unsigned16(42)));
        assert_eq!(
            items[1],
            ReadResponseItem::Data(DataObject::Error(DataAccessResult::ReadWriteDenied))
        );
        assert_eq!(items[2], ReadResponseItem::Data(DataObject::Null));
    }

    #[test]
    fn test_read_response_block() {
        let response = [0x0Cu8, 0x01, 0x02, 0x00, 0x00, 0x01, 0x03, 0xAA, 0xBB, 0xCC];
        let items = decode_read_response(&response).unwrap();
        assert_eq!(
            items[0],
            ReadResponseItem::Block {
                last: false,
                block_number: 1,
                data: vec![0xAA, 0xBB, 0xCC],
            }
        );
        assert_eq!(
            encode_read_block_next(2),
            vec![0x05, 0x01, 0x05, 0x00, 0x02]
        );
    }

    #[test]
    fn test_write_roundtrip() {
        let items = vec![
            SnItem::new(0x2E00).with_write_data(DataObject::Unsigned16(7)),
            SnItem::new(0x2E08).with_write_data(DataObject::Boolean(true)),
        ];
        let request = encode_write_request(&items).unwrap();
        assert_eq!(
            request,
            vec![
                0x06, 0x02, 0x02, 0x2E, 0x00, 0x02, 0x2E, 0x08, 0x02, 0x12, 0x00, 0x07, 0x03,
                0xFF
            ]
        );

        let response = [0x0Du8, 0x02, 0x00, 0x01, 0x03];
        assert_eq!(
            decode_write_response(&response).unwrap(),
            vec![DataAccessResult::Success, DataAccessResult::ReadWriteDenied]
        );
    }

    #[test]
    fn test_write_missing_value() {
        assert!(encode_write_request(&[SnItem::new(1)]).is_err());
    }
}
