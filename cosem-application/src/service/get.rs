//! GET request encoding and response parsing (logical name)

use crate::pdu::{tags, CosemAttribute, InvokeIdAndPriority};
use cosem_axdr::{AxdrDecoder, LengthEncoding};
use cosem_core::error::{DlmsError, DlmsResult};
use cosem_core::{DataAccessResult, DataObject};

/// `C0 01 (invoke) <class> <obis> <attr> <access?>`
pub fn encode_get_normal(
    invoke: InvokeIdAndPriority,
    item: &CosemAttribute,
) -> DlmsResult<Vec<u8>> {
    let mut out = vec![tags::GET_REQUEST, 0x01, invoke.byte()];
    item.encode_descriptor(&mut out)?;
    Ok(out)
}

/// `C0 03 (invoke) <n> <items…>`
pub fn encode_get_with_list(
    invoke: InvokeIdAndPriority,
    items: &[CosemAttribute],
) -> DlmsResult<Vec<u8>> {
    let mut out = vec![tags::GET_REQUEST, 0x03, invoke.byte()];
    out.extend_from_slice(&LengthEncoding::for_value(items.len()).encode());
    for item in items {
        item.encode_descriptor(&mut out)?;
    }
    Ok(out)
}

/// `C0 02 (invoke) <block-no>` requesting the next data block
pub fn encode_get_next(invoke: InvokeIdAndPriority, block_number: u32) -> Vec<u8> {
    let mut out = vec![tags::GET_REQUEST, 0x02, invoke.byte()];
    out.extend_from_slice(&block_number.to_be_bytes());
    out
}

/// Parsed GET response body
#[derive(Debug, Clone, PartialEq)]
pub enum GetResponseBody {
    /// One value; a rejected item arrives as `DataObject::Error`
    Normal(DataObject),
    WithList(Vec<DataObject>),
    /// One block of a long response; `data` is the raw payload slice
    WithDataBlock {
        last: bool,
        block_number: u32,
        data: Vec<u8>,
    },
}

/// Decode a GET response, validating the echoed invoke id
pub fn decode_get_response(
    apdu: &[u8],
    invoke: InvokeIdAndPriority,
) -> DlmsResult<GetResponseBody> {
    let mut dec = AxdrDecoder::new(apdu);
    let tag = dec.read_byte()?;
    if tag != tags::GET_RESPONSE {
        return Err(DlmsError::Protocol(format!(
            "expected GetResponse, got tag 0x{:02X}",
            tag
        )));
    }
    let subtag = dec.read_byte()?;
    invoke.validate_response(dec.read_byte()?)?;

    match subtag {
        0x01 => Ok(GetResponseBody::Normal(decode_get_data_result(&mut dec)?)),
        0x03 => {
            let count = dec.decode_length()?;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(decode_get_data_result(&mut dec)?);
            }
            Ok(GetResponseBody::WithList(values))
        }
        0x02 => {
            let last = dec.read_byte()? != 0;
            let block_bytes = dec.read_bytes(4)?;
            let block_number = u32::from_be_bytes([
                block_bytes[0],
                block_bytes[1],
                block_bytes[2],
                block_bytes[3],
            ]);
            let err = dec.read_byte()?;
            if err != 0 {
                let kind = DataAccessResult::from_u8(dec.read_byte()?);
                return Err(DlmsError::Protocol(format!(
                    "block transfer aborted: {}",
                    kind
                )));
            }
            let len = dec.decode_length()?;
            let data = dec.read_bytes(len)?.to_vec();
            Ok(GetResponseBody::WithDataBlock {
                last,
                block_number,
                data,
            })
        }
        other => Err(DlmsError::Protocol(format!(
            "unknown GetResponse variant 0x{:02X}",
            other
        ))),
    }
}

/// `00 <value>` on success, `<err!=0> <kind>` on per-item failure
fn decode_get_data_result(dec: &mut AxdrDecoder<'_>) -> DlmsResult<DataObject> {
    if dec.read_byte()? == 0 {
        dec.decode_data_object()
    } else {
        Ok(DataObject::Error(DataAccessResult::from_u8(
            dec.read_byte()?,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosem_core::ObisCode;

    fn invoke() -> InvokeIdAndPriority {
        InvokeIdAndPriority::new(
            1,
            crate::pdu::INVOKE_HIGH_PRIORITY | crate::pdu::INVOKE_CONFIRMED,
        )
    }

    /// Known-good single GET of 1-0:1.8.0.255 attribute 2
    #[test]
    fn test_get_single_literal() {
        let item = CosemAttribute::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2);
        let request = encode_get_normal(invoke(), &item).unwrap();
        assert_eq!(
            request,
            vec![0xC0, 0x01, 0xC1, 0x00, 0x03, 0x01, 0x00, 0x01, 0x08, 0x00, 0xFF, 0x02, 0x00]
        );

        let response = [0xC4u8, 0x01, 0xC1, 0x00, 0x06, 0x00, 0x00, 0x00, 0x7B];
        match decode_get_response(&response, invoke()).unwrap() {
            GetResponseBody::Normal(value) => {
                assert_eq!(value, DataObject::Unsigned32(123));
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_get_error_item() {
        let response = [0xC4u8, 0x01, 0xC1, 0x01, 0x03];
        match decode_get_response(&response, invoke()).unwrap() {
            GetResponseBody::Normal(value) => {
                assert_eq!(
                    value,
                    DataObject::Error(DataAccessResult::ReadWriteDenied)
                );
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_get_with_list() {
        let items = vec![
            CosemAttribute::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2),
            CosemAttribute::new(3, ObisCode::new(1, 0, 2, 8, 0, 255), 2),
        ];
        let request = encode_get_with_list(invoke(), &items).unwrap();
        assert_eq!(&request[..4], &[0xC0, 0x03, 0xC1, 0x02]);

        let response = [
            0xC4u8, 0x03, 0xC1, 0x02, 0x00, 0x11, 0x2A, 0x01, 0x0B,
        ];
        match decode_get_response(&response, invoke()).unwrap() {
            GetResponseBody::WithList(values) => {
                assert_eq!(values.len(), 2);
                assert_eq!(values[0], DataObject::Unsigned8(42));
                assert_eq!(
                    values[1],
                    DataObject::Error(DataAccessResult::ObjectUnavailable)
                );
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_get_block_response() {
        let response = [
            0xC4u8, 0x02, 0xC1, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x03, 0xAA, 0xBB, 0xCC,
        ];
        match decode_get_response(&response, invoke()).unwrap() {
            GetResponseBody::WithDataBlock {
                last,
                block_number,
                data,
            } => {
                assert!(!last);
                assert_eq!(block_number, 1);
                assert_eq!(data, vec![0xAA, 0xBB, 0xCC]);
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_get_block_error_aborts() {
        let response = [0xC4u8, 0x02, 0xC1, 0x00, 0x00, 0x00, 0x00, 0x02, 0x01, 0x0E];
        assert!(decode_get_response(&response, invoke()).is_err());
    }

    #[test]
    fn test_get_next_request() {
        assert_eq!(
            encode_get_next(invoke(), 2),
            vec![0xC0, 0x02, 0xC1, 0x00, 0x00, 0x00, 0x02]
        );
    }

    #[test]
    fn test_invoke_mismatch_rejected() {
        let response = [0xC4u8, 0x01, 0xC2, 0x00, 0x11, 0x01];
        assert!(decode_get_response(&response, invoke()).is_err());
    }
}
