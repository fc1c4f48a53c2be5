//! ACTION request encoding and response parsing (logical name)
//!
//! Only single-method invocation is supported.

use crate::pdu::{tags, CosemAttribute, InvokeIdAndPriority};
use cosem_axdr::{AxdrDecoder, AxdrEncoder};
use cosem_core::error::{DlmsError, DlmsResult};
use cosem_core::{DataAccessResult, DataObject};

/// `C3 01 (invoke) <class> <obis> <method> <param?>`
pub fn encode_action_normal(
    invoke: InvokeIdAndPriority,
    item: &CosemAttribute,
) -> DlmsResult<Vec<u8>> {
    let mut out = vec![tags::ACTION_REQUEST, 0x01, invoke.byte()];
    item.encode_method_descriptor(&mut out);
    match &item.payload {
        Some(parameter) => {
            out.push(0x01);
            let mut encoder = AxdrEncoder::new();
            encoder.encode_data_object(parameter)?;
            out.extend_from_slice(encoder.as_bytes());
        }
        None => out.push(0x00),
    }
    Ok(out)
}

/// `C3 02 (invoke) <block-no>` requesting the next response block
pub fn encode_action_next(invoke: InvokeIdAndPriority, block_number: u32) -> Vec<u8> {
    let mut out = vec![tags::ACTION_REQUEST, 0x02, invoke.byte()];
    out.extend_from_slice(&block_number.to_be_bytes());
    out
}

/// Parsed ACTION response body
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResponseBody {
    Normal {
        status: DataAccessResult,
        /// Optional return data; a rejected result arrives as `DataObject::Error`
        data: Option<DataObject>,
    },
    WithBlock {
        last: bool,
        block_number: u32,
        data: Vec<u8>,
    },
}

/// Decode an ACTION response, validating the echoed invoke id
pub fn decode_action_response(
    apdu: &[u8],
    invoke: InvokeIdAndPriority,
) -> DlmsResult<ActionResponseBody> {
    let mut dec = AxdrDecoder::new(apdu);
    let tag = dec.read_byte()?;
    if tag != tags::ACTION_RESPONSE {
        return Err(DlmsError::Protocol(format!(
            "expected ActionResponse, got tag 0x{:02X}",
            tag
        )));
    }
    let subtag = dec.read_byte()?;
    invoke.validate_response(dec.read_byte()?)?;

    match subtag {
        0x01 => {
            let status = DataAccessResult::from_u8(dec.read_byte()?);
            let data = if dec.remaining() > 0 && dec.read_byte()? == 0x01 {
                // get-data-result: 00 <value> or <err> <kind>
                if dec.read_byte()? == 0 {
                    Some(dec.decode_data_object()?)
                } else {
                    Some(DataObject::Error(DataAccessResult::from_u8(
                        dec.read_byte()?,
                    )))
                }
            } else {
                None
            };
            Ok(ActionResponseBody::Normal { status, data })
        }
        0x02 => {
            let last = dec.read_byte()? != 0;
            let block = dec.read_bytes(4)?;
            let block_number = u32::from_be_bytes([block[0], block[1], block[2], block[3]]);
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
            Ok(ActionResponseBody::WithBlock {
                last,
                block_number,
                data,
            })
        }
        other => Err(DlmsError::Protocol(format!(
            "unknown ActionResponse variant 0x{:02X}",
            other
        ))),
    }
}
