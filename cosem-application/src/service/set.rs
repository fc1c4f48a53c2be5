//! SET request encoding and response parsing (logical name)

use crate::pdu::{tags, CosemAttribute, InvokeIdAndPriority};
use cosem_axdr::{AxdrDecoder, AxdrEncoder, LengthEncoding};
use cosem_core::error::{DlmsError, DlmsResult};
use cosem_core::DataAccessResult;

fn encode_value(item: &CosemAttribute, out: &mut Vec<u8>) -> DlmsResult<()> {
    let value = item.payload.as_ref().ok_or_else(|| {
        DlmsError::Encoding("SET item carries no value".to_string())
    })?;
    let mut encoder = AxdrEncoder::new();
    encoder.encode_data_object(value)?;
    out.extend_from_slice(encoder.as_bytes());
    Ok(())
}

/// `C1 01 (invoke) <item> <value>`
pub fn encode_set_normal(
    invoke: InvokeIdAndPriority,
    item: &CosemAttribute,
) -> DlmsResult<Vec<u8>> {
    let mut out = vec![tags::SET_REQUEST, 0x01, invoke.byte()];
    item.encode_descriptor(&mut out)?;
    encode_value(item, &mut out)?;
    Ok(out)
}

/// `C1 02 (invoke) <item>` opening a blocked transfer
pub fn encode_set_first_block(
    invoke: InvokeIdAndPriority,
    item: &CosemAttribute,
) -> DlmsResult<Vec<u8>> {
    let mut out = vec![tags::SET_REQUEST, 0x02, invoke.byte()];
    item.encode_descriptor(&mut out)?;
    Ok(out)
}

/// `C1 03 (invoke) <last> <block-no> <L> <chunk>`
pub fn encode_set_block(
    invoke: InvokeIdAndPriority,
    last: bool,
    block_number: u32,
    chunk: &[u8],
) -> Vec<u8> {
    let mut out = vec![tags::SET_REQUEST, 0x03, invoke.byte()];
    out.push(if last { 0x01 } else { 0x00 });
    out.extend_from_slice(&block_number.to_be_bytes());
    out.extend_from_slice(&LengthEncoding::for_value(chunk.len()).encode());
    out.extend_from_slice(chunk);
    out
}

/// `C1 04 (invoke) <n> <items…> <n> <values…>`
pub fn encode_set_with_list(
    invoke: InvokeIdAndPriority,
    items: &[CosemAttribute],
) -> DlmsResult<Vec<u8>> {
    let mut out = vec![tags::SET_REQUEST, 0x04, invoke.byte()];
    out.extend_from_slice(&LengthEncoding::for_value(items.len()).encode());
    for item in items {
        item.encode_descriptor(&mut out)?;
    }
    out.extend_from_slice(&LengthEncoding::for_value(items.len()).encode());
    for item in items {
        encode_value(item, &mut out)?;
    }
    Ok(out)
}

/// `C1 05 (invoke) <n> <items…>` opening a blocked list transfer
pub fn encode_set_with_list_first_block(
    invoke: InvokeIdAndPriority,
    items: &[CosemAttribute],
) -> DlmsResult<Vec<u8>> {
    let mut out = vec![tags::SET_REQUEST, 0x05, invoke.byte()];
    out.extend_from_slice(&LengthEncoding::for_value(items.len()).encode());
    for item in items {
        item.encode_descriptor(&mut out)?;
    }
    Ok(out)
}

/// Parsed SET response body
#[derive(Debug, Clone, PartialEq)]
pub enum SetResponseBody {
    Normal(DataAccessResult),
    /// Acknowledges one block; carries the block number to continue from
    DataBlock { block_number: u32 },
    LastDataBlock(DataAccessResult),
    LastDataBlockWithList(Vec<DataAccessResult>),
    WithList(Vec<DataAccessResult>),
}

/// Decode a SET response, validating the echoed invoke id
pub fn decode_set_response(
    apdu: &[u8],
    invoke: InvokeIdAndPriority,
) -> DlmsResult<SetResponseBody> {
    let mut dec = AxdrDecoder::new(apdu);
    let tag = dec.read_byte()?;
    if tag != tags::SET_RESPONSE {
        return Err(DlmsError::Protocol(format!(
            "expected SetResponse, got tag 0x{:02X}",
            tag
        )));
    }
    let subtag = dec.read_byte()?;
    invoke.validate_response(dec.read_byte()?)?;

    match subtag {
        0x01 => Ok(SetResponseBody::Normal(DataAccessResult::from_u8(
            dec.read_byte()?,
        ))),
        0x02 => {
            let block = dec.read_bytes(4)?;
            Ok(SetResponseBody::DataBlock {
                block_number: u32::from_be_bytes([block[0], block[1], block[2], block[3]]),
            })
        }
        0x03 => Ok(SetResponseBody::LastDataBlock(DataAccessResult::from_u8(
            dec.read_byte()?,
        ))),
        0x04 => Ok(SetResponseBody::LastDataBlockWithList(decode_results(
            &mut dec,
        )?)),
        0x05 => Ok(SetResponseBody::WithList(decode_results(&mut dec)?)),
        other => Err(DlmsError::Protocol(format!(
            "unknown SetResponse variant 0x{:02X}",
            other
        ))),
    }
}

fn decode_results(dec: &mut AxdrDecoder<'_>) -> DlmsResult<Vec<DataAccessResult>> {
    let count = dec.decode_length()?;
    let mut results = Vec::with_capacity(count);
    for _ in 0..count {
        results.push(DataAccessResult::from_u8(dec.read_byte()?));
    }
    Ok(results)
}
