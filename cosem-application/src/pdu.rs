//! xDLMS PDU building blocks: tags, invoke byte, conformance block,
//! InitiateRequest/Response, request item descriptors

use cosem_axdr::{AxdrDecoder, AxdrEncoder};
use cosem_core::error::{DlmsError, DlmsResult};
use cosem_core::{DataAccessResult, DataObject, ObisCode};

/// APDU tag code points (IEC 62056-5-3 tag table)
pub mod tags {
    pub const INITIATE_REQUEST: u8 = 0x01;
    pub const READ_REQUEST: u8 = 0x05;
    pub const WRITE_REQUEST: u8 = 0x06;
    pub const INITIATE_RESPONSE: u8 = 0x08;
    pub const READ_RESPONSE: u8 = 0x0C;
    pub const WRITE_RESPONSE: u8 = 0x0D;
    pub const CONFIRMED_SERVICE_ERROR: u8 = 0x0E;

    pub const GLO_INITIATE_REQUEST: u8 = 0x21;
    pub const GLO_READ_REQUEST: u8 = 0x25;
    pub const GLO_WRITE_REQUEST: u8 = 0x26;
    pub const GLO_INITIATE_RESPONSE: u8 = 0x28;
    pub const GLO_READ_RESPONSE: u8 = 0x2C;
    pub const GLO_WRITE_RESPONSE: u8 = 0x2D;

    pub const AARQ: u8 = 0x60;
    pub const AARE: u8 = 0x61;
    pub const RLRQ: u8 = 0x63;

    pub const GET_REQUEST: u8 = 0xC0;
    pub const SET_REQUEST: u8 = 0xC1;
    pub const ACTION_REQUEST: u8 = 0xC3;
    pub const GET_RESPONSE: u8 = 0xC4;
    pub const SET_RESPONSE: u8 = 0xC5;
    pub const ACTION_RESPONSE: u8 = 0xC7;

    pub const GLO_GET_REQUEST: u8 = 0xC8;
    pub const GLO_SET_REQUEST: u8 = 0xC9;
    pub const GLO_ACTION_REQUEST: u8 = 0xCB;
    pub const GLO_GET_RESPONSE: u8 = 0xCC;
    pub const GLO_SET_RESPONSE: u8 = 0xCD;
    pub const GLO_ACTION_RESPONSE: u8 = 0xCF;

    pub const DED_GET_REQUEST: u8 = 0xD0;
    pub const DED_SET_REQUEST: u8 = 0xD1;
    pub const DED_ACTION_REQUEST: u8 = 0xD3;
    pub const DED_GET_RESPONSE: u8 = 0xD4;
    pub const DED_SET_RESPONSE: u8 = 0xD5;
    pub const DED_ACTION_RESPONSE: u8 = 0xD7;

    pub const EXCEPTION_RESPONSE: u8 = 0xD8;
    pub const GENERAL_GLO_CIPHERING: u8 = 0xDB;
    pub const GENERAL_DED_CIPHERING: u8 = 0xDC;
}

/// High-priority flag ORed into the invoke byte
pub const INVOKE_HIGH_PRIORITY: u8 = 0x80;
/// Confirmed-service flag ORed into the invoke byte
pub const INVOKE_CONFIRMED: u8 = 0x40;

/// Invoke-id-and-priority byte: 3-bit rotating id plus the flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokeIdAndPriority {
    byte: u8,
}

impl InvokeIdAndPriority {
    pub fn new(invoke_id: u8, flags: u8) -> Self {
        Self {
            byte: (invoke_id & 0x07) | (flags & (INVOKE_HIGH_PRIORITY | INVOKE_CONFIRMED)),
        }
    }

    pub fn byte(&self) -> u8 {
        self.byte
    }

    pub fn invoke_id(&self) -> u8 {
        self.byte & 0x07
    }

    pub fn is_high_priority(&self) -> bool {
        self.byte & INVOKE_HIGH_PRIORITY != 0
    }

    pub fn is_confirmed(&self) -> bool {
        self.byte & INVOKE_CONFIRMED != 0
    }

    /// Check a response's invoke byte against the id we sent
    pub fn validate_response(&self, received: u8) -> DlmsResult<()> {
        if received & 0x07 == self.invoke_id() {
            Ok(())
        } else {
            Err(DlmsError::Protocol(format!(
                "invoke id mismatch: sent {}, response carries {}",
                self.invoke_id(),
                received & 0x07
            )))
        }
    }
}

/// Conformance block: 32-bit negotiated capability mask
///
/// The bit constants place the Blue-Book 24-bit mask in the middle bytes so
/// the canonical LN request mask is 0x007E1F04.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conformance(pub u32);

impl Conformance {
    pub const READ: u32 = 0x1000_0000;
    pub const WRITE: u32 = 0x0800_0000;
    pub const UNCONFIRMED_WRITE: u32 = 0x0400_0000;
    pub const ATTRIBUTE0_SUPPORTED_WITH_SET: u32 = 0x0080_0000;
    pub const PRIORITY_MGMT_SUPPORTED: u32 = 0x0040_0000;
    pub const ATTRIBUTE0_SUPPORTED_WITH_GET: u32 = 0x0020_0000;
    pub const BLOCK_TRANSFER_WITH_GET_OR_READ: u32 = 0x0010_0000;
    pub const BLOCK_TRANSFER_WITH_SET_OR_WRITE: u32 = 0x0008_0000;
    pub const BLOCK_TRANSFER_WITH_ACTION: u32 = 0x0004_0000;
    pub const MULTIPLE_REFERENCES: u32 = 0x0002_0000;
    pub const INFORMATION_REPORT: u32 = 0x0001_0000;
    pub const DATA_NOTIFICATION: u32 = 0x0000_8000;
    pub const ACCESS: u32 = 0x0000_4000;
    pub const PARAMETERIZED_ACCESS: u32 = 0x0000_2000;
    pub const GET: u32 = 0x0000_1000;
    pub const SET: u32 = 0x0000_0800;
    pub const SELECTIVE_ACCESS: u32 = 0x0000_0400;
    pub const EVENT_NOTIFICATION: u32 = 0x0000_0200;
    pub const ACTION: u32 = 0x0000_0100;

    /// Canonical LN client request mask
    pub const DEFAULT_LN: u32 = 0x007E_1F04;

    pub fn contains(&self, mask: u32) -> bool {
        self.0 & mask == mask
    }

    pub fn multiple_references(&self) -> bool {
        self.contains(Self::MULTIPLE_REFERENCES)
    }

    pub fn block_transfer_with_get_or_read(&self) -> bool {
        self.contains(Self::BLOCK_TRANSFER_WITH_GET_OR_READ)
    }

    pub fn block_transfer_with_set_or_write(&self) -> bool {
        self.contains(Self::BLOCK_TRANSFER_WITH_SET_OR_WRITE)
    }

    pub fn encode(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub fn decode(bytes: &[u8]) -> DlmsResult<Self> {
        if bytes.len() != 4 {
            return Err(DlmsError::Decoding(format!(
                "conformance block must be 4 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(u32::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ])))
    }
}

/// Fixed prefix in front of the conformance block of both Initiate PDUs
const CONFORMANCE_BLOCK_PREFIX: [u8; 4] = [0x06, 0x5F, 0x1F, 0x04];

/// xDLMS InitiateRequest carried in the AARQ user information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateRequest {
    pub dedicated_key: Option<Vec<u8>>,
    pub proposed_conformance: Conformance,
    pub client_max_receive_pdu_size: u16,
}

impl InitiateRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(14);
        out.push(tags::INITIATE_REQUEST);
        match &self.dedicated_key {
            Some(key) => {
                out.push(0x01);
                out.push(key.len() as u8);
                out.extend_from_slice(key);
            }
            None => out.push(0x00),
        }
        // response-allowed and proposed-quality carry their defaults
        out.push(0x00);
        out.push(0x00);
        out.extend_from_slice(&CONFORMANCE_BLOCK_PREFIX);
        out.extend_from_slice(&self.proposed_conformance.encode());
        out.extend_from_slice(&self.client_max_receive_pdu_size.to_be_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let mut cursor = AxdrDecoder::new(data);
        if cursor.read_byte()? != tags::INITIATE_REQUEST {
            return Err(DlmsError::Decoding("not an InitiateRequest".to_string()));
        }
        let dedicated_key = match cursor.read_byte()? {
            0x00 => None,
            0x01 => {
                let len = cursor.read_byte()? as usize;
                Some(cursor.read_bytes(len)?.to_vec())
            }
            other => {
                return Err(DlmsError::Decoding(format!(
                    "invalid dedicated-key flag: 0x{:02X}",
                    other
                )))
            }
        };
        // response-allowed, proposed-quality
        cursor.read_bytes(2)?;
        let prefix = cursor.read_bytes(4)?;
        if prefix != CONFORMANCE_BLOCK_PREFIX {
            return Err(DlmsError::Decoding(format!(
                "unexpected conformance block prefix: {:02X?}",
                prefix
            )));
        }
        let proposed_conformance = Conformance::decode(cursor.read_bytes(4)?)?;
        let max = cursor.read_bytes(2)?;
        Ok(Self {
            dedicated_key,
            proposed_conformance,
            client_max_receive_pdu_size: u16::from_be_bytes([max[0], max[1]]),
        })
    }
}

/// xDLMS InitiateResponse carried in the AARE user information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitiateResponse {
    pub negotiated_conformance: Conformance,
    pub server_max_receive_pdu_size: u16,
    pub vaa_address: i16,
}

impl InitiateResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(14);
        out.push(tags::INITIATE_RESPONSE);
        out.push(0x00); // negotiated-quality-of-service absent
        out.extend_from_slice(&CONFORMANCE_BLOCK_PREFIX);
        out.extend_from_slice(&self.negotiated_conformance.encode());
        out.extend_from_slice(&self.server_max_receive_pdu_size.to_be_bytes());
        out.extend_from_slice(&self.vaa_address.to_be_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let mut cursor = AxdrDecoder::new(data);
        let tag = cursor.read_byte()?;
        if tag == tags::CONFIRMED_SERVICE_ERROR {
            return Err(DlmsError::Protocol(format!(
                "confirmed service error: {:02X?}",
                &data[1..]
            )));
        }
        if tag != tags::INITIATE_RESPONSE {
            return Err(DlmsError::Decoding(format!(
                "not an InitiateResponse: tag 0x{:02X}",
                tag
            )));
        }
        if cursor.read_byte()? == 0x01 {
            cursor.read_byte()?; // negotiated quality of service
        }
        let prefix = cursor.read_bytes(4)?;
        if prefix != CONFORMANCE_BLOCK_PREFIX {
            return Err(DlmsError::Decoding(format!(
                "unexpected conformance block prefix: {:02X?}",
                prefix
            )));
        }
        let negotiated_conformance = Conformance::decode(cursor.read_bytes(4)?)?;
        let max = cursor.read_bytes(2)?;
        let server_max_receive_pdu_size = u16::from_be_bytes([max[0], max[1]]);
        let vaa = cursor.read_bytes(2)?;
        Ok(Self {
            negotiated_conformance,
            server_max_receive_pdu_size,
            vaa_address: i16::from_be_bytes([vaa[0], vaa[1]]),
        })
    }
}

/// Selective-access qualifier on a request item
#[derive(Debug, Clone, PartialEq)]
pub struct SelectiveAccess {
    pub descriptor: u8,
    pub data: DataObject,
}

/// One logical-name request item: attribute for GET/SET, method for ACTION
///
/// The payload doubles as the SET value or the ACTION parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct CosemAttribute {
    pub class_id: u16,
    pub obis: ObisCode,
    pub attribute: i8,
    pub access: Option<SelectiveAccess>,
    pub payload: Option<DataObject>,
}

impl CosemAttribute {
    pub fn new(class_id: u16, obis: ObisCode, attribute: i8) -> Self {
        Self {
            class_id,
            obis,
            attribute,
            access: None,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: DataObject) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_access(mut self, descriptor: u8, data: DataObject) -> Self {
        self.access = Some(SelectiveAccess { descriptor, data });
        self
    }

    /// Encode the attribute descriptor and the optional access selection
    pub fn encode_descriptor(&self, out: &mut Vec<u8>) -> DlmsResult<()> {
        out.extend_from_slice(&self.class_id.to_be_bytes());
        out.extend_from_slice(self.obis.as_bytes());
        out.push(self.attribute as u8);
        encode_access_selection(&self.access, out)
    }

    /// Encode class, OBIS and method id without the access option byte
    pub fn encode_method_descriptor(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.class_id.to_be_bytes());
        out.extend_from_slice(self.obis.as_bytes());
        out.push(self.attribute as u8);
    }
}

/// One short-name request item
#[derive(Debug, Clone, PartialEq)]
pub struct SnItem {
    pub address: i16,
    pub access: Option<SelectiveAccess>,
    pub write_data: Option<DataObject>,
}

impl SnItem {
    pub fn new(address: i16) -> Self {
        Self {
            address,
            access: None,
            write_data: None,
        }
    }

    pub fn with_write_data(mut self, data: DataObject) -> Self {
        self.write_data = Some(data);
        self
    }

    pub fn with_access(mut self, descriptor: u8, data: DataObject) -> Self {
        self.access = Some(SelectiveAccess { descriptor, data });
        self
    }
}

/// `01 <descriptor> <data>` when present, `00` otherwise
pub fn encode_access_selection(
    access: &Option<SelectiveAccess>,
    out: &mut Vec<u8>,
) -> DlmsResult<()> {
    match access {
        Some(selection) => {
            out.push(0x01);
            out.push(selection.descriptor);
            let mut encoder = AxdrEncoder::new();
            encoder.encode_data_object(&selection.data)?;
            out.extend_from_slice(encoder.as_bytes());
        }
        None => out.push(0x00),
    }
    Ok(())
}

/// Exception response: tag 0xD8 with up to two detail bytes
///
/// The detail codes are not interpreted; the caller receives a synthetic
/// other-reason error value.
pub fn decode_exception_response(apdu: &[u8]) -> DlmsResult<DataObject> {
    if apdu.first() != Some(&tags::EXCEPTION_RESPONSE) {
        return Err(DlmsError::Decoding("not an exception response".to_string()));
    }
    let state_error = apdu.get(1).copied();
    let service_error = apdu.get(2).copied();
    log::debug!(
        "exception response: state={:?} service={:?}",
        state_error,
        service_error
    );
    Ok(DataObject::Error(DataAccessResult::OtherReason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoke_byte_composition() {
        let invoke = InvokeIdAndPriority::new(1, INVOKE_HIGH_PRIORITY | INVOKE_CONFIRMED);
        assert_eq!(invoke.byte(), 0xC1);
        assert!(invoke.is_high_priority());
        assert!(invoke.is_confirmed());
        assert!(invoke.validate_response(0xC1).is_ok());
        assert!(invoke.validate_response(0x41).is_ok());
        assert!(invoke.validate_response(0xC2).is_err());
    }

    #[test]
    fn test_conformance_default_mask() {
        let conf = Conformance(Conformance::DEFAULT_LN);
        assert!(conf.multiple_references());
        assert!(conf.block_transfer_with_get_or_read());
        assert!(conf.block_transfer_with_set_or_write());
        assert!(conf.contains(Conformance::GET));
        assert!(conf.contains(Conformance::SET));
        assert!(!conf.contains(Conformance::READ));
        assert_eq!(conf.encode(), [0x00, 0x7E, 0x1F, 0x04]);
    }

    #[test]
    fn test_initiate_request_plain() {
        let request = InitiateRequest {
            dedicated_key: None,
            proposed_conformance: Conformance(Conformance::DEFAULT_LN),
            client_max_receive_pdu_size: 0x04B0,
        };
        let bytes = request.encode();
        assert_eq!(bytes.len(), 14);
        assert_eq!(
            bytes,
            vec![
                0x01, 0x00, 0x00, 0x00, 0x06, 0x5F, 0x1F, 0x04, 0x00, 0x7E, 0x1F, 0x04, 0x04, 0xB0
            ]
        );
        assert_eq!(InitiateRequest::decode(&bytes).unwrap(), request);
    }

    #[test]
    fn test_initiate_request_with_dedicated_key() {
        let request = InitiateRequest {
            dedicated_key: Some(vec![0xAB; 16]),
            proposed_conformance: Conformance(Conformance::DEFAULT_LN),
            client_max_receive_pdu_size: 1200,
        };
        let bytes = request.encode();
        assert_eq!(bytes[1], 0x01);
        assert_eq!(bytes[2], 16);
        assert_eq!(InitiateRequest::decode(&bytes).unwrap(), request);
    }

    #[test]
    fn test_initiate_response_literal() {
        // The user-information body of the canonical accepted AARE.
        let bytes = [
            0x08, 0x00, 0x06, 0x5F, 0x1F, 0x04, 0x00, 0x7E, 0x1F, 0x04, 0x03, 0xC0, 0x00, 0x07,
        ];
        let response = InitiateResponse::decode(&bytes).unwrap();
        assert_eq!(response.server_max_receive_pdu_size, 0x03C0);
        assert_eq!(response.vaa_address, 0x0007);
        assert_eq!(response.negotiated_conformance.0, 0x007E1F04);
        assert_eq!(response.encode(), bytes);
    }

    #[test]
    fn test_initiate_response_service_error() {
        let bytes = [0x0E, 0x01, 0x06, 0x00];
        assert!(matches!(
            InitiateResponse::decode(&bytes),
            Err(DlmsError::Protocol(_))
        ));
    }

    #[test]
    fn test_attribute_descriptor_encoding() {
        let attr = CosemAttribute::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2);
        let mut out = Vec::new();
        attr.encode_descriptor(&mut out).unwrap();
        assert_eq!(
            out,
            vec![0x00, 0x03, 0x01, 0x00, 0x01, 0x08, 0x00, 0xFF, 0x02, 0x00]
        );
    }

    #[test]
    fn test_attribute_descriptor_with_access() {
        let attr = CosemAttribute::new(7, ObisCode::new(1, 0, 99, 1, 0, 255), 2)
            .with_access(1, DataObject::Unsigned16(4));
        let mut out = Vec::new();
        attr.encode_descriptor(&mut out).unwrap();
        assert_eq!(
            out,
            vec![0x00, 0x07, 0x01, 0x00, 0x63, 0x01, 0x00, 0xFF, 0x02, 0x01, 0x01, 0x12, 0x00, 0x04]
        );
    }

    #[test]
    fn test_exception_response() {
        let value = decode_exception_response(&[0xD8, 0x01, 0x02]).unwrap();
        assert_eq!(value, DataObject::Error(DataAccessResult::OtherReason));
        assert!(decode_exception_response(&[0xC4]).is_err());
    }
}
