//! ACSE association PDUs: AARQ assembly, AARE parsing, RLRQ

use crate::pdu::tags;
use cosem_axdr::{AxdrDecoder, LengthEncoding};
use cosem_core::error::{DlmsError, DlmsResult};
use cosem_security::AuthenticationMechanism;

/// Application context named in the AARQ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationContext {
    LogicalName = 1,
    ShortName = 2,
    LogicalNameCiphered = 3,
    ShortNameCiphered = 4,
}

impl ApplicationContext {
    pub fn from_u8(value: u8) -> DlmsResult<Self> {
        match value {
            1 => Ok(ApplicationContext::LogicalName),
            2 => Ok(ApplicationContext::ShortName),
            3 => Ok(ApplicationContext::LogicalNameCiphered),
            4 => Ok(ApplicationContext::ShortNameCiphered),
            other => Err(DlmsError::Decoding(format!(
                "unknown application context: {}",
                other
            ))),
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn is_ciphered(self) -> bool {
        matches!(
            self,
            ApplicationContext::LogicalNameCiphered | ApplicationContext::ShortNameCiphered
        )
    }

    pub fn is_logical_name(self) -> bool {
        matches!(
            self,
            ApplicationContext::LogicalName | ApplicationContext::LogicalNameCiphered
        )
    }
}

/// Source-diagnostic values that allow the association to proceed
pub const DIAGNOSTIC_NONE: u8 = 0;
pub const DIAGNOSTIC_AUTHENTICATION_REQUIRED: u8 = 14;

const APPLICATION_CONTEXT_OID: [u8; 6] = [0x60, 0x85, 0x74, 0x05, 0x08, 0x01];
const MECHANISM_NAME_OID: [u8; 6] = [0x60, 0x85, 0x74, 0x05, 0x08, 0x02];

/// Everything needed to assemble an AARQ
#[derive(Debug, Clone)]
pub struct AarqParameters {
    pub context: ApplicationContext,
    pub mechanism: AuthenticationMechanism,
    /// Present for HLS mechanisms: our 8-byte system title
    pub client_system_title: Option<[u8; 8]>,
    /// CallingAEInvocationID
    pub user_id: Option<u8>,
    /// Password for low authentication, CtoS for HLS
    pub calling_authentication_value: Option<Vec<u8>>,
    /// InitiateRequest bytes, already GLO-wrapped when ciphering applies
    pub user_information: Vec<u8>,
}

/// Assemble the AARQ APDU
pub fn build_aarq(params: &AarqParameters) -> Vec<u8> {
    let mut body = Vec::with_capacity(64);

    // A1 ApplicationContextName
    body.push(0xA1);
    body.push(0x09);
    body.push(0x06);
    body.push(0x07);
    body.extend_from_slice(&APPLICATION_CONTEXT_OID);
    body.push(params.context.to_u8());

    // A6 CallingAPTitle, only for HLS mechanisms
    if params.mechanism.is_high_level() {
        if let Some(title) = &params.client_system_title {
            body.push(0xA6);
            body.push(0x0A);
            body.push(0x04);
            body.push(0x08);
            body.extend_from_slice(title);
        }
    }

    // A9 CallingAEInvocationID
    if let Some(user_id) = params.user_id {
        body.push(0xA9);
        body.push(0x03);
        body.push(0x02);
        body.push(0x01);
        body.push(user_id);
    }

    if params.mechanism != AuthenticationMechanism::None {
        // 8A SenderAcseRequirements: authentication bit
        body.extend_from_slice(&[0x8A, 0x02, 0x07, 0x80]);

        // 8B MechanismName
        body.push(0x8B);
        body.push(0x07);
        body.extend_from_slice(&MECHANISM_NAME_OID);
        body.push(params.mechanism.to_u8());

        // AC CallingAuthenticationValue
        if let Some(value) = &params.calling_authentication_value {
            body.push(0xAC);
            body.push((value.len() + 2) as u8);
            body.push(0x80);
            body.push(value.len() as u8);
            body.extend_from_slice(value);
        }
    }

    // BE UserInformation wrapping the xDLMS InitiateRequest
    body.push(0xBE);
    body.push((params.user_information.len() + 2) as u8);
    body.push(0x04);
    body.push(params.user_information.len() as u8);
    body.extend_from_slice(&params.user_information);

    let mut apdu = Vec::with_capacity(body.len() + 4);
    apdu.push(tags::AARQ);
    apdu.extend_from_slice(&LengthEncoding::for_value(body.len()).encode());
    apdu.extend_from_slice(&body);
    apdu
}

/// Parsed AARE fields
#[derive(Debug, Clone, Default)]
pub struct Aare {
    pub application_context: Option<u8>,
    pub association_result: Option<u8>,
    pub source_diagnostic: Option<u8>,
    pub server_system_title: Option<Vec<u8>>,
    pub server_invocation_id: Option<u8>,
    pub server_to_client_challenge: Option<Vec<u8>>,
    pub server_acse_requirements: bool,
    pub server_mechanism: Option<u8>,
    /// Raw user information; possibly a ciphered InitiateResponse
    pub user_information: Option<Vec<u8>>,
}

impl Aare {
    /// Parse the context-tagged TLV sequence of an AARE
    pub fn decode(apdu: &[u8]) -> DlmsResult<Self> {
        let mut cursor = AxdrDecoder::new(apdu);
        if cursor.read_byte()? != tags::AARE {
            return Err(DlmsError::Decoding("not an AARE".to_string()));
        }
        let body_len = cursor.decode_length()?;
        let body = cursor.read_bytes(body_len)?;

        let mut aare = Aare::default();
        let mut fields = AxdrDecoder::new(body);
        while fields.remaining() > 0 {
            let tag = fields.read_byte()?;
            let len = fields.decode_length()?;
            let value = fields.read_bytes(len)?;
            match tag {
                0xA1 => {
                    // 06 07 <oid> <ctx>
                    aare.application_context = value.last().copied();
                }
                0xA2 => {
                    // 02 01 <result>
                    aare.association_result = parse_wrapped_integer(value);
                }
                0xA3 => {
                    // A1 03 02 01 <diagnostic>: value sits at the fifth byte
                    if value.len() < 5 {
                        return Err(DlmsError::Decoding(
                            "short source-diagnostic field".to_string(),
                        ));
                    }
                    aare.source_diagnostic = Some(value[4]);
                }
                0xA4 => {
                    // 04 08 <title>
                    aare.server_system_title = parse_wrapped_octets(value, 0x04);
                }
                0xA5 => {
                    aare.server_invocation_id = parse_wrapped_integer(value);
                }
                0xAA => {
                    // 80 <len> <challenge>
                    aare.server_to_client_challenge = parse_wrapped_octets(value, 0x80);
                }
                0x88 => {
                    aare.server_acse_requirements = true;
                }
                0x89 => {
                    // <oid> <mechanism id>
                    aare.server_mechanism = value.last().copied();
                }
                0xBE => {
                    aare.user_information = parse_wrapped_octets(value, 0x04);
                }
                other => {
                    log::debug!("skipping unrecognized AARE field 0x{:02X}", other);
                }
            }
        }
        Ok(aare)
    }

    /// Gate on the association result and source diagnostic
    ///
    /// Returns whether the server demands the post-associate HLS exchange.
    pub fn validate(&self) -> DlmsResult<bool> {
        match self.association_result {
            Some(0) => {}
            Some(code) => {
                return Err(DlmsError::AccessDenied(format!(
                    "association rejected with result {}",
                    code
                )))
            }
            None => {
                return Err(DlmsError::Decoding(
                    "AARE carries no association result".to_string(),
                ))
            }
        }
        match self.source_diagnostic {
            Some(DIAGNOSTIC_NONE) => Ok(false),
            Some(DIAGNOSTIC_AUTHENTICATION_REQUIRED) => Ok(true),
            Some(code) => Err(DlmsError::AccessDenied(format!(
                "unsupported source diagnostic {}",
                code
            ))),
            None => Err(DlmsError::Decoding(
                "AARE carries no source diagnostic".to_string(),
            )),
        }
    }
}

/// `02 01 <n>` and bare forms both collapse to the final byte
fn parse_wrapped_integer(value: &[u8]) -> Option<u8> {
    value.last().copied()
}

fn parse_wrapped_octets(value: &[u8], inner_tag: u8) -> Option<Vec<u8>> {
    if value.len() >= 2 && value[0] == inner_tag {
        let len = value[1] as usize;
        if value.len() >= 2 + len {
            return Some(value[2..2 + len].to_vec());
        }
    }
    None
}

/// Release request bytes
pub fn build_rlrq(empty: bool) -> Vec<u8> {
    if empty {
        vec![tags::RLRQ, 0x00]
    } else {
        vec![tags::RLRQ, 0x03, 0x80, 0x01, 0x00]
    }
}
