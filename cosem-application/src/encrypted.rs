//! GLO/DED ciphering wrapper around plain xDLMS APDUs
//!
//! Outbound: the request tag swaps to its GLO or DED counterpart and the
//! remaining APDU is replaced by `[len] [SC] [FC] [ciphertext‖tag]`.
//! Inbound: ciphered response tags are recognized, a stream decryptor is
//! instantiated over the body, and the plain APDU is read back out.

use crate::pdu::tags;
use cosem_core::error::{DlmsError, DlmsResult};
use cosem_axdr::LengthEncoding;
use cosem_security::CipherContext;
use std::io::Read;

/// Which cipher wraps the APDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    Global,
    Dedicated,
}

/// Map a plain request tag to its ciphered counterpart
pub fn ciphered_request_tag(plain: u8, kind: CipherKind) -> DlmsResult<u8> {
    let tag = match (plain, kind) {
        (tags::GET_REQUEST, CipherKind::Global) => tags::GLO_GET_REQUEST,
        (tags::GET_REQUEST, CipherKind::Dedicated) => tags::DED_GET_REQUEST,
        (tags::SET_REQUEST, CipherKind::Global) => tags::GLO_SET_REQUEST,
        (tags::SET_REQUEST, CipherKind::Dedicated) => tags::DED_SET_REQUEST,
        (tags::ACTION_REQUEST, CipherKind::Global) => tags::GLO_ACTION_REQUEST,
        (tags::ACTION_REQUEST, CipherKind::Dedicated) => tags::DED_ACTION_REQUEST,
        (tags::READ_REQUEST, CipherKind::Global) => tags::GLO_READ_REQUEST,
        (tags::WRITE_REQUEST, CipherKind::Global) => tags::GLO_WRITE_REQUEST,
        (tags::INITIATE_REQUEST, CipherKind::Global) => tags::GLO_INITIATE_REQUEST,
        _ => {
            return Err(DlmsError::Security(format!(
                "no ciphered variant for request tag 0x{:02X}",
                plain
            )))
        }
    };
    Ok(tag)
}

/// Recognize a ciphered response tag; `None` for plain APDUs
pub fn recognize_ciphered_response(tag: u8) -> Option<CipherKind> {
    match tag {
        tags::GLO_GET_RESPONSE
        | tags::GLO_SET_RESPONSE
        | tags::GLO_ACTION_RESPONSE
        | tags::GLO_READ_RESPONSE
        | tags::GLO_WRITE_RESPONSE
        | tags::GLO_INITIATE_RESPONSE
        | tags::GENERAL_GLO_CIPHERING => Some(CipherKind::Global),
        tags::DED_GET_RESPONSE | tags::DED_SET_RESPONSE | tags::DED_ACTION_RESPONSE
        | tags::GENERAL_DED_CIPHERING => Some(CipherKind::Dedicated),
        _ => None,
    }
}

/// Swap the leading tag and cipher the rest of the request
///
/// Consumes one frame counter value from the context.
pub fn wrap_request(
    cipher: &mut CipherContext,
    kind: CipherKind,
    sc: u8,
    apdu: &[u8],
) -> DlmsResult<Vec<u8>> {
    let plain_tag = *apdu
        .first()
        .ok_or_else(|| DlmsError::Encoding("empty APDU".to_string()))?;
    let tag = ciphered_request_tag(plain_tag, kind)?;
    let fc = cipher.take_frame_counter()?;
    let ciphertext = cipher.encrypt(sc, fc, apdu)?;

    let body_len = 1 + 4 + ciphertext.len();
    let mut out = Vec::with_capacity(2 + body_len);
    out.push(tag);
    out.extend_from_slice(&LengthEncoding::for_value(body_len).encode());
    out.push(sc);
    out.extend_from_slice(&fc.to_be_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a ciphered response and return the plain APDU
///
/// General-ciphering variants carry the originator system title in front of
/// the ciphered body; it is parsed and logged but the stored server title
/// drives the IV.
pub fn unwrap_response(cipher: &CipherContext, apdu: &[u8]) -> DlmsResult<Vec<u8>> {
    let tag = *apdu
        .first()
        .ok_or_else(|| DlmsError::Decoding("empty APDU".to_string()))?;
    let mut pos = 1usize;
    if tag == tags::GENERAL_GLO_CIPHERING || tag == tags::GENERAL_DED_CIPHERING {
        let title_len = *apdu
            .get(pos)
            .ok_or_else(|| DlmsError::Decoding("truncated general ciphering".to_string()))?
            as usize;
        pos += 1;
        let title = apdu
            .get(pos..pos + title_len)
            .ok_or_else(|| DlmsError::Decoding("truncated general ciphering".to_string()))?;
        log::debug!("general ciphering from system title {:02X?}", title);
        pos += title_len;
    }

    let (length, consumed) = LengthEncoding::decode(&apdu[pos..])?;
    pos += consumed;
    let body = apdu
        .get(pos..pos + length.value())
        .ok_or_else(|| DlmsError::Decoding("ciphered body shorter than its length".to_string()))?;
    if body.len() < 5 {
        return Err(DlmsError::Decoding(
            "ciphered body too short for SC and FC".to_string(),
        ));
    }

    let sc = body[0];
    let fc = u32::from_be_bytes([body[1], body[2], body[3], body[4]]);
    let mut reader = cipher.decrypt_stream(sc, fc, &body[5..])?;
    let mut plain = Vec::with_capacity(body.len().saturating_sub(5));
    reader
        .read_to_end(&mut plain)
        .map_err(|e| DlmsError::Security(format!("stream decrypt failed: {}", e)))?;
    if plain.is_empty() {
        return Err(DlmsError::Decoding("ciphered APDU was empty".to_string()));
    }
    Ok(plain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosem_security::SystemTitle;

    fn pair() -> (CipherContext, CipherContext) {
        let mut client = CipherContext::new(
            &[0x22u8; 16],
            &[0x11u8; 16],
            SystemTitle::new(*b"CLIENT01"),
        )
        .unwrap();
        let mut server = CipherContext::new(
            &[0x22u8; 16],
            &[0x11u8; 16],
            SystemTitle::new(*b"SERVER01"),
        )
        .unwrap();
        client.setup(server.client_title(), None);
        server.setup(client.client_title(), None);
        (client, server)
    }

    #[test]
    fn test_tag_mapping() {
        assert_eq!(
            ciphered_request_tag(tags::GET_REQUEST, CipherKind::Global).unwrap(),
            0xC8
        );
        assert_eq!(
            ciphered_request_tag(tags::GET_REQUEST, CipherKind::Dedicated).unwrap(),
            0xD0
        );
        assert_eq!(
            ciphered_request_tag(tags::ACTION_REQUEST, CipherKind::Global).unwrap(),
            0xCB
        );
        assert!(ciphered_request_tag(tags::GET_RESPONSE, CipherKind::Global).is_err());
        assert_eq!(
            recognize_ciphered_response(0xCC),
            Some(CipherKind::Global)
        );
        assert_eq!(
            recognize_ciphered_response(0xD4),
            Some(CipherKind::Dedicated)
        );
        assert_eq!(recognize_ciphered_response(0xC4), None);
    }

    #[test]
    fn test_wrap_layout() {
        let (mut client, _server) = pair();
        let request = [0xC0u8, 0x01, 0xC1, 0x00, 0x03];
        let wrapped = wrap_request(&mut client, CipherKind::Global, 0x30, &request).unwrap();
        assert_eq!(wrapped[0], tags::GLO_GET_REQUEST);
        // len = SC + FC + ciphertext + tag
        assert_eq!(wrapped[1] as usize, 1 + 4 + request.len() + 12);
        assert_eq!(wrapped[2], 0x30);
        assert_eq!(&wrapped[3..7], &0u32.to_be_bytes());
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        // The server unwraps with its own context: the client's title is its
        // stored peer title, so a mirrored context pair models both ends.
        let (mut client, server) = pair();
        for sc in [0x10u8, 0x20, 0x30] {
            let request = [0xC0u8, 0x01, 0x41, 0x00, 0x03, 0x01, 0x00, 0x01, 0x08, 0x00, 0xFF];
            let wrapped = wrap_request(&mut client, CipherKind::Global, sc, &request).unwrap();
            let opened = unwrap_response(&server, &wrapped).unwrap();
            assert_eq!(opened, request, "mode 0x{:02X}", sc);
        }
        // Frame counter advanced once per wrap.
        assert_eq!(client.frame_counter(), 3);
    }

    #[test]
    fn test_unwrap_rejects_tampering() {
        let (mut client, server) = pair();
        let wrapped = wrap_request(&mut client, CipherKind::Global, 0x30, &[0xC0, 0x01]).unwrap();
        let mut bad = wrapped.clone();
        let last = bad.len() - 1;
        bad[last] ^= 1;
        assert!(unwrap_response(&server, &bad).is_err());
    }
}
