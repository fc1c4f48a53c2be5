//! Cipher context: keys, system titles, frame counter

use crate::gcm::{
    build_iv, GcmEngine, GcmStreamReader, GCM_IV_LENGTH, GCM_TAG_LENGTH,
};
use cosem_core::error::{DlmsError, DlmsResult};
use std::fmt;
use std::io::Read;

/// 8-byte device identifier used in IV construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemTitle {
    value: [u8; 8],
}

impl SystemTitle {
    pub fn new(value: [u8; 8]) -> Self {
        Self { value }
    }

    pub fn from_slice(bytes: &[u8]) -> DlmsResult<Self> {
        if bytes.len() != 8 {
            return Err(DlmsError::InvalidData(format!(
                "system title must be 8 bytes, got {}",
                bytes.len()
            )));
        }
        let mut value = [0u8; 8];
        value.copy_from_slice(bytes);
        Ok(Self { value })
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.value
    }
}

impl fmt::Display for SystemTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.value {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// Which party's system title builds the IV of a keyed hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashDirection {
    /// Our proof towards the meter: client system title
    ClientToServer,
    /// The meter's proof towards us: server system title
    ServerToClient,
}

/// One ciphering context: key material, both system titles, and the
/// strictly increasing frame counter
///
/// A session holds up to two of these, the global context and the optional
/// dedicated-key context; they never share a frame counter.
pub struct CipherContext {
    engine: GcmEngine,
    auth_key: Vec<u8>,
    client_title: SystemTitle,
    server_title: Option<SystemTitle>,
    server_challenge: Option<Vec<u8>>,
    frame_counter: u32,
}

impl CipherContext {
    pub fn new(
        encryption_key: &[u8],
        authentication_key: &[u8],
        client_title: SystemTitle,
    ) -> DlmsResult<Self> {
        if authentication_key.len() != 16 {
            return Err(DlmsError::Security(format!(
                "authentication key must be 16 bytes, got {}",
                authentication_key.len()
            )));
        }
        Ok(Self {
            engine: GcmEngine::new(encryption_key)?,
            auth_key: authentication_key.to_vec(),
            client_title,
            server_title: None,
            server_challenge: None,
            frame_counter: 0,
        })
    }

    /// Record the peer identity and its challenge once the AARE names them
    pub fn setup(&mut self, server_title: SystemTitle, server_challenge: Option<Vec<u8>>) {
        log::debug!("cipher setup: server title {}", server_title);
        self.server_title = Some(server_title);
        if let Some(challenge) = server_challenge {
            self.server_challenge = Some(challenge);
        }
    }

    pub fn is_set_up(&self) -> bool {
        self.server_title.is_some()
    }

    pub fn client_title(&self) -> SystemTitle {
        self.client_title
    }

    pub fn server_title(&self) -> Option<SystemTitle> {
        self.server_title
    }

    pub fn server_challenge(&self) -> Option<&[u8]> {
        self.server_challenge.as_deref()
    }

    /// Current frame counter value, for persistence across reconnects
    pub fn frame_counter(&self) -> u32 {
        self.frame_counter
    }

    /// Restore a persisted frame counter; it may only move forward
    pub fn restore_frame_counter(&mut self, value: u32) -> DlmsResult<()> {
        if value < self.frame_counter {
            return Err(DlmsError::Security(format!(
                "frame counter may not move backwards: {} < {}",
                value, self.frame_counter
            )));
        }
        self.frame_counter = value;
        Ok(())
    }

    /// Take the next frame counter value; strictly increasing per packet
    pub fn take_frame_counter(&mut self) -> DlmsResult<u32> {
        let value = self.frame_counter;
        self.frame_counter = self
            .frame_counter
            .checked_add(1)
            .ok_or_else(|| DlmsError::Security("frame counter exhausted".to_string()))?;
        Ok(value)
    }

    /// Frame length after ciphering
    pub fn encrypt_length(&self, sc: u8, plaintext_len: usize) -> DlmsResult<usize> {
        GcmEngine::ciphered_length(sc, plaintext_len)
    }

    /// Cipher an outgoing APDU under our system title
    pub fn encrypt(&self, sc: u8, frame_counter: u32, plaintext: &[u8]) -> DlmsResult<Vec<u8>> {
        let iv = build_iv(self.client_title.as_bytes(), frame_counter);
        self.engine.encrypt(sc, &self.auth_key, &iv, plaintext)
    }

    /// Decipher an inbound APDU under the server system title
    pub fn decrypt(&self, sc: u8, frame_counter: u32, apdu: &[u8]) -> DlmsResult<Vec<u8>> {
        let iv = self.server_iv(frame_counter)?;
        self.engine.decrypt(sc, &self.auth_key, &iv, apdu)
    }

    /// Streaming decrypt of an inbound APDU body
    pub fn decrypt_stream<R: Read>(
        &self,
        sc: u8,
        frame_counter: u32,
        reader: R,
    ) -> DlmsResult<GcmStreamReader<R>> {
        let iv = self.server_iv(frame_counter)?;
        self.engine.decrypt_stream(sc, &self.auth_key, iv, reader)
    }

    /// Keyed hash over a challenge, 12 bytes
    pub fn hash(
        &self,
        direction: HashDirection,
        sc: u8,
        frame_counter: u32,
        challenge: &[u8],
    ) -> DlmsResult<[u8; GCM_TAG_LENGTH]> {
        let iv = match direction {
            HashDirection::ClientToServer => build_iv(self.client_title.as_bytes(), frame_counter),
            HashDirection::ServerToClient => self.server_iv(frame_counter)?,
        };
        Ok(self.engine.keyed_hash(sc, &self.auth_key, &iv, challenge))
    }

    /// Check the meter's keyed hash over our challenge
    pub fn verify(
        &self,
        sc: u8,
        frame_counter: u32,
        challenge: &[u8],
        tag: &[u8],
    ) -> DlmsResult<bool> {
        let expected = self.hash(HashDirection::ServerToClient, sc, frame_counter, challenge)?;
        Ok(expected[..] == *tag)
    }

    fn server_iv(&self, frame_counter: u32) -> DlmsResult<[u8; GCM_IV_LENGTH]> {
        let title = self.server_title.ok_or_else(|| {
            DlmsError::Security("cipher used before setup: no server system title".to_string())
        })?;
        Ok(build_iv(title.as_bytes(), frame_counter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> CipherContext {
        CipherContext::new(
            &[0x22u8; 16],
            &[0x11u8; 16],
            SystemTitle::new([0x4D, 0x4D, 0x4D, 0x00, 0x00, 0xBC, 0x61, 0x4E]),
        )
        .unwrap()
    }

    #[test]
    fn test_frame_counter_strictly_increases() {
        let mut ctx = context();
        assert_eq!(ctx.take_frame_counter().unwrap(), 0);
        assert_eq!(ctx.take_frame_counter().unwrap(), 1);
        assert_eq!(ctx.frame_counter(), 2);
        assert!(ctx.restore_frame_counter(1).is_err());
        assert!(ctx.restore_frame_counter(100).is_ok());
        assert_eq!(ctx.take_frame_counter().unwrap(), 100);
    }

    #[test]
    fn test_decrypt_requires_setup() {
        let ctx = context();
        assert!(ctx.decrypt(0x30, 1, &[0u8; 20]).is_err());
    }

    #[test]
    fn test_hash_and_verify_against_peer() {
        // Model both parties with mirrored contexts sharing the keys.
        let mut client = context();
        let mut meter = CipherContext::new(
            &[0x22u8; 16],
            &[0x11u8; 16],
            SystemTitle::new([0x53, 0x45, 0x52, 0x56, 0x45, 0x52, 0x30, 0x31]),
        )
        .unwrap();
        client.setup(meter.client_title(), Some(b"StoC5678".to_vec()));
        meter.setup(client.client_title(), Some(b"CtoS1234".to_vec()));

        // The meter proves knowledge of the keys over our challenge CtoS.
        let fc = 5u32;
        let meter_proof = meter
            .hash(HashDirection::ClientToServer, 0x10, fc, b"CtoS1234")
            .unwrap();
        assert!(client.verify(0x10, fc, b"CtoS1234", &meter_proof).unwrap());
        assert!(!client.verify(0x10, fc, b"CtoS1234", &[0u8; 12]).unwrap());
        assert!(!client.verify(0x10, fc + 1, b"CtoS1234", &meter_proof).unwrap());
    }

    #[test]
    fn test_encrypt_decrypt_between_contexts() {
        let mut client = context();
        let mut meter = CipherContext::new(
            &[0x22u8; 16],
            &[0x11u8; 16],
            SystemTitle::new([0x53, 0x45, 0x52, 0x56, 0x45, 0x52, 0x30, 0x31]),
        )
        .unwrap();
        client.setup(meter.client_title(), None);
        meter.setup(client.client_title(), None);

        let fc = client.take_frame_counter().unwrap();
        let request = client.encrypt(0x30, fc, &[0xC0, 0x01, 0xC1]).unwrap();
        // The meter decrypts under the client title, which is its server side.
        let opened = meter.decrypt(0x30, fc, &request).unwrap();
        assert_eq!(opened, vec![0xC0, 0x01, 0xC1]);
    }
}
