//! High-level-security challenge processing

use cosem_core::error::{DlmsError, DlmsResult};
use md5::{Digest, Md5};
use rand::RngCore;
use sha1::Sha1;
use sha2::Sha256;

/// Authentication mechanism ids carried in the AARQ mechanism name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationMechanism {
    None = 0,
    Low = 1,
    HighMd5 = 3,
    HighSha1 = 4,
    HighGmac = 5,
    HighSha256 = 6,
    HighEcdsa = 7,
}

impl AuthenticationMechanism {
    pub fn from_u8(value: u8) -> DlmsResult<Self> {
        match value {
            0 => Ok(AuthenticationMechanism::None),
            1 => Ok(AuthenticationMechanism::Low),
            3 => Ok(AuthenticationMechanism::HighMd5),
            4 => Ok(AuthenticationMechanism::HighSha1),
            5 => Ok(AuthenticationMechanism::HighGmac),
            6 => Ok(AuthenticationMechanism::HighSha256),
            7 => Ok(AuthenticationMechanism::HighEcdsa),
            other => Err(DlmsError::Security(format!(
                "unknown authentication mechanism id: {}",
                other
            ))),
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// High-level mechanisms run the post-associate challenge exchange
    pub fn is_high_level(self) -> bool {
        !matches!(
            self,
            AuthenticationMechanism::None | AuthenticationMechanism::Low
        )
    }
}

/// Digest of a peer challenge under the shared secret
///
/// MD5, SHA-1 and SHA-256 hash the challenge followed by the secret. GMAC is
/// computed by the cipher context instead, and the ECDSA signing flow is not
/// supported by this client.
pub fn challenge_digest(
    mechanism: AuthenticationMechanism,
    secret: &[u8],
    challenge: &[u8],
) -> DlmsResult<Vec<u8>> {
    match mechanism {
        AuthenticationMechanism::HighMd5 => {
            let mut hasher = Md5::new();
            hasher.update(challenge);
            hasher.update(secret);
            Ok(hasher.finalize().to_vec())
        }
        AuthenticationMechanism::HighSha1 => {
            let mut hasher = Sha1::new();
            hasher.update(challenge);
            hasher.update(secret);
            Ok(hasher.finalize().to_vec())
        }
        AuthenticationMechanism::HighSha256 => {
            let mut hasher = Sha256::new();
            hasher.update(challenge);
            hasher.update(secret);
            Ok(hasher.finalize().to_vec())
        }
        AuthenticationMechanism::HighGmac => Err(DlmsError::Security(
            "GMAC proofs are produced by the cipher context".to_string(),
        )),
        AuthenticationMechanism::HighEcdsa => Err(DlmsError::Security(
            "unsupported mechanism: ECDSA signing is not implemented".to_string(),
        )),
        AuthenticationMechanism::None | AuthenticationMechanism::Low => Err(DlmsError::Security(
            "mechanism has no challenge exchange".to_string(),
        )),
    }
}

/// Random client-to-server challenge, 8..=64 bytes
pub fn generate_challenge(length: usize) -> DlmsResult<Vec<u8>> {
    if !(8..=64).contains(&length) {
        return Err(DlmsError::Security(format!(
            "challenge length must be within 8..=64, got {}",
            length
        )));
    }
    let mut challenge = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut challenge);
    Ok(challenge)
}
