//! Client session settings

use cosem_application::{ApplicationContext, Conformance};
use cosem_security::AuthenticationMechanism;

/// Ciphering configuration for an association
#[derive(Debug, Clone)]
pub struct SecuritySettings {
    /// Security-control byte applied to ciphered APDUs (auth 0x10, enc 0x20,
    /// low nibble selects the suite)
    pub security_control: u8,
    /// Our 8-byte system title
    pub client_system_title: [u8; 8],
    /// Global unicast encryption key
    pub encryption_key: Vec<u8>,
    /// Authentication key prefixed into the AAD
    pub authentication_key: Vec<u8>,
    /// Optional dedicated session key; enables the DED tag variants
    pub dedicated_key: Option<Vec<u8>>,
}

/// Settings surface of a client session
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub application_context: ApplicationContext,
    pub authentication_mechanism: AuthenticationMechanism,
    /// Proposed conformance block
    pub conformance_block: u32,
    /// Largest APDU we are willing to receive
    pub max_pdu_recv_size: u16,
    /// Virtual-association address before the server reports its own
    pub va_address: i16,
    /// OR the high-priority bit into every invoke byte
    pub high_priority: bool,
    /// OR the confirmed bit into every invoke byte
    pub confirmed_requests: bool,
    /// Send the two-byte RLRQ form on close
    pub empty_rlrq: bool,
    /// Leave the InitiateRequest unciphered even in a ciphered context
    pub dont_encrypt_user_information: bool,
    /// CallingAEInvocationID
    pub user_id: Option<u8>,
    /// Low-authentication password, HLS secret, or explicit CtoS; an empty
    /// value makes HLS mechanisms draw a random challenge
    pub password: Vec<u8>,
    pub security: Option<SecuritySettings>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            application_context: ApplicationContext::LogicalName,
            authentication_mechanism: AuthenticationMechanism::None,
            conformance_block: Conformance::DEFAULT_LN,
            max_pdu_recv_size: 0x04B0,
            va_address: 0x0007,
            high_priority: true,
            confirmed_requests: true,
            empty_rlrq: false,
            dont_encrypt_user_information: false,
            user_id: None,
            password: Vec::new(),
            security: None,
        }
    }
}

impl ClientSettings {
    /// Settings for a low-authentication logical-name association
    pub fn with_low_authentication(password: &[u8]) -> Self {
        Self {
            authentication_mechanism: AuthenticationMechanism::Low,
            password: password.to_vec(),
            ..Self::default()
        }
    }
}
