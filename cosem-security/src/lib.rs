//! Security layer for the cosem_rs DLMS/COSEM client stack
//!
//! AES-GCM ciphering with the DLMS security-control semantics, the cipher
//! context owning key material and the frame counter, and the HLS
//! challenge-response helpers.

pub mod cipher;
pub mod gcm;
pub mod hls;

pub use cipher::{CipherContext, HashDirection, SystemTitle};
pub use gcm::{
    build_iv, security_mode, GcmEngine, GcmStreamReader, GCM_IV_LENGTH, GCM_TAG_LENGTH,
    SC_AUTHENTICATED, SC_BROADCAST_KEY, SC_COMPRESSION, SC_ENCRYPTED,
};
pub use hls::{challenge_digest, generate_challenge, AuthenticationMechanism};
