//! xDLMS application layer for the cosem_rs DLMS/COSEM client stack
//!
//! PDU codecs, ACSE association assembly and parsing, the GLO/DED ciphering
//! wrapper and the V.44 dictionary compressor.

pub mod association;
pub mod encrypted;
pub mod pdu;
pub mod service;
pub mod v44;

pub use association::{build_aarq, build_rlrq, Aare, AarqParameters, ApplicationContext};
pub use encrypted::{
    ciphered_request_tag, recognize_ciphered_response, unwrap_response, wrap_request, CipherKind,
};
pub use pdu::{
    tags, Conformance, CosemAttribute, InitiateRequest, InitiateResponse, InvokeIdAndPriority,
    SelectiveAccess, SnItem, INVOKE_CONFIRMED, INVOKE_HIGH_PRIORITY,
};
