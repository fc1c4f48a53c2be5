//! A-XDR processing for the cosem_rs DLMS/COSEM client stack
//!
//! Provides the tagged value codec, BER-style length coding, an incremental
//! element reader for block-transferred payloads, and the typed binding layer
//! that maps decoded values onto caller records.

pub mod axdr;
pub mod convert;

pub use axdr::{
    decode, encode, AxdrDecoder, AxdrEncoder, AxdrStreamReader, AxdrTag, ContainerType,
    LengthEncoding, StreamElement, StreamStep,
};
pub use convert::{bind, FromDataObject};
