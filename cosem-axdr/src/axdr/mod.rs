//! A-XDR encoding/decoding module

pub mod decoder;
pub mod encoder;
pub mod stream;
pub mod types;

pub use decoder::{decode, AxdrDecoder};
pub use encoder::{encode, AxdrEncoder};
pub use stream::{AxdrStreamReader, ContainerType, StreamElement, StreamStep};
pub use types::{AxdrTag, LengthEncoding};
