//! DLMS/COSEM client for the cosem_rs stack
//!
//! `DlmsClient` drives a session over any `SessionLayer`: association,
//! GET/SET/ACTION with list and block transfer, SN READ/WRITE, streaming
//! reads and the HLS challenge exchange.

pub mod client;
pub mod data_stream;
pub mod settings;

pub use client::{ClientState, DlmsClient};
pub use data_stream::DataStream;
pub use settings::{ClientSettings, SecuritySettings};
