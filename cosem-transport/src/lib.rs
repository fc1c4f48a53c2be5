//! Transport layer for the cosem_rs DLMS/COSEM client stack
//!
//! The session layers run over any `StreamAccessor`; this crate provides the
//! TCP implementation and an in-process loopback pair used by tests. Serial
//! and modem bridges are external collaborators that plug in through the same
//! trait.

pub mod loopback;
pub mod stream;
pub mod tcp;

pub use loopback::LoopbackStream;
pub use stream::{StreamAccessor, StreamCounters, StreamLimits, StreamState};
pub use tcp::{TcpSettings, TcpTransport};
