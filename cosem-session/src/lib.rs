//! Session layers for the cosem_rs DLMS/COSEM client stack
//!
//! Two `SessionLayer` implementations carry xDLMS APDUs: the HDLC MAC for
//! serial-like byte channels and the 8-byte wrapper framing for TCP.

pub mod hdlc;
pub mod layer;
pub mod wrapper;

pub use hdlc::{HdlcAddress, HdlcConnection, HdlcSettings};
pub use layer::SessionLayer;
pub use wrapper::{WrapperHeader, WrapperSession, WRAPPER_HEADER_LENGTH};
