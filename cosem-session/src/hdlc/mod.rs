//! HDLC MAC layer

pub mod address;
pub mod connection;
pub mod fcs;
pub mod frame;

pub use address::{reserved, HdlcAddress};
pub use connection::{
    HdlcConnection, HdlcSettings, LinkParameters, DEFAULT_INFORMATION_FIELD_LENGTH,
    MAX_INFORMATION_FIELD_LENGTH,
};
pub use fcs::FcsCalc;
pub use frame::{FrameType, HdlcFrame, FLAG, LLC_REQUEST, LLC_RESPONSE, PF_BIT};
