//! Core types and utilities for the cosem_rs DLMS/COSEM client stack
//!
//! This crate provides the fundamental value types, error handling and OBIS
//! identifiers used by every other layer.

pub mod datatypes;
pub mod error;
pub mod obis_code;

pub use datatypes::{
    BitString, ClockStatus, CompactArray, CompactArrayType, CosemDate, CosemDateTime, CosemTime,
    DataAccessResult, DataObject, DataObjectType,
};
pub use error::{DlmsError, DlmsResult};
pub use obis_code::ObisCode;
