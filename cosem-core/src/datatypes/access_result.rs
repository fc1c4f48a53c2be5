//! Data access result codes shared by GET/SET/ACTION/READ/WRITE responses

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result code attached to a single requested item
///
/// The code points follow IEC 62056-5-3; anything the peer sends outside the
/// known set collapses to `OtherReason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataAccessResult {
    Success = 0,
    HardwareFault = 1,
    TemporaryFailure = 2,
    ReadWriteDenied = 3,
    ObjectUndefined = 4,
    ObjectClassInconsistent = 9,
    ObjectUnavailable = 11,
    TypeUnmatched = 12,
    ScopeOfAccessViolated = 13,
    DataBlockUnavailable = 14,
    LongGetAborted = 15,
    NoLongGetInProgress = 16,
    LongSetAborted = 17,
    NoLongSetInProgress = 18,
    DataBlockNumberInvalid = 19,
    OtherReason = 250,
}

impl DataAccessResult {
    /// Map a wire byte to a result code
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => DataAccessResult::Success,
            1 => DataAccessResult::HardwareFault,
            2 => DataAccessResult::TemporaryFailure,
            3 => DataAccessResult::ReadWriteDenied,
            4 => DataAccessResult::ObjectUndefined,
            9 => DataAccessResult::ObjectClassInconsistent,
            11 => DataAccessResult::ObjectUnavailable,
            12 => DataAccessResult::TypeUnmatched,
            13 => DataAccessResult::ScopeOfAccessViolated,
            14 => DataAccessResult::DataBlockUnavailable,
            15 => DataAccessResult::LongGetAborted,
            16 => DataAccessResult::NoLongGetInProgress,
            17 => DataAccessResult::LongSetAborted,
            18 => DataAccessResult::NoLongSetInProgress,
            19 => DataAccessResult::DataBlockNumberInvalid,
            _ => DataAccessResult::OtherReason,
        }
    }

    /// Wire byte for this result code
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        self == DataAccessResult::Success
    }
}

impl fmt::Display for DataAccessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataAccessResult::Success => write!(f, "success"),
            DataAccessResult::HardwareFault => write!(f, "hardware-fault"),
            DataAccessResult::TemporaryFailure => write!(f, "temporary-failure"),
            DataAccessResult::ReadWriteDenied => write!(f, "read-write-denied"),
            DataAccessResult::ObjectUndefined => write!(f, "object-undefined"),
            DataAccessResult::ObjectClassInconsistent => write!(f, "object-class-inconsistent"),
            DataAccessResult::ObjectUnavailable => write!(f, "object-unavailable"),
            DataAccessResult::TypeUnmatched => write!(f, "type-unmatched"),
            DataAccessResult::ScopeOfAccessViolated => write!(f, "scope-of-access-violated"),
            DataAccessResult::DataBlockUnavailable => write!(f, "data-block-unavailable"),
            DataAccessResult::LongGetAborted => write!(f, "long-get-aborted"),
            DataAccessResult::NoLongGetInProgress => write!(f, "no-long-get-in-progress"),
            DataAccessResult::LongSetAborted => write!(f, "long-set-aborted"),
            DataAccessResult::NoLongSetInProgress => write!(f, "no-long-set-in-progress"),
            DataAccessResult::DataBlockNumberInvalid => write!(f, "data-block-number-invalid"),
            DataAccessResult::OtherReason => write!(f, "other-reason"),
        }
    }
}
