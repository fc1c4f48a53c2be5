//! Data object tree exchanged with the meter

use crate::datatypes::access_result::DataAccessResult;
use crate::datatypes::bit_string::BitString;
use crate::datatypes::compact_array::CompactArray;
use crate::datatypes::cosem_date::CosemDate;
use crate::datatypes::cosem_date_time::CosemDateTime;
use crate::datatypes::cosem_time::CosemTime;
use crate::error::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Container holding one value sent to or received from the meter
///
/// The variants mirror the A-XDR tag set. `Error` never appears on the wire;
/// the service engine substitutes it for items the meter rejected so partial
/// success stays visible in per-item result vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataObject {
    Null,
    Boolean(bool),
    Integer8(i8),
    Integer16(i16),
    Integer32(i32),
    Integer64(i64),
    Unsigned8(u8),
    Unsigned16(u16),
    Unsigned32(u32),
    Unsigned64(u64),
    Float32(f32),
    Float64(f64),
    Enumerate(u8),
    /// Packed sign-magnitude BCD digit pair
    Bcd(i8),
    OctetString(#[serde(with = "serde_bytes")] Vec<u8>),
    VisibleString(#[serde(with = "serde_bytes")] Vec<u8>),
    Utf8String(String),
    BitString(BitString),
    Array(Vec<DataObject>),
    Structure(Vec<DataObject>),
    CompactArray(CompactArray),
    Date(CosemDate),
    Time(CosemTime),
    DateTime(CosemDateTime),
    DontCare,
    /// Synthetic per-item failure marker; not an A-XDR encoding
    Error(DataAccessResult),
}

/// Type discriminator for `DataObject`, named after the DLMS tag table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataObjectType {
    NullData,
    Array,
    Structure,
    Boolean,
    BitString,
    DoubleLong,
    DoubleLongUnsigned,
    OctetString,
    VisibleString,
    Utf8String,
    Bcd,
    Integer,
    LongInteger,
    Unsigned,
    LongUnsigned,
    CompactArray,
    Long64,
    Long64Unsigned,
    Enumerate,
    Float32,
    Float64,
    DateTime,
    Date,
    Time,
    DontCare,
    Error,
}

impl DataObjectType {
    pub fn is_number(&self) -> bool {
        matches!(
            self,
            DataObjectType::DoubleLong
                | DataObjectType::DoubleLongUnsigned
                | DataObjectType::Integer
                | DataObjectType::LongInteger
                | DataObjectType::Unsigned
                | DataObjectType::LongUnsigned
                | DataObjectType::Long64
                | DataObjectType::Long64Unsigned
                | DataObjectType::Enumerate
                | DataObjectType::Bcd
                | DataObjectType::Float32
                | DataObjectType::Float64
        )
    }
}

impl DataObject {
    /// Get the type of this DataObject
    pub fn get_type(&self) -> DataObjectType {
        match self {
            DataObject::Null => DataObjectType::NullData,
            DataObject::Boolean(_) => DataObjectType::Boolean,
            DataObject::Integer8(_) => DataObjectType::Integer,
            DataObject::Integer16(_) => DataObjectType::LongInteger,
            DataObject::Integer32(_) => DataObjectType::DoubleLong,
            DataObject::Integer64(_) => DataObjectType::Long64,
            DataObject::Unsigned8(_) => DataObjectType::Unsigned,
            DataObject::Unsigned16(_) => DataObjectType::LongUnsigned,
            DataObject::Unsigned32(_) => DataObjectType::DoubleLongUnsigned,
            DataObject::Unsigned64(_) => DataObjectType::Long64Unsigned,
            DataObject::Float32(_) => DataObjectType::Float32,
            DataObject::Float64(_) => DataObjectType::Float64,
            DataObject::Enumerate(_) => DataObjectType::Enumerate,
            DataObject::Bcd(_) => DataObjectType::Bcd,
            DataObject::OctetString(_) => DataObjectType::OctetString,
            DataObject::VisibleString(_) => DataObjectType::VisibleString,
            DataObject::Utf8String(_) => DataObjectType::Utf8String,
            DataObject::BitString(_) => DataObjectType::BitString,
            DataObject::Array(_) => DataObjectType::Array,
            DataObject::Structure(_) => DataObjectType::Structure,
            DataObject::CompactArray(_) => DataObjectType::CompactArray,
            DataObject::Date(_) => DataObjectType::Date,
            DataObject::Time(_) => DataObjectType::Time,
            DataObject::DateTime(_) => DataObjectType::DateTime,
            DataObject::DontCare => DataObjectType::DontCare,
            DataObject::Error(_) => DataObjectType::Error,
        }
    }

    /// Constructs an array, verifying all elements share one type
    pub fn new_array(array: Vec<DataObject>) -> DlmsResult<Self> {
        if let Some(first) = array.first() {
            let array_type = first.get_type();
            for (index, sub) in array.iter().enumerate() {
                if sub.get_type() != array_type {
                    return Err(DlmsError::InvalidData(format!(
                        "array is of type {:?}, but element at {} is of type {:?}",
                        array_type,
                        index,
                        sub.get_type()
                    )));
                }
            }
        }
        Ok(DataObject::Array(array))
    }

    pub fn is_number(&self) -> bool {
        self.get_type().is_number()
    }

    pub fn is_complex(&self) -> bool {
        matches!(
            self,
            DataObject::Array(_) | DataObject::Structure(_) | DataObject::CompactArray(_)
        )
    }

    pub fn is_byte_array(&self) -> bool {
        matches!(
            self,
            DataObject::OctetString(_) | DataObject::VisibleString(_) | DataObject::Utf8String(_)
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DataObject::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, DataObject::Error(_))
    }

    pub fn as_bool(&self) -> DlmsResult<bool> {
        match self {
            DataObject::Boolean(b) => Ok(*b),
            _ => Err(self.type_mismatch("Boolean")),
        }
    }

    pub fn as_u8(&self) -> DlmsResult<u8> {
        match self {
            DataObject::Unsigned8(u) | DataObject::Enumerate(u) => Ok(*u),
            _ => Err(self.type_mismatch("Unsigned8")),
        }
    }

    pub fn as_u16(&self) -> DlmsResult<u16> {
        match self {
            DataObject::Unsigned16(u) => Ok(*u),
            _ => Err(self.type_mismatch("Unsigned16")),
        }
    }

    pub fn as_u32(&self) -> DlmsResult<u32> {
        match self {
            DataObject::Unsigned32(u) => Ok(*u),
            _ => Err(self.type_mismatch("Unsigned32")),
        }
    }

    pub fn as_i32(&self) -> DlmsResult<i32> {
        match self {
            DataObject::Integer32(i) => Ok(*i),
            _ => Err(self.type_mismatch("Integer32")),
        }
    }

    pub fn as_octet_string(&self) -> DlmsResult<&[u8]> {
        match self {
            DataObject::OctetString(s) => Ok(s),
            _ => Err(self.type_mismatch("OctetString")),
        }
    }

    pub fn as_array(&self) -> DlmsResult<&[DataObject]> {
        match self {
            DataObject::Array(a) => Ok(a),
            _ => Err(self.type_mismatch("Array")),
        }
    }

    pub fn as_structure(&self) -> DlmsResult<&[DataObject]> {
        match self {
            DataObject::Structure(s) => Ok(s),
            _ => Err(self.type_mismatch("Structure")),
        }
    }

    /// The access result this value carries, `Success` for real data
    pub fn access_result(&self) -> DataAccessResult {
        match self {
            DataObject::Error(kind) => *kind,
            _ => DataAccessResult::Success,
        }
    }

    fn type_mismatch(&self, expected: &str) -> DlmsError {
        DlmsError::InvalidData(format!(
            "expected {}, got {:?}",
            expected,
            self.get_type()
        ))
    }
}

impl fmt::Display for DataObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataObject::Null => write!(f, "NULL_DATA"),
            DataObject::Boolean(b) => write!(f, "BOOLEAN: {}", b),
            DataObject::Integer8(i) => write!(f, "INTEGER: {}", i),
            DataObject::Integer16(i) => write!(f, "LONG_INTEGER: {}", i),
            DataObject::Integer32(i) => write!(f, "DOUBLE_LONG: {}", i),
            DataObject::Integer64(i) => write!(f, "LONG64: {}", i),
            DataObject::Unsigned8(u) => write!(f, "UNSIGNED: {}", u),
            DataObject::Unsigned16(u) => write!(f, "LONG_UNSIGNED: {}", u),
            DataObject::Unsigned32(u) => write!(f, "DOUBLE_LONG_UNSIGNED: {}", u),
            DataObject::Unsigned64(u) => write!(f, "LONG64_UNSIGNED: {}", u),
            DataObject::Float32(fl) => write!(f, "FLOAT32: {}", fl),
            DataObject::Float64(fl) => write!(f, "FLOAT64: {}", fl),
            DataObject::Enumerate(e) => write!(f, "ENUMERATE: {}", e),
            DataObject::Bcd(b) => write!(f, "BCD: {}", b),
            DataObject::OctetString(s) => {
                write!(f, "OCTET_STRING:")?;
                for byte in s {
                    write!(f, " {:02X}", byte)?;
                }
                Ok(())
            }
            DataObject::VisibleString(s) => {
                write!(f, "VISIBLE_STRING: {}", String::from_utf8_lossy(s))
            }
            DataObject::Utf8String(s) => write!(f, "UTF8_STRING: {}", s),
            DataObject::BitString(bs) => write!(f, "BIT_STRING: {}", bs),
            DataObject::Array(arr) => {
                write!(f, "ARRAY: {} element(s)", arr.len())?;
                for (i, elem) in arr.iter().enumerate() {
                    write!(f, "\n  [{}]: {}", i, elem)?;
                }
                Ok(())
            }
            DataObject::Structure(s) => {
                write!(f, "STRUCTURE: {} element(s)", s.len())?;
                for (i, elem) in s.iter().enumerate() {
                    write!(f, "\n  [{}]: {}", i, elem)?;
                }
                Ok(())
            }
            DataObject::CompactArray(ca) => write!(f, "{}", ca),
            DataObject::Date(d) => write!(f, "DATE: {}", d),
            DataObject::Time(t) => write!(f, "TIME: {}", t),
            DataObject::DateTime(dt) => write!(f, "DATE_TIME: {}", dt),
            DataObject::DontCare => write!(f, "DONT_CARE"),
            DataObject::Error(kind) => write!(f, "ERROR: {}", kind),
        }
    }
}
