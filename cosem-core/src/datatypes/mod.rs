//! Data types used in DLMS/COSEM exchanges

pub mod access_result;
pub mod bit_string;
pub mod compact_array;
pub mod cosem_date;
pub mod cosem_date_time;
pub mod cosem_time;
pub mod data_object;

pub use access_result::DataAccessResult;
pub use bit_string::BitString;
pub use compact_array::{CompactArray, CompactArrayType};
pub use cosem_date::CosemDate;
pub use cosem_date_time::{ClockStatus, CosemDateTime, DEVIATION_NOT_SPECIFIED};
pub use cosem_time::CosemTime;
pub use data_object::{DataObject, DataObjectType};
