//! Typed binding of decoded values into caller records
//!
//! `FromDataObject` maps a decoded `DataObject` tree onto a target shape:
//! primitives convert with range checks from any numeric variant, structures
//! map positionally onto tuples, `Option` absorbs Null, and a few special
//! targets (wall time, OBIS code, raw value) convert directly.

use chrono::{DateTime, FixedOffset};
use cosem_core::datatypes::{BitString, CosemDateTime, DataObject};
use cosem_core::error::{DlmsError, DlmsResult};
use cosem_core::obis_code::ObisCode;

/// Conversion from a decoded `DataObject` into a concrete Rust value
pub trait FromDataObject: Sized {
    fn from_data_object(obj: &DataObject) -> DlmsResult<Self>;
}

/// Bind one decoded value into a target type
pub fn bind<T: FromDataObject>(obj: &DataObject) -> DlmsResult<T> {
    T::from_data_object(obj)
}

fn mismatch(expected: &str, obj: &DataObject) -> DlmsError {
    DlmsError::InvalidData(format!("cannot bind {:?} into {}", obj.get_type(), expected))
}

fn as_i128(obj: &DataObject) -> Option<i128> {
    match obj {
        DataObject::Integer8(v) => Some(*v as i128),
        DataObject::Integer16(v) => Some(*v as i128),
        DataObject::Integer32(v) => Some(*v as i128),
        DataObject::Integer64(v) => Some(*v as i128),
        DataObject::Unsigned8(v) => Some(*v as i128),
        DataObject::Unsigned16(v) => Some(*v as i128),
        DataObject::Unsigned32(v) => Some(*v as i128),
        DataObject::Unsigned64(v) => Some(*v as i128),
        DataObject::Enumerate(v) => Some(*v as i128),
        DataObject::Bcd(v) => Some(*v as i128),
        _ => None,
    }
}

macro_rules! impl_from_data_object_int {
    ($($ty:ty),*) => {
        $(impl FromDataObject for $ty {
            fn from_data_object(obj: &DataObject) -> DlmsResult<Self> {
                let wide = as_i128(obj).ok_or_else(|| mismatch(stringify!($ty), obj))?;
                <$ty>::try_from(wide).map_err(|_| {
                    DlmsError::InvalidData(format!(
                        "value {} does not fit into {}",
                        wide,
                        stringify!($ty)
                    ))
                })
            }
        })*
    };
}

impl_from_data_object_int!(i8, i16, i32, i64, u8, u16, u32, u64);

impl FromDataObject for bool {
    fn from_data_object(obj: &DataObject) -> DlmsResult<Self> {
        match obj {
            DataObject::Boolean(b) => Ok(*b),
            _ => Err(mismatch("bool", obj)),
        }
    }
}

impl FromDataObject for f32 {
    fn from_data_object(obj: &DataObject) -> DlmsResult<Self> {
        match obj {
            DataObject::Float32(f) => Ok(*f),
            other => as_i128(other)
                .map(|v| v as f32)
                .ok_or_else(|| mismatch("f32", obj)),
        }
    }
}

impl FromDataObject for f64 {
    fn from_data_object(obj: &DataObject) -> DlmsResult<Self> {
        match obj {
            DataObject::Float32(f) => Ok(*f as f64),
            DataObject::Float64(f) => Ok(*f),
            other => as_i128(other)
                .map(|v| v as f64)
                .ok_or_else(|| mismatch("f64", obj)),
        }
    }
}

impl FromDataObject for String {
    fn from_data_object(obj: &DataObject) -> DlmsResult<Self> {
        match obj {
            DataObject::Utf8String(s) => Ok(s.clone()),
            DataObject::VisibleString(s) => String::from_utf8(s.clone())
                .map_err(|e| DlmsError::InvalidData(format!("invalid visible string: {}", e))),
            _ => Err(mismatch("String", obj)),
        }
    }
}

impl FromDataObject for Vec<u8> {
    fn from_data_object(obj: &DataObject) -> DlmsResult<Self> {
        match obj {
            DataObject::OctetString(s) | DataObject::VisibleString(s) => Ok(s.clone()),
            DataObject::Utf8String(s) => Ok(s.clone().into_bytes()),
            _ => Err(mismatch("Vec<u8>", obj)),
        }
    }
}

impl FromDataObject for BitString {
    fn from_data_object(obj: &DataObject) -> DlmsResult<Self> {
        match obj {
            DataObject::BitString(bs) => Ok(bs.clone()),
            _ => Err(mismatch("BitString", obj)),
        }
    }
}

impl<T: FromDataObject> FromDataObject for Vec<T> {
    fn from_data_object(obj: &DataObject) -> DlmsResult<Self> {
        match obj {
            DataObject::Array(items) | DataObject::Structure(items) => {
                items.iter().map(T::from_data_object).collect()
            }
            DataObject::CompactArray(ca) => ca.items().iter().map(T::from_data_object).collect(),
            _ => Err(mismatch("sequence", obj)),
        }
    }
}

impl<T: FromDataObject> FromDataObject for Option<T> {
    fn from_data_object(obj: &DataObject) -> DlmsResult<Self> {
        match obj {
            DataObject::Null => Ok(None),
            other => T::from_data_object(other).map(Some),
        }
    }
}

impl FromDataObject for DataObject {
    fn from_data_object(obj: &DataObject) -> DlmsResult<Self> {
        Ok(obj.clone())
    }
}

impl FromDataObject for CosemDateTime {
    fn from_data_object(obj: &DataObject) -> DlmsResult<Self> {
        match obj {
            DataObject::DateTime(dt) => Ok(*dt),
            DataObject::OctetString(bytes) => CosemDateTime::decode(bytes),
            _ => Err(mismatch("CosemDateTime", obj)),
        }
    }
}

impl FromDataObject for DateTime<FixedOffset> {
    fn from_data_object(obj: &DataObject) -> DlmsResult<Self> {
        CosemDateTime::from_data_object(obj)?.to_date_time()
    }
}

impl FromDataObject for ObisCode {
    fn from_data_object(obj: &DataObject) -> DlmsResult<Self> {
        match obj {
            DataObject::OctetString(bytes) => ObisCode::from_bytes(bytes),
            _ => Err(mismatch("ObisCode", obj)),
        }
    }
}

macro_rules! impl_from_data_object_tuple {
    ($($name:ident : $idx:tt),+ ; $arity:expr) => {
        impl<$($name: FromDataObject),+> FromDataObject for ($($name,)+) {
            fn from_data_object(obj: &DataObject) -> DlmsResult<Self> {
                let fields = obj.as_structure()?;
                if fields.len() != $arity {
                    return Err(DlmsError::InvalidData(format!(
                        "structure has {} fields, target record expects {}",
                        fields.len(),
                        $arity
                    )));
                }
                Ok(($($name::from_data_object(&fields[$idx])?,)+))
            }
        }
    };
}

impl_from_data_object_tuple!(A: 0; 1);
impl_from_data_object_tuple!(A: 0, B: 1; 2);
impl_from_data_object_tuple!(A: 0, B: 1, C: 2; 3);
impl_from_data_object_tuple!(A: 0, B: 1, C: 2, D: 3; 4);
impl_from_data_object_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4; 5);
impl_from_data_object_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5; 6);
impl_from_data_object_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6; 7);
impl_from_data_object_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7; 8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_integers_with_range_check() {
        assert_eq!(bind::<u16>(&DataObject::Unsigned8(42)).unwrap(), 42u16);
        assert_eq!(bind::<i64>(&DataObject::Integer32(-5)).unwrap(), -5i64);
        assert!(bind::<u8>(&DataObject::Unsigned16(256)).is_err());
        assert!(bind::<u32>(&DataObject::Integer8(-1)).is_err());
    }

    #[test]
    fn test_bind_structure_into_tuple() {
        let obj = DataObject::Structure(vec![
            DataObject::Unsigned16(7),
            DataObject::VisibleString(b"kWh".to_vec()),
            DataObject::Null,
        ]);
        let (scale, unit, extra): (u16, String, Option<u8>) = bind(&obj).unwrap();
        assert_eq!(scale, 7);
        assert_eq!(unit, "kWh");
        assert_eq!(extra, None);
    }

    #[test]
    fn test_bind_tuple_arity_mismatch() {
        let obj = DataObject::Structure(vec![DataObject::Unsigned16(7)]);
        assert!(bind::<(u16, u16)>(&obj).is_err());
    }

    #[test]
    fn test_bind_sequences() {
        let obj = DataObject::new_array(vec![
            DataObject::Unsigned8(1),
            DataObject::Unsigned8(2),
            DataObject::Unsigned8(3),
        ])
        .unwrap();
        assert_eq!(bind::<Vec<u8>>(&DataObject::OctetString(vec![9, 8])).unwrap(), vec![9, 8]);
        assert_eq!(bind::<Vec<u16>>(&obj).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_bind_obis_from_octets() {
        let obj = DataObject::OctetString(vec![1, 0, 1, 8, 0, 255]);
        assert_eq!(
            bind::<ObisCode>(&obj).unwrap(),
            ObisCode::new(1, 0, 1, 8, 0, 255)
        );
        assert!(bind::<ObisCode>(&DataObject::OctetString(vec![1, 2])).is_err());
    }

    #[test]
    fn test_bind_wall_time() {
        let dt = CosemDateTime::new(2024, 3, 1, 12, 0, 30, 0, &[]).unwrap();
        let bytes = dt.encode().to_vec();
        let wall: DateTime<FixedOffset> = bind(&DataObject::OctetString(bytes)).unwrap();
        assert_eq!(wall.to_rfc3339(), "2024-03-01T12:00:30+00:00");

        let unspecified = CosemDateTime::from_parts(
            cosem_core::CosemDate::new(0xFFFF, 0xFF, 0xFF).unwrap(),
            cosem_core::CosemTime::new(0xFF, 0xFF, 0xFF).unwrap(),
            cosem_core::datatypes::DEVIATION_NOT_SPECIFIED,
            0,
        )
        .unwrap();
        assert!(bind::<DateTime<FixedOffset>>(&DataObject::DateTime(unspecified)).is_err());
    }
}
