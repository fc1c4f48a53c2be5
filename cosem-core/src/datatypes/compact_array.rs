//! Compact array type for DLMS/COSEM data

use crate::error::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type descriptor of a compact array
///
/// Either one inner tag shared by every element, or a positional tag list
/// when the elements are structures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompactArrayType {
    /// All elements carry this A-XDR tag
    Simple(u8),
    /// Elements are structures whose fields carry these A-XDR tags in order
    Structure(Vec<u8>),
}

impl CompactArrayType {
    /// The wire tag announcing the element type
    pub fn content_tag(&self) -> u8 {
        match self {
            CompactArrayType::Simple(tag) => *tag,
            CompactArrayType::Structure(_) => 0x02,
        }
    }
}

/// A COSEM compact array: shared element type plus tagless item payloads
///
/// Items are stored decoded; the per-item wire payloads (encoded without a
/// leading tag) are reproduced by the A-XDR codec from the descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactArray {
    element_type: CompactArrayType,
    items: Vec<super::data_object::DataObject>,
}

impl CompactArray {
    pub fn new(
        element_type: CompactArrayType,
        items: Vec<super::data_object::DataObject>,
    ) -> DlmsResult<Self> {
        if let CompactArrayType::Structure(tags) = &element_type {
            if tags.is_empty() {
                return Err(DlmsError::InvalidData(
                    "compact array structure descriptor must list at least one tag".to_string(),
                ));
            }
        }
        Ok(Self {
            element_type,
            items,
        })
    }

    pub fn element_type(&self) -> &CompactArrayType {
        &self.element_type
    }

    pub fn items(&self) -> &[super::data_object::DataObject] {
        &self.items
    }

    pub fn into_items(self) -> Vec<super::data_object::DataObject> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl fmt::Display for CompactArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "COMPACT_ARRAY(tag=0x{:02X}, {} element(s))",
            self.element_type.content_tag(),
            self.items.len()
        )
    }
}
