//! Incremental A-XDR element reader
//!
//! Decodes a value tree as a flat stream of events so large responses can be
//! consumed while block transfer is still fetching the tail. Bytes are fed in
//! as they arrive; `next_element` reports `NeedMore` whenever the next element
//! is not complete yet, rewinding so the caller can append and retry.

use crate::axdr::decoder::AxdrDecoder;
use crate::axdr::types::AxdrTag;
use cosem_core::datatypes::DataObject;
use cosem_core::error::{DlmsError, DlmsResult};
use std::collections::VecDeque;

/// Container kind opening or closing in the element stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerType {
    Array,
    Structure,
}

/// One event in the element stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamElement {
    /// A container opened; the count is its declared element count
    Start(ContainerType, usize),
    /// The matching container closed
    End(ContainerType),
    /// One non-container value
    Data(DataObject),
}

/// Result of a `next_element` call
#[derive(Debug, Clone, PartialEq)]
pub enum StreamStep {
    Element(StreamElement),
    /// The next element is incomplete; feed more bytes and retry
    NeedMore,
    /// The tree is fully consumed
    Eof,
}

#[derive(Debug)]
struct Frame {
    container: ContainerType,
    remaining: usize,
}

/// Streaming A-XDR reader
pub struct AxdrStreamReader {
    buf: Vec<u8>,
    pos: usize,
    stack: Vec<Frame>,
    pending: VecDeque<StreamElement>,
    input_complete: bool,
    errored: bool,
}

impl AxdrStreamReader {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            stack: Vec::new(),
            pending: VecDeque::new(),
            input_complete: false,
            errored: false,
        }
    }

    /// Build a reader over one complete buffer
    pub fn from_complete(bytes: &[u8]) -> Self {
        let mut reader = Self::new();
        reader.feed(bytes);
        reader.finish();
        reader
    }

    /// Append newly received bytes
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Mark that no further bytes will arrive
    pub fn finish(&mut self) {
        self.input_complete = true;
    }

    /// Drop already-consumed bytes; used by non-memorising data streams
    pub fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }

    /// Pull the next stream event
    ///
    /// Once an error is returned every subsequent call fails.
    pub fn next_element(&mut self) -> DlmsResult<StreamStep> {
        if self.errored {
            return Err(DlmsError::Decoding(
                "element stream is in error state".to_string(),
            ));
        }
        match self.advance() {
            Ok(step) => Ok(step),
            Err(e) => {
                self.errored = true;
                Err(e)
            }
        }
    }

    fn advance(&mut self) -> DlmsResult<StreamStep> {
        if let Some(el) = self.pending.pop_front() {
            return Ok(StreamStep::Element(el));
        }

        if let Some(top) = self.stack.last() {
            if top.remaining == 0 {
                let frame = self.stack.pop().expect("checked non-empty");
                return Ok(StreamStep::Element(StreamElement::End(frame.container)));
            }
        }

        if self.pos >= self.buf.len() {
            return if self.stack.is_empty() {
                if self.input_complete {
                    Ok(StreamStep::Eof)
                } else {
                    Ok(StreamStep::NeedMore)
                }
            } else if self.input_complete {
                Err(DlmsError::Decoding(
                    "element stream truncated inside a container".to_string(),
                ))
            } else {
                Ok(StreamStep::NeedMore)
            };
        }

        let tag = self.buf[self.pos];
        if tag == AxdrTag::Array.to_u8() || tag == AxdrTag::Structure.to_u8() {
            let Some((count, consumed)) = measure_length(&self.buf[self.pos + 1..])? else {
                return self.underflow();
            };
            let container = if tag == AxdrTag::Array.to_u8() {
                ContainerType::Array
            } else {
                ContainerType::Structure
            };
            self.pos += 1 + consumed;
            self.leave_element();
            self.stack.push(Frame {
                container,
                remaining: count,
            });
            return Ok(StreamStep::Element(StreamElement::Start(container, count)));
        }

        let Some(size) = measure_element(&self.buf[self.pos..])? else {
            return self.underflow();
        };
        let mut decoder = AxdrDecoder::new(&self.buf[self.pos..self.pos + size]);
        let obj = decoder.decode_data_object()?;
        self.pos += size;
        self.leave_element();

        if let DataObject::CompactArray(ca) = obj {
            self.flatten_compact_array(ca.into_items());
            // A compact array always yields at least its synthetic Start.
            let el = self.pending.pop_front().expect("flattened start");
            return Ok(StreamStep::Element(el));
        }

        Ok(StreamStep::Element(StreamElement::Data(obj)))
    }

    /// Expose a compact array as a plain array of its items
    fn flatten_compact_array(&mut self, items: Vec<DataObject>) {
        self.pending
            .push_back(StreamElement::Start(ContainerType::Array, items.len()));
        for item in items {
            match item {
                DataObject::Structure(fields) => {
                    self.pending
                        .push_back(StreamElement::Start(ContainerType::Structure, fields.len()));
                    for field in fields {
                        self.pending.push_back(StreamElement::Data(field));
                    }
                    self.pending.push_back(StreamElement::End(ContainerType::Structure));
                }
                other => self.pending.push_back(StreamElement::Data(other)),
            }
        }
        self.pending.push_back(StreamElement::End(ContainerType::Array));
    }

    fn leave_element(&mut self) {
        if let Some(top) = self.stack.last_mut() {
            top.remaining -= 1;
        }
    }

    fn underflow(&self) -> DlmsResult<StreamStep> {
        if self.input_complete {
            Err(DlmsError::Decoding(
                "element stream truncated mid-element".to_string(),
            ))
        } else {
            Ok(StreamStep::NeedMore)
        }
    }
}

impl Default for AxdrStreamReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Measure a length field; `None` when more bytes are needed
fn measure_length(bytes: &[u8]) -> DlmsResult<Option<(usize, usize)>> {
    let Some(&first) = bytes.first() else {
        return Ok(None);
    };
    if first & 0x80 == 0 {
        return Ok(Some((first as usize, 1)));
    }
    let n = (first & 0x7F) as usize;
    if n == 0 {
        return Err(DlmsError::Decoding(
            "indefinite length form is not supported".to_string(),
        ));
    }
    if n > 4 {
        return Err(DlmsError::Decoding(format!(
            "invalid length-of-length: {}",
            n
        )));
    }
    if bytes.len() < 1 + n {
        return Ok(None);
    }
    let mut value = 0usize;
    for &b in &bytes[1..1 + n] {
        value = (value << 8) | b as usize;
    }
    Ok(Some((value, 1 + n)))
}

/// Measure one complete non-container element; `None` when more bytes are needed
fn measure_element(bytes: &[u8]) -> DlmsResult<Option<usize>> {
    let Some(&tag_byte) = bytes.first() else {
        return Ok(None);
    };
    let tag = AxdrTag::from_u8(tag_byte)?;
    let fixed = match tag {
        AxdrTag::Null | AxdrTag::DontCare => Some(0usize),
        AxdrTag::Boolean | AxdrTag::Integer | AxdrTag::Unsigned | AxdrTag::Enum | AxdrTag::Bcd => {
            Some(1)
        }
        AxdrTag::Long | AxdrTag::LongUnsigned => Some(2),
        AxdrTag::DoubleLong
        | AxdrTag::DoubleLongUnsigned
        | AxdrTag::FloatingPoint
        | AxdrTag::Float32 => Some(4),
        AxdrTag::Long64 | AxdrTag::Long64Unsigned | AxdrTag::Float64 => Some(8),
        AxdrTag::Date => Some(5),
        AxdrTag::Time => Some(4),
        AxdrTag::DateTime => Some(12),
        _ => None,
    };
    if let Some(body) = fixed {
        return Ok(if bytes.len() >= 1 + body {
            Some(1 + body)
        } else {
            None
        });
    }

    match tag {
        AxdrTag::OctetString | AxdrTag::VisibleString | AxdrTag::Utf8String => {
            let Some((len, consumed)) = measure_length(&bytes[1..])? else {
                return Ok(None);
            };
            let total = 1 + consumed + len;
            Ok((bytes.len() >= total).then_some(total))
        }
        AxdrTag::BitString => {
            let Some((bits, consumed)) = measure_length(&bytes[1..])? else {
                return Ok(None);
            };
            let total = 1 + consumed + bits.div_ceil(8);
            Ok((bytes.len() >= total).then_some(total))
        }
        AxdrTag::CompactArray => {
            let mut pos = 1usize;
            let Some(&content_tag) = bytes.get(pos) else {
                return Ok(None);
            };
            pos += 1;
            if content_tag == AxdrTag::Structure.to_u8() {
                let Some((count, consumed)) = measure_length(&bytes[pos..])? else {
                    return Ok(None);
                };
                pos += consumed + count;
                if bytes.len() < pos {
                    return Ok(None);
                }
            }
            let Some((len, consumed)) = measure_length(&bytes[pos..])? else {
                return Ok(None);
            };
            let total = pos + consumed + len;
            Ok((bytes.len() >= total).then_some(total))
        }
        _ => Err(DlmsError::Decoding(format!(
            "unexpected container tag 0x{:02X}",
            tag_byte
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axdr::encoder::encode;
    use cosem_core::datatypes::{CompactArray, CompactArrayType};

    fn collect_all(bytes: &[u8]) -> Vec<StreamElement> {
        let mut reader = AxdrStreamReader::from_complete(bytes);
        let mut out = Vec::new();
        loop {
            match reader.next_element().unwrap() {
                StreamStep::Element(el) => out.push(el),
                StreamStep::Eof => return out,
                StreamStep::NeedMore => panic!("complete input reported NeedMore"),
            }
        }
    }

    #[test]
    fn test_stream_flat_value() {
        let bytes = encode(&DataObject::Unsigned32(123)).unwrap();
        let elements = collect_all(&bytes);
        assert_eq!(elements, vec![StreamElement::Data(DataObject::Unsigned32(123))]);
    }

    #[test]
    fn test_stream_nested_containers() {
        let obj = DataObject::Structure(vec![
            DataObject::Unsigned8(1),
            DataObject::new_array(vec![DataObject::Boolean(true), DataObject::Boolean(false)])
                .unwrap(),
        ]);
        let elements = collect_all(&encode(&obj).unwrap());
        assert_eq!(
            elements,
            vec![
                StreamElement::Start(ContainerType::Structure, 2),
                StreamElement::Data(DataObject::Unsigned8(1)),
                StreamElement::Start(ContainerType::Array, 2),
                StreamElement::Data(DataObject::Boolean(true)),
                StreamElement::Data(DataObject::Boolean(false)),
                StreamElement::End(ContainerType::Array),
                StreamElement::End(ContainerType::Structure),
            ]
        );
    }

    #[test]
    fn test_stream_compact_array_flattened() {
        let ca = CompactArray::new(
            CompactArrayType::Simple(0x12),
            vec![DataObject::Unsigned16(1), DataObject::Unsigned16(2)],
        )
        .unwrap();
        let elements = collect_all(&encode(&DataObject::CompactArray(ca)).unwrap());
        assert_eq!(
            elements,
            vec![
                StreamElement::Start(ContainerType::Array, 2),
                StreamElement::Data(DataObject::Unsigned16(1)),
                StreamElement::Data(DataObject::Unsigned16(2)),
                StreamElement::End(ContainerType::Array),
            ]
        );
    }

    #[test]
    fn test_stream_incremental_feeding() {
        let obj = DataObject::Structure(vec![
            DataObject::OctetString(vec![0xAA; 40]),
            DataObject::Unsigned32(7),
        ]);
        let bytes = encode(&obj).unwrap();

        let mut reader = AxdrStreamReader::new();
        let mut elements = Vec::new();
        let mut offset = 0usize;
        loop {
            match reader.next_element().unwrap() {
                StreamStep::Element(el) => elements.push(el),
                StreamStep::Eof => break,
                StreamStep::NeedMore => {
                    // Drip three bytes at a time, as a tiny negotiated block
                    // size would.
                    let end = (offset + 3).min(bytes.len());
                    reader.feed(&bytes[offset..end]);
                    offset = end;
                    if offset == bytes.len() {
                        reader.finish();
                    }
                }
            }
        }
        assert_eq!(elements.len(), 4);
        assert_eq!(
            elements[1],
            StreamElement::Data(DataObject::OctetString(vec![0xAA; 40]))
        );
    }

    #[test]
    fn test_stream_truncated_container_fails() {
        let obj = DataObject::Structure(vec![DataObject::Unsigned8(1), DataObject::Unsigned8(2)]);
        let bytes = encode(&obj).unwrap();
        let mut reader = AxdrStreamReader::from_complete(&bytes[..bytes.len() - 1]);
        let mut saw_error = false;
        for _ in 0..10 {
            match reader.next_element() {
                Ok(StreamStep::Element(_)) => continue,
                Ok(_) => break,
                Err(_) => {
                    saw_error = true;
                    break;
                }
            }
        }
        assert!(saw_error);
        // Error state is sticky.
        assert!(reader.next_element().is_err());
    }
}
