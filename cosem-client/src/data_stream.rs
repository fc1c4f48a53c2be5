//! Lazy element stream over a (possibly block-transferred) response
//!
//! The stream pulls data blocks on demand, feeds them into the incremental
//! A-XDR reader and yields decoded elements. In `in_memory` mode every
//! fetched chunk is retained so `rewind` restarts iteration without touching
//! the meter again; otherwise consumed bytes are discarded as the cursor
//! advances.

use crate::client::DlmsClient;
use cosem_axdr::{AxdrStreamReader, StreamElement, StreamStep};
use cosem_core::error::{DlmsError, DlmsResult};
use cosem_core::{DataAccessResult, DataObject};
use cosem_application::pdu::InvokeIdAndPriority;
use cosem_session::SessionLayer;

/// Where the remaining bytes of the response come from
#[derive(Debug, Clone, Copy)]
pub(crate) enum BlockSource {
    /// The whole payload arrived in one response
    Complete,
    /// GET block transfer: `C0 02` continuations
    Get {
        invoke: InvokeIdAndPriority,
        next_block: u32,
    },
    /// SN READ block transfer: block-number-access continuations
    Read { next_block: u16 },
}

/// Streaming cursor over one GET or READ response
pub struct DataStream<'a, S: SessionLayer> {
    client: &'a mut DlmsClient<S>,
    reader: AxdrStreamReader,
    source: BlockSource,
    /// All network data fetched
    done: bool,
    in_memory: bool,
    /// Retained chunks (in_memory) still to be replayed into the reader
    chunks: Vec<Vec<u8>>,
    replay_idx: usize,
    /// Per-item failure surfaced as a single synthetic element
    error: Option<DataAccessResult>,
    error_emitted: bool,
}

impl<'a, S: SessionLayer> DataStream<'a, S> {
    pub(crate) fn new(
        client: &'a mut DlmsClient<S>,
        first_chunk: Vec<u8>,
        source: BlockSource,
        done: bool,
        in_memory: bool,
    ) -> Self {
        let mut stream = Self {
            client,
            reader: AxdrStreamReader::new(),
            source,
            done,
            in_memory,
            chunks: vec![first_chunk],
            replay_idx: 0,
            error: None,
            error_emitted: false,
        };
        stream.feed_next_chunk();
        stream
    }

    pub(crate) fn new_error(client: &'a mut DlmsClient<S>, kind: DataAccessResult) -> Self {
        Self {
            client,
            reader: AxdrStreamReader::new(),
            source: BlockSource::Complete,
            done: true,
            in_memory: true,
            chunks: Vec::new(),
            replay_idx: 0,
            error: Some(kind),
            error_emitted: false,
        }
    }

    /// Pull the next element; `None` once the response is fully consumed
    pub async fn next_element(&mut self) -> DlmsResult<Option<StreamElement>> {
        if let Some(kind) = self.error {
            if self.error_emitted {
                return Ok(None);
            }
            self.error_emitted = true;
            return Ok(Some(StreamElement::Data(DataObject::Error(kind))));
        }

        loop {
            match self.reader.next_element()? {
                StreamStep::Element(element) => {
                    if !self.in_memory {
                        self.reader.compact();
                    }
                    return Ok(Some(element));
                }
                StreamStep::Eof => return Ok(None),
                StreamStep::NeedMore => {
                    if self.feed_next_chunk() {
                        continue;
                    }
                    self.fetch_block().await?;
                }
            }
        }
    }

    /// Restart iteration from the first element
    ///
    /// Only available in `in_memory` mode; the retained chunks replay into a
    /// fresh reader without another meter round trip.
    pub fn rewind(&mut self) -> DlmsResult<()> {
        if !self.in_memory {
            return Err(DlmsError::InvalidData(
                "rewind requires an in-memory data stream".to_string(),
            ));
        }
        self.reader = AxdrStreamReader::new();
        self.replay_idx = 0;
        self.error_emitted = false;
        Ok(())
    }

    /// Feed one retained chunk into the reader; false when none is pending
    fn feed_next_chunk(&mut self) -> bool {
        if self.replay_idx >= self.chunks.len() {
            return false;
        }
        let chunk = &self.chunks[self.replay_idx];
        self.reader.feed(chunk);
        self.replay_idx += 1;
        if self.done && self.replay_idx == self.chunks.len() {
            self.reader.finish();
        }
        true
    }

    /// Fetch the next block from the meter
    async fn fetch_block(&mut self) -> DlmsResult<()> {
        if self.done {
            // The reader asked for more after the last block: the response
            // was truncated mid-element.
            return Err(DlmsError::Decoding(
                "response stream ended mid-element".to_string(),
            ));
        }
        let (chunk, last) = match self.source {
            BlockSource::Complete => {
                return Err(DlmsError::Decoding(
                    "complete response reported an unfinished element".to_string(),
                ))
            }
            BlockSource::Get { invoke, next_block } => {
                let (chunk, last) = self.client.fetch_get_block(invoke, next_block).await?;
                self.source = BlockSource::Get {
                    invoke,
                    next_block: next_block + 1,
                };
                (chunk, last)
            }
            BlockSource::Read { next_block } => {
                let (chunk, last) = self.client.fetch_read_block(next_block).await?;
                self.source = BlockSource::Read {
                    next_block: next_block + 1,
                };
                (chunk, last)
            }
        };
        if last {
            self.done = true;
        }
        if self.in_memory {
            self.chunks.push(chunk);
        } else {
            self.chunks = vec![chunk];
            self.replay_idx = 0;
        }
        self.feed_next_chunk();
        Ok(())
    }
}
