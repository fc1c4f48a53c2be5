//! In-process loopback stream pair
//!
//! Stands in for a meter when driving the session and client layers in
//! tests: one endpoint plays the client, the other is scripted as the server.

use crate::stream::{StreamAccessor, StreamCounters, StreamState};
use async_trait::async_trait;
use cosem_core::error::{DlmsError, DlmsResult};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// One endpoint of an in-memory byte channel
pub struct LoopbackStream {
    inner: Option<DuplexStream>,
    state: StreamState,
}

impl LoopbackStream {
    /// Create a connected pair of endpoints
    pub fn pair() -> (LoopbackStream, LoopbackStream) {
        Self::pair_with_capacity(64 * 1024)
    }

    pub fn pair_with_capacity(capacity: usize) -> (LoopbackStream, LoopbackStream) {
        let (a, b) = tokio::io::duplex(capacity);
        (
            LoopbackStream {
                inner: Some(a),
                state: StreamState::default(),
            },
            LoopbackStream {
                inner: Some(b),
                state: StreamState::default(),
            },
        )
    }

    fn inner_mut(&mut self) -> DlmsResult<&mut DuplexStream> {
        self.inner.as_mut().ok_or(DlmsError::NotOpened)
    }
}

#[async_trait]
impl StreamAccessor for LoopbackStream {
    async fn open(&mut self) -> DlmsResult<()> {
        if self.inner.is_none() {
            return Err(DlmsError::NotOpened);
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> DlmsResult<usize> {
        let started = Instant::now();
        let remaining = self.state.limits.remaining(started)?;
        let stream = self.inner.as_mut().ok_or(DlmsError::NotOpened)?;
        let n = match remaining {
            Some(window) => tokio::time::timeout(window, stream.read(buf))
                .await
                .map_err(|_| DlmsError::CommunicationTimeout)??,
            None => stream.read(buf).await?,
        };
        self.state.account_rx(n)?;
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> DlmsResult<usize> {
        let n = self.inner_mut()?.write(buf).await?;
        self.state.account_tx(n);
        Ok(n)
    }

    async fn flush(&mut self) -> DlmsResult<()> {
        self.inner_mut()?.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> DlmsResult<()> {
        if let Some(mut stream) = self.inner.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> DlmsResult<()> {
        self.inner = None;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.state.limits.timeout = timeout;
    }

    fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.state.limits.deadline = deadline;
    }

    fn set_max_received(&mut self, quota: Option<usize>) {
        self.state.set_max_received(quota);
    }

    fn counters(&self) -> StreamCounters {
        self.state.counters
    }
}
