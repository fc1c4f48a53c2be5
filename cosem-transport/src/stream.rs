//! Stream accessor trait for the transport layer

use async_trait::async_trait;
use cosem_core::error::{DlmsError, DlmsResult};
use std::time::{Duration, Instant};

/// Read limits applied to a stream: timeout, absolute deadline and a
/// per-operation inbound byte quota
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamLimits {
    pub timeout: Option<Duration>,
    pub deadline: Option<Instant>,
    pub max_received: Option<usize>,
}

impl StreamLimits {
    /// Remaining time until whichever of timeout/deadline is tighter
    ///
    /// `timeout` is measured from `started`; returns `None` when unbounded
    /// and an error when the deadline already passed.
    pub fn remaining(&self, started: Instant) -> DlmsResult<Option<Duration>> {
        let now = Instant::now();
        let from_timeout = self
            .timeout
            .map(|t| t.checked_sub(now.saturating_duration_since(started)));
        let from_deadline = self.deadline.map(|d| d.checked_duration_since(now));
        let tightest = match (from_timeout, from_deadline) {
            (Some(a), Some(b)) => Some(match (a, b) {
                (Some(a), Some(b)) => Some(a.min(b)),
                _ => None,
            }),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        match tightest {
            Some(Some(d)) => Ok(Some(d)),
            Some(None) => Err(DlmsError::CommunicationTimeout),
            None => Ok(None),
        }
    }
}

/// Running byte counters of a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamCounters {
    pub rx: u64,
    pub tx: u64,
}

/// Bookkeeping shared by the transport implementations: limits, counters and
/// the bytes consumed against the current quota
#[derive(Debug, Default)]
pub struct StreamState {
    pub limits: StreamLimits,
    pub counters: StreamCounters,
    quota_used: usize,
}

impl StreamState {
    /// Account received bytes; fails once the per-operation quota is spent
    pub fn account_rx(&mut self, n: usize) -> DlmsResult<()> {
        self.counters.rx += n as u64;
        if let Some(max) = self.limits.max_received {
            self.quota_used += n;
            if self.quota_used > max {
                return Err(DlmsError::QuotaExceeded);
            }
        }
        Ok(())
    }

    pub fn account_tx(&mut self, n: usize) {
        self.counters.tx += n as u64;
    }

    /// Reset the quota accounting for a new operation
    pub fn set_max_received(&mut self, quota: Option<usize>) {
        self.limits.max_received = quota;
        self.quota_used = 0;
    }
}

/// Stream accessor interface to the byte channel towards a remote meter
///
/// Transports that dial (TCP, modem bridges) perform the dial in `open`.
/// `close` is the orderly shutdown, `disconnect` the hard one; both leave the
/// stream unusable until `open` is called again.
#[async_trait]
pub trait StreamAccessor: Send {
    /// Open the physical connection
    async fn open(&mut self) -> DlmsResult<()>;

    /// Read some bytes; 0 means EOF
    async fn read(&mut self, buf: &mut [u8]) -> DlmsResult<usize>;

    /// Write some bytes
    async fn write(&mut self, buf: &[u8]) -> DlmsResult<usize>;

    /// Flush buffered output
    async fn flush(&mut self) -> DlmsResult<()>;

    /// Orderly close
    async fn close(&mut self) -> DlmsResult<()>;

    /// Hard close; never fails on an already-dead stream
    async fn disconnect(&mut self) -> DlmsResult<()>;

    fn is_closed(&self) -> bool;

    /// Set the per-read timeout; `None` means unbounded
    fn set_timeout(&mut self, timeout: Option<Duration>);

    /// Set an absolute deadline for subsequent reads
    fn set_deadline(&mut self, deadline: Option<Instant>);

    /// Set the inbound byte quota for the next operation
    fn set_max_received(&mut self, quota: Option<usize>);

    /// Running rx/tx byte counts
    fn counters(&self) -> StreamCounters;

    /// Read until `buf` is full
    async fn read_exact(&mut self, mut buf: &mut [u8]) -> DlmsResult<()> {
        while !buf.is_empty() {
            let n = self.read(buf).await?;
            if n == 0 {
                return Err(DlmsError::Connection(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream closed mid-read",
                )));
            }
            buf = &mut buf[n..];
        }
        Ok(())
    }

    /// Write the whole buffer
    async fn write_all(&mut self, buf: &[u8]) -> DlmsResult<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.write(&buf[written..]).await?;
            if n == 0 {
                return Err(DlmsError::Connection(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "stream refused further bytes",
                )));
            }
            written += n;
        }
        Ok(())
    }
}
