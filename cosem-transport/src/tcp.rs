//! TCP transport implementation

use crate::stream::{StreamAccessor, StreamCounters, StreamState};
use async_trait::async_trait;
use cosem_core::error::{DlmsError, DlmsResult};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// TCP transport settings
#[derive(Debug, Clone)]
pub struct TcpSettings {
    pub address: SocketAddr,
    pub connect_timeout: Duration,
}

impl TcpSettings {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// TCP byte stream towards a meter or gateway
pub struct TcpTransport {
    stream: Option<TcpStream>,
    settings: TcpSettings,
    state: StreamState,
}

impl TcpTransport {
    pub fn new(settings: TcpSettings) -> Self {
        Self {
            stream: None,
            settings,
            state: StreamState::default(),
        }
    }

    /// Create a transport from an `ip:port` string
    pub fn from_address(address: &str) -> DlmsResult<Self> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| DlmsError::InvalidData(format!("invalid TCP address: {}", e)))?;
        Ok(Self::new(TcpSettings::new(addr)))
    }

    fn stream_mut(&mut self) -> DlmsResult<&mut TcpStream> {
        self.stream.as_mut().ok_or(DlmsError::NotOpened)
    }
}

#[async_trait]
impl StreamAccessor for TcpTransport {
    async fn open(&mut self) -> DlmsResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        log::debug!("connecting to {}", self.settings.address);
        let connect = TcpStream::connect(self.settings.address);
        let stream = tokio::time::timeout(self.settings.connect_timeout, connect)
            .await
            .map_err(|_| DlmsError::CommunicationTimeout)??;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> DlmsResult<usize> {
        let started = Instant::now();
        let remaining = self.state.limits.remaining(started)?;
        let stream = self.stream.as_mut().ok_or(DlmsError::NotOpened)?;
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
        let n = self.stream_mut()?.write(buf).await?;
        self.state.account_tx(n);
        Ok(n)
    }

    async fn flush(&mut self) -> DlmsResult<()> {
        self.stream_mut()?.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> DlmsResult<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> DlmsResult<()> {
        // Dropping the socket is the hard close.
        self.stream = None;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.stream.is_none()
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
