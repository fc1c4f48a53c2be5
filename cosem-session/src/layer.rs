//! Session layer contract

use async_trait::async_trait;
use cosem_core::error::DlmsResult;

/// A session layer carries whole xDLMS APDUs over a byte transport
///
/// Implementations own the transport and its framing: the HDLC MAC for
/// serial-like channels, the 8-byte wrapper for TCP.
#[async_trait]
pub trait SessionLayer: Send {
    /// Open the transport and perform the link handshake
    async fn open(&mut self) -> DlmsResult<()>;

    /// Ship one APDU to the peer
    async fn send(&mut self, apdu: &[u8]) -> DlmsResult<()>;

    /// Receive one complete APDU
    async fn receive(&mut self) -> DlmsResult<Vec<u8>>;

    /// Orderly link release and transport close
    async fn close(&mut self) -> DlmsResult<()>;

    /// Hard transport close
    async fn disconnect(&mut self) -> DlmsResult<()>;
}
