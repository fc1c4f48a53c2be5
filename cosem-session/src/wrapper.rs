//! Wrapper session layer: 8-byte TCP framing

use crate::layer::SessionLayer;
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use cosem_core::error::{DlmsError, DlmsResult};
use cosem_transport::StreamAccessor;

/// Wrapper header length
pub const WRAPPER_HEADER_LENGTH: usize = 8;

/// Protocol version carried in every wrapper header
pub const WRAPPER_VERSION: u16 = 0x0001;

/// Largest payload the 16-bit length field can carry
pub const MAX_WRAPPER_PAYLOAD: usize = 0xFFFF;

/// Wrapper header: version, source and destination wrapper ports, length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapperHeader {
    pub source_wport: u16,
    pub destination_wport: u16,
    pub length: u16,
}

impl WrapperHeader {
    pub fn new(source_wport: u16, destination_wport: u16, length: u16) -> Self {
        Self {
            source_wport,
            destination_wport,
            length,
        }
    }

    /// Encode to the 8 big-endian header bytes
    pub fn encode(&self) -> [u8; WRAPPER_HEADER_LENGTH] {
        let mut buf = BytesMut::with_capacity(WRAPPER_HEADER_LENGTH);
        buf.put_u16(WRAPPER_VERSION);
        buf.put_u16(self.source_wport);
        buf.put_u16(self.destination_wport);
        buf.put_u16(self.length);
        let mut out = [0u8; WRAPPER_HEADER_LENGTH];
        out.copy_from_slice(&buf);
        out
    }

    /// Decode and verify the version field
    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        if data.len() < WRAPPER_HEADER_LENGTH {
            return Err(DlmsError::FrameInvalid(format!(
                "wrapper header too short: {} bytes",
                data.len()
            )));
        }
        let version = u16::from_be_bytes([data[0], data[1]]);
        if version != WRAPPER_VERSION {
            return Err(DlmsError::FrameInvalid(format!(
                "unsupported wrapper version: 0x{:04X}",
                version
            )));
        }
        Ok(Self {
            source_wport: u16::from_be_bytes([data[2], data[3]]),
            destination_wport: u16::from_be_bytes([data[4], data[5]]),
            length: u16::from_be_bytes([data[6], data[7]]),
        })
    }
}

/// Wrapper session over a TCP-like stream
pub struct WrapperSession<S: StreamAccessor> {
    stream: S,
    client_wport: u16,
    server_wport: u16,
    connected: bool,
}

impl<S: StreamAccessor> WrapperSession<S> {
    pub fn new(stream: S, client_wport: u16, server_wport: u16) -> Self {
        Self {
            stream,
            client_wport,
            server_wport,
            connected: false,
        }
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    fn require_connected(&self) -> DlmsResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(DlmsError::NotOpened)
        }
    }
}

#[async_trait]
impl<S: StreamAccessor> SessionLayer for WrapperSession<S> {
    async fn open(&mut self) -> DlmsResult<()> {
        self.stream.open().await?;
        self.connected = true;
        Ok(())
    }

    async fn send(&mut self, apdu: &[u8]) -> DlmsResult<()> {
        self.require_connected()?;
        if apdu.len() > MAX_WRAPPER_PAYLOAD {
            return Err(DlmsError::Protocol(format!(
                "payload of {} bytes exceeds the wrapper length field",
                apdu.len()
            )));
        }
        let header = WrapperHeader::new(self.client_wport, self.server_wport, apdu.len() as u16);
        let mut wire = Vec::with_capacity(WRAPPER_HEADER_LENGTH + apdu.len());
        wire.extend_from_slice(&header.encode());
        wire.extend_from_slice(apdu);
        self.stream.write_all(&wire).await?;
        self.stream.flush().await
    }

    async fn receive(&mut self) -> DlmsResult<Vec<u8>> {
        self.require_connected()?;
        let mut header_bytes = [0u8; WRAPPER_HEADER_LENGTH];
        self.stream.read_exact(&mut header_bytes).await?;
        let header = WrapperHeader::decode(&header_bytes)?;

        // Server to client: the ports come back swapped.
        if header.source_wport != self.server_wport || header.destination_wport != self.client_wport
        {
            return Err(DlmsError::Protocol(format!(
                "wrapper ports {}->{} do not match session {}->{}",
                header.source_wport, header.destination_wport, self.server_wport, self.client_wport
            )));
        }

        let mut payload = vec![0u8; header.length as usize];
        self.stream.read_exact(&mut payload).await?;
        Ok(payload)
    }

    async fn close(&mut self) -> DlmsResult<()> {
        self.connected = false;
        self.stream.close().await
    }

    async fn disconnect(&mut self) -> DlmsResult<()> {
        self.connected = false;
        self.stream.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosem_transport::LoopbackStream;

    #[test]
    fn test_wrapper_header_roundtrip() {
        let header = WrapperHeader::new(0x0010, 0x0001, 100);
        let encoded = header.encode();
        assert_eq!(encoded[..2], [0x00, 0x01]);
        assert_eq!(WrapperHeader::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn test_wrapper_header_bad_version() {
        let mut encoded = WrapperHeader::new(1, 1, 0).encode();
        encoded[1] = 0x02;
        assert!(WrapperHeader::decode(&encoded).is_err());
    }

    #[tokio::test]
    async fn test_wrapper_session_roundtrip() {
        let (client_stream, mut server_stream) = LoopbackStream::pair();
        let mut session = WrapperSession::new(client_stream, 0x0010, 0x0001);
        session.open().await.unwrap();
        session.send(&[0xC0, 0x01, 0xC1]).await.unwrap();

        let server = tokio::spawn(async move {
            let mut header = [0u8; WRAPPER_HEADER_LENGTH];
            server_stream.read_exact(&mut header).await.unwrap();
            let parsed = WrapperHeader::decode(&header).unwrap();
            assert_eq!(parsed.source_wport, 0x0010);
            assert_eq!(parsed.destination_wport, 0x0001);
            let mut payload = vec![0u8; parsed.length as usize];
            server_stream.read_exact(&mut payload).await.unwrap();

            // Reply with swapped ports.
            let reply = WrapperHeader::new(0x0001, 0x0010, payload.len() as u16);
            let mut wire = reply.encode().to_vec();
            wire.extend_from_slice(&payload);
            server_stream.write_all(&wire).await.unwrap();
        });

        let response = session.receive().await.unwrap();
        server.await.unwrap();
        assert_eq!(response, vec![0xC0, 0x01, 0xC1]);
    }

    #[tokio::test]
    async fn test_wrapper_rejects_unswapped_ports() {
        let (client_stream, mut server_stream) = LoopbackStream::pair();
        let mut session = WrapperSession::new(client_stream, 0x0010, 0x0001);
        session.open().await.unwrap();

        tokio::spawn(async move {
            let bad = WrapperHeader::new(0x0010, 0x0001, 0);
            server_stream.write_all(&bad.encode()).await.unwrap();
        });

        assert!(matches!(
            session.receive().await,
            Err(DlmsError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_wrapper_payload_bound() {
        let (client_stream, _server) = LoopbackStream::pair();
        let mut session = WrapperSession::new(client_stream, 1, 1);
        session.open().await.unwrap();
        let oversized = vec![0u8; MAX_WRAPPER_PAYLOAD + 1];
        assert!(session.send(&oversized).await.is_err());
    }
}
