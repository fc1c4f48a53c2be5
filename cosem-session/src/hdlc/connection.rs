//! HDLC link engine: SNRM/UA negotiation, I/RR windowing, segmentation

use crate::hdlc::address::HdlcAddress;
use crate::hdlc::frame::{
    FrameType, HdlcFrame, FLAG, LLC_REQUEST, LLC_RESPONSE, MAX_GARBAGE_BEFORE_FLAG,
};
use crate::layer::SessionLayer;
use async_trait::async_trait;
use cosem_core::error::{DlmsError, DlmsResult};
use cosem_transport::StreamAccessor;

/// Default information field size before negotiation
pub const DEFAULT_INFORMATION_FIELD_LENGTH: u16 = 128;
/// Largest information field the stack accepts after negotiation
pub const MAX_INFORMATION_FIELD_LENGTH: u16 = 2050;

/// Bound on RR cycles that deliver no payload bytes
const MAX_IDLE_RR_CYCLES: usize = 10;
/// Bound on frames dropped while waiting for a usable one
const MAX_EMPTY_FRAMES: usize = 10;

const PARAMETER_FORMAT_ID: u8 = 0x81;
const PARAMETER_GROUP_ID: u8 = 0x80;
const TAG_MAX_INFO_RCV: u8 = 0x05;
const TAG_MAX_INFO_SND: u8 = 0x06;
const TAG_WINDOW_TX: u8 = 0x07;
const TAG_WINDOW_RX: u8 = 0x08;

/// HDLC link settings
#[derive(Debug, Clone)]
pub struct HdlcSettings {
    /// Client address, one byte (0..=0x7F)
    pub client_address: u16,
    /// Server logical device address (0..=0x3FFF)
    pub server_logical_address: u16,
    /// Server physical address; 0 when unused
    pub server_physical_address: u16,
    /// Information field size proposed for inbound frames
    pub max_information_field_rcv: u16,
    /// Information field size proposed for outbound frames
    pub max_information_field_snd: u16,
}

impl Default for HdlcSettings {
    fn default() -> Self {
        Self {
            client_address: 0x10,
            server_logical_address: 0x01,
            server_physical_address: 0,
            max_information_field_rcv: MAX_INFORMATION_FIELD_LENGTH,
            max_information_field_snd: MAX_INFORMATION_FIELD_LENGTH,
        }
    }
}

/// Negotiated link parameters carried in SNRM and UA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkParameters {
    pub max_information_field_rcv: u16,
    pub max_information_field_snd: u16,
    pub window_tx: u8,
    pub window_rx: u8,
}

impl LinkParameters {
    fn proposed(settings: &HdlcSettings) -> Self {
        Self {
            max_information_field_rcv: settings.max_information_field_rcv,
            max_information_field_snd: settings.max_information_field_snd,
            window_tx: 1,
            window_rx: 1,
        }
    }

    /// Encode the negotiation block for the SNRM information field
    ///
    /// The group length byte carries the tag block length plus the three
    /// header bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut tags = Vec::new();
        push_tag(&mut tags, TAG_MAX_INFO_RCV, self.max_information_field_rcv as u32);
        push_tag(&mut tags, TAG_MAX_INFO_SND, self.max_information_field_snd as u32);
        push_tag(&mut tags, TAG_WINDOW_TX, self.window_tx as u32);
        push_tag(&mut tags, TAG_WINDOW_RX, self.window_rx as u32);

        let mut out = Vec::with_capacity(3 + tags.len());
        out.push(PARAMETER_FORMAT_ID);
        out.push(PARAMETER_GROUP_ID);
        out.push((tags.len() + 3) as u8);
        out.extend_from_slice(&tags);
        out
    }

    /// Parse a UA information field; missing tags keep the 128-byte defaults
    pub fn decode(info: &[u8]) -> DlmsResult<Self> {
        let mut params = Self {
            max_information_field_rcv: DEFAULT_INFORMATION_FIELD_LENGTH,
            max_information_field_snd: DEFAULT_INFORMATION_FIELD_LENGTH,
            window_tx: 1,
            window_rx: 1,
        };
        if info.is_empty() {
            return Ok(params);
        }
        if info.len() < 3 || info[0] != PARAMETER_FORMAT_ID || info[1] != PARAMETER_GROUP_ID {
            return Err(DlmsError::FrameInvalid(
                "malformed UA parameter group".to_string(),
            ));
        }
        let group_len = info[2] as usize;
        if group_len < 3 || group_len > info.len() {
            return Err(DlmsError::FrameInvalid(format!(
                "UA parameter group length {} out of bounds",
                group_len
            )));
        }
        let mut tags = &info[3..group_len];
        while !tags.is_empty() {
            if tags.len() < 2 {
                return Err(DlmsError::FrameInvalid(
                    "truncated UA parameter tag".to_string(),
                ));
            }
            let (tag, len) = (tags[0], tags[1] as usize);
            if tags.len() < 2 + len {
                return Err(DlmsError::FrameInvalid(
                    "truncated UA parameter value".to_string(),
                ));
            }
            let value = read_tag_value(&tags[2..2 + len])?;
            match tag {
                TAG_MAX_INFO_RCV => params.max_information_field_rcv = clamp_info_field(value),
                TAG_MAX_INFO_SND => params.max_information_field_snd = clamp_info_field(value),
                TAG_WINDOW_TX => params.window_tx = value.max(1) as u8,
                TAG_WINDOW_RX => params.window_rx = value.max(1) as u8,
                _ => {}
            }
            tags = &tags[2 + len..];
        }
        Ok(params)
    }
}

fn push_tag(out: &mut Vec<u8>, tag: u8, value: u32) {
    out.push(tag);
    if value < 0x100 {
        out.push(1);
        out.push(value as u8);
    } else if value < 0x1_0000 {
        out.push(2);
        out.extend_from_slice(&(value as u16).to_be_bytes());
    } else {
        out.push(4);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

fn read_tag_value(bytes: &[u8]) -> DlmsResult<u32> {
    match bytes.len() {
        1 => Ok(bytes[0] as u32),
        2 => Ok(u16::from_be_bytes([bytes[0], bytes[1]]) as u32),
        4 => Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        n => Err(DlmsError::FrameInvalid(format!(
            "unsupported parameter value width: {}",
            n
        ))),
    }
}

fn clamp_info_field(value: u32) -> u16 {
    (value.max(DEFAULT_INFORMATION_FIELD_LENGTH as u32) as u16).min(MAX_INFORMATION_FIELD_LENGTH)
}

/// HDLC connection over a byte stream
pub struct HdlcConnection<S: StreamAccessor> {
    stream: S,
    settings: HdlcSettings,
    client: HdlcAddress,
    server: HdlcAddress,
    send_seq: u8,
    recv_seq: u8,
    max_rcv: u16,
    max_snd: u16,
    connected: bool,
}

impl<S: StreamAccessor> HdlcConnection<S> {
    pub fn new(stream: S, settings: HdlcSettings) -> DlmsResult<Self> {
        let client = HdlcAddress::new(settings.client_address)?;
        let server = HdlcAddress::new_with_physical(
            settings.server_logical_address,
            settings.server_physical_address,
        )?;
        Ok(Self {
            stream,
            settings,
            client,
            server,
            send_seq: 0,
            recv_seq: 0,
            max_rcv: DEFAULT_INFORMATION_FIELD_LENGTH,
            max_snd: DEFAULT_INFORMATION_FIELD_LENGTH,
            connected: false,
        })
    }

    pub fn negotiated_max_snd(&self) -> u16 {
        self.max_snd
    }

    pub fn negotiated_max_rcv(&self) -> u16 {
        self.max_rcv
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    async fn write_frame(&mut self, frame: &HdlcFrame) -> DlmsResult<()> {
        let wire = frame.encode()?;
        log::trace!("hdlc tx: {}", frame);
        self.stream.write_all(&wire).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read one frame, scanning past inter-frame noise
    async fn read_frame(&mut self) -> DlmsResult<HdlcFrame> {
        let mut garbage = 0usize;
        let mut byte = [0u8; 1];
        loop {
            self.stream.read_exact(&mut byte).await?;
            if byte[0] == FLAG {
                break;
            }
            garbage += 1;
            if garbage > MAX_GARBAGE_BEFORE_FLAG {
                return Err(DlmsError::FrameInvalid(
                    "no frame flag within the garbage bound".to_string(),
                ));
            }
        }

        // Consecutive flags separate frames; skip to the format byte.
        let format_h = loop {
            self.stream.read_exact(&mut byte).await?;
            if byte[0] != FLAG {
                break byte[0];
            }
        };
        self.stream.read_exact(&mut byte).await?;
        let format_l = byte[0];
        let length = (((format_h & 0x07) as usize) << 8) | format_l as usize;
        if length < 7 {
            return Err(DlmsError::FrameInvalid(format!(
                "frame length field too small: {}",
                length
            )));
        }

        let mut content = vec![0u8; length];
        content[0] = format_h;
        content[1] = format_l;
        self.stream.read_exact(&mut content[2..]).await?;
        self.stream.read_exact(&mut byte).await?;
        if byte[0] != FLAG {
            return Err(DlmsError::FrameInvalid(
                "closing frame flag missing".to_string(),
            ));
        }

        let frame = HdlcFrame::decode(&content)?;
        log::trace!("hdlc rx: {}", frame);
        Ok(frame)
    }

    /// Read frames until one addressed to us that is not UI
    async fn read_response_frame(&mut self) -> DlmsResult<HdlcFrame> {
        let mut dropped = 0usize;
        loop {
            let frame = self.read_frame().await?;
            if frame.frame_type() == FrameType::UnnumberedInformation {
                dropped += 1;
                if dropped > MAX_EMPTY_FRAMES {
                    return Err(DlmsError::Protocol(
                        "too many unusable frames on the link".to_string(),
                    ));
                }
                continue;
            }
            return Ok(frame);
        }
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
impl<S: StreamAccessor> SessionLayer for HdlcConnection<S> {
    async fn open(&mut self) -> DlmsResult<()> {
        self.stream.open().await?;

        let proposed = LinkParameters::proposed(&self.settings);
        let snrm = HdlcFrame::new_command(
            self.server,
            self.client,
            FrameType::SetNormalResponseMode,
            proposed.encode(),
        );
        self.write_frame(&snrm).await?;

        let response = self.read_response_frame().await?;
        match response.frame_type() {
            FrameType::UnnumberedAcknowledge => {}
            FrameType::DisconnectMode => {
                return Err(DlmsError::Protocol(
                    "server answered SNRM with DM".to_string(),
                ))
            }
            other => {
                return Err(DlmsError::Protocol(format!(
                    "unexpected response to SNRM: {:?}",
                    other
                )))
            }
        }
        let reported = LinkParameters::decode(response.information())?;
        self.max_rcv = self
            .settings
            .max_information_field_rcv
            .min(reported.max_information_field_rcv);
        self.max_snd = self
            .settings
            .max_information_field_snd
            .min(reported.max_information_field_snd);
        self.send_seq = 0;
        self.recv_seq = 0;
        self.connected = true;
        log::debug!(
            "hdlc link up: max_rcv={} max_snd={}",
            self.max_rcv,
            self.max_snd
        );
        Ok(())
    }

    async fn send(&mut self, apdu: &[u8]) -> DlmsResult<()> {
        self.require_connected()?;

        let mut payload = Vec::with_capacity(LLC_REQUEST.len() + apdu.len());
        payload.extend_from_slice(&LLC_REQUEST);
        payload.extend_from_slice(apdu);

        let window = self.max_snd as usize;
        let chunks: Vec<&[u8]> = payload.chunks(window).collect();
        let total = chunks.len();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let last = i + 1 == total;
            let frame = HdlcFrame::new_information(
                self.server,
                self.client,
                self.send_seq,
                self.recv_seq,
                !last,
                true,
                chunk.to_vec(),
            );
            self.write_frame(&frame).await?;
            self.send_seq = (self.send_seq + 1) % 8;

            if !last {
                // Window of one: the segment must be acknowledged before the
                // next one goes out.
                let ack = self.read_response_frame().await?;
                if ack.frame_type() != FrameType::ReceiveReady {
                    return Err(DlmsError::Protocol(format!(
                        "expected RR between segments, got {:?}",
                        ack.frame_type()
                    )));
                }
                if ack.receive_sequence() != self.send_seq {
                    return Err(DlmsError::Protocol(format!(
                        "RR acknowledged N(R)={}, expected {}",
                        ack.receive_sequence(),
                        self.send_seq
                    )));
                }
            }
        }
        Ok(())
    }

    async fn receive(&mut self) -> DlmsResult<Vec<u8>> {
        self.require_connected()?;

        let mut assembled: Vec<u8> = Vec::new();
        let mut idle_cycles = 0usize;
        loop {
            let frame = self.read_response_frame().await?;
            if frame.frame_type() != FrameType::Information {
                return Err(DlmsError::Protocol(format!(
                    "expected I frame, got {:?}",
                    frame.frame_type()
                )));
            }
            if frame.send_sequence() != self.recv_seq {
                return Err(DlmsError::Protocol(format!(
                    "out-of-order I frame: N(S)={}, expected {}",
                    frame.send_sequence(),
                    self.recv_seq
                )));
            }
            if frame.receive_sequence() != self.send_seq {
                return Err(DlmsError::Protocol(format!(
                    "I frame acknowledged N(R)={}, expected {}",
                    frame.receive_sequence(),
                    self.send_seq
                )));
            }
            self.recv_seq = (self.recv_seq + 1) % 8;

            if frame.information().is_empty() {
                idle_cycles += 1;
                if idle_cycles > MAX_IDLE_RR_CYCLES {
                    return Err(DlmsError::Protocol(
                        "link stalled: too many empty segments".to_string(),
                    ));
                }
            } else {
                idle_cycles = 0;
            }
            let segmented = frame.is_segmented();
            assembled.extend_from_slice(frame.information());

            if segmented {
                let rr = HdlcFrame::new_receive_ready(self.server, self.client, self.recv_seq);
                self.write_frame(&rr).await?;
                continue;
            }
            break;
        }

        if assembled.len() < LLC_RESPONSE.len() || assembled[..3] != LLC_RESPONSE {
            return Err(DlmsError::FrameInvalid(
                "missing LLC response header".to_string(),
            ));
        }
        assembled.drain(..LLC_RESPONSE.len());
        Ok(assembled)
    }

    async fn close(&mut self) -> DlmsResult<()> {
        if self.connected {
            let disc =
                HdlcFrame::new_command(self.server, self.client, FrameType::Disconnect, Vec::new());
            self.write_frame(&disc).await?;
            match self.read_response_frame().await {
                Ok(frame) => log::debug!("DISC answered with {:?}", frame.frame_type()),
                Err(e) => log::warn!("no usable answer to DISC: {}", e),
            }
            self.connected = false;
        }
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

    /// Minimal scripted meter side of the link
    struct FakeServer {
        stream: LoopbackStream,
        client: HdlcAddress,
        server: HdlcAddress,
    }

    impl FakeServer {
        fn new(stream: LoopbackStream) -> Self {
            Self {
                stream,
                client: HdlcAddress::new(0x10).unwrap(),
                server: HdlcAddress::new(0x01).unwrap(),
            }
        }

        async fn read_frame(&mut self) -> HdlcFrame {
            let mut byte = [0u8; 1];
            loop {
                self.stream.read_exact(&mut byte).await.unwrap();
                if byte[0] == FLAG {
                    break;
                }
            }
            let format_h = loop {
                self.stream.read_exact(&mut byte).await.unwrap();
                if byte[0] != FLAG {
                    break byte[0];
                }
            };
            self.stream.read_exact(&mut byte).await.unwrap();
            let length = (((format_h & 0x07) as usize) << 8) | byte[0] as usize;
            let mut content = vec![0u8; length];
            content[0] = format_h;
            content[1] = byte[0];
            self.stream.read_exact(&mut content[2..]).await.unwrap();
            self.stream.read_exact(&mut byte).await.unwrap();
            assert_eq!(byte[0], FLAG);
            HdlcFrame::decode(&content).unwrap()
        }

        async fn write_frame(&mut self, frame: HdlcFrame) {
            let wire = frame.encode().unwrap();
            self.stream.write_all(&wire).await.unwrap();
        }

        async fn answer_snrm(&mut self, parameters: Option<LinkParameters>) {
            let snrm = self.read_frame().await;
            assert_eq!(snrm.frame_type(), FrameType::SetNormalResponseMode);
            let info = parameters.map(|p| p.encode()).unwrap_or_default();
            let ua = HdlcFrame::new_command(
                self.client,
                self.server,
                FrameType::UnnumberedAcknowledge,
                info,
            );
            self.write_frame(ua).await;
        }
    }

    fn connection(stream: LoopbackStream) -> HdlcConnection<LoopbackStream> {
        HdlcConnection::new(
            stream,
            HdlcSettings {
                client_address: 0x10,
                server_logical_address: 0x01,
                server_physical_address: 0,
                max_information_field_rcv: 256,
                max_information_field_snd: 256,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_negotiates_minimum() {
        let (client_stream, server_stream) = LoopbackStream::pair();
        let mut conn = connection(client_stream);
        let mut server = FakeServer::new(server_stream);

        let server_task = tokio::spawn(async move {
            server
                .answer_snrm(Some(LinkParameters {
                    max_information_field_rcv: 1024,
                    max_information_field_snd: 200,
                    window_tx: 1,
                    window_rx: 1,
                }))
                .await;
        });

        conn.open().await.unwrap();
        server_task.await.unwrap();
        assert_eq!(conn.negotiated_max_rcv(), 256);
        assert_eq!(conn.negotiated_max_snd(), 200);
    }

    #[tokio::test]
    async fn test_open_with_tagless_ua_keeps_defaults() {
        let (client_stream, server_stream) = LoopbackStream::pair();
        let mut conn = connection(client_stream);
        let mut server = FakeServer::new(server_stream);

        let server_task = tokio::spawn(async move {
            server.answer_snrm(None).await;
        });

        conn.open().await.unwrap();
        server_task.await.unwrap();
        assert_eq!(conn.negotiated_max_rcv(), DEFAULT_INFORMATION_FIELD_LENGTH);
        assert_eq!(conn.negotiated_max_snd(), DEFAULT_INFORMATION_FIELD_LENGTH);
    }

    #[tokio::test]
    async fn test_send_receive_roundtrip_with_segmentation() {
        let (client_stream, server_stream) = LoopbackStream::pair();
        let mut conn = connection(client_stream);
        let mut server = FakeServer::new(server_stream);

        // 600 payload bytes force segmentation at max_snd 256.
        let apdu: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
        let expected = apdu.clone();

        let server_task = tokio::spawn(async move {
            server.answer_snrm(None).await;

            // Reassemble the segmented request, acknowledging each segment.
            let mut request = Vec::new();
            let mut recv_seq = 0u8;
            loop {
                let frame = server.read_frame().await;
                assert_eq!(frame.frame_type(), FrameType::Information);
                assert_eq!(frame.send_sequence(), recv_seq);
                recv_seq = (recv_seq + 1) % 8;
                request.extend_from_slice(frame.information());
                if frame.is_segmented() {
                    let rr = HdlcFrame::new_receive_ready(server.client, server.server, recv_seq);
                    server.write_frame(rr).await;
                } else {
                    break;
                }
            }
            assert_eq!(&request[..3], &LLC_REQUEST);

            // Echo the APDU back, segmented in 128-byte frames.
            let mut response = LLC_RESPONSE.to_vec();
            response.extend_from_slice(&request[3..]);
            let chunks: Vec<&[u8]> = response.chunks(128).collect();
            let total = chunks.len();
            let mut send_seq = 0u8;
            for (i, chunk) in chunks.into_iter().enumerate() {
                let last = i + 1 == total;
                let frame = HdlcFrame::new_information(
                    server.client,
                    server.server,
                    send_seq,
                    recv_seq,
                    !last,
                    true,
                    chunk.to_vec(),
                );
                send_seq = (send_seq + 1) % 8;
                server.write_frame(frame).await;
                if !last {
                    let rr = server.read_frame().await;
                    assert_eq!(rr.frame_type(), FrameType::ReceiveReady);
                    assert_eq!(rr.receive_sequence(), send_seq);
                }
            }
        });

        conn.open().await.unwrap();
        conn.send(&apdu).await.unwrap();
        let response = conn.receive().await.unwrap();
        server_task.await.unwrap();
        assert_eq!(response, expected);
    }

    #[tokio::test]
    async fn test_receive_rejects_out_of_order_sequence() {
        let (client_stream, server_stream) = LoopbackStream::pair();
        let mut conn = connection(client_stream);
        let mut server = FakeServer::new(server_stream);

        let server_task = tokio::spawn(async move {
            server.answer_snrm(None).await;
            let _ = server.read_frame().await;
            // N(S)=5 while the client expects 0.
            let mut info = LLC_RESPONSE.to_vec();
            info.push(0xAA);
            let frame =
                HdlcFrame::new_information(server.client, server.server, 5, 1, false, true, info);
            server.write_frame(frame).await;
        });

        conn.open().await.unwrap();
        conn.send(&[0xC0]).await.unwrap();
        let err = conn.receive().await.unwrap_err();
        server_task.await.unwrap();
        assert!(matches!(err, DlmsError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let (client_stream, _server_stream) = LoopbackStream::pair();
        let mut conn = connection(client_stream);
        assert!(matches!(
            conn.send(&[0x00]).await,
            Err(DlmsError::NotOpened)
        ));
    }
}
