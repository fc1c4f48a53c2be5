//! Full-stack exchange: client engine over the HDLC MAC over an in-process
//! byte channel, with a scripted meter on the far end.

use cosem_application::pdu::tags;
use cosem_client::{ClientSettings, ClientState, DlmsClient};
use cosem_core::{DataObject, ObisCode};
use cosem_session::hdlc::{
    FrameType, HdlcAddress, HdlcConnection, HdlcFrame, HdlcSettings, FLAG, LLC_REQUEST,
    LLC_RESPONSE,
};
use cosem_transport::{LoopbackStream, StreamAccessor};

/// Minimal HDLC-speaking meter
struct Meter {
    stream: LoopbackStream,
    client_addr: HdlcAddress,
    server_addr: HdlcAddress,
    send_seq: u8,
    recv_seq: u8,
}

impl Meter {
    fn new(stream: LoopbackStream) -> Self {
        Self {
            stream,
            client_addr: HdlcAddress::new(0x10).unwrap(),
            server_addr: HdlcAddress::new(0x01).unwrap(),
            send_seq: 0,
            recv_seq: 0,
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
        self.stream
            .write_all(&frame.encode().unwrap())
            .await
            .unwrap();
    }

    async fn accept_link(&mut self) {
        let snrm = self.read_frame().await;
        assert_eq!(snrm.frame_type(), FrameType::SetNormalResponseMode);
        let ua = HdlcFrame::new_command(
            self.client_addr,
            self.server_addr,
            FrameType::UnnumberedAcknowledge,
            Vec::new(),
        );
        self.write_frame(ua).await;
    }

    /// Receive one APDU, acknowledging segments
    async fn receive_apdu(&mut self) -> Vec<u8> {
        let mut payload = Vec::new();
        loop {
            let frame = self.read_frame().await;
            assert_eq!(frame.frame_type(), FrameType::Information);
            assert_eq!(frame.send_sequence(), self.recv_seq);
            self.recv_seq = (self.recv_seq + 1) % 8;
            let segmented = frame.is_segmented();
            payload.extend_from_slice(frame.information());
            if segmented {
                let rr =
                    HdlcFrame::new_receive_ready(self.client_addr, self.server_addr, self.recv_seq);
                self.write_frame(rr).await;
            } else {
                break;
            }
        }
        assert_eq!(&payload[..3], &LLC_REQUEST);
        payload.split_off(3)
    }

    /// Send one APDU in a single information frame
    async fn send_apdu(&mut self, apdu: &[u8]) {
        let mut info = LLC_RESPONSE.to_vec();
        info.extend_from_slice(apdu);
        let frame = HdlcFrame::new_information(
            self.client_addr,
            self.server_addr,
            self.send_seq,
            self.recv_seq,
            false,
            true,
            info,
        );
        self.send_seq = (self.send_seq + 1) % 8;
        self.write_frame(frame).await;
    }
}

fn aare_accepted() -> Vec<u8> {
    vec![
        0x61, 0x1D, 0xA1, 0x09, 0x06, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01, 0xA2, 0x03,
        0x02, 0x01, 0x00, 0xA3, 0x05, 0xA1, 0x03, 0x02, 0x01, 0x00, 0xBE, 0x10, 0x04, 0x0E, 0x08,
        0x00, 0x06, 0x5F, 0x1F, 0x04, 0x00, 0x7E, 0x1F, 0x04, 0x03, 0xC0, 0x00, 0x07,
    ]
}

#[tokio::test]
async fn test_get_over_hdlc_link() {
    let (client_stream, meter_stream) = LoopbackStream::pair();
    let mut meter = Meter::new(meter_stream);

    let meter_task = tokio::spawn(async move {
        meter.accept_link().await;

        let aarq = meter.receive_apdu().await;
        assert_eq!(aarq[0], tags::AARQ);
        meter.send_apdu(&aare_accepted()).await;

        let get = meter.receive_apdu().await;
        assert_eq!(
            get,
            vec![0xC0, 0x01, 0xC1, 0x00, 0x03, 0x01, 0x00, 0x01, 0x08, 0x00, 0xFF, 0x02, 0x00]
        );
        meter
            .send_apdu(&[0xC4, 0x01, 0xC1, 0x00, 0x06, 0x00, 0x00, 0x00, 0x7B])
            .await;

        let rlrq = meter.receive_apdu().await;
        assert_eq!(rlrq, vec![0x63, 0x03, 0x80, 0x01, 0x00]);
        meter.send_apdu(&[0x63, 0x00]).await;

        let disc = meter.read_frame().await;
        assert_eq!(disc.frame_type(), FrameType::Disconnect);
        let ua = HdlcFrame::new_command(
            meter.client_addr,
            meter.server_addr,
            FrameType::UnnumberedAcknowledge,
            Vec::new(),
        );
        meter.write_frame(ua).await;
    });

    let link = HdlcConnection::new(client_stream, HdlcSettings::default()).unwrap();
    let settings = ClientSettings::with_low_authentication(b"12345678");
    let mut client = DlmsClient::new(link, settings).unwrap();

    client.open().await.unwrap();
    assert_eq!(client.state(), ClientState::Associated);
    assert_eq!(client.max_pdu_send(), 960);
    assert_eq!(client.va_address(), 7);

    let item = cosem_application::CosemAttribute::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2);
    let values = client.get(&[item]).await.unwrap();
    assert_eq!(values, vec![DataObject::Unsigned32(123)]);

    client.close().await.unwrap();
    meter_task.await.unwrap();
}

#[tokio::test]
async fn test_segmented_response_over_hdlc_link() {
    let (client_stream, meter_stream) = LoopbackStream::pair();
    let mut meter = Meter::new(meter_stream);

    // A response larger than the negotiated 128-byte information field
    // forces the meter to segment it.
    let value = DataObject::OctetString((0..200u8).collect());
    let mut response = vec![0xC4, 0x01, 0xC1, 0x00];
    response.extend_from_slice(&cosem_axdr::encode(&value).unwrap());
    let expected = value.clone();

    let meter_task = tokio::spawn(async move {
        meter.accept_link().await;
        let aarq = meter.receive_apdu().await;
        assert_eq!(aarq[0], tags::AARQ);
        meter.send_apdu(&aare_accepted()).await;

        let _get = meter.receive_apdu().await;
        let mut info = LLC_RESPONSE.to_vec();
        info.extend_from_slice(&response);
        let chunks: Vec<&[u8]> = info.chunks(128).collect();
        let total = chunks.len();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let last = i + 1 == total;
            let frame = HdlcFrame::new_information(
                meter.client_addr,
                meter.server_addr,
                meter.send_seq,
                meter.recv_seq,
                !last,
                true,
                chunk.to_vec(),
            );
            meter.send_seq = (meter.send_seq + 1) % 8;
            meter.write_frame(frame).await;
            if !last {
                let rr = meter.read_frame().await;
                assert_eq!(rr.frame_type(), FrameType::ReceiveReady);
            }
        }
    });

    let link = HdlcConnection::new(
        client_stream,
        HdlcSettings {
            max_information_field_rcv: 128,
            max_information_field_snd: 128,
            ..HdlcSettings::default()
        },
    )
    .unwrap();
    let mut client = DlmsClient::new(
        link,
        ClientSettings::with_low_authentication(b"12345678"),
    )
    .unwrap();

    client.open().await.unwrap();
    let item = cosem_application::CosemAttribute::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2);
    let values = client.get(&[item]).await.unwrap();
    assert_eq!(values, vec![expected]);

    client.disconnect().await.unwrap();
    meter_task.await.unwrap();
}
