//! DLMS client session engine
//!
//! Drives the association lifecycle and the GET/SET/ACTION/READ/WRITE
//! request/response flows over a `SessionLayer`, including list fallback,
//! block transfer, ciphering and the post-associate HLS exchange.

use crate::data_stream::{BlockSource, DataStream};
use crate::settings::ClientSettings;
use cosem_application::association::{build_aarq, build_rlrq, Aare, AarqParameters};
use cosem_application::encrypted::{
    recognize_ciphered_response, unwrap_response, wrap_request, CipherKind,
};
use cosem_application::pdu::{
    decode_exception_response, tags, Conformance, CosemAttribute, InitiateRequest,
    InitiateResponse, InvokeIdAndPriority, SnItem, INVOKE_CONFIRMED, INVOKE_HIGH_PRIORITY,
};
use cosem_application::service::{
    decode_action_response, decode_get_response, decode_read_response, decode_set_response,
    decode_write_response, encode_action_next, encode_action_normal, encode_get_next,
    encode_get_normal, encode_get_with_list, encode_read_block_next, encode_read_request,
    encode_set_block, encode_set_first_block, encode_set_normal, encode_set_with_list,
    encode_set_with_list_first_block, encode_write_request, ActionResponseBody, GetResponseBody,
    ReadResponseItem, SetResponseBody,
};
use cosem_application::v44;
use cosem_axdr::{AxdrDecoder, AxdrEncoder, LengthEncoding};
use cosem_core::error::{DlmsError, DlmsResult};
use cosem_core::{DataAccessResult, DataObject, ObisCode};
use cosem_security::{
    challenge_digest, generate_challenge, AuthenticationMechanism, CipherContext, HashDirection,
    SystemTitle, GCM_TAG_LENGTH, SC_AUTHENTICATED,
};
use cosem_session::SessionLayer;

/// Association LN object driving the HLS reply-to-HLS exchange
const ASSOCIATION_LN_CLASS: u16 = 15;
const ASSOCIATION_LN_REPLY_METHOD: i8 = 1;

/// Fixed per-request allowance subtracted from the negotiated PDU size
const PDU_OVERHEAD: usize = 16;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Associated,
}

/// One client session towards a meter
///
/// A session is driven from one flow at a time: a new request may only be
/// submitted once the previous response, including a streamed block-transfer
/// tail, is fully consumed.
pub struct DlmsClient<S: SessionLayer> {
    session: S,
    settings: ClientSettings,
    state: ClientState,
    invoke_id: u8,
    negotiated_conformance: Conformance,
    max_pdu_send: u16,
    va_address: i16,
    authentication_required: bool,
    global_cipher: Option<CipherContext>,
    dedicated_cipher: Option<CipherContext>,
    client_challenge: Option<Vec<u8>>,
    server_challenge: Option<Vec<u8>>,
    /// Reusable outgoing PDU buffer
    pdu_buffer: Vec<u8>,
}

impl<S: SessionLayer> DlmsClient<S> {
    pub fn new(session: S, settings: ClientSettings) -> DlmsResult<Self> {
        let (global_cipher, dedicated_cipher) = match &settings.security {
            Some(sec) => {
                let title = SystemTitle::new(sec.client_system_title);
                let global =
                    CipherContext::new(&sec.encryption_key, &sec.authentication_key, title)?;
                let dedicated = sec
                    .dedicated_key
                    .as_ref()
                    .map(|key| CipherContext::new(key, &sec.authentication_key, title))
                    .transpose()?;
                (Some(global), dedicated)
            }
            None => (None, None),
        };
        let va_address = settings.va_address;
        let conformance = Conformance(settings.conformance_block);
        Ok(Self {
            session,
            settings,
            state: ClientState::Idle,
            invoke_id: 1,
            negotiated_conformance: conformance,
            max_pdu_send: 0,
            va_address,
            authentication_required: false,
            global_cipher,
            dedicated_cipher,
            client_challenge: None,
            server_challenge: None,
            pdu_buffer: Vec::new(),
        })
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn negotiated_conformance(&self) -> Conformance {
        self.negotiated_conformance
    }

    pub fn max_pdu_send(&self) -> u16 {
        self.max_pdu_send
    }

    pub fn va_address(&self) -> i16 {
        self.va_address
    }

    /// Whether the AARE demanded the post-associate HLS exchange
    pub fn authentication_required(&self) -> bool {
        self.authentication_required
    }

    pub fn client_challenge(&self) -> Option<&[u8]> {
        self.client_challenge.as_deref()
    }

    pub fn server_challenge(&self) -> Option<&[u8]> {
        self.server_challenge.as_deref()
    }

    /// Open the transport and establish the application association
    pub async fn open(&mut self) -> DlmsResult<()> {
        self.session.open().await?;

        let initiate = InitiateRequest {
            dedicated_key: self
                .settings
                .security
                .as_ref()
                .and_then(|sec| sec.dedicated_key.clone()),
            proposed_conformance: Conformance(self.settings.conformance_block),
            client_max_receive_pdu_size: self.settings.max_pdu_recv_size,
        };
        let mut user_information = initiate.encode();
        if self.settings.application_context.is_ciphered()
            && !self.settings.dont_encrypt_user_information
        {
            let sc = self
                .settings
                .security
                .as_ref()
                .ok_or_else(|| {
                    DlmsError::Security("ciphered context without key material".to_string())
                })?
                .security_control;
            let cipher = self
                .global_cipher
                .as_mut()
                .expect("security settings build the global cipher");
            user_information = wrap_request(cipher, CipherKind::Global, sc, &user_information)?;
        }

        let mechanism = self.settings.authentication_mechanism;
        let calling_authentication_value = match mechanism {
            AuthenticationMechanism::None => None,
            AuthenticationMechanism::Low => Some(self.settings.password.clone()),
            _ => {
                // CtoS: explicit for GMAC when configured, random otherwise.
                let ctos = if mechanism == AuthenticationMechanism::HighGmac
                    && !self.settings.password.is_empty()
                {
                    self.settings.password.clone()
                } else {
                    generate_challenge(16)?
                };
                self.client_challenge = Some(ctos.clone());
                Some(ctos)
            }
        };

        let aarq = build_aarq(&AarqParameters {
            context: self.settings.application_context,
            mechanism,
            client_system_title: self
                .settings
                .security
                .as_ref()
                .map(|sec| sec.client_system_title),
            user_id: self.settings.user_id,
            calling_authentication_value,
            user_information,
        });
        self.session.send(&aarq).await?;
        let response = self.session.receive().await?;

        let aare = Aare::decode(&response)?;
        self.authentication_required = aare.validate()?;

        // Both ciphers learn the peer identity before the user information
        // is opened; it may already be ciphered.
        if let Some(title_bytes) = &aare.server_system_title {
            let title = SystemTitle::from_slice(title_bytes)?;
            if let Some(cipher) = &mut self.global_cipher {
                cipher.setup(title, aare.server_to_client_challenge.clone());
            }
            if let Some(cipher) = &mut self.dedicated_cipher {
                cipher.setup(title, aare.server_to_client_challenge.clone());
            }
        }
        self.server_challenge = aare.server_to_client_challenge.clone();

        let mut user_information = aare.user_information.ok_or_else(|| {
            DlmsError::Decoding("AARE carries no user information".to_string())
        })?;
        if let Some(kind) = user_information
            .first()
            .and_then(|tag| recognize_ciphered_response(*tag))
        {
            let cipher = self.cipher_for(kind)?;
            user_information = unwrap_response(cipher, &user_information)?;
        }
        if user_information.first() != Some(&tags::INITIATE_RESPONSE)
            && user_information.first() != Some(&tags::CONFIRMED_SERVICE_ERROR)
        {
            // Compressed InitiateResponse path.
            let inflated = v44::decompress(&user_information)?;
            if inflated.first() == Some(&tags::INITIATE_RESPONSE) {
                log::debug!("InitiateResponse arrived V.44 compressed");
                user_information = inflated;
            }
        }
        let initiate_response = InitiateResponse::decode(&user_information)?;

        self.negotiated_conformance = initiate_response.negotiated_conformance;
        self.max_pdu_send = initiate_response.server_max_receive_pdu_size;
        self.va_address = initiate_response.vaa_address;
        self.state = ClientState::Associated;
        log::debug!(
            "associated: maxPduSend={} vaa={} conformance=0x{:08X}",
            self.max_pdu_send,
            self.va_address,
            self.negotiated_conformance.0
        );
        Ok(())
    }

    /// Release the association and close the transport
    pub async fn close(&mut self) -> DlmsResult<()> {
        if self.state == ClientState::Associated {
            let rlrq = build_rlrq(self.settings.empty_rlrq);
            if self.session.send(&rlrq).await.is_ok() {
                // The RLRE is frequently malformed or missing; read and move on.
                match self.session.receive().await {
                    Ok(rlre) => log::debug!("RLRE: {:02X?}", rlre),
                    Err(e) => log::warn!("no usable RLRE: {}", e),
                }
            }
        }
        self.state = ClientState::Idle;
        self.session.close().await
    }

    /// Hard transport close
    pub async fn disconnect(&mut self) -> DlmsResult<()> {
        self.state = ClientState::Idle;
        self.session.disconnect().await
    }

    /// GET one or more attributes
    ///
    /// The result vector always has one entry per requested item; rejected
    /// items arrive as `DataObject::Error`.
    pub async fn get(&mut self, items: &[CosemAttribute]) -> DlmsResult<Vec<DataObject>> {
        self.require_associated()?;
        if items.is_empty() {
            return Ok(Vec::new());
        }
        if items.len() == 1 {
            return Ok(vec![self.get_single(&items[0]).await?]);
        }
        if !self.negotiated_conformance.multiple_references() {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(self.get_single(item).await?);
            }
            return Ok(values);
        }

        let invoke = self.next_invoke();
        let request = encode_get_with_list(invoke, items)?;
        let response = self.exchange(request).await?;
        if response.first() == Some(&tags::EXCEPTION_RESPONSE) {
            let error = decode_exception_response(&response)?;
            return Ok(vec![error; items.len()]);
        }
        match decode_get_response(&response, invoke)? {
            GetResponseBody::WithList(values) => {
                if values.len() != items.len() {
                    return Err(DlmsError::Protocol(format!(
                        "list response has {} items, requested {}",
                        values.len(),
                        items.len()
                    )));
                }
                Ok(values)
            }
            GetResponseBody::Normal(_) => Err(DlmsError::Protocol(
                "single response to a list request".to_string(),
            )),
            GetResponseBody::WithDataBlock {
                last,
                block_number,
                data,
            } => {
                let assembled = self
                    .assemble_get_blocks(invoke, last, block_number, data)
                    .await?;
                parse_data_result_list(&assembled, items.len())
            }
        }
    }

    async fn get_single(&mut self, item: &CosemAttribute) -> DlmsResult<DataObject> {
        let invoke = self.next_invoke();
        let request = encode_get_normal(invoke, item)?;
        let response = self.exchange(request).await?;
        if response.first() == Some(&tags::EXCEPTION_RESPONSE) {
            return decode_exception_response(&response);
        }
        match decode_get_response(&response, invoke)? {
            GetResponseBody::Normal(value) => Ok(value),
            GetResponseBody::WithDataBlock {
                last,
                block_number,
                data,
            } => {
                let assembled = self
                    .assemble_get_blocks(invoke, last, block_number, data)
                    .await?;
                let mut decoder = AxdrDecoder::new(&assembled);
                decoder.decode_data_object()
            }
            GetResponseBody::WithList(_) => Err(DlmsError::Protocol(
                "list response to a single request".to_string(),
            )),
        }
    }

    /// GET one attribute as a lazy element stream
    pub async fn get_stream(
        &mut self,
        item: &CosemAttribute,
        in_memory: bool,
    ) -> DlmsResult<DataStream<'_, S>> {
        self.require_associated()?;
        let invoke = self.next_invoke();
        let request = encode_get_normal(invoke, item)?;
        let response = self.exchange(request).await?;
        if response.first() == Some(&tags::EXCEPTION_RESPONSE) {
            decode_exception_response(&response)?;
            return Ok(DataStream::new_error(self, DataAccessResult::OtherReason));
        }
        // Shallow parse keeps the raw value bytes for incremental decoding.
        if response.len() >= 4 && response[0] == tags::GET_RESPONSE && response[1] == 0x01 {
            invoke.validate_response(response[2])?;
            if response[3] == 0 {
                let data = response[4..].to_vec();
                return Ok(DataStream::new(
                    self,
                    data,
                    BlockSource::Complete,
                    true,
                    in_memory,
                ));
            }
            let kind = DataAccessResult::from_u8(
                response.get(4).copied().unwrap_or(DataAccessResult::OtherReason.to_u8()),
            );
            return Ok(DataStream::new_error(self, kind));
        }
        match decode_get_response(&response, invoke)? {
            GetResponseBody::WithDataBlock {
                last,
                block_number,
                data,
            } => {
                if block_number != 1 {
                    return Err(DlmsError::Protocol(format!(
                        "unexpected block number {} at stream start",
                        block_number
                    )));
                }
                Ok(DataStream::new(
                    self,
                    data,
                    BlockSource::Get {
                        invoke,
                        next_block: 2,
                    },
                    last,
                    in_memory,
                ))
            }
            other => Err(DlmsError::Protocol(format!(
                "unexpected response shape for a stream request: {:?}",
                other
            ))),
        }
    }

    /// SET one or more attributes; every item must carry a payload
    pub async fn set(&mut self, items: &[CosemAttribute]) -> DlmsResult<Vec<DataAccessResult>> {
        self.require_associated()?;
        if items.is_empty() {
            return Ok(Vec::new());
        }
        if items.len() == 1 {
            return Ok(vec![self.set_single(&items[0]).await?]);
        }
        if !self.negotiated_conformance.multiple_references() {
            let mut results = Vec::with_capacity(items.len());
            for item in items {
                results.push(self.set_single(item).await?);
            }
            return Ok(results);
        }

        let usable = self.usable_pdu_size()?;
        let invoke = self.next_invoke();
        let request = encode_set_with_list(invoke, items)?;
        if request.len() <= usable {
            let response = self.exchange(request).await?;
            if response.first() == Some(&tags::EXCEPTION_RESPONSE) {
                decode_exception_response(&response)?;
                return Ok(vec![DataAccessResult::OtherReason; items.len()]);
            }
            return match decode_set_response(&response, invoke)? {
                SetResponseBody::WithList(results) => Ok(pad_results(results, items.len())),
                SetResponseBody::Normal(result) => Ok(vec![result; items.len()]),
                other => Err(DlmsError::Protocol(format!(
                    "unexpected SET list response: {:?}",
                    other
                ))),
            };
        }

        // Blocked list transfer: descriptors first, then the chunked values.
        let first = encode_set_with_list_first_block(invoke, items)?;
        if first.len() > usable {
            return Err(DlmsError::Protocol("max pdu too small".to_string()));
        }
        let mut values = Vec::new();
        values.extend_from_slice(&LengthEncoding::for_value(items.len()).encode());
        for item in items {
            let payload = item.payload.as_ref().ok_or_else(|| {
                DlmsError::Encoding("SET item carries no value".to_string())
            })?;
            let mut encoder = AxdrEncoder::new();
            encoder.encode_data_object(payload)?;
            values.extend_from_slice(encoder.as_bytes());
        }
        match self.run_set_block_transfer(invoke, first, &values, usable).await? {
            SetResponseBody::LastDataBlockWithList(results) => {
                Ok(pad_results(results, items.len()))
            }
            SetResponseBody::LastDataBlock(result) => Ok(vec![result; items.len()]),
            other => Err(DlmsError::Protocol(format!(
                "unexpected final SET block response: {:?}",
                other
            ))),
        }
    }

    async fn set_single(&mut self, item: &CosemAttribute) -> DlmsResult<DataAccessResult> {
        let usable = self.usable_pdu_size()?;
        let invoke = self.next_invoke();
        let request = encode_set_normal(invoke, item)?;
        if request.len() <= usable {
            let response = self.exchange(request).await?;
            if response.first() == Some(&tags::EXCEPTION_RESPONSE) {
                decode_exception_response(&response)?;
                return Ok(DataAccessResult::OtherReason);
            }
            return match decode_set_response(&response, invoke)? {
                SetResponseBody::Normal(result) => Ok(result),
                other => Err(DlmsError::Protocol(format!(
                    "unexpected SET response: {:?}",
                    other
                ))),
            };
        }

        let first = encode_set_first_block(invoke, item)?;
        if first.len() > usable {
            return Err(DlmsError::Protocol("max pdu too small".to_string()));
        }
        let payload = item.payload.as_ref().ok_or_else(|| {
            DlmsError::Encoding("SET item carries no value".to_string())
        })?;
        let mut encoder = AxdrEncoder::new();
        encoder.encode_data_object(payload)?;
        match self
            .run_set_block_transfer(invoke, first, encoder.as_bytes(), usable)
            .await?
        {
            SetResponseBody::LastDataBlock(result) => Ok(result),
            SetResponseBody::Normal(result) => Ok(result),
            other => Err(DlmsError::Protocol(format!(
                "unexpected final SET block response: {:?}",
                other
            ))),
        }
    }

    /// Drive `C1 02/05` + repeated `C1 03` and return the final response
    async fn run_set_block_transfer(
        &mut self,
        invoke: InvokeIdAndPriority,
        first_request: Vec<u8>,
        value_bytes: &[u8],
        usable: usize,
    ) -> DlmsResult<SetResponseBody> {
        let response = self.exchange(first_request).await?;
        match decode_set_response(&response, invoke)? {
            SetResponseBody::DataBlock { .. } => {}
            other => {
                return Err(DlmsError::Protocol(format!(
                    "expected a block acknowledge, got {:?}",
                    other
                )))
            }
        }

        let chunk_size = usable.max(1);
        let chunks: Vec<&[u8]> = value_bytes.chunks(chunk_size).collect();
        let total = chunks.len();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let block_number = (i + 1) as u32;
            let last = i + 1 == total;
            let request = encode_set_block(invoke, last, block_number, chunk);
            let response = self.exchange(request).await?;
            let body = decode_set_response(&response, invoke)?;
            if last {
                return Ok(body);
            }
            match body {
                SetResponseBody::DataBlock {
                    block_number: acked,
                } if acked == block_number => {}
                SetResponseBody::DataBlock { block_number: acked } => {
                    return Err(DlmsError::Protocol(format!(
                        "unexpected block number: acknowledged {}, sent {}",
                        acked, block_number
                    )))
                }
                other => {
                    return Err(DlmsError::Protocol(format!(
                        "unexpected mid-transfer SET response: {:?}",
                        other
                    )))
                }
            }
        }
        Err(DlmsError::Protocol("SET transfer had no blocks".to_string()))
    }

    /// Invoke one method; only single-method invocation is supported
    pub async fn action(&mut self, item: &CosemAttribute) -> DlmsResult<Option<DataObject>> {
        self.require_associated()?;
        let invoke = self.next_invoke();
        let request = encode_action_normal(invoke, item)?;
        let response = self.exchange(request).await?;
        if response.first() == Some(&tags::EXCEPTION_RESPONSE) {
            return decode_exception_response(&response).map(Some);
        }
        match decode_action_response(&response, invoke)? {
            ActionResponseBody::Normal { status, data } => {
                if !status.is_success() {
                    return Err(DlmsError::AccessDenied(format!(
                        "action rejected: {}",
                        status
                    )));
                }
                Ok(data)
            }
            ActionResponseBody::WithBlock {
                last,
                block_number,
                data,
            } => {
                if block_number != 1 {
                    return Err(DlmsError::Protocol(format!(
                        "unexpected block number {} at transfer start",
                        block_number
                    )));
                }
                let mut assembled = data;
                let mut expected = block_number;
                let mut done = last;
                while !done {
                    expected += 1;
                    let (chunk, is_last) = self.fetch_action_block(invoke, expected).await?;
                    assembled.extend_from_slice(&chunk);
                    done = is_last;
                }
                parse_action_result(&assembled)
            }
        }
    }

    /// READ one or more short-name items
    pub async fn read(&mut self, items: &[SnItem]) -> DlmsResult<Vec<DataObject>> {
        self.require_associated()?;
        if items.is_empty() {
            return Ok(Vec::new());
        }
        if items.len() > 1 && !self.negotiated_conformance.multiple_references() {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.extend(self.read_batch(std::slice::from_ref(item)).await?);
            }
            return Ok(values);
        }
        self.read_batch(items).await
    }

    async fn read_batch(&mut self, items: &[SnItem]) -> DlmsResult<Vec<DataObject>> {
        let request = encode_read_request(items)?;
        let response = self.exchange(request).await?;
        if response.first() == Some(&tags::EXCEPTION_RESPONSE) {
            let error = decode_exception_response(&response)?;
            return Ok(vec![error; items.len()]);
        }
        let parsed = decode_read_response(&response)?;

        if let [ReadResponseItem::Block {
            last,
            block_number,
            data,
        }] = parsed.as_slice()
        {
            if *block_number != 1 {
                return Err(DlmsError::Protocol(format!(
                    "unexpected block number {} at transfer start",
                    block_number
                )));
            }
            let mut assembled = data.clone();
            let mut expected = *block_number;
            let mut done = *last;
            while !done {
                expected += 1;
                let (chunk, is_last) = self.fetch_read_block(expected).await?;
                assembled.extend_from_slice(&chunk);
                done = is_last;
            }
            return parse_read_item_list(&assembled, items.len());
        }

        if parsed.len() != items.len() {
            return Err(DlmsError::Protocol(format!(
                "READ response has {} items, requested {}",
                parsed.len(),
                items.len()
            )));
        }
        parsed
            .into_iter()
            .map(|item| match item {
                ReadResponseItem::Data(value) => Ok(value),
                ReadResponseItem::Block { .. } => Err(DlmsError::Protocol(
                    "unexpected block item in a multi-item response".to_string(),
                )),
            })
            .collect()
    }

    /// READ one short-name item as a lazy element stream
    pub async fn read_stream(
        &mut self,
        item: &SnItem,
        in_memory: bool,
    ) -> DlmsResult<DataStream<'_, S>> {
        self.require_associated()?;
        let request = encode_read_request(std::slice::from_ref(item))?;
        let response = self.exchange(request).await?;
        if response.first() == Some(&tags::EXCEPTION_RESPONSE) {
            decode_exception_response(&response)?;
            return Ok(DataStream::new_error(self, DataAccessResult::OtherReason));
        }
        // 0C 01 <choice> ...
        if response.len() >= 3 && response[0] == tags::READ_RESPONSE && response[1] == 0x01 {
            match response[2] {
                0x00 => {
                    let data = response[3..].to_vec();
                    return Ok(DataStream::new(
                        self,
                        data,
                        BlockSource::Complete,
                        true,
                        in_memory,
                    ));
                }
                0x01 => {
                    let kind = DataAccessResult::from_u8(
                        response
                            .get(3)
                            .copied()
                            .unwrap_or(DataAccessResult::OtherReason.to_u8()),
                    );
                    return Ok(DataStream::new_error(self, kind));
                }
                _ => {}
            }
        }
        match decode_read_response(&response)?.as_slice() {
            [ReadResponseItem::Block {
                last,
                block_number: 1,
                data,
            }] => {
                // The inner items of a streamed single READ start with the
                // item choice byte.
                let mut chunk = data.clone();
                match chunk.first().copied() {
                    Some(0x00) => {
                        chunk.remove(0);
                    }
                    Some(0x01) => {
                        let kind = DataAccessResult::from_u8(
                            chunk
                                .get(1)
                                .copied()
                                .unwrap_or(DataAccessResult::OtherReason.to_u8()),
                        );
                        return Ok(DataStream::new_error(self, kind));
                    }
                    _ => {
                        return Err(DlmsError::Protocol(
                            "malformed first READ block".to_string(),
                        ))
                    }
                }
                let done = *last;
                Ok(DataStream::new(
                    self,
                    chunk,
                    BlockSource::Read { next_block: 2 },
                    done,
                    in_memory,
                ))
            }
            other => Err(DlmsError::Protocol(format!(
                "unexpected response shape for a stream request: {:?}",
                other
            ))),
        }
    }

    /// WRITE one or more short-name items
    pub async fn write(&mut self, items: &[SnItem]) -> DlmsResult<Vec<DataAccessResult>> {
        self.require_associated()?;
        if items.is_empty() {
            return Ok(Vec::new());
        }
        if items.len() > 1 && !self.negotiated_conformance.multiple_references() {
            let mut results = Vec::with_capacity(items.len());
            for item in items {
                results.extend(self.write_batch(std::slice::from_ref(item)).await?);
            }
            return Ok(results);
        }
        self.write_batch(items).await
    }

    async fn write_batch(&mut self, items: &[SnItem]) -> DlmsResult<Vec<DataAccessResult>> {
        let request = encode_write_request(items)?;
        let response = self.exchange(request).await?;
        if response.first() == Some(&tags::EXCEPTION_RESPONSE) {
            decode_exception_response(&response)?;
            return Ok(vec![DataAccessResult::OtherReason; items.len()]);
        }
        Ok(pad_results(decode_write_response(&response)?, items.len()))
    }

    /// Post-associate HLS exchange via the Association LN object
    pub async fn ln_authenticate(&mut self, check_response: bool) -> DlmsResult<()> {
        self.require_associated()?;
        let mechanism = self.settings.authentication_mechanism;
        if !mechanism.is_high_level() {
            return Err(DlmsError::Security(
                "no high-level authentication mechanism configured".to_string(),
            ));
        }
        let stoc = self
            .server_challenge
            .clone()
            .ok_or_else(|| DlmsError::Security("AARE carried no server challenge".to_string()))?;

        let parameter = match mechanism {
            AuthenticationMechanism::HighGmac => {
                let sc = SC_AUTHENTICATED
                    | self
                        .settings
                        .security
                        .as_ref()
                        .map(|sec| sec.security_control & 0x0F)
                        .unwrap_or(0);
                let cipher = self.global_cipher.as_mut().ok_or_else(|| {
                    DlmsError::Security("GMAC authentication requires cipher keys".to_string())
                })?;
                let fc = cipher.take_frame_counter()?;
                let tag = cipher.hash(HashDirection::ClientToServer, sc, fc, &stoc)?;
                let mut bytes = Vec::with_capacity(5 + GCM_TAG_LENGTH);
                bytes.push(sc);
                bytes.extend_from_slice(&fc.to_be_bytes());
                bytes.extend_from_slice(&tag);
                bytes
            }
            AuthenticationMechanism::HighEcdsa => {
                return Err(DlmsError::Security(
                    "unsupported mechanism: ECDSA signing is not implemented".to_string(),
                ))
            }
            _ => challenge_digest(mechanism, &self.settings.password, &stoc)?,
        };

        let item = CosemAttribute::new(
            ASSOCIATION_LN_CLASS,
            ObisCode::new(0, 0, 40, 0, 0, 255),
            ASSOCIATION_LN_REPLY_METHOD,
        )
        .with_payload(DataObject::OctetString(parameter));
        let reply = self.action(&item).await?;

        if !check_response {
            return Ok(());
        }
        let ctos = self
            .client_challenge
            .clone()
            .ok_or(DlmsError::InvalidAuthenticationResponse)?;
        let reply_bytes = match reply {
            Some(DataObject::OctetString(bytes)) => bytes,
            _ => return Err(DlmsError::InvalidAuthenticationResponse),
        };
        let valid = match mechanism {
            AuthenticationMechanism::HighGmac => {
                if reply_bytes.len() != 5 + GCM_TAG_LENGTH {
                    return Err(DlmsError::InvalidAuthenticationResponse);
                }
                let sc = reply_bytes[0];
                let fc = u32::from_be_bytes([
                    reply_bytes[1],
                    reply_bytes[2],
                    reply_bytes[3],
                    reply_bytes[4],
                ]);
                let cipher = self
                    .global_cipher
                    .as_ref()
                    .ok_or(DlmsError::InvalidAuthenticationResponse)?;
                cipher.verify(sc, fc, &ctos, &reply_bytes[5..])?
            }
            _ => {
                let expected = challenge_digest(mechanism, &self.settings.password, &ctos)?;
                expected == reply_bytes
            }
        };
        if valid {
            Ok(())
        } else {
            Err(DlmsError::InvalidAuthenticationResponse)
        }
    }

    /// Fetch one GET continuation block (also driven by `DataStream`)
    pub(crate) async fn fetch_get_block(
        &mut self,
        invoke: InvokeIdAndPriority,
        block_number: u32,
    ) -> DlmsResult<(Vec<u8>, bool)> {
        let response = self.exchange(encode_get_next(invoke, block_number)).await?;
        if response.first() == Some(&tags::EXCEPTION_RESPONSE) {
            decode_exception_response(&response)?;
            return Err(DlmsError::Protocol(
                "exception response during block transfer".to_string(),
            ));
        }
        match decode_get_response(&response, invoke)? {
            GetResponseBody::WithDataBlock {
                last,
                block_number: got,
                data,
            } => {
                if got != block_number {
                    return Err(DlmsError::Protocol(format!(
                        "unexpected block number: got {}, expected {}",
                        got, block_number
                    )));
                }
                Ok((data, last))
            }
            other => Err(DlmsError::Protocol(format!(
                "expected a data block, got {:?}",
                other
            ))),
        }
    }

    /// Fetch one SN READ continuation block
    pub(crate) async fn fetch_read_block(
        &mut self,
        block_number: u16,
    ) -> DlmsResult<(Vec<u8>, bool)> {
        let response = self.exchange(encode_read_block_next(block_number)).await?;
        match decode_read_response(&response)?.as_slice() {
            [ReadResponseItem::Block {
                last,
                block_number: got,
                data,
            }] => {
                if *got != block_number {
                    return Err(DlmsError::Protocol(format!(
                        "unexpected block number: got {}, expected {}",
                        got, block_number
                    )));
                }
                Ok((data.clone(), *last))
            }
            other => Err(DlmsError::Protocol(format!(
                "expected a data block, got {:?}",
                other
            ))),
        }
    }

    async fn fetch_action_block(
        &mut self,
        invoke: InvokeIdAndPriority,
        block_number: u32,
    ) -> DlmsResult<(Vec<u8>, bool)> {
        let response = self
            .exchange(encode_action_next(invoke, block_number))
            .await?;
        match decode_action_response(&response, invoke)? {
            ActionResponseBody::WithBlock {
                last,
                block_number: got,
                data,
            } => {
                if got != block_number {
                    return Err(DlmsError::Protocol(format!(
                        "unexpected block number: got {}, expected {}",
                        got, block_number
                    )));
                }
                Ok((data, last))
            }
            other => Err(DlmsError::Protocol(format!(
                "expected a data block, got {:?}",
                other
            ))),
        }
    }

    async fn assemble_get_blocks(
        &mut self,
        invoke: InvokeIdAndPriority,
        first_last: bool,
        first_block: u32,
        first_data: Vec<u8>,
    ) -> DlmsResult<Vec<u8>> {
        if first_block != 1 {
            return Err(DlmsError::Protocol(format!(
                "unexpected block number {} at transfer start",
                first_block
            )));
        }
        let mut assembled = first_data;
        let mut expected = first_block;
        let mut done = first_last;
        while !done {
            expected += 1;
            let (chunk, last) = self.fetch_get_block(invoke, expected).await?;
            assembled.extend_from_slice(&chunk);
            done = last;
        }
        Ok(assembled)
    }

    /// Cipher-wrap, send, receive, and unwrap one request/response pair
    async fn exchange(&mut self, apdu: Vec<u8>) -> DlmsResult<Vec<u8>> {
        let result = self.exchange_inner(apdu).await;
        if result.is_err() {
            // A failed exchange leaves the session unusable until re-open.
            self.state = ClientState::Idle;
        }
        result
    }

    async fn exchange_inner(&mut self, apdu: Vec<u8>) -> DlmsResult<Vec<u8>> {
        self.pdu_buffer.clear();
        if let Some(sec) = &self.settings.security {
            let sc = sec.security_control;
            let kind = if self.dedicated_cipher.is_some() {
                CipherKind::Dedicated
            } else {
                CipherKind::Global
            };
            let cipher = match kind {
                CipherKind::Dedicated => self.dedicated_cipher.as_mut(),
                CipherKind::Global => self.global_cipher.as_mut(),
            }
            .expect("cipher present for its kind");
            let wrapped = wrap_request(cipher, kind, sc, &apdu)?;
            self.pdu_buffer.extend_from_slice(&wrapped);
        } else {
            self.pdu_buffer.extend_from_slice(&apdu);
        }

        self.session.send(&self.pdu_buffer).await?;
        let response = self.session.receive().await?;
        let tag = *response.first().ok_or(DlmsError::NothingToRead)?;
        if let Some(kind) = recognize_ciphered_response(tag) {
            let cipher = self.cipher_for(kind)?;
            return unwrap_response(cipher, &response);
        }
        Ok(response)
    }

    fn cipher_for(&self, kind: CipherKind) -> DlmsResult<&CipherContext> {
        match kind {
            CipherKind::Global => self.global_cipher.as_ref(),
            CipherKind::Dedicated => self.dedicated_cipher.as_ref(),
        }
        .ok_or_else(|| {
            DlmsError::Security("ciphered response without a matching cipher".to_string())
        })
    }

    fn next_invoke(&mut self) -> InvokeIdAndPriority {
        let mut flags = 0u8;
        if self.settings.high_priority {
            flags |= INVOKE_HIGH_PRIORITY;
        }
        if self.settings.confirmed_requests {
            flags |= INVOKE_CONFIRMED;
        }
        let invoke = InvokeIdAndPriority::new(self.invoke_id, flags);
        self.invoke_id = (self.invoke_id + 1) % 8;
        invoke
    }

    fn require_associated(&self) -> DlmsResult<()> {
        if self.state == ClientState::Associated {
            Ok(())
        } else {
            Err(DlmsError::NotOpened)
        }
    }

    /// Request bytes that fit the negotiated PDU after framing and ciphering
    fn usable_pdu_size(&self) -> DlmsResult<usize> {
        if self.max_pdu_send == 0 {
            return Ok(usize::MAX / 2);
        }
        let overhead = PDU_OVERHEAD
            + if self.settings.security.is_some() {
                GCM_TAG_LENGTH
            } else {
                0
            };
        (self.max_pdu_send as usize)
            .checked_sub(overhead)
            .filter(|usable| *usable > 0)
            .ok_or_else(|| DlmsError::Protocol("max pdu too small".to_string()))
    }
}

/// `<n> { 00 <value> | <err> <kind> } …` reassembled from a blocked list response
fn parse_data_result_list(bytes: &[u8], expected: usize) -> DlmsResult<Vec<DataObject>> {
    let mut dec = AxdrDecoder::new(bytes);
    let count = dec.decode_length()?;
    if count != expected {
        return Err(DlmsError::Protocol(format!(
            "list response has {} items, requested {}",
            count, expected
        )));
    }
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        if dec.read_byte()? == 0 {
            values.push(dec.decode_data_object()?);
        } else {
            values.push(DataObject::Error(DataAccessResult::from_u8(
                dec.read_byte()?,
            )));
        }
    }
    Ok(values)
}

/// Inner items of a reassembled SN READ block stream
fn parse_read_item_list(bytes: &[u8], expected: usize) -> DlmsResult<Vec<DataObject>> {
    let mut dec = AxdrDecoder::new(bytes);
    let mut values = Vec::with_capacity(expected);
    for _ in 0..expected {
        match dec.read_byte()? {
            0x00 => values.push(dec.decode_data_object()?),
            0x01 => values.push(DataObject::Error(DataAccessResult::from_u8(
                dec.read_byte()?,
            ))),
            other => {
                return Err(DlmsError::Protocol(format!(
                    "unknown item variant 0x{:02X} in block stream",
                    other
                )))
            }
        }
    }
    Ok(values)
}

/// `<status> [<present> <get-data-result>]` reassembled from an ACTION block stream
fn parse_action_result(bytes: &[u8]) -> DlmsResult<Option<DataObject>> {
    let mut dec = AxdrDecoder::new(bytes);
    let status = DataAccessResult::from_u8(dec.read_byte()?);
    if !status.is_success() {
        return Err(DlmsError::AccessDenied(format!(
            "action rejected: {}",
            status
        )));
    }
    if dec.remaining() == 0 || dec.read_byte()? != 0x01 {
        return Ok(None);
    }
    if dec.read_byte()? == 0 {
        Ok(Some(dec.decode_data_object()?))
    } else {
        Ok(Some(DataObject::Error(DataAccessResult::from_u8(
            dec.read_byte()?,
        ))))
    }
}

/// Per-item result vectors always match the requested length
fn pad_results(mut results: Vec<DataAccessResult>, expected: usize) -> Vec<DataAccessResult> {
    results.truncate(expected);
    while results.len() < expected {
        results.push(DataAccessResult::OtherReason);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SecuritySettings;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Scripted meter side: each entry pairs an expected request (None
    /// accepts anything) with the canned response.
    struct FakeSession {
        script: VecDeque<(Option<Vec<u8>>, Vec<u8>)>,
        pending: Option<Vec<u8>>,
        sent: Vec<Vec<u8>>,
        opened: bool,
    }

    impl FakeSession {
        fn new(script: Vec<(Option<Vec<u8>>, Vec<u8>)>) -> Self {
            Self {
                script: script.into(),
                pending: None,
                sent: Vec::new(),
                opened: false,
            }
        }
    }

    #[async_trait]
    impl SessionLayer for FakeSession {
        async fn open(&mut self) -> DlmsResult<()> {
            self.opened = true;
            Ok(())
        }

        async fn send(&mut self, apdu: &[u8]) -> DlmsResult<()> {
            let (expected, response) = self
                .script
                .pop_front()
                .ok_or_else(|| DlmsError::Protocol("unscripted request".to_string()))?;
            if let Some(expected) = expected {
                assert_eq!(apdu, expected.as_slice(), "request bytes diverge");
            }
            self.sent.push(apdu.to_vec());
            self.pending = Some(response);
            Ok(())
        }

        async fn receive(&mut self) -> DlmsResult<Vec<u8>> {
            self.pending.take().ok_or(DlmsError::NothingToRead)
        }

        async fn close(&mut self) -> DlmsResult<()> {
            self.opened = false;
            Ok(())
        }

        async fn disconnect(&mut self) -> DlmsResult<()> {
            self.opened = false;
            Ok(())
        }
    }

    fn aarq_low_auth() -> Vec<u8> {
        vec![
            0x60, 0x36, 0xA1, 0x09, 0x06, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01, 0x8A,
            0x02, 0x07, 0x80, 0x8B, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x02, 0x01, 0xAC, 0x0A,
            0x80, 0x08, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0xBE, 0x10, 0x04, 0x0E,
            0x01, 0x00, 0x00, 0x00, 0x06, 0x5F, 0x1F, 0x04, 0x00, 0x7E, 0x1F, 0x04, 0x04, 0xB0,
        ]
    }

    fn aare_accepted() -> Vec<u8> {
        vec![
            0x61, 0x1D, 0xA1, 0x09, 0x06, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01, 0xA2,
            0x03, 0x02, 0x01, 0x00, 0xA3, 0x05, 0xA1, 0x03, 0x02, 0x01, 0x00, 0xBE, 0x10, 0x04,
            0x0E, 0x08, 0x00, 0x06, 0x5F, 0x1F, 0x04, 0x00, 0x7E, 0x1F, 0x04, 0x03, 0xC0, 0x00,
            0x07,
        ]
    }

    async fn opened_client(
        extra_script: Vec<(Option<Vec<u8>>, Vec<u8>)>,
    ) -> DlmsClient<FakeSession> {
        let mut script = vec![(Some(aarq_low_auth()), aare_accepted())];
        script.extend(extra_script);
        let session = FakeSession::new(script);
        let mut client = DlmsClient::new(
            session,
            ClientSettings::with_low_authentication(b"12345678"),
        )
        .unwrap();
        client.open().await.unwrap();
        client
    }

    fn energy_attribute() -> CosemAttribute {
        CosemAttribute::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2)
    }

    #[tokio::test]
    async fn test_open_literal_association() {
        let client = opened_client(Vec::new()).await;
        assert_eq!(client.state(), ClientState::Associated);
        assert_eq!(client.max_pdu_send(), 960);
        assert_eq!(client.va_address(), 7);
        assert!(!client.authentication_required());
    }

    #[tokio::test]
    async fn test_operations_require_open() {
        let session = FakeSession::new(Vec::new());
        let mut client = DlmsClient::new(session, ClientSettings::default()).unwrap();
        assert!(matches!(
            client.get(&[energy_attribute()]).await,
            Err(DlmsError::NotOpened)
        ));
    }

    #[tokio::test]
    async fn test_get_single_literal() {
        let request = vec![
            0xC0, 0x01, 0xC1, 0x00, 0x03, 0x01, 0x00, 0x01, 0x08, 0x00, 0xFF, 0x02, 0x00,
        ];
        let response = vec![0xC4, 0x01, 0xC1, 0x00, 0x06, 0x00, 0x00, 0x00, 0x7B];
        let mut client = opened_client(vec![(Some(request), response)]).await;
        let values = client.get(&[energy_attribute()]).await.unwrap();
        assert_eq!(values, vec![DataObject::Unsigned32(123)]);
    }

    #[tokio::test]
    async fn test_set_single_literal() {
        let request = vec![
            0xC1, 0x01, 0xC1, 0x00, 0x03, 0x01, 0x00, 0x01, 0x08, 0x00, 0xFF, 0x02, 0x00, 0x06,
            0x00, 0x00, 0x00, 0x01,
        ];
        let response = vec![0xC5, 0x01, 0xC1, 0x00];
        let mut client = opened_client(vec![(Some(request), response)]).await;
        let item = energy_attribute().with_payload(DataObject::Unsigned32(1));
        let results = client.set(&[item]).await.unwrap();
        assert_eq!(results, vec![DataAccessResult::Success]);
    }

    #[tokio::test]
    async fn test_invoke_id_rotates_modulo_8() {
        let mut script = Vec::new();
        for i in 0..10u8 {
            let id = (1 + i) % 8;
            script.push((None, vec![0xC4, 0x01, 0xC0 | id, 0x00, 0x11, i]));
        }
        let mut client = opened_client(script).await;
        for i in 0..10u8 {
            let values = client.get(&[energy_attribute()]).await.unwrap();
            assert_eq!(values, vec![DataObject::Unsigned8(i)]);
        }
        // The fake responses already assert the rotation: request i carries
        // invoke id (1 + i) % 8 and a mismatch fails validation.
    }

    #[tokio::test]
    async fn test_multiple_references_fallback() {
        // An AARE that negotiates multiple references away by clearing the
        // bit in the returned conformance.
        let conf = Conformance::DEFAULT_LN & !Conformance::MULTIPLE_REFERENCES;
        let aare = {
            let mut aare = aare_accepted();
            // Patch the negotiated conformance inside the InitiateResponse.
            let patched = Conformance(conf).encode();
            aare[35..39].copy_from_slice(&patched);
            aare
        };
        let script = vec![
            (Some(aarq_low_auth()), aare),
            (None, vec![0xC4, 0x01, 0xC1, 0x00, 0x11, 0x01]),
            (None, vec![0xC4, 0x01, 0xC2, 0x00, 0x11, 0x02]),
            (None, vec![0xC4, 0x01, 0xC3, 0x00, 0x11, 0x03]),
        ];
        let session = FakeSession::new(script);
        let mut client = DlmsClient::new(
            session,
            ClientSettings::with_low_authentication(b"12345678"),
        )
        .unwrap();
        client.open().await.unwrap();
        assert!(!client.negotiated_conformance().multiple_references());

        let items = vec![
            energy_attribute(),
            CosemAttribute::new(3, ObisCode::new(1, 0, 2, 8, 0, 255), 2),
            CosemAttribute::new(3, ObisCode::new(1, 0, 3, 8, 0, 255), 2),
        ];
        let values = client.get(&items).await.unwrap();
        assert_eq!(
            values,
            vec![
                DataObject::Unsigned8(1),
                DataObject::Unsigned8(2),
                DataObject::Unsigned8(3),
            ]
        );
        // Three single GET requests were issued.
        assert_eq!(client.session.sent.len(), 1 + 3);
        for sent in &client.session.sent[1..] {
            assert_eq!(&sent[..2], &[0xC0, 0x01]);
        }
    }

    #[tokio::test]
    async fn test_get_block_transfer() {
        // A 6-byte octet string split over three blocks.
        let value = DataObject::OctetString(vec![1, 2, 3, 4, 5, 6]);
        let encoded = cosem_axdr::encode(&value).unwrap();
        let blocks = [
            &encoded[..3],
            &encoded[3..6],
            &encoded[6..],
        ];
        let script = vec![
            (
                None,
                block_response(0xC1, false, 1, blocks[0]),
            ),
            (
                Some(vec![0xC0, 0x02, 0xC1, 0x00, 0x00, 0x00, 0x02]),
                block_response(0xC1, false, 2, blocks[1]),
            ),
            (
                Some(vec![0xC0, 0x02, 0xC1, 0x00, 0x00, 0x00, 0x03]),
                block_response(0xC1, true, 3, blocks[2]),
            ),
        ];
        let mut client = opened_client(script).await;
        let values = client.get(&[energy_attribute()]).await.unwrap();
        assert_eq!(values, vec![value]);
    }

    fn block_response(invoke: u8, last: bool, number: u32, data: &[u8]) -> Vec<u8> {
        let mut out = vec![0xC4, 0x02, invoke, if last { 1 } else { 0 }];
        out.extend_from_slice(&number.to_be_bytes());
        out.push(0x00);
        out.push(data.len() as u8);
        out.extend_from_slice(data);
        out
    }

    #[tokio::test]
    async fn test_get_block_number_mismatch() {
        let script = vec![
            (None, block_response(0xC1, false, 1, &[0x09, 0x04])),
            // The meter repeats block 1 instead of sending block 2.
            (None, block_response(0xC1, false, 1, &[0xAA, 0xBB])),
        ];
        let mut client = opened_client(script).await;
        let err = client.get(&[energy_attribute()]).await.unwrap_err();
        assert!(matches!(err, DlmsError::Protocol(message)
            if message.contains("unexpected block number")));
        // The failed exchange downgraded the session.
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn test_get_stream_with_rewind() {
        let value = DataObject::Structure(vec![
            DataObject::Unsigned16(7),
            DataObject::OctetString(vec![0xAA; 10]),
        ]);
        let encoded = cosem_axdr::encode(&value).unwrap();
        let (a, b) = encoded.split_at(5);
        let script = vec![
            (None, block_response(0xC1, false, 1, a)),
            (None, block_response(0xC1, true, 2, b)),
        ];
        let mut client = opened_client(script).await;
        let mut stream = client.get_stream(&energy_attribute(), true).await.unwrap();

        let mut first_pass = Vec::new();
        while let Some(element) = stream.next_element().await.unwrap() {
            first_pass.push(element);
        }
        assert_eq!(first_pass.len(), 4);

        stream.rewind().unwrap();
        let mut second_pass = Vec::new();
        while let Some(element) = stream.next_element().await.unwrap() {
            second_pass.push(element);
        }
        assert_eq!(first_pass, second_pass);
    }

    #[tokio::test]
    async fn test_action_with_data() {
        let request_prefix = vec![0xC3, 0x01, 0xC1];
        let response = vec![0xC7, 0x01, 0xC1, 0x00, 0x01, 0x00, 0x11, 0x2A];
        let mut client = opened_client(vec![(None, response)]).await;
        let item = CosemAttribute::new(15, ObisCode::new(0, 0, 40, 0, 0, 255), 1)
            .with_payload(DataObject::Integer8(0));
        let reply = client.action(&item).await.unwrap();
        assert_eq!(reply, Some(DataObject::Unsigned8(42)));
        assert_eq!(&client.session.sent[1][..3], request_prefix.as_slice());
    }

    #[tokio::test]
    async fn test_read_write_sn() {
        let read_request = vec![0x05, 0x01, 0x02, 0x32, 0x08];
        let read_response = vec![0x0C, 0x01, 0x00, 0x12, 0x00, 0x2A];
        let write_request = vec![0x06, 0x01, 0x02, 0x2E, 0x00, 0x01, 0x12, 0x00, 0x07];
        let write_response = vec![0x0D, 0x01, 0x00];
        let mut client = opened_client(vec![
            (Some(read_request), read_response),
            (Some(write_request), write_response),
        ])
        .await;

        let values = client.read(&[SnItem::new(0x3208)]).await.unwrap();
        assert_eq!(values, vec![DataObject::Unsigned16(42)]);

        let results = client
            .write(&[SnItem::new(0x2E00).with_write_data(DataObject::Unsigned16(7))])
            .await
            .unwrap();
        assert_eq!(results, vec![DataAccessResult::Success]);
    }

    #[tokio::test]
    async fn test_exception_response_becomes_error_value() {
        let mut client =
            opened_client(vec![(None, vec![0xD8, 0x01, 0x02])]).await;
        let values = client.get(&[energy_attribute()]).await.unwrap();
        assert_eq!(
            values,
            vec![DataObject::Error(DataAccessResult::OtherReason)]
        );
    }

    #[tokio::test]
    async fn test_close_sends_rlrq_and_tolerates_garbage() {
        let mut client =
            opened_client(vec![(Some(vec![0x63, 0x03, 0x80, 0x01, 0x00]), vec![0xFF])]).await;
        client.close().await.unwrap();
        assert_eq!(client.state(), ClientState::Idle);
        assert!(matches!(
            client.get(&[energy_attribute()]).await,
            Err(DlmsError::NotOpened)
        ));
    }

    /// Full GMAC association: ciphered AARQ, AARE with server title and
    /// StoC, reply-to-HLS action, response verification.
    #[tokio::test]
    async fn test_gmac_authentication_flow() {
        let ek = [0x22u8; 16];
        let ak = [0x11u8; 16];
        let client_title = *b"CLIENT01";
        let server_title = *b"SERVER01";
        let ctos = b"CtoS1234".to_vec();
        let stoc = b"StoC5678".to_vec();

        // Meter-side mirror of the keys.
        let mut meter = CipherContext::new(&ek, &ak, SystemTitle::new(server_title)).unwrap();
        meter.setup(SystemTitle::new(client_title), Some(ctos.clone()));

        // AARE: accepted, authentication required, server title, StoC, and a
        // GLO-wrapped InitiateResponse.
        let initiate = InitiateResponse {
            negotiated_conformance: Conformance(Conformance::DEFAULT_LN),
            server_max_receive_pdu_size: 960,
            vaa_address: 7,
        }
        .encode();
        let glo_body = meter.encrypt(0x30, 0, &initiate).unwrap();
        let mut be_content = vec![tags::GLO_INITIATE_RESPONSE];
        be_content.push((1 + 4 + glo_body.len()) as u8);
        be_content.push(0x30);
        be_content.extend_from_slice(&0u32.to_be_bytes());
        be_content.extend_from_slice(&glo_body);

        let mut aare_body = vec![0xA2, 0x03, 0x02, 0x01, 0x00];
        aare_body.extend_from_slice(&[0xA3, 0x05, 0xA1, 0x03, 0x02, 0x01, 0x0E]);
        aare_body.extend_from_slice(&[0xA4, 0x0A, 0x04, 0x08]);
        aare_body.extend_from_slice(&server_title);
        aare_body.extend_from_slice(&[0xAA, 0x0A, 0x80, 0x08]);
        aare_body.extend_from_slice(&stoc);
        aare_body.push(0xBE);
        aare_body.push((be_content.len() + 2) as u8);
        aare_body.push(0x04);
        aare_body.push(be_content.len() as u8);
        aare_body.extend_from_slice(&be_content);
        let mut aare = vec![0x61, aare_body.len() as u8];
        aare.extend_from_slice(&aare_body);

        // Meter proof over CtoS, delivered in the action response.
        let meter_fc = 9u32;
        let meter_tag = meter
            .hash(HashDirection::ClientToServer, 0x10, meter_fc, &ctos)
            .unwrap();
        let mut proof = vec![0x10];
        proof.extend_from_slice(&meter_fc.to_be_bytes());
        proof.extend_from_slice(&meter_tag);
        let mut action_response = vec![0xC7, 0x01, 0xC1, 0x00, 0x01, 0x00, 0x09];
        action_response.push(proof.len() as u8);
        action_response.extend_from_slice(&proof);

        let script = vec![(None, aare), (None, action_response)];
        let session = FakeSession::new(script);
        let settings = ClientSettings {
            application_context: cosem_application::ApplicationContext::LogicalNameCiphered,
            authentication_mechanism: AuthenticationMechanism::HighGmac,
            password: ctos.clone(),
            security: Some(SecuritySettings {
                security_control: 0x30,
                client_system_title: client_title,
                encryption_key: ek.to_vec(),
                authentication_key: ak.to_vec(),
                dedicated_key: None,
            }),
            ..ClientSettings::default()
        };
        let mut client = DlmsClient::new(session, settings).unwrap();
        client.open().await.unwrap();
        assert!(client.authentication_required());
        assert_eq!(client.server_challenge(), Some(stoc.as_slice()));

        client.ln_authenticate(true).await.unwrap();

        // The reply-to-HLS request went out GLO-wrapped.
        let auth_request = client.session.sent.last().unwrap();
        assert_eq!(auth_request[0], tags::GLO_ACTION_REQUEST);
    }

    #[tokio::test]
    async fn test_gmac_authentication_bad_proof() {
        let ek = [0x22u8; 16];
        let ak = [0x11u8; 16];
        let ctos = b"CtoS1234".to_vec();

        let mut meter =
            CipherContext::new(&ek, &ak, SystemTitle::new(*b"SERVER01")).unwrap();
        meter.setup(SystemTitle::new(*b"CLIENT01"), Some(ctos.clone()));

        let initiate = InitiateResponse {
            negotiated_conformance: Conformance(Conformance::DEFAULT_LN),
            server_max_receive_pdu_size: 960,
            vaa_address: 7,
        }
        .encode();
        let glo_body = meter.encrypt(0x30, 0, &initiate).unwrap();
        let mut be_content = vec![tags::GLO_INITIATE_RESPONSE];
        be_content.push((1 + 4 + glo_body.len()) as u8);
        be_content.push(0x30);
        be_content.extend_from_slice(&0u32.to_be_bytes());
        be_content.extend_from_slice(&glo_body);

        let mut aare_body = vec![0xA2, 0x03, 0x02, 0x01, 0x00];
        aare_body.extend_from_slice(&[0xA3, 0x05, 0xA1, 0x03, 0x02, 0x01, 0x0E]);
        aare_body.extend_from_slice(&[0xA4, 0x0A, 0x04, 0x08]);
        aare_body.extend_from_slice(b"SERVER01");
        aare_body.extend_from_slice(&[0xAA, 0x0A, 0x80, 0x08]);
        aare_body.extend_from_slice(b"StoC5678");
        aare_body.push(0xBE);
        aare_body.push((be_content.len() + 2) as u8);
        aare_body.push(0x04);
        aare_body.push(be_content.len() as u8);
        aare_body.extend_from_slice(&be_content);
        let mut aare = vec![0x61, aare_body.len() as u8];
        aare.extend_from_slice(&aare_body);

        // A proof over the wrong bytes must be rejected.
        let mut bad_proof = vec![0x10];
        bad_proof.extend_from_slice(&7u32.to_be_bytes());
        bad_proof.extend_from_slice(&[0u8; 12]);
        let mut action_response = vec![0xC7, 0x01, 0xC1, 0x00, 0x01, 0x00, 0x09];
        action_response.push(bad_proof.len() as u8);
        action_response.extend_from_slice(&bad_proof);

        let session = FakeSession::new(vec![(None, aare), (None, action_response)]);
        let settings = ClientSettings {
            application_context: cosem_application::ApplicationContext::LogicalNameCiphered,
            authentication_mechanism: AuthenticationMechanism::HighGmac,
            password: ctos,
            security: Some(SecuritySettings {
                security_control: 0x30,
                client_system_title: *b"CLIENT01",
                encryption_key: ek.to_vec(),
                authentication_key: ak.to_vec(),
                dedicated_key: None,
            }),
            ..ClientSettings::default()
        };
        let mut client = DlmsClient::new(session, settings).unwrap();
        client.open().await.unwrap();
        assert!(matches!(
            client.ln_authenticate(true).await,
            Err(DlmsError::InvalidAuthenticationResponse)
        ));
    }
}
