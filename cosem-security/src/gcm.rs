//! AES-GCM primitives for DLMS ciphering
//!
//! The security-control byte picks one of three modes:
//! - 0x10 authenticated only: AAD = SC || AK || plaintext, output is the
//!   plaintext followed by a 12-byte tag
//! - 0x20 encrypted only: CTR keystream, no tag
//! - 0x30 authenticated and encrypted: AAD = SC || AK, output is the
//!   ciphertext followed by a 12-byte tag
//!
//! The IV is the 8-byte system title followed by the big-endian frame
//! counter; the inner CTR counter starts at 1 (so the first payload block
//! uses counter value 2, GCM's J0 + 1).

use aes::Aes128;
use cipher::generic_array::GenericArray;
use cipher::{BlockEncrypt, KeyInit};
use aes_gcm::aead::generic_array::typenum::U12;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::AesGcm;
use cosem_core::error::{DlmsError, DlmsResult};
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use std::io::Read;

/// GCM authentication tag length used by DLMS
pub const GCM_TAG_LENGTH: usize = 12;

/// IV length: 8-byte system title plus 4-byte frame counter
pub const GCM_IV_LENGTH: usize = 12;

const BLOCK: usize = 16;
/// The streaming decryptor advances in four-block windows
const STREAM_WINDOW: usize = 4 * BLOCK;

type Aes128Gcm12 = AesGcm<Aes128, U12, U12>;

/// Security-control bit: authenticated
pub const SC_AUTHENTICATED: u8 = 0x10;
/// Security-control bit: encrypted
pub const SC_ENCRYPTED: u8 = 0x20;
/// Security-control bit: broadcast key, not supported by this client
pub const SC_BROADCAST_KEY: u8 = 0x40;
/// Security-control bit: compressed APDU, not supported by this client
pub const SC_COMPRESSION: u8 = 0x80;

/// Validate the SC byte and return its mode bits
pub fn security_mode(sc: u8) -> DlmsResult<u8> {
    if sc & (SC_BROADCAST_KEY | SC_COMPRESSION) != 0 {
        return Err(DlmsError::Security(format!(
            "unsupported security control byte 0x{:02X}",
            sc
        )));
    }
    let mode = sc & (SC_AUTHENTICATED | SC_ENCRYPTED);
    if mode == 0 {
        return Err(DlmsError::Security(format!(
            "security control byte 0x{:02X} selects no protection",
            sc
        )));
    }
    Ok(mode)
}

/// Build the 12-byte IV from a system title and frame counter
pub fn build_iv(system_title: &[u8; 8], frame_counter: u32) -> [u8; GCM_IV_LENGTH] {
    let mut iv = [0u8; GCM_IV_LENGTH];
    iv[..8].copy_from_slice(system_title);
    iv[8..].copy_from_slice(&frame_counter.to_be_bytes());
    iv
}

fn j0(iv: &[u8; GCM_IV_LENGTH]) -> [u8; BLOCK] {
    let mut block = [0u8; BLOCK];
    block[..GCM_IV_LENGTH].copy_from_slice(iv);
    block[BLOCK - 1] = 1;
    block
}

fn inc32(block: &mut [u8; BLOCK]) {
    let mut counter = u32::from_be_bytes([block[12], block[13], block[14], block[15]]);
    counter = counter.wrapping_add(1);
    block[12..].copy_from_slice(&counter.to_be_bytes());
}

/// Block-aligned GHASH accumulator
///
/// `ghash::GHash::update_padded` zero-pads every call, so sections that
/// arrive in arbitrary slices are carried through a 16-byte staging buffer
/// and padded only at section boundaries.
struct GhashAccumulator {
    gh: GHash,
    partial: [u8; BLOCK],
    partial_len: usize,
}

impl GhashAccumulator {
    fn new(gh: GHash) -> Self {
        Self {
            gh,
            partial: [0u8; BLOCK],
            partial_len: 0,
        }
    }

    fn update(&mut self, mut data: &[u8]) {
        if self.partial_len > 0 {
            let take = (BLOCK - self.partial_len).min(data.len());
            self.partial[self.partial_len..self.partial_len + take]
                .copy_from_slice(&data[..take]);
            self.partial_len += take;
            data = &data[take..];
            if self.partial_len == BLOCK {
                self.gh.update(&[GenericArray::clone_from_slice(&self.partial)]);
                self.partial_len = 0;
            }
        }
        let full = data.len() / BLOCK * BLOCK;
        for chunk in data[..full].chunks_exact(BLOCK) {
            self.gh.update(&[GenericArray::clone_from_slice(chunk)]);
        }
        if full < data.len() {
            let rest = &data[full..];
            self.partial[..rest.len()].copy_from_slice(rest);
            self.partial_len = rest.len();
        }
    }

    /// Zero-pad the current section to a block boundary
    fn pad_section(&mut self) {
        if self.partial_len > 0 {
            self.partial[self.partial_len..].fill(0);
            self.gh.update(&[GenericArray::clone_from_slice(&self.partial)]);
            self.partial_len = 0;
        }
    }

    fn finalize(mut self, aad_len: usize, ct_len: usize) -> [u8; BLOCK] {
        self.pad_section();
        let mut lengths = [0u8; BLOCK];
        lengths[..8].copy_from_slice(&(aad_len as u64 * 8).to_be_bytes());
        lengths[8..].copy_from_slice(&(ct_len as u64 * 8).to_be_bytes());
        self.gh.update(&[GenericArray::clone_from_slice(&lengths)]);
        self.gh.finalize().into()
    }
}

/// AES-128 GCM engine for one encryption key
///
/// The GHASH key schedule is derived once at construction.
pub struct GcmEngine {
    cipher: Aes128,
    aead: Aes128Gcm12,
    ghash: GHash,
}

impl GcmEngine {
    pub fn new(encryption_key: &[u8]) -> DlmsResult<Self> {
        if encryption_key.len() != 16 {
            return Err(DlmsError::Security(format!(
                "AES-128 key must be 16 bytes, got {}",
                encryption_key.len()
            )));
        }
        let cipher = Aes128::new(GenericArray::from_slice(encryption_key));
        let aead = Aes128Gcm12::new(GenericArray::from_slice(encryption_key));
        let mut h = GenericArray::clone_from_slice(&[0u8; BLOCK]);
        cipher.encrypt_block(&mut h);
        let ghash = GHash::new(&h);
        Ok(Self {
            cipher,
            aead,
            ghash,
        })
    }

    fn encrypt_block(&self, block: &[u8; BLOCK]) -> [u8; BLOCK] {
        let mut out = GenericArray::clone_from_slice(block);
        self.cipher.encrypt_block(&mut out);
        out.into()
    }

    /// XOR `data` with the CTR keystream starting one counter past J0
    fn ctr_apply(&self, iv: &[u8; GCM_IV_LENGTH], data: &mut [u8]) {
        let mut counter = j0(iv);
        for chunk in data.chunks_mut(BLOCK) {
            inc32(&mut counter);
            let keystream = self.encrypt_block(&counter);
            for (byte, key) in chunk.iter_mut().zip(keystream.iter()) {
                *byte ^= key;
            }
        }
    }

    /// GCM tag over a split AAD and ciphertext, truncated to 12 bytes
    fn tag(&self, iv: &[u8; GCM_IV_LENGTH], aad: &[&[u8]], ciphertext: &[u8]) -> [u8; GCM_TAG_LENGTH] {
        let mut acc = GhashAccumulator::new(self.ghash.clone());
        let mut aad_len = 0usize;
        for section in aad {
            acc.update(section);
            aad_len += section.len();
        }
        acc.pad_section();
        acc.update(ciphertext);
        let s = acc.finalize(aad_len, ciphertext.len());
        let e_j0 = self.encrypt_block(&j0(iv));
        let mut tag = [0u8; GCM_TAG_LENGTH];
        for (i, byte) in tag.iter_mut().enumerate() {
            *byte = s[i] ^ e_j0[i];
        }
        tag
    }

    /// Frame length after ciphering, given the SC mode
    pub fn ciphered_length(sc: u8, plaintext_len: usize) -> DlmsResult<usize> {
        let mode = security_mode(sc)?;
        Ok(if mode & SC_AUTHENTICATED != 0 {
            plaintext_len + GCM_TAG_LENGTH
        } else {
            plaintext_len
        })
    }

    /// Cipher `plaintext` according to the SC mode
    pub fn encrypt(
        &self,
        sc: u8,
        auth_key: &[u8],
        iv: &[u8; GCM_IV_LENGTH],
        plaintext: &[u8],
    ) -> DlmsResult<Vec<u8>> {
        match security_mode(sc)? {
            mode if mode == SC_AUTHENTICATED => {
                let tag = self.tag(iv, &[&[sc], auth_key, plaintext], &[]);
                let mut out = plaintext.to_vec();
                out.extend_from_slice(&tag);
                Ok(out)
            }
            mode if mode == SC_ENCRYPTED => {
                let mut out = plaintext.to_vec();
                self.ctr_apply(iv, &mut out);
                Ok(out)
            }
            _ => {
                let mut aad = Vec::with_capacity(1 + auth_key.len());
                aad.push(sc);
                aad.extend_from_slice(auth_key);
                self.aead
                    .encrypt(
                        GenericArray::from_slice(iv),
                        Payload {
                            msg: plaintext,
                            aad: &aad,
                        },
                    )
                    .map_err(|_| DlmsError::Security("GCM encryption failed".to_string()))
            }
        }
    }

    /// Undo `encrypt`; tag mismatches and short input are fatal
    pub fn decrypt(
        &self,
        sc: u8,
        auth_key: &[u8],
        iv: &[u8; GCM_IV_LENGTH],
        apdu: &[u8],
    ) -> DlmsResult<Vec<u8>> {
        match security_mode(sc)? {
            mode if mode == SC_AUTHENTICATED => {
                if apdu.len() < GCM_TAG_LENGTH {
                    return Err(DlmsError::Security(
                        "ciphertext shorter than the authentication tag".to_string(),
                    ));
                }
                let (payload, tag) = apdu.split_at(apdu.len() - GCM_TAG_LENGTH);
                let expected = self.tag(iv, &[&[sc], auth_key, payload], &[]);
                if expected != tag {
                    return Err(DlmsError::Security("authentication tag mismatch".to_string()));
                }
                Ok(payload.to_vec())
            }
            mode if mode == SC_ENCRYPTED => {
                let mut out = apdu.to_vec();
                self.ctr_apply(iv, &mut out);
                Ok(out)
            }
            _ => {
                if apdu.len() < GCM_TAG_LENGTH {
                    return Err(DlmsError::Security(
                        "ciphertext shorter than the authentication tag".to_string(),
                    ));
                }
                let mut aad = Vec::with_capacity(1 + auth_key.len());
                aad.push(sc);
                aad.extend_from_slice(auth_key);
                self.aead
                    .decrypt(
                        GenericArray::from_slice(iv),
                        Payload { msg: apdu, aad: &aad },
                    )
                    .map_err(|_| DlmsError::Security("authentication tag mismatch".to_string()))
            }
        }
    }

    /// Keyed 12-byte hash: the tag of an authenticated-only pass over `challenge`
    pub fn keyed_hash(
        &self,
        sc: u8,
        auth_key: &[u8],
        iv: &[u8; GCM_IV_LENGTH],
        challenge: &[u8],
    ) -> [u8; GCM_TAG_LENGTH] {
        self.tag(iv, &[&[sc], auth_key, challenge], &[])
    }

    /// Wrap a reader so it decrypts on demand
    pub fn decrypt_stream<R: Read>(
        &self,
        sc: u8,
        auth_key: &[u8],
        iv: [u8; GCM_IV_LENGTH],
        inner: R,
    ) -> DlmsResult<GcmStreamReader<R>> {
        let mode = security_mode(sc)?;
        let mut acc = GhashAccumulator::new(self.ghash.clone());
        let mut aad_len = 0usize;
        // The AAD prefix is SC || AK; in authenticated-only mode the payload
        // continues the same AAD section.
        acc.update(&[sc]);
        acc.update(auth_key);
        aad_len += 1 + auth_key.len();
        if mode == SC_AUTHENTICATED | SC_ENCRYPTED {
            acc.pad_section();
        }
        Ok(GcmStreamReader {
            cipher: self.cipher.clone(),
            inner,
            mode,
            acc: Some(acc),
            aad_len,
            ct_len: 0,
            counter: j0(&iv),
            iv,
            tail: Vec::new(),
            ready: Vec::new(),
            ready_pos: 0,
            inner_eof: false,
            verified: false,
        })
    }
}

/// Streaming GCM decryptor
///
/// Processes the underlying bytes in four-block windows while holding back
/// the trailing 12 bytes as the running tag candidate. At EOF the held bytes
/// are checked against the computed tag; a mismatch surfaces as an
/// `InvalidData` I/O error.
pub struct GcmStreamReader<R: Read> {
    cipher: Aes128,
    inner: R,
    mode: u8,
    acc: Option<GhashAccumulator>,
    aad_len: usize,
    ct_len: usize,
    counter: [u8; BLOCK],
    iv: [u8; GCM_IV_LENGTH],
    /// Raw bytes withheld as the candidate tag (authenticated modes)
    tail: Vec<u8>,
    /// Decrypted bytes ready for the caller
    ready: Vec<u8>,
    ready_pos: usize,
    inner_eof: bool,
    verified: bool,
}

impl<R: Read> GcmStreamReader<R> {
    fn holdback(&self) -> usize {
        if self.mode & SC_AUTHENTICATED != 0 {
            GCM_TAG_LENGTH
        } else {
            0
        }
    }

    fn process(&mut self, raw: &[u8]) {
        if raw.is_empty() {
            return;
        }
        let acc = self.acc.as_mut().expect("accumulator present before EOF");
        match self.mode {
            m if m == SC_AUTHENTICATED => {
                // Payload bytes extend the AAD; they pass through unchanged.
                acc.update(raw);
                self.aad_len += raw.len();
                self.ready.extend_from_slice(raw);
            }
            m if m == SC_ENCRYPTED => {
                let start = self.ready.len();
                self.ready.extend_from_slice(raw);
                ctr_xor_continue(&self.cipher, &mut self.counter, self.ct_len, &mut self.ready[start..]);
                self.ct_len += raw.len();
            }
            _ => {
                acc.update(raw);
                let start = self.ready.len();
                self.ready.extend_from_slice(raw);
                ctr_xor_continue(&self.cipher, &mut self.counter, self.ct_len, &mut self.ready[start..]);
                self.ct_len += raw.len();
            }
        }
    }

    fn finish(&mut self) -> std::io::Result<()> {
        if self.verified {
            return Ok(());
        }
        self.verified = true;
        if self.holdback() == 0 {
            return Ok(());
        }
        if self.tail.len() != GCM_TAG_LENGTH {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "ciphertext shorter than the authentication tag",
            ));
        }
        let acc = self.acc.take().expect("accumulator consumed once");
        let s = acc.finalize(self.aad_len, self.ct_len);
        let e_j0 = encrypt_block_with(&self.cipher, &j0(&self.iv));
        let mut expected = [0u8; GCM_TAG_LENGTH];
        for (i, byte) in expected.iter_mut().enumerate() {
            *byte = s[i] ^ e_j0[i];
        }
        if expected[..] != self.tail[..] {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "authentication tag mismatch",
            ));
        }
        Ok(())
    }

    /// Pull one window from the underlying reader
    fn fill_window(&mut self) -> std::io::Result<()> {
        let mut window = [0u8; STREAM_WINDOW];
        let n = self.inner.read(&mut window)?;
        if n == 0 {
            self.inner_eof = true;
            return self.finish();
        }
        self.tail.extend_from_slice(&window[..n]);
        let holdback = self.holdback();
        if self.tail.len() > holdback {
            let release = self.tail.len() - holdback;
            let released: Vec<u8> = self.tail.drain(..release).collect();
            self.process(&released);
        }
        Ok(())
    }
}

fn encrypt_block_with(cipher: &Aes128, block: &[u8; BLOCK]) -> [u8; BLOCK] {
    let mut out = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut out);
    out.into()
}

/// Continue a CTR keystream at an arbitrary byte offset
fn ctr_xor_continue(cipher: &Aes128, counter: &mut [u8; BLOCK], offset: usize, data: &mut [u8]) {
    let mut in_block = offset % BLOCK;
    let mut keystream = [0u8; BLOCK];
    if in_block > 0 {
        // Re-derive the keystream of the partially consumed block.
        keystream = encrypt_block_with(cipher, counter);
    }
    for byte in data.iter_mut() {
        if in_block == 0 {
            inc32(counter);
            keystream = encrypt_block_with(cipher, counter);
        }
        *byte ^= keystream[in_block];
        in_block = (in_block + 1) % BLOCK;
    }
}

impl<R: Read> Read for GcmStreamReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            if self.ready_pos < self.ready.len() {
                let n = (self.ready.len() - self.ready_pos).min(buf.len());
                buf[..n].copy_from_slice(&self.ready[self.ready_pos..self.ready_pos + n]);
                self.ready_pos += n;
                if self.ready_pos == self.ready.len() {
                    self.ready.clear();
                    self.ready_pos = 0;
                }
                return Ok(n);
            }
            if self.inner_eof {
                return Ok(0);
            }
            self.fill_window()?;
        }
    }
}
