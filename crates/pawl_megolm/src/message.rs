//! Signed group message wire format.
//!
//!   0x03 | 0x08 message_index (varint) | 0x12 ciphertext | mac8 | sig64
//!
//! The fields use the same protobuf-style tagging as the two-party wire
//! format; unknown fields are skipped by wire type. The truncated HMAC
//! (from the "MEGOLM_KEYS" schedule at the message index) covers the
//! version and fields; the Ed25519 signature covers everything before it,
//! MAC included. Receivers check the signature first, then the MAC, then
//! decrypt.

use pawl_crypto::{
    base64_decode, base64_encode, cipher::MAC_LENGTH, Ed25519Keypair, Ed25519PublicKey,
    Ed25519Signature, MessageCipher,
};

use crate::error::MegolmError;

pub const VERSION: u8 = 3;

const SIGNATURE_LENGTH: usize = 64;

const WIRE_TYPE_VARINT: u64 = 0;
const WIRE_TYPE_BYTES: u64 = 2;

const MESSAGE_INDEX_TAG: u64 = (1 << 3) | WIRE_TYPE_VARINT;
const CIPHERTEXT_TAG: u64 = (2 << 3) | WIRE_TYPE_BYTES;

// ── Varint plumbing ──────────────────────────────────────────────────────────

fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn varint(&mut self) -> Result<u64, MegolmError> {
        let buf = self.buf;
        let mut value: u64 = 0;
        for (i, &byte) in buf.iter().enumerate() {
            if i == 10 {
                return Err(MegolmError::BadMessageFormat);
            }
            value |= u64::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                self.buf = &buf[i + 1..];
                return Ok(value);
            }
        }
        Err(MegolmError::BadMessageFormat)
    }

    fn bytes(&mut self) -> Result<&'a [u8], MegolmError> {
        let length = self.varint()?;
        let length = usize::try_from(length).map_err(|_| MegolmError::BadMessageFormat)?;
        if self.buf.len() < length {
            return Err(MegolmError::BadMessageFormat);
        }
        let (head, rest) = self.buf.split_at(length);
        self.buf = rest;
        Ok(head)
    }

    fn skip(&mut self, wire_type: u64) -> Result<(), MegolmError> {
        match wire_type {
            WIRE_TYPE_VARINT => self.varint().map(|_| ()),
            WIRE_TYPE_BYTES => self.bytes().map(|_| ()),
            _ => Err(MegolmError::BadMessageFormat),
        }
    }
}

// ── Group message ────────────────────────────────────────────────────────────

/// One signed, authenticated group message. The exact bytes covered by
/// the MAC and signature are kept verbatim so unknown fields from newer
/// senders still authenticate.
#[derive(Clone)]
pub struct GroupMessage {
    pub message_index: u32,
    pub ciphertext: Vec<u8>,
    mac: [u8; MAC_LENGTH],
    signature: Ed25519Signature,
    authenticated_bytes: Vec<u8>,
}

impl GroupMessage {
    pub(crate) fn new(message_index: u32, ciphertext: Vec<u8>) -> Self {
        let mut body = vec![VERSION];
        encode_varint(&mut body, MESSAGE_INDEX_TAG);
        encode_varint(&mut body, u64::from(message_index));
        encode_varint(&mut body, CIPHERTEXT_TAG);
        encode_varint(&mut body, ciphertext.len() as u64);
        body.extend_from_slice(&ciphertext);

        Self {
            message_index,
            ciphertext,
            mac: [0; MAC_LENGTH],
            signature: Ed25519Signature::from_bytes(&[0; SIGNATURE_LENGTH]),
            authenticated_bytes: body,
        }
    }

    pub(crate) fn attach_mac(&mut self, cipher: &MessageCipher) {
        self.mac = cipher.mac(&self.authenticated_bytes);
    }

    /// Sign version, fields and MAC. Must run after `attach_mac`.
    pub(crate) fn attach_signature(&mut self, signing_key: &Ed25519Keypair) {
        let mut signed = self.authenticated_bytes.clone();
        signed.extend_from_slice(&self.mac);
        self.signature = signing_key.sign(&signed);
    }

    pub(crate) fn verify_signature(
        &self,
        signing_key: &Ed25519PublicKey,
    ) -> Result<(), MegolmError> {
        let mut signed = self.authenticated_bytes.clone();
        signed.extend_from_slice(&self.mac);
        signing_key
            .verify(&signed, &self.signature)
            .map_err(|_| MegolmError::BadSignature)
    }

    pub(crate) fn verify_mac(&self, cipher: &MessageCipher) -> Result<(), MegolmError> {
        cipher
            .verify_mac(&self.authenticated_bytes, &self.mac)
            .map_err(|_| MegolmError::BadMessageMac)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MegolmError> {
        if bytes.len() < 1 + MAC_LENGTH + SIGNATURE_LENGTH {
            return Err(MegolmError::BadMessageFormat);
        }
        let (rest, signature_bytes) = bytes.split_at(bytes.len() - SIGNATURE_LENGTH);
        let (body, mac_bytes) = rest.split_at(rest.len() - MAC_LENGTH);
        let signature = Ed25519Signature::from_slice(signature_bytes)
            .map_err(|_| MegolmError::BadMessageFormat)?;
        let mut mac = [0u8; MAC_LENGTH];
        mac.copy_from_slice(mac_bytes);

        let payload = match body.split_first() {
            None => return Err(MegolmError::BadMessageFormat),
            Some((&VERSION, payload)) => payload,
            Some((&version, _)) => return Err(MegolmError::BadMessageVersion(version)),
        };

        let mut decoder = Decoder { buf: payload };
        let mut message_index = None;
        let mut ciphertext = None;
        while !decoder.is_empty() {
            let tag = decoder.varint()?;
            match tag {
                MESSAGE_INDEX_TAG => {
                    let value = decoder.varint()?;
                    message_index =
                        Some(u32::try_from(value).map_err(|_| MegolmError::BadMessageFormat)?);
                }
                CIPHERTEXT_TAG => ciphertext = Some(decoder.bytes()?.to_vec()),
                tag => decoder.skip(tag & 0x07)?,
            }
        }

        match (message_index, ciphertext) {
            (Some(message_index), Some(ciphertext)) => Ok(Self {
                message_index,
                ciphertext,
                mac,
                signature,
                authenticated_bytes: body.to_vec(),
            }),
            _ => Err(MegolmError::BadMessageFormat),
        }
    }

    pub fn from_base64(input: &str) -> Result<Self, MegolmError> {
        Self::from_bytes(&base64_decode(input)?)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.authenticated_bytes.clone();
        bytes.extend_from_slice(&self.mac);
        bytes.extend_from_slice(&self.signature.to_bytes());
        bytes
    }

    pub fn to_base64(&self) -> String {
        base64_encode(self.to_bytes())
    }
}

impl std::fmt::Debug for GroupMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupMessage")
            .field("message_index", &self.message_index)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}
