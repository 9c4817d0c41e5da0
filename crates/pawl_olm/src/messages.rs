//! Wire codec for the two message shapes.
//!
//! Both start with a single version byte (3). The rest is a sequence of
//! protobuf-style `(tag, value)` pairs where the tag varint is
//! `(field_number << 3) | wire_type`: wire type 0 is a varint value, wire
//! type 2 a length-prefixed byte string. Decoders skip unknown fields by
//! wire type so newer senders stay readable.
//!
//! Normal message (followed by an 8-byte truncated HMAC over everything
//! before it):
//!
//!   0x03 | 0x0A ratchet_key | 0x10 counter | 0x22 ciphertext | mac8
//!
//! Pre-key message (no MAC of its own; the embedded message carries one):
//!
//!   0x03 | 0x0A one_time_key | 0x12 base_key | 0x1A identity_key
//!        | 0x22 embedded normal message

use pawl_crypto::{
    base64_decode, base64_encode, cipher::MAC_LENGTH, Curve25519PublicKey, MessageCipher,
};

use crate::error::OlmError;

pub const VERSION: u8 = 3;

const WIRE_TYPE_VARINT: u64 = 0;
const WIRE_TYPE_BYTES: u64 = 2;

const RATCHET_KEY_TAG: u64 = (1 << 3) | WIRE_TYPE_BYTES;
const COUNTER_TAG: u64 = (2 << 3) | WIRE_TYPE_VARINT;
const CIPHERTEXT_TAG: u64 = (4 << 3) | WIRE_TYPE_BYTES;

const ONE_TIME_KEY_TAG: u64 = (1 << 3) | WIRE_TYPE_BYTES;
const BASE_KEY_TAG: u64 = (2 << 3) | WIRE_TYPE_BYTES;
const IDENTITY_KEY_TAG: u64 = (3 << 3) | WIRE_TYPE_BYTES;
const EMBEDDED_MESSAGE_TAG: u64 = (4 << 3) | WIRE_TYPE_BYTES;

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
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn varint(&mut self) -> Result<u64, OlmError> {
        let buf = self.buf;
        let mut value: u64 = 0;
        for (i, &byte) in buf.iter().enumerate() {
            if i == 10 {
                return Err(OlmError::BadMessageFormat);
            }
            value |= u64::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                self.buf = &buf[i + 1..];
                return Ok(value);
            }
        }
        Err(OlmError::BadMessageFormat)
    }

    fn bytes(&mut self) -> Result<&'a [u8], OlmError> {
        let length = self.varint()?;
        let length = usize::try_from(length).map_err(|_| OlmError::BadMessageFormat)?;
        if self.buf.len() < length {
            return Err(OlmError::BadMessageFormat);
        }
        let (head, rest) = self.buf.split_at(length);
        self.buf = rest;
        Ok(head)
    }

    fn skip(&mut self, wire_type: u64) -> Result<(), OlmError> {
        match wire_type {
            WIRE_TYPE_VARINT => self.varint().map(|_| ()),
            WIRE_TYPE_BYTES => self.bytes().map(|_| ()),
            _ => Err(OlmError::BadMessageFormat),
        }
    }
}

fn put_bytes_field(buf: &mut Vec<u8>, tag: u64, value: &[u8]) {
    encode_varint(buf, tag);
    encode_varint(buf, value.len() as u64);
    buf.extend_from_slice(value);
}

fn put_varint_field(buf: &mut Vec<u8>, tag: u64, value: u64) {
    encode_varint(buf, tag);
    encode_varint(buf, value);
}

fn check_version(bytes: &[u8]) -> Result<&[u8], OlmError> {
    match bytes.split_first() {
        None => Err(OlmError::BadMessageFormat),
        Some((&VERSION, rest)) => Ok(rest),
        Some((&version, _)) => Err(OlmError::BadMessageVersion(version)),
    }
}

fn take_key(decoder: &mut Decoder<'_>) -> Result<Curve25519PublicKey, OlmError> {
    Curve25519PublicKey::from_slice(decoder.bytes()?).map_err(|_| OlmError::BadMessageFormat)
}

// ── Normal message ───────────────────────────────────────────────────────────

/// A ratchet message: the sender's current ratchet key, the index in the
/// sending chain, and the AES-CBC payload, authenticated by a truncated
/// HMAC. The bytes that were actually MACed are kept verbatim so unknown
/// fields from newer senders still authenticate.
#[derive(Clone)]
pub struct Message {
    pub ratchet_key: Curve25519PublicKey,
    pub counter: u32,
    pub ciphertext: Vec<u8>,
    mac: [u8; MAC_LENGTH],
    authenticated_bytes: Vec<u8>,
}

impl Message {
    pub(crate) fn new(
        ratchet_key: Curve25519PublicKey,
        counter: u32,
        ciphertext: Vec<u8>,
    ) -> Self {
        let mut body = vec![VERSION];
        put_bytes_field(&mut body, RATCHET_KEY_TAG, ratchet_key.as_bytes());
        put_varint_field(&mut body, COUNTER_TAG, u64::from(counter));
        put_bytes_field(&mut body, CIPHERTEXT_TAG, &ciphertext);
        Self { ratchet_key, counter, ciphertext, mac: [0; MAC_LENGTH], authenticated_bytes: body }
    }

    pub(crate) fn attach_mac(&mut self, cipher: &MessageCipher) {
        self.mac = cipher.mac(&self.authenticated_bytes);
    }

    pub(crate) fn verify_mac(&self, cipher: &MessageCipher) -> Result<(), OlmError> {
        cipher
            .verify_mac(&self.authenticated_bytes, &self.mac)
            .map_err(|_| OlmError::BadMessageMac)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, OlmError> {
        if bytes.len() < 1 + MAC_LENGTH {
            return Err(OlmError::BadMessageFormat);
        }
        let (body, mac_bytes) = bytes.split_at(bytes.len() - MAC_LENGTH);
        let mut mac = [0u8; MAC_LENGTH];
        mac.copy_from_slice(mac_bytes);

        let mut decoder = Decoder::new(check_version(body)?);
        let mut ratchet_key = None;
        let mut counter = None;
        let mut ciphertext = None;
        while !decoder.is_empty() {
            let tag = decoder.varint()?;
            match tag {
                RATCHET_KEY_TAG => ratchet_key = Some(take_key(&mut decoder)?),
                COUNTER_TAG => {
                    let value = decoder.varint()?;
                    counter =
                        Some(u32::try_from(value).map_err(|_| OlmError::BadMessageFormat)?);
                }
                CIPHERTEXT_TAG => ciphertext = Some(decoder.bytes()?.to_vec()),
                tag => decoder.skip(tag & 0x07)?,
            }
        }

        match (ratchet_key, counter, ciphertext) {
            (Some(ratchet_key), Some(counter), Some(ciphertext)) => Ok(Self {
                ratchet_key,
                counter,
                ciphertext,
                mac,
                authenticated_bytes: body.to_vec(),
            }),
            _ => Err(OlmError::BadMessageFormat),
        }
    }

    pub fn from_base64(input: &str) -> Result<Self, OlmError> {
        Self::from_bytes(&base64_decode(input)?)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.authenticated_bytes.clone();
        bytes.extend_from_slice(&self.mac);
        bytes
    }

    pub fn to_base64(&self) -> String {
        base64_encode(self.to_bytes())
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("ratchet_key", &self.ratchet_key)
            .field("counter", &self.counter)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

// ── Pre-key message ──────────────────────────────────────────────────────────

/// The first message of a session, carrying the handshake public keys the
/// recipient needs to reconstruct the triple DH, plus the embedded normal
/// message.
#[derive(Debug, Clone)]
pub struct PreKeyMessage {
    pub one_time_key: Curve25519PublicKey,
    pub base_key: Curve25519PublicKey,
    pub identity_key: Curve25519PublicKey,
    pub message: Message,
}

impl PreKeyMessage {
    pub(crate) fn new(
        one_time_key: Curve25519PublicKey,
        base_key: Curve25519PublicKey,
        identity_key: Curve25519PublicKey,
        message: Message,
    ) -> Self {
        Self { one_time_key, base_key, identity_key, message }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, OlmError> {
        let mut decoder = Decoder::new(check_version(bytes)?);
        let mut one_time_key = None;
        let mut base_key = None;
        let mut identity_key = None;
        let mut message = None;

        while !decoder.is_empty() {
            let tag = decoder.varint()?;
            match tag {
                ONE_TIME_KEY_TAG => one_time_key = Some(take_key(&mut decoder)?),
                BASE_KEY_TAG => base_key = Some(take_key(&mut decoder)?),
                IDENTITY_KEY_TAG => identity_key = Some(take_key(&mut decoder)?),
                EMBEDDED_MESSAGE_TAG => message = Some(Message::from_bytes(decoder.bytes()?)?),
                tag => decoder.skip(tag & 0x07)?,
            }
        }

        match (one_time_key, base_key, identity_key, message) {
            (Some(one_time_key), Some(base_key), Some(identity_key), Some(message)) => {
                Ok(Self { one_time_key, base_key, identity_key, message })
            }
            _ => Err(OlmError::BadMessageFormat),
        }
    }

    pub fn from_base64(input: &str) -> Result<Self, OlmError> {
        Self::from_bytes(&base64_decode(input)?)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![VERSION];
        put_bytes_field(&mut bytes, ONE_TIME_KEY_TAG, self.one_time_key.as_bytes());
        put_bytes_field(&mut bytes, BASE_KEY_TAG, self.base_key.as_bytes());
        put_bytes_field(&mut bytes, IDENTITY_KEY_TAG, self.identity_key.as_bytes());
        put_bytes_field(&mut bytes, EMBEDDED_MESSAGE_TAG, &self.message.to_bytes());
        bytes
    }

    pub fn to_base64(&self) -> String {
        base64_encode(self.to_bytes())
    }
}

// ── Dispatch enum ────────────────────────────────────────────────────────────

/// Either message shape, tagged with the external type code.
#[derive(Debug, Clone)]
pub enum OlmMessage {
    PreKey(PreKeyMessage),
    Normal(Message),
}

impl OlmMessage {
    pub const PRE_KEY_TYPE: usize = 0;
    pub const NORMAL_TYPE: usize = 1;

    pub fn message_type(&self) -> usize {
        match self {
            OlmMessage::PreKey(_) => Self::PRE_KEY_TYPE,
            OlmMessage::Normal(_) => Self::NORMAL_TYPE,
        }
    }

    pub fn to_base64(&self) -> String {
        match self {
            OlmMessage::PreKey(message) => message.to_base64(),
            OlmMessage::Normal(message) => message.to_base64(),
        }
    }

    pub fn from_type_and_base64(message_type: usize, input: &str) -> Result<Self, OlmError> {
        match message_type {
            Self::PRE_KEY_TYPE => Ok(OlmMessage::PreKey(PreKeyMessage::from_base64(input)?)),
            Self::NORMAL_TYPE => Ok(OlmMessage::Normal(Message::from_base64(input)?)),
            _ => Err(OlmError::BadMessageFormat),
        }
    }
}
