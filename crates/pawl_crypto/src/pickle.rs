//! Versioned serialisation-at-rest ("pickle") envelope.
//!
//! Wire format:
//!
//!   [ version (u32 BE) | AES-256-CBC ciphertext | MAC (8 bytes) ]
//!
//! The AES key, HMAC key and IV come from `MessageCipher::new(pickle_key,
//! b"")` — HKDF-SHA256 with empty salt and empty info, so pickling is
//! deterministic for a given object and key. The MAC is HMAC-SHA-256 over
//! `version || ciphertext`, truncated to 8 bytes, and is verified in
//! constant time before anything is decrypted.
//!
//! The cleartext payload is a fixed-order typed sequence, not
//! self-describing; each pickled class owns its field layout and an
//! explicit set of accepted versions. Writers always emit the newest
//! version for their class; silently upgrading the written version of an
//! old object is forbidden.

use zeroize::Zeroizing;

use crate::{cipher::MessageCipher, cipher::MAC_LENGTH, error::CryptoError};

const VERSION_LENGTH: usize = 4;
const AES_BLOCK_LENGTH: usize = 16;

/// Encrypt and authenticate a pickle payload under `pickle_key`.
pub fn seal(version: u32, payload: &[u8], pickle_key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = MessageCipher::new(pickle_key, b"")?;

    let ciphertext = cipher.encrypt(payload);
    let mut pickle = Vec::with_capacity(VERSION_LENGTH + ciphertext.len() + MAC_LENGTH);
    pickle.extend_from_slice(&version.to_be_bytes());
    pickle.extend_from_slice(&ciphertext);

    let tag = cipher.mac(&pickle);
    pickle.extend_from_slice(&tag);
    Ok(pickle)
}

/// Verify, decrypt and version-check a pickle blob.
///
/// The MAC covers the version field too, so any corruption surfaces as a
/// MAC failure; `accepted` enumerates every version this object class has
/// ever written, and an authentic blob outside that set is rejected before
/// decryption.
pub fn open(
    accepted: &[u32],
    blob: &[u8],
    pickle_key: &[u8],
) -> Result<(u32, Zeroizing<Vec<u8>>), CryptoError> {
    if blob.len() < VERSION_LENGTH + AES_BLOCK_LENGTH + MAC_LENGTH {
        return Err(CryptoError::InputTooShort);
    }

    let (body, tag) = blob.split_at(blob.len() - MAC_LENGTH);
    let cipher = MessageCipher::new(pickle_key, b"")?;
    cipher.verify_mac(body, tag)?;

    let version = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
    if !accepted.contains(&version) {
        return Err(CryptoError::UnknownPickleVersion(version));
    }

    let payload = cipher
        .decrypt(&body[VERSION_LENGTH..])
        .map_err(|_| CryptoError::PickleKey)?;
    Ok((version, payload))
}

// ── Typed payload codec ──────────────────────────────────────────────────────

/// Fixed-order field writer. The backing buffer zeroizes on drop since it
/// holds cleartext key material until `seal` encrypts it.
pub struct PickleWriter {
    buf: Zeroizing<Vec<u8>>,
}

impl PickleWriter {
    pub fn new() -> Self {
        Self { buf: Zeroizing::new(Vec::new()) }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_bytes(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }

    /// Encrypt the accumulated payload into a pickle blob.
    pub fn seal(self, version: u32, pickle_key: &[u8]) -> Result<Vec<u8>, CryptoError> {
        seal(version, &self.buf, pickle_key)
    }
}

impl Default for PickleWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-order field reader over a decrypted payload.
pub struct PickleReader<'a> {
    buf: &'a [u8],
}

impl<'a> PickleReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CryptoError> {
        if self.buf.len() < n {
            return Err(CryptoError::PickleFormat);
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    pub fn take_u8(&mut self) -> Result<u8, CryptoError> {
        Ok(self.take(1)?[0])
    }

    /// Strict boolean: anything but 0 or 1 is malformed.
    pub fn take_bool(&mut self) -> Result<bool, CryptoError> {
        match self.take_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(CryptoError::PickleFormat),
        }
    }

    pub fn take_u32(&mut self) -> Result<u32, CryptoError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CryptoError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// The payload must be fully consumed; trailing bytes mean a layout
    /// mismatch.
    pub fn finish(self) -> Result<(), CryptoError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(CryptoError::PickleFormat)
        }
    }
}
