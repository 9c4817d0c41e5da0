//! Session-key distribution blobs.
//!
//! The signed share (version 2) is what a sender hands to receivers:
//!
//!   0x02 | index (u32 BE) | R0..R3 (128) | signing_pub (32) | sig64
//!
//! with the signature covering everything before it, made by the session's
//! own signing key — so the blob is self-authenticating. The export form
//! (version 1) omits the signature and is produced by receivers re-sharing
//! history; sessions built from it can never claim a verified sender.
//!
//! Both blobs carry live ratchet secrets and zeroize their buffers.

use pawl_crypto::{
    base64_decode, base64_encode, Ed25519Keypair, Ed25519PublicKey, Ed25519Signature,
};
use zeroize::Zeroizing;

use crate::{error::MegolmError, ratchet::RATCHET_LENGTH};

pub const SESSION_KEY_VERSION: u8 = 2;
pub const SESSION_EXPORT_VERSION: u8 = 1;

const SIGNED_LENGTH: usize = 1 + 4 + RATCHET_LENGTH + 32 + 64;
const EXPORT_LENGTH: usize = 1 + 4 + RATCHET_LENGTH + 32;

fn unsigned_part(
    version: u8,
    message_index: u32,
    ratchet: &[u8; RATCHET_LENGTH],
    signing_key: &Ed25519PublicKey,
) -> Zeroizing<Vec<u8>> {
    let mut bytes = Zeroizing::new(Vec::with_capacity(SIGNED_LENGTH));
    bytes.push(version);
    bytes.extend_from_slice(&message_index.to_be_bytes());
    bytes.extend_from_slice(ratchet.as_ref());
    bytes.extend_from_slice(signing_key.as_bytes());
    bytes
}

fn split_fields(payload: &[u8]) -> Result<(u32, [u8; RATCHET_LENGTH], Ed25519PublicKey), MegolmError> {
    let message_index = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let mut ratchet = [0u8; RATCHET_LENGTH];
    ratchet.copy_from_slice(&payload[4..4 + RATCHET_LENGTH]);
    let signing_key = Ed25519PublicKey::from_slice(&payload[4 + RATCHET_LENGTH..])
        .map_err(|_| MegolmError::BadMessageFormat)?;
    Ok((message_index, ratchet, signing_key))
}

// ── Signed share ─────────────────────────────────────────────────────────────

pub struct SessionKey {
    pub(crate) message_index: u32,
    pub(crate) ratchet: Zeroizing<[u8; RATCHET_LENGTH]>,
    pub(crate) signing_key: Ed25519PublicKey,
    signature: Ed25519Signature,
}

impl SessionKey {
    pub(crate) fn new(
        message_index: u32,
        ratchet: Zeroizing<[u8; RATCHET_LENGTH]>,
        signing_keypair: &Ed25519Keypair,
    ) -> Self {
        let signing_key = signing_keypair.public_key();
        let unsigned =
            unsigned_part(SESSION_KEY_VERSION, message_index, &ratchet, &signing_key);
        let signature = signing_keypair.sign(&unsigned);
        Self { message_index, ratchet, signing_key, signature }
    }

    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut bytes = unsigned_part(
            SESSION_KEY_VERSION,
            self.message_index,
            &self.ratchet,
            &self.signing_key,
        );
        bytes.extend_from_slice(&self.signature.to_bytes());
        bytes
    }

    pub fn to_base64(&self) -> String {
        base64_encode(self.to_bytes().as_slice())
    }

    /// Parse and verify the self-signature.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MegolmError> {
        if bytes.len() != SIGNED_LENGTH {
            return Err(MegolmError::BadMessageFormat);
        }
        if bytes[0] != SESSION_KEY_VERSION {
            return Err(MegolmError::BadMessageVersion(bytes[0]));
        }

        let (unsigned, signature_bytes) = bytes.split_at(SIGNED_LENGTH - 64);
        let (message_index, ratchet, signing_key) = split_fields(&unsigned[1..])?;
        let signature = Ed25519Signature::from_slice(signature_bytes)
            .map_err(|_| MegolmError::BadMessageFormat)?;
        signing_key
            .verify(unsigned, &signature)
            .map_err(|_| MegolmError::BadSignature)?;

        Ok(Self { message_index, ratchet: Zeroizing::new(ratchet), signing_key, signature })
    }

    pub fn from_base64(input: &str) -> Result<Self, MegolmError> {
        Self::from_bytes(&base64_decode(input)?)
    }
}

// ── Unsigned export ──────────────────────────────────────────────────────────

pub struct ExportedSessionKey {
    pub(crate) message_index: u32,
    pub(crate) ratchet: Zeroizing<[u8; RATCHET_LENGTH]>,
    pub(crate) signing_key: Ed25519PublicKey,
}

impl ExportedSessionKey {
    pub(crate) fn new(
        message_index: u32,
        ratchet: Zeroizing<[u8; RATCHET_LENGTH]>,
        signing_key: Ed25519PublicKey,
    ) -> Self {
        Self { message_index, ratchet, signing_key }
    }

    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        unsigned_part(
            SESSION_EXPORT_VERSION,
            self.message_index,
            &self.ratchet,
            &self.signing_key,
        )
    }

    pub fn to_base64(&self) -> String {
        base64_encode(self.to_bytes().as_slice())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MegolmError> {
        if bytes.len() != EXPORT_LENGTH {
            return Err(MegolmError::BadMessageFormat);
        }
        if bytes[0] != SESSION_EXPORT_VERSION {
            return Err(MegolmError::BadMessageVersion(bytes[0]));
        }
        let (message_index, ratchet, signing_key) = split_fields(&bytes[1..])?;
        Ok(Self { message_index, ratchet: Zeroizing::new(ratchet), signing_key })
    }

    pub fn from_base64(input: &str) -> Result<Self, MegolmError> {
        Self::from_bytes(&base64_decode(input)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_blob() -> SessionKey {
        let signer = Ed25519Keypair::from_seed([8u8; 32]);
        SessionKey::new(17, Zeroizing::new([5u8; RATCHET_LENGTH]), &signer)
    }

    #[test]
    fn signed_share_roundtrip() {
        let blob = signed_blob();
        let parsed = SessionKey::from_base64(&blob.to_base64()).unwrap();
        assert_eq!(parsed.message_index, 17);
        assert_eq!(parsed.signing_key, blob.signing_key);
        assert_eq!(parsed.to_bytes().as_slice(), blob.to_bytes().as_slice());
    }

    #[test]
    fn tampered_share_fails_signature() {
        let blob = signed_blob();
        let mut bytes = blob.to_bytes().to_vec();
        bytes[6] ^= 1;
        assert!(matches!(SessionKey::from_bytes(&bytes), Err(MegolmError::BadSignature)));
    }

    #[test]
    fn export_roundtrip_has_no_signature() {
        let signer = Ed25519Keypair::from_seed([9u8; 32]);
        let export = ExportedSessionKey::new(
            3,
            Zeroizing::new([2u8; RATCHET_LENGTH]),
            signer.public_key(),
        );
        let bytes = export.to_bytes();
        assert_eq!(bytes.len(), EXPORT_LENGTH);
        let parsed = ExportedSessionKey::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.message_index, 3);
        assert_eq!(parsed.signing_key, signer.public_key());
    }

    #[test]
    fn version_bytes_are_checked_both_ways() {
        let blob = signed_blob();
        let mut bytes = blob.to_bytes().to_vec();
        bytes[0] = SESSION_EXPORT_VERSION;
        assert!(matches!(
            SessionKey::from_bytes(&bytes),
            Err(MegolmError::BadMessageVersion(SESSION_EXPORT_VERSION))
        ));

        let export = ExportedSessionKey::new(
            0,
            Zeroizing::new([0u8; RATCHET_LENGTH]),
            blob.signing_key,
        );
        let mut bytes = export.to_bytes().to_vec();
        bytes[0] = SESSION_KEY_VERSION;
        assert!(matches!(
            ExportedSessionKey::from_bytes(&bytes),
            Err(MegolmError::BadMessageVersion(SESSION_KEY_VERSION))
        ));
    }
}
