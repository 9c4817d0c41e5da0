//! Key derivation helpers shared by every component.
//!
//! `hkdf_sha256` — RFC 5869 extract-and-expand; a `None` salt is the
//!   hash-length zero block per the RFC.
//! `hmac_sha256` / `sha256` — one-shot digests.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

pub(crate) type HmacSha256 = Hmac<Sha256>;

/// Fill `output` with HKDF-SHA256 keyed on `ikm`.
pub fn hkdf_sha256(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    Hkdf::<Sha256>::new(salt, ikm)
        .expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// One-shot HMAC-SHA-256.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// One-shot SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}
