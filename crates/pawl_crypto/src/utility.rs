//! Standalone helpers exposed at the library boundary.

use crate::{
    b64::base64_encode,
    error::CryptoError,
    kdf,
    keys::{Ed25519PublicKey, Ed25519Signature},
};

/// Base64 of the SHA-256 digest of `input`.
pub fn sha256_b64(input: &[u8]) -> String {
    base64_encode(kdf::sha256(input))
}

/// Verify a detached Ed25519 signature.
pub fn ed25519_verify(
    key: &Ed25519PublicKey,
    message: &[u8],
    signature: &Ed25519Signature,
) -> Result<(), CryptoError> {
    key.verify(message, signature)
}

/// The library version as `(major, minor, patch)`.
pub fn get_library_version() -> (u8, u8, u8) {
    let mut parts = env!("CARGO_PKG_VERSION")
        .split('.')
        .map(|part| part.parse().unwrap_or(0));
    let mut next = move || parts.next().unwrap_or(0);
    (next(), next(), next())
}
