//! Short-authentication-string (SAS) verification.
//!
//! Each side generates a fresh Curve25519 pair and publishes the public
//! half out of band. Once `set_their_key` has run, both sides hold the
//! same X25519 shared secret and can derive:
//!
//!   - the SAS bytes themselves (emoji / decimal display) via
//!     `generate_bytes` — HKDF(salt = none, secret, info, n);
//!   - authentication MACs over key material via `calculate_mac` —
//!     HMAC-SHA-256 keyed with HKDF(secret, info, 32).
//!
//! Two historical MAC variants are kept for wire compatibility:
//! `calculate_mac_invalid_base64` (the MAC is correct but base64-encoded
//! in place over its own buffer, corrupting every 3-byte group after the
//! first) and `calculate_mac_long_kdf` (the HMAC key is a 256-byte HKDF
//! expansion instead of 32 bytes).

use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::{
    b64::base64_encode,
    error::CryptoError,
    kdf,
    keys::{Curve25519PublicKey, Curve25519SecretKey},
};

const MAC_KEY_LENGTH: usize = 32;
const LONG_KDF_KEY_LENGTH: usize = 256;

pub struct Sas {
    secret_key: Curve25519SecretKey,
    public_key: Curve25519PublicKey,
    shared_secret: Option<Zeroizing<[u8; 32]>>,
}

impl Sas {
    pub fn new(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        let secret_key = Curve25519SecretKey::new(rng);
        let public_key = secret_key.public_key();
        Self { secret_key, public_key, shared_secret: None }
    }

    /// Our public half, to be shown or sent to the other side.
    pub fn public_key(&self) -> Curve25519PublicKey {
        self.public_key
    }

    /// Complete the exchange with the other side's public key.
    pub fn set_their_key(&mut self, their_key: &Curve25519PublicKey) {
        let shared = self.secret_key.diffie_hellman(their_key);
        self.shared_secret = Some(Zeroizing::new(shared.to_bytes()));
    }

    fn shared_secret(&self) -> Result<&[u8; 32], CryptoError> {
        self.shared_secret
            .as_deref()
            .ok_or(CryptoError::SasTheirKeyNotSet)
    }

    /// Derive `count` bytes for the short authentication string itself.
    pub fn generate_bytes(&self, info: &[u8], count: usize) -> Result<Vec<u8>, CryptoError> {
        let mut bytes = vec![0u8; count];
        kdf::hkdf_sha256(None, self.shared_secret()?, info, &mut bytes)?;
        Ok(bytes)
    }

    fn mac_bytes(&self, input: &[u8], info: &[u8], key_length: usize) -> Result<[u8; 32], CryptoError> {
        let mut key = Zeroizing::new(vec![0u8; key_length]);
        kdf::hkdf_sha256(None, self.shared_secret()?, info, &mut key)?;
        Ok(kdf::hmac_sha256(&key, input))
    }

    /// Current MAC variant: base64 of HMAC-SHA-256 under a 32-byte derived
    /// key.
    pub fn calculate_mac(&self, input: &[u8], info: &[u8]) -> Result<String, CryptoError> {
        Ok(base64_encode(self.mac_bytes(input, info, MAC_KEY_LENGTH)?))
    }

    /// Historical variant that base64-encoded the MAC in place. Only the
    /// first output group survives intact; kept byte-compatible for old
    /// counterparts.
    pub fn calculate_mac_invalid_base64(
        &self,
        input: &[u8],
        info: &[u8],
    ) -> Result<String, CryptoError> {
        Ok(base64_encode_in_place(&self.mac_bytes(input, info, MAC_KEY_LENGTH)?))
    }

    /// Historical variant whose HMAC key is a 256-byte HKDF expansion.
    pub fn calculate_mac_long_kdf(&self, input: &[u8], info: &[u8]) -> Result<String, CryptoError> {
        Ok(base64_encode(self.mac_bytes(input, info, LONG_KDF_KEY_LENGTH)?))
    }
}

const B64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Unpadded base64 with the output written over the input buffer as it is
/// produced, matching the legacy in-place encode: group 0 is read before
/// anything is overwritten, every later group is read after the previous
/// groups' output has clobbered it.
fn base64_encode_in_place(data: &[u8]) -> String {
    let out_len = (data.len() * 4 + 2) / 3;
    let mut buf = vec![0u8; out_len];
    buf[..data.len()].copy_from_slice(data);

    let mut read = 0;
    let mut write = 0;
    let mut remaining = data.len();
    while remaining >= 3 {
        let chunk = [buf[read], buf[read + 1], buf[read + 2]];
        buf[write] = B64_ALPHABET[(chunk[0] >> 2) as usize];
        buf[write + 1] = B64_ALPHABET[(((chunk[0] & 0x03) << 4) | (chunk[1] >> 4)) as usize];
        buf[write + 2] = B64_ALPHABET[(((chunk[1] & 0x0F) << 2) | (chunk[2] >> 6)) as usize];
        buf[write + 3] = B64_ALPHABET[(chunk[2] & 0x3F) as usize];
        read += 3;
        write += 4;
        remaining -= 3;
    }
    match remaining {
        2 => {
            let chunk = [buf[read], buf[read + 1]];
            buf[write] = B64_ALPHABET[(chunk[0] >> 2) as usize];
            buf[write + 1] = B64_ALPHABET[(((chunk[0] & 0x03) << 4) | (chunk[1] >> 4)) as usize];
            buf[write + 2] = B64_ALPHABET[((chunk[1] & 0x0F) << 2) as usize];
        }
        1 => {
            let byte = buf[read];
            buf[write] = B64_ALPHABET[(byte >> 2) as usize];
            buf[write + 1] = B64_ALPHABET[((byte & 0x03) << 4) as usize];
        }
        _ => {}
    }

    String::from_utf8(buf).expect("base64 output is ASCII")
}
