//! Key newtypes.
//!
//! All public APIs deal in these opaque wrappers rather than raw arrays so
//! that a signing key can never be handed to a Diffie-Hellman call and vice
//! versa. Secret halves zeroize on drop; public halves serialise as
//! unpadded base64 strings.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::{CryptoRng, RngCore};
use serde::{Serialize, Serializer};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
pub use x25519_dalek::SharedSecret;
use zeroize::Zeroizing;

use crate::{b64::base64_decode, b64::base64_encode, error::CryptoError};

pub const CURVE25519_KEY_LENGTH: usize = 32;
pub const ED25519_KEY_LENGTH: usize = 32;
pub const ED25519_SIGNATURE_LENGTH: usize = 64;

fn to_32(bytes: &[u8]) -> Result<[u8; 32], CryptoError> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))
}

// ── Curve25519 ───────────────────────────────────────────────────────────────

/// 32-byte Curve25519 public key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Curve25519PublicKey {
    inner: [u8; CURVE25519_KEY_LENGTH],
}

impl Curve25519PublicKey {
    pub fn from_bytes(bytes: [u8; CURVE25519_KEY_LENGTH]) -> Self {
        Self { inner: bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self { inner: to_32(bytes)? })
    }

    pub fn from_base64(input: &str) -> Result<Self, CryptoError> {
        Self::from_slice(&base64_decode(input)?)
    }

    pub fn to_base64(&self) -> String {
        base64_encode(self.inner)
    }

    pub fn as_bytes(&self) -> &[u8; CURVE25519_KEY_LENGTH] {
        &self.inner
    }

    pub fn to_bytes(self) -> [u8; CURVE25519_KEY_LENGTH] {
        self.inner
    }

    /// Constant-time equality, for lookups keyed on attacker-supplied keys.
    pub fn ct_eq(&self, other: &Curve25519PublicKey) -> bool {
        self.inner.ct_eq(&other.inner).into()
    }
}

impl std::fmt::Debug for Curve25519PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Curve25519PublicKey({})", self.to_base64())
    }
}

impl Serialize for Curve25519PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

/// Curve25519 secret key. The inner dalek type clamps on use and zeroizes
/// on drop.
pub struct Curve25519SecretKey {
    inner: StaticSecret,
}

impl Curve25519SecretKey {
    pub fn new(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        Self { inner: StaticSecret::random_from_rng(rng) }
    }

    pub fn from_bytes(bytes: [u8; CURVE25519_KEY_LENGTH]) -> Self {
        Self { inner: StaticSecret::from(bytes) }
    }

    /// Raw bytes, for pickling only.
    pub fn to_bytes(&self) -> Zeroizing<[u8; CURVE25519_KEY_LENGTH]> {
        Zeroizing::new(self.inner.to_bytes())
    }

    pub fn public_key(&self) -> Curve25519PublicKey {
        Curve25519PublicKey::from_bytes(X25519Public::from(&self.inner).to_bytes())
    }

    pub fn diffie_hellman(&self, their_key: &Curve25519PublicKey) -> SharedSecret {
        self.inner.diffie_hellman(&X25519Public::from(their_key.inner))
    }
}

impl Clone for Curve25519SecretKey {
    fn clone(&self) -> Self {
        Self::from_bytes(self.inner.to_bytes())
    }
}

/// A Curve25519 secret with its cached public half.
pub struct Curve25519Keypair {
    secret: Curve25519SecretKey,
    public: Curve25519PublicKey,
}

impl Curve25519Keypair {
    pub fn new(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        Self::from_secret(Curve25519SecretKey::new(rng))
    }

    pub fn from_secret(secret: Curve25519SecretKey) -> Self {
        let public = secret.public_key();
        Self { secret, public }
    }

    pub fn secret_key(&self) -> &Curve25519SecretKey {
        &self.secret
    }

    pub fn public_key(&self) -> Curve25519PublicKey {
        self.public
    }

    pub fn diffie_hellman(&self, their_key: &Curve25519PublicKey) -> SharedSecret {
        self.secret.diffie_hellman(their_key)
    }
}

impl Clone for Curve25519Keypair {
    fn clone(&self) -> Self {
        Self { secret: self.secret.clone(), public: self.public }
    }
}

// ── Ed25519 ──────────────────────────────────────────────────────────────────

/// 32-byte Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Ed25519PublicKey {
    inner: VerifyingKey,
}

impl Ed25519PublicKey {
    /// Rejects encodings that are not canonical curve points.
    pub fn from_bytes(bytes: &[u8; ED25519_KEY_LENGTH]) -> Result<Self, CryptoError> {
        let inner = VerifyingKey::from_bytes(bytes)
            .map_err(|_| CryptoError::InvalidKey("not a valid Ed25519 point".to_string()))?;
        Ok(Self { inner })
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        Self::from_bytes(&to_32(bytes)?)
    }

    pub fn from_base64(input: &str) -> Result<Self, CryptoError> {
        Self::from_slice(&base64_decode(input)?)
    }

    pub fn to_base64(&self) -> String {
        base64_encode(self.inner.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; ED25519_KEY_LENGTH] {
        self.inner.as_bytes()
    }

    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<(), CryptoError> {
        self.inner
            .verify(message, &signature.inner)
            .map_err(|_| CryptoError::Signature)
    }
}

impl std::fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ed25519PublicKey({})", self.to_base64())
    }
}

impl Serialize for Ed25519PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

/// 64-byte Ed25519 signature.
#[derive(Clone, Copy)]
pub struct Ed25519Signature {
    inner: ed25519_dalek::Signature,
}

impl Ed25519Signature {
    pub fn from_bytes(bytes: &[u8; ED25519_SIGNATURE_LENGTH]) -> Self {
        Self { inner: ed25519_dalek::Signature::from_bytes(bytes) }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; ED25519_SIGNATURE_LENGTH] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("expected 64-byte signature, got {}", bytes.len()))
        })?;
        Ok(Self::from_bytes(&bytes))
    }

    pub fn from_base64(input: &str) -> Result<Self, CryptoError> {
        Self::from_slice(&base64_decode(input)?)
    }

    pub fn to_base64(&self) -> String {
        base64_encode(self.inner.to_bytes())
    }

    pub fn to_bytes(&self) -> [u8; ED25519_SIGNATURE_LENGTH] {
        self.inner.to_bytes()
    }
}

impl std::fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ed25519Signature({})", self.to_base64())
    }
}

/// Ed25519 signing key held as its 32-byte seed. Construction from a fixed
/// seed yields a fully deterministic signer; the dalek type zeroizes on
/// drop.
pub struct Ed25519Keypair {
    inner: SigningKey,
}

impl Ed25519Keypair {
    pub fn new(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        Self { inner: SigningKey::generate(rng) }
    }

    pub fn from_seed(seed: [u8; ED25519_KEY_LENGTH]) -> Self {
        Self { inner: SigningKey::from_bytes(&seed) }
    }

    /// Seed bytes, for pickling only.
    pub fn seed(&self) -> Zeroizing<[u8; ED25519_KEY_LENGTH]> {
        Zeroizing::new(self.inner.to_bytes())
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey { inner: self.inner.verifying_key() }
    }

    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature { inner: self.inner.sign(message) }
    }
}

impl Clone for Ed25519Keypair {
    fn clone(&self) -> Self {
        Self { inner: SigningKey::from_bytes(&self.inner.to_bytes()) }
    }
}
