//! pawl_crypto — cryptographic primitives for the Pawl messaging core
//!
//! # Design principles
//! - NO custom crypto cores; X25519, Ed25519, SHA-256, HMAC, HKDF and
//!   AES-CBC all come from audited RustCrypto / dalek crates.
//! - Zeroize all secret material on drop, including KDF scratch buffers.
//! - Randomness is injected: every generating operation takes an explicit
//!   `RngCore + CryptoRng`, never an ambient source.
//! - All MAC and key comparisons are constant time.
//!
//! # Module layout
//! - `b64`     — unpadded base64 helpers (every external string boundary)
//! - `keys`    — Curve25519 / Ed25519 newtypes with zeroizing secrets
//! - `kdf`     — HKDF-SHA256 / HMAC-SHA256 / SHA-256 helpers
//! - `cipher`  — AES-256-CBC + truncated HMAC-SHA-256 message envelope
//! - `pickle`  — versioned encrypt-then-MAC serialisation envelope
//! - `pk`      — public-key sealing to a single key holder + seed signer
//! - `sas`     — short-authentication-string key agreement and MACs
//! - `utility` — standalone hash/verify helpers and the library version
//! - `error`   — unified error type

pub mod b64;
pub mod cipher;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod pickle;
pub mod pk;
pub mod sas;
pub mod utility;

pub use b64::{base64_decode, base64_encode};
pub use cipher::MessageCipher;
pub use error::CryptoError;
pub use keys::{
    Curve25519Keypair, Curve25519PublicKey, Curve25519SecretKey, Ed25519Keypair,
    Ed25519PublicKey, Ed25519Signature,
};
pub use pk::{PkDecryption, PkEncryption, PkMessage, PkSigning};
pub use sas::Sas;
pub use utility::{ed25519_verify, get_library_version, sha256_b64};
