//! pawl_olm — two-party double-ratchet sessions.
//!
//! The protocol combines a symmetric key ratchet (per-message forward
//! secrecy) with a Diffie-Hellman ratchet (post-compromise secrecy) on top
//! of an X3DH-style triple-DH handshake:
//!
//!   d1 = DH(identity_A, one_time_B)
//!   d2 = DH(base_A,     identity_B)
//!   d3 = DH(base_A,     one_time_B)
//!   root, chain = HKDF(d1 || d2 || d3, "OLM_ROOT")
//!
//! The first messages of a session carry the handshake material ("pre-key"
//! framing) until the sender has proof the other side holds the session;
//! afterwards messages carry only the current ratchet key and counter.
//!
//! # Module layout
//! - `account`  — long-lived identity, one-time key pool, fallback keys
//! - `session`  — handshake, encrypt/decrypt, pickling
//! - `ratchet`  — root/chain/message keys and the DH ratchet state machine
//! - `messages` — varint tag-length wire codec for both message shapes
//! - `error`    — unified error type

pub mod account;
pub mod error;
pub mod messages;
mod ratchet;
pub mod session;

pub use account::{Account, IdentityKeys, OneTimeKeys, MAX_ONE_TIME_KEYS};
pub use error::OlmError;
pub use messages::{Message, OlmMessage, PreKeyMessage};
pub use ratchet::{MAX_MESSAGE_GAP, MAX_RECEIVER_CHAINS, MAX_SKIPPED_MESSAGE_KEYS};
pub use session::Session;
