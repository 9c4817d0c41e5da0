//! pawl_megolm — one-to-many group ratchet sessions.
//!
//! A sender owns a four-part hash ratchet plus an Ed25519 signing key.
//! Each message is encrypted under keys derived from the ratchet state at
//! its index and signed, so any receiver holding the session-key blob can
//! authenticate the sender. The ratchet only moves forward: receivers can
//! fast-forward to any later index in O(log n) rehashes but can never
//! recover earlier indices, and exports at an index give new receivers
//! history access only from that point on.
//!
//! # Module layout
//! - `ratchet`     — the four-part hash ratchet and its fast-forward
//! - `message`     — signed group message wire format
//! - `session_key` — session-key distribution and export blobs
//! - `outbound`    — sender state
//! - `inbound`     — receiver state
//! - `error`       — unified error type

pub mod error;
pub mod inbound;
pub mod message;
pub mod outbound;
mod ratchet;
pub mod session_key;

pub use error::MegolmError;
pub use inbound::InboundGroupSession;
pub use message::GroupMessage;
pub use outbound::OutboundGroupSession;
pub use session_key::{ExportedSessionKey, SessionKey};
