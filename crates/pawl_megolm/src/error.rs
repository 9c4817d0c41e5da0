use pawl_crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MegolmError {
    #[error("unknown message version {0}")]
    BadMessageVersion(u8),

    #[error("failed to decode the message")]
    BadMessageFormat,

    #[error("message authentication failed")]
    BadMessageMac,

    #[error("signature verification failed")]
    BadSignature,

    #[error("message index predates this receiver's earliest known ratchet state")]
    UnknownMessageIndex,

    #[error("base64 decode error: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
