use pawl_crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OlmError {
    #[error("unknown message version {0}")]
    BadMessageVersion(u8),

    #[error("failed to decode the message")]
    BadMessageFormat,

    #[error("message authentication failed")]
    BadMessageMac,

    #[error("the message references an unknown key")]
    BadMessageKeyId,

    #[error("message index is more than {0} ahead of the receiving chain")]
    MessageGapTooLarge(u32),

    #[error("legacy account pickle failed validation")]
    BadLegacyAccountPickle,

    #[error("base64 decode error: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
