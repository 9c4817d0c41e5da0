use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("signature verification failed")]
    Signature,

    #[error("MAC verification failed")]
    Mac,

    #[error("ciphertext unpadding failed")]
    Padding,

    #[error("input too short to be a framed object")]
    InputTooShort,

    #[error("unknown pickle version {0}")]
    UnknownPickleVersion(u32),

    #[error("pickle decryption key does not verify")]
    PickleKey,

    #[error("pickle payload truncated or malformed")]
    PickleFormat,

    #[error("base64 decode error: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("the other side's SAS key has not been set")]
    SasTheirKeyNotSet,
}
