//! Base64 helpers.
//!
//! Every string crossing the library boundary (keys, ciphertexts, pickles,
//! MACs) is unpadded base64 over the standard alphabet. Binary stays binary
//! internally; these two functions are the only edge codec.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};

/// Encode bytes as unpadded standard-alphabet base64.
pub fn base64_encode(input: impl AsRef<[u8]>) -> String {
    STANDARD_NO_PAD.encode(input)
}

/// Decode unpadded standard-alphabet base64.
pub fn base64_decode(input: impl AsRef<[u8]>) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD_NO_PAD.decode(input)
}
