//! AES-256-CBC + HMAC-SHA-256 message envelope.
//!
//! One 80-byte HKDF-SHA256 expansion of the input key material yields
//!
//!   [ AES-256 key (32) | HMAC-SHA-256 key (32) | AES IV (16) ]
//!
//! so a cipher instance is fully determined by `(ikm, info)`. The four
//! schedules in use:
//!
//!   two-party message   ikm = 32-byte message key     info = "OLM_KEYS"
//!   group message       ikm = 128-byte ratchet state  info = "MEGOLM_KEYS"
//!   PK seal             ikm = X25519 shared secret    info = "OLM_KEYS"
//!   pickle envelope     ikm = caller pickle key       info = ""
//!
//! MACs are HMAC-SHA-256 truncated to 8 bytes and always verified in
//! constant time before any plaintext is produced.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::Mac;
use zeroize::Zeroizing;

use crate::{error::CryptoError, kdf};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const MAC_LENGTH: usize = 8;

const AES_KEY_LENGTH: usize = 32;
const MAC_KEY_LENGTH: usize = 32;
const IV_LENGTH: usize = 16;

pub struct MessageCipher {
    aes_key: Zeroizing<[u8; AES_KEY_LENGTH]>,
    mac_key: Zeroizing<[u8; MAC_KEY_LENGTH]>,
    iv: Zeroizing<[u8; IV_LENGTH]>,
}

impl MessageCipher {
    /// Derive a cipher instance from input key material and a domain info
    /// string.
    pub fn new(ikm: &[u8], info: &[u8]) -> Result<Self, CryptoError> {
        let mut expanded = Zeroizing::new([0u8; AES_KEY_LENGTH + MAC_KEY_LENGTH + IV_LENGTH]);
        kdf::hkdf_sha256(None, ikm, info, expanded.as_mut())?;

        let mut aes_key = Zeroizing::new([0u8; AES_KEY_LENGTH]);
        let mut mac_key = Zeroizing::new([0u8; MAC_KEY_LENGTH]);
        let mut iv = Zeroizing::new([0u8; IV_LENGTH]);
        aes_key.copy_from_slice(&expanded[..32]);
        mac_key.copy_from_slice(&expanded[32..64]);
        iv.copy_from_slice(&expanded[64..80]);

        Ok(Self { aes_key, mac_key, iv })
    }

    /// AES-256-CBC encrypt with PKCS#7 padding.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let cipher = Aes256CbcEnc::new((&*self.aes_key).into(), (&*self.iv).into());
        cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    /// AES-256-CBC decrypt and strip padding. Call `verify_mac` first.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let cipher = Aes256CbcDec::new((&*self.aes_key).into(), (&*self.iv).into());
        let plaintext = cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::Padding)?;
        Ok(Zeroizing::new(plaintext))
    }

    /// Truncated HMAC-SHA-256 over `data`.
    pub fn mac(&self, data: &[u8]) -> [u8; MAC_LENGTH] {
        let mut mac = kdf::HmacSha256::new_from_slice(self.mac_key.as_ref())
            .expect("HMAC accepts any key size");
        mac.update(data);
        let tag = mac.finalize().into_bytes();
        let mut truncated = [0u8; MAC_LENGTH];
        truncated.copy_from_slice(&tag[..MAC_LENGTH]);
        truncated
    }

    /// Constant-time check of a truncated MAC.
    pub fn verify_mac(&self, data: &[u8], tag: &[u8]) -> Result<(), CryptoError> {
        if tag.len() != MAC_LENGTH {
            return Err(CryptoError::Mac);
        }
        let mut mac = kdf::HmacSha256::new_from_slice(self.mac_key.as_ref())
            .expect("HMAC accepts any key size");
        mac.update(data);
        mac.verify_truncated_left(tag).map_err(|_| CryptoError::Mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let cipher = MessageCipher::new(&[1u8; 32], b"OLM_KEYS").unwrap();
        let ciphertext = cipher.encrypt(b"a secret to keep");
        assert_eq!(ciphertext.len() % 16, 0);
        let plaintext = cipher.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext.as_slice(), b"a secret to keep");
    }

    #[test]
    fn deterministic_for_same_key_material() {
        let a = MessageCipher::new(&[9u8; 32], b"OLM_KEYS").unwrap();
        let b = MessageCipher::new(&[9u8; 32], b"OLM_KEYS").unwrap();
        assert_eq!(a.encrypt(b"same"), b.encrypt(b"same"));
    }

    #[test]
    fn different_info_different_keystream() {
        let a = MessageCipher::new(&[9u8; 32], b"OLM_KEYS").unwrap();
        let b = MessageCipher::new(&[9u8; 32], b"MEGOLM_KEYS").unwrap();
        assert_ne!(a.encrypt(b"same"), b.encrypt(b"same"));
    }

    #[test]
    fn mac_verifies_and_rejects_tampering() {
        let cipher = MessageCipher::new(&[3u8; 32], b"OLM_KEYS").unwrap();
        let data = b"authenticated bytes";
        let tag = cipher.mac(data);
        cipher.verify_mac(data, &tag).unwrap();

        let mut bad = tag;
        bad[0] ^= 1;
        assert!(matches!(cipher.verify_mac(data, &bad), Err(CryptoError::Mac)));
        assert!(matches!(cipher.verify_mac(b"other bytes", &tag), Err(CryptoError::Mac)));
    }

    #[test]
    fn padding_always_added() {
        // A block-aligned plaintext still grows by one block.
        let cipher = MessageCipher::new(&[5u8; 32], b"OLM_KEYS").unwrap();
        assert_eq!(cipher.encrypt(&[0u8; 16]).len(), 32);
        assert_eq!(cipher.encrypt(&[0u8; 15]).len(), 16);
    }
}
