//! Public-key sealing and seed-based signing.
//!
//! `PkEncryption` seals a payload to the holder of a Curve25519 secret:
//! a fresh ephemeral keypair is generated, the X25519 shared secret feeds
//! the same AES-CBC + HMAC schedule as a two-party message, and the
//! ephemeral public key rides alongside the ciphertext. `PkDecryption` is
//! the inverse and is picklable. `PkSigning` wraps a caller-supplied
//! Ed25519 seed, so its signatures are reproducible from the seed alone.

use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::{
    b64::{base64_decode, base64_encode},
    cipher::{MessageCipher, MAC_LENGTH},
    error::CryptoError,
    keys::{Curve25519PublicKey, Curve25519SecretKey, Ed25519Keypair, Ed25519PublicKey,
           Ed25519Signature},
    pickle::{self, PickleReader, PickleWriter},
};

const SEAL_INFO: &[u8] = b"OLM_KEYS";

const PICKLE_VERSION: u32 = 1;
const ACCEPTED_PICKLE_VERSIONS: &[u32] = &[1];

// ── Sealed message ───────────────────────────────────────────────────────────

/// The output of a PK seal: ciphertext, truncated MAC over the ciphertext,
/// and the sender's ephemeral public key.
#[derive(Debug, Clone)]
pub struct PkMessage {
    pub ciphertext: Vec<u8>,
    pub mac: [u8; MAC_LENGTH],
    pub ephemeral_key: Curve25519PublicKey,
}

impl PkMessage {
    /// Base64 parts in `(ciphertext, mac, ephemeral_key)` order.
    pub fn to_base64(&self) -> (String, String, String) {
        (
            base64_encode(&self.ciphertext),
            base64_encode(self.mac),
            self.ephemeral_key.to_base64(),
        )
    }

    pub fn from_base64(
        ciphertext: &str,
        mac: &str,
        ephemeral_key: &str,
    ) -> Result<Self, CryptoError> {
        let mac_bytes = base64_decode(mac)?;
        let mac = mac_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InputTooShort)?;
        Ok(Self {
            ciphertext: base64_decode(ciphertext)?,
            mac,
            ephemeral_key: Curve25519PublicKey::from_base64(ephemeral_key)?,
        })
    }
}

// ── Sealing side ─────────────────────────────────────────────────────────────

pub struct PkEncryption {
    recipient_key: Curve25519PublicKey,
}

impl PkEncryption {
    pub fn new(recipient_key: Curve25519PublicKey) -> Self {
        Self { recipient_key }
    }

    pub fn from_base64(recipient_key: &str) -> Result<Self, CryptoError> {
        Ok(Self::new(Curve25519PublicKey::from_base64(recipient_key)?))
    }

    pub fn encrypt(
        &self,
        rng: &mut (impl RngCore + CryptoRng),
        plaintext: &[u8],
    ) -> Result<PkMessage, CryptoError> {
        let ephemeral = Curve25519SecretKey::new(rng);
        let shared = ephemeral.diffie_hellman(&self.recipient_key);
        let cipher = MessageCipher::new(shared.as_bytes(), SEAL_INFO)?;

        let ciphertext = cipher.encrypt(plaintext);
        let mac = cipher.mac(&ciphertext);
        Ok(PkMessage { ciphertext, mac, ephemeral_key: ephemeral.public_key() })
    }
}

// ── Unsealing side ───────────────────────────────────────────────────────────

pub struct PkDecryption {
    secret_key: Curve25519SecretKey,
    public_key: Curve25519PublicKey,
}

impl PkDecryption {
    pub fn new(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        Self::from_secret(Curve25519SecretKey::new(rng))
    }

    pub fn from_secret(secret_key: Curve25519SecretKey) -> Self {
        let public_key = secret_key.public_key();
        Self { secret_key, public_key }
    }

    /// The key senders seal to.
    pub fn public_key(&self) -> Curve25519PublicKey {
        self.public_key
    }

    /// MAC check happens before any plaintext is produced.
    pub fn decrypt(&self, message: &PkMessage) -> Result<Vec<u8>, CryptoError> {
        let shared = self.secret_key.diffie_hellman(&message.ephemeral_key);
        let cipher = MessageCipher::new(shared.as_bytes(), SEAL_INFO)?;

        cipher.verify_mac(&message.ciphertext, &message.mac)?;
        let plaintext = cipher.decrypt(&message.ciphertext)?;
        Ok(plaintext.to_vec())
    }

    pub fn pickle(&self, pickle_key: &[u8]) -> Result<String, CryptoError> {
        let mut writer = PickleWriter::new();
        writer.put_bytes(self.secret_key.to_bytes().as_ref());
        Ok(base64_encode(writer.seal(PICKLE_VERSION, pickle_key)?))
    }

    pub fn from_pickle(pickle: &str, pickle_key: &[u8]) -> Result<Self, CryptoError> {
        let blob = base64_decode(pickle)?;
        let (_, payload) = pickle::open(ACCEPTED_PICKLE_VERSIONS, &blob, pickle_key)?;

        let mut reader = PickleReader::new(&payload);
        let secret = Zeroizing::new(reader.take_array::<32>()?);
        reader.finish()?;
        Ok(Self::from_secret(Curve25519SecretKey::from_bytes(*secret)))
    }
}

// ── Seed signer ──────────────────────────────────────────────────────────────

/// Deterministic Ed25519 signer over a caller-supplied seed.
pub struct PkSigning {
    keypair: Ed25519Keypair,
}

impl PkSigning {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { keypair: Ed25519Keypair::from_seed(seed) }
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        self.keypair.sign(message)
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn seal_unseal_roundtrip() {
        let mut rng = StdRng::seed_from_u64(11);
        let decryption = PkDecryption::new(&mut rng);
        let encryption = PkEncryption::new(decryption.public_key());

        let message = encryption.encrypt(&mut rng, b"a secret for one holder").unwrap();
        assert_eq!(decryption.decrypt(&message).unwrap(), b"a secret for one holder");
    }

    #[test]
    fn base64_parts_roundtrip() {
        let mut rng = StdRng::seed_from_u64(12);
        let decryption = PkDecryption::new(&mut rng);
        let encryption = PkEncryption::new(decryption.public_key());

        let message = encryption.encrypt(&mut rng, b"over the wire").unwrap();
        let (ct, mac, key) = message.to_base64();
        let parsed = PkMessage::from_base64(&ct, &mac, &key).unwrap();
        assert_eq!(decryption.decrypt(&parsed).unwrap(), b"over the wire");
    }

    #[test]
    fn tampered_ciphertext_is_rejected_before_decryption() {
        let mut rng = StdRng::seed_from_u64(13);
        let decryption = PkDecryption::new(&mut rng);
        let encryption = PkEncryption::new(decryption.public_key());

        let mut message = encryption.encrypt(&mut rng, b"payload").unwrap();
        message.ciphertext[0] ^= 1;
        assert!(matches!(decryption.decrypt(&message), Err(CryptoError::Mac)));
    }

    #[test]
    fn wrong_recipient_fails() {
        let mut rng = StdRng::seed_from_u64(14);
        let decryption = PkDecryption::new(&mut rng);
        let other = PkDecryption::new(&mut rng);
        let encryption = PkEncryption::new(decryption.public_key());

        let message = encryption.encrypt(&mut rng, b"payload").unwrap();
        assert!(other.decrypt(&message).is_err());
    }

    #[test]
    fn pickle_roundtrip_preserves_the_key() {
        let mut rng = StdRng::seed_from_u64(15);
        let decryption = PkDecryption::new(&mut rng);

        let pickle = decryption.pickle(b"pk pickle key").unwrap();
        let restored = PkDecryption::from_pickle(&pickle, b"pk pickle key").unwrap();
        assert_eq!(restored.public_key(), decryption.public_key());

        let encryption = PkEncryption::new(decryption.public_key());
        let message = encryption.encrypt(&mut rng, b"still readable").unwrap();
        assert_eq!(restored.decrypt(&message).unwrap(), b"still readable");
    }

    // RFC 8032 §7.1 TEST 1: the seed signer is fully deterministic.
    #[test]
    fn signing_is_deterministic_from_seed() {
        let seed: [u8; 32] =
            hex::decode("9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60")
                .unwrap()
                .try_into()
                .unwrap();
        let signer = PkSigning::from_seed(seed);
        assert_eq!(
            signer.public_key().as_bytes().to_vec(),
            hex::decode("d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a")
                .unwrap()
        );
        assert_eq!(signer.sign(b"").to_bytes(), PkSigning::from_seed(seed).sign(b"").to_bytes());
    }
}
