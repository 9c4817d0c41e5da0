//! Sender state for a group session.

use pawl_crypto::{
    base64_decode, base64_encode,
    pickle::{self, PickleReader, PickleWriter},
    Ed25519Keypair,
};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::{
    error::MegolmError,
    message::GroupMessage,
    ratchet::Ratchet,
    session_key::SessionKey,
};

const PICKLE_VERSION: u32 = 1;
const ACCEPTED_PICKLE_VERSIONS: &[u32] = &[1];

/// A group sender: a fresh hash ratchet plus the Ed25519 key every message
/// is signed with. The signing public key doubles as the session id.
pub struct OutboundGroupSession {
    ratchet: Ratchet,
    signing_key: Ed25519Keypair,
}

impl OutboundGroupSession {
    pub fn new(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        Self { ratchet: Ratchet::new(rng), signing_key: Ed25519Keypair::new(rng) }
    }

    pub fn session_id(&self) -> String {
        self.signing_key.public_key().to_base64()
    }

    /// The index the next message will be encrypted at.
    pub fn message_index(&self) -> u32 {
        self.ratchet.counter()
    }

    /// Encrypt, sign and advance.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<GroupMessage, MegolmError> {
        let cipher = self.ratchet.message_cipher()?;
        let ciphertext = cipher.encrypt(plaintext);

        let mut message = GroupMessage::new(self.ratchet.counter(), ciphertext);
        message.attach_mac(&cipher);
        message.attach_signature(&self.signing_key);

        self.ratchet.advance();
        Ok(message)
    }

    /// The signed session-key blob receivers need to join at the current
    /// index. Handing it out earlier than the latest index is impossible:
    /// the ratchet never rewinds.
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(self.ratchet.counter(), self.ratchet.as_bytes(), &self.signing_key)
    }

    pub fn pickle(&self, pickle_key: &[u8]) -> Result<String, MegolmError> {
        let mut writer = PickleWriter::new();
        writer.put_bytes(self.ratchet.as_bytes().as_ref());
        writer.put_u32(self.ratchet.counter());
        writer.put_bytes(self.signing_key.seed().as_ref());
        Ok(base64_encode(writer.seal(PICKLE_VERSION, pickle_key)?))
    }

    pub fn from_pickle(pickle: &str, pickle_key: &[u8]) -> Result<Self, MegolmError> {
        let blob = base64_decode(pickle)?;
        let (_, payload) = pickle::open(ACCEPTED_PICKLE_VERSIONS, &blob, pickle_key)?;
        let mut reader = PickleReader::new(&payload);

        let ratchet_bytes = Zeroizing::new(reader.take_array::<128>()?);
        let counter = reader.take_u32()?;
        let seed = Zeroizing::new(reader.take_array::<32>()?);
        reader.finish()?;

        Ok(Self {
            ratchet: Ratchet::from_bytes(&ratchet_bytes, counter),
            signing_key: Ed25519Keypair::from_seed(*seed),
        })
    }
}

impl std::fmt::Debug for OutboundGroupSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundGroupSession")
            .field("session_id", &self.session_id())
            .field("message_index", &self.message_index())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn message_index_follows_encrypts() {
        let mut rng = StdRng::seed_from_u64(61);
        let mut session = OutboundGroupSession::new(&mut rng);
        assert_eq!(session.message_index(), 0);

        let first = session.encrypt(b"one").unwrap();
        let second = session.encrypt(b"two").unwrap();
        assert_eq!(first.message_index, 0);
        assert_eq!(second.message_index, 1);
        assert_eq!(session.message_index(), 2);
    }

    #[test]
    fn session_id_is_the_signing_key() {
        let mut rng = StdRng::seed_from_u64(62);
        let session = OutboundGroupSession::new(&mut rng);
        let shared = SessionKey::from_base64(&session.session_key().to_base64()).unwrap();
        assert_eq!(session.session_id(), shared.signing_key.to_base64());
    }

    #[test]
    fn pickle_roundtrip_continues_the_stream() {
        let mut rng = StdRng::seed_from_u64(63);
        let mut session = OutboundGroupSession::new(&mut rng);
        session.encrypt(b"before pickling").unwrap();

        let pickle = session.pickle(b"group pickle key").unwrap();
        let mut restored = OutboundGroupSession::from_pickle(&pickle, b"group pickle key").unwrap();

        assert_eq!(restored.session_id(), session.session_id());
        assert_eq!(restored.message_index(), 1);
        // Identical state produces identical next ciphertext.
        assert_eq!(
            restored.encrypt(b"after").unwrap().to_bytes(),
            session.encrypt(b"after").unwrap().to_bytes()
        );
    }
}
