//! Receiver state for a group session.
//!
//! A receiver keeps two ratchet copies: the state at the earliest index it
//! was ever given (the floor for decryption and exports) and the furthest
//! state it has advanced to (so in-order traffic needs no fast-forward
//! from the floor every time). Sessions created from a signed share carry
//! a verified sender; sessions imported from an unsigned export never do,
//! and cannot be promoted later.

use pawl_crypto::{
    base64_decode, base64_encode,
    pickle::{self, PickleReader, PickleWriter},
    Ed25519PublicKey,
};
use zeroize::Zeroizing;

use crate::{
    error::MegolmError,
    message::GroupMessage,
    ratchet::Ratchet,
    session_key::{ExportedSessionKey, SessionKey},
};

const PICKLE_VERSION: u32 = 1;
const ACCEPTED_PICKLE_VERSIONS: &[u32] = &[1];

pub struct InboundGroupSession {
    initial_ratchet: Ratchet,
    latest_ratchet: Ratchet,
    signing_key: Ed25519PublicKey,
    signing_key_verified: bool,
}

impl InboundGroupSession {
    /// Join from a signed share; the blob's self-signature was verified at
    /// parse time, so the sender counts as verified.
    pub fn new(session_key: &SessionKey) -> Self {
        let ratchet = Ratchet::from_bytes(&session_key.ratchet, session_key.message_index);
        Self {
            initial_ratchet: ratchet.clone(),
            latest_ratchet: ratchet,
            signing_key: session_key.signing_key,
            signing_key_verified: true,
        }
    }

    /// Join from a re-shared export. The sender can never be verified this
    /// way.
    pub fn import(session_key: &ExportedSessionKey) -> Self {
        let ratchet = Ratchet::from_bytes(&session_key.ratchet, session_key.message_index);
        Self {
            initial_ratchet: ratchet.clone(),
            latest_ratchet: ratchet,
            signing_key: session_key.signing_key,
            signing_key_verified: false,
        }
    }

    pub fn session_id(&self) -> String {
        self.signing_key.to_base64()
    }

    /// The earliest index this receiver can decrypt or export.
    pub fn first_known_index(&self) -> u32 {
        self.initial_ratchet.counter()
    }

    /// Whether the sender was authenticated by a signed share rather than
    /// an unsigned import.
    pub fn is_verified(&self) -> bool {
        self.signing_key_verified
    }

    fn ratchet_at(&self, message_index: u32) -> Result<Ratchet, MegolmError> {
        if message_index < self.first_known_index() {
            return Err(MegolmError::UnknownMessageIndex);
        }
        let mut ratchet = if self.latest_ratchet.counter() <= message_index {
            self.latest_ratchet.clone()
        } else {
            self.initial_ratchet.clone()
        };
        ratchet.advance_to(message_index);
        Ok(ratchet)
    }

    /// Verify and decrypt; returns the plaintext together with the
    /// authenticated message index (the index is what deduplicates
    /// replayed ciphertexts, so callers need it).
    pub fn decrypt(&mut self, message: &GroupMessage) -> Result<(Vec<u8>, u32), MegolmError> {
        message.verify_signature(&self.signing_key)?;

        let ratchet = self.ratchet_at(message.message_index)?;
        let cipher = ratchet.message_cipher()?;
        message.verify_mac(&cipher)?;
        let plaintext =
            cipher.decrypt(&message.ciphertext).map_err(|_| MegolmError::BadMessageMac)?;

        if ratchet.counter() > self.latest_ratchet.counter() {
            self.latest_ratchet = ratchet;
        }
        Ok((plaintext.to_vec(), message.message_index))
    }

    /// Export the ratchet at `message_index` for re-sharing; receivers of
    /// the export can decrypt from that index on.
    pub fn export_at(&self, message_index: u32) -> Result<ExportedSessionKey, MegolmError> {
        let ratchet = self.ratchet_at(message_index)?;
        Ok(ExportedSessionKey::new(message_index, ratchet.as_bytes(), self.signing_key))
    }

    pub fn pickle(&self, pickle_key: &[u8]) -> Result<String, MegolmError> {
        let mut writer = PickleWriter::new();
        writer.put_bytes(self.initial_ratchet.as_bytes().as_ref());
        writer.put_u32(self.initial_ratchet.counter());
        writer.put_bytes(self.latest_ratchet.as_bytes().as_ref());
        writer.put_u32(self.latest_ratchet.counter());
        writer.put_bytes(self.signing_key.as_bytes());
        writer.put_bool(self.signing_key_verified);
        Ok(base64_encode(writer.seal(PICKLE_VERSION, pickle_key)?))
    }

    pub fn from_pickle(pickle: &str, pickle_key: &[u8]) -> Result<Self, MegolmError> {
        let blob = base64_decode(pickle)?;
        let (_, payload) = pickle::open(ACCEPTED_PICKLE_VERSIONS, &blob, pickle_key)?;
        let mut reader = PickleReader::new(&payload);

        let initial_bytes = Zeroizing::new(reader.take_array::<128>()?);
        let initial_counter = reader.take_u32()?;
        let latest_bytes = Zeroizing::new(reader.take_array::<128>()?);
        let latest_counter = reader.take_u32()?;
        let signing_key = Ed25519PublicKey::from_bytes(&reader.take_array()?)?;
        let signing_key_verified = reader.take_bool()?;
        reader.finish()?;

        Ok(Self {
            initial_ratchet: Ratchet::from_bytes(&initial_bytes, initial_counter),
            latest_ratchet: Ratchet::from_bytes(&latest_bytes, latest_counter),
            signing_key,
            signing_key_verified,
        })
    }
}

impl std::fmt::Debug for InboundGroupSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundGroupSession")
            .field("session_id", &self.session_id())
            .field("first_known_index", &self.first_known_index())
            .field("verified", &self.signing_key_verified)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use crate::outbound::OutboundGroupSession;

    use super::*;

    fn pair(seed: u64) -> (OutboundGroupSession, InboundGroupSession) {
        let mut rng = StdRng::seed_from_u64(seed);
        let outbound = OutboundGroupSession::new(&mut rng);
        let inbound = InboundGroupSession::new(&outbound.session_key());
        (outbound, inbound)
    }

    #[test]
    fn decrypts_in_order_and_out_of_order() {
        let (mut outbound, mut inbound) = pair(71);
        let messages: Vec<_> = (0..5)
            .map(|i| outbound.encrypt(format!("message {i}").as_bytes()).unwrap())
            .collect();

        for index in [0usize, 3, 1, 4, 2] {
            let (plaintext, at) = inbound.decrypt(&messages[index]).unwrap();
            assert_eq!(plaintext, format!("message {index}").as_bytes());
            assert_eq!(at, index as u32);
        }
    }

    #[test]
    fn session_ids_agree() {
        let (outbound, inbound) = pair(72);
        assert_eq!(outbound.session_id(), inbound.session_id());
        assert!(inbound.is_verified());
    }

    #[test]
    fn late_joiner_cannot_read_history() {
        let mut rng = StdRng::seed_from_u64(73);
        let mut outbound = OutboundGroupSession::new(&mut rng);
        let early = outbound.encrypt(b"before the share").unwrap();
        outbound.encrypt(b"also before").unwrap();

        let mut late = InboundGroupSession::new(&outbound.session_key());
        assert_eq!(late.first_known_index(), 2);
        assert!(matches!(late.decrypt(&early), Err(MegolmError::UnknownMessageIndex)));

        let after = outbound.encrypt(b"after the share").unwrap();
        assert_eq!(late.decrypt(&after).unwrap().0, b"after the share");
    }

    #[test]
    fn export_and_import_reproduce_decryption() {
        let (mut outbound, mut inbound) = pair(74);
        let message = outbound.encrypt(b"for the export too").unwrap();
        inbound.decrypt(&message).unwrap();

        let export = inbound.export_at(0).unwrap();
        let mut imported = InboundGroupSession::import(
            &ExportedSessionKey::from_base64(&export.to_base64()).unwrap(),
        );
        assert!(!imported.is_verified());
        assert_eq!(imported.decrypt(&message).unwrap().0, b"for the export too");
    }

    #[test]
    fn exporting_below_the_floor_is_refused() {
        let mut rng = StdRng::seed_from_u64(75);
        let mut outbound = OutboundGroupSession::new(&mut rng);
        outbound.encrypt(b"x").unwrap();

        let floored = InboundGroupSession::new(&outbound.session_key());
        assert_eq!(floored.first_known_index(), 1);
        assert!(matches!(floored.export_at(0), Err(MegolmError::UnknownMessageIndex)));
        assert!(floored.export_at(1).is_ok());
    }

    #[test]
    fn forged_sender_is_rejected() {
        let (_, mut inbound) = pair(76);
        let mut rng = StdRng::seed_from_u64(77);
        let mut imposter = OutboundGroupSession::new(&mut rng);
        let forged = imposter.encrypt(b"not from the real sender").unwrap();
        assert!(matches!(inbound.decrypt(&forged), Err(MegolmError::BadSignature)));
    }

    #[test]
    fn decrypting_older_indices_still_works_after_advancing() {
        let (mut outbound, mut inbound) = pair(78);
        let first = outbound.encrypt(b"first").unwrap();
        let second = outbound.encrypt(b"second").unwrap();

        assert_eq!(inbound.decrypt(&second).unwrap().0, b"second");
        // latest moved to index 2; the floor copy still serves index 0.
        assert_eq!(inbound.decrypt(&first).unwrap().0, b"first");
    }

    #[test]
    fn pickle_roundtrip() {
        let (mut outbound, mut inbound) = pair(79);
        let message = outbound.encrypt(b"survives pickling").unwrap();
        inbound.decrypt(&message).unwrap();

        let pickle = inbound.pickle(b"inbound pickle key").unwrap();
        let mut restored = InboundGroupSession::from_pickle(&pickle, b"inbound pickle key").unwrap();
        assert_eq!(restored.session_id(), inbound.session_id());
        assert_eq!(restored.first_known_index(), 0);
        assert!(restored.is_verified());

        let next = outbound.encrypt(b"and keeps decrypting").unwrap();
        assert_eq!(restored.decrypt(&next).unwrap().0, b"and keeps decrypting");
    }
}
