//! Two-party sessions: handshake, message framing, encrypt/decrypt.
//!
//! Outbound creation runs the triple DH against the recipient's identity
//! and one-time keys:
//!
//!   d1 = DH(identity_A, one_time_B)
//!   d2 = DH(base_A,     identity_B)
//!   d3 = DH(base_A,     one_time_B)
//!   root, chain = HKDF(d1 || d2 || d3, "OLM_ROOT")
//!
//! Inbound creation mirrors the same order from the responder's side after
//! looking up the referenced one-time (or fallback) key by public value in
//! constant time.
//!
//! Until the session has decrypted a message from the other side, outgoing
//! messages use pre-key framing so the handshake stays reconstructible;
//! the first successful decrypt flips `received` and drops the handshake
//! material. Decryption never releases plaintext before the MAC has
//! verified, and failed operations leave the session state untouched.

use pawl_crypto::{
    base64_decode, base64_encode, kdf,
    keys::SharedSecret,
    pickle::{self, PickleReader, PickleWriter},
    Curve25519Keypair, Curve25519PublicKey, CryptoError,
};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::{
    account::Account,
    error::OlmError,
    messages::{Message, OlmMessage, PreKeyMessage},
    ratchet::{
        ChainKey, ChainStore, DoubleRatchet, MessageKey, MessageKeyStore, ReceiverChain, RootKey,
        SkippedMessageKey, MAX_MESSAGE_GAP, MAX_RECEIVER_CHAINS, MAX_SKIPPED_MESSAGE_KEYS,
    },
};

const ROOT_KDF_INFO: &[u8] = b"OLM_ROOT";

const PICKLE_VERSION: u32 = 1;
const ACCEPTED_PICKLE_VERSIONS: &[u32] = &[1];

/// The three handshake publics, kept until the session is confirmed so
/// pre-key framing and inbound matching stay possible.
struct HandshakeState {
    identity_key: Curve25519PublicKey,
    base_key: Curve25519PublicKey,
    one_time_key: Curve25519PublicKey,
}

pub struct Session {
    session_id: [u8; 32],
    received: bool,
    handshake: Option<HandshakeState>,
    double_ratchet: DoubleRatchet,
    receiver_chains: ChainStore,
    skipped_keys: MessageKeyStore,
}

// ── Handshake derivation ─────────────────────────────────────────────────────

fn derive_root(
    d1: SharedSecret,
    d2: SharedSecret,
    d3: SharedSecret,
) -> Result<(RootKey, ChainKey), CryptoError> {
    let mut secret = Zeroizing::new([0u8; 96]);
    secret[..32].copy_from_slice(d1.as_bytes());
    secret[32..64].copy_from_slice(d2.as_bytes());
    secret[64..].copy_from_slice(d3.as_bytes());

    let mut expanded = Zeroizing::new([0u8; 64]);
    kdf::hkdf_sha256(None, secret.as_ref(), ROOT_KDF_INFO, expanded.as_mut())?;

    let mut root = [0u8; 32];
    let mut chain = [0u8; 32];
    root.copy_from_slice(&expanded[..32]);
    chain.copy_from_slice(&expanded[32..]);
    Ok((RootKey::new(root), ChainKey::new(chain, 0)))
}

/// The session id is the SHA-256 of the three handshake publics in wire
/// order, fixed at creation for the life of the session.
fn compute_session_id(handshake: &HandshakeState) -> [u8; 32] {
    let mut bytes = [0u8; 96];
    bytes[..32].copy_from_slice(handshake.one_time_key.as_bytes());
    bytes[32..64].copy_from_slice(handshake.base_key.as_bytes());
    bytes[64..].copy_from_slice(handshake.identity_key.as_bytes());
    kdf::sha256(&bytes)
}

impl Session {
    // ── Construction ─────────────────────────────────────────────────────

    /// Start a session towards the holder of `their_identity_key`, using
    /// one of their published one-time keys.
    pub fn new_outbound(
        rng: &mut (impl RngCore + CryptoRng),
        account: &Account,
        their_identity_key: &Curve25519PublicKey,
        their_one_time_key: &Curve25519PublicKey,
    ) -> Result<Self, OlmError> {
        let base_key = Curve25519Keypair::new(rng);
        let ratchet_key = Curve25519Keypair::new(rng);

        let d1 = account.curve25519_keypair().diffie_hellman(their_one_time_key);
        let d2 = base_key.diffie_hellman(their_identity_key);
        let d3 = base_key.diffie_hellman(their_one_time_key);
        let (root_key, chain_key) = derive_root(d1, d2, d3)?;

        let handshake = HandshakeState {
            identity_key: account.curve25519_keypair().public_key(),
            base_key: base_key.public_key(),
            one_time_key: *their_one_time_key,
        };

        Ok(Self {
            session_id: compute_session_id(&handshake),
            received: false,
            handshake: Some(handshake),
            double_ratchet: DoubleRatchet::new_active(root_key, ratchet_key, chain_key),
            receiver_chains: ChainStore::new(),
            skipped_keys: MessageKeyStore::new(),
        })
    }

    /// Accept a session from a pre-key message, taking the sender's
    /// identity key from the message itself.
    pub fn new_inbound(account: &Account, message: &PreKeyMessage) -> Result<Self, OlmError> {
        Self::inbound(account, None, message)
    }

    /// Accept a session from a pre-key message, additionally checking the
    /// sender's identity key against an externally known one.
    pub fn new_inbound_from(
        account: &Account,
        their_identity_key: &Curve25519PublicKey,
        message: &PreKeyMessage,
    ) -> Result<Self, OlmError> {
        Self::inbound(account, Some(their_identity_key), message)
    }

    fn inbound(
        account: &Account,
        their_identity_key: Option<&Curve25519PublicKey>,
        message: &PreKeyMessage,
    ) -> Result<Self, OlmError> {
        if let Some(expected) = their_identity_key {
            if !expected.ct_eq(&message.identity_key) {
                return Err(OlmError::BadMessageKeyId);
            }
        }

        let one_time_key = account
            .handshake_key(&message.one_time_key)
            .ok_or(OlmError::BadMessageKeyId)?;

        let d1 = one_time_key.diffie_hellman(&message.identity_key);
        let d2 = account.curve25519_keypair().diffie_hellman(&message.base_key);
        let d3 = one_time_key.diffie_hellman(&message.base_key);
        let (root_key, chain_key) = derive_root(d1, d2, d3)?;

        let their_ratchet_key = message.message.ratchet_key;
        let mut receiver_chains = ChainStore::new();
        receiver_chains.put(ReceiverChain::new(their_ratchet_key, chain_key));

        let handshake = HandshakeState {
            identity_key: message.identity_key,
            base_key: message.base_key,
            one_time_key: message.one_time_key,
        };

        Ok(Self {
            session_id: compute_session_id(&handshake),
            received: false,
            handshake: Some(handshake),
            double_ratchet: DoubleRatchet::new_inactive(root_key, their_ratchet_key),
            receiver_chains,
            skipped_keys: MessageKeyStore::new(),
        })
    }

    // ── Introspection ────────────────────────────────────────────────────

    pub fn session_id(&self) -> String {
        base64_encode(self.session_id)
    }

    pub fn has_received_message(&self) -> bool {
        self.received
    }

    /// Whether this session was created from the given pre-key message.
    /// Only meaningful until the session is confirmed.
    pub fn matches_inbound(&self, message: &PreKeyMessage) -> bool {
        match &self.handshake {
            Some(handshake) => {
                handshake.one_time_key.ct_eq(&message.one_time_key)
                    && handshake.base_key.ct_eq(&message.base_key)
                    && handshake.identity_key.ct_eq(&message.identity_key)
            }
            None => false,
        }
    }

    pub fn matches_inbound_from(
        &self,
        their_identity_key: &Curve25519PublicKey,
        message: &PreKeyMessage,
    ) -> bool {
        their_identity_key.ct_eq(&message.identity_key) && self.matches_inbound(message)
    }

    /// The one-time key this session consumed, while the handshake
    /// material is still held.
    pub(crate) fn used_one_time_key(&self) -> Option<&Curve25519PublicKey> {
        self.handshake.as_ref().map(|handshake| &handshake.one_time_key)
    }

    /// A diagnostic summary of the ratchet position. No secret material.
    pub fn describe(&self) -> String {
        let sender = match self.double_ratchet.sender_chain_index() {
            Some(index) => index.to_string(),
            None => "none".to_string(),
        };
        let receiver_indices: Vec<String> =
            self.receiver_chains.iter().map(|chain| chain.index().to_string()).collect();
        format!(
            "sender chain index: {}, receiver chain indices: [{}], skipped message keys: {}, received message: {}",
            sender,
            receiver_indices.join(", "),
            self.skipped_keys.len(),
            self.received,
        )
    }

    // ── Encrypt ──────────────────────────────────────────────────────────

    /// Encrypt a message, using pre-key framing until the other side has
    /// proven possession of the session.
    pub fn encrypt(
        &mut self,
        rng: &mut (impl RngCore + CryptoRng),
        plaintext: &[u8],
    ) -> Result<OlmMessage, OlmError> {
        let (ratchet_key, message_key) = self.double_ratchet.next_message_key(rng)?;
        let cipher = message_key.cipher()?;

        let ciphertext = cipher.encrypt(plaintext);
        let mut message = Message::new(ratchet_key, message_key.index(), ciphertext);
        message.attach_mac(&cipher);

        match &self.handshake {
            Some(handshake) if !self.received => Ok(OlmMessage::PreKey(PreKeyMessage::new(
                handshake.one_time_key,
                handshake.base_key,
                handshake.identity_key,
                message,
            ))),
            _ => Ok(OlmMessage::Normal(message)),
        }
    }

    // ── Decrypt ──────────────────────────────────────────────────────────

    /// Decrypt either message shape. The MAC is checked before any
    /// plaintext is produced; on failure the session is unchanged.
    pub fn decrypt(&mut self, message: &OlmMessage) -> Result<Vec<u8>, OlmError> {
        let plaintext = match message {
            OlmMessage::Normal(message) => self.decrypt_normal(message)?,
            OlmMessage::PreKey(message) => self.decrypt_normal(&message.message)?,
        };

        if !self.received {
            self.received = true;
            self.handshake = None;
        }
        Ok(plaintext)
    }

    fn decrypt_normal(&mut self, message: &Message) -> Result<Vec<u8>, OlmError> {
        // A key materialised earlier for this exact (ratchet key, index)?
        if let Some(position) = self.skipped_keys.position(&message.ratchet_key, message.counter)
        {
            let skipped = self
                .skipped_keys
                .get(position)
                .ok_or(OlmError::BadMessageKeyId)?;
            let cipher = skipped.message_key().cipher()?;
            message.verify_mac(&cipher)?;
            let plaintext =
                cipher.decrypt(&message.ciphertext).map_err(|_| OlmError::BadMessageMac)?;
            self.skipped_keys.remove(position);
            return Ok(plaintext.to_vec());
        }

        if let Some(chain) = self.receiver_chains.find(&message.ratchet_key) {
            if message.counter < chain.index() {
                // Already consumed and no longer in the skipped store.
                return Err(OlmError::BadMessageKeyId);
            }
            let mut chain = chain.clone();
            let (plaintext, skipped) = Self::advance_and_decrypt(&mut chain, message)?;
            self.commit(chain, skipped);
            Ok(plaintext)
        } else {
            // A ratchet key we have not seen: a DH ratchet step. Derive the
            // candidate chain first and only demote our sending state once
            // the message has authenticated under it.
            let (root_key, chain_key) = self.double_ratchet.advance_receiving(&message.ratchet_key)?;
            let mut chain = ReceiverChain::new(message.ratchet_key, chain_key);
            let (plaintext, skipped) = Self::advance_and_decrypt(&mut chain, message)?;
            self.double_ratchet.demote(root_key, message.ratchet_key);
            self.commit(chain, skipped);
            Ok(plaintext)
        }
    }

    /// Advance a candidate chain up to the message counter, collecting the
    /// keys of skipped indices, and decrypt. Nothing here touches `self`.
    fn advance_and_decrypt(
        chain: &mut ReceiverChain,
        message: &Message,
    ) -> Result<(Vec<u8>, Vec<SkippedMessageKey>), OlmError> {
        if message.counter - chain.index() > MAX_MESSAGE_GAP {
            return Err(OlmError::MessageGapTooLarge(MAX_MESSAGE_GAP));
        }

        let mut skipped = Vec::new();
        while chain.index() < message.counter {
            skipped.push(SkippedMessageKey::new(*chain.ratchet_key(), chain.next_message_key()));
        }

        let message_key = chain.next_message_key();
        let cipher = message_key.cipher()?;
        message.verify_mac(&cipher)?;
        let plaintext =
            cipher.decrypt(&message.ciphertext).map_err(|_| OlmError::BadMessageMac)?;
        Ok((plaintext.to_vec(), skipped))
    }

    fn commit(&mut self, chain: ReceiverChain, skipped: Vec<SkippedMessageKey>) {
        for key in skipped {
            self.skipped_keys.push(key);
        }
        self.receiver_chains.put(chain);
    }

    // ── Pickling ─────────────────────────────────────────────────────────

    pub fn pickle(&self, pickle_key: &[u8]) -> Result<String, OlmError> {
        let mut writer = PickleWriter::new();
        writer.put_bool(self.received);
        match &self.handshake {
            Some(handshake) => {
                writer.put_bool(true);
                writer.put_bytes(handshake.identity_key.as_bytes());
                writer.put_bytes(handshake.base_key.as_bytes());
                writer.put_bytes(handshake.one_time_key.as_bytes());
            }
            None => writer.put_bool(false),
        }
        writer.put_bytes(&self.session_id);
        self.double_ratchet.pickle_into(&mut writer);

        writer.put_u32(self.receiver_chains.len() as u32);
        for chain in self.receiver_chains.iter() {
            chain.pickle_into(&mut writer);
        }

        writer.put_u32(self.skipped_keys.len() as u32);
        for key in self.skipped_keys.iter() {
            writer.put_bytes(key.ratchet_key().as_bytes());
            writer.put_bytes(key.message_key().bytes());
            writer.put_u32(key.message_key().index());
        }

        Ok(base64_encode(writer.seal(PICKLE_VERSION, pickle_key)?))
    }

    pub fn from_pickle(pickle: &str, pickle_key: &[u8]) -> Result<Self, OlmError> {
        let blob = base64_decode(pickle)?;
        let (_, payload) = pickle::open(ACCEPTED_PICKLE_VERSIONS, &blob, pickle_key)?;
        let mut reader = PickleReader::new(&payload);

        let received = reader.take_bool()?;
        let handshake = if reader.take_bool()? {
            Some(HandshakeState {
                identity_key: Curve25519PublicKey::from_bytes(reader.take_array()?),
                base_key: Curve25519PublicKey::from_bytes(reader.take_array()?),
                one_time_key: Curve25519PublicKey::from_bytes(reader.take_array()?),
            })
        } else {
            None
        };
        let session_id = reader.take_array()?;
        let double_ratchet = DoubleRatchet::from_pickle(&mut reader)?;

        let chain_count = reader.take_u32()?;
        if chain_count as usize > MAX_RECEIVER_CHAINS {
            return Err(CryptoError::PickleFormat.into());
        }
        let mut receiver_chains = ChainStore::new();
        for _ in 0..chain_count {
            receiver_chains.put(ReceiverChain::from_pickle(&mut reader)?);
        }

        let skipped_count = reader.take_u32()?;
        if skipped_count as usize > MAX_SKIPPED_MESSAGE_KEYS {
            return Err(CryptoError::PickleFormat.into());
        }
        let mut skipped_keys = MessageKeyStore::new();
        for _ in 0..skipped_count {
            let ratchet_key = Curve25519PublicKey::from_bytes(reader.take_array()?);
            let key = Zeroizing::new(reader.take_array::<32>()?);
            let index = reader.take_u32()?;
            skipped_keys.push(SkippedMessageKey::new(ratchet_key, MessageKey::new(*key, index)));
        }
        reader.finish()?;

        Ok(Self {
            session_id,
            received,
            handshake,
            double_ratchet,
            receiver_chains,
            skipped_keys,
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id())
            .field("received", &self.received)
            .finish_non_exhaustive()
    }
}
