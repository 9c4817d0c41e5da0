//! Root, chain and message keys, and the DH ratchet state machine.
//!
//! State separation:
//!   root key     — advanced on every DH ratchet step via HKDF("OLM_RATCHET")
//!   chain key    — advanced per message: CK' = HMAC(CK, 0x02)
//!   message key  — derived per message:  MK  = HMAC(CK, 0x01), used once
//!
//! The sending side is a two-state machine. `Active` owns a live ratchet
//! keypair and sending chain. Receiving a new remote ratchet key consumes
//! the keypair for the receiving-chain derivation and demotes the state to
//! `Inactive`; the next encrypt generates a fresh keypair, advances the
//! root again and promotes back to `Active`. Forward secrecy: old chain
//! and message keys are deleted. Post-compromise security: every
//! demote/promote pair mixes two fresh DH outputs into the root.

use pawl_crypto::{
    kdf,
    keys::SharedSecret,
    pickle::{PickleReader, PickleWriter},
    CryptoError, Curve25519Keypair, Curve25519PublicKey, Curve25519SecretKey, MessageCipher,
};
use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::OlmError;

/// Hard ceiling on how far ahead of a receiving chain a message counter may
/// point before it is rejected outright. Bounds the work and memory an
/// attacker can force with a forged counter.
pub const MAX_MESSAGE_GAP: u32 = 2000;

/// Skipped message keys kept for out-of-order delivery; oldest evicted.
pub const MAX_SKIPPED_MESSAGE_KEYS: usize = 40;

/// Receiving chains kept so late messages from a previous ratchet turn
/// still decrypt; oldest evicted.
pub const MAX_RECEIVER_CHAINS: usize = 5;

const ROOT_INFO: &[u8] = b"OLM_RATCHET";
const MESSAGE_CIPHER_INFO: &[u8] = b"OLM_KEYS";
const MESSAGE_KEY_SEED: [u8; 1] = [0x01];
const CHAIN_ADVANCE_SEED: [u8; 1] = [0x02];

// ── Key material ─────────────────────────────────────────────────────────────

#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct RootKey {
    key: [u8; 32],
}

impl RootKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// One DH ratchet step: mix a fresh DH output into the root, yielding
    /// the next root key and a fresh chain key.
    pub fn advance(&self, shared: &SharedSecret) -> Result<(RootKey, ChainKey), CryptoError> {
        let mut expanded = Zeroizing::new([0u8; 64]);
        kdf::hkdf_sha256(Some(&self.key), shared.as_bytes(), ROOT_INFO, expanded.as_mut())?;

        let mut root = [0u8; 32];
        let mut chain = [0u8; 32];
        root.copy_from_slice(&expanded[..32]);
        chain.copy_from_slice(&expanded[32..]);
        Ok((RootKey::new(root), ChainKey::new(chain, 0)))
    }
}

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct ChainKey {
    key: [u8; 32],
    index: u32,
}

impl ChainKey {
    pub fn new(key: [u8; 32], index: u32) -> Self {
        Self { key, index }
    }

    pub fn bytes(&self) -> &[u8; 32] {
        &self.key
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Derive the message key at the current index and advance the chain.
    pub fn next_message_key(&mut self) -> MessageKey {
        let message_key =
            MessageKey::new(kdf::hmac_sha256(&self.key, &MESSAGE_KEY_SEED), self.index);
        self.key = kdf::hmac_sha256(&self.key, &CHAIN_ADVANCE_SEED);
        self.index = self.index.wrapping_add(1);
        message_key
    }
}

#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct MessageKey {
    key: [u8; 32],
    index: u32,
}

impl MessageKey {
    pub fn new(key: [u8; 32], index: u32) -> Self {
        Self { key, index }
    }

    pub fn bytes(&self) -> &[u8; 32] {
        &self.key
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn cipher(&self) -> Result<MessageCipher, CryptoError> {
        MessageCipher::new(&self.key, MESSAGE_CIPHER_INFO)
    }
}

// ── DH ratchet state machine ─────────────────────────────────────────────────

pub(crate) struct ActiveRatchet {
    root_key: RootKey,
    ratchet_key: Curve25519Keypair,
    chain_key: ChainKey,
}

impl ActiveRatchet {
    fn next_message_key(&mut self) -> (Curve25519PublicKey, MessageKey) {
        (self.ratchet_key.public_key(), self.chain_key.next_message_key())
    }
}

pub(crate) struct InactiveRatchet {
    root_key: RootKey,
    their_ratchet_key: Curve25519PublicKey,
}

impl InactiveRatchet {
    fn activate(&self, rng: &mut (impl RngCore + CryptoRng)) -> Result<ActiveRatchet, CryptoError> {
        let ratchet_key = Curve25519Keypair::new(rng);
        let shared = ratchet_key.diffie_hellman(&self.their_ratchet_key);
        let (root_key, chain_key) = self.root_key.advance(&shared)?;
        Ok(ActiveRatchet { root_key, ratchet_key, chain_key })
    }
}

pub(crate) enum DoubleRatchet {
    Active(ActiveRatchet),
    Inactive(InactiveRatchet),
}

impl DoubleRatchet {
    pub fn new_active(
        root_key: RootKey,
        ratchet_key: Curve25519Keypair,
        chain_key: ChainKey,
    ) -> Self {
        DoubleRatchet::Active(ActiveRatchet { root_key, ratchet_key, chain_key })
    }

    pub fn new_inactive(root_key: RootKey, their_ratchet_key: Curve25519PublicKey) -> Self {
        DoubleRatchet::Inactive(InactiveRatchet { root_key, their_ratchet_key })
    }

    /// The message key for the next outgoing message, together with the
    /// ratchet public key it travels under. Promotes an inactive ratchet
    /// with a fresh keypair first.
    pub fn next_message_key(
        &mut self,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<(Curve25519PublicKey, MessageKey), CryptoError> {
        match self {
            DoubleRatchet::Active(active) => Ok(active.next_message_key()),
            DoubleRatchet::Inactive(inactive) => {
                let mut active = inactive.activate(rng)?;
                let out = active.next_message_key();
                *self = DoubleRatchet::Active(active);
                Ok(out)
            }
        }
    }

    /// Candidate receiving-chain derivation for a new remote ratchet key.
    /// Pure: the caller commits with `demote` only once the first message
    /// of the new chain has authenticated.
    pub fn advance_receiving(
        &self,
        their_ratchet_key: &Curve25519PublicKey,
    ) -> Result<(RootKey, ChainKey), OlmError> {
        match self {
            DoubleRatchet::Active(active) => {
                let shared = active.ratchet_key.diffie_hellman(their_ratchet_key);
                Ok(active.root_key.advance(&shared)?)
            }
            // A compliant peer introduces a new ratchet key only after
            // seeing one of ours; without a live sender keypair there is
            // nothing to agree on.
            DoubleRatchet::Inactive(_) => Err(OlmError::BadMessageKeyId),
        }
    }

    pub fn demote(&mut self, root_key: RootKey, their_ratchet_key: Curve25519PublicKey) {
        *self = DoubleRatchet::Inactive(InactiveRatchet { root_key, their_ratchet_key });
    }

    /// Sending-chain index, if a sending chain currently exists.
    pub fn sender_chain_index(&self) -> Option<u32> {
        match self {
            DoubleRatchet::Active(active) => Some(active.chain_key.index()),
            DoubleRatchet::Inactive(_) => None,
        }
    }

    pub fn pickle_into(&self, writer: &mut PickleWriter) {
        match self {
            DoubleRatchet::Active(active) => {
                writer.put_bool(true);
                writer.put_bytes(active.root_key.bytes());
                writer.put_bytes(active.ratchet_key.secret_key().to_bytes().as_ref());
                writer.put_bytes(active.chain_key.bytes());
                writer.put_u32(active.chain_key.index());
            }
            DoubleRatchet::Inactive(inactive) => {
                writer.put_bool(false);
                writer.put_bytes(inactive.root_key.bytes());
                writer.put_bytes(inactive.their_ratchet_key.as_bytes());
            }
        }
    }

    pub fn from_pickle(reader: &mut PickleReader) -> Result<Self, CryptoError> {
        if reader.take_bool()? {
            let root_key = RootKey::new(reader.take_array()?);
            let secret = Zeroizing::new(reader.take_array::<32>()?);
            let chain = reader.take_array()?;
            let index = reader.take_u32()?;
            Ok(DoubleRatchet::new_active(
                root_key,
                Curve25519Keypair::from_secret(Curve25519SecretKey::from_bytes(*secret)),
                ChainKey::new(chain, index),
            ))
        } else {
            let root_key = RootKey::new(reader.take_array()?);
            let their_ratchet_key = Curve25519PublicKey::from_bytes(reader.take_array()?);
            Ok(DoubleRatchet::new_inactive(root_key, their_ratchet_key))
        }
    }
}

// ── Receiving chains ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub(crate) struct ReceiverChain {
    ratchet_key: Curve25519PublicKey,
    chain_key: ChainKey,
}

impl ReceiverChain {
    pub fn new(ratchet_key: Curve25519PublicKey, chain_key: ChainKey) -> Self {
        Self { ratchet_key, chain_key }
    }

    pub fn ratchet_key(&self) -> &Curve25519PublicKey {
        &self.ratchet_key
    }

    pub fn index(&self) -> u32 {
        self.chain_key.index()
    }

    pub fn next_message_key(&mut self) -> MessageKey {
        self.chain_key.next_message_key()
    }

    pub fn pickle_into(&self, writer: &mut PickleWriter) {
        writer.put_bytes(self.ratchet_key.as_bytes());
        writer.put_bytes(self.chain_key.bytes());
        writer.put_u32(self.chain_key.index());
    }

    pub fn from_pickle(reader: &mut PickleReader) -> Result<Self, CryptoError> {
        let ratchet_key = Curve25519PublicKey::from_bytes(reader.take_array()?);
        let chain = reader.take_array()?;
        let index = reader.take_u32()?;
        Ok(Self::new(ratchet_key, ChainKey::new(chain, index)))
    }
}

/// The bounded list of live receiving chains, oldest first.
pub(crate) struct ChainStore {
    chains: Vec<ReceiverChain>,
}

impl ChainStore {
    pub fn new() -> Self {
        Self { chains: Vec::new() }
    }

    pub fn find(&self, ratchet_key: &Curve25519PublicKey) -> Option<&ReceiverChain> {
        self.chains.iter().find(|chain| chain.ratchet_key() == ratchet_key)
    }

    /// Insert or replace the chain for its ratchet key, evicting the oldest
    /// chain when over capacity.
    pub fn put(&mut self, chain: ReceiverChain) {
        if let Some(position) =
            self.chains.iter().position(|c| c.ratchet_key() == chain.ratchet_key())
        {
            self.chains[position] = chain;
        } else {
            self.chains.push(chain);
            if self.chains.len() > MAX_RECEIVER_CHAINS {
                self.chains.remove(0);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReceiverChain> {
        self.chains.iter()
    }
}

// ── Skipped message keys ─────────────────────────────────────────────────────

pub(crate) struct SkippedMessageKey {
    ratchet_key: Curve25519PublicKey,
    message_key: MessageKey,
}

impl SkippedMessageKey {
    pub fn new(ratchet_key: Curve25519PublicKey, message_key: MessageKey) -> Self {
        Self { ratchet_key, message_key }
    }

    pub fn ratchet_key(&self) -> &Curve25519PublicKey {
        &self.ratchet_key
    }

    pub fn message_key(&self) -> &MessageKey {
        &self.message_key
    }
}

/// Bounded store of message keys for not-yet-arrived messages, oldest
/// first; each key is consumed at most once.
pub(crate) struct MessageKeyStore {
    keys: Vec<SkippedMessageKey>,
}

impl MessageKeyStore {
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    pub fn push(&mut self, key: SkippedMessageKey) {
        if self.keys.len() >= MAX_SKIPPED_MESSAGE_KEYS {
            self.keys.remove(0);
        }
        self.keys.push(key);
    }

    pub fn position(&self, ratchet_key: &Curve25519PublicKey, index: u32) -> Option<usize> {
        self.keys.iter().position(|key| {
            key.ratchet_key() == ratchet_key && key.message_key().index() == index
        })
    }

    pub fn get(&self, position: usize) -> Option<&SkippedMessageKey> {
        self.keys.get(position)
    }

    /// Remove a consumed key; dropping it zeroizes the material.
    pub fn remove(&mut self, position: usize) {
        self.keys.remove(position);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SkippedMessageKey> {
        self.keys.iter()
    }
}
