//! Long-lived account state.
//!
//! An account owns two independent identity keypairs (Ed25519 for signing,
//! Curve25519 for the handshake DH), a bounded pool of one-time keys, and
//! a fallback key with a one-slot grace window so messages encrypted to
//! the previous fallback key keep decrypting after a rotation.
//!
//! Key-pool rules:
//!   - removing a one-time key is permanent;
//!   - the pool never exceeds `MAX_ONE_TIME_KEYS`; generating past the
//!     ceiling evicts the oldest unpublished key;
//!   - `one_time_keys()` lists only keys not yet marked as published.

use std::collections::BTreeMap;

use pawl_crypto::{
    base64_decode, base64_encode,
    pickle::{self, PickleReader, PickleWriter},
    CryptoError, Curve25519Keypair, Curve25519PublicKey, Curve25519SecretKey, Ed25519Keypair,
    Ed25519PublicKey, Ed25519Signature,
};
use rand::{CryptoRng, RngCore};
use serde::Serialize;
use zeroize::Zeroizing;

use crate::{error::OlmError, session::Session};

/// Ceiling on the one-time key pool.
pub const MAX_ONE_TIME_KEYS: usize = 50;

const PICKLE_VERSION: u32 = 2;
const LEGACY_PICKLE_VERSION: u32 = 1;
const ACCEPTED_PICKLE_VERSIONS: &[u32] = &[LEGACY_PICKLE_VERSION, PICKLE_VERSION];

// ── Published key bundles ────────────────────────────────────────────────────

/// The two public identity halves, serialised as
/// `{"curve25519":"<b64>","ed25519":"<b64>"}`.
#[derive(Debug, Clone, Serialize)]
pub struct IdentityKeys {
    pub curve25519: Curve25519PublicKey,
    pub ed25519: Ed25519PublicKey,
}

impl IdentityKeys {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("identity key serialisation cannot fail")
    }
}

/// A bundle of Curve25519 keys keyed by base64 key id, serialised as
/// `{"curve25519":{"<id>":"<b64>",...}}`.
#[derive(Debug, Clone, Serialize)]
pub struct OneTimeKeys {
    pub curve25519: BTreeMap<String, Curve25519PublicKey>,
}

impl OneTimeKeys {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("key bundle serialisation cannot fail")
    }
}

fn key_id_to_base64(key_id: u32) -> String {
    base64_encode(key_id.to_be_bytes())
}

// ── Key pool entries ─────────────────────────────────────────────────────────

struct OneTimeKey {
    key_id: u32,
    published: bool,
    keypair: Curve25519Keypair,
}

struct FallbackKey {
    key_id: u32,
    published: bool,
    keypair: Curve25519Keypair,
}

// ── Account ──────────────────────────────────────────────────────────────────

pub struct Account {
    signing_key: Ed25519Keypair,
    diffie_hellman_key: Curve25519Keypair,
    one_time_keys: Vec<OneTimeKey>,
    fallback_key: Option<FallbackKey>,
    previous_fallback_key: Option<FallbackKey>,
    next_key_id: u32,
}

impl Account {
    pub fn new(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        Self {
            signing_key: Ed25519Keypair::new(rng),
            diffie_hellman_key: Curve25519Keypair::new(rng),
            one_time_keys: Vec::new(),
            fallback_key: None,
            previous_fallback_key: None,
            next_key_id: 0,
        }
    }

    // ── Identity ─────────────────────────────────────────────────────────

    pub fn identity_keys(&self) -> IdentityKeys {
        IdentityKeys {
            curve25519: self.diffie_hellman_key.public_key(),
            ed25519: self.signing_key.public_key(),
        }
    }

    /// Sign a message with the Ed25519 identity key.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        self.signing_key.sign(message)
    }

    pub(crate) fn curve25519_keypair(&self) -> &Curve25519Keypair {
        &self.diffie_hellman_key
    }

    // ── One-time keys ────────────────────────────────────────────────────

    pub fn max_number_of_one_time_keys(&self) -> usize {
        MAX_ONE_TIME_KEYS
    }

    pub fn generate_one_time_keys(&mut self, rng: &mut (impl RngCore + CryptoRng), count: usize) {
        for _ in 0..count {
            if self.one_time_keys.len() >= MAX_ONE_TIME_KEYS {
                let position = self
                    .one_time_keys
                    .iter()
                    .position(|key| !key.published)
                    .unwrap_or(0);
                self.one_time_keys.remove(position);
            }
            let key_id = self.next_key_id;
            self.next_key_id = self.next_key_id.wrapping_add(1);
            self.one_time_keys.push(OneTimeKey {
                key_id,
                published: false,
                keypair: Curve25519Keypair::new(rng),
            });
        }
    }

    /// The unpublished one-time keys, ready for upload.
    pub fn one_time_keys(&self) -> OneTimeKeys {
        OneTimeKeys {
            curve25519: self
                .one_time_keys
                .iter()
                .filter(|key| !key.published)
                .map(|key| (key_id_to_base64(key.key_id), key.keypair.public_key()))
                .collect(),
        }
    }

    /// Flip every unpublished one-time key and the current fallback key to
    /// published.
    pub fn mark_keys_as_published(&mut self) {
        for key in &mut self.one_time_keys {
            key.published = true;
        }
        if let Some(fallback) = &mut self.fallback_key {
            fallback.published = true;
        }
    }

    /// Permanently delete the one-time key a just-created inbound session
    /// consumed. Call before the session's first decrypt confirms it.
    pub fn remove_one_time_keys(&mut self, session: &Session) {
        if let Some(used) = session.used_one_time_key() {
            self.one_time_keys
                .retain(|key| !key.keypair.public_key().ct_eq(used));
        }
    }

    // ── Fallback keys ────────────────────────────────────────────────────

    /// Rotate the fallback key: the current one moves to the grace slot,
    /// a fresh unpublished key takes its place.
    pub fn generate_fallback_key(&mut self, rng: &mut (impl RngCore + CryptoRng)) {
        let key_id = self.next_key_id;
        self.next_key_id = self.next_key_id.wrapping_add(1);
        self.previous_fallback_key = self.fallback_key.take();
        self.fallback_key =
            Some(FallbackKey { key_id, published: false, keypair: Curve25519Keypair::new(rng) });
    }

    pub fn fallback_key(&self) -> OneTimeKeys {
        OneTimeKeys {
            curve25519: self
                .fallback_key
                .iter()
                .map(|key| (key_id_to_base64(key.key_id), key.keypair.public_key()))
                .collect(),
        }
    }

    /// The current fallback key, only while it has not been published.
    pub fn unpublished_fallback_key(&self) -> OneTimeKeys {
        OneTimeKeys {
            curve25519: self
                .fallback_key
                .iter()
                .filter(|key| !key.published)
                .map(|key| (key_id_to_base64(key.key_id), key.keypair.public_key()))
                .collect(),
        }
    }

    /// Erase the grace slot; late pre-key messages to the old fallback key
    /// stop decrypting.
    pub fn forget_old_fallback_key(&mut self) {
        self.previous_fallback_key = None;
    }

    /// Look up the secret half for a handshake public key: the one-time
    /// pool first, then the current and previous fallback keys. The scan
    /// compares every candidate in constant time and never exits early.
    pub(crate) fn handshake_key(&self, public: &Curve25519PublicKey) -> Option<&Curve25519Keypair> {
        let mut found = None;
        for key in &self.one_time_keys {
            if key.keypair.public_key().ct_eq(public) {
                found = Some(&key.keypair);
            }
        }
        for key in self.fallback_key.iter().chain(self.previous_fallback_key.iter()) {
            if key.keypair.public_key().ct_eq(public) {
                found = Some(&key.keypair);
            }
        }
        found
    }

    // ── Pickling ─────────────────────────────────────────────────────────

    pub fn pickle(&self, pickle_key: &[u8]) -> Result<String, OlmError> {
        let mut writer = PickleWriter::new();
        writer.put_bytes(self.signing_key.seed().as_ref());
        writer.put_bytes(self.diffie_hellman_key.secret_key().to_bytes().as_ref());
        writer.put_u32(self.next_key_id);

        writer.put_u32(self.one_time_keys.len() as u32);
        for key in &self.one_time_keys {
            writer.put_u32(key.key_id);
            writer.put_bool(key.published);
            writer.put_bytes(key.keypair.secret_key().to_bytes().as_ref());
        }

        for slot in [&self.fallback_key, &self.previous_fallback_key] {
            match slot {
                Some(key) => {
                    writer.put_bool(true);
                    writer.put_u32(key.key_id);
                    writer.put_bool(key.published);
                    writer.put_bytes(key.keypair.secret_key().to_bytes().as_ref());
                }
                None => writer.put_bool(false),
            }
        }

        Ok(base64_encode(writer.seal(PICKLE_VERSION, pickle_key)?))
    }

    pub fn from_pickle(pickle: &str, pickle_key: &[u8]) -> Result<Self, OlmError> {
        let blob = base64_decode(pickle)?;
        let (version, payload) = pickle::open(ACCEPTED_PICKLE_VERSIONS, &blob, pickle_key)?;
        match version {
            LEGACY_PICKLE_VERSION => {
                Self::from_legacy_payload(&payload).map_err(|_| OlmError::BadLegacyAccountPickle)
            }
            _ => Self::from_current_payload(&payload),
        }
    }

    fn read_identity_and_pool(
        reader: &mut PickleReader,
    ) -> Result<(Ed25519Keypair, Curve25519Keypair, u32, Vec<OneTimeKey>), OlmError> {
        let signing_seed = Zeroizing::new(reader.take_array::<32>()?);
        let dh_secret = Zeroizing::new(reader.take_array::<32>()?);
        let next_key_id = reader.take_u32()?;

        let count = reader.take_u32()?;
        if count as usize > MAX_ONE_TIME_KEYS {
            return Err(CryptoError::PickleFormat.into());
        }
        let mut one_time_keys = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let key_id = reader.take_u32()?;
            let published = reader.take_bool()?;
            let secret = Zeroizing::new(reader.take_array::<32>()?);
            one_time_keys.push(OneTimeKey {
                key_id,
                published,
                keypair: Curve25519Keypair::from_secret(Curve25519SecretKey::from_bytes(*secret)),
            });
        }

        Ok((
            Ed25519Keypair::from_seed(*signing_seed),
            Curve25519Keypair::from_secret(Curve25519SecretKey::from_bytes(*dh_secret)),
            next_key_id,
            one_time_keys,
        ))
    }

    fn from_current_payload(payload: &[u8]) -> Result<Self, OlmError> {
        let mut reader = PickleReader::new(payload);
        let (signing_key, diffie_hellman_key, next_key_id, one_time_keys) =
            Self::read_identity_and_pool(&mut reader)?;

        let mut slots = [None, None];
        for slot in &mut slots {
            if reader.take_bool()? {
                let key_id = reader.take_u32()?;
                let published = reader.take_bool()?;
                let secret = Zeroizing::new(reader.take_array::<32>()?);
                *slot = Some(FallbackKey {
                    key_id,
                    published,
                    keypair: Curve25519Keypair::from_secret(Curve25519SecretKey::from_bytes(
                        *secret,
                    )),
                });
            }
        }
        reader.finish()?;

        let [fallback_key, previous_fallback_key] = slots;
        Ok(Self {
            signing_key,
            diffie_hellman_key,
            one_time_keys,
            fallback_key,
            previous_fallback_key,
            next_key_id,
        })
    }

    /// The pre-fallback layout, with its stricter validity rules: the pool
    /// must respect the ceiling, every key id must predate `next_key_id`,
    /// and nothing may trail the last field.
    fn from_legacy_payload(payload: &[u8]) -> Result<Self, OlmError> {
        let mut reader = PickleReader::new(payload);
        let (signing_key, diffie_hellman_key, next_key_id, one_time_keys) =
            Self::read_identity_and_pool(&mut reader)?;
        reader.finish()?;

        if one_time_keys.iter().any(|key| key.key_id >= next_key_id) {
            return Err(OlmError::BadLegacyAccountPickle);
        }

        Ok(Self {
            signing_key,
            diffie_hellman_key,
            one_time_keys,
            fallback_key: None,
            previous_fallback_key: None,
            next_key_id,
        })
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("identity_keys", &self.identity_keys())
            .field("one_time_keys", &self.one_time_keys.len())
            .field("next_key_id", &self.next_key_id)
            .finish_non_exhaustive()
    }
}
