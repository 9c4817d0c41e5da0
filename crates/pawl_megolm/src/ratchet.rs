//! The four-part hash ratchet.
//!
//! State is four 256-bit parts R0..R3 plus a 32-bit counter, one part per
//! counter byte: R3 turns over every index, R2 every 2^8, R1 every 2^16,
//! R0 every 2^24. When byte `j` of the counter increments (the bytes below
//! it wrapping to zero), parts j..3 are all re-derived from the old value
//! of part `j`, each with its own single-byte domain seed:
//!
//!   R_k' = HMAC-SHA-256(R_j, [k])      for k = j..3
//!
//! so jumping ahead needs O(log n) rehashes, and no state at a lower index
//! is recoverable from a later one.
//!
//! The message cipher at an index is keyed by the concatenated 128-byte
//! state via the "MEGOLM_KEYS" schedule.

use pawl_crypto::{kdf, CryptoError, MessageCipher};
use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub(crate) const RATCHET_PART_COUNT: usize = 4;
pub(crate) const RATCHET_LENGTH: usize = 128;

const SEEDS: [[u8; 1]; RATCHET_PART_COUNT] = [[0x00], [0x01], [0x02], [0x03]];
const CIPHER_INFO: &[u8] = b"MEGOLM_KEYS";

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct Ratchet {
    parts: [[u8; 32]; RATCHET_PART_COUNT],
    counter: u32,
}

impl Ratchet {
    pub fn new(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        let mut parts = [[0u8; 32]; RATCHET_PART_COUNT];
        for part in &mut parts {
            rng.fill_bytes(part);
        }
        Self { parts, counter: 0 }
    }

    pub fn from_bytes(bytes: &[u8; RATCHET_LENGTH], counter: u32) -> Self {
        let mut parts = [[0u8; 32]; RATCHET_PART_COUNT];
        for (part, chunk) in parts.iter_mut().zip(bytes.chunks_exact(32)) {
            part.copy_from_slice(chunk);
        }
        Self { parts, counter }
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// The concatenated R0..R3 state at the current counter.
    pub fn as_bytes(&self) -> Zeroizing<[u8; RATCHET_LENGTH]> {
        let mut bytes = Zeroizing::new([0u8; RATCHET_LENGTH]);
        for (chunk, part) in bytes.chunks_exact_mut(32).zip(self.parts.iter()) {
            chunk.copy_from_slice(part);
        }
        bytes
    }

    /// The message cipher for the current index.
    pub fn message_cipher(&self) -> Result<MessageCipher, CryptoError> {
        MessageCipher::new(self.as_bytes().as_ref(), CIPHER_INFO)
    }

    fn rehash_part(&mut self, from: usize, to: usize) {
        self.parts[to] = kdf::hmac_sha256(&self.parts[from], &SEEDS[to]);
    }

    /// Advance by one index.
    pub fn advance(&mut self) {
        self.counter = self.counter.wrapping_add(1);

        // The lowest part whose counter byte did not wrap drives the
        // rehash of itself and everything below it.
        let mut mask: u32 = 0x00FF_FFFF;
        let mut from = 0;
        while from < RATCHET_PART_COUNT - 1 && (self.counter & mask) != 0 {
            from += 1;
            mask >>= 8;
        }
        for to in (from..RATCHET_PART_COUNT).rev() {
            self.rehash_part(from, to);
        }
    }

    /// Fast-forward to `target` with O(log n) rehashes. A target at or
    /// below the current counter is a no-op; the ratchet never rewinds.
    pub fn advance_to(&mut self, target: u32) {
        if target <= self.counter {
            return;
        }

        for part in 0..RATCHET_PART_COUNT {
            let shift = 8 * (RATCHET_PART_COUNT - part - 1) as u32;
            let steps = (target >> shift) - (self.counter >> shift);
            if steps == 0 {
                continue;
            }

            // All but the final increment of this part only fold the part
            // onto itself; intermediate values of the lower parts would be
            // discarded anyway.
            for _ in 1..steps {
                self.rehash_part(part, part);
            }

            // The final increment resets every lower part from this one's
            // pre-increment value, then advances the part itself.
            for to in ((part + 1)..RATCHET_PART_COUNT).rev() {
                self.rehash_part(part, to);
            }
            self.rehash_part(part, part);

            self.counter = target & (u32::MAX << shift);
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    fn probe(ratchet: &Ratchet) -> Vec<u8> {
        ratchet.message_cipher().unwrap().encrypt(b"probe")
    }

    #[test]
    fn advance_increments_and_changes_state() {
        let mut ratchet = Ratchet::from_bytes(&[7u8; RATCHET_LENGTH], 0);
        let before = probe(&ratchet);
        ratchet.advance();
        assert_eq!(ratchet.counter(), 1);
        assert_ne!(probe(&ratchet), before);
    }

    #[test]
    fn fast_forward_matches_single_steps() {
        let seed = [3u8; RATCHET_LENGTH];
        let targets = [1u32, 2, 255, 256, 257, 300, 511, 512, 513, 65535, 65536, 65537, 70000];

        let mut stepped = Ratchet::from_bytes(&seed, 0);
        for target in targets {
            while stepped.counter() < target {
                stepped.advance();
            }
            let mut jumped = Ratchet::from_bytes(&seed, 0);
            jumped.advance_to(target);
            assert_eq!(jumped.counter(), target);
            assert_eq!(probe(&jumped), probe(&stepped), "diverged at index {target}");
        }
    }

    #[test]
    fn fast_forward_from_intermediate_states() {
        let seed = [9u8; RATCHET_LENGTH];
        for (start, target) in [(1u32, 256u32), (255, 256), (256, 300), (250, 65540)] {
            let mut stepped = Ratchet::from_bytes(&seed, 0);
            while stepped.counter() < start {
                stepped.advance();
            }
            let mut jumped = stepped.clone();
            jumped.advance_to(target);
            while stepped.counter() < target {
                stepped.advance();
            }
            assert_eq!(probe(&jumped), probe(&stepped), "diverged on {start} -> {target}");
        }
    }

    #[test]
    fn never_rewinds() {
        let mut ratchet = Ratchet::from_bytes(&[1u8; RATCHET_LENGTH], 0);
        ratchet.advance_to(10);
        let at_ten = probe(&ratchet);
        ratchet.advance_to(5);
        assert_eq!(ratchet.counter(), 10);
        assert_eq!(probe(&ratchet), at_ten);
    }

    #[test]
    fn roundtrips_through_bytes() {
        let mut rng = StdRng::seed_from_u64(51);
        let mut ratchet = Ratchet::new(&mut rng);
        ratchet.advance_to(77);
        let restored = Ratchet::from_bytes(&ratchet.as_bytes(), ratchet.counter());
        assert_eq!(probe(&restored), probe(&ratchet));
        assert_eq!(restored.counter(), 77);
    }
}
