//! Deterministic hashing for board checksums.
//!
//! Peers compare board checksums to confirm they are still in lockstep, so the hash must
//! be identical across processes, platforms, and runs. `std`'s `DefaultHasher` is randomly
//! seeded and therefore unusable here; this module uses FNV-1a with its fixed offset basis.
//!
//! ```
//! use lockstep_chess::hash::{fnv1a_hash, DeterministicHasher};
//! use std::hash::{Hash, Hasher};
//!
//! let mut hasher = DeterministicHasher::new();
//! (3_i32, 4_i32).hash(&mut hasher);
//! assert_eq!(hasher.finish(), fnv1a_hash(&(3_i32, 4_i32)));
//! ```
//!
//! FNV-1a is not cryptographically secure. It only needs to detect accidental divergence.

use std::hash::{Hash, Hasher};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// A deterministic hasher using the FNV-1a algorithm.
#[derive(Debug, Clone)]
pub struct DeterministicHasher {
    state: u64,
}

impl DeterministicHasher {
    /// Creates a new `DeterministicHasher` with the standard FNV-1a offset basis.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: FNV_OFFSET_BASIS,
        }
    }
}

impl Default for DeterministicHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for DeterministicHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.state
    }

    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= u64::from(byte);
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }
}

/// Computes a deterministic FNV-1a hash of the given value.
#[inline]
pub fn fnv1a_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DeterministicHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn same_value_same_hash() {
        assert_eq!(fnv1a_hash(&42u32), fnv1a_hash(&42u32));
        assert_ne!(fnv1a_hash(&42u32), fnv1a_hash(&43u32));
    }

    #[test]
    fn empty_input_is_offset_basis() {
        assert_eq!(DeterministicHasher::new().finish(), FNV_OFFSET_BASIS);
    }

    #[test]
    fn matches_published_vectors() {
        let mut hasher = DeterministicHasher::new();
        hasher.write(b"a");
        assert_eq!(hasher.finish(), 0xaf63_dc4c_8601_ec8c);

        let mut hasher = DeterministicHasher::new();
        hasher.write(b"foobar");
        assert_eq!(hasher.finish(), 0x8594_4171_f739_67e8);
    }

    #[test]
    fn ordered_collections_hash_identically() {
        use std::collections::BTreeMap;

        let mut a = BTreeMap::new();
        a.insert((1, 0), "rook");
        a.insert((0, 0), "king");
        let mut b = BTreeMap::new();
        b.insert((0, 0), "king");
        b.insert((1, 0), "rook");
        assert_eq!(fnv1a_hash(&a), fnv1a_hash(&b));
    }
}
