//! Small PCG32 generator for the parts of a peer that are allowed to be random.
//!
//! Nothing here feeds the board. Randomness picks participant IDs, rebind ports, and the
//! loss and delay decisions of [`ChaosSocket`](crate::ChaosSocket). Simulated games in
//! tests seed a [`Pcg32`] so the same seed replays the same moves.
//!
//! ```rust
//! use lockstep_chess::rng::{Pcg32, Rng};
//!
//! let mut rng = Pcg32::seed_from_u64(12345);
//! let port = rng.gen_range(1024..65535);
//! assert!((1024..65535).contains(&port));
//! ```

use std::cell::RefCell;

const PCG_STREAM: u64 = 1442695040888963407;
const PCG_MULTIPLIER: u64 = 6364136223846793005;

/// PCG-XSH-RR with 64 bits of state. Not cryptographically secure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pcg32 {
    state: u64,
    inc: u64,
}

impl Pcg32 {
    /// Seeds a generator; equal seeds give equal sequences.
    #[must_use]
    pub const fn seed_from_u64(seed: u64) -> Self {
        let inc = (PCG_STREAM << 1) | 1;
        let state = 0u64.wrapping_mul(PCG_MULTIPLIER).wrapping_add(inc).wrapping_add(seed);
        Self {
            state: state.wrapping_mul(PCG_MULTIPLIER).wrapping_add(inc),
            inc,
        }
    }

    /// Seeds from the clock, process ID and thread.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self::seed_from_u64(entropy_seed())
    }

    fn step(&mut self) -> u32 {
        let old = self.state;
        self.state = old.wrapping_mul(PCG_MULTIPLIER).wrapping_add(self.inc);
        let xorshifted = (((old >> 18) ^ old) >> 27) as u32;
        xorshifted.rotate_right((old >> 59) as u32)
    }
}

/// Draws used by the sockets and the simulated players.
pub trait Rng {
    /// Next raw 32-bit value.
    fn next_u32(&mut self) -> u32;

    /// Next raw 64-bit value.
    fn next_u64(&mut self) -> u64 {
        (u64::from(self.next_u32()) << 32) | u64::from(self.next_u32())
    }

    /// Uniform value in `range`. An empty range yields `range.start`.
    fn gen_range(&mut self, range: std::ops::Range<u32>) -> u32 {
        let span = range.end.wrapping_sub(range.start);
        if range.is_empty() {
            return range.start;
        }
        // rejection sampling keeps the result unbiased
        let threshold = span.wrapping_neg() % span;
        loop {
            let value = self.next_u32();
            if value >= threshold {
                return range.start.wrapping_add(value % span);
            }
        }
    }

    /// Uniform index in `range`, for picking from a list.
    fn gen_range_usize(&mut self, range: std::ops::Range<usize>) -> usize {
        let start = u32::try_from(range.start).unwrap_or(u32::MAX);
        let end = u32::try_from(range.end).unwrap_or(u32::MAX);
        self.gen_range(start..end) as usize
    }

    /// `true` with the given probability, clamped to `[0, 1]`.
    fn gen_bool(&mut self, probability: f64) -> bool {
        let p = probability.clamp(0.0, 1.0);
        if p >= 1.0 {
            return true;
        }
        self.next_u32() < (p * f64::from(u32::MAX)) as u32
    }
}

impl Rng for Pcg32 {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        self.step()
    }
}

thread_local! {
    static THREAD_RNG: RefCell<Pcg32> = RefCell::new(Pcg32::from_entropy());
}

/// Fresh 64-bit value from the thread-local generator, used for participant IDs.
#[must_use]
pub fn random_u64() -> u64 {
    THREAD_RNG.with(|rng| rng.borrow_mut().next_u64())
}

/// Handle to the thread-local generator.
#[must_use]
pub fn thread_rng() -> ThreadRng {
    ThreadRng { _private: () }
}

/// Zero-sized handle returned by [`thread_rng`].
#[derive(Debug)]
pub struct ThreadRng {
    _private: (),
}

impl Rng for ThreadRng {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        THREAD_RNG.with(|rng| rng.borrow_mut().step())
    }
}

/// Two peers started in the same instant on one machine still differ by process ID,
/// so local multi-process matches do not collide on participant IDs.
fn entropy_seed() -> u64 {
    use crate::hash::DeterministicHasher;
    use std::hash::{Hash, Hasher};
    use web_time::{SystemTime, UNIX_EPOCH};

    let mut hasher = DeterministicHasher::new();
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
        .hash(&mut hasher);
    std::process::id().hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);
    hasher.finish().wrapping_add(0x9e37_79b9_7f4a_7c15)
}
