/*!
Read-time fault injection.

When enabled, single byte read results get one pseudo-random bit flipped with
a small fixed probability. This exercises the bit-flip search without a beam
and is independent of what the simulated store holds.
*/

use crate::error::{ChipError, Result};
use crate::protocol::DEFAULT_FLIP_PROBABILITY;
use tracing::debug;

/// Fallback state, xorshift never leaves zero
const NONZERO_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Fake bit-flip generator applied to read results
#[derive(Debug, Clone)]
pub struct ReadCorruption {
    probability: f64,
    state: u64,
    flips: u64,
}

impl ReadCorruption {
    /// Create a generator flipping with `probability` per read
    pub fn new(probability: f64, seed: u64) -> Result<Self> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(ChipError::invalid_argument(format!(
                "flip probability {} outside 0..=1",
                probability
            )));
        }

        Ok(Self::seeded(probability, seed))
    }

    /// Generator with the default 0.1% rate
    pub fn with_seed(seed: u64) -> Self {
        Self::seeded(DEFAULT_FLIP_PROBABILITY, seed)
    }

    fn seeded(probability: f64, seed: u64) -> Self {
        Self {
            probability,
            state: if seed == 0 { NONZERO_SEED } else { seed },
            flips: 0,
        }
    }

    /// Per-read flip probability
    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Number of bits flipped so far
    pub fn flips(&self) -> u64 {
        self.flips
    }

    /// Pass `byte` through, flipping one random bit with the configured probability
    pub fn apply(&mut self, byte: u8) -> u8 {
        if self.next_unit() >= self.probability {
            return byte;
        }

        let bit = (self.next_u64() % 8) as u8;
        self.flips += 1;
        debug!("💥 injected bit flip: bit {} of 0x{:02X}", bit, byte);
        byte ^ (1 << bit)
    }

    /// Uniform value in [0, 1)
    fn next_unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// xorshift64
    fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }
}
