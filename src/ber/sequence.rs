//! PRBS test pattern generation
//!
//! Generates the deterministic pseudo-random bit streams transmitted during a
//! BER test run. Three standard maximal-length sequences are supported
//! (PRBS-7, PRBS-15, PRBS-23), each produced by a Fibonacci LFSR with a fixed
//! tap, plus a fully random mode for links where a repeating pattern would be
//! masked by scrambling.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use thiserror::Error;

/// Sequence orders with a known feedback polynomial
pub const SUPPORTED_ORDERS: [u32; 3] = [7, 15, 23];

/// Error returned when a generator is requested for an order with no known
/// feedback polynomial
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unsupported PRBS order {0} (supported: 7, 15, 23)")]
pub struct UnsupportedOrderError(pub u32);

/// Fixed tap position for each supported order.
///
/// Together with the output bit these realize the standard PRBS polynomials
/// x^7 + x^6 + 1, x^15 + x^14 + 1 and x^23 + x^18 + 1, all primitive, so the
/// register walks every non-zero state before repeating.
fn tap_for_order(order: u32) -> Option<u32> {
    match order {
        7 => Some(6),
        15 => Some(14),
        23 => Some(18),
        _ => None,
    }
}

/// Fibonacci LFSR producing one of the supported maximal-length sequences
///
/// The register is seeded to all-ones and must never reach all-zero (which
/// would lock the stream at constant zero); with the supported polynomials
/// the all-ones seed guarantees that.
#[derive(Debug, Clone)]
pub struct PrbsGenerator {
    order: u32,
    tap: u32,
    register: u32,
}

impl PrbsGenerator {
    /// Create a generator for the given sequence order
    ///
    /// # Errors
    /// Returns [`UnsupportedOrderError`] if `order` is not 7, 15 or 23.
    pub fn new(order: u32) -> Result<Self, UnsupportedOrderError> {
        let tap = tap_for_order(order).ok_or(UnsupportedOrderError(order))?;
        Ok(Self {
            order,
            tap,
            register: (1u32 << order) - 1,
        })
    }

    /// Advance the register one step and return the output bit (0 or 1)
    ///
    /// The output is the current LSB. The feedback bit, the XOR of the tapped
    /// bit and the output bit, is inserted at the top as the register shifts
    /// one position toward the low end.
    pub fn next_bit(&mut self) -> u8 {
        let output = (self.register & 1) as u8;
        let feedback = ((self.register >> self.tap) ^ self.register) & 1;
        self.register = (self.register >> 1) | (feedback << (self.order - 1));
        output
    }

    /// Produce `n` bytes, packing 8 consecutive bits per byte LSB-first
    pub fn next_chunk(&mut self, n: usize) -> Vec<u8> {
        let mut chunk = Vec::with_capacity(n);
        for _ in 0..n {
            let mut byte = 0u8;
            for bit_pos in 0..8 {
                byte |= self.next_bit() << bit_pos;
            }
            chunk.push(byte);
        }
        chunk
    }

    /// Re-seed the register to all-ones, the start-of-run state
    pub fn reset(&mut self) {
        self.register = (1u32 << self.order) - 1;
    }

    /// Get the sequence order
    pub fn order(&self) -> u32 {
        self.order
    }

    /// Get the current register value (unit-test introspection)
    pub fn register(&self) -> u32 {
        self.register
    }

    /// Sequence period in bits (2^order - 1)
    pub fn period(&self) -> u64 {
        (1u64 << self.order) - 1
    }
}

/// True-random chunk source for the no-PRBS mode
///
/// Same `next_chunk` contract as [`PrbsGenerator`] but with no register
/// state; bytes are uniformly distributed.
#[derive(Debug)]
pub struct RandomFill {
    rng: StdRng,
}

impl RandomFill {
    /// Create a random source seeded from OS entropy
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Produce `n` uniformly random bytes
    pub fn next_chunk(&mut self, n: usize) -> Vec<u8> {
        let mut chunk = vec![0u8; n];
        self.rng.fill_bytes(&mut chunk);
        chunk
    }
}

impl Default for RandomFill {
    fn default() -> Self {
        Self::new()
    }
}

/// Bit pattern source for one test run
///
/// Selected once at run start from the configured sequence selector; the
/// engine's cycle loop only ever calls [`next_chunk`](Self::next_chunk).
#[derive(Debug)]
pub enum SequenceSource {
    /// Deterministic LFSR stream
    Prbs(PrbsGenerator),
    /// Uniform random bytes
    Random(RandomFill),
}

impl SequenceSource {
    /// Produce the next `n`-byte chunk from the underlying source
    pub fn next_chunk(&mut self, n: usize) -> Vec<u8> {
        match self {
            SequenceSource::Prbs(gen) => gen.next_chunk(n),
            SequenceSource::Random(fill) => fill.next_chunk(n),
        }
    }
}
