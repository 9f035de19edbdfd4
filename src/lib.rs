//! Bertester - serial link bit-error-rate tester
//!
//! Drives a byte-oriented serial link with a known PRBS (or fully random)
//! pattern, reads back the loopback or far-end echo within a bounded window,
//! and counts bit-level mismatches to measure the link's bit error rate.

pub mod ber;
pub mod config;
pub mod stats;

pub use ber::engine::{EngineEvent, EngineState, Severity, StartError, TestEngine};
pub use ber::scoring::count_bit_errors;
pub use ber::sequence::{PrbsGenerator, RandomFill, SequenceSource, UnsupportedOrderError};
pub use ber::transport::{
    list_ports, LinkTransport, LoopbackFactory, LoopbackLink, TransportError, TransportFactory,
};
pub use config::{ConfigError, SequenceSelector, TestConfig};
pub use stats::{CycleScore, RunTotals};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default baud rate when none is configured
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default chunk size in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 64;

/// Default PRBS order
pub const DEFAULT_PRBS_ORDER: u32 = 7;
