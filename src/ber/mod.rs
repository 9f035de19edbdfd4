//! BER test module
//!
//! This module contains the test core and its link seam:
//! - PRBS / random chunk generation ([`sequence`])
//! - bit-error accounting ([`scoring`])
//! - serial and loopback transports ([`transport`])
//! - the cycle loop and its control protocol ([`engine`])

pub mod engine;
pub mod scoring;
pub mod sequence;
pub mod transport;
