//! Test run configuration
//!
//! Validated before any run starts; invalid values are rejected
//! synchronously and leave no state behind. A config can also be loaded from
//! a JSON file for repeatable bench setups.

use crate::ber::sequence::{
    PrbsGenerator, RandomFill, SequenceSource, UnsupportedOrderError, SUPPORTED_ORDERS,
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

fn default_baud_rate() -> u32 {
    crate::DEFAULT_BAUD_RATE
}

fn default_chunk_size() -> usize {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_sequence() -> SequenceSelector {
    SequenceSelector::Prbs(crate::DEFAULT_PRBS_ORDER)
}

/// Configuration problems caught before a run starts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("chunk size must be at least 1 byte")]
    ChunkSize,

    #[error("baud rate must be greater than zero")]
    BaudRate,

    #[error(transparent)]
    UnsupportedOrder(#[from] UnsupportedOrderError),
}

/// Which bit pattern a run transmits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceSelector {
    /// PRBS of the given order (7, 15 or 23)
    Prbs(u32),
    /// Uniform random bytes, no LFSR
    Random,
}

impl SequenceSelector {
    /// Build the run's chunk source, seeded fresh for the new run
    pub fn build_source(self) -> Result<SequenceSource, UnsupportedOrderError> {
        match self {
            SequenceSelector::Prbs(order) => Ok(SequenceSource::Prbs(PrbsGenerator::new(order)?)),
            SequenceSelector::Random => Ok(SequenceSource::Random(RandomFill::new())),
        }
    }
}

impl fmt::Display for SequenceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceSelector::Prbs(order) => write!(f, "PRBS-{order}"),
            SequenceSelector::Random => write!(f, "random"),
        }
    }
}

impl FromStr for SequenceSelector {
    type Err = String;

    /// Parse the CLI form: a supported order, or `none`/`random`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "random" => Ok(SequenceSelector::Random),
            other => match other.parse::<u32>() {
                Ok(order) if SUPPORTED_ORDERS.contains(&order) => {
                    Ok(SequenceSelector::Prbs(order))
                }
                _ => Err(format!(
                    "invalid sequence selector '{s}' (expected 7, 15, 23 or none)"
                )),
            },
        }
    }
}

/// Everything one test run needs to know
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    /// Serial port identifier (e.g. `/dev/ttyUSB0`, `COM3`)
    pub port: String,
    /// Link baud rate in bits per second
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Transmitted bit pattern
    #[serde(default = "default_sequence")]
    pub sequence: SequenceSelector,
    /// Bytes generated, sent and scored per cycle
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Run length in seconds; 0 = run until explicitly stopped
    #[serde(default)]
    pub duration_secs: u64,
}

impl TestConfig {
    /// Check the configuration before a run starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size < 1 {
            return Err(ConfigError::ChunkSize);
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::BaudRate);
        }
        if let SequenceSelector::Prbs(order) = self.sequence {
            if !SUPPORTED_ORDERS.contains(&order) {
                return Err(UnsupportedOrderError(order).into());
            }
        }
        Ok(())
    }

    /// Load a config from a JSON file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        tracing::info!(path = %path.display(), "Loaded test config");
        Ok(config)
    }
}
