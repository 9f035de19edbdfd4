//! Running totals for one test run
//!
//! Counters are owned exclusively by the engine worker for the lifetime of a
//! run; controllers only ever see `Copy` snapshots delivered through the
//! engine's event channel.

/// Byte and bit-error counts for a single scored cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleScore {
    /// Bytes written to the link this cycle
    pub bytes_sent: u64,
    /// Bytes read back before the deadline
    pub bytes_received: u64,
    /// Bit errors, including the length-mismatch penalty
    pub bit_errors: u64,
}

/// Accumulated counters for a test run
///
/// Reset to zero at the start of every run; monotonically non-decreasing
/// while the run is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTotals {
    /// Total bits written to the link
    pub bits_sent: u64,
    /// Total bits read back
    pub bits_received: u64,
    /// Total bit errors
    pub bit_errors: u64,
}

impl RunTotals {
    /// Reset all counters to zero (start of a new run)
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Account bits handed to the transport for the in-flight cycle
    pub fn add_sent_bits(&mut self, bits: u64) {
        self.bits_sent += bits;
    }

    /// Withdraw the in-flight cycle's sent bits after a mid-cycle stop
    ///
    /// Keeps the totals consistent: a cycle whose receive could not be scored
    /// contributes nothing.
    pub fn roll_back_sent_bits(&mut self, bits: u64) {
        self.bits_sent = self.bits_sent.saturating_sub(bits);
    }

    /// Fold one scored cycle into the received/error counters
    pub fn record_score(&mut self, score: &CycleScore) {
        self.bits_received += score.bytes_received * 8;
        self.bit_errors += score.bit_errors;
    }

    /// Bit error rate: errors as a fraction of the bits sent
    ///
    /// Uses the transmitted stream as the denominator so that wholly missing
    /// echoes (penalized at 8 bits per byte) still read as a rate of 1.0
    /// rather than dividing by a zero receive count.
    pub fn ber(&self) -> f64 {
        if self.bits_sent == 0 {
            0.0
        } else {
            self.bit_errors as f64 / self.bits_sent as f64
        }
    }
}
