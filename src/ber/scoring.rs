//! Bit-error accounting for scored cycles
//!
//! Compares a sent chunk against whatever was echoed back and tallies
//! bit-level mismatches. Pure functions; the engine owns the running totals.

use crate::stats::CycleScore;

/// Count bit errors between a sent and a received byte sequence
///
/// Over the overlapping prefix (`min` of the two lengths) the error count is
/// the population count of the per-byte XOR. Each byte of length difference
/// then contributes 8 further bit errors. The 8-bits-per-missing-byte penalty
/// is the defined semantics of the measurement, not an approximation to be
/// refined: there is no attempt at bit-level realignment of short or long
/// echoes.
pub fn count_bit_errors(sent: &[u8], received: &[u8]) -> u64 {
    let overlap = sent.len().min(received.len());
    let mismatches: u64 = sent[..overlap]
        .iter()
        .zip(&received[..overlap])
        .map(|(a, b)| u64::from((a ^ b).count_ones()))
        .sum();
    mismatches + 8 * sent.len().abs_diff(received.len()) as u64
}

/// Score one generate/send/receive cycle
pub fn score_cycle(sent: &[u8], received: &[u8]) -> CycleScore {
    CycleScore {
        bytes_sent: sent.len() as u64,
        bytes_received: received.len() as u64,
        bit_errors: count_bit_errors(sent, received),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_sequences_score_zero() {
        let data = [0x00, 0xFF, 0xA5, 0x5A];
        assert_eq!(count_bit_errors(&data, &data), 0);
        assert_eq!(count_bit_errors(&[], &[]), 0);
    }

    #[test]
    fn test_counts_exact_flipped_bits() {
        // 3 bits flipped in the first byte, 1 in the last
        let sent = [0b1111_0000, 0x00, 0x55];
        let received = [0b1111_0111, 0x00, 0x54];
        assert_eq!(count_bit_errors(&sent, &received), 4);
    }

    #[test]
    fn test_all_bits_wrong() {
        let sent = [0x00; 4];
        let received = [0xFF; 4];
        assert_eq!(count_bit_errors(&sent, &received), 32);
    }

    #[test]
    fn test_short_receive_penalized_per_byte() {
        let sent = [0xAA, 0xAA, 0xAA, 0xAA];
        // clean overlap, two bytes missing
        assert_eq!(count_bit_errors(&sent, &sent[..2]), 16);
        // nothing received at all
        assert_eq!(count_bit_errors(&sent, &[]), 32);
    }

    #[test]
    fn test_long_receive_penalized_per_byte() {
        let sent = [0x12, 0x34];
        let received = [0x12, 0x34, 0x56];
        assert_eq!(count_bit_errors(&sent, &received), 8);
    }

    #[test]
    fn test_mismatch_and_length_penalty_combine() {
        let sent = [0x0F, 0xF0, 0xFF];
        let received = [0x0E, 0xF0]; // 1 flipped bit + 1 missing byte
        assert_eq!(count_bit_errors(&sent, &received), 9);
    }

    #[test]
    fn test_score_cycle_counts() {
        let score = score_cycle(&[0xFF, 0xFF], &[0xFF]);
        assert_eq!(score.bytes_sent, 2);
        assert_eq!(score.bytes_received, 1);
        assert_eq!(score.bit_errors, 8);
    }
}
