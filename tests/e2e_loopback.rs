//! E2E tests for full BER runs against loopback transports
//!
//! Exercises the whole engine cycle (generate, write, bounded receive wait,
//! score, accumulate) without hardware, using the in-memory loopback links.

use bertester::{
    EngineEvent, LoopbackFactory, RunTotals, SequenceSelector, Severity, TestConfig, TestEngine,
};
use std::time::{Duration, Instant};

fn config(chunk_size: usize, duration_secs: u64) -> TestConfig {
    TestConfig {
        port: "loopback".to_string(),
        baud_rate: 115200,
        sequence: SequenceSelector::Prbs(7),
        chunk_size,
        duration_secs,
    }
}

/// Run a bounded test to its automatic end and collect every event
fn run_to_completion(factory: LoopbackFactory, config: TestConfig) -> (Vec<EngineEvent>, Duration) {
    let (mut engine, events) = TestEngine::with_transport_factory(Box::new(factory));
    let started = Instant::now();
    engine.start(config).unwrap();

    let deadline = Instant::now() + Duration::from_secs(15);
    while engine.is_running() {
        assert!(
            Instant::now() < deadline,
            "bounded run did not terminate on its own"
        );
        std::thread::sleep(Duration::from_millis(20));
    }
    let elapsed = started.elapsed();
    engine.stop();

    (events.try_iter().collect(), elapsed)
}

fn stats_snapshots(events: &[EngineEvent]) -> Vec<RunTotals> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Stats(totals) => Some(*totals),
            _ => None,
        })
        .collect()
}

fn final_totals(events: &[EngineEvent]) -> RunTotals {
    *stats_snapshots(events)
        .last()
        .expect("run produced no stats events")
}

#[test]
fn test_perfect_loopback_is_error_free() {
    let (events, elapsed) = run_to_completion(LoopbackFactory::new(), config(32, 1));

    assert!(
        elapsed >= Duration::from_secs(1),
        "run ended before the configured duration"
    );

    let totals = final_totals(&events);
    assert!(totals.bits_sent > 0, "no cycles were scored");
    assert_eq!(totals.bits_sent, totals.bits_received);
    assert_eq!(totals.bit_errors, 0);
    assert_eq!(totals.ber(), 0.0);
}

#[test]
fn test_totals_move_in_whole_cycles() {
    let chunk_bits: u64 = 32 * 8;
    let (events, _) = run_to_completion(LoopbackFactory::new(), config(32, 1));

    let mut previous = RunTotals::default();
    for totals in stats_snapshots(&events) {
        assert_eq!(
            totals.bits_sent - previous.bits_sent,
            chunk_bits,
            "stats snapshot skipped or repeated a cycle"
        );
        assert!(totals.bits_received >= previous.bits_received);
        assert!(totals.bit_errors >= previous.bit_errors);
        previous = totals;
    }
}

#[test]
fn test_final_event_is_stopped_status() {
    let (events, _) = run_to_completion(LoopbackFactory::new(), config(16, 1));

    match events.last() {
        Some(EngineEvent::Status { message, severity }) => {
            assert_eq!(*severity, Severity::Info);
            assert!(message.contains("stopped"), "unexpected final status: {message}");
        }
        other => panic!("expected a final status event, got {other:?}"),
    }
}

#[test]
fn test_dropped_bytes_penalized_per_byte() {
    // Echo swallows 2 of every 16 bytes: the shortfall must surface entirely
    // as the 8-bit-per-missing-byte penalty.
    let (events, _) = run_to_completion(LoopbackFactory::dropping_tail(2), config(16, 1));

    let totals = final_totals(&events);
    assert!(totals.bits_sent > 0);
    assert_eq!(totals.bits_received, totals.bits_sent / 16 * 14);
    assert_eq!(totals.bit_errors, totals.bits_sent - totals.bits_received);
    assert!(totals.ber() > 0.0);
}

#[test]
fn test_flipped_bits_counted_exactly() {
    let chunk_bits: u64 = 32 * 8;
    let (events, _) = run_to_completion(LoopbackFactory::flipping_low_bits(3), config(32, 1));

    let totals = final_totals(&events);
    let cycles = totals.bits_sent / chunk_bits;
    assert!(cycles > 0);
    assert_eq!(totals.bits_received, totals.bits_sent);
    assert_eq!(totals.bit_errors, 3 * cycles);
}

#[test]
fn test_random_source_scores_clean_on_perfect_echo() {
    let mut cfg = config(64, 1);
    cfg.sequence = SequenceSelector::Random;
    let (events, _) = run_to_completion(LoopbackFactory::new(), cfg);

    let totals = final_totals(&events);
    assert!(totals.bits_sent > 0);
    assert_eq!(totals.bits_sent, totals.bits_received);
    assert_eq!(totals.bit_errors, 0);
}
