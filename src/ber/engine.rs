//! BER test engine
//!
//! Owns the test cycle: generate a chunk, write it to the link, wait a
//! bounded window for the echo, score it, fold the result into the run
//! totals. The loop runs on one dedicated worker thread per run and is
//! controlled cooperatively through an atomic stop/pause flag pair owned by
//! the engine instance; every suspension point is a short bounded sleep, so
//! a stop request is observed within one poll interval.
//!
//! Statistics and status updates travel to the controller over a single
//! FIFO event channel, which gives strict cycle ordering for free: each
//! stats event carries monotonically non-decreasing totals, and nothing
//! follows the final status of a run.

use crate::ber::scoring::score_cycle;
use crate::ber::sequence::SequenceSource;
use crate::ber::transport::{LinkTransport, SerialFactory, TransportError, TransportFactory};
use crate::config::{ConfigError, TestConfig};
use crate::stats::RunTotals;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Poll interval while waiting for echoed bytes
const RECEIVE_POLL: Duration = Duration::from_millis(1);

/// Poll interval while paused (no I/O happens in this state)
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Settle time between cycles; pacing, not protocol
const CYCLE_PACING: Duration = Duration::from_millis(50);

/// Fixed slack added to the time-on-wire receive deadline
const RECEIVE_GRACE: Duration = Duration::from_millis(500);

/// Bounded wait for the worker to wind down after a stop request
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Why `start` refused to begin a run
#[derive(Error, Debug)]
pub enum StartError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("a test run is already active")]
    AlreadyRunning,

    #[error(transparent)]
    TransportOpen(#[from] TransportError),
}

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No run active; `start` is accepted
    Idle,
    /// Cycle loop transmitting and scoring
    Running,
    /// Cycle loop parked; no I/O until resumed
    Paused,
    /// Stop requested, worker winding down
    Stopping,
}

/// Severity attached to a status update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Paused,
    Error,
}

/// Updates delivered from the engine worker to the controller
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Totals snapshot after a scored cycle
    Stats(RunTotals),
    /// State transition or failure report
    Status { message: String, severity: Severity },
}

/// Serial-link BER test engine
///
/// One engine drives at most one run at a time; starting while a run is
/// active is rejected, never queued. The engine owns its control flags, so
/// independent instances can coexist.
pub struct TestEngine {
    stop_requested: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    factory: Box<dyn TransportFactory>,
    events_tx: Sender<EngineEvent>,
}

impl TestEngine {
    /// Create an engine that opens real serial ports
    ///
    /// Returns the engine and the receiving end of its event channel.
    pub fn new() -> (Self, Receiver<EngineEvent>) {
        Self::with_transport_factory(Box::new(SerialFactory))
    }

    /// Create an engine with a custom transport factory (loopback, tests)
    pub fn with_transport_factory(
        factory: Box<dyn TransportFactory>,
    ) -> (Self, Receiver<EngineEvent>) {
        let (events_tx, events_rx) = unbounded();
        (
            Self {
                stop_requested: Arc::new(AtomicBool::new(false)),
                paused: Arc::new(AtomicBool::new(false)),
                worker: None,
                factory,
                events_tx,
            },
            events_rx,
        )
    }

    /// Start a test run
    ///
    /// Validates the configuration, builds the sequence source and opens the
    /// transport synchronously; any of those failing leaves the engine Idle
    /// with nothing changed. On success the run totals start from zero and
    /// the cycle loop begins on a dedicated worker thread.
    pub fn start(&mut self, config: TestConfig) -> Result<(), StartError> {
        self.reap_finished_worker();
        if self.worker.is_some() {
            return Err(StartError::AlreadyRunning);
        }

        config.validate()?;
        let source = config.sequence.build_source().map_err(ConfigError::from)?;
        let transport = self.factory.open(&config.port, config.baud_rate)?;

        self.stop_requested.store(false, Ordering::Release);
        self.paused.store(false, Ordering::Release);

        let worker = CycleWorker {
            config,
            source,
            transport,
            stop_requested: Arc::clone(&self.stop_requested),
            paused: Arc::clone(&self.paused),
            events: self.events_tx.clone(),
            totals: RunTotals::default(),
        };

        let panic_events = self.events_tx.clone();
        let handle = std::thread::Builder::new()
            .name("ber-engine".into())
            .spawn(move || {
                if let Err(panic_info) = catch_unwind(AssertUnwindSafe(|| worker.run())) {
                    let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic_info.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "unknown panic".to_string()
                    };
                    tracing::error!(panic = %msg, "BER engine worker PANICKED");
                    let _ = panic_events.send(EngineEvent::Status {
                        message: format!("Unexpected failure during test: {msg}"),
                        severity: Severity::Error,
                    });
                    let _ = panic_events.send(EngineEvent::Status {
                        message: "Test stopped, port closed".to_string(),
                        severity: Severity::Info,
                    });
                }
            })
            .expect("Failed to spawn BER engine thread");

        self.worker = Some(handle);
        Ok(())
    }

    /// Pause the run; the cycle loop parks at its next iteration boundary
    pub fn pause(&self) {
        if self.is_running() {
            self.paused.store(true, Ordering::Release);
        }
    }

    /// Resume a paused run
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    /// Stop the run and wait (bounded) for the worker to release the port
    ///
    /// Idempotent: stopping an idle engine, or stopping twice, is a no-op.
    /// Safe to call while the worker is mid-cycle; the loop exits at its next
    /// poll and any in-flight cycle is discarded.
    pub fn stop(&mut self) {
        self.stop_requested.store(true, Ordering::Release);
        self.paused.store(false, Ordering::Release);

        let Some(handle) = self.worker.take() else {
            return;
        };

        let deadline = Instant::now() + STOP_JOIN_TIMEOUT;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            // Detach rather than block the caller on a wedged worker; it
            // still sees the stop flag whenever it next polls.
            tracing::warn!(
                timeout = ?STOP_JOIN_TIMEOUT,
                "BER engine worker did not wind down in time, detaching"
            );
            drop(handle);
        }
    }

    /// Whether a run's worker is currently alive
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        if !self.is_running() {
            EngineState::Idle
        } else if self.stop_requested.load(Ordering::Acquire) {
            EngineState::Stopping
        } else if self.paused.load(Ordering::Acquire) {
            EngineState::Paused
        } else {
            EngineState::Running
        }
    }

    fn reap_finished_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                self.worker = Some(handle);
            }
        }
    }
}

impl Drop for TestEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State moved onto the worker thread for one run
struct CycleWorker {
    config: TestConfig,
    source: SequenceSource,
    transport: Box<dyn LinkTransport>,
    stop_requested: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    events: Sender<EngineEvent>,
    totals: RunTotals,
}

impl CycleWorker {
    fn run(mut self) {
        // Minimum time-on-wire for one chunk at the configured rate, plus
        // fixed slack for turnaround latency at the far end.
        let chunk_bits = (self.config.chunk_size * 8) as f64;
        let wire_time = Duration::from_secs_f64(chunk_bits / f64::from(self.config.baud_rate));
        let receive_window = wire_time + RECEIVE_GRACE;

        let duration_limit =
            (self.config.duration_secs > 0).then(|| Duration::from_secs(self.config.duration_secs));
        let started = Instant::now();
        let mut paused_total = Duration::ZERO;

        self.status(
            format!(
                "Test started: {} @ {} bps, {} chunks of {} bytes",
                self.config.port, self.config.baud_rate, self.config.sequence, self.config.chunk_size
            ),
            Severity::Info,
        );

        let mut scratch = vec![0u8; self.config.chunk_size.max(256)];

        while !self.stop_requested.load(Ordering::Acquire) {
            // Automatic stop once the configured active (non-paused) time is up
            if let Some(limit) = duration_limit {
                if started.elapsed().saturating_sub(paused_total) >= limit {
                    self.status("Configured duration elapsed, stopping".to_string(), Severity::Info);
                    break;
                }
            }

            if self.paused.load(Ordering::Acquire) {
                let nap = Instant::now();
                self.status("Test paused".to_string(), Severity::Paused);
                std::thread::sleep(PAUSE_POLL);
                paused_total += nap.elapsed();
                continue;
            }

            let chunk = self.source.next_chunk(self.config.chunk_size);

            if let Err(e) = self.transport.write_chunk(&chunk) {
                self.status(format!("Write failure, aborting run: {e}"), Severity::Error);
                break;
            }
            self.totals.add_sent_bits((chunk.len() * 8) as u64);

            // Bounded poll-wait for the echo
            let write_instant = Instant::now();
            let mut received = Vec::with_capacity(chunk.len());
            let mut interrupted = false;
            let mut link_failed = false;

            while received.len() < chunk.len() && write_instant.elapsed() < receive_window {
                if self.stop_requested.load(Ordering::Acquire) {
                    interrupted = true;
                    break;
                }
                match self.drain_available(&mut received, &mut scratch) {
                    Ok(()) => {}
                    Err(e) => {
                        self.status(format!("Link failure, aborting run: {e}"), Severity::Error);
                        link_failed = true;
                        break;
                    }
                }
                std::thread::sleep(RECEIVE_POLL);
            }

            if interrupted || link_failed || self.stop_requested.load(Ordering::Acquire) {
                // The in-flight cycle was never scored; withdraw its sent
                // bits so totals cover fully-scored cycles only.
                self.totals
                    .roll_back_sent_bits((chunk.len() * 8) as u64);
                break;
            }

            // A short receive is not fatal: the length penalty turns the
            // shortfall into bit errors and the run continues.
            let score = score_cycle(&chunk, &received);
            self.totals.record_score(&score);
            let _ = self.events.send(EngineEvent::Stats(self.totals));

            std::thread::sleep(CYCLE_PACING);
        }

        if let Err(e) = self.transport.flush_input() {
            tracing::warn!(error = %e, "Failed to drain input while stopping");
        }
        // Release the port first so the closing status is not a promise.
        let events = self.events.clone();
        drop(self);
        tracing::info!("Test stopped, port closed");
        let _ = events.send(EngineEvent::Status {
            message: "Test stopped, port closed".to_string(),
            severity: Severity::Info,
        });
    }

    /// Move whatever the link has buffered into `received`
    fn drain_available(
        &mut self,
        received: &mut Vec<u8>,
        scratch: &mut [u8],
    ) -> Result<(), TransportError> {
        let available = self.transport.bytes_available()?;
        if available == 0 {
            return Ok(());
        }
        let take = available.min(scratch.len());
        let n = self.transport.read_available(&mut scratch[..take])?;
        received.extend_from_slice(&scratch[..n]);
        Ok(())
    }

    fn status(&self, message: String, severity: Severity) {
        match severity {
            Severity::Error => tracing::error!("{message}"),
            Severity::Paused => tracing::debug!("{message}"),
            Severity::Info => tracing::info!("{message}"),
        }
        let _ = self.events.send(EngineEvent::Status { message, severity });
    }
}
