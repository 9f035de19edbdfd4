//! Serial link transport
//!
//! Thin seam between the test engine and the wire: a [`LinkTransport`] is an
//! already-open, configured connection offering write plus poll-style
//! non-blocking reads. [`SerialLink`] wraps a real serial port;
//! [`LoopbackLink`] is an in-memory echo used for self-tests and for
//! exercising the engine without hardware.

use serialport::{ClearBuffer, SerialPort};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;
use thiserror::Error;

/// Per-call timeout configured on the underlying serial port. The engine
/// only reads bytes it has seen via `bytes_available`, so this merely caps a
/// pathological blocking read.
const PORT_TIMEOUT: Duration = Duration::from_millis(100);

/// Errors raised by the link transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("port query failed: {0}")]
    Query(#[source] serialport::Error),

    #[error("failed to enumerate serial ports: {0}")]
    Enumerate(#[source] serialport::Error),
}

/// An open, configured serial connection as seen by the test engine
///
/// Reads are non-blocking: `read_available` returns whatever is immediately
/// buffered, up to the caller's capacity, and the engine polls
/// `bytes_available` at a fine interval to bound its wait.
pub trait LinkTransport: Send {
    /// Write an entire chunk to the link
    fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Number of bytes buffered and ready to read (non-blocking query)
    fn bytes_available(&mut self) -> Result<usize, TransportError>;

    /// Read up to `buf.len()` immediately available bytes, returning the count
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Discard any unread bytes buffered on the receive side
    fn flush_input(&mut self) -> Result<(), TransportError>;
}

/// Opens a [`LinkTransport`] for a port identifier and baud rate
///
/// The engine opens the transport synchronously inside `start`, so open
/// failures surface to the caller before any worker is spawned. Tests swap
/// in a loopback factory here.
pub trait TransportFactory: Send {
    fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn LinkTransport>, TransportError>;
}

/// Real serial connection backed by the `serialport` crate
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl LinkTransport for SerialLink {
    fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(data).map_err(TransportError::Write)
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(TransportError::Query)
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(TransportError::Read(e)),
        }
    }

    fn flush_input(&mut self) -> Result<(), TransportError> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(TransportError::Query)
    }
}

/// Factory opening real serial ports (8N1, short per-call timeout)
pub struct SerialFactory;

impl TransportFactory for SerialFactory {
    fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn LinkTransport>, TransportError> {
        let handle = serialport::new(port, baud_rate)
            .timeout(PORT_TIMEOUT)
            .open()
            .map_err(|source| TransportError::Open {
                port: port.to_string(),
                source,
            })?;

        // Start from an empty line: stale bytes from a previous run would be
        // scored as errors against the first chunk.
        handle
            .clear(ClearBuffer::All)
            .map_err(|source| TransportError::Open {
                port: port.to_string(),
                source,
            })?;

        tracing::info!(port, baud_rate, "Serial port opened");
        Ok(Box::new(SerialLink { port: handle }))
    }
}

/// List the serial ports available on this machine
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(TransportError::Enumerate)
}

/// Deliberate impairment applied by a loopback link to each written chunk
#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Echo every byte unchanged
    None,
    /// Swallow the last `n` bytes of each chunk (models a slow/deaf far end)
    DropTail(usize),
    /// Flip the low bit of the first `n` bytes of each chunk
    FlipLowBits(usize),
    /// Refuse every write (models a link that died mid-run)
    FailWrites,
}

/// In-memory echo transport
///
/// Every written chunk is immediately readable back, optionally impaired.
/// Used by the CLI's `--loopback` self-test and by the integration tests.
pub struct LoopbackLink {
    echo: VecDeque<u8>,
    fault: Fault,
}

impl LoopbackLink {
    /// Perfect echo: every byte comes back unchanged
    pub fn new() -> Self {
        Self {
            echo: VecDeque::new(),
            fault: Fault::None,
        }
    }

    /// Echo that drops the last `n` bytes of every chunk
    pub fn dropping_tail(n: usize) -> Self {
        Self {
            echo: VecDeque::new(),
            fault: Fault::DropTail(n),
        }
    }

    /// Echo that flips the low bit of the first `n` bytes of every chunk
    pub fn flipping_low_bits(n: usize) -> Self {
        Self {
            echo: VecDeque::new(),
            fault: Fault::FlipLowBits(n),
        }
    }

    /// Link whose writes always fail, for exercising the fatal write path
    pub fn failing_writes() -> Self {
        Self {
            echo: VecDeque::new(),
            fault: Fault::FailWrites,
        }
    }
}

impl Default for LoopbackLink {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkTransport for LoopbackLink {
    fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransportError> {
        match self.fault {
            Fault::None => self.echo.extend(data),
            Fault::DropTail(n) => {
                let keep = data.len().saturating_sub(n);
                self.echo.extend(&data[..keep]);
            }
            Fault::FlipLowBits(n) => {
                for (i, byte) in data.iter().enumerate() {
                    self.echo.push_back(if i < n { byte ^ 0x01 } else { *byte });
                }
            }
            Fault::FailWrites => {
                return Err(TransportError::Write(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "loopback link configured to refuse writes",
                )));
            }
        }
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        Ok(self.echo.len())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut count = 0;
        while count < buf.len() {
            match self.echo.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    fn flush_input(&mut self) -> Result<(), TransportError> {
        self.echo.clear();
        Ok(())
    }
}

/// What a [`LoopbackFactory`] does when asked to open a link
#[derive(Debug, Clone, Copy)]
enum FactoryMode {
    /// Hand out a fresh loopback link with the given impairment
    Link(Fault),
    /// Fail the open itself, as a missing or busy port would
    RefuseOpen,
}

/// Factory handing out loopback links, one fresh link per open
pub struct LoopbackFactory {
    mode: FactoryMode,
}

impl LoopbackFactory {
    /// Factory for perfect-echo links
    pub fn new() -> Self {
        Self {
            mode: FactoryMode::Link(Fault::None),
        }
    }

    /// Factory for links dropping the last `n` bytes of each chunk
    pub fn dropping_tail(n: usize) -> Self {
        Self {
            mode: FactoryMode::Link(Fault::DropTail(n)),
        }
    }

    /// Factory for links flipping the low bit of the first `n` bytes
    pub fn flipping_low_bits(n: usize) -> Self {
        Self {
            mode: FactoryMode::Link(Fault::FlipLowBits(n)),
        }
    }

    /// Factory for links that refuse every write
    pub fn failing_writes() -> Self {
        Self {
            mode: FactoryMode::Link(Fault::FailWrites),
        }
    }

    /// Factory that refuses to open at all
    pub fn refusing_open() -> Self {
        Self {
            mode: FactoryMode::RefuseOpen,
        }
    }
}

impl Default for LoopbackFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for LoopbackFactory {
    fn open(&self, port: &str, _baud_rate: u32) -> Result<Box<dyn LinkTransport>, TransportError> {
        match self.mode {
            FactoryMode::Link(fault) => Ok(Box::new(LoopbackLink {
                echo: VecDeque::new(),
                fault,
            })),
            FactoryMode::RefuseOpen => Err(TransportError::Open {
                port: port.to_string(),
                source: serialport::Error::new(
                    serialport::ErrorKind::NoDevice,
                    "loopback factory configured to refuse opens",
                ),
            }),
        }
    }
}
