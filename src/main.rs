//! Bertester - serial link BER testing tool
//!
//! Entry point for the command line controller: parses the test
//! configuration, starts the engine, and renders statistics and status
//! updates as they arrive on the event channel.

use anyhow::Result;
use bertester::{
    list_ports, EngineEvent, LoopbackFactory, RunTotals, Severity, TestConfig, TestEngine,
};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bertester=info".parse().unwrap()),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    let mut config_file: Option<String> = None;
    let mut port: Option<String> = None;
    let mut baud_rate: Option<u32> = None;
    let mut sequence: Option<bertester::SequenceSelector> = None;
    let mut chunk_size: Option<usize> = None;
    let mut duration_secs: Option<u64> = None;
    let mut loopback = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--list" | "-l" => {
                list_available_ports()?;
                return Ok(());
            }
            "--version" | "-v" => {
                println!("bertester {}", bertester::VERSION);
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--loopback" => {
                loopback = true;
            }
            "--config" | "-c" => {
                config_file = Some(take_value(&args, &mut i, "--config")?);
                continue;
            }
            "--port" | "-p" => {
                port = Some(take_value(&args, &mut i, "--port")?);
                continue;
            }
            "--baud" | "-b" => {
                baud_rate = Some(parse_value(&args, &mut i, "--baud")?);
                continue;
            }
            "--prbs" => {
                let value = take_value(&args, &mut i, "--prbs")?;
                sequence = Some(value.parse().map_err(|e: String| anyhow::anyhow!(e))?);
                continue;
            }
            "--chunk" => {
                chunk_size = Some(parse_value(&args, &mut i, "--chunk")?);
                continue;
            }
            "--duration" | "-t" => {
                duration_secs = Some(parse_value(&args, &mut i, "--duration")?);
                continue;
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return Ok(());
            }
            _ => {
                // Positional argument - treat as port if not set
                if port.is_none() {
                    port = Some(args[i].clone());
                }
            }
        }
        i += 1;
    }

    // Config file first, then command line overrides
    let mut config = match config_file {
        Some(path) => TestConfig::load(Path::new(&path))?,
        None => TestConfig {
            port: String::new(),
            baud_rate: bertester::DEFAULT_BAUD_RATE,
            sequence: bertester::SequenceSelector::Prbs(bertester::DEFAULT_PRBS_ORDER),
            chunk_size: bertester::DEFAULT_CHUNK_SIZE,
            duration_secs: 0,
        },
    };
    if let Some(p) = port {
        config.port = p;
    }
    if let Some(b) = baud_rate {
        config.baud_rate = b;
    }
    if let Some(s) = sequence {
        config.sequence = s;
    }
    if let Some(c) = chunk_size {
        config.chunk_size = c;
    }
    if let Some(d) = duration_secs {
        config.duration_secs = d;
    }

    if loopback && config.port.is_empty() {
        config.port = "loopback".to_string();
    }
    if config.port.is_empty() {
        eprintln!("Error: no serial port given (use --port, --loopback or --list)");
        print_help();
        return Ok(());
    }

    run_test(config, loopback)
}

fn take_value(args: &[String], i: &mut usize, flag: &str) -> Result<String> {
    if *i + 1 >= args.len() {
        anyhow::bail!("{flag} requires a value");
    }
    let value = args[*i + 1].clone();
    *i += 2;
    Ok(value)
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: &mut usize, flag: &str) -> Result<T> {
    let value = take_value(args, i, flag)?;
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid value for {flag}: {value}"))
}

fn print_help() {
    println!("Usage: bertester [OPTIONS] [PORT]");
    println!();
    println!("Options:");
    println!("  -l, --list            List available serial ports");
    println!("  -p, --port PORT       Serial port to test (e.g. /dev/ttyUSB0, COM3)");
    println!("  -b, --baud RATE       Baud rate (default: {})", bertester::DEFAULT_BAUD_RATE);
    println!("      --prbs SEL        Pattern: 7, 15, 23 or none (default: 7)");
    println!("      --chunk BYTES     Chunk size per cycle (default: {})", bertester::DEFAULT_CHUNK_SIZE);
    println!("  -t, --duration SECS   Test duration, 0 = until Ctrl+C (default: 0)");
    println!("  -c, --config FILE     Load test config from a JSON file");
    println!("      --loopback        Self-test against an in-memory echo, no hardware");
    println!("  -v, --version         Show version");
    println!("  -h, --help            Show this help");
    println!();
    println!("Examples:");
    println!("  bertester -p /dev/ttyUSB0 -b 115200 --prbs 23 --chunk 256 -t 60");
    println!("  bertester --loopback -t 5");
    println!("  bertester --list");
}

fn list_available_ports() -> Result<()> {
    println!("Scanning for serial ports...");
    println!();

    match list_ports() {
        Ok(ports) => {
            if ports.is_empty() {
                println!("No serial ports found.");
            } else {
                println!("Found {} port(s):", ports.len());
                println!();
                for (i, port) in ports.iter().enumerate() {
                    println!("  {}. {} ({:?})", i + 1, port.port_name, port.port_type);
                }
            }
        }
        Err(e) => {
            error!("Failed to list ports: {}", e);
            println!("Error: {}", e);
        }
    }

    Ok(())
}

fn run_test(config: TestConfig, loopback: bool) -> Result<()> {
    let (mut engine, events) = if loopback {
        TestEngine::with_transport_factory(Box::new(LoopbackFactory::new()))
    } else {
        TestEngine::new()
    };

    // Ctrl+C requests an orderly stop from the controller side
    let interrupt = Arc::new(AtomicBool::new(false));
    let interrupt_flag = Arc::clone(&interrupt);
    ctrlc::set_handler(move || {
        interrupt_flag.store(true, Ordering::Release);
    })?;

    engine.start(config)?;

    let final_totals = event_loop(&mut engine, &events, &interrupt);
    engine.stop();

    println!();
    println!("Run summary:");
    println!("  bits sent:     {}", final_totals.bits_sent);
    println!("  bits received: {}", final_totals.bits_received);
    println!("  bit errors:    {}", final_totals.bit_errors);
    println!("  BER:           {:.3e}", final_totals.ber());

    Ok(())
}

/// Consume engine events until the run ends, returning the last totals
fn event_loop(
    engine: &mut TestEngine,
    events: &Receiver<EngineEvent>,
    interrupt: &Arc<AtomicBool>,
) -> RunTotals {
    let mut totals = RunTotals::default();

    loop {
        if interrupt.swap(false, Ordering::AcqRel) {
            println!();
            println!("Stopping...");
            engine.stop();
        }

        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(EngineEvent::Stats(latest)) => {
                totals = latest;
                print!(
                    "\rsent: {:>12}  received: {:>12}  errors: {:>8}  BER: {:.3e}",
                    totals.bits_sent,
                    totals.bits_received,
                    totals.bit_errors,
                    totals.ber()
                );
                let _ = std::io::stdout().flush();
            }
            Ok(EngineEvent::Status { message, severity }) => match severity {
                Severity::Error => {
                    println!();
                    eprintln!("Error: {}", message);
                }
                Severity::Paused => {
                    print!("\r{message}...");
                    let _ = std::io::stdout().flush();
                }
                Severity::Info => {
                    println!();
                    println!("{}", message);
                }
            },
            Err(RecvTimeoutError::Timeout) => {
                if !engine.is_running() && events.is_empty() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    totals
}
