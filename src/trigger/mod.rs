//! Hardware trigger outputs.
//!
//! A [`TriggerOutput`] sets the 8 data lines of a trigger hub to a code. The
//! [`Pulser`] turns that into a pulse (code, hold, back to 0) and runs it on the
//! blocking pool so it can be started alongside a QTM command.

pub mod memory;
pub mod parallel;
pub mod serial;

pub use memory::MemoryOutput;
pub use parallel::{parse_address, ParallelPort};
pub use serial::SerialHub;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// 0 is the idle level and cannot mark anything
    #[error("Invalid trigger code {0}: codes must be 1-255")]
    InvalidCode(u8),

    #[error("Invalid port address '{0}'")]
    InvalidAddress(String),

    #[error("Unsupported on this platform: {0}")]
    Unsupported(String),

    #[error("Trigger task failed: {0}")]
    Task(String),
}

pub type TriggerResult<T> = Result<T, TriggerError>;

/// Something that can drive the trigger lines to a given code.
pub trait TriggerOutput: Send {
    fn write_code(&mut self, code: u8) -> TriggerResult<()>;

    /// Human-readable device name for logs.
    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TriggerBackend {
    /// Parallel port data register
    Parallel,
    /// Serial trigger hub (8N1)
    Serial,
}

/// Timing of a single pulse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PulseShape {
    /// How long the code is held before returning to 0
    pub width: Duration,
    /// Idle write and delay before and after the pulse. The serial hub needs
    /// the line low for a moment to register a new code.
    pub settle: Option<Duration>,
}

impl PulseShape {
    pub fn parallel(width: Duration) -> Self {
        Self { width, settle: None }
    }

    pub fn serial(width: Duration) -> Self {
        Self {
            width,
            settle: Some(Duration::from_millis(1)),
        }
    }
}

/// Everything needed to open a trigger output.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerConfig {
    pub backend: TriggerBackend,
    pub address: u16,
    pub serial_port: String,
    pub baudrate: u32,
    pub shape: PulseShape,
}

impl TriggerConfig {
    pub fn open(&self) -> TriggerResult<Pulser> {
        let output: Box<dyn TriggerOutput> = match self.backend {
            TriggerBackend::Parallel => Box::new(ParallelPort::open(self.address)?),
            TriggerBackend::Serial => Box::new(SerialHub::open(&self.serial_port, self.baudrate)?),
        };
        let pulser = Pulser::new(output, self.shape);
        pulser.reset()?;
        Ok(pulser)
    }
}

/// When a pulse went out.
#[derive(Debug, Clone, Copy)]
pub struct PulseReport {
    pub code: u8,
    /// Moment the code was written to the lines
    pub onset: Instant,
}

/// Shared, cloneable pulse generator. Pulses from different tasks never
/// overlap: the output stays locked for the whole pulse.
#[derive(Clone)]
pub struct Pulser {
    output: Arc<Mutex<Box<dyn TriggerOutput>>>,
    shape: PulseShape,
}

impl Pulser {
    pub fn new(output: Box<dyn TriggerOutput>, shape: PulseShape) -> Self {
        Self {
            output: Arc::new(Mutex::new(output)),
            shape,
        }
    }

    pub fn describe(&self) -> String {
        self.output
            .lock()
            .map(|o| o.describe())
            .unwrap_or_else(|_| "trigger output".to_string())
    }

    /// Drive the lines to the idle level.
    pub fn reset(&self) -> TriggerResult<()> {
        let mut output = self.output.lock().unwrap_or_else(|p| p.into_inner());
        output.write_code(0)
    }

    pub fn pulse_blocking(&self, code: u8) -> TriggerResult<PulseReport> {
        if code == 0 {
            return Err(TriggerError::InvalidCode(code));
        }

        let mut output = self.output.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(settle) = self.shape.settle {
            output.write_code(0)?;
            thread::sleep(settle);
        }

        output.write_code(code)?;
        let onset = Instant::now();
        thread::sleep(self.shape.width);
        output.write_code(0)?;

        if let Some(settle) = self.shape.settle {
            thread::sleep(settle);
        }
        debug!("Pulsed code {} on {}", code, output.describe());

        Ok(PulseReport { code, onset })
    }

    pub async fn pulse(&self, code: u8) -> TriggerResult<PulseReport> {
        let pulser = self.clone();
        tokio::task::spawn_blocking(move || pulser.pulse_blocking(code))
            .await
            .map_err(|e| TriggerError::Task(e.to_string()))?
    }
}
