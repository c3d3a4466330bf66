use clap::{Args, Parser};
use std::path::PathBuf;
use std::time::Duration;

use crate::bids::{BidsResult, SessionRequest, ensure_new_output};
use crate::gait::{GaitCodes, GaitConfig};
use crate::qtm::{DEFAULT_PORT, DEFAULT_VERSION};
use crate::session::{GaitSettings, SessionConfig};
use crate::trigger::{PulseShape, TriggerBackend, TriggerConfig, parse_address, serial::DEFAULT_BAUDRATE};

/// Environment variable the QTM control password is read from, so it stays
/// out of process listings.
pub const PASSWORD_ENV: &str = "TRIGGERSYNC_PASSWORD";

/// Trigger hub selection shared by the recorder and the pulse tool.
#[derive(Args, Clone, Debug)]
pub struct TriggerArgs {
    #[arg(
        long,
        value_enum,
        default_value = "parallel",
        help = "Trigger hub interface (parallel needs Linux /dev/port; use serial on Windows and macOS)"
    )]
    pub backend: TriggerBackend,

    #[arg(
        long,
        default_value = "0x4000",
        value_parser = parse_port_address,
        help = "Parallel port base address (hex with 0x prefix, or decimal)"
    )]
    pub address: u16,

    #[arg(long, default_value = "COM6", help = "Serial port of the trigger hub")]
    pub serial_port: String,

    #[arg(long, default_value_t = DEFAULT_BAUDRATE, help = "Serial baud rate")]
    pub baudrate: u32,

    #[arg(
        long,
        help = "Pulse width in milliseconds (default: 5 for parallel, 10 for serial)"
    )]
    pub pulse: Option<f64>,
}

fn parse_port_address(value: &str) -> Result<u16, String> {
    parse_address(value).map_err(|e| e.to_string())
}

impl TriggerArgs {
    pub fn pulse_width(&self) -> Duration {
        let default_ms = match self.backend {
            TriggerBackend::Parallel => 5.0,
            TriggerBackend::Serial => 10.0,
        };
        let ms = self.pulse.unwrap_or(default_ms);
        Duration::from_secs_f64(ms.max(0.0) / 1000.0)
    }

    pub fn trigger_config(&self) -> TriggerConfig {
        let width = self.pulse_width();
        let shape = match self.backend {
            TriggerBackend::Parallel => PulseShape::parallel(width),
            TriggerBackend::Serial => PulseShape::serial(width),
        };
        TriggerConfig {
            backend: self.backend,
            address: self.address,
            serial_port: self.serial_port.clone(),
            baudrate: self.baudrate,
            shape,
        }
    }
}

#[derive(Parser, Clone, Debug)]
#[command(name = "triggersync-record")]
#[command(about = "Record a QTM measurement with synchronized trigger pulses and event markers")]
pub struct RecordArgs {
    #[arg(long, default_value = "127.0.0.1", help = "QTM host")]
    pub host: String,

    #[arg(long, default_value_t = DEFAULT_PORT, help = "QTM RT port (little-endian)")]
    pub port: u16,

    #[arg(long = "version", default_value = DEFAULT_VERSION, help = "QTM RT protocol version")]
    pub qtm_version: String,

    #[arg(
        long,
        env = "TRIGGERSYNC_PASSWORD",
        hide_env_values = true,
        default_value = "",
        help = "QTM control password"
    )]
    pub password: String,

    #[arg(long, short = 'd', default_value = "10.0", help = "Capture time in seconds")]
    pub duration: f64,

    #[arg(long, short = 's', help = "BIDS subject label")]
    pub subject: String,

    #[arg(long, short = 't', default_value = "walking", help = "BIDS task label")]
    pub task: String,

    #[arg(long, help = "BIDS dataset root")]
    pub bids_root: PathBuf,

    #[arg(long, help = "BIDS acquisition label")]
    pub acq: Option<String>,

    #[arg(long, help = "BIDS run index")]
    pub run: Option<u32>,

    #[arg(long, help = "BIDS datatype directory (e.g. motion)")]
    pub datatype: Option<String>,

    #[arg(
        long,
        short = 'o',
        help = "Save the measurement here instead of the next BIDS session path"
    )]
    pub output: Option<PathBuf>,

    #[arg(long, help = "Send hardware trigger pulses alongside the QTM markers")]
    pub triggers: bool,

    #[command(flatten)]
    pub trigger: TriggerArgs,

    #[arg(long, default_value_t = 1, help = "Trigger code for TaskStart")]
    pub start_code: u8,

    #[arg(long, default_value_t = 2, help = "Trigger code for TaskEnd")]
    pub end_code: u8,

    #[arg(long, help = "Pulse gait events detected online from force-plate channels")]
    pub gait: bool,

    #[arg(long, default_value_t = 2, help = "Front plate Fz analog channel (0-based)")]
    pub front_fz: usize,

    #[arg(long, default_value_t = 8, help = "Back plate Fz analog channel (0-based)")]
    pub back_fz: usize,

    #[arg(long, default_value_t = 20.0, help = "Force threshold in newtons")]
    pub threshold: f32,

    #[arg(long, help = "First heel strike is the left foot")]
    pub first_left: bool,

    #[arg(long, default_value_t = 4, help = "Trigger code for right heel strike")]
    pub rhs_code: u8,

    #[arg(long, default_value_t = 5, help = "Trigger code for right toe off")]
    pub rto_code: u8,

    #[arg(long, default_value_t = 6, help = "Trigger code for left heel strike")]
    pub lhs_code: u8,

    #[arg(long, default_value_t = 7, help = "Trigger code for left toe off")]
    pub lto_code: u8,

    #[arg(long, help = "Print the planned session without creating files or contacting QTM")]
    pub dry_run: bool,

    #[arg(long, default_value = "info", help = "Log level (overridden by RUST_LOG)")]
    pub log_level: String,

    #[arg(long, short = 'q', help = "Minimal output mode")]
    pub quiet: bool,
}

impl RecordArgs {
    pub fn session_request(&self) -> SessionRequest {
        SessionRequest {
            root: self.bids_root.clone(),
            subject: self.subject.clone(),
            task: self.task.clone(),
            acquisition: self.acq.clone(),
            run: self.run,
            datatype: self.datatype.clone(),
        }
    }

    pub fn trigger_config(&self) -> Option<TriggerConfig> {
        self.triggers.then(|| self.trigger.trigger_config())
    }

    pub fn gait_settings(&self) -> Option<GaitSettings> {
        self.gait.then(|| GaitSettings {
            detector: GaitConfig {
                front_channel: self.front_fz,
                back_channel: self.back_fz,
                threshold: self.threshold,
                first_strike_is_right: !self.first_left,
            },
            codes: GaitCodes {
                right_heel_strike: self.rhs_code,
                right_toe_off: self.rto_code,
                left_heel_strike: self.lhs_code,
                left_toe_off: self.lto_code,
            },
        })
    }

    /// Where QTM saves the recording: `--output` when given, otherwise the next
    /// BIDS session (only planned on a dry run). Never an existing file.
    pub fn resolve_output(&self) -> BidsResult<PathBuf> {
        match self.output {
            Some(ref path) => {
                ensure_new_output(path)?;
                Ok(path.clone())
            }
            None if self.dry_run => Ok(self.session_request().plan()?.fpath()),
            None => Ok(self.session_request().prepare()?.fpath()),
        }
    }

    pub fn session_config(&self, output: PathBuf) -> SessionConfig {
        let mut config = SessionConfig::new(output, self.duration);
        config.host = self.host.clone();
        config.port = self.port;
        config.version = self.qtm_version.clone();
        config.password = self.password.clone();
        config.start_code = self.start_code;
        config.end_code = self.end_code;
        config.triggers = self.trigger_config();
        config.gait = self.gait_settings();
        config
    }
}

#[derive(Parser, Clone, Debug)]
#[command(name = "triggersync-pulse")]
#[command(about = "Send a single trigger code to check the trigger hub wiring")]
pub struct PulseArgs {
    #[arg(help = "Trigger code (1-255)")]
    pub code: u8,

    #[command(flatten)]
    pub trigger: TriggerArgs,

    #[arg(long, default_value_t = 1, help = "Number of pulses")]
    pub count: u32,

    #[arg(long, default_value = "500", help = "Interval between pulses in milliseconds")]
    pub interval: u64,

    #[arg(long, default_value = "info", help = "Log level (overridden by RUST_LOG)")]
    pub log_level: String,

    #[arg(long, short = 'q', help = "Minimal output mode")]
    pub quiet: bool,
}
