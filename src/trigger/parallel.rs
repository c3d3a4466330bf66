//! Parallel port data register.
//!
//! The data register sits at the port's base I/O address. On Linux it is
//! written through `/dev/port`, which needs root or `CAP_SYS_RAWIO`.

use std::fs::File;
use std::io;

use tracing::info;

use super::{TriggerError, TriggerOutput, TriggerResult};

pub const DEFAULT_ADDRESS: u16 = 0x4000;

/// Parse a base address given as `0x4000`, `0X378` or decimal `16384`.
pub fn parse_address(text: &str) -> TriggerResult<u16> {
    let trimmed = text.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => trimmed.parse::<u16>(),
    };
    parsed.map_err(|_| TriggerError::InvalidAddress(text.to_string()))
}

pub struct ParallelPort {
    address: u16,
    port: File,
}

impl ParallelPort {
    #[cfg(target_os = "linux")]
    pub fn open(address: u16) -> TriggerResult<Self> {
        let port = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/port")?;
        info!("Opened parallel port at {:#06x}", address);
        Ok(Self { address, port })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn open(address: u16) -> TriggerResult<Self> {
        Err(TriggerError::Unsupported(format!(
            "parallel port access at {:#06x} is only implemented through /dev/port on Linux",
            address
        )))
    }
}

#[cfg(target_os = "linux")]
fn write_register(port: &File, address: u16, value: u8) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    port.write_all_at(&[value], u64::from(address))
}

#[cfg(not(target_os = "linux"))]
fn write_register(_port: &File, _address: u16, _value: u8) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "parallel port writes need /dev/port",
    ))
}

impl TriggerOutput for ParallelPort {
    fn write_code(&mut self, code: u8) -> TriggerResult<()> {
        write_register(&self.port, self.address, code)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("parallel port {:#06x}", self.address)
    }
}
