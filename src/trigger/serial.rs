//! Serial trigger hub: each byte written becomes the code on the hub's output
//! lines.

use std::io::Write;
use std::time::Duration;

use serialport::{DataBits, Parity, SerialPort, StopBits};
use tracing::info;

use super::{TriggerOutput, TriggerResult};

pub const DEFAULT_BAUDRATE: u32 = 115_200;

pub struct SerialHub {
    name: String,
    port: Box<dyn SerialPort>,
}

impl SerialHub {
    pub fn open(name: &str, baudrate: u32) -> TriggerResult<Self> {
        let port = serialport::new(name, baudrate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_secs(1))
            .open()?;
        info!("Opened serial trigger hub on {} at {} baud", name, baudrate);
        Ok(Self {
            name: name.to_string(),
            port,
        })
    }
}

impl TriggerOutput for SerialHub {
    fn write_code(&mut self, code: u8) -> TriggerResult<()> {
        self.port.write_all(&[code])?;
        self.port.flush()?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("serial hub {}", self.name)
    }
}
