//! Qualisys Track Manager real-time (RT) protocol client.
//!
//! Only the command surface a synchronized recording needs is implemented:
//! control handover, measurement lifecycle (new/start/stop/save/close),
//! event labels, capture settings over XML, and analog frame streaming.
//!
//! All packets on the little-endian port share one framing:
//!
//! ```text
//! | size: u32 (header included) | type: u32 | payload ... |
//! ```

pub mod connection;
pub mod frame;
pub mod packet;
pub mod settings;

pub use connection::{connect_with_retry, ConnectOptions, QtmConnection};
pub use frame::{AnalogDevice, DataFrame};
pub use packet::{Packet, PacketType};

use thiserror::Error;

/// Default RT port for little-endian clients.
pub const DEFAULT_PORT: u16 = 22223;

/// Protocol version requested when none is given.
pub const DEFAULT_VERSION: &str = "1.22";

/// Errors raised by the RT client.
#[derive(Error, Debug)]
pub enum QtmError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Malformed packet or frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// QTM answered a command with an error packet
    #[error("QTM rejected '{command}': {message}")]
    Command { command: String, message: String },

    /// QTM answered, but not with what the command expects
    #[error("Unexpected reply to '{command}': {reply}")]
    UnexpectedReply { command: String, reply: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Connection to QTM closed")]
    Disconnected,
}

pub type QtmResult<T> = Result<T, QtmError>;

/// Events QTM pushes to every connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QtmEvent {
    Connected,
    ConnectionClosed,
    CaptureStarted,
    CaptureStopped,
    CaptureFetchingFinished,
    CalibrationStarted,
    CalibrationStopped,
    RtFromFileStarted,
    RtFromFileStopped,
    WaitingForTrigger,
    CameraSettingsChanged,
    QtmShuttingDown,
    CaptureSaved,
    ReprocessingStarted,
    ReprocessingStopped,
    Trigger,
}

impl QtmEvent {
    pub fn from_byte(value: u8) -> Option<Self> {
        let event = match value {
            1 => Self::Connected,
            2 => Self::ConnectionClosed,
            3 => Self::CaptureStarted,
            4 => Self::CaptureStopped,
            5 => Self::CaptureFetchingFinished,
            6 => Self::CalibrationStarted,
            7 => Self::CalibrationStopped,
            8 => Self::RtFromFileStarted,
            9 => Self::RtFromFileStopped,
            10 => Self::WaitingForTrigger,
            11 => Self::CameraSettingsChanged,
            12 => Self::QtmShuttingDown,
            13 => Self::CaptureSaved,
            14 => Self::ReprocessingStarted,
            15 => Self::ReprocessingStopped,
            16 => Self::Trigger,
            _ => return None,
        };
        Some(event)
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Connected => 1,
            Self::ConnectionClosed => 2,
            Self::CaptureStarted => 3,
            Self::CaptureStopped => 4,
            Self::CaptureFetchingFinished => 5,
            Self::CalibrationStarted => 6,
            Self::CalibrationStopped => 7,
            Self::RtFromFileStarted => 8,
            Self::RtFromFileStopped => 9,
            Self::WaitingForTrigger => 10,
            Self::CameraSettingsChanged => 11,
            Self::QtmShuttingDown => 12,
            Self::CaptureSaved => 13,
            Self::ReprocessingStarted => 14,
            Self::ReprocessingStopped => 15,
            Self::Trigger => 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_bytes_match_protocol_numbering() {
        assert_eq!(QtmEvent::from_byte(3), Some(QtmEvent::CaptureStarted));
        assert_eq!(QtmEvent::from_byte(4), Some(QtmEvent::CaptureStopped));
        assert_eq!(QtmEvent::CaptureSaved.as_byte(), 13);
        assert_eq!(QtmEvent::from_byte(0), None);
        assert_eq!(QtmEvent::from_byte(200), None);
    }

    #[test]
    fn test_event_byte_conversion_is_consistent() {
        for byte in 1..=16u8 {
            let event = QtmEvent::from_byte(byte).unwrap();
            assert_eq!(event.as_byte(), byte);
        }
    }
}
