//! RT packet framing.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{QtmError, QtmResult};

pub const HEADER_SIZE: usize = 8;

/// Upper bound on a single packet; anything larger is treated as a framing error.
pub const MAX_PACKET_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Error,
    Command,
    Xml,
    Data,
    NoMoreData,
    C3dFile,
    Event,
    Discover,
    QtmFile,
    None,
}

impl PacketType {
    pub fn from_u32(value: u32) -> Option<Self> {
        let kind = match value {
            0 => Self::Error,
            1 => Self::Command,
            2 => Self::Xml,
            3 => Self::Data,
            4 => Self::NoMoreData,
            5 => Self::C3dFile,
            6 => Self::Event,
            7 => Self::Discover,
            8 => Self::QtmFile,
            9 => Self::None,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Error => 0,
            Self::Command => 1,
            Self::Xml => 2,
            Self::Data => 3,
            Self::NoMoreData => 4,
            Self::C3dFile => 5,
            Self::Event => 6,
            Self::Discover => 7,
            Self::QtmFile => 8,
            Self::None => 9,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub kind: PacketType,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(kind: PacketType, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    /// Command packet; the string is sent NUL terminated.
    pub fn command(text: &str) -> Self {
        Self::new(PacketType::Command, nul_terminated(text))
    }

    pub fn xml(text: &str) -> Self {
        Self::new(PacketType::Xml, nul_terminated(text))
    }

    pub fn event(byte: u8) -> Self {
        Self::new(PacketType::Event, vec![byte])
    }

    /// Payload as text with trailing NULs removed.
    pub fn text(&self) -> String {
        let end = self
            .payload
            .iter()
            .rposition(|&b| b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        String::from_utf8_lossy(&self.payload[..end]).to_string()
    }

    pub fn encode(&self) -> Vec<u8> {
        let size = (HEADER_SIZE + self.payload.len()) as u32;
        let mut buf = Vec::with_capacity(size as usize);
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&self.kind.as_u32().to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }
}

fn nul_terminated(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len() + 1);
    bytes.extend_from_slice(text.as_bytes());
    bytes.push(0);
    bytes
}

/// Read one packet. A clean EOF before the header maps to [`QtmError::Disconnected`].
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> QtmResult<Packet> {
    let mut header = [0u8; HEADER_SIZE];
    if let Err(e) = reader.read_exact(&mut header).await {
        return Err(if e.kind() == std::io::ErrorKind::UnexpectedEof {
            QtmError::Disconnected
        } else {
            QtmError::Io(e)
        });
    }

    let size = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let raw_kind = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    if !(HEADER_SIZE..=MAX_PACKET_SIZE).contains(&size) {
        return Err(QtmError::Protocol(format!("invalid packet size {}", size)));
    }
    let kind = PacketType::from_u32(raw_kind)
        .ok_or_else(|| QtmError::Protocol(format!("unknown packet type {}", raw_kind)))?;

    let mut payload = vec![0u8; size - HEADER_SIZE];
    reader.read_exact(&mut payload).await?;

    Ok(Packet { kind, payload })
}

pub async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, packet: &Packet) -> QtmResult<()> {
    writer.write_all(&packet.encode()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_encoding() {
        let bytes = Packet::command("Start").encode();
        assert_eq!(&bytes[0..4], &14u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8..], b"Start\0");
    }

    #[test]
    fn test_text_strips_trailing_nul() {
        let packet = Packet::new(PacketType::Command, b"Event set\0\0".to_vec());
        assert_eq!(packet.text(), "Event set");
        assert_eq!(Packet::new(PacketType::Command, vec![]).text(), "");
    }

    #[tokio::test]
    async fn test_read_back_to_back_packets() {
        let mut stream = Packet::command("QTM RT Interface connected").encode();
        stream.extend(Packet::event(3).encode());
        let mut reader = stream.as_slice();

        let first = read_packet(&mut reader).await.unwrap();
        assert_eq!(first.kind, PacketType::Command);
        assert_eq!(first.text(), "QTM RT Interface connected");

        let second = read_packet(&mut reader).await.unwrap();
        assert_eq!(second.kind, PacketType::Event);
        assert_eq!(second.payload, vec![3]);

        assert!(matches!(read_packet(&mut reader).await, Err(QtmError::Disconnected)));
    }

    #[tokio::test]
    async fn test_rejects_undersized_header() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        let mut reader = bytes.as_slice();
        assert!(matches!(read_packet(&mut reader).await, Err(QtmError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_rejects_unknown_type() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&8u32.to_le_bytes());
        bytes.extend_from_slice(&42u32.to_le_bytes());
        let mut reader = bytes.as_slice();
        assert!(matches!(read_packet(&mut reader).await, Err(QtmError::Protocol(_))));
    }
}
