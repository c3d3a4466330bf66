//! Data packet decoding. Only the analog component is decoded; every other
//! component is skipped using its size field.

use super::{QtmError, QtmResult};

/// Component type id of plain analog data.
pub const COMPONENT_ANALOG: u32 = 3;

/// Component header: size and type, both u32.
const COMPONENT_HEADER_SIZE: usize = 8;

/// One analog board's samples from a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalogDevice {
    pub device_id: u32,
    pub channel_count: usize,
    pub sample_count: usize,
    /// Sample number of the first sample, absent when the frame carries no samples.
    pub first_sample: Option<u32>,
    /// Channel-major values: `data[channel * sample_count + sample]`.
    pub data: Vec<f32>,
}

impl AnalogDevice {
    pub fn value(&self, channel: usize, sample: usize) -> Option<f32> {
        if channel >= self.channel_count || sample >= self.sample_count {
            return None;
        }
        self.data.get(channel * self.sample_count + sample).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    pub timestamp_us: u64,
    pub frame_number: u32,
    pub analog: Vec<AnalogDevice>,
}

impl DataFrame {
    /// Sample rows across all analog devices, channels concatenated in device order.
    ///
    /// A device with fewer samples than the longest one contributes `None` for the
    /// missing rows.
    pub fn analog_rows(&self) -> Vec<Vec<Option<f32>>> {
        let rows = self.analog.iter().map(|d| d.sample_count).max().unwrap_or(0);
        (0..rows)
            .map(|sample| {
                self.analog
                    .iter()
                    .flat_map(|device| {
                        (0..device.channel_count).map(move |channel| device.value(channel, sample))
                    })
                    .collect()
            })
            .collect()
    }

    pub fn parse(payload: &[u8]) -> QtmResult<Self> {
        let mut cursor = Cursor::new(payload);
        let timestamp_us = cursor.u64()?;
        let frame_number = cursor.u32()?;
        let component_count = cursor.u32()?;

        let mut analog = Vec::new();
        for _ in 0..component_count {
            let size = cursor.u32()? as usize;
            let kind = cursor.u32()?;
            if size < COMPONENT_HEADER_SIZE {
                return Err(QtmError::Protocol(format!("component size {} too small", size)));
            }
            let body = cursor.take(size - COMPONENT_HEADER_SIZE)?;
            if kind == COMPONENT_ANALOG {
                analog.extend(parse_analog(body)?);
            }
        }

        Ok(Self {
            timestamp_us,
            frame_number,
            analog,
        })
    }
}

fn parse_analog(body: &[u8]) -> QtmResult<Vec<AnalogDevice>> {
    let mut cursor = Cursor::new(body);
    let device_count = cursor.u32()?;
    let mut devices = Vec::with_capacity(device_count as usize);

    for _ in 0..device_count {
        let device_id = cursor.u32()?;
        let channel_count = cursor.u32()? as usize;
        let sample_count = cursor.u32()? as usize;
        let first_sample = if sample_count > 0 {
            Some(cursor.u32()?)
        } else {
            None
        };

        let values = channel_count
            .checked_mul(sample_count)
            .ok_or_else(|| QtmError::Protocol("analog device size overflow".to_string()))?;
        let mut data = Vec::with_capacity(values);
        for _ in 0..values {
            data.push(cursor.f32()?);
        }

        devices.push(AnalogDevice {
            device_id,
            channel_count,
            sample_count,
            first_sample,
            data,
        });
    }

    Ok(devices)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> QtmResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                QtmError::Protocol(format!(
                    "frame truncated: need {} bytes at offset {}, have {}",
                    len,
                    self.pos,
                    self.buf.len()
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> QtmResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> QtmResult<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    fn f32(&mut self) -> QtmResult<f32> {
        Ok(f32::from_bits(self.u32()?))
    }
}
