//! In-memory output that records every code written.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::{TriggerOutput, TriggerResult};

/// Clones share the same record, so a test can keep one handle while the
/// pulser owns the other.
#[derive(Clone, Default)]
pub struct MemoryOutput {
    writes: Arc<Mutex<Vec<(u8, Instant)>>>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<(u8, Instant)> {
        self.writes
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }

    pub fn codes(&self) -> Vec<u8> {
        self.writes().into_iter().map(|(code, _)| code).collect()
    }

    /// Non-zero codes only, i.e. the pulses that went out.
    pub fn pulses(&self) -> Vec<u8> {
        self.codes().into_iter().filter(|&c| c != 0).collect()
    }
}

impl TriggerOutput for MemoryOutput {
    fn write_code(&mut self, code: u8) -> TriggerResult<()> {
        let mut writes = self.writes.lock().unwrap_or_else(|p| p.into_inner());
        writes.push((code, Instant::now()));
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
