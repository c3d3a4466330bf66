//! Online gait-event detection from force-plate analog channels.
//!
//! Two plates are laid out one after the other on the walkway. A heel strike is
//! the front plate's vertical force rising through the threshold; a toe off is
//! the back plate's force dropping below it. Sides alternate with each heel
//! strike, starting from a configurable side.

use serde::Serialize;

use crate::qtm::DataFrame;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GaitConfig {
    /// Front plate Fz, 0-based index into the concatenated analog channels
    pub front_channel: usize,
    /// Back plate Fz, 0-based index into the concatenated analog channels
    pub back_channel: usize,
    /// Contact threshold in newtons
    pub threshold: f32,
    pub first_strike_is_right: bool,
}

impl Default for GaitConfig {
    fn default() -> Self {
        Self {
            front_channel: 2,
            back_channel: 8,
            threshold: 20.0,
            first_strike_is_right: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GaitEvent {
    RightHeelStrike,
    RightToeOff,
    LeftHeelStrike,
    LeftToeOff,
}

impl GaitEvent {
    pub fn label(self) -> &'static str {
        match self {
            GaitEvent::RightHeelStrike => "RHS",
            GaitEvent::RightToeOff => "RTO",
            GaitEvent::LeftHeelStrike => "LHS",
            GaitEvent::LeftToeOff => "LTO",
        }
    }
}

/// Trigger code sent for each gait event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GaitCodes {
    pub right_heel_strike: u8,
    pub right_toe_off: u8,
    pub left_heel_strike: u8,
    pub left_toe_off: u8,
}

impl Default for GaitCodes {
    fn default() -> Self {
        Self {
            right_heel_strike: 4,
            right_toe_off: 5,
            left_heel_strike: 6,
            left_toe_off: 7,
        }
    }
}

impl GaitCodes {
    pub fn code_for(&self, event: GaitEvent) -> u8 {
        match event {
            GaitEvent::RightHeelStrike => self.right_heel_strike,
            GaitEvent::RightToeOff => self.right_toe_off,
            GaitEvent::LeftHeelStrike => self.left_heel_strike,
            GaitEvent::LeftToeOff => self.left_toe_off,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GaitDetector {
    config: GaitConfig,
    front_loaded: bool,
    back_loaded: bool,
    strikes: u64,
}

impl GaitDetector {
    pub fn new(config: GaitConfig) -> Self {
        Self {
            config,
            front_loaded: false,
            back_loaded: false,
            strikes: 0,
        }
    }

    pub fn strike_count(&self) -> u64 {
        self.strikes
    }

    fn current_side_is_right(&self) -> bool {
        (self.strikes % 2 == 1) == self.config.first_strike_is_right
    }

    /// Feed one sample row. Channels that are missing from the row leave their
    /// plate's state untouched.
    pub fn push_sample(&mut self, row: &[Option<f32>]) -> Vec<GaitEvent> {
        let mut events = Vec::new();
        let threshold = self.config.threshold;

        if let Some(Some(fz)) = row.get(self.config.front_channel) {
            let loaded = *fz >= threshold;
            if loaded && !self.front_loaded {
                self.strikes += 1;
                events.push(if self.current_side_is_right() {
                    GaitEvent::RightHeelStrike
                } else {
                    GaitEvent::LeftHeelStrike
                });
            }
            self.front_loaded = loaded;
        }

        if let Some(Some(fz)) = row.get(self.config.back_channel) {
            let loaded = *fz >= threshold;
            if !loaded && self.back_loaded {
                events.push(if self.current_side_is_right() {
                    GaitEvent::RightToeOff
                } else {
                    GaitEvent::LeftToeOff
                });
            }
            self.back_loaded = loaded;
        }

        events
    }

    pub fn push_frame(&mut self, frame: &DataFrame) -> Vec<GaitEvent> {
        frame
            .analog_rows()
            .iter()
            .flat_map(|row| self.push_sample(row))
            .collect()
    }
}
