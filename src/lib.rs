//! triggersync - Synchronized trigger pulses and Qualisys QTM event markers
//!
//! This crate drives a recording session in which every task marker is emitted
//! through two independent timing channels at the same instant:
//!
//! - a hardware pulse on a trigger hub (parallel port data register or a serial
//!   trigger hub), which the EEG amplifier records, and
//! - a software event inserted into the running Qualisys Track Manager (QTM)
//!   capture over the QTM real-time (RT) protocol.
//!
//! The resulting `.qtm` measurement is saved under a BIDS directory layout, with
//! an `events.tsv` marker log and a JSON sidecar next to it.
//!
//! # Command-Line Tools
//!
//! - `triggersync` - Terminal setup form that launches a recording session
//! - `triggersync-record` - Synchronized QTM recording with start/end markers
//! - `triggersync-pulse` - Send a single trigger code to check hub wiring
//!
//! # Quick Start
//!
//! ```bash
//! # QTM markers only
//! triggersync-record --subject 01 --bids-root ./bids --duration 60
//!
//! # QTM markers plus parallel port pulses at 0x4000
//! triggersync-record --subject 01 --bids-root ./bids --triggers --address 0x4000
//!
//! # Serial trigger hub with online gait-event pulses
//! triggersync-record --subject 01 --bids-root ./bids --triggers \
//!   --backend serial --serial-port /dev/ttyUSB0 --gait
//! ```
//!
//! # Output Layout
//!
//! ```text
//! bids/
//! └── sub-01/
//!     └── ses-01/
//!         ├── sub-01_ses-01_task-walking_qtm.qtm
//!         ├── sub-01_ses-01_task-walking_events.tsv
//!         └── sub-01_ses-01_task-walking_qtm.json
//! ```
//!
//! # Library Usage
//!
//! - [`qtm`] - QTM RT protocol client
//! - [`trigger`] - Trigger outputs and pulse shaping
//! - [`bids`] - BIDS path construction and session numbering
//! - [`gait`] - Online heel-strike / toe-off detection
//! - [`markers`] - Marker log and sidecar files
//! - [`session`] - The synchronized recording procedure
//! - [`cli`] - Command-line argument definitions
//!
//! # License
//!
//! This project is licensed under the GNU General Public License v3.0.

pub mod bids;
pub mod cli;
pub mod gait;
pub mod logging;
pub mod markers;
pub mod qtm;
pub mod session;
pub mod trigger;

use chrono::Datelike;

/// Display GPL license notice for a program
pub fn display_license_notice(program_name: &str) {
    let version = env!("CARGO_PKG_VERSION");
    let years = copyright_years(chrono::Utc::now().year());

    println!("{} {} Copyright (C) {} triggersync contributors", program_name, version, years);
    println!("This program comes with ABSOLUTELY NO WARRANTY.");
    println!("For details see https://www.gnu.org/licenses/gpl-3.0.html#license-text.");
    println!("This is free software, and you are welcome to redistribute it under certain conditions.");
    println!();
}

fn copyright_years(current_year: i32) -> String {
    if current_year <= 2025 {
        "2025".to_string()
    } else {
        format!("2025-{}", current_year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copyright_years() {
        assert_eq!(copyright_years(2025), "2025");
        assert_eq!(copyright_years(2027), "2025-2027");
    }
}
