//! Log of every marker sent during a session, written as a BIDS `events.tsv`
//! and a JSON sidecar.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which channels a marker went out on, and whether each succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelOutcome {
    /// `None` when the marker was not sent to QTM
    pub qtm: Option<bool>,
    /// `None` when hardware triggers are disabled
    pub trigger: Option<bool>,
}

impl ChannelOutcome {
    fn describe(&self) -> String {
        let mut channels = Vec::new();
        for (name, state) in [("qtm", self.qtm), ("trigger", self.trigger)] {
            match state {
                Some(true) => channels.push(name.to_string()),
                Some(false) => channels.push(format!("{}(failed)", name)),
                None => {}
            }
        }
        if channels.is_empty() {
            "none".to_string()
        } else {
            channels.join("+")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerRecord {
    pub label: String,
    pub code: Option<u8>,
    /// Seconds since the capture start was confirmed
    pub onset: f64,
    pub channels: ChannelOutcome,
}

#[derive(Debug, Clone)]
pub struct MarkerLog {
    origin: Instant,
    started_at: DateTime<Utc>,
    records: Vec<MarkerRecord>,
}

impl Default for MarkerLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkerLog {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            started_at: Utc::now(),
            records: Vec::new(),
        }
    }

    /// Restart the onset clock, at capture start.
    pub fn mark_origin(&mut self) {
        self.origin = Instant::now();
        self.started_at = Utc::now();
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Seconds from the origin to `at`, 0 when `at` is earlier.
    pub fn onset_of(&self, at: Instant) -> f64 {
        at.saturating_duration_since(self.origin).as_secs_f64()
    }

    pub fn record(&mut self, label: &str, code: Option<u8>, at: Instant, channels: ChannelOutcome) {
        let onset = self.onset_of(at);
        self.records.push(MarkerRecord {
            label: label.to_string(),
            code,
            onset,
            channels,
        });
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = MarkerRecord>) {
        self.records.extend(records);
    }

    pub fn records(&self) -> &[MarkerRecord] {
        &self.records
    }

    /// Records sorted by onset as `events.tsv` content.
    pub fn to_tsv(&self) -> String {
        let mut records = self.records.clone();
        records.sort_by(|a, b| a.onset.total_cmp(&b.onset));

        let mut out = String::from("onset\tduration\ttrial_type\tvalue\tchannel\n");
        for r in &records {
            let value = r.code.map(|c| c.to_string()).unwrap_or_else(|| "n/a".to_string());
            let _ = writeln!(
                out,
                "{:.6}\t0\t{}\t{}\t{}",
                r.onset,
                r.label,
                value,
                r.channels.describe()
            );
        }
        out
    }

    pub fn write_tsv(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_tsv())
            .with_context(|| format!("Failed to write marker log {}", path.display()))
    }
}

/// `events.tsv` and `_qtm.json` paths next to a recording. For
/// `sub-01_ses-01_qtm.qtm` these are `sub-01_ses-01_events.tsv` and
/// `sub-01_ses-01_qtm.json`.
pub fn sidecar_paths(recording: &Path) -> (PathBuf, PathBuf) {
    let stem = recording
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let entities = stem.strip_suffix("_qtm").unwrap_or(&stem);
    let dir = recording.parent().unwrap_or_else(|| Path::new(""));
    (
        dir.join(format!("{}_events.tsv", entities)),
        dir.join(format!("{}_qtm.json", entities)),
    )
}

/// Contents of the `_qtm.json` sidecar.
#[derive(Debug, Serialize)]
pub struct SessionSidecar<'a, C: Serialize> {
    pub session_uuid: String,
    pub recorded_at: String,
    pub acquisition_host: Option<String>,
    pub recorder_version: &'static str,
    pub recording: String,
    pub marker_count: usize,
    pub config: &'a C,
}

impl<'a, C: Serialize> SessionSidecar<'a, C> {
    pub fn new(config: &'a C, log: &MarkerLog, recording: &Path) -> Self {
        Self {
            session_uuid: uuid::Uuid::new_v4().to_string(),
            recorded_at: log.started_at().to_rfc3339(),
            acquisition_host: hostname::get()
                .ok()
                .map(|h| h.to_string_lossy().to_string()),
            recorder_version: env!("CARGO_PKG_VERSION"),
            recording: recording
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            marker_count: log.records().len(),
            config,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write sidecar {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const BOTH_OK: ChannelOutcome = ChannelOutcome {
        qtm: Some(true),
        trigger: Some(true),
    };

    #[test]
    fn test_tsv_sorted_by_onset() {
        let mut log = MarkerLog::new();
        let origin = log.origin();
        log.record("TaskEnd", Some(2), origin + Duration::from_millis(9500), BOTH_OK);
        log.record("TaskStart", Some(1), origin + Duration::from_millis(1), BOTH_OK);

        let tsv = log.to_tsv();
        let lines: Vec<&str> = tsv.lines().collect();
        assert_eq!(lines[0], "onset\tduration\ttrial_type\tvalue\tchannel");
        assert_eq!(lines[1], "0.001000\t0\tTaskStart\t1\tqtm+trigger");
        assert_eq!(lines[2], "9.500000\t0\tTaskEnd\t2\tqtm+trigger");
    }

    #[test]
    fn test_channel_description() {
        let qtm_only = ChannelOutcome { qtm: Some(true), trigger: None };
        let failed = ChannelOutcome { qtm: Some(true), trigger: Some(false) };
        let gait = ChannelOutcome { qtm: None, trigger: Some(true) };
        assert_eq!(qtm_only.describe(), "qtm");
        assert_eq!(failed.describe(), "qtm+trigger(failed)");
        assert_eq!(gait.describe(), "trigger");
    }

    #[test]
    fn test_marker_without_code_is_na() {
        let mut log = MarkerLog::new();
        let origin = log.origin();
        log.record("TaskStart", None, origin, ChannelOutcome { qtm: Some(true), trigger: None });
        assert!(log.to_tsv().contains("\tTaskStart\tn/a\tqtm\n"));
    }

    #[test]
    fn test_onset_before_origin_clamps_to_zero() {
        let log = MarkerLog::new();
        let earlier = log.origin().checked_sub(Duration::from_millis(5));
        if let Some(earlier) = earlier {
            assert_eq!(log.onset_of(earlier), 0.0);
        }
    }

    #[test]
    fn test_sidecar_paths_share_entities() {
        let (events, json) = sidecar_paths(Path::new("/data/sub-01/ses-01/sub-01_ses-01_task-walking_qtm.qtm"));
        assert_eq!(events, PathBuf::from("/data/sub-01/ses-01/sub-01_ses-01_task-walking_events.tsv"));
        assert_eq!(json, PathBuf::from("/data/sub-01/ses-01/sub-01_ses-01_task-walking_qtm.json"));

        let (events, json) = sidecar_paths(Path::new("capture.qtm"));
        assert_eq!(events, PathBuf::from("capture_events.tsv"));
        assert_eq!(json, PathBuf::from("capture_qtm.json"));
    }

    #[test]
    fn test_sidecar_serializes_config() {
        #[derive(Serialize)]
        struct Config {
            duration: f64,
        }
        let log = MarkerLog::new();
        let config = Config { duration: 10.0 };
        let recording = Path::new("/data/sub-01_ses-01_task-walking_qtm.qtm");
        let sidecar = SessionSidecar::new(&config, &log, recording);
        let json: serde_json::Value = serde_json::to_value(&sidecar).unwrap();
        assert_eq!(json["config"]["duration"], 10.0);
        assert_eq!(json["recording"], "sub-01_ses-01_task-walking_qtm.qtm");
        assert_eq!(json["marker_count"], 0);
    }
}
