//! The synchronized recording procedure.
//!
//! One session is strictly sequential: clear QTM, arm a new measurement with the
//! requested capture time, start it, fire `TaskStart`, wait, fire `TaskEnd`,
//! stop and save. Each marker goes to QTM and to the trigger hub at the same
//! time. Gait detection, when enabled, runs in its own task on the analog
//! stream and only pulses the hub.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::gait::{GaitCodes, GaitConfig, GaitDetector};
use crate::markers::{ChannelOutcome, MarkerLog, MarkerRecord};
use crate::qtm::{ConnectOptions, DataFrame, QtmConnection, QtmError, QtmEvent, connect_with_retry, settings};
use crate::trigger::{Pulser, TriggerConfig};

pub const TASK_START: &str = "TaskStart";
pub const TASK_END: &str = "TaskEnd";

/// `TaskEnd` is sent this long before the capture time runs out.
const END_MARGIN: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GaitSettings {
    pub detector: GaitConfig,
    pub codes: GaitCodes,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub version: String,
    #[serde(skip)]
    pub password: String,
    /// Capture time in seconds
    pub duration: f64,
    /// Where QTM saves the recording
    pub output: PathBuf,
    pub start_code: u8,
    pub end_code: u8,
    /// `None` when hardware triggers are disabled
    pub triggers: Option<TriggerConfig>,
    pub gait: Option<GaitSettings>,
    /// How long to wait for QTM's measurement events
    #[serde(skip)]
    pub event_timeout: Duration,
}

impl SessionConfig {
    pub fn new(output: impl Into<PathBuf>, duration: f64) -> Self {
        let defaults = ConnectOptions::default();
        Self {
            host: defaults.host,
            port: defaults.port,
            version: defaults.version,
            password: String::new(),
            duration,
            output: output.into(),
            start_code: 1,
            end_code: 2,
            triggers: None,
            gait: None,
            event_timeout: Duration::from_secs(5),
        }
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            host: self.host.clone(),
            port: self.port,
            version: self.version.clone(),
            ..Default::default()
        }
    }

    /// Time between `TaskStart` and `TaskEnd`.
    pub fn marker_gap(&self) -> Duration {
        Duration::from_secs_f64(self.duration.max(0.0))
            .saturating_sub(END_MARGIN)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.duration.is_finite() || self.duration <= 0.0 {
            bail!("Duration must be a positive number of seconds, got {}", self.duration);
        }
        if self.triggers.is_some() && (self.start_code == 0 || self.end_code == 0) {
            bail!("Trigger codes must be 1-255");
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct SessionOutcome {
    pub output: PathBuf,
    /// QTM's reply to the save command
    pub save_reply: String,
    /// Capture time QTM reports after the settings were applied
    pub capture_time: Option<f64>,
    pub log: MarkerLog,
}

/// Run one recording. `pulser` must be `Some` exactly when
/// `config.triggers` is set; without it only QTM markers are sent.
pub async fn run_session(config: &SessionConfig, pulser: Option<Pulser>) -> Result<SessionOutcome> {
    config.validate()?;
    if config.triggers.is_some() && pulser.is_none() {
        bail!("Hardware triggers are enabled but no trigger output was opened");
    }
    let pulser = if config.triggers.is_some() { pulser } else { None };

    let qtm = connect_with_retry(&config.connect_options())
        .await
        .with_context(|| format!("Failed to connect to QTM at {}:{}", config.host, config.port))?;
    info!("Connected to QTM");

    qtm.take_control(&config.password)
        .await
        .context("Failed to take control of QTM")?;

    let result = record(&qtm, config, pulser).await;

    if let Err(e) = qtm.close_measurement().await {
        warn!("Close failed: {}", e);
    }
    if let Err(e) = qtm.release_control().await {
        warn!("ReleaseControl failed: {}", e);
    }
    if let Err(e) = qtm.disconnect().await {
        debug!("Disconnect: {}", e);
    }
    info!("Session closed");

    result
}

async fn record(qtm: &QtmConnection, config: &SessionConfig, pulser: Option<Pulser>) -> Result<SessionOutcome> {
    // Leftovers from a previous session
    for (name, result) in [
        ("Stop", qtm.stop().await),
        ("Close", qtm.close_measurement().await),
    ] {
        if let Err(e) = result {
            debug!("Ignoring {} failure while clearing: {}", name, e);
        }
    }
    info!("Control taken; cleared previous session");

    let xml = settings::capture_time_xml(config.duration)?;
    arm_measurement(qtm, &xml, config.event_timeout).await?;
    info!("Capture_Time set to {}s", config.duration);

    let capture_time = match qtm.get_parameters(&["General"]).await {
        Ok(parameters) => settings::parse_capture_time(&parameters),
        Err(e) => {
            warn!("Could not read back capture settings: {}", e);
            None
        }
    };
    if let Some(seconds) = capture_time
        && (seconds - config.duration).abs() > 1e-3
    {
        warn!("QTM reports a capture time of {}s instead of {}s", seconds, config.duration);
    }

    start_capture(qtm, &xml, config.event_timeout).await?;

    // Once started, the capture is stopped whatever happens in between
    let captured = capture(qtm, config, pulser).await;
    let stopped = stop_capture(qtm, config.event_timeout).await;
    let log = match captured {
        Ok(log) => {
            stopped?;
            log
        }
        Err(e) => {
            if let Err(stop_error) = stopped {
                warn!("{:#}", stop_error);
            }
            return Err(e);
        }
    };

    let filename = config.output.to_string_lossy();
    let save_reply = qtm
        .save(&filename, true)
        .await
        .with_context(|| format!("Failed to save the measurement as {}", filename))?;
    info!("Saved as '{}'", filename);

    Ok(SessionOutcome {
        output: config.output.clone(),
        save_reply,
        capture_time,
        log,
    })
}

/// Everything between `Start` and `Stop`: confirm the capture, fire the task
/// markers and collect gait events.
async fn capture(qtm: &QtmConnection, config: &SessionConfig, pulser: Option<Pulser>) -> Result<MarkerLog> {
    match qtm.await_event(Some(QtmEvent::CaptureStarted), config.event_timeout).await {
        Ok(_) => info!("Capture confirmed active"),
        Err(QtmError::Timeout(_)) => warn!("No CaptureStarted event; proceeding"),
        Err(e) => return Err(e).context("Lost QTM while waiting for the capture to start"),
    }

    let mut log = MarkerLog::new();
    log.mark_origin();

    let gait_task = match config.gait {
        Some(gait) => {
            let frames = qtm
                .stream_frames("AllFrames", &["Analog"])
                .await
                .context("Failed to start the analog stream")?;
            info!("Streaming analog frames for gait detection");
            Some(spawn_gait_task(frames, gait, pulser.clone(), log.origin()))
        }
        None => None,
    };

    fire_marker(qtm, pulser.as_ref(), TASK_START, config.start_code, &mut log).await;

    tokio::time::sleep(config.marker_gap()).await;

    fire_marker(qtm, pulser.as_ref(), TASK_END, config.end_code, &mut log).await;

    if let Some(task) = gait_task {
        if let Err(e) = qtm.stream_frames_stop().await {
            warn!("StreamFrames Stop failed: {}", e);
        }
        match task.await {
            Ok(records) => {
                info!("Detected {} gait events", records.len());
                log.extend(records);
            }
            Err(e) => warn!("Gait detection task failed: {}", e),
        }
    }

    Ok(log)
}

/// `Stop` and wait for `CaptureStopped`; a missing event is tolerated.
async fn stop_capture(qtm: &QtmConnection, event_timeout: Duration) -> Result<()> {
    qtm.stop().await.context("Failed to stop the capture")?;
    match qtm.await_event(Some(QtmEvent::CaptureStopped), event_timeout).await {
        Ok(_) => info!("Capture stopped"),
        Err(QtmError::Timeout(_)) => warn!("No CaptureStopped event; proceeding"),
        Err(e) => return Err(e).context("Lost QTM while waiting for the capture to stop"),
    }
    Ok(())
}

/// `New`, give QTM a moment to settle (any event), then apply the settings.
async fn arm_measurement(qtm: &QtmConnection, xml: &str, event_timeout: Duration) -> Result<()> {
    qtm.new_measurement()
        .await
        .context("Failed to create a new measurement")?;
    match qtm.await_event(None, event_timeout).await {
        Ok(event) => debug!(?event, "Measurement ready"),
        Err(QtmError::Timeout(_)) => debug!("No event after New"),
        Err(e) => return Err(e).context("Lost QTM after New"),
    }
    qtm.send_xml(xml)
        .await
        .context("Failed to apply capture settings")?;
    Ok(())
}

/// `Start`, re-arming once if QTM rejects it.
async fn start_capture(qtm: &QtmConnection, xml: &str, event_timeout: Duration) -> Result<()> {
    match qtm.start().await {
        Ok(()) => return Ok(()),
        Err(QtmError::Command { message, .. }) => {
            warn!("Start failed ({}); retrying [1/2]", message);
        }
        Err(e) => return Err(e).context("Failed to start the capture"),
    }

    arm_measurement(qtm, xml, event_timeout).await?;
    qtm.start()
        .await
        .context("Could not start capture after retrying")
}

/// Send one marker to QTM and, when enabled, the trigger hub, concurrently.
/// A failed channel is logged and recorded; the session carries on.
async fn fire_marker(
    qtm: &QtmConnection,
    pulser: Option<&Pulser>,
    label: &str,
    code: u8,
    log: &mut MarkerLog,
) {
    let sent_at = Instant::now();
    let pulse = async {
        match pulser {
            Some(p) => Some(p.pulse(code).await),
            None => None,
        }
    };
    let (event, pulse) = tokio::join!(qtm.set_qtm_event(label), pulse);

    let qtm_ok = match event {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to set QTM event {}: {}", label, e);
            false
        }
    };

    let (trigger, onset) = match pulse {
        None => (None, sent_at),
        Some(Ok(report)) => (Some(true), report.onset),
        Some(Err(e)) => {
            warn!("Failed to pulse code {} for {}: {}", code, label, e);
            (Some(false), sent_at)
        }
    };

    match trigger {
        Some(_) => info!("Sent {} / code {}", label, code),
        None => info!("Sent {}", label),
    }

    log.record(
        label,
        trigger.map(|_| code),
        onset,
        ChannelOutcome {
            qtm: Some(qtm_ok),
            trigger,
        },
    );
}

/// Consume analog frames until the stream closes, pulsing a code for every
/// detected gait event.
fn spawn_gait_task(
    mut frames: mpsc::Receiver<DataFrame>,
    gait: GaitSettings,
    pulser: Option<Pulser>,
    origin: Instant,
) -> JoinHandle<Vec<MarkerRecord>> {
    tokio::spawn(async move {
        let mut detector = GaitDetector::new(gait.detector);
        let mut records = Vec::new();

        while let Some(frame) = frames.recv().await {
            for event in detector.push_frame(&frame) {
                let code = gait.codes.code_for(event);
                let detected_at = Instant::now();

                let (trigger, onset) = match pulser {
                    Some(ref p) => match p.pulse(code).await {
                        Ok(report) => (Some(true), report.onset),
                        Err(e) => {
                            warn!("Failed to pulse {} code {}: {}", event.label(), code, e);
                            (Some(false), detected_at)
                        }
                    },
                    None => (None, detected_at),
                };
                debug!("Gait event {} in frame {}", event.label(), frame.frame_number);

                records.push(MarkerRecord {
                    label: event.label().to_string(),
                    code: trigger.map(|_| code),
                    onset: onset.saturating_duration_since(origin).as_secs_f64(),
                    channels: ChannelOutcome { qtm: None, trigger },
                });
            }
        }

        records
    })
}
