//! End-to-end sessions against a scripted QTM RT server on localhost.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use triggersync::gait::{GaitCodes, GaitConfig};
use triggersync::qtm::packet::{read_packet, write_packet};
use triggersync::qtm::settings::parse_capture_time;
use triggersync::qtm::{Packet, PacketType};
use triggersync::session::{GaitSettings, SessionConfig, run_session};
use triggersync::trigger::{
    MemoryOutput, PulseShape, Pulser, TriggerBackend, TriggerConfig, TriggerError, TriggerOutput, TriggerResult,
};

const OUTPUT: &str = "/data/sub-01/ses-01/motion/sub-01_ses-01_task-walking_qtm.qtm";

#[derive(Clone, Default)]
struct FakeQtm {
    /// Answer the first `Start` with an error packet
    reject_first_start: bool,
    /// Answer every `Start` with an error packet
    reject_all_starts: bool,
    /// Answer `SetQTMEvent` with an error packet
    reject_event: bool,
    /// Never push `CaptureStarted` / `CaptureStopped`
    suppress_capture_events: bool,
    /// Follow the `Start` reply with a packet of unknown type
    corrupt_after_start: bool,
    /// Required `TakeControl` password, if any
    password: Option<String>,
    /// Data packet payloads sent right after `StreamFrames`
    frames: Vec<Vec<u8>>,
}

type CommandLog = Arc<Mutex<Vec<String>>>;

/// Serve one client; returns the port and the log of everything it received.
async fn spawn_fake_qtm(fake: FakeQtm) -> Result<(u16, CommandLog)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let log: CommandLog = Arc::new(Mutex::new(Vec::new()));
    let received = log.clone();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let (mut reader, mut writer) = stream.into_split();
        if write_packet(&mut writer, &Packet::command("QTM RT Interface connected"))
            .await
            .is_err()
        {
            return;
        }

        let mut capturing = false;
        let mut start_rejected = false;
        let mut capture_time = 0.0;

        while let Ok(packet) = read_packet(&mut reader).await {
            let text = packet.text();
            let mut replies = Vec::new();
            let mut corrupt = false;

            if packet.kind == PacketType::Xml {
                received.lock().unwrap().push(format!("XML {}", text));
                capture_time = parse_capture_time(&text).unwrap_or(capture_time);
                replies.push(Packet::command("Setting parameters succeeded"));
            } else {
                received.lock().unwrap().push(text.clone());
                let (verb, rest) = text.split_once(' ').unwrap_or((text.as_str(), ""));
                match verb {
                    "Version" => replies.push(Packet::command(&format!("Version set to {}", rest))),
                    "TakeControl" => match fake.password {
                        Some(ref p) if p != rest => {
                            replies.push(Packet::new(PacketType::Error, b"Wrong or missing password\0".to_vec()))
                        }
                        _ => replies.push(Packet::command("You are now master")),
                    },
                    "ReleaseControl" => replies.push(Packet::command("You are now a regular client")),
                    "New" => {
                        replies.push(Packet::command("Creating new connection"));
                        replies.push(Packet::event(1));
                    }
                    "Close" => replies.push(Packet::command("Closing connection")),
                    "Start" if fake.reject_all_starts || (fake.reject_first_start && !start_rejected) => {
                        start_rejected = true;
                        replies.push(Packet::new(PacketType::Error, b"Camera system not ready\0".to_vec()));
                    }
                    "Start" => {
                        capturing = true;
                        replies.push(Packet::command("Starting measurement"));
                        if fake.corrupt_after_start {
                            corrupt = true;
                        } else if !fake.suppress_capture_events {
                            replies.push(Packet::event(3));
                        }
                    }
                    "Stop" if capturing => {
                        capturing = false;
                        replies.push(Packet::command("Stopping measurement"));
                        if !fake.suppress_capture_events {
                            replies.push(Packet::event(4));
                        }
                    }
                    "Stop" => replies.push(Packet::new(PacketType::Error, b"Measurement is not running\0".to_vec())),
                    "SetQTMEvent" if fake.reject_event => {
                        replies.push(Packet::new(PacketType::Error, b"Event label not accepted\0".to_vec()))
                    }
                    "SetQTMEvent" => replies.push(Packet::command("Event set")),
                    "GetParameters" => replies.push(Packet::xml(&format!(
                        "<QTM_Parameters_Ver_1.22><General><Capture_Time>{:.3}</Capture_Time></General></QTM_Parameters_Ver_1.22>",
                        capture_time
                    ))),
                    "StreamFrames" if rest == "Stop" => {}
                    "StreamFrames" => {
                        for frame in &fake.frames {
                            replies.push(Packet::new(PacketType::Data, frame.clone()));
                        }
                    }
                    "Save" => replies.push(Packet::command("Measurement saved")),
                    _ => replies.push(Packet::new(PacketType::Error, b"Parse error\0".to_vec())),
                }
            }

            for reply in replies {
                if write_packet(&mut writer, &reply).await.is_err() {
                    return;
                }
            }
            if corrupt {
                // Header only, with a packet type the RT protocol does not define
                let mut raw = 8u32.to_le_bytes().to_vec();
                raw.extend_from_slice(&99u32.to_le_bytes());
                if writer.write_all(&raw).await.is_err() {
                    return;
                }
            }
        }
    });

    Ok((port, log))
}

fn config(port: u16) -> SessionConfig {
    let mut config = SessionConfig::new(OUTPUT, 0.6);
    config.port = port;
    config.event_timeout = Duration::from_secs(1);
    config
}

fn memory_pulser() -> (MemoryOutput, Pulser) {
    let output = MemoryOutput::new();
    let pulser = Pulser::new(Box::new(output.clone()), PulseShape::parallel(Duration::from_millis(1)));
    (output, pulser)
}

fn trigger_config() -> TriggerConfig {
    TriggerConfig {
        backend: TriggerBackend::Parallel,
        address: 0x4000,
        serial_port: "COM6".to_string(),
        baudrate: 115_200,
        shape: PulseShape::parallel(Duration::from_millis(1)),
    }
}

/// One analog device, channel-major samples.
fn analog_frame(frame_number: u32, channels: &[&[f32]]) -> Vec<u8> {
    let samples = channels.first().map(|c| c.len()).unwrap_or(0) as u32;

    let mut body = Vec::new();
    body.extend_from_slice(&1u32.to_le_bytes());
    body.extend_from_slice(&1u32.to_le_bytes());
    body.extend_from_slice(&(channels.len() as u32).to_le_bytes());
    body.extend_from_slice(&samples.to_le_bytes());
    body.extend_from_slice(&(frame_number * samples).to_le_bytes());
    for channel in channels {
        for value in channel.iter() {
            body.extend_from_slice(&value.to_le_bytes());
        }
    }

    let mut payload = Vec::new();
    payload.extend_from_slice(&(u64::from(frame_number) * 10_000).to_le_bytes());
    payload.extend_from_slice(&frame_number.to_le_bytes());
    payload.extend_from_slice(&1u32.to_le_bytes());
    payload.extend_from_slice(&((body.len() + 8) as u32).to_le_bytes());
    payload.extend_from_slice(&3u32.to_le_bytes());
    payload.extend(body);
    payload
}

/// Trigger hub whose every write fails, as when the cable is pulled.
struct UnpluggedOutput;

impl TriggerOutput for UnpluggedOutput {
    fn write_code(&mut self, _code: u8) -> TriggerResult<()> {
        Err(TriggerError::Io(std::io::Error::other("device disconnected")))
    }

    fn describe(&self) -> String {
        "unplugged hub".to_string()
    }
}

fn position(commands: &[String], wanted: &str) -> usize {
    commands
        .iter()
        .position(|c| c == wanted)
        .unwrap_or_else(|| panic!("'{}' not sent; got {:?}", wanted, commands))
}

#[tokio::test]
async fn test_session_sends_markers_on_both_channels() -> Result<()> {
    let (port, commands) = spawn_fake_qtm(FakeQtm::default()).await?;
    let (output, pulser) = memory_pulser();
    let mut config = config(port);
    config.triggers = Some(trigger_config());

    let outcome = run_session(&config, Some(pulser)).await?;

    assert_eq!(output.pulses(), vec![1, 2]);
    assert_eq!(output.codes().last(), Some(&0));
    assert_eq!(outcome.save_reply, "Measurement saved");
    assert_eq!(outcome.capture_time, Some(0.6));

    let records = outcome.log.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].label, "TaskStart");
    assert_eq!(records[0].code, Some(1));
    assert_eq!(records[0].channels.qtm, Some(true));
    assert_eq!(records[0].channels.trigger, Some(true));
    assert_eq!(records[1].label, "TaskEnd");
    assert!(records[1].onset - records[0].onset >= 0.09);

    let commands = commands.lock().unwrap().clone();
    assert_eq!(commands[0], "Version 1.22");
    assert_eq!(commands[1], "TakeControl");
    assert!(commands.contains(&"XML <QTM_Settings><General><Capture_Time>0.600</Capture_Time></General></QTM_Settings>".to_string()));

    let start = position(&commands, "Start");
    let task_start = position(&commands, "SetQTMEvent TaskStart");
    let task_end = position(&commands, "SetQTMEvent TaskEnd");
    let save = position(&commands, &format!("Save {} Overwrite", OUTPUT));
    assert!(start < task_start && task_start < task_end && task_end < save);
    assert_eq!(commands.last().map(String::as_str), Some("ReleaseControl"));

    let tsv = outcome.log.to_tsv();
    assert!(tsv.contains("\t0\tTaskStart\t1\tqtm+trigger"));
    Ok(())
}

#[tokio::test]
async fn test_session_without_triggers_only_marks_qtm() -> Result<()> {
    let (port, commands) = spawn_fake_qtm(FakeQtm::default()).await?;
    let (output, pulser) = memory_pulser();

    // Triggers disabled: the pulser is ignored
    let outcome = run_session(&config(port), Some(pulser)).await?;

    assert!(output.codes().is_empty());
    let records = outcome.log.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.code.is_none() && r.channels.trigger.is_none()));
    assert!(outcome.log.to_tsv().contains("\tTaskEnd\tn/a\tqtm"));

    let commands = commands.lock().unwrap().clone();
    assert!(commands.contains(&"SetQTMEvent TaskStart".to_string()));
    assert!(commands.contains(&"SetQTMEvent TaskEnd".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_rejected_start_rearms_and_retries_once() -> Result<()> {
    let fake = FakeQtm {
        reject_first_start: true,
        ..Default::default()
    };
    let (port, commands) = spawn_fake_qtm(fake).await?;

    run_session(&config(port), None).await?;

    let commands = commands.lock().unwrap().clone();
    let starts = commands.iter().filter(|c| *c == "Start").count();
    let news = commands.iter().filter(|c| *c == "New").count();
    assert_eq!(starts, 2);
    assert_eq!(news, 2);
    Ok(())
}

#[tokio::test]
async fn test_wrong_password_fails_before_recording() -> Result<()> {
    let fake = FakeQtm {
        password: Some("gait-lab".to_string()),
        ..Default::default()
    };
    let (port, commands) = spawn_fake_qtm(fake).await?;
    let mut config = config(port);
    config.password = "wrong".to_string();

    let err = run_session(&config, None).await.unwrap_err();
    assert!(err.to_string().contains("take control"));

    let commands = commands.lock().unwrap().clone();
    assert!(!commands.contains(&"New".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_triggers_enabled_without_output_is_rejected() {
    let mut config = config(1);
    config.triggers = Some(trigger_config());
    assert!(run_session(&config, None).await.is_err());
}

#[tokio::test]
async fn test_gait_events_are_pulsed_from_analog_stream() -> Result<()> {
    // Channel 0 is the front plate, channel 1 the back plate
    let fake = FakeQtm {
        frames: vec![
            analog_frame(1, &[&[0.0, 50.0, 50.0, 50.0], &[50.0, 50.0, 0.0, 0.0]]),
            analog_frame(2, &[&[0.0, 60.0], &[60.0, 0.0]]),
        ],
        ..Default::default()
    };
    let (port, commands) = spawn_fake_qtm(fake).await?;
    let (output, pulser) = memory_pulser();

    let mut config = config(port);
    config.triggers = Some(trigger_config());
    config.gait = Some(GaitSettings {
        detector: GaitConfig {
            front_channel: 0,
            back_channel: 1,
            threshold: 20.0,
            first_strike_is_right: true,
        },
        codes: GaitCodes::default(),
    });

    let outcome = run_session(&config, Some(pulser)).await?;

    let mut pulses = output.pulses();
    pulses.sort_unstable();
    assert_eq!(pulses, vec![1, 2, 4, 5, 6, 7]);

    let gait: Vec<(&str, Option<u8>)> = outcome
        .log
        .records()
        .iter()
        .filter(|r| r.channels.qtm.is_none())
        .map(|r| (r.label.as_str(), r.code))
        .collect();
    let mut labels: Vec<&str> = gait.iter().map(|(l, _)| *l).collect();
    labels.sort_unstable();
    assert_eq!(labels, vec!["LHS", "LTO", "RHS", "RTO"]);
    assert!(gait.contains(&("RHS", Some(4))));
    assert!(gait.contains(&("LTO", Some(7))));

    let commands = commands.lock().unwrap().clone();
    let stream = position(&commands, "StreamFrames AllFrames Analog");
    let stream_stop = position(&commands, "StreamFrames Stop");
    let task_end = position(&commands, "SetQTMEvent TaskEnd");
    assert!(stream < stream_stop && task_end < stream_stop);
    Ok(())
}

#[tokio::test]
async fn test_rejected_qtm_event_is_recorded_and_session_saves() -> Result<()> {
    let fake = FakeQtm {
        reject_event: true,
        ..Default::default()
    };
    let (port, commands) = spawn_fake_qtm(fake).await?;
    let (output, pulser) = memory_pulser();
    let mut config = config(port);
    config.triggers = Some(trigger_config());

    let outcome = run_session(&config, Some(pulser)).await?;

    assert_eq!(output.pulses(), vec![1, 2]);
    let records = outcome.log.records();
    assert!(records.iter().all(|r| r.channels.qtm == Some(false)));
    assert!(records.iter().all(|r| r.channels.trigger == Some(true)));
    assert!(outcome.log.to_tsv().contains("\tTaskStart\t1\tqtm(failed)+trigger"));

    let commands = commands.lock().unwrap().clone();
    position(&commands, &format!("Save {} Overwrite", OUTPUT));
    Ok(())
}

#[tokio::test]
async fn test_failed_pulse_is_recorded_and_session_saves() -> Result<()> {
    let (port, commands) = spawn_fake_qtm(FakeQtm::default()).await?;
    let pulser = Pulser::new(Box::new(UnpluggedOutput), PulseShape::parallel(Duration::from_millis(1)));
    let mut config = config(port);
    config.triggers = Some(trigger_config());

    let outcome = run_session(&config, Some(pulser)).await?;

    let records = outcome.log.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.channels.qtm == Some(true)));
    assert!(records.iter().all(|r| r.channels.trigger == Some(false)));
    assert!(outcome.log.to_tsv().contains("\tTaskEnd\t2\tqtm+trigger(failed)"));

    let commands = commands.lock().unwrap().clone();
    position(&commands, &format!("Save {} Overwrite", OUTPUT));
    Ok(())
}

#[tokio::test]
async fn test_missing_capture_events_are_tolerated() -> Result<()> {
    let fake = FakeQtm {
        suppress_capture_events: true,
        ..Default::default()
    };
    let (port, commands) = spawn_fake_qtm(fake).await?;
    let mut config = config(port);
    config.event_timeout = Duration::from_millis(300);

    let outcome = run_session(&config, None).await?;

    assert_eq!(outcome.save_reply, "Measurement saved");
    assert_eq!(outcome.log.records().len(), 2);

    let commands = commands.lock().unwrap().clone();
    let stop = commands.iter().rposition(|c| c == "Stop").unwrap_or(0);
    assert!(position(&commands, "Start") < stop);
    Ok(())
}

#[tokio::test]
async fn test_second_rejected_start_aborts_without_saving() -> Result<()> {
    let fake = FakeQtm {
        reject_all_starts: true,
        ..Default::default()
    };
    let (port, commands) = spawn_fake_qtm(fake).await?;

    let err = run_session(&config(port), None).await.unwrap_err();
    assert!(err.to_string().contains("after retrying"));

    let commands = commands.lock().unwrap().clone();
    assert_eq!(commands.iter().filter(|c| *c == "Start").count(), 2);
    assert!(!commands.iter().any(|c| c.starts_with("Save")));
    assert!(!commands.iter().any(|c| c.starts_with("SetQTMEvent")));
    assert_eq!(commands.last().map(String::as_str), Some("ReleaseControl"));
    Ok(())
}

#[tokio::test]
async fn test_capture_is_stopped_when_connection_breaks_after_start() -> Result<()> {
    let fake = FakeQtm {
        corrupt_after_start: true,
        ..Default::default()
    };
    let (port, commands) = spawn_fake_qtm(fake).await?;

    let err = run_session(&config(port), None).await.unwrap_err();
    assert!(err.to_string().contains("waiting for the capture to start"));

    // Give the server a moment to log what arrived after the break
    tokio::time::sleep(Duration::from_millis(100)).await;
    let commands = commands.lock().unwrap().clone();
    let start = position(&commands, "Start");
    let stop = commands.iter().rposition(|c| c == "Stop").unwrap_or(0);
    assert!(start < stop, "no Stop after Start: {:?}", commands);
    assert!(!commands.iter().any(|c| c.starts_with("Save")));
    Ok(())
}
