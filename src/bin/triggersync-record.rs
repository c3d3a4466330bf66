//! triggersync-record - Synchronized QTM recording session
//!
//! Connects to Qualisys Track Manager, records a measurement of the requested
//! duration and marks its start and end with a QTM event and, optionally, a
//! hardware trigger pulse fired at the same instant.
//!
//! # Usage
//!
//! ```bash
//! # QTM markers only, next session under ./bids
//! triggersync-record --subject 01 --task walking --bids-root ./bids --duration 60
//!
//! # With parallel port pulses
//! triggersync-record --subject 01 --bids-root ./bids --triggers --address 0x4000 --pulse 5
//!
//! # Serial trigger hub, plus gait-event pulses from force plates
//! triggersync-record --subject 01 --bids-root ./bids --triggers \
//!   --backend serial --serial-port /dev/ttyUSB0 --gait --threshold 20
//!
//! # Show what would happen
//! triggersync-record --subject 01 --bids-root ./bids --triggers --dry-run
//! ```
//!
//! # Output
//!
//! ```text
//! bids/sub-01/ses-01/
//! ├── sub-01_ses-01_task-walking_qtm.qtm     (saved by QTM)
//! ├── sub-01_ses-01_task-walking_events.tsv  (markers sent)
//! └── sub-01_ses-01_task-walking_qtm.json    (session parameters)
//! ```

use anyhow::{Context, Result};
use clap::Parser;

use triggersync::cli::RecordArgs;
use triggersync::logging::init_logging;
use triggersync::markers::{SessionSidecar, sidecar_paths};
use triggersync::session::{TASK_END, TASK_START, run_session};

#[tokio::main]
async fn main() -> Result<()> {
    let args = RecordArgs::parse();

    if !args.quiet {
        triggersync::display_license_notice("triggersync-record");
    }
    init_logging(&args.log_level)?;

    let output = args
        .resolve_output()
        .context("Failed to choose the output path")?;

    let config = args.session_config(output.clone());
    config.validate()?;

    if args.dry_run {
        println!("[dry-run] Output: {}", output.display());
        println!("[dry-run] QTM: {}:{} (protocol {})", config.host, config.port, config.version);
        println!("[dry-run] Capture time: {}s", config.duration);
        match config.triggers {
            Some(ref triggers) => {
                println!(
                    "[dry-run] Triggers: {:?}, pulse {:?}",
                    triggers.backend, triggers.shape.width
                );
                println!("[dry-run] {} / code {}", TASK_START, config.start_code);
                println!(
                    "[dry-run] {} / code {} after {:?}",
                    TASK_END,
                    config.end_code,
                    config.marker_gap()
                );
            }
            None => {
                println!("[dry-run] Triggers disabled; QTM markers only");
                println!("[dry-run] {}, then {} after {:?}", TASK_START, TASK_END, config.marker_gap());
            }
        }
        if let Some(gait) = config.gait {
            println!("[dry-run] Gait detection: {:?}", gait.detector);
        }
        return Ok(());
    }

    let pulser = match config.triggers {
        Some(ref triggers) => {
            let pulser = triggers
                .open()
                .context("Failed to open the trigger output")?;
            if !args.quiet {
                println!("[+] Trigger output: {}", pulser.describe());
            }
            Some(pulser)
        }
        None => None,
    };

    let outcome = run_session(&config, pulser).await?;

    let (events_path, sidecar_path) = sidecar_paths(&outcome.output);
    outcome.log.write_tsv(&events_path)?;
    SessionSidecar::new(&config, &outcome.log, &outcome.output).write(&sidecar_path)?;

    if !args.quiet {
        for record in outcome.log.records() {
            println!("    {:>9.3}s  {}", record.onset, record.label);
        }
        println!("[+] Marker log: {}", events_path.display());
    }
    println!("[+] Saved session to {}", outcome.output.display());

    Ok(())
}
