//! triggersync-pulse - Send trigger codes to check the hub wiring
//!
//! ```bash
//! triggersync-pulse 1 --address 0x4000
//! triggersync-pulse 255 --backend serial --serial-port COM6 --count 5 --interval 1000
//! ```

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;

use triggersync::cli::PulseArgs;
use triggersync::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let args = PulseArgs::parse();

    if !args.quiet {
        triggersync::display_license_notice("triggersync-pulse");
    }
    init_logging(&args.log_level)?;

    if args.code == 0 {
        bail!("Code 0 is the idle level; use 1-255");
    }

    let config = args.trigger.trigger_config();
    let pulser = config.open().context("Failed to open the trigger output")?;
    if !args.quiet {
        println!("[+] Trigger output: {}", pulser.describe());
    }

    for i in 0..args.count {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(args.interval)).await;
        }
        pulser.pulse(args.code).await?;
        if !args.quiet {
            println!(
                "[+] Sent code {} ({}/{}, {:?})",
                args.code,
                i + 1,
                args.count,
                config.shape.width
            );
        }
    }

    pulser.reset()?;
    Ok(())
}
