//! Thin command-line frontend for the tunable filter driver
//!
//! Every subcommand is a direct caller of the driver's session and
//! registry API; no protocol logic lives here.

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use driver::usb::{HotplugPump, UsbProvider};
use driver::{Registry, RegistryEvent, Session, logging::setup_logging};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Poll fallback interval for hotplug monitoring
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "lctf", about = "Control a USB liquid-crystal tunable filter")]
struct Cli {
    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached filter devices
    List {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Show state and temperature of the first attached device
    Status,
    /// Tune to a wavelength
    Tune {
        /// Target wavelength in integer device units
        wavelength: u32,
        /// Return once the command is accepted, without waiting for the
        /// completion interrupt
        #[arg(long)]
        no_wait: bool,
        /// Completion window in milliseconds
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },
    /// Wait for a tune completion triggered by other means
    Wait {
        /// Completion window in milliseconds
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,
    },
    /// Start a calibration cycle
    Calibrate,
    /// Watch devices attach and detach until interrupted
    Monitor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level)?;

    let provider = UsbProvider::new()?;
    let context = provider.context().clone();
    let registry = Arc::new(Registry::new(provider));

    // One synchronous pass so one-shot commands see the current bus
    let failures = registry.refresh().await?;
    for failure in &failures {
        warn!(device = %failure.identity, error = %failure.error, "device failed to attach");
    }

    match cli.command {
        Commands::List { json } => {
            let sessions = registry.get_all();
            if json {
                let devices: Vec<serde_json::Value> =
                    sessions.iter().map(|s| describe(s)).collect();
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if sessions.is_empty() {
                println!("no filter devices attached");
            } else {
                for session in sessions {
                    let range = session.tuning_range();
                    println!(
                        "{}  serial={}  firmware={}  range={}..{} step {}",
                        session.identity(),
                        session.serial_number().unwrap_or("<none>"),
                        session.firmware_version(),
                        range.min,
                        range.max,
                        range.step,
                    );
                }
            }
        }

        Commands::Status => {
            let session = first_session(&registry)?;
            println!("device:      {}", session.identity());
            println!("state:       {:?}", session.state()?);
            println!("temperature: {:.2}", session.temperature()?);
        }

        Commands::Tune {
            wavelength,
            no_wait,
            timeout_ms,
        } => {
            let session = first_session(&registry)?;
            if no_wait {
                session.set_wavelength(wavelength)?;
                println!("tune to {wavelength} issued");
            } else {
                let confirmed = session
                    .set_wavelength_and_wait(wavelength, Duration::from_millis(timeout_ms))
                    .await?;
                println!("tuned to {confirmed}");
            }
        }

        Commands::Wait { timeout_ms } => {
            let session = first_session(&registry)?;
            let confirmed = session
                .wait_for_tune(Duration::from_millis(timeout_ms))
                .await?;
            println!("tuned to {confirmed}");
        }

        Commands::Calibrate => {
            let session = first_session(&registry)?;
            session.calibrate()?;
            println!("calibration started");
        }

        Commands::Monitor => {
            let mut events = registry.subscribe();
            let _pump = HotplugPump::spawn(context, registry.notifier())
                .map_err(|e| {
                    warn!("hotplug callbacks unavailable, polling only: {}", e);
                })
                .ok();
            let _loop_handle = registry.start(POLL_INTERVAL);

            println!("monitoring filter devices (ctrl-c to stop)");
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(RegistryEvent::Attached(identity)) => {
                            println!("attached  {identity}");
                        }
                        Ok(RegistryEvent::Detached(identity)) => {
                            println!("detached  {identity}");
                        }
                        Err(_) => break,
                    },
                }
            }
        }
    }

    registry.dispose();
    Ok(())
}

fn first_session(registry: &Registry<UsbProvider>) -> Result<Arc<Session>> {
    match registry.get_first() {
        Some(session) => Ok(session),
        None => bail!("no filter device attached"),
    }
}

fn describe(session: &Session) -> serde_json::Value {
    serde_json::json!({
        "identity": session.identity(),
        "serial_number": session.serial_number(),
        "firmware_version": session.firmware_version().to_string(),
        "tuning_range": session.tuning_range(),
    })
}
