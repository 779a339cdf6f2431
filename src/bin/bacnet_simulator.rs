//! Standalone virtual BACnet device
//!
//! Runs a simulated single-zone air handler until Ctrl-C:
//!
//! ```text
//! bacnet_simulator [--device-id N] [--port P] [--interval SECS] [--objects FILE.json]
//! ```
//!
//! `--objects` replaces the default HVAC points with a JSON array of object
//! descriptions (see `voltage_bacnet::simulator::ObjectSpec`).

use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use voltage_bacnet::simulator::{ObjectSpec, SimulatorConfig, VirtualDevice};

fn parse_args() -> Result<SimulatorConfig> {
    let mut config = SimulatorConfig::default();
    let mut port = config.bind_address.port();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        let mut value_for = |flag: &str| -> Result<String> {
            args.next().context(format!("{flag} needs a value"))
        };
        match arg.as_str() {
            "--device-id" => {
                config.device_id = value_for("--device-id")?
                    .parse()
                    .context("--device-id must be a number")?;
            }
            "--port" => {
                port = value_for("--port")?
                    .parse()
                    .context("--port must be a number")?;
            }
            "--interval" => {
                let secs: u64 = value_for("--interval")?
                    .parse()
                    .context("--interval must be seconds")?;
                config.update_interval = Duration::from_secs(secs);
            }
            "--objects" => {
                let path = value_for("--objects")?;
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {path}"))?;
                let specs: Vec<ObjectSpec> = serde_json::from_str(&text)
                    .with_context(|| format!("{path} is not a valid object list"))?;
                config.objects = Some(specs);
            }
            "--name" => config.device_name = value_for("--name")?,
            "--help" | "-h" => {
                println!(
                    "usage: bacnet_simulator [--device-id N] [--port P] [--interval SECS] \
                     [--objects FILE.json] [--name NAME]"
                );
                std::process::exit(0);
            }
            other => bail!("unknown argument '{other}' (try --help)"),
        }
    }

    config.bind_address = SocketAddr::from(([0, 0, 0, 0], port));
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = parse_args()?;
    let device = VirtualDevice::start(config).await?;
    info!(address = %device.local_addr(), "simulator running, Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    device.stop().await;
    Ok(())
}
