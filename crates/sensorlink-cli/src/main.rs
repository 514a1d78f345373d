//! SensorLink command-line host
//!
//! Connects to the sensor board, prints every event as a JSON line and keeps
//! running until Ctrl-C.

use anyhow::{bail, Context, Result};
use clap::Parser;
use sensorlink_core::demo::{DemoBackend, DEMO_PORT};
use sensorlink_core::link::{is_supported_baud_rate, DEFAULT_BAUD_RATE, SUPPORTED_BAUD_RATES};
use sensorlink_core::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// SensorLink - Arduino environment/motion sensor monitor
#[derive(Parser, Debug)]
#[command(name = "sensorlink", version, about)]
struct Cli {
    /// Serial port (default: last used port)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate (default: last used rate or 9600)
    #[arg(short, long = "baud", value_parser = parse_baud_rate)]
    baud_rate: Option<u32>,

    /// Link timing config as JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Send a command line once connected
    #[arg(long)]
    send: Option<String>,

    /// List available ports and exit
    #[arg(long)]
    list: bool,

    /// Use the simulated sensor board
    #[arg(long)]
    demo: bool,
}

fn parse_baud_rate(s: &str) -> Result<u32, String> {
    let baud: u32 = s.parse().map_err(|_| format!("Invalid baud rate: '{s}'"))?;
    if !is_supported_baud_rate(baud) {
        return Err(format!(
            "Unsupported baud rate {baud}, expected one of {SUPPORTED_BAUD_RATES:?}"
        ));
    }
    Ok(baud)
}

/// Pick the device and baud rate from options, then the last used port
fn resolve_target(options: &Cli, monitor: &SensorMonitor) -> Result<(String, u32)> {
    let last = monitor.last_port();

    let port = match (&options.port, options.demo) {
        (Some(port), _) => port.clone(),
        (None, true) => DEMO_PORT.to_string(),
        (None, false) => match &last {
            Some(last) => last.path.clone(),
            None => monitor
                .list_available_devices()
                .into_iter()
                .next()
                .map(|p| p.name)
                .context("No serial port given and none detected (use --port)")?,
        },
    };

    let baud_rate = options.baud_rate.unwrap_or_else(|| match &last {
        Some(last) if last.path == port => last.baud_rate,
        _ => DEFAULT_BAUD_RATE,
    });

    Ok((port, baud_rate))
}

fn print_event(event: &HostEvent) -> Result<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = Cli::parse();

    let config = match &options.config {
        Some(path) => LinkConfig::from_file(path)
            .with_context(|| format!("Failed to load link config from {}", path.display()))?,
        None => LinkConfig::default(),
    };

    let backend: Arc<dyn SerialBackend> = if options.demo {
        DemoBackend::shared(Duration::from_secs(1))
    } else {
        SystemBackend::shared()
    };
    let monitor = SensorMonitor::new(backend, config, JsonSettingsStore::shared_default());

    if options.list {
        for port in monitor.list_available_devices() {
            println!("{}", serde_json::to_string(&port)?);
        }
        return Ok(());
    }

    let (port, baud_rate) = resolve_target(&options, &monitor)?;
    let mut events = monitor.subscribe();

    tracing::info!(
        "SensorLink v{} connecting to {port} at {baud_rate} baud",
        sensorlink_core::VERSION
    );
    let result = monitor.connect(&port, baud_rate).await;
    if !result.success {
        bail!(result.message);
    }
    tracing::info!("{}", result.message);

    if let Some(command) = &options.send {
        let sent = monitor.send(command).await;
        if !sent.success {
            tracing::warn!("{}", sent.message);
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, disconnecting");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event)?;
                    match event {
                        HostEvent::Data(_) => {
                            let live = monitor.live().await;
                            tracing::debug!(
                                "Live: {:.1}°C ({:?}) {:.1}% ({:?}) #{} presence={}",
                                live.temperature,
                                live.temperature_band(),
                                live.humidity,
                                live.humidity_band(),
                                live.counter,
                                live.presence
                            );
                        }
                        HostEvent::MotionDetected(entry) => {
                            let stats = monitor.motion_stats().await;
                            tracing::info!(
                                "Motion #{} at {:.1}°C / {:.1}%",
                                stats.total_detections,
                                entry.reading.temperature,
                                entry.reading.humidity
                            );
                        }
                        HostEvent::ConnectionChanged(false) => {
                            tracing::warn!("Device disconnected");
                            break;
                        }
                        HostEvent::ConnectionChanged(true) => {}
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Output fell behind, {missed} events skipped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    let result = monitor.disconnect().await;
    tracing::info!("{}", result.message);

    let stats = monitor.motion_stats().await;
    let recent = monitor
        .history(HistoryOrder::NewestFirst, HistoryFilter::All)
        .await;
    println!(
        "{}",
        serde_json::json!({
            "totalDetections": stats.total_detections,
            "lastDetection": stats.last_detection,
            "recent": recent.iter().take(10).collect::<Vec<_>>(),
        })
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options() {
        let cli = Cli::try_parse_from([
            "sensorlink",
            "-p",
            "/dev/ttyACM0",
            "--baud",
            "115200",
            "--send",
            "LED ON",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(cli.baud_rate, Some(115200));
        assert_eq!(cli.send.as_deref(), Some("LED ON"));
        assert!(!cli.demo);
        assert!(!cli.list);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Cli::try_parse_from(["sensorlink", "--baud", "1234"]).is_err());
        assert!(Cli::try_parse_from(["sensorlink", "--baud", "fast"]).is_err());
        assert!(Cli::try_parse_from(["sensorlink", "--port"]).is_err());
        assert!(Cli::try_parse_from(["sensorlink", "--bogus"]).is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
