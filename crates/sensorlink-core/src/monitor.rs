//! Sensor monitor
//!
//! Host-facing facade: wires the link manager's line stream into the
//! telemetry store and exposes command results and events in the shape a UI
//! layer consumes (`{success, message}` replies, data and connection events).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::link::{
    ConnectionState, DisconnectOutcome, LinkConfig, LinkError, LinkEvent, LinkInfo, LinkManager,
    PortInfo, SerialBackend,
};
use crate::settings::{LastPort, SettingsStore};
use crate::telemetry::{
    HistoryEntry, HistoryFilter, HistoryOrder, Ingested, LiveSnapshot, MotionStats,
    TelemetryStore,
};

/// Host event buffer; slow subscribers miss the oldest events
const EVENT_CAPACITY: usize = 256;

/// Reply to a host command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Whether the command succeeded
    pub success: bool,
    /// Human readable outcome
    pub message: String,
}

impl CommandResult {
    /// Successful reply
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// Failed reply
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl From<Result<LinkInfo, LinkError>> for CommandResult {
    fn from(result: Result<LinkInfo, LinkError>) -> Self {
        match result {
            Ok(info) => Self::ok(format!(
                "Connected to {} at {} baud",
                info.path, info.settings.baud_rate
            )),
            Err(e) => Self::failure(e.to_string()),
        }
    }
}

impl From<Result<DisconnectOutcome, LinkError>> for CommandResult {
    fn from(result: Result<DisconnectOutcome, LinkError>) -> Self {
        match result {
            Ok(outcome) => Self::ok(outcome.message()),
            Err(e) => Self::failure(format!("Error while disconnecting: {e}")),
        }
    }
}

impl From<Result<(), LinkError>> for CommandResult {
    fn from(result: Result<(), LinkError>) -> Self {
        match result {
            Ok(()) => Self::ok("Command sent"),
            Err(e) => Self::failure(e.to_string()),
        }
    }
}

/// Notifications for the host
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum HostEvent {
    /// Raw framed line, whether or not it decoded
    Data(String),
    /// Link entered or left the connected state
    ConnectionChanged(bool),
    /// A reading with presence was recorded
    MotionDetected(HistoryEntry),
}

/// Link manager plus telemetry pipeline
pub struct SensorMonitor {
    link: LinkManager,
    telemetry: Arc<Mutex<TelemetryStore>>,
    settings: Arc<dyn SettingsStore>,
    events: broadcast::Sender<HostEvent>,
    ingest_task: JoinHandle<()>,
}

impl SensorMonitor {
    /// Build the monitor and start its ingest task
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        backend: Arc<dyn SerialBackend>,
        config: LinkConfig,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self::with_store(backend, config, settings, TelemetryStore::new())
    }

    /// Build the monitor around an existing telemetry store
    pub fn with_store(
        backend: Arc<dyn SerialBackend>,
        config: LinkConfig,
        settings: Arc<dyn SettingsStore>,
        store: TelemetryStore,
    ) -> Self {
        let (link, link_events) = LinkManager::new(backend, config, Arc::clone(&settings));
        let telemetry = Arc::new(Mutex::new(store));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let ingest_task = tokio::spawn(run_ingest(
            link_events,
            Arc::clone(&telemetry),
            events.clone(),
        ));

        Self {
            link,
            telemetry,
            settings,
            events,
            ingest_task,
        }
    }

    /// Devices reachable through the backend
    pub fn list_available_devices(&self) -> Vec<PortInfo> {
        self.link.backend().available_ports()
    }

    /// Connect to `path` at `baud_rate`
    pub async fn connect(&self, path: &str, baud_rate: u32) -> CommandResult {
        self.link.connect(path, baud_rate).await.into()
    }

    /// Release the link
    pub async fn disconnect(&self) -> CommandResult {
        self.link.disconnect().await.into()
    }

    /// Send a command line to the device
    pub async fn send(&self, data: &str) -> CommandResult {
        self.link.send(data).await.into()
    }

    /// Disconnect, let the device settle, connect again
    pub async fn reconnect(&self, path: &str, baud_rate: u32) -> CommandResult {
        self.link.reconnect(path, baud_rate).await.into()
    }

    /// Subscribe to host events
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    /// Connection state
    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    /// Underlying link manager
    pub fn link(&self) -> &LinkManager {
        &self.link
    }

    /// Last successful connection target
    pub fn last_port(&self) -> Option<LastPort> {
        self.settings.last_port()
    }

    /// Current live values
    pub async fn live(&self) -> LiveSnapshot {
        self.telemetry.lock().await.live()
    }

    /// Filtered, ordered copy of the motion history
    pub async fn history(&self, order: HistoryOrder, filter: HistoryFilter) -> Vec<HistoryEntry> {
        self.telemetry.lock().await.history_view(order, filter)
    }

    /// Motion counters
    pub async fn motion_stats(&self) -> MotionStats {
        self.telemetry.lock().await.stats()
    }

    /// Drop recorded motion
    pub async fn clear_history(&self) {
        self.telemetry.lock().await.clear_history();
    }
}

impl Drop for SensorMonitor {
    fn drop(&mut self) {
        self.ingest_task.abort();
    }
}

async fn run_ingest(
    mut link_events: mpsc::UnboundedReceiver<LinkEvent>,
    telemetry: Arc<Mutex<TelemetryStore>>,
    events: broadcast::Sender<HostEvent>,
) {
    while let Some(event) = link_events.recv().await {
        match event {
            LinkEvent::Line(line) => {
                let ingested = telemetry.lock().await.ingest_line(&line, Utc::now());
                let _ = events.send(HostEvent::Data(line));
                if let Some(Ingested::Motion(entry)) = ingested {
                    let _ = events.send(HostEvent::MotionDetected(entry));
                }
            }
            LinkEvent::ConnectionChanged(connected) => {
                let _ = events.send(HostEvent::ConnectionChanged(connected));
            }
        }
    }
    tracing::debug!("Link event stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_result_from_errors() {
        let result: CommandResult = Err::<(), _>(LinkError::NotConnected).into();
        assert!(!result.success);
        assert_eq!(result.message, "Not connected to a serial port");

        let result: CommandResult = Ok::<_, LinkError>(DisconnectOutcome::ForcedAfterTimeout).into();
        assert!(result.success);
        assert!(result.message.contains("forced"));
    }

    #[test]
    fn test_host_event_json_shape() {
        let json = serde_json::to_value(HostEvent::ConnectionChanged(true)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"event": "connectionChanged", "payload": true})
        );
    }
}
