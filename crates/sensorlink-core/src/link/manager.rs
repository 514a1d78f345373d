//! Connection management
//!
//! Handles the link lifecycle: single-flight acquisition with retries,
//! deterministic release, line delivery and asynchronous loss detection.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::codec::FramedRead;

use super::{
    is_supported_baud_rate, BoxedPort, LineFramer, LinkConfig, LinkError, OpenError,
    PortSettings, ReleasePlan, SerialBackend, FLOW_CONTROL_ROTATION,
};
use crate::settings::{LastPort, SettingsStore};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link
    Idle,
    /// Acquisition in progress
    Connecting,
    /// Link open and delivering lines
    Connected,
    /// Release in progress
    Disconnecting,
}

/// Notifications produced by the link manager, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// One framed line from the device
    Line(String),
    /// The link entered (`true`) or left (`false`) the connected state
    ConnectionChanged(bool),
}

/// Description of the open link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// Device path
    pub path: String,
    /// Settings the device was opened with
    pub settings: PortSettings,
}

/// How a disconnect completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// There was no link to release
    AlreadyDisconnected,
    /// Flushed and closed cleanly
    Closed,
    /// Close did not finish in time; the handle was dropped anyway
    ForcedAfterTimeout,
}

impl DisconnectOutcome {
    /// Human readable summary
    pub fn message(&self) -> &'static str {
        match self {
            DisconnectOutcome::AlreadyDisconnected => "Already disconnected",
            DisconnectOutcome::Closed => "Disconnected",
            DisconnectOutcome::ForcedAfterTimeout => "Disconnected (forced after timeout)",
        }
    }
}

/// The single active connection
struct LinkHandle {
    info: LinkInfo,
    writer: WriteHalf<BoxedPort>,
    reader: JoinHandle<()>,
    session: u64,
}

impl LinkHandle {
    fn is_open(&self) -> bool {
        !self.reader.is_finished()
    }
}

#[derive(Default)]
struct LinkSlot {
    handle: Option<LinkHandle>,
    sessions: u64,
}

struct Shared {
    backend: Arc<dyn SerialBackend>,
    settings: Arc<dyn SettingsStore>,
    config: LinkConfig,
    /// Serializes every link-affecting operation
    slot: Mutex<LinkSlot>,
    connecting: AtomicBool,
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

/// Clears the single-flight flag on every exit path, including unwinding
/// and cancellation of the connect future
struct FlightGuard<'a> {
    shared: &'a Shared,
}

impl<'a> FlightGuard<'a> {
    fn acquire(shared: &'a Shared) -> Option<Self> {
        shared
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { shared })
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Idle;
                true
            } else {
                false
            }
        });
        self.shared.connecting.store(false, Ordering::Release);
    }
}

/// Owner of the exclusive serial link
///
/// Cloning is cheap and every clone manages the same link.
#[derive(Clone)]
pub struct LinkManager {
    shared: Arc<Shared>,
}

impl LinkManager {
    /// Create a manager and the receiver for its event stream
    pub fn new(
        backend: Arc<dyn SerialBackend>,
        config: LinkConfig,
        settings: Arc<dyn SettingsStore>,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Idle);
        let shared = Arc::new(Shared {
            backend,
            settings,
            config,
            slot: Mutex::new(LinkSlot::default()),
            connecting: AtomicBool::new(false),
            state,
            events,
        });
        (Self { shared }, rx)
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Whether a connect call is in flight
    pub fn is_connecting(&self) -> bool {
        self.shared.connecting.load(Ordering::Acquire)
    }

    /// Active configuration
    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    /// Backend used to open ports
    pub fn backend(&self) -> &Arc<dyn SerialBackend> {
        &self.shared.backend
    }

    /// Description of the open link, if any
    pub async fn link_info(&self) -> Option<LinkInfo> {
        let slot = self.shared.slot.lock().await;
        slot.handle
            .as_ref()
            .filter(|h| h.is_open())
            .map(|h| h.info.clone())
    }

    /// Acquire the link
    ///
    /// Closes any existing link, runs the forced-release plan, then tries to
    /// open the device with each flow-control mode in turn.
    pub async fn connect(&self, path: &str, baud_rate: u32) -> Result<LinkInfo, LinkError> {
        if path.trim().is_empty() {
            return Err(LinkError::InvalidPath);
        }
        if !is_supported_baud_rate(baud_rate) {
            return Err(LinkError::UnsupportedBaudRate(baud_rate));
        }

        let Some(_flight) = FlightGuard::acquire(&self.shared) else {
            tracing::warn!("Connect to {path} rejected: another connect is in flight");
            return Err(LinkError::AlreadyConnecting);
        };

        let mut slot = self.shared.slot.lock().await;
        self.shared.set_state(ConnectionState::Connecting);

        if let Some(previous) = slot.handle.take() {
            tracing::info!("Closing existing link to {}", previous.info.path);
            if let Err(e) = self.shared.close_handle(previous).await {
                tracing::warn!("Closing previous link failed (continuing): {e}");
            }
            self.shared.notify(LinkEvent::ConnectionChanged(false));
        }

        sleep(self.shared.config.settle_delay()).await;
        ReleasePlan::from_config(&self.shared.config)
            .run(self.shared.backend.as_ref(), path)
            .await;

        tracing::info!("Opening {path} at {baud_rate} baud");
        let (port, settings) = match self.shared.open_with_retries(path, baud_rate).await {
            Ok(opened) => opened,
            Err(e) => {
                tracing::error!("Connect to {path} failed: {e}");
                self.shared.set_state(ConnectionState::Idle);
                return Err(e);
            }
        };

        slot.sessions += 1;
        let info = LinkInfo {
            path: path.to_string(),
            settings,
        };
        self.shared.set_state(ConnectionState::Connected);

        let last = LastPort {
            path: path.to_string(),
            baud_rate,
        };
        if let Err(e) = self.shared.settings.save_last_port(last) {
            tracing::warn!("Could not persist last used port: {e}");
        }

        // Queued before the reader exists, so no line can precede it
        self.shared.notify(LinkEvent::ConnectionChanged(true));
        let handle = self.shared.install(port, info.clone(), slot.sessions);
        slot.handle = Some(handle);
        tracing::info!("Connected to {path} ({:?})", settings.flow_control);
        Ok(info)
    }

    /// Release the link
    ///
    /// The handle is always dropped, whether close succeeds, fails or times
    /// out.
    pub async fn disconnect(&self) -> Result<DisconnectOutcome, LinkError> {
        let mut slot = self.shared.slot.lock().await;
        let Some(handle) = slot.handle.take() else {
            return Ok(DisconnectOutcome::AlreadyDisconnected);
        };

        tracing::info!("Disconnecting from {}", handle.info.path);
        self.shared.set_state(ConnectionState::Disconnecting);
        let outcome = self.shared.close_handle(handle).await;
        self.shared.set_state(ConnectionState::Idle);
        self.shared.notify(LinkEvent::ConnectionChanged(false));
        drop(slot);

        match &outcome {
            Ok(o) => tracing::info!("{}", o.message()),
            Err(e) => tracing::error!("Disconnect reported an error: {e}"),
        }
        outcome
    }

    /// Write `data` followed by a newline
    pub async fn send(&self, data: &str) -> Result<(), LinkError> {
        let mut slot = self.shared.slot.lock().await;
        let handle = slot
            .handle
            .as_mut()
            .filter(|h| h.is_open())
            .ok_or(LinkError::NotConnected)?;

        let mut payload = String::with_capacity(data.len() + 1);
        payload.push_str(data);
        payload.push('\n');

        let write = async {
            handle.writer.write_all(payload.as_bytes()).await?;
            handle.writer.flush().await
        };
        match timeout(self.shared.config.send_timeout(), write).await {
            Ok(Ok(())) => {
                tracing::debug!("Sent {:?}", data);
                Ok(())
            }
            Ok(Err(e)) => Err(LinkError::WriteFailed(e.to_string())),
            Err(_) => Err(LinkError::WriteFailed(format!(
                "write timed out after {}ms",
                self.shared.config.send_timeout_ms
            ))),
        }
    }

    /// Disconnect, wait for the device to settle, then connect again
    pub async fn reconnect(&self, path: &str, baud_rate: u32) -> Result<LinkInfo, LinkError> {
        if self.is_connecting() {
            return Err(LinkError::AlreadyConnecting);
        }
        if let Err(e) = self.disconnect().await {
            tracing::warn!("Disconnect before reconnect failed (continuing): {e}");
        }
        sleep(self.shared.config.reconnect_delay()).await;
        self.connect(path, baud_rate).await
    }
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn notify(&self, event: LinkEvent) {
        // Nobody listening is not an error for the link itself
        let _ = self.events.send(event);
    }

    async fn open_with_retries(
        &self,
        path: &str,
        baud_rate: u32,
    ) -> Result<(BoxedPort, PortSettings), LinkError> {
        let attempts = self.config.open_attempts.max(1);
        let mut last_error: Option<OpenError> = None;

        for attempt in 1..=attempts {
            let flow = FLOW_CONTROL_ROTATION[(attempt as usize - 1) % FLOW_CONTROL_ROTATION.len()];
            let settings = PortSettings::framed_8n1(baud_rate, flow);
            tracing::debug!("Open attempt {attempt}/{attempts} on {path} with {flow:?}");

            match self.backend.open(path, &settings) {
                Ok(port) => {
                    tracing::info!("Open attempt {attempt} on {path} succeeded");
                    return Ok((port, settings));
                }
                Err(e) => {
                    tracing::warn!("Open attempt {attempt}/{attempts} on {path} failed: {e}");
                    last_error = Some(e);
                    if attempt < attempts {
                        sleep(self.config.backoff()).await;
                    }
                }
            }
        }

        Err(LinkError::exhausted(attempts, last_error))
    }

    fn install(self: &Arc<Self>, port: BoxedPort, info: LinkInfo, session: u64) -> LinkHandle {
        let (read_half, writer) = tokio::io::split(port);
        let reader = tokio::spawn(pump_lines(
            Arc::downgrade(self),
            read_half,
            session,
            info.path.clone(),
        ));
        LinkHandle {
            info,
            writer,
            reader,
            session,
        }
    }

    async fn close_handle(&self, handle: LinkHandle) -> Result<DisconnectOutcome, LinkError> {
        let LinkHandle {
            mut writer, reader, ..
        } = handle;

        // Stop line delivery first; a partial line in the framer is dropped
        reader.abort();
        let _ = reader.await;

        let result = {
            let close = async {
                writer.flush().await?;
                writer.shutdown().await
            };
            timeout(self.config.disconnect_timeout(), close).await
        };
        drop(writer);

        match result {
            Ok(Ok(())) => Ok(DisconnectOutcome::Closed),
            Ok(Err(e)) => Err(LinkError::CloseFailed(e.to_string())),
            Err(_) => {
                tracing::warn!(
                    "Close did not finish within {}ms, forcing cleanup",
                    self.config.disconnect_timeout_ms
                );
                Ok(DisconnectOutcome::ForcedAfterTimeout)
            }
        }
    }

    /// Called by the reader when the device stream ends or errors
    async fn link_lost(&self, session: u64, cause: &str) {
        let mut slot = self.slot.lock().await;
        let current = slot
            .handle
            .as_ref()
            .is_some_and(|h| h.session == session);
        if !current {
            return;
        }

        tracing::warn!("Link lost: {cause}");
        // Dropping the handle detaches this task's own JoinHandle
        slot.handle = None;
        self.set_state(ConnectionState::Idle);
        self.notify(LinkEvent::ConnectionChanged(false));
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Last manager handle is gone; the reader must not keep the port open
        if let Some(handle) = self.slot.get_mut().handle.take() {
            tracing::info!("Link manager dropped, releasing {}", handle.info.path);
            handle.reader.abort();
        }
    }
}

/// Reader task; holds only a weak reference so it never keeps the manager alive
async fn pump_lines(shared: Weak<Shared>, port: ReadHalf<BoxedPort>, session: u64, path: String) {
    let mut lines = FramedRead::new(port, LineFramer::new());
    let cause = loop {
        match lines.next().await {
            Some(Ok(line)) => {
                tracing::trace!("{path}: {line}");
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                shared.notify(LinkEvent::Line(line));
            }
            Some(Err(e)) => break format!("read error on {path}: {e}"),
            None => break format!("{path} closed"),
        }
    };
    drop(lines);
    if let Some(shared) = shared.upgrade() {
        shared.link_lost(session, &cause).await;
    }
}
