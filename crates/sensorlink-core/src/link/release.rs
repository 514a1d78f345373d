//! Forced release of a lingering device handle
//!
//! Some operating systems keep a serial device busy for a moment after the
//! last handle was closed. Before the real open attempts the link manager
//! runs an ordered list of [`ReleaseStep`]s that nudge the OS into letting
//! go. Every step may fail; a failure is logged and the next step runs. The
//! plan as a whole never fails.

use std::time::Duration;
use tokio::time::sleep;
use tokio_serial::FlowControl;

use super::{LinkConfig, OpenError, PortSettings, SerialBackend};

/// Baud rate used for transient release handles
const RELEASE_BAUD_RATE: u32 = 9600;

/// One best-effort recovery action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseStep {
    /// Open transiently, assert then de-assert DTR, close, then wait `pause`
    PulseDtr {
        /// Time DTR is held at each level
        pulse: Duration,
        /// Wait after the handle is closed
        pause: Duration,
    },
    /// Open and immediately close the device `count` times
    CycleOpen {
        /// Number of open/close cycles
        count: u32,
        /// Wait after each cycle
        pause: Duration,
    },
    /// Let the runtime finish deferred drops of closed handles
    YieldToRuntime,
    /// Plain wait
    Settle(Duration),
}

impl ReleaseStep {
    async fn execute(&self, backend: &dyn SerialBackend, path: &str) -> Result<(), OpenError> {
        let settings = PortSettings::framed_8n1(RELEASE_BAUD_RATE, FlowControl::None);
        match self {
            ReleaseStep::PulseDtr { pulse, pause } => {
                let result = pulse_dtr(backend, path, &settings, *pulse).await;
                sleep(*pause).await;
                result
            }
            ReleaseStep::CycleOpen { count, pause } => {
                let mut failures = 0u32;
                let mut last_error = None;
                for cycle in 1..=*count {
                    tracing::debug!("Release cycle {cycle}/{count} on {path}");
                    match backend.open(path, &settings) {
                        Ok(port) => drop(port),
                        Err(e) => {
                            failures += 1;
                            last_error = Some(e);
                        }
                    }
                    sleep(*pause).await;
                }
                match last_error {
                    Some(e) => Err(OpenError::new(
                        e.kind,
                        format!("{failures}/{count} cycles failed, last: {}", e.message),
                    )),
                    None => Ok(()),
                }
            }
            ReleaseStep::YieldToRuntime => {
                tokio::task::yield_now().await;
                Ok(())
            }
            ReleaseStep::Settle(delay) => {
                sleep(*delay).await;
                Ok(())
            }
        }
    }
}

async fn pulse_dtr(
    backend: &dyn SerialBackend,
    path: &str,
    settings: &PortSettings,
    pulse: Duration,
) -> Result<(), OpenError> {
    let mut port = backend.open(path, settings)?;
    port.set_data_terminal_ready(true)?;
    sleep(pulse).await;
    port.set_data_terminal_ready(false)?;
    sleep(pulse).await;
    drop(port);
    Ok(())
}

/// Outcome of running a plan, for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    /// Steps executed
    pub attempted: usize,
    /// Steps that reported an error (and were ignored)
    pub failed: usize,
}

/// Ordered forced-release sequence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleasePlan {
    steps: Vec<ReleaseStep>,
}

impl ReleasePlan {
    /// Plan with explicit steps
    pub fn new(steps: Vec<ReleaseStep>) -> Self {
        Self { steps }
    }

    /// Plan described by the config; empty when forced release is disabled
    pub fn from_config(config: &LinkConfig) -> Self {
        if !config.force_release {
            return Self::default();
        }
        Self::new(vec![
            ReleaseStep::PulseDtr {
                pulse: Duration::from_millis(config.release_pulse_ms),
                pause: Duration::from_millis(config.release_pause_ms),
            },
            ReleaseStep::CycleOpen {
                count: config.release_cycle_count,
                pause: Duration::from_millis(config.release_cycle_pause_ms),
            },
            ReleaseStep::YieldToRuntime,
            ReleaseStep::Settle(Duration::from_millis(config.release_final_settle_ms)),
        ])
    }

    /// Steps in execution order
    pub fn steps(&self) -> &[ReleaseStep] {
        &self.steps
    }

    /// Whether the plan does nothing
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order, swallowing failures
    pub async fn run(&self, backend: &dyn SerialBackend, path: &str) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        if self.steps.is_empty() {
            return report;
        }

        tracing::info!("Forcing release of {path} ({} steps)", self.steps.len());
        for step in &self.steps {
            report.attempted += 1;
            if let Err(e) = step.execute(backend, path).await {
                report.failed += 1;
                tracing::debug!("Release step {step:?} failed (ignored): {e}");
            }
        }
        tracing::info!(
            "Forced release of {path} finished, {}/{} steps reported errors",
            report.failed,
            report.attempted
        );
        report
    }
}
