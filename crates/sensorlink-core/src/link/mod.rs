//! Serial Link Management
//!
//! Owns the single exclusive serial connection to the sensor board.
//!
//! Acquisition retries with alternating flow-control modes and runs a
//! best-effort forced-release sequence first, because some operating systems
//! keep a device busy for a while after it was closed.

mod config;
mod error;
pub mod framing;
mod manager;
pub mod release;
pub mod serial;

pub use config::LinkConfig;
pub use error::{LinkError, OpenError, OpenErrorKind};
pub use framing::LineFramer;
pub use manager::{ConnectionState, DisconnectOutcome, LinkEvent, LinkInfo, LinkManager};
pub use release::{ReleasePlan, ReleaseReport, ReleaseStep};
pub use serial::{
    list_ports, BoxedPort, LinkPort, PortInfo, PortSettings, SerialBackend, SystemBackend,
};

/// Baud rates accepted by `connect`
pub const SUPPORTED_BAUD_RATES: [u32; 6] = [9600, 14400, 19200, 38400, 57600, 115200];

/// Default baud rate for the sensor sketch
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Flow-control modes tried in order, one per open attempt
pub const FLOW_CONTROL_ROTATION: [tokio_serial::FlowControl; 3] = [
    tokio_serial::FlowControl::None,
    tokio_serial::FlowControl::Hardware,
    tokio_serial::FlowControl::Software,
];

/// Maximum line length accepted by the framer
pub const MAX_LINE_LENGTH: usize = 4096;

/// Check whether a baud rate is in the supported set
pub fn is_supported_baud_rate(baud_rate: u32) -> bool {
    SUPPORTED_BAUD_RATES.contains(&baud_rate)
}
