//! # SensorLink Core Library
//!
//! Core functionality for monitoring an Arduino environment/motion sensor
//! over a serial line.
//!
//! This library provides:
//! - Exclusive serial link management with retry and forced-release recovery
//! - Line framing of the device byte stream
//! - Telemetry decoding (JSON records and labelled text)
//! - Live snapshot and a bounded motion-detection history
//! - Persistence of the last used port
//!
//! ## Example
//!
//! ```rust,ignore
//! use sensorlink_core::prelude::*;
//!
//! let monitor = SensorMonitor::new(
//!     SystemBackend::shared(),
//!     LinkConfig::default(),
//!     JsonSettingsStore::shared_default(),
//! );
//!
//! let result = monitor.connect("/dev/ttyACM0", 9600).await;
//! println!("{}", result.message);
//!
//! let live = monitor.live().await;
//! println!("{:.1}°C {:.1}%", live.temperature, live.humidity);
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod demo;
pub mod link;
pub mod monitor;
pub mod settings;
pub mod telemetry;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::demo::DemoBackend;
    pub use crate::link::{
        ConnectionState, LinkConfig, LinkError, LinkEvent, LinkManager, SerialBackend,
        SystemBackend,
    };
    pub use crate::monitor::{CommandResult, HostEvent, SensorMonitor};
    pub use crate::settings::{JsonSettingsStore, LastPort, MemorySettingsStore, SettingsStore};
    pub use crate::telemetry::{
        HistoryEntry, HistoryFilter, HistoryOrder, LiveSnapshot, MotionStats, Reading,
        TelemetryStore,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
