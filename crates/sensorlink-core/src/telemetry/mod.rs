//! Telemetry Ingest
//!
//! Decodes device lines into readings, keeps the live snapshot and records
//! motion detections in a bounded history.

mod decode;
mod history;
mod store;

pub use decode::decode;
pub use history::{History, HistoryFilter, HistoryOrder, HISTORY_CAPACITY};
pub use store::{Ingested, TelemetryStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One decoded sample from the sensor board
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Temperature in °C
    pub temperature: f64,
    /// Relative humidity in %
    pub humidity: f64,
    /// Device-assigned sequence counter
    pub counter: u64,
    /// Motion currently detected
    pub presence: bool,
}

impl Reading {
    /// Temperature classification
    pub fn temperature_band(&self) -> TemperatureBand {
        TemperatureBand::of(self.temperature)
    }

    /// Humidity classification
    pub fn humidity_band(&self) -> HumidityBand {
        HumidityBand::of(self.humidity)
    }
}

/// Most recent values, refreshed on every decoded line
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiveSnapshot {
    /// Temperature in °C
    pub temperature: f64,
    /// Relative humidity in %
    pub humidity: f64,
    /// Last sequence counter
    pub counter: u64,
    /// Last presence flag
    pub presence: bool,
    /// When the snapshot was last refreshed
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for LiveSnapshot {
    // Neutral room values shown before the first sample arrives
    fn default() -> Self {
        Self {
            temperature: 25.0,
            humidity: 50.0,
            counter: 0,
            presence: false,
            updated_at: None,
        }
    }
}

impl LiveSnapshot {
    /// Temperature classification
    pub fn temperature_band(&self) -> TemperatureBand {
        TemperatureBand::of(self.temperature)
    }

    /// Humidity classification
    pub fn humidity_band(&self) -> HumidityBand {
        HumidityBand::of(self.humidity)
    }
}

/// A motion-triggered reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The reading that carried presence=true
    pub reading: Reading,
    /// When it was ingested
    pub captured_at: DateTime<Utc>,
}

/// Running motion counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionStats {
    /// Readings accepted into history since the last clear
    pub total_detections: u64,
    /// Capture time of the most recent one
    pub last_detection: Option<DateTime<Utc>>,
}

/// Temperature bands used by dashboards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureBand {
    /// Below 10 °C
    Cold,
    /// 10 to 20 °C
    Mild,
    /// 20 to 30 °C
    Warm,
    /// 30 °C and above
    Hot,
}

impl TemperatureBand {
    /// Classify a temperature
    pub fn of(celsius: f64) -> Self {
        if celsius < 10.0 {
            TemperatureBand::Cold
        } else if celsius < 20.0 {
            TemperatureBand::Mild
        } else if celsius < 30.0 {
            TemperatureBand::Warm
        } else {
            TemperatureBand::Hot
        }
    }
}

/// Humidity bands used by dashboards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HumidityBand {
    /// Below 30 %
    Dry,
    /// 30 to 60 %
    Comfortable,
    /// 60 % and above
    Humid,
}

impl HumidityBand {
    /// Classify a relative humidity
    pub fn of(percent: f64) -> Self {
        if percent < 30.0 {
            HumidityBand::Dry
        } else if percent < 60.0 {
            HumidityBand::Comfortable
        } else {
            HumidityBand::Humid
        }
    }
}
