//! Telemetry state
//!
//! Live snapshot, motion history and motion counters, updated together by
//! [`TelemetryStore::ingest`].

use chrono::{DateTime, Utc};

use super::{
    decode, History, HistoryEntry, HistoryFilter, HistoryOrder, LiveSnapshot, MotionStats,
    Reading,
};

/// What ingesting a reading did
#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    /// Live values refreshed only
    Sample(Reading),
    /// Live values refreshed and a motion entry recorded
    Motion(HistoryEntry),
}

/// Ingest pipeline state
#[derive(Debug, Clone, Default)]
pub struct TelemetryStore {
    live: LiveSnapshot,
    history: History,
    stats: MotionStats,
}

impl TelemetryStore {
    /// Empty store with the default history capacity
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store with a custom history capacity
    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            history: History::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Apply a reading
    ///
    /// Environmental values always track the latest sample; the history only
    /// grows for readings that carry presence.
    pub fn ingest(&mut self, reading: Reading, now: DateTime<Utc>) -> Ingested {
        self.live.temperature = reading.temperature;
        self.live.humidity = reading.humidity;
        self.live.counter = reading.counter;
        self.live.presence = reading.presence;
        self.live.updated_at = Some(now);

        if !reading.presence {
            return Ingested::Sample(reading);
        }

        let entry = HistoryEntry {
            reading,
            captured_at: now,
        };
        self.history.push(entry.clone());
        self.stats.total_detections += 1;
        self.stats.last_detection = Some(now);
        tracing::debug!(
            "Motion #{} recorded ({} in history)",
            self.stats.total_detections,
            self.history.len()
        );
        Ingested::Motion(entry)
    }

    /// Decode a line and apply it; undecodable lines change nothing
    pub fn ingest_line(&mut self, line: &str, now: DateTime<Utc>) -> Option<Ingested> {
        decode(line).map(|reading| self.ingest(reading, now))
    }

    /// Current live values
    pub fn live(&self) -> LiveSnapshot {
        self.live
    }

    /// Motion history
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Filtered, ordered copy of the history
    pub fn history_view(&self, order: HistoryOrder, filter: HistoryFilter) -> Vec<HistoryEntry> {
        self.history.view(order, filter)
    }

    /// Motion counters
    pub fn stats(&self) -> MotionStats {
        self.stats
    }

    /// Drop recorded motion and reset counters; live values are kept
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.stats = MotionStats::default();
    }
}
