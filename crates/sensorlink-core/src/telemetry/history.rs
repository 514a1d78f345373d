//! Motion history
//!
//! Bounded, insertion-ordered log of motion-triggered readings.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::{HistoryEntry, Reading};

/// Maximum entries kept before the oldest is evicted
pub const HISTORY_CAPACITY: usize = 100;

/// Sort order for derived views
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryOrder {
    /// Most recent first
    #[default]
    NewestFirst,
    /// Insertion order
    OldestFirst,
}

/// Filter for derived views
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryFilter {
    /// Every entry
    #[default]
    All,
    /// Temperature above 25 °C
    HighTemperature,
    /// Temperature below 25 °C
    LowTemperature,
    /// Humidity above 60 %
    HighHumidity,
    /// Humidity below 40 %
    LowHumidity,
}

impl HistoryFilter {
    /// Whether a reading passes this filter
    pub fn matches(&self, reading: &Reading) -> bool {
        match self {
            HistoryFilter::All => true,
            HistoryFilter::HighTemperature => reading.temperature > 25.0,
            HistoryFilter::LowTemperature => reading.temperature < 25.0,
            HistoryFilter::HighHumidity => reading.humidity > 60.0,
            HistoryFilter::LowHumidity => reading.humidity < 40.0,
        }
    }
}

/// FIFO-evicting history buffer
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl History {
    /// History with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    /// History holding at most `capacity` entries (at least one)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest when full
    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the history is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries in insertion order
    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Most recent entry
    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    /// Filtered, ordered copy of the history
    pub fn view(&self, order: HistoryOrder, filter: HistoryFilter) -> Vec<HistoryEntry> {
        let matching = |e: &&HistoryEntry| filter.matches(&e.reading);
        match order {
            HistoryOrder::OldestFirst => self.entries.iter().filter(matching).cloned().collect(),
            HistoryOrder::NewestFirst => {
                self.entries.iter().rev().filter(matching).cloned().collect()
            }
        }
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}
