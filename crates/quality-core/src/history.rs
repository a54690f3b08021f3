//! Bounded per-connection snapshot history

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::types::QualitySnapshot;

/// Fixed-capacity FIFO of quality snapshots; the oldest entry is evicted first
#[derive(Debug, Clone)]
pub struct QualityHistory {
    entries: VecDeque<QualitySnapshot>,
    capacity: usize,
}

impl QualityHistory {
    /// Create an empty history; `QualityConfig::validate` rejects a zero capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a snapshot, returning the evicted one when full
    pub fn push(&mut self, snapshot: QualitySnapshot) -> Option<QualitySnapshot> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(snapshot);
        evicted
    }

    pub fn latest(&self) -> Option<&QualitySnapshot> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &QualitySnapshot> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<QualitySnapshot> {
        self.entries.iter().cloned().collect()
    }

    /// Mean overall score across the retained snapshots
    pub fn average_score(&self) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        let sum: f64 = self.entries.iter().map(|s| s.overall_score).sum();
        Some(sum / self.entries.len() as f64)
    }

    /// The `count` most recent snapshots, oldest first
    pub fn recent(&self, count: usize) -> Result<Vec<&QualitySnapshot>> {
        if self.entries.len() < count {
            return Err(Error::InsufficientHistory {
                required: count,
                available: self.entries.len(),
            });
        }
        Ok(self.entries.iter().skip(self.entries.len() - count).collect())
    }
}
