//! Firing trace for recording and comparing callback order.
//!
//! Every callback fired by a [`crate::clock::VirtualClock`] is appended to its
//! trace. Two runs of the same scenario must produce identical traces; the
//! hash and divergence helpers make that cheap to check.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// One fired callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FiringRecord {
    /// Virtual time at which the callback fired.
    pub due: u64,
    /// Sequence number assigned when it was scheduled.
    pub seq: u64,
    /// Label given at scheduling time, if any.
    pub label: Option<String>,
}

/// Ordered list of fired callbacks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FiringTrace {
    records: Vec<FiringRecord>,
}

impl FiringTrace {
    /// Create an empty trace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record.
    pub fn record(&mut self, due: u64, seq: u64, label: Option<String>) {
        self.records.push(FiringRecord { due, seq, label });
    }

    /// All records in firing order.
    #[must_use]
    pub fn records(&self) -> &[FiringRecord] {
        &self.records
    }

    /// Number of fired callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing has fired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Labels of labelled records, in firing order.
    #[must_use]
    pub fn labels(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter_map(|r| r.label.as_deref())
            .collect()
    }

    /// Virtual time at which the first record with `label` fired.
    #[must_use]
    pub fn fired_at(&self, label: &str) -> Option<u64> {
        self.records
            .iter()
            .find(|r| r.label.as_deref() == Some(label))
            .map(|r| r.due)
    }

    /// Hash of the full trace.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Index of the first record that differs from `other`.
    ///
    /// A trace that is a strict prefix of the other diverges at its length.
    #[must_use]
    pub fn first_divergence(&self, other: &FiringTrace) -> Option<usize> {
        let shared = self.records.len().min(other.records.len());
        (0..shared)
            .find(|&i| self.records[i] != other.records[i])
            .or_else(|| (self.records.len() != other.records.len()).then_some(shared))
    }
}
