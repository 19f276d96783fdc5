//! Failure statistics tracking.
//!
//! This module provides thread-safe counters of terminal failures per
//! [`ErrorKind`], shared by every exchange a client runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use strum::IntoEnumIterator;

use super::types::ErrorKind;

/// Thread-safe failure counters.
///
/// All kinds are initialized to zero on creation, so lookups never miss.
/// Share across tasks with `Arc`.
#[derive(Debug)]
pub struct ErrorStats {
    errors: HashMap<ErrorKind, AtomicUsize>,
    reconnects: AtomicUsize,
}

impl ErrorStats {
    pub fn new() -> Self {
        let mut errors = HashMap::new();
        for kind in ErrorKind::iter() {
            errors.insert(kind, AtomicUsize::new(0));
        }
        ErrorStats {
            errors,
            reconnects: AtomicUsize::new(0),
        }
    }

    /// Increment the counter for `kind`.
    pub fn increment(&self, kind: ErrorKind) {
        if let Some(counter) = self.errors.get(&kind) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            log::error!("No counter for error kind {:?}", kind);
        }
    }

    /// Record that an exchange was re-run on a fresh connection.
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the count for an error kind.
    pub fn count(&self, kind: ErrorKind) -> usize {
        self.errors
            .get(&kind)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Number of reconnects performed.
    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Sum of all error counters.
    pub fn total(&self) -> usize {
        self.errors.values().map(|c| c.load(Ordering::SeqCst)).sum()
    }

    /// Non-zero counters, in taxonomy order.
    pub fn summary(&self) -> Vec<(ErrorKind, usize)> {
        ErrorKind::iter()
            .map(|kind| (kind, self.count(kind)))
            .filter(|(_, n)| *n > 0)
            .collect()
    }
}

impl Default for ErrorStats {
    fn default() -> Self {
        Self::new()
    }
}
