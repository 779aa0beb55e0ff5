//! # Single-Flight Download Coordination
//!
//! Ensures at most one task fetches a given blob digest at a time, across
//! every pull running in this process. A task that finds a digest marked
//! in-flight waits for either the cached file to appear (the other task
//! succeeded) or the mark to clear without a file (the other task failed,
//! so the waiter fetches for itself).
//!
//! The set is guarded by a plain mutex; hold time is a single insert,
//! remove, or membership test, so tasks never await while holding it.

use crate::constants::FLIGHT_POLL_INTERVAL;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// Process-local registry of digests currently being fetched.
#[derive(Debug, Default)]
pub struct FlightTracker {
    in_flight: Mutex<HashSet<String>>,
}

impl FlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff some task is currently fetching `digest`.
    pub fn is_downloading(&self, digest: &str) -> bool {
        self.in_flight
            .lock()
            .expect("flight set poisoned")
            .contains(digest)
    }

    /// Marks `digest` as in flight. Idempotent.
    pub fn mark_started(&self, digest: &str) {
        self.in_flight
            .lock()
            .expect("flight set poisoned")
            .insert(digest.to_string());
    }

    /// Clears the in-flight mark for `digest`.
    pub fn mark_complete(&self, digest: &str) {
        self.in_flight
            .lock()
            .expect("flight set poisoned")
            .remove(digest);
    }

    /// Waits until the mark on `digest` clears or `expected_path` exists.
    ///
    /// Polls once per second. Returns as soon as either condition holds;
    /// callers must re-check the file to learn which one did.
    pub async fn wait_for(&self, digest: &str, expected_path: &Path) {
        while self.is_downloading(digest) && !expected_path.exists() {
            debug!("waiting for in-flight download of {}", digest);
            tokio::time::sleep(FLIGHT_POLL_INTERVAL).await;
        }
    }
}
