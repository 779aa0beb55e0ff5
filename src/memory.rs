//! # Host Memory Probe
//!
//! Two decisions derive from a single free-memory reading:
//!
//! - **Chunk size** for streaming copies: defaults to 512 KiB, scales up to
//!   2 MiB when at least 1 GiB is free.
//! - **Memory-constrained** predicate: free memory below 2 GiB, or a failed
//!   reading. Failure counts as constrained so a broken probe can only make
//!   the engine more careful, never less.
//!
//! The probe is a trait so tests can pin a reading instead of touching the
//! host.

use crate::constants::{
    CHUNK_SCALING_THRESHOLD, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MEMORY_CONSTRAINED_THRESHOLD,
};
use sysinfo::System;

/// Source of host free-memory readings.
pub trait MemoryProbe: Send + Sync {
    /// Current free memory in bytes, or `None` if the query failed.
    fn free_memory(&self) -> Option<u64>;

    /// Copy chunk size appropriate for the current reading.
    fn optimal_chunk_size(&self) -> u64 {
        match self.free_memory() {
            Some(free) if free >= CHUNK_SCALING_THRESHOLD => {
                (free / 1000).clamp(DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE)
            }
            _ => DEFAULT_CHUNK_SIZE,
        }
    }

    /// Whether the host should be treated as memory-constrained.
    fn memory_constrained(&self) -> bool {
        match self.free_memory() {
            Some(free) => free < MEMORY_CONSTRAINED_THRESHOLD,
            None => true,
        }
    }
}

/// Probe backed by the live host.
#[derive(Debug, Default)]
pub struct HostMemoryProbe;

impl HostMemoryProbe {
    pub fn new() -> Self {
        Self
    }
}

impl MemoryProbe for HostMemoryProbe {
    fn free_memory(&self) -> Option<u64> {
        let mut sys = System::new();
        sys.refresh_memory();
        let available = sys.available_memory();
        // A zero reading means the platform gave us nothing usable.
        (available > 0).then_some(available)
    }
}

/// Probe with a pinned reading, for tests and callers that already know.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemoryProbe {
    free: Option<u64>,
}

impl FixedMemoryProbe {
    pub fn new(free: Option<u64>) -> Self {
        Self { free }
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn free_memory(&self) -> Option<u64> {
        self.free
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn default_chunk_when_reading_missing() {
        let probe = FixedMemoryProbe::new(None);
        assert_eq!(probe.optimal_chunk_size(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn default_chunk_below_scaling_threshold() {
        let probe = FixedMemoryProbe::new(Some(GIB - 1));
        assert_eq!(probe.optimal_chunk_size(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn chunk_scales_with_free_memory() {
        // 1 GiB free → ~1 MiB chunks, inside the clamp.
        let probe = FixedMemoryProbe::new(Some(GIB));
        assert_eq!(probe.optimal_chunk_size(), GIB / 1000);
    }

    #[test]
    fn chunk_clamped_to_maximum() {
        let probe = FixedMemoryProbe::new(Some(64 * GIB));
        assert_eq!(probe.optimal_chunk_size(), MAX_CHUNK_SIZE);
    }

    #[test]
    fn constrained_below_two_gib() {
        assert!(FixedMemoryProbe::new(Some(2 * GIB - 1)).memory_constrained());
        assert!(!FixedMemoryProbe::new(Some(2 * GIB)).memory_constrained());
    }

    #[test]
    fn failed_reading_counts_as_constrained() {
        assert!(FixedMemoryProbe::new(None).memory_constrained());
    }
}
