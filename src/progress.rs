//! # Download Progress Accounting
//!
//! Advisory byte counter for the download phase. Updates are serialized
//! behind a mutex so concurrent layer tasks never interleave a read-modify-
//! write; the counter is reporting only and carries no correctness weight.

use tracing::info;

#[derive(Debug)]
struct ProgressInner {
    completed: u64,
    last_tick: u64,
}

/// Serialized byte counter with decile logging.
#[derive(Debug)]
pub struct ProgressTracker {
    total: u64,
    inner: tokio::sync::Mutex<ProgressInner>,
}

impl ProgressTracker {
    /// Creates a tracker expecting `total` bytes across all layers.
    pub fn new(total: u64) -> Self {
        Self {
            total,
            inner: tokio::sync::Mutex::new(ProgressInner {
                completed: 0,
                last_tick: 0,
            }),
        }
    }

    /// Total bytes expected.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Records `bytes` more completed, logging at each new 10% boundary.
    pub async fn add(&self, bytes: u64) {
        let mut inner = self.inner.lock().await;
        inner.completed = inner.completed.saturating_add(bytes);
        if self.total == 0 {
            return;
        }
        let tick = inner.completed.min(self.total) * 10 / self.total;
        if tick > inner.last_tick {
            inner.last_tick = tick;
            info!(
                "downloaded {} / {} bytes ({}%)",
                inner.completed,
                self.total,
                tick * 10
            );
        }
    }

    /// Bytes recorded so far.
    pub async fn completed(&self) -> u64 {
        self.inner.lock().await.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accumulates_bytes() {
        let progress = ProgressTracker::new(100);
        progress.add(30).await;
        progress.add(70).await;
        assert_eq!(progress.completed().await, 100);
    }

    #[tokio::test]
    async fn zero_total_never_panics() {
        let progress = ProgressTracker::new(0);
        progress.add(10).await;
        assert_eq!(progress.completed().await, 10);
    }

    #[tokio::test]
    async fn serialized_under_concurrent_adds() {
        use std::sync::Arc;

        let progress = Arc::new(ProgressTracker::new(1000));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let progress = Arc::clone(&progress);
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    progress.add(10).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(progress.completed().await, 1000);
    }
}
